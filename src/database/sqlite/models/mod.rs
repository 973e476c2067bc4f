
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{FromRow, Sqlite};
use thiserror::Error;

pub type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Why a corpus line produced no records
#[derive(Debug, Error)]
pub enum CorpusLineError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` is empty")]
    EmptyField(&'static str),
}

/// A record type stored next to each vector.
///
/// Each implementation owns one table keyed by `faiss_id`. The column list
/// in `COLUMNS` must match the order in which `bind_columns` binds values
/// and the names `FromRow` reads back.
pub trait Payload:
    for<'r> FromRow<'r, SqliteRow>
    + Serialize
    + Clone
    + Send
    + Sync
    + Unpin
    + std::fmt::Debug
    + 'static
{
    /// Build mode name, also the default index subdirectory
    const MODE: &'static str;
    const TABLE: &'static str;
    /// Column definitions following `faiss_id INTEGER PRIMARY KEY`
    const SCHEMA: &'static str;
    const COLUMNS: &'static [&'static str];

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q>;

    /// Text handed to the encoder for this record
    fn embedding_text(&self) -> String;

    /// Natural key used to drop duplicate search results
    fn dedup_key(&self) -> &str;

    /// Parse one corpus line into zero or more records
    fn parse_line(line: &str) -> Result<Vec<Self>, CorpusLineError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Passage {
    #[sqlx(rename = "passage")]
    pub text: String,
    pub title: String,
    #[sqlx(rename = "doc_id")]
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
    #[sqlx(rename = "passage")]
    pub source_passage: String,
    #[sqlx(rename = "title")]
    pub source_title: String,
}

#[derive(Debug, Deserialize)]
struct PassageLine {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    passage: Option<String>,
    #[serde(default)]
    id: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct QaLine {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    passage: Option<String>,
    #[serde(default)]
    qa: Option<Vec<QaItem>>,
}

#[derive(Debug, Deserialize)]
struct QaItem {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    answer: Option<String>,
}

/// Corpus ids show up as both strings and numbers
fn id_to_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl Payload for Passage {
    const MODE: &'static str = "passage";
    const TABLE: &'static str = "passages";
    const SCHEMA: &'static str = "passage TEXT NOT NULL, title TEXT NOT NULL, doc_id TEXT";
    const COLUMNS: &'static [&'static str] = &["passage", "title", "doc_id"];

    #[inline]
    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.text.as_str())
            .bind(self.title.as_str())
            .bind(self.source_id.as_deref())
    }

    #[inline]
    fn embedding_text(&self) -> String {
        format!("passage title: {}\n{}", self.title, self.text)
    }

    #[inline]
    fn dedup_key(&self) -> &str {
        &self.text
    }

    #[inline]
    fn parse_line(line: &str) -> Result<Vec<Self>, CorpusLineError> {
        let parsed: PassageLine = serde_json::from_str(line)?;

        let text = parsed.passage.ok_or(CorpusLineError::MissingField("passage"))?;
        if text.trim().is_empty() {
            return Err(CorpusLineError::EmptyField("passage"));
        }

        Ok(vec![Self {
            text,
            title: parsed.title.unwrap_or_default(),
            source_id: parsed.id.and_then(id_to_string),
        }])
    }
}

impl Payload for QaPair {
    const MODE: &'static str = "qa";
    const TABLE: &'static str = "qa_pairs";
    const SCHEMA: &'static str =
        "question TEXT NOT NULL, answer TEXT NOT NULL, passage TEXT NOT NULL, title TEXT NOT NULL";
    const COLUMNS: &'static [&'static str] = &["question", "answer", "passage", "title"];

    #[inline]
    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.question.as_str())
            .bind(self.answer.as_str())
            .bind(self.source_passage.as_str())
            .bind(self.source_title.as_str())
    }

    #[inline]
    fn embedding_text(&self) -> String {
        format!("{}\n{}", self.question, self.answer)
    }

    #[inline]
    fn dedup_key(&self) -> &str {
        &self.question
    }

    /// Every complete question/answer item becomes one record; incomplete
    /// items are dropped without rejecting the rest of the line.
    #[inline]
    fn parse_line(line: &str) -> Result<Vec<Self>, CorpusLineError> {
        let parsed: QaLine = serde_json::from_str(line)?;

        let items = parsed.qa.ok_or(CorpusLineError::MissingField("qa"))?;
        if items.is_empty() {
            return Err(CorpusLineError::EmptyField("qa"));
        }

        let source_passage = parsed.passage.unwrap_or_default();
        let source_title = parsed.title.unwrap_or_default();

        let pairs: Vec<Self> = items
            .into_iter()
            .filter_map(|item| match (item.question, item.answer) {
                (Some(question), Some(answer)) if !question.trim().is_empty() => Some(Self {
                    question,
                    answer,
                    source_passage: source_passage.clone(),
                    source_title: source_title.clone(),
                }),
                _ => None,
            })
            .collect();

        if pairs.is_empty() {
            return Err(CorpusLineError::EmptyField("qa"));
        }

        Ok(pairs)
    }
}
