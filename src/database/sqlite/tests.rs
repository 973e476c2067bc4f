use super::*;
use crate::database::sqlite::models::{Passage, QaPair};
use anyhow::Result;
use std::collections::HashSet;
use tempfile::TempDir;

fn passage(text: &str) -> Passage {
    Passage {
        text: text.to_string(),
        title: "T".to_string(),
        source_id: None,
    }
}

#[tokio::test]
async fn integration_open_creates_file_and_table() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("nested").join("corpus_meta.db");

    let store = MetadataStore::<Passage>::open(&db_path, OpenMode::Fresh).await?;
    assert!(db_path.exists());

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(store.pool())
    .await?;

    let actual_tables: HashSet<&str> = tables.iter().map(|t| t.as_str()).collect();
    assert_eq!(actual_tables, HashSet::from(["passages"]));

    Ok(())
}

#[tokio::test]
async fn integration_fresh_mode_drops_previous_rows() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("meta.db");

    let store = MetadataStore::<Passage>::open(&db_path, OpenMode::Fresh).await?;
    store.insert(0, &passage("first")).await?;
    store.insert(1, &passage("second")).await?;
    store.close().await;

    let appended = MetadataStore::<Passage>::open(&db_path, OpenMode::Append).await?;
    assert_eq!(appended.count().await?, 2);
    appended.insert(2, &passage("third")).await?;
    assert_eq!(appended.max_id().await?, Some(2));
    appended.close().await;

    let fresh = MetadataStore::<Passage>::open(&db_path, OpenMode::Fresh).await?;
    assert_eq!(fresh.count().await?, 0);
    assert_eq!(fresh.get(0).await?, None);

    Ok(())
}

#[tokio::test]
async fn integration_absent_id_is_not_an_error() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = MetadataStore::<QaPair>::open(temp_dir.path().join("qa.db"), OpenMode::Fresh).await?;

    assert_eq!(store.get(12).await?, None);
    assert!(store.get_many(&[]).await?.is_empty());
    assert!(store.get_many(&[1, 2, 3]).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn integration_payload_tables_coexist() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("shared.db");

    let passages = MetadataStore::<Passage>::open(&db_path, OpenMode::Fresh).await?;
    passages.insert(0, &passage("text")).await?;

    let pairs = MetadataStore::<QaPair>::open(&db_path, OpenMode::Fresh).await?;
    assert_eq!(pairs.count().await?, 0);
    assert_eq!(passages.count().await?, 1);

    Ok(())
}
