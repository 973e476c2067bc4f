use anyhow::{Context, Result};
use console::style;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Config;
use crate::database::{IndexMeta, OpenMode, Payload};
use crate::embeddings::{EncoderBackend, OllamaEncoder, build_encoder};
use crate::generation::{GenerationClient, GenerationRequest, extract_field};
use crate::retriever::{
    BuildOptions, BuildStats, CHECKPOINT_DIR, ConsistencyReport, DB_FILE, INDEX_FILE, META_FILE,
    Retriever, RetrieverSettings, SearchHit, list_checkpoints,
};

/// Overrides for the `build` command; `None` falls back to the config file
#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
    pub out: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub save_every: Option<u64>,
    pub append: bool,
}

/// Options shared by `search` and `search-batch`
#[derive(Debug, Clone, Default)]
pub struct SearchArgs {
    pub index: Option<PathBuf>,
    pub topk: Option<usize>,
    /// Candidates pulled from the index before deduplication
    pub fetch_k: Option<usize>,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct QueryResult<'a, P: Serialize> {
    query: &'a str,
    hits: &'a [SearchHit<P>],
}

fn new_retriever<P: Payload>(config: &Config) -> Result<Retriever<P>> {
    let encoder = build_encoder(&config.encoder).context("Failed to create encoder")?;
    Ok(Retriever::new(
        encoder,
        RetrieverSettings::from(&config.retriever),
    ))
}

/// Index directory for this mode, either given or under the base directory
fn resolve_dir<P: Payload>(config: &Config, dir: Option<PathBuf>) -> PathBuf {
    dir.unwrap_or_else(|| config.index_dir(P::MODE))
}

/// Load the final index in `dir`, or the newest checkpoint if the build
/// never finished. Also returns the side record of the pair that was loaded.
async fn open_index<P: Payload>(config: &Config, dir: &Path) -> Result<(Retriever<P>, PathBuf)> {
    let mut retriever = new_retriever::<P>(config)?;

    if dir.join(INDEX_FILE).exists() {
        retriever
            .load_from_dir(dir)
            .await
            .with_context(|| format!("Failed to load index from {}", dir.display()))?;
        return Ok((retriever, dir.join(META_FILE)));
    }

    let checkpoint = retriever
        .load_latest_checkpoint(dir.join(CHECKPOINT_DIR), dir.join(DB_FILE))
        .await
        .with_context(|| format!("No index or checkpoint found in {}", dir.display()))?;
    warn!(
        "Using checkpoint {} instead of a final index",
        checkpoint.index_path.display()
    );

    Ok((retriever, checkpoint.meta_path))
}

/// Index a JSONL corpus and save the result under the output directory
#[inline]
pub async fn build<P: Payload>(config: &Config, corpus: &Path, args: BuildArgs) -> Result<BuildStats> {
    let dir = resolve_dir::<P>(config, args.out);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create index directory {}", dir.display()))?;

    let mut options = BuildOptions::in_dir(&config.retriever, &dir);
    if let Some(batch_size) = args.batch_size {
        options = options.with_batch_size(batch_size);
    }
    if let Some(save_every) = args.save_every {
        options = options.with_save_every(save_every);
    }

    let mut retriever = new_retriever::<P>(config)?;
    if args.append {
        options = options.with_mode(OpenMode::Append);
        if dir.join(INDEX_FILE).exists() {
            retriever
                .load_from_dir(&dir)
                .await
                .context("Failed to load the index to append to")?;
            info!("Appending to {} existing documents", retriever.len());
        } else {
            warn!(
                "No index in {}, appending to an empty one",
                dir.display()
            );
        }
    }

    eprintln!(
        "{} {} into {}",
        style("Indexing").bold().cyan(),
        corpus.display(),
        style(dir.display()).dim()
    );

    let stats = retriever.build_from_file(corpus, &options).await?;

    if retriever.is_empty() {
        eprintln!("{}", style("No documents were indexed.").yellow());
    } else {
        retriever.save_to_dir(&dir)?;
    }

    eprintln!("{}", style("Build completed").green());
    eprintln!("  Lines read: {}", stats.lines_read);
    eprintln!("  Lines skipped: {}", stats.lines_skipped);
    eprintln!("  Documents added: {}", stats.documents_added);
    eprintln!("  Total documents: {}", stats.total_documents);
    eprintln!("  Checkpoints: {}", stats.checkpoints.len());
    eprintln!("  Duration: {:.2}s", stats.duration.as_secs_f64());

    Ok(stats)
}

fn print_hits<P: Payload>(query: &str, hits: &[SearchHit<P>], json: bool) -> Result<()> {
    if json {
        let line = serde_json::to_string(&QueryResult { query, hits })
            .context("Failed to serialize results")?;
        println!("{line}");
        return Ok(());
    }

    println!("{} {}", style("Query:").bold(), query);
    if hits.is_empty() {
        println!("  {}", style("No results").dim());
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "  {}. {} (id {})",
            rank + 1,
            style(format!("{:.4}", hit.score)).cyan(),
            hit.id
        );
        let fields = serde_json::to_value(&hit.payload).context("Failed to serialize payload")?;
        if let Some(fields) = fields.as_object() {
            for (name, value) in fields {
                match value {
                    serde_json::Value::String(text) => println!("     {name}: {text}"),
                    serde_json::Value::Null => {}
                    other => println!("     {name}: {other}"),
                }
            }
        }
    }
    println!();
    Ok(())
}

/// Run one query against a saved index
#[inline]
pub async fn search<P: Payload>(
    config: &Config,
    query: &str,
    args: SearchArgs,
) -> Result<Vec<SearchHit<P>>> {
    let dir = resolve_dir::<P>(config, args.index);
    let (retriever, _) = open_index::<P>(config, &dir).await?;
    let topk = args.topk.unwrap_or(retriever.settings().default_topk);

    let hits = retriever.search(query, topk, args.fetch_k).await?;
    print_hits(query, &hits, args.json)?;
    Ok(hits)
}

/// A query line is either plain text or a JSON object with a `question`
/// or `query` field
fn query_from_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
            return ["question", "query"]
                .iter()
                .find_map(|field| value.get(*field).and_then(|v| v.as_str()))
                .map(str::to_string);
        }
    }

    Some(line.to_string())
}

/// Run every query in `queries` against one loaded index, `concurrency`
/// searches at a time. Results are printed in input order.
#[inline]
pub async fn search_batch<P: Payload>(
    config: &Config,
    queries: &Path,
    args: SearchArgs,
    concurrency: usize,
) -> Result<usize> {
    let content = fs::read_to_string(queries)
        .with_context(|| format!("Failed to read queries from {}", queries.display()))?;
    let queries: Vec<String> = content.lines().filter_map(query_from_line).collect();
    if queries.is_empty() {
        eprintln!("{}", style("No queries found.").yellow());
        return Ok(0);
    }

    let dir = resolve_dir::<P>(config, args.index);
    let (retriever, _) = open_index::<P>(config, &dir).await?;
    let topk = args.topk.unwrap_or(retriever.settings().default_topk);
    let fetch_k = args.fetch_k;

    info!(
        "Running {} queries with concurrency {}",
        queries.len(),
        concurrency
    );

    let retriever = &retriever;
    let results: Vec<_> = stream::iter(queries)
        .map(|query| async move {
            let hits = retriever.search(&query, topk, fetch_k).await;
            (query, hits)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut answered = 0;
    for (query, hits) in results {
        match hits {
            Ok(hits) => {
                print_hits(&query, &hits, args.json)?;
                answered += 1;
            }
            Err(e) => eprintln!("{} {}: {}", style("Query failed").red(), query, e),
        }
    }

    Ok(answered)
}

/// Report on the artifacts in an index directory
#[inline]
pub async fn status<P: Payload>(config: &Config, dir: Option<PathBuf>) -> Result<ConsistencyReport> {
    let dir = resolve_dir::<P>(config, dir);
    println!("{} {}", style("Index directory:").bold(), dir.display());

    let checkpoints = list_checkpoints(&dir.join(CHECKPOINT_DIR)).unwrap_or_default();
    if checkpoints.is_empty() {
        println!("  Checkpoints: none");
    } else {
        let counts = checkpoints
            .iter()
            .map(|checkpoint| {
                checkpoint
                    .count
                    .map_or_else(|| "final".to_string(), |count| count.to_string())
            })
            .join(", ");
        println!("  Checkpoints: {}", counts);
    }

    let (retriever, meta_path) = open_index::<P>(config, &dir).await?;
    let dimension = retriever
        .dimension()
        .map_or_else(|| "unset".to_string(), |d| d.to_string());
    println!("  Vectors: {}", retriever.len());
    println!("  Dimension: {}", dimension);

    let recorded = IndexMeta::load(&meta_path).ok();
    if let Some(saved_at) = recorded.as_ref().and_then(|meta| meta.saved_at) {
        println!("  Saved at: {}", saved_at.to_rfc3339());
    }

    let store = retriever
        .store()
        .context("Metadata store is not open")?;
    let report = ConsistencyReport::check(retriever.len() as u64, recorded.as_ref(), store).await?;

    if report.is_consistent {
        println!("  {}", style(report.summary()).green());
    } else {
        println!("  {}", style(report.summary()).yellow());
        if !report.missing_rows.is_empty() {
            let shown = report.missing_rows.len().min(10);
            println!(
                "  Missing rows (first {}): {}",
                shown,
                report.missing_rows.iter().take(shown).join(", ")
            );
        }
    }

    Ok(report)
}

/// Send one prompt to the generation service and print the reply, or a
/// single field of it when the reply is JSON
#[inline]
pub async fn generate(
    config: &Config,
    prompt: String,
    field: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
) -> Result<()> {
    let client = GenerationClient::new(&config.generation)?;

    let mut request = GenerationRequest::new(prompt);
    if let Some(temperature) = temperature {
        request = request.with_temperature(temperature);
    }
    if let Some(max_tokens) = max_tokens {
        request = request.with_max_tokens(max_tokens);
    }

    let response = tokio::task::spawn_blocking(move || client.generate(&request))
        .await
        .context("Generation task panicked")??;

    match field {
        Some(field) => match extract_field(&response.text, &field) {
            Some(value) => println!("{value}"),
            None => {
                eprintln!(
                    "{} `{}` not found in response",
                    style("Field").yellow(),
                    field
                );
                println!("{}", response.text);
            }
        },
        None => println!("{}", response.text),
    }

    eprintln!(
        "{}",
        style(format!(
            "{} input + {} output tokens",
            response.usage.input_tokens, response.usage.output_tokens
        ))
        .dim()
    );
    Ok(())
}

/// Check that the encoder and generation services answer
#[inline]
pub async fn health(config: &Config) -> Result<()> {
    let encoder_config = config.encoder.clone();
    let generation_config = config.generation.clone();

    let (encoder, generation) = tokio::task::spawn_blocking(move || {
        let encoder = match encoder_config.backend {
            EncoderBackend::Ollama => OllamaEncoder::new(&encoder_config)
                .and_then(|encoder| encoder.health_check())
                .map(|()| encoder_config.model.clone()),
            EncoderBackend::Hashing => Ok("hashing (offline)".to_string()),
        };
        let generation = GenerationClient::new(&generation_config)
            .map_err(|e| format!("{e:#}"))
            .and_then(|client| client.health_check().map_err(|e| e.to_string()));
        (encoder, generation)
    })
    .await
    .context("Health check task panicked")?;

    match encoder {
        Ok(model) => println!("{} Encoder: {}", style("✓").green(), model),
        Err(e) => println!("{} Encoder: {:#}", style("✗").red(), e),
    }
    match generation {
        Ok(_) => println!(
            "{} Generation: {}",
            style("✓").green(),
            config.generation.model_name
        ),
        Err(e) => println!("{} Generation: {}", style("✗").red(), e),
    }

    Ok(())
}
