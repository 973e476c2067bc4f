// Retriever module
// Builds a flat index plus metadata table from a JSONL corpus and serves
// deduplicated top-k search over it

pub mod checkpoint;
pub mod consistency;


use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RetrieverConfig;
use crate::database::{FlatIndex, IndexMeta, MetadataStore, OpenMode, Payload};
use crate::embeddings::Encoder;
use crate::{Result, RetrieverError};

pub use checkpoint::{Checkpoint, clear_checkpoints, latest_checkpoint, list_checkpoints};
pub use consistency::ConsistencyReport;

pub const INDEX_FILE: &str = "corpus.index.arrow";
pub const META_FILE: &str = "corpus.meta.json";
pub const DB_FILE: &str = "corpus_meta.db";
pub const CHECKPOINT_DIR: &str = "checkpoints";

/// Query-time tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrieverSettings {
    /// Candidates fetched per requested hit before deduplication
    pub oversample: usize,
    pub default_topk: usize,
}

impl Default for RetrieverSettings {
    #[inline]
    fn default() -> Self {
        Self::from(&RetrieverConfig::default())
    }
}

impl From<&RetrieverConfig> for RetrieverSettings {
    #[inline]
    fn from(config: &RetrieverConfig) -> Self {
        Self {
            oversample: config.oversample.max(1) as usize,
            default_topk: config.default_topk.max(1) as usize,
        }
    }
}

/// Where and how a build writes its artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub db_path: PathBuf,
    pub checkpoint_dir: PathBuf,
    /// Where the final index is saved; a fresh build removes the previous
    /// index and side record found there
    pub output_dir: Option<PathBuf>,
    /// Records per encoder call
    pub batch_size: usize,
    /// Documents between numbered checkpoints
    pub save_every: u64,
    pub mode: OpenMode,
}

impl BuildOptions {
    #[inline]
    pub fn new(db_path: impl Into<PathBuf>, checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self::from_config(&RetrieverConfig::default(), db_path, checkpoint_dir)
    }

    #[inline]
    pub fn from_config(
        config: &RetrieverConfig,
        db_path: impl Into<PathBuf>,
        checkpoint_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            checkpoint_dir: checkpoint_dir.into(),
            output_dir: None,
            batch_size: config.batch_size as usize,
            save_every: config.save_every,
            mode: OpenMode::Fresh,
        }
    }

    /// Standard layout under `dir`: database and checkpoint directory
    /// next to where `save_to_dir` puts the final index
    #[inline]
    pub fn in_dir(config: &RetrieverConfig, dir: &Path) -> Self {
        Self {
            output_dir: Some(dir.to_path_buf()),
            ..Self::from_config(config, dir.join(DB_FILE), dir.join(CHECKPOINT_DIR))
        }
    }

    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[inline]
    pub fn with_save_every(mut self, save_every: u64) -> Self {
        self.save_every = save_every;
        self
    }

    #[inline]
    pub fn with_mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BuildStats {
    pub lines_read: u64,
    pub lines_skipped: u64,
    /// Documents indexed by this run
    pub documents_added: u64,
    /// Documents in the index after this run, including earlier runs
    pub total_documents: u64,
    /// Document counts at which numbered checkpoints were written
    pub checkpoints: Vec<u64>,
    pub duration: Duration,
}

/// One deduplicated search result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit<P> {
    pub id: u64,
    pub score: f32,
    pub payload: P,
}

/// Encoder, flat index and metadata table kept in lockstep.
///
/// Building takes `&mut self` and is single-writer; `search` takes `&self`
/// and may run concurrently once building is done.
pub struct Retriever<P: Payload> {
    encoder: Box<dyn Encoder>,
    settings: RetrieverSettings,
    index: FlatIndex,
    store: Option<MetadataStore<P>>,
}

impl<P: Payload> std::fmt::Debug for Retriever<P> {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("mode", &P::MODE)
            .field("settings", &self.settings)
            .field("dimension", &self.index.dimension())
            .field("documents", &self.index.len())
            .field("store", &self.store.as_ref().map(MetadataStore::path))
            .finish_non_exhaustive()
    }
}

/// Delete the index files a previous build left behind so that none of them
/// can be paired with the rows this build writes
fn remove_previous_artifacts(options: &BuildOptions) -> Result<()> {
    let removed = clear_checkpoints(&options.checkpoint_dir)?;
    if removed > 0 {
        info!(
            "Removed {} checkpoint files from {}",
            removed,
            options.checkpoint_dir.display()
        );
    }

    if let Some(dir) = &options.output_dir {
        for path in [dir.join(INDEX_FILE), dir.join(META_FILE)] {
            match std::fs::remove_file(&path) {
                Ok(()) => info!("Removed previous {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(RetrieverError::Io(e)),
            }
        }
    }

    Ok(())
}

impl<P: Payload> Retriever<P> {
    #[inline]
    pub fn new(encoder: Box<dyn Encoder>, settings: RetrieverSettings) -> Self {
        Self {
            encoder,
            settings,
            index: FlatIndex::new(),
            store: None,
        }
    }

    #[inline]
    pub fn settings(&self) -> RetrieverSettings {
        self.settings
    }

    #[inline]
    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    #[inline]
    pub fn store(&self) -> Option<&MetadataStore<P>> {
        self.store.as_ref()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.index.dimension()
    }

    /// Stream `corpus` (one JSON record per line) into the index and the
    /// metadata table.
    ///
    /// Malformed lines are logged and skipped. An encoder failure aborts the
    /// build; rows inserted before the failure stay in the table and
    /// checkpoints already written stay valid.
    #[inline]
    pub async fn build_from_file<T: AsRef<Path>>(
        &mut self,
        corpus: T,
        options: &BuildOptions,
    ) -> Result<BuildStats> {
        let corpus = corpus.as_ref();
        let started = Instant::now();
        let batch_size = options.batch_size.max(1);
        let save_every = options.save_every.max(1);

        let file = File::open(corpus).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                RetrieverError::ArtifactMissing(corpus.to_path_buf())
            } else {
                RetrieverError::Io(e)
            }
        })?;

        if options.mode == OpenMode::Fresh {
            remove_previous_artifacts(options)?;
        }

        let store = MetadataStore::<P>::open(&options.db_path, options.mode)
            .await
            .map_err(|e| RetrieverError::Database(format!("{e:#}")))?;

        if options.mode == OpenMode::Fresh {
            self.index = FlatIndex::new();
        } else {
            let rows = store
                .count()
                .await
                .map_err(|e| RetrieverError::Database(format!("{e:#}")))?;
            if rows != self.index.len() as u64 {
                warn!(
                    "Appending to {} rows with an index of {} vectors; load the matching index first",
                    rows,
                    self.index.len()
                );
            }
        }
        self.store = Some(store);

        info!(
            "Building {} index from {} (batch size {}, checkpoint every {})",
            P::MODE,
            corpus.display(),
            batch_size,
            save_every
        );

        let mut stats = BuildStats {
            total_documents: self.index.len() as u64,
            ..BuildStats::default()
        };
        let mut next_checkpoint = (stats.total_documents / save_every + 1) * save_every;
        let mut pending: Vec<P> = Vec::with_capacity(batch_size);

        let bar = if console::user_attended_stderr() {
            ProgressBar::new_spinner().with_style(
                ProgressStyle::with_template("{spinner} [{pos} docs] {elapsed} {msg}")
                    .expect("style template is valid"),
            )
        } else {
            ProgressBar::hidden()
        };
        bar.set_position(stats.total_documents);
        bar.set_message(format!("Indexing {}", corpus.display()));

        for (line_number, line) in BufReader::new(file).lines().enumerate() {
            let line_number = line_number + 1;
            let line = match line {
                Ok(line) => line,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!("Skipping line {}: {}", line_number, e);
                    stats.lines_read += 1;
                    stats.lines_skipped += 1;
                    continue;
                }
                Err(e) => return Err(RetrieverError::Io(e)),
            };

            if line.trim().is_empty() {
                continue;
            }
            stats.lines_read += 1;

            match P::parse_line(&line) {
                Ok(records) => pending.extend(records),
                Err(e) => {
                    warn!("Skipping line {}: {}", line_number, e);
                    stats.lines_skipped += 1;
                    continue;
                }
            }

            if pending.len() >= batch_size {
                let added = self.flush(std::mem::take(&mut pending), batch_size).await?;
                stats.documents_added += added;
                stats.total_documents += added;
                bar.set_position(stats.total_documents);

                if stats.total_documents >= next_checkpoint {
                    self.write_checkpoint(&Checkpoint::numbered(
                        &options.checkpoint_dir,
                        stats.total_documents,
                    ))?;
                    stats.checkpoints.push(stats.total_documents);
                    next_checkpoint = (stats.total_documents / save_every + 1) * save_every;
                }
            }
        }

        if !pending.is_empty() {
            let added = self.flush(pending, batch_size).await?;
            stats.documents_added += added;
            stats.total_documents += added;
            bar.set_position(stats.total_documents);
        }

        if self.index.is_initialized() {
            self.write_checkpoint(&Checkpoint::final_pair(&options.checkpoint_dir))?;
        } else {
            warn!("No documents were indexed from {}", corpus.display());
        }

        bar.finish_and_clear();
        stats.duration = started.elapsed();

        info!(
            "Indexed {} documents ({} total) from {} lines, skipped {} in {:.2}s",
            stats.documents_added,
            stats.total_documents,
            stats.lines_read,
            stats.lines_skipped,
            stats.duration.as_secs_f64()
        );

        Ok(stats)
    }

    /// Encode pending records, append their vectors and insert one row per
    /// vector under the id the index assigned
    async fn flush(&mut self, records: Vec<P>, batch_size: usize) -> Result<u64> {
        let texts: Vec<String> = records.iter().map(P::embedding_text).collect();

        let vectors = self
            .encoder
            .encode(&texts, batch_size)
            .map_err(|e| RetrieverError::Embedding(format!("{e:#}")))?;

        if vectors.len() != records.len() {
            return Err(RetrieverError::Embedding(format!(
                "Encoder returned {} vectors for {} texts",
                vectors.len(),
                records.len()
            )));
        }

        if !self.index.is_initialized() {
            if let Some(first) = vectors.first() {
                self.index.init(first.len())?;
            }
        }

        let ids = self.index.add(&vectors)?;
        debug!("Added vectors {}..{}", ids.start, ids.end);

        let store = self
            .store
            .as_ref()
            .ok_or_else(|| RetrieverError::Database("Metadata store is not open".to_string()))?;
        for (id, record) in ids.zip(&records) {
            store
                .insert(id, record)
                .await
                .map_err(|e| RetrieverError::Database(format!("{e:#}")))?;
        }

        Ok(records.len() as u64)
    }

    fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.save(&checkpoint.index_path, &checkpoint.meta_path)?;
        match checkpoint.count {
            Some(count) => info!("Checkpoint saved at {} documents", count),
            None => info!(
                "Final index saved to {}",
                checkpoint.index_path.display()
            ),
        }
        Ok(())
    }

    /// Up to `topk` hits for `query`, best first, with duplicate texts
    /// removed.
    ///
    /// `fetch_k` candidates are pulled from the index (default
    /// `oversample * topk`); candidates without a metadata row are skipped.
    /// Fewer than `topk` hits is not an error.
    #[inline]
    pub async fn search(
        &self,
        query: &str,
        topk: usize,
        fetch_k: Option<usize>,
    ) -> Result<Vec<SearchHit<P>>> {
        if self.index.is_empty() {
            return Err(RetrieverError::EmptyIndex);
        }
        let store = self.store.as_ref().ok_or(RetrieverError::EmptyIndex)?;
        if topk == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self
            .encoder
            .encode_one(query)
            .map_err(|e| RetrieverError::Embedding(format!("{e:#}")))?;

        let fetch_k = fetch_k
            .unwrap_or_else(|| topk.saturating_mul(self.settings.oversample))
            .max(topk);
        let candidates = self.index.search(&query_vector, fetch_k)?;

        let ids: Vec<u64> = candidates.iter().map(|(id, _)| *id).collect();
        let mut rows = store
            .get_many(&ids)
            .await
            .map_err(|e| RetrieverError::Database(format!("{e:#}")))?;

        let mut seen = HashSet::new();
        let mut hits = Vec::with_capacity(topk);
        for (id, score) in candidates {
            let Some(payload) = rows.remove(&id) else {
                debug!("No metadata for id {}, skipping", id);
                continue;
            };
            if !seen.insert(payload.dedup_key().to_string()) {
                continue;
            }

            hits.push(SearchHit { id, score, payload });
            if hits.len() == topk {
                break;
            }
        }

        debug!(
            "Query returned {} hits from {} candidates",
            hits.len(),
            ids.len()
        );
        Ok(hits)
    }

    /// Write the index and its side record
    #[inline]
    pub fn save<T: AsRef<Path>, U: AsRef<Path>>(&self, index_path: T, meta_path: U) -> Result<()> {
        let meta = IndexMeta::for_index(&self.index).ok_or(RetrieverError::EmptyIndex)?;
        self.index.save(index_path)?;
        meta.save(meta_path)?;
        Ok(())
    }

    /// Restore a saved index and reopen its metadata table for appending.
    ///
    /// All three artifacts must exist. The index must agree with its side
    /// record on dimension and count, and the table must hold at least that
    /// many rows; new ids continue from that count.
    #[inline]
    pub async fn load<T: AsRef<Path>, U: AsRef<Path>, V: AsRef<Path>>(
        &mut self,
        index_path: T,
        meta_path: U,
        db_path: V,
    ) -> Result<()> {
        let (index_path, meta_path, db_path) =
            (index_path.as_ref(), meta_path.as_ref(), db_path.as_ref());

        for path in [index_path, meta_path, db_path] {
            if !path.exists() {
                return Err(RetrieverError::ArtifactMissing(path.to_path_buf()));
            }
        }

        let meta = IndexMeta::load(meta_path)?;
        let index = FlatIndex::load(index_path)?;

        if index.dimension() != Some(meta.dimension) || index.len() as u64 != meta.count {
            return Err(RetrieverError::CorruptArtifact {
                path: index_path.to_path_buf(),
                reason: format!(
                    "index holds {} vectors of dimension {:?}, side record says {} of dimension {}",
                    index.len(),
                    index.dimension(),
                    meta.count,
                    meta.dimension
                ),
            });
        }

        if let Some(hint) = self.encoder.dimension_hint() {
            if hint != meta.dimension {
                warn!(
                    "Encoder produces {}-dimensional vectors but the index holds {}; searches and inserts will fail",
                    hint, meta.dimension
                );
            }
        }

        let store = MetadataStore::<P>::open(db_path, OpenMode::Append)
            .await
            .map_err(|e| RetrieverError::Database(format!("{e:#}")))?;
        let rows = store
            .count()
            .await
            .map_err(|e| RetrieverError::Database(format!("{e:#}")))?;
        if rows < meta.count {
            return Err(RetrieverError::CorruptArtifact {
                path: db_path.to_path_buf(),
                reason: format!(
                    "metadata table has {} rows for {} vectors",
                    rows, meta.count
                ),
            });
        }
        if rows > meta.count {
            debug!(
                "Metadata table has {} rows beyond the {} indexed vectors",
                rows - meta.count,
                meta.count
            );
        }

        info!(
            "Loaded {} index with {} vectors of dimension {}",
            P::MODE,
            index.len(),
            meta.dimension
        );
        self.index = index;
        self.store = Some(store);
        Ok(())
    }

    /// Save the index under the standard names in `dir`
    #[inline]
    pub fn save_to_dir<T: AsRef<Path>>(&self, dir: T) -> Result<()> {
        let dir = dir.as_ref();
        self.save(dir.join(INDEX_FILE), dir.join(META_FILE))
    }

    /// Load the standard artifacts from `dir`
    #[inline]
    pub async fn load_from_dir<T: AsRef<Path>>(&mut self, dir: T) -> Result<()> {
        let dir = dir.as_ref();
        self.load(dir.join(INDEX_FILE), dir.join(META_FILE), dir.join(DB_FILE))
            .await
    }

    /// Load the most recent checkpoint in `checkpoint_dir`
    #[inline]
    pub async fn load_latest_checkpoint<T: AsRef<Path>, U: AsRef<Path>>(
        &mut self,
        checkpoint_dir: T,
        db_path: U,
    ) -> Result<Checkpoint> {
        let checkpoint_dir = checkpoint_dir.as_ref();
        let checkpoint = latest_checkpoint(checkpoint_dir)?
            .ok_or_else(|| RetrieverError::ArtifactMissing(checkpoint_dir.to_path_buf()))?;
        self.load(&checkpoint.index_path, &checkpoint.meta_path, db_path)
            .await?;
        Ok(checkpoint)
    }

    /// Compare the loaded index with its metadata table
    #[inline]
    pub async fn consistency_report(&self) -> Result<ConsistencyReport> {
        let store = self.store.as_ref().ok_or(RetrieverError::EmptyIndex)?;
        let meta = IndexMeta::for_index(&self.index);
        ConsistencyReport::check(self.index.len() as u64, meta.as_ref(), store)
            .await
            .map_err(|e| RetrieverError::Database(format!("{e:#}")))
    }
}
