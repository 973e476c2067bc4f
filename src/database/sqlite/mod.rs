use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::database::sqlite::models::Payload;
use crate::database::sqlite::queries::PayloadQueries;

#[cfg(test)]
mod tests;

pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

/// How to treat an existing table when opening a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Drop any previous table and start empty
    Fresh,
    /// Keep prior rows and continue appending
    Append,
}

/// Append-only `faiss_id -> payload` table in a local SQLite file
#[derive(Debug)]
pub struct MetadataStore<P: Payload> {
    pool: DbPool,
    path: PathBuf,
    _payload: PhantomData<fn() -> P>,
}

impl<P: Payload> Clone for MetadataStore<P> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            path: self.path.clone(),
            _payload: PhantomData,
        }
    }
}

impl<P: Payload> MetadataStore<P> {
    #[inline]
    pub async fn open<T: AsRef<Path>>(path: T, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open metadata database: {}", path.display()))?;

        let store = Self {
            pool,
            path: path.to_path_buf(),
            _payload: PhantomData,
        };
        store.prepare(mode).await?;

        Ok(store)
    }

    async fn prepare(&self, mode: OpenMode) -> Result<()> {
        if mode == OpenMode::Fresh {
            info!(
                "Clearing table {} in {}",
                P::TABLE,
                self.path.display()
            );
            PayloadQueries::<P>::drop_table(&self.pool).await?;
        }

        PayloadQueries::<P>::create_table(&self.pool).await?;
        debug!("Metadata table {} ready", P::TABLE);
        Ok(())
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert one row; each statement commits on its own
    #[inline]
    pub async fn insert(&self, id: u64, payload: &P) -> Result<()> {
        PayloadQueries::<P>::insert(&self.pool, id, payload).await
    }

    #[inline]
    pub async fn get(&self, id: u64) -> Result<Option<P>> {
        PayloadQueries::<P>::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn get_many(&self, ids: &[u64]) -> Result<HashMap<u64, P>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        PayloadQueries::<P>::get_many(&self.pool, ids).await
    }

    #[inline]
    pub async fn count(&self) -> Result<u64> {
        PayloadQueries::<P>::count(&self.pool).await
    }

    #[inline]
    pub async fn max_id(&self) -> Result<Option<u64>> {
        PayloadQueries::<P>::max_id(&self.pool).await
    }

    #[inline]
    pub async fn missing_ids(&self, expected: u64) -> Result<Vec<u64>> {
        PayloadQueries::<P>::missing_ids(&self.pool, expected).await
    }

    #[inline]
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
