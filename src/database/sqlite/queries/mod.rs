#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::marker::PhantomData;

use super::models::Payload;
use anyhow::{Context, Result};
use sqlx::{FromRow, QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

/// SQLite keeps at most 32766 bound parameters per statement
const LOOKUP_CHUNK: usize = 900;

pub struct PayloadQueries<P>(PhantomData<P>);

fn to_row_id(id: u64) -> Result<i64> {
    i64::try_from(id).with_context(|| format!("Identifier {id} does not fit in a SQLite integer"))
}

impl<P: Payload> PayloadQueries<P> {
    #[inline]
    pub async fn create_table(pool: &SqlitePool) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (faiss_id INTEGER PRIMARY KEY, {})",
            P::TABLE,
            P::SCHEMA
        );
        sqlx::query(&sql)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create table {}", P::TABLE))?;
        Ok(())
    }

    #[inline]
    pub async fn drop_table(pool: &SqlitePool) -> Result<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", P::TABLE);
        sqlx::query(&sql)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to drop table {}", P::TABLE))?;
        Ok(())
    }

    #[inline]
    pub async fn insert(pool: &SqlitePool, id: u64, payload: &P) -> Result<()> {
        let placeholders = vec!["?"; P::COLUMNS.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} (faiss_id, {}) VALUES (?, {})",
            P::TABLE,
            P::COLUMNS.join(", "),
            placeholders
        );

        payload
            .bind_columns(sqlx::query(&sql).bind(to_row_id(id)?))
            .execute(pool)
            .await
            .with_context(|| format!("Failed to insert row {id} into {}", P::TABLE))?;

        Ok(())
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: u64) -> Result<Option<P>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE faiss_id = ?",
            P::COLUMNS.join(", "),
            P::TABLE
        );

        let result = sqlx::query_as::<_, P>(&sql)
            .bind(to_row_id(id)?)
            .fetch_optional(pool)
            .await
            .with_context(|| format!("Failed to get row {id} from {}", P::TABLE))?;

        Ok(result)
    }

    /// Fetch every row whose id is in `ids`; absent ids are simply missing
    /// from the map
    #[inline]
    pub async fn get_many(pool: &SqlitePool, ids: &[u64]) -> Result<HashMap<u64, P>> {
        let mut found = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let mut builder = QueryBuilder::<Sqlite>::new(format!(
                "SELECT faiss_id, {} FROM {} WHERE faiss_id IN (",
                P::COLUMNS.join(", "),
                P::TABLE
            ));
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(to_row_id(*id)?);
            }
            separated.push_unseparated(")");

            let rows = builder
                .build()
                .fetch_all(pool)
                .await
                .with_context(|| format!("Failed to look up rows in {}", P::TABLE))?;

            for row in rows {
                let id: i64 = row.try_get("faiss_id").context("Row without faiss_id")?;
                let payload = P::from_row(&row)
                    .with_context(|| format!("Failed to decode row {id} from {}", P::TABLE))?;
                found.insert(id as u64, payload);
            }
        }

        debug!(
            "Looked up {} ids in {}, found {}",
            ids.len(),
            P::TABLE,
            found.len()
        );
        Ok(found)
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", P::TABLE);
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(pool)
            .await
            .with_context(|| format!("Failed to count rows in {}", P::TABLE))?;
        Ok(count as u64)
    }

    #[inline]
    pub async fn max_id(pool: &SqlitePool) -> Result<Option<u64>> {
        let sql = format!("SELECT MAX(faiss_id) FROM {}", P::TABLE);
        let max: Option<i64> = sqlx::query_scalar(&sql)
            .fetch_one(pool)
            .await
            .with_context(|| format!("Failed to get max id in {}", P::TABLE))?;
        Ok(max.map(|id| id as u64))
    }

    /// Ids in `0..expected` with no row, in ascending order
    #[inline]
    pub async fn missing_ids(pool: &SqlitePool, expected: u64) -> Result<Vec<u64>> {
        let sql = format!("SELECT faiss_id FROM {} ORDER BY faiss_id", P::TABLE);
        let present: Vec<i64> = sqlx::query_scalar(&sql)
            .fetch_all(pool)
            .await
            .with_context(|| format!("Failed to list ids in {}", P::TABLE))?;

        let mut missing = Vec::new();
        let mut next = 0u64;
        for id in present.into_iter().map(|id| id as u64) {
            if id >= expected {
                break;
            }
            missing.extend(next..id);
            next = id + 1;
        }
        missing.extend(next..expected);

        Ok(missing)
    }
}
