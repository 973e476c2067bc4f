// Consistency validation between the vector index and the metadata store

#[cfg(test)]
mod tests;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::database::{IndexMeta, MetadataStore, Payload};

/// Largest number of missing ids kept in a report
const MISSING_ID_SAMPLE: usize = 1000;

/// Comparison of one index, its side record and its metadata table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Vectors held by the index
    pub index_vectors: u64,
    /// Count written in the side record, when one was available
    pub recorded_count: Option<u64>,
    /// Rows in the metadata table
    pub metadata_rows: u64,
    pub max_metadata_id: Option<u64>,
    /// Index ids with no metadata row (first `MISSING_ID_SAMPLE` only)
    pub missing_rows: Vec<u64>,
    pub missing_row_count: u64,
    /// Rows whose id is past the end of the index
    pub surplus_rows: u64,
    pub is_consistent: bool,
}

impl ConsistencyReport {
    #[inline]
    pub async fn check<P: Payload>(
        index_vectors: u64,
        meta: Option<&IndexMeta>,
        store: &MetadataStore<P>,
    ) -> Result<Self> {
        info!("Checking index against metadata table {}", P::TABLE);

        let metadata_rows = store.count().await?;
        let max_metadata_id = store.max_id().await?;
        let mut missing_rows = store.missing_ids(index_vectors).await?;
        debug!(
            "{} vectors, {} rows, {} missing",
            index_vectors,
            metadata_rows,
            missing_rows.len()
        );

        let missing_row_count = missing_rows.len() as u64;
        let present_in_range = index_vectors - missing_row_count;
        let surplus_rows = metadata_rows.saturating_sub(present_in_range);
        missing_rows.truncate(MISSING_ID_SAMPLE);

        let recorded_count = meta.map(|m| m.count);
        let is_consistent = missing_row_count == 0
            && surplus_rows == 0
            && recorded_count.is_none_or(|count| count == index_vectors);

        let report = Self {
            index_vectors,
            recorded_count,
            metadata_rows,
            max_metadata_id,
            missing_rows,
            missing_row_count,
            surplus_rows,
            is_consistent,
        };

        if !report.is_consistent {
            warn!("{}", report.summary());
        }

        Ok(report)
    }

    /// Get a human-readable summary of the consistency report
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Index is consistent: {} vectors, {} metadata rows",
                self.index_vectors, self.metadata_rows
            )
        } else {
            let recorded = match self.recorded_count {
                Some(count) if count != self.index_vectors => {
                    format!(", side record says {count}")
                }
                _ => String::new(),
            };
            format!(
                "Index inconsistencies found: {} vectors without metadata, {} rows past the index end{}",
                self.missing_row_count, self.surplus_rows, recorded
            )
        }
    }

    /// Get the total number of consistency issues
    #[inline]
    pub fn total_issues(&self) -> u64 {
        let count_mismatch = self
            .recorded_count
            .is_some_and(|count| count != self.index_vectors);
        self.missing_row_count + self.surplus_rows + u64::from(count_mismatch)
    }
}
