
use std::collections::HashMap;
use std::fs::{self, File};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use arrow::array::{Array, FixedSizeListArray, Float32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Result, RetrieverError};

const VECTOR_COLUMN: &str = "vector";
/// Rows per record batch in the saved file
const ROWS_PER_BATCH: usize = 65_536;

/// Exact inner-product index over vectors of one fixed width.
///
/// Vectors are stored row-major in insertion order, so a vector's id is its
/// row number. Ids are never reused.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatIndex {
    dimension: Option<usize>,
    data: Vec<f32>,
}

impl FlatIndex {
    /// An index with no dimension yet; `init` must run before `add`
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_dimension(dimension: usize) -> Result<Self> {
        let mut index = Self::new();
        index.init(dimension)?;
        Ok(index)
    }

    /// Fix the vector width. Re-initializing with the same width is a no-op.
    #[inline]
    pub fn init(&mut self, dimension: usize) -> Result<()> {
        if dimension == 0 {
            return Err(RetrieverError::Config(
                "Vector dimension must be greater than 0".to_string(),
            ));
        }

        match self.dimension {
            Some(existing) if existing != dimension => Err(RetrieverError::DimensionMismatch {
                expected: existing,
                actual: dimension,
            }),
            Some(_) => Ok(()),
            None => {
                debug!("Initializing flat index with dimension {}", dimension);
                self.dimension = Some(dimension);
                Ok(())
            }
        }
    }

    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.dimension.is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        match self.dimension {
            Some(dimension) => self.data.len() / dimension,
            None => 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn vector(&self, id: u64) -> Option<&[f32]> {
        let dimension = self.dimension?;
        let start = usize::try_from(id).ok()?.checked_mul(dimension)?;
        self.data.get(start..start + dimension)
    }

    /// Append `vectors` and return the ids they received.
    ///
    /// The batch is checked as a whole before anything is appended, so a
    /// width mismatch leaves the index unchanged.
    #[inline]
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<Range<u64>> {
        let dimension = self.dimension.ok_or_else(|| {
            RetrieverError::Config("Index must be initialized before adding vectors".to_string())
        })?;

        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(RetrieverError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }

        let start = self.len() as u64;
        self.data.reserve(vectors.len() * dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }

        Ok(start..start + vectors.len() as u64)
    }

    /// Up to `k` `(id, score)` pairs by descending inner product. Equal
    /// scores keep insertion order.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        let dimension = self.dimension.ok_or(RetrieverError::EmptyIndex)?;
        if self.is_empty() {
            return Err(RetrieverError::EmptyIndex);
        }
        if query.len() != dimension {
            return Err(RetrieverError::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(u64, f32)> = self
            .data
            .chunks_exact(dimension)
            .enumerate()
            .map(|(id, row)| (id as u64, inner_product(row, query)))
            .collect();

        let k = k.min(scored.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let ranking = |a: &(u64, f32), b: &(u64, f32)| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0));
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, ranking);
            scored.truncate(k);
        }
        scored.sort_by(ranking);

        Ok(scored)
    }

    fn schema(width: i32, count: usize) -> Arc<Schema> {
        let metadata = HashMap::from([
            ("dimension".to_string(), width.to_string()),
            ("count".to_string(), count.to_string()),
        ]);

        Arc::new(
            Schema::new(vec![Field::new(
                VECTOR_COLUMN,
                DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, false)), width),
                false,
            )])
            .with_metadata(metadata),
        )
    }

    /// Write the index as an Arrow IPC file with one `vector` column.
    ///
    /// The file is written next to `path` and renamed into place, so a crash
    /// never leaves a truncated index under the final name.
    #[inline]
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        let dimension = self.dimension.ok_or(RetrieverError::EmptyIndex)?;
        let width = i32::try_from(dimension).map_err(|_| {
            RetrieverError::Config(format!("Vector dimension {dimension} is too large"))
        })?;
        let schema = Self::schema(width, self.len());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("arrow.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = FileWriter::try_new(file, &schema)
            .with_context(|| format!("Failed to start index file {}", tmp_path.display()))?;

        for rows in self.data.chunks(ROWS_PER_BATCH * dimension) {
            let values = Float32Array::from(rows.to_vec());
            let item = Arc::new(Field::new("item", DataType::Float32, false));
            let vectors = FixedSizeListArray::try_new(item, width, Arc::new(values), None)
                .context("Failed to create vector array")?;
            let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(vectors)])
                .context("Failed to create record batch")?;
            writer
                .write(&batch)
                .with_context(|| format!("Failed to write index file {}", tmp_path.display()))?;
        }

        writer
            .finish()
            .with_context(|| format!("Failed to finish index file {}", tmp_path.display()))?;
        drop(writer);

        fs::rename(&tmp_path, path)?;
        info!(
            "Saved index with {} vectors of dimension {} to {}",
            self.len(),
            dimension,
            path.display()
        );
        Ok(())
    }

    #[inline]
    pub fn load<T: AsRef<Path>>(path: T) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RetrieverError::ArtifactMissing(path.to_path_buf()));
        }

        let corrupt = |reason: String| RetrieverError::CorruptArtifact {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path)?;
        let reader = FileReader::try_new(file, None).map_err(|e| corrupt(e.to_string()))?;

        let dimension = match reader
            .schema()
            .field_with_name(VECTOR_COLUMN)
            .map_err(|e| corrupt(e.to_string()))?
            .data_type()
        {
            DataType::FixedSizeList(_, size) if *size > 0 => *size as usize,
            other => return Err(corrupt(format!("unexpected vector column type {other}"))),
        };

        let mut data = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| corrupt(e.to_string()))?;
            let vectors = batch
                .column_by_name(VECTOR_COLUMN)
                .ok_or_else(|| corrupt("missing vector column".to_string()))?
                .as_any()
                .downcast_ref::<FixedSizeListArray>()
                .ok_or_else(|| corrupt("invalid vector column type".to_string()))?;
            let values = vectors
                .values()
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| corrupt("vector values are not Float32".to_string()))?;

            let length = vectors.len() * dimension;
            let slice = values
                .values()
                .get(..length)
                .ok_or_else(|| corrupt("vector values are truncated".to_string()))?;
            data.extend_from_slice(slice);
        }

        let index = Self {
            dimension: Some(dimension),
            data,
        };
        debug!(
            "Loaded index with {} vectors of dimension {} from {}",
            index.len(),
            dimension,
            path.display()
        );
        Ok(index)
    }
}

#[inline]
fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Side record written next to every saved index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub dimension: usize,
    pub count: u64,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl IndexMeta {
    #[inline]
    pub fn for_index(index: &FlatIndex) -> Option<Self> {
        index.dimension().map(|dimension| Self {
            dimension,
            count: index.len() as u64,
            saved_at: Some(Utc::now()),
        })
    }

    #[inline]
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize index metadata")?;
        fs::write(path, content)?;
        Ok(())
    }

    #[inline]
    pub fn load<T: AsRef<Path>>(path: T) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RetrieverError::ArtifactMissing(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| RetrieverError::CorruptArtifact {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}
