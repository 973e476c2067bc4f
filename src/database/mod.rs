// Database module
// SQLite holds per-vector metadata, the flat index holds the vectors

pub mod sqlite;
pub mod vector;

pub use sqlite::models::{CorpusLineError, Passage, Payload, QaPair};
pub use sqlite::{DbPool, MetadataStore, OpenMode};
pub use vector::{FlatIndex, IndexMeta};
