pub mod qdrant;
pub mod sqlite;

pub use qdrant::{QdrantStore, DEFAULT_INDEX_TIMEOUT};
pub use sqlite::SqliteStore;
