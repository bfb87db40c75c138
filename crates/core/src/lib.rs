pub mod cleanup;
pub mod dedup;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
pub mod reranker;
pub mod stores;
pub mod traits;

pub use cleanup::{sweep_expired, SweepReport};
pub use dedup::content_document_id;
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, InstructorEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
    QUERY_INSTRUCTION, RESUME_INSTRUCTION,
};
pub use error::{IngestError, SearchError, StoreError};
pub use extractor::{DocumentExtractor, DocumentFormat, ResumeExtractor};
pub use ingest::{
    discover_resume_files, unpack_archive, DocumentOutcome, IngestCoordinator, IngestPipeline,
    IngestionTicket,
};
pub use llm::{ApiKey, ChatModel, ModelError, TextModel};
pub use models::{
    CandidateMatch, CandidateScore, IngestionJob, IngestionOptions, JobStatus, JobStatusReport,
    ParsedResume, Profile, ProfilePayload, RetentionPolicy, SearchOptions, SearchQuery,
};
pub use orchestrator::SearchCoordinator;
pub use parser::StructuredParser;
pub use reranker::{LlmReranker, Reranker};
pub use stores::{QdrantStore, SqliteStore};
pub use traits::{Distance, JobStore, ProfileStore, VectorIndex};
