use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("text extraction failed: {0}")]
    Extraction(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("structured parsing exhausted: {0}")]
    ParsingExhausted(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("ingestion task did not complete: {0}")]
    Task(String),
}

impl From<zip::result::ZipError> for IngestError {
    fn from(error: zip::result::ZipError) -> Self {
        IngestError::Archive(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("rerank batch failed: {0}")]
    BatchRerank(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("invalid row: {0}")]
    InvalidRow(String),
}
