use crate::models::{IngestionJob, JobStatus, Profile, VectorHit, VectorRecord};
use crate::{SearchError, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    Cosine,
    Dot,
    Euclid,
}

impl Distance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distance::Cosine => "Cosine",
            Distance::Dot => "Dot",
            Distance::Euclid => "Euclid",
        }
    }
}

/// Approximate nearest-neighbour store keyed by `document_id`.
#[async_trait]
pub trait VectorIndex {
    async fn ensure_collection(&self, dimension: usize, distance: Distance)
        -> Result<(), SearchError>;

    /// Overwrites any prior vector and payload stored under the same id.
    async fn upsert(&self, record: VectorRecord) -> Result<(), SearchError>;

    /// Hits ordered by descending similarity, none below `score_threshold`,
    /// at most `limit` of them.
    async fn query(
        &self,
        vector: &[f32],
        score_threshold: f64,
        limit: usize,
    ) -> Result<Vec<VectorHit>, SearchError>;

    async fn delete(&self, ids: &[String]) -> Result<(), SearchError>;

    async fn delete_collection(&self) -> Result<(), SearchError>;
}

/// Canonical profile rows.
#[async_trait]
pub trait ProfileStore {
    async fn profile(&self, document_id: &str) -> Result<Option<Profile>, StoreError>;

    /// Insert or replace by `document_id`.
    async fn upsert_profile(&self, profile: &Profile) -> Result<(), StoreError>;

    async fn profiles_by_ids(&self, document_ids: &[String]) -> Result<Vec<Profile>, StoreError>;

    async fn profile_ids_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError>;

    async fn delete_profiles_created_before(&self, cutoff: DateTime<Utc>)
        -> Result<u64, StoreError>;

    async fn count_profiles(&self) -> Result<u64, StoreError>;
}

/// Ingestion job bookkeeping.
#[async_trait]
pub trait JobStore {
    async fn create_job(&self, job_id: &str) -> Result<IngestionJob, StoreError>;

    async fn mark_processing(&self, job_id: &str) -> Result<(), StoreError>;

    /// Fixes the member count. A second call leaves the first value in place.
    async fn set_total_files(&self, job_id: &str, total_files: u32) -> Result<(), StoreError>;

    async fn record_processed(&self, job_id: &str) -> Result<(), StoreError>;

    /// Moves a non-terminal job to `status`. Returns false when the job had
    /// already settled.
    async fn finish_job(&self, job_id: &str, status: JobStatus) -> Result<bool, StoreError>;

    async fn job(&self, job_id: &str) -> Result<IngestionJob, StoreError>;
}
