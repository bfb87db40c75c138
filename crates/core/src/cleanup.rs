use crate::models::RetentionPolicy;
use crate::traits::{ProfileStore, VectorIndex};
use crate::StoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Profiles older than the cutoff when the sweep started.
    pub expired: usize,
    pub rows_deleted: u64,
    pub remaining: u64,
}

/// Removes profiles older than the retention window, vectors first.
///
/// A vector deletion failure is logged and the rows are still removed; stale
/// vectors left behind are filtered out at hydration time.
pub async fn sweep_expired<S, V>(
    store: &S,
    index: &V,
    policy: &RetentionPolicy,
) -> Result<SweepReport, StoreError>
where
    S: ProfileStore + Sync,
    V: VectorIndex + Sync,
{
    sweep_before(store, index, Utc::now() - policy.max_age).await
}

pub async fn sweep_before<S, V>(
    store: &S,
    index: &V,
    cutoff: DateTime<Utc>,
) -> Result<SweepReport, StoreError>
where
    S: ProfileStore + Sync,
    V: VectorIndex + Sync,
{
    let expired_ids = store.profile_ids_created_before(cutoff).await?;

    if !expired_ids.is_empty() {
        if let Err(error) = index.delete(&expired_ids).await {
            warn!(count = expired_ids.len(), %error, "could not delete expired vectors");
        }
    }

    let rows_deleted = store.delete_profiles_created_before(cutoff).await?;
    let remaining = store.count_profiles().await?;
    info!(
        cutoff = %cutoff.to_rfc3339(),
        expired = expired_ids.len(),
        rows_deleted,
        remaining,
        "retention sweep finished"
    );

    Ok(SweepReport {
        expired: expired_ids.len(),
        rows_deleted,
        remaining,
    })
}
