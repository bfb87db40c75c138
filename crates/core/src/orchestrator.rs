use crate::embeddings::{Embedder, QUERY_INSTRUCTION};
use crate::models::{normalize_email, CandidateMatch, CandidateScore, SearchOptions, SearchQuery};
use crate::reranker::Reranker;
use crate::traits::{Distance, ProfileStore, VectorIndex};
use crate::SearchError;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Two-stage candidate search: vector recall followed by batched model
/// reranking, then hydration from the profile store.
pub struct SearchCoordinator<E, V, R, S> {
    embedder: E,
    index: V,
    reranker: R,
    store: S,
    options: SearchOptions,
}

impl<E, V, R, S> SearchCoordinator<E, V, R, S>
where
    E: Embedder + Send + Sync,
    V: VectorIndex + Send + Sync,
    R: Reranker + Send + Sync,
    S: ProfileStore + Send + Sync,
{
    pub fn new(embedder: E, index: V, reranker: R, store: S, options: SearchOptions) -> Self {
        Self {
            embedder,
            index,
            reranker,
            store,
            options,
        }
    }

    pub async fn prepare(&self) -> Result<(), SearchError> {
        self.index
            .ensure_collection(self.embedder.dimensions(), Distance::Cosine)
            .await
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<CandidateMatch>, SearchError> {
        let job_description = query.text.trim();
        if job_description.is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }
        if query.top_k == 0 {
            return Err(SearchError::Request("top_k must be at least 1".to_string()));
        }

        let query_vector = self.embedder.embed(QUERY_INSTRUCTION, job_description).await?;
        let hits = self
            .index
            .query(
                &query_vector,
                self.options.score_threshold,
                self.options.candidate_limit,
            )
            .await?;

        if hits.is_empty() {
            info!(threshold = self.options.score_threshold, "no candidates above threshold");
            return Ok(Vec::new());
        }
        debug!(candidates = hits.len(), "vector recall finished");

        let payloads: Vec<_> = hits.into_iter().map(|hit| hit.payload).collect();
        let mut ranked = Vec::with_capacity(payloads.len());
        for (batch_number, batch) in payloads
            .chunks(self.options.rerank_batch_size.max(1))
            .enumerate()
        {
            match self.reranker.rank_batch(job_description, batch).await {
                Ok(scores) => ranked.extend(scores),
                Err(error) => warn!(
                    batch = batch_number,
                    size = batch.len(),
                    %error,
                    "dropping rerank batch"
                ),
            }
        }

        let ranked = top_scores(ranked, query.top_k);
        let ids: Vec<String> = ranked.iter().map(|score| score.id.clone()).collect();
        let scores: HashMap<String, f64> = ranked
            .into_iter()
            .map(|score| (score.id, score.score))
            .collect();

        let mut matches: Vec<CandidateMatch> = self
            .store
            .profiles_by_ids(&ids)
            .await?
            .into_iter()
            .map(|mut profile| {
                profile.email = normalize_email(profile.email.as_deref());
                let score = scores.get(&profile.document_id).copied().unwrap_or(0.0);
                CandidateMatch { profile, score }
            })
            .collect();

        matches.sort_by(|left, right| right.score.total_cmp(&left.score));
        info!(returned = matches.len(), "search finished");
        Ok(matches)
    }
}

/// Highest scores first, one entry per id, at most `top_k`.
fn top_scores(mut scores: Vec<CandidateScore>, top_k: usize) -> Vec<CandidateScore> {
    scores.sort_by(|left, right| right.score.total_cmp(&left.score));

    let mut seen = std::collections::HashSet::new();
    scores.retain(|score| seen.insert(score.id.clone()));
    scores.truncate(top_k);
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::{Profile, ProfilePayload, VectorHit, VectorRecord};
    use crate::stores::SqliteStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedIndex {
        hits: Vec<VectorHit>,
    }

    #[async_trait]
    impl VectorIndex for FixedIndex {
        async fn ensure_collection(&self, _dimension: usize, _distance: Distance) -> Result<(), SearchError> {
            Ok(())
        }

        async fn upsert(&self, _record: VectorRecord) -> Result<(), SearchError> {
            Ok(())
        }

        async fn query(&self, _vector: &[f32], threshold: f64, limit: usize) -> Result<Vec<VectorHit>, SearchError> {
            Ok(self
                .hits
                .iter()
                .filter(|hit| hit.score >= threshold)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn delete(&self, _ids: &[String]) -> Result<(), SearchError> {
            Ok(())
        }

        async fn delete_collection(&self) -> Result<(), SearchError> {
            Ok(())
        }
    }

    /// Scores each candidate by the number in its id; fails the batch
    /// containing `fail_on`.
    #[derive(Default)]
    struct NumberedReranker {
        batches: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl Reranker for NumberedReranker {
        async fn rank_batch(
            &self,
            _job_description: &str,
            candidates: &[ProfilePayload],
        ) -> Result<Vec<CandidateScore>, SearchError> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            if candidates
                .iter()
                .any(|candidate| Some(candidate.document_id.as_str()) == self.fail_on)
            {
                return Err(SearchError::BatchRerank("malformed reply".to_string()));
            }
            Ok(candidates
                .iter()
                .map(|candidate| CandidateScore {
                    id: candidate.document_id.clone(),
                    score: candidate
                        .document_id
                        .trim_start_matches("doc-")
                        .parse()
                        .unwrap_or(0.0),
                })
                .collect())
        }
    }

    fn hit(id: &str, score: f64) -> VectorHit {
        VectorHit {
            id: id.to_string(),
            score,
            payload: ProfilePayload {
                document_id: id.to_string(),
                skills: vec!["Rust".to_string()],
                prev_roles: Vec::new(),
                experience: None,
            },
        }
    }

    async fn seeded_store(ids: &[&str]) -> SqliteStore {
        let store = SqliteStore::in_memory().await.expect("in-memory store");
        for id in ids {
            store
                .upsert_profile(&Profile {
                    document_id: id.to_string(),
                    name: Some(format!("Candidate {id}")),
                    email: Some("NA".to_string()),
                    mobile_number: None,
                    years_experience: Some(3.0),
                    skills: vec!["Rust".to_string()],
                    prev_roles: Vec::new(),
                    location: None,
                    created_at: Utc::now(),
                })
                .await
                .expect("profile should persist");
        }
        store
    }

    fn options(batch_size: usize) -> SearchOptions {
        SearchOptions {
            candidate_limit: 50,
            score_threshold: 0.55,
            rerank_batch_size: batch_size,
        }
    }

    #[tokio::test]
    async fn nothing_above_threshold_skips_reranking() {
        let index = FixedIndex {
            hits: vec![hit("doc-10", 0.40), hit("doc-20", 0.30)],
        };
        let coordinator = SearchCoordinator::new(
            CharacterNgramEmbedder::new(16),
            index,
            NumberedReranker::default(),
            seeded_store(&["doc-10", "doc-20"]).await,
            options(20),
        );

        let matches = coordinator
            .search(&SearchQuery::new("Rust engineer", 5))
            .await
            .expect("search should succeed");
        assert!(matches.is_empty());
        assert_eq!(coordinator.reranker.batches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_batch_is_dropped_and_rest_survive() {
        let ids = ["doc-1", "doc-2", "doc-3", "doc-4", "doc-5", "doc-6"];
        let index = FixedIndex {
            hits: ids.iter().map(|id| hit(id, 0.9)).collect(),
        };
        let reranker = NumberedReranker {
            fail_on: Some("doc-3"),
            ..NumberedReranker::default()
        };
        let coordinator = SearchCoordinator::new(
            CharacterNgramEmbedder::new(16),
            index,
            reranker,
            seeded_store(&ids).await,
            options(2),
        );

        let matches = coordinator
            .search(&SearchQuery::new("Rust engineer", 10))
            .await
            .expect("search should succeed");

        let returned: Vec<&str> = matches
            .iter()
            .map(|candidate| candidate.profile.document_id.as_str())
            .collect();
        assert_eq!(returned, vec!["doc-6", "doc-5", "doc-2", "doc-1"]);
        assert_eq!(coordinator.reranker.batches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn results_are_truncated_hydrated_and_cleaned() {
        let ids = ["doc-7", "doc-42", "doc-13"];
        let index = FixedIndex {
            hits: ids.iter().map(|id| hit(id, 0.8)).collect(),
        };
        let coordinator = SearchCoordinator::new(
            CharacterNgramEmbedder::new(16),
            index,
            NumberedReranker::default(),
            seeded_store(&ids).await,
            options(20),
        );

        let matches = coordinator
            .search(&SearchQuery::new("Rust engineer", 2))
            .await
            .expect("search should succeed");

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].profile.document_id, "doc-42");
        assert_eq!(matches[0].score, 42.0);
        assert_eq!(matches[1].profile.document_id, "doc-13");
        assert!(matches.iter().all(|candidate| candidate.profile.email.is_none()));
    }

    #[tokio::test]
    async fn blank_query_and_zero_top_k_are_rejected() {
        let coordinator = SearchCoordinator::new(
            CharacterNgramEmbedder::new(16),
            FixedIndex { hits: Vec::new() },
            NumberedReranker::default(),
            seeded_store(&[]).await,
            SearchOptions::default(),
        );

        assert!(matches!(
            coordinator.search(&SearchQuery::new("   ", 5)).await,
            Err(SearchError::Request(_))
        ));
        assert!(matches!(
            coordinator.search(&SearchQuery::new("Rust", 0)).await,
            Err(SearchError::Request(_))
        ));
    }

    #[test]
    fn duplicate_ids_keep_their_best_score() {
        let scores = vec![
            CandidateScore { id: "a".to_string(), score: 10.0 },
            CandidateScore { id: "a".to_string(), score: 70.0 },
            CandidateScore { id: "b".to_string(), score: 50.0 },
        ];
        let top = top_scores(scores, 5);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0], CandidateScore { id: "a".to_string(), score: 70.0 });
    }
}
