use crate::llm::{ApiKey, TextModel};
use crate::models::{CandidateScore, ProfilePayload};
use crate::prompts::ranking_prompt;
use crate::SearchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

const MIN_SCORE: i64 = 1;
const MAX_SCORE: i64 = 100;

/// Scores one batch of retrieved candidates against a job description.
/// A batch either yields scores for its own ids or fails as a whole.
#[async_trait]
pub trait Reranker {
    async fn rank_batch(
        &self,
        job_description: &str,
        candidates: &[ProfilePayload],
    ) -> Result<Vec<CandidateScore>, SearchError>;
}

#[derive(Serialize)]
struct RankingCandidate<'a> {
    id: &'a str,
    skills: &'a [String],
    roles: &'a [String],
    experience: Option<f64>,
}

#[derive(Deserialize)]
struct RankingReply {
    results: Vec<RankingEntry>,
}

#[derive(Deserialize)]
struct RankingEntry {
    id: Value,
    /// Whole numbers only; a fractional score fails deserialization.
    score: i64,
}

/// Reranker backed by a chat model. Always uses a single credential and a
/// temperature of zero.
pub struct LlmReranker<M> {
    model: M,
    credential: ApiKey,
}

impl<M> LlmReranker<M> {
    pub fn new(model: M, credential: ApiKey) -> Self {
        Self { model, credential }
    }
}

#[async_trait]
impl<M> Reranker for LlmReranker<M>
where
    M: TextModel + Send + Sync,
{
    async fn rank_batch(
        &self,
        job_description: &str,
        candidates: &[ProfilePayload],
    ) -> Result<Vec<CandidateScore>, SearchError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let listing: Vec<RankingCandidate<'_>> = candidates
            .iter()
            .map(|candidate| RankingCandidate {
                id: &candidate.document_id,
                skills: &candidate.skills,
                roles: &candidate.prev_roles,
                experience: candidate.experience,
            })
            .collect();
        let prompt = ranking_prompt(job_description, &serde_json::to_string(&listing)?);

        let reply = self
            .model
            .complete_json(&self.credential, &prompt, 0.0)
            .await
            .map_err(|error| SearchError::BatchRerank(error.to_string()))?;

        let known: HashSet<&str> = candidates
            .iter()
            .map(|candidate| candidate.document_id.as_str())
            .collect();
        read_scores(reply, &known)
    }
}

/// Validates a ranking reply. Ids outside the batch are dropped; a score
/// that is fractional or outside 1..=100 rejects the whole reply.
fn read_scores(reply: Value, known: &HashSet<&str>) -> Result<Vec<CandidateScore>, SearchError> {
    let reply: RankingReply = serde_json::from_value(reply)
        .map_err(|error| SearchError::BatchRerank(format!("malformed ranking reply: {error}")))?;

    let mut scores = Vec::with_capacity(reply.results.len());
    for entry in reply.results {
        let id = match entry.id {
            Value::String(id) => id,
            Value::Number(id) => id.to_string(),
            other => {
                return Err(SearchError::BatchRerank(format!(
                    "candidate id has unexpected type: {other}"
                )))
            }
        };

        if !(MIN_SCORE..=MAX_SCORE).contains(&entry.score) {
            return Err(SearchError::BatchRerank(format!(
                "score {} for {id} is outside {MIN_SCORE}..={MAX_SCORE}",
                entry.score
            )));
        }

        if known.contains(id.as_str()) {
            scores.push(CandidateScore {
                id,
                score: entry.score as f64,
            });
        }
    }

    Ok(scores)
}
