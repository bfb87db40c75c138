use crate::error::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const DEFAULT: usize = 768;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Instruction paired with resume summaries when they are indexed.
pub const RESUME_INSTRUCTION: &str = "Represent the resume for job relevance retrieval";

/// Instruction paired with job descriptions at query time.
pub const QUERY_INSTRUCTION: &str = "Represent the job description for matching resumes:";

/// Instruction-conditioned encoder. Identical `(instruction, text)` pairs must
/// produce identical vectors.
#[async_trait]
pub trait Embedder {
    fn dimensions(&self) -> usize;

    async fn embed(&self, instruction: &str, text: &str) -> Result<Vec<f32>, SearchError>;
}

/// Local hashed character-trigram encoder. Needs no model service; the
/// instruction is folded into the hashed input so both roles stay distinct.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    pub fn embed_text(&self, instruction: &str, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = format!("{instruction} {text}").to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, instruction: &str, text: &str) -> Result<Vec<f32>, SearchError> {
        Ok(self.embed_text(instruction, text))
    }
}

/// Client for an instructor-style embedding service that accepts
/// `(instruction, text)` pairs.
pub struct InstructorEmbedder {
    endpoint: String,
    client: Client,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    inputs: Vec<[&'a str; 2]>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl InstructorEmbedder {
    pub fn new(endpoint: &str, dimensions: usize, timeout: Duration) -> Result<Self, SearchError> {
        let endpoint = Url::parse(endpoint)?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for InstructorEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, instruction: &str, text: &str) -> Result<Vec<f32>, SearchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                inputs: vec![[instruction, text]],
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "embedding".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: EmbedResponse = response.json().await?;
        let vector = parsed.embeddings.into_iter().next().ok_or_else(|| {
            SearchError::BackendResponse {
                backend: "embedding".to_string(),
                details: "no embedding returned".to_string(),
            }
        })?;

        if vector.len() != self.dimensions {
            return Err(SearchError::BackendResponse {
                backend: "embedding".to_string(),
                details: format!(
                    "embedding dimension {} != {}",
                    vector.len(),
                    self.dimensions
                ),
            });
        }

        Ok(vector)
    }
}
