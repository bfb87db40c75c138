use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnError, DefaultOnNull, DisplayFromStr, PickFirst};
use std::fmt;

/// Canonical candidate record. `document_id` is derived from the resume text,
/// so reprocessing identical content targets the same row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub document_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub mobile_number: Option<String>,
    pub years_experience: Option<f64>,
    pub skills: Vec<String>,
    pub prev_roles: Vec<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn from_parsed(document_id: impl Into<String>, parsed: ParsedResume) -> Self {
        Self {
            document_id: document_id.into(),
            name: non_blank(parsed.name),
            email: normalize_email(parsed.email.as_deref()),
            mobile_number: non_blank(parsed.mobile_number),
            years_experience: parsed
                .years_experience
                .filter(|years| years.is_finite() && *years >= 0.0),
            skills: clean_list(parsed.skills),
            prev_roles: clean_list(parsed.roles),
            location: non_blank(parsed.location),
            created_at: Utc::now(),
        }
    }

    /// Text handed to the encoder when the profile is indexed.
    pub fn embedding_summary(&self) -> String {
        let experience = self
            .years_experience
            .map(|years| years.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        format!(
            "Skills: {}\nExperience: {} years\nRoles: {}",
            self.skills.join(", "),
            experience,
            self.prev_roles.join(", ")
        )
    }

    pub fn payload(&self) -> ProfilePayload {
        ProfilePayload {
            document_id: self.document_id.clone(),
            skills: self.skills.clone(),
            prev_roles: self.prev_roles.clone(),
            experience: self.years_experience,
        }
    }
}

/// Fields pulled out of a resume by the text model. Every key is optional and
/// tolerant of the loose typing models tend to produce.
#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParsedResume {
    #[serde(default)]
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub name: Option<String>,
    #[serde(default)]
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub email: Option<String>,
    #[serde(default)]
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub mobile_number: Option<String>,
    #[serde(default)]
    #[serde_as(deserialize_as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    pub years_experience: Option<f64>,
    #[serde(default)]
    #[serde_as(deserialize_as = "DefaultOnError<DefaultOnNull>")]
    pub skills: Vec<String>,
    #[serde(default, alias = "prev_roles")]
    #[serde_as(deserialize_as = "DefaultOnError<DefaultOnNull>")]
    pub roles: Vec<String>,
    #[serde(default)]
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub location: Option<String>,
}

/// Maps the sentinel values models emit for a missing address to `None`.
pub fn normalize_email(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("na") || !trimmed.contains('@') {
        return None;
    }
    Some(trimmed.to_string())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|text| {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

/// Denormalized copy of the profile carried next to its vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfilePayload {
    pub document_id: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub prev_roles: Vec<String>,
    #[serde(default)]
    pub experience: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ProfilePayload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub score: f64,
    pub payload: ProfilePayload,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Starting,
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Starting => "starting",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "starting" => Some(JobStatus::Starting),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "completed_with_errors" => Some(JobStatus::CompletedWithErrors),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::CompletedWithErrors | JobStatus::Failed
        )
    }

    /// Terminal state for a job whose members have all been attempted.
    pub fn settle(processed_files: u32, total_files: u32) -> Self {
        if total_files == 0 {
            JobStatus::Failed
        } else if processed_files == total_files {
            JobStatus::Completed
        } else {
            JobStatus::CompletedWithErrors
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestionJob {
    pub id: String,
    /// Unset until the archive is unpacked; fixed afterwards.
    pub total_files: Option<u32>,
    pub processed_files: u32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IngestionJob {
    pub fn report(&self) -> JobStatusReport {
        JobStatusReport {
            job_id: self.id.clone(),
            status: self.status,
            processed: self.processed_files,
            total: self.total_files.unwrap_or(0),
            done: self.status.is_terminal(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatusReport {
    pub job_id: String,
    pub status: JobStatus,
    pub processed: u32,
    pub total: u32,
    pub done: bool,
}

/// Relevance score for one candidate, produced by the reranker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateScore {
    pub id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateMatch {
    #[serde(flatten)]
    pub profile: Profile,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SearchQuery {
    pub text: String,
    pub top_k: usize,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub supported_extensions: Vec<&'static str>,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            supported_extensions: vec!["pdf", "docx"],
        }
    }
}

impl IngestionOptions {
    pub fn supports(&self, extension: &str) -> bool {
        self.supported_extensions
            .iter()
            .any(|supported| supported.eq_ignore_ascii_case(extension))
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Retrieval pool size; wider than any sensible `top_k` so the reranker
    /// has room to reorder.
    pub candidate_limit: usize,
    pub score_threshold: f64,
    pub rerank_batch_size: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            candidate_limit: 50,
            score_threshold: 0.55,
            rerank_batch_size: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::hours(24),
        }
    }
}
