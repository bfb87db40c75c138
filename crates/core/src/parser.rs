use crate::error::IngestError;
use crate::llm::{ApiKey, ModelError, TextModel};
use crate::models::ParsedResume;
use crate::prompts::extraction_prompt;
use serde_json::Value;
use tracing::{debug, warn};

/// Result of one attempt against one credential.
#[derive(Debug)]
enum Attempt {
    Parsed(ParsedResume),
    Rotate(String),
    Abort(String),
}

/// Structured extraction with credential rotation. Each document walks the
/// credential list in order: exhausted or empty answers move to the next key,
/// any other failure stops the walk for that document.
pub struct StructuredParser<M> {
    model: M,
    credentials: Vec<ApiKey>,
}

impl<M> StructuredParser<M>
where
    M: TextModel + Send + Sync,
{
    pub fn new(model: M, credentials: Vec<ApiKey>) -> Result<Self, IngestError> {
        if credentials.is_empty() {
            return Err(IngestError::InvalidArgument(
                "at least one model credential is required".to_string(),
            ));
        }
        Ok(Self { model, credentials })
    }

    pub fn credentials(&self) -> &[ApiKey] {
        &self.credentials
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub async fn parse(&self, resume_text: &str) -> Result<ParsedResume, IngestError> {
        let prompt = extraction_prompt(resume_text);
        let mut last_failure = String::from("no credential attempted");

        for credential in &self.credentials {
            match self.attempt(credential, &prompt).await {
                Attempt::Parsed(parsed) => {
                    debug!(key = %credential.fingerprint(), "resume parsed");
                    return Ok(parsed);
                }
                Attempt::Rotate(reason) => {
                    warn!(key = %credential.fingerprint(), %reason, "rotating to next credential");
                    last_failure = reason;
                }
                Attempt::Abort(reason) => {
                    warn!(key = %credential.fingerprint(), %reason, "non-retriable parse failure");
                    return Err(IngestError::ParsingExhausted(reason));
                }
            }
        }

        Err(IngestError::ParsingExhausted(format!(
            "all {} credentials failed; last error: {last_failure}",
            self.credentials.len()
        )))
    }

    async fn attempt(&self, credential: &ApiKey, prompt: &str) -> Attempt {
        match self.model.complete_json(credential, prompt, 0.0).await {
            Ok(value) => interpret_reply(value),
            Err(ModelError::Retriable(reason)) => Attempt::Rotate(reason),
            Err(ModelError::Fatal(reason)) => Attempt::Abort(reason),
        }
    }
}

fn interpret_reply(value: Value) -> Attempt {
    match value {
        Value::Object(map) if !map.is_empty() => {
            match serde_json::from_value::<ParsedResume>(Value::Object(map)) {
                Ok(parsed) => Attempt::Parsed(parsed),
                Err(error) => Attempt::Abort(format!("reply did not match resume shape: {error}")),
            }
        }
        Value::Object(_) => Attempt::Rotate("model returned an empty object".to_string()),
        other => Attempt::Rotate(format!("model returned a non-object reply: {other}")),
    }
}
