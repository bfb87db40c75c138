use regex::{Captures, Regex};
use std::sync::OnceLock;

const EXTRACTION_TEMPLATE: &str = r#"You are an experienced HR analyst. Read the resume below and extract the requested fields.

Resume:
---
{resume_text}
---

Respond with a single JSON object using exactly these keys:
- name: string
- email: string
- mobile_number: string
- years_experience: number (estimate when not stated)
- skills: array of strings (technologies and core proficiencies)
- roles: array of strings (previous job titles)
- location: string (city or country when present)

Return only the JSON object, without commentary."#;

const RANKING_TEMPLATE: &str = r#"You are a hiring assistant scoring candidates against a job description.

Job description:
{job_description}

Candidates:
{candidates}

Each candidate has an id, a list of skills, a list of previous roles, and total years of experience.

Scoring rules:
- Score every candidate from 1 (very poor match) to 100 (perfect match).
- Reserve the highest scores for candidates whose skills and roles both align closely with the job description.
- Weigh years of experience only when the job description asks for it.
- Do not invent information that is not provided.

{format_instructions}"#;

const RANKING_FORMAT: &str = r#"Respond with a JSON object of this exact shape and nothing else:
{"results": [{"id": "<candidate id>", "score": <integer 1-100>}]}
Include one entry per candidate, reusing the candidate ids verbatim."#;

fn placeholder() -> Option<&'static Regex> {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{([a-z_]+)\}").ok())
        .as_ref()
}

/// Fills every `{slot}` of the template in a single pass. Inserted values are
/// never scanned again, so placeholder text inside user input stays literal.
fn render(template: &str, slots: &[(&str, &str)]) -> String {
    let Some(pattern) = placeholder() else {
        return template.to_string();
    };

    pattern
        .replace_all(template, |captures: &Captures<'_>| {
            let name = &captures[1];
            slots
                .iter()
                .find(|(slot, _)| *slot == name)
                .map(|(_, value)| (*value).to_string())
                .unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned()
}

pub fn extraction_prompt(resume_text: &str) -> String {
    render(EXTRACTION_TEMPLATE, &[("resume_text", resume_text)])
}

pub fn ranking_prompt(job_description: &str, candidates_json: &str) -> String {
    render(
        RANKING_TEMPLATE,
        &[
            ("job_description", job_description),
            ("candidates", candidates_json),
            ("format_instructions", RANKING_FORMAT),
        ],
    )
}
