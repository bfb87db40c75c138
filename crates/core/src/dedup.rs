use uuid::Uuid;

/// Namespace for resume content identifiers. Changing it re-keys every stored profile.
const RESUME_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_9a2e_4b7d_4e0a_9c35_d2a8_7e11_b0f4);

/// Canonical identifier for a resume: a name-based UUID over the exact
/// extracted text. Identical text always maps to the same id.
pub fn content_document_id(text: &str) -> String {
    Uuid::new_v5(&RESUME_NAMESPACE, text.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::content_document_id;

    #[test]
    fn identical_text_yields_identical_id() {
        let first = content_document_id("Jane Doe Rust engineer");
        let second = content_document_id("Jane Doe Rust engineer");
        assert_eq!(first, second);
    }

    #[test]
    fn whitespace_changes_the_id() {
        assert_ne!(
            content_document_id("Jane Doe Rust engineer"),
            content_document_id("Jane Doe  Rust engineer")
        );
    }

    #[test]
    fn id_is_a_uuid_accepted_by_the_index() {
        let id = content_document_id("anything");
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }
}
