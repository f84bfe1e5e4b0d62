use serde::Serialize;

/// Distinct error texts collected during a pass, in first-seen order.
///
/// Deduplication is by raw text equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ErrorMessages(Vec<String>);

impl ErrorMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `message` unless the same text was already recorded.
    ///
    /// Returns `true` if the message was new.
    pub fn record(&mut self, message: impl Into<String>) -> bool {
        let message = message.into();
        if self.0.contains(&message) {
            return false;
        }
        self.0.push(message);
        true
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deduplicates_by_text() {
        let mut errors = ErrorMessages::new();
        assert!(errors.record("Payload is truncated"));
        assert!(errors.record("Connection refused"));
        assert!(!errors.record("Payload is truncated"));

        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors.iter().collect::<Vec<_>>(),
            vec!["Payload is truncated", "Connection refused"]
        );
    }

    #[test]
    fn test_serializes_as_list() {
        let mut errors = ErrorMessages::new();
        errors.record("boom");
        assert_eq!(serde_json::to_string(&errors).unwrap(), r#"["boom"]"#);
    }
}
