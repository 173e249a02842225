//! Commit payload classification by content markers

use crate::domain::transaction::TransactionOutcome;

/// What a terminal payload says about the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure,
    /// Neither marker found
    Ambiguous
}

impl From<Verdict> for TransactionOutcome {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Success => TransactionOutcome::Success,
            Verdict::Failure => TransactionOutcome::Failure,
            Verdict::Ambiguous => TransactionOutcome::Ambiguous
        }
    }
}

/// Classifies a terminal payload by the markers it contains
///
/// Markers are matched against whole words of the payload, ignoring case, so `UNSUCCESSFUL`
/// never reads as `SUCCESS`. The success marker wins when both are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerClassifier {
    success: Vec<String>,
    failure: Vec<String>
}

impl MarkerClassifier {
    pub fn new(success: Vec<String>, failure: Vec<String>) -> Self {
        let normalize = |markers: Vec<String>| -> Vec<String> {
            markers.into_iter().map(|m| m.trim().to_ascii_uppercase()).filter(|m| !m.is_empty()).collect()
        };
        Self { success: normalize(success), failure: normalize(failure) }
    }

    pub fn classify(&self, payload: &str) -> Verdict {
        let words: Vec<String> = payload
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .filter(|w| !w.is_empty())
            .map(|w| w.to_ascii_uppercase())
            .collect();
        let contains = |markers: &[String]| markers.iter().any(|m| words.iter().any(|w| w == m));

        if contains(&self.success) {
            Verdict::Success
        } else if contains(&self.failure) {
            Verdict::Failure
        } else {
            Verdict::Ambiguous
        }
    }
}

impl Default for MarkerClassifier {
    fn default() -> Self {
        Self::new(vec!["SUCCESS".to_string()], vec!["FAILED".to_string(), "FAILURE".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers() {
        let classifier = MarkerClassifier::default();
        assert_eq!(classifier.classify(r#"{"status":"SUCCESS"}"#), Verdict::Success);
        assert_eq!(classifier.classify(r#"{"status":"success","id":7}"#), Verdict::Success);
        assert_eq!(classifier.classify(r#"{"status":"FAILED","reason":"limit"}"#), Verdict::Failure);
        assert_eq!(classifier.classify(r#"{"status":"UNSUCCESSFUL"}"#), Verdict::Ambiguous);
        assert_eq!(classifier.classify(r#"{"status":"PENDING"}"#), Verdict::Ambiguous);
        assert_eq!(classifier.classify(""), Verdict::Ambiguous);
    }

    #[test]
    fn test_custom_markers() {
        let classifier = MarkerClassifier::new(vec![" done ".to_string()], vec!["REJECTED".to_string(), "".to_string()]);
        assert_eq!(classifier.classify("order DONE"), Verdict::Success);
        assert_eq!(classifier.classify("order rejected"), Verdict::Failure);
        assert_eq!(classifier.classify("order queued"), Verdict::Ambiguous);
    }

    #[test]
    fn test_verdict_maps_to_outcome() {
        assert_eq!(TransactionOutcome::from(Verdict::Success), TransactionOutcome::Success);
        assert_eq!(TransactionOutcome::from(Verdict::Failure), TransactionOutcome::Failure);
        assert_eq!(TransactionOutcome::from(Verdict::Ambiguous), TransactionOutcome::Ambiguous);
    }
}
