//! Retry classification for processor failures

use serde::{Deserialize, Serialize};

/// Which processor failures a queue retries
///
/// Most queues retry any failure until attempts run out. A queue can
/// instead restrict retries to a fixed set of error codes (for example
/// transient connection errors), treating everything else as permanent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", content = "codes", rename_all = "snake_case")]
pub enum RetryClassification {
    /// Every failure is retried
    #[default]
    AnyError,
    /// Only failures carrying one of these codes are retried
    Codes(Vec<String>),
}

impl RetryClassification {
    /// Retry only the usual transient connection failures
    pub fn transient_connection() -> Self {
        Self::Codes(vec!["ECONNRESET".to_string(), "ETIMEDOUT".to_string()])
    }

    /// Whether a failure with the given code may be retried
    pub fn allows(&self, code: Option<&str>) -> bool {
        match self {
            Self::AnyError => true,
            Self::Codes(codes) => code.is_some_and(|c| codes.iter().any(|known| known == c)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_error_retries_everything() {
        let classification = RetryClassification::AnyError;
        assert!(classification.allows(None));
        assert!(classification.allows(Some("EINVAL")));
    }

    #[test]
    fn test_codes_restrict_retries() {
        let classification = RetryClassification::transient_connection();

        assert!(classification.allows(Some("ECONNRESET")));
        assert!(classification.allows(Some("ETIMEDOUT")));
        assert!(!classification.allows(Some("ENOTFOUND")));
        assert!(!classification.allows(None));
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_value(RetryClassification::transient_connection()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"mode": "codes", "codes": ["ECONNRESET", "ETIMEDOUT"]})
        );

        let any: RetryClassification =
            serde_json::from_value(serde_json::json!({"mode": "any_error"})).unwrap();
        assert_eq!(any, RetryClassification::AnyError);
    }
}
