use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How many history snapshots are kept per note.
///
/// Persisted as a JSON settings record, e.g. `{"type":"count","value":10}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Keep every snapshot forever.
    #[default]
    Unlimited,
    /// Keep only the `value` most recent snapshots.
    Count { value: u32 },
    /// Keep snapshots newer than `value` days.
    Days { value: u32 },
}

impl RetentionPolicy {
    pub fn validate(&self) -> Result<()> {
        match self {
            RetentionPolicy::Count { value: 0 } => Err(Error::InvalidPolicy(
                "history count must be at least 1".to_string(),
            )),
            RetentionPolicy::Days { value: 0 } => Err(Error::InvalidPolicy(
                "history days must be at least 1".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&RetentionPolicy::Count { value: 10 }).unwrap();
        assert_eq!(json, r#"{"type":"count","value":10}"#);

        let parsed: RetentionPolicy = serde_json::from_str(r#"{"type":"unlimited"}"#).unwrap();
        assert_eq!(parsed, RetentionPolicy::Unlimited);

        let parsed: RetentionPolicy = serde_json::from_str(r#"{"type":"days","value":30}"#).unwrap();
        assert_eq!(parsed, RetentionPolicy::Days { value: 30 });
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(RetentionPolicy::Count { value: 0 }.validate().is_err());
        assert!(RetentionPolicy::Days { value: 0 }.validate().is_err());
        assert!(RetentionPolicy::Count { value: 1 }.validate().is_ok());
        assert!(RetentionPolicy::Unlimited.validate().is_ok());
    }
}
