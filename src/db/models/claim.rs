use core::fmt;

use serde::{Deserialize, Serialize};

/// Caller identity as resolved by the entitlement provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerId(pub String);

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CallerId {
    fn from(value: String) -> Self {
        CallerId(value)
    }
}

impl From<&str> for CallerId {
    fn from(value: &str) -> Self {
        CallerId(value.to_string())
    }
}

/// External-account identity extracted from a verification screenshot.
///
/// The vision service reports `"unknown"` when it cannot read a username;
/// that case is a distinct variant rather than a magic string so dedup logic
/// pattern-matches on the tag. `Unresolved` claims are never deduplicated
/// against each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalAccount {
    Resolved(String),
    Unresolved,
}

impl ExternalAccount {
    /// Lowercases and trims the extracted username. Empty strings and the
    /// service's `"unknown"` placeholder map to `Unresolved`.
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw {
            None => ExternalAccount::Unresolved,
            Some(name) => {
                let normalized = name.trim().to_lowercase();
                if normalized.is_empty() || normalized == "unknown" {
                    ExternalAccount::Unresolved
                } else {
                    ExternalAccount::Resolved(normalized)
                }
            }
        }
    }

    pub fn resolved(&self) -> Option<&str> {
        match self {
            ExternalAccount::Resolved(name) => Some(name),
            ExternalAccount::Unresolved => None,
        }
    }
}

/// Record of an issued free-unlock promo code. Written under the identity key
/// and, when the account resolved, under the account key as well.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "userId")]
    pub identity: CallerId,
    #[serde(rename = "externalAccount")]
    pub account: ExternalAccount,
    #[serde(rename = "promoCode")]
    pub promo_code: String,
    #[serde(rename = "claimedAt")]
    pub claimed_at: i64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_normalize_lowercases_and_trims() {
        assert_eq!(
            ExternalAccount::normalize(Some("  SharpBettor99 ")),
            ExternalAccount::Resolved("sharpbettor99".to_string())
        );
    }

    #[test]
    fn test_unknown_and_empty_map_to_unresolved() {
        assert_eq!(
            ExternalAccount::normalize(Some("unknown")),
            ExternalAccount::Unresolved
        );
        assert_eq!(
            ExternalAccount::normalize(Some("UNKNOWN")),
            ExternalAccount::Unresolved
        );
        assert_eq!(
            ExternalAccount::normalize(Some("   ")),
            ExternalAccount::Unresolved
        );
        assert_eq!(ExternalAccount::normalize(None), ExternalAccount::Unresolved);
    }
}
