//! Trust verdicts.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trust classification of a summary event.
///
/// `Untrusted` means "not yet decided". `Trusted` and `Rejected` are terminal:
/// once persisted they are never recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustVerdict {
    /// Not computed, or not derivable
    #[default]
    Untrusted,
    /// Verified against a trusted history
    Trusted,
    /// Failed verification
    Rejected,
}

impl TrustVerdict {
    /// Terminal verdicts are memoized and never change.
    pub fn is_terminal(self) -> bool {
        !matches!(self, TrustVerdict::Untrusted)
    }

    /// Stable storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            TrustVerdict::Untrusted => "untrusted",
            TrustVerdict::Trusted => "trusted",
            TrustVerdict::Rejected => "rejected",
        }
    }
}

impl fmt::Display for TrustVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustVerdict {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "untrusted" => Ok(TrustVerdict::Untrusted),
            "trusted" => Ok(TrustVerdict::Trusted),
            "rejected" => Ok(TrustVerdict::Rejected),
            other => Err(CoreError::UnknownVerdict(other.to_string())),
        }
    }
}
