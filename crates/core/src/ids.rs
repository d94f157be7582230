//! Typed identifiers for ledgers, events and accounts.
//!
//! Matrix hands every identifier out as a plain string. Wrapping each kind in
//! its own newtype keeps a sender from ever being passed where an event id is
//! expected. Construction validates the sigil so malformed ids are rejected at
//! the boundary instead of deep inside verification.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! sigil_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal, $sigil:literal, $needs_server:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap a raw identifier.
            pub fn new(raw: impl Into<String>) -> Result<Self> {
                let raw = raw.into();
                if !raw.starts_with($sigil) {
                    return Err(CoreError::InvalidId {
                        kind: $kind,
                        value: raw,
                        reason: concat!("must start with '", $sigil, "'"),
                    });
                }
                if raw.len() == 1 {
                    return Err(CoreError::InvalidId {
                        kind: $kind,
                        value: raw,
                        reason: "must not be empty after the sigil",
                    });
                }
                if $needs_server && !raw.contains(':') {
                    return Err(CoreError::InvalidId {
                        kind: $kind,
                        value: raw,
                        reason: "must contain a ':server' part",
                    });
                }
                Ok(Self(raw))
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = CoreError;

            fn try_from(value: String) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

sigil_id!(
    /// Ledger identifier (a Matrix room id such as `!books:example.org`).
    LedgerId,
    "ledger id",
    "!",
    true
);

sigil_id!(
    /// Event identifier assigned by the log once an event is accepted (`$...`).
    EventId,
    "event id",
    "$",
    false
);

sigil_id!(
    /// Account identifier (a Matrix user id such as `@alice:example.org`).
    AccountId,
    "account id",
    "@",
    true
);
