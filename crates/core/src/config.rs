//! Configuration management for ledgertrust.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default reaction used to flag a rejected summary.
pub const DEFAULT_REJECTION_MARKER: &str = "👎";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// Structured JSON lines
    Json,
}

/// Trust engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// SQLite file holding verdicts, edges and heads
    pub database_path: PathBuf,
    /// Reaction symbol that marks a summary as rejected
    pub rejection_marker: String,
    /// How many events the root check scans backward for an earlier summary
    pub root_scan_limit: usize,
    /// How many events summary construction pages backward for new transactions
    pub transaction_scan_limit: usize,
    /// Fold summaries verified as trusted into the local heads frontier
    pub promote_verified_summaries: bool,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/ledgertrust.db"),
            rejection_marker: DEFAULT_REJECTION_MARKER.to_string(),
            root_scan_limit: 500,
            transaction_scan_limit: 1000,
            promote_verified_summaries: false,
            log_format: LogFormat::Pretty,
        }
    }
}

impl TrustConfig {
    /// Load configuration from a TOML file. Missing keys take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        tracing::debug!(
            path = %path.display(),
            database = %config.database_path.display(),
            "Configuration loaded"
        );
        Ok(config)
    }
}
