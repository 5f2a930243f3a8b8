// ⚙️ Sync configuration
//
// Loaded from an optional JSON file, then overridden by MUALAF_* variables.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Largest page the backing store returns for one request.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Rows per upload message to the spreadsheet host.
pub const DEFAULT_UPLOAD_BATCH_SIZE: usize = 500;

/// How long to wait for the spreadsheet host before giving up.
pub const DEFAULT_HOST_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_STATUS: &str = "active";

// ============================================================================
// STRATEGIES
// ============================================================================

/// Column order of the exported header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HeaderOrder {
    /// Field names sorted lexicographically
    #[default]
    Sorted,

    /// Field names in first-seen order across the exported records
    SourcePreserved,
}

/// How push writes the ChangeSet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteStrategy {
    /// One row at a time (predictable store load, simple error attribution)
    #[default]
    Sequential,

    /// Up to `max_in_flight` updates at once
    #[serde(rename_all = "camelCase")]
    Concurrent { max_in_flight: usize },
}

impl WriteStrategy {
    pub fn max_in_flight(&self) -> usize {
        match self {
            WriteStrategy::Sequential => 1,
            WriteStrategy::Concurrent { max_in_flight } => (*max_in_flight).max(1),
        }
    }
}

// ============================================================================
// SYNC CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub page_size: usize,
    pub upload_batch_size: usize,
    pub host_timeout_secs: u64,
    /// Status value the pull filter keeps
    pub default_status: String,
    pub header_order: HeaderOrder,
    pub write_strategy: WriteStrategy,
    /// Acting user stamped into `updatedBy`
    pub actor: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            page_size: DEFAULT_PAGE_SIZE,
            upload_batch_size: DEFAULT_UPLOAD_BATCH_SIZE,
            host_timeout_secs: DEFAULT_HOST_TIMEOUT_SECS,
            default_status: DEFAULT_STATUS.to_string(),
            header_order: HeaderOrder::default(),
            write_strategy: WriteStrategy::default(),
            actor: "system".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn host_timeout(&self) -> Duration {
        Duration::from_secs(self.host_timeout_secs)
    }

    /// Read JSON config (if given), apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> SyncResult<Self> {
        let mut config = match path {
            Some(path) => {
                let json = fs::read_to_string(path)?;
                serde_json::from_str(&json)?
            }
            None => SyncConfig::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MUALAF_*` overrides from any key → value lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> SyncResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MUALAF_PAGE_SIZE") {
            self.page_size = parse_number("MUALAF_PAGE_SIZE", &v)?;
        }
        if let Some(v) = lookup("MUALAF_UPLOAD_BATCH_SIZE") {
            self.upload_batch_size = parse_number("MUALAF_UPLOAD_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("MUALAF_HOST_TIMEOUT_SECS") {
            self.host_timeout_secs = parse_number("MUALAF_HOST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("MUALAF_ACTOR") {
            self.actor = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.page_size == 0 {
            return Err(SyncError::Config("pageSize must be greater than zero".to_string()));
        }
        if self.upload_batch_size == 0 {
            return Err(SyncError::Config(
                "uploadBatchSize must be greater than zero".to_string(),
            ));
        }
        if self.host_timeout_secs == 0 {
            return Err(SyncError::Config(
                "hostTimeoutSecs must be greater than zero".to_string(),
            ));
        }
        if let WriteStrategy::Concurrent { max_in_flight: 0 } = self.write_strategy {
            return Err(SyncError::Config("maxInFlight must be greater than zero".to_string()));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> SyncResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SyncError::Config(format!("{} is not a number: {:?}", key, value)))
}

// ============================================================================
// TESTS
// ============================================================================
