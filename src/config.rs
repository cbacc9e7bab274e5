use serde::{Deserialize, Serialize};

use crate::errors::{OccIndexError, Result};

/// How records are reclaimed when an index is purged.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReclamationMode {
    /// Deferred if the index handler runs background tasks, immediate otherwise.
    #[default]
    Auto,
    /// Free record storage after an epoch grace period.
    Deferred,
    /// Free record storage as soon as a node has been walked.
    Immediate,
}

/// Configuration of a single transactional index.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct IndexConfig {
    /// Name used in log output.
    pub name: String,
    /// Maximum number of keys held by one leaf of the ordered index.
    pub fanout: usize,
    pub reclamation: ReclamationMode,
    /// Collect purge statistics even if `purge` is called without asking for them.
    pub collect_purge_stats: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: "index".to_string(),
            fanout: 16,
            reclamation: ReclamationMode::Auto,
            collect_purge_stats: false,
        }
    }
}

impl IndexConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    pub fn with_reclamation(mut self, reclamation: ReclamationMode) -> Self {
        self.reclamation = reclamation;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.fanout < 2 {
            return Err(OccIndexError::Config(format!(
                "fanout must be at least 2, got {}",
                self.fanout
            )));
        }
        Ok(())
    }
}
