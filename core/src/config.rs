//! Caller-facing search options shared by the CLI and HTTP surfaces.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;

/// Default number of query terms scored between two checkpoints.
pub const DEFAULT_TERM_BLOCK_SIZE: usize = 4;

/// Default number of ranked results returned.
pub const DEFAULT_TOP_K: usize = 10;

fn default_term_block_size() -> NonZeroUsize {
    NonZeroUsize::new(DEFAULT_TERM_BLOCK_SIZE).unwrap_or(NonZeroUsize::MIN)
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

/// Per-query budgets. `None` means unlimited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default)]
    pub max_seconds: Option<f64>,
    #[serde(default)]
    pub max_memory_bytes: Option<u64>,
    #[serde(default)]
    pub max_query_terms: Option<usize>,
    #[serde(default)]
    pub max_docs: Option<usize>,
    #[serde(default = "default_term_block_size")]
    pub term_block_size: NonZeroUsize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_seconds: None,
            max_memory_bytes: None,
            max_query_terms: None,
            max_docs: None,
            term_block_size: default_term_block_size(),
        }
    }
}

impl ResourceLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_max_seconds(mut self, secs: f64) -> Self {
        self.max_seconds = Some(secs);
        self
    }

    pub fn with_max_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = Some(bytes);
        self
    }

    pub fn with_max_query_terms(mut self, terms: usize) -> Self {
        self.max_query_terms = Some(terms);
        self
    }

    pub fn with_max_docs(mut self, docs: usize) -> Self {
        self.max_docs = Some(docs);
        self
    }

    /// Block sizes of 0 are clamped to 1.
    pub fn with_term_block_size(mut self, size: usize) -> Self {
        self.term_block_size = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(secs) = self.max_seconds {
            if !secs.is_finite() || secs < 0.0 {
                return Err(Error::InvalidConfig(format!("max_seconds must be a finite, non-negative number (got {secs})")));
            }
        }
        Ok(())
    }
}

/// Limits plus the result count, as accepted from a JSON file, CLI flags or query string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(flatten)]
    pub limits: ResourceLimits,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { limits: ResourceLimits::default(), top_k: DEFAULT_TOP_K }
    }
}

impl SearchConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SearchConfig =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.limits.validate()
    }
}
