//! Sandbox configuration, loadable from TOML.
//!
//! Every section has defaults, so an empty file is a valid configuration:
//!
//! ```toml
//! [policy]
//! max_expression_length = 1000
//! sandbox_mode = true
//!
//! [execution]
//! max_concurrent = 4
//! queue_when_busy = true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level sandbox configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub policy: PolicyConfig,
    pub execution: ExecutionConfig,
    pub format: FormatConfig,
    pub errors: ErrorConfig,
}

/// Security policy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Longest accepted expression, in characters.
    pub max_expression_length: usize,
    /// Stricter checks: annotation and metadata access is refused.
    pub sandbox_mode: bool,
    /// Additional regular expressions to refuse.
    pub extra_denied_patterns: Vec<String>,
    /// Annotation names permitted in sandbox mode.
    pub allowed_annotations: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_expression_length: 1000,
            sandbox_mode: true,
            extra_denied_patterns: Vec::new(),
            allowed_annotations: Vec::new(),
        }
    }
}

/// Worker pool and deadline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    /// Worker threads that may run at once, including abandoned ones.
    pub max_concurrent: usize,
    /// Wait for a free worker (spending the request's budget) instead of
    /// failing fast.
    pub queue_when_busy: bool,
    pub worker_stack_bytes: usize,
    /// Longest string an expression may produce.
    pub max_string_len: usize,
    /// Most elements in one list or map an expression produces.
    pub max_collection_len: usize,
    /// Collection elements one evaluation may produce in total.
    pub max_total_elements: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 10,
            max_timeout_secs: 60,
            max_concurrent: 4,
            queue_when_busy: true,
            worker_stack_bytes: 4 * 1024 * 1024,
            max_string_len: 65_536,
            max_collection_len: 100_000,
            max_total_elements: 1_000_000,
        }
    }
}

/// Result formatting bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    /// Elements shown in descriptive samples.
    pub sample_size: usize,
    pub max_depth: usize,
    pub max_string_len: usize,
    /// Elements rendered per collection in json mode.
    pub max_items: usize,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            sample_size: 5,
            max_depth: 4,
            max_string_len: 1000,
            max_items: 100,
        }
    }
}

/// Error report settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorConfig {
    /// Namespace prefixes whose frames may appear in stack excerpts.
    pub stack_namespaces: Vec<String>,
    pub max_frames: usize,
    pub max_suggestions: usize,
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self {
            stack_namespaces: vec!["app".to_string(), "evalguard".to_string()],
            max_frames: 10,
            max_suggestions: 5,
        }
    }
}

impl SandboxConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.policy.max_expression_length == 0 {
            return invalid("policy.max_expression_length must be positive");
        }
        for pattern in &self.policy.extra_denied_patterns {
            regex::Regex::new(pattern).map_err(|source| ConfigError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
        }

        let exec = &self.execution;
        if exec.max_timeout_secs == 0 || exec.max_timeout_secs > 60 {
            return invalid("execution.max_timeout_secs must be within 1..=60");
        }
        if exec.default_timeout_secs == 0 || exec.default_timeout_secs > exec.max_timeout_secs {
            return invalid("execution.default_timeout_secs must be within 1..=max_timeout_secs");
        }
        if exec.max_concurrent == 0 {
            return invalid("execution.max_concurrent must be positive");
        }
        if exec.worker_stack_bytes < 256 * 1024 {
            return invalid("execution.worker_stack_bytes must be at least 256 KiB");
        }
        if exec.max_string_len == 0 {
            return invalid("execution.max_string_len must be positive");
        }
        if exec.max_collection_len == 0 || exec.max_total_elements < exec.max_collection_len {
            return invalid(
                "execution.max_collection_len must be positive and at most execution.max_total_elements",
            );
        }

        if self.format.sample_size == 0 || self.format.max_depth == 0 {
            return invalid("format.sample_size and format.max_depth must be positive");
        }
        if self.format.max_items < self.format.sample_size {
            return invalid("format.max_items must be at least format.sample_size");
        }
        if self.errors.max_frames > 10 || self.errors.max_suggestions > 5 {
            return invalid("errors.max_frames is capped at 10 and errors.max_suggestions at 5");
        }
        Ok(())
    }
}
