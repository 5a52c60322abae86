//! Index configuration.
//!
//! The index itself never reads the environment; the surrounding daemon
//! builds an [`IndexConfig`] with [`IndexConfig::from_env`] and hands it to
//! [`Btree::open`](crate::storage::btree::Btree::open).
//!
//! # Environment Variables
//!
//! - `BTREE_INDEX_DIRECTORY`: Directory holding the node files (default: `./index`)
//! - `BTREE_INDEX_NODE_READ_LIMIT`: Maximum bytes read per node load (default: `8192`)

use std::path::PathBuf;

/// Name of the directory variable.
pub const DIRECTORY_VAR: &str = "BTREE_INDEX_DIRECTORY";
/// Name of the read limit variable.
pub const NODE_READ_LIMIT_VAR: &str = "BTREE_INDEX_NODE_READ_LIMIT";

/// Index configuration.
///
/// # Post-conditions
///
/// - `node_read_limit` is nonzero
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Directory holding one file per node plus the lock file.
    /// Must exist before the index is opened.
    pub directory: PathBuf,
    /// Maximum number of bytes read when loading a node.
    pub node_read_limit: usize,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(Self::DEFAULT_DIRECTORY),
            node_read_limit: Self::DEFAULT_NODE_READ_LIMIT,
        }
    }
}

impl IndexConfig {
    /// Default index directory.
    pub const DEFAULT_DIRECTORY: &'static str = "./index";
    /// Default per-node read limit.
    pub const DEFAULT_NODE_READ_LIMIT: usize = 8192;

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `BTREE_INDEX_NODE_READ_LIMIT` is set but is not a
    /// positive integer, or if `BTREE_INDEX_DIRECTORY` is set but empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let directory = Self::load_directory(lookup(DIRECTORY_VAR))?;
        let node_read_limit = Self::load_node_read_limit(lookup(NODE_READ_LIMIT_VAR))?;
        Ok(Self {
            directory,
            node_read_limit,
        })
    }

    fn load_directory(value: Option<String>) -> Result<PathBuf, ConfigError> {
        match value {
            Some(value) if value.is_empty() => Err(ConfigError::InvalidValue {
                name: DIRECTORY_VAR.to_string(),
                message: "must not be empty".to_string(),
            }),
            Some(value) => Ok(PathBuf::from(value)),
            None => Ok(PathBuf::from(Self::DEFAULT_DIRECTORY)),
        }
    }

    fn load_node_read_limit(value: Option<String>) -> Result<usize, ConfigError> {
        let Some(value) = value else {
            return Ok(Self::DEFAULT_NODE_READ_LIMIT);
        };
        match value.parse::<usize>() {
            Ok(limit) if limit > 0 => Ok(limit),
            _ => Err(ConfigError::InvalidValue {
                name: NODE_READ_LIMIT_VAR.to_string(),
                message: format!("'{value}' is not a positive byte count"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<IndexConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        IndexConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        assert_eq!(IndexConfig::DEFAULT_DIRECTORY, "./index");
        assert_eq!(IndexConfig::DEFAULT_NODE_READ_LIMIT, 8192);
        assert_eq!(load(&[]), Ok(IndexConfig::default()));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            (DIRECTORY_VAR, "/var/lib/repo/index"),
            (NODE_READ_LIMIT_VAR, "65536"),
        ])
        .expect("should load");
        assert_eq!(config.directory, PathBuf::from("/var/lib/repo/index"));
        assert_eq!(config.node_read_limit, 65536);
    }

    #[test]
    fn test_invalid_read_limit() {
        for bad in ["0", "-1", "lots", ""] {
            let err = load(&[(NODE_READ_LIMIT_VAR, bad)]).expect_err("should reject");
            assert!(
                matches!(err, ConfigError::InvalidValue { ref name, .. } if name == NODE_READ_LIMIT_VAR),
                "value {bad:?}"
            );
        }
    }

    #[test]
    fn test_empty_directory() {
        let err = load(&[(DIRECTORY_VAR, "")]).expect_err("should reject");
        assert_eq!(err.to_string(), "invalid value for BTREE_INDEX_DIRECTORY: must not be empty");
    }
}
