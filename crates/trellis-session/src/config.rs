//! Crawl session configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use trellis_fetch::FetchConfig;
use trellis_registry::{NpmConfig, PypiConfig, StackOverflowConfig};

/// Complete configuration payload for one crawl session.
///
/// Sources are opt-in: only registries with a config block present are
/// crawled. Loaded from TOML:
///
/// ```toml
/// queue_capacity = 256
/// output = "graph.jsonl"
///
/// [fetch]
/// requests_per_second = 10
/// host_concurrency = 4
///
/// [pypi]
/// base_url = "https://pypi.org"
/// limit = 500
///
/// [npm]
/// registry_url = "https://replicate.npmjs.com/_all_docs?include_docs=true"
///
/// [stackoverflow]
/// archive_url = "https://archive.org/download/stackexchange/stackoverflow.com-Posts.zip"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bound on the record queue between producers and the assembler.
    pub queue_capacity: usize,
    /// Snapshot destination, if the caller wants one written.
    pub output: Option<PathBuf>,
    pub fetch: FetchConfig,
    pub pypi: Option<PypiConfig>,
    pub npm: Option<NpmConfig>,
    pub stackoverflow: Option<StackOverflowConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            queue_capacity: 256,
            output: None,
            fetch: FetchConfig::default(),
            pypi: None,
            npm: None,
            stackoverflow: None,
        }
    }
}

impl SessionConfig {
    /// Load a session configuration from a TOML file.
    pub fn from_toml_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Whether any source is enabled.
    pub fn has_sources(&self) -> bool {
        self.pypi.is_some() || self.npm.is_some() || self.stackoverflow.is_some()
    }
}

/// Failure to establish a runnable session.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("could not build HTTP client: {0}")]
    Http(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn toml_round_trip_enables_listed_sources() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
queue_capacity = 64
output = "out.jsonl"

[fetch]
requests_per_second = 5

[pypi]
base_url = "http://localhost:8000"
limit = 10

[stackoverflow]
archive_url = "http://localhost:8000/posts.zip"
"#
        )
        .unwrap();

        let config = SessionConfig::from_toml_path(file.path()).unwrap();
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.fetch.requests_per_second, 5);
        assert!(config.has_sources());
        assert_eq!(config.pypi.as_ref().unwrap().limit, Some(10));
        assert!(config.npm.is_none());
        assert!(config.stackoverflow.is_some());
    }

    #[test]
    fn empty_config_enables_nothing() {
        let config = SessionConfig::default();
        assert!(!config.has_sources());
    }

    #[test]
    fn missing_files_are_reported() {
        let err = SessionConfig::from_toml_path("/nonexistent/trellis.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
