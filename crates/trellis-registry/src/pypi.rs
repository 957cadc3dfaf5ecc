//! PyPI registry client

use std::sync::Arc;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use trellis_core::{Ecosystem, RawPackage, RawRecord, RawRequirement, Source};
use trellis_fetch::Fetcher;
use trellis_ingest::{RecordPath, collect_records};

use crate::client::{RegistryClient, RegistryError, SourceStats, send_record};

/// Leading package name of a PEP 508 requirement string.
static REQUIREMENT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*").unwrap());

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PypiConfig {
    /// Registry root; the simple index and per-package metadata URLs
    /// are derived from it.
    pub base_url: String,
    /// Concurrent per-package metadata fetches.
    pub concurrency: usize,
    /// Cap on packages crawled, unbounded when `None`.
    pub limit: Option<usize>,
}

impl Default for PypiConfig {
    fn default() -> Self {
        PypiConfig {
            base_url: "https://pypi.org".to_string(),
            concurrency: 8,
            limit: None,
        }
    }
}

pub struct PypiClient {
    fetcher: Fetcher,
    config: PypiConfig,
}

impl PypiClient {
    pub fn new(fetcher: Fetcher, config: PypiConfig) -> Self {
        PypiClient { fetcher, config }
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }
}

#[async_trait::async_trait]
impl RegistryClient for PypiClient {
    fn source(&self) -> Source {
        Source::Pypi
    }

    async fn produce(
        &self,
        cancel: CancellationToken,
        tx: mpsc::Sender<RawRecord>,
    ) -> Result<SourceStats, RegistryError> {
        let mut stats = SourceStats::default();

        // The package index is the one fetch this source cannot survive
        // without; its failure is fatal for the source.
        let index_url = format!("{}/simple/", self.base());
        let bytes = tokio::select! {
            _ = cancel.cancelled() => return Ok(stats),
            fetched = self.fetcher.fetch(&index_url) => fetched?,
        };

        let path = RecordPath::parse("projects.*")?;
        let (projects, parse_err) = tokio::task::spawn_blocking(move || {
            collect_records(bytes.as_ref(), &path)
        })
        .await
        .map_err(|e| RegistryError::Join(e.to_string()))?;
        if let Some(err) = parse_err {
            warn!(%err, "package index parsed partially");
            stats.soft_errors += 1;
        }

        let mut names: Vec<String> = projects
            .iter()
            .filter_map(|project| project.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        if let Some(limit) = self.config.limit {
            names.truncate(limit);
        }
        info!(packages = names.len(), "crawling package metadata");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks: JoinSet<Outcome> = JoinSet::new();
        for name in names {
            let fetcher = self.fetcher.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();
            let url = format!("{}/pypi/{}/json", self.base(), name);
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Outcome::Stopped;
                };
                let bytes = tokio::select! {
                    _ = cancel.cancelled() => return Outcome::Stopped,
                    fetched = fetcher.fetch(&url) => match fetched {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            warn!(package = %name, %err, "skipping package");
                            return Outcome::SoftError;
                        }
                    },
                };
                match parse_package(&name, &bytes) {
                    Some(package) => {
                        if send_record(&tx, &cancel, RawRecord::Package(package)).await {
                            Outcome::Sent
                        } else {
                            Outcome::Stopped
                        }
                    }
                    None => {
                        warn!(package = %name, "unusable package metadata");
                        Outcome::SoftError
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Outcome::Sent) => stats.records += 1,
                Ok(Outcome::SoftError) => stats.soft_errors += 1,
                Ok(Outcome::Stopped) => {}
                Err(err) => {
                    warn!(%err, "package task aborted");
                    stats.soft_errors += 1;
                }
            }
        }

        debug!(records = stats.records, soft_errors = stats.soft_errors, "pypi crawl finished");
        Ok(stats)
    }
}

enum Outcome {
    Sent,
    SoftError,
    Stopped,
}

/// Map a per-package metadata document onto a raw record.
fn parse_package(requested: &str, bytes: &[u8]) -> Option<RawPackage> {
    let doc: Value = serde_json::from_slice(bytes).ok()?;
    let info = doc.get("info")?;
    let name = info
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(requested)
        .to_string();
    let version = info.get("version").and_then(Value::as_str)?.to_string();

    let requirements = info
        .get("requires_dist")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .filter_map(parse_requirement)
                .collect()
        })
        .unwrap_or_default();

    let published = doc
        .get("urls")
        .and_then(Value::as_array)
        .and_then(|urls| urls.first())
        .and_then(|upload| upload.get("upload_time_iso_8601"))
        .and_then(Value::as_str)
        .and_then(parse_timestamp);

    let license = info
        .get("license")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string);

    let document = format!("pypi/{name}/{version}");
    Some(RawPackage {
        ecosystem: Ecosystem::Pypi,
        name,
        version: Some(version),
        requirements,
        published,
        license,
        document,
        raw: info.clone(),
    })
}

/// Parse one PEP 508 requirement string into a name and version spec.
/// Extras and environment markers qualify installs, not the dependency
/// graph, so both are stripped.
fn parse_requirement(raw: &str) -> Option<RawRequirement> {
    let spec = raw.split(';').next().unwrap_or("").trim();
    let name_match = REQUIREMENT_NAME.find(spec)?;
    let name = name_match.as_str().to_string();

    let mut rest = spec[name_match.end()..].trim();
    if let Some(stripped) = rest.strip_prefix('[') {
        rest = stripped.split_once(']').map(|(_, after)| after).unwrap_or("").trim();
    }
    let rest = rest
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim();

    Some(RawRequirement {
        name,
        req: (!rest.is_empty()).then(|| rest.to_string()),
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirement_strings_split_into_name_and_spec() {
        let req = parse_requirement("beta (>=2.0)").unwrap();
        assert_eq!(req.name, "beta");
        assert_eq!(req.req.as_deref(), Some(">=2.0"));

        let req = parse_requirement("requests>=2.8.1,<3").unwrap();
        assert_eq!(req.name, "requests");
        assert_eq!(req.req.as_deref(), Some(">=2.8.1,<3"));
    }

    #[test]
    fn extras_and_markers_are_stripped() {
        let req = parse_requirement("celery[redis]>=5.0; python_version < \"3.12\"").unwrap();
        assert_eq!(req.name, "celery");
        assert_eq!(req.req.as_deref(), Some(">=5.0"));
    }

    #[test]
    fn bare_names_carry_no_version_spec() {
        let req = parse_requirement("simplejson").unwrap();
        assert_eq!(req.name, "simplejson");
        assert_eq!(req.req, None);
    }

    #[test]
    fn unparseable_requirements_are_dropped() {
        assert!(parse_requirement("").is_none());
        assert!(parse_requirement("== 1.0").is_none());
    }

    #[test]
    fn metadata_documents_become_raw_packages() {
        let doc = serde_json::json!({
            "info": {
                "name": "alpha",
                "version": "1.0",
                "license": "MIT",
                "requires_dist": ["beta>=2.0", "gamma; extra == \"dev\""]
            },
            "urls": [{"upload_time_iso_8601": "2021-06-01T12:00:00.000000Z"}]
        });
        let package = parse_package("alpha", doc.to_string().as_bytes()).unwrap();
        assert_eq!(package.name, "alpha");
        assert_eq!(package.version.as_deref(), Some("1.0"));
        assert_eq!(package.requirements.len(), 2);
        assert_eq!(package.requirements[0].name, "beta");
        assert_eq!(package.license.as_deref(), Some("MIT"));
        assert!(package.published.is_some());
        assert_eq!(package.document, "pypi/alpha/1.0");
    }

    #[test]
    fn documents_without_version_are_rejected() {
        let doc = serde_json::json!({"info": {"name": "broken"}});
        assert!(parse_package("broken", doc.to_string().as_bytes()).is_none());
    }
}
