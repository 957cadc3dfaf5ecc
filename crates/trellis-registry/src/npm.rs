//! NPM registry client

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use trellis_core::{Ecosystem, RawPackage, RawRecord, RawRequirement, Source};
use trellis_fetch::Fetcher;
use trellis_ingest::{RecordPath, stream_records};

use crate::client::{RegistryClient, RegistryError, SourceStats, send_record};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct NpmConfig {
    /// Bulk metadata document URL.
    pub registry_url: String,
    /// Path addressing package documents inside the bulk payload.
    pub record_path: String,
    /// Cap on (package, version) records produced, unbounded when `None`.
    pub limit: Option<usize>,
}

impl Default for NpmConfig {
    fn default() -> Self {
        NpmConfig {
            registry_url: "https://replicate.npmjs.com/_all_docs?include_docs=true".to_string(),
            record_path: "rows.*.doc".to_string(),
            limit: None,
        }
    }
}

pub struct NpmClient {
    fetcher: Fetcher,
    config: NpmConfig,
}

impl NpmClient {
    pub fn new(fetcher: Fetcher, config: NpmConfig) -> Self {
        NpmClient { fetcher, config }
    }
}

#[async_trait::async_trait]
impl RegistryClient for NpmClient {
    fn source(&self) -> Source {
        Source::Npm
    }

    async fn produce(
        &self,
        cancel: CancellationToken,
        tx: mpsc::Sender<RawRecord>,
    ) -> Result<SourceStats, RegistryError> {
        let mut stats = SourceStats::default();

        let bytes = tokio::select! {
            _ = cancel.cancelled() => return Ok(stats),
            fetched = self.fetcher.fetch(&self.config.registry_url) => fetched?,
        };
        let path = RecordPath::parse(&self.config.record_path)?;

        // The bulk document streams through a blocking parser; package
        // documents cross back into async land over a small channel so
        // queue backpressure reaches the parser.
        let (doc_tx, mut doc_rx) = mpsc::channel::<Value>(16);
        let parse_bytes = bytes.clone();
        let parse_path = path.clone();
        let parser = tokio::task::spawn_blocking(move || {
            stream_records(parse_bytes.as_ref(), &parse_path, |doc| {
                let _ = doc_tx.blocking_send(doc);
            })
        });

        let mut matched_docs = 0u64;
        'bulk: while let Some(doc) = doc_rx.recv().await {
            matched_docs += 1;
            for package in doc_to_packages(&doc) {
                if self
                    .config
                    .limit
                    .is_some_and(|limit| stats.records >= limit as u64)
                {
                    break 'bulk;
                }
                if !send_record(&tx, &cancel, RawRecord::Package(package)).await {
                    break 'bulk;
                }
                stats.records += 1;
            }
        }
        drop(doc_rx);

        let parse_result = parser
            .await
            .map_err(|e| RegistryError::Join(e.to_string()))?;
        match parse_result {
            Ok(_) if matched_docs > 0 => {}
            Ok(_) => {
                // Nothing matched the bulk path: the payload may be a
                // single package document rather than a bulk listing.
                for package in single_document_packages(&bytes) {
                    if !send_record(&tx, &cancel, RawRecord::Package(package)).await {
                        break;
                    }
                    stats.records += 1;
                }
            }
            Err(err) if matched_docs > 0 => {
                warn!(%err, "bulk document parsed partially");
                stats.soft_errors += 1;
            }
            Err(err) => return Err(err.into()),
        }

        debug!(records = stats.records, soft_errors = stats.soft_errors, "npm crawl finished");
        Ok(stats)
    }
}

fn single_document_packages(bytes: &[u8]) -> Vec<RawPackage> {
    serde_json::from_slice::<Value>(bytes)
        .map(|doc| doc_to_packages(&doc))
        .unwrap_or_default()
}

/// Expand one registry package document into per-version records.
fn doc_to_packages(doc: &Value) -> Vec<RawPackage> {
    let Some(name) = doc.get("name").and_then(Value::as_str) else {
        return Vec::new();
    };
    let Some(versions) = doc.get("versions").and_then(Value::as_object) else {
        return Vec::new();
    };
    let times = doc.get("time").and_then(Value::as_object);
    let doc_license = license_string(doc);

    versions
        .iter()
        .map(|(version, version_doc)| {
            let requirements = version_doc
                .get("dependencies")
                .and_then(Value::as_object)
                .map(|deps| {
                    deps.iter()
                        .map(|(dep, range)| RawRequirement {
                            name: dep.clone(),
                            req: range.as_str().map(str::to_string),
                        })
                        .collect()
                })
                .unwrap_or_default();

            let published = times
                .and_then(|t| t.get(version))
                .and_then(Value::as_str)
                .and_then(parse_timestamp);

            RawPackage {
                ecosystem: Ecosystem::Npm,
                name: name.to_string(),
                version: Some(version.clone()),
                requirements,
                published,
                license: license_string(version_doc).or_else(|| doc_license.clone()),
                document: format!("npm/{name}/{version}"),
                raw: version_doc.clone(),
            }
        })
        .collect()
}

/// NPM license fields are either a string or `{"type": "..."}`.
fn license_string(doc: &Value) -> Option<String> {
    match doc.get("license") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::Object(map)) => map
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
