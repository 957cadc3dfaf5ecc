//! StackOverflow client: mining package mentions from Q&A exports

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use trellis_core::{Ecosystem, MentionCandidate, RawPost, RawRecord, Source};
use trellis_fetch::Fetcher;
use trellis_ingest::{RecordPath, collect_records, extract_all};

use crate::client::{RegistryClient, RegistryError, SourceStats, send_record};

static PIP_INSTALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bpip3?\s+install\s+(?:-{1,2}[\w-]+\s+)*([A-Za-z0-9][A-Za-z0-9._-]*)").unwrap()
});

static NPM_INSTALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bnpm\s+(?:install|i|add)\s+(?:-{1,2}[\w-]+\s+)*((?:@[a-z0-9~][\w.-]*/)?[a-z0-9~][\w.-]*)")
        .unwrap()
});

/// Short inline-code spans; the loosest signal, ecosystem unknown.
static BACKTICK_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`(@?[A-Za-z][A-Za-z0-9._/-]{1,60})`").unwrap());

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

const SNIPPET_LIMIT: usize = 240;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StackOverflowConfig {
    /// Posts archive (zip / tar.gz / gzip) location.
    pub archive_url: String,
    /// Path addressing post records inside each archive entry.
    pub record_path: String,
    /// Cap on mention-bearing posts produced, unbounded when `None`.
    pub limit: Option<usize>,
}

impl Default for StackOverflowConfig {
    fn default() -> Self {
        StackOverflowConfig {
            archive_url: String::new(),
            record_path: "items.*".to_string(),
            limit: None,
        }
    }
}

pub struct StackOverflowClient {
    fetcher: Fetcher,
    config: StackOverflowConfig,
}

impl StackOverflowClient {
    pub fn new(fetcher: Fetcher, config: StackOverflowConfig) -> Self {
        StackOverflowClient { fetcher, config }
    }
}

#[async_trait::async_trait]
impl RegistryClient for StackOverflowClient {
    fn source(&self) -> Source {
        Source::StackOverflow
    }

    async fn produce(
        &self,
        cancel: CancellationToken,
        tx: mpsc::Sender<RawRecord>,
    ) -> Result<SourceStats, RegistryError> {
        let mut stats = SourceStats::default();

        let bytes = tokio::select! {
            _ = cancel.cancelled() => return Ok(stats),
            fetched = self.fetcher.fetch(&self.config.archive_url) => fetched?,
        };
        let path = RecordPath::parse(&self.config.record_path)?;

        let (entries, extract_err) = tokio::task::spawn_blocking(move || {
            extract_all(bytes.as_ref())
        })
        .await
        .map_err(|e| RegistryError::Join(e.to_string()))?;
        match extract_err {
            Some(err) if entries.is_empty() => return Err(err.into()),
            Some(err) => {
                warn!(%err, entries = entries.len(), "archive extracted partially");
                stats.soft_errors += 1;
            }
            None => {}
        }

        'archive: for entry in entries {
            let entry_name = if entry.name.is_empty() {
                "export".to_string()
            } else {
                entry.name.clone()
            };
            let entry_path = path.clone();
            let (items, parse_err) = tokio::task::spawn_blocking(move || {
                collect_records(entry.data.as_slice(), &entry_path)
            })
            .await
            .map_err(|e| RegistryError::Join(e.to_string()))?;
            if let Some(err) = parse_err {
                warn!(entry = %entry_name, %err, "post export parsed partially");
                stats.soft_errors += 1;
            }

            for item in items {
                if self
                    .config
                    .limit
                    .is_some_and(|limit| stats.records >= limit as u64)
                {
                    break 'archive;
                }
                // Posts that reference nothing contribute nothing.
                let Some(post) = post_from_item(&item, &entry_name) else {
                    continue;
                };
                if !send_record(&tx, &cancel, RawRecord::Post(post)).await {
                    break 'archive;
                }
                stats.records += 1;
            }
        }

        debug!(records = stats.records, soft_errors = stats.soft_errors, "stackoverflow crawl finished");
        Ok(stats)
    }
}

/// Build a mention record from one exported post, if it has an id, a
/// body, and at least one package-name candidate.
fn post_from_item(item: &Value, entry_name: &str) -> Option<RawPost> {
    let post = ["post_id", "question_id", "answer_id"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_u64))?;
    let body = item.get("body").and_then(Value::as_str)?;

    let candidates = scan_candidates(body);
    if candidates.is_empty() {
        return None;
    }

    Some(RawPost {
        post,
        snippet: snippet(body),
        candidates,
        document: format!("stackoverflow/{entry_name}#{post}"),
    })
}

/// Scan a post body (raw HTML or Markdown) for package-name candidates.
///
/// Install commands give an ecosystem hint; inline-code spans do not.
/// Candidates stay unresolved here — the reconciler matches them against
/// the crawled name index when the session finalizes.
pub fn scan_candidates(body: &str) -> Vec<MentionCandidate> {
    let mut seen: HashSet<(String, Option<Ecosystem>)> = HashSet::new();
    let mut candidates = Vec::new();
    let mut push = |name: &str, hint: Option<Ecosystem>| {
        let name = name.trim().to_string();
        if name.is_empty() || !name.chars().any(|c| c.is_ascii_alphabetic()) {
            return;
        }
        if seen.insert((name.clone(), hint)) {
            candidates.push(MentionCandidate { name, hint });
        }
    };

    for captures in PIP_INSTALL.captures_iter(body) {
        // Extras qualify the install, not the package name.
        let name = captures[1].split('[').next().unwrap_or("");
        push(name, Some(Ecosystem::Pypi));
    }
    for captures in NPM_INSTALL.captures_iter(body) {
        push(&captures[1], Some(Ecosystem::Npm));
    }
    for captures in BACKTICK_SPAN.captures_iter(body) {
        push(&captures[1], None);
    }
    candidates
}

/// Plain-text leading excerpt of a post body.
fn snippet(body: &str) -> String {
    let stripped = HTML_TAG.replace_all(body, " ");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut snippet: String = collapsed.chars().take(SNIPPET_LIMIT).collect();
    if collapsed.chars().count() > SNIPPET_LIMIT {
        snippet.push('…');
    }
    snippet
}
