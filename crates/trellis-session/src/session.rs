//! Crawl session orchestration
//!
//! One session = one fresh graph. Each enabled source runs as an
//! independent producer pushing raw records into a bounded queue; a
//! single assembler task drains the queue and owns all graph mutation.
//! Producers that fail fatally are reported per source without taking
//! the session down, and cancellation at any point leaves a valid
//! partial graph.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use trellis_core::{Assembler, Graph, RawRecord, Source};
use trellis_fetch::{Fetcher, HostStats};
use trellis_registry::{
    NpmClient, PypiClient, RegistryClient, RegistryError, SourceStats, StackOverflowClient,
};

use crate::config::{ConfigError, SessionConfig};

/// Per-source result of a completed session.
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub source: Source,
    /// Records the source pushed into the queue.
    pub records: u64,
    /// Recoverable failures skipped along the way.
    pub soft_errors: u64,
    /// Records rejected at reconciliation as implausible.
    pub rejected: u64,
    /// Fatal source failure, if the source did not finish.
    pub fatal: Option<String>,
}

/// Everything a finished session hands back: the best-effort graph plus
/// per-source and per-host accounting.
#[derive(Debug)]
pub struct SessionReport {
    pub graph: Graph,
    pub sources: Vec<SourceOutcome>,
    pub hosts: Vec<HostStats>,
}

impl SessionReport {
    /// Aggregate of fatal per-source failures, `None` when every source
    /// ran to completion.
    pub fn session_error(&self) -> Option<SessionError> {
        let failures: Vec<SourceFailure> = self
            .sources
            .iter()
            .filter_map(|outcome| {
                outcome.fatal.as_ref().map(|message| SourceFailure {
                    source: outcome.source,
                    message: message.clone(),
                })
            })
            .collect();
        if failures.is_empty() {
            None
        } else {
            Some(SessionError { failures })
        }
    }
}

/// One source's fatal failure.
#[derive(Debug, Clone)]
pub struct SourceFailure {
    pub source: Source,
    pub message: String,
}

/// Aggregate of every source that failed fatally during a session. The
/// graph in the report is still valid — it holds whatever the healthy
/// sources produced.
#[derive(Debug, thiserror::Error)]
#[error("{} source(s) failed fatally", failures.len())]
pub struct SessionError {
    pub failures: Vec<SourceFailure>,
}

/// A configured crawl session, ready to run.
pub struct CrawlSession {
    config: SessionConfig,
    fetcher: Fetcher,
    cancel: CancellationToken,
    seed: Option<Graph>,
}

impl CrawlSession {
    pub fn new(config: SessionConfig) -> Result<Self, ConfigError> {
        let fetcher = Fetcher::new(config.fetch.clone())
            .map_err(|e| ConfigError::Http(e.to_string()))?;
        Ok(CrawlSession {
            config,
            fetcher,
            cancel: CancellationToken::new(),
            seed: None,
        })
    }

    /// Merge this session's results into a previously-built graph
    /// instead of starting empty.
    pub fn with_seed(mut self, graph: Graph) -> Self {
        self.seed = Some(graph);
        self
    }

    /// Token that cancels the session. Producers stop at their next
    /// suspension point; already-merged records stay in the graph.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn clients(&self) -> Vec<Box<dyn RegistryClient>> {
        let mut clients: Vec<Box<dyn RegistryClient>> = Vec::new();
        if let Some(pypi) = &self.config.pypi {
            clients.push(Box::new(PypiClient::new(self.fetcher.clone(), pypi.clone())));
        }
        if let Some(npm) = &self.config.npm {
            clients.push(Box::new(NpmClient::new(self.fetcher.clone(), npm.clone())));
        }
        if let Some(so) = &self.config.stackoverflow {
            clients.push(Box::new(StackOverflowClient::new(
                self.fetcher.clone(),
                so.clone(),
            )));
        }
        clients
    }

    /// Run the crawl to completion (or cancellation) and return the
    /// finalized graph with per-source outcomes.
    pub async fn run(self) -> SessionReport {
        let clients = self.clients();
        if clients.is_empty() {
            warn!("no sources enabled, returning an empty graph");
        }

        let (tx, mut rx) = mpsc::channel::<RawRecord>(self.config.queue_capacity.max(1));

        // Sole mutator of graph state: drains the queue until every
        // producer has dropped its sender.
        let mut assembler = match self.seed {
            Some(graph) => Assembler::with_seed(graph),
            None => Assembler::new(),
        };
        let assembler_task = tokio::spawn(async move {
            let mut rejected: HashMap<Source, u64> = HashMap::new();
            while let Some(record) = rx.recv().await {
                let source = record_source(&record);
                if !assembler.merge_record(record) {
                    *rejected.entry(source).or_default() += 1;
                }
            }
            (assembler, rejected)
        });

        let mut producers: JoinSet<(Source, Result<SourceStats, RegistryError>)> = JoinSet::new();
        for client in clients {
            let cancel = self.cancel.clone();
            let tx = tx.clone();
            producers.spawn(async move {
                let source = client.source();
                info!(%source, "source starting");
                let result = client.produce(cancel, tx).await;
                (source, result)
            });
        }
        drop(tx);

        let mut outcomes = Vec::new();
        while let Some(joined) = producers.join_next().await {
            match joined {
                Ok((source, Ok(stats))) => {
                    info!(%source, records = stats.records, soft_errors = stats.soft_errors, "source finished");
                    outcomes.push(SourceOutcome {
                        source,
                        records: stats.records,
                        soft_errors: stats.soft_errors,
                        rejected: 0,
                        fatal: None,
                    });
                }
                Ok((source, Err(err))) => {
                    error!(%source, %err, "source failed; continuing without it");
                    outcomes.push(SourceOutcome {
                        source,
                        records: 0,
                        soft_errors: 0,
                        rejected: 0,
                        fatal: Some(err.to_string()),
                    });
                }
                Err(join_err) => {
                    error!(%join_err, "source task aborted");
                }
            }
        }

        let (assembler, rejected) = match assembler_task.await {
            Ok(result) => result,
            Err(join_err) => {
                error!(%join_err, "assembler task aborted, reporting an empty graph");
                (Assembler::new(), HashMap::new())
            }
        };
        for outcome in &mut outcomes {
            outcome.rejected = rejected.get(&outcome.source).copied().unwrap_or(0);
        }
        outcomes.sort_by_key(|outcome| outcome.source.to_string());

        let graph = assembler.finish();
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            cancelled = self.cancel.is_cancelled(),
            "session finished"
        );
        SessionReport {
            graph,
            sources: outcomes,
            hosts: self.fetcher.host_stats(),
        }
    }
}

fn record_source(record: &RawRecord) -> Source {
    match record {
        RawRecord::Package(pkg) => match pkg.ecosystem {
            trellis_core::Ecosystem::Pypi => Source::Pypi,
            trellis_core::Ecosystem::Npm => Source::Npm,
        },
        RawRecord::Post(_) => Source::StackOverflow,
    }
}
