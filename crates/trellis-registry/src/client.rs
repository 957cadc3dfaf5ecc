//! Common registry client capability

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use trellis_core::{RawRecord, Source};
use trellis_fetch::FetchError;
use trellis_ingest::{ExtractError, ParseError, PathSyntaxError};

/// Per-source production counters, reported at session end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Records pushed into the session queue.
    pub records: u64,
    /// Recoverable failures (one package, one entry) that were skipped.
    pub soft_errors: u64,
}

/// Fatal, source-level failure. Soft per-record failures never surface
/// here; they are counted in [`SourceStats`].
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Path(#[from] PathSyntaxError),

    #[error("parser task failed: {0}")]
    Join(String),
}

/// A source that can stream raw records into a crawl session.
///
/// Implementations push into the bounded channel (suspending under
/// backpressure) until their source is exhausted, the token fires, or
/// the session drops the receiver. Cancellation is not an error: the
/// stats produced so far are returned either way.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    fn source(&self) -> Source;

    async fn produce(
        &self,
        cancel: CancellationToken,
        tx: mpsc::Sender<RawRecord>,
    ) -> Result<SourceStats, RegistryError>;
}

/// Push one record, suspending under backpressure. Returns `false` when
/// production should stop — the session was cancelled or its queue is
/// gone.
pub(crate) async fn send_record(
    tx: &mpsc::Sender<RawRecord>,
    cancel: &CancellationToken,
    record: RawRecord,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = tx.send(record) => sent.is_ok(),
    }
}
