//! Trellis Fetch — throttled, retrying HTTP fetch primitive
//!
//! Every registry client goes through one [`Fetcher`]. It enforces a
//! per-host token-bucket rate ceiling and a per-host concurrency limit,
//! and retries transient failures (timeouts, 5xx, connection resets,
//! 429) with exponential backoff. Throttle state is shared across all
//! clones, so concurrent workers hitting the same host share one budget.

mod fetcher;


pub use fetcher::{FetchConfig, FetchError, Fetcher, HostStats};
