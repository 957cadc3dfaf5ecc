//! Trellis Registry — clients that stream raw records from each source
//!
//! Every source implements the same [`RegistryClient`] capability:
//! `produce` pushes ecosystem-tagged [`trellis_core::RawRecord`]s into a
//! bounded session queue until the source is exhausted, the session is
//! cancelled, or the source fails fatally. A fatal failure in one client
//! never takes the others down — the session isolates it per source.

pub mod client;
pub mod npm;
pub mod pypi;
pub mod stackoverflow;


pub use client::{RegistryClient, RegistryError, SourceStats};
pub use npm::{NpmClient, NpmConfig};
pub use pypi::{PypiClient, PypiConfig};
pub use stackoverflow::{StackOverflowClient, StackOverflowConfig};
