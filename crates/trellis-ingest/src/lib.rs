//! Trellis Ingest — archive extraction and streaming JSON parsing
//!
//! Both halves share one discipline: payloads are walked incrementally
//! and results are handed to the caller as they are produced, so a
//! failure late in a document never costs the records that came before
//! it.

pub mod archive;
pub mod stream;

pub use archive::{detect_format, extract, extract_all, ArchiveEntry, ArchiveFormat, ExtractError};
pub use stream::{collect_records, stream_records, ParseError, PathSyntaxError, RecordPath};
