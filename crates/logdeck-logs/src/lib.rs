//! Log processing for logdeck
//!
//! This crate provides the entry store, the query engine, line sources
//! and the multiplexer that fans them into one stream.

mod gcloud;
mod http;
mod ingest;
mod mux;
mod parser;
mod poll;
mod query;
mod source;
mod store;

pub use gcloud::{GcloudFetcher, gcloud_source};
pub use http::HttpSource;
pub use ingest::{UPDATE_RATE, flush_interval, stream_to_store};
pub use mux::{FLUSH_INTERVAL, Multiplexer, MuxHandle};
pub use parser::{LogParser, RecordFields, lookup_path};
pub use poll::{DEFAULT_SEEN_CAPACITY, PollingSource, StructuredFetch, normalize, severity_level};
pub use query::{KEYWORDS, Query, QueryEngine, QueryError};
pub use source::{LineSource, ReaderSource, SourceError};
pub use store::{DEFAULT_MAX_SORT, EntryStore, Filtered, StoreError};

// Re-export types used in our public API
pub use logdeck_types::{Entry, FetchedRecord, LogLevel, Schedule};
