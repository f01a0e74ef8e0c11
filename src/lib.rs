//! reviewgraph - Pull-request approval graph and contributor ranking
//!
//! Ingests a repository's merged pull requests from GitHub into a durable
//! cache, builds a weighted "who approves whose pull requests" graph, ranks
//! contributors with PageRank and emits a force-graph JSON document.
//!
//! # Architecture
//!
//! - **store**: Durable key-value cache (file system or SQLite)
//! - **github**: REST client, record types, retry and rate-limit handling
//! - **ingest**: Resumable sync engine and parallel record loader
//! - **graph**: Time-window filter, approval edges, PageRank, force-graph document
//! - **pipeline**: Sync → load → filter → build
//! - **server**: HTTP Query Service (`GET /graph`)
//! - **config**: YAML configuration

// Core modules
pub mod config;
pub mod error;
pub mod github;
pub mod graph;
pub mod ingest;
pub mod store;

// Services
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod server;
pub mod shutdown;

// Re-exports
pub use error::{ReviewGraphError, Result};
