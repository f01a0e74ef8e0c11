//! Configuration system
//!
//! Loads ~/.config/reviewgraph/config.yaml with sections for:
//! - GitHub host and token variable
//! - Cache backend and location
//! - Sync tuning (cooldown, page size, workers, retries)
//! - Query Service address

mod reviewgraph_config;

pub use reviewgraph_config::{GitHubSettings, ReviewGraphConfig, ServerSettings, SyncSettings};
