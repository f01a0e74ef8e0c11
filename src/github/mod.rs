//! GitHub pull-request API
//!
//! Record types as returned by the REST v3 API, the [`PullRequestApi`] seam the
//! ingestion engine talks through, and the rate-limit metadata every page carries.
//!
//! # Overview
//!
//! The engine needs three paginated listings:
//!
//! 1. closed pull requests of a repository, newest first
//! 2. reviews of one pull request
//! 3. changed files of one pull request
//!
//! [`GitHubClient`] implements them over `reqwest`; tests substitute their own
//! implementation of the trait.

pub mod client;
pub mod retry;

pub use client::GitHubClient;
pub use retry::{RateLimitGate, RetryConfig, RetryDecision, RetryableError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Placeholder login GitHub substitutes for deleted accounts
pub const GHOST_LOGIN: &str = "ghost";

/// Review state that counts as an approval
pub const APPROVED_STATE: &str = "APPROVED";

/// GitHub user (only the fields the graph needs)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubUser {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub id: u64,
}

/// Pull request (REST API format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub user: Option<GitHubUser>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
}

impl PullRequest {
    /// Author login, empty when the API omitted the user
    pub fn author_login(&self) -> &str {
        self.user.as_ref().map(|u| u.login.as_str()).unwrap_or("")
    }

    pub fn is_merged(&self) -> bool {
        self.merged_at.is_some()
    }
}

/// Pull request review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub user: Option<GitHubUser>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Review {
    pub fn reviewer_login(&self) -> &str {
        self.user.as_ref().map(|u| u.login.as_str()).unwrap_or("")
    }

    pub fn is_approval(&self) -> bool {
        self.state == APPROVED_STATE
    }
}

/// File changed by a pull request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitFile {
    pub filename: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub changes: u64,
}

/// A pull request with its reviews and changed files, reassembled from the cache
#[derive(Debug, Clone)]
pub struct PullDetails {
    pub pull: PullRequest,
    pub reviews: Vec<Review>,
    pub files: Vec<CommitFile>,
}

/// Rate-limit metadata attached to every API response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// HTTP status of the response
    pub status: u16,
    /// `X-RateLimit-Remaining`
    pub remaining: Option<u64>,
    /// `X-RateLimit-Reset` (epoch seconds)
    pub reset: Option<DateTime<Utc>>,
    /// `Retry-After` (secondary/abuse limit)
    pub retry_after: Option<Duration>,
}

impl RateLimitInfo {
    /// True when this response signals a primary or secondary rate limit
    pub fn is_rate_limited(&self) -> bool {
        matches!(self.status, 403 | 429) && (self.remaining == Some(0) || self.retry_after.is_some())
    }
}

/// One page of a paginated listing
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Next page number, `None` on the last page
    pub next_page: Option<u32>,
    pub rate: RateLimitInfo,
}

/// Remote API errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Rate limited: {0:?}")]
    RateLimited(RateLimitInfo),

    #[error("GitHub API error: HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Malformed response: {0}")]
    Decode(String),
}

/// The paginated listings the ingestion engine consumes
#[async_trait]
pub trait PullRequestApi: Send + Sync {
    /// Closed pull requests, newest first
    async fn list_closed_pulls(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Page<PullRequest>, ApiError>;

    async fn list_reviews(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Review>, ApiError>;

    async fn list_files(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Page<CommitFile>, ApiError>;
}
