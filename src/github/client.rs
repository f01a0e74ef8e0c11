//! GitHub REST client for pull-request listings

use super::{ApiError, CommitFile, Page, PullRequest, PullRequestApi, RateLimitInfo, Review};
use crate::config::GitHubSettings;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Per-request timeout for listings (pages of up to 100 records)
const LIST_TIMEOUT: Duration = Duration::from_secs(30);

/// GitHub API client
pub struct GitHubClient {
    client: Client,
    rest_base_url: String,
    auth_token: Option<String>,
}

impl GitHubClient {
    /// Create a new client for github.com or a GitHub Enterprise host
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(settings: &GitHubSettings) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .default_headers({
                let mut headers = header::HeaderMap::new();
                headers.insert(
                    header::USER_AGENT,
                    header::HeaderValue::from_static("reviewgraph/0.1"),
                );
                headers.insert(
                    header::ACCEPT,
                    header::HeaderValue::from_static("application/vnd.github.v3+json"),
                );
                headers
            })
            .build()?; // reqwest::Error converts to ReviewGraphError::Http via #[from]

        let auth_token = std::env::var(&settings.token_env)
            .ok()
            .filter(|t| !t.is_empty());

        Ok(Self {
            client,
            rest_base_url: rest_base_url(&settings.url),
            auth_token,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_token.is_some()
    }

    pub fn rest_base_url(&self) -> &str {
        &self.rest_base_url
    }

    /// GET one page of a listing and decode it
    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Page<T>, ApiError> {
        let url = format!("{}{}", self.rest_base_url, path);

        let mut request = self.client.get(&url).query(query);
        if let Some(ref token) = self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.timeout(LIST_TIMEOUT).send().await?;
        let rate = rate_limit_info(&response);
        let next_page = response
            .headers()
            .get(header::LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_page_from_link);

        debug!(
            url = %url,
            status = rate.status,
            remaining = rate.remaining,
            next_page = next_page,
            "GitHub API response"
        );

        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await?;
                let items: Vec<T> = serde_json::from_slice(&body)
                    .map_err(|e| ApiError::Decode(format!("{}: {}", path, e)))?;
                Ok(Page {
                    items,
                    next_page,
                    rate,
                })
            }
            _ if rate.is_rate_limited() => Err(ApiError::RateLimited(rate)),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ApiError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

#[async_trait]
impl PullRequestApi for GitHubClient {
    async fn list_closed_pulls(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Page<PullRequest>, ApiError> {
        let path = format!("/repos/{}/{}/pulls", owner, repo);
        self.get_page(
            &path,
            &[
                ("state", "closed".to_string()),
                ("sort", "created".to_string()),
                ("direction", "desc".to_string()),
                ("page", page.to_string()),
                ("per_page", per_page.to_string()),
            ],
        )
        .await
    }

    async fn list_reviews(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Review>, ApiError> {
        let path = format!("/repos/{}/{}/pulls/{}/reviews", owner, repo, number);
        self.get_page(
            &path,
            &[("page", page.to_string()), ("per_page", per_page.to_string())],
        )
        .await
    }

    async fn list_files(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Page<CommitFile>, ApiError> {
        let path = format!("/repos/{}/{}/pulls/{}/files", owner, repo, number);
        self.get_page(
            &path,
            &[("page", page.to_string()), ("per_page", per_page.to_string())],
        )
        .await
    }
}

/// Resolve the REST base URL for github.com or a GitHub Enterprise host
fn rest_base_url(url: &str) -> String {
    let base_url = url.trim_end_matches('/');
    if base_url.contains("api.github.com") {
        base_url.to_string()
    } else if base_url.contains("github.com") {
        "https://api.github.com".to_string()
    } else if base_url.ends_with("/api/v3") {
        base_url.to_string()
    } else {
        format!("{}/api/v3", base_url)
    }
}

/// Extract rate-limit headers from a response
fn rate_limit_info(response: &Response) -> RateLimitInfo {
    let headers = response.headers();
    let header_u64 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    RateLimitInfo {
        status: response.status().as_u16(),
        remaining: header_u64("x-ratelimit-remaining"),
        reset: header_u64("x-ratelimit-reset").and_then(epoch_to_datetime),
        retry_after: header_u64(header::RETRY_AFTER.as_str()).map(Duration::from_secs),
    }
}

fn epoch_to_datetime(secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

/// Parse the page number of the `rel="next"` entry of a `Link` header
///
/// `<https://api.github.com/repositories/1/pulls?state=closed&page=2>; rel="next", <...>; rel="last"`
fn next_page_from_link(link: &str) -> Option<u32> {
    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let url = pieces.next()?.trim().trim_start_matches('<').trim_end_matches('>');
        let is_next = pieces.any(|p| p.trim() == "rel=\"next\"");
        if !is_next {
            return None;
        }

        let query = url.split_once('?')?.1;
        query.split('&').find_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            if name == "page" {
                value.parse().ok()
            } else {
                None
            }
        })
    })
}
