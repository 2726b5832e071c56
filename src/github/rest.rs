//! reqwest implementation of `GitHubApi`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, IF_MODIFIED_SINCE, LAST_MODIFIED, LINK, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::{MonitorError, Result};
use crate::github::client::GitHubApi;
use crate::github::types::{
    Commit, Notification, NotificationBatch, NotificationPage, NotificationQuery, PullRequest, Review, User,
};

/// Public GitHub API root
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";

const POLL_INTERVAL_HEADER: &str = "x-poll-interval";

/// Page size for list endpoints
const PER_PAGE: u32 = 100;

/// Configuration for a REST client
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub api_url: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(30),
            user_agent: format!("pr-monitor/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Token-authenticated GitHub REST client
pub struct RestClient {
    http: Client,
    token: String,
    config: RestConfig,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("api_url", &self.config.api_url)
            .finish_non_exhaustive()
    }
}

impl RestClient {
    pub fn new(token: impl Into<String>, config: RestConfig) -> Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            http,
            token: token.into(),
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, &self.config.user_agent)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.authorized(self.http.get(url)).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Follow `Link: rel="next"` until exhausted.
    async fn get_all_pages<T: DeserializeOwned>(&self, first_url: String) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(first_url);

        while let Some(url) = next {
            debug!("GET {}", url);
            let response = self.authorized(self.http.get(&url)).send().await?;
            let response = check_status(response).await?;
            next = next_page_url(response.headers());
            let mut page: Vec<T> = response.json().await?;
            items.append(&mut page);
        }

        Ok(items)
    }
}

#[async_trait]
impl GitHubApi for RestClient {
    async fn list_notifications(&self, query: &NotificationQuery) -> Result<NotificationPage> {
        let mut params: Vec<(&str, String)> = vec![("per_page", query.per_page.max(1).to_string())];
        if query.all {
            params.push(("all", "true".to_string()));
        }
        if let Some(page) = query.page {
            params.push(("page", page.to_string()));
        }

        let mut builder = self.authorized(self.http.get(self.url("notifications"))).query(&params);
        if let Some(since) = &query.if_modified_since {
            builder = builder.header(IF_MODIFIED_SINCE, since);
        }

        let response = builder.send().await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(NotificationPage::NotModified);
        }
        let response = check_status(response).await?;

        let headers = response.headers();
        let last_modified = header_str(headers, LAST_MODIFIED.as_str());
        let poll_interval = header_str(headers, POLL_INTERVAL_HEADER)
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        let next_page = next_page_url(headers).and_then(|u| page_param(&u));

        let notifications: Vec<Notification> = response.json().await?;

        Ok(NotificationPage::Modified(NotificationBatch {
            notifications,
            last_modified,
            poll_interval,
            next_page,
        }))
    }

    async fn mark_thread_read(&self, thread_id: &str) -> Result<()> {
        let url = self.url(&format!("notifications/threads/{}", thread_id));
        let response = self.authorized(self.http.patch(url)).send().await?;
        check_status(response).await?;
        Ok(())
    }

    async fn mark_all_notifications_read(&self, last_read_at: DateTime<Utc>) -> Result<()> {
        let body = json!({
            "last_read_at": last_read_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            "read": true,
        });
        let response = self
            .authorized(self.http.put(self.url("notifications")))
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn list_open_pulls(&self, repo: &str) -> Result<Vec<PullRequest>> {
        let url = self.url(&format!("repos/{}/pulls?state=open&per_page={}", repo, PER_PAGE));
        self.get_all_pages(url).await
    }

    async fn get_pull(&self, repo: &str, number: u64) -> Result<PullRequest> {
        self.get_json(&self.url(&format!("repos/{}/pulls/{}", repo, number)))
            .await
    }

    async fn list_reviews(&self, repo: &str, number: u64) -> Result<Vec<Review>> {
        let url = self.url(&format!("repos/{}/pulls/{}/reviews?per_page={}", repo, number, PER_PAGE));
        self.get_all_pages(url).await
    }

    async fn list_commits(&self, repo: &str, number: u64) -> Result<Vec<Commit>> {
        let url = self.url(&format!("repos/{}/pulls/{}/commits?per_page={}", repo, number, PER_PAGE));
        self.get_all_pages(url).await
    }

    async fn authenticated_user(&self) -> Result<String> {
        let user: User = self.get_json(&self.url("user")).await?;
        Ok(user.login)
    }
}

/// Turn a non-success response into `MonitorError::Api`.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(body);

    Err(MonitorError::Api {
        status: status.as_u16(),
        message,
    })
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

fn next_page_url(headers: &HeaderMap) -> Option<String> {
    headers
        .get(LINK)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_next_link)
}

/// Extract the `rel="next"` target from an RFC 8288 `Link` header.
pub fn parse_next_link(link: &str) -> Option<String> {
    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim();
            p == r#"rel="next""# || p == "rel=next"
        });
        if is_next {
            target
                .strip_prefix('<')
                .and_then(|t| t.strip_suffix('>'))
                .map(str::to_string)
        } else {
            None
        }
    })
}

/// The `page` query parameter of a URL.
pub fn page_param(url: &str) -> Option<u32> {
    let query = url.split_once('?')?.1;
    query
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .find(|(k, _)| *k == "page")
        .and_then(|(_, v)| v.parse().ok())
}
