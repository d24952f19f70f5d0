//! GitHub issue lookups
//!
//! Just enough of the GitHub REST API to tell whether an issue or pull
//! request is still open. Pull requests share the issues endpoint.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use opentelemetry::Context;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::github::API_BASE_URL;
use crate::error::{GithubError, GmailMcpError, Result};
use crate::telemetry::attributes::{status, ApiTarget, Operation, Service, SpanAttributes};
use crate::telemetry::metrics::MetricsSink;
use crate::telemetry::spans::Tracing;

const ISSUE_ROUTE: &str = "/repos/{owner}/{repo}/issues/{number}";

static ISSUE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"github\.com/([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)/(?:issues|pull)/(\d+)").unwrap()
});

/// Reference to an issue or pull request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueLink {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl fmt::Display for IssueLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// First issue or pull request URL in `text`
pub fn parse_issue_link(text: &str) -> Option<IssueLink> {
    let caps = ISSUE_LINK.captures(text)?;
    Some(IssueLink {
        owner: caps[1].to_string(),
        repo: caps[2].to_string(),
        number: caps[3].parse().ok()?,
    })
}

/// Open/closed state of an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    state: IssueState,
}

/// Minimal GitHub REST client
pub struct GithubClient {
    http_client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    tracing: Tracing,
    metrics: Arc<dyn MetricsSink>,
}

impl GithubClient {
    pub fn new(token: Option<String>, tracing: Tracing, metrics: Arc<dyn MetricsSink>) -> Self {
        Self::with_base_url(API_BASE_URL, token, tracing, metrics)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        token: Option<String>,
        tracing: Tracing,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
            tracing,
            metrics,
        }
    }

    fn issue_url(&self, link: &IssueLink) -> String {
        format!(
            "{}/repos/{}/{}/issues/{}",
            self.base_url.trim_end_matches('/'),
            link.owner,
            link.repo,
            link.number
        )
    }

    /// Current state of an issue or pull request
    pub async fn issue_state(&self, cx: &Context, link: &IssueLink) -> Result<IssueState> {
        let target = ApiTarget::new(Service::Github, Operation::Get);
        let attrs = SpanAttributes::new()
            .resource("issue", &link.to_string())
            .build();
        let (_cx, span) = self.tracing.start_api_span(cx, target, attrs);

        let started = Instant::now();
        let result = self.fetch_issue(link).await;
        let outcome = match &result {
            Ok(_) => {
                span.set_success();
                status::SUCCESS
            }
            Err(e) => {
                span.set_error(e);
                status::ERROR
            }
        };
        self.metrics
            .record_api_call(target.service, target.operation, outcome, started.elapsed());

        result
    }

    async fn fetch_issue(&self, link: &IssueLink) -> Result<IssueState> {
        let mut request = self
            .http_client
            .get(self.issue_url(link))
            .header(reqwest::header::USER_AGENT, "gmail-mcp")
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let started = Instant::now();
        let response = request.send().await;
        let status_code = response.as_ref().map(|r| r.status().as_u16()).unwrap_or(0);
        self.metrics
            .record_http_request("GET", ISSUE_ROUTE, status_code, started.elapsed());
        let response = response?;

        match response.status() {
            s if s.is_success() => {
                let issue: IssueResponse = response.json().await?;
                Ok(issue.state)
            }
            StatusCode::NOT_FOUND => Err(GmailMcpError::Github(GithubError::IssueNotFound {
                owner: link.owner.clone(),
                repo: link.repo.clone(),
                number: link.number,
            })),
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
                Err(GmailMcpError::Github(GithubError::RateLimited))
            }
            s => {
                let text = response.text().await.unwrap_or_default();
                Err(GmailMcpError::Github(GithubError::RequestFailed {
                    message: format!("Failed to get issue {} ({}): {}", link, s, text),
                }))
            }
        }
    }
}
