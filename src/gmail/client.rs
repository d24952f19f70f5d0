//! Gmail API client
//!
//! High-level client for the Gmail operations exposed as tools. Every HTTP
//! round trip is reported to the metrics sink under a templated route, so
//! message and label ids never become label values.

use std::sync::Arc;
use std::time::Instant;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::config::gmail::{labels, API_BASE_URL, USER_ID};
use crate::error::{GmailApiError, GmailMcpError, Result};
use crate::gmail::auth::Authenticator;
use crate::gmail::types::*;
use crate::gmail::utils::{
    create_email_message, encode_raw_message, extract_email_content, message_header, EmailParams,
};
use crate::telemetry::metrics::MetricsSink;

/// Templated routes used as metric labels.
mod route {
    pub const MESSAGES: &str = "/users/me/messages";
    pub const MESSAGE: &str = "/users/me/messages/{id}";
    pub const MESSAGE_SEND: &str = "/users/me/messages/send";
    pub const MESSAGE_MODIFY: &str = "/users/me/messages/{id}/modify";
    pub const MESSAGE_TRASH: &str = "/users/me/messages/{id}/trash";
    pub const DRAFTS: &str = "/users/me/drafts";
    pub const THREADS: &str = "/users/me/threads";
    pub const THREAD: &str = "/users/me/threads/{id}";
    pub const THREAD_MODIFY: &str = "/users/me/threads/{id}/modify";
    pub const LABELS: &str = "/users/me/labels";
    pub const LABEL: &str = "/users/me/labels/{id}";
}

/// Gmail API client for one account
pub struct GmailClient {
    http_client: reqwest::Client,
    authenticator: Arc<Authenticator>,
    metrics: Arc<dyn MetricsSink>,
}

impl GmailClient {
    pub fn new(authenticator: Arc<Authenticator>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            authenticator,
            metrics,
        }
    }

    /// Account this client acts for
    pub fn account(&self) -> &str {
        self.authenticator.account()
    }

    fn url(path: &str) -> String {
        format!("{}/users/{}/{}", API_BASE_URL, USER_ID, path)
    }

    /// Authorize, send and record one request.
    async fn execute(&self, route: &'static str, request: RequestBuilder) -> Result<Response> {
        let token = self.authenticator.get_access_token().await?;
        let request = request.bearer_auth(token).build()?;
        let method = request.method().to_string();

        let started = Instant::now();
        let response = self.http_client.execute(request).await;
        let status_code = response.as_ref().map(|r| r.status().as_u16()).unwrap_or(0);
        self.metrics
            .record_http_request(&method, route, status_code, started.elapsed());

        Ok(response?)
    }

    /// Decode a successful response, or turn a failure into an error.
    async fn read_json<T: DeserializeOwned>(
        response: Response,
        action: &str,
        not_found: impl FnOnce() -> GmailApiError,
    ) -> Result<T> {
        let response = Self::check(response, action, not_found).await?;
        Ok(response.json().await?)
    }

    async fn check(
        response: Response,
        action: &str,
        not_found: impl FnOnce() -> GmailApiError,
    ) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(GmailMcpError::Gmail(not_found()));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            return Err(GmailMcpError::Gmail(GmailApiError::RateLimited { retry_after_secs }));
        }

        let text = response.text().await.unwrap_or_default();
        Err(GmailMcpError::Gmail(GmailApiError::RequestFailed {
            message: format!("Failed to {} ({}): {}", action, status, text),
        }))
    }

    fn request_failed(action: &str) -> impl FnOnce() -> GmailApiError + '_ {
        move || GmailApiError::RequestFailed {
            message: format!("Failed to {}: not found", action),
        }
    }

    fn message_not_found(message_id: &str) -> impl FnOnce() -> GmailApiError + '_ {
        move || GmailApiError::MessageNotFound {
            message_id: message_id.to_string(),
        }
    }

    // ==================== Message Operations ====================

    /// Send an email
    pub async fn send_email(&self, params: EmailParams) -> Result<Message> {
        let request = SendMessageRequest {
            raw: encode_raw_message(&create_email_message(&params)?),
            thread_id: params.thread_id,
        };

        let builder = self
            .http_client
            .post(Self::url("messages/send"))
            .json(&request);
        let response = self.execute(route::MESSAGE_SEND, builder).await?;
        Self::read_json(response, "send email", Self::request_failed("send email")).await
    }

    /// Create a draft
    pub async fn create_draft(&self, params: EmailParams) -> Result<Draft> {
        let request = CreateDraftRequest {
            message: SendMessageRequest {
                raw: encode_raw_message(&create_email_message(&params)?),
                thread_id: params.thread_id,
            },
        };

        let builder = self.http_client.post(Self::url("drafts")).json(&request);
        let response = self.execute(route::DRAFTS, builder).await?;
        Self::read_json(response, "create draft", Self::request_failed("create draft")).await
    }

    /// Get a message by ID in full format
    pub async fn get_message(&self, message_id: &str) -> Result<Message> {
        let builder = self
            .http_client
            .get(Self::url(&format!("messages/{}", message_id)))
            .query(&[("format", "full")]);
        let response = self.execute(route::MESSAGE, builder).await?;
        Self::read_json(response, "get message", Self::message_not_found(message_id)).await
    }

    /// Get a message with headers and decoded body
    pub async fn read_message(&self, message_id: &str) -> Result<ReadMessageResult> {
        let message = self.get_message(message_id).await?;

        let content = message
            .payload
            .as_ref()
            .map(extract_email_content)
            .unwrap_or_default();
        let is_html_only = content.text.is_empty() && !content.html.is_empty();
        let body = if !content.text.is_empty() {
            content.text
        } else if !content.html.is_empty() {
            content.html
        } else {
            tracing::debug!(message_id, "Empty body, using snippet");
            message.snippet.clone().unwrap_or_default()
        };

        Ok(ReadMessageResult {
            subject: message_header(&message, "subject").to_string(),
            from: message_header(&message, "from").to_string(),
            to: message_header(&message, "to").to_string(),
            date: message_header(&message, "date").to_string(),
            thread_id: message.thread_id.clone().unwrap_or_default(),
            id: message.id,
            body,
            is_html_only,
        })
    }

    /// Search messages, returning summary headers for each hit
    pub async fn search_messages(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<SearchMessageResult>> {
        let builder = self
            .http_client
            .get(Self::url("messages"))
            .query(&[("q", query), ("maxResults", max_results.to_string().as_str())]);
        let response = self.execute(route::MESSAGES, builder).await?;
        let list: MessageList =
            Self::read_json(response, "search messages", Self::request_failed("search messages"))
                .await?;

        let mut results = Vec::with_capacity(list.messages.len());
        for msg_ref in list.messages {
            let builder = self
                .http_client
                .get(Self::url(&format!("messages/{}", msg_ref.id)))
                .query(&[
                    ("format", "metadata"),
                    ("metadataHeaders", "Subject"),
                    ("metadataHeaders", "From"),
                    ("metadataHeaders", "Date"),
                ]);
            let response = self.execute(route::MESSAGE, builder).await?;
            let message: Message = match Self::read_json(
                response,
                "get message",
                Self::message_not_found(&msg_ref.id),
            )
            .await
            {
                Ok(message) => message,
                Err(e) => {
                    tracing::debug!(message_id = %msg_ref.id, "Skipping search hit: {}", e);
                    continue;
                }
            };

            results.push(SearchMessageResult {
                subject: message_header(&message, "subject").to_string(),
                from: message_header(&message, "from").to_string(),
                date: message_header(&message, "date").to_string(),
                id: message.id,
                thread_id: msg_ref.thread_id,
            });
        }

        Ok(results)
    }

    /// Add and remove labels on a message
    pub async fn modify_message(
        &self,
        message_id: &str,
        changes: &ModifyLabelsRequest,
    ) -> Result<Message> {
        let builder = self
            .http_client
            .post(Self::url(&format!("messages/{}/modify", message_id)))
            .json(changes);
        let response = self.execute(route::MESSAGE_MODIFY, builder).await?;
        Self::read_json(response, "modify message", Self::message_not_found(message_id)).await
    }

    /// Move a message to trash
    ///
    /// The `gmail.modify` scope cannot delete permanently.
    pub async fn trash_message(&self, message_id: &str) -> Result<()> {
        let builder = self
            .http_client
            .post(Self::url(&format!("messages/{}/trash", message_id)))
            .header(reqwest::header::CONTENT_LENGTH, "0");
        let response = self.execute(route::MESSAGE_TRASH, builder).await?;
        Self::check(response, "trash message", Self::message_not_found(message_id)).await?;
        Ok(())
    }

    // ==================== Thread Operations ====================

    /// List threads matching a Gmail query
    pub async fn list_threads(&self, query: &str, max_results: u32) -> Result<Vec<ThreadRef>> {
        let builder = self
            .http_client
            .get(Self::url("threads"))
            .query(&[("q", query), ("maxResults", max_results.to_string().as_str())]);
        let response = self.execute(route::THREADS, builder).await?;
        let list: ThreadList =
            Self::read_json(response, "list threads", Self::request_failed("list threads")).await?;
        Ok(list.threads)
    }

    /// Get a thread with all its messages
    pub async fn get_thread(&self, thread_id: &str) -> Result<Thread> {
        let builder = self
            .http_client
            .get(Self::url(&format!("threads/{}", thread_id)))
            .query(&[("format", "full")]);
        let response = self.execute(route::THREAD, builder).await?;
        Self::read_json(response, "get thread", Self::request_failed("get thread")).await
    }

    /// Add and remove labels on every message of a thread
    pub async fn modify_thread(&self, thread_id: &str, changes: &ModifyLabelsRequest) -> Result<Thread> {
        let builder = self
            .http_client
            .post(Self::url(&format!("threads/{}/modify", thread_id)))
            .json(changes);
        let response = self.execute(route::THREAD_MODIFY, builder).await?;
        Self::read_json(response, "modify thread", Self::request_failed("modify thread")).await
    }

    /// Archive a thread by removing it from the inbox
    pub async fn archive_thread(&self, thread_id: &str) -> Result<Thread> {
        let changes = ModifyLabelsRequest {
            remove_label_ids: vec![labels::INBOX.to_string()],
            ..Default::default()
        };
        self.modify_thread(thread_id, &changes).await
    }

    // ==================== Label Operations ====================

    /// List all labels
    pub async fn list_labels(&self) -> Result<Vec<Label>> {
        let builder = self.http_client.get(Self::url("labels"));
        let response = self.execute(route::LABELS, builder).await?;
        let list: LabelList =
            Self::read_json(response, "list labels", Self::request_failed("list labels")).await?;
        Ok(list.labels)
    }

    /// Get a label by ID
    pub async fn get_label(&self, label_id: &str) -> Result<Label> {
        let builder = self
            .http_client
            .get(Self::url(&format!("labels/{}", label_id)));
        let response = self.execute(route::LABEL, builder).await?;
        Self::read_json(response, "get label", || GmailApiError::LabelNotFound {
            label_id: label_id.to_string(),
        })
        .await
    }

    /// Create a user label
    pub async fn create_label(&self, request: &CreateLabelRequest) -> Result<Label> {
        let builder = self.http_client.post(Self::url("labels")).json(request);
        let response = self.execute(route::LABELS, builder).await?;

        if response.status() == StatusCode::CONFLICT {
            return Err(GmailMcpError::Gmail(GmailApiError::LabelAlreadyExists {
                name: request.name.clone(),
            }));
        }
        Self::read_json(response, "create label", Self::request_failed("create label")).await
    }

    /// Delete a user label; system labels are refused
    pub async fn delete_label(&self, label_id: &str) -> Result<()> {
        let label = self.get_label(label_id).await?;
        if label.is_system() {
            return Err(GmailMcpError::Gmail(GmailApiError::CannotDeleteSystemLabel {
                label_id: label_id.to_string(),
            }));
        }

        let builder = self
            .http_client
            .delete(Self::url(&format!("labels/{}", label_id)));
        let response = self.execute(route::LABEL, builder).await?;
        Self::check(response, "delete label", || GmailApiError::LabelNotFound {
            label_id: label_id.to_string(),
        })
        .await?;
        Ok(())
    }
}

/// Result of reading a message
#[derive(Debug, Clone)]
pub struct ReadMessageResult {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: String,
    pub body: String,
    pub is_html_only: bool,
}

/// Summary of one search hit
#[derive(Debug, Clone)]
pub struct SearchMessageResult {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub date: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        assert_eq!(
            GmailClient::url("messages/abc/modify"),
            "https://gmail.googleapis.com/gmail/v1/users/me/messages/abc/modify"
        );
    }

    #[test]
    fn test_routes_are_templated() {
        for r in [
            route::MESSAGE,
            route::MESSAGE_MODIFY,
            route::MESSAGE_TRASH,
            route::THREAD,
            route::THREAD_MODIFY,
            route::LABEL,
        ] {
            assert!(r.contains("{id}"), "{}", r);
        }
    }
}
