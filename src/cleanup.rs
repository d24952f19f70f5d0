//! Inbox cleanup for GitHub notifications
//!
//! Archives notification threads whose linked issue or pull request has been
//! closed. Threads without a recognisable link, or whose issue is still
//! open, are left alone.

use std::sync::Arc;

use opentelemetry::Context;
use tracing::{debug, info, warn};

use crate::config::github::NOTIFICATIONS_SENDER;
use crate::error::Result;
use crate::github::{parse_issue_link, GithubClient, IssueLink, IssueState};
use crate::gmail::client::GmailClient;
use crate::gmail::types::Thread;
use crate::gmail::utils::message_text;

/// Default number of threads examined per run
pub const DEFAULT_MAX_THREADS: u32 = 100;

/// Options of one cleanup run
#[derive(Debug, Clone, Copy)]
pub struct CleanupOptions {
    /// Report what would be archived without modifying the mailbox
    pub dry_run: bool,
    pub max_threads: u32,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_threads: DEFAULT_MAX_THREADS,
        }
    }
}

/// Outcome of a cleanup run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub scanned: usize,
    /// Threads archived, or that would have been in a dry run
    pub archived: usize,
    pub skipped: usize,
    /// Thread id and error text of each thread that could not be processed
    pub failures: Vec<(String, String)>,
}

/// Gmail query selecting GitHub notification threads still in the inbox
pub fn notification_query() -> String {
    format!("from:{} in:inbox", NOTIFICATIONS_SENDER)
}

/// First issue link found in a thread, searching messages in order
pub fn thread_link(thread: &Thread) -> Option<IssueLink> {
    thread
        .messages
        .iter()
        .find_map(|m| parse_issue_link(&message_text(m)))
        .or_else(|| thread.snippet.as_deref().and_then(parse_issue_link))
}

/// Cleanup routine over one Gmail account
pub struct Cleanup {
    gmail: Arc<GmailClient>,
    github: GithubClient,
}

impl Cleanup {
    pub fn new(gmail: Arc<GmailClient>, github: GithubClient) -> Self {
        Self { gmail, github }
    }

    pub async fn run(&self, options: CleanupOptions) -> Result<CleanupReport> {
        let cx = Context::new();
        let threads = self
            .gmail
            .list_threads(&notification_query(), options.max_threads)
            .await?;
        info!(
            account = self.gmail.account(),
            threads = threads.len(),
            dry_run = options.dry_run,
            "Scanning GitHub notifications"
        );

        let mut report = CleanupReport::default();
        for thread_ref in threads {
            report.scanned += 1;
            match self.process(&cx, &thread_ref.id, options.dry_run).await {
                Ok(true) => report.archived += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(thread_id = %thread_ref.id, "Cleanup failed: {}", e);
                    report.failures.push((thread_ref.id, e.to_string()));
                }
            }
        }

        info!(
            scanned = report.scanned,
            archived = report.archived,
            skipped = report.skipped,
            failed = report.failures.len(),
            "Cleanup finished"
        );
        Ok(report)
    }

    /// Returns whether the thread was (or would be) archived.
    async fn process(&self, cx: &Context, thread_id: &str, dry_run: bool) -> Result<bool> {
        let thread = self.gmail.get_thread(thread_id).await?;
        let link = match thread_link(&thread) {
            Some(link) => link,
            None => {
                debug!(thread_id, "No issue link");
                return Ok(false);
            }
        };

        match self.github.issue_state(cx, &link).await? {
            IssueState::Open => {
                debug!(thread_id, issue = %link, "Issue still open");
                Ok(false)
            }
            IssueState::Closed if dry_run => {
                info!(thread_id, issue = %link, "Would archive");
                Ok(true)
            }
            IssueState::Closed => {
                self.gmail.archive_thread(thread_id).await?;
                info!(thread_id, issue = %link, "Archived");
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::types::Message;

    fn message(snippet: &str) -> Message {
        Message {
            id: "m".to_string(),
            thread_id: Some("t".to_string()),
            label_ids: vec!["INBOX".to_string()],
            snippet: Some(snippet.to_string()),
            payload: None,
        }
    }

    #[test]
    fn test_notification_query() {
        assert_eq!(notification_query(), "from:notifications@github.com in:inbox");
    }

    #[test]
    fn test_thread_link_uses_first_message_with_link() {
        let thread = Thread {
            id: "t".to_string(),
            snippet: None,
            messages: vec![
                message("no link here"),
                message("https://github.com/o/r/pull/42"),
                message("https://github.com/o/r/issues/7"),
            ],
        };
        let link = thread_link(&thread).unwrap();
        assert_eq!(link.number, 42);
    }

    #[test]
    fn test_thread_link_falls_back_to_thread_snippet() {
        let thread = Thread {
            id: "t".to_string(),
            snippet: Some("see github.com/o/r/issues/3".to_string()),
            messages: vec![message("nothing")],
        };
        assert_eq!(thread_link(&thread).unwrap().number, 3);
    }

    #[test]
    fn test_thread_without_link() {
        let thread = Thread {
            id: "t".to_string(),
            snippet: None,
            messages: Vec::new(),
        };
        assert!(thread_link(&thread).is_none());
    }

    #[test]
    fn test_default_options() {
        let options = CleanupOptions::default();
        assert!(!options.dry_run);
        assert_eq!(options.max_threads, DEFAULT_MAX_THREADS);
    }
}
