//! MCP tool registry and Gmail tool handlers
//!
//! Every handler is wrapped with telemetry when it is registered. Tools that
//! change the mailbox are marked [`Access::Write`] and are refused when the
//! server runs read-only.

use std::future::Future;
use std::sync::Arc;

use opentelemetry::Context;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::config::gmail::labels::UNREAD;
use crate::error::{McpError, Result};
use crate::gmail::accounts::GmailAccounts;
use crate::gmail::client::GmailClient;
use crate::gmail::types::{CreateLabelRequest, ModifyLabelsRequest};
use crate::gmail::utils::EmailParams;
use crate::mcp::types::{CallToolResult, Tool};
use crate::telemetry::account::{resolve_account, ACCOUNT_ARGUMENT};
use crate::telemetry::{tool_fn, ApiTarget, Operation, Service, Telemetry, ToolFn};

/// Default and maximum page size of `search_emails`
const DEFAULT_SEARCH_RESULTS: u32 = 10;
const MAX_SEARCH_RESULTS: u32 = 500;

/// Whether a tool only reads or also changes state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// A tool with its already instrumented handler
pub struct RegisteredTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub access: Access,
    handler: ToolFn,
}

impl RegisteredTool {
    pub fn definition(&self) -> Tool {
        Tool {
            name: self.name.clone(),
            description: Some(self.description.clone()),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// Ordered set of tools exposed over MCP
pub struct ToolRegistry {
    telemetry: Telemetry,
    read_only: bool,
    tools: Vec<RegisteredTool>,
}

impl ToolRegistry {
    pub fn new(telemetry: Telemetry, read_only: bool) -> Self {
        Self {
            telemetry,
            read_only,
            tools: Vec::new(),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Register a tool, replacing any earlier one of the same name
    ///
    /// In read-only mode a write tool keeps its name and schema but its
    /// handler is swapped for one that refuses the call. Either way the
    /// stored handler is instrumented.
    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        input_schema: Value,
        access: Access,
        target: Option<ApiTarget>,
        handler: ToolFn,
    ) -> &mut Self {
        let handler = if self.read_only && access == Access::Write {
            read_only_refusal(name)
        } else {
            handler
        };
        let handler =
            self.telemetry
                .instrument_read_only(name, target, access == Access::Read, handler);

        let tool = RegisteredTool {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            access,
            handler,
        };
        match self.tools.iter_mut().find(|t| t.name == name) {
            Some(existing) => *existing = tool,
            None => self.tools.push(tool),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tools visible to the client; write tools are hidden when read-only
    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools
            .iter()
            .filter(|t| !self.read_only || t.access == Access::Read)
            .map(RegisteredTool::definition)
            .collect()
    }

    /// Run a tool and render the outcome for the wire
    pub async fn call_tool(&self, cx: Context, name: &str, args: Value) -> CallToolResult {
        let tool = match self.get(name) {
            Some(tool) => tool,
            None => {
                return CallToolResult::error(
                    McpError::UnknownTool {
                        name: name.to_string(),
                    }
                    .to_string(),
                )
            }
        };

        match (tool.handler)(cx, args).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = name, "Tool call failed: {}", e);
                CallToolResult::error(e.to_string())
            }
        }
    }
}

fn read_only_refusal(name: &str) -> ToolFn {
    let message = McpError::ReadOnly {
        name: name.to_string(),
    }
    .to_string();
    tool_fn(move |_cx, _args| {
        let message = message.clone();
        async move { Ok(CallToolResult::error(message)) }
    })
}

// ==================== Gmail Tools ====================

/// Register the Gmail tool set against `accounts`
pub fn register_gmail_tools(registry: &mut ToolRegistry, accounts: Arc<GmailAccounts>) {
    let gmail = |operation| Some(ApiTarget::new(Service::Gmail, operation));

    registry
        .register(
            "search_emails",
            "Searches for emails using Gmail search syntax",
            with_account(search_emails_schema()),
            Access::Read,
            gmail(Operation::Search),
            gmail_handler(&accounts, search_emails),
        )
        .register(
            "read_email",
            "Retrieves the content of a specific email",
            with_account(message_id_schema("ID of the email message to retrieve")),
            Access::Read,
            gmail(Operation::Get),
            gmail_handler(&accounts, read_email),
        )
        .register(
            "list_email_labels",
            "Retrieves all available Gmail labels",
            with_account(json!({"type": "object", "properties": {}})),
            Access::Read,
            gmail(Operation::List),
            gmail_handler(&accounts, list_email_labels),
        )
        .register(
            "send_email",
            "Sends a new email",
            with_account(send_email_schema()),
            Access::Write,
            gmail(Operation::Send),
            gmail_handler(&accounts, send_email),
        )
        .register(
            "draft_email",
            "Creates a new email draft",
            with_account(send_email_schema()),
            Access::Write,
            gmail(Operation::Create),
            gmail_handler(&accounts, draft_email),
        )
        .register(
            "modify_email",
            "Adds or removes labels on an email",
            with_account(modify_email_schema()),
            Access::Write,
            gmail(Operation::Update),
            gmail_handler(&accounts, modify_email),
        )
        .register(
            "delete_email",
            "Moves an email to the trash",
            with_account(message_id_schema("ID of the email message to trash")),
            Access::Write,
            gmail(Operation::Delete),
            gmail_handler(&accounts, delete_email),
        )
        .register(
            "create_label",
            "Creates a new Gmail label",
            with_account(create_label_schema()),
            Access::Write,
            gmail(Operation::Create),
            gmail_handler(&accounts, create_label),
        )
        .register(
            "delete_label",
            "Deletes a user-created Gmail label",
            with_account(delete_label_schema()),
            Access::Write,
            gmail(Operation::Delete),
            gmail_handler(&accounts, delete_label),
        )
        .register(
            "archive_thread",
            "Archives a whole conversation by removing it from the inbox",
            with_account(archive_thread_schema()),
            Access::Write,
            gmail(Operation::Update),
            gmail_handler(&accounts, archive_thread),
        );
}

/// Adapt a handler over one account's client into a [`ToolFn`]
///
/// The account comes from the authenticated identity or the `account`
/// argument, falling back to the default account.
fn gmail_handler<F, Fut>(accounts: &Arc<GmailAccounts>, handler: F) -> ToolFn
where
    F: Fn(Arc<GmailClient>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
{
    let accounts = Arc::clone(accounts);
    let handler = Arc::new(handler);
    tool_fn(move |cx: Context, args: Value| {
        let accounts = Arc::clone(&accounts);
        let handler = Arc::clone(&handler);
        async move {
            let account = resolve_account(&cx, &args);
            let client = accounts.client(&account).await?;
            handler(client, args).await
        }
    })
}

/// Parse tool arguments, or produce the error result to return
fn parse_args<T: DeserializeOwned>(args: Value) -> std::result::Result<T, CallToolResult> {
    serde_json::from_value(args).map_err(|e| {
        CallToolResult::error(
            McpError::InvalidArguments {
                message: e.to_string(),
            }
            .to_string(),
        )
    })
}

async fn search_emails(client: Arc<GmailClient>, args: Value) -> Result<CallToolResult> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Args {
        query: String,
        max_results: Option<u32>,
    }

    let args: Args = match parse_args(args) {
        Ok(a) => a,
        Err(result) => return Ok(result),
    };
    let max_results = args
        .max_results
        .unwrap_or(DEFAULT_SEARCH_RESULTS)
        .clamp(1, MAX_SEARCH_RESULTS);

    let results = client.search_messages(&args.query, max_results).await?;
    if results.is_empty() {
        return Ok(CallToolResult::text(format!("No emails match '{}'", args.query)));
    }

    let text = results
        .iter()
        .map(|r| {
            format!(
                "ID: {}\nThread ID: {}\nSubject: {}\nFrom: {}\nDate: {}\n",
                r.id, r.thread_id, r.subject, r.from, r.date
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    Ok(CallToolResult::text(text))
}

async fn read_email(client: Arc<GmailClient>, args: Value) -> Result<CallToolResult> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Args {
        message_id: String,
    }

    let args: Args = match parse_args(args) {
        Ok(a) => a,
        Err(result) => return Ok(result),
    };

    let message = client.read_message(&args.message_id).await?;
    let mut text = format!(
        "Thread ID: {}\nSubject: {}\nFrom: {}\nTo: {}\nDate: {}\n\n",
        message.thread_id, message.subject, message.from, message.to, message.date
    );
    if message.is_html_only {
        text.push_str("[Note: This email is HTML-formatted. Plain text version not available.]\n\n");
    }
    text.push_str(&message.body);
    Ok(CallToolResult::text(text))
}

async fn list_email_labels(client: Arc<GmailClient>, _args: Value) -> Result<CallToolResult> {
    let labels = client.list_labels().await?;
    let (system, user): (Vec<_>, Vec<_>) = labels.iter().partition(|l| l.is_system());

    let mut text = format!(
        "Found {} labels ({} system, {} user):\n\n",
        labels.len(),
        system.len(),
        user.len()
    );
    text.push_str("System Labels:\n");
    for label in &system {
        text.push_str(&format!("ID: {}\nName: {}\n\n", label.id, label.name));
    }
    text.push_str("\nUser Labels:\n");
    for label in &user {
        text.push_str(&format!("ID: {}\nName: {}\n\n", label.id, label.name));
    }
    Ok(CallToolResult::text(text))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComposeArgs {
    to: Vec<String>,
    subject: String,
    body: String,
    html_body: Option<String>,
    #[serde(default)]
    cc: Vec<String>,
    #[serde(default)]
    bcc: Vec<String>,
    thread_id: Option<String>,
    in_reply_to: Option<String>,
}

impl From<ComposeArgs> for EmailParams {
    fn from(args: ComposeArgs) -> Self {
        EmailParams {
            to: args.to,
            subject: args.subject,
            body: args.body,
            html_body: args.html_body,
            cc: args.cc,
            bcc: args.bcc,
            thread_id: args.thread_id,
            in_reply_to: args.in_reply_to,
        }
    }
}

async fn send_email(client: Arc<GmailClient>, args: Value) -> Result<CallToolResult> {
    let args: ComposeArgs = match parse_args(args) {
        Ok(a) => a,
        Err(result) => return Ok(result),
    };

    let message = client.send_email(args.into()).await?;
    Ok(CallToolResult::text(format!(
        "Email sent successfully with ID: {}",
        message.id
    )))
}

async fn draft_email(client: Arc<GmailClient>, args: Value) -> Result<CallToolResult> {
    let args: ComposeArgs = match parse_args(args) {
        Ok(a) => a,
        Err(result) => return Ok(result),
    };

    let draft = client.create_draft(args.into()).await?;
    Ok(CallToolResult::text(format!(
        "Email draft created successfully with ID: {}",
        draft.id
    )))
}

async fn modify_email(client: Arc<GmailClient>, args: Value) -> Result<CallToolResult> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Args {
        message_id: String,
        #[serde(default)]
        add_label_ids: Vec<String>,
        #[serde(default)]
        remove_label_ids: Vec<String>,
        mark_read: Option<bool>,
    }

    let mut args: Args = match parse_args(args) {
        Ok(a) => a,
        Err(result) => return Ok(result),
    };
    match args.mark_read {
        Some(true) => args.remove_label_ids.push(UNREAD.to_string()),
        Some(false) => args.add_label_ids.push(UNREAD.to_string()),
        None => {}
    }
    if args.add_label_ids.is_empty() && args.remove_label_ids.is_empty() {
        return Ok(CallToolResult::error("No label changes requested"));
    }

    let changes = ModifyLabelsRequest {
        add_label_ids: args.add_label_ids,
        remove_label_ids: args.remove_label_ids,
    };
    client.modify_message(&args.message_id, &changes).await?;
    Ok(CallToolResult::text(format!(
        "Email {} labels updated successfully",
        args.message_id
    )))
}

async fn delete_email(client: Arc<GmailClient>, args: Value) -> Result<CallToolResult> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Args {
        message_id: String,
    }

    let args: Args = match parse_args(args) {
        Ok(a) => a,
        Err(result) => return Ok(result),
    };

    client.trash_message(&args.message_id).await?;
    Ok(CallToolResult::text(format!(
        "Email {} moved to trash",
        args.message_id
    )))
}

async fn create_label(client: Arc<GmailClient>, args: Value) -> Result<CallToolResult> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Args {
        name: String,
        message_list_visibility: Option<String>,
        label_list_visibility: Option<String>,
    }

    let args: Args = match parse_args(args) {
        Ok(a) => a,
        Err(result) => return Ok(result),
    };
    if args.name.trim().is_empty() {
        return Ok(CallToolResult::error("Label name must not be empty"));
    }

    let request = CreateLabelRequest {
        name: args.name,
        message_list_visibility: args.message_list_visibility,
        label_list_visibility: args.label_list_visibility,
    };
    let label = client.create_label(&request).await?;
    Ok(CallToolResult::text(format!(
        "Label created successfully:\nID: {}\nName: {}\nType: {}",
        label.id,
        label.name,
        label.label_type.unwrap_or_default()
    )))
}

async fn delete_label(client: Arc<GmailClient>, args: Value) -> Result<CallToolResult> {
    #[derive(Deserialize)]
    struct Args {
        #[serde(alias = "labelId")]
        id: String,
    }

    let args: Args = match parse_args(args) {
        Ok(a) => a,
        Err(result) => return Ok(result),
    };

    client.delete_label(&args.id).await?;
    Ok(CallToolResult::text(format!(
        "Label {} deleted successfully",
        args.id
    )))
}

async fn archive_thread(client: Arc<GmailClient>, args: Value) -> Result<CallToolResult> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Args {
        thread_id: String,
    }

    let args: Args = match parse_args(args) {
        Ok(a) => a,
        Err(result) => return Ok(result),
    };

    let thread = client.archive_thread(&args.thread_id).await?;
    Ok(CallToolResult::text(format!(
        "Thread {} archived ({} messages)",
        thread.id,
        thread.messages.len()
    )))
}

// ==================== Schemas ====================

/// Add the optional `account` property to an object schema
fn with_account(mut schema: Value) -> Value {
    if let Some(properties) = schema.get_mut("properties").and_then(Value::as_object_mut) {
        properties.insert(
            ACCOUNT_ARGUMENT.to_string(),
            json!({
                "type": "string",
                "description": "Account to act as; defaults to the authenticated user, then \"default\""
            }),
        );
    }
    schema
}

fn send_email_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "to": {
                "type": "array",
                "items": {"type": "string"},
                "description": "List of recipient email addresses"
            },
            "subject": {
                "type": "string",
                "description": "Email subject"
            },
            "body": {
                "type": "string",
                "description": "Plain text body"
            },
            "htmlBody": {
                "type": "string",
                "description": "HTML version of the body; sent as multipart/alternative"
            },
            "cc": {
                "type": "array",
                "items": {"type": "string"},
                "description": "List of CC recipients"
            },
            "bcc": {
                "type": "array",
                "items": {"type": "string"},
                "description": "List of BCC recipients"
            },
            "threadId": {
                "type": "string",
                "description": "Thread ID to reply to"
            },
            "inReplyTo": {
                "type": "string",
                "description": "Message ID being replied to"
            }
        },
        "required": ["to", "subject", "body"]
    })
}

fn message_id_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "messageId": {
                "type": "string",
                "description": description
            }
        },
        "required": ["messageId"]
    })
}

fn search_emails_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Gmail search query"
            },
            "maxResults": {
                "type": "number",
                "description": "Maximum number of results (default 10, at most 500)"
            }
        },
        "required": ["query"]
    })
}

fn modify_email_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "messageId": {
                "type": "string",
                "description": "ID of the email message to modify"
            },
            "addLabelIds": {
                "type": "array",
                "items": {"type": "string"},
                "description": "List of label IDs to add"
            },
            "removeLabelIds": {
                "type": "array",
                "items": {"type": "string"},
                "description": "List of label IDs to remove"
            },
            "markRead": {
                "type": "boolean",
                "description": "Mark the email read (true) or unread (false)"
            }
        },
        "required": ["messageId"]
    })
}

fn create_label_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {
                "type": "string",
                "description": "Name for the new label"
            },
            "messageListVisibility": {
                "type": "string",
                "enum": ["show", "hide"],
                "description": "Message list visibility"
            },
            "labelListVisibility": {
                "type": "string",
                "enum": ["labelShow", "labelShowIfUnread", "labelHide"],
                "description": "Label list visibility"
            }
        },
        "required": ["name"]
    })
}

fn delete_label_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": {
                "type": "string",
                "description": "ID of the label to delete"
            }
        },
        "required": ["id"]
    })
}

fn archive_thread_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "threadId": {
                "type": "string",
                "description": "ID of the thread to archive"
            }
        },
        "required": ["threadId"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::GmailMcpError;
    use crate::telemetry::NoopMetrics;
    use std::path::PathBuf;

    fn echo() -> ToolFn {
        tool_fn(|_cx, args: Value| async move { Ok(CallToolResult::text(args.to_string())) })
    }

    fn registry(read_only: bool) -> ToolRegistry {
        let mut registry = ToolRegistry::new(Telemetry::disabled(), read_only);
        registry
            .register("look", "reads", json!({}), Access::Read, None, echo())
            .register("touch", "writes", json!({}), Access::Write, None, echo());
        registry
    }

    fn gmail_registry(read_only: bool) -> ToolRegistry {
        let dir = std::env::temp_dir().join("gmail-mcp-tools-test-missing");
        let config = Config::from_lookup(PathBuf::from(dir), |_| None);
        let accounts = Arc::new(GmailAccounts::new(config, Arc::new(NoopMetrics)));
        let mut registry = ToolRegistry::new(Telemetry::disabled(), read_only);
        register_gmail_tools(&mut registry, accounts);
        registry
    }

    #[test]
    fn test_list_tools_hides_write_tools_when_read_only() {
        let names = |r: &ToolRegistry| r.list_tools().into_iter().map(|t| t.name).collect::<Vec<_>>();
        assert_eq!(names(&registry(false)), vec!["look", "touch"]);
        assert_eq!(names(&registry(true)), vec!["look"]);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = registry(false);
        registry.register("look", "reads again", json!({}), Access::Read, None, echo());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("look").unwrap().description, "reads again");
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let result = registry(false).call_tool(Context::new(), "nope", json!({})).await;
        assert!(result.is_error);
        assert_eq!(result.first_text(), Some("Error: Unknown tool: nope"));
    }

    #[tokio::test]
    async fn test_write_tool_refused_when_read_only() {
        let registry = registry(true);
        let result = registry.call_tool(Context::new(), "touch", json!({})).await;
        assert!(result.is_error);
        assert_eq!(
            result.first_text(),
            Some("Error: touch is disabled in read-only mode")
        );

        let result = registry.call_tool(Context::new(), "look", json!({"a": 1})).await;
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_result() {
        let mut registry = ToolRegistry::new(Telemetry::disabled(), false);
        registry.register(
            "broken",
            "fails",
            json!({}),
            Access::Read,
            None,
            tool_fn(|_cx, _args| async {
                Err(GmailMcpError::Mcp(McpError::InvalidArguments {
                    message: "bad".to_string(),
                }))
            }),
        );

        let result = registry.call_tool(Context::new(), "broken", json!({})).await;
        assert!(result.is_error);
        assert_eq!(result.first_text(), Some("Error: Invalid tool arguments: bad"));
    }

    #[test]
    fn test_gmail_tools_accept_account() {
        let registry = gmail_registry(false);
        assert_eq!(registry.len(), 10);
        for tool in registry.list_tools() {
            assert!(
                tool.input_schema["properties"].get(ACCOUNT_ARGUMENT).is_some(),
                "{} has no account property",
                tool.name
            );
        }
    }

    #[test]
    fn test_gmail_read_only_tool_set() {
        let mut names: Vec<_> = gmail_registry(true)
            .list_tools()
            .into_iter()
            .map(|t| t.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["list_email_labels", "read_email", "search_emails"]);
    }

    #[tokio::test]
    async fn test_gmail_tool_without_credentials_reports_error() {
        let result = gmail_registry(false)
            .call_tool(Context::new(), "read_email", json!({"messageId": "1"}))
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_read_only_refusal_skips_account_lookup() {
        let result = gmail_registry(true)
            .call_tool(Context::new(), "send_email", json!({"account": "../bad"}))
            .await;
        assert_eq!(
            result.first_text(),
            Some("Error: send_email is disabled in read-only mode")
        );
    }

    #[test]
    fn test_parse_args_reports_invalid_arguments() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Args {
            id: String,
        }

        let result = parse_args::<Args>(json!({"account": "work"})).unwrap_err();
        assert!(result.is_error);
        assert!(result.first_text().unwrap().contains("Invalid tool arguments"));
    }

    #[test]
    fn test_definition_carries_schema() {
        let registry = registry(false);
        let tool = registry.get("touch").unwrap().definition();
        assert_eq!(tool.description.as_deref(), Some("writes"));
        assert_eq!(tool.input_schema, json!({}));
    }
}
