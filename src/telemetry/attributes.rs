//! Attribute vocabulary shared by spans, metrics and logs.

use std::fmt;

use opentelemetry::KeyValue;

/// Span attribute keys. The set is closed: spans never carry other keys.
pub mod attr {
    pub const TOOL: &str = "mcp.tool";
    pub const SERVICE: &str = "api.service";
    pub const OPERATION: &str = "api.operation";
    pub const ACCOUNT: &str = "account";
    pub const RESOURCE_TYPE: &str = "resource.type";
    pub const RESOURCE_ID: &str = "resource.id";
    pub const READ_ONLY: &str = "read_only";
    pub const STATUS: &str = "status";
}

/// Outcome labels used on spans and metrics.
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
}

/// External service a tool talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Gmail,
    Docs,
    Drive,
    Calendar,
    Meet,
    Tasks,
    Github,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Gmail => "gmail",
            Service::Docs => "docs",
            Service::Drive => "drive",
            Service::Calendar => "calendar",
            Service::Meet => "meet",
            Service::Tasks => "tasks",
            Service::Github => "github",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of operation performed against a [`Service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    Delete,
    Send,
    Search,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::Get => "get",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Send => "send",
            Operation::Search => "search",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service/operation pair a tool is declared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApiTarget {
    pub service: Service,
    pub operation: Operation,
}

impl ApiTarget {
    pub fn new(service: Service, operation: Operation) -> Self {
        Self { service, operation }
    }
}

/// Ordered span attribute set.
///
/// Empty string values are dropped instead of being written as `""`.
#[derive(Debug, Clone, Default)]
pub struct SpanAttributes {
    values: Vec<KeyValue>,
}

impl SpanAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tool(self, name: &str) -> Self {
        self.push_str(attr::TOOL, name)
    }

    pub fn service(self, service: Service) -> Self {
        self.push_str(attr::SERVICE, service.as_str())
    }

    pub fn operation(self, operation: Operation) -> Self {
        self.push_str(attr::OPERATION, operation.as_str())
    }

    pub fn target(self, target: ApiTarget) -> Self {
        self.service(target.service).operation(target.operation)
    }

    pub fn account(self, account: &str) -> Self {
        self.push_str(attr::ACCOUNT, account)
    }

    pub fn resource(self, resource_type: &str, resource_id: &str) -> Self {
        self.push_str(attr::RESOURCE_TYPE, resource_type)
            .push_str(attr::RESOURCE_ID, resource_id)
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.values.push(KeyValue::new(attr::READ_ONLY, read_only));
        self
    }

    pub fn status(self, status: &str) -> Self {
        self.push_str(attr::STATUS, status)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn build(self) -> Vec<KeyValue> {
        self.values
    }

    fn push_str(mut self, key: &'static str, value: &str) -> Self {
        if !value.is_empty() {
            self.values.push(KeyValue::new(key, value.to_string()));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(values: &[KeyValue]) -> Vec<&str> {
        values.iter().map(|kv| kv.key.as_str()).collect()
    }

    #[test]
    fn test_builder_preserves_order() {
        let attrs = SpanAttributes::new()
            .tool("send_email")
            .target(ApiTarget::new(Service::Gmail, Operation::Send))
            .account("work")
            .read_only(false)
            .build();

        assert_eq!(
            keys(&attrs),
            vec![attr::TOOL, attr::SERVICE, attr::OPERATION, attr::ACCOUNT, attr::READ_ONLY]
        );
    }

    #[test]
    fn test_builder_omits_empty_values() {
        let attrs = SpanAttributes::new()
            .tool("read_email")
            .account("")
            .resource("message", "")
            .build();

        assert_eq!(keys(&attrs), vec![attr::TOOL, attr::RESOURCE_TYPE]);
    }

    #[test]
    fn test_service_and_operation_names() {
        assert_eq!(Service::Calendar.to_string(), "calendar");
        assert_eq!(Operation::Search.as_str(), "search");
    }
}
