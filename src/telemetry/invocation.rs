//! Per-call invocation record.
//!
//! One [`InvocationRecord`] is created for every tool call, filled in while
//! the call runs and consumed once by metrics and audit emission. It is owned
//! by the invocation that created it and never shared.

use std::error::Error;
use std::time::{Duration, Instant};

use opentelemetry::{Context, KeyValue};

use super::account::DEFAULT_ACCOUNT;
use super::attributes::{Operation, Service};
use super::cardinality::domain_of;
use super::spans;

pub(super) mod key {
    pub const TOOL: &str = "tool";
    pub const USER: &str = "user";
    pub const USER_DOMAIN: &str = "user_domain";
    pub const ACCOUNT: &str = "account";
    pub const SERVICE: &str = "service";
    pub const OPERATION: &str = "operation";
    pub const DURATION_MS: &str = "duration_ms";
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
    pub const TRACE_ID: &str = "trace_id";
    pub const SPAN_ID: &str = "span_id";
}

/// Identity, timing and outcome of a single tool call.
#[derive(Debug, Clone)]
pub struct InvocationRecord {
    tool: String,
    account: String,
    user: String,
    service: Option<Service>,
    operation: Option<Operation>,
    started: Instant,
    duration: Duration,
    success: bool,
    error: String,
    trace_id: String,
    span_id: String,
}

impl InvocationRecord {
    /// Start a record for `tool`, timed from now.
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            account: String::new(),
            user: String::new(),
            service: None,
            operation: None,
            started: Instant::now(),
            duration: Duration::ZERO,
            success: false,
            error: String::new(),
            trace_id: String::new(),
            span_id: String::new(),
        }
    }

    pub fn with_user(&mut self, email: impl Into<String>) -> &mut Self {
        self.user = email.into();
        self
    }

    pub fn with_account(&mut self, account: impl Into<String>) -> &mut Self {
        self.account = account.into();
        self
    }

    pub fn with_service_operation(&mut self, service: Service, operation: Operation) -> &mut Self {
        self.service = Some(service);
        self.operation = Some(operation);
        self
    }

    /// Copy trace and span ids from the active span in `cx`, if it is valid.
    pub fn attach_trace_context(&mut self, cx: &Context) -> &mut Self {
        let trace_id = spans::trace_id(cx);
        if !trace_id.is_empty() {
            self.trace_id = trace_id;
            self.span_id = spans::span_id(cx);
        }
        self
    }

    /// Stop the clock and store the outcome.
    ///
    /// `success` and `err` are stored independently; a caller may report a
    /// success that still carries an error message.
    pub fn complete(&mut self, success: bool, err: Option<&dyn Error>) {
        self.duration = self.started.elapsed();
        self.success = success;
        if let Some(err) = err {
            self.error = err.to_string();
        }
    }

    pub fn complete_success(&mut self) {
        self.complete(true, None);
    }

    pub fn complete_with_error(&mut self, err: &dyn Error) {
        self.complete(false, Some(err));
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn service(&self) -> Option<Service> {
        self.service
    }

    pub fn operation(&self) -> Option<Operation> {
        self.operation
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Time since the record was created, whether or not it is complete.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    /// Attributes safe for operational logs and metrics.
    ///
    /// The user is reduced to a domain; the account is only included when it
    /// is not the default one.
    pub fn low_cardinality_attributes(&self) -> Vec<KeyValue> {
        let mut attrs = vec![
            KeyValue::new(key::TOOL, self.tool.clone()),
            KeyValue::new(key::USER_DOMAIN, domain_of(&self.user).to_string()),
            KeyValue::new(key::DURATION_MS, self.duration_ms()),
            KeyValue::new(key::SUCCESS, self.success),
        ];

        if !self.account.is_empty() && self.account != DEFAULT_ACCOUNT {
            attrs.push(KeyValue::new(key::ACCOUNT, self.account.clone()));
        }
        self.push_target(&mut attrs);
        push_non_empty(&mut attrs, key::TRACE_ID, &self.trace_id);
        push_non_empty(&mut attrs, key::ERROR, &self.error);
        attrs
    }

    /// Full-fidelity attributes for compliance logs, raw identity included.
    ///
    /// This is the only view carrying PII; route it to restricted storage.
    pub fn full_audit_attributes(&self) -> Vec<KeyValue> {
        let mut attrs = vec![
            KeyValue::new(key::TOOL, self.tool.clone()),
            KeyValue::new(key::USER, self.user.clone()),
            KeyValue::new(key::DURATION_MS, self.duration_ms()),
            KeyValue::new(key::SUCCESS, self.success),
        ];

        push_non_empty(&mut attrs, key::ACCOUNT, &self.account);
        self.push_target(&mut attrs);
        push_non_empty(&mut attrs, key::TRACE_ID, &self.trace_id);
        push_non_empty(&mut attrs, key::SPAN_ID, &self.span_id);
        push_non_empty(&mut attrs, key::ERROR, &self.error);
        attrs
    }

    fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }

    fn push_target(&self, attrs: &mut Vec<KeyValue>) {
        if let Some(service) = self.service {
            attrs.push(KeyValue::new(key::SERVICE, service.as_str()));
        }
        if let Some(operation) = self.operation {
            attrs.push(KeyValue::new(key::OPERATION, operation.as_str()));
        }
    }
}

fn push_non_empty(attrs: &mut Vec<KeyValue>, key: &'static str, value: &str) {
    if !value.is_empty() {
        attrs.push(KeyValue::new(key, value.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_of<'a>(attrs: &'a [KeyValue], name: &str) -> Option<&'a opentelemetry::Value> {
        attrs.iter().find(|kv| kv.key.as_str() == name).map(|kv| &kv.value)
    }

    fn contains_value(attrs: &[KeyValue], needle: &str) -> bool {
        attrs.iter().any(|kv| kv.value.as_str() == needle)
    }

    #[test]
    fn test_new_record_is_empty() {
        let record = InvocationRecord::new("search_emails");
        assert_eq!(record.tool(), "search_emails");
        assert_eq!(record.account(), "");
        assert_eq!(record.user(), "");
        assert!(record.service().is_none());
        assert!(!record.success());
        assert_eq!(record.error(), "");
        assert_eq!(record.trace_id(), "");
    }

    #[test]
    fn test_duration_tracks_elapsed_time() {
        let mut record = InvocationRecord::new("read_email");
        std::thread::sleep(Duration::from_millis(20));
        record.complete_success();

        assert!(record.duration() >= Duration::from_millis(20));
        assert!(record.duration() < Duration::from_secs(5));
        assert!(record.success());
    }

    #[test]
    fn test_complete_keeps_success_and_error_independent() {
        let warning = std::io::Error::new(std::io::ErrorKind::Other, "partial batch");
        let mut record = InvocationRecord::new("modify_email");
        record.complete(true, Some(&warning));

        assert!(record.success());
        assert_eq!(record.error(), "partial batch");
    }

    #[test]
    fn test_complete_with_error_sets_both() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "quota exceeded");
        let mut record = InvocationRecord::new("send_email");
        record.complete_with_error(&err);

        assert!(!record.success());
        assert_eq!(record.error(), "quota exceeded");
    }

    #[test]
    fn test_setters_chain() {
        let mut record = InvocationRecord::new("send_email");
        record
            .with_user("jane@example.com")
            .with_account("work")
            .with_service_operation(Service::Gmail, Operation::Send);

        assert_eq!(record.user(), "jane@example.com");
        assert_eq!(record.account(), "work");
        assert_eq!(record.operation(), Some(Operation::Send));
    }

    #[test]
    fn test_low_cardinality_view_never_carries_user_email() {
        let mut record = InvocationRecord::new("read_email");
        record.with_user("jane@example.com").with_account("work");
        record.complete_success();

        let low = record.low_cardinality_attributes();
        assert!(!contains_value(&low, "jane@example.com"));
        assert!(value_of(&low, "user").is_none());
        assert!(contains_value(&low, "example.com"));
        assert!(contains_value(&record.full_audit_attributes(), "jane@example.com"));
    }

    #[test]
    fn test_low_cardinality_view_omits_default_account() {
        let mut record = InvocationRecord::new("list_email_labels");
        record.with_account("default");
        record.complete_success();
        assert!(value_of(&record.low_cardinality_attributes(), "account").is_none());

        record.with_account("work");
        assert!(value_of(&record.low_cardinality_attributes(), "account").is_some());
    }

    #[test]
    fn test_optional_fields_only_when_set() {
        let mut record = InvocationRecord::new("ping");
        record.complete_success();

        let low: Vec<_> = record.low_cardinality_attributes().into_iter().map(|kv| kv.key).collect();
        let full: Vec<_> = record.full_audit_attributes().into_iter().map(|kv| kv.key).collect();

        for key in ["service", "operation", "trace_id", "error", "account"] {
            assert!(!low.iter().any(|k| k.as_str() == key), "low view has {}", key);
        }
        for key in ["service", "operation", "trace_id", "span_id", "error", "account"] {
            assert!(!full.iter().any(|k| k.as_str() == key), "full view has {}", key);
        }
    }

    #[test]
    fn test_full_view_includes_everything_set() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "not found");
        let mut record = InvocationRecord::new("delete_label");
        record
            .with_user("ops@corp.example")
            .with_account("default")
            .with_service_operation(Service::Gmail, Operation::Delete);
        record.complete_with_error(&err);

        let attrs = record.full_audit_attributes();
        assert!(value_of(&attrs, "account").is_some());
        assert!(value_of(&attrs, "service").is_some());
        assert!(value_of(&attrs, "operation").is_some());
        assert_eq!(value_of(&attrs, "success"), Some(&opentelemetry::Value::Bool(false)));
        assert!(contains_value(&attrs, "not found"));
    }

    #[test]
    fn test_attach_trace_context_without_span_is_noop() {
        let mut record = InvocationRecord::new("read_email");
        record.attach_trace_context(&Context::new());
        assert_eq!(record.trace_id(), "");
        assert_eq!(record.span_id(), "");
    }

    #[test]
    fn test_attach_trace_context_copies_ids_into_audit_view() {
        use opentelemetry::trace::{
            SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
        };

        let span_context = SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        let cx = Context::new().with_remote_span_context(span_context);

        let mut record = InvocationRecord::new("read_email");
        record.attach_trace_context(&cx).complete_success();
        assert_eq!(record.trace_id(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(record.span_id(), "00f067aa0ba902b7");

        let full = record.full_audit_attributes();
        assert!(contains_value(&full, "4bf92f3577b34da6a3ce929d0e0e4736"));
        assert!(contains_value(&full, "00f067aa0ba902b7"));
        let low = record.low_cardinality_attributes();
        assert!(value_of(&low, "trace_id").is_some());
    }
}
