//! Audit logging for tool invocations.
//!
//! Two streams share one logger. [`AuditLogger::log_invocation`] is the
//! operational stream and uses the low-cardinality view unless PII is
//! explicitly allowed. [`AuditLogger::log_audit`] is the compliance stream
//! and always carries full identity.

use opentelemetry::{KeyValue, Value};
use tracing::Level;

use super::invocation::{key, InvocationRecord};

/// `tracing` target of every audit line.
pub const AUDIT_TARGET: &str = "gmail_mcp::audit";

pub const EVENT_TOOL_EXECUTED: &str = "tool_executed";
pub const EVENT_TOOL_FAILED: &str = "tool_failed";
pub const EVENT_TOOL_AUDIT: &str = "tool_audit";

/// Audit settings, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditConfig {
    pub enabled: bool,
    pub include_pii: bool,
    /// Lines less severe than this are dropped.
    pub min_level: Level,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_pii: false,
            min_level: Level::INFO,
        }
    }
}

/// A line the logger would emit.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub event: &'static str,
    pub level: Level,
    pub attributes: Vec<KeyValue>,
}

/// The fixed field set of an audit line. Absent values are not emitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFields {
    pub tool: Option<String>,
    pub user: Option<String>,
    pub user_domain: Option<String>,
    pub account: Option<String>,
    pub service: Option<String>,
    pub operation: Option<String>,
    pub duration_ms: Option<f64>,
    pub success: Option<bool>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub error: Option<String>,
}

impl AuditFields {
    /// Pick the known keys out of `attributes`; anything else is ignored.
    pub fn from_attributes(attributes: &[KeyValue]) -> Self {
        let mut fields = Self::default();
        for kv in attributes {
            let slot = match kv.key.as_str() {
                key::TOOL => &mut fields.tool,
                key::USER => &mut fields.user,
                key::USER_DOMAIN => &mut fields.user_domain,
                key::ACCOUNT => &mut fields.account,
                key::SERVICE => &mut fields.service,
                key::OPERATION => &mut fields.operation,
                key::TRACE_ID => &mut fields.trace_id,
                key::SPAN_ID => &mut fields.span_id,
                key::ERROR => &mut fields.error,
                key::DURATION_MS => {
                    if let Value::F64(ms) = &kv.value {
                        fields.duration_ms = Some(*ms);
                    }
                    continue;
                }
                key::SUCCESS => {
                    if let Value::Bool(ok) = &kv.value {
                        fields.success = Some(*ok);
                    }
                    continue;
                }
                _ => continue,
            };
            *slot = Some(kv.value.as_str().into_owned());
        }
        fields
    }
}

// `tracing` needs the level at compile time, so each level gets its own call.
macro_rules! audit_event {
    ($level:ident, $event:expr, $fields:expr) => {
        tracing::$level!(
            target: AUDIT_TARGET,
            event = $event,
            tool = $fields.tool.as_deref(),
            user = $fields.user.as_deref(),
            user_domain = $fields.user_domain.as_deref(),
            account = $fields.account.as_deref(),
            service = $fields.service.as_deref(),
            operation = $fields.operation.as_deref(),
            duration_ms = $fields.duration_ms,
            success = $fields.success,
            trace_id = $fields.trace_id.as_deref(),
            span_id = $fields.span_id.as_deref(),
            error = $fields.error.as_deref()
        )
    };
}

impl AuditEntry {
    pub fn fields(&self) -> AuditFields {
        AuditFields::from_attributes(&self.attributes)
    }

    fn emit(&self) {
        let fields = self.fields();
        match self.level {
            Level::ERROR => audit_event!(error, self.event, fields),
            Level::WARN => audit_event!(warn, self.event, fields),
            Level::INFO => audit_event!(info, self.event, fields),
            Level::DEBUG => audit_event!(debug, self.event, fields),
            _ => audit_event!(trace, self.event, fields),
        }
    }
}

/// Structured audit logger.
#[derive(Debug, Clone, Copy)]
pub struct AuditLogger {
    config: AuditConfig,
}

impl AuditLogger {
    pub fn new(config: AuditConfig) -> Self {
        Self { config }
    }

    /// Logger that never emits.
    pub fn disabled() -> Self {
        Self::new(AuditConfig {
            enabled: false,
            ..AuditConfig::default()
        })
    }

    pub fn config(&self) -> AuditConfig {
        self.config
    }

    /// Entry for the operational stream, or `None` if it would be suppressed.
    pub fn entry_for_invocation(&self, record: &InvocationRecord) -> Option<AuditEntry> {
        let attributes = if self.config.include_pii {
            record.full_audit_attributes()
        } else {
            record.low_cardinality_attributes()
        };
        let (event, level) = if record.success() {
            (EVENT_TOOL_EXECUTED, Level::INFO)
        } else {
            (EVENT_TOOL_FAILED, Level::WARN)
        };
        self.admit(AuditEntry {
            event,
            level,
            attributes,
        })
    }

    /// Entry for the compliance stream, or `None` if it would be suppressed.
    pub fn entry_for_audit(&self, record: &InvocationRecord) -> Option<AuditEntry> {
        self.admit(AuditEntry {
            event: EVENT_TOOL_AUDIT,
            level: Level::INFO,
            attributes: record.full_audit_attributes(),
        })
    }

    pub fn log_invocation(&self, record: &InvocationRecord) {
        if let Some(entry) = self.entry_for_invocation(record) {
            entry.emit();
        }
    }

    pub fn log_audit(&self, record: &InvocationRecord) {
        if let Some(entry) = self.entry_for_audit(record) {
            entry.emit();
        }
    }

    // More verbose levels compare greater in `tracing`.
    fn admit(&self, entry: AuditEntry) -> Option<AuditEntry> {
        (self.config.enabled && entry.level <= self.config.min_level).then_some(entry)
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;
    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::{Layer, Registry};

    use super::*;

    type Line = (Level, Vec<(String, String)>);

    /// Collects audit events with their fields as strings.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<Line>>>);

    impl Captured {
        fn lines(&self) -> Vec<Line> {
            self.0.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct FieldList(Vec<(String, String)>);

    impl Visit for FieldList {
        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.push((field.name().to_string(), value.to_string()));
        }

        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.push((field.name().to_string(), format!("{:?}", value)));
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for Captured {
        fn on_event(&self, event: &tracing::Event<'_>, _: Context<'_, S>) {
            if event.metadata().target() != AUDIT_TARGET {
                return;
            }
            let mut fields = FieldList::default();
            event.record(&mut fields);
            self.0
                .lock()
                .unwrap()
                .push((*event.metadata().level(), fields.0));
        }
    }

    fn capture(f: impl FnOnce()) -> Vec<Line> {
        let captured = Captured::default();
        let subscriber = Registry::default().with(captured.clone());
        tracing::subscriber::with_default(subscriber, f);
        captured.lines()
    }

    fn values<'a>(line: &'a Line, name: &str) -> Vec<&'a str> {
        line.1
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    fn failed_record(message: &str) -> InvocationRecord {
        let mut record = InvocationRecord::new("send_email");
        record.with_user("jane@example.com").with_account("work");
        let err = std::io::Error::new(std::io::ErrorKind::Other, message.to_string());
        record.complete_with_error(&err);
        record
    }

    fn record(success: bool) -> InvocationRecord {
        if success {
            let mut record = InvocationRecord::new("send_email");
            record.with_user("jane@example.com").with_account("work");
            record.complete_success();
            record
        } else {
            failed_record("rejected")
        }
    }

    #[test]
    fn test_disabled_logger_emits_nothing() {
        let logger = AuditLogger::disabled();
        assert!(logger.entry_for_invocation(&record(true)).is_none());
        assert!(logger.entry_for_audit(&record(true)).is_none());

        let lines = capture(|| logger.log_invocation(&record(false)));
        assert!(lines.is_empty());
    }

    #[test]
    fn test_invocation_event_and_level_follow_outcome() {
        let logger = AuditLogger::new(AuditConfig::default());

        let ok = logger.entry_for_invocation(&record(true)).unwrap();
        assert_eq!(ok.event, EVENT_TOOL_EXECUTED);
        assert_eq!(ok.level, Level::INFO);
        assert_eq!(ok.fields().success, Some(true));

        let failed = logger.entry_for_invocation(&record(false)).unwrap();
        assert_eq!(failed.event, EVENT_TOOL_FAILED);
        assert_eq!(failed.level, Level::WARN);
        assert_eq!(failed.fields().error.as_deref(), Some("rejected"));
    }

    #[test]
    fn test_invocation_view_depends_on_pii_flag() {
        let anonymous = AuditLogger::new(AuditConfig::default());
        let fields = anonymous.entry_for_invocation(&record(true)).unwrap().fields();
        assert_eq!(fields.user, None);
        assert_eq!(fields.user_domain.as_deref(), Some("example.com"));

        let with_pii = AuditLogger::new(AuditConfig {
            include_pii: true,
            ..AuditConfig::default()
        });
        let fields = with_pii.entry_for_invocation(&record(true)).unwrap().fields();
        assert_eq!(fields.user.as_deref(), Some("jane@example.com"));
    }

    #[test]
    fn test_audit_stream_always_full() {
        let logger = AuditLogger::new(AuditConfig::default());
        let entry = logger.entry_for_audit(&record(false)).unwrap();

        assert_eq!(entry.event, EVENT_TOOL_AUDIT);
        assert_eq!(entry.level, Level::INFO);
        let fields = entry.fields();
        assert_eq!(fields.user.as_deref(), Some("jane@example.com"));
        assert_eq!(fields.account.as_deref(), Some("work"));
    }

    #[test]
    fn test_min_level_suppresses_less_severe_lines() {
        let logger = AuditLogger::new(AuditConfig {
            min_level: Level::WARN,
            ..AuditConfig::default()
        });

        assert!(logger.entry_for_invocation(&record(true)).is_none());
        assert!(logger.entry_for_invocation(&record(false)).is_some());
        assert!(logger.entry_for_audit(&record(true)).is_none());
    }

    #[test]
    fn test_fields_ignore_unknown_keys() {
        let entry = AuditEntry {
            event: EVENT_TOOL_AUDIT,
            level: Level::INFO,
            attributes: vec![
                KeyValue::new("tool", "ping"),
                KeyValue::new("success", true),
                KeyValue::new("query", "from:boss"),
            ],
        };
        assert_eq!(
            entry.fields(),
            AuditFields {
                tool: Some("ping".to_string()),
                success: Some(true),
                ..AuditFields::default()
            }
        );
    }

    #[test]
    fn test_emitted_line_carries_structured_fields() {
        let logger = AuditLogger::new(AuditConfig::default());
        let lines = capture(|| logger.log_invocation(&record(true)));

        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line.0, Level::INFO);
        assert_eq!(values(line, "event"), vec![EVENT_TOOL_EXECUTED]);
        assert_eq!(values(line, "tool"), vec!["send_email"]);
        assert_eq!(values(line, "user_domain"), vec!["example.com"]);
        assert_eq!(values(line, "success"), vec!["true"]);
        assert!(values(line, "user").is_empty());
        assert!(values(line, "error").is_empty());
    }

    #[test]
    fn test_error_text_cannot_forge_fields() {
        let message = "bad success=true user=evil@x.com";
        let logger = AuditLogger::new(AuditConfig::default());
        let lines = capture(|| logger.log_invocation(&failed_record(message)));

        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line.0, Level::WARN);
        assert_eq!(values(line, "event"), vec![EVENT_TOOL_FAILED]);
        assert_eq!(values(line, "error"), vec![message]);
        assert_eq!(values(line, "success"), vec!["false"]);
        assert!(values(line, "user").is_empty());
    }
}
