//! Metric recording for HTTP, external API, OAuth and tool activity.
//!
//! Everything goes through the [`MetricsSink`] trait. [`OtelMetrics`] writes
//! to OpenTelemetry instruments built from an injected [`Meter`];
//! [`NoopMetrics`] drops every event and is used when instrumentation is off.

use std::time::Duration;

use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
use opentelemetry::KeyValue;

use super::attributes::{status, Operation, Service};

/// Process-wide metrics settings, fixed at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Attach raw account identifiers as labels.
    pub detailed_labels: bool,
}

/// Destination for metric events.
///
/// Implementations are shared across concurrent invocations and must not
/// fail; a recording call has no observable effect on the caller.
pub trait MetricsSink: Send + Sync {
    fn record_http_request(&self, method: &str, route: &str, status_code: u16, duration: Duration);

    fn record_api_call(
        &self,
        service: Service,
        operation: Operation,
        status: &str,
        duration: Duration,
    );

    fn record_oauth_auth(&self, account: &str, success: bool);

    fn record_oauth_refresh(&self, success: bool);

    fn record_tool_invocation(&self, tool: &str, status: &str, duration: Duration);

    /// Like [`MetricsSink::record_tool_invocation`]; `account` is only used
    /// as a label when detailed labels are enabled.
    fn record_tool_invocation_for_account(
        &self,
        tool: &str,
        account: &str,
        status: &str,
        duration: Duration,
    );

    fn session_started(&self);

    fn session_ended(&self);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_http_request(&self, _: &str, _: &str, _: u16, _: Duration) {}

    fn record_api_call(&self, _: Service, _: Operation, _: &str, _: Duration) {}

    fn record_oauth_auth(&self, _: &str, _: bool) {}

    fn record_oauth_refresh(&self, _: bool) {}

    fn record_tool_invocation(&self, _: &str, _: &str, _: Duration) {}

    fn record_tool_invocation_for_account(&self, _: &str, _: &str, _: &str, _: Duration) {}

    fn session_started(&self) {}

    fn session_ended(&self) {}
}

/// OpenTelemetry-backed sink.
#[derive(Clone)]
pub struct OtelMetrics {
    config: MetricsConfig,
    http_requests: Counter<u64>,
    http_duration: Histogram<f64>,
    api_calls: Counter<u64>,
    api_duration: Histogram<f64>,
    oauth_auth: Counter<u64>,
    oauth_refresh: Counter<u64>,
    tool_invocations: Counter<u64>,
    tool_duration: Histogram<f64>,
    active_sessions: UpDownCounter<i64>,
}

impl OtelMetrics {
    pub fn new(meter: &Meter, config: MetricsConfig) -> Self {
        Self {
            config,
            http_requests: meter
                .u64_counter("gmail_mcp.http.requests")
                .with_description("Outbound HTTP requests by method, route and status")
                .build(),
            http_duration: meter
                .f64_histogram("gmail_mcp.http.duration")
                .with_description("Outbound HTTP request duration")
                .with_unit("s")
                .build(),
            api_calls: meter
                .u64_counter("gmail_mcp.api.calls")
                .with_description("External API operations by service, operation and status")
                .build(),
            api_duration: meter
                .f64_histogram("gmail_mcp.api.duration")
                .with_description("External API operation duration")
                .with_unit("s")
                .build(),
            oauth_auth: meter
                .u64_counter("gmail_mcp.oauth.auth")
                .with_description("Interactive OAuth authentication attempts")
                .build(),
            oauth_refresh: meter
                .u64_counter("gmail_mcp.oauth.refresh")
                .with_description("OAuth token refresh attempts")
                .build(),
            tool_invocations: meter
                .u64_counter("gmail_mcp.tool.invocations")
                .with_description("MCP tool invocations by tool and status")
                .build(),
            tool_duration: meter
                .f64_histogram("gmail_mcp.tool.duration")
                .with_description("MCP tool invocation duration")
                .with_unit("s")
                .build(),
            active_sessions: meter
                .i64_up_down_counter("gmail_mcp.sessions.active")
                .with_description("Currently connected MCP sessions")
                .build(),
        }
    }

    pub fn config(&self) -> MetricsConfig {
        self.config
    }
}

impl MetricsSink for OtelMetrics {
    fn record_http_request(&self, method: &str, route: &str, status_code: u16, duration: Duration) {
        let labels = [
            KeyValue::new("method", method.to_string()),
            KeyValue::new("route", route.to_string()),
            KeyValue::new("status_code", i64::from(status_code)),
        ];
        self.http_requests.add(1, &labels);
        self.http_duration.record(duration.as_secs_f64(), &labels);
    }

    fn record_api_call(
        &self,
        service: Service,
        operation: Operation,
        status: &str,
        duration: Duration,
    ) {
        let labels = [
            KeyValue::new("service", service.as_str()),
            KeyValue::new("operation", operation.as_str()),
            KeyValue::new("status", status.to_string()),
        ];
        self.api_calls.add(1, &labels);
        self.api_duration.record(duration.as_secs_f64(), &labels);
    }

    fn record_oauth_auth(&self, account: &str, success: bool) {
        let mut labels = vec![KeyValue::new("status", outcome(success))];
        labels.extend(account_label(self.config, account));
        self.oauth_auth.add(1, &labels);
    }

    fn record_oauth_refresh(&self, success: bool) {
        self.oauth_refresh
            .add(1, &[KeyValue::new("status", outcome(success))]);
    }

    fn record_tool_invocation(&self, tool: &str, status: &str, duration: Duration) {
        let labels = tool_labels(tool, status, None);
        self.tool_invocations.add(1, &labels);
        self.tool_duration.record(duration.as_secs_f64(), &labels);
    }

    fn record_tool_invocation_for_account(
        &self,
        tool: &str,
        account: &str,
        status: &str,
        duration: Duration,
    ) {
        let labels = tool_labels(tool, status, account_label(self.config, account));
        self.tool_invocations.add(1, &labels);
        self.tool_duration.record(duration.as_secs_f64(), &labels);
    }

    fn session_started(&self) {
        self.active_sessions.add(1, &[]);
    }

    fn session_ended(&self) {
        self.active_sessions.add(-1, &[]);
    }
}

/// Account label, or `None` when detailed labels are off or the account is empty.
pub fn account_label(config: MetricsConfig, account: &str) -> Option<KeyValue> {
    if config.detailed_labels && !account.is_empty() {
        Some(KeyValue::new("account", account.to_string()))
    } else {
        None
    }
}

fn tool_labels(tool: &str, status: &str, account: Option<KeyValue>) -> Vec<KeyValue> {
    let mut labels = vec![
        KeyValue::new("tool", tool.to_string()),
        KeyValue::new("status", status.to_string()),
    ];
    labels.extend(account);
    labels
}

fn outcome(success: bool) -> &'static str {
    if success {
        status::SUCCESS
    } else {
        status::ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::global;

    #[test]
    fn test_account_label_requires_detailed_flag() {
        let off = MetricsConfig::default();
        let on = MetricsConfig {
            detailed_labels: true,
        };

        assert!(account_label(off, "work").is_none());
        assert!(account_label(on, "").is_none());

        let label = account_label(on, "work").unwrap();
        assert_eq!(label.key.as_str(), "account");
        assert_eq!(label.value.as_str(), "work");
    }

    #[test]
    fn test_tool_labels_only_carry_account_when_given() {
        let plain = tool_labels("read_email", "success", None);
        assert_eq!(plain.len(), 2);

        let detailed = tool_labels(
            "read_email",
            "error",
            account_label(MetricsConfig { detailed_labels: true }, "work"),
        );
        assert_eq!(detailed.len(), 3);
        assert!(detailed.iter().any(|kv| kv.key.as_str() == "account"));
    }

    #[test]
    fn test_otel_metrics_against_noop_meter() {
        let meter = global::meter("test");
        let metrics = OtelMetrics::new(&meter, MetricsConfig::default());

        metrics.record_http_request("GET", "/gmail/v1/users/me/messages/{id}", 200, Duration::from_millis(12));
        metrics.record_api_call(Service::Gmail, Operation::Get, "success", Duration::from_millis(15));
        metrics.record_oauth_auth("work", true);
        metrics.record_oauth_refresh(false);
        metrics.record_tool_invocation("read_email", "success", Duration::from_millis(20));
        metrics.record_tool_invocation_for_account("read_email", "work", "error", Duration::ZERO);
        metrics.session_started();
        metrics.session_ended();

        assert!(!metrics.config().detailed_labels);
    }

    #[test]
    fn test_noop_metrics_accepts_everything() {
        let sink: &dyn MetricsSink = &NoopMetrics;
        sink.record_tool_invocation("send_email", "error", Duration::from_secs(1));
        sink.session_started();
        sink.session_ended();
    }
}
