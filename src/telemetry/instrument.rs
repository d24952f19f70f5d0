//! Instrumented tool handlers.
//!
//! [`Telemetry::instrument`] wraps a [`ToolFn`] in a handler with the same
//! signature. The wrapper opens a span, resolves the acting account, times
//! the call, classifies the outcome and reports it to metrics and the audit
//! log. Whatever the inner handler returns is handed back untouched.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use opentelemetry::global;
use opentelemetry::{Context, KeyValue};
use serde_json::Value;
use tracing::debug;

use super::account::{authenticated_user, resolve_account};
use super::attributes::{attr, status, ApiTarget, SpanAttributes};
use super::audit::{AuditConfig, AuditLogger};
use super::invocation::InvocationRecord;
use super::metrics::{MetricsConfig, MetricsSink, NoopMetrics, OtelMetrics};
use super::spans::{Tracing, TRACER_NAME};
use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::mcp::types::CallToolResult;

/// Span status description for handlers that report a logical failure.
pub const TOOL_ERROR_RESULT: &str = "tool returned error result";

/// Future returned by a tool handler.
pub type ToolFuture = BoxFuture<'static, Result<CallToolResult>>;

/// Tool handler: request context and arguments in, tool result out.
pub type ToolFn = Arc<dyn Fn(Context, Value) -> ToolFuture + Send + Sync>;

/// Box an async closure as a [`ToolFn`].
pub fn tool_fn<F, Fut>(f: F) -> ToolFn
where
    F: Fn(Context, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
{
    Arc::new(move |cx: Context, args: Value| -> ToolFuture { Box::pin(f(cx, args)) })
}

/// Tracing, metrics and audit, bundled and injected.
#[derive(Clone)]
pub struct Telemetry {
    tracing: Tracing,
    metrics: Arc<dyn MetricsSink>,
    audit: AuditLogger,
}

impl Telemetry {
    pub fn new(tracing: Tracing, metrics: Arc<dyn MetricsSink>, audit: AuditLogger) -> Self {
        Self {
            tracing,
            metrics,
            audit,
        }
    }

    /// Every sink in its no-op form.
    pub fn disabled() -> Self {
        Self::new(Tracing::noop(), Arc::new(NoopMetrics), AuditLogger::disabled())
    }

    /// Build from startup configuration.
    ///
    /// When instrumentation is enabled, spans and metrics go to the global
    /// OpenTelemetry providers; the audit logger is configured on its own.
    pub fn from_config(config: &TelemetryConfig) -> Self {
        let audit = AuditLogger::new(AuditConfig {
            enabled: config.audit_enabled,
            include_pii: config.audit_include_pii,
            min_level: config.audit_level,
        });

        if !config.enabled {
            return Self::new(Tracing::noop(), Arc::new(NoopMetrics), audit);
        }

        let meter = global::meter(TRACER_NAME);
        let metrics = OtelMetrics::new(
            &meter,
            MetricsConfig {
                detailed_labels: config.detailed_metrics,
            },
        );
        Self::new(Tracing::global(), Arc::new(metrics), audit)
    }

    pub fn tracing(&self) -> &Tracing {
        &self.tracing
    }

    pub fn metrics(&self) -> Arc<dyn MetricsSink> {
        Arc::clone(&self.metrics)
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Wrap `handler` for `tool`, optionally declared against an API target.
    pub fn instrument(&self, tool: &str, target: Option<ApiTarget>, handler: ToolFn) -> ToolFn {
        self.wrap(tool, target, None, handler)
    }

    /// Like [`Telemetry::instrument`], also tagging the span with whether the
    /// tool only reads.
    pub fn instrument_read_only(
        &self,
        tool: &str,
        target: Option<ApiTarget>,
        read_only: bool,
        handler: ToolFn,
    ) -> ToolFn {
        self.wrap(tool, target, Some(read_only), handler)
    }

    fn wrap(
        &self,
        tool: &str,
        target: Option<ApiTarget>,
        read_only: Option<bool>,
        handler: ToolFn,
    ) -> ToolFn {
        let telemetry = self.clone();
        let tool: Arc<str> = Arc::from(tool);

        Arc::new(move |cx: Context, args: Value| -> ToolFuture {
            let telemetry = telemetry.clone();
            let tool = Arc::clone(&tool);
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                telemetry
                    .observe(&tool, target, read_only, handler, cx, args)
                    .await
            })
        })
    }

    async fn observe(
        &self,
        tool: &str,
        target: Option<ApiTarget>,
        read_only: Option<bool>,
        handler: ToolFn,
        cx: Context,
        args: Value,
    ) -> Result<CallToolResult> {
        let mut attrs = SpanAttributes::new();
        if let Some(target) = target {
            attrs = attrs.target(target);
        }
        if let Some(read_only) = read_only {
            attrs = attrs.read_only(read_only);
        }
        let (span_cx, span) = self.tracing.start_tool_span(&cx, tool, attrs.build());

        let mut record = InvocationRecord::new(tool);
        record.attach_trace_context(&span_cx);
        if let Some(target) = target {
            record.with_service_operation(target.service, target.operation);
        }
        if let Some(user) = authenticated_user(&cx) {
            record.with_user(user.email.clone());
        }

        let account = resolve_account(&cx, &args);
        if !account.is_empty() {
            record.with_account(account.clone());
            span.set_attribute(KeyValue::new(attr::ACCOUNT, account.clone()));
        }

        let started = Instant::now();
        let result = handler(span_cx, args).await;
        let duration = started.elapsed();

        let outcome = match &result {
            Err(err) => {
                record.complete_with_error(err);
                span.set_error(err);
                status::ERROR
            }
            Ok(res) if res.is_error => {
                record.complete(false, None);
                span.set_error_status(TOOL_ERROR_RESULT);
                status::ERROR
            }
            Ok(_) => {
                record.complete_success();
                span.set_success();
                status::SUCCESS
            }
        };

        self.metrics
            .record_tool_invocation_for_account(tool, &account, outcome, duration);
        if let Some(target) = target {
            self.metrics
                .record_api_call(target.service, target.operation, outcome, duration);
        }
        self.audit.log_invocation(&record);

        debug!(tool, status = outcome, elapsed_ms = duration.as_millis() as u64, "Tool call finished");
        drop(span);

        result
    }
}
