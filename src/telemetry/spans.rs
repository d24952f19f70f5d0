//! Span helpers built on the OpenTelemetry tracing API.
//!
//! A [`Tracing`] handle is always usable: when tracing is disabled it wraps
//! the OpenTelemetry no-op tracer, which still hands out valid span handles.
//! Callers therefore never branch on whether tracing is on.

use std::borrow::Cow;
use std::error::Error;
use std::sync::Arc;

use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::trace::noop::NoopTracer;
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};

use super::attributes::{attr, status, ApiTarget, SpanAttributes};

/// Instrumentation scope name reported to the tracer provider.
pub const TRACER_NAME: &str = "gmail-mcp";

/// Shared span factory.
#[derive(Clone)]
pub struct Tracing {
    tracer: Arc<BoxedTracer>,
}

impl Tracing {
    /// Wrap any OpenTelemetry tracer.
    pub fn new<T>(tracer: T) -> Self
    where
        T: Tracer + Send + Sync + 'static,
        T::Span: Send + Sync + 'static,
    {
        Self {
            tracer: Arc::new(BoxedTracer::new(Box::new(tracer))),
        }
    }

    /// Use the process-wide tracer provider.
    pub fn global() -> Self {
        Self {
            tracer: Arc::new(global::tracer(TRACER_NAME)),
        }
    }

    /// Tracing disabled: spans are created but never recorded.
    pub fn noop() -> Self {
        Self::new(NoopTracer::new())
    }

    /// Start an internal span as a child of whatever span `cx` carries.
    pub fn start_span(
        &self,
        cx: &Context,
        name: impl Into<Cow<'static, str>>,
        attrs: Vec<KeyValue>,
    ) -> (Context, ActiveSpan) {
        self.start_with_kind(cx, name.into(), SpanKind::Internal, attrs)
    }

    /// Start the server span for one tool invocation, named `tool.<tool>`.
    pub fn start_tool_span(
        &self,
        cx: &Context,
        tool: &str,
        attrs: Vec<KeyValue>,
    ) -> (Context, ActiveSpan) {
        let mut all = SpanAttributes::new().tool(tool).build();
        all.extend(attrs);
        self.start_with_kind(cx, format!("tool.{}", tool).into(), SpanKind::Server, all)
    }

    /// Start a client span for an outbound API call, named `<service>.<operation>`.
    pub fn start_api_span(
        &self,
        cx: &Context,
        target: ApiTarget,
        attrs: Vec<KeyValue>,
    ) -> (Context, ActiveSpan) {
        let mut all = SpanAttributes::new().target(target).build();
        all.extend(attrs);
        let name = format!("{}.{}", target.service, target.operation);
        self.start_with_kind(cx, name.into(), SpanKind::Client, all)
    }

    fn start_with_kind(
        &self,
        cx: &Context,
        name: Cow<'static, str>,
        kind: SpanKind,
        attrs: Vec<KeyValue>,
    ) -> (Context, ActiveSpan) {
        let span = self
            .tracer
            .span_builder(name)
            .with_kind(kind)
            .with_attributes(attrs)
            .start_with_context(self.tracer.as_ref(), cx);

        let cx = cx.with_span(span);
        (cx.clone(), ActiveSpan { cx })
    }
}

/// Handle to a started span. The span ends when the handle is dropped.
pub struct ActiveSpan {
    cx: Context,
}

impl ActiveSpan {
    /// Context carrying this span, for handing to children.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn set_attribute(&self, attribute: KeyValue) {
        self.cx.span().set_attribute(attribute);
    }

    /// Record `err` on the span and mark it failed with the error's message.
    pub fn set_error(&self, err: &dyn Error) {
        let span = self.cx.span();
        span.record_error(err);
        span.set_status(Status::error(err.to_string()));
    }

    /// Mark the span failed without an error value.
    pub fn set_error_status(&self, description: &'static str) {
        let span = self.cx.span();
        span.set_status(Status::error(description));
        span.set_attribute(KeyValue::new(attr::STATUS, status::ERROR));
    }

    pub fn set_success(&self) {
        self.cx.span().set_status(Status::Ok);
    }

    pub fn trace_id(&self) -> String {
        trace_id(&self.cx)
    }

    pub fn span_id(&self) -> String {
        span_id(&self.cx)
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        self.cx.span().end();
    }
}

/// Trace id of the active span in `cx`, or `""` when there is none.
pub fn trace_id(cx: &Context) -> String {
    let span = cx.span();
    let span_context = span.span_context();
    if span_context.is_valid() {
        span_context.trace_id().to_string()
    } else {
        String::new()
    }
}

/// Span id of the active span in `cx`, or `""` when there is none.
pub fn span_id(cx: &Context) -> String {
    let span = cx.span();
    let span_context = span.span_context();
    if span_context.is_valid() {
        span_context.span_id().to_string()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::attributes::{Operation, Service};

    #[test]
    fn test_ids_empty_without_span() {
        let cx = Context::new();
        assert_eq!(trace_id(&cx), "");
        assert_eq!(span_id(&cx), "");
    }

    #[test]
    fn test_noop_tracer_hands_out_usable_spans() {
        let tracing = Tracing::noop();
        let (cx, span) = tracing.start_tool_span(&Context::new(), "read_email", Vec::new());

        span.set_attribute(KeyValue::new("account", "work"));
        span.set_success();
        assert_eq!(trace_id(&cx), "");

        let (_child_cx, child) = tracing.start_api_span(
            span.context(),
            ApiTarget::new(Service::Gmail, Operation::Get),
            Vec::new(),
        );
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        child.set_error(&err);
    }

    #[test]
    fn test_global_tracer_without_provider_is_noop() {
        let tracing = Tracing::global();
        let (cx, _span) = tracing.start_span(&Context::new(), "startup", Vec::new());
        assert_eq!(span_id(&cx), "");
    }
}
