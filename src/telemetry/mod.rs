//! Tool-call instrumentation
//!
//! Tracing, metrics and audit logging wrapped around every MCP tool handler,
//! with account resolution and label cardinality control. All sinks have a
//! no-op form, so instrumented code never checks whether telemetry is on.

pub mod account;
pub mod attributes;
pub mod audit;
pub mod cardinality;
pub mod init;
pub mod instrument;
pub mod invocation;
pub mod metrics;
pub mod spans;

pub use account::{resolve_account, AuthenticatedUser, DEFAULT_ACCOUNT};
pub use attributes::{ApiTarget, Operation, Service, SpanAttributes};
pub use audit::{AuditConfig, AuditEntry, AuditFields, AuditLogger, AUDIT_TARGET};
pub use init::init_logging;
pub use instrument::{tool_fn, Telemetry, ToolFn, ToolFuture};
pub use invocation::InvocationRecord;
pub use metrics::{MetricsConfig, MetricsSink, NoopMetrics, OtelMetrics};
pub use spans::{ActiveSpan, Tracing};
