pub mod correlation;
pub mod event;
pub mod hooks;
pub mod metrics;
pub mod redaction;
pub mod sink;

pub use correlation::CorrelationId;
pub use event::{iso8601_now, AuditEvent, AuditEventType};
pub use hooks::{AuditHook, CompositeHooks, SessionHooks, ValidationError, ValidationHook};
pub use metrics::MetricsCollector;
pub use redaction::{RedactionConfig, Redactor};
pub use sink::{AuditSink, AuditSinkError, FileSink, SinkMode, StdoutSink};
