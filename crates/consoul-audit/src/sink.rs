use crate::event::AuditEvent;
use crate::redaction::Redactor;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum AuditSinkError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where structured audit events are written (§4.10): `stdout`, a JSONL
/// `file`, or `both`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkMode {
    Stdout,
    File,
    Both,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, event: &AuditEvent) -> Result<(), AuditSinkError>;
}

/// Writes one JSON object per line to stdout.
pub struct StdoutSink;

#[async_trait]
impl AuditSink for StdoutSink {
    async fn emit(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        println!("{}", serde_json::to_string(event)?);
        Ok(())
    }
}

/// Appends one JSON object per line to a file, serialized under a mutex so
/// concurrent writers never interleave partial lines. Default path is
/// `<user-data-dir>/consoul/logs/audit.jsonl`; rotation/retention is a
/// deployment concern, not this sink's (§4.10).
pub struct FileSink {
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), file: Mutex::new(None) }
    }

    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("consoul")
            .join("logs")
            .join("audit.jsonl")
    }

    async fn ensure_open(&self) -> Result<(), AuditSinkError> {
        let mut guard = self.file.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new().create(true).append(true).open(&self.path).await?;
        *guard = Some(file);
        Ok(())
    }
}

#[async_trait]
impl AuditSink for FileSink {
    async fn emit(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        self.ensure_open().await?;
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().expect("ensure_open just populated this");
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Fans an event out to every configured destination. `SinkMode::Both`
/// composes a `StdoutSink` and a `FileSink`; the audit logger never needs
/// to know which mode is active.
pub struct CompositeSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }

    pub fn from_mode(mode: SinkMode, file_path: Option<PathBuf>) -> Self {
        let sinks: Vec<Arc<dyn AuditSink>> = match mode {
            SinkMode::Stdout => vec![Arc::new(StdoutSink)],
            SinkMode::File => vec![Arc::new(FileSink::new(file_path.unwrap_or_else(FileSink::default_path)))],
            SinkMode::Both => vec![
                Arc::new(StdoutSink),
                Arc::new(FileSink::new(file_path.unwrap_or_else(FileSink::default_path))),
            ],
        };
        Self::new(sinks)
    }
}

#[async_trait]
impl AuditSink for CompositeSink {
    async fn emit(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        for sink in &self.sinks {
            sink.emit(event).await?;
        }
        Ok(())
    }
}

/// Redacts an event's `arguments`/`result` payloads before handing it to the
/// wrapped sink. This is the composition point that guarantees no raw
/// secret reaches a log line when redaction is enabled (§8).
pub struct RedactingSink<S> {
    inner: S,
    redactor: Redactor,
}

impl<S: AuditSink> RedactingSink<S> {
    pub fn new(inner: S, redactor: Redactor) -> Self {
        Self { inner, redactor }
    }
}

#[async_trait]
impl<S: AuditSink> AuditSink for RedactingSink<S> {
    async fn emit(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        let mut redacted = event.clone();
        if let Some(args) = &redacted.arguments {
            redacted.arguments = Some(self.redactor.redact_value(args));
        }
        if let Some(result) = &redacted.result {
            redacted.result = Some(self.redactor.redact_value(result));
        }
        self.inner.emit(&redacted).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationId;
    use crate::event::AuditEventType;
    use crate::redaction::RedactionConfig;

    #[tokio::test]
    async fn file_sink_appends_one_json_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = FileSink::new(&path);
        let cid = CorrelationId::generate();
        sink.emit(&AuditEvent::new(AuditEventType::Request, &cid)).await.unwrap();
        sink.emit(&AuditEvent::new(AuditEventType::Result, &cid)).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            assert!(serde_json::from_str::<serde_json::Value>(line).is_ok());
        }
    }

    #[tokio::test]
    async fn redacting_sink_strips_secrets_before_forwarding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = RedactingSink::new(FileSink::new(&path), Redactor::new(RedactionConfig::default()));
        let cid = CorrelationId::generate();
        let event = AuditEvent::new(AuditEventType::Execution, &cid)
            .with_tool("bash", serde_json::json!({"command": "curl -H 'Authorization: sk-abcdefghijklmnopqrstuvwxyz123'"}));
        sink.emit(&event).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!contents.contains("sk-abcdefghijklmnopqrstuvwxyz123"));
    }
}
