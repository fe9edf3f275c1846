use crate::correlation::CorrelationId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Request,
    Approval,
    Execution,
    Result,
    Error,
}

/// One line of the audit trail (§3, §4.10). `timestamp` is always ISO-8601
/// UTC; `correlation_id` and, when applicable, `session_id` are carried on
/// every event so a single request can be reconstructed from the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event_type: AuditEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, correlation_id: &CorrelationId) -> Self {
        Self {
            timestamp: iso8601_now(),
            event_type,
            tool_name: None,
            arguments: None,
            result: None,
            duration_ms: None,
            correlation_id: correlation_id.as_str().to_string(),
            session_id: None,
            user: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>, arguments: Value) -> Self {
        self.tool_name = Some(tool_name.into());
        self.arguments = Some(arguments);
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// `SystemTime` -> `YYYY-MM-DDTHH:MM:SSZ`, hand-rolled (civil-from-days,
/// Howard Hinnant's algorithm) to avoid pulling in a datetime crate for one
/// formatting need.
pub fn iso8601_now() -> String {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    format_iso8601(secs as i64)
}

fn format_iso8601(unix_secs: i64) -> String {
    let days = unix_secs.div_euclid(86_400);
    let secs_of_day = unix_secs.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    let hour = secs_of_day / 3600;
    let minute = (secs_of_day % 3600) / 60;
    let second = secs_of_day % 60;
    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}Z")
}

/// Days since 1970-01-01 -> (year, month, day). See
/// http://howardhinnant.github.io/date_algorithms.html#civil_from_days.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = if m <= 2 { y + 1 } else { y };
    (year, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_zero_formats_as_expected() {
        assert_eq!(format_iso8601(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn known_timestamp_round_trips() {
        // 2021-01-01T00:00:00Z
        assert_eq!(format_iso8601(1_609_459_200), "2021-01-01T00:00:00Z");
    }

    #[test]
    fn leap_day_is_handled() {
        // 2020-02-29T12:30:45Z
        assert_eq!(format_iso8601(1_582_979_445), "2020-02-29T12:30:45Z");
    }

    #[test]
    fn builder_methods_set_optional_fields() {
        let cid = CorrelationId::generate();
        let event = AuditEvent::new(AuditEventType::Execution, &cid)
            .with_session("s1")
            .with_tool("bash", serde_json::json!({"command": "ls"}))
            .with_duration_ms(12);
        assert_eq!(event.session_id.as_deref(), Some("s1"));
        assert_eq!(event.tool_name.as_deref(), Some("bash"));
        assert_eq!(event.duration_ms, Some(12));
    }
}
