use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

/// One push frame on the dashboard stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    pub timestamp: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Log(LogPayload),
    QueueUpdate(QueuePayload),
    StatusUpdate(StatusPayload),
    JobUpdate(JobUpdatePayload),
    ProcessUpdate(ProgressPayload),
    TaskStarted(TaskPayload),
    TaskCompleted(TaskPayload),
}

impl EventKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::Log(_) => "log",
            EventKind::QueueUpdate(_) => "queue_update",
            EventKind::StatusUpdate(_) => "status_update",
            EventKind::JobUpdate(_) => "job_update",
            EventKind::ProcessUpdate(_) => "process_update",
            EventKind::TaskStarted(_) => "task_started",
            EventKind::TaskCompleted(_) => "task_completed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogPayload {
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntry {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub match_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuePayload {
    #[serde(default)]
    pub queue: Vec<QueueEntry>,
}

/// Partial agent status; absent fields leave the observer's value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks_completed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks_in_progress: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks_failed: Option<u64>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl StatusPatch {
    pub fn phase(agent_status: &str, current_phase: &str) -> Self {
        Self {
            agent_status: Some(agent_status.to_string()),
            current_phase: Some(current_phase.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusPayload {
    pub status: StatusPatch,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    Ranked,
    Applying,
    Applied,
    Retrying,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobSnapshot {
    pub job_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobUpdatePayload {
    pub action: JobAction,
    pub job: JobSnapshot,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProgressPayload {
    pub stage: String,
    pub progress: u64,
    pub total: u64,
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskPayload {
    #[serde(rename = "taskName")]
    pub task_name: String,
}

impl StreamEvent {
    pub fn now(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            kind,
        }
    }

    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::now(EventKind::Log(LogPayload {
            level,
            message: message.into(),
        }))
    }

    pub fn queue(queue: Vec<QueueEntry>) -> Self {
        Self::now(EventKind::QueueUpdate(QueuePayload { queue }))
    }

    pub fn status(status: StatusPatch) -> Self {
        Self::now(EventKind::StatusUpdate(StatusPayload { status }))
    }

    pub fn job(action: JobAction, job: JobSnapshot) -> Self {
        Self::now(EventKind::JobUpdate(JobUpdatePayload { action, job }))
    }

    pub fn progress(stage: &str, progress: u64, total: u64, details: Option<Value>) -> Self {
        Self::now(EventKind::ProcessUpdate(ProgressPayload {
            stage: stage.to_string(),
            progress,
            total,
            percentage: percentage(progress, total),
            details,
        }))
    }

    pub fn task_started(task_name: impl Into<String>) -> Self {
        Self::now(EventKind::TaskStarted(TaskPayload {
            task_name: task_name.into(),
        }))
    }

    pub fn task_completed(task_name: impl Into<String>) -> Self {
        Self::now(EventKind::TaskCompleted(TaskPayload {
            task_name: task_name.into(),
        }))
    }
}

/// Rounded to one decimal place; zero when `total` is zero.
pub fn percentage(progress: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((progress as f64 / total as f64) * 1000.0).round() / 10.0
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_event(event: &StreamEvent, max_frame_bytes: usize) -> Result<String, FrameError> {
    let encoded = serde_json::to_string(event).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_event(raw: &str, max_frame_bytes: usize) -> Result<StreamEvent, FrameError> {
    let raw = raw.trim_end_matches(['\n', '\r']);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_str(raw).map_err(|err| FrameError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_event_uses_flat_type_tag() {
        let event = StreamEvent {
            timestamp: "2026-02-07T21:00:00Z".to_string(),
            kind: EventKind::Log(LogPayload {
                level: LogLevel::Warning,
                message: "slow upstream".to_string(),
            }),
        };
        let value: Value =
            serde_json::from_str(&encode_event(&event, DEFAULT_MAX_FRAME_BYTES).expect("encode"))
                .expect("json");
        assert_eq!(value["type"], "log");
        assert_eq!(value["level"], "warning");
        assert_eq!(value["message"], "slow upstream");
        assert_eq!(value["timestamp"], "2026-02-07T21:00:00Z");
    }

    #[test]
    fn decodes_status_update_with_unknown_fields() {
        let raw = r#"{
            "type": "status_update",
            "timestamp": "2026-02-07T21:00:00Z",
            "status": {"agentStatus": "running", "currentPhase": "ranking", "uptime": "0h 3m"}
        }"#;
        let event = decode_event(raw, DEFAULT_MAX_FRAME_BYTES).expect("decode");
        let EventKind::StatusUpdate(payload) = event.kind else {
            panic!("expected status update")
        };
        assert_eq!(payload.status.agent_status.as_deref(), Some("running"));
        assert_eq!(payload.status.tasks_completed, None);
        assert_eq!(payload.status.extra.get("uptime"), Some(&Value::from("0h 3m")));
    }

    #[test]
    fn decodes_task_events_by_task_name() {
        let raw = r#"{"type":"task_completed","taskName":"Apply: SRE @ Stripe","timestamp":"t"}"#;
        let event = decode_event(raw, DEFAULT_MAX_FRAME_BYTES).expect("decode");
        assert_eq!(
            event.kind,
            EventKind::TaskCompleted(TaskPayload {
                task_name: "Apply: SRE @ Stripe".to_string()
            })
        );
    }

    #[test]
    fn unknown_event_type_is_a_decode_error() {
        let raw = r#"{"type":"telemetry","timestamp":"t"}"#;
        assert!(matches!(
            decode_event(raw, DEFAULT_MAX_FRAME_BYTES),
            Err(FrameError::Decode(_))
        ));
    }

    #[test]
    fn encoder_rejects_oversized_event() {
        let event = StreamEvent::log(LogLevel::Info, "x".repeat(256));
        assert!(matches!(
            encode_event(&event, 64),
            Err(FrameError::OversizedFrame { .. })
        ));
    }

    #[test]
    fn progress_percentage_is_rounded() {
        assert_eq!(percentage(1, 3), 33.3);
        assert_eq!(percentage(2, 3), 66.7);
        assert_eq!(percentage(5, 0), 0.0);
        let event = StreamEvent::progress("ranking", 3, 10, None);
        let EventKind::ProcessUpdate(payload) = event.kind else {
            panic!("expected progress")
        };
        assert_eq!(payload.percentage, 30.0);
    }
}
