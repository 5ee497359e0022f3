use crate::log_buffer::LogBuffer;
use autoapply_core::stream_event::{
    EventKind, JobAction, JobSnapshot, LogLevel, ProgressPayload, QueueEntry, StatusPatch,
    StreamEvent,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

/// Everything the connection manager hands to the reconciler, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardEvent {
    Connected,
    Disconnected { reason: String },
    ConnectError { message: String },
    Stream(StreamEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub connected: bool,
    pub agent_status: String,
    pub current_phase: String,
    pub tasks_completed: u64,
    pub tasks_in_progress: u64,
    pub tasks_failed: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self {
            connected: false,
            agent_status: "idle".to_string(),
            current_phase: "idle".to_string(),
            tasks_completed: 0,
            tasks_in_progress: 0,
            tasks_failed: 0,
            extra: Map::new(),
        }
    }
}

impl AgentStatus {
    /// Shallow merge: fields absent from the patch keep their value.
    pub fn merge(&mut self, patch: StatusPatch) {
        if let Some(value) = patch.agent_status {
            self.agent_status = value;
        }
        if let Some(value) = patch.current_phase {
            self.current_phase = value;
        }
        if let Some(value) = patch.tasks_completed {
            self.tasks_completed = value;
        }
        if let Some(value) = patch.tasks_in_progress {
            self.tasks_in_progress = value;
        }
        if let Some(value) = patch.tasks_failed {
            self.tasks_failed = value;
        }
        self.extra.extend(patch.extra);
    }
}

/// Folded view of one dashboard session. Events are applied one at a time.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    status: AgentStatus,
    running: bool,
    queue: Vec<QueueEntry>,
    ranked: Vec<JobSnapshot>,
    progress: Option<ProgressPayload>,
    logs: LogBuffer,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            logs: LogBuffer::with_capacity(capacity),
            ..Self::default()
        }
    }

    pub fn apply(&mut self, event: DashboardEvent) {
        match event {
            DashboardEvent::Connected => {
                self.status.connected = true;
                self.local_log(LogLevel::Info, "Connected to real-time server");
            }
            DashboardEvent::Disconnected { .. } => {
                self.status.connected = false;
                self.local_log(LogLevel::Warning, "Disconnected from server. Reconnecting...");
            }
            DashboardEvent::ConnectError { .. } => {
                self.local_log(LogLevel::Error, "Connection error occurred");
            }
            DashboardEvent::Stream(event) => self.apply_stream(event),
        }
    }

    fn apply_stream(&mut self, event: StreamEvent) {
        let StreamEvent { timestamp, kind } = event;
        match kind {
            EventKind::Log(payload) => self.logs.push(payload.level, payload.message, timestamp),
            EventKind::QueueUpdate(payload) => self.queue = payload.queue,
            EventKind::StatusUpdate(payload) => {
                match payload.status.agent_status.as_deref() {
                    Some("running") => self.running = true,
                    Some("idle") | Some("error") => self.running = false,
                    _ => {}
                }
                self.status.merge(payload.status);
            }
            EventKind::JobUpdate(payload) => {
                if payload.action == JobAction::Ranked {
                    self.ranked.push(payload.job);
                }
            }
            EventKind::ProcessUpdate(payload) => self.progress = Some(payload),
            EventKind::TaskStarted(payload) => {
                self.status.tasks_in_progress += 1;
                self.logs.push(
                    LogLevel::Info,
                    format!("Task started: {}", payload.task_name),
                    timestamp,
                );
            }
            EventKind::TaskCompleted(payload) => {
                self.status.tasks_completed += 1;
                self.status.tasks_in_progress = self.status.tasks_in_progress.saturating_sub(1);
                self.logs.push(
                    LogLevel::Success,
                    format!("Task completed: {}", payload.task_name),
                    timestamp,
                );
            }
        }
    }

    fn local_log(&mut self, level: LogLevel, message: &str) {
        self.logs.push(level, message, Utc::now().to_rfc3339());
    }

    /// Clears per-run results before a new run starts.
    pub fn reset_run(&mut self) {
        self.ranked.clear();
        self.progress = None;
    }

    pub fn clear_logs(&mut self) {
        self.logs.clear();
    }

    pub fn status(&self) -> &AgentStatus {
        &self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status.connected
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn queue(&self) -> &[QueueEntry] {
        &self.queue
    }

    pub fn ranked(&self) -> &[JobSnapshot] {
        &self.ranked
    }

    pub fn progress(&self) -> Option<&ProgressPayload> {
        self.progress.as_ref()
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }
}
