use autoapply_core::stream_event::QueueEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    InProgress,
    Applying,
    Submitted,
    Failed,
    Retrying,
    Skipped,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::InProgress => "IN_PROGRESS",
            QueueStatus::Applying => "APPLYING",
            QueueStatus::Submitted => "SUBMITTED",
            QueueStatus::Failed => "FAILED",
            QueueStatus::Retrying => "RETRYING",
            QueueStatus::Skipped => "SKIPPED",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub id: String,
    pub job_id: String,
    pub title: String,
    pub company: String,
    pub match_score: f64,
    pub status: QueueStatus,
    pub application_id: Option<String>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn display_name(&self) -> String {
        format!("{} @ {}", self.title, self.company)
    }

    pub fn entry(&self) -> QueueEntry {
        QueueEntry {
            id: self.id.clone(),
            name: self.display_name(),
            status: self.status.as_str().to_string(),
            match_score: self.match_score,
        }
    }
}

/// New queue item fields; the book assigns the id and status.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRequest<'a> {
    pub job_id: &'a str,
    pub title: &'a str,
    pub company: &'a str,
    pub match_score: f64,
}

/// Per-user application queue, at most one item per (user, job).
#[derive(Default)]
pub struct QueueBook {
    items: Mutex<HashMap<String, Vec<QueueItem>>>,
}

impl QueueBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<QueueItem>>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the queued item and whether it was already present.
    pub fn enqueue(&self, user_email: &str, request: QueueRequest<'_>) -> (QueueItem, bool) {
        let mut items = self.lock();
        let queue = items.entry(user_email.to_string()).or_default();
        if let Some(existing) = queue.iter().find(|item| item.job_id == request.job_id) {
            return (existing.clone(), true);
        }
        let item = QueueItem {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: request.job_id.to_string(),
            title: request.title.to_string(),
            company: request.company.to_string(),
            match_score: request.match_score,
            status: QueueStatus::InProgress,
            application_id: None,
            error: None,
            updated_at: Utc::now(),
        };
        queue.push(item.clone());
        (item, false)
    }

    pub fn set_status(
        &self,
        user_email: &str,
        item_id: &str,
        status: QueueStatus,
        error: Option<String>,
    ) -> Option<QueueItem> {
        let mut items = self.lock();
        let item = items
            .get_mut(user_email)?
            .iter_mut()
            .find(|item| item.id == item_id)?;
        item.status = status;
        item.error = error;
        item.updated_at = Utc::now();
        Some(item.clone())
    }

    pub fn mark_submitted(&self, user_email: &str, item_id: &str, application_id: &str) {
        let mut items = self.lock();
        if let Some(item) = items
            .get_mut(user_email)
            .and_then(|queue| queue.iter_mut().find(|item| item.id == item_id))
        {
            item.status = QueueStatus::Submitted;
            item.application_id = Some(application_id.to_string());
            item.error = None;
            item.updated_at = Utc::now();
        }
    }

    pub fn get(&self, user_email: &str, item_id: &str) -> Option<QueueItem> {
        self.lock()
            .get(user_email)?
            .iter()
            .find(|item| item.id == item_id)
            .cloned()
    }

    pub fn items(&self, user_email: &str) -> Vec<QueueItem> {
        self.lock().get(user_email).cloned().unwrap_or_default()
    }

    pub fn entries(&self, user_email: &str) -> Vec<QueueEntry> {
        self.lock()
            .get(user_email)
            .map(|queue| queue.iter().map(QueueItem::entry).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, user_email: &str) -> usize {
        self.lock().get(user_email).map(Vec::len).unwrap_or(0)
    }

    pub fn status_counts(&self, user_email: &str) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        if let Some(queue) = self.lock().get(user_email) {
            for item in queue {
                *counts.entry(item.status.as_str().to_string()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Empties the user's queue and returns how many items were removed.
    pub fn clear(&self, user_email: &str) -> usize {
        self.lock()
            .remove(user_email)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }
}
