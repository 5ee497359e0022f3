use crate::{
    config::Credential,
    queue::{QueueBook, QueueItem, QueueRequest, QueueStatus},
    stream::EventHub,
    submission::SubmissionService,
};
use autoapply_core::{
    retry::{RetryDecision, RetryPolicy},
    stream_event::{JobAction, JobSnapshot, LogLevel, StatusPatch, StreamEvent},
    submission::SubmitError,
    ApplicationRequest, Job,
};
use serde::Serialize;
use serde_json::json;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use thiserror::Error;
use tracing::{error, info, warn};

pub const DEFAULT_MAX_JOBS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct RankedJob {
    pub job: Job,
    pub match_score: f64,
    pub matched_skills: Vec<String>,
}

/// Opaque ranking step. Implementations return at most `max_jobs` entries,
/// best first.
pub trait JobRanker: Send + Sync {
    fn rank(&self, catalog: &[Job], profile_skills: &[String], max_jobs: usize) -> Vec<RankedJob>;
}

/// Keeps catalog order and scores by position.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogOrderRanker;

impl JobRanker for CatalogOrderRanker {
    fn rank(&self, catalog: &[Job], profile_skills: &[String], max_jobs: usize) -> Vec<RankedJob> {
        catalog
            .iter()
            .take(max_jobs)
            .enumerate()
            .map(|(idx, job)| RankedJob {
                job: job.clone(),
                match_score: positional_score(idx),
                matched_skills: matched_skills(job, profile_skills),
            })
            .collect()
    }
}

/// Required skills of `job` the profile lists, in the job's order.
pub fn matched_skills(job: &Job, profile_skills: &[String]) -> Vec<String> {
    job.required_skills
        .iter()
        .filter(|skill| {
            profile_skills
                .iter()
                .any(|owned| owned.eq_ignore_ascii_case(skill))
        })
        .cloned()
        .collect()
}

/// `max(10, 100 - 2 * idx)`.
pub fn positional_score(idx: usize) -> f64 {
    (100.0 - 2.0 * idx as f64).max(10.0)
}

pub trait CoverLetterWriter: Send + Sync {
    fn write(&self, job: &Job, applicant: &Credential) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateCoverLetter;

impl CoverLetterWriter for TemplateCoverLetter {
    fn write(&self, job: &Job, applicant: &Credential) -> String {
        let skills = if job.required_skills.is_empty() {
            "the skills this role needs".to_string()
        } else {
            job.required_skills.join(", ")
        };
        format!(
            "Dear {company} hiring team,\n\n\
             I am excited to apply for the {title} position ({location}). \
             My experience with {skills} lines up well with what you are looking for, \
             and I would welcome the chance to contribute to your team.\n\n\
             Best regards,\n{name}\n{email}",
            company = job.company,
            title = job.title,
            location = job.location,
            name = applicant.name,
            email = applicant.email,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub max_jobs: usize,
    pub auto_apply: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_jobs: DEFAULT_MAX_JOBS,
            auto_apply: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub ranked: usize,
    pub queued: usize,
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("auto-apply already running for {0}")]
    AlreadyRunning(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplyOutcome {
    Applied,
    Failed,
    Skipped,
}

/// Drives rank → queue → apply for one user and narrates every step on the
/// event stream.
pub struct AutoApplyDriver {
    submissions: SubmissionService,
    hub: Arc<EventHub>,
    queue: Arc<QueueBook>,
    ranker: Arc<dyn JobRanker>,
    writer: Arc<dyn CoverLetterWriter>,
    policy: RetryPolicy,
    pacing: Duration,
    active: Mutex<HashSet<String>>,
}

impl AutoApplyDriver {
    pub fn new(
        submissions: SubmissionService,
        hub: Arc<EventHub>,
        queue: Arc<QueueBook>,
        policy: RetryPolicy,
        pacing: Duration,
    ) -> Self {
        Self {
            submissions,
            hub,
            queue,
            ranker: Arc::new(CatalogOrderRanker),
            writer: Arc::new(TemplateCoverLetter),
            policy,
            pacing,
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_ranker(mut self, ranker: Arc<dyn JobRanker>) -> Self {
        self.ranker = ranker;
        self
    }

    pub fn with_writer(mut self, writer: Arc<dyn CoverLetterWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn queue(&self) -> &Arc<QueueBook> {
        &self.queue
    }

    fn active(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self, user_email: &str) -> bool {
        self.active().contains(user_email)
    }

    /// Spawns a run in the background. One run per user at a time.
    pub fn start(
        self: &Arc<Self>,
        applicant: Credential,
        options: RunOptions,
    ) -> Result<tokio::task::JoinHandle<RunSummary>, StartError> {
        if !self.active().insert(applicant.email.clone()) {
            return Err(StartError::AlreadyRunning(applicant.email));
        }
        let guard = ActiveRun {
            driver: self.clone(),
            user_email: applicant.email.clone(),
        };
        info!(
            event = "auto_apply_start",
            user = %applicant.email,
            max_jobs = options.max_jobs,
            auto_apply = options.auto_apply
        );
        Ok(tokio::spawn(async move {
            let summary = guard.driver.run(&applicant, options).await;
            drop(guard);
            summary
        }))
    }

    pub async fn run(&self, applicant: &Credential, options: RunOptions) -> RunSummary {
        match self.run_phases(applicant, options).await {
            Ok(summary) => {
                info!(
                    event = "auto_apply_done",
                    user = %applicant.email,
                    applied = summary.applied,
                    failed = summary.failed
                );
                summary
            }
            Err(err) => {
                error!(event = "auto_apply_failed", user = %applicant.email, error = %err);
                let user = applicant.email.as_str();
                self.log(user, LogLevel::Error, format!("Workflow failed: {err}"))
                    .await;
                self.emit(user, StreamEvent::status(StatusPatch::phase("error", "failed")))
                    .await;
                RunSummary::default()
            }
        }
    }

    async fn run_phases(
        &self,
        applicant: &Credential,
        options: RunOptions,
    ) -> Result<RunSummary, SubmitError> {
        let user = applicant.email.as_str();
        let mut summary = RunSummary::default();

        self.log(user, LogLevel::Info, "Starting Auto-Apply workflow...")
            .await;
        self.phase(user, "running", "initializing").await;
        self.log(
            user,
            LogLevel::Success,
            format!("Profile loaded for {}", applicant.name),
        )
        .await;

        self.log(user, LogLevel::Info, "Ranking jobs based on your profile...")
            .await;
        self.phase(user, "running", "ranking").await;
        self.emit(
            user,
            StreamEvent::progress(
                "ranking",
                0,
                options.max_jobs as u64,
                Some(json!({"message": "Analyzing job listings..."})),
            ),
        )
        .await;

        let catalog = self.submissions.jobs()?;
        let ranked = self.ranker.rank(&catalog, &applicant.skills, options.max_jobs);
        for (idx, entry) in ranked.iter().enumerate() {
            self.emit(
                user,
                StreamEvent::job(
                    JobAction::Ranked,
                    JobSnapshot {
                        job_id: entry.job.job_id.clone(),
                        title: entry.job.title.clone(),
                        company: entry.job.company.clone(),
                        location: Some(entry.job.location.clone()),
                        match_score: Some(entry.match_score),
                        matched_skills: entry.matched_skills.clone(),
                        salary: Some(entry.job.salary.clone()),
                        ..JobSnapshot::default()
                    },
                ),
            )
            .await;
            self.emit(
                user,
                StreamEvent::progress(
                    "ranking",
                    idx as u64 + 1,
                    options.max_jobs as u64,
                    Some(json!({
                        "message": format!(
                            "Ranked: {} at {} ({:.1}%)",
                            entry.job.title, entry.job.company, entry.match_score
                        )
                    })),
                ),
            )
            .await;
            self.log(
                user,
                LogLevel::Info,
                format!(
                    "Ranked #{}: {} @ {} - {:.1}% match",
                    idx + 1,
                    entry.job.title,
                    entry.job.company,
                    entry.match_score
                ),
            )
            .await;
        }
        summary.ranked = ranked.len();
        self.log(
            user,
            LogLevel::Success,
            format!("Found {} matching jobs", ranked.len()),
        )
        .await;

        if ranked.is_empty() {
            self.log(user, LogLevel::Warning, "No matching jobs found").await;
            self.phase(user, "idle", "completed").await;
            return Ok(summary);
        }

        self.log(user, LogLevel::Info, "Adding jobs to application queue...")
            .await;
        self.phase(user, "running", "queuing").await;
        let mut run_items = Vec::with_capacity(ranked.len());
        for (idx, entry) in ranked.iter().enumerate() {
            let (item, existing) = self.queue.enqueue(
                user,
                QueueRequest {
                    job_id: &entry.job.job_id,
                    title: &entry.job.title,
                    company: &entry.job.company,
                    match_score: entry.match_score,
                },
            );
            if existing {
                self.log(
                    user,
                    LogLevel::Info,
                    format!("{} already in queue", item.display_name()),
                )
                .await;
            } else {
                self.log(
                    user,
                    LogLevel::Success,
                    format!("Added to queue: {}", item.display_name()),
                )
                .await;
                self.emit(
                    user,
                    StreamEvent::progress("queuing", idx as u64 + 1, ranked.len() as u64, None),
                )
                .await;
            }
            run_items.push(item);
        }
        summary.queued = run_items.len();
        self.emit(user, StreamEvent::queue(self.queue.entries(user)))
            .await;

        if !options.auto_apply {
            self.log(
                user,
                LogLevel::Success,
                format!(
                    "Added {} jobs to queue. Auto-apply disabled.",
                    run_items.len()
                ),
            )
            .await;
            self.phase(user, "idle", "completed").await;
            return Ok(summary);
        }

        self.log(user, LogLevel::Info, "Starting auto-apply process...")
            .await;
        self.phase(user, "running", "applying").await;

        let to_apply: Vec<QueueItem> = run_items
            .into_iter()
            .filter(|item| item.status != QueueStatus::Submitted)
            .collect();
        let total = to_apply.len() as u64;
        for (idx, item) in to_apply.iter().enumerate() {
            match self
                .apply_one(applicant, item, idx as u64 + 1, total)
                .await?
            {
                ApplyOutcome::Applied => summary.applied += 1,
                ApplyOutcome::Failed => summary.failed += 1,
                ApplyOutcome::Skipped => summary.skipped += 1,
            }
            if !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }

        self.log(
            user,
            LogLevel::Success,
            format!(
                "Auto-apply complete! Applied: {}, Failed: {}",
                summary.applied, summary.failed
            ),
        )
        .await;
        self.emit(
            user,
            StreamEvent::status(StatusPatch {
                tasks_completed: Some(summary.applied as u64),
                tasks_failed: Some(summary.failed as u64),
                ..StatusPatch::phase("idle", "completed")
            }),
        )
        .await;
        self.emit(
            user,
            StreamEvent::progress(
                "completed",
                total,
                total,
                Some(json!({"applied": summary.applied, "failed": summary.failed})),
            ),
        )
        .await;
        self.emit(user, StreamEvent::queue(self.queue.entries(user)))
            .await;
        Ok(summary)
    }

    async fn apply_one(
        &self,
        applicant: &Credential,
        item: &QueueItem,
        position: u64,
        total: u64,
    ) -> Result<ApplyOutcome, SubmitError> {
        let user = applicant.email.as_str();
        let name = item.display_name();
        let task_name = format!("Apply: {name}");

        self.emit(user, StreamEvent::task_started(task_name.clone()))
            .await;
        self.log(user, LogLevel::Info, format!("Applying to: {name}..."))
            .await;
        self.emit(
            user,
            StreamEvent::progress(
                "applying",
                position,
                total,
                Some(json!({"current_job": name})),
            ),
        )
        .await;
        self.queue
            .set_status(user, &item.id, QueueStatus::Applying, None);
        self.emit(
            user,
            StreamEvent::job(JobAction::Applying, snapshot(item, QueueStatus::Applying, None)),
        )
        .await;

        let Some(job) = self.submissions.job(&item.job_id)? else {
            let reason = "Job listing no longer available".to_string();
            self.queue
                .set_status(user, &item.id, QueueStatus::Skipped, Some(reason.clone()));
            self.emit(
                user,
                StreamEvent::job(
                    JobAction::Failed,
                    snapshot(item, QueueStatus::Skipped, Some(reason.clone())),
                ),
            )
            .await;
            self.log(user, LogLevel::Warning, format!("Skipped {name}: {reason}"))
                .await;
            self.emit(user, StreamEvent::task_completed(task_name)).await;
            return Ok(ApplyOutcome::Skipped);
        };

        self.log(user, LogLevel::Info, "Generating tailored cover letter...")
            .await;
        let request = ApplicationRequest {
            job_id: Some(job.job_id.clone()),
            applicant_name: Some(applicant.name.clone()),
            applicant_email: Some(applicant.email.clone()),
            resume_text: None,
            cover_letter: Some(self.writer.write(&job, applicant)),
            match_score: Some(item.match_score),
        };

        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            let err = match self.submissions.submit(request.clone()) {
                Ok(receipt) => break Ok(receipt.application_id),
                Err(err) => err,
            };
            match self.policy.decide(attempt, &err) {
                RetryDecision::AlreadySubmitted { application_id } => {
                    self.log(
                        user,
                        LogLevel::Info,
                        format!("{name} was already submitted ({application_id})"),
                    )
                    .await;
                    break Ok(application_id);
                }
                RetryDecision::Retry { after } => {
                    warn!(
                        event = "apply_retry",
                        user = user,
                        job_id = %item.job_id,
                        attempt = attempt,
                        status = err.http_status(),
                        after_ms = after.as_millis() as u64
                    );
                    self.queue.set_status(
                        user,
                        &item.id,
                        QueueStatus::Retrying,
                        Some(err.to_string()),
                    );
                    self.emit(
                        user,
                        StreamEvent::job(
                            JobAction::Retrying,
                            snapshot(item, QueueStatus::Retrying, Some(err.to_string())),
                        ),
                    )
                    .await;
                    self.log(
                        user,
                        LogLevel::Warning,
                        format!(
                            "{err} (HTTP {}), retrying in {}s (attempt {attempt}/{})",
                            err.http_status(),
                            after.as_secs_f64(),
                            self.policy.max_attempts
                        ),
                    )
                    .await;
                    tokio::time::sleep(after).await;
                }
                RetryDecision::GiveUp => break Err(err),
            }
        };

        let result = match outcome {
            Ok(application_id) => {
                self.queue.mark_submitted(user, &item.id, &application_id);
                self.emit(
                    user,
                    StreamEvent::job(JobAction::Applied, snapshot(item, QueueStatus::Submitted, None)),
                )
                .await;
                self.log(
                    user,
                    LogLevel::Success,
                    format!("Successfully applied to: {name}"),
                )
                .await;
                ApplyOutcome::Applied
            }
            Err(err) => {
                let message = err.to_string();
                self.queue
                    .set_status(user, &item.id, QueueStatus::Failed, Some(message.clone()));
                self.emit(
                    user,
                    StreamEvent::job(
                        JobAction::Failed,
                        snapshot(item, QueueStatus::Failed, Some(message.clone())),
                    ),
                )
                .await;
                self.log(
                    user,
                    LogLevel::Error,
                    format!("Failed to apply: {name} - {message}"),
                )
                .await;
                ApplyOutcome::Failed
            }
        };
        self.emit(user, StreamEvent::task_completed(task_name)).await;
        Ok(result)
    }

    /// Empties the user's queue and tells their dashboards.
    pub async fn clear_queue(&self, user_email: &str) -> usize {
        let removed = self.queue.clear(user_email);
        self.emit(user_email, StreamEvent::queue(Vec::new())).await;
        self.log(
            user_email,
            LogLevel::Info,
            format!("Cleared {removed} jobs from queue"),
        )
        .await;
        info!(event = "queue_cleared", user = user_email, removed = removed);
        removed
    }

    async fn emit(&self, user_email: &str, event: StreamEvent) {
        self.hub.send_to_user(user_email, &event).await;
    }

    async fn log(&self, user_email: &str, level: LogLevel, message: impl Into<String>) {
        self.emit(user_email, StreamEvent::log(level, message)).await;
    }

    async fn phase(&self, user_email: &str, agent_status: &str, current_phase: &str) {
        self.emit(
            user_email,
            StreamEvent::status(StatusPatch::phase(agent_status, current_phase)),
        )
        .await;
    }
}

struct ActiveRun {
    driver: Arc<AutoApplyDriver>,
    user_email: String,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.driver.active().remove(&self.user_email);
    }
}

fn snapshot(item: &QueueItem, status: QueueStatus, error: Option<String>) -> JobSnapshot {
    JobSnapshot {
        job_id: item.job_id.clone(),
        title: item.title.clone(),
        company: item.company.clone(),
        match_score: Some(item.match_score),
        queue_item_id: Some(item.id.clone()),
        status: Some(status.as_str().to_string()),
        error,
        ..JobSnapshot::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chaos::ChaosConfig, chaos::FaultInjector, config::StreamConfig};
    use autoapply_core::stream_event::{decode_event, EventKind};
    use autoapply_storage::{AppliedFilter, PortalStore};
    use axum::extract::ws::Message;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn catalog(count: usize) -> Vec<Job> {
        let base = Utc
            .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp");
        (0..count)
            .map(|idx| Job {
                job_id: format!("J{idx}"),
                title: format!("Engineer {idx}"),
                company: "Stripe".to_string(),
                location: "Remote".to_string(),
                job_type: "Full-time".to_string(),
                salary: "$150k - $200k".to_string(),
                description: "Payments".to_string(),
                required_skills: vec!["Go".to_string(), "Redis".to_string()],
                visa_sponsorship: true,
                created_at: base - ChronoDuration::minutes(idx as i64),
            })
            .collect()
    }

    fn driver(jobs: usize, chaos: ChaosConfig, policy: RetryPolicy) -> Arc<AutoApplyDriver> {
        Arc::new(bare_driver(jobs, chaos, policy))
    }

    fn bare_driver(jobs: usize, chaos: ChaosConfig, policy: RetryPolicy) -> AutoApplyDriver {
        let mut store = PortalStore::open_in_memory().expect("open db");
        store.replace_catalog(&catalog(jobs)).expect("seed");
        let submissions = SubmissionService::new(
            Arc::new(Mutex::new(store)),
            Arc::new(FaultInjector::with_seed(chaos, 5)),
        );
        AutoApplyDriver::new(
            submissions,
            Arc::new(EventHub::new(StreamConfig::default())),
            Arc::new(QueueBook::new()),
            policy,
            Duration::ZERO,
        )
    }

    fn applicant() -> Credential {
        Credential {
            email: "alice@example.com".to_string(),
            token: "tok".to_string(),
            name: "Alice".to_string(),
            skills: vec!["go".to_string(), "Kubernetes".to_string()],
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            fallback_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<Message>) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Ok(Message::Text(text)) = rx.try_recv() {
            kinds.push(decode_event(&text, 256 * 1024).expect("decode").kind);
        }
        kinds
    }

    #[test]
    fn positional_score_has_a_floor() {
        assert_eq!(positional_score(0), 100.0);
        assert_eq!(positional_score(3), 94.0);
        assert_eq!(positional_score(60), 10.0);
    }

    #[tokio::test]
    async fn calm_run_applies_every_ranked_job() {
        let driver = driver(5, ChaosConfig::disabled(), fast_policy(4));
        let mut rx = driver.hub.attach_local("alice@example.com").await;

        let summary = driver
            .run(
                &applicant(),
                RunOptions {
                    max_jobs: 3,
                    auto_apply: true,
                },
            )
            .await;
        assert_eq!(
            summary,
            RunSummary {
                ranked: 3,
                queued: 3,
                applied: 3,
                failed: 0,
                skipped: 0
            }
        );
        let stored = driver
            .submissions
            .applied(&AppliedFilter {
                applicant_name: Some("Alice".to_string()),
                ..AppliedFilter::default()
            })
            .expect("list");
        assert_eq!(stored.len(), 3);
        assert_eq!(driver.queue.status_counts("alice@example.com").get("SUBMITTED"), Some(&3));

        let kinds = drain(&mut rx);
        let started = kinds
            .iter()
            .filter(|kind| matches!(kind, EventKind::TaskStarted(_)))
            .count();
        let completed = kinds
            .iter()
            .filter(|kind| matches!(kind, EventKind::TaskCompleted(_)))
            .count();
        assert_eq!((started, completed), (3, 3));
        let ranked: Vec<&JobSnapshot> = kinds
            .iter()
            .filter_map(|kind| match kind {
                EventKind::JobUpdate(update) if update.action == JobAction::Ranked => {
                    Some(&update.job)
                }
                _ => None,
            })
            .collect();
        assert_eq!(ranked.len(), 3);
        for job in ranked {
            assert_eq!(job.matched_skills, vec!["Go".to_string()]);
        }
        match kinds.last() {
            Some(EventKind::QueueUpdate(payload)) => assert_eq!(payload.queue.len(), 3),
            other => panic!("expected final queue update, got {other:?}"),
        }
    }

    #[test]
    fn matched_skills_ignore_case_and_keep_job_order() {
        let job = &catalog(1)[0];
        let profile = vec!["redis".to_string(), "GO".to_string(), "Rust".to_string()];
        assert_eq!(matched_skills(job, &profile), vec!["Go", "Redis"]);
        assert!(matched_skills(job, &[]).is_empty());
    }

    struct NewestLast;

    impl JobRanker for NewestLast {
        fn rank(&self, catalog: &[Job], profile_skills: &[String], max_jobs: usize) -> Vec<RankedJob> {
            let mut reversed = catalog.to_vec();
            reversed.reverse();
            CatalogOrderRanker.rank(&reversed, profile_skills, max_jobs)
        }
    }

    struct OneLiner;

    impl CoverLetterWriter for OneLiner {
        fn write(&self, job: &Job, applicant: &Credential) -> String {
            format!("{} wants {}", applicant.name, job.job_id)
        }
    }

    #[tokio::test]
    async fn custom_ranker_and_writer_drive_the_run() {
        let driver = Arc::new(
            bare_driver(3, ChaosConfig::disabled(), fast_policy(4))
                .with_ranker(Arc::new(NewestLast))
                .with_writer(Arc::new(OneLiner)),
        );
        let summary = driver
            .run(
                &applicant(),
                RunOptions {
                    max_jobs: 1,
                    auto_apply: true,
                },
            )
            .await;
        assert_eq!(summary.applied, 1);
        let stored = driver
            .submissions
            .applied(&AppliedFilter::default())
            .expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].record.job_id, "J2");
        assert_eq!(stored[0].record.cover_letter, "Alice wants J2");
    }

    #[tokio::test]
    async fn persistent_chaos_exhausts_retries() {
        let driver = driver(2, ChaosConfig::with_rate(1.0), fast_policy(2));
        let summary = driver.run(&applicant(), RunOptions::default()).await;
        assert_eq!(summary.applied, 0);
        assert_eq!(summary.failed, 2);
        assert_eq!(driver.queue.status_counts("alice@example.com").get("FAILED"), Some(&2));
        let stored = driver
            .submissions
            .applied(&AppliedFilter::default())
            .expect("list");
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn earlier_submission_counts_as_applied() {
        let driver = driver(1, ChaosConfig::disabled(), fast_policy(4));
        let receipt = driver
            .submissions
            .submit(ApplicationRequest {
                job_id: Some("J0".to_string()),
                applicant_name: Some("Alice".to_string()),
                cover_letter: Some("manual".to_string()),
                ..ApplicationRequest::default()
            })
            .expect("manual submission");

        let summary = driver.run(&applicant(), RunOptions::default()).await;
        assert_eq!(summary.applied, 1);
        let item = driver.queue.items("alice@example.com").remove(0);
        assert_eq!(item.application_id, Some(receipt.application_id));
    }

    #[tokio::test]
    async fn queue_only_run_leaves_items_in_progress() {
        let driver = driver(4, ChaosConfig::disabled(), fast_policy(4));
        let summary = driver
            .run(
                &applicant(),
                RunOptions {
                    max_jobs: 4,
                    auto_apply: false,
                },
            )
            .await;
        assert_eq!(summary.queued, 4);
        assert_eq!(summary.applied, 0);
        assert_eq!(
            driver.queue.status_counts("alice@example.com").get("IN_PROGRESS"),
            Some(&4)
        );
    }

    #[tokio::test]
    async fn second_start_for_same_user_is_rejected() {
        let driver = driver(3, ChaosConfig::disabled(), fast_policy(4));
        let handle = driver
            .start(applicant(), RunOptions::default())
            .expect("first start");
        assert_eq!(
            driver.start(applicant(), RunOptions::default()).err(),
            Some(StartError::AlreadyRunning("alice@example.com".to_string()))
        );
        let summary = handle.await.expect("join");
        assert_eq!(summary.applied, 3);
        assert!(!driver.is_running("alice@example.com"));
        assert!(driver.start(applicant(), RunOptions::default()).is_ok());
    }

    #[tokio::test]
    async fn clear_queue_emits_empty_queue_update() {
        let driver = driver(2, ChaosConfig::disabled(), fast_policy(4));
        driver
            .run(
                &applicant(),
                RunOptions {
                    max_jobs: 2,
                    auto_apply: false,
                },
            )
            .await;
        let mut rx = driver.hub.attach_local("alice@example.com").await;
        assert_eq!(driver.clear_queue("alice@example.com").await, 2);
        let kinds = drain(&mut rx);
        assert!(matches!(&kinds[0], EventKind::QueueUpdate(payload) if payload.queue.is_empty()));
        assert!(matches!(&kinds[1], EventKind::Log(log) if log.message == "Cleared 2 jobs from queue"));
    }
}
