use crate::chaos::FaultInjector;
use autoapply_core::{
    submission::SubmitError, ApplicationRecord, ApplicationRequest, AppliedJob, Job, Receipt,
};
use autoapply_storage::{AppliedFilter, InsertOutcome, PortalStore, StorageError};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

pub type SharedStore = Arc<Mutex<PortalStore>>;

/// The submission path plus the read-only catalog queries that share its store.
#[derive(Clone)]
pub struct SubmissionService {
    store: SharedStore,
    injector: Arc<FaultInjector>,
}

impl SubmissionService {
    pub fn new(store: SharedStore, injector: Arc<FaultInjector>) -> Self {
        Self { store, injector }
    }

    pub fn injector(&self) -> &Arc<FaultInjector> {
        &self.injector
    }

    /// Raw-body entry point: the fault gate runs before the body is even parsed.
    pub fn submit_raw(&self, body: &[u8]) -> Result<Receipt, SubmitError> {
        self.gate()?;
        let request: ApplicationRequest = if body.iter().all(u8::is_ascii_whitespace) {
            ApplicationRequest::default()
        } else {
            serde_json::from_slice(body).map_err(|err| SubmitError::Malformed(err.to_string()))?
        };
        self.accept(request)
    }

    pub fn submit(&self, request: ApplicationRequest) -> Result<Receipt, SubmitError> {
        self.gate()?;
        self.accept(request)
    }

    fn gate(&self) -> Result<(), SubmitError> {
        if let Some(fault) = self.injector.evaluate() {
            warn!(
                event = "chaos_injected",
                status = fault.http_status,
                retry_after = fault.suggested_retry_delay
            );
            return Err(SubmitError::Injected { fault });
        }
        Ok(())
    }

    fn accept(&self, request: ApplicationRequest) -> Result<Receipt, SubmitError> {
        let application = request
            .validate()
            .map_err(|missing| SubmitError::Validation { missing })?;

        // Lookup, duplicate check and insert happen under one lock; the unique
        // key in storage still arbitrates if anything else writes the table.
        let store = self.lock_store()?;
        let job = store
            .job(&application.job_id)
            .map_err(unexpected)?
            .ok_or_else(|| SubmitError::JobNotFound {
                job_id: application.job_id.clone(),
            })?;

        if let Some(application_id) = store
            .find_application(&application.job_id, &application.applicant_name)
            .map_err(unexpected)?
        {
            info!(
                event = "application_duplicate",
                application_id = %application_id,
                job_id = %application.job_id
            );
            return Err(SubmitError::Conflict { application_id });
        }

        let record = ApplicationRecord::new_agent(application, Utc::now());
        match store.insert_application(&record).map_err(unexpected)? {
            InsertOutcome::Created(record) => {
                info!(
                    event = "application_created",
                    application_id = %record.application_id,
                    job_id = %record.job_id,
                    applicant = %record.applicant_name
                );
                Ok(Receipt::for_record(&record, &job))
            }
            InsertOutcome::Duplicate { application_id } => {
                Err(SubmitError::Conflict { application_id })
            }
        }
    }

    pub fn jobs(&self) -> Result<Vec<Job>, SubmitError> {
        self.lock_store()?.list_jobs().map_err(unexpected)
    }

    pub fn job(&self, job_id: &str) -> Result<Option<Job>, SubmitError> {
        self.lock_store()?.job(job_id).map_err(unexpected)
    }

    pub fn applied(&self, filter: &AppliedFilter) -> Result<Vec<AppliedJob>, SubmitError> {
        self.lock_store()?.list_applied(filter).map_err(unexpected)
    }

    pub fn replace_catalog(&self, jobs: &[Job]) -> Result<usize, SubmitError> {
        self.lock_store()?.replace_catalog(jobs).map_err(unexpected)
    }

    pub fn job_count(&self) -> Result<i64, SubmitError> {
        self.lock_store()?.job_count().map_err(unexpected)
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, PortalStore>, SubmitError> {
        self.store
            .lock()
            .map_err(|_| SubmitError::Unexpected("store lock poisoned".to_string()))
    }
}

fn unexpected(err: StorageError) -> SubmitError {
    warn!(event = "storage_error", error = %err);
    SubmitError::Unexpected(err.to_string())
}
