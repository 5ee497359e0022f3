use autoapply_core::{
    AppliedJob, ApplicationRecord, ApplicationSource, ApplicationStatus, Job,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

pub const PORTAL_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// Result of inserting under the `(job_id, applicant_name)` unique key.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Created(ApplicationRecord),
    Duplicate { application_id: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedFilter {
    pub applicant_name: Option<String>,
    pub applicant_email: Option<String>,
    pub status: Option<ApplicationStatus>,
}

pub struct PortalStore {
    conn: Connection,
}

impl PortalStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let current = self.schema_version()?;
        if current > PORTAL_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: PORTAL_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_portal_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    pub fn insert_job(&self, job: &Job) -> Result<(), StorageError> {
        upsert_job(&self.conn, job)
    }

    /// Drops every application and job, then loads `jobs` in one transaction.
    pub fn replace_catalog(&mut self, jobs: &[Job]) -> Result<usize, StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM applications", [])?;
        tx.execute("DELETE FROM jobs", [])?;
        for job in jobs {
            upsert_job(&tx, job)?;
        }
        tx.commit()?;
        Ok(jobs.len())
    }

    pub fn job_count(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?)
    }

    pub fn job(&self, job_id: &str) -> Result<Option<Job>, StorageError> {
        let raw = self
            .conn
            .query_row(
                "
                SELECT job_id, title, company, location, job_type, salary, description,
                       required_skills_json, visa_sponsorship, created_at
                FROM jobs
                WHERE job_id = ?1
                ",
                [job_id],
                RawJob::from_row,
            )
            .optional()?;
        raw.map(RawJob::into_job).transpose()
    }

    /// Catalog, newest first.
    pub fn list_jobs(&self) -> Result<Vec<Job>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT job_id, title, company, location, job_type, salary, description,
                   required_skills_json, visa_sponsorship, created_at
            FROM jobs
            ORDER BY created_at DESC, job_id ASC
            ",
        )?;
        let rows = stmt.query_map([], RawJob::from_row)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?.into_job()?);
        }
        Ok(jobs)
    }

    pub fn find_application(
        &self,
        job_id: &str,
        applicant_name: &str,
    ) -> Result<Option<String>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "
                SELECT application_id
                FROM applications
                WHERE job_id = ?1 AND applicant_name = ?2
                ",
                params![job_id, applicant_name],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Inserts unless a record with the same `(job_id, applicant_name)` exists.
    /// The unique constraint decides; the existing record is never touched.
    pub fn insert_application(
        &self,
        record: &ApplicationRecord,
    ) -> Result<InsertOutcome, StorageError> {
        let changes = self.conn.execute(
            "
            INSERT INTO applications (
                application_id,
                job_id,
                applicant_name,
                applicant_email,
                resume_text,
                cover_letter,
                match_score,
                status,
                source,
                submitted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(job_id, applicant_name) DO NOTHING
            ",
            params![
                record.application_id,
                record.job_id,
                record.applicant_name,
                record.applicant_email,
                record.resume_text,
                record.cover_letter,
                record.match_score,
                record.status.as_str(),
                record.source.as_str(),
                record.submitted_at.to_rfc3339(),
            ],
        )?;

        if changes > 0 {
            return Ok(InsertOutcome::Created(record.clone()));
        }
        let existing = self
            .find_application(&record.job_id, &record.applicant_name)?
            .ok_or_else(|| {
                StorageError::InvalidValue(format!(
                    "duplicate application for {} vanished",
                    record.job_id
                ))
            })?;
        Ok(InsertOutcome::Duplicate {
            application_id: existing,
        })
    }

    pub fn application_count(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM applications", [], |row| row.get(0))?)
    }

    /// Applications matching every provided filter, newest first, joined with
    /// their job's title, company and location.
    pub fn list_applied(&self, filter: &AppliedFilter) -> Result<Vec<AppliedJob>, StorageError> {
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(name) = filter.applicant_name.as_ref() {
            values.push(name.clone());
            clauses.push(format!("a.applicant_name = ?{}", values.len()));
        }
        if let Some(email) = filter.applicant_email.as_ref() {
            values.push(email.clone());
            clauses.push(format!("a.applicant_email = ?{}", values.len()));
        }
        if let Some(status) = filter.status {
            values.push(status.as_str().to_string());
            clauses.push(format!("a.status = ?{}", values.len()));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "
            SELECT a.application_id, a.job_id, a.applicant_name, a.applicant_email,
                   a.resume_text, a.cover_letter, a.match_score, a.status, a.source,
                   a.submitted_at, j.title, j.company, j.location
            FROM applications a
            JOIN jobs j ON j.job_id = a.job_id
            {where_sql}
            ORDER BY a.submitted_at DESC, a.application_id ASC
            "
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok((
                RawApplication {
                    application_id: row.get(0)?,
                    job_id: row.get(1)?,
                    applicant_name: row.get(2)?,
                    applicant_email: row.get(3)?,
                    resume_text: row.get(4)?,
                    cover_letter: row.get(5)?,
                    match_score: row.get(6)?,
                    status: row.get(7)?,
                    source: row.get(8)?,
                    submitted_at: row.get(9)?,
                },
                row.get::<_, String>(10)?,
                row.get::<_, String>(11)?,
                row.get::<_, String>(12)?,
            ))
        })?;

        let mut applied = Vec::new();
        for row in rows {
            let (raw, job_title, company, location) = row?;
            applied.push(AppliedJob {
                record: raw.into_record()?,
                job_title,
                company,
                location,
            });
        }
        Ok(applied)
    }
}

fn upsert_job(conn: &Connection, job: &Job) -> Result<(), StorageError> {
    let skills_json = serde_json::to_string(&job.required_skills)
        .map_err(|err| StorageError::Serialization(err.to_string()))?;
    conn.execute(
        "
        INSERT INTO jobs (
            job_id,
            title,
            company,
            location,
            job_type,
            salary,
            description,
            required_skills_json,
            visa_sponsorship,
            created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(job_id) DO UPDATE SET
            title=excluded.title,
            company=excluded.company,
            location=excluded.location,
            job_type=excluded.job_type,
            salary=excluded.salary,
            description=excluded.description,
            required_skills_json=excluded.required_skills_json,
            visa_sponsorship=excluded.visa_sponsorship
        ",
        params![
            job.job_id,
            job.title,
            job.company,
            job.location,
            job.job_type,
            job.salary,
            job.description,
            skills_json,
            job.visa_sponsorship,
            job.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

struct RawJob {
    job_id: String,
    title: String,
    company: String,
    location: String,
    job_type: String,
    salary: String,
    description: String,
    required_skills_json: String,
    visa_sponsorship: bool,
    created_at: String,
}

impl RawJob {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get(0)?,
            title: row.get(1)?,
            company: row.get(2)?,
            location: row.get(3)?,
            job_type: row.get(4)?,
            salary: row.get(5)?,
            description: row.get(6)?,
            required_skills_json: row.get(7)?,
            visa_sponsorship: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_job(self) -> Result<Job, StorageError> {
        let required_skills = serde_json::from_str(&self.required_skills_json)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        Ok(Job {
            job_id: self.job_id,
            title: self.title,
            company: self.company,
            location: self.location,
            job_type: self.job_type,
            salary: self.salary,
            description: self.description,
            required_skills,
            visa_sponsorship: self.visa_sponsorship,
            created_at: parse_timestamp(self.created_at)?,
        })
    }
}

struct RawApplication {
    application_id: String,
    job_id: String,
    applicant_name: String,
    applicant_email: Option<String>,
    resume_text: Option<String>,
    cover_letter: String,
    match_score: Option<f64>,
    status: String,
    source: String,
    submitted_at: String,
}

impl RawApplication {
    fn into_record(self) -> Result<ApplicationRecord, StorageError> {
        let status = self
            .status
            .parse::<ApplicationStatus>()
            .map_err(StorageError::InvalidValue)?;
        let source = self
            .source
            .parse::<ApplicationSource>()
            .map_err(StorageError::InvalidValue)?;
        Ok(ApplicationRecord {
            application_id: self.application_id,
            job_id: self.job_id,
            applicant_name: self.applicant_name,
            applicant_email: self.applicant_email,
            resume_text: self.resume_text,
            cover_letter: self.cover_letter,
            match_score: self.match_score,
            status,
            source,
            submitted_at: parse_timestamp(self.submitted_at)?,
        })
    }
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}
