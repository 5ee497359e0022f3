use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod env;
pub mod logging;
pub mod retry;
pub mod stream_event;
pub mod submission;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub title: String,
    pub company: String,
    pub location: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub salary: String,
    pub description: String,
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(default)]
    pub visa_sponsorship: bool,
    pub created_at: DateTime<Utc>,
}

/// Inbound submission payload. Every field is optional at the wire level so a
/// missing field is reported as a validation error instead of a decode error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRequest {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub applicant_name: Option<String>,
    #[serde(default)]
    pub applicant_email: Option<String>,
    #[serde(default)]
    pub resume_text: Option<String>,
    #[serde(default)]
    pub cover_letter: Option<String>,
    #[serde(default)]
    pub match_score: Option<f64>,
}

impl ApplicationRequest {
    pub const REQUIRED_FIELDS: [&'static str; 3] = ["jobId", "applicantName", "coverLetter"];
    pub const OPTIONAL_FIELDS: [&'static str; 3] = ["applicantEmail", "resumeText", "matchScore"];

    /// Names of required fields that are absent or blank, in declaration order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let present = [
            non_blank(&self.job_id),
            non_blank(&self.applicant_name),
            non_blank(&self.cover_letter),
        ];
        Self::REQUIRED_FIELDS
            .iter()
            .zip(present)
            .filter_map(|(name, ok)| (!ok).then_some(*name))
            .collect()
    }

    pub fn validate(self) -> Result<ValidApplication, Vec<&'static str>> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(missing);
        }
        Ok(ValidApplication {
            job_id: self.job_id.unwrap_or_default().trim().to_string(),
            applicant_name: self.applicant_name.unwrap_or_default().trim().to_string(),
            applicant_email: self.applicant_email.filter(|value| !value.trim().is_empty()),
            resume_text: self.resume_text.filter(|value| !value.trim().is_empty()),
            cover_letter: self.cover_letter.unwrap_or_default(),
            match_score: self.match_score,
        })
    }
}

fn non_blank(value: &Option<String>) -> bool {
    value
        .as_deref()
        .map(|inner| !inner.trim().is_empty())
        .unwrap_or(false)
}

/// An application whose required fields are known to be present.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidApplication {
    pub job_id: String,
    pub applicant_name: String,
    pub applicant_email: Option<String>,
    pub resume_text: Option<String>,
    pub cover_letter: String,
    pub match_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Reviewed,
    Accepted,
    Rejected,
}

impl Default for ApplicationStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Reviewed => "reviewed",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "pending" => Ok(ApplicationStatus::Pending),
            "reviewed" => Ok(ApplicationStatus::Reviewed),
            "accepted" => Ok(ApplicationStatus::Accepted),
            "rejected" => Ok(ApplicationStatus::Rejected),
            other => Err(format!("Unknown application status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationSource {
    Manual,
    Agent,
}

impl ApplicationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationSource::Manual => "manual",
            ApplicationSource::Agent => "agent",
        }
    }
}

impl fmt::Display for ApplicationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationSource {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "manual" => Ok(ApplicationSource::Manual),
            "agent" => Ok(ApplicationSource::Agent),
            other => Err(format!("Unknown application source: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRecord {
    pub application_id: String,
    pub job_id: String,
    pub applicant_name: String,
    #[serde(default)]
    pub applicant_email: Option<String>,
    #[serde(default)]
    pub resume_text: Option<String>,
    pub cover_letter: String,
    #[serde(default)]
    pub match_score: Option<f64>,
    pub status: ApplicationStatus,
    pub source: ApplicationSource,
    pub submitted_at: DateTime<Utc>,
}

impl ApplicationRecord {
    /// Fresh agent-sourced record with a newly assigned id.
    pub fn new_agent(application: ValidApplication, submitted_at: DateTime<Utc>) -> Self {
        Self {
            application_id: uuid::Uuid::new_v4().to_string(),
            job_id: application.job_id,
            applicant_name: application.applicant_name,
            applicant_email: application.applicant_email,
            resume_text: application.resume_text,
            cover_letter: application.cover_letter,
            match_score: application.match_score,
            status: ApplicationStatus::Pending,
            source: ApplicationSource::Agent,
            submitted_at,
        }
    }
}

/// Record joined with the job fields the listing endpoint denormalises.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppliedJob {
    #[serde(flatten)]
    pub record: ApplicationRecord,
    pub job_title: String,
    pub company: String,
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub application_id: String,
    pub job_id: String,
    pub job_title: String,
    pub company: String,
    pub applicant_name: String,
    pub submitted_at: DateTime<Utc>,
    pub status: ApplicationStatus,
    pub source: ApplicationSource,
    #[serde(default)]
    pub match_score: Option<f64>,
}

impl Receipt {
    pub fn for_record(record: &ApplicationRecord, job: &Job) -> Self {
        Self {
            application_id: record.application_id.clone(),
            job_id: record.job_id.clone(),
            job_title: job.title.clone(),
            company: job.company.clone(),
            applicant_name: record.applicant_name.clone(),
            submitted_at: record.submitted_at,
            status: record.status,
            source: record.source,
            match_score: record.match_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_treats_blank_as_missing() {
        let request = ApplicationRequest {
            job_id: Some("J1".to_string()),
            applicant_name: Some("   ".to_string()),
            cover_letter: None,
            ..ApplicationRequest::default()
        };
        assert_eq!(request.missing_fields(), vec!["applicantName", "coverLetter"]);
    }

    #[test]
    fn validate_trims_identity_fields() {
        let request: ApplicationRequest = serde_json::from_str(
            r#"{"jobId":" J1 ","applicantName":"Alice ","coverLetter":"hello","applicantEmail":""}"#,
        )
        .expect("parse request");
        let valid = request.validate().expect("valid");
        assert_eq!(valid.job_id, "J1");
        assert_eq!(valid.applicant_name, "Alice");
        assert_eq!(valid.applicant_email, None);
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!(
            "Reviewed".parse::<ApplicationStatus>(),
            Ok(ApplicationStatus::Reviewed)
        );
        assert!("shipped".parse::<ApplicationStatus>().is_err());
    }

    #[test]
    fn applied_job_flattens_record_fields() {
        let record = ApplicationRecord {
            application_id: "app-1".to_string(),
            job_id: "J1".to_string(),
            applicant_name: "Alice".to_string(),
            applicant_email: None,
            resume_text: None,
            cover_letter: "hi".to_string(),
            match_score: Some(88.5),
            status: ApplicationStatus::Pending,
            source: ApplicationSource::Agent,
            submitted_at: "2026-02-07T21:00:00Z".parse().expect("ts"),
        };
        let row = AppliedJob {
            record,
            job_title: "Data Engineer".to_string(),
            company: "Stripe".to_string(),
            location: "Remote".to_string(),
        };
        let value = serde_json::to_value(&row).expect("serialize");
        assert_eq!(value["applicationId"], "app-1");
        assert_eq!(value["jobTitle"], "Data Engineer");
        assert_eq!(value["source"], "agent");
    }
}
