//! Core job record model, identity rule and region resolution for seekr.

mod identity;
mod region;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use identity::{
    group_records, IdentityRule, KeyColumn, KeySet, RecordGroup, DEFAULT_DESCRIPTION_PREFIX_LEN,
};
pub use region::{RegionKeyword, RegionTable, RegionTableError};

pub const CRATE_NAME: &str = "seekr-core";

/// Manual review verdict. Set by a human, never by dedup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageStatus {
    Yes,
    No,
    /// Extra bucket used by the review UI.
    Gsv,
}

impl TriageStatus {
    pub const ALL: [TriageStatus; 3] = [TriageStatus::Yes, TriageStatus::No, TriageStatus::Gsv];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriageStatus::Yes => "yes",
            TriageStatus::No => "no",
            TriageStatus::Gsv => "gsv",
        }
    }
}

impl fmt::Display for TriageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown triage status '{0}'")]
pub struct UnknownTriageStatus(pub String);

impl FromStr for TriageStatus {
    type Err = UnknownTriageStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" => Ok(TriageStatus::Yes),
            "no" => Ok(TriageStatus::No),
            "gsv" => Ok(TriageStatus::Gsv),
            _ => Err(UnknownTriageStatus(s.to_string())),
        }
    }
}

/// Raw candidate as handed over by a record source (scraper pass, import file).
/// Nothing is validated yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDraft {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub salary: Option<String>,
    #[serde(default)]
    pub date_listed: Option<String>,
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CandidateError {
    #[error("candidate is missing required field `{0}`")]
    MissingField(&'static str),
}

/// A draft whose identity fields are all present and non-blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub url: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub salary: Option<String>,
    pub date_listed: Option<String>,
    pub job_type: Option<String>,
    pub description: Option<String>,
}

impl JobDraft {
    pub fn validate(self) -> Result<Candidate, CandidateError> {
        Ok(Candidate {
            url: required(self.url, "url")?,
            title: required(self.title, "title")?,
            company: required(self.company, "company")?,
            location: required(self.location, "location")?,
            salary: self.salary,
            date_listed: self.date_listed,
            job_type: self.job_type,
            description: self.description,
        })
    }
}

impl TryFrom<JobDraft> for Candidate {
    type Error = CandidateError;

    fn try_from(draft: JobDraft) -> Result<Self, Self::Error> {
        draft.validate()
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, CandidateError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(CandidateError::MissingField(field)),
    }
}

/// Persisted job listing. `id` is assigned by the store and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub region: String,
    pub salary: Option<String>,
    pub date_listed: Option<String>,
    pub job_type: Option<String>,
    pub description: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
    pub triage_status: Option<TriageStatus>,
}

impl JobRecord {
    pub fn description_text(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }
}
