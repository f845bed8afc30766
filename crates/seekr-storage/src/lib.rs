//! Record store seam for seekr: the `JobStore` contract plus SQLite and in-memory backends.

mod memory;
mod sqlite;

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use seekr_core::{Candidate, JobRecord, TriageStatus, UnknownTriageStatus};
use serde::Serialize;
use thiserror::Error;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

pub const CRATE_NAME: &str = "seekr-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("a job with url {0} already exists")]
    DuplicateUrl(String),
    #[error("job {0} not found")]
    NotFound(i64),
    #[error("undecodable value in column {column}: {value:?}")]
    Decode { column: &'static str, value: String },
}

/// Row about to be inserted; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub url: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub region: String,
    pub salary: Option<String>,
    pub date_listed: Option<String>,
    pub job_type: Option<String>,
    pub description: Option<String>,
    pub seen_at: DateTime<Utc>,
}

impl NewJob {
    pub fn from_candidate(candidate: Candidate, region: impl Into<String>, seen_at: DateTime<Utc>) -> Self {
        Self {
            url: candidate.url,
            title: candidate.title,
            company: candidate.company,
            location: candidate.location,
            region: region.into(),
            salary: candidate.salary,
            date_listed: candidate.date_listed,
            job_type: candidate.job_type,
            description: candidate.description,
            seen_at,
        }
    }

    pub(crate) fn into_record(self, id: i64) -> JobRecord {
        JobRecord {
            id,
            url: self.url,
            title: self.title,
            company: self.company,
            location: self.location,
            region: self.region,
            salary: self.salary,
            date_listed: self.date_listed,
            job_type: self.job_type,
            description: self.description,
            first_seen: self.seen_at,
            last_seen: self.seen_at,
            is_active: true,
            triage_status: None,
        }
    }
}

/// Point lookups, single-row writes and full scans over the `jobs` table.
///
/// Every method is one statement; callers get no atomicity across calls.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn find_by_url(&self, url: &str) -> Result<Option<JobRecord>, StoreError>;

    async fn find_by_listing(
        &self,
        title: &str,
        company: &str,
        location: &str,
    ) -> Result<Vec<JobRecord>, StoreError>;

    async fn insert(&self, job: NewJob) -> Result<JobRecord, StoreError>;

    /// Bump `last_seen` and re-activate.
    async fn mark_seen(&self, id: i64, seen_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// `mark_seen` plus a description replacement.
    async fn backfill_description(
        &self,
        id: i64,
        description: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn set_region(&self, id: i64, region: &str) -> Result<(), StoreError>;

    async fn set_triage(&self, id: i64, status: Option<TriageStatus>) -> Result<(), StoreError>;

    /// Returns false when the row was already gone.
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;

    async fn all(&self) -> Result<Vec<JobRecord>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TriageFilter {
    #[default]
    All,
    Unreviewed,
    Status(TriageStatus),
}

impl FromStr for TriageFilter {
    type Err = UnknownTriageStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(TriageFilter::All),
            "unreviewed" | "untagged" => Ok(TriageFilter::Unreviewed),
            other => other.parse().map(TriageFilter::Status),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    FirstSeen,
    DateListed,
}

/// Browse filters; every set field narrows the result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobQuery {
    /// Case-insensitive substring of title, company or description.
    pub search: Option<String>,
    pub region: Option<String>,
    /// Case-insensitive substring of job type.
    pub job_type: Option<String>,
    pub triage: TriageFilter,
    pub first_seen_since: Option<DateTime<Utc>>,
    pub sort: SortKey,
    pub limit: Option<u32>,
    pub offset: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub total: u64,
    pub new_today: u64,
    pub new_this_week: u64,
    pub triage_yes: u64,
    pub triage_no: u64,
    pub triage_gsv: u64,
    pub unreviewed: u64,
    pub top_companies: Vec<(String, u64)>,
    pub top_locations: Vec<(String, u64)>,
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Accepts RFC 3339 as written by this crate, plus the naive forms older
/// tooling wrote (ISO with `T` or SQLite's `YYYY-MM-DD HH:MM:SS`), read as UTC.
pub fn parse_timestamp(column: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| StoreError::Decode {
            column,
            value: raw.to_string(),
        })
}

pub(crate) fn parse_triage(raw: Option<String>) -> Result<Option<TriageStatus>, StoreError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| StoreError::Decode {
            column: "triage_status",
            value: value.to_string(),
        }),
    }
}
