//! Candidate ingest (online upsert) and duplicate sweep orchestration for seekr.

mod audit;
mod backfill;
mod report;
mod sweep;

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use seekr_core::{Candidate, CandidateError, IdentityRule, JobDraft, RegionTable, DEFAULT_DESCRIPTION_PREFIX_LEN};
use seekr_storage::{JobStore, NewJob, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use audit::{audit, audit_records, AuditReport, GroupSummary, ListingVariant};
pub use backfill::{backfill_regions, RegionBackfillSummary};
pub use report::{render_sweep_summary, write_sweep_report};
pub use sweep::{
    commit, find_duplicate_groups, plan, plan_sweep, resolve, JobRef, SweepFailure, SweepGroup,
    SweepOutcome, SweepPlan,
};

pub const CRATE_NAME: &str = "seekr-sync";

/// Stored descriptions shorter than this (in characters) are treated as snippets.
pub const MIN_COMPLETE_DESCRIPTION_LEN: usize = 500;

const DESCRIPTION_UNAVAILABLE: &str = "Description not available";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub regions_path: PathBuf,
    pub description_prefix_len: usize,
    pub backfill_descriptions: bool,
    pub reports_dir: PathBuf,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://jobs.db".to_string()),
            regions_path: lookup("SEEKR_REGIONS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("rules/regions.yaml")),
            description_prefix_len: lookup("SEEKR_DESCRIPTION_PREFIX_LEN")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_DESCRIPTION_PREFIX_LEN),
            backfill_descriptions: lookup("SEEKR_BACKFILL_DESCRIPTIONS")
                .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            reports_dir: lookup("SEEKR_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("reports")),
        }
    }

    pub fn identity_rule(&self) -> IdentityRule {
        IdentityRule::new(self.description_prefix_len)
    }

    pub fn description_backfill(&self) -> DescriptionBackfill {
        if self.backfill_descriptions {
            DescriptionBackfill::enrich()
        } else {
            DescriptionBackfill::Off
        }
    }

    /// Reads `regions_path`; falls back to the builtin table when the file does not exist.
    pub fn load_region_table(&self) -> anyhow::Result<RegionTable> {
        if self.regions_path.exists() {
            RegionTable::load(&self.regions_path)
                .with_context(|| format!("loading {}", self.regions_path.display()))
        } else {
            warn!(path = %self.regions_path.display(), "region table not found, using builtin table");
            RegionTable::builtin().context("loading builtin region table")
        }
    }
}

/// Whether a URL re-observation may replace the stored description.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DescriptionBackfill {
    /// Only `last_seen` and `is_active` change.
    #[default]
    Off,
    /// Replace a stored snippet with a strictly longer incoming description.
    Enrich { min_complete_len: usize },
}

impl DescriptionBackfill {
    pub fn enrich() -> Self {
        DescriptionBackfill::Enrich {
            min_complete_len: MIN_COMPLETE_DESCRIPTION_LEN,
        }
    }

    /// The incoming description, if it should overwrite `stored`.
    pub fn replacement<'a>(&self, stored: Option<&str>, incoming: Option<&'a str>) -> Option<&'a str> {
        let DescriptionBackfill::Enrich { min_complete_len } = *self else {
            return None;
        };
        let incoming = incoming?;
        let stored = stored.unwrap_or_default();
        let stored_len = stored.chars().count();
        let needs_backfill = stored_len < min_complete_len
            || stored.ends_with("...")
            || stored.ends_with('…')
            || stored.contains(DESCRIPTION_UNAVAILABLE);
        (needs_backfill && incoming.chars().count() > stored_len).then_some(incoming)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Url,
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted {
        id: i64,
    },
    Updated {
        id: i64,
        matched_by: MatchKind,
        description_backfilled: bool,
    },
}

impl UpsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            UpsertOutcome::Inserted { id } | UpsertOutcome::Updated { id, .. } => *id,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted { .. })
    }
}

#[derive(Debug, Error)]
pub enum UpsertError {
    #[error("rejected candidate: {0}")]
    Invalid(#[from] CandidateError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub index: usize,
    pub url: Option<String>,
    pub rejected: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub candidates: usize,
    pub inserted: usize,
    pub updated: usize,
    pub rejected: usize,
    pub failed: usize,
    pub failures: Vec<IngestFailure>,
}

/// Merges incoming candidates into a [`JobStore`].
pub struct JobSync<S> {
    store: S,
    regions: RegionTable,
    rule: IdentityRule,
    backfill: DescriptionBackfill,
}

impl<S: JobStore> JobSync<S> {
    pub fn new(store: S, regions: RegionTable) -> Self {
        Self {
            store,
            regions,
            rule: IdentityRule::default(),
            backfill: DescriptionBackfill::Off,
        }
    }

    pub fn from_config(store: S, config: &SyncConfig) -> anyhow::Result<Self> {
        Ok(Self::new(store, config.load_region_table()?)
            .with_identity_rule(config.identity_rule())
            .with_description_backfill(config.description_backfill()))
    }

    pub fn with_identity_rule(mut self, rule: IdentityRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn with_description_backfill(mut self, backfill: DescriptionBackfill) -> Self {
        self.backfill = backfill;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn regions(&self) -> &RegionTable {
        &self.regions
    }

    pub fn identity_rule(&self) -> &IdentityRule {
        &self.rule
    }

    pub async fn upsert(&self, draft: JobDraft) -> Result<UpsertOutcome, UpsertError> {
        self.upsert_at(draft, Utc::now()).await
    }

    pub async fn upsert_at(&self, draft: JobDraft, now: DateTime<Utc>) -> Result<UpsertOutcome, UpsertError> {
        let candidate = draft.validate()?;
        self.upsert_candidate(candidate, now).await
    }

    /// URL match, then content match against rows with the same title, company
    /// and location, then insert. Performs at most one write and never deletes.
    pub async fn upsert_candidate(
        &self,
        candidate: Candidate,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, UpsertError> {
        if let Some(existing) = self.store.find_by_url(&candidate.url).await? {
            let replacement = self
                .backfill
                .replacement(existing.description.as_deref(), candidate.description.as_deref());
            match replacement {
                Some(description) => {
                    self.store
                        .backfill_description(existing.id, description, now)
                        .await?;
                    info!(
                        id = existing.id,
                        chars = description.chars().count(),
                        "backfilled description"
                    );
                }
                None => {
                    self.store.mark_seen(existing.id, now).await?;
                    debug!(id = existing.id, title = %candidate.title, "updated existing job");
                }
            }
            return Ok(UpsertOutcome::Updated {
                id: existing.id,
                matched_by: MatchKind::Url,
                description_backfilled: replacement.is_some(),
            });
        }

        let same_listing = self
            .store
            .find_by_listing(&candidate.title, &candidate.company, &candidate.location)
            .await?;
        let matched = same_listing
            .iter()
            .filter(|record| self.rule.same_content(&candidate, record))
            .min_by(|a, b| a.first_seen.cmp(&b.first_seen).then(a.id.cmp(&b.id)));
        if let Some(existing) = matched {
            info!(
                id = existing.id,
                title = %candidate.title,
                company = %candidate.company,
                existing_url = %existing.url,
                new_url = %candidate.url,
                "duplicate job detected under a different url"
            );
            self.store.mark_seen(existing.id, now).await?;
            return Ok(UpsertOutcome::Updated {
                id: existing.id,
                matched_by: MatchKind::Content,
                description_backfilled: false,
            });
        }

        let region = self.regions.region_for(&candidate.location).to_string();
        let record = self
            .store
            .insert(NewJob::from_candidate(candidate, region, now))
            .await?;
        debug!(id = record.id, region = %record.region, "inserted new job");
        Ok(UpsertOutcome::Inserted { id: record.id })
    }

    /// Upserts every draft in order. A rejected or failed draft is logged and
    /// counted; it never stops the batch.
    pub async fn ingest(&self, drafts: impl IntoIterator<Item = JobDraft>) -> IngestSummary {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest", %run_id);
        self.ingest_inner(run_id, drafts.into_iter().collect())
            .instrument(span)
            .await
    }

    async fn ingest_inner(&self, run_id: Uuid, drafts: Vec<JobDraft>) -> IngestSummary {
        let started_at = Utc::now();
        let mut summary = IngestSummary {
            run_id,
            started_at,
            finished_at: started_at,
            candidates: drafts.len(),
            inserted: 0,
            updated: 0,
            rejected: 0,
            failed: 0,
            failures: Vec::new(),
        };

        for (index, draft) in drafts.into_iter().enumerate() {
            let url = draft.url.clone();
            match self.upsert(draft).await {
                Ok(UpsertOutcome::Inserted { .. }) => summary.inserted += 1,
                Ok(UpsertOutcome::Updated { .. }) => summary.updated += 1,
                Err(err) => {
                    let rejected = matches!(err, UpsertError::Invalid(_));
                    if rejected {
                        summary.rejected += 1;
                    } else {
                        summary.failed += 1;
                    }
                    warn!(index, url = url.as_deref().unwrap_or("<none>"), error = %err, "skipping candidate");
                    summary.failures.push(IngestFailure {
                        index,
                        url,
                        rejected,
                        reason: err.to_string(),
                    });
                }
            }
        }

        summary.finished_at = Utc::now();
        info!(
            candidates = summary.candidates,
            inserted = summary.inserted,
            updated = summary.updated,
            rejected = summary.rejected,
            failed = summary.failed,
            "ingest complete"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use seekr_storage::MemoryJobStore;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).single().unwrap()
    }

    fn sync() -> JobSync<MemoryJobStore> {
        JobSync::new(MemoryJobStore::new(), RegionTable::builtin().unwrap())
    }

    fn draft(url: &str, location: &str, description: &str) -> JobDraft {
        JobDraft {
            url: Some(url.into()),
            title: Some("Backend Engineer".into()),
            company: Some("Acme".into()),
            location: Some(location.into()),
            description: Some(description.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn repeated_upsert_updates_the_same_row() {
        let sync = sync();
        let first = sync.upsert_at(draft("a", "Auckland", "We need..."), t0()).await.unwrap();
        assert!(first.is_inserted());

        let later = t0() + Duration::hours(6);
        let second = sync.upsert_at(draft("a", "Auckland", "We need..."), later).await.unwrap();
        assert_eq!(
            second,
            UpsertOutcome::Updated {
                id: first.id(),
                matched_by: MatchKind::Url,
                description_backfilled: false
            }
        );

        let stored = sync.store().get(first.id()).await.unwrap();
        assert_eq!(stored.first_seen, t0());
        assert_eq!(stored.last_seen, later);
        assert_eq!(sync.store().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn renamed_url_with_same_content_updates_existing_row() {
        let sync = sync();
        let first = sync.upsert_at(draft("a", "Auckland", "We need..."), t0()).await.unwrap();
        let second = sync
            .upsert_at(draft("b", "Auckland", "We need..."), t0() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(second.id(), first.id());
        assert!(matches!(
            second,
            UpsertOutcome::Updated { matched_by: MatchKind::Content, .. }
        ));
        let stored = sync.store().get(first.id()).await.unwrap();
        assert_eq!(stored.url, "a");
        assert_eq!(sync.store().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn only_the_description_prefix_is_compared() {
        let sync = sync().with_identity_rule(IdentityRule::new(9));
        sync.upsert_at(draft("a", "Auckland", "We need... a Rust dev"), t0()).await.unwrap();
        let outcome = sync
            .upsert_at(draft("b", "Auckland", "We need... someone"), t0())
            .await
            .unwrap();
        assert!(!outcome.is_inserted());
    }

    #[tokio::test]
    async fn different_location_is_inserted_separately() {
        let sync = sync();
        sync.upsert_at(draft("a", "Auckland", "We need..."), t0()).await.unwrap();
        let outcome = sync.upsert_at(draft("b", "Wellington", "We need..."), t0()).await.unwrap();
        assert!(outcome.is_inserted());
        assert_eq!(sync.store().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn cafe_scenario_assigns_region_and_merges_second_url() {
        let sync = sync();
        let cook = |url: &str| JobDraft {
            url: Some(url.into()),
            title: Some("Cook".into()),
            company: Some("Cafe X".into()),
            location: Some("Wellington".into()),
            description: Some("Busy cafe seeking...".into()),
            ..Default::default()
        };
        let first = sync.upsert_at(cook("a"), t0()).await.unwrap();
        assert!(first.is_inserted());
        assert_eq!(sync.store().get(first.id()).await.unwrap().region, "Wellington");

        let second = sync.upsert_at(cook("b"), t0() + Duration::minutes(5)).await.unwrap();
        assert_eq!(second.id(), first.id());
        assert!(!second.is_inserted());
        assert_eq!(sync.store().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn content_match_prefers_the_oldest_row() {
        let older = t0() - Duration::days(2);
        let mut seeded = Vec::new();
        for (id, url, seen) in [(5, "x", t0()), (9, "y", older)] {
            seeded.push(seekr_core::JobRecord {
                id,
                url: url.into(),
                title: "Backend Engineer".into(),
                company: "Acme".into(),
                location: "Auckland".into(),
                region: "Auckland".into(),
                salary: None,
                date_listed: None,
                job_type: None,
                description: Some("We need...".into()),
                first_seen: seen,
                last_seen: seen,
                is_active: true,
                triage_status: None,
            });
        }
        let sync = JobSync::new(
            MemoryJobStore::with_records(seeded),
            RegionTable::builtin().unwrap(),
        );
        let outcome = sync.upsert_at(draft("z", "Auckland", "We need..."), t0()).await.unwrap();
        assert_eq!(outcome.id(), 9);
    }

    #[tokio::test]
    async fn candidates_missing_identity_fields_are_not_written() {
        let sync = sync();
        let mut bad = draft("a", "Auckland", "x");
        bad.title = None;
        let err = sync.upsert_at(bad, t0()).await.unwrap_err();
        assert!(matches!(err, UpsertError::Invalid(CandidateError::MissingField("title"))));
        assert_eq!(sync.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn backfill_replaces_snippets_only_when_enabled() {
        let full = "Full body ".repeat(80);
        let plain = sync();
        plain.upsert_at(draft("a", "Auckland", "Short snippet..."), t0()).await.unwrap();
        let outcome = plain.upsert_at(draft("a", "Auckland", &full), t0()).await.unwrap();
        assert!(matches!(
            outcome,
            UpsertOutcome::Updated { description_backfilled: false, .. }
        ));

        let enriching = sync().with_description_backfill(DescriptionBackfill::enrich());
        let first = enriching
            .upsert_at(draft("a", "Auckland", "Short snippet..."), t0())
            .await
            .unwrap();
        let outcome = enriching.upsert_at(draft("a", "Auckland", &full), t0()).await.unwrap();
        assert!(matches!(
            outcome,
            UpsertOutcome::Updated { description_backfilled: true, .. }
        ));
        assert_eq!(
            enriching.store().get(first.id()).await.unwrap().description.as_deref(),
            Some(full.as_str())
        );
    }

    #[test]
    fn backfill_rules() {
        let policy = DescriptionBackfill::enrich();
        let long_stored = "x".repeat(600);
        let longer = "y".repeat(700);
        assert_eq!(policy.replacement(Some("abc"), Some("abcd")), Some("abcd"));
        assert_eq!(policy.replacement(Some("abcdef"), Some("abc")), None);
        assert_eq!(policy.replacement(Some(&long_stored), Some(&longer)), None);
        let truncated = format!("{long_stored}...");
        assert_eq!(policy.replacement(Some(&truncated), Some(&longer)), Some(longer.as_str()));
        assert_eq!(policy.replacement(None, Some("anything")), Some("anything"));
        assert_eq!(policy.replacement(Some("abc"), None), None);
        assert_eq!(DescriptionBackfill::Off.replacement(Some("abc"), Some("abcd")), None);
    }

    #[test]
    fn config_defaults_and_overrides() {
        let defaults = SyncConfig::from_lookup(|_| None);
        assert_eq!(defaults.database_url, "sqlite://jobs.db");
        assert_eq!(defaults.identity_rule(), IdentityRule::new(200));
        assert_eq!(defaults.description_backfill(), DescriptionBackfill::Off);

        let custom = SyncConfig::from_lookup(|key| match key {
            "SEEKR_DESCRIPTION_PREFIX_LEN" => Some("120".into()),
            "SEEKR_BACKFILL_DESCRIPTIONS" => Some("true".into()),
            "SEEKR_REGIONS_PATH" => Some("/nonexistent/regions.yaml".into()),
            _ => None,
        });
        assert_eq!(custom.identity_rule().description_prefix_len, 120);
        assert_eq!(custom.description_backfill(), DescriptionBackfill::enrich());
        let table = custom.load_region_table().unwrap();
        assert_eq!(table.fallback(), "Other NZ");

        let garbage = SyncConfig::from_lookup(|key| {
            (key == "SEEKR_DESCRIPTION_PREFIX_LEN").then(|| "lots".to_string())
        });
        assert_eq!(garbage.description_prefix_len, DEFAULT_DESCRIPTION_PREFIX_LEN);
    }
}
