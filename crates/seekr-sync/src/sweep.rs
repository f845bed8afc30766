use chrono::{DateTime, Utc};
use seekr_core::{group_records, IdentityRule, JobRecord, KeySet, RecordGroup, TriageStatus};
use seekr_storage::{JobStore, StoreError};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRef {
    pub id: i64,
    pub url: String,
    pub first_seen: DateTime<Utc>,
    pub triage_status: Option<TriageStatus>,
}

impl From<&JobRecord> for JobRef {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id,
            url: record.url.clone(),
            first_seen: record.first_seen,
            triage_status: record.triage_status,
        }
    }
}

/// One identity group: the row that survives and the rows that go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepGroup {
    pub title: String,
    pub company: String,
    pub location: String,
    pub keeper: JobRef,
    pub removals: Vec<JobRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepPlan {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub rule: IdentityRule,
    pub groups: Vec<SweepGroup>,
}

impl SweepPlan {
    pub fn planned_removals(&self) -> usize {
        self.groups.iter().map(|g| g.removals.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn removal_ids(&self) -> Vec<i64> {
        self.groups
            .iter()
            .flat_map(|g| g.removals.iter().map(|r| r.id))
            .collect()
    }

    pub fn keeper_ids(&self) -> Vec<i64> {
        self.groups.iter().map(|g| g.keeper.id).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepOutcome {
    pub dry_run: bool,
    pub planned: usize,
    pub removed: usize,
    /// Rows in the plan that no longer existed at delete time.
    pub already_gone: usize,
    pub failures: Vec<SweepFailure>,
}

impl SweepOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Identity groups with more than one member, largest first.
pub async fn find_duplicate_groups<S: JobStore + ?Sized>(
    store: &S,
    rule: &IdentityRule,
) -> Result<Vec<RecordGroup>, StoreError> {
    let records = store.all().await?;
    Ok(group_records(&records, &KeySet::identity(), rule)
        .into_iter()
        .filter(RecordGroup::is_duplicate)
        .collect())
}

/// Keep the earliest-seen row of each group, schedule the rest for removal.
/// Triage status plays no part in choosing the keeper.
pub fn plan_sweep(groups: &[RecordGroup], rule: &IdentityRule) -> SweepPlan {
    let groups = groups
        .iter()
        .filter_map(|group| {
            let keeper = group.keeper()?;
            let removals = group.removals();
            if removals.is_empty() {
                return None;
            }
            Some(SweepGroup {
                title: keeper.title.clone(),
                company: keeper.company.clone(),
                location: keeper.location.clone(),
                keeper: JobRef::from(keeper),
                removals: removals.iter().map(JobRef::from).collect(),
            })
        })
        .collect();

    SweepPlan {
        run_id: Uuid::new_v4(),
        created_at: Utc::now(),
        rule: *rule,
        groups,
    }
}

/// Read-only: scan the store and build a plan.
pub async fn plan<S: JobStore + ?Sized>(store: &S, rule: &IdentityRule) -> Result<SweepPlan, StoreError> {
    let groups = find_duplicate_groups(store, rule).await?;
    let plan = plan_sweep(&groups, rule);
    info!(
        run_id = %plan.run_id,
        groups = plan.groups.len(),
        planned = plan.planned_removals(),
        "sweep planned"
    );
    Ok(plan)
}

/// Delete every removal in `plan`, or only report them when `dry_run` is set.
///
/// A failed delete is recorded and the sweep moves on; a partially applied
/// plan leaves the store in a state the next sweep can finish.
pub async fn resolve<S: JobStore + ?Sized>(store: &S, plan: &SweepPlan, dry_run: bool) -> SweepOutcome {
    let span = info_span!("sweep", run_id = %plan.run_id, dry_run);
    resolve_inner(store, plan, dry_run).instrument(span).await
}

pub async fn commit<S: JobStore + ?Sized>(store: &S, plan: &SweepPlan) -> SweepOutcome {
    resolve(store, plan, false).await
}

async fn resolve_inner<S: JobStore + ?Sized>(store: &S, plan: &SweepPlan, dry_run: bool) -> SweepOutcome {
    let mut outcome = SweepOutcome {
        dry_run,
        planned: plan.planned_removals(),
        removed: 0,
        already_gone: 0,
        failures: Vec::new(),
    };
    if dry_run {
        info!(planned = outcome.planned, "dry run, nothing removed");
        return outcome;
    }

    for group in &plan.groups {
        for removal in &group.removals {
            match store.delete(removal.id).await {
                Ok(true) => outcome.removed += 1,
                Ok(false) => outcome.already_gone += 1,
                Err(err) => {
                    warn!(id = removal.id, keeper = group.keeper.id, error = %err, "failed to remove duplicate");
                    outcome.failures.push(SweepFailure {
                        id: removal.id,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    info!(
        planned = outcome.planned,
        removed = outcome.removed,
        already_gone = outcome.already_gone,
        failed = outcome.failures.len(),
        "sweep complete"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use seekr_storage::{MemoryJobStore, NewJob};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).single().unwrap()
    }

    fn record(id: i64, url: &str, first_seen: DateTime<Utc>) -> JobRecord {
        JobRecord {
            id,
            url: url.into(),
            title: "Cook".into(),
            company: "Cafe X".into(),
            location: "Wellington".into(),
            region: "Wellington".into(),
            salary: None,
            date_listed: None,
            job_type: None,
            description: Some("Busy cafe seeking...".into()),
            first_seen,
            last_seen: first_seen,
            is_active: true,
            triage_status: None,
        }
    }

    fn seeded_store() -> MemoryJobStore {
        let mut later = record(12, "c", t0() + Duration::days(2));
        later.triage_status = Some(TriageStatus::Yes);
        let mut other = record(20, "d", t0());
        other.location = "Auckland".into();
        MemoryJobStore::with_records([
            record(10, "a", t0()),
            record(11, "b", t0() + Duration::days(1)),
            later,
            other,
        ])
    }

    #[tokio::test]
    async fn keeps_the_earliest_row_of_each_group() {
        let store = seeded_store();
        let rule = IdentityRule::default();
        let planned = plan(&store, &rule).await.unwrap();
        assert_eq!(planned.groups.len(), 1);
        assert_eq!(planned.keeper_ids(), vec![10]);
        assert_eq!(planned.removal_ids(), vec![11, 12]);

        let outcome = commit(&store, &planned).await;
        assert_eq!(outcome.removed, 2);
        assert!(outcome.is_complete());
        assert!(store.get(10).await.is_some());
        assert!(store.get(20).await.is_some());
        assert_eq!(store.count().await.unwrap(), 2);

        let again = plan(&store, &rule).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(commit(&store, &again).await.removed, 0);
    }

    #[tokio::test]
    async fn equal_first_seen_keeps_the_lowest_id() {
        let store = MemoryJobStore::with_records([record(7, "x", t0()), record(3, "y", t0())]);
        let planned = plan(&store, &IdentityRule::default()).await.unwrap();
        assert_eq!(planned.keeper_ids(), vec![3]);
        assert_eq!(planned.removal_ids(), vec![7]);
    }

    #[tokio::test]
    async fn dry_run_reports_without_deleting() {
        let store = seeded_store();
        let planned = plan(&store, &IdentityRule::default()).await.unwrap();
        let outcome = resolve(&store, &planned, true).await;
        assert!(outcome.dry_run);
        assert_eq!(outcome.planned, 2);
        assert_eq!(outcome.removed, 0);
        assert_eq!(store.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn rows_deleted_since_planning_are_counted_separately() {
        let store = seeded_store();
        let planned = plan(&store, &IdentityRule::default()).await.unwrap();
        store.delete(11).await.unwrap();
        let outcome = commit(&store, &planned).await;
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.already_gone, 1);
        assert!(outcome.is_complete());
    }

    /// Refuses to delete one id; everything else passes through.
    struct StubbornStore {
        inner: MemoryJobStore,
        locked: i64,
    }

    #[async_trait]
    impl JobStore for StubbornStore {
        async fn find_by_url(&self, url: &str) -> Result<Option<JobRecord>, StoreError> {
            self.inner.find_by_url(url).await
        }
        async fn find_by_listing(&self, t: &str, c: &str, l: &str) -> Result<Vec<JobRecord>, StoreError> {
            self.inner.find_by_listing(t, c, l).await
        }
        async fn insert(&self, job: NewJob) -> Result<JobRecord, StoreError> {
            self.inner.insert(job).await
        }
        async fn mark_seen(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
            self.inner.mark_seen(id, at).await
        }
        async fn backfill_description(&self, id: i64, d: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
            self.inner.backfill_description(id, d, at).await
        }
        async fn set_region(&self, id: i64, region: &str) -> Result<(), StoreError> {
            self.inner.set_region(id, region).await
        }
        async fn set_triage(&self, id: i64, s: Option<TriageStatus>) -> Result<(), StoreError> {
            self.inner.set_triage(id, s).await
        }
        async fn delete(&self, id: i64) -> Result<bool, StoreError> {
            if id == self.locked {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.delete(id).await
        }
        async fn all(&self) -> Result<Vec<JobRecord>, StoreError> {
            self.inner.all().await
        }
        async fn count(&self) -> Result<u64, StoreError> {
            self.inner.count().await
        }
    }

    #[tokio::test]
    async fn failed_delete_is_reported_and_the_sweep_continues() {
        let store = StubbornStore {
            inner: seeded_store(),
            locked: 11,
        };
        let rule = IdentityRule::default();
        let first = plan(&store, &rule).await.unwrap();
        let outcome = commit(&store, &first).await;
        assert_eq!(outcome.planned, 2);
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].id, 11);
        assert!(store.inner.get(10).await.is_some());

        let retry = StubbornStore {
            inner: store.inner,
            locked: 0,
        };
        let second = plan(&retry, &rule).await.unwrap();
        assert_eq!(second.removal_ids(), vec![11]);
        assert_eq!(commit(&retry, &second).await.removed, 1);
    }
}
