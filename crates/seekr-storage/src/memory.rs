use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use seekr_core::{JobRecord, TriageStatus};
use tokio::sync::Mutex;

use crate::{JobStore, NewJob, StoreError};

/// In-process `JobStore` with the same id and uniqueness rules as the SQLite
/// table: ids increase monotonically and URLs are unique.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: BTreeMap<i64, JobRecord>,
    last_id: i64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with fully-formed records, keeping their ids.
    pub fn with_records(records: impl IntoIterator<Item = JobRecord>) -> Self {
        let rows: BTreeMap<i64, JobRecord> = records.into_iter().map(|r| (r.id, r)).collect();
        let last_id = rows.keys().next_back().copied().unwrap_or(0);
        Self {
            state: Mutex::new(MemoryState { rows, last_id }),
        }
    }

    pub async fn get(&self, id: i64) -> Option<JobRecord> {
        self.state.lock().await.rows.get(&id).cloned()
    }
}

impl MemoryState {
    fn row_mut(&mut self, id: i64) -> Result<&mut JobRecord, StoreError> {
        self.rows.get_mut(&id).ok_or(StoreError::NotFound(id))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find_by_url(&self, url: &str) -> Result<Option<JobRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.rows.values().find(|r| r.url == url).cloned())
    }

    async fn find_by_listing(
        &self,
        title: &str,
        company: &str,
        location: &str,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .values()
            .filter(|r| r.title == title && r.company == company && r.location == location)
            .cloned()
            .collect())
    }

    async fn insert(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        let mut state = self.state.lock().await;
        if state.rows.values().any(|r| r.url == job.url) {
            return Err(StoreError::DuplicateUrl(job.url));
        }
        state.last_id += 1;
        let record = job.into_record(state.last_id);
        state.rows.insert(record.id, record.clone());
        Ok(record)
    }

    async fn mark_seen(&self, id: i64, seen_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let row = state.row_mut(id)?;
        row.last_seen = seen_at;
        row.is_active = true;
        Ok(())
    }

    async fn backfill_description(
        &self,
        id: i64,
        description: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let row = state.row_mut(id)?;
        row.description = Some(description.to_string());
        row.last_seen = seen_at;
        row.is_active = true;
        Ok(())
    }

    async fn set_region(&self, id: i64, region: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.row_mut(id)?.region = region.to_string();
        Ok(())
    }

    async fn set_triage(&self, id: i64, status: Option<TriageStatus>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.row_mut(id)?.triage_status = status;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.rows.remove(&id).is_some())
    }

    async fn all(&self) -> Result<Vec<JobRecord>, StoreError> {
        Ok(self.state.lock().await.rows.values().cloned().collect())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.state.lock().await.rows.len() as u64)
    }
}
