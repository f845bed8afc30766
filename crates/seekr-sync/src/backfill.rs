use std::collections::BTreeMap;

use seekr_core::RegionTable;
use seekr_storage::{JobStore, StoreError};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegionBackfillSummary {
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Region name to row count after the backfill.
    pub distribution: BTreeMap<String, usize>,
}

impl RegionBackfillSummary {
    /// Distribution sorted by count, largest first.
    pub fn ranked(&self) -> Vec<(&str, usize)> {
        let mut ranked: Vec<(&str, usize)> = self
            .distribution
            .iter()
            .map(|(region, count)| (region.as_str(), *count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        ranked
    }
}

/// Recompute every row's region from its location; rows whose region already
/// matches are left alone.
pub async fn backfill_regions<S: JobStore + ?Sized>(
    store: &S,
    regions: &RegionTable,
) -> Result<RegionBackfillSummary, StoreError> {
    let mut summary = RegionBackfillSummary::default();
    for record in store.all().await? {
        let resolved = regions.region_for(&record.location);
        let current = if resolved == record.region {
            summary.unchanged += 1;
            resolved
        } else {
            match store.set_region(record.id, resolved).await {
                Ok(()) => {
                    summary.updated += 1;
                    resolved
                }
                Err(err) => {
                    warn!(id = record.id, location = %record.location, error = %err, "failed to update region");
                    summary.failed += 1;
                    record.region.as_str()
                }
            }
        };
        *summary.distribution.entry(current.to_string()).or_default() += 1;
    }
    info!(
        updated = summary.updated,
        unchanged = summary.unchanged,
        failed = summary.failed,
        "region backfill complete"
    );
    Ok(summary)
}
