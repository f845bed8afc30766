use std::collections::{BTreeSet, HashSet};

use seekr_core::{group_records, IdentityRule, JobRecord, KeySet, RecordGroup};
use seekr_storage::{JobStore, StoreError};
use serde::Serialize;
use strsim::jaro_winkler;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub title: String,
    pub company: String,
    pub location: String,
    pub ids: Vec<i64>,
    pub urls: Vec<String>,
}

impl GroupSummary {
    fn from_group(group: &RecordGroup) -> Option<Self> {
        let first = group.keeper()?;
        Some(Self {
            title: first.title.clone(),
            company: first.company.clone(),
            location: first.location.clone(),
            ids: group.ids(),
            urls: group.members.iter().map(|m| m.url.clone()).collect(),
        })
    }

    pub fn count(&self) -> usize {
        self.ids.len()
    }
}

/// Same title, company and location stored with differing description prefixes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingVariant {
    pub title: String,
    pub company: String,
    pub location: String,
    pub ids: Vec<i64>,
    pub distinct_prefixes: usize,
    /// Lowest Jaro-Winkler similarity between any two distinct prefixes.
    pub min_similarity: f64,
}

/// Read-only census of duplicates under several key sets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditReport {
    pub total_jobs: usize,
    pub unique_urls: usize,
    pub unique_identities: usize,
    pub exact_duplicates: Vec<GroupSummary>,
    pub content_duplicates: Vec<GroupSummary>,
    pub listing_variants: Vec<ListingVariant>,
    pub url_duplicates: Vec<GroupSummary>,
}

impl AuditReport {
    /// Rows a sweep would remove.
    pub fn removable(&self) -> usize {
        self.total_jobs - self.unique_identities
    }

    pub fn is_clean(&self) -> bool {
        self.content_duplicates.is_empty() && self.url_duplicates.is_empty()
    }
}

pub async fn audit<S: JobStore + ?Sized>(store: &S, rule: &IdentityRule) -> Result<AuditReport, StoreError> {
    let records = store.all().await?;
    Ok(audit_records(&records, rule))
}

pub fn audit_records(records: &[JobRecord], rule: &IdentityRule) -> AuditReport {
    let duplicates = |keys: KeySet| -> Vec<GroupSummary> {
        group_records(records, &keys, rule)
            .iter()
            .filter(|g| g.is_duplicate())
            .filter_map(GroupSummary::from_group)
            .collect()
    };

    let unique_identities = records
        .iter()
        .map(|r| KeySet::identity().key_for(r, rule))
        .collect::<HashSet<_>>()
        .len();
    let unique_urls = records.iter().map(|r| r.url.as_str()).collect::<HashSet<_>>().len();

    AuditReport {
        total_jobs: records.len(),
        unique_urls,
        unique_identities,
        exact_duplicates: duplicates(KeySet::exact_row()),
        content_duplicates: duplicates(KeySet::identity()),
        listing_variants: listing_variants(records, rule),
        url_duplicates: duplicates(KeySet::url()),
    }
}

fn listing_variants(records: &[JobRecord], rule: &IdentityRule) -> Vec<ListingVariant> {
    group_records(records, &KeySet::listing(), rule)
        .iter()
        .filter(|g| g.is_duplicate())
        .filter_map(|group| {
            let prefixes: BTreeSet<&str> = group
                .members
                .iter()
                .map(|m| rule.description_prefix(m.description.as_deref()))
                .collect();
            if prefixes.len() < 2 {
                return None;
            }
            let prefixes: Vec<&str> = prefixes.into_iter().collect();
            let mut min_similarity = 1.0_f64;
            for (i, a) in prefixes.iter().enumerate() {
                for b in &prefixes[i + 1..] {
                    min_similarity = min_similarity.min(jaro_winkler(a, b));
                }
            }
            let first = group.keeper()?;
            Some(ListingVariant {
                title: first.title.clone(),
                company: first.company.clone(),
                location: first.location.clone(),
                ids: group.ids(),
                distinct_prefixes: prefixes.len(),
                min_similarity,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn record(id: i64, url: &str, description: &str) -> JobRecord {
        let seen = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).single().unwrap() + Duration::hours(id);
        JobRecord {
            id,
            url: url.into(),
            title: "Barista".into(),
            company: "Cafe X".into(),
            location: "Nelson".into(),
            region: "Nelson".into(),
            salary: None,
            date_listed: None,
            job_type: None,
            description: Some(description.into()),
            first_seen: seen,
            last_seen: seen,
            is_active: true,
            triage_status: None,
        }
    }

    #[test]
    fn counts_each_kind_of_duplicate() {
        let records = vec![
            record(1, "a", "Morning shifts, great coffee"),
            record(2, "b", "Morning shifts, great coffee"),
            record(3, "c", "Morning shifts, great coffee!"),
            record(4, "d", "Completely different role"),
        ];
        let report = audit_records(&records, &IdentityRule::default());
        assert_eq!(report.total_jobs, 4);
        assert_eq!(report.unique_urls, 4);
        assert_eq!(report.unique_identities, 3);
        assert_eq!(report.removable(), 1);
        assert_eq!(report.exact_duplicates.len(), 1);
        assert_eq!(report.exact_duplicates[0].urls, vec!["a", "b"]);
        assert_eq!(report.content_duplicates.len(), 1);
        assert_eq!(report.content_duplicates[0].ids, vec![1, 2]);
        assert!(report.url_duplicates.is_empty());
        assert!(!report.is_clean());

        assert_eq!(report.listing_variants.len(), 1);
        let variant = &report.listing_variants[0];
        assert_eq!(variant.ids, vec![1, 2, 3, 4]);
        assert_eq!(variant.distinct_prefixes, 3);
        assert!(variant.min_similarity < 0.9);
    }

    #[test]
    fn exact_duplicates_require_every_descriptive_column_to_match() {
        let mut salaried = record(2, "b", "Same");
        salaried.salary = Some("$28/hr".into());
        let records = vec![record(1, "a", "Same"), salaried, record(3, "a", "Other")];
        let report = audit_records(&records, &IdentityRule::default());
        assert!(report.exact_duplicates.is_empty());
        assert_eq!(report.content_duplicates[0].ids, vec![1, 2]);
        assert_eq!(report.url_duplicates.len(), 1);
        assert_eq!(report.url_duplicates[0].ids, vec![1, 3]);
        assert_eq!(report.unique_urls, 2);
    }

    #[test]
    fn clean_table_reports_nothing() {
        let records = vec![record(1, "a", "One"), record(2, "b", "Two")];
        let report = audit_records(&records, &IdentityRule::default());
        assert!(report.is_clean());
        assert_eq!(report.removable(), 0);
        assert_eq!(report.listing_variants[0].distinct_prefixes, 2);
    }
}
