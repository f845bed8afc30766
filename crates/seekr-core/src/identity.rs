//! The "same job" rule and the grouping primitive every duplicate query is built on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Candidate, JobRecord};

pub const DEFAULT_DESCRIPTION_PREFIX_LEN: usize = 200;

/// Decides whether two listings denote the same posting.
///
/// Two jobs are the same if their URLs are equal, or if title, company and
/// location are equal and the first `description_prefix_len` characters of
/// their descriptions are equal. A missing description compares as empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRule {
    pub description_prefix_len: usize,
}

impl Default for IdentityRule {
    fn default() -> Self {
        Self {
            description_prefix_len: DEFAULT_DESCRIPTION_PREFIX_LEN,
        }
    }
}

impl IdentityRule {
    pub fn new(description_prefix_len: usize) -> Self {
        Self {
            description_prefix_len,
        }
    }

    /// Leading characters (not bytes) of `description`.
    pub fn description_prefix<'a>(&self, description: Option<&'a str>) -> &'a str {
        let text = description.unwrap_or_default();
        match text.char_indices().nth(self.description_prefix_len) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }

    pub fn same_listing(&self, candidate: &Candidate, record: &JobRecord) -> bool {
        candidate.title == record.title
            && candidate.company == record.company
            && candidate.location == record.location
    }

    pub fn same_content(&self, candidate: &Candidate, record: &JobRecord) -> bool {
        self.same_listing(candidate, record)
            && self.description_prefix(candidate.description.as_deref())
                == self.description_prefix(record.description.as_deref())
    }

    pub fn same_job(&self, candidate: &Candidate, record: &JobRecord) -> bool {
        candidate.url == record.url || self.same_content(candidate, record)
    }
}

/// A column (or derived column) that can take part in a grouping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyColumn {
    Url,
    Title,
    Company,
    Location,
    Salary,
    DateListed,
    JobType,
    Description,
    DescriptionPrefix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    columns: Vec<KeyColumn>,
}

impl KeySet {
    pub fn new(columns: impl IntoIterator<Item = KeyColumn>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
        }
    }

    /// Title, company, location and description prefix: the dedup key.
    pub fn identity() -> Self {
        Self::new([
            KeyColumn::Title,
            KeyColumn::Company,
            KeyColumn::Location,
            KeyColumn::DescriptionPrefix,
        ])
    }

    pub fn listing() -> Self {
        Self::new([KeyColumn::Title, KeyColumn::Company, KeyColumn::Location])
    }

    /// Every descriptive column, full description included.
    pub fn exact_row() -> Self {
        Self::new([
            KeyColumn::Title,
            KeyColumn::Company,
            KeyColumn::Location,
            KeyColumn::Salary,
            KeyColumn::DateListed,
            KeyColumn::JobType,
            KeyColumn::Description,
        ])
    }

    pub fn url() -> Self {
        Self::new([KeyColumn::Url])
    }

    pub fn columns(&self) -> &[KeyColumn] {
        &self.columns
    }

    pub fn key_for(&self, record: &JobRecord, rule: &IdentityRule) -> Vec<Option<String>> {
        self.columns
            .iter()
            .map(|column| match column {
                KeyColumn::Url => Some(record.url.clone()),
                KeyColumn::Title => Some(record.title.clone()),
                KeyColumn::Company => Some(record.company.clone()),
                KeyColumn::Location => Some(record.location.clone()),
                KeyColumn::Salary => record.salary.clone(),
                KeyColumn::DateListed => record.date_listed.clone(),
                KeyColumn::JobType => record.job_type.clone(),
                KeyColumn::Description => record.description.clone(),
                KeyColumn::DescriptionPrefix => Some(
                    rule.description_prefix(record.description.as_deref())
                        .to_string(),
                ),
            })
            .collect()
    }
}

/// Records sharing one key value, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordGroup {
    pub key: Vec<Option<String>>,
    pub members: Vec<JobRecord>,
}

impl RecordGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_duplicate(&self) -> bool {
        self.members.len() > 1
    }

    /// Earliest-seen member; ties broken by lowest id.
    pub fn keeper(&self) -> Option<&JobRecord> {
        self.members.first()
    }

    pub fn removals(&self) -> &[JobRecord] {
        self.members.get(1..).unwrap_or_default()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.members.iter().map(|m| m.id).collect()
    }
}

/// Partition `records` by `keys`. Members are ordered by `first_seen` then id;
/// groups are ordered largest first, then by key.
pub fn group_records(records: &[JobRecord], keys: &KeySet, rule: &IdentityRule) -> Vec<RecordGroup> {
    let mut buckets: BTreeMap<Vec<Option<String>>, Vec<JobRecord>> = BTreeMap::new();
    for record in records {
        buckets
            .entry(keys.key_for(record, rule))
            .or_default()
            .push(record.clone());
    }

    let mut groups = buckets
        .into_iter()
        .map(|(key, mut members)| {
            members.sort_by(|a, b| a.first_seen.cmp(&b.first_seen).then(a.id.cmp(&b.id)));
            RecordGroup { key, members }
        })
        .collect::<Vec<_>>();
    groups.sort_by(|a, b| b.len().cmp(&a.len()));
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn record(id: i64, url: &str, location: &str, description: Option<&str>, age_minutes: i64) -> JobRecord {
        let base = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).single().unwrap();
        let seen = base + Duration::minutes(age_minutes);
        JobRecord {
            id,
            url: url.to_string(),
            title: "Backend Engineer".into(),
            company: "Acme".into(),
            location: location.into(),
            region: location.into(),
            salary: None,
            date_listed: None,
            job_type: None,
            description: description.map(str::to_string),
            first_seen: seen,
            last_seen: seen,
            is_active: true,
            triage_status: None,
        }
    }

    fn candidate(url: &str, location: &str, description: &str) -> Candidate {
        Candidate {
            url: url.into(),
            title: "Backend Engineer".into(),
            company: "Acme".into(),
            location: location.into(),
            salary: None,
            date_listed: None,
            job_type: None,
            description: Some(description.into()),
        }
    }

    #[test]
    fn prefix_counts_characters_not_bytes() {
        let rule = IdentityRule::new(3);
        assert_eq!(rule.description_prefix(Some("Māori kaupapa")), "Māo");
        assert_eq!(rule.description_prefix(Some("ab")), "ab");
        assert_eq!(rule.description_prefix(None), "");
    }

    #[test]
    fn url_match_wins_even_when_content_differs() {
        let rule = IdentityRule::default();
        let stored = record(1, "a", "Auckland", Some("We need a backend dev"), 0);
        assert!(rule.same_job(&candidate("a", "Wellington", "Totally different"), &stored));
    }

    #[test]
    fn content_match_only_looks_at_the_prefix() {
        let rule = IdentityRule::new(10);
        let stored = record(1, "a", "Auckland", Some("We need... a Rust developer"), 0);
        assert!(rule.same_job(&candidate("b", "Auckland", "We need... someone else"), &stored));
        assert!(!rule.same_job(&candidate("b", "Auckland", "We want... a Rust developer"), &stored));
    }

    #[test]
    fn different_location_is_never_the_same_job() {
        let rule = IdentityRule::default();
        let stored = record(1, "a", "Auckland", Some("We need..."), 0);
        assert!(!rule.same_job(&candidate("b", "Wellington", "We need..."), &stored));
    }

    #[test]
    fn missing_description_groups_with_empty_description() {
        let rule = IdentityRule::default();
        let stored = record(1, "a", "Auckland", None, 0);
        assert!(rule.same_content(&candidate("b", "Auckland", ""), &stored));
    }

    #[test]
    fn identity_groups_order_members_oldest_first() {
        let rule = IdentityRule::default();
        let records = vec![
            record(12, "c", "Auckland", Some("We need..."), 30),
            record(10, "a", "Auckland", Some("We need..."), 10),
            record(20, "z", "Wellington", Some("We need..."), 0),
            record(11, "b", "Auckland", Some("We need..."), 20),
        ];
        let groups = group_records(&records, &KeySet::identity(), &rule);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].ids(), vec![10, 11, 12]);
        assert_eq!(groups[0].keeper().map(|k| k.id), Some(10));
        assert_eq!(groups[0].removals().len(), 2);
        assert!(!groups[1].is_duplicate());
        assert!(groups[1].removals().is_empty());
    }

    #[test]
    fn first_seen_ties_fall_back_to_id() {
        let rule = IdentityRule::default();
        let records = vec![
            record(7, "b", "Auckland", Some("x"), 0),
            record(3, "a", "Auckland", Some("x"), 0),
        ];
        let groups = group_records(&records, &KeySet::identity(), &rule);
        assert_eq!(groups[0].keeper().map(|k| k.id), Some(3));
    }

    #[test]
    fn exact_row_key_distinguishes_full_descriptions() {
        let rule = IdentityRule::new(5);
        let records = vec![
            record(1, "a", "Auckland", Some("Same start, tail one"), 0),
            record(2, "b", "Auckland", Some("Same start, tail two"), 1),
        ];
        assert_eq!(group_records(&records, &KeySet::identity(), &rule).len(), 1);
        assert_eq!(group_records(&records, &KeySet::exact_row(), &rule).len(), 2);
        assert_eq!(group_records(&records, &KeySet::url(), &rule).len(), 2);
    }
}
