//! Persistence of correlation records. A sync cycle works on the full record
//! set and commits it atomically: either every record from the cycle lands, or
//! none do.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{CorrelationRecord, RecordFilter};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend unavailable: {0}")]
    Unavailable(String),
    #[error("failed to serialize record set: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Whole-set load/commit contract. Commit replaces the stored set; there is no
/// per-record write path, which is what makes a cycle atomic.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    async fn load(&self) -> Result<Vec<CorrelationRecord>, StoreError>;
    async fn commit(&self, records: Vec<CorrelationRecord>) -> Result<(), StoreError>;
}

/// In-memory backing store, keyed by the record's business key.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, CorrelationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CorrelationStore for MemoryStore {
    async fn load(&self) -> Result<Vec<CorrelationRecord>, StoreError> {
        let records = self.records.read().await;
        let mut all: Vec<CorrelationRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }

    async fn commit(&self, new_records: Vec<CorrelationRecord>) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        *records = new_records
            .into_iter()
            .map(|r| (r.key.clone(), r))
            .collect();
        Ok(())
    }
}

/// Applies a query filter to a record set. All present criteria must match.
pub fn filter_records(
    records: Vec<CorrelationRecord>,
    filter: &RecordFilter,
) -> Vec<CorrelationRecord> {
    records
        .into_iter()
        .filter(|record| {
            if let Some(severities) = &filter.severity {
                let matches = record
                    .severity
                    .as_deref()
                    .map(|s| severities.iter().any(|want| want.eq_ignore_ascii_case(s)))
                    .unwrap_or(false);
                if !matches {
                    return false;
                }
            }
            if let Some(statuses) = &filter.monitoring_status {
                if !statuses.contains(&record.monitoring_status) {
                    return false;
                }
            }
            if let Some(statuses) = &filter.incident_status {
                let matches = record
                    .incident
                    .as_ref()
                    .map(|i| statuses.iter().any(|want| want.eq_ignore_ascii_case(&i.status)))
                    .unwrap_or(false);
                if !matches {
                    return false;
                }
            }
            if let Some(fragment) = &filter.cluster_contains {
                let matches = record
                    .cluster
                    .as_deref()
                    .map(|c| c.to_lowercase().contains(&fragment.to_lowercase()))
                    .unwrap_or(false);
                if !matches {
                    return false;
                }
            }
            if let Some(from) = filter.created_from {
                if record.created_at < from {
                    return false;
                }
            }
            if let Some(to) = filter.created_to {
                if record.created_at > to {
                    return false;
                }
            }
            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchType, MonitoringStatus};
    use chrono::{TimeZone, Utc};

    fn record(key: &str, severity: &str, status: MonitoringStatus) -> CorrelationRecord {
        CorrelationRecord {
            key: key.to_string(),
            alert_name: key.to_string(),
            cluster: Some("prod-eu".to_string()),
            severity: Some(severity.to_string()),
            summary: None,
            source: Some("grafana".to_string()),
            monitoring_status: status,
            started_at: None,
            incident: None,
            match_type: MatchType::None,
            match_confidence: 0.0,
            match_details: None,
            manual_review_required: false,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_by: None,
            resolved_at: None,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn commit_replaces_the_whole_set() {
        let store = MemoryStore::new();
        store
            .commit(vec![record("a", "critical", MonitoringStatus::Active)])
            .await
            .unwrap();
        store
            .commit(vec![record("b", "warning", MonitoringStatus::Active)])
            .await
            .unwrap();
        let all = store.load().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key, "b");
    }

    #[tokio::test]
    async fn load_is_sorted_by_key() {
        let store = MemoryStore::new();
        store
            .commit(vec![
                record("zeta", "info", MonitoringStatus::Active),
                record("alpha", "info", MonitoringStatus::Active),
            ])
            .await
            .unwrap();
        let all = store.load().await.unwrap();
        assert_eq!(all[0].key, "alpha");
        assert_eq!(all[1].key, "zeta");
    }

    #[test]
    fn filter_by_severity_is_case_insensitive() {
        let records = vec![
            record("a", "Critical", MonitoringStatus::Active),
            record("b", "warning", MonitoringStatus::Active),
        ];
        let filter = RecordFilter {
            severity: Some(vec!["critical".to_string()]),
            ..RecordFilter::default()
        };
        let out = filter_records(records, &filter);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key, "a");
    }

    #[test]
    fn filter_combines_criteria() {
        let mut resolved = record("a", "critical", MonitoringStatus::Resolved);
        resolved.cluster = Some("stage-us".to_string());
        let records = vec![
            resolved,
            record("b", "critical", MonitoringStatus::Active),
            record("c", "info", MonitoringStatus::Active),
        ];
        let filter = RecordFilter {
            severity: Some(vec!["critical".to_string()]),
            monitoring_status: Some(vec![MonitoringStatus::Active]),
            cluster_contains: Some("prod".to_string()),
            ..RecordFilter::default()
        };
        let out = filter_records(records, &filter);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key, "b");
    }

    #[test]
    fn filter_by_created_window() {
        let records = vec![record("a", "info", MonitoringStatus::Active)];
        let filter = RecordFilter {
            created_from: Some(Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap()),
            ..RecordFilter::default()
        };
        assert!(filter_records(records.clone(), &filter).is_empty());

        let filter = RecordFilter {
            created_to: Some(Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap()),
            ..RecordFilter::default()
        };
        assert_eq!(filter_records(records, &filter).len(), 1);
    }
}
