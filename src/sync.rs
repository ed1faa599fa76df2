//! Reconciliation of one correlation pass against the persisted record set.
//!
//! A cycle is all-or-nothing: the whole record set is rebuilt in memory and
//! committed once at the end. A timeout or store failure leaves the previous
//! set untouched, and the next cycle starts from that state.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::clients::IncidentApi;
use crate::config::{FilterConfig, MatchingConfig, SyncConfig};
use crate::correlation::engine::{CorrelationEngine, MatchResult};
use crate::correlation::extract;
use crate::models::{
    CorrelationRecord, IncidentRecord, IncidentSnapshot, MatchType, MonitoringAlert,
    MonitoringStatus, RecordFilter,
};
use crate::store::{self, CorrelationStore, StoreError};

const AUTO_RESOLVE_USER: &str = "Auto-resolved";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("sync cycle exceeded {0}s timeout, nothing was persisted")]
    Timeout(u64),
}

/// Result of one committed cycle: the record set as persisted plus counters.
#[derive(Debug)]
pub struct CycleReport {
    pub records: Vec<CorrelationRecord>,
    pub stats: CycleStats,
}

/// Counters for one completed cycle, logged and returned to the caller.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct CycleStats {
    pub alerts_processed: usize,
    pub alerts_filtered: usize,
    pub matched: usize,
    pub incident_only: usize,
    pub resolved: usize,
    pub records_total: usize,
}

/// Aggregate view over the persisted record set.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct SyncSummary {
    pub total: usize,
    pub active: usize,
    pub resolved: usize,
    pub incident_only: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub match_rate: f64,
    pub manual_review: usize,
    pub by_match_type: HashMap<String, usize>,
    pub by_incident_status: HashMap<String, usize>,
}

pub struct SyncService {
    engine: CorrelationEngine,
    store: Arc<dyn CorrelationStore>,
    incidents: Arc<dyn IncidentApi>,
    filter: FilterConfig,
    auto_close: bool,
    cycle_timeout: Duration,
}

impl SyncService {
    pub fn new(
        matching: &MatchingConfig,
        filter: FilterConfig,
        sync: &SyncConfig,
        store: Arc<dyn CorrelationStore>,
        incidents: Arc<dyn IncidentApi>,
    ) -> Self {
        Self {
            engine: CorrelationEngine::new(matching),
            store,
            incidents,
            filter,
            auto_close: sync.auto_close,
            cycle_timeout: Duration::from_secs(matching.cycle_timeout_seconds),
        }
    }

    /// Runs one full reconciliation cycle and returns the record set exactly
    /// as committed. The commit only happens after every step has finished
    /// within the cycle timeout.
    pub async fn run_sync_cycle(
        &self,
        alerts: Vec<MonitoringAlert>,
        incidents: Vec<IncidentRecord>,
    ) -> Result<CycleReport, SyncError> {
        let timeout_secs = self.cycle_timeout.as_secs();
        let (records, stats) =
            tokio::time::timeout(self.cycle_timeout, self.reconcile(alerts, incidents))
                .await
                .map_err(|_| SyncError::Timeout(timeout_secs))??;

        self.store.commit(records.clone()).await?;
        info!(
            matched = stats.matched,
            incident_only = stats.incident_only,
            resolved = stats.resolved,
            total = stats.records_total,
            "sync cycle committed"
        );
        Ok(CycleReport { records, stats })
    }

    async fn reconcile(
        &self,
        alerts: Vec<MonitoringAlert>,
        incidents: Vec<IncidentRecord>,
    ) -> Result<(Vec<CorrelationRecord>, CycleStats), SyncError> {
        let mut stats = CycleStats::default();

        let total_before = alerts.len();
        let alerts = self.filter_non_prod(alerts);
        stats.alerts_filtered = total_before - alerts.len();
        stats.alerts_processed = alerts.len();

        let outcome = self.engine.correlate(&alerts, &incidents);

        let mut records: HashMap<String, CorrelationRecord> = self
            .store
            .load()
            .await?
            .into_iter()
            .map(|r| (r.key.clone(), r))
            .collect();

        let now = Utc::now();
        let mut active_keys = HashSet::new();

        for result in &outcome.results {
            if result.incident.is_some() {
                stats.matched += 1;
            }
            active_keys.insert(result.alert.alert_id.clone());
            apply_match_result(&mut records, result, now);
        }

        // Incidents no alert claimed. An existing record already tracking the
        // incident is refreshed in place so human actions on it survive; only
        // genuinely new incidents get a synthetic incident-only record.
        for incident in &outcome.incident_only {
            stats.incident_only += 1;
            let existing_key = records
                .values()
                .find(|r| r.incident_id() == Some(incident.id.as_str()))
                .map(|r| r.key.clone());
            if let Some(key) = existing_key {
                if let Some(record) = records.get_mut(&key) {
                    // The incident no longer has a firing alert behind it, so
                    // the old match metadata is stale and must not survive.
                    record.incident = Some(IncidentSnapshot::from(incident));
                    record.match_type = MatchType::JsmOnly;
                    record.match_confidence = 0.0;
                    record.match_details = None;
                    record.manual_review_required = false;
                    record.updated_at = now;
                }
            } else {
                let key = CorrelationRecord::incident_only_key(&incident.id);
                records.insert(key.clone(), incident_only_record(key, incident, now));
            }
        }

        // Previously active records whose alert stopped firing.
        for record in records.values_mut() {
            if record.monitoring_status != MonitoringStatus::Active
                || active_keys.contains(&record.key)
            {
                continue;
            }
            record.monitoring_status = MonitoringStatus::Resolved;
            record.updated_at = now;
            stats.resolved += 1;

            if record.resolved_at.is_none() {
                record.resolved_at = Some(now);
                record.resolved_by = Some(AUTO_RESOLVE_USER.to_string());
            }

            if self.auto_close {
                if let Some(incident) = &record.incident {
                    if incident.status != "closed" {
                        let closed = self
                            .incidents
                            .close_incident(
                                &incident.id,
                                "Monitoring alert stopped firing",
                                AUTO_RESOLVE_USER,
                            )
                            .await;
                        if !closed {
                            // Local state still resolves; remote close retries
                            // are left to the next cycle's drift refresh.
                            warn!(key = %record.key, incident_id = %incident.id,
                                "auto-close failed, record resolved locally only");
                        }
                    }
                }
            }
        }

        // Drift refresh: every record tracking an incident picks up the state
        // the incident service reports now.
        let incident_index: HashMap<&str, &IncidentRecord> =
            incidents.iter().map(|i| (i.id.as_str(), i)).collect();
        for record in records.values_mut() {
            let Some(snapshot) = &record.incident else {
                continue;
            };
            let Some(fresh) = incident_index.get(snapshot.id.as_str()) else {
                continue;
            };
            record.incident = Some(IncidentSnapshot::from(*fresh));
            if fresh.acknowledged && record.acknowledged_by.is_none() {
                record.acknowledged_by =
                    Some(fresh.owner.clone().unwrap_or_else(|| "jsm".to_string()));
                record.acknowledged_at = Some(fresh.updated_at.unwrap_or(now));
            }
            record.updated_at = now;
        }

        stats.records_total = records.len();
        let mut all: Vec<CorrelationRecord> = records.into_values().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok((all, stats))
    }

    fn filter_non_prod(&self, alerts: Vec<MonitoringAlert>) -> Vec<MonitoringAlert> {
        if !self.filter.exclude_non_prod {
            return alerts;
        }
        alerts
            .into_iter()
            .filter(|alert| {
                if let Some(cluster) = extract::monitoring_cluster(alert) {
                    let cluster = cluster.to_lowercase();
                    if self
                        .filter
                        .excluded_clusters
                        .iter()
                        .any(|token| cluster.contains(token))
                    {
                        return false;
                    }
                }
                let environment = alert
                    .labels
                    .get("environment")
                    .or_else(|| alert.labels.get("env"));
                if let Some(environment) = environment {
                    let environment = environment.to_lowercase();
                    if self
                        .filter
                        .excluded_environments
                        .iter()
                        .any(|token| environment == *token)
                    {
                        return false;
                    }
                }
                true
            })
            .collect()
    }

    /// Acknowledges records on behalf of a user. The remote call is best
    /// effort; the local stamp is applied either way and never overwritten.
    pub async fn acknowledge_records(
        &self,
        keys: &[String],
        user: &str,
        note: &str,
    ) -> Result<usize, SyncError> {
        self.apply_human_action(keys, user, note, HumanAction::Acknowledge)
            .await
    }

    /// Resolves records on behalf of a user, closing the remote incident when
    /// one is attached.
    pub async fn resolve_records(
        &self,
        keys: &[String],
        user: &str,
        note: &str,
    ) -> Result<usize, SyncError> {
        self.apply_human_action(keys, user, note, HumanAction::Resolve)
            .await
    }

    async fn apply_human_action(
        &self,
        keys: &[String],
        user: &str,
        note: &str,
        action: HumanAction,
    ) -> Result<usize, SyncError> {
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let mut records = self.store.load().await?;
        let now = Utc::now();
        let mut touched = 0;

        for record in records.iter_mut() {
            if !wanted.contains(record.key.as_str()) {
                continue;
            }
            touched += 1;

            if let Some(incident_id) = record.incident_id().map(str::to_string) {
                let ok = match action {
                    HumanAction::Acknowledge => {
                        self.incidents
                            .acknowledge_incident(&incident_id, note, user)
                            .await
                    }
                    HumanAction::Resolve => {
                        self.incidents.close_incident(&incident_id, note, user).await
                    }
                };
                if !ok {
                    warn!(key = %record.key, incident_id = %incident_id,
                        "remote incident action failed, applying local stamp only");
                }
            }

            match action {
                HumanAction::Acknowledge => {
                    if record.acknowledged_by.is_none() {
                        record.acknowledged_by = Some(user.to_string());
                        record.acknowledged_at = Some(now);
                    }
                }
                HumanAction::Resolve => {
                    record.monitoring_status = MonitoringStatus::Resolved;
                    if record.resolved_by.is_none() {
                        record.resolved_by = Some(user.to_string());
                        record.resolved_at = Some(now);
                    }
                }
            }
            record.updated_at = now;
        }

        self.store.commit(records).await?;
        Ok(touched)
    }

    pub async fn query_records(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<CorrelationRecord>, SyncError> {
        let records = self.store.load().await?;
        Ok(store::filter_records(records, filter))
    }

    pub async fn sync_summary(&self) -> Result<SyncSummary, SyncError> {
        let records = self.store.load().await?;
        let mut summary = SyncSummary {
            total: records.len(),
            ..SyncSummary::default()
        };
        let mut with_monitoring = 0usize;
        for record in &records {
            match record.monitoring_status {
                MonitoringStatus::Active => summary.active += 1,
                MonitoringStatus::Resolved => summary.resolved += 1,
                MonitoringStatus::NotApplicable => summary.incident_only += 1,
            }
            if record.monitoring_status != MonitoringStatus::NotApplicable {
                with_monitoring += 1;
                if record.incident.is_some() {
                    summary.matched += 1;
                } else {
                    summary.unmatched += 1;
                }
            }
            if record.manual_review_required {
                summary.manual_review += 1;
            }
            *summary
                .by_match_type
                .entry(record.match_type.as_str().to_string())
                .or_insert(0) += 1;
            if let Some(incident) = &record.incident {
                *summary
                    .by_incident_status
                    .entry(incident.status.clone())
                    .or_insert(0) += 1;
            }
        }
        if with_monitoring > 0 {
            summary.match_rate = summary.matched as f64 / with_monitoring as f64;
        }
        Ok(summary)
    }
}

#[derive(Clone, Copy)]
enum HumanAction {
    Acknowledge,
    Resolve,
}

fn apply_match_result(
    records: &mut HashMap<String, CorrelationRecord>,
    result: &MatchResult,
    now: chrono::DateTime<Utc>,
) {
    let alert = &result.alert;
    let record = records
        .entry(alert.alert_id.clone())
        .or_insert_with(|| CorrelationRecord {
            key: alert.alert_id.clone(),
            alert_name: alert.alert_name.clone(),
            cluster: None,
            severity: None,
            summary: None,
            source: None,
            monitoring_status: MonitoringStatus::Active,
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
            created_at: now,
            updated_at: now,
        });

    record.alert_name = alert.alert_name.clone();
    record.cluster = extract::monitoring_cluster(alert);
    record.severity = Some(extract::monitoring_severity(alert));
    record.summary = alert.summary.clone();
    record.source = Some(alert.source.clone());
    record.monitoring_status = MonitoringStatus::Active;
    record.started_at = (!alert.starts_at_estimated).then_some(alert.starts_at);
    record.match_type = result.match_type;
    record.match_confidence = result.confidence;
    record.match_details = result.details.clone();
    record.manual_review_required = result.match_type == MatchType::ManualReview;
    record.incident = result.incident.as_ref().map(IncidentSnapshot::from);
    record.updated_at = now;
}

fn incident_only_record(
    key: String,
    incident: &IncidentRecord,
    now: chrono::DateTime<Utc>,
) -> CorrelationRecord {
    CorrelationRecord {
        key,
        alert_name: extract::incident_name(incident)
            .unwrap_or_else(|| incident.message.clone()),
        cluster: extract::incident_cluster(incident),
        severity: Some(extract::incident_severity(incident)),
        summary: Some(incident.message.clone()),
        source: incident.source.clone(),
        monitoring_status: MonitoringStatus::NotApplicable,
        started_at: incident.created_at,
        incident: Some(IncidentSnapshot::from(incident)),
        match_type: MatchType::JsmOnly,
        match_confidence: 0.0,
        match_details: None,
        manual_review_required: false,
        acknowledged_by: None,
        acknowledged_at: None,
        resolved_by: None,
        resolved_at: None,
        created_at: now,
        updated_at: now,
    }
}
