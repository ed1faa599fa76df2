use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::correlation::extract;

/// One firing alert as reported by a monitoring source (Grafana or a
/// Prometheus Alertmanager endpoint). Re-fetched every cycle, never persisted
/// on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringAlert {
    /// Natural key: `<alertname>-<fingerprint>`. Stable across cycles for the
    /// same firing condition, but only unique within one source.
    pub alert_id: String,
    pub alert_name: String,
    pub cluster: Option<String>,
    pub severity: Option<String>,
    pub summary: Option<String>,
    pub description: String,
    pub starts_at: DateTime<Utc>,
    /// True when `starts_at` could not be parsed and was substituted with the
    /// fetch time. Scorers must treat such a timestamp as unknown.
    pub starts_at_estimated: bool,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub source: String,
    pub source_instance: Option<String>,
}

/// An incident as reported by the incident-management service, flattened from
/// the raw API payload into a fixed shape before any extractor touches it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: String,
    pub tiny_id: String,
    /// Lowercase lifecycle status: "open", "acked" or "closed".
    pub status: String,
    pub acknowledged: bool,
    pub owner: Option<String>,
    pub priority: Option<String>,
    pub alias: Option<String>,
    pub integration_name: Option<String>,
    pub source: Option<String>,
    pub count: i64,
    pub tags: Vec<String>,
    pub message: String,
    pub description: String,
    pub entity: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_occurred_at: Option<DateTime<Utc>>,
}

impl IncidentRecord {
    /// Normalizes a raw incident payload. Some API responses wrap the alert
    /// fields in a nested `data` object; both shapes are accepted. Returns
    /// `None` only when no id can be found at all.
    pub fn from_value(raw: &serde_json::Value) -> Option<Self> {
        let data = raw.get("data").filter(|d| d.is_object()).unwrap_or(raw);

        let id = non_empty_str(data, "id")?;

        let tags = data
            .get("tags")
            .and_then(|t| t.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            id,
            tiny_id: str_field(data, "tinyId"),
            status: str_field(data, "status").to_lowercase(),
            acknowledged: data
                .get("acknowledged")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            owner: opt_str(data, "owner"),
            priority: opt_str(data, "priority"),
            alias: opt_str(data, "alias"),
            integration_name: opt_str(data, "integrationName"),
            source: opt_str(data, "source"),
            count: data.get("count").and_then(|v| v.as_i64()).unwrap_or(1),
            tags,
            message: str_field(data, "message"),
            description: str_field(data, "description"),
            entity: opt_str(data, "entity"),
            created_at: opt_str(data, "createdAt").and_then(|s| extract::parse_timestamp(&s)),
            updated_at: opt_str(data, "updatedAt").and_then(|s| extract::parse_timestamp(&s)),
            last_occurred_at: opt_str(data, "lastOccurredAt")
                .or_else(|| opt_str(data, "lastOccuredAt"))
                .and_then(|s| extract::parse_timestamp(&s)),
        })
    }
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_default()
        .to_string()
}

fn opt_str(v: &serde_json::Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|x| x.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn non_empty_str(v: &serde_json::Value, key: &str) -> Option<String> {
    opt_str(v, key)
}

/// Classification of a correlation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    HighConfidence,
    ExactNameMatch,
    ClusterMatch,
    ContentSimilarity,
    ManualReview,
    LowConfidence,
    None,
    JsmOnly,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::HighConfidence => "high_confidence",
            MatchType::ExactNameMatch => "exact_name_match",
            MatchType::ClusterMatch => "cluster_match",
            MatchType::ContentSimilarity => "content_similarity",
            MatchType::ManualReview => "manual_review",
            MatchType::LowConfidence => "low_confidence",
            MatchType::None => "none",
            MatchType::JsmOnly => "jsm_only",
        }
    }
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One component score together with how it was produced, so every match
/// decision can be explained after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub score: f64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ScoreBreakdown {
    pub fn new(score: f64, method: &str) -> Self {
        Self {
            score,
            method: method.to_string(),
            detail: None,
        }
    }

    pub fn with_detail(score: f64, method: &str, detail: String) -> Self {
        Self {
            score,
            method: method.to_string(),
            detail: Some(detail),
        }
    }
}

/// Per-scorer breakdown persisted alongside a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDetails {
    pub name: ScoreBreakdown,
    pub location: ScoreBreakdown,
    pub severity: ScoreBreakdown,
    pub temporal: ScoreBreakdown,
    pub content: ScoreBreakdown,
    pub confidence: f64,
}

/// Reported state of the monitoring side of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringStatus {
    Active,
    Resolved,
    /// Incident-only records have no monitoring side at all.
    NotApplicable,
}

/// Snapshot of the incident side kept on a correlation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentSnapshot {
    pub id: String,
    pub tiny_id: String,
    pub status: String,
    pub acknowledged: bool,
    pub owner: Option<String>,
    pub priority: Option<String>,
    pub alias: Option<String>,
    pub integration_name: Option<String>,
    pub source: Option<String>,
    pub count: i64,
    pub tags: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_occurred_at: Option<DateTime<Utc>>,
}

impl From<&IncidentRecord> for IncidentSnapshot {
    fn from(incident: &IncidentRecord) -> Self {
        Self {
            id: incident.id.clone(),
            tiny_id: incident.tiny_id.clone(),
            status: incident.status.clone(),
            acknowledged: incident.acknowledged,
            owner: incident.owner.clone(),
            priority: incident.priority.clone(),
            alias: incident.alias.clone(),
            integration_name: incident.integration_name.clone(),
            source: incident.source.clone(),
            count: incident.count,
            tags: incident.tags.clone(),
            created_at: incident.created_at,
            updated_at: incident.updated_at,
            last_occurred_at: incident.last_occurred_at,
        }
    }
}

/// The durable, reconciled view of zero-or-one monitoring alert and
/// zero-or-one incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationRecord {
    /// Business key: the monitoring alert's natural id, or
    /// `jsm-only-<incident id>` for records synthesized from an incident.
    pub key: String,
    pub alert_name: String,
    pub cluster: Option<String>,
    pub severity: Option<String>,
    pub summary: Option<String>,
    pub source: Option<String>,
    pub monitoring_status: MonitoringStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub incident: Option<IncidentSnapshot>,
    pub match_type: MatchType,
    pub match_confidence: f64,
    pub match_details: Option<MatchDetails>,
    pub manual_review_required: bool,
    // Human-action fields are sticky: once set, no sync may clear them.
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CorrelationRecord {
    /// Key used for records that only exist on the incident side.
    pub fn incident_only_key(incident_id: &str) -> String {
        format!("jsm-only-{incident_id}")
    }

    pub fn incident_id(&self) -> Option<&str> {
        self.incident.as_ref().map(|i| i.id.as_str())
    }
}

/// Filter for the record query surface (reporting/export callers).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordFilter {
    pub severity: Option<Vec<String>>,
    pub monitoring_status: Option<Vec<MonitoringStatus>>,
    pub incident_status: Option<Vec<String>>,
    pub cluster_contains: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn incident_from_flat_payload() {
        let raw = json!({
            "id": "abc-123",
            "tinyId": "42",
            "status": "Open",
            "acknowledged": true,
            "owner": "ops",
            "priority": "P2",
            "tags": ["cluster:prod-eu", "alertname:HighCpu"],
            "message": "HighCpu on prod-eu",
            "createdAt": "2025-03-01T10:00:00Z",
            "count": 3
        });
        let incident = IncidentRecord::from_value(&raw).unwrap();
        assert_eq!(incident.id, "abc-123");
        assert_eq!(incident.status, "open");
        assert!(incident.acknowledged);
        assert_eq!(incident.count, 3);
        assert_eq!(incident.tags.len(), 2);
        assert!(incident.created_at.is_some());
    }

    #[test]
    fn incident_from_nested_data_payload() {
        let raw = json!({
            "data": {
                "id": "xyz-9",
                "tinyId": "7",
                "status": "acked",
                "message": "Disk almost full"
            }
        });
        let incident = IncidentRecord::from_value(&raw).unwrap();
        assert_eq!(incident.id, "xyz-9");
        assert_eq!(incident.tiny_id, "7");
        assert_eq!(incident.message, "Disk almost full");
    }

    #[test]
    fn incident_without_id_is_rejected() {
        assert!(IncidentRecord::from_value(&json!({"message": "no id"})).is_none());
    }

    #[test]
    fn match_type_serializes_snake_case() {
        let s = serde_json::to_string(&MatchType::ExactNameMatch).unwrap();
        assert_eq!(s, "\"exact_name_match\"");
        assert_eq!(MatchType::JsmOnly.to_string(), "jsm_only");
    }
}
