//! Grafana Alertmanager client.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info};

use super::AlertSource;
use crate::config::GrafanaConfig;
use crate::correlation::extract;
use crate::models::MonitoringAlert;

/// Alertmanager v2 alert payload, shared by Grafana's embedded Alertmanager
/// and standalone Prometheus Alertmanager endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct AmAlert {
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(rename = "startsAt")]
    pub starts_at: Option<String>,
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub status: AmStatus,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AmStatus {
    #[serde(default)]
    pub state: String,
}

impl AmAlert {
    pub(crate) fn is_active(&self) -> bool {
        self.status.state == "active"
    }

    pub(crate) fn into_monitoring_alert(
        self,
        source: &str,
        source_instance: Option<&str>,
    ) -> MonitoringAlert {
        let alert_name = self
            .labels
            .get("alertname")
            .cloned()
            .unwrap_or_else(|| "Unnamed".to_string());
        let fingerprint = self.fingerprint.unwrap_or_default();
        let parsed = self
            .starts_at
            .as_deref()
            .and_then(extract::parse_timestamp);
        let starts_at_estimated = parsed.is_none();

        MonitoringAlert {
            alert_id: format!("{alert_name}-{fingerprint}"),
            alert_name,
            cluster: self.labels.get("cluster").cloned(),
            severity: self.labels.get("severity").cloned(),
            summary: self
                .annotations
                .get("summary")
                .or_else(|| self.annotations.get("message"))
                .cloned(),
            description: self
                .annotations
                .get("description")
                .cloned()
                .unwrap_or_default(),
            starts_at: parsed.unwrap_or_else(Utc::now),
            starts_at_estimated,
            labels: self.labels,
            annotations: self.annotations,
            source: source.to_string(),
            source_instance: source_instance.map(str::to_string),
        }
    }
}

pub struct GrafanaClient {
    client: Client,
    config: GrafanaConfig,
}

impl GrafanaClient {
    pub fn new(config: GrafanaConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }
}

#[async_trait]
impl AlertSource for GrafanaClient {
    async fn fetch_monitoring_alerts(&self) -> Vec<MonitoringAlert> {
        if !self.config.enabled || self.config.api_url.is_empty() {
            return Vec::new();
        }

        let url = format!(
            "{}/api/alertmanager/grafana/api/v2/alerts",
            self.config.api_url.trim_end_matches('/')
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await;

        let alerts: Vec<AmAlert> = match response {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => match resp.json().await {
                    Ok(alerts) => alerts,
                    Err(err) => {
                        error!(%err, "failed to decode Grafana alerts payload");
                        return Vec::new();
                    }
                },
                Err(err) => {
                    error!(%err, "Grafana returned an error status");
                    return Vec::new();
                }
            },
            Err(err) => {
                error!(%err, "failed to fetch alerts from Grafana");
                return Vec::new();
            }
        };

        let active: Vec<MonitoringAlert> = alerts
            .into_iter()
            .filter(AmAlert::is_active)
            .map(|alert| alert.into_monitoring_alert("grafana", None))
            .collect();

        info!(count = active.len(), "fetched active Grafana alerts");
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn am_alert_maps_fields() {
        let raw = serde_json::json!({
            "labels": {"alertname": "HighCpu", "cluster": "prod-eu", "severity": "critical"},
            "annotations": {"summary": "CPU is high"},
            "startsAt": "2025-03-01T10:00:00Z",
            "fingerprint": "deadbeef",
            "status": {"state": "active"}
        });
        let alert: AmAlert = serde_json::from_value(raw).unwrap();
        assert!(alert.is_active());
        let mapped = alert.into_monitoring_alert("grafana", None);
        assert_eq!(mapped.alert_id, "HighCpu-deadbeef");
        assert_eq!(mapped.cluster.as_deref(), Some("prod-eu"));
        assert_eq!(mapped.summary.as_deref(), Some("CPU is high"));
        assert!(!mapped.starts_at_estimated);
    }

    #[test]
    fn unparseable_start_time_is_flagged_estimated() {
        let raw = serde_json::json!({
            "labels": {"alertname": "HighCpu"},
            "startsAt": "garbage",
            "status": {"state": "active"}
        });
        let alert: AmAlert = serde_json::from_value(raw).unwrap();
        let mapped = alert.into_monitoring_alert("grafana", None);
        assert!(mapped.starts_at_estimated);
    }

    #[test]
    fn suppressed_alerts_are_not_active() {
        let raw = serde_json::json!({
            "labels": {"alertname": "HighCpu"},
            "status": {"state": "suppressed"}
        });
        let alert: AmAlert = serde_json::from_value(raw).unwrap();
        assert!(!alert.is_active());
    }
}
