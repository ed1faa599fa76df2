//! Confidence aggregation and the greedy one-to-one assignment between
//! monitoring alerts and incident records.

use tracing::{debug, info};

use crate::config::{MatchThresholds, MatchWeights, MatchingConfig};
use crate::correlation::{extract, similarity, text::TextSimilarity, text};
use crate::models::{
    IncidentRecord, MatchDetails, MatchType, MonitoringAlert, ScoreBreakdown,
};

/// Correlation result for a single monitoring alert.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub alert: MonitoringAlert,
    pub incident: Option<IncidentRecord>,
    pub match_type: MatchType,
    pub confidence: f64,
    pub details: Option<MatchDetails>,
}

/// Output of one correlation pass: a result for every monitoring alert plus
/// the incidents no alert claimed.
#[derive(Debug)]
pub struct CorrelationOutcome {
    pub results: Vec<MatchResult>,
    pub incident_only: Vec<IncidentRecord>,
}

pub struct CorrelationEngine {
    weights: MatchWeights,
    thresholds: MatchThresholds,
    content: Box<dyn TextSimilarity>,
}

impl CorrelationEngine {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            weights: config.weights,
            thresholds: config.thresholds,
            content: text::build_scorer(config.content_scorer),
        }
    }

    /// Weighted confidence for one alert/incident pair, with the full
    /// per-scorer breakdown. Infallible: every scorer degrades to a neutral
    /// value instead of failing, so one bad pair can never abort a batch.
    pub fn score_pair(
        &self,
        alert: &MonitoringAlert,
        incident: &IncidentRecord,
    ) -> (f64, MatchDetails) {
        let monitoring_name = extract::monitoring_name(alert);
        let incident_name = extract::incident_name(incident).unwrap_or_default();
        let name = similarity::score_name(&monitoring_name, &incident_name);

        let monitoring_cluster = extract::monitoring_cluster(alert);
        let incident_cluster = extract::incident_cluster(incident);
        let location =
            similarity::score_location(monitoring_cluster.as_deref(), incident_cluster.as_deref());

        let severity = similarity::score_severity(
            Some(&extract::monitoring_severity(alert)),
            Some(&extract::incident_severity(incident)),
        );

        // A fallback timestamp means "unknown", not "now".
        let monitoring_time = (!alert.starts_at_estimated).then_some(alert.starts_at);
        let temporal = similarity::score_temporal(monitoring_time, incident.created_at);

        let monitoring_text = extract::monitoring_text(alert);
        let incident_text = extract::incident_text(incident);
        let content = if monitoring_text.trim().is_empty() || incident_text.trim().is_empty() {
            ScoreBreakdown::new(0.5, "missing_content")
        } else {
            self.content.score(&monitoring_text, &incident_text)
        };

        let confidence = self.weights.name * name.score
            + self.weights.location * location.score
            + self.weights.severity * severity.score
            + self.weights.temporal * temporal.score
            + self.weights.content * content.score;

        let details = MatchDetails {
            name,
            location,
            severity,
            temporal,
            content,
            confidence,
        };
        (confidence, details)
    }

    /// Classifies a confidence value into its match-type band.
    pub fn classify(&self, confidence: f64, details: &MatchDetails) -> MatchType {
        if confidence >= self.thresholds.high {
            MatchType::HighConfidence
        } else if confidence >= self.thresholds.accept {
            if details.name.method == "exact_match" {
                MatchType::ExactNameMatch
            } else if details.location.method == "exact_match" {
                MatchType::ClusterMatch
            } else {
                MatchType::ContentSimilarity
            }
        } else if confidence >= self.thresholds.manual_review {
            MatchType::ManualReview
        } else {
            MatchType::LowConfidence
        }
    }

    pub fn accept_threshold(&self) -> f64 {
        self.thresholds.accept
    }

    /// Greedy one-to-one assignment: alerts are processed in input order and
    /// each takes the single best still-unclaimed incident at or above the
    /// acceptance threshold. Ties keep the first-seen incident because only a
    /// strictly greater confidence displaces the current best. Greedy rather
    /// than globally optimal assignment is a deliberate approximation.
    pub fn correlate(
        &self,
        alerts: &[MonitoringAlert],
        incidents: &[IncidentRecord],
    ) -> CorrelationOutcome {
        info!(
            alerts = alerts.len(),
            incidents = incidents.len(),
            "starting correlation pass"
        );

        let mut claimed = vec![false; incidents.len()];
        let mut results = Vec::with_capacity(alerts.len());

        for alert in alerts {
            let mut best: Option<(usize, f64, MatchDetails)> = None;

            for (idx, incident) in incidents.iter().enumerate() {
                if claimed[idx] {
                    continue;
                }
                let (confidence, details) = self.score_pair(alert, incident);
                if confidence < self.accept_threshold() {
                    continue;
                }
                let is_better = best
                    .as_ref()
                    .map(|(_, best_confidence, _)| confidence > *best_confidence)
                    .unwrap_or(true);
                if is_better {
                    best = Some((idx, confidence, details));
                }
            }

            match best {
                Some((idx, confidence, details)) => {
                    claimed[idx] = true;
                    let incident = incidents[idx].clone();
                    let match_type = self.classify(confidence, &details);
                    debug!(
                        alert = %alert.alert_name,
                        incident = %incident.tiny_id,
                        confidence = format!("{confidence:.3}"),
                        %match_type,
                        "matched alert to incident"
                    );
                    results.push(MatchResult {
                        alert: alert.clone(),
                        incident: Some(incident),
                        match_type,
                        confidence,
                        details: Some(details),
                    });
                }
                None => {
                    results.push(MatchResult {
                        alert: alert.clone(),
                        incident: None,
                        match_type: MatchType::None,
                        confidence: 0.0,
                        details: None,
                    });
                }
            }
        }

        let incident_only: Vec<IncidentRecord> = incidents
            .iter()
            .zip(&claimed)
            .filter(|(_, claimed)| !**claimed)
            .map(|(incident, _)| incident.clone())
            .collect();

        let matched = results.iter().filter(|r| r.incident.is_some()).count();
        info!(
            matched,
            total = results.len(),
            incident_only = incident_only.len(),
            "correlation pass completed"
        );

        CorrelationOutcome {
            results,
            incident_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchingConfig;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashMap;

    fn engine() -> CorrelationEngine {
        CorrelationEngine::new(&MatchingConfig::default())
    }

    fn base_time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn alert(name: &str, cluster: Option<&str>, minutes_offset: i64) -> MonitoringAlert {
        let mut labels = HashMap::new();
        labels.insert("alertname".to_string(), name.to_string());
        labels.insert("severity".to_string(), "critical".to_string());
        if let Some(c) = cluster {
            labels.insert("cluster".to_string(), c.to_string());
        }
        MonitoringAlert {
            alert_id: format!("{name}-fp"),
            alert_name: name.to_string(),
            cluster: cluster.map(str::to_string),
            severity: Some("critical".to_string()),
            summary: Some(format!("{name} firing")),
            description: String::new(),
            starts_at: base_time() + Duration::minutes(minutes_offset),
            starts_at_estimated: false,
            labels,
            annotations: HashMap::new(),
            source: "grafana".to_string(),
            source_instance: None,
        }
    }

    fn incident_for(name: &str, cluster: Option<&str>, minutes_offset: i64) -> IncidentRecord {
        let mut tags = vec![format!("alertname:{name}")];
        if let Some(c) = cluster {
            tags.push(format!("cluster:{c}"));
        }
        IncidentRecord {
            id: format!("jsm-{name}"),
            tiny_id: "1".to_string(),
            status: "open".to_string(),
            priority: Some("P1".to_string()),
            tags,
            message: format!("{name} firing"),
            created_at: Some(base_time() + Duration::minutes(minutes_offset)),
            ..Default::default()
        }
    }

    #[test]
    fn exact_name_same_cluster_is_high_confidence() {
        // Scenario: identical alert name via tag, same cluster, 2 minutes apart.
        let name = "pod-not-healthy-prometheus-metrics-platform-k8s";
        let a = alert(name, Some("prod-eu"), 0);
        let i = incident_for(name, Some("prod-eu"), 2);

        let engine = engine();
        let (confidence, details) = engine.score_pair(&a, &i);
        assert!(confidence >= 0.85, "confidence was {confidence}");
        assert_eq!(engine.classify(confidence, &details), MatchType::HighConfidence);
        assert_eq!(details.name.method, "exact_match");
    }

    #[test]
    fn disjoint_alerts_score_low() {
        let a = alert("DiskSpaceWarning", None, 0);
        let mut i = incident_for("ignored", None, 120);
        i.tags = vec![];
        i.message = "Network connectivity issue".to_string();
        i.priority = Some("P3".to_string());

        let engine = engine();
        let (confidence, details) = engine.score_pair(&a, &i);
        assert!(confidence < 0.40, "confidence was {confidence}");
        let match_type = engine.classify(confidence, &details);
        assert_eq!(match_type, MatchType::LowConfidence);
    }

    #[test]
    fn unclaimed_incidents_surface_as_incident_only() {
        let alerts = vec![alert("HighCpu", Some("prod-eu"), 0)];
        let incidents = vec![
            incident_for("HighCpu", Some("prod-eu"), 1),
            incident_for("UnrelatedIncident", Some("prod-us"), 1),
        ];
        let outcome = engine().correlate(&alerts, &incidents);
        assert_eq!(outcome.incident_only.len(), 1);
        assert_eq!(outcome.incident_only[0].id, "jsm-UnrelatedIncident");
    }

    #[test]
    fn assignment_is_one_to_one() {
        // Two identical alerts and a single matching incident: only one may
        // claim it.
        let alerts = vec![alert("HighCpu", Some("prod-eu"), 0), alert("HighCpu", Some("prod-eu"), 0)];
        let incidents = vec![incident_for("HighCpu", Some("prod-eu"), 1)];
        let outcome = engine().correlate(&alerts, &incidents);

        let assigned: Vec<&str> = outcome
            .results
            .iter()
            .filter_map(|r| r.incident.as_ref().map(|i| i.id.as_str()))
            .collect();
        assert_eq!(assigned.len(), 1);
        assert_eq!(outcome.results[0].incident.as_ref().unwrap().id, "jsm-HighCpu");
        assert_eq!(outcome.results[1].match_type, MatchType::None);
        assert_eq!(outcome.results[1].confidence, 0.0);
    }

    #[test]
    fn correlation_is_deterministic() {
        let alerts = vec![
            alert("HighCpu", Some("prod-eu"), 0),
            alert("DiskFull", Some("prod-us"), 0),
        ];
        let incidents = vec![
            incident_for("DiskFull", Some("prod-us"), 3),
            incident_for("HighCpu", Some("prod-eu"), 1),
        ];
        let engine = engine();
        let first = engine.correlate(&alerts, &incidents);
        let second = engine.correlate(&alerts, &incidents);
        for (a, b) in first.results.iter().zip(&second.results) {
            assert_eq!(a.confidence, b.confidence);
            assert_eq!(
                a.incident.as_ref().map(|i| &i.id),
                b.incident.as_ref().map(|i| &i.id)
            );
        }
    }

    #[test]
    fn boundary_confidence_at_threshold_is_accepted() {
        let engine = engine();
        let details = MatchDetails {
            name: ScoreBreakdown::new(0.7, "sequence_match"),
            location: ScoreBreakdown::new(0.7, "sequence_similarity"),
            severity: ScoreBreakdown::new(0.7, "group_match"),
            temporal: ScoreBreakdown::new(0.7, "time_proximity"),
            content: ScoreBreakdown::new(0.7, "tfidf_cosine"),
            confidence: 0.70,
        };
        assert_eq!(
            engine.classify(0.70, &details),
            MatchType::ContentSimilarity
        );
        assert_eq!(engine.classify(0.699, &details), MatchType::ManualReview);
        assert_eq!(engine.classify(0.59, &details), MatchType::LowConfidence);
        assert_eq!(engine.classify(0.85, &details), MatchType::HighConfidence);
    }

    #[test]
    fn accept_band_prefers_exact_name_label() {
        let engine = engine();
        let mut details = MatchDetails {
            name: ScoreBreakdown::new(1.0, "exact_match"),
            location: ScoreBreakdown::new(0.3, "no_monitoring_cluster"),
            severity: ScoreBreakdown::new(0.5, "unknown_mapping"),
            temporal: ScoreBreakdown::new(0.5, "missing_timestamps"),
            content: ScoreBreakdown::new(0.5, "missing_content"),
            confidence: 0.75,
        };
        assert_eq!(engine.classify(0.75, &details), MatchType::ExactNameMatch);
        details.name.method = "substring_match".to_string();
        details.location.method = "exact_match".to_string();
        assert_eq!(engine.classify(0.75, &details), MatchType::ClusterMatch);
    }

    #[test]
    fn estimated_start_time_is_neutral_for_temporal() {
        let mut a = alert("HighCpu", Some("prod-eu"), 0);
        a.starts_at_estimated = true;
        let i = incident_for("HighCpu", Some("prod-eu"), 500);
        let (_, details) = engine().score_pair(&a, &i);
        assert_eq!(details.temporal.method, "missing_timestamps");
        assert_eq!(details.temporal.score, 0.5);
    }
}
