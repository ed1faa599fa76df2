//! Feature extractors: pull the five canonical features (name, location,
//! severity, timestamp, text body) out of the two sources' irregular shapes.
//! Every extractor degrades to an empty/neutral value instead of failing, so
//! one malformed record can never abort a correlation pass.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{IncidentRecord, MonitoringAlert};

/// Parses an ISO-8601-like timestamp. Tolerates a trailing literal `Z`
/// (rewritten to `+00:00`) and fractional seconds longer than 6 digits
/// (truncated). Returns `None` on anything unparseable; callers decide what
/// an unknown timestamp means.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut normalized = if let Some(stripped) = trimmed.strip_suffix('Z') {
        format!("{stripped}+00:00")
    } else {
        trimmed.to_string()
    };
    normalized = truncate_subseconds(&normalized);
    DateTime::parse_from_rfc3339(&normalized)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn truncate_subseconds(value: &str) -> String {
    let Some(dot) = value.find('.') else {
        return value.to_string();
    };
    let frac_start = dot + 1;
    let frac_len = value[frac_start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .count();
    if frac_len <= 6 {
        return value.to_string();
    }
    format!(
        "{}{}",
        &value[..frac_start + 6],
        &value[frac_start + frac_len..]
    )
}

// ---------------------------------------------------------------------------
// Monitoring side
// ---------------------------------------------------------------------------

const CLUSTER_LABELS: &[&str] = &[
    "cluster",
    "cluster_name",
    "kubernetes_cluster",
    "k8s_cluster",
    "region",
];

pub fn monitoring_name(alert: &MonitoringAlert) -> String {
    alert
        .labels
        .get("alertname")
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| alert.alert_name.clone())
}

pub fn monitoring_cluster(alert: &MonitoringAlert) -> Option<String> {
    for label in CLUSTER_LABELS {
        if let Some(value) = alert.labels.get(*label).filter(|v| !v.is_empty()) {
            return Some(value.clone());
        }
    }
    if let Some(instance) = alert.labels.get("instance") {
        if let Some(cluster) = cluster_from_instance(instance) {
            return Some(cluster);
        }
    }
    alert.labels.get("job").filter(|v| !v.is_empty()).cloned()
}

const SEVERITY_LABELS: &[&str] = &["severity", "priority", "level"];

pub fn monitoring_severity(alert: &MonitoringAlert) -> String {
    for label in SEVERITY_LABELS {
        if let Some(value) = alert.labels.get(*label).filter(|v| !v.is_empty()) {
            return value.to_lowercase();
        }
    }
    for label in SEVERITY_LABELS {
        if let Some(value) = alert.annotations.get(*label).filter(|v| !v.is_empty()) {
            return value.to_lowercase();
        }
    }
    "info".to_string()
}

/// Searchable body: name label, all annotation values (in stable key order,
/// so downstream scoring is deterministic), and the summary.
pub fn monitoring_text(alert: &MonitoringAlert) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(name) = alert.labels.get("alertname") {
        parts.push(name);
    }
    let mut annotation_keys: Vec<&String> = alert.annotations.keys().collect();
    annotation_keys.sort();
    for key in annotation_keys {
        let value = &alert.annotations[key];
        if !value.trim().is_empty() {
            parts.push(value);
        }
    }
    if let Some(summary) = alert.summary.as_deref() {
        if !summary.trim().is_empty() {
            parts.push(summary);
        }
    }
    parts.join(" ")
}

// ---------------------------------------------------------------------------
// Incident side
// ---------------------------------------------------------------------------

static MESSAGE_NAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // [Grafana]: *Summary*: AlertName
        r"\[Grafana\]:\s*\*[^*]+\*:\s*([^\s\n]+)",
        r"\*Summary\*:\s*([^\s\n*]+)",
        r"Alert:\s*([A-Za-z0-9_-]+)",
        // Leading identifier-like token.
        r"^([A-Za-z0-9_-]{3,})",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

static INFRA_NAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(pod-[a-z0-9-]+)",
        r"(?i)(container-[a-z0-9-]+)",
        r"(?i)([a-z0-9-]+prometheus[a-z0-9-]*)",
        r"(?i)([a-z0-9-]+metrics[a-z0-9-]*)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

static DESCRIPTION_NAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)Alert:\s*([A-Za-z0-9_-]+)",
        r"(?i)AlertName:\s*([A-Za-z0-9_-]+)",
        r"(?i)Rule:\s*([A-Za-z0-9_-]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

const GENERIC_NAMES: &[&str] = &[
    "alert",
    "error",
    "warning",
    "info",
    "debug",
    "message",
    "notification",
    "the",
    "and",
    "or",
    "but",
    "in",
    "on",
    "at",
    "to",
    "for",
    "of",
    "with",
    "by",
];

static HAS_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z0-9]").expect("static regex"));
static PURE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("static regex"));
static NO_LETTERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^a-zA-Z]*$").expect("static regex"));

/// A candidate is accepted only if it plausibly names an alert: long enough,
/// not a bare number, not a stop word, and carries alphanumeric content.
pub fn is_valid_alert_name(name: &str) -> bool {
    if name.len() < 3 {
        return false;
    }
    let lowered = name.to_lowercase();
    if GENERIC_NAMES.contains(&lowered.as_str()) {
        return false;
    }
    if PURE_NUMBER.is_match(name) || NO_LETTERS.is_match(name) {
        return false;
    }
    HAS_ALNUM.is_match(name)
}

/// Extracts an alert name from an incident, trying each strategy in priority
/// order: alertname tag, message patterns, infra-name patterns, alias,
/// description patterns, then a deterministic source-derived fallback.
pub fn incident_name(incident: &IncidentRecord) -> Option<String> {
    for tag in &incident.tags {
        if let Some(value) = tag.strip_prefix("alertname:") {
            let candidate = value.trim();
            if is_valid_alert_name(candidate) {
                return Some(candidate.to_string());
            }
        }
    }

    let message = incident.message.trim();
    if !message.is_empty() {
        for pattern in MESSAGE_NAME_PATTERNS.iter() {
            if let Some(candidate) = first_capture(pattern, message) {
                if is_valid_alert_name(&candidate) {
                    return Some(candidate);
                }
            }
        }
        for pattern in INFRA_NAME_PATTERNS.iter() {
            if let Some(candidate) = first_capture(pattern, message) {
                if is_valid_alert_name(&candidate) {
                    return Some(candidate);
                }
            }
        }
    }

    if let Some(alias) = incident.alias.as_deref() {
        let alias = alias.trim();
        if is_valid_alert_name(alias) {
            return Some(alias.to_string());
        }
    }

    let description = incident.description.trim();
    if !description.is_empty() {
        for pattern in DESCRIPTION_NAME_PATTERNS.iter() {
            if let Some(candidate) = first_capture(pattern, description) {
                if is_valid_alert_name(&candidate) {
                    return Some(candidate);
                }
            }
        }
    }

    if !incident.tiny_id.is_empty() {
        let source = incident.source.as_deref().unwrap_or("jsm");
        return Some(format!("{source}-alert-{}", incident.tiny_id));
    }

    tracing::debug!(incident_id = %incident.id, "could not extract a name from incident");
    None
}

fn first_capture(pattern: &Regex, haystack: &str) -> Option<String> {
    pattern
        .captures(haystack)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

static TAG_ENV_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([a-zA-Z0-9_-]*(?:prod|staging|dev|test)[a-zA-Z0-9_-]*)")
        .expect("static regex")
});

static MESSAGE_CLUSTER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)cluster[:\s]+([a-zA-Z0-9_-]+)",
        r"(?i)datanode-\d+-([a-zA-Z0-9_-]+)",
        r"(?i)([a-zA-Z0-9_-]+)-cloud-",
        r"(?i)in\s+([a-zA-Z0-9_-]+)\s+cluster",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

static INSTANCE_CLUSTER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // e.g. datanode-21-pro-cloud-shared-aws-us-east-1
        r"^([a-zA-Z0-9_-]+)-cloud-",
        r"^([a-zA-Z0-9_-]+?)-\d+-",
        r"^([a-zA-Z]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

static CLUSTER_CHARSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("static regex"));

static CLUSTER_INDICATORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(prod|production|staging|stage|dev|development|test|testing)",
        r"(cluster|k8s|kubernetes)",
        r"(east|west|north|south|us|eu|asia)",
        r"(aws|azure|gcp|cloud)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

/// Conservative check that a token plausibly names a cluster: restricted
/// character set plus at least one environment/region/provider indicator.
pub fn looks_like_cluster_name(name: &str) -> bool {
    if name.len() < 2 || !CLUSTER_CHARSET.is_match(name) {
        return false;
    }
    let lowered = name.to_lowercase();
    CLUSTER_INDICATORS.iter().any(|p| p.is_match(&lowered))
}

pub fn cluster_from_instance(instance: &str) -> Option<String> {
    if instance.is_empty() {
        return None;
    }
    for pattern in INSTANCE_CLUSTER_PATTERNS.iter() {
        if let Some(candidate) = first_capture(pattern, instance) {
            if looks_like_cluster_name(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

/// Extracts a cluster from an incident: cluster/instance tags, environment
/// tokens in other tags, message patterns, then the entity field.
pub fn incident_cluster(incident: &IncidentRecord) -> Option<String> {
    for tag in &incident.tags {
        if let Some(value) = tag.strip_prefix("cluster:") {
            let candidate = value.trim();
            if looks_like_cluster_name(candidate) {
                return Some(candidate.to_string());
            }
        }
        if let Some(value) = tag.strip_prefix("instance:") {
            if let Some(cluster) = cluster_from_instance(value.trim()) {
                return Some(cluster);
            }
        }
        if let Some(candidate) = first_capture(&TAG_ENV_PATTERN, tag) {
            if looks_like_cluster_name(&candidate) {
                return Some(candidate);
            }
        }
    }

    for pattern in MESSAGE_CLUSTER_PATTERNS.iter() {
        if let Some(candidate) = first_capture(pattern, &incident.message) {
            if looks_like_cluster_name(&candidate) {
                return Some(candidate);
            }
        }
    }

    incident
        .entity
        .as_deref()
        .map(str::trim)
        .filter(|e| looks_like_cluster_name(e))
        .map(str::to_string)
}

const SEVERITY_KEYWORDS: [(&str, &[&str]); 4] = [
    ("critical", &["critical", "crit", "p1", "severity:critical"]),
    ("warning", &["warning", "warn", "p2", "severity:warning"]),
    ("info", &["info", "information", "p3", "p5", "severity:info"]),
    ("low", &["low", "minor", "p4", "severity:low"]),
];

/// Severity from an incident: priority code first, then tag keywords, then
/// free-text keywords, defaulting to `info`.
pub fn incident_severity(incident: &IncidentRecord) -> String {
    if let Some(priority) = incident.priority.as_deref() {
        let mapped = match priority.to_uppercase().as_str() {
            "P1" => Some("critical"),
            "P2" => Some("warning"),
            "P3" | "P5" => Some("info"),
            "P4" => Some("low"),
            _ => None,
        };
        if let Some(severity) = mapped {
            return severity.to_string();
        }
    }

    for tag in &incident.tags {
        let tag_lower = tag.to_lowercase();
        for (severity, keywords) in SEVERITY_KEYWORDS {
            if keywords.iter().any(|k| tag_lower.contains(k)) {
                return severity.to_string();
            }
        }
    }

    let text = format!("{} {}", incident.message, incident.description).to_lowercase();
    for (severity, keywords) in SEVERITY_KEYWORDS {
        if keywords.iter().any(|k| text.contains(k)) {
            return severity.to_string();
        }
    }

    "info".to_string()
}

/// Searchable body: message, description, and the tags that are not just
/// identifiers or addresses.
pub fn incident_text(incident: &IncidentRecord) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if !incident.message.trim().is_empty() {
        parts.push(&incident.message);
    }
    if !incident.description.trim().is_empty() {
        parts.push(&incident.description);
    }
    for tag in &incident.tags {
        let lowered = tag.to_lowercase();
        if !["ip:", "id:", "uuid:"].iter().any(|x| lowered.contains(x)) {
            parts.push(tag);
        }
    }
    parts.join(" ")
}
