//! Pairwise feature scorers. Each returns a score in [0, 1] together with the
//! method that produced it, so match decisions stay explainable.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::models::ScoreBreakdown;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").expect("static regex"));
static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
static LEADING_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(alert|rule|notification)[:\s]*").expect("static regex"));
static TRAILING_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[:\s]*(alert|rule|notification)$").expect("static regex"));

/// Canonical form used for name comparison: lowercase, word/hyphen characters
/// only, single spaces, leading/trailing alert|rule|notification noise
/// removed. Idempotent.
pub fn normalize_alert_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let stripped = NON_WORD.replace_all(&lowered, "");
    let collapsed = MULTI_SPACE.replace_all(&stripped, " ");
    let trimmed = collapsed.trim();
    let no_prefix = LEADING_NOISE.replace(trimmed, "");
    let no_suffix = TRAILING_NOISE.replace(&no_prefix, "");
    no_suffix.trim().to_string()
}

/// Character-level sequence similarity: 2*M / (len_a + len_b) where M is the
/// total length of recursively matched longest common substrings. Mirrors the
/// classic difflib ratio without its junk heuristics.
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let matched = matching_chars(&a, &b);
    2.0 * matched as f64 / (a.len() + b.len()) as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (start_a, start_b, len) = longest_common_block(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..start_a], &b[..start_b])
        + matching_chars(&a[start_a + len..], &b[start_b + len..])
}

fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    // lengths[j] = length of common suffix ending at a[i], b[j]
    let mut lengths = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        let mut prev_diag = 0usize;
        for j in 0..b.len() {
            let current = lengths[j + 1];
            if a[i] == b[j] {
                let len = prev_diag + 1;
                lengths[j + 1] = len;
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            } else {
                lengths[j + 1] = 0;
            }
            prev_diag = current;
        }
    }
    best
}

/// Jaccard ratio over whitespace-separated word sets.
pub fn jaccard_words(a: &str, b: &str) -> f64 {
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}

/// Name scorer: exact normalized match, containment, then the better of the
/// sequence ratio and the word Jaccard ratio.
pub fn score_name(monitoring_name: &str, incident_name: &str) -> ScoreBreakdown {
    if monitoring_name.is_empty() || incident_name.is_empty() {
        return ScoreBreakdown::new(0.0, "missing_names");
    }

    let norm_m = normalize_alert_name(monitoring_name);
    let norm_i = normalize_alert_name(incident_name);

    if norm_m == norm_i {
        return ScoreBreakdown::with_detail(1.0, "exact_match", norm_m);
    }
    if norm_m.contains(&norm_i) || norm_i.contains(&norm_m) {
        return ScoreBreakdown::with_detail(0.90, "substring_match", format!("{norm_m} ~ {norm_i}"));
    }

    let seq = sequence_ratio(&norm_m, &norm_i);
    let jac = jaccard_words(&norm_m, &norm_i);
    if seq >= jac {
        ScoreBreakdown::with_detail(seq, "sequence_match", format!("jaccard={jac:.3}"))
    } else {
        ScoreBreakdown::with_detail(jac, "jaccard_similarity", format!("sequence={seq:.3}"))
    }
}

/// Location scorer. An absent incident-side location is unknown rather than
/// wrong (neutral 0.5); an absent monitoring-side location with a known
/// incident location is mildly penalized, since the monitoring labels are
/// expected to be authoritative.
pub fn score_location(
    monitoring_cluster: Option<&str>,
    incident_cluster: Option<&str>,
) -> ScoreBreakdown {
    let incident = match incident_cluster.filter(|c| !c.is_empty()) {
        Some(c) => c,
        None => return ScoreBreakdown::new(0.5, "no_incident_cluster"),
    };
    let monitoring = match monitoring_cluster.filter(|c| !c.is_empty()) {
        Some(c) => c,
        None => return ScoreBreakdown::new(0.3, "no_monitoring_cluster"),
    };

    let m = monitoring.to_lowercase();
    let i = incident.to_lowercase();
    if m == i {
        return ScoreBreakdown::with_detail(1.0, "exact_match", m);
    }
    if m.contains(&i) || i.contains(&m) {
        return ScoreBreakdown::with_detail(0.85, "substring_match", format!("{m} ~ {i}"));
    }
    ScoreBreakdown::with_detail(
        sequence_ratio(&m, &i),
        "sequence_similarity",
        format!("{m} ~ {i}"),
    )
}

const SEVERITY_GROUPS: [(&str, &[&str]); 4] = [
    ("critical", &["critical", "crit", "p1", "high"]),
    ("warning", &["warning", "warn", "p2", "medium"]),
    ("info", &["info", "information", "p3", "p5", "low"]),
    ("low", &["low", "minor", "p4"]),
];

pub fn severity_group(severity: &str) -> Option<&'static str> {
    SEVERITY_GROUPS
        .iter()
        .find(|(_, keywords)| keywords.contains(&severity))
        .map(|(group, _)| *group)
}

/// Severity scorer: exact string match or same severity group scores full;
/// two different known groups disagree hard; anything unclassifiable is
/// neutral.
pub fn score_severity(
    monitoring_severity: Option<&str>,
    incident_severity: Option<&str>,
) -> ScoreBreakdown {
    let m = monitoring_severity
        .filter(|s| !s.is_empty())
        .unwrap_or("info")
        .to_lowercase();
    let i = incident_severity
        .filter(|s| !s.is_empty())
        .unwrap_or("info")
        .to_lowercase();

    if m == i {
        return ScoreBreakdown::with_detail(1.0, "exact_match", m);
    }

    match (severity_group(&m), severity_group(&i)) {
        (Some(gm), Some(gi)) if gm == gi => {
            ScoreBreakdown::with_detail(1.0, "group_match", gm.to_string())
        }
        (Some(gm), Some(gi)) => {
            ScoreBreakdown::with_detail(0.3, "different_groups", format!("{gm} vs {gi}"))
        }
        _ => ScoreBreakdown::with_detail(0.5, "unknown_mapping", format!("{m} vs {i}")),
    }
}

/// Temporal scorer: a monotonically decreasing step function of the absolute
/// difference in minutes. Either timestamp missing (or known to be a parse
/// fallback) yields a neutral score.
pub fn score_temporal(
    monitoring_time: Option<DateTime<Utc>>,
    incident_time: Option<DateTime<Utc>>,
) -> ScoreBreakdown {
    let (m, i) = match (monitoring_time, incident_time) {
        (Some(m), Some(i)) => (m, i),
        _ => return ScoreBreakdown::new(0.5, "missing_timestamps"),
    };

    let diff_minutes = (m - i).num_seconds().abs() as f64 / 60.0;
    let (score, category) = if diff_minutes <= 2.0 {
        (1.0, "very_close")
    } else if diff_minutes <= 5.0 {
        (0.9, "close")
    } else if diff_minutes <= 15.0 {
        (0.7, "within_window")
    } else if diff_minutes <= 30.0 {
        (0.5, "nearby")
    } else if diff_minutes <= 60.0 {
        (0.3, "distant")
    } else {
        (0.1, "very_distant")
    };

    ScoreBreakdown::with_detail(
        score,
        "time_proximity",
        format!("{category} ({diff_minutes:.1}m)"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn normalize_strips_noise_and_is_idempotent() {
        let normalized = normalize_alert_name("Alert: High CPU (prod)!");
        assert_eq!(normalized, "high cpu prod");
        assert_eq!(normalize_alert_name(&normalized), normalized);

        let hyphenated = normalize_alert_name("pod-not-healthy-prometheus-metrics-platform-k8s");
        assert_eq!(hyphenated, "pod-not-healthy-prometheus-metrics-platform-k8s");
        assert_eq!(normalize_alert_name(&hyphenated), hyphenated);
    }

    #[test]
    fn normalize_strips_trailing_token() {
        assert_eq!(normalize_alert_name("DiskFull rule"), "diskfull");
    }

    #[test]
    fn sequence_ratio_bounds() {
        assert_eq!(sequence_ratio("abc", "abc"), 1.0);
        assert_eq!(sequence_ratio("abc", ""), 0.0);
        let r = sequence_ratio("kubernetes", "kubernete5");
        assert!(r > 0.8 && r < 1.0);
    }

    #[test]
    fn name_exact_match_after_normalization() {
        let s = score_name("Alert: HighCPU", "highcpu");
        assert_eq!(s.score, 1.0);
        assert_eq!(s.method, "exact_match");
    }

    #[test]
    fn name_substring_scores_090() {
        let s = score_name("HighCPU", "HighCPU on node-3 cluster");
        assert_eq!(s.score, 0.90);
        assert_eq!(s.method, "substring_match");
    }

    #[test]
    fn name_missing_scores_zero() {
        assert_eq!(score_name("", "whatever").score, 0.0);
    }

    #[test]
    fn name_fuzzy_records_winning_method() {
        let s = score_name("disk space low node", "node disk space low");
        // Identical word sets: Jaccard is 1.0 and must win over the sequence ratio.
        assert_eq!(s.score, 1.0);
        assert_eq!(s.method, "jaccard_similarity");
    }

    #[test]
    fn location_neutral_and_penalty_asymmetry() {
        assert_eq!(score_location(Some("prod-eu"), None).score, 0.5);
        assert_eq!(score_location(None, Some("prod-eu")).score, 0.3);
        assert_eq!(score_location(Some("Prod-EU"), Some("prod-eu")).score, 1.0);
        assert_eq!(
            score_location(Some("prod-eu"), Some("prod-eu-west-1")).score,
            0.85
        );
    }

    #[test]
    fn severity_group_mapping() {
        assert_eq!(score_severity(Some("critical"), Some("p1")).score, 1.0);
        assert_eq!(score_severity(Some("critical"), Some("warn")).score, 0.3);
        assert_eq!(score_severity(Some("weird"), Some("odd")).score, 0.5);
        // Missing severities default to info and match exactly.
        assert_eq!(score_severity(None, None).score, 1.0);
    }

    #[test]
    fn temporal_step_function() {
        let base = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let minutes = |m: i64| Some(base + chrono::Duration::minutes(m));
        assert_eq!(score_temporal(Some(base), minutes(2)).score, 1.0);
        assert_eq!(score_temporal(Some(base), minutes(5)).score, 0.9);
        assert_eq!(score_temporal(Some(base), minutes(15)).score, 0.7);
        assert_eq!(score_temporal(Some(base), minutes(30)).score, 0.5);
        assert_eq!(score_temporal(Some(base), minutes(60)).score, 0.3);
        assert_eq!(score_temporal(Some(base), minutes(120)).score, 0.1);
        assert_eq!(score_temporal(Some(base), None).score, 0.5);
    }
}
