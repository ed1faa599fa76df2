use serde::Deserialize;
use std::{env, fs, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GrafanaConfig {
    pub enabled: bool,
    pub api_url: String,
    pub api_key: String,
    pub timeout_seconds: u64,
}

impl Default for GrafanaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: String::new(),
            api_key: String::new(),
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub enabled: bool,
    pub api_urls: Vec<String>,
    pub timeout_seconds: u64,
    /// How long an endpoint stays skipped after repeated failures before the
    /// next fetch attempts it again.
    pub health_recheck_seconds: u64,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_urls: Vec::new(),
            timeout_seconds: 30,
            health_recheck_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JsmConfig {
    pub tenant_url: String,
    pub user_email: String,
    pub api_token: String,
    /// Resolved from the tenant on first use when not configured.
    pub cloud_id: Option<String>,
    pub api_base_url: String,
    pub alerts_limit: usize,
    pub timeout_seconds: u64,
    pub rate_limit_per_minute: u32,
}

impl Default for JsmConfig {
    fn default() -> Self {
        Self {
            tenant_url: String::new(),
            user_email: String::new(),
            api_token: String::new(),
            cloud_id: None,
            api_base_url: "https://api.atlassian.com/jsm/ops/api".to_string(),
            alerts_limit: 500,
            timeout_seconds: 30,
            rate_limit_per_minute: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MatchWeights {
    pub name: f64,
    pub location: f64,
    pub severity: f64,
    pub temporal: f64,
    pub content: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            name: 0.40,
            location: 0.25,
            severity: 0.15,
            temporal: 0.10,
            content: 0.10,
        }
    }
}

impl MatchWeights {
    pub fn sum(&self) -> f64 {
        self.name + self.location + self.severity + self.temporal + self.content
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MatchThresholds {
    pub high: f64,
    /// The acceptance threshold used during matching; candidates below it are
    /// never assigned.
    pub accept: f64,
    pub manual_review: f64,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            high: 0.85,
            accept: 0.70,
            manual_review: 0.60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentScorer {
    Tfidf,
    WordOverlap,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub weights: MatchWeights,
    pub thresholds: MatchThresholds,
    pub content_scorer: ContentScorer,
    pub cycle_timeout_seconds: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            weights: MatchWeights::default(),
            thresholds: MatchThresholds::default(),
            content_scorer: ContentScorer::Tfidf,
            cycle_timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Drop monitoring alerts coming from non-production clusters or
    /// environments before correlation.
    pub exclude_non_prod: bool,
    pub excluded_clusters: Vec<String>,
    pub excluded_environments: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            exclude_non_prod: true,
            excluded_clusters: vec![
                "stage".to_string(),
                "dev".to_string(),
                "test".to_string(),
                "staging".to_string(),
                "development".to_string(),
            ],
            excluded_environments: vec![
                "staging".to_string(),
                "development".to_string(),
                "dev".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_seconds: u64,
    /// Close the remote incident when its monitoring alert stops firing.
    pub auto_close: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            auto_close: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub grafana: GrafanaConfig,
    pub prometheus: PrometheusConfig,
    pub jsm: JsmConfig,
    pub matching: MatchingConfig,
    pub filter: FilterConfig,
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Loads the TOML file, applies environment overrides for credentials and
    /// endpoints, and validates the result. A missing file yields defaults so
    /// a purely env-driven deployment works too.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let mut config = if Path::new(path).exists() {
            let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_string(),
                source,
            })?;
            toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_string(),
                source,
            })?
        } else {
            tracing::warn!(path, "config file not found, using defaults and environment");
            AppConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("GRAFANA_API_URL") {
            self.grafana.api_url = v;
        }
        if let Ok(v) = env::var("GRAFANA_API_KEY") {
            self.grafana.api_key = v;
        }
        if let Ok(v) = env::var("PROMETHEUS_API_URLS") {
            self.prometheus.api_urls = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(v) = env::var("JSM_TENANT_URL") {
            self.jsm.tenant_url = v;
        }
        if let Ok(v) = env::var("JSM_USER_EMAIL") {
            self.jsm.user_email = v;
        }
        if let Ok(v) = env::var("JSM_API_TOKEN") {
            self.jsm.api_token = v;
        }
        if let Ok(v) = env::var("JSM_CLOUD_ID") {
            self.jsm.cloud_id = Some(v);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sum = self.matching.weights.sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::Invalid(format!(
                "matching weights must sum to 1.0, got {sum}"
            )));
        }
        let t = &self.matching.thresholds;
        for (label, value) in [
            ("high", t.high),
            ("accept", t.accept),
            ("manual_review", t.manual_review),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "threshold '{label}' must be within [0, 1], got {value}"
                )));
            }
        }
        if !(t.manual_review <= t.accept && t.accept <= t.high) {
            return Err(ConfigError::Invalid(format!(
                "thresholds must be ordered manual_review <= accept <= high, got {} / {} / {}",
                t.manual_review, t.accept, t.high
            )));
        }
        if self.jsm.rate_limit_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "jsm.rate_limit_per_minute must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
