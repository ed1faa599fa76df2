//! Prometheus Alertmanager client with per-endpoint health tracking: an
//! endpoint that keeps failing is skipped instead of failing the whole fetch,
//! and is retried once its recheck interval has elapsed.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::grafana::AmAlert;
use super::AlertSource;
use crate::config::PrometheusConfig;
use crate::models::MonitoringAlert;

const UNHEALTHY_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Default)]
struct EndpointHealth {
    consecutive_failures: u32,
    last_attempt: Option<Instant>,
}

impl EndpointHealth {
    fn should_skip(&self, recheck_interval: Duration) -> bool {
        if self.consecutive_failures < UNHEALTHY_AFTER_FAILURES {
            return false;
        }
        match self.last_attempt {
            Some(at) => at.elapsed() < recheck_interval,
            None => false,
        }
    }
}

pub struct PrometheusClient {
    client: Client,
    config: PrometheusConfig,
    health: Mutex<HashMap<String, EndpointHealth>>,
}

impl PrometheusClient {
    pub fn new(config: PrometheusConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();
        Self {
            client,
            config,
            health: Mutex::new(HashMap::new()),
        }
    }

    async fn fetch_endpoint(&self, base_url: &str) -> Result<Vec<AmAlert>, reqwest::Error> {
        let url = format!("{}/api/v2/alerts", base_url.trim_end_matches('/'));
        let response = self.client.get(&url).send().await?.error_for_status()?;
        response.json().await
    }
}

#[async_trait]
impl AlertSource for PrometheusClient {
    async fn fetch_monitoring_alerts(&self) -> Vec<MonitoringAlert> {
        if !self.config.enabled || self.config.api_urls.is_empty() {
            return Vec::new();
        }

        let recheck = Duration::from_secs(self.config.health_recheck_seconds);
        let mut all_alerts = Vec::new();

        for base_url in &self.config.api_urls {
            {
                let health = self.health.lock().await;
                if let Some(state) = health.get(base_url) {
                    if state.should_skip(recheck) {
                        warn!(endpoint = %base_url, "skipping unhealthy Alertmanager endpoint");
                        continue;
                    }
                }
            }

            match self.fetch_endpoint(base_url).await {
                Ok(alerts) => {
                    let mut health = self.health.lock().await;
                    let state = health.entry(base_url.clone()).or_default();
                    state.consecutive_failures = 0;
                    state.last_attempt = Some(Instant::now());
                    drop(health);

                    let active: Vec<MonitoringAlert> = alerts
                        .into_iter()
                        .filter(AmAlert::is_active)
                        .map(|alert| alert.into_monitoring_alert("prometheus", Some(base_url)))
                        .collect();
                    info!(endpoint = %base_url, count = active.len(), "fetched active Prometheus alerts");
                    all_alerts.extend(active);
                }
                Err(err) => {
                    let mut health = self.health.lock().await;
                    let state = health.entry(base_url.clone()).or_default();
                    state.consecutive_failures += 1;
                    state.last_attempt = Some(Instant::now());
                    error!(endpoint = %base_url, failures = state.consecutive_failures, %err,
                        "failed to fetch alerts from Alertmanager endpoint");
                }
            }
        }

        all_alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_skipped_only_after_repeated_failures() {
        let mut state = EndpointHealth::default();
        let recheck = Duration::from_secs(300);
        assert!(!state.should_skip(recheck));

        state.consecutive_failures = UNHEALTHY_AFTER_FAILURES;
        state.last_attempt = Some(Instant::now());
        assert!(state.should_skip(recheck));

        // Recheck window elapsed: the endpoint gets another chance.
        assert!(!state.should_skip(Duration::from_secs(0)));
    }

    #[tokio::test]
    async fn unreachable_endpoints_yield_empty_not_error() {
        let client = PrometheusClient::new(PrometheusConfig {
            enabled: true,
            api_urls: vec!["http://127.0.0.1:1".to_string()],
            timeout_seconds: 1,
            health_recheck_seconds: 300,
        });
        let alerts = client.fetch_monitoring_alerts().await;
        assert!(alerts.is_empty());
        let health = client.health.lock().await;
        assert_eq!(health["http://127.0.0.1:1"].consecutive_failures, 1);
    }
}
