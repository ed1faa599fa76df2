//! External collaborators: the monitoring sources and the incident-management
//! service. All fetch methods follow the non-throwing contract: a partial or
//! total network failure is logged and yields an empty result, never an error
//! that would abort the sync cycle.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::{IncidentRecord, MonitoringAlert};

pub mod grafana;
pub mod jsm;
pub mod prometheus;

pub use grafana::GrafanaClient;
pub use jsm::JsmClient;
pub use prometheus::PrometheusClient;

/// A monitoring source that reports currently firing alerts.
#[async_trait]
pub trait AlertSource: Send + Sync {
    /// Returns only alerts whose remote state is active/firing.
    async fn fetch_monitoring_alerts(&self) -> Vec<MonitoringAlert>;
}

/// The incident-management service.
#[async_trait]
pub trait IncidentApi: Send + Sync {
    async fn fetch_incident_records(&self, limit: usize) -> Vec<IncidentRecord>;

    /// Both mutation calls are idempotent from the caller's perspective; a
    /// `false` result only suppresses the remote-side stamp and never blocks
    /// local state updates.
    async fn acknowledge_incident(&self, id: &str, note: &str, user: &str) -> bool;
    async fn close_incident(&self, id: &str, note: &str, user: &str) -> bool;
}

/// Paces outbound calls to a requests-per-minute ceiling. Callers exceeding
/// the ceiling are delayed, never dropped. One instance per external-service
/// client owns the "last request" state.
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn per_minute(requests: u32) -> Self {
        let requests = requests.max(1);
        Self {
            min_interval: Duration::from_secs_f64(60.0 / requests as f64),
            last_request: Mutex::new(None),
        }
    }

    /// Waits until the next request is allowed, then records it. The lock is
    /// held across the sleep so concurrent callers are serialized in arrival
    /// order.
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, delaying request");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_delays_second_caller() {
        // 600 rpm = one request per 100ms.
        let limiter = RateLimiter::per_minute(600);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn rate_limiter_first_call_is_immediate() {
        let limiter = RateLimiter::per_minute(1);
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
