//! JSM Operations client. All calls go through a shared rate limiter and the
//! cloud id is resolved from the tenant once, then cached for the process
//! lifetime.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{IncidentApi, RateLimiter};
use crate::config::JsmConfig;
use crate::models::IncidentRecord;

const PAGE_SIZE: usize = 100;

pub struct JsmClient {
    client: Client,
    config: JsmConfig,
    cloud_id: Mutex<Option<String>>,
    limiter: RateLimiter,
}

impl JsmClient {
    pub fn new(config: JsmConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();
        let limiter = RateLimiter::per_minute(config.rate_limit_per_minute);
        Self {
            client,
            cloud_id: Mutex::new(config.cloud_id.clone()),
            config,
            limiter,
        }
    }

    /// Returns the configured cloud id, or resolves it from the tenant's edge
    /// endpoint on first use.
    async fn cloud_id(&self) -> Option<String> {
        let mut cached = self.cloud_id.lock().await;
        if let Some(id) = cached.as_ref() {
            return Some(id.clone());
        }
        if self.config.tenant_url.is_empty() {
            warn!("JSM tenant URL not configured, cannot resolve cloud id");
            return None;
        }

        self.limiter.acquire().await;
        let url = format!(
            "{}/_edge/tenant_info",
            self.config.tenant_url.trim_end_matches('/')
        );
        let response = self.client.get(&url).send().await;
        let body: Value = match response {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => match resp.json().await {
                    Ok(body) => body,
                    Err(err) => {
                        error!(%err, "failed to decode tenant info payload");
                        return None;
                    }
                },
                Err(err) => {
                    error!(%err, "tenant info request returned an error status");
                    return None;
                }
            },
            Err(err) => {
                error!(%err, "failed to reach tenant info endpoint");
                return None;
            }
        };

        let id = body.get("cloudId").and_then(Value::as_str)?.to_string();
        debug!(cloud_id = %id, "resolved JSM cloud id from tenant");
        *cached = Some(id.clone());
        Some(id)
    }

    fn ops_url(&self, cloud_id: &str, path: &str) -> String {
        format!(
            "{}/{cloud_id}/v1/{path}",
            self.config.api_base_url.trim_end_matches('/')
        )
    }

    async fn fetch_page(
        &self,
        cloud_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>, reqwest::Error> {
        self.limiter.acquire().await;
        let url = self.ops_url(cloud_id, "alerts");
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.config.user_email, Some(&self.config.api_token))
            .query(&[
                ("offset", offset.to_string()),
                ("size", limit.to_string()),
                ("sort", "createdAt".to_string()),
                ("order", "desc".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        Ok(body
            .get("values")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Mutation endpoints share a shape: POST with a note and acting user,
    /// success reported as a boolean so callers can degrade gracefully.
    async fn post_action(&self, id: &str, action: &str, note: &str, user: &str) -> bool {
        let Some(cloud_id) = self.cloud_id().await else {
            return false;
        };

        self.limiter.acquire().await;
        let url = self.ops_url(&cloud_id, &format!("alerts/{id}/{action}"));
        let result = self
            .client
            .post(&url)
            .basic_auth(&self.config.user_email, Some(&self.config.api_token))
            .json(&json!({ "note": note, "user": user }))
            .send()
            .await;

        match result.and_then(|resp| resp.error_for_status()) {
            Ok(_) => {
                info!(incident_id = %id, action, "incident action applied");
                true
            }
            Err(err) => {
                error!(incident_id = %id, action, %err, "incident action failed");
                false
            }
        }
    }
}

#[async_trait]
impl IncidentApi for JsmClient {
    async fn fetch_incident_records(&self, limit: usize) -> Vec<IncidentRecord> {
        let Some(cloud_id) = self.cloud_id().await else {
            return Vec::new();
        };

        let mut records = Vec::new();
        let mut offset = 0;
        while records.len() < limit {
            let page_size = PAGE_SIZE.min(limit - records.len());
            let page = match self.fetch_page(&cloud_id, offset, page_size).await {
                Ok(page) => page,
                Err(err) => {
                    error!(%err, offset, "failed to fetch incident page");
                    break;
                }
            };
            if page.is_empty() {
                break;
            }
            let page_len = page.len();
            records.extend(page.iter().filter_map(IncidentRecord::from_value));
            if page_len < page_size {
                break;
            }
            offset += page_len;
        }

        info!(count = records.len(), "fetched incident records");
        records
    }

    async fn acknowledge_incident(&self, id: &str, note: &str, user: &str) -> bool {
        self.post_action(id, "acknowledge", note, user).await
    }

    async fn close_incident(&self, id: &str, note: &str, user: &str) -> bool {
        self.post_action(id, "close", note, user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with(cloud_id: Option<String>) -> JsmClient {
        JsmClient::new(JsmConfig {
            cloud_id,
            ..JsmConfig::default()
        })
    }

    #[tokio::test]
    async fn configured_cloud_id_is_used_without_lookup() {
        let client = client_with(Some("abc-123".to_string()));
        assert_eq!(client.cloud_id().await.as_deref(), Some("abc-123"));
    }

    #[tokio::test]
    async fn missing_tenant_and_cloud_id_yields_none() {
        let client = client_with(None);
        assert!(client.cloud_id().await.is_none());
    }

    #[tokio::test]
    async fn fetch_without_cloud_id_is_empty() {
        let client = client_with(None);
        let records = client.fetch_incident_records(50).await;
        assert!(records.is_empty());
    }

    #[test]
    fn ops_url_joins_base_cloud_and_path() {
        let client = client_with(Some("cid".to_string()));
        assert_eq!(
            client.ops_url("cid", "alerts/42/close"),
            "https://api.atlassian.com/jsm/ops/api/cid/v1/alerts/42/close"
        );
    }
}
