//! Remote store over a PostgREST-style HTTP API (the hosted Supabase REST
//! endpoint the dashboard and the mobile app talk to).
//!
//! Request mapping:
//! - create:    `POST   {base}/{collection}` with `Prefer: return=representation`
//! - update:    `PATCH  {base}/{collection}?id=eq.{id}`
//! - delete:    `DELETE {base}/{collection}?id=eq.{id}`
//! - fetch_all: `GET    {base}/{collection}?select=*`

use crate::error::{SyncError, SyncResult};
use crate::record::{EntityRecord, Fields};
use crate::remote::{RemoteError, RemoteResult, RemoteStore};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTP remote store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestRemoteConfig {
    /// REST base URL, e.g. `https://<project>.supabase.co/rest/v1`
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Project API key, sent as the `apikey` header
    #[serde(default)]
    pub api_key: Option<String>,
    /// User access token, sent as a bearer token
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Per-request timeout of the HTTP client
    #[serde(
        rename = "request_timeout_ms",
        default = "default_request_timeout",
        with = "crate::config::duration_millis"
    )]
    pub request_timeout: Duration,
}

fn default_base_url() -> String {
    "http://localhost:54321/rest/v1".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for RestRemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            auth_token: None,
            request_timeout: default_request_timeout(),
        }
    }
}

/// [`RemoteStore`] speaking PostgREST over HTTP
pub struct RestRemoteStore {
    config: RestRemoteConfig,
    client: reqwest::Client,
}

impl RestRemoteStore {
    pub fn new(config: RestRemoteConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Whether the REST endpoint answers at all. Used to drive the
    /// connectivity monitor.
    pub async fn probe(&self) -> bool {
        match self.request(Method::HEAD, None).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(err) => {
                tracing::debug!(error = %err, "Remote probe failed");
                false
            }
        }
    }

    fn collection_url(&self, collection: Option<&str>) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match collection {
            Some(collection) => format!("{}/{}", base, collection),
            None => base.to_string(),
        }
    }

    fn request(&self, method: Method, collection: Option<&str>) -> RequestBuilder {
        let mut req = self.client.request(method, self.collection_url(collection));

        if let Some(key) = &self.config.api_key {
            req = req.header("apikey", key);
        }
        if let Some(token) = self.config.auth_token.as_ref().or(self.config.api_key.as_ref()) {
            req = req.bearer_auth(token);
        }

        req
    }

    async fn execute(&self, req: RequestBuilder) -> RemoteResult<String> {
        let response = req.send().await.map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(classify_status(status, &body))
        }
    }

    async fn fetch_rows(&self, req: RequestBuilder) -> RemoteResult<Vec<EntityRecord>> {
        let body = self.execute(req).await?;
        serde_json::from_str(&body).map_err(|e| RemoteError::Rejected(format!("Malformed response body: {}", e)))
    }
}

/// Map a non-success status to a retryable or a permanent failure.
fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let message = if body.trim().is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, body.trim())
    };

    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
        RemoteError::Unavailable(message)
    } else {
        RemoteError::Rejected(message)
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn create(&self, collection: &str, fields: &Fields) -> RemoteResult<EntityRecord> {
        let req = self
            .request(Method::POST, Some(collection))
            .header("Prefer", "return=representation")
            .json(fields);

        self.fetch_rows(req)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Rejected(format!("{} insert returned no row", collection)))
    }

    async fn update(&self, collection: &str, id: &str, patch: &Fields) -> RemoteResult<EntityRecord> {
        let req = self
            .request(Method::PATCH, Some(collection))
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(patch);

        self.fetch_rows(req)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Rejected(format!("no {} row with id {}", collection, id)))
    }

    async fn delete(&self, collection: &str, id: &str) -> RemoteResult<()> {
        let req = self
            .request(Method::DELETE, Some(collection))
            .query(&[("id", format!("eq.{}", id))]);

        self.execute(req).await.map(|_| ())
    }

    async fn fetch_all(&self, collection: &str) -> RemoteResult<Vec<EntityRecord>> {
        let req = self.request(Method::GET, Some(collection)).query(&[("select", "*")]);
        self.fetch_rows(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, ""),
            RemoteError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            RemoteError::Unavailable(_)
        ));

        match classify_status(StatusCode::CONFLICT, r#"{"message":"duplicate key"}"#) {
            RemoteError::Rejected(msg) => assert!(msg.contains("duplicate key")),
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn test_collection_url_trims_slash() {
        let store = RestRemoteStore::new(RestRemoteConfig {
            base_url: "https://example.supabase.co/rest/v1/".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            store.collection_url(Some("members")),
            "https://example.supabase.co/rest/v1/members"
        );
        assert_eq!(store.collection_url(None), "https://example.supabase.co/rest/v1");
    }

    #[tokio::test]
    async fn test_unreachable_remote_is_unavailable() {
        let store = RestRemoteStore::new(RestRemoteConfig {
            base_url: "http://127.0.0.1:9/rest/v1".to_string(),
            request_timeout: Duration::from_millis(500),
            ..Default::default()
        })
        .unwrap();

        assert!(matches!(
            store.fetch_all("members").await,
            Err(RemoteError::Unavailable(_))
        ));
        assert!(!store.probe().await);
    }
}
