//! HTTP implementation of [`ProviderApi`].
//!
//! Speaks a JSON REST dialect: bearer credential auth, one resource
//! namespace (`/apps`), config-vars and builds as sub-resources. Every
//! request carries the configured timeout; a timed-out or unreachable
//! call is reported as [`ProviderError::Transient`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::api::{
    CapacitySnapshot, Liveness, ProviderApi, ProviderError, ProviderResult, ResourceHandle,
};

/// Configuration for the HTTP provider client.
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// Base URL of the provider API, without a trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Provider-side resource ceiling per credential.
    pub resource_limit: u32,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.hosting.example".to_string(),
            timeout: Duration::from_secs(10),
            resource_limit: 99,
        }
    }
}

/// reqwest-backed provider client.
#[derive(Clone)]
pub struct HttpProvider {
    client: Client,
    config: HttpProviderConfig,
}

#[derive(Deserialize)]
struct AppResource {
    name: String,
    #[serde(default)]
    web_url: Option<String>,
}

#[derive(Deserialize)]
struct BuildResource {
    id: String,
}

#[derive(Deserialize)]
struct DynoResource {
    state: String,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Transient(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    fn authed(&self, builder: RequestBuilder, credential: &str) -> RequestBuilder {
        builder
            .bearer_auth(credential)
            .header("accept", "application/json")
    }

    /// Send a request, mapping transport failures and non-success
    /// statuses into the classified taxonomy.
    async fn send(&self, builder: RequestBuilder, context: &str) -> ProviderResult<Response> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Transient(format!("{context}: timed out"))
            } else {
                ProviderError::Transient(format!("{context}: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(%context, %status, "provider call failed");
        Err(classify_status(status, context, &body))
    }
}

/// Map a non-success HTTP status to the provider error taxonomy.
fn classify_status(status: StatusCode, context: &str, body: &str) -> ProviderError {
    let detail = if body.is_empty() {
        format!("{context}: {status}")
    } else {
        format!("{context}: {status}: {body}")
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized(detail),
        StatusCode::NOT_FOUND => ProviderError::NotFound(detail),
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => ProviderError::Conflict(detail),
        _ => ProviderError::Transient(detail),
    }
}

#[async_trait]
impl ProviderApi for HttpProvider {
    async fn create_resource(
        &self,
        credential: &str,
        name: &str,
    ) -> ProviderResult<ResourceHandle> {
        let builder = self
            .authed(self.client.post(self.url("/apps")), credential)
            .json(&serde_json::json!({ "name": name }));
        let response = self.send(builder, "create resource").await?;
        let app: AppResource = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("create resource: {e}")))?;
        Ok(ResourceHandle {
            name: app.name,
            url: app.web_url,
        })
    }

    async fn set_parameters(
        &self,
        credential: &str,
        name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> ProviderResult<()> {
        let builder = self
            .authed(
                self.client.patch(self.url(&format!("/apps/{name}/config-vars"))),
                credential,
            )
            .json(parameters);
        self.send(builder, "set parameters").await?;
        Ok(())
    }

    async fn trigger_build(
        &self,
        credential: &str,
        name: &str,
        source_ref: &str,
    ) -> ProviderResult<String> {
        let builder = self
            .authed(
                self.client.post(self.url(&format!("/apps/{name}/builds"))),
                credential,
            )
            .json(&serde_json::json!({ "source_blob": { "url": source_ref } }));
        let response = self.send(builder, "trigger build").await?;
        let build: BuildResource = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("trigger build: {e}")))?;
        Ok(build.id)
    }

    async fn probe_capacity(&self, credential: &str) -> ProviderResult<CapacitySnapshot> {
        let builder = self.authed(self.client.get(self.url("/apps")), credential);
        let response = self.send(builder, "probe capacity").await?;
        let apps: Vec<AppResource> = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("probe capacity: {e}")))?;
        Ok(CapacitySnapshot {
            count: apps.len() as u32,
            limit: self.config.resource_limit,
        })
    }

    async fn probe_liveness(&self, credential: &str, name: &str) -> ProviderResult<Liveness> {
        let builder = self.authed(
            self.client.get(self.url(&format!("/apps/{name}/dynos"))),
            credential,
        );
        let response = self.send(builder, "probe liveness").await?;
        let dynos: Vec<DynoResource> = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("probe liveness: {e}")))?;
        let active = dynos
            .iter()
            .any(|d| matches!(d.state.as_str(), "up" | "starting" | "idle"));
        Ok(Liveness { active })
    }

    async fn delete_resource(&self, credential: &str, name: &str) -> ProviderResult<()> {
        let builder = self.authed(
            self.client.delete(self.url(&format!("/apps/{name}"))),
            credential,
        );
        self.send(builder, "delete resource").await?;
        Ok(())
    }
}
