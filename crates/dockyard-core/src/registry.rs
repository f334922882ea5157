//! Tag listing against a Docker registry v2 endpoint

use crate::{CoreError, Result};
use async_trait::async_trait;
use dockyard_config::RegistryConfig;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

/// Anything that can list the published tags of an image
#[async_trait]
pub trait TagSource: Send + Sync {
    async fn fetch_tags(&self, image: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(alias = "Token", default)]
    token: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Anonymous registry client: pull-scoped token exchange, then tag listing
pub struct RegistryClient {
    client: reqwest::Client,
    auth_url: String,
    service: String,
    registry_url: String,
}

impl RegistryClient {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CoreError::Registry(format!("could not build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            auth_url: config.auth_url.trim_end_matches('/').to_string(),
            service: config.service.clone(),
            registry_url: config.registry_url.trim_end_matches('/').to_string(),
        })
    }

    async fn token(&self, image: &str) -> Result<String> {
        let scope = format!("repository:{}:pull", image);
        let response = self
            .client
            .get(format!("{}/token", self.auth_url))
            .query(&[("service", self.service.as_str()), ("scope", scope.as_str())])
            .send()
            .await
            .map_err(|e| CoreError::Registry(format!("can't authorize in registry: {}", e)))?;

        if response.status() != StatusCode::OK {
            return Err(CoreError::Registry(format!(
                "incorrect status code: {} while requesting registry token",
                response.status().as_u16()
            )));
        }

        let auth: TokenResponse = response.json().await.map_err(|e| {
            CoreError::Registry(format!("can't parse authorization response: {}", e))
        })?;
        Ok(auth.token)
    }
}

#[async_trait]
impl TagSource for RegistryClient {
    async fn fetch_tags(&self, image: &str) -> Result<Vec<String>> {
        let token = self.token(image).await?;

        debug!("Listing tags of {}", image);
        let response = self
            .client
            .get(format!("{}/v2/{}/tags/list", self.registry_url, image))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| CoreError::Registry(format!("can't request list of tags: {}", e)))?;

        if response.status() != StatusCode::OK {
            return Err(CoreError::Registry(format!(
                "incorrect status code: {} while requesting the list of tags",
                response.status().as_u16()
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Registry(format!("can't parse tags response: {}", e)))?;
        Ok(tags.tags.unwrap_or_default())
    }
}
