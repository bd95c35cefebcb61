//! Image registry queries over the registry HTTP API (v2)

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, error};

use crate::errors::WardenError;
use crate::models::image::ImageNaming;
use crate::storage::settings::RegistrySettings;
use crate::utils::lower_trim;

/// Hashes shorter than this never count as already built
pub const MIN_HASH_LEN: usize = 8;

#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Names of all repositories in the registry
    async fn repositories(&self) -> Result<Vec<String>, WardenError>;

    /// Tags of one repository. Unknown repositories have no tags.
    async fn tags(&self, repository: &str) -> Result<Vec<String>, WardenError>;

    /// Whether `project` already has an image tagged with `hash` (or a tag
    /// starting with it)
    async fn has_image(&self, project: &str, hash: &str) -> Result<bool, WardenError> {
        let hash = lower_trim(hash);
        if hash.len() < MIN_HASH_LEN {
            return Ok(false);
        }

        let project = lower_trim(project);
        let repositories = self.repositories().await?;
        if !repositories.iter().any(|repo| lower_trim(repo) == project) {
            return Ok(false);
        }

        let tags = self.tags(&project).await?;
        Ok(tags.iter().any(|tag| lower_trim(tag).starts_with(&hash)))
    }
}

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Registry client authenticating with basic auth when credentials are set
pub struct RegistryClient {
    client: Client,
    base_url: String,
    username: String,
    password: Option<SecretString>,
}

impl RegistryClient {
    pub fn new(
        base_url: &str,
        username: &str,
        password: Option<SecretString>,
    ) -> Result<Self, WardenError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password,
        })
    }

    pub fn from_settings(settings: &RegistrySettings) -> Result<Self, WardenError> {
        let host = ImageNaming::from_settings(settings).host();
        let base_url = format!("{}://{}", settings.protocol, host);
        Self::new(&base_url, &settings.username, settings.password.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET a registry path. `None` when the registry answers 404.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, WardenError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let mut request = self.client.get(&url);
        if !self.username.is_empty() {
            let password = self.password.as_ref().map(|p| p.expose_secret().to_string());
            request = request.basic_auth(&self.username, password);
        }

        let response = request
            .send()
            .await
            .map_err(|e| WardenError::RegistryError(format!("GET {} failed: {}", url, e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Registry GET {} failed: {} - {}", url, status, body);
            return Err(WardenError::RegistryError(format!(
                "GET {}: {}: {}",
                url, status, body
            )));
        }

        let body = response
            .json()
            .await
            .map_err(|e| WardenError::RegistryError(format!("GET {}: bad body: {}", url, e)))?;
        Ok(Some(body))
    }
}

#[async_trait]
impl ImageRegistry for RegistryClient {
    async fn repositories(&self) -> Result<Vec<String>, WardenError> {
        let catalog: Option<Catalog> = self.get("/v2/_catalog").await?;
        Ok(catalog.and_then(|c| c.repositories).unwrap_or_default())
    }

    async fn tags(&self, repository: &str) -> Result<Vec<String>, WardenError> {
        let list: Option<TagList> = self.get(&format!("/v2/{}/tags/list", repository)).await?;
        Ok(list.and_then(|l| l.tags).unwrap_or_default())
    }
}
