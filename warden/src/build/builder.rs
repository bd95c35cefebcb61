//! Deduplicated, fire-and-forget image builds
//!
//! `build_image` validates the request, checks the registry and the build
//! record, then hands the actual work to a detached task. Callers learn the
//! outcome only through the build record (kept while building, replaced by
//! the failure text on error, removed on success) and the registry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use secrecy::SecretString;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::build::archive::tar_build_context;
use crate::build::git::{GitCredentials, RepoCheckout};
use crate::build::lock::BuildLock;
use crate::build::registry::ImageRegistry;
use crate::build::templates::Templates;
use crate::deploy::engine::ContainerEngine;
use crate::errors::WardenError;
use crate::filesys::dir::Dir;
use crate::models::image::ImageNaming;
use crate::utils::{is_blank, lower_trim};

/// Request to build the image of one project commit
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageBuildOptions {
    /// Project name
    #[serde(default, alias = "name")]
    pub project: String,

    /// Repository to clone
    #[serde(default, alias = "gitURL", alias = "gitUrl")]
    pub git_url: String,

    /// Commit hash or prefix. Empty or "latest" builds the newest commit.
    #[serde(default)]
    pub hash: String,

    #[serde(default)]
    pub username: String,

    /// Password or access token. Empty clones anonymously.
    #[serde(default)]
    pub password: Option<SecretString>,

    /// Runtime environment, e.g. "python"
    #[serde(default, alias = "runEnv")]
    pub runtime: String,

    /// Entry point as `module.function`
    #[serde(default)]
    pub handler: String,

    #[serde(default)]
    pub alias: String,
}

impl ImageBuildOptions {
    /// Check required fields and normalize project and hash
    pub fn validate(&mut self) -> Result<(), WardenError> {
        let mut problems = Vec::new();
        if is_blank(&self.handler) {
            problems.push("handler must be specified".to_string());
        } else if let Err(e) = Templates::handler_parts(&self.handler) {
            problems.push(e.to_string());
        }
        if is_blank(&self.runtime) {
            problems.push("runtime environment must be specified".to_string());
        } else if Templates::normalize_runtime(&self.runtime).is_none() {
            problems.push(format!("Unknown runtime environment: {}", self.runtime.trim()));
        }
        if is_blank(&self.username) {
            problems.push("username must be specified".to_string());
        }
        if is_blank(&self.git_url) {
            problems.push("repository (git) url must be specified".to_string());
        }
        if is_blank(&self.project) {
            problems.push("project name must be specified".to_string());
        }
        if !problems.is_empty() {
            return Err(WardenError::ValidationError(problems.join("; ")));
        }

        self.project = lower_trim(&self.project);
        self.hash = lower_trim(&self.hash);
        self.git_url = self.git_url.trim().to_string();
        Ok(())
    }

    /// Key of the build record for this request
    pub fn build_key(&self) -> String {
        build_key(&self.git_url, &self.hash)
    }

    fn credentials(&self) -> Option<GitCredentials> {
        self.password.as_ref().map(|password| GitCredentials {
            username: self.username.clone(),
            password: password.clone(),
        })
    }

    fn wants_latest(&self) -> bool {
        self.hash.is_empty() || self.hash == "latest"
    }
}

/// `gitURL-hash`, lower-cased
pub fn build_key(git_url: &str, hash: &str) -> String {
    lower_trim(&format!("{}-{}", git_url.trim(), hash.trim()))
}

/// Outcome of a build request
#[derive(Debug)]
pub enum BuildStatus {
    /// The registry already holds the image
    Exists,
    /// A build for the same key is running or recently failed; carries the record
    Pending(String),
    /// A new build was started in the background
    Started(JoinHandle<()>),
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Exists => "exists",
            BuildStatus::Pending(_) => "pending",
            BuildStatus::Started(_) => "started",
        }
    }
}

/// Timeouts, expiries and scratch space for builds.
///
/// `build_timeout` bounds a whole build, clone to last push. The "building"
/// record lives for at least that long.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub work_dir: Dir,
    pub build_timeout: Duration,
    pub building_ttl: Duration,
    pub failed_ttl: Duration,
}

pub struct ImageBuilder {
    engine: Arc<dyn ContainerEngine>,
    registry: Arc<dyn ImageRegistry>,
    checkout: Arc<dyn RepoCheckout>,
    lock: Arc<dyn BuildLock>,
    templates: Templates,
    naming: ImageNaming,
    config: BuildConfig,
}

impl ImageBuilder {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        registry: Arc<dyn ImageRegistry>,
        checkout: Arc<dyn RepoCheckout>,
        lock: Arc<dyn BuildLock>,
        naming: ImageNaming,
        config: BuildConfig,
    ) -> Result<Self, WardenError> {
        Ok(Self {
            engine,
            registry,
            checkout,
            lock,
            templates: Templates::new()?,
            naming,
            config,
        })
    }

    /// Current build record for `git_url` and `hash`
    pub async fn status(&self, git_url: &str, hash: &str) -> Result<Option<String>, WardenError> {
        self.lock.get(&build_key(git_url, hash)).await
    }

    /// Start building the requested image unless it exists or is already
    /// being built.
    pub async fn build_image(
        self: &Arc<Self>,
        mut options: ImageBuildOptions,
    ) -> Result<BuildStatus, WardenError> {
        options.validate()?;
        let key = options.build_key();

        if !options.hash.is_empty() {
            match self.registry.has_image(&options.project, &options.hash).await {
                Ok(true) => {
                    info!("Image '{}:{}' already exists", options.project, options.hash);
                    return Ok(BuildStatus::Exists);
                }
                Ok(false) => {}
                Err(e) => warn!("Registry check for {} failed: {}", key, e),
            }
        }

        // The record must outlive the build it guards
        let ttl = self.config.building_ttl.max(self.config.build_timeout);
        let record = format!("Building image: {}", key);
        if !self.lock.set_if_absent(&key, &record, ttl).await?
        {
            let existing = self.lock.get(&key).await?.unwrap_or_default();
            info!("Image '{}:{}' already building", options.project, options.hash);
            return Ok(BuildStatus::Pending(existing));
        }

        let span = info_span!(
            "build",
            build_id = %Uuid::new_v4(),
            project = %options.project,
            hash = %options.hash,
        );
        let builder = self.clone();
        let handle = tokio::spawn(async move { builder.run(options, key).await }.instrument(span));
        Ok(BuildStatus::Started(handle))
    }

    async fn run(&self, options: ImageBuildOptions, key: String) {
        let timeout = self.config.build_timeout;
        let outcome = match tokio::time::timeout(timeout, self.build(&options)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(WardenError::BuildError(format!(
                "timed out after {:?}",
                timeout
            ))),
        };
        match outcome {
            Ok(tags) => {
                if tags.is_empty() {
                    info!("Image already present in registry, nothing built");
                } else {
                    info!("Built and pushed {}", tags.join(", "));
                }
                if let Err(e) = self.lock.del(&key).await {
                    warn!("Failed to clear build record {}: {}", key, e);
                }
            }
            Err(e) => {
                error!("Image build {} failed: {}", key, e);
                let record = format!(
                    "Image build '{}' failed at {}: {}",
                    key,
                    Utc::now().to_rfc3339(),
                    e
                );
                if let Err(e) = self.lock.set(&key, &record, self.config.failed_ttl).await {
                    warn!("Failed to record build failure for {}: {}", key, e);
                }
            }
        }
    }

    /// Clone, build and push. Returns the pushed tags, empty when the
    /// registry already had the resolved commit.
    async fn build(&self, options: &ImageBuildOptions) -> Result<Vec<String>, WardenError> {
        // Removed on drop, success or not
        let workspace = self.config.work_dir.workspace(&options.project).await?;
        let repo = workspace.path().join("repo");

        let credentials = options.credentials();
        self.checkout
            .clone_repo(&options.git_url, credentials.as_ref(), &repo)
            .await?;
        let commit = self.checkout.resolve_commit(&repo, &options.hash).await?;

        match self.registry.has_image(&options.project, &commit).await {
            Ok(true) => return Ok(Vec::new()),
            Ok(false) => {}
            Err(e) => warn!("Registry check for {} failed: {}", commit, e),
        }

        self.checkout.checkout(&repo, &commit).await?;
        self.templates
            .write_to(&repo, &options.runtime, &options.handler)
            .await?;

        let context = workspace.path().join("context.tar");
        tar_build_context(&repo, &context).await?;

        let tags = self.tags_for(options, &commit);
        self.engine
            .build_image(&context, &tags, self.config.build_timeout)
            .await?;
        for tag in &tags {
            self.engine.push_image(tag, self.config.build_timeout).await?;
        }
        Ok(tags)
    }

    /// Full commit hash, plus the requested prefix or `latest`
    fn tags_for(&self, options: &ImageBuildOptions, commit: &str) -> Vec<String> {
        let mut tags = vec![self.naming.reference(&options.project, commit)];
        if options.wants_latest() {
            tags.push(self.naming.reference(&options.project, "latest"));
        } else if options.hash != commit {
            tags.push(self.naming.reference(&options.project, &options.hash));
        }
        tags
    }
}
