//! Deployment models

use serde::{Deserialize, Serialize};

use crate::errors::WardenError;
use crate::models::image::ImageNaming;
use crate::utils::{address_of, is_blank, lower_trim, normalize_alias};

/// Desired state for one runnable unit of a project.
///
/// Built from catalog data right before a deploy or stop call. Use
/// [`Deployment::new`] or call [`Deployment::validate`] before handing it to a
/// manager; validation normalizes the fields in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Project name
    pub project: String,

    /// Alias of the deployment. Empty or "latest" is the default route.
    #[serde(default)]
    pub alias: String,

    /// Commit hash (or hash prefix) of the image to run
    #[serde(alias = "commitHash")]
    pub commit_hash: String,

    #[serde(default, alias = "minReplica")]
    pub min_replica: i32,

    #[serde(default, alias = "maxReplica")]
    pub max_replica: i32,
}

impl Deployment {
    /// Create and validate a deployment
    pub fn new(
        project: &str,
        alias: &str,
        commit_hash: &str,
        min_replica: i32,
        max_replica: i32,
    ) -> Result<Self, WardenError> {
        let mut deployment = Self {
            project: project.to_string(),
            alias: alias.to_string(),
            commit_hash: commit_hash.to_string(),
            min_replica,
            max_replica,
        };
        deployment.validate()?;
        Ok(deployment)
    }

    /// Validate the deployment and apply defaults.
    ///
    /// All problems are reported together in one validation error.
    pub fn validate(&mut self) -> Result<(), WardenError> {
        let mut problems = Vec::new();

        if is_blank(&self.project) {
            problems.push("project must be specified");
        }
        if is_blank(&self.commit_hash) {
            problems.push("commit hash must be specified");
        }

        self.project = lower_trim(&self.project);
        self.alias = normalize_alias(&self.alias);
        self.commit_hash = lower_trim(&self.commit_hash);

        if self.min_replica == 0 && self.max_replica == 0 {
            self.min_replica = 1;
            self.max_replica = 1;
        }
        if self.min_replica < 0 || self.max_replica < 0 {
            problems.push("min/max replicas must be >= 0");
        }
        if self.max_replica < self.min_replica {
            problems.push("max replica must be >= min replica");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(WardenError::ValidationError(problems.join("; ")))
        }
    }

    /// Routing address `project[/alias]`
    pub fn address(&self) -> String {
        address_of(&lower_trim(&self.project), &normalize_alias(&self.alias))
    }

    /// Image reference of the container image for this deployment
    pub fn image_reference(&self, naming: &ImageNaming) -> String {
        naming.reference(&self.project, &self.commit_hash)
    }
}
