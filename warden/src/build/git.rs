//! Repository checkout through the `git` command line

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use crate::errors::WardenError;
use crate::utils::lower_trim;

/// Credentials used to clone over HTTP(S)
#[derive(Debug, Clone)]
pub struct GitCredentials {
    pub username: String,
    pub password: SecretString,
}

#[async_trait]
pub trait RepoCheckout: Send + Sync {
    /// Clone `url` into `dest`, which must not exist yet
    async fn clone_repo(
        &self,
        url: &str,
        credentials: Option<&GitCredentials>,
        dest: &Path,
    ) -> Result<(), WardenError>;

    /// Resolve a requested hash to a full commit hash. Empty or "latest"
    /// means the current HEAD, anything else is matched as a prefix.
    async fn resolve_commit(&self, repo: &Path, requested: &str) -> Result<String, WardenError>;

    /// Check out `commit` in the working tree
    async fn checkout(&self, repo: &Path, commit: &str) -> Result<(), WardenError>;
}

/// Git operations driven through the `git` binary
#[derive(Debug, Clone)]
pub struct GitCli {
    bin: String,
    timeout: Duration,
}

impl GitCli {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    async fn run(&self, cwd: Option<&Path>, args: &[&str]) -> Result<String, WardenError> {
        let verb = args.first().copied().unwrap_or_default();
        let mut command = Command::new(&self.bin);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        let child = command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WardenError::GitError(format!("Failed to run git {}: {}", verb, e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                WardenError::GitError(format!("git {} timed out after {:?}", verb, self.timeout))
            })?
            .map_err(|e| WardenError::GitError(format!("Failed to run git {}: {}", verb, e)))?;

        if !output.status.success() {
            return Err(WardenError::GitError(format!(
                "git {} failed: {}",
                verb,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl RepoCheckout for GitCli {
    async fn clone_repo(
        &self,
        url: &str,
        credentials: Option<&GitCredentials>,
        dest: &Path,
    ) -> Result<(), WardenError> {
        info!("Cloning {}", redact_url(url));
        let clone_url = authenticated_url(url, credentials);
        let dest = dest.to_string_lossy();
        self.run(None, &["clone", "--quiet", &clone_url, &dest])
            .await
            // stderr can echo the URL back, credentials included
            .map_err(|e| WardenError::GitError(redact_secret(&e.to_string(), credentials)))?;
        Ok(())
    }

    async fn resolve_commit(&self, repo: &Path, requested: &str) -> Result<String, WardenError> {
        let requested = lower_trim(requested);
        if requested.is_empty() || requested == "latest" {
            let head = self.run(Some(repo), &["rev-parse", "HEAD"]).await?;
            return Ok(head.trim().to_string());
        }

        let commits = self.run(Some(repo), &["rev-list", "--all"]).await?;
        let found = commits
            .lines()
            .map(str::trim)
            .find(|commit| commit.starts_with(&requested))
            .map(str::to_string);
        match found {
            Some(commit) => {
                debug!("Resolved {} to {}", requested, commit);
                Ok(commit)
            }
            None => Err(WardenError::GitError(format!(
                "could not find commit prefixed with hash '{}'",
                requested
            ))),
        }
    }

    async fn checkout(&self, repo: &Path, commit: &str) -> Result<(), WardenError> {
        self.run(Some(repo), &["checkout", "--quiet", commit]).await?;
        Ok(())
    }
}

/// Embed credentials into an HTTP(S) URL. An empty password means the
/// repository is cloned anonymously.
fn authenticated_url(url: &str, credentials: Option<&GitCredentials>) -> String {
    let Some(credentials) = credentials else {
        return url.to_string();
    };
    if credentials.password.expose_secret().is_empty() {
        return url.to_string();
    }
    match Url::parse(url) {
        Ok(mut parsed) if parsed.scheme().starts_with("http") => {
            let ok = parsed.set_username(&credentials.username).is_ok()
                && parsed
                    .set_password(Some(credentials.password.expose_secret()))
                    .is_ok();
            if ok {
                parsed.to_string()
            } else {
                url.to_string()
            }
        }
        _ => url.to_string(),
    }
}

/// URL safe to log
fn redact_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(None);
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

fn redact_secret(message: &str, credentials: Option<&GitCredentials>) -> String {
    match credentials {
        Some(c) if !c.password.expose_secret().is_empty() => {
            message.replace(c.password.expose_secret(), "***")
        }
        _ => message.to_string(),
    }
}
