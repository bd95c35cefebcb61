//! Container engine abstraction and its docker CLI implementation

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::WardenError;

pub const LABEL_MANAGED: &str = "warden.managed";
pub const LABEL_IMAGE: &str = "warden.image";
pub const LABEL_ADDRESS: &str = "warden.address";

/// Everything needed to create one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub host_ip: String,
    pub host_port: u16,
    pub container_port: u16,
    pub labels: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
}

/// A container as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSummary {
    pub id: String,
    pub image: String,
    pub names: String,
    pub labels: BTreeMap<String, String>,
    /// Host ports published by the container
    pub public_ports: Vec<u16>,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check the engine is reachable, returning its version
    async fn ping(&self) -> Result<String, WardenError>;

    /// Create a container and return its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, WardenError>;

    async fn start_container(&self, id: &str) -> Result<(), WardenError>;

    /// List containers (running or not) carrying every given label
    async fn list_containers(
        &self,
        labels: &[(String, String)],
    ) -> Result<Vec<ContainerSummary>, WardenError>;

    /// Force-remove a container
    async fn remove_container(&self, id: &str) -> Result<(), WardenError>;

    /// Build an image from a tar build context, tagging it with every tag
    async fn build_image(
        &self,
        context: &Path,
        tags: &[String],
        timeout: Duration,
    ) -> Result<(), WardenError>;

    async fn push_image(&self, tag: &str, timeout: Duration) -> Result<(), WardenError>;

    /// Release engine resources
    async fn close(&self) -> Result<(), WardenError> {
        Ok(())
    }
}

/// Container engine driven through the `docker` command line
#[derive(Debug, Clone)]
pub struct DockerCli {
    bin: String,
    command_timeout: Duration,
}

impl DockerCli {
    pub fn new(bin: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            command_timeout,
        }
    }

    /// Authenticate against a registry, password passed on stdin
    pub async fn login(
        &self,
        registry: &str,
        username: &str,
        password: &SecretString,
    ) -> Result<(), WardenError> {
        debug!("Logging in to registry {} as {}", registry, username);
        let mut child = Command::new(&self.bin)
            .args(["login", registry, "-u", username, "--password-stdin"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WardenError::EngineError(format!("Failed to run docker login: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(password.expose_secret().as_bytes())
                .await
                .map_err(|e| {
                    WardenError::EngineError(format!("Failed to write docker login password: {}", e))
                })?;
        }

        let output = tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| WardenError::EngineError("docker login timed out".to_string()))?
            .map_err(|e| WardenError::EngineError(format!("Failed to run docker login: {}", e)))?;

        if !output.status.success() {
            return Err(WardenError::EngineError(format!(
                "docker login to {} failed: {}",
                registry,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        info!("Logged in to registry {}", registry);
        Ok(())
    }

    /// Run a docker command to completion and return its stdout
    async fn run(&self, args: &[String], timeout: Duration) -> Result<String, WardenError> {
        let verb = args.first().map(String::as_str).unwrap_or_default();
        debug!("Running {} {}", self.bin, verb);

        let child = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WardenError::EngineError(format!("Failed to run docker {}: {}", verb, e)))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                WardenError::EngineError(format!("docker {} timed out after {:?}", verb, timeout))
            })?
            .map_err(|e| WardenError::EngineError(format!("Failed to run docker {}: {}", verb, e)))?;

        if !output.status.success() {
            return Err(WardenError::EngineError(format!(
                "docker {} failed: {}",
                verb,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn ping(&self) -> Result<String, WardenError> {
        let args = ["version", "--format", "{{.Server.Version}}"].map(String::from);
        let version = self.run(&args, self.command_timeout).await?;
        Ok(version.trim().to_string())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, WardenError> {
        let mut args = vec!["create".to_string(), "--name".to_string(), spec.name.clone()];
        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        for (key, value) in &spec.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push("--publish".to_string());
        args.push(format!(
            "{}:{}:{}/tcp",
            spec.host_ip, spec.host_port, spec.container_port
        ));
        args.push(spec.image.clone());

        let id = self.run(&args, self.command_timeout).await?;
        Ok(id.trim().to_string())
    }

    async fn start_container(&self, id: &str) -> Result<(), WardenError> {
        let args = ["start".to_string(), id.to_string()];
        self.run(&args, self.command_timeout).await?;
        Ok(())
    }

    async fn list_containers(
        &self,
        labels: &[(String, String)],
    ) -> Result<Vec<ContainerSummary>, WardenError> {
        let mut args = ["ps", "--all", "--no-trunc", "--format", "{{json .}}"]
            .map(String::from)
            .to_vec();
        for (key, value) in labels {
            args.push("--filter".to_string());
            args.push(format!("label={}={}", key, value));
        }

        let stdout = self.run(&args, self.command_timeout).await?;
        stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_ps_line)
            .collect()
    }

    async fn remove_container(&self, id: &str) -> Result<(), WardenError> {
        let args = ["rm".to_string(), "--force".to_string(), id.to_string()];
        self.run(&args, self.command_timeout).await?;
        Ok(())
    }

    async fn build_image(
        &self,
        context: &Path,
        tags: &[String],
        timeout: Duration,
    ) -> Result<(), WardenError> {
        let context_file = std::fs::File::open(context).map_err(|e| {
            WardenError::EngineError(format!(
                "Failed to open build context {}: {}",
                context.display(),
                e
            ))
        })?;

        let mut args = vec!["build".to_string(), "--pull".to_string(), "--force-rm".to_string()];
        for tag in tags {
            args.push("--tag".to_string());
            args.push(tag.clone());
        }
        // Build context is read from stdin
        args.push("-".to_string());

        debug!("Building image with tags {:?}", tags);
        let child = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::from(context_file))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WardenError::EngineError(format!("Failed to run docker build: {}", e)))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                WardenError::EngineError(format!("docker build timed out after {:?}", timeout))
            })?
            .map_err(|e| WardenError::EngineError(format!("Failed to run docker build: {}", e)))?;

        if !output.status.success() {
            return Err(WardenError::EngineError(format!(
                "docker build failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn push_image(&self, tag: &str, timeout: Duration) -> Result<(), WardenError> {
        let args = ["push".to_string(), tag.to_string()];
        self.run(&args, timeout).await?;
        Ok(())
    }
}

/// One line of `docker ps --format '{{json .}}'`
#[derive(Debug, Deserialize)]
struct PsRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Labels", default)]
    labels: String,
    #[serde(rename = "Ports", default)]
    ports: String,
}

fn parse_ps_line(line: &str) -> Result<ContainerSummary, WardenError> {
    let row: PsRow = serde_json::from_str(line).map_err(|e| {
        WardenError::EngineError(format!("Unexpected docker ps output '{}': {}", line, e))
    })?;
    Ok(ContainerSummary {
        id: row.id,
        image: row.image,
        names: row.names,
        labels: parse_labels(&row.labels),
        public_ports: parse_public_ports(&row.ports),
    })
}

/// Parse `key=value,key=value`
fn parse_labels(labels: &str) -> BTreeMap<String, String> {
    labels
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .collect()
}

/// Host ports out of e.g. `0.0.0.0:40001->40001/tcp, :::40001->40001/tcp, 8080/tcp`
fn parse_public_ports(ports: &str) -> Vec<u16> {
    let mut public = Vec::new();
    for entry in ports.split(',') {
        let Some((host, _)) = entry.trim().split_once("->") else {
            continue;
        };
        let Some((_, port)) = host.rsplit_once(':') else {
            continue;
        };
        // Ranges publish as `ip:40000-40002`, only the first port is kept
        let first = port.split('-').next().unwrap_or(port);
        if let Ok(port) = first.parse::<u16>() {
            if !public.contains(&port) {
                public.push(port);
            }
        }
    }
    public
}
