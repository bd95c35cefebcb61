//! In-process stand-ins for the container engine, git and the registry

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::RawQuery;
use axum::http::Method;
use axum::Router;
use tokio::task::JoinHandle;

use warden::build::git::{GitCredentials, RepoCheckout};
use warden::build::registry::ImageRegistry;
use warden::deploy::engine::{ContainerEngine, ContainerSpec, ContainerSummary};
use warden::errors::WardenError;

pub const FULL_HASH: &str = "abcdef1234567890abcdef1234567890abcdef12";

struct FakeContainer {
    spec: ContainerSpec,
    server: Option<JoinHandle<()>>,
}

/// Engine whose "containers" are small HTTP servers answering
/// `<image> <METHOD> <query> <body>`
#[derive(Default)]
pub struct FakeEngine {
    containers: Mutex<HashMap<String, FakeContainer>>,
    next_id: AtomicUsize,
    pub builds: Mutex<Vec<Vec<String>>>,
    pub pushes: Mutex<Vec<String>>,
    pub fail_build: AtomicBool,
}

impl FakeEngine {
    pub fn running(&self) -> usize {
        self.containers.lock().unwrap().len()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> Result<String, WardenError> {
        Ok("fake".to_string())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, WardenError> {
        let id = format!("c{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.containers.lock().unwrap().insert(
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                server: None,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), WardenError> {
        let spec = match self.containers.lock().unwrap().get(id) {
            Some(container) => container.spec.clone(),
            None => return Err(WardenError::EngineError(format!("no container {}", id))),
        };

        let listener = tokio::net::TcpListener::bind((spec.host_ip.as_str(), spec.host_port))
            .await
            .map_err(|e| WardenError::EngineError(e.to_string()))?;
        let image = spec.image.clone();
        let app = Router::new().fallback(
            move |method: Method, RawQuery(query): RawQuery, body: String| {
                let image = image.clone();
                async move { format!("{} {} {} {}", image, method, query.unwrap_or_default(), body) }
            },
        );
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        if let Some(container) = self.containers.lock().unwrap().get_mut(id) {
            container.server = Some(server);
        }
        Ok(())
    }

    async fn list_containers(
        &self,
        labels: &[(String, String)],
    ) -> Result<Vec<ContainerSummary>, WardenError> {
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .iter()
            .filter(|(_, c)| {
                labels
                    .iter()
                    .all(|(k, v)| c.spec.labels.get(k).map(|l| l == v).unwrap_or(false))
            })
            .map(|(id, c)| ContainerSummary {
                id: id.clone(),
                image: c.spec.image.clone(),
                names: c.spec.name.clone(),
                labels: c.spec.labels.clone(),
                public_ports: vec![c.spec.host_port],
            })
            .collect())
    }

    async fn remove_container(&self, id: &str) -> Result<(), WardenError> {
        if let Some(container) = self.containers.lock().unwrap().remove(id) {
            if let Some(server) = container.server {
                server.abort();
            }
        }
        Ok(())
    }

    async fn build_image(
        &self,
        context: &Path,
        tags: &[String],
        _timeout: Duration,
    ) -> Result<(), WardenError> {
        if !context.exists() {
            return Err(WardenError::EngineError("missing build context".to_string()));
        }
        if self.fail_build.load(Ordering::SeqCst) {
            return Err(WardenError::EngineError("docker build failed: boom".to_string()));
        }
        self.builds.lock().unwrap().push(tags.to_vec());
        Ok(())
    }

    async fn push_image(&self, tag: &str, _timeout: Duration) -> Result<(), WardenError> {
        self.pushes.lock().unwrap().push(tag.to_string());
        Ok(())
    }
}

/// Checkout producing a one-file repository whose only commit is `FULL_HASH`
#[derive(Default)]
pub struct FakeCheckout {
    pub clones: AtomicUsize,
    /// Added on top of the usual 100ms clone time
    pub extra_clone_ms: AtomicU64,
}

#[async_trait]
impl RepoCheckout for FakeCheckout {
    async fn clone_repo(
        &self,
        _url: &str,
        _credentials: Option<&GitCredentials>,
        dest: &Path,
    ) -> Result<(), WardenError> {
        self.clones.fetch_add(1, Ordering::SeqCst);
        let extra = self.extra_clone_ms.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100 + extra)).await;
        tokio::fs::create_dir_all(dest.join(".git")).await?;
        tokio::fs::write(dest.join("main.py"), "def handle(event):\n    return event\n").await?;
        Ok(())
    }

    async fn resolve_commit(&self, _repo: &Path, requested: &str) -> Result<String, WardenError> {
        if requested.is_empty() || requested == "latest" || FULL_HASH.starts_with(requested) {
            Ok(FULL_HASH.to_string())
        } else {
            Err(WardenError::GitError(format!(
                "could not find commit prefixed with hash '{}'",
                requested
            )))
        }
    }

    async fn checkout(&self, _repo: &Path, _commit: &str) -> Result<(), WardenError> {
        Ok(())
    }
}

/// Registry holding tags per repository
#[derive(Default)]
pub struct FakeRegistry {
    tags: Mutex<HashMap<String, Vec<String>>>,
}

impl FakeRegistry {
    pub fn add_tag(&self, repository: &str, tag: &str) {
        self.tags
            .lock()
            .unwrap()
            .entry(repository.to_string())
            .or_default()
            .push(tag.to_string());
    }
}

#[async_trait]
impl ImageRegistry for FakeRegistry {
    async fn repositories(&self) -> Result<Vec<String>, WardenError> {
        Ok(self.tags.lock().unwrap().keys().cloned().collect())
    }

    async fn tags(&self, repository: &str) -> Result<Vec<String>, WardenError> {
        Ok(self
            .tags
            .lock()
            .unwrap()
            .get(repository)
            .cloned()
            .unwrap_or_default())
    }
}

/// A port range of `len` ports the OS considered free a moment ago
pub fn free_port_range(len: u16) -> (u16, u16) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let start = port.min(u16::MAX - len);
    (start, start + len)
}
