//! Image naming

use crate::storage::settings::RegistrySettings;
use crate::utils::lower_trim;

/// Derives deterministic image references for a registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageNaming {
    domain: String,
    port: u16,
}

impl ImageNaming {
    pub fn new(domain: &str, port: u16) -> Self {
        Self {
            domain: lower_trim(domain),
            port,
        }
    }

    pub fn from_settings(settings: &RegistrySettings) -> Self {
        Self::new(&settings.domain, settings.port)
    }

    /// Registry host as used in image references. Default ports are omitted.
    pub fn host(&self) -> String {
        match self.port {
            0 | 80 | 443 => self.domain.clone(),
            port => format!("{}:{}", self.domain, port),
        }
    }

    /// Repository name of a project inside the registry
    pub fn repository(&self, project: &str) -> String {
        lower_trim(project)
    }

    /// Full image reference `host/project:tag`, lower-cased
    pub fn reference(&self, project: &str, tag: &str) -> String {
        lower_trim(&format!(
            "{}/{}:{}",
            self.host(),
            self.repository(project),
            lower_trim(tag)
        ))
    }
}
