//! Route table mapping function addresses to live endpoints

use std::collections::HashMap;
use std::sync::RwLock;

/// Concurrent map from address (`project[/alias]`) to endpoint (`host:port`).
///
/// The deployment manager writes entries, the proxy reads them.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: RwLock<HashMap<String, String>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `address` at `endpoint`, replacing any previous entry
    pub fn set(&self, address: &str, endpoint: &str) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.insert(address.to_string(), endpoint.to_string());
    }

    /// Endpoint for `address`, or an empty string when nothing is routable
    pub fn get(&self, address: &str) -> String {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.get(address).cloned().unwrap_or_default()
    }

    pub fn delete(&self, address: &str) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.remove(address);
    }

    /// Snapshot of all routes, sorted by address
    pub fn entries(&self) -> Vec<(String, String)> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<(String, String)> = routes
            .iter()
            .map(|(address, endpoint)| (address.clone(), endpoint.clone()))
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
