//! Free port discovery on the local host
//!
//! The scan is best-effort: a port reported free had no listener when it was
//! probed, but nothing reserves it. Another process (or a concurrent scan) can
//! bind it before the container does, in which case the container start fails
//! and the caller sees the engine error.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::errors::WardenError;

/// Upper bound on simultaneous connect attempts
const MAX_CONCURRENT_PROBES: usize = 256;

/// Half-open port range `[min, max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl PortRange {
    pub fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, port: u16) -> bool {
        self.min <= port && port < self.max
    }

    pub fn is_empty(&self) -> bool {
        self.min >= self.max
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.min, self.max)
    }
}

/// Find a port in `range` with no listener on the local host.
///
/// Every port is probed concurrently and the first refused connection wins.
/// Fails when every probe finds a listener, or when no probe answers within
/// `timeout`.
pub async fn find_free_port(range: PortRange, timeout: Duration) -> Result<u16, WardenError> {
    if range.is_empty() {
        return Err(WardenError::NoFreePort(format!("port range {} is empty", range)));
    }

    let permits = Arc::new(Semaphore::new(MAX_CONCURRENT_PROBES));
    let mut probes = JoinSet::new();
    for port in range.min..range.max {
        let permits = permits.clone();
        probes.spawn(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            probe(port).await
        });
    }

    let search = async {
        while let Some(result) = probes.join_next().await {
            if let Ok(Some(port)) = result {
                return Some(port);
            }
        }
        None
    };

    // Dropping the JoinSet aborts the probes still in flight
    match tokio::time::timeout(timeout, search).await {
        Ok(Some(port)) => {
            debug!("Found free port {} in {}", port, range);
            Ok(port)
        }
        Ok(None) => Err(WardenError::NoFreePort(format!(
            "every port in {} has a listener",
            range
        ))),
        Err(_) => Err(WardenError::NoFreePort(format!(
            "no port in {} answered within {:?}",
            range, timeout
        ))),
    }
}

/// Returns the port when nothing is listening on it
async fn probe(port: u16) -> Option<u16> {
    match TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await {
        Ok(_) => None,
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => Some(port),
        Err(_) => None,
    }
}
