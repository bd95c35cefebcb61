//! One function invocation, forwarded to the instance routed for its address

use std::time::Duration;

use axum::body::Body;
use axum::response::Response;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, Method};
use tracing::debug;
use url::Url;

use crate::deploy::routes::RouteTable;
use crate::errors::WardenError;
use crate::utils::{address_of, lower_trim, normalize_alias};

/// Upper bound on a forwarded call
pub const EXECUTE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Headers that only concern a single connection and are never forwarded
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub struct Payload {
    project: String,
    alias: String,
    method: Method,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Option<reqwest::Body>,
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload")
            .field("project", &self.project)
            .field("alias", &self.alias)
            .field("method", &self.method)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

impl Payload {
    /// Capture an inbound call. Only GET and POST are accepted; a GET never
    /// carries a body.
    pub fn new(
        project: &str,
        alias: &str,
        method: Method,
        headers: HeaderMap,
        query: Vec<(String, String)>,
        body: Option<reqwest::Body>,
    ) -> Result<Self, WardenError> {
        let body = match method {
            Method::GET => None,
            Method::POST => body,
            other => {
                return Err(WardenError::MethodNotAllowed(format!(
                    "{} (only GET and POST are supported)",
                    other
                )))
            }
        };
        Ok(Self {
            project: lower_trim(project),
            alias: normalize_alias(alias),
            method,
            headers,
            query,
            body,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Routing address, same form as a deployment's
    pub fn address(&self) -> String {
        address_of(&self.project, &self.alias)
    }

    /// Forward the call to the routed instance.
    ///
    /// Fails with `NotDeployed` before any network activity when the address
    /// has no route. Downstream error statuses are returned as responses.
    pub async fn execute(
        self,
        routes: &RouteTable,
        timeout: Duration,
    ) -> Result<reqwest::Response, WardenError> {
        let address = self.address();
        let endpoint = routes.get(&address);
        if endpoint.is_empty() {
            return Err(WardenError::NotDeployed(address));
        }

        let mut url = Url::parse(&format!("http://{}/", endpoint)).map_err(|e| {
            WardenError::Internal(format!("bad endpoint '{}' for '{}': {}", endpoint, address, e))
        })?;
        if self.method == Method::GET && !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }

        // Fresh client per call so cookies never leak between invocations
        let client = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()?;

        let mut headers = strip_hop_by_hop(self.headers);
        headers.remove(header::HOST);
        if self.body.is_none() {
            headers.remove(header::CONTENT_LENGTH);
        }

        debug!("{} {} -> {}", self.method, address, url);
        let mut request = client.request(self.method, url).headers(headers);
        if let Some(body) = self.body {
            request = request.body(body);
        }

        request.send().await.map_err(|e| {
            if e.is_timeout() {
                WardenError::UpstreamTimeout(format!("{} after {:?}", address, timeout))
            } else {
                WardenError::UpstreamError(format!("{}: {}", address, e))
            }
        })
    }
}

fn strip_hop_by_hop(mut headers: HeaderMap) -> HeaderMap {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
    headers
}

/// Stream a downstream response back with its status, headers and body
pub fn relay_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let headers = strip_hop_by_hop(upstream.headers().clone());

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
