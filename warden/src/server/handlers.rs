//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, RawQuery, State,
    },
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::build::builder::{build_key, BuildStatus, ImageBuildOptions};
use crate::errors::WardenError;
use crate::models::deployment::Deployment;
use crate::proxy::payload::{relay_response, Payload};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "warden".to_string(),
        version: version.version,
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

// ================================= EXECUTION ===================================== //

/// `/e/{project}` or `/e/{project}/{alias}`
#[derive(Debug, Deserialize)]
pub struct ExecPath {
    pub project: String,
    #[serde(default)]
    pub alias: String,
}

/// Forward a call to the instance routed for the path's address
pub async fn exec_handler(
    State(state): State<Arc<ServerState>>,
    Path(path): Path<ExecPath>,
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Body,
) -> Result<Response, WardenError> {
    let query: Vec<(String, String)> = query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    let body = reqwest::Body::wrap_stream(body.into_data_stream());

    let payload = Payload::new(
        &path.project,
        &path.alias,
        method,
        headers,
        query,
        Some(body),
    )?;
    let upstream = payload.execute(&state.routes, state.execute_timeout).await?;
    Ok(relay_response(upstream))
}

// ================================= DEPLOYMENTS =================================== //

#[derive(Debug, Serialize, Deserialize)]
pub struct DeployResponse {
    pub address: String,
    pub endpoint: String,
}

/// Start an instance and publish its route
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    deployment: Result<Json<Deployment>, JsonRejection>,
) -> Result<impl IntoResponse, WardenError> {
    let Json(mut deployment) = deployment?;
    deployment.validate()?;
    let endpoint = state.manager.deploy_instance(&deployment).await?;
    Ok((
        StatusCode::CREATED,
        Json(DeployResponse {
            address: deployment.address(),
            endpoint,
        }),
    ))
}

/// Stop every instance of a deployment and drop its route
pub async fn stop_handler(
    State(state): State<Arc<ServerState>>,
    deployment: Result<Json<Deployment>, JsonRejection>,
) -> Result<StatusCode, WardenError> {
    let Json(deployment) = deployment?;
    state.manager.stop_instance(&deployment).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RouteEntry {
    pub address: String,
    pub endpoint: String,
}

pub async fn routes_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let routes: Vec<RouteEntry> = state
        .routes
        .entries()
        .into_iter()
        .map(|(address, endpoint)| RouteEntry { address, endpoint })
        .collect();
    Json(routes)
}

// =================================== IMAGES ====================================== //

#[derive(Debug, Serialize, Deserialize)]
pub struct BuildResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,
}

/// Request an image build; the build itself runs in the background
pub async fn build_handler(
    State(state): State<Arc<ServerState>>,
    options: Result<Json<ImageBuildOptions>, JsonRejection>,
) -> Result<impl IntoResponse, WardenError> {
    let Json(options) = options?;
    let status = state.builder.build_image(options).await?;
    let record = match &status {
        BuildStatus::Pending(record) => Some(record.clone()),
        _ => None,
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(BuildResponse {
            status: status.as_str().to_string(),
            record,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct BuildStatusQuery {
    pub git_url: String,
    #[serde(default)]
    pub hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BuildRecordResponse {
    pub build_key: String,
    pub record: String,
}

/// Current build record, 404 when no build is running or recently failed
pub async fn build_status_handler(
    State(state): State<Arc<ServerState>>,
    query: Result<Query<BuildStatusQuery>, QueryRejection>,
) -> Result<impl IntoResponse, WardenError> {
    let Query(query) = query?;
    let key = build_key(&query.git_url, &query.hash);
    match state.builder.status(&query.git_url, &query.hash).await? {
        Some(record) => Ok(Json(BuildRecordResponse {
            build_key: key,
            record,
        })),
        None => Err(WardenError::NotFound(format!("no build record for '{}'", key))),
    }
}
