//! REST API handlers.
//!
//! Each handler calls into the `Orchestrator` and returns JSON responses.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hostgrid_core::ServiceType;
use hostgrid_provision::ident::validate_service_name;
use hostgrid_provision::{ProvisionError, ProvisionRequest};
use hostgrid_state::{StateError, TenantId, epoch_secs};
use tracing::{debug, info};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// HTTP status for an orchestrator error.
pub fn status_for(err: &ProvisionError) -> StatusCode {
    if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if matches!(err, ProvisionError::State(StateError::AlreadyExists(_))) {
        StatusCode::CONFLICT
    } else if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn provision_error(err: ProvisionError) -> Response {
    error_response(&err.to_string(), status_for(&err)).into_response()
}

// ── Catalog ────────────────────────────────────────────────────

/// GET /api/v1/catalog
pub async fn list_service_types(State(state): State<ApiState>) -> impl IntoResponse {
    let types: Vec<ServiceType> = state.orchestrator.catalog().service_types().collect();
    ApiResponse::ok(types)
}

// ── Tenants ────────────────────────────────────────────────────

/// Tenant registration body.
#[derive(serde::Deserialize)]
pub struct CreateTenantRequest {
    pub id: TenantId,
    pub username: String,
}

/// POST /api/v1/tenants
pub async fn create_tenant(
    State(state): State<ApiState>,
    Json(req): Json<CreateTenantRequest>,
) -> impl IntoResponse {
    match state.orchestrator.register_tenant(req.id, &req.username) {
        Ok(tenant) => (StatusCode::CREATED, ApiResponse::ok(tenant)).into_response(),
        Err(e) => provision_error(e),
    }
}

/// GET /api/v1/tenants/:tenant_id
pub async fn get_tenant(
    State(state): State<ApiState>,
    Path(tenant_id): Path<TenantId>,
) -> impl IntoResponse {
    match state.orchestrator.tenant(tenant_id) {
        Ok(tenant) => ApiResponse::ok(tenant).into_response(),
        Err(e) => provision_error(e),
    }
}

// ── Services ───────────────────────────────────────────────────

/// GET /api/v1/tenants/:tenant_id/services
pub async fn list_services(
    State(state): State<ApiState>,
    Path(tenant_id): Path<TenantId>,
) -> impl IntoResponse {
    match state.orchestrator.list_services(tenant_id) {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => provision_error(e),
    }
}

/// GET /api/v1/tenants/:tenant_id/services/:name
pub async fn get_service(
    State(state): State<ApiState>,
    Path((tenant_id, name)): Path<(TenantId, String)>,
) -> impl IntoResponse {
    match state.orchestrator.get_service(tenant_id, &name) {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => provision_error(e),
    }
}

/// Provisioning query parameters.
#[derive(serde::Deserialize)]
pub struct ProvisionQuery {
    #[serde(rename = "type")]
    pub service_type: String,
    pub git_repo_url: Option<String>,
    pub admin_password: Option<String>,
}

/// POST /api/v1/tenants/:tenant_id/services/:name
///
/// The request body, when non-empty, is the zip archive to extract into
/// the service's data directory.
pub async fn provision_service(
    State(state): State<ApiState>,
    Path((tenant_id, name)): Path<(TenantId, String)>,
    Query(query): Query<ProvisionQuery>,
    body: Bytes,
) -> impl IntoResponse {
    let service_type: ServiceType = match query.service_type.parse() {
        Ok(t) => t,
        Err(e) => return provision_error(ProvisionError::from(e)),
    };
    // The name becomes part of the spool file name.
    if let Err(e) = validate_service_name(&name) {
        return provision_error(e);
    }

    let mut request = ProvisionRequest::new(tenant_id, &name, service_type);
    request.admin_password = query.admin_password;
    if let Some(url) = query.git_repo_url.as_deref().filter(|u| !u.is_empty()) {
        request = request.with_git_repo(url);
    }
    if !body.is_empty() {
        match spool_upload(&state, tenant_id, &name, &body).await {
            Ok(path) => request = request.with_archive(path),
            Err(e) => return provision_error(e.into()),
        }
    }

    match state.orchestrator.provision(request).await {
        Ok(outcome) => (StatusCode::CREATED, ApiResponse::ok(outcome)).into_response(),
        Err(e) => provision_error(e),
    }
}

/// POST /api/v1/tenants/:tenant_id/services/:name/:action
pub async fn control_service(
    State(state): State<ApiState>,
    Path((tenant_id, name, action)): Path<(TenantId, String, String)>,
) -> impl IntoResponse {
    match state
        .orchestrator
        .control_named(tenant_id, &name, &action)
        .await
    {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => provision_error(e),
    }
}

static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

async fn spool_upload(
    state: &ApiState,
    tenant_id: TenantId,
    name: &str,
    body: &[u8],
) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(&state.upload_dir).await?;
    let seq = UPLOAD_SEQ.fetch_add(1, Ordering::Relaxed);
    let path = state
        .upload_dir
        .join(format!("{tenant_id}-{name}-{}-{seq}.zip", epoch_secs()));
    tokio::fs::write(&path, body).await?;
    debug!(?path, bytes = body.len(), "upload spooled");
    info!(tenant = tenant_id, service = name, "archive received");
    Ok(path)
}
