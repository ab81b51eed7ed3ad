//! hostgrid-api: REST API for Hostgrid.
//!
//! Thin axum layer over [`Orchestrator`]. Every handler delegates to one
//! orchestrator call and wraps the result in the `{success, data, error}`
//! envelope.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/catalog` | List provisionable service types |
//! | POST | `/api/v1/tenants` | Register a tenant |
//! | GET | `/api/v1/tenants/{tenant_id}` | Get a tenant |
//! | GET | `/api/v1/tenants/{tenant_id}/services` | List a tenant's services |
//! | POST | `/api/v1/tenants/{tenant_id}/services/{name}?type=...` | Provision a service; body is an optional zip archive |
//! | GET | `/api/v1/tenants/{tenant_id}/services/{name}` | Get a service record |
//! | POST | `/api/v1/tenants/{tenant_id}/services/{name}/{action}` | Apply `encender`, `apagar`, `reiniciar` or `eliminar` |

pub mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use hostgrid_provision::Orchestrator;

/// Largest archive body accepted by the provisioning route.
pub const UPLOAD_LIMIT_BYTES: usize = 512 * 1024 * 1024;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    /// Directory where uploaded archives are spooled before extraction.
    pub upload_dir: PathBuf,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/catalog", get(handlers::list_service_types))
        .route("/tenants", post(handlers::create_tenant))
        .route("/tenants/{tenant_id}", get(handlers::get_tenant))
        .route("/tenants/{tenant_id}/services", get(handlers::list_services))
        .route(
            "/tenants/{tenant_id}/services/{name}",
            get(handlers::get_service).post(handlers::provision_service),
        )
        .route(
            "/tenants/{tenant_id}/services/{name}/{action}",
            post(handlers::control_service),
        )
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
