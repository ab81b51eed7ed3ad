//! Lifecycle orchestrator: provision and control of tenant services.
//!
//! The orchestrator holds no per-service state of its own. Every control
//! call re-reads the service record and the `topology.toml` declaration
//! written at provision time, and addresses containers purely by their
//! deterministic names.

use std::path::PathBuf;
use std::sync::Arc;

use hostgrid_core::{
    Catalog, ContainerSpec, HostgridConfig, Renderer, Role, ServiceAction, ServiceStatus,
    ServiceType, ServiceUrls, catalog::StartupScript,
};
use hostgrid_runtime::ContainerRuntime;
use hostgrid_state::{ServiceRecord, StateStore, Tenant, TenantId, epoch_secs, service_key};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::archive;
use crate::companion::CompanionInitializer;
use crate::error::{ProvisionError, ProvisionResult};
use crate::git;
use crate::ident::{validate_service_name, validate_username};
use crate::laravel;
use crate::layout::ServiceLayout;

/// Deployment-wide settings the orchestrator needs.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub tenant_root: PathBuf,
    pub domain: String,
    pub scheme: String,
    pub companion_image: String,
    pub admin_password: String,
}

impl OrchestratorSettings {
    pub fn from_config(config: &HostgridConfig) -> Self {
        Self {
            tenant_root: config.tenant_root(),
            domain: config.domain().to_string(),
            scheme: config.scheme().to_string(),
            companion_image: config.companion_image().to_string(),
            admin_password: config.admin_password().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub tenant_id: TenantId,
    pub service_name: String,
    pub service_type: ServiceType,
    /// Uploaded zip archive. Deleted once provisioning finishes.
    pub archive: Option<PathBuf>,
    pub git_repo_url: Option<String>,
    /// Companion admin password; the configured default when `None`.
    pub admin_password: Option<String>,
}

impl ProvisionRequest {
    pub fn new(tenant_id: TenantId, service_name: &str, service_type: ServiceType) -> Self {
        Self {
            tenant_id,
            service_name: service_name.to_string(),
            service_type,
            archive: None,
            git_repo_url: None,
            admin_password: None,
        }
    }

    pub fn with_archive(mut self, archive: PathBuf) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_git_repo(mut self, url: &str) -> Self {
        self.git_repo_url = Some(url.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionOutcome {
    pub tenant_id: TenantId,
    pub username: String,
    pub service: String,
    pub service_type: ServiceType,
    pub status: ServiceStatus,
    pub containers: Vec<String>,
    pub urls: ServiceUrls,
}

/// Result of applying a control action to one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerResult {
    Applied,
    /// The container did not exist on the runtime and was skipped.
    Missing,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerOutcome {
    pub name: String,
    pub result: ContainerResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlReport {
    pub tenant_id: TenantId,
    pub service: String,
    pub action: ServiceAction,
    /// Derived from the action, not from the per-container outcomes.
    pub status: ServiceStatus,
    pub outcomes: Vec<ContainerOutcome>,
}

impl ControlReport {
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, ContainerResult::Failed(_)))
            .count()
    }
}

pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    state: StateStore,
    catalog: Arc<Catalog>,
    renderer: Renderer,
    companion: CompanionInitializer,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        state: StateStore,
        catalog: Arc<Catalog>,
        settings: OrchestratorSettings,
    ) -> Self {
        let companion = CompanionInitializer::new(runtime.clone(), &settings.companion_image);
        Self {
            runtime,
            state,
            catalog,
            renderer: Renderer::new(&settings.domain),
            companion,
            settings,
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // ── Tenants ────────────────────────────────────────────────────

    /// Register a tenant and create its directory under the tenant root.
    pub fn register_tenant(&self, id: TenantId, username: &str) -> ProvisionResult<Tenant> {
        validate_username(username)?;
        let tenant = Tenant {
            id,
            username: username.to_string(),
            created_at: epoch_secs(),
        };
        self.state.create_tenant(&tenant)?;
        create_tenant_dir(&self.settings.tenant_root.join(username))?;
        info!(tenant = id, username, "tenant registered");
        Ok(tenant)
    }

    pub fn tenant(&self, id: TenantId) -> ProvisionResult<Tenant> {
        self.state
            .get_tenant(id)?
            .ok_or(ProvisionError::TenantNotFound(id))
    }

    // ── Services ───────────────────────────────────────────────────

    pub fn list_services(&self, tenant_id: TenantId) -> ProvisionResult<Vec<ServiceRecord>> {
        self.tenant(tenant_id)?;
        Ok(self.state.list_services_for_tenant(tenant_id)?)
    }

    pub fn get_service(&self, tenant_id: TenantId, service: &str) -> ProvisionResult<ServiceRecord> {
        self.tenant(tenant_id)?;
        self.state
            .get_service(tenant_id, service)?
            .ok_or_else(|| ProvisionError::ServiceNotFound {
                tenant_id,
                service: service.to_string(),
            })
    }

    /// Provision (or re-provision) a service from its catalog template.
    ///
    /// Containers already created when a later one fails are left running
    /// and no record is written. An existing record is marked `error`.
    pub async fn provision(&self, request: ProvisionRequest) -> ProvisionResult<ProvisionOutcome> {
        let result = self.provision_inner(&request).await;

        if let Some(archive) = &request.archive {
            match tokio::fs::remove_file(archive).await {
                Ok(()) => debug!(?archive, "upload removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(?archive, error = %e, "failed to remove upload"),
            }
        }

        if let Err(e) = &result {
            error!(
                tenant = request.tenant_id,
                service = %request.service_name,
                error = %e,
                "provisioning failed"
            );
            self.mark_failed(request.tenant_id, &request.service_name);
        }
        result
    }

    async fn provision_inner(&self, request: &ProvisionRequest) -> ProvisionResult<ProvisionOutcome> {
        let tenant = self.tenant(request.tenant_id)?;
        validate_service_name(&request.service_name)?;
        let username = tenant.username.as_str();
        let service = request.service_name.as_str();
        info!(
            tenant = tenant.id,
            username,
            service,
            service_type = %request.service_type,
            "provisioning service"
        );

        let layout = self.layout(username, service)?;
        layout.ensure()?;

        if let Some(url) = &request.git_repo_url {
            git::clone_repo(url, &layout.data_dir()).await?;
        }

        if let Some(upload) = &request.archive {
            let upload = upload.clone();
            let dest = layout.data_dir();
            let entries = tokio::task::spawn_blocking(move || archive::extract(&upload, &dest))
                .await
                .map_err(|e| ProvisionError::ExtractionFailed(e.to_string()))??;
            info!(service, entries, "archive extracted");
        }

        let password = request
            .admin_password
            .as_deref()
            .unwrap_or(&self.settings.admin_password);
        match self
            .companion
            .initialize(username, service, &layout.companion_dir(), password)
            .await
        {
            Ok(init) => debug!(service, ?init, "companion ready"),
            Err(e) => warn!(service, error = %e, "companion initialization failed"),
        }

        let template = self.catalog.lookup(request.service_type)?;
        let mut topology = self.renderer.render(template, username, service);
        layout.ensure_mount_sources(&topology)?;

        if template.startup_script == Some(StartupScript::Laravel) {
            let project = laravel::bootstrap(&layout)?;
            let app_url = topology
                .urls(&self.settings.scheme)
                .website
                .unwrap_or_default();
            if let Some(primary) = topology.container_mut(Role::Primary) {
                primary
                    .environment
                    .extend(project.environment(username, service, &app_url));
            }
            if let Some(database) = topology.container_mut(Role::Database) {
                database.environment.extend(project.database_environment());
            }
        }

        layout.write_declaration(&topology)?;
        debug!(path = ?layout.declaration_path(), "declaration written");

        for spec in &topology.containers {
            self.replace_container(&spec.anchored_at(layout.root())).await?;
        }

        let now = epoch_secs();
        let created_at = self
            .state
            .get_service(tenant.id, service)?
            .map(|r| r.created_at)
            .unwrap_or(now);
        let record = ServiceRecord {
            tenant_id: tenant.id,
            service_name: service.to_string(),
            service_type: request.service_type,
            status: ServiceStatus::Active,
            created_at,
            updated_at: now,
        };
        self.state.put_service(&record)?;

        let outcome = ProvisionOutcome {
            tenant_id: tenant.id,
            username: username.to_string(),
            service: service.to_string(),
            service_type: request.service_type,
            status: ServiceStatus::Active,
            containers: topology
                .container_names()
                .into_iter()
                .map(String::from)
                .collect(),
            urls: topology.urls(&self.settings.scheme),
        };
        info!(
            tenant = tenant.id,
            service,
            containers = outcome.containers.len(),
            "service provisioned"
        );
        Ok(outcome)
    }

    /// Force-remove any container holding `spec.name`, then create and start it.
    async fn replace_container(&self, spec: &ContainerSpec) -> ProvisionResult<()> {
        if let Some(existing) = self.runtime.get_by_name(&spec.name).await? {
            match self.runtime.remove(&existing, true).await {
                Ok(()) => info!(container = %spec.name, "replaced existing container"),
                Err(e) if e.is_not_found() => debug!(container = %spec.name, "already gone"),
                Err(e) => return Err(e.into()),
            }
        }
        let handle = self.runtime.run(spec).await?;
        info!(container = %handle.name, id = %handle.id, image = %spec.image, "container running");
        Ok(())
    }

    fn mark_failed(&self, tenant_id: TenantId, service: &str) {
        let key = service_key(tenant_id, service);
        match self.state.update_service_status(&key, ServiceStatus::Error) {
            Ok(true) => warn!(%key, "service record marked error"),
            Ok(false) => {}
            Err(e) => warn!(%key, error = %e, "failed to mark service record"),
        }
    }

    /// Parse `action` and apply it. Unknown actions fail before any lookup.
    pub async fn control_named(
        &self,
        tenant_id: TenantId,
        service: &str,
        action: &str,
    ) -> ProvisionResult<ControlReport> {
        let action: ServiceAction = action.parse()?;
        self.control(tenant_id, service, action).await
    }

    /// Apply `action` to every container of a provisioned service.
    ///
    /// Best effort: per-container failures are reported in the outcomes and
    /// do not stop the loop. Containers are visited in start order for
    /// start/restart and in reverse for stop/delete.
    pub async fn control(
        &self,
        tenant_id: TenantId,
        service: &str,
        action: ServiceAction,
    ) -> ProvisionResult<ControlReport> {
        let tenant = self.tenant(tenant_id)?;
        validate_service_name(service)?;
        let not_found = || ProvisionError::ServiceNotFound {
            tenant_id,
            service: service.to_string(),
        };

        let record = self
            .state
            .get_service(tenant_id, service)?
            .filter(|r| r.status != ServiceStatus::Deleted)
            .ok_or_else(not_found)?;
        let topology = self
            .layout(&tenant.username, service)?
            .read_declaration()?
            .ok_or_else(not_found)?;

        let mut names = topology.container_names();
        if matches!(action, ServiceAction::Stop | ServiceAction::Delete) {
            names.reverse();
        }

        let mut outcomes = Vec::with_capacity(names.len());
        for name in names {
            let result = self.apply(name, action).await;
            outcomes.push(ContainerOutcome {
                name: name.to_string(),
                result,
            });
        }

        let status = action.resulting_status();
        self.state
            .update_service_status(&record.table_key(), status)?;

        let report = ControlReport {
            tenant_id,
            service: service.to_string(),
            action,
            status,
            outcomes,
        };
        let missing = report
            .outcomes
            .iter()
            .filter(|o| o.result == ContainerResult::Missing)
            .count();
        info!(
            tenant = tenant_id,
            service,
            %action,
            %status,
            containers = report.outcomes.len(),
            missing,
            failed = report.failed(),
            "control action applied"
        );
        Ok(report)
    }

    async fn apply(&self, name: &str, action: ServiceAction) -> ContainerResult {
        let handle = match self.runtime.get_by_name(name).await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                debug!(container = name, %action, "container missing, skipping");
                return ContainerResult::Missing;
            }
            Err(e) => {
                warn!(container = name, %action, error = %e, "container lookup failed");
                return ContainerResult::Failed(e.to_string());
            }
        };

        let outcome = match action {
            ServiceAction::Start => self.runtime.start(&handle).await,
            ServiceAction::Stop => self.runtime.stop(&handle).await,
            ServiceAction::Restart => self.runtime.restart(&handle).await,
            ServiceAction::Delete => self.runtime.remove(&handle, true).await,
        };
        match outcome {
            Ok(()) => {
                debug!(container = name, %action, "action applied");
                ContainerResult::Applied
            }
            Err(e) if e.is_not_found() => ContainerResult::Missing,
            Err(e) => {
                warn!(container = name, %action, error = %e, "action failed");
                ContainerResult::Failed(e.to_string())
            }
        }
    }

    fn layout(&self, username: &str, service: &str) -> ProvisionResult<ServiceLayout> {
        let root = std::path::absolute(&self.settings.tenant_root)?;
        Ok(ServiceLayout::new(&root, username, service))
    }
}

#[cfg(unix)]
fn create_tenant_dir(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
}

#[cfg(not(unix))]
fn create_tenant_dir(path: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}
