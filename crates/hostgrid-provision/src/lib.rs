//! hostgrid-provision: tenant service provisioning and lifecycle control.
//!
//! [`Orchestrator`] is the entry point. It is constructed from explicit
//! collaborators (container runtime, record store, template catalog) and
//! drives the full provision sequence:
//!
//! 1. resolve the tenant and ensure the service directory layout
//! 2. clone a repository and/or extract an uploaded archive into `data/`
//! 3. initialize the file-manager companion's database
//! 4. render the catalog template and persist it as `topology.toml`
//! 5. replace every container, dependencies first
//! 6. record the service as `active`
//!
//! Control actions re-read the declaration and apply the action to each
//! container by name, best effort.

pub mod archive;
pub mod companion;
pub mod error;
pub mod git;
pub mod ident;
pub mod laravel;
pub mod layout;
pub mod orchestrator;

pub use companion::{CompanionError, CompanionInit, CompanionInitializer};
pub use error::{ProvisionError, ProvisionResult};
pub use layout::ServiceLayout;
pub use orchestrator::{
    ContainerOutcome, ContainerResult, ControlReport, Orchestrator, OrchestratorSettings,
    ProvisionOutcome, ProvisionRequest,
};
