//! hostgrid-runtime: container runtime drivers.
//!
//! [`ContainerRuntime`] is the seam between the lifecycle orchestrator and
//! whatever actually runs containers. Containers are addressed by their
//! deterministic name; the driver never needs to remember ids between calls.
//!
//! Two drivers ship here:
//! - [`DockerRuntime`] talks to the local Docker engine through bollard.
//! - [`InMemoryRuntime`] keeps container state in a map, for tests.

pub mod docker;
pub mod error;
pub mod memory;
mod oneshot;

use async_trait::async_trait;
use hostgrid_core::{ContainerSpec, Mount};

pub use docker::DockerRuntime;
pub use error::{RuntimeError, RuntimeResult};
pub use memory::{InMemoryRuntime, RuntimeCall};

/// Coarse container state as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Unknown,
}

/// A container that exists on the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
}

/// An ephemeral container that runs one command to completion and is
/// removed afterward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneShotSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    /// Mount sources must be absolute.
    pub mounts: Vec<Mount>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Look up a container by name. `Ok(None)` when it does not exist.
    async fn get_by_name(&self, name: &str) -> RuntimeResult<Option<ContainerHandle>>;

    /// Create and start a container from `spec`. The name must be free.
    async fn run(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerHandle>;

    /// Run a one-shot container, wait for it to exit and remove it.
    /// A non-zero exit status is an error. A leftover container with the
    /// same name is removed first, and the created container is removed
    /// whether or not it started.
    async fn run_oneshot(&self, spec: &OneShotSpec) -> RuntimeResult<()>;

    async fn start(&self, handle: &ContainerHandle) -> RuntimeResult<()>;

    async fn stop(&self, handle: &ContainerHandle) -> RuntimeResult<()>;

    async fn restart(&self, handle: &ContainerHandle) -> RuntimeResult<()>;

    /// Remove a container. With `force`, a running container is killed first.
    async fn remove(&self, handle: &ContainerHandle, force: bool) -> RuntimeResult<()>;
}
