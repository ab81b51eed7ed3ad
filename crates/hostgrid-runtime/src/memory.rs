//! In-memory runtime used as an injected fake in tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use hostgrid_core::ContainerSpec;

use crate::error::{RuntimeError, RuntimeResult};
use crate::{ContainerHandle, ContainerRuntime, ContainerState, OneShotSpec};

type OneShotHook = Box<dyn Fn(&OneShotSpec) -> RuntimeResult<()> + Send + Sync>;

/// Every runtime call, in the order received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Run(String),
    OneShot(String),
    Start(String),
    Stop(String),
    Restart(String),
    Remove(String),
}

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    state: ContainerState,
    spec: Option<ContainerSpec>,
}

#[derive(Default)]
struct Inner {
    containers: BTreeMap<String, FakeContainer>,
    calls: Vec<RuntimeCall>,
    next_id: u64,
    /// Container name → failure reason for `run`.
    fail_run: HashMap<String, String>,
    /// Container name → failure reason for start/stop/restart/remove.
    fail_action: HashMap<String, String>,
}

/// Container runtime kept entirely in memory.
#[derive(Default)]
pub struct InMemoryRuntime {
    inner: Mutex<Inner>,
    oneshot_hook: Option<OneShotHook>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke `hook` for every one-shot run; its error becomes the run's error.
    pub fn with_oneshot_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&OneShotSpec) -> RuntimeResult<()> + Send + Sync + 'static,
    {
        self.oneshot_hook = Some(Box::new(hook));
        self
    }

    /// Make `run` fail for the named container.
    pub fn fail_run(&self, name: &str, reason: &str) {
        self.lock().fail_run.insert(name.to_string(), reason.to_string());
    }

    /// Make lifecycle actions fail for the named container.
    pub fn fail_action(&self, name: &str, reason: &str) {
        self.lock()
            .fail_action
            .insert(name.to_string(), reason.to_string());
    }

    /// Register a container as if it had been created out-of-band.
    pub fn insert_existing(&self, name: &str, state: ContainerState) {
        let mut inner = self.lock();
        let id = inner.allocate_id();
        inner.containers.insert(
            name.to_string(),
            FakeContainer {
                id,
                state,
                spec: None,
            },
        );
    }

    /// Drop a container without recording a call, simulating drift.
    pub fn forget(&self, name: &str) {
        self.lock().containers.remove(name);
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.lock().containers.keys().cloned().collect()
    }

    pub fn state_of(&self, name: &str) -> Option<ContainerState> {
        self.lock().containers.get(name).map(|c| c.state)
    }

    /// The spec a container was last created from.
    pub fn spec_of(&self, name: &str) -> Option<ContainerSpec> {
        self.lock().containers.get(name).and_then(|c| c.spec.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(
        &self,
        handle: &ContainerHandle,
        call: RuntimeCall,
        state: ContainerState,
    ) -> RuntimeResult<()> {
        let mut inner = self.lock();
        inner.calls.push(call);
        if let Some(reason) = inner.fail_action.get(&handle.name) {
            return Err(RuntimeError::operation(&handle.name, reason));
        }
        let container = inner
            .containers
            .get_mut(&handle.name)
            .ok_or_else(|| RuntimeError::NotFound(handle.name.clone()))?;
        container.state = state;
        Ok(())
    }
}

impl Inner {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("fake-{:08x}", self.next_id)
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn get_by_name(&self, name: &str) -> RuntimeResult<Option<ContainerHandle>> {
        Ok(self.lock().containers.get(name).map(|c| ContainerHandle {
            id: c.id.clone(),
            name: name.to_string(),
            state: c.state,
        }))
    }

    async fn run(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerHandle> {
        let mut inner = self.lock();
        inner.calls.push(RuntimeCall::Run(spec.name.clone()));
        if let Some(reason) = inner.fail_run.get(&spec.name) {
            return Err(RuntimeError::operation(&spec.name, reason));
        }
        if inner.containers.contains_key(&spec.name) {
            return Err(RuntimeError::operation(&spec.name, "name already in use"));
        }
        let id = inner.allocate_id();
        inner.containers.insert(
            spec.name.clone(),
            FakeContainer {
                id: id.clone(),
                state: ContainerState::Running,
                spec: Some(spec.clone()),
            },
        );
        Ok(ContainerHandle {
            id,
            name: spec.name.clone(),
            state: ContainerState::Running,
        })
    }

    async fn run_oneshot(&self, spec: &OneShotSpec) -> RuntimeResult<()> {
        self.lock().calls.push(RuntimeCall::OneShot(spec.name.clone()));
        match &self.oneshot_hook {
            Some(hook) => hook(spec),
            None => Ok(()),
        }
    }

    async fn start(&self, handle: &ContainerHandle) -> RuntimeResult<()> {
        self.transition(
            handle,
            RuntimeCall::Start(handle.name.clone()),
            ContainerState::Running,
        )
    }

    async fn stop(&self, handle: &ContainerHandle) -> RuntimeResult<()> {
        self.transition(
            handle,
            RuntimeCall::Stop(handle.name.clone()),
            ContainerState::Exited,
        )
    }

    async fn restart(&self, handle: &ContainerHandle) -> RuntimeResult<()> {
        self.transition(
            handle,
            RuntimeCall::Restart(handle.name.clone()),
            ContainerState::Running,
        )
    }

    async fn remove(&self, handle: &ContainerHandle, force: bool) -> RuntimeResult<()> {
        let mut inner = self.lock();
        inner.calls.push(RuntimeCall::Remove(handle.name.clone()));
        if let Some(reason) = inner.fail_action.get(&handle.name) {
            return Err(RuntimeError::operation(&handle.name, reason));
        }
        let running = inner
            .containers
            .get(&handle.name)
            .map(|c| c.state == ContainerState::Running);
        match running {
            None => Err(RuntimeError::NotFound(handle.name.clone())),
            Some(true) if !force => Err(RuntimeError::operation(
                &handle.name,
                "cannot remove a running container",
            )),
            Some(_) => {
                inner.containers.remove(&handle.name);
                Ok(())
            }
        }
    }
}
