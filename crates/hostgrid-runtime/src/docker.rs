//! Docker engine driver built on bollard.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    Docker,
    container::{
        Config, CreateContainerOptions, RemoveContainerOptions, RestartContainerOptions,
        StopContainerOptions,
    },
    errors::Error,
    image::CreateImageOptions,
    models::{
        ContainerInspectResponse, ContainerStateStatusEnum, HostConfig, PortBinding,
        RestartPolicy as DockerRestartPolicy, RestartPolicyNameEnum,
    },
};
use futures::StreamExt as _;
use hostgrid_core::{ContainerSpec, RestartPolicy};
use tracing::{debug, trace, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::oneshot::{self, OneShotSteps};
use crate::{ContainerHandle, ContainerRuntime, ContainerState, OneShotSpec};

/// Seconds Docker waits for a graceful stop before killing.
const STOP_TIMEOUT_SECS: i64 = 10;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the local defaults (`DOCKER_HOST` or the platform socket).
    pub fn connect() -> RuntimeResult<Self> {
        let docker =
            Docker::connect_with_defaults().map_err(|e| RuntimeError::Connect(e.to_string()))?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    async fn pull_image(&self, image: &str) {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(update) = stream.next().await {
            match update {
                Ok(info) => trace!(image, "image pull update: {:?}", info),
                Err(e) => {
                    // A locally built image cannot be pulled; creation decides.
                    warn!(image, error = %e, "image pull failed");
                    return;
                }
            }
        }
        debug!(image, "image pulled");
    }

    async fn create_named(
        &self,
        name: &str,
        config: Config<String>,
    ) -> RuntimeResult<ContainerHandle> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            ..Default::default()
        };
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(op_err(name))?;
        debug!(container = name, id = %response.id, "container created");

        Ok(ContainerHandle {
            id: response.id,
            name: name.to_string(),
            state: ContainerState::Created,
        })
    }

    async fn start_created(&self, handle: &ContainerHandle) -> RuntimeResult<()> {
        self.docker
            .start_container::<String>(&handle.id, None)
            .await
            .map_err(op_err(&handle.name))?;
        debug!(container = %handle.name, "container started");
        Ok(())
    }

    async fn wait_for_exit(&self, name: &str) -> RuntimeResult<()> {
        let mut wait_stream = self.docker.wait_container::<String>(name, None);
        match wait_stream.next().await {
            Some(Ok(response)) if response.status_code == 0 => Ok(()),
            Some(Ok(response)) => Err(RuntimeError::NonZeroExit {
                name: name.to_string(),
                code: response.status_code,
                message: response
                    .error
                    .and_then(|e| e.message)
                    .unwrap_or_default(),
            }),
            // bollard turns a non-zero exit into this error variant.
            Some(Err(Error::DockerContainerWaitError { error, code })) => {
                Err(RuntimeError::NonZeroExit {
                    name: name.to_string(),
                    code,
                    message: error,
                })
            }
            Some(Err(e)) => Err(RuntimeError::operation(name, e)),
            None => Err(RuntimeError::operation(name, "wait stream ended unexpectedly")),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn get_by_name(&self, name: &str) -> RuntimeResult<Option<ContainerHandle>> {
        match self.docker.inspect_container(name, None).await {
            Ok(response) => Ok(Some(handle_from_inspect(name, response))),
            Err(e) if is_status(&e, 404) => Ok(None),
            Err(e) => Err(RuntimeError::operation(name, e)),
        }
    }

    async fn run(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerHandle> {
        self.pull_image(&spec.image).await;
        let mut handle = self.create_named(&spec.name, container_config(spec)).await?;
        self.start_created(&handle).await?;
        handle.state = ContainerState::Running;
        Ok(handle)
    }

    async fn run_oneshot(&self, spec: &OneShotSpec) -> RuntimeResult<()> {
        oneshot::run_to_completion(self, spec).await
    }

    async fn start(&self, handle: &ContainerHandle) -> RuntimeResult<()> {
        match self.docker.start_container::<String>(&handle.id, None).await {
            // 304: already running.
            Err(e) if !is_status(&e, 304) => Err(map_err(&handle.name, e)),
            _ => Ok(()),
        }
    }

    async fn stop(&self, handle: &ContainerHandle) -> RuntimeResult<()> {
        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };
        match self.docker.stop_container(&handle.id, Some(options)).await {
            // 304: already stopped.
            Err(e) if !is_status(&e, 304) => Err(map_err(&handle.name, e)),
            _ => Ok(()),
        }
    }

    async fn restart(&self, handle: &ContainerHandle) -> RuntimeResult<()> {
        let options = RestartContainerOptions {
            t: STOP_TIMEOUT_SECS as isize,
        };
        self.docker
            .restart_container(&handle.id, Some(options))
            .await
            .map_err(op_err(&handle.name))
    }

    async fn remove(&self, handle: &ContainerHandle, force: bool) -> RuntimeResult<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_container(&handle.id, Some(options))
            .await
            .map_err(op_err(&handle.name))?;
        debug!(container = %handle.name, force, "container removed");
        Ok(())
    }
}

#[async_trait]
impl OneShotSteps for DockerRuntime {
    async fn lookup(&self, name: &str) -> RuntimeResult<Option<ContainerHandle>> {
        self.get_by_name(name).await
    }

    async fn create(&self, spec: &OneShotSpec) -> RuntimeResult<ContainerHandle> {
        self.pull_image(&spec.image).await;
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            host_config: Some(HostConfig {
                binds: Some(spec.mounts.iter().map(|m| m.bind()).collect()),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.create_named(&spec.name, config).await
    }

    async fn launch(&self, handle: &ContainerHandle) -> RuntimeResult<()> {
        self.start_created(handle).await
    }

    async fn wait_exit(&self, handle: &ContainerHandle) -> RuntimeResult<()> {
        self.wait_for_exit(&handle.name).await
    }

    async fn discard(&self, handle: &ContainerHandle) -> RuntimeResult<()> {
        self.remove(handle, true).await
    }
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();
    for port in &spec.ports {
        let key = port.container_key();
        exposed_ports.insert(key.clone(), HashMap::new());
        port_bindings.insert(
            key,
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(port.host.to_string()),
            }]),
        );
    }

    Config {
        image: Some(spec.image.clone()),
        working_dir: spec.working_dir.clone(),
        cmd: spec.command.clone(),
        entrypoint: spec.entrypoint.clone(),
        env: Some(spec.env_list()),
        labels: Some(
            spec.labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(HostConfig {
            binds: Some(spec.mounts.iter().map(|m| m.bind()).collect()),
            network_mode: spec.network.clone(),
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            restart_policy: Some(DockerRestartPolicy {
                name: Some(restart_policy_name(spec.restart)),
                maximum_retry_count: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn restart_policy_name(policy: RestartPolicy) -> RestartPolicyNameEnum {
    match policy {
        RestartPolicy::No => RestartPolicyNameEnum::NO,
        RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
        RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
    }
}

fn handle_from_inspect(name: &str, response: ContainerInspectResponse) -> ContainerHandle {
    let state = match response.state.and_then(|s| s.status) {
        Some(ContainerStateStatusEnum::CREATED) => ContainerState::Created,
        Some(ContainerStateStatusEnum::RUNNING) => ContainerState::Running,
        Some(ContainerStateStatusEnum::PAUSED) => ContainerState::Paused,
        Some(ContainerStateStatusEnum::RESTARTING) => ContainerState::Restarting,
        Some(ContainerStateStatusEnum::EXITED) | Some(ContainerStateStatusEnum::DEAD) => {
            ContainerState::Exited
        }
        _ => ContainerState::Unknown,
    };
    ContainerHandle {
        id: response.id.unwrap_or_else(|| name.to_string()),
        name: name.to_string(),
        state,
    }
}

fn is_status(error: &Error, code: u16) -> bool {
    matches!(error, Error::DockerResponseServerError { status_code, .. } if *status_code == code)
}

fn map_err(name: &str, error: Error) -> RuntimeError {
    if is_status(&error, 404) {
        RuntimeError::NotFound(name.to_string())
    } else {
        RuntimeError::operation(name, error)
    }
}

fn op_err(name: &str) -> impl Fn(Error) -> RuntimeError + '_ {
    move |e| map_err(name, e)
}
