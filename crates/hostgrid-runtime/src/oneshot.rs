//! Run-to-completion sequencing for one-shot containers.
//!
//! A one-shot has a fixed name, so a container left behind by an earlier
//! interrupted run would make every later create fail with a name conflict.
//! The sequence therefore clears a stale container first and removes the
//! one it created on every path after a successful create.

use async_trait::async_trait;
use tracing::warn;

use crate::error::RuntimeResult;
use crate::{ContainerHandle, OneShotSpec};

/// Driver primitives a one-shot run is built from.
#[async_trait]
pub(crate) trait OneShotSteps: Send + Sync {
    async fn lookup(&self, name: &str) -> RuntimeResult<Option<ContainerHandle>>;

    async fn create(&self, spec: &OneShotSpec) -> RuntimeResult<ContainerHandle>;

    async fn launch(&self, handle: &ContainerHandle) -> RuntimeResult<()>;

    /// Block until the container exits; a non-zero status is an error.
    async fn wait_exit(&self, handle: &ContainerHandle) -> RuntimeResult<()>;

    /// Force-remove the container.
    async fn discard(&self, handle: &ContainerHandle) -> RuntimeResult<()>;
}

pub(crate) async fn run_to_completion<S: OneShotSteps>(
    steps: &S,
    spec: &OneShotSpec,
) -> RuntimeResult<()> {
    if let Some(stale) = steps.lookup(&spec.name).await? {
        warn!(container = %spec.name, "removing leftover one-shot container");
        steps.discard(&stale).await?;
    }

    let handle = steps.create(spec).await?;
    let outcome = match steps.launch(&handle).await {
        Ok(()) => steps.wait_exit(&handle).await,
        Err(e) => Err(e),
    };

    if let Err(e) = steps.discard(&handle).await {
        warn!(container = %spec.name, error = %e, "failed to remove one-shot container");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContainerState;
    use crate::error::RuntimeError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        stale: bool,
        fail_create: bool,
        fail_launch: bool,
        exit_code: i64,
        log: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn push(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    fn handle(id: &str, name: &str) -> ContainerHandle {
        ContainerHandle {
            id: id.into(),
            name: name.into(),
            state: ContainerState::Created,
        }
    }

    #[async_trait]
    impl OneShotSteps for Recorder {
        async fn lookup(&self, name: &str) -> RuntimeResult<Option<ContainerHandle>> {
            Ok(self.stale.then(|| handle("old", name)))
        }

        async fn create(&self, spec: &OneShotSpec) -> RuntimeResult<ContainerHandle> {
            self.push("create".into());
            if self.fail_create {
                return Err(RuntimeError::operation(&spec.name, "409 conflict"));
            }
            Ok(handle("new", &spec.name))
        }

        async fn launch(&self, handle: &ContainerHandle) -> RuntimeResult<()> {
            self.push(format!("launch {}", handle.id));
            if self.fail_launch {
                return Err(RuntimeError::operation(&handle.name, "bind source missing"));
            }
            Ok(())
        }

        async fn wait_exit(&self, handle: &ContainerHandle) -> RuntimeResult<()> {
            self.push(format!("wait {}", handle.id));
            match self.exit_code {
                0 => Ok(()),
                code => Err(RuntimeError::NonZeroExit {
                    name: handle.name.clone(),
                    code,
                    message: String::new(),
                }),
            }
        }

        async fn discard(&self, handle: &ContainerHandle) -> RuntimeResult<()> {
            self.push(format!("discard {}", handle.id));
            Ok(())
        }
    }

    fn spec() -> OneShotSpec {
        OneShotSpec {
            name: "alice-blog-fb-init".into(),
            image: "filebrowser/filebrowser".into(),
            command: vec!["config".into(), "init".into()],
            mounts: vec![],
        }
    }

    #[tokio::test]
    async fn successful_run_removes_the_container() {
        let steps = Recorder::default();
        run_to_completion(&steps, &spec()).await.unwrap();
        assert_eq!(steps.log(), ["create", "launch new", "wait new", "discard new"]);
    }

    #[tokio::test]
    async fn failed_launch_still_removes_the_created_container() {
        let steps = Recorder {
            fail_launch: true,
            ..Default::default()
        };
        let err = run_to_completion(&steps, &spec()).await.unwrap_err();
        assert!(err.to_string().contains("bind source missing"));
        assert_eq!(steps.log(), ["create", "launch new", "discard new"]);
    }

    #[tokio::test]
    async fn non_zero_exit_is_returned_after_removal() {
        let steps = Recorder {
            exit_code: 2,
            ..Default::default()
        };
        let err = run_to_completion(&steps, &spec()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::NonZeroExit { code: 2, .. }));
        assert_eq!(steps.log().last().map(String::as_str), Some("discard new"));
    }

    #[tokio::test]
    async fn leftover_container_is_cleared_before_create() {
        let steps = Recorder {
            stale: true,
            ..Default::default()
        };
        run_to_completion(&steps, &spec()).await.unwrap();
        assert_eq!(
            steps.log(),
            ["discard old", "create", "launch new", "wait new", "discard new"]
        );
    }

    #[tokio::test]
    async fn failed_create_removes_nothing() {
        let steps = Recorder {
            fail_create: true,
            ..Default::default()
        };
        assert!(run_to_completion(&steps, &spec()).await.is_err());
        assert_eq!(steps.log(), ["create"]);
    }
}
