//! One-time setup of the file-manager companion's database.

use std::path::Path;
use std::sync::Arc;

use hostgrid_core::{Mount, Role};
use hostgrid_runtime::{ContainerRuntime, OneShotSpec, RuntimeError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::layout::COMPANION_DB;

const MOUNT_POINT: &str = "/srv";

/// Init steps in run order. Each runs as `{companion container}-{step}`.
pub const INIT_STEPS: [&str; 3] = ["init", "baseurl", "admin"];

/// Name of the one-shot container running `step` for `owner`/`service`.
pub fn step_container_name(owner: &str, service: &str, step: &str) -> String {
    format!("{}-{step}", Role::Companion.container_name(owner, service))
}

pub type CompanionResult<T> = Result<T, CompanionError>;

#[derive(Debug, Error)]
pub enum CompanionError {
    #[error("companion init step {step} failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: RuntimeError,
    },

    #[error("companion directory {0:?} must be absolute")]
    RelativeDirectory(String),

    #[error("cannot clear {path:?} for the companion database: {source}")]
    StaleDatabasePath {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// What [`CompanionInitializer::initialize`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanionInit {
    Initialized,
    AlreadyInitialized,
}

pub struct CompanionInitializer {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
}

impl CompanionInitializer {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, image: impl Into<String>) -> Self {
        Self {
            runtime,
            image: image.into(),
        }
    }

    /// Initialize the companion database in `dir` unless it already exists.
    ///
    /// Runs three one-shot containers in order: create the database, set the
    /// base URL to `/{service}`, add the `admin` user. A failed step does not
    /// undo the earlier ones, and a later call will see the database file and
    /// skip. An empty directory at the database path counts as missing and
    /// is removed first.
    pub async fn initialize(
        &self,
        owner: &str,
        service: &str,
        dir: &Path,
        admin_password: &str,
    ) -> CompanionResult<CompanionInit> {
        let db_path = dir.join(COMPANION_DB);
        if db_path.is_file() {
            debug!(?dir, "companion database present, skipping init");
            return Ok(CompanionInit::AlreadyInitialized);
        }
        if !dir.is_absolute() {
            return Err(CompanionError::RelativeDirectory(dir.display().to_string()));
        }
        // Docker creates a missing bind source as a directory.
        if db_path.is_dir() {
            warn!(path = ?db_path, "replacing directory left at the companion database path");
            std::fs::remove_dir(&db_path).map_err(|source| CompanionError::StaleDatabasePath {
                path: db_path.display().to_string(),
                source,
            })?;
        }

        let database = format!("{MOUNT_POINT}/{COMPANION_DB}");
        let base_url = format!("/{service}");
        let [init_step, baseurl_step, admin_step] = INIT_STEPS;
        let steps: [(&'static str, Vec<&str>); 3] = [
            (init_step, vec!["config", "init", "--database", database.as_str()]),
            (
                baseurl_step,
                vec![
                    "config",
                    "set",
                    "--baseurl",
                    base_url.as_str(),
                    "--database",
                    database.as_str(),
                ],
            ),
            (
                admin_step,
                vec![
                    "users",
                    "add",
                    "admin",
                    admin_password,
                    "--database",
                    database.as_str(),
                    "--perm.admin",
                ],
            ),
        ];

        let source = dir.display().to_string();
        for (step, args) in steps {
            let spec = OneShotSpec {
                name: step_container_name(owner, service, step),
                image: self.image.clone(),
                command: args.iter().map(|a| a.to_string()).collect(),
                mounts: vec![Mount::dir(&source, MOUNT_POINT)],
            };
            self.runtime
                .run_oneshot(&spec)
                .await
                .map_err(|source| CompanionError::Step { step, source })?;
            debug!(step, container = %spec.name, "companion init step done");
        }

        info!(owner, service, "companion database initialized");
        Ok(CompanionInit::Initialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostgrid_runtime::{InMemoryRuntime, RuntimeCall};

    /// Fake runtime whose `init` step writes the database file, like the
    /// real image does.
    fn runtime_creating_db() -> Arc<InMemoryRuntime> {
        Arc::new(InMemoryRuntime::new().with_oneshot_hook(|spec| {
            if spec.command[..2] == ["config", "init"] {
                let dir = Path::new(&spec.mounts[0].source);
                std::fs::write(dir.join(COMPANION_DB), b"db").map_err(|e| {
                    RuntimeError::operation(&spec.name, e)
                })?;
            }
            Ok(())
        }))
    }

    #[tokio::test]
    async fn second_call_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = runtime_creating_db();
        let init = CompanionInitializer::new(runtime.clone(), "filebrowser/filebrowser");

        let first = init.initialize("alice", "blog", tmp.path(), "pw").await.unwrap();
        assert_eq!(first, CompanionInit::Initialized);
        assert_eq!(
            runtime.calls(),
            vec![
                RuntimeCall::OneShot("alice-blog-fb-init".into()),
                RuntimeCall::OneShot("alice-blog-fb-baseurl".into()),
                RuntimeCall::OneShot("alice-blog-fb-admin".into()),
            ]
        );

        let second = init.initialize("alice", "blog", tmp.path(), "pw").await.unwrap();
        assert_eq!(second, CompanionInit::AlreadyInitialized);
        assert_eq!(runtime.calls().len(), 3);
    }

    #[tokio::test]
    async fn directory_at_database_path_is_not_an_initialized_database() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join(COMPANION_DB)).unwrap();
        let runtime = runtime_creating_db();
        let init = CompanionInitializer::new(runtime.clone(), "filebrowser/filebrowser");

        let result = init.initialize("alice", "blog", tmp.path(), "pw").await.unwrap();
        assert_eq!(result, CompanionInit::Initialized);
        assert_eq!(runtime.calls().len(), 3);
        assert!(tmp.path().join(COMPANION_DB).is_file());
    }

    #[tokio::test]
    async fn non_empty_directory_at_database_path_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join(COMPANION_DB);
        std::fs::create_dir(&db).unwrap();
        std::fs::write(db.join("keep"), b"x").unwrap();
        let runtime = runtime_creating_db();
        let init = CompanionInitializer::new(runtime.clone(), "filebrowser/filebrowser");

        let err = init.initialize("alice", "blog", tmp.path(), "pw").await.unwrap_err();
        assert!(matches!(err, CompanionError::StaleDatabasePath { .. }));
        assert!(runtime.calls().is_empty());
        assert!(db.join("keep").is_file());
    }

    #[tokio::test]
    async fn failed_step_stops_the_sequence() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(InMemoryRuntime::new().with_oneshot_hook(|spec| {
            if spec.command[0] == "users" {
                Err(RuntimeError::NonZeroExit {
                    name: spec.name.clone(),
                    code: 1,
                    message: "user exists".into(),
                })
            } else {
                Ok(())
            }
        }));
        let init = CompanionInitializer::new(runtime.clone(), "filebrowser/filebrowser");

        let err = init.initialize("alice", "blog", tmp.path(), "pw").await.unwrap_err();
        assert!(matches!(err, CompanionError::Step { step: "admin", .. }));
        assert_eq!(runtime.calls().len(), 3);
    }

    #[tokio::test]
    async fn base_url_and_password_reach_the_commands() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(InMemoryRuntime::new().with_oneshot_hook(|spec| {
            assert_eq!(spec.mounts[0].target, "/srv");
            if spec.command[1] == "set" {
                assert!(spec.command.contains(&"/shop".to_string()));
            }
            if spec.command[0] == "users" {
                assert_eq!(spec.command[3], "s3cret");
            }
            Ok(())
        }));
        let init = CompanionInitializer::new(runtime, "filebrowser/filebrowser");
        init.initialize("bob", "shop", tmp.path(), "s3cret").await.unwrap();
    }
}
