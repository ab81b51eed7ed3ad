//! hostgridd: the Hostgrid daemon.
//!
//! Wires the provisioning subsystems into one process:
//! - Template catalog (built-in plus on-disk overrides)
//! - State store (redb)
//! - Docker runtime driver
//! - Lifecycle orchestrator
//! - REST API
//!
//! # Usage
//!
//! ```text
//! hostgridd --config /etc/hostgrid/hostgrid.toml serve --port 8080
//! hostgridd tenant add 1 alice
//! hostgridd tenant show 1
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hostgrid_api::{ApiState, build_router};
use hostgrid_core::config::{ApiConfig, PathsConfig};
use hostgrid_core::{Catalog, HostgridConfig};
use hostgrid_provision::{Orchestrator, OrchestratorSettings};
use hostgrid_runtime::DockerRuntime;
use hostgrid_state::{StateStore, TenantId};
use tracing::info;

/// Used when `RUST_LOG` is unset. Tracing targets are crate names with `_`.
const DEFAULT_LOG_FILTER: &str = "info,hostgridd=debug,hostgrid_core=debug,hostgrid_state=debug,\
hostgrid_runtime=debug,hostgrid_provision=debug,hostgrid_api=debug";

#[derive(Parser)]
#[command(name = "hostgridd", about = "Hostgrid provisioning daemon")]
struct Cli {
    /// Path to hostgrid.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for persistent state (overrides the config file).
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the REST API server.
    Serve {
        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,
    },

    /// Manage tenants.
    Tenant {
        #[command(subcommand)]
        command: TenantCommand,
    },
}

#[derive(Subcommand)]
enum TenantCommand {
    /// Register a tenant and create its directory.
    Add { id: TenantId, username: String },
    /// Print one tenant as JSON.
    Show { id: TenantId },
    /// Print every tenant as JSON.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
            }),
        )
        .init();

    let cli = Cli::parse();
    let port = match &cli.command {
        Command::Serve { port } => *port,
        Command::Tenant { .. } => None,
    };
    let config = load_config(cli.config.as_deref(), cli.state_dir, port)?;

    match cli.command {
        Command::Serve { .. } => serve(config).await,
        Command::Tenant { command } => tenant(config, command),
    }
}

/// Read the config file (if any) and apply command-line overrides.
fn load_config(
    path: Option<&Path>,
    state_dir: Option<PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<HostgridConfig> {
    let mut config = match path {
        Some(path) => HostgridConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => HostgridConfig::default(),
    };

    if let Some(dir) = state_dir {
        config
            .paths
            .get_or_insert(PathsConfig {
                tenant_root: None,
                state_dir: None,
            })
            .state_dir = Some(dir);
    }
    if let Some(port) = port {
        config.api.get_or_insert(ApiConfig { port: None }).port = Some(port);
    }
    Ok(config)
}

fn build_catalog(config: &HostgridConfig) -> anyhow::Result<Catalog> {
    let mut catalog = Catalog::builtin(config.network(), config.companion_image());
    if let Some(dir) = config.templates_dir() {
        let count = catalog.load_overrides(dir)?;
        info!(?dir, count, "catalog overrides applied");
    }
    Ok(catalog)
}

fn build_orchestrator(config: &HostgridConfig) -> anyhow::Result<Orchestrator> {
    let state_dir = config.state_dir();
    std::fs::create_dir_all(&state_dir)?;
    let db_path = state_dir.join("hostgrid.redb");

    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let catalog = build_catalog(config)?;
    info!(types = catalog.service_types().count(), "template catalog ready");

    let runtime = DockerRuntime::connect()?;
    info!("docker runtime connected");

    Ok(Orchestrator::new(
        Arc::new(runtime),
        state,
        Arc::new(catalog),
        OrchestratorSettings::from_config(config),
    ))
}

async fn serve(config: HostgridConfig) -> anyhow::Result<()> {
    info!("Hostgrid daemon starting");

    let orchestrator = build_orchestrator(&config)?;
    let router = build_router(ApiState {
        orchestrator: Arc::new(orchestrator),
        upload_dir: config.state_dir().join("uploads"),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port()));
    info!(%addr, tenant_root = ?config.tenant_root(), "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("Hostgrid daemon stopped");
    Ok(())
}

fn tenant(config: HostgridConfig, command: TenantCommand) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(&config)?;
    match command {
        TenantCommand::Add { id, username } => {
            let tenant = orchestrator.register_tenant(id, &username)?;
            println!("{}", serde_json::to_string_pretty(&tenant)?);
        }
        TenantCommand::Show { id } => {
            let tenant = orchestrator.tenant(id)?;
            println!("{}", serde_json::to_string_pretty(&tenant)?);
        }
        TenantCommand::List => {
            let tenants = orchestrator.state().list_tenants()?;
            println!("{}", serde_json::to_string_pretty(&tenants)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hostgrid.toml");
        std::fs::write(
            &path,
            "[paths]\ntenant_root = \"/data/users\"\nstate_dir = \"/data/state\"\n[api]\nport = 9000\n",
        )
        .unwrap();

        let config = load_config(Some(&path), None, None).unwrap();
        assert_eq!(config.state_dir(), PathBuf::from("/data/state"));
        assert_eq!(config.api_port(), 9000);

        let config = load_config(Some(&path), Some("/tmp/hg".into()), Some(7000)).unwrap();
        assert_eq!(config.state_dir(), PathBuf::from("/tmp/hg"));
        assert_eq!(config.tenant_root(), PathBuf::from("/data/users"));
        assert_eq!(config.api_port(), 7000);
    }

    #[test]
    fn defaults_without_config_file() {
        let config = load_config(None, None, Some(8181)).unwrap();
        assert_eq!(config.api_port(), 8181);
        assert_eq!(config.domain(), "example.com");
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/hostgrid.toml")), None, None).is_err());
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "hostgridd",
            "--state-dir",
            "/tmp/s",
            "tenant",
            "add",
            "1",
            "alice",
        ])
        .unwrap();
        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/s")));
        assert!(matches!(
            cli.command,
            Command::Tenant {
                command: TenantCommand::Add { id: 1, ref username }
            } if username == "alice"
        ));

        let cli = Cli::try_parse_from(["hostgridd", "serve", "--port", "9090"]).unwrap();
        assert!(matches!(cli.command, Command::Serve { port: Some(9090) }));
    }

    #[test]
    fn default_log_filter_names_every_workspace_crate() {
        let targets: Vec<&str> = DEFAULT_LOG_FILTER
            .split(',')
            .filter_map(|directive| directive.split_once('=').map(|(target, _)| target))
            .collect();
        for krate in [
            "hostgridd",
            "hostgrid_core",
            "hostgrid_state",
            "hostgrid_runtime",
            "hostgrid_provision",
            "hostgrid_api",
        ] {
            assert!(targets.contains(&krate), "{krate} missing from {DEFAULT_LOG_FILTER}");
        }
        assert!(!targets.contains(&"hostgrid"));
        tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).unwrap();
    }

    #[test]
    fn catalog_overrides_are_loaded_from_templates_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let templates = tmp.path().join("templates");
        std::fs::create_dir(&templates).unwrap();
        let config = HostgridConfig {
            catalog: Some(hostgrid_core::config::CatalogConfig {
                templates_dir: Some(templates),
            }),
            ..Default::default()
        };
        let catalog = build_catalog(&config).unwrap();
        assert_eq!(catalog.service_types().count(), 5);
    }
}
