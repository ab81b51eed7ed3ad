//! Shared types used across Hostgrid crates.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::CatalogError;

/// Label whose value is the public host a container is routed under.
pub const ROUTE_HOST_LABEL: &str = "caddy";

// ── Service type ──────────────────────────────────────────────────

/// Kind of web service a tenant can provision. Selects a catalog template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceType {
    Static,
    #[serde(rename = "PHP")]
    Php,
    Laravel,
    #[serde(rename = "Node.js")]
    NodeJs,
    Python,
}

impl ServiceType {
    pub const ALL: [ServiceType; 5] = [
        ServiceType::Static,
        ServiceType::Php,
        ServiceType::Laravel,
        ServiceType::NodeJs,
        ServiceType::Python,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Static => "Static",
            ServiceType::Php => "PHP",
            ServiceType::Laravel => "Laravel",
            ServiceType::NodeJs => "Node.js",
            ServiceType::Python => "Python",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CatalogError::UnsupportedServiceType(s.to_string()))
    }
}

// ── Container roles ───────────────────────────────────────────────

/// Role a container plays inside a service topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The tenant's application container.
    Primary,
    /// File-manager container giving browser access to the data directory.
    Companion,
    /// Database backing the primary container.
    Database,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Primary, Role::Companion, Role::Database];

    pub fn suffix(&self) -> &'static str {
        match self {
            Role::Primary => "",
            Role::Companion => "-fb",
            Role::Database => "-db",
        }
    }

    /// Deterministic container name: `{username}-{service}{suffix}`.
    pub fn container_name(&self, username: &str, service: &str) -> String {
        format!("{username}-{service}{}", self.suffix())
    }
}

// ── Container spec ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountKind {
    #[default]
    Directory,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MountMode {
    #[default]
    #[serde(rename = "rw")]
    ReadWrite,
    #[serde(rename = "ro")]
    ReadOnly,
}

impl MountMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MountMode::ReadWrite => "rw",
            MountMode::ReadOnly => "ro",
        }
    }
}

/// Bind mount from a host path into the container.
///
/// Sources starting with `./` are relative to the service directory and
/// get anchored by [`ContainerSpec::anchored_at`] before reaching a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub kind: MountKind,
    #[serde(default)]
    pub mode: MountMode,
}

impl Mount {
    pub fn dir(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            kind: MountKind::Directory,
            mode: MountMode::ReadWrite,
        }
    }

    pub fn file(source: &str, target: &str) -> Self {
        Self {
            kind: MountKind::File,
            ..Self::dir(source, target)
        }
    }

    /// Relative source path (without the `./` prefix), if any.
    pub fn relative_source(&self) -> Option<&str> {
        self.source.strip_prefix("./")
    }

    /// Docker-style bind string: `source:target:mode`.
    pub fn bind(&self) -> String {
        format!("{}:{}:{}", self.source, self.target, self.mode.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

/// Published port: host port → container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortMapping {
    /// Container-side key in the `80/tcp` form.
    pub fn container_key(&self) -> String {
        let proto = match self.protocol {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        };
        format!("{}/{proto}", self.container)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    #[default]
    Always,
    UnlessStopped,
    OnFailure,
}

/// Fully rendered description of one container to run.
///
/// Field order matters for the TOML declaration: plain values first,
/// then arrays of tables and maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub role: Role,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default)]
    pub restart: RestartPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Names of containers that must be started before this one.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ContainerSpec {
    /// Copy of this spec with relative mount sources anchored at `base`.
    pub fn anchored_at(&self, base: &Path) -> ContainerSpec {
        let mut spec = self.clone();
        for mount in &mut spec.mounts {
            if let Some(rel) = mount.relative_source() {
                mount.source = base.join(rel).display().to_string();
            }
        }
        spec
    }

    /// Environment in `KEY=value` form.
    pub fn env_list(&self) -> Vec<String> {
        self.environment
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect()
    }
}

// ── Topology ──────────────────────────────────────────────────────

/// Concrete container set for one (tenant, service) pair.
///
/// `containers` is in start order: dependencies come first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub username: String,
    pub service: String,
    pub service_type: ServiceType,
    pub network: String,
    pub containers: Vec<ContainerSpec>,
}

/// Public URLs of a provisioned service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUrls {
    pub website: Option<String>,
    pub file_manager: Option<String>,
}

impl Topology {
    pub fn container_names(&self) -> Vec<&str> {
        self.containers.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn container(&self, role: Role) -> Option<&ContainerSpec> {
        self.containers.iter().find(|c| c.role == role)
    }

    pub fn container_mut(&mut self, role: Role) -> Option<&mut ContainerSpec> {
        self.containers.iter_mut().find(|c| c.role == role)
    }

    /// Relative directory sources referenced by any mount, deduplicated.
    pub fn directory_sources(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for mount in self.containers.iter().flat_map(|c| &c.mounts) {
            if mount.kind != MountKind::Directory {
                continue;
            }
            if let Some(rel) = mount.relative_source() {
                let path = PathBuf::from(rel);
                if !dirs.contains(&path) {
                    dirs.push(path);
                }
            }
        }
        dirs
    }

    /// URLs derived from the route-host label of the primary and companion containers.
    pub fn urls(&self, scheme: &str) -> ServiceUrls {
        let url_for = |role| {
            self.container(role)
                .and_then(|c| c.labels.get(ROUTE_HOST_LABEL))
                .map(|host| format!("{scheme}://{host}/{}", self.service))
        };
        ServiceUrls {
            website: url_for(Role::Primary),
            file_manager: url_for(Role::Companion),
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

// ── Status and actions ────────────────────────────────────────────

/// Last known aggregate status of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Active,
    Stopped,
    Deleted,
    Error,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Active => "active",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Deleted => "deleted",
            ServiceStatus::Error => "error",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid action: {0}")]
pub struct InvalidAction(pub String);

/// Control action applied to every container of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Delete,
}

impl ServiceAction {
    /// Name used on the public control endpoint.
    pub fn wire_name(&self) -> &'static str {
        match self {
            ServiceAction::Start => "encender",
            ServiceAction::Stop => "apagar",
            ServiceAction::Restart => "reiniciar",
            ServiceAction::Delete => "eliminar",
        }
    }

    /// Status recorded once the action has been applied.
    pub fn resulting_status(&self) -> ServiceStatus {
        match self {
            ServiceAction::Start | ServiceAction::Restart => ServiceStatus::Active,
            ServiceAction::Stop => ServiceStatus::Stopped,
            ServiceAction::Delete => ServiceStatus::Deleted,
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for ServiceAction {
    type Err = InvalidAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "encender" | "start" => Ok(ServiceAction::Start),
            "apagar" | "stop" | "shutdown" => Ok(ServiceAction::Stop),
            "reiniciar" | "restart" => Ok(ServiceAction::Restart),
            "eliminar" | "delete" => Ok(ServiceAction::Delete),
            _ => Err(InvalidAction(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_type_parses_display_names() {
        assert_eq!("Node.js".parse::<ServiceType>().unwrap(), ServiceType::NodeJs);
        assert_eq!("php".parse::<ServiceType>().unwrap(), ServiceType::Php);
        assert!(matches!(
            "Ruby".parse::<ServiceType>(),
            Err(CatalogError::UnsupportedServiceType(_))
        ));
    }

    #[test]
    fn container_names_follow_role_suffix() {
        assert_eq!(Role::Primary.container_name("alice", "blog"), "alice-blog");
        assert_eq!(Role::Companion.container_name("alice", "blog"), "alice-blog-fb");
        assert_eq!(Role::Database.container_name("alice", "blog"), "alice-blog-db");
    }

    #[test]
    fn actions_accept_wire_and_english_names() {
        assert_eq!("apagar".parse::<ServiceAction>().unwrap(), ServiceAction::Stop);
        assert_eq!("Restart".parse::<ServiceAction>().unwrap(), ServiceAction::Restart);
        assert_eq!(
            "explode".parse::<ServiceAction>(),
            Err(InvalidAction("explode".to_string()))
        );
    }

    #[test]
    fn action_status_mapping() {
        assert_eq!(ServiceAction::Start.resulting_status(), ServiceStatus::Active);
        assert_eq!(ServiceAction::Restart.resulting_status(), ServiceStatus::Active);
        assert_eq!(ServiceAction::Stop.resulting_status(), ServiceStatus::Stopped);
        assert_eq!(ServiceAction::Delete.resulting_status(), ServiceStatus::Deleted);
    }

    #[test]
    fn anchored_spec_only_rewrites_relative_sources() {
        let spec = ContainerSpec {
            name: "alice-blog".to_string(),
            role: Role::Primary,
            image: "httpd:alpine".to_string(),
            working_dir: None,
            command: None,
            entrypoint: None,
            restart: RestartPolicy::Always,
            network: None,
            depends_on: vec![],
            mounts: vec![
                Mount::dir("./data", "/usr/local/apache2/htdocs"),
                Mount::dir("/etc/ssl", "/etc/ssl"),
            ],
            ports: vec![],
            environment: BTreeMap::new(),
            labels: BTreeMap::new(),
        };

        let anchored = spec.anchored_at(Path::new("/srv/users/alice/blog"));
        assert_eq!(anchored.mounts[0].source, "/srv/users/alice/blog/data");
        assert_eq!(anchored.mounts[1].source, "/etc/ssl");
        assert_eq!(anchored.mounts[0].bind(), "/srv/users/alice/blog/data:/usr/local/apache2/htdocs:rw");
    }

    #[test]
    fn port_container_key() {
        let port = PortMapping { host: 8080, container: 80, protocol: Protocol::Tcp };
        assert_eq!(port.container_key(), "80/tcp");
    }
}
