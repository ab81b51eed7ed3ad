//! hostgrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_TENANT_ROOT: &str = "/srv/users";
pub const DEFAULT_STATE_DIR: &str = "/var/lib/hostgrid";
pub const DEFAULT_DOMAIN: &str = "example.com";
pub const DEFAULT_NETWORK: &str = "caddy_net";
pub const DEFAULT_SCHEME: &str = "https";
pub const DEFAULT_COMPANION_IMAGE: &str = "filebrowser/filebrowser:latest";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";
pub const DEFAULT_API_PORT: u16 = 8080;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostgridConfig {
    pub paths: Option<PathsConfig>,
    pub routing: Option<RoutingConfig>,
    pub companion: Option<CompanionConfig>,
    pub catalog: Option<CatalogConfig>,
    pub api: Option<ApiConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub tenant_root: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub domain: Option<String>,
    pub network: Option<String>,
    pub scheme: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionConfig {
    pub image: Option<String>,
    pub admin_password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub templates_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: Option<u16>,
}

impl HostgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HostgridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn tenant_root(&self) -> PathBuf {
        self.paths
            .as_ref()
            .and_then(|p| p.tenant_root.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TENANT_ROOT))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.paths
            .as_ref()
            .and_then(|p| p.state_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
    }

    pub fn domain(&self) -> &str {
        self.routing
            .as_ref()
            .and_then(|r| r.domain.as_deref())
            .unwrap_or(DEFAULT_DOMAIN)
    }

    pub fn network(&self) -> &str {
        self.routing
            .as_ref()
            .and_then(|r| r.network.as_deref())
            .unwrap_or(DEFAULT_NETWORK)
    }

    pub fn scheme(&self) -> &str {
        self.routing
            .as_ref()
            .and_then(|r| r.scheme.as_deref())
            .unwrap_or(DEFAULT_SCHEME)
    }

    pub fn companion_image(&self) -> &str {
        self.companion
            .as_ref()
            .and_then(|c| c.image.as_deref())
            .unwrap_or(DEFAULT_COMPANION_IMAGE)
    }

    pub fn admin_password(&self) -> &str {
        self.companion
            .as_ref()
            .and_then(|c| c.admin_password.as_deref())
            .unwrap_or(DEFAULT_ADMIN_PASSWORD)
    }

    pub fn templates_dir(&self) -> Option<&Path> {
        self.catalog.as_ref().and_then(|c| c.templates_dir.as_deref())
    }

    pub fn api_port(&self) -> u16 {
        self.api.as_ref().and_then(|a| a.port).unwrap_or(DEFAULT_API_PORT)
    }
}
