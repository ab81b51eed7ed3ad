//! Template catalog: service type → parameterized container topology.
//!
//! Templates are plain data. Placeholders `{username}`, `{webname}` and
//! `{domain}` are left untouched here and substituted by
//! [`Renderer`](crate::render::Renderer).

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{DEFAULT_COMPANION_IMAGE, DEFAULT_NETWORK};
use crate::types::{Mount, PortMapping, RestartPolicy, Role, ServiceType, ROUTE_HOST_LABEL};

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unsupported service type: {0}")]
    UnsupportedServiceType(String),

    #[error("invalid template for {service_type}: {reason}")]
    InvalidTemplate {
        service_type: ServiceType,
        reason: String,
    },

    #[error("failed to load template {path:?}: {reason}")]
    Load { path: PathBuf, reason: String },
}

/// Extra bootstrap a template needs before its containers can start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupScript {
    /// `scripts/laravel_startup.sh` plus derived environment for the primary container.
    Laravel,
}

/// Prototype of one container inside a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerTemplate {
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
    #[serde(default)]
    pub depends_on: Vec<Role>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ContainerTemplate {
    fn new(role: Role, image: &str) -> Self {
        Self {
            role,
            image: image.to_string(),
            working_dir: None,
            command: None,
            entrypoint: None,
            restart: RestartPolicy::Always,
            depends_on: vec![],
            mounts: vec![],
            ports: vec![],
            environment: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    fn working_dir(mut self, dir: &str) -> Self {
        self.working_dir = Some(dir.to_string());
        self
    }

    fn command(mut self, args: &[&str]) -> Self {
        self.command = Some(args.iter().map(|a| a.to_string()).collect());
        self
    }

    fn mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    fn env(mut self, key: &str, value: &str) -> Self {
        self.environment.insert(key.to_string(), value.to_string());
        self
    }

    fn depends_on(mut self, role: Role) -> Self {
        self.depends_on.push(role);
        self
    }

    /// Reverse-proxy labels routing `/{webname}/*` on `host` to `upstream`.
    fn routed(mut self, host: &str, upstream: &str) -> Self {
        let labels = [
            (ROUTE_HOST_LABEL.to_string(), host.to_string()),
            (format!("{ROUTE_HOST_LABEL}.01_redir"), "/{webname} /{webname}/ 308".to_string()),
            (format!("{ROUTE_HOST_LABEL}.02_handle_path"), "/{webname}/*".to_string()),
            (format!("{ROUTE_HOST_LABEL}.02_handle_path.reverse_proxy"), upstream.to_string()),
        ];
        self.labels.extend(labels);
        self
    }
}

/// Parameterized multi-container topology for one service type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub service_type: ServiceType,
    /// Pre-existing external network every container joins.
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_script: Option<StartupScript>,
    pub containers: Vec<ContainerTemplate>,
}

impl Template {
    pub fn container(&self, role: Role) -> Option<&ContainerTemplate> {
        self.containers.iter().find(|c| c.role == role)
    }

    /// Check the structural invariants every template must satisfy.
    pub fn validate(&self) -> CatalogResult<()> {
        let invalid = |reason: String| CatalogError::InvalidTemplate {
            service_type: self.service_type,
            reason,
        };
        let count = |role: Role| self.containers.iter().filter(|c| c.role == role).count();

        for role in [Role::Primary, Role::Companion] {
            if count(role) != 1 {
                return Err(invalid(format!("expected exactly one {role:?} container")));
            }
        }
        let databases = count(Role::Database);
        if databases > 1 {
            return Err(invalid("more than one database container".to_string()));
        }
        if self.service_type == ServiceType::Laravel && databases != 1 {
            return Err(invalid("Laravel templates need a database container".to_string()));
        }

        let roles: HashSet<Role> = self.containers.iter().map(|c| c.role).collect();
        for c in &self.containers {
            if let Some(dep) = c.depends_on.iter().find(|d| !roles.contains(d)) {
                return Err(invalid(format!("{:?} depends on missing {dep:?}", c.role)));
            }
        }

        if let Some(db) = self.container(Role::Database) {
            if !db.depends_on.is_empty() {
                return Err(invalid("database container must not depend on anything".to_string()));
            }
            let primary_waits = self
                .container(Role::Primary)
                .is_some_and(|p| p.depends_on.contains(&Role::Database));
            if !primary_waits {
                return Err(invalid("primary container must depend on the database".to_string()));
            }
        }

        // Three roles at most, so walking each chain three steps finds any cycle.
        for c in &self.containers {
            let mut frontier = c.depends_on.clone();
            for _ in 0..self.containers.len() {
                if frontier.contains(&c.role) {
                    return Err(invalid(format!("dependency cycle through {:?}", c.role)));
                }
                frontier = frontier
                    .iter()
                    .filter_map(|r| self.container(*r))
                    .flat_map(|t| t.depends_on.iter().copied())
                    .collect();
            }
        }

        Ok(())
    }
}

/// Process-wide, read-only mapping of service type to template.
#[derive(Debug, Clone)]
pub struct Catalog {
    templates: BTreeMap<ServiceType, Template>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin(DEFAULT_NETWORK, DEFAULT_COMPANION_IMAGE)
    }
}

impl Catalog {
    /// Built-in templates for every [`ServiceType`].
    pub fn builtin(network: &str, companion_image: &str) -> Self {
        let web = |service_type, primary: ContainerTemplate| Template {
            service_type,
            network: network.to_string(),
            startup_script: None,
            containers: vec![primary, companion(companion_image)],
        };

        let static_site = web(
            ServiceType::Static,
            primary("httpd:alpine", 80).mount(Mount::dir("./data", "/usr/local/apache2/htdocs")),
        );
        let php = web(
            ServiceType::Php,
            primary("php:8.2-apache", 80).mount(Mount::dir("./data", "/var/www/html")),
        );
        let node = web(
            ServiceType::NodeJs,
            primary("node:18-alpine", 3000)
                .working_dir("/app")
                .mount(Mount::dir("./data", "/app"))
                .command(&["sh", "-c", "npm install && npm start"]),
        );
        let python = web(
            ServiceType::Python,
            primary("python:3.10-slim", 8000)
                .working_dir("/app")
                .mount(Mount::dir("./data", "/app"))
                .command(&["sh", "-c", "pip install -r requirements.txt && python main.py"]),
        );

        let laravel = Template {
            service_type: ServiceType::Laravel,
            network: network.to_string(),
            startup_script: Some(StartupScript::Laravel),
            containers: vec![
                primary("php:8.2-apache", 80)
                    .mount(Mount::dir("./data", "/var/www/html/{webname}"))
                    .mount(Mount::dir("./scripts", "/scripts"))
                    .env("APACHE_DOCUMENT_ROOT", "/var/www/html/{webname}/public")
                    .env("APP_ROOT", "/var/www/html/{webname}")
                    .env("DB_HOST", "{username}-{webname}-db")
                    .env("DB_DATABASE", "laravel")
                    .env("DB_USERNAME", "laravel_user")
                    .env("DB_PASSWORD", "laravel_password")
                    .env("WEB_SUBPATH", "/{webname}")
                    .env("BASE_URL", "https://{username}.{domain}/{webname}")
                    .depends_on(Role::Database)
                    .command(&["/scripts/laravel_startup.sh"]),
                ContainerTemplate::new(Role::Database, "mysql:8.0")
                    .mount(Mount::dir("./db_data", "/var/lib/mysql"))
                    .env("MYSQL_DATABASE", "laravel")
                    .env("MYSQL_ROOT_PASSWORD", "laravelpassword")
                    .env("MYSQL_USER", "laravel_user")
                    .env("MYSQL_PASSWORD", "laravel_password"),
                companion(companion_image),
            ],
        };

        let templates = [static_site, php, laravel, node, python]
            .into_iter()
            .map(|t| (t.service_type, t))
            .collect();
        Self { templates }
    }

    /// Look up the template for a service type.
    pub fn lookup(&self, service_type: ServiceType) -> CatalogResult<&Template> {
        self.templates
            .get(&service_type)
            .ok_or_else(|| CatalogError::UnsupportedServiceType(service_type.to_string()))
    }

    /// Look up a template by its display name (`"Node.js"`, `"Static"`, ...).
    pub fn lookup_name(&self, name: &str) -> CatalogResult<&Template> {
        self.lookup(name.parse()?)
    }

    pub fn service_types(&self) -> impl Iterator<Item = ServiceType> + '_ {
        self.templates.keys().copied()
    }

    /// Insert or replace a template after validating it.
    pub fn insert(&mut self, template: Template) -> CatalogResult<()> {
        template.validate()?;
        debug!(service_type = %template.service_type, "template registered");
        self.templates.insert(template.service_type, template);
        Ok(())
    }

    /// Replace templates with every `*.toml` template found in `dir`.
    ///
    /// Returns the number of templates loaded.
    pub fn load_overrides(&mut self, dir: &Path) -> CatalogResult<usize> {
        let load_err = |path: &Path, reason: String| CatalogError::Load {
            path: path.to_path_buf(),
            reason,
        };
        let entries = std::fs::read_dir(dir).map_err(|e| load_err(dir, e.to_string()))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        for path in &paths {
            let content = std::fs::read_to_string(path).map_err(|e| load_err(path, e.to_string()))?;
            let template: Template =
                toml::from_str(&content).map_err(|e| load_err(path, e.to_string()))?;
            self.insert(template)?;
        }

        info!(?dir, count = paths.len(), "template overrides loaded");
        Ok(paths.len())
    }
}

fn primary(image: &str, port: u16) -> ContainerTemplate {
    ContainerTemplate::new(Role::Primary, image)
        .routed("{username}.{domain}", &format!("{{username}}-{{webname}}:{port}"))
}

fn companion(image: &str) -> ContainerTemplate {
    ContainerTemplate::new(Role::Companion, image)
        .mount(Mount::file("./filebrowser_data/filebrowser.db", "/database.db"))
        .mount(Mount::dir("./data", "/srv"))
        .command(&["--database", "/database.db", "--baseurl", "/{webname}", "--root", "/srv"])
        .routed("fb-{username}.{domain}", "{username}-{webname}-fb:80")
}
