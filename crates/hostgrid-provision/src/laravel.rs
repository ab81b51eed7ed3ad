//! Laravel project inspection and startup script generation.
//!
//! The primary container of a Laravel service runs
//! `scripts/laravel_startup.sh`, generated from what the uploaded project
//! contains: a Node build step only when `package.json` asks for one, and
//! database settings taken from the project's `.env` when present.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use regex::Regex;
use semver::VersionReq;
use tracing::{debug, info};

use crate::layout::ServiceLayout;

pub const STARTUP_SCRIPT: &str = "laravel_startup.sh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub connection: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            connection: "mysql".to_string(),
            database: "laravel".to_string(),
            username: "laravel_user".to_string(),
            password: "laravel_password".to_string(),
        }
    }
}

impl DatabaseSettings {
    /// Read `DB_*` keys from dotenv text, keeping defaults for missing keys.
    pub fn from_dotenv(text: &str) -> Result<Self, regex::Error> {
        let setting_re = Regex::new(
            r"(?m)^\s*(DB_CONNECTION|DB_DATABASE|DB_USERNAME|DB_PASSWORD)\s*=\s*(.*?)\s*$",
        )?;
        let mut settings = Self::default();
        for caps in setting_re.captures_iter(text) {
            let value = unquote(&caps[2]).to_string();
            match &caps[1] {
                "DB_CONNECTION" => settings.connection = value,
                "DB_DATABASE" => settings.database = value,
                "DB_USERNAME" => settings.username = value,
                "DB_PASSWORD" => settings.password = value,
                _ => {}
            }
        }
        Ok(settings)
    }
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .iter()
        .find_map(|q| value.strip_prefix(*q).and_then(|v| v.strip_suffix(*q)))
        .unwrap_or(value)
}

/// What an uploaded Laravel project needs at startup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaravelProject {
    /// `laravel/framework` requirement from `composer.json`.
    pub framework: Option<VersionReq>,
    pub needs_npm: bool,
    pub needs_build: bool,
    pub database: DatabaseSettings,
}

impl LaravelProject {
    pub fn inspect(project: &Path) -> Self {
        let framework = read_json(&project.join("composer.json")).and_then(|composer| {
            composer["require"]["laravel/framework"]
                .as_str()
                .and_then(|req| VersionReq::parse(req).ok())
        });

        let package = read_json(&project.join("package.json"));
        let needs_npm = package.is_some();
        let needs_build = package
            .as_ref()
            .is_some_and(|p| p["scripts"]["build"].is_string());

        let database = [".env", ".env.example"]
            .iter()
            .find_map(|name| fs::read_to_string(project.join(name)).ok())
            .and_then(|text| DatabaseSettings::from_dotenv(&text).ok())
            .unwrap_or_default();

        let project = Self {
            framework,
            needs_npm,
            needs_build,
            database,
        };
        debug!(?project, "laravel project inspected");
        project
    }

    /// Environment for the primary container.
    pub fn environment(
        &self,
        username: &str,
        service: &str,
        app_url: &str,
    ) -> BTreeMap<String, String> {
        let db = &self.database;
        [
            ("APP_URL", app_url.to_string()),
            ("ASSET_URL", app_url.to_string()),
            ("VITE_ASSET_URL", format!("/{service}")),
            ("DB_CONNECTION", db.connection.clone()),
            ("DB_HOST", format!("{username}-{service}-db")),
            ("DB_DATABASE", db.database.clone()),
            ("DB_USERNAME", db.username.clone()),
            ("DB_PASSWORD", db.password.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    /// Environment for the database container, matching [`Self::environment`].
    pub fn database_environment(&self) -> BTreeMap<String, String> {
        let db = &self.database;
        [
            ("MYSQL_DATABASE", db.database.clone()),
            ("MYSQL_USER", db.username.clone()),
            ("MYSQL_PASSWORD", db.password.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    pub fn startup_script(&self) -> String {
        let mut script = String::from(SCRIPT_PREAMBLE);
        script.push_str(SCRIPT_COMPOSER);
        if self.needs_npm {
            script.push_str(SCRIPT_NPM_INSTALL);
            if self.needs_build {
                script.push_str(SCRIPT_NPM_BUILD);
            }
        }
        script.push_str(SCRIPT_FINISH);
        script
    }
}

fn read_json(path: &Path) -> Option<serde_json::Value> {
    let text = fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

/// Inspect `data/`, write `scripts/laravel_startup.sh` (mode 0755) and
/// return the project details for the caller to merge into the topology.
pub fn bootstrap(layout: &ServiceLayout) -> io::Result<LaravelProject> {
    let project = LaravelProject::inspect(&layout.data_dir());
    let scripts = layout.scripts_dir();
    fs::create_dir_all(&scripts)?;

    let path = scripts.join(STARTUP_SCRIPT);
    fs::write(&path, project.startup_script())?;
    make_executable(&path)?;

    info!(
        ?path,
        framework = ?project.framework.as_ref().map(ToString::to_string),
        npm = project.needs_npm,
        build = project.needs_build,
        "laravel startup script written"
    );
    Ok(project)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

const SCRIPT_PREAMBLE: &str = r#"#!/bin/bash
set -e

apt-get update -qq
apt-get install -y -qq libzip-dev zip curl git unzip > /dev/null
a2enmod rewrite
echo "ServerName ${HOSTNAME}" >> /etc/apache2/apache2.conf
docker-php-ext-install pdo_mysql zip > /dev/null
apt-get clean && rm -rf /var/lib/apt/lists/*

cat >/etc/apache2/sites-available/000-default.conf <<VHOST
<VirtualHost *:80>
  DocumentRoot ${APACHE_DOCUMENT_ROOT}

  <Directory ${APACHE_DOCUMENT_ROOT}>
      AllowOverride All
      Require all granted
      RewriteEngine On
      RewriteCond %{REQUEST_FILENAME} !-d
      RewriteCond %{REQUEST_FILENAME} !-f
      RewriteRule ^ index.php [L]
  </Directory>

  ErrorLog /var/log/apache2/error.log
  CustomLog /var/log/apache2/access.log combined
</VirtualHost>
VHOST

curl -sS https://getcomposer.org/installer | php -- --install-dir=/usr/local/bin --filename=composer

cd "${APP_ROOT}"

if [ ! -f .env ]; then
    if [ -f .env.example ]; then
        cp .env.example .env
    else
        touch .env
    fi
fi

set_env() {
    if grep -q "^$1=" .env; then
        sed -i "s#^$1=.*#$1=$2#" .env
    else
        echo "$1=$2" >> .env
    fi
}

for key in APP_URL ASSET_URL VITE_ASSET_URL DB_CONNECTION DB_HOST DB_DATABASE DB_USERNAME DB_PASSWORD; do
    set_env "$key" "${!key}"
done
"#;

const SCRIPT_COMPOSER: &str = r#"
if [ -f composer.json ]; then
    composer install --prefer-dist --no-interaction --optimize-autoloader
fi

if [ ! -f vendor/autoload.php ]; then
    echo "vendor/autoload.php missing, scaffolding a fresh Laravel project"
    mkdir -p /tmp/project_backup
    find . -maxdepth 1 -not -name "." -not -name "public" | xargs -I{} mv {} /tmp/project_backup/
    composer create-project laravel/laravel . --prefer-dist
    for dir in resources public database; do
        if [ -d "/tmp/project_backup/$dir" ]; then
            cp -r "/tmp/project_backup/$dir/." "$dir/" 2>/dev/null || true
        fi
    done
fi

php artisan key:generate --force
php artisan migrate --force
php artisan config:clear
php artisan config:cache
"#;

const SCRIPT_NPM_INSTALL: &str = r#"
apt-get update -qq
apt-get install -y -qq nodejs npm > /dev/null
npm install --loglevel error
"#;

const SCRIPT_NPM_BUILD: &str = r#"npm run build --silent
"#;

const SCRIPT_FINISH: &str = r#"
chown -R www-data:www-data storage bootstrap/cache
chmod -R 775 storage bootstrap/cache

exec apache2-foreground
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn project_dir() -> (tempfile::TempDir, ServiceLayout) {
        let tmp = tempfile::tempdir().unwrap();
        let layout = ServiceLayout::new(tmp.path(), "carol", "crm");
        layout.ensure().unwrap();
        (tmp, layout)
    }

    #[test]
    fn empty_project_uses_defaults() {
        let (_tmp, layout) = project_dir();
        let project = LaravelProject::inspect(&layout.data_dir());
        assert_eq!(project.database, DatabaseSettings::default());
        assert!(project.framework.is_none());
        assert!(!project.needs_npm);

        let script = project.startup_script();
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("php artisan migrate --force"));
        assert!(!script.contains("npm install"));
        assert!(script.trim_end().ends_with("exec apache2-foreground"));
    }

    #[test]
    fn detects_framework_and_node_build() {
        let (_tmp, layout) = project_dir();
        let data = layout.data_dir();
        fs::write(
            data.join("composer.json"),
            r#"{"require": {"php": "^8.1", "laravel/framework": "^10.10"}}"#,
        )
        .unwrap();
        fs::write(
            data.join("package.json"),
            r#"{"scripts": {"dev": "vite", "build": "vite build"}}"#,
        )
        .unwrap();

        let project = LaravelProject::inspect(&data);
        let req = project.framework.unwrap();
        assert!(req.matches(&semver::Version::new(10, 48, 0)));
        assert!(!req.matches(&semver::Version::new(11, 0, 0)));
        assert!(project.needs_npm && project.needs_build);
    }

    #[test]
    fn package_without_build_script() {
        let (_tmp, layout) = project_dir();
        fs::write(layout.data_dir().join("package.json"), r#"{"scripts": {"dev": "vite"}}"#).unwrap();
        let project = LaravelProject::inspect(&layout.data_dir());
        assert!(project.needs_npm);
        assert!(!project.needs_build);
        let script = project.startup_script();
        assert!(script.contains("npm install"));
        assert!(!script.contains("npm run build"));
    }

    #[test]
    fn dotenv_overrides_example() {
        let (_tmp, layout) = project_dir();
        let data = layout.data_dir();
        fs::write(data.join(".env.example"), "DB_DATABASE=from_example\n").unwrap();
        fs::write(
            data.join(".env"),
            "# comment\nDB_CONNECTION=mysql\nDB_DATABASE=\"crm_db\"\nDB_USERNAME=crm\nDB_PASSWORD='p=w'\n",
        )
        .unwrap();

        let db = LaravelProject::inspect(&data).database;
        assert_eq!(db.database, "crm_db");
        assert_eq!(db.username, "crm");
        assert_eq!(db.password, "p=w");
    }

    #[test]
    fn environment_points_at_database_container() {
        let project = LaravelProject::default();
        let env = project.environment("carol", "crm", "https://carol.example.com/crm");
        assert_eq!(env["DB_HOST"], "carol-crm-db");
        assert_eq!(env["VITE_ASSET_URL"], "/crm");
        assert_eq!(env["APP_URL"], "https://carol.example.com/crm");
        assert_eq!(project.database_environment()["MYSQL_USER"], "laravel_user");
    }

    #[cfg(unix)]
    #[test]
    fn bootstrap_writes_executable_script() {
        use std::os::unix::fs::PermissionsExt;

        let (_tmp, layout) = project_dir();
        bootstrap(&layout).unwrap();
        let path = layout.scripts_dir().join(STARTUP_SCRIPT);
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
