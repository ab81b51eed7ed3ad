//! Topology renderer: substitutes tenant and service identifiers into a template.
//!
//! Rendering is pure: no I/O, no validation of the resulting strings. The
//! same (template, username, service) always yields the same [`Topology`],
//! which is what lets control actions re-derive the container names that
//! provisioning created.

use std::collections::{BTreeMap, HashSet};

use crate::catalog::{ContainerTemplate, Template};
use crate::types::{ContainerSpec, Mount, Topology};

/// Renders catalog templates into concrete topologies.
#[derive(Debug, Clone)]
pub struct Renderer {
    domain: String,
}

impl Renderer {
    pub fn new(domain: impl Into<String>) -> Self {
        Self { domain: domain.into() }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Render `template` for `username`/`service`, ordering containers so
    /// that every dependency precedes its dependents.
    pub fn render(&self, template: &Template, username: &str, service: &str) -> Topology {
        let vars = [
            ("username", username),
            ("webname", service),
            ("domain", self.domain.as_str()),
        ];
        let network = substitute(&template.network, &vars);

        let containers = dependency_order(&template.containers)
            .into_iter()
            .map(|t| render_container(t, &vars, username, service, &network))
            .collect();

        Topology {
            username: username.to_string(),
            service: service.to_string(),
            service_type: template.service_type,
            network,
            containers,
        }
    }
}

fn render_container(
    t: &ContainerTemplate,
    vars: &[(&str, &str)],
    username: &str,
    service: &str,
    network: &str,
) -> ContainerSpec {
    let sub = |s: &str| substitute(s, vars);
    let sub_map = |m: &BTreeMap<String, String>| -> BTreeMap<String, String> {
        m.iter().map(|(k, v)| (sub(k), sub(v))).collect()
    };

    ContainerSpec {
        name: t.role.container_name(username, service),
        role: t.role,
        image: sub(&t.image),
        working_dir: t.working_dir.as_deref().map(sub),
        command: t.command.as_ref().map(|args| args.iter().map(|a| sub(a)).collect()),
        entrypoint: t.entrypoint.as_ref().map(|args| args.iter().map(|a| sub(a)).collect()),
        restart: t.restart,
        network: Some(network.to_string()),
        depends_on: t
            .depends_on
            .iter()
            .map(|role| role.container_name(username, service))
            .collect(),
        mounts: t
            .mounts
            .iter()
            .map(|m| Mount {
                source: sub(&m.source),
                target: sub(&m.target),
                ..m.clone()
            })
            .collect(),
        ports: t.ports.clone(),
        environment: sub_map(&t.environment),
        labels: sub_map(&t.labels),
    }
}

/// Depth-first ordering: dependencies first, otherwise template order.
fn dependency_order(containers: &[ContainerTemplate]) -> Vec<&ContainerTemplate> {
    fn visit<'a>(
        c: &'a ContainerTemplate,
        all: &'a [ContainerTemplate],
        visited: &mut HashSet<usize>,
        sorted: &mut Vec<&'a ContainerTemplate>,
    ) {
        let Some(idx) = all.iter().position(|o| o.role == c.role) else {
            return;
        };
        if !visited.insert(idx) {
            return;
        }
        for dep in &c.depends_on {
            if let Some(d) = all.iter().find(|o| o.role == *dep) {
                visit(d, all, visited, sorted);
            }
        }
        sorted.push(c);
    }

    let mut visited = HashSet::new();
    let mut sorted = Vec::with_capacity(containers.len());
    for c in containers {
        visit(c, containers, &mut visited, &mut sorted);
    }
    sorted
}

/// Single-pass `{name}` substitution. Unknown placeholders are kept verbatim
/// and substituted values are never rescanned.
fn substitute(input: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, close))
        });
        match replaced {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::types::{Role, ServiceType};

    fn renderer() -> Renderer {
        Renderer::new("example.com")
    }

    #[test]
    fn substitute_replaces_known_placeholders_only() {
        let vars = [("username", "alice"), ("webname", "blog")];
        assert_eq!(substitute("{username}-{webname}", &vars), "alice-blog");
        assert_eq!(substitute("${HOME}/{other}", &vars), "${HOME}/{other}");
        assert_eq!(substitute("unclosed {username", &vars), "unclosed {username");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let vars = [("username", "{webname}"), ("webname", "blog")];
        assert_eq!(substitute("{username}", &vars), "{webname}");
    }

    #[test]
    fn static_topology_matches_naming_convention() {
        let catalog = Catalog::default();
        let topology = renderer().render(catalog.lookup(ServiceType::Static).unwrap(), "alice", "blog");

        assert_eq!(topology.container_names(), vec!["alice-blog", "alice-blog-fb"]);
        let primary = topology.container(Role::Primary).unwrap();
        assert_eq!(primary.labels["caddy"], "alice.example.com");
        assert_eq!(primary.labels["caddy.02_handle_path.reverse_proxy"], "alice-blog:80");
        assert_eq!(primary.network.as_deref(), Some("caddy_net"));

        let companion = topology.container(Role::Companion).unwrap();
        assert_eq!(
            companion.command.as_ref().unwrap(),
            &vec!["--database", "/database.db", "--baseurl", "/blog", "--root", "/srv"]
        );
    }

    #[test]
    fn rendering_is_deterministic() {
        let catalog = Catalog::default();
        for service_type in ServiceType::ALL {
            let template = catalog.lookup(service_type).unwrap();
            let a = renderer().render(template, "bob", "shop");
            let b = renderer().render(template, "bob", "shop");
            assert_eq!(a, b);
        }
    }

    #[test]
    fn laravel_database_starts_before_primary() {
        let catalog = Catalog::default();
        let topology = renderer().render(catalog.lookup(ServiceType::Laravel).unwrap(), "carol", "crm");

        assert_eq!(
            topology.container_names(),
            vec!["carol-crm-db", "carol-crm", "carol-crm-fb"]
        );
        let primary = topology.container(Role::Primary).unwrap();
        assert_eq!(primary.depends_on, vec!["carol-crm-db"]);
        assert_eq!(primary.environment["DB_HOST"], "carol-crm-db");
        assert_eq!(primary.environment["BASE_URL"], "https://carol.example.com/crm");
        assert_eq!(primary.mounts[0].target, "/var/www/html/crm");
    }

    #[test]
    fn names_are_injective_for_dash_free_usernames() {
        let catalog = Catalog::default();
        let template = catalog.lookup(ServiceType::Php).unwrap();
        let pairs = [("alice", "blog"), ("alice", "blog-2"), ("bob", "blog"), ("alice_b", "log")];

        for role in [Role::Primary, Role::Companion] {
            let mut seen = HashSet::new();
            for (user, service) in pairs {
                let topo = renderer().render(template, user, service);
                let name = topo.container(role).unwrap().name.clone();
                assert!(seen.insert(name), "collision for {user}/{service}");
            }
        }
    }

    #[test]
    fn urls_follow_route_labels() {
        let catalog = Catalog::default();
        let topology = renderer().render(catalog.lookup(ServiceType::Static).unwrap(), "alice", "blog");
        let urls = topology.urls("https");
        assert_eq!(urls.website.as_deref(), Some("https://alice.example.com/blog"));
        assert_eq!(urls.file_manager.as_deref(), Some("https://fb-alice.example.com/blog"));
    }

    #[test]
    fn topology_declaration_round_trips_through_toml() {
        let catalog = Catalog::default();
        let topology = renderer().render(catalog.lookup(ServiceType::Laravel).unwrap(), "dave", "app");
        let text = topology.to_toml_string().unwrap();
        assert!(text.contains("dave-app-db"));
        assert_eq!(Topology::from_toml_str(&text).unwrap(), topology);
    }

    #[test]
    fn directory_sources_skip_file_mounts() {
        let catalog = Catalog::default();
        let topology = renderer().render(catalog.lookup(ServiceType::Laravel).unwrap(), "dave", "app");
        let dirs = topology.directory_sources();
        assert!(dirs.contains(&"data".into()));
        assert!(dirs.contains(&"db_data".into()));
        assert!(dirs.contains(&"scripts".into()));
        assert!(!dirs.iter().any(|d| d.to_string_lossy().contains("filebrowser.db")));
    }
}
