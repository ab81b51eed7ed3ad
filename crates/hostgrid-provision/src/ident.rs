//! Tenant and service identifier rules.
//!
//! Both identifiers become path components under the tenant root and parts
//! of container names. Usernames never contain `-`, the separator between
//! username and service in container names. Service names never end in a
//! suffix the provisioner appends to them, so one service's primary
//! container can never take the name of another service's companion,
//! database or companion init step.

use hostgrid_core::Role;

use crate::companion::{INIT_STEPS, step_container_name};
use crate::error::{ProvisionError, ProvisionResult};

const MAX_LEN: usize = 63;

pub fn validate_username(username: &str) -> ProvisionResult<()> {
    check("username", username, |c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn validate_service_name(service: &str) -> ProvisionResult<()> {
    check("service name", service, |c| {
        c.is_ascii_alphanumeric() || c == '_' || c == '-'
    })?;
    if service.starts_with('-') {
        return Err(invalid("service name", service, "must not start with '-'"));
    }
    if reserved_suffixes().any(|suffix| service.ends_with(&suffix)) {
        return Err(invalid(
            "service name",
            service,
            "ends with a reserved container suffix",
        ));
    }
    Ok(())
}

/// Everything appended to `{username}-{service}` to form a container name.
fn reserved_suffixes() -> impl Iterator<Item = String> {
    let roles = Role::ALL
        .iter()
        .map(|role| role.suffix().to_string())
        .filter(|suffix| !suffix.is_empty());
    let steps = INIT_STEPS
        .iter()
        .map(|step| format!("{}-{step}", Role::Companion.suffix()));
    roles.chain(steps)
}

fn check(kind: &'static str, value: &str, allowed: impl Fn(char) -> bool) -> ProvisionResult<()> {
    if value.is_empty() {
        return Err(invalid(kind, value, "must not be empty"));
    }
    if value.len() > MAX_LEN {
        return Err(invalid(kind, value, "longer than 63 characters"));
    }
    if !value.chars().all(allowed) {
        return Err(invalid(kind, value, "contains a disallowed character"));
    }
    Ok(())
}

fn invalid(kind: &'static str, value: &str, reason: &'static str) -> ProvisionError {
    ProvisionError::InvalidIdentifier {
        kind,
        value: value.to_string(),
        reason,
    }
}
