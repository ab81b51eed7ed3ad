//! Persisted record types.

use serde::{Deserialize, Serialize};

use hostgrid_core::{ServiceStatus, ServiceType};

/// External tenant identifier.
pub type TenantId = u64;

/// Service record key, `{tenant_id}/{service_name}`.
pub type ServiceId = String;

/// A tenant owning zero or more services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tenant {
    pub id: TenantId,
    /// Directory name under the tenant root and prefix of every container name.
    pub username: String,
    /// Unix timestamp (seconds) when the tenant was registered.
    pub created_at: u64,
}

/// Which template a service was provisioned from and its last known status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRecord {
    pub tenant_id: TenantId,
    pub service_name: String,
    pub service_type: ServiceType,
    pub status: ServiceStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

impl ServiceRecord {
    /// Build the composite key for the services table.
    pub fn table_key(&self) -> ServiceId {
        service_key(self.tenant_id, &self.service_name)
    }
}

pub fn service_key(tenant_id: TenantId, service_name: &str) -> ServiceId {
    format!("{tenant_id}/{service_name}")
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
