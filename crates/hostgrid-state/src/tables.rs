//! redb table definitions for the Hostgrid state store.

use redb::TableDefinition;

/// Tenants keyed by decimal tenant id.
pub const TENANTS: TableDefinition<&str, &[u8]> = TableDefinition::new("tenants");

/// Service records keyed by `{tenant_id}/{service_name}`.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");
