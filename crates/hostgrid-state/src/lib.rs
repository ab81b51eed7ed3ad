//! hostgrid-state: embedded record store for Hostgrid.
//!
//! Backed by [redb](https://docs.rs/redb). Holds two kinds of records:
//! tenants (id → username) and services (which template a tenant's
//! service was provisioned from, plus its last aggregate status).
//!
//! Values are JSON-serialized into `&[u8]` columns. Service keys are
//! `{tenant_id}/{service_name}`, so a prefix scan lists one tenant's
//! services.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
