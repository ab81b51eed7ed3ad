pub mod catalog;
pub mod config;
pub mod render;
pub mod types;

pub use catalog::{Catalog, CatalogError, ContainerTemplate, Template};
pub use config::HostgridConfig;
pub use render::Renderer;
pub use types::*;
