//! Package catalog: manifest model, version ordering, loading, caching

pub mod cache;
pub mod loader;
pub mod manifest;
pub mod source;
pub mod version;

pub use cache::{CatalogCache, CatalogSnapshot, CatalogSource};
pub use loader::load_catalog;
pub use manifest::{InstallerInfo, ManifestRecord};
pub use source::RepoCatalogSource;
