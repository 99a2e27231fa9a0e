pub mod alias;
pub mod metrics_defs;
pub mod reloader;
pub mod source;
pub mod store;
pub mod types;

#[cfg(test)]
pub mod testutils;

pub use alias::{AliasResolver, ResolveError};
pub use reloader::{AliasCatalogue, CatalogueError, ReloadCoordinator};
pub use source::{ConfigSource, HttpConfigStore, SourceError};
pub use store::RegistryStore;
pub use types::{AliasSet, RegistryKind, StorageEndpoint, StorageId, TableInfo};
