//! Data model (spec §3): Provider/Endpoint/Credential/GlobalModel/
//! ModelMapping/Model entities, an immutable id-indexed snapshot rebuilt on
//! every admin mutation, and the admin -> core invalidation bus.
//!
//! Catalog tables are read-mostly; the core (relay-core) never mutates them
//! (spec §5 "Shared-resource policy"). The one in-memory reference
//! [`store::CatalogStore`] here stands in for the external persistence layer
//! that is out of scope per spec §1.

pub mod change;
pub mod entities;
pub mod secret;
pub mod snapshot;
pub mod store;

pub use change::{CatalogChange, CatalogChangeBus};
pub use entities::{
    CallerScope, Credential, Endpoint, GlobalModel, MappingKind, Model, ModelMapping, Provider,
};
pub use secret::Secret;
pub use snapshot::CatalogSnapshot;
pub use store::CatalogStore;
