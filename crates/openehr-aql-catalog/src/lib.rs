//! Template introspection catalog for AQL compilation.
//!
//! The AQL compiler never talks to the knowledge base directly. Everything it
//! needs to know about a template is exposed through the [`TemplateCatalog`]
//! trait:
//!
//! - which archetype paths repeat (cardinality > 1) and therefore live in a
//!   JSON array of the entry document
//! - the declared RM type and structural category of a node
//! - the JSON key of the composition root of the entry document
//! - the containment paths a query variable identifier resolves to
//!
//! # Components
//!
//! - [`InMemoryCatalog`] - DashMap-indexed catalog with per-template upserts
//! - [`ReloadableCatalog`] - atomically swappable catalog snapshot
//! - [`TemplateMetadata`] - serde document describing one template
//! - [`loader`] - JSON snapshot loading (string, reader, directory)

mod catalog;
mod error;
pub mod loader;
mod metadata;
mod reloadable;

pub use catalog::{InMemoryCatalog, TemplateCatalog};
pub use error::{CatalogError, CatalogResult};
pub use metadata::{ItemCategory, ItemType, TemplateMetadata, TypeInfo};
pub use reloadable::ReloadableCatalog;
