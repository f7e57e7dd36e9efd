//! Reloadable catalog with hot-swap support.
//!
//! Wraps an [`InMemoryCatalog`] behind an `ArcSwap` so a fresh introspection
//! snapshot can replace the current one without blocking compilations in
//! flight. Readers that already took a snapshot keep using it.

use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::info;

use crate::catalog::{InMemoryCatalog, TemplateCatalog};
use crate::metadata::{TemplateMetadata, TypeInfo};

/// A catalog whose contents can be atomically replaced.
#[derive(Clone)]
pub struct ReloadableCatalog {
    /// Inner catalog with atomic pointer swap (lock-free reads)
    inner: Arc<ArcSwap<InMemoryCatalog>>,
}

impl ReloadableCatalog {
    pub fn new(catalog: InMemoryCatalog) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(catalog)),
        }
    }

    /// Get a snapshot of the current catalog.
    ///
    /// Single atomic load, never blocks.
    pub fn snapshot(&self) -> Arc<InMemoryCatalog> {
        self.inner.load_full()
    }

    /// Replace the whole catalog.
    ///
    /// Old readers continue with the old snapshot, new readers get the new one.
    pub fn swap(&self, catalog: InMemoryCatalog) {
        let templates = catalog.len();
        self.inner.store(Arc::new(catalog));
        info!(templates, "Template catalog reloaded");
    }

    /// Rebuild the catalog from a full set of template documents.
    pub fn reload(&self, templates: impl IntoIterator<Item = TemplateMetadata>) {
        self.swap(InMemoryCatalog::from_templates(templates));
    }

    /// Upsert a single template into the current snapshot.
    pub fn upsert(&self, template: TemplateMetadata) {
        self.inner.load().upsert(template);
    }
}

impl Default for ReloadableCatalog {
    fn default() -> Self {
        Self::new(InMemoryCatalog::new())
    }
}

impl std::fmt::Debug for ReloadableCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadableCatalog")
            .field("templates", &self.inner.load().len())
            .finish()
    }
}

impl TemplateCatalog for ReloadableCatalog {
    fn multi_valued(&self, template_id: &str) -> Option<Vec<String>> {
        self.inner.load().multi_valued(template_id)
    }

    fn type_info(&self, template_id: &str, reduced_path: &str) -> Option<TypeInfo> {
        self.inner.load().type_info(template_id, reduced_path)
    }

    fn entry_root(&self, template_id: &str) -> Option<String> {
        self.inner.load().entry_root(template_id)
    }

    fn paths_of(&self, template_id: &str, identifier: &str) -> Option<Vec<String>> {
        self.inner.load().paths_of(template_id, identifier)
    }

    fn contains_template(&self, template_id: &str) -> bool {
        self.inner.load().contains_template(template_id)
    }
}
