//! Template catalog trait and the in-memory implementation.
//!
//! Uses DashMap for lock-free concurrent access, allowing a template to be
//! (re)registered while compilations for other templates keep reading.

use dashmap::DashMap;
use std::cmp::Reverse;
use std::sync::Arc;

use crate::metadata::{TemplateMetadata, TypeInfo};

/// Read-only view of template introspection data consumed by the compiler.
///
/// Implementations must be cheap to query: the compiler issues one lookup per
/// physical path per compiled variable and offers no batching.
pub trait TemplateCatalog: Send + Sync {
    /// Archetype paths known to have cardinality > 1, most specific first.
    ///
    /// Returns `None` when the template is unknown.
    fn multi_valued(&self, template_id: &str) -> Option<Vec<String>>;

    /// Declared type and category for a reduced path.
    fn type_info(&self, template_id: &str, reduced_path: &str) -> Option<TypeInfo>;

    /// JSON key of the composition root in the entry document.
    fn entry_root(&self, template_id: &str) -> Option<String>;

    /// Containment paths a query variable identifier resolves to.
    fn paths_of(&self, template_id: &str, identifier: &str) -> Option<Vec<String>>;

    /// Check whether the template is known at all.
    fn contains_template(&self, template_id: &str) -> bool;
}

impl<T: TemplateCatalog + ?Sized> TemplateCatalog for Arc<T> {
    fn multi_valued(&self, template_id: &str) -> Option<Vec<String>> {
        (**self).multi_valued(template_id)
    }

    fn type_info(&self, template_id: &str, reduced_path: &str) -> Option<TypeInfo> {
        (**self).type_info(template_id, reduced_path)
    }

    fn entry_root(&self, template_id: &str) -> Option<String> {
        (**self).entry_root(template_id)
    }

    fn paths_of(&self, template_id: &str, identifier: &str) -> Option<Vec<String>> {
        (**self).paths_of(template_id, identifier)
    }

    fn contains_template(&self, template_id: &str) -> bool {
        (**self).contains_template(template_id)
    }
}

/// Catalog holding template metadata in memory.
///
/// Multi-valued paths are kept sorted most specific first (by number of path
/// segments) so longest-prefix scans can walk the list front to back.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    templates: DashMap<String, Arc<TemplateMetadata>>,
}

impl InMemoryCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self {
            templates: DashMap::new(),
        }
    }

    /// Build a catalog from a set of template documents.
    pub fn from_templates(templates: impl IntoIterator<Item = TemplateMetadata>) -> Self {
        let catalog = Self::new();
        for template in templates {
            catalog.register(template);
        }
        catalog
    }

    /// Register (or replace) the metadata of a template.
    ///
    /// Thread-safe - can be called concurrently from multiple threads.
    pub fn register(&self, mut template: TemplateMetadata) {
        template
            .multi_valued
            .sort_by(|a, b| (Reverse(segment_count(a)), a).cmp(&(Reverse(segment_count(b)), b)));
        template.multi_valued.dedup();

        tracing::debug!(
            template_id = %template.template_id,
            multi_valued = template.multi_valued.len(),
            types = template.types.len(),
            "Registered template metadata"
        );

        self.templates
            .insert(template.template_id.clone(), Arc::new(template));
    }

    /// Alias for `register()` for clarity when doing incremental updates.
    pub fn upsert(&self, template: TemplateMetadata) {
        self.register(template);
    }

    /// Remove a template. Returns true if it was registered.
    pub fn remove(&self, template_id: &str) -> bool {
        self.templates.remove(template_id).is_some()
    }

    /// Get the full metadata of a template.
    pub fn get(&self, template_id: &str) -> Option<Arc<TemplateMetadata>> {
        self.templates
            .get(template_id)
            .map(|entry| entry.value().clone())
    }

    /// List registered template ids, sorted.
    pub fn template_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .templates
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateCatalog for InMemoryCatalog {
    fn multi_valued(&self, template_id: &str) -> Option<Vec<String>> {
        self.templates
            .get(template_id)
            .map(|entry| entry.multi_valued.clone())
    }

    fn type_info(&self, template_id: &str, reduced_path: &str) -> Option<TypeInfo> {
        self.templates
            .get(template_id)
            .and_then(|entry| entry.types.get(reduced_path).cloned())
    }

    fn entry_root(&self, template_id: &str) -> Option<String> {
        self.templates
            .get(template_id)
            .and_then(|entry| entry.entry_root.clone())
    }

    fn paths_of(&self, template_id: &str, identifier: &str) -> Option<Vec<String>> {
        self.templates
            .get(template_id)
            .and_then(|entry| entry.containments.get(identifier).cloned())
    }

    fn contains_template(&self, template_id: &str) -> bool {
        self.templates.contains_key(template_id)
    }
}

/// Number of `/`-separated segments, ignoring separators inside node predicates.
fn segment_count(path: &str) -> usize {
    let mut depth = 0usize;
    let mut count = 0usize;
    let mut in_segment = false;

    for c in path.chars() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                in_segment = false;
                continue;
            }
            _ => {}
        }
        if !in_segment {
            in_segment = true;
            count += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ItemCategory;

    fn sample() -> TemplateMetadata {
        TemplateMetadata::new("vital_signs.v1")
            .with_entry_root("/composition[openEHR-EHR-COMPOSITION.encounter.v1]")
            .with_multi_valued("/content[openEHR-EHR-OBSERVATION.bp.v1]")
            .with_multi_valued(
                "/content[openEHR-EHR-OBSERVATION.bp.v1]/data[at0001]/events[at0006]",
            )
            .with_type(
                "/content[openEHR-EHR-OBSERVATION.bp.v1]/data[at0001]/events[at0006]/data[at0003]/items[at0004]/value",
                TypeInfo::new("DV_QUANTITY", ItemCategory::Element),
            )
            .with_containment("o", "/content[openEHR-EHR-OBSERVATION.bp.v1]")
    }

    #[test]
    fn test_register_and_lookup() {
        let catalog = InMemoryCatalog::new();
        catalog.register(sample());

        assert!(catalog.contains_template("vital_signs.v1"));
        assert_eq!(
            catalog.entry_root("vital_signs.v1").as_deref(),
            Some("/composition[openEHR-EHR-COMPOSITION.encounter.v1]")
        );
        assert_eq!(
            catalog.paths_of("vital_signs.v1", "o"),
            Some(vec!["/content[openEHR-EHR-OBSERVATION.bp.v1]".to_string()])
        );
        assert!(catalog.paths_of("vital_signs.v1", "x").is_none());
        assert!(catalog.multi_valued("unknown").is_none());
    }

    #[test]
    fn test_multi_valued_sorted_most_specific_first() {
        let catalog = InMemoryCatalog::from_templates([sample()]);
        let paths = catalog.multi_valued("vital_signs.v1").unwrap();

        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("events[at0006]"));
        assert_eq!(paths[1], "/content[openEHR-EHR-OBSERVATION.bp.v1]");
    }

    #[test]
    fn test_multi_valued_duplicates_removed() {
        let meta = TemplateMetadata::new("t")
            .with_multi_valued("/a[x]")
            .with_multi_valued("/b[x]")
            .with_multi_valued("/a[x]")
            .with_multi_valued("/a[x]/c[y]");
        let catalog = InMemoryCatalog::from_templates([meta]);

        assert_eq!(
            catalog.multi_valued("t").unwrap(),
            vec!["/a[x]/c[y]", "/a[x]", "/b[x]"]
        );
    }

    #[test]
    fn test_type_info_lookup() {
        let catalog = InMemoryCatalog::from_templates([sample()]);
        let info = catalog
            .type_info(
                "vital_signs.v1",
                "/content[openEHR-EHR-OBSERVATION.bp.v1]/data[at0001]/events[at0006]/data[at0003]/items[at0004]/value",
            )
            .unwrap();
        assert_eq!(info.declared_type.as_str(), "DV_QUANTITY");
        assert_eq!(info.category, ItemCategory::Element);
    }

    #[test]
    fn test_remove_template() {
        let catalog = InMemoryCatalog::from_templates([sample()]);
        assert!(catalog.remove("vital_signs.v1"));
        assert!(!catalog.remove("vital_signs.v1"));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_segment_count_ignores_predicate_slashes() {
        assert_eq!(segment_count("/content[openEHR-EHR-OBSERVATION.bp.v1]"), 1);
        assert_eq!(
            segment_count("/items[at0001 and name/value='a/b']/items[at0002]"),
            2
        );
        assert_eq!(segment_count(""), 0);
    }

    #[test]
    fn test_arc_catalog_delegates() {
        let catalog: Arc<dyn TemplateCatalog> = Arc::new(InMemoryCatalog::from_templates([sample()]));
        assert!(catalog.contains_template("vital_signs.v1"));
        assert!(catalog.type_info("vital_signs.v1", "/nope").is_none());
    }
}
