//! Template metadata loading from JSON snapshots.
//!
//! A snapshot is either a single [`TemplateMetadata`] document or an array of
//! them. Directory loading reads every `*.json` file (sorted by name) and
//! rejects templates described more than once.

use serde::Deserialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::catalog::InMemoryCatalog;
use crate::error::{CatalogError, CatalogResult};
use crate::metadata::TemplateMetadata;

#[derive(Deserialize)]
#[serde(untagged)]
enum Snapshot {
    Many(Vec<TemplateMetadata>),
    One(Box<TemplateMetadata>),
}

impl Snapshot {
    fn into_vec(self) -> Vec<TemplateMetadata> {
        match self {
            Snapshot::Many(templates) => templates,
            Snapshot::One(template) => vec![*template],
        }
    }
}

/// Parse template documents from a JSON string.
pub fn parse_templates(json: &str) -> CatalogResult<Vec<TemplateMetadata>> {
    let snapshot: Snapshot = serde_json::from_str(json)?;
    let templates = snapshot.into_vec();
    validate(&templates)?;
    Ok(templates)
}

/// Build a catalog from a JSON string.
pub fn load_from_str(json: &str) -> CatalogResult<InMemoryCatalog> {
    Ok(InMemoryCatalog::from_templates(parse_templates(json)?))
}

/// Build a catalog from any reader yielding JSON.
pub fn load_from_reader<R: Read>(reader: R) -> CatalogResult<InMemoryCatalog> {
    let snapshot: Snapshot = serde_json::from_reader(reader)?;
    let templates = snapshot.into_vec();
    validate(&templates)?;
    Ok(InMemoryCatalog::from_templates(templates))
}

/// Build a catalog from every `*.json` file in a directory.
pub fn load_from_dir(dir: impl AsRef<Path>) -> CatalogResult<InMemoryCatalog> {
    let dir = dir.as_ref();

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();

    let mut templates = Vec::new();
    for file in &files {
        let content = std::fs::read_to_string(file)?;
        let parsed = parse_templates(&content).map_err(|e| match e {
            CatalogError::Json(err) => {
                CatalogError::invalid_metadata(format!("{}: {}", file.display(), err))
            }
            other => other,
        })?;
        debug!(file = %file.display(), templates = parsed.len(), "Parsed template snapshot");
        templates.extend(parsed);
    }
    validate(&templates)?;

    info!(
        dir = %dir.display(),
        files = files.len(),
        templates = templates.len(),
        "Loaded template catalog"
    );

    Ok(InMemoryCatalog::from_templates(templates))
}

fn validate(templates: &[TemplateMetadata]) -> CatalogResult<()> {
    let mut seen = HashSet::new();
    for template in templates {
        if template.template_id.trim().is_empty() {
            return Err(CatalogError::invalid_metadata("template_id must not be empty"));
        }
        if !seen.insert(template.template_id.as_str()) {
            return Err(CatalogError::DuplicateTemplate(template.template_id.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TemplateCatalog;

    #[test]
    fn test_single_document() {
        let catalog = load_from_str(
            r#"{"template_id": "t1", "entry_root": "/composition[openEHR-EHR-COMPOSITION.a.v1]"}"#,
        )
        .unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains_template("t1"));
    }

    #[test]
    fn test_array_document() {
        let catalog =
            load_from_str(r#"[{"template_id": "t1"}, {"template_id": "t2"}]"#).unwrap();
        assert_eq!(catalog.template_ids(), vec!["t1", "t2"]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = load_from_str(r#"[{"template_id": "t1"}, {"template_id": "t1"}]"#).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateTemplate(id) if id == "t1"));
    }

    #[test]
    fn test_empty_template_id_rejected() {
        let err = load_from_str(r#"{"template_id": "  "}"#).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidMetadata(_)));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            load_from_str("{not json").unwrap_err(),
            CatalogError::Json(_)
        ));
    }

    #[test]
    fn test_reader() {
        let json = br#"{"template_id": "r1", "multi_valued": ["/content[openEHR-EHR-OBSERVATION.x.v1]"]}"#;
        let catalog = load_from_reader(&json[..]).unwrap();
        assert_eq!(catalog.multi_valued("r1").unwrap().len(), 1);
    }
}
