use std::fs;
use std::sync::Arc;

use openehr_aql_catalog::loader::load_from_dir;
use openehr_aql_catalog::{
    CatalogError, ItemCategory, ReloadableCatalog, TemplateCatalog,
};

const VITAL_SIGNS: &str = r#"
{
  "template_id": "vital_signs.v1",
  "entry_root": "/composition[openEHR-EHR-COMPOSITION.encounter.v1]",
  "multi_valued": [
    "/content[openEHR-EHR-OBSERVATION.bp.v1]",
    "/content[openEHR-EHR-OBSERVATION.bp.v1]/data[at0001]/events[at0006]"
  ],
  "types": {
    "/content[openEHR-EHR-OBSERVATION.bp.v1]/data[at0001]/events[at0006]/data[at0003]/items[at0004]/value": {
      "type": "dv_quantity",
      "category": "ELEMENT"
    }
  },
  "containments": {
    "o": ["/content[openEHR-EHR-OBSERVATION.bp.v1]"]
  }
}
"#;

const DISCHARGE: &str = r#"
[
  { "template_id": "discharge.v1", "entry_root": "/composition[openEHR-EHR-COMPOSITION.discharge.v1]" },
  { "template_id": "referral.v1" }
]
"#;

#[test]
fn directory_snapshot_loads_all_json_files() {
    let dir = tempfile::tempdir().expect("tmp dir");
    fs::write(dir.path().join("vital_signs.json"), VITAL_SIGNS).expect("write");
    fs::write(dir.path().join("discharge.json"), DISCHARGE).expect("write");
    fs::write(dir.path().join("README.txt"), "ignored").expect("write");

    let catalog = load_from_dir(dir.path()).expect("catalog loads");
    assert_eq!(
        catalog.template_ids(),
        vec!["discharge.v1", "referral.v1", "vital_signs.v1"]
    );

    // Most specific multi-valued path first
    let multi = catalog.multi_valued("vital_signs.v1").unwrap();
    assert!(multi[0].ends_with("/events[at0006]"));

    let info = catalog
        .type_info(
            "vital_signs.v1",
            "/content[openEHR-EHR-OBSERVATION.bp.v1]/data[at0001]/events[at0006]/data[at0003]/items[at0004]/value",
        )
        .expect("type info");
    assert_eq!(info.declared_type.as_str(), "DV_QUANTITY");
    assert_eq!(info.category, ItemCategory::Element);

    assert!(catalog.entry_root("referral.v1").is_none());
}

#[test]
fn duplicate_template_across_files_is_rejected() {
    let dir = tempfile::tempdir().expect("tmp dir");
    fs::write(dir.path().join("a.json"), VITAL_SIGNS).expect("write");
    fs::write(dir.path().join("b.json"), VITAL_SIGNS).expect("write");

    let err = load_from_dir(dir.path()).unwrap_err();
    assert!(matches!(err, CatalogError::DuplicateTemplate(id) if id == "vital_signs.v1"));
}

#[test]
fn malformed_file_reports_its_path() {
    let dir = tempfile::tempdir().expect("tmp dir");
    fs::write(dir.path().join("broken.json"), "{ nope").expect("write");

    let err = load_from_dir(dir.path()).unwrap_err();
    match err {
        CatalogError::InvalidMetadata(msg) => assert!(msg.contains("broken.json")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_directory_is_io_error() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let err = load_from_dir(dir.path().join("absent")).unwrap_err();
    assert!(matches!(err, CatalogError::Io(_)));
}

#[test]
fn reloadable_catalog_serves_through_trait_object() {
    let dir = tempfile::tempdir().expect("tmp dir");
    fs::write(dir.path().join("vital_signs.json"), VITAL_SIGNS).expect("write");

    let reloadable = ReloadableCatalog::default();
    let shared: Arc<dyn TemplateCatalog> = Arc::new(reloadable.clone());
    assert!(!shared.contains_template("vital_signs.v1"));

    reloadable.swap(load_from_dir(dir.path()).expect("catalog loads"));
    assert!(shared.contains_template("vital_signs.v1"));
    assert_eq!(
        shared.paths_of("vital_signs.v1", "o"),
        Some(vec!["/content[openEHR-EHR-OBSERVATION.bp.v1]".to_string()])
    );
}
