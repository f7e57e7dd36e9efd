//! Template metadata documents.
//!
//! A [`TemplateMetadata`] is the introspection result for one operational
//! template, flattened to what the AQL compiler consumes. Snapshots are
//! exchanged as JSON:
//!
//! ```json
//! {
//!   "template_id": "vital_signs.v1",
//!   "entry_root": "/composition[openEHR-EHR-COMPOSITION.encounter.v1]",
//!   "multi_valued": ["/content[openEHR-EHR-OBSERVATION.bp.v1]/data[at0001]/events[at0006]"],
//!   "types": {
//!     "/content[openEHR-EHR-OBSERVATION.bp.v1]/data[at0001]/events[at0006]/data[at0003]/items[at0004]/value":
//!       { "type": "DV_QUANTITY", "category": "ELEMENT" }
//!   },
//!   "containments": { "o": ["/content[openEHR-EHR-OBSERVATION.bp.v1]"] }
//! }
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared RM type of a node (e.g. `DV_QUANTITY`, `DV_CODED_TEXT`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ItemType(String);

impl ItemType {
    /// Sentinel used when introspection has no answer for a path.
    pub const UNKNOWN: &'static str = "UNKNOWN";

    pub fn new(rm_type: impl Into<String>) -> Self {
        Self(rm_type.into().to_uppercase())
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }

    /// True for RM data value types (`DV_*`, `CODE_PHRASE`).
    pub fn is_data_value(&self) -> bool {
        self.0.starts_with("DV_") || self.0 == "CODE_PHRASE"
    }
}

impl Default for ItemType {
    fn default() -> Self {
        Self::unknown()
    }
}

impl From<String> for ItemType {
    fn from(rm_type: String) -> Self {
        Self::new(rm_type)
    }
}

impl From<ItemType> for String {
    fn from(item_type: ItemType) -> Self {
        item_type.0
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structural category of a node within the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemCategory {
    Element,
    Cluster,
    ItemStructure,
    Entry,
    Event,
    Activity,
    Section,
    Composition,
    DataValue,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ItemCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Element => "ELEMENT",
            Self::Cluster => "CLUSTER",
            Self::ItemStructure => "ITEM_STRUCTURE",
            Self::Entry => "ENTRY",
            Self::Event => "EVENT",
            Self::Activity => "ACTIVITY",
            Self::Section => "SECTION",
            Self::Composition => "COMPOSITION",
            Self::DataValue => "DATA_VALUE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ItemCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type and category of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeInfo {
    #[serde(rename = "type")]
    pub declared_type: ItemType,
    #[serde(default)]
    pub category: ItemCategory,
}

impl TypeInfo {
    pub fn new(declared_type: impl Into<String>, category: ItemCategory) -> Self {
        Self {
            declared_type: ItemType::new(declared_type),
            category,
        }
    }
}

/// Introspection snapshot for a single template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateMetadata {
    pub template_id: String,

    /// JSON key of the composition root in the entry document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_root: Option<String>,

    /// Archetype paths with cardinality > 1
    #[serde(default)]
    pub multi_valued: Vec<String>,

    /// Declared types keyed by reduced path
    #[serde(default)]
    pub types: IndexMap<String, TypeInfo>,

    /// Containment paths keyed by query variable identifier
    #[serde(default)]
    pub containments: IndexMap<String, Vec<String>>,
}

impl TemplateMetadata {
    pub fn new(template_id: impl Into<String>) -> Self {
        Self {
            template_id: template_id.into(),
            ..Default::default()
        }
    }

    pub fn with_entry_root(mut self, entry_root: impl Into<String>) -> Self {
        self.entry_root = Some(entry_root.into());
        self
    }

    pub fn with_multi_valued(mut self, aql_path: impl Into<String>) -> Self {
        self.multi_valued.push(aql_path.into());
        self
    }

    pub fn with_type(mut self, reduced_path: impl Into<String>, info: TypeInfo) -> Self {
        self.types.insert(reduced_path.into(), info);
        self
    }

    pub fn with_containment(
        mut self,
        identifier: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        self.containments
            .entry(identifier.into())
            .or_default()
            .push(path.into());
        self
    }
}
