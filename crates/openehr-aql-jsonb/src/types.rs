//! Type resolver.
//!
//! Picks the SQL scalar type to cast extracted text into, from the declared
//! record-model type of the node and the shape of the path suffix.

use openehr_aql_catalog::{ItemCategory, ItemType, TemplateCatalog};
use std::fmt;
use tracing::warn;

use crate::error::{CompileError, CompileResult};
use crate::field::Clause;
use crate::normalizer::{ACTIVITIES, COMPOSITION_ROOT, EVENTS, FEEDER_AUDIT};
use crate::segment::{Segment, SegmentedPath};

/// SQL scalar type of a compiled field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Numeric,
    Integer,
    Boolean,
    Interval,
    Varchar,
}

impl ScalarType {
    pub fn as_sql(self) -> &'static str {
        match self {
            ScalarType::Numeric => "numeric",
            ScalarType::Integer => "int",
            ScalarType::Boolean => "boolean",
            ScalarType::Interval => "interval",
            ScalarType::Varchar => "varchar",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Type information attached to a compiled field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType {
    /// `None` means "leave as JSON/text, do not cast"
    pub scalar_type: Option<ScalarType>,
    pub item_type: ItemType,
    pub item_category: ItemCategory,
}

impl ResolvedType {
    pub fn unknown(scalar_type: Option<ScalarType>) -> Self {
        Self {
            scalar_type,
            item_type: ItemType::unknown(),
            item_category: ItemCategory::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TypeResolver {
    ignore_unresolved: bool,
}

impl TypeResolver {
    pub fn new(ignore_unresolved: bool) -> Self {
        Self { ignore_unresolved }
    }

    /// Resolve the type of a reference path (markers replaced by `0`).
    pub fn resolve(
        &self,
        catalog: &dyn TemplateCatalog,
        template_id: &str,
        reference: &SegmentedPath,
        clause: Clause,
    ) -> CompileResult<ResolvedType> {
        let canonical = reference.canonical();

        let Some(key) = reduced_path(reference) else {
            return Ok(ResolvedType::unknown(scalar_type_for(
                &ItemType::unknown(),
                &canonical,
                clause,
            )));
        };

        let (item_type, item_category) = match catalog.type_info(template_id, &key) {
            Some(info) => (info.declared_type, info.category),
            None if self.ignore_unresolved => {
                warn!(template_id, path = %key, "No type info for path, leaving field untyped");
                (ItemType::unknown(), ItemCategory::Unknown)
            }
            None => {
                return Err(CompileError::UnresolvedType {
                    template_id: template_id.to_string(),
                    path: key,
                });
            }
        };

        Ok(ResolvedType {
            scalar_type: scalar_type_for(&item_type, &canonical, clause),
            item_type,
            item_category,
        })
    }
}

/// Catalog lookup key for a reference path.
///
/// Starts at the nearest archetype root node, runs through the last
/// archetyped node and keeps a trailing `/value` or `/name` attribute.
/// Returns `None` when the path has no typed node (no bracketed node, or a
/// feeder audit sub-field).
pub fn reduced_path(reference: &SegmentedPath) -> Option<String> {
    let nodes: Vec<&str> = reference
        .iter()
        .enumerate()
        .filter_map(|(i, segment)| match segment {
            Segment::Literal(name) if i == 0 && name.starts_with(COMPOSITION_ROOT) => None,
            Segment::Literal(name) if name == EVENTS || name == ACTIVITIES => None,
            Segment::Literal(name) => Some(name.as_str()),
            _ => None,
        })
        .collect();

    if nodes.contains(&FEEDER_AUDIT) {
        return None;
    }

    let last = nodes.iter().rposition(|node| node.contains('['))?;
    let start = nodes[..=last]
        .iter()
        .rposition(|node| is_archetype_root(node))
        .unwrap_or(0);

    let mut key: String = nodes[start..=last].concat();
    match nodes.get(last + 1).map(|node| node.trim_start_matches('/')) {
        Some("value") => key.push_str("/value"),
        Some("name") => key.push_str("/name"),
        _ => {}
    }
    Some(key)
}

fn is_archetype_root(node: &str) -> bool {
    node.split_once('[')
        .is_some_and(|(_, predicate)| predicate.starts_with("openEHR-"))
}

/// Fixed mapping from declared type and path suffix to a scalar type.
pub fn scalar_type_for(item_type: &ItemType, canonical: &str, clause: Clause) -> Option<ScalarType> {
    let terminal = canonical.rsplit(',').next().unwrap_or(canonical);

    let declared = match item_type.as_str() {
        "DV_QUANTITY" if terminal == "magnitude" => Some(ScalarType::Numeric),
        "DV_PROPORTION" if matches!(terminal, "numerator" | "denominator") => {
            Some(ScalarType::Numeric)
        }
        "DV_COUNT" if terminal == "magnitude" => Some(ScalarType::Integer),
        "DV_ORDINAL" if canonical.ends_with("value,value") => Some(ScalarType::Integer),
        "DV_BOOLEAN" if canonical.ends_with(",value") => Some(ScalarType::Boolean),
        "DV_DURATION" if canonical.ends_with(",value") => match clause {
            Clause::Where => Some(ScalarType::Interval),
            Clause::Select => Some(ScalarType::Varchar),
        },
        _ => None,
    };

    declared.or(match terminal {
        "lower_unbounded" | "upper_unbounded" | "lower_included" | "upper_included" => {
            Some(ScalarType::Boolean)
        }
        "magnitude" => Some(ScalarType::Numeric),
        _ => None,
    })
}
