//! Data-block classifier.
//!
//! Decides from the terminal segment whether a compiled field yields a JSON
//! fragment rather than a scalar.

use regex::Regex;
use std::sync::LazyLock;

use crate::normalizer::FEEDER_AUDIT;
use crate::segment::{Segment, SegmentedPath};

/// Archetyped node, e.g. `/items[at0004]`
static ARCHETYPED_NODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/[a-z_]+\[[^\]]*\]$").expect("valid archetyped node regex"));

/// Terminal keys holding structures.
const STRUCTURAL_TERMINALS: [&str; 15] = [
    "/value",
    "/time",
    "/name",
    "/defining_code",
    "/mappings",
    "/ism_transition",
    "/uid",
    "/archetype_details",
    "/links",
    "/language",
    "/encoding",
    "/subject",
    "/provider",
    "/other_participations",
    "/context",
];

/// Attribute tokens holding composite values.
const COMPOSITE_ATTRIBUTES: [&str; 10] = [
    "defining_code",
    "mappings",
    "language",
    "encoding",
    "terminology_id",
    "lower",
    "upper",
    "current_state",
    "transition",
    "careflow_step",
];

/// Scalar leaves of the feeder audit structure.
const FEEDER_AUDIT_LEAVES: [&str; 7] = [
    "system_id",
    "version_id",
    "namespace",
    "issuer",
    "assigner",
    "id",
    "type",
];

/// True when the path addresses a JSON fragment rather than a scalar.
///
/// Total over segment lists: an empty list or one without literals is not a
/// block.
pub fn is_json_block(path: &SegmentedPath) -> bool {
    let literals: Vec<&str> = path.iter().filter_map(Segment::as_literal).collect();
    let Some(&terminal) = literals.last() else {
        return false;
    };

    if literals.contains(&FEEDER_AUDIT) {
        let leaf = terminal.trim_start_matches('/');
        if !FEEDER_AUDIT_LEAVES.contains(&leaf) {
            return true;
        }
        // nested value envelopes are still blocks
        return literals.len() >= 2 && literals[literals.len() - 2].trim_start_matches('/') == "value";
    }

    ARCHETYPED_NODE.is_match(terminal)
        || STRUCTURAL_TERMINALS.contains(&terminal)
        || COMPOSITE_ATTRIBUTES.contains(&terminal.trim_start_matches('/'))
}
