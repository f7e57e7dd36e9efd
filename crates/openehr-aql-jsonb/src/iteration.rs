//! Iteration resolver.
//!
//! Decides which segments of a normalized path traverse a JSON array and
//! inserts [`Segment::IterationMarker`]s there. Multi-valued archetype paths
//! come from the template catalog, scanned most specific first; the number of
//! markers per path is bounded by the configured depth.

use openehr_aql_catalog::TemplateCatalog;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::debug;

use crate::config::CompilerConfig;
use crate::error::{CompileError, CompileResult};
use crate::normalizer::{
    ACTIVITIES, COMPOSITION_ROOT, EVENTS, FEEDER_AUDIT, FEEDER_ITEM_ID_LISTS, NodePredicate,
    divide_path_into_segments,
};
use crate::segment::{Segment, SegmentedPath};

#[derive(Debug, Clone)]
pub struct IterationResolver {
    depth: usize,
    ignore: Vec<Regex>,
}

impl IterationResolver {
    pub fn new(config: &CompilerConfig) -> CompileResult<Self> {
        Ok(Self {
            depth: config.iteration_depth.max(1),
            ignore: config.ignore_patterns()?,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Mark the array positions of `path`.
    ///
    /// Returns `None` when the template has no iterable node at all, and the
    /// unmodified path when iterable nodes exist but none applies here.
    pub fn mark_iterations(
        &self,
        catalog: &dyn TemplateCatalog,
        template_id: &str,
        path: &SegmentedPath,
    ) -> CompileResult<Option<SegmentedPath>> {
        let multi_valued = catalog.multi_valued(template_id).unwrap_or_default();
        let feeder_offsets = feeder_item_id_offsets(path);

        if multi_valued.is_empty() && feeder_offsets.is_empty() {
            return Ok(None);
        }

        let compact = compact_segments(path);
        let mut offsets = BTreeSet::new();

        for candidate in &multi_valued {
            if offsets.len() >= self.depth {
                break;
            }

            let aql_segments: Vec<String> = divide_path_into_segments(candidate)
                .iter()
                .map(|segment| NodePredicate::parse(segment).node_id)
                .collect();
            let Some(last) = aql_segments.last() else {
                continue;
            };

            if is_leaf_attribute(last) {
                continue;
            }
            if self.ignore.iter().any(|pattern| pattern.is_match(last)) {
                continue;
            }
            if !compact.starts_with(&aql_segments) {
                continue;
            }

            let offset = array_offset(path, &aql_segments)?;
            if matches!(path.get(offset), Some(Segment::PredicateMarker(_))) {
                // the name predicate already scans this array
                debug!(template_id, candidate = %candidate, offset, "Array selected by name predicate");
                continue;
            }
            debug!(template_id, candidate = %candidate, offset, "Marking iterable node");
            offsets.insert(offset);
        }

        for offset in feeder_offsets {
            if offsets.len() >= self.depth {
                break;
            }
            offsets.insert(offset);
        }

        if offsets.is_empty() {
            return Ok(Some(path.clone()));
        }

        let mut marked = path.clone();
        let segments = marked.segments_mut();
        // highest offset first so insertions keep lower offsets valid
        for &offset in offsets.iter().rev() {
            match segments.get(offset) {
                Some(segment) if segment.is_index() => segments[offset] = Segment::IterationMarker,
                Some(_) => segments.insert(offset, Segment::IterationMarker),
                None => segments.push(Segment::IterationMarker),
            }
        }

        Ok(Some(marked))
    }
}

fn is_leaf_attribute(segment: &str) -> bool {
    let attribute = segment.split('[').next().unwrap_or(segment);
    matches!(attribute, "value" | "name")
}

/// Archetype form of a path: no root, indices, markers or wrapper keys.
fn compact_segments(path: &SegmentedPath) -> Vec<String> {
    path.iter()
        .enumerate()
        .filter_map(|(i, segment)| match segment {
            Segment::Literal(name) if i == 0 && name.starts_with(COMPOSITION_ROOT) => None,
            Segment::Literal(name) if name == EVENTS || name == ACTIVITIES => None,
            Segment::Literal(name) => Some(name.trim_start_matches('/').to_string()),
            _ => None,
        })
        .collect()
}

/// Walk the archetype segments and the JSON segments in lock-step and return
/// the position right after the last matched JSON segment.
fn array_offset(path: &SegmentedPath, aql_segments: &[String]) -> CompileResult<usize> {
    let segments = path.segments();
    let mut pos = 0usize;

    for aql in aql_segments {
        loop {
            match segments.get(pos) {
                None => {
                    return Err(CompileError::StructuralDrift {
                        aql: aql.clone(),
                        jsonb: String::new(),
                        index: pos,
                    });
                }
                Some(Segment::Literal(name)) if pos == 0 && name.starts_with(COMPOSITION_ROOT) => {
                    pos += 1
                }
                Some(Segment::Literal(name)) if is_wrapper(name, segments.get(pos + 1)) => pos += 1,
                Some(Segment::Literal(_)) => break,
                Some(_) => pos += 1,
            }
        }

        let jsonb = match &segments[pos] {
            Segment::Literal(name) => name.trim_start_matches('/'),
            _ => "",
        };
        if jsonb != aql {
            return Err(CompileError::StructuralDrift {
                aql: aql.clone(),
                jsonb: jsonb.to_string(),
                index: pos,
            });
        }
        pos += 1;
    }

    Ok(pos)
}

/// `/events` and `/activities` keys holding the actual event/activity node.
fn is_wrapper(name: &str, next: Option<&Segment>) -> bool {
    if name != EVENTS && name != ACTIVITIES {
        return false;
    }
    matches!(next, Some(Segment::Literal(node)) if node.starts_with(&format!("{name}[")))
}

/// Positions right after feeder audit item-id lists, which are always arrays.
fn feeder_item_id_offsets(path: &SegmentedPath) -> Vec<usize> {
    let Some(feeder) = path
        .iter()
        .position(|segment| segment.as_literal() == Some(FEEDER_AUDIT))
    else {
        return Vec::new();
    };

    path.iter()
        .enumerate()
        .skip(feeder + 1)
        .filter(|(_, segment)| {
            segment
                .as_literal()
                .is_some_and(|name| FEEDER_ITEM_ID_LISTS.contains(&name))
        })
        .map(|(i, _)| i + 1)
        .collect()
}
