//! Segmented paths and JSONB path emission.
//!
//! A [`SegmentedPath`] is the working representation threaded through every
//! compilation stage. Markers make a path *unresolved*; only resolved paths
//! may be rendered into SQL.

use std::fmt;

use crate::error::{CompileError, CompileResult};

/// Set-returning function scanning the elements of a JSON array
pub const ITERATIVE_FUNCTION: &str = "jsonb_array_elements";
/// Function selecting the array element whose name/value matches a predicate
pub const NAME_PREDICATE_FUNCTION: &str = "ehr.aql_node_name_predicate";

/// One step of a path into the JSON encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Named JSON key, e.g. `/content[openEHR-EHR-OBSERVATION.bp.v1]` or `magnitude`
    Literal(String),
    /// Literal array index
    Index(u32),
    /// Unqualified array slot (`#`)
    Wildcard,
    /// Array whose elements must be scanned
    IterationMarker,
    /// Array scanned for the element whose name/value equals the predicate text
    PredicateMarker(String),
    /// Already compiled SQL standing in for a prefix of the path
    RawExpression(String),
}

impl Segment {
    pub fn literal(name: impl Into<String>) -> Self {
        Segment::Literal(name.into())
    }

    pub fn is_marker(&self) -> bool {
        matches!(self, Segment::IterationMarker | Segment::PredicateMarker(_))
    }

    /// Index or wildcard placeholder.
    pub fn is_index(&self) -> bool {
        matches!(self, Segment::Index(_) | Segment::Wildcard)
    }

    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Segment::Literal(name) => Some(name),
            _ => None,
        }
    }

    /// Element of a `'{...}'` JSONB path literal.
    fn path_element(&self) -> CompileResult<String> {
        match self {
            Segment::Literal(name) => Ok(name.clone()),
            Segment::Index(n) => Ok(n.to_string()),
            Segment::Wildcard => Ok("#".to_string()),
            other => Err(CompileError::internal(format!(
                "segment {other} cannot appear in a JSONB path literal"
            ))),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(name) => f.write_str(name),
            Segment::Index(n) => write!(f, "{n}"),
            Segment::Wildcard => f.write_str("#"),
            Segment::IterationMarker => f.write_str("$ITER$"),
            Segment::PredicateMarker(predicate) => write!(f, "$NAME['{predicate}']$"),
            Segment::RawExpression(sql) => f.write_str(sql),
        }
    }
}

/// Ordered list of segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SegmentedPath {
    segments: Vec<Segment>,
}

impl SegmentedPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }

    pub(crate) fn segments_mut(&mut self) -> &mut Vec<Segment> {
        &mut self.segments
    }

    pub fn marker_count(&self) -> usize {
        self.segments.iter().filter(|s| s.is_marker()).count()
    }

    /// True when no marker is left and the path can be rendered.
    pub fn is_resolved(&self) -> bool {
        self.marker_count() == 0
    }

    /// Copy with every marker replaced by the placeholder index `0`.
    ///
    /// Type lookup and classification run on this form so they do not depend
    /// on how a marker is later resolved.
    pub fn reference_path(&self) -> SegmentedPath {
        self.segments
            .iter()
            .map(|segment| {
                if segment.is_marker() {
                    Segment::Index(0)
                } else {
                    segment.clone()
                }
            })
            .collect()
    }

    /// Comma joined literal tokens, indices and markers dropped.
    pub fn canonical(&self) -> String {
        self.segments
            .iter()
            .filter_map(Segment::as_literal)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Terminal literal token, skipping trailing indices and markers.
    pub fn terminal_literal(&self) -> Option<&str> {
        self.segments.iter().rev().find_map(Segment::as_literal)
    }
}

impl FromIterator<Segment> for SegmentedPath {
    fn from_iter<T: IntoIterator<Item = Segment>>(iter: T) -> Self {
        Self {
            segments: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<Segment>> for SegmentedPath {
    fn from(segments: Vec<Segment>) -> Self {
        Self { segments }
    }
}

impl IntoIterator for SegmentedPath {
    type Item = Segment;
    type IntoIter = std::vec::IntoIter<Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.into_iter()
    }
}

impl<'a> IntoIterator for &'a SegmentedPath {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}

impl fmt::Display for SegmentedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

/// Quote a value as a SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Build a `'{a,b,0}'` JSONB path literal.
pub fn path_literal(segments: &[Segment]) -> CompileResult<String> {
    let elements = segments
        .iter()
        .map(Segment::path_element)
        .collect::<CompileResult<Vec<_>>>()?;
    Ok(quote_literal(&format!("{{{}}}", elements.join(","))))
}

/// Build a JSONB path extraction.
///
/// For example: `["/value", "magnitude"]` becomes `source #>> '{/value,magnitude}'`
pub fn build_jsonb_extract(source: &str, segments: &[Segment], as_text: bool) -> CompileResult<String> {
    if segments.is_empty() {
        return Ok(source.to_string());
    }
    let operator = if as_text { "#>>" } else { "#>" };
    Ok(format!("{source} {operator} {}", path_literal(segments)?))
}

/// Render a resolved path as a SQL expression over `entry_column`.
pub fn render_resolved(path: &SegmentedPath, entry_column: &str) -> CompileResult<String> {
    if !path.is_resolved() {
        return Err(CompileError::internal(format!(
            "unresolved path handed to SQL emission: {path}"
        )));
    }

    match path.segments() {
        [] => Err(CompileError::invalid_path("empty path")),
        [Segment::RawExpression(sql)] => Ok(sql.clone()),
        [Segment::RawExpression(sql), rest @ ..] => {
            Ok(format!("({})", build_jsonb_extract(sql, rest, true)?))
        }
        segments => build_jsonb_extract(entry_column, segments, true),
    }
}
