//! Marker resolution.
//!
//! Replaces iteration and name-predicate markers with nested scan-and-filter
//! SQL, leftmost marker first, until the path is fully resolved:
//!
//! ```text
//! [root, /content[..], $ITER$, /value, magnitude]
//!   -> (jsonb_array_elements(entry #> '{root,/content[..]}') #>> '{/value,magnitude}')
//! ```
//!
//! The first step reads from the [`DocumentSource`]. Later steps read from
//! the expression produced by the previous one, extracted as JSON.

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};
use crate::segment::{
    ITERATIVE_FUNCTION, NAME_PREDICATE_FUNCTION, Segment, SegmentedPath, build_jsonb_extract,
    quote_literal,
};

/// JSON document the first resolution step reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "source", rename_all = "snake_case")]
pub enum DocumentSource {
    /// JSONB column, e.g. the entry document
    Column(String),
    /// Function building a JSON document from table columns,
    /// e.g. `ehr.js_context("ehr"."event_context"."id")`
    Function { function: String, columns: Vec<String> },
}

impl DocumentSource {
    pub fn column(column: impl Into<String>) -> Self {
        Self::Column(column.into())
    }

    pub fn function<I, S>(function: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Function {
            function: function.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Canonical JSON of the event context of the current composition.
    pub fn event_context() -> Self {
        Self::function("ehr.js_context", [r#""ehr"."event_context"."id""#])
    }

    /// SQL expression of the document, as `jsonb`.
    pub fn to_sql(&self) -> String {
        match self {
            Self::Column(column) => column.clone(),
            Self::Function { function, columns } => {
                format!("({function}({}))::jsonb", columns.join(", "))
            }
        }
    }

    pub fn is_column(&self) -> bool {
        matches!(self, Self::Column(_))
    }
}

/// Outcome of resolving every marker of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub path: SegmentedPath,
    /// Number of resolution steps taken (one per marker)
    pub steps: usize,
}

#[derive(Debug, Clone)]
pub struct MarkerResolver {
    source: DocumentSource,
}

impl MarkerResolver {
    /// Resolver reading from a JSONB column.
    pub fn new(entry_column: impl Into<String>) -> Self {
        Self::with_source(DocumentSource::column(entry_column))
    }

    pub fn with_source(source: DocumentSource) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &DocumentSource {
        &self.source
    }

    /// Resolve all markers. A path without markers is returned unchanged.
    pub fn resolve(&self, path: SegmentedPath) -> CompileResult<Resolution> {
        let mut path = path;
        let mut steps = 0usize;

        loop {
            let before = path.marker_count();
            if before == 0 {
                return Ok(Resolution { path, steps });
            }

            let next = self.resolve_step(&path)?;
            if next.marker_count() >= before {
                return Err(CompileError::internal(format!(
                    "marker resolution made no progress on {path}"
                )));
            }
            path = next;
            steps += 1;
        }
    }

    /// Resolve the leftmost marker.
    fn resolve_step(&self, path: &SegmentedPath) -> CompileResult<SegmentedPath> {
        let segments = path.segments();
        let Some(marker) = segments.iter().position(Segment::is_marker) else {
            return Ok(path.clone());
        };

        let (source, start) = match segments.first() {
            Some(Segment::RawExpression(sql)) => (sql.clone(), 1),
            _ => (self.source.to_sql(), 0),
        };
        let prefix = segments.get(start..marker).unwrap_or_default();

        let call = match &segments[marker] {
            Segment::IterationMarker => iterate(&source, prefix)?,
            // only the top-level column scan passes the node path to the function
            Segment::PredicateMarker(predicate) if start == 0 && self.source.is_column() => {
                name_predicate(&source, predicate, &predicate_path(prefix)?)
            }
            Segment::PredicateMarker(predicate) => {
                name_predicate(&build_jsonb_extract(&source, prefix, false)?, predicate, "")
            }
            other => {
                return Err(CompileError::internal(format!(
                    "expected a marker at {marker}, found {other}"
                )));
            }
        };

        // a placeholder index right after the marker is spent
        let mut tail_start = marker + 1;
        if segments.get(tail_start).is_some_and(Segment::is_index) {
            tail_start += 1;
        }
        let tail = &segments[tail_start.min(segments.len())..];

        let mut resolved = Vec::with_capacity(tail.len() + 1);
        if tail.iter().any(Segment::is_marker) {
            // the extraction feeds the next scan, which applies `#>` to it
            resolved.push(Segment::RawExpression(call));
            resolved.extend(tail.iter().cloned());
        } else if tail.is_empty() {
            resolved.push(Segment::RawExpression(call));
        } else {
            resolved.push(Segment::RawExpression(format!(
                "({})",
                build_jsonb_extract(&call, tail, true)?
            )));
        }

        Ok(SegmentedPath::from(resolved))
    }
}

/// `jsonb_array_elements(source #> '{prefix}')`
fn iterate(source: &str, prefix: &[Segment]) -> CompileResult<String> {
    Ok(format!(
        "{ITERATIVE_FUNCTION}({})",
        build_jsonb_extract(source, prefix, false)?
    ))
}

/// `ehr.aql_node_name_predicate(source, 'name', 'path')`
fn name_predicate(source: &str, predicate: &str, path: &str) -> String {
    format!(
        "{NAME_PREDICATE_FUNCTION}({source}, {}, {})",
        quote_literal(predicate),
        quote_literal(path)
    )
}

/// Comma joined node path handed to the predicate function.
fn predicate_path(prefix: &[Segment]) -> CompileResult<String> {
    Ok(prefix
        .iter()
        .map(|segment| match segment {
            Segment::Literal(name) => Ok(name.clone()),
            Segment::Index(n) => Ok(n.to_string()),
            Segment::Wildcard => Ok("#".to_string()),
            other => Err(CompileError::internal(format!(
                "segment {other} cannot appear in a predicate path"
            ))),
        })
        .collect::<CompileResult<Vec<_>>>()?
        .join(","))
}
