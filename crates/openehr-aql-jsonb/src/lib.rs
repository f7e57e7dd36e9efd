//! AQL path to PostgreSQL JSONB expression compiler.
//!
//! Compiles the archetype paths of an AQL query into SQL fragments that read
//! the JSON entry document of a composition with the `#>>`/`#>` operators.
//! Repeating nodes are scanned with `jsonb_array_elements`, and name/value
//! node predicates are filtered with `ehr.aql_node_name_predicate`.
//!
//! # Pipeline
//!
//! For every physical path a variable maps to in a template:
//!
//! 1. [`normalizer`] rewrites the archetype and attribute path into segments
//!    of the JSON encoding
//! 2. [`IterationResolver`] marks the array positions that must be scanned
//! 3. [`TypeResolver`] and [`is_json_block`] inspect the reference path
//!    (markers replaced by index `0`)
//! 4. [`MarkerResolver`] replaces every marker with nested SQL
//! 5. [`FieldAssembler`] casts, aliases and scalarizes the expression
//!
//! # Example
//!
//! ```ignore
//! use openehr_aql_jsonb::{Clause, CompileContext, CompilerConfig, FieldAssembler, VariableDefinition};
//!
//! let assembler = FieldAssembler::new(catalog, CompilerConfig::default())?;
//! let mut ctx = CompileContext::new();
//! let variable = VariableDefinition::new("o", Some("data[at0001]/events[at0006]/data[at0003]/items[at0004]/value/magnitude"));
//! let set = assembler.compile_variable(&mut ctx, "vital_signs.v1", &variable, Clause::Select)?;
//! for field in set.iter() {
//!     println!("{}", field.to_sql());
//! }
//! ```

mod classifier;
pub mod config;
mod error;
mod field;
mod iteration;
pub mod normalizer;
mod predicate;
mod segment;
mod types;

pub use classifier::is_json_block;
pub use config::{AqlOverrides, CompilerConfig, ServerAqlSettings};
pub use error::{CompileError, CompileResult};
pub use field::{
    Clause, CompileContext, FieldAssembler, MultiFieldSet, MultiFieldsMap, QualifiedField,
    TYPED_ELEMENT_VALUE_FUNCTION, VariableDefinition,
};
pub use iteration::IterationResolver;
pub use normalizer::{PathPart, jquery_path, map_attribute};
pub use predicate::{DocumentSource, MarkerResolver, Resolution};
pub use segment::{
    ITERATIVE_FUNCTION, NAME_PREDICATE_FUNCTION, Segment, SegmentedPath, build_jsonb_extract,
    render_resolved,
};
pub use types::{ResolvedType, ScalarType, TypeResolver, reduced_path, scalar_type_for};

pub use openehr_aql_catalog as catalog;
