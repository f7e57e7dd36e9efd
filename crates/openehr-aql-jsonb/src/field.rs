//! Field assembler.
//!
//! Compiles one AQL variable within one template into a [`MultiFieldSet`]:
//! every physical path the variable resolves to is normalized, marked for
//! iteration, resolved into SQL, typed, classified and finally cast and
//! aliased for the clause it is used in.

use indexmap::IndexMap;
use openehr_aql_catalog::{ItemCategory, ItemType, TemplateCatalog};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::classifier::is_json_block;
use crate::config::CompilerConfig;
use crate::error::{CompileError, CompileResult};
use crate::iteration::IterationResolver;
use crate::normalizer::{COMPOSITION_ROOT, ITEM_COUNT, PathPart, jquery_path};
use crate::predicate::{DocumentSource, MarkerResolver};
use crate::segment::{Segment, SegmentedPath, build_jsonb_extract, render_resolved};
use crate::types::{ResolvedType, ScalarType, TypeResolver, scalar_type_for};

/// Formats an element value block together with its data value type
pub const TYPED_ELEMENT_VALUE_FUNCTION: &str = "ehr.js_typed_element_value";

/// SQL clause a variable is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Clause {
    Select,
    Where,
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Select => f.write_str("SELECT"),
            Clause::Where => f.write_str("WHERE"),
        }
    }
}

/// An AQL variable already resolved by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDefinition {
    /// Containment identifier, e.g. `o` in `CONTAINS OBSERVATION o[...]`
    pub identifier: String,
    /// Path below the identifier; `None` selects the whole node
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
}

impl VariableDefinition {
    pub fn new(identifier: impl Into<String>, path: Option<&str>) -> Self {
        Self {
            identifier: identifier.into(),
            path: path.map(String::from),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// Per-query compilation state.
///
/// Owns the serial used for default aliases, so aliases are unique within a
/// query and independent across queries.
#[derive(Debug, Default)]
pub struct CompileContext {
    serial: usize,
    uses_entry_table: bool,
}

impl CompileContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next generated alias (`field_1`, `field_2`, ...).
    pub fn next_alias(&mut self) -> String {
        self.serial += 1;
        format!("field_{}", self.serial)
    }

    /// Whether any emitted field reads the entry document table.
    pub fn uses_entry_table(&self) -> bool {
        self.uses_entry_table
    }

    fn mark_entry_table(&mut self) {
        self.uses_entry_table = true;
    }
}

/// A compiled SQL expression with its inferred typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedField {
    pub sql: String,
    pub alias: Option<String>,
    pub scalar_type: Option<ScalarType>,
    pub item_type: ItemType,
    pub item_category: ItemCategory,
    pub json_block: bool,
    pub uses_entry_table: bool,
    /// Comma joined encoding path (root and indices dropped); `None` for null fields
    pub canonical_path: Option<String>,
}

impl QualifiedField {
    fn null(path: Option<&str>, alias: Option<String>) -> Self {
        let numeric = path.is_some_and(|p| p.ends_with("magnitude"));
        Self {
            sql: if numeric { "NULL::numeric" } else { "NULL" }.to_string(),
            alias,
            scalar_type: numeric.then_some(ScalarType::Numeric),
            item_type: ItemType::unknown(),
            item_category: ItemCategory::Unknown,
            json_block: false,
            uses_entry_table: false,
            canonical_path: None,
        }
    }

    pub fn is_null(&self) -> bool {
        self.canonical_path.is_none() && self.sql.starts_with("NULL")
    }

    /// Expression with its `AS "alias"` suffix when aliased.
    pub fn to_sql(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{} AS \"{}\"", self.sql, alias.replace('"', "\"\"")),
            None => self.sql.clone(),
        }
    }
}

/// Fan-out of one variable within one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiFieldSet {
    pub template_id: String,
    pub identifier: String,
    pub path: Option<String>,
    fields: Vec<QualifiedField>,
}

impl MultiFieldSet {
    fn new(template_id: &str, variable: &VariableDefinition, fields: Vec<QualifiedField>) -> Self {
        Self {
            template_id: template_id.to_string(),
            identifier: variable.identifier.clone(),
            path: variable.path.clone(),
            fields,
        }
    }

    pub fn fields(&self) -> &[QualifiedField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn first(&self) -> Option<&QualifiedField> {
        self.fields.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QualifiedField> {
        self.fields.iter()
    }

    pub fn find_by_sql(&self, sql: &str) -> Option<&QualifiedField> {
        self.fields.iter().find(|field| field.sql == sql)
    }

    pub fn find_by_canonical_path(&self, canonical_path: &str) -> Option<&QualifiedField> {
        self.fields
            .iter()
            .find(|field| field.canonical_path.as_deref() == Some(canonical_path))
    }
}

/// Registry of the sets emitted for one template, keyed by (identifier, path)
/// in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MultiFieldsMap {
    sets: IndexMap<(String, String), MultiFieldSet>,
}

impl MultiFieldsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a set, replacing any previous one for the same variable.
    pub fn insert(&mut self, set: MultiFieldSet) -> Option<MultiFieldSet> {
        let key = (set.identifier.clone(), set.path.clone().unwrap_or_default());
        self.sets.insert(key, set)
    }

    pub fn get(&self, identifier: &str, path: Option<&str>) -> Option<&MultiFieldSet> {
        self.sets
            .get(&(identifier.to_string(), path.unwrap_or_default().to_string()))
    }

    /// Find a previously emitted field by its SQL expression.
    pub fn find_by_sql(&self, sql: &str) -> Option<(&MultiFieldSet, &QualifiedField)> {
        self.sets
            .values()
            .find_map(|set| set.find_by_sql(sql).map(|field| (set, field)))
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MultiFieldSet> {
        self.sets.values()
    }
}

/// Canonical JSON projection of whole record-model entities.
struct EntityProjection {
    rm_class: &'static str,
    sql: &'static str,
    uses_entry_table: bool,
}

const ENTITY_PROJECTIONS: [EntityProjection; 6] = [
    EntityProjection {
        rm_class: "COMPOSITION",
        sql: r#"ehr.js_composition("ehr"."entry"."composition_id")"#,
        uses_entry_table: true,
    },
    EntityProjection {
        rm_class: "EHR",
        sql: r#"ehr.js_ehr("ehr"."ehr"."id")"#,
        uses_entry_table: false,
    },
    EntityProjection {
        rm_class: "EHR_STATUS",
        sql: r#"ehr.js_ehr_status("ehr"."status"."ehr_id")"#,
        uses_entry_table: false,
    },
    EntityProjection {
        rm_class: "EVENT_CONTEXT",
        sql: r#"ehr.js_context("ehr"."event_context"."id")"#,
        uses_entry_table: false,
    },
    EntityProjection {
        rm_class: "PARTY_IDENTIFIED",
        sql: r#"ehr.js_canonical_party_identified("ehr"."party_identified"."id")"#,
        uses_entry_table: false,
    },
    EntityProjection {
        rm_class: "FEEDER_AUDIT",
        sql: r#""ehr"."composition"."feeder_audit""#,
        uses_entry_table: false,
    },
];

/// Compiles AQL variables into qualified fields.
#[derive(Clone)]
pub struct FieldAssembler {
    catalog: Arc<dyn TemplateCatalog>,
    config: CompilerConfig,
    iteration: IterationResolver,
    markers: MarkerResolver,
    types: TypeResolver,
}

impl FieldAssembler {
    pub fn new(catalog: Arc<dyn TemplateCatalog>, config: CompilerConfig) -> CompileResult<Self> {
        config.validate()?;
        Ok(Self {
            iteration: IterationResolver::new(&config)?,
            markers: MarkerResolver::new(config.entry_column.clone()),
            types: TypeResolver::new(config.ignore_unresolved_introspect),
            catalog,
            config,
        })
    }

    /// Assembler over the template snapshots of a directory.
    pub fn from_catalog_dir(dir: impl AsRef<Path>, config: CompilerConfig) -> CompileResult<Self> {
        let catalog = openehr_aql_catalog::loader::load_from_dir(dir)?;
        Self::new(Arc::new(catalog), config)
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Whether expressions over `source` read the entry document table.
    fn reads_entry_table(&self, source: &DocumentSource) -> bool {
        matches!(source, DocumentSource::Column(column) if *column == self.config.entry_column)
    }

    /// Compile a variable for one template.
    pub fn compile_variable(
        &self,
        ctx: &mut CompileContext,
        template_id: &str,
        variable: &VariableDefinition,
        clause: Clause,
    ) -> CompileResult<MultiFieldSet> {
        if variable.identifier.trim().is_empty() {
            return Err(CompileError::invalid_path("variable without identifier"));
        }
        if variable.path.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err(CompileError::invalid_path(format!(
                "empty path for variable '{}'",
                variable.identifier
            )));
        }
        if !self.catalog.contains_template(template_id) {
            return Err(CompileError::UnknownTemplate(template_id.to_string()));
        }

        let Some(entry_root) = self.catalog.entry_root(template_id) else {
            return match clause {
                Clause::Where => Err(CompileError::MissingEntryRoot {
                    template_id: template_id.to_string(),
                }),
                Clause::Select => Ok(MultiFieldSet::new(template_id, variable, Vec::new())),
            };
        };

        let alias = match clause {
            Clause::Select => Some(
                variable
                    .alias
                    .clone()
                    .unwrap_or_else(|| ctx.next_alias()),
            ),
            Clause::Where => None,
        };

        let physical_paths = self.physical_paths(template_id, variable);
        if physical_paths.is_empty() {
            debug!(
                template_id,
                identifier = %variable.identifier,
                "No physical path for variable, emitting null field"
            );
            let field = QualifiedField::null(variable.path.as_deref(), alias);
            return Ok(MultiFieldSet::new(template_id, variable, vec![field]));
        }

        let mut fields = Vec::with_capacity(physical_paths.len());
        for (containment, variable_path) in physical_paths {
            let mut segments = vec![Segment::Literal(entry_root.clone())];
            segments.extend(jquery_path(
                PathPart::Identifier,
                containment.as_deref(),
                &Segment::Index(0),
            ));
            segments.extend(jquery_path(
                PathPart::Variable,
                variable_path.as_deref(),
                &Segment::Index(0),
            ));
            let path = SegmentedPath::from(segments);

            let field = self.compile_path(
                Some(template_id),
                &self.markers,
                path,
                variable,
                clause,
                alias.clone(),
            )?;
            if field.uses_entry_table {
                ctx.mark_entry_table();
            }
            fields.push(field);
        }

        Ok(MultiFieldSet::new(template_id, variable, fields))
    }

    /// Compile a variable path over a JSON document other than the entry,
    /// e.g. the canonical event context.
    ///
    /// The path is relative to the document root. Name/value predicates are
    /// resolved against the document; there is no template, so repeating
    /// nodes are not scanned and typing falls back to the path suffix.
    pub fn compile_document_path(
        &self,
        ctx: &mut CompileContext,
        variable: &VariableDefinition,
        source: &DocumentSource,
        clause: Clause,
    ) -> CompileResult<QualifiedField> {
        let Some(document_path) = variable.path.as_deref().filter(|p| !p.trim().is_empty()) else {
            return Err(CompileError::invalid_path(format!(
                "document variable '{}' without path",
                variable.identifier
            )));
        };

        let alias = match clause {
            Clause::Select => Some(
                variable
                    .alias
                    .clone()
                    .unwrap_or_else(|| ctx.next_alias()),
            ),
            Clause::Where => None,
        };

        let path = SegmentedPath::from(jquery_path(
            PathPart::Variable,
            Some(document_path),
            &Segment::Index(0),
        ));
        let markers = MarkerResolver::with_source(source.clone());
        let field = self.compile_path(None, &markers, path, variable, clause, alias)?;
        if field.uses_entry_table {
            ctx.mark_entry_table();
        }
        Ok(field)
    }

    /// Canonical JSON projection of a whole entity (`SELECT c FROM COMPOSITION c`).
    pub fn compile_entity(
        &self,
        ctx: &mut CompileContext,
        variable: &VariableDefinition,
        rm_class: &str,
    ) -> CompileResult<QualifiedField> {
        let rm_class = rm_class.to_ascii_uppercase();
        let projection = ENTITY_PROJECTIONS
            .iter()
            .find(|projection| projection.rm_class == rm_class)
            .ok_or_else(|| CompileError::UnsupportedEntity(rm_class.clone()))?;

        if projection.uses_entry_table {
            ctx.mark_entry_table();
        }

        Ok(QualifiedField {
            sql: projection.sql.to_string(),
            alias: Some(
                variable
                    .alias
                    .clone()
                    .unwrap_or_else(|| ctx.next_alias()),
            ),
            scalar_type: None,
            item_type: ItemType::new(rm_class),
            item_category: ItemCategory::Unknown,
            json_block: true,
            uses_entry_table: projection.uses_entry_table,
            canonical_path: None,
        })
    }

    /// (containment path, variable path) pairs a variable resolves to.
    fn physical_paths(
        &self,
        template_id: &str,
        variable: &VariableDefinition,
    ) -> Vec<(Option<String>, Option<String>)> {
        // root content variables address the composition directly
        if let Some(path) = variable.path.as_deref()
            && path.starts_with("content")
        {
            return vec![(None, Some(path.to_string()))];
        }

        self.catalog
            .paths_of(template_id, &variable.identifier)
            .unwrap_or_default()
            .into_iter()
            .map(|containment| {
                let containment = (!containment.starts_with(COMPOSITION_ROOT)).then_some(containment);
                (containment, variable.path.clone())
            })
            .collect()
    }

    /// Compile one physical path. Without a template the path is not marked
    /// for iteration and is typed from its suffix only.
    fn compile_path(
        &self,
        template_id: Option<&str>,
        markers: &MarkerResolver,
        path: SegmentedPath,
        variable: &VariableDefinition,
        clause: Clause,
        alias: Option<String>,
    ) -> CompileResult<QualifiedField> {
        // entry paths start with the composition root key
        let canonical_path = path
            .iter()
            .skip(usize::from(template_id.is_some()))
            .filter_map(Segment::as_literal)
            .collect::<Vec<_>>()
            .join(",");

        if let Some(count_at) = path
            .iter()
            .position(|segment| segment.as_literal() == Some(ITEM_COUNT))
        {
            return self.item_count_field(markers, &path, count_at, canonical_path, alias);
        }

        let marked = match template_id {
            Some(template_id) => self
                .iteration
                .mark_iterations(self.catalog.as_ref(), template_id, &path)?
                .unwrap_or(path),
            None => path,
        };
        let reference = marked.reference_path();

        let ResolvedType {
            scalar_type,
            item_type,
            item_category,
        } = match template_id {
            Some(template_id) => {
                self.types
                    .resolve(self.catalog.as_ref(), template_id, &reference, clause)?
            }
            None => ResolvedType::unknown(scalar_type_for(
                &ItemType::unknown(),
                &reference.canonical(),
                clause,
            )),
        };
        let json_block = is_json_block(&reference);

        let typed_element = clause == Clause::Select
            && json_block
            && variable.path.as_deref().is_some_and(|p| p == "value" || p.ends_with("/value"))
            && matches!(item_category, ItemCategory::Element | ItemCategory::Cluster)
            && item_type.is_data_value();

        let mut marked = marked;
        if typed_element
            && marked.len() > 1
            && marked.last().and_then(Segment::as_literal) == Some("/value")
        {
            marked.segments_mut().pop();
        }

        let resolution = markers.resolve(marked)?;
        let mut sql = render_resolved(&resolution.path, &markers.source().to_sql())?;

        if typed_element {
            sql = format!("({TYPED_ELEMENT_VALUE_FUNCTION}(({sql})::jsonb))");
        } else if let Some(scalar) = scalar_type {
            sql = format!("({sql})::{}", scalar.as_sql());
        }

        if clause == Clause::Where && resolution.steps > 0 {
            // set returning functions must be scalarized in predicates
            sql = format!("(SELECT {sql})");
        }

        debug!(
            template_id = template_id.unwrap_or("-"),
            path = %canonical_path,
            clause = %clause,
            steps = resolution.steps,
            scalar = ?scalar_type,
            json_block,
            "Compiled field"
        );

        Ok(QualifiedField {
            sql,
            alias,
            scalar_type: if typed_element { None } else { scalar_type },
            item_type,
            item_category,
            json_block,
            uses_entry_table: self.reads_entry_table(markers.source()),
            canonical_path: Some(canonical_path),
        })
    }

    /// `jsonb_array_length(source #> '{prefix}')`, the list index before
    /// `/item_count` dropped.
    fn item_count_field(
        &self,
        markers: &MarkerResolver,
        path: &SegmentedPath,
        count_at: usize,
        canonical_path: String,
        alias: Option<String>,
    ) -> CompileResult<QualifiedField> {
        let mut prefix = &path.segments()[..count_at];
        if let Some((last, rest)) = prefix.split_last()
            && last.is_index()
        {
            prefix = rest;
        }
        if prefix
            .iter()
            .any(|segment| segment.is_marker() || matches!(segment, Segment::RawExpression(_)))
        {
            return Err(CompileError::invalid_path(format!(
                "item_count over unresolved path {path}"
            )));
        }

        let sql = format!(
            "jsonb_array_length({})",
            build_jsonb_extract(&markers.source().to_sql(), prefix, false)?
        );

        Ok(QualifiedField {
            sql,
            alias,
            scalar_type: Some(ScalarType::Integer),
            item_type: ItemType::unknown(),
            item_category: ItemCategory::Unknown,
            json_block: false,
            uses_entry_table: self.reads_entry_table(markers.source()),
            canonical_path: Some(canonical_path),
        })
    }
}

impl fmt::Debug for FieldAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldAssembler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
