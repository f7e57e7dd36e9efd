//! Path normalizer.
//!
//! Rewrites archetype paths and record-model attribute paths into the segment
//! sequence of the JSON entry encoding:
//!
//! - list-shaped containers (`content`, `items`, `events`, `activities`) get a
//!   synthetic array slot after the node
//! - `events[..]` and `activities[..]` nodes sit below a wrapper key
//! - `name` and `mappings` are arrays of single-element structures
//! - `time`, `origin`, `timing` carry a `/value` envelope
//! - feeder audit and other participations are special-cased

use heck::ToSnakeCase;
use regex::Regex;
use std::sync::LazyLock;

use crate::segment::Segment;

pub const EVENTS: &str = "/events";
pub const ACTIVITIES: &str = "/activities";
pub const FEEDER_AUDIT: &str = "/feeder_audit";
pub const ITEM_COUNT: &str = "/item_count";
pub const COMPOSITION_ROOT: &str = "/composition";

/// Feeder audit attributes encoded as JSON arrays.
pub const FEEDER_ITEM_ID_LISTS: [&str; 2] = ["feeder_system_item_ids", "originating_system_item_ids"];

const LIST_IDENTIFIERS: [&str; 4] = ["/content", "/items", "/activities", "/events"];

const LOCATABLE_ATTRIBUTES: [&str; 7] = [
    "uid",
    "archetype_node_id",
    "archetype_details",
    "links",
    "language",
    "encoding",
    "subject",
];

const ENTRY_ATTRIBUTES: [&str; 3] = ["provider", "workflow_id", "guideline_id"];

const OTHER_PARTICIPATIONS: &str = "other_participations";
const OTHER_CONTEXT: &str = "other_context";
const OTHER_DETAILS: &str = "other_details";

/// `node[at0001 and name/value='Name']` or `node[at0001, 'Name']`
static NAME_VALUE_PREDICATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<node>[^\[]+)\[\s*(?P<id>[^,\s\]]+)\s*(?:,\s*'(?P<short>(?:[^']|'')*)'|\s+(?i:and)\s+name/value\s*=\s*'(?P<long>(?:[^']|'')*)')\s*\]$",
    )
    .expect("valid name/value predicate regex")
});

static VALUE_NAME_QUALIFIERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(name|time|current_state|transition|careflow_step|reason|terminology_id)$")
        .expect("valid qualifier regex")
});

/// Which half of a physical path is being normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPart {
    /// Containment path of the query identifier
    Identifier,
    /// Variable path below the identifier
    Variable,
}

/// Split a path on `/`, ignoring separators inside `[...]` and quotes.
pub fn divide_path_into_segments(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quote = false;

    for c in path.chars() {
        match c {
            '\'' => in_quote = !in_quote,
            '[' if !in_quote => depth += 1,
            ']' if !in_quote => depth = depth.saturating_sub(1),
            '/' if depth == 0 && !in_quote => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// A node id split into its bare form and an optional name/value predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePredicate {
    pub node_id: String,
    pub name: Option<String>,
}

impl NodePredicate {
    pub fn parse(node_id: &str) -> Self {
        match NAME_VALUE_PREDICATE.captures(node_id) {
            Some(caps) => {
                let name = caps
                    .name("short")
                    .or_else(|| caps.name("long"))
                    .map(|m| m.as_str().replace("''", "'"));
                Self {
                    node_id: format!("{}[{}]", &caps["node"], &caps["id"]),
                    name,
                }
            }
            None => Self {
                node_id: node_id.to_string(),
                name: None,
            },
        }
    }

    pub fn has_predicate(&self) -> bool {
        self.name.is_some()
    }
}

fn is_list(node_id: &str) -> bool {
    if node_id == ACTIVITIES {
        return false;
    }
    LIST_IDENTIFIERS.iter().any(|id| node_id.starts_with(id))
}

/// Normalize one half of a physical path into JSON encoding segments.
///
/// `default_index` fills the synthetic slot after list-shaped nodes and
/// name/value predicates become [`Segment::PredicateMarker`]s. In the
/// variable part the trailing attribute path is rewritten by [`map_attribute`].
pub fn jquery_path(part: PathPart, path: Option<&str>, default_index: &Segment) -> Vec<Segment> {
    let Some(path) = path else {
        return Vec::new();
    };

    let mut segments = Vec::new();
    for raw in divide_path_into_segments(path) {
        let node_id = format!("/{raw}");

        if node_id.contains('[') {
            if node_id.starts_with(EVENTS) {
                segments.push(Segment::literal(EVENTS));
            } else if node_id.starts_with(ACTIVITIES) {
                segments.push(Segment::literal(ACTIVITIES));
            }
        }

        let predicate = NodePredicate::parse(&node_id);
        let list = is_list(&predicate.node_id);
        segments.push(Segment::Literal(predicate.node_id));
        if let Some(name) = predicate.name {
            segments.push(Segment::PredicateMarker(name));
        }

        if list {
            segments.push(default_index.clone());
        }
    }

    if part == PathPart::Variable {
        let mut attribute = Vec::new();
        while let Some(Segment::Literal(name)) = segments.last() {
            if name.contains('[') {
                break;
            }
            if let Some(Segment::Literal(name)) = segments.pop() {
                attribute.push(name);
            }
        }
        attribute.reverse();

        if let Some(tokens) = map_attribute(&attribute.concat()) {
            segments.extend(tokens);
        }
    }

    segments
}

/// Map a record-model attribute path (e.g. `/value/magnitude`) to its JSON
/// encoding tokens. Returns `None` when the whole node is requested.
pub fn map_attribute(attribute: &str) -> Option<Vec<Segment>> {
    if attribute == OTHER_CONTEXT {
        return Some(vec![Segment::literal(format!("/{OTHER_CONTEXT}"))]);
    }

    let mut fields: Vec<String> = attribute.split('/').map(snake_case_token).collect();
    if fields.first().is_some_and(|f| f != OTHER_CONTEXT) {
        fields.remove(0);
    }
    fields.retain(|f| !f.is_empty());
    if fields.is_empty() {
        return None;
    }

    if fields[0] == FEEDER_AUDIT[1..] {
        return Some(feeder_audit_tokens(&fields));
    }

    let mut in_other_participations = false;
    let head = fields[0].as_str();

    if head == OTHER_PARTICIPATIONS {
        in_other_participations = true;
    } else if head == "name" {
        fields.insert(1, "0".to_string());
    } else if fields.len() >= 2 && fields[1] == "mappings" {
        fields.insert(2, "0".to_string());
    } else if matches!(head, "time" | "origin" | "timing") {
        if fields.len() > 1 && fields[1] == "value" {
            fields.push("value".to_string());
            fields[1] = "/value".to_string();
        } else {
            fields.insert(1, "/value".to_string());
        }
    } else if LOCATABLE_ATTRIBUTES.contains(&head) {
        set_locatable_fields(&mut fields);
    } else if ENTRY_ATTRIBUTES.contains(&head) {
        // encoded as is
    } else if let Some(pos) = first_value(0, &fields) {
        if pos != 0 {
            if pos > 1 && VALUE_NAME_QUALIFIERS.is_match(&fields[pos - 1]) {
                fields[pos] = "value".to_string();
            } else {
                fields[pos] = "/value".to_string();
            }
        } else if pos + 1 < fields.len() - 1 && first_value(pos + 1, &fields) == Some(pos + 1) {
            fields[pos + 1] = "/value".to_string();
        }
    }

    if !fields[0].starts_with('/') {
        fields[0] = format!("/{}", fields[0]);
    }

    let mut tokens = Vec::with_capacity(fields.len() + 2);
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 && field.eq_ignore_ascii_case("name") && !in_other_participations {
            tokens.push(Segment::literal("/name"));
            tokens.push(Segment::Index(0));
        } else {
            tokens.push(token_segment(field));
        }
    }
    Some(tokens)
}

fn first_value(offset: usize, fields: &[String]) -> Option<usize> {
    fields
        .iter()
        .enumerate()
        .skip(offset)
        .find(|(_, f)| f.as_str() == "value")
        .map(|(i, _)| i)
}

fn set_locatable_fields(fields: &mut Vec<String>) {
    if fields[0] == "uid" {
        fields.insert(1, "/value".to_string());
    }

    let mut in_item_struct = false;
    let mut in_name_attribute = false;

    for field in fields.iter_mut() {
        if field.contains('[') && !field.starts_with(OTHER_DETAILS) {
            *field = format!("/{field}");
            in_item_struct = true;
        }
        if field == "name" {
            in_name_attribute = true;
        }
        if field == "value" && in_item_struct {
            if !in_name_attribute {
                *field = "/value".to_string();
            }
            in_name_attribute = false;
            in_item_struct = false;
        }
    }
}

fn feeder_audit_tokens(fields: &[String]) -> Vec<Segment> {
    let mut tokens = vec![Segment::literal(FEEDER_AUDIT)];
    for field in &fields[1..] {
        tokens.push(token_segment(field.clone()));
        if FEEDER_ITEM_ID_LISTS.contains(&field.as_str()) {
            tokens.push(Segment::Index(0));
        }
    }
    tokens
}

fn token_segment(token: String) -> Segment {
    match token.as_str() {
        "#" => Segment::Wildcard,
        _ => match token.parse::<u32>() {
            Ok(n) => Segment::Index(n),
            Err(_) => Segment::Literal(token),
        },
    }
}

/// camelCase attribute names are written snake_case in the encoding.
fn snake_case_token(token: &str) -> String {
    if token.contains('[') || !token.chars().any(|c| c.is_ascii_uppercase()) {
        token.to_string()
    } else {
        token.to_snake_case()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> Segment {
        Segment::literal(s)
    }

    #[test]
    fn test_divide_path_respects_brackets() {
        assert_eq!(
            divide_path_into_segments("data[at0001]/items[at0002 and name/value='a/b']/value"),
            vec!["data[at0001]", "items[at0002 and name/value='a/b']", "value"]
        );
        assert_eq!(divide_path_into_segments("/content[x]"), vec!["content[x]"]);
        assert!(divide_path_into_segments("").is_empty());
    }

    #[test]
    fn test_node_predicate_forms() {
        let long = NodePredicate::parse("/items[at0001 and name/value='Systolic']");
        assert_eq!(long.node_id, "/items[at0001]");
        assert_eq!(long.name.as_deref(), Some("Systolic"));

        let short = NodePredicate::parse("/items[at0001, 'O''Neil']");
        assert_eq!(short.node_id, "/items[at0001]");
        assert_eq!(short.name.as_deref(), Some("O'Neil"));

        let upper = NodePredicate::parse("/items[at0001 AND name/value='X']");
        assert_eq!(upper.name.as_deref(), Some("X"));

        let bare = NodePredicate::parse("/items[at0001]");
        assert!(!bare.has_predicate());
        assert_eq!(bare.node_id, "/items[at0001]");
    }

    #[test]
    fn test_map_value_magnitude() {
        assert_eq!(
            map_attribute("/value/magnitude").unwrap(),
            vec![lit("/value"), lit("magnitude")]
        );
    }

    #[test]
    fn test_map_name_is_array() {
        assert_eq!(
            map_attribute("/name/value").unwrap(),
            vec![lit("/name"), Segment::Index(0), lit("value")]
        );
        assert_eq!(map_attribute("/name").unwrap(), vec![lit("/name"), Segment::Index(0)]);
    }

    #[test]
    fn test_map_mappings_is_array() {
        assert_eq!(
            map_attribute("/value/mappings/target/code_string").unwrap(),
            vec![
                lit("/value"),
                lit("mappings"),
                Segment::Index(0),
                lit("target"),
                lit("code_string")
            ]
        );
    }

    #[test]
    fn test_map_time_envelope() {
        assert_eq!(
            map_attribute("/time/value").unwrap(),
            vec![lit("/time"), lit("/value"), lit("value")]
        );
        assert_eq!(map_attribute("/origin").unwrap(), vec![lit("/origin"), lit("/value")]);
    }

    #[test]
    fn test_map_qualified_value_stays_bare() {
        assert_eq!(
            map_attribute("/ism_transition/current_state/value").unwrap(),
            vec![lit("/ism_transition"), lit("current_state"), lit("value")]
        );
        assert_eq!(
            map_attribute("/value/defining_code/terminology_id/value").unwrap(),
            vec![
                lit("/value"),
                lit("defining_code"),
                lit("terminology_id"),
                lit("value")
            ]
        );
    }

    #[test]
    fn test_map_ordinal_value_value() {
        assert_eq!(
            map_attribute("/value/value").unwrap(),
            vec![lit("/value"), lit("value")]
        );
    }

    #[test]
    fn test_map_camel_case() {
        assert_eq!(
            map_attribute("/value/definingCode/codeString").unwrap(),
            vec![lit("/value"), lit("defining_code"), lit("code_string")]
        );
    }

    #[test]
    fn test_map_other_participations_keeps_name_flat() {
        assert_eq!(
            map_attribute("/other_participations/performer/name").unwrap(),
            vec![lit("/other_participations"), lit("performer"), lit("name")]
        );
    }

    #[test]
    fn test_map_locatable_uid() {
        assert_eq!(
            map_attribute("/uid/value").unwrap(),
            vec![lit("/uid"), lit("/value"), lit("value")]
        );
    }

    #[test]
    fn test_map_locatable_item_structure_value() {
        let mut fields = vec![
            "links".to_string(),
            "items[at0001]".to_string(),
            "value".to_string(),
        ];
        set_locatable_fields(&mut fields);
        assert_eq!(fields, vec!["links", "/items[at0001]", "/value"]);
    }

    #[test]
    fn test_map_feeder_audit() {
        assert_eq!(
            map_attribute("/feeder_audit/feeder_system_item_ids").unwrap(),
            vec![lit("/feeder_audit"), lit("feeder_system_item_ids"), Segment::Index(0)]
        );
        assert_eq!(
            map_attribute("/feeder_audit/originating_system_audit/system_id").unwrap(),
            vec![
                lit("/feeder_audit"),
                lit("originating_system_audit"),
                lit("system_id")
            ]
        );
    }

    #[test]
    fn test_map_empty_requests_whole_node() {
        assert!(map_attribute("").is_none());
        assert!(map_attribute("/").is_none());
    }

    #[test]
    fn test_jquery_identifier_part() {
        let segments = jquery_path(
            PathPart::Identifier,
            Some("/content[openEHR-EHR-OBSERVATION.bp.v1]"),
            &Segment::Index(0),
        );
        assert_eq!(
            segments,
            vec![lit("/content[openEHR-EHR-OBSERVATION.bp.v1]"), Segment::Index(0)]
        );
        assert!(jquery_path(PathPart::Identifier, None, &Segment::Index(0)).is_empty());
    }

    #[test]
    fn test_jquery_variable_part_with_events() {
        let segments = jquery_path(
            PathPart::Variable,
            Some("data[at0001]/events[at0006]/data[at0003]/items[at0004]/value/magnitude"),
            &Segment::Index(0),
        );
        assert_eq!(
            segments,
            vec![
                lit("/data[at0001]"),
                lit("/events"),
                lit("/events[at0006]"),
                Segment::Index(0),
                lit("/data[at0003]"),
                lit("/items[at0004]"),
                Segment::Index(0),
                lit("/value"),
                lit("magnitude"),
            ]
        );
    }

    #[test]
    fn test_jquery_variable_part_with_predicate() {
        let segments = jquery_path(
            PathPart::Variable,
            Some("activities[at0001 and name/value='Procedure']/description"),
            &Segment::Index(0),
        );
        assert_eq!(
            segments,
            vec![
                lit("/activities"),
                lit("/activities[at0001]"),
                Segment::PredicateMarker("Procedure".into()),
                Segment::Index(0),
                lit("/description"),
            ]
        );
    }

    #[test]
    fn test_jquery_identifier_part_keeps_predicate() {
        let segments = jquery_path(
            PathPart::Identifier,
            Some("/content[openEHR-EHR-SECTION.adhoc.v1 and name/value='Vitals']/items[openEHR-EHR-OBSERVATION.bp.v1]"),
            &Segment::Wildcard,
        );
        assert_eq!(
            segments,
            vec![
                lit("/content[openEHR-EHR-SECTION.adhoc.v1]"),
                Segment::PredicateMarker("Vitals".into()),
                Segment::Wildcard,
                lit("/items[openEHR-EHR-OBSERVATION.bp.v1]"),
                Segment::Wildcard,
            ]
        );
    }

    #[test]
    fn test_is_list() {
        assert!(is_list("/content[x]"));
        assert!(is_list("/items[at0001]"));
        assert!(is_list("/activities[at0001]"));
        assert!(!is_list("/activities"));
        assert!(!is_list("/data[at0001]"));
    }
}
