use openehr_aql_catalog::{InMemoryCatalog, TemplateMetadata};
use openehr_aql_jsonb::{
    CompilerConfig, IterationResolver, MarkerResolver, Segment, SegmentedPath, is_json_block,
    reduced_path,
};

const ENTRY: &str = r#""ehr"."entry"."entry""#;
const ROOT: &str = "/composition[openEHR-EHR-COMPOSITION.encounter.v1]";

fn lit(s: &str) -> Segment {
    Segment::literal(s)
}

/// A deep cluster path with one repeating node per level.
fn nested_path(levels: usize) -> SegmentedPath {
    let mut segments = vec![
        lit(ROOT),
        lit("/content[openEHR-EHR-OBSERVATION.lab.v1]"),
        Segment::Index(0),
        lit("/data[at0001]"),
    ];
    for level in 0..levels {
        segments.push(lit(&format!("/items[at{:04}]", level + 10)));
        segments.push(Segment::Index(0));
    }
    segments.push(lit("/value"));
    segments.push(lit("magnitude"));
    SegmentedPath::from(segments)
}

fn nested_catalog(levels: usize) -> InMemoryCatalog {
    let mut meta = TemplateMetadata::new("lab.v1").with_entry_root(ROOT);
    let mut path = "/content[openEHR-EHR-OBSERVATION.lab.v1]/data[at0001]".to_string();
    for level in 0..levels {
        path.push_str(&format!("/items[at{:04}]", level + 10));
        meta = meta.with_multi_valued(path.clone());
    }
    InMemoryCatalog::from_templates([meta])
}

#[test]
fn resolving_a_resolved_path_is_identity() {
    let resolver = MarkerResolver::new(ENTRY);
    let path = nested_path(3);
    let once = resolver.resolve(path.clone()).unwrap();
    assert_eq!(once.steps, 0);
    assert_eq!(once.path, path);

    let twice = resolver.resolve(once.path.clone()).unwrap();
    assert_eq!(twice, once);
}

#[test]
fn resolution_takes_one_step_per_marker() {
    let catalog = nested_catalog(4);
    let resolver = MarkerResolver::new(ENTRY);

    for depth in 1..=4 {
        let config = CompilerConfig::default()
            .with_iteration_ignore(Vec::<String>::new())
            .with_iteration_depth(depth);
        let iteration = IterationResolver::new(&config).unwrap();
        let marked = iteration
            .mark_iterations(&catalog, "lab.v1", &nested_path(4))
            .unwrap()
            .unwrap();

        let markers = marked.marker_count();
        assert_eq!(markers, depth);

        let resolution = resolver.resolve(marked).unwrap();
        assert_eq!(resolution.steps, markers);
        assert!(resolution.path.is_resolved());
        assert_eq!(
            resolution.path.segments()[0].to_string().matches("jsonb_array_elements").count(),
            markers
        );
    }
}

#[test]
fn marker_count_never_exceeds_depth_or_length() {
    let catalog = nested_catalog(5);
    let path = nested_path(5);

    for depth in 1..=8 {
        let config = CompilerConfig::default()
            .with_iteration_ignore(Vec::<String>::new())
            .with_iteration_depth(depth);
        let marked = IterationResolver::new(&config)
            .unwrap()
            .mark_iterations(&catalog, "lab.v1", &path)
            .unwrap()
            .unwrap();

        assert!(marked.marker_count() <= depth);
        assert!(marked.marker_count() <= 5);
        // every repeating node has a placeholder slot, so nothing is inserted
        assert_eq!(marked.len(), path.len());
    }
}

#[test]
fn reference_path_is_marker_agnostic() {
    let base = vec![
        lit(ROOT),
        lit("/content[openEHR-EHR-OBSERVATION.bp.v1]"),
        Segment::Index(0),
        lit("/data[at0001]"),
        lit("/events"),
        lit("/events[at0006]"),
    ];
    let tail = vec![
        Segment::Index(0),
        lit("/data[at0003]"),
        lit("/items[at0004]"),
        Segment::Index(0),
        lit("/value"),
        lit("magnitude"),
    ];

    let with = |marker: Segment| -> SegmentedPath {
        base.iter()
            .cloned()
            .chain(std::iter::once(marker))
            .chain(tail.iter().cloned())
            .collect()
    };

    let iterated = with(Segment::IterationMarker).reference_path();
    let filtered = with(Segment::PredicateMarker("Any event".into())).reference_path();
    assert_eq!(iterated, filtered);
    assert_eq!(reduced_path(&iterated), reduced_path(&filtered));
    assert_eq!(
        reduced_path(&iterated).as_deref(),
        Some("/content[openEHR-EHR-OBSERVATION.bp.v1]/data[at0001]/events[at0006]/data[at0003]/items[at0004]/value")
    );
}

#[test]
fn classifier_is_total() {
    let samples: Vec<SegmentedPath> = vec![
        SegmentedPath::from(vec![lit("magnitude")]),
        SegmentedPath::from(vec![lit("/value")]),
        SegmentedPath::from(vec![Segment::Index(3)]),
        SegmentedPath::from(vec![Segment::Wildcard]),
        SegmentedPath::from(vec![Segment::RawExpression("x".into())]),
        SegmentedPath::from(vec![lit("/feeder_audit")]),
        SegmentedPath::from(vec![lit("")]),
        nested_path(0),
        nested_path(2).reference_path(),
    ];

    let blocks: Vec<bool> = samples.iter().map(is_json_block).collect();
    assert_eq!(
        blocks,
        vec![false, true, false, false, false, true, false, false, false]
    );
}
