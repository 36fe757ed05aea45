use crate::filter::{
    compile_filter_tree, compiled_query_to_string, parse, BoolKind, CompileOptions, CompiledQuery, DateRange,
    FilterNode,
};

fn compile(query: &str) -> CompiledQuery {
    compile_filter_tree(&parse(query), &CompileOptions::default())
}

#[test]
fn test_documented_grammar_parses_cleanly() {
    let queries = [
        "+source:chatgpt",
        "-source:claude ~source:notes ?source:misc",
        "+source:chatgpt & +tags:rust | -format:pdf",
        "!(+source:a | +source:b) & words:>100",
        r#""exact phrase" /regex\/with slash/im title:"in title" draft*"#,
        "date:2024 date:>=2024-03 date:<2024-03-15 date:1704067200000",
        "words:100..500 quality:..0.9 sim:0.5.. words>=3",
        "content:term tags:programming/rust",
        "((a))",
        "",
    ];
    for query in queries {
        let tree = parse(query);
        assert!(tree.parse_errors.is_empty(), "{query}: {:?}", tree.parse_errors);
    }
}

#[test]
fn test_undocumented_grammar_reports_errors() {
    let queries = [
        "+source:",
        "a &",
        "(a",
        "a)",
        "words:>lots",
        "/[/",
        "~/x/",
        "\"open",
        "a $ b",
        "date:2024-99",
        "@",
    ];
    for query in queries {
        assert!(parse(query).has_errors(), "{query}");
    }
}

#[test]
fn test_group_collapsing() {
    let tree = parse("+source:chatgpt & +source:claude");
    let Some(FilterNode::Group {
        kind,
        children,
        negated,
    }) = tree.root.clone()
    else {
        panic!("expected a group, got {:?}", tree.root);
    };
    assert_eq!(kind, BoolKind::And);
    assert_eq!(children.len(), 2);
    assert!(!negated);
    assert!(children.iter().all(|c| !c.is_group()));
}

#[test]
fn test_negation_threading() {
    let q = compile("!(+source:chatgpt & -tags:draft)");
    assert_eq!(q.exclude_source_types, vec!["chatgpt"]);
    assert_eq!(q.tags, vec!["draft"]);
    assert!(q.source_types.is_empty());
    assert!(q.exclude_tags.is_empty());
}

#[test]
fn test_date_year_expansion() {
    let q = compile("date:2024");
    assert_eq!(
        q.date_range,
        Some(DateRange {
            start: Some(1_704_067_200_000),
            end: Some(1_735_689_599_999),
        })
    );
}

#[test]
fn test_compile_is_idempotent() {
    let tree = parse("+source:a | (b & !words:<10) @x date:2024-02 /r/i");
    let options = CompileOptions::default();
    assert_eq!(compile_filter_tree(&tree, &options), compile_filter_tree(&tree, &options));
}

#[test]
fn test_compiled_string_round_trips() {
    let queries = [
        "+source:chatgpt -source:claude ~source:notes ?source:misc",
        "+format:md -format:pdf",
        r#"hello world -noise "exact phrase" title:/v\d+/i draft*"#,
        r#"content:"multi word" -content:"a.b""#,
        "+tags:rust -tags:draft",
        "date:2024",
        "date:2024-03",
        "date:2024-03-05",
        "date:>=2024-01-15 date:<2024-06",
        "date:1704067200000..1704153600000",
        "words:100..500 quality:>=0.5 sim:<=0.9",
        "words:=42 quality:0.25",
        "!(+source:chatgpt & -tags:draft) words:<10",
    ];
    for query in queries {
        let original = compile(query);
        let canonical = compiled_query_to_string(&original);
        let tree = parse(&canonical);
        assert!(tree.parse_errors.is_empty(), "{canonical}: {:?}", tree.parse_errors);
        assert_eq!(
            compile_filter_tree(&tree, &CompileOptions::default()),
            original,
            "{query} -> {canonical}"
        );
    }
}

#[test]
fn test_compiled_string_is_category_ordered() {
    let q = compile("words:>100 +tags:x hello date:2024 +source:chatgpt");
    assert_eq!(
        compiled_query_to_string(&q),
        "+source:chatgpt hello +tags:x date:2024 words:>=100"
    );
}
