use crate::{
    config::Config,
    filter::{compile_filter_tree, parse, parse_query, CompileOptions, FilterNode, ParseOptions},
    stacks::{CreateOptions, StackStore},
};

fn store_with(stacks: &[(&str, &str)]) -> StackStore {
    let store = StackStore::in_memory(&Config::default());
    for (name, query) in stacks {
        store.create(name, query, CreateOptions::default()).unwrap();
    }
    store
}

#[test]
fn test_resolved_reference_keeps_name() {
    let store = store_with(&[("phil", "+source:chatgpt")]);
    let tree = parse_query("@phil & words:>100", &ParseOptions::with_stacks(&store));
    assert!(tree.parse_errors.is_empty());
    assert!(tree.parse_warnings.is_empty());

    let root = tree.root.as_ref().unwrap();
    let FilterNode::StackRef { name, resolved } = &root.children()[0] else {
        panic!("expected a stack reference, got {root:?}");
    };
    assert_eq!(name, "phil");
    assert_eq!(resolved.as_deref(), parse("+source:chatgpt").root.as_ref());

    let q = compile_filter_tree(&tree, &CompileOptions::default());
    assert_eq!(q.source_types, vec!["chatgpt"]);
    assert_eq!(q.min_words, Some(100));
}

#[test]
fn test_reference_names_are_normalized() {
    let store = store_with(&[("Deep Work", "+tags:focus")]);
    let tree = parse_query("@deep-work", &ParseOptions::with_stacks(&store));
    assert!(tree.parse_warnings.is_empty());
    let q = compile_filter_tree(&tree, &CompileOptions::default());
    assert_eq!(q.tags, vec!["focus"]);
}

#[test]
fn test_unresolved_reference() {
    let store = store_with(&[]);
    let tree = parse_query("@nonexistent", &ParseOptions::with_stacks(&store));
    assert!(tree.parse_errors.is_empty());
    assert_eq!(tree.parse_warnings.len(), 1);
    assert_eq!(
        tree.root,
        Some(FilterNode::StackRef {
            name: "nonexistent".into(),
            resolved: None
        })
    );

    let q = compile_filter_tree(&tree, &CompileOptions::default());
    assert!(!q.has_filters());
}

#[test]
fn test_nested_references_resolve() {
    let store = store_with(&[("base", "+source:chatgpt"), ("long", "@base words:>1000")]);
    let tree = parse_query("@long -tags:draft", &ParseOptions::with_stacks(&store));
    assert!(!tree.has_errors());

    let q = compile_filter_tree(&tree, &CompileOptions::default());
    assert_eq!(q.source_types, vec!["chatgpt"]);
    assert_eq!(q.min_words, Some(1000));
    assert_eq!(q.exclude_tags, vec!["draft"]);
}

#[test]
fn test_negated_reference_inverts() {
    let store = store_with(&[("phil", "+source:chatgpt")]);
    let tree = parse_query("!@phil", &ParseOptions::with_stacks(&store));
    let q = compile_filter_tree(&tree, &CompileOptions::default());
    assert_eq!(q.exclude_source_types, vec!["chatgpt"]);
}

#[test]
fn test_cyclic_reference_is_an_error() {
    let store = store_with(&[("a", "@b"), ("b", "@a")]);
    let tree = parse_query("@a", &ParseOptions::with_stacks(&store));
    assert!(tree.has_errors());
    assert!(tree.parse_errors[0].message.contains("@a -> @b -> @a"), "{:?}", tree.parse_errors);
    assert_eq!(tree.parse_errors[0].position, 0);
}

#[test]
fn test_self_reference_is_an_error() {
    let store = store_with(&[("me", "+tags:x | @me")]);
    let tree = parse_query("@me", &ParseOptions::with_stacks(&store));
    assert!(tree.has_errors());
}

#[test]
fn test_reference_depth_is_bounded() {
    let names: Vec<String> = (0..12).map(|i| format!("s{i}")).collect();
    let store = StackStore::in_memory(&Config::default());
    for (i, name) in names.iter().enumerate() {
        let query = match names.get(i + 1) {
            Some(next) => format!("@{next}"),
            None => "+tags:end".to_string(),
        };
        store.create(name, &query, CreateOptions::default()).unwrap();
    }

    let options = ParseOptions {
        max_depth: 4,
        ..ParseOptions::with_stacks(&store)
    };
    let tree = parse_query("@s0", &options);
    assert!(tree
        .parse_errors
        .iter()
        .any(|e| e.message.contains("deeper than 4")));
}

#[test]
fn test_errors_inside_stack_are_reported_at_reference() {
    let store = store_with(&[("broken", "+source: & +tags:x")]);
    let tree = parse_query("hello @broken", &ParseOptions::with_stacks(&store));
    assert_eq!(tree.parse_errors.len(), 1);
    assert!(tree.parse_errors[0].message.starts_with("in @broken:"));
    assert_eq!(tree.parse_errors[0].position, 6);
    assert_eq!(tree.parse_errors[0].length, 7);

    // the valid part of the stack still applies
    let q = compile_filter_tree(&tree, &CompileOptions::default());
    assert_eq!(q.tags, vec!["x"]);
}

#[test]
fn test_wide_fan_out_resolves_quickly() {
    let store = StackStore::in_memory(&Config::default());
    store.create("s7", "+tags:x", CreateOptions::default()).unwrap();

    let started = std::time::Instant::now();
    for level in (0..7).rev() {
        let query = vec![format!("@s{}", level + 1); 8].join(" | ");
        store
            .create(&format!("s{level}"), &query, CreateOptions::default())
            .unwrap();
    }
    store.record_usage("s0").unwrap();

    let tree = parse_query("@s0 & @s0", &ParseOptions::with_stacks(&store));
    let q = compile_filter_tree(&tree, &CompileOptions::default());
    assert!(started.elapsed() < std::time::Duration::from_secs(2), "{:?}", started.elapsed());

    assert!(!tree.has_errors(), "{:?}", tree.parse_errors);
    assert_eq!(q.tags, vec!["x"]);
    assert!(store.get("s0").unwrap().tree.parse_errors.is_empty());
}

#[test]
fn test_repeated_references_share_one_subtree() {
    let store = store_with(&[("phil", "+source:chatgpt")]);
    let tree = parse_query("@phil | @phil", &ParseOptions::with_stacks(&store));
    let resolved: Vec<_> = tree
        .root
        .as_ref()
        .unwrap()
        .children()
        .iter()
        .map(|child| match child {
            FilterNode::StackRef {
                resolved: Some(resolved),
                ..
            } => resolved.clone(),
            other => panic!("expected a resolved reference, got {other:?}"),
        })
        .collect();
    assert_eq!(resolved.len(), 2);
    assert!(std::sync::Arc::ptr_eq(&resolved[0], &resolved[1]));
}
