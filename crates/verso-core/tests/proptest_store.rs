use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use proptest::prelude::*;
use verso_core::Oid;
use verso_core::config::parse_schema_config;
use verso_core::schema::{CapabilityId, Registry, ReftypeId};
use verso_core::store::{MemoryObjectMap, ReferenceStore};

const SCHEMA: &str = r#"
[[capability]]
name = "node"

[[capability.field]]
name = "children"
kind = "list"
reftype = "node_children"

[[capability.field]]
name = "parent"
kind = "reference"
reftype = "node_parent"

[[reftype]]
name = "node_children"
source = "node"
field = "children"
target = "resource"

[[reftype]]
name = "node_parent"
source = "node"
field = "parent"
target = "resource"
"#;

const NODES: u64 = 12;

struct Graph {
    store: ReferenceStore,
    node: CapabilityId,
    children: ReftypeId,
    parent: ReftypeId,
}

fn graph() -> Graph {
    let config = parse_schema_config(SCHEMA).expect("schema parses");
    let registry = Registry::from_config(&config).expect("schema builds");
    let node = registry.capability_id("node").expect("node");
    let children = registry.reftype_id("node_children").expect("children");
    let parent = registry.reftype_id("node_parent").expect("parent");

    let mut index = MemoryObjectMap::new();
    for raw in 1..=NODES {
        index.register(Oid::new(raw), vec![node]);
    }
    Graph {
        store: ReferenceStore::new(Arc::new(registry), index),
        node,
        children,
        parent,
    }
}

fn arb_edges() -> impl Strategy<Value = Vec<(u64, u64)>> {
    prop::collection::vec((1..=NODES, 1..=NODES), 0..40)
}

/// Reachability computed without the store, for comparison.
fn reachable(edges: &[(u64, u64)], from: &[u64]) -> HashSet<u64> {
    let mut adjacency: HashMap<u64, Vec<u64>> = HashMap::new();
    for &(source, target) in edges {
        adjacency.entry(source).or_default().push(target);
    }
    let mut seen: HashSet<u64> = from.iter().copied().collect();
    let mut queue: VecDeque<u64> = from.iter().copied().collect();
    while let Some(current) = queue.pop_front() {
        for &next in adjacency.get(&current).into_iter().flatten() {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen
}

fn load(graph: &mut Graph, edges: &[(u64, u64)]) {
    let mut grouped: HashMap<u64, Vec<Oid>> = HashMap::new();
    for &(source, target) in edges {
        grouped.entry(source).or_default().push(Oid::new(target));
    }
    for (source, targets) in grouped {
        graph
            .store
            .set_references(Oid::new(source), targets, graph.children)
            .expect("set children");
    }
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(256))]

    #[test]
    fn set_then_get_preserves_first_occurrence_order(
        targets in prop::collection::vec(1..=NODES + 4, 0..16),
    ) {
        let mut g = graph();
        let source = Oid::new(1);
        g.store
            .set_references(source, targets.iter().copied().map(Oid::new), g.children)
            .expect("set");

        let mut seen = HashSet::new();
        let expected: Vec<Oid> = targets
            .iter()
            .copied()
            .filter(|&t| t <= NODES && seen.insert(t))
            .map(Oid::new)
            .collect();
        let base = g.store.registry().builtins().sheet_reference;
        let actual: Vec<Oid> = g.store.get_references(source, g.node, base).map(|r| r.target).collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn grouped_queries_never_hold_empty_fields(
        children in prop::collection::vec(1..=NODES, 0..4),
        parent in prop::option::of(1..=NODES),
    ) {
        let mut g = graph();
        let source = Oid::new(1);
        g.store
            .set_references(source, children.iter().copied().map(Oid::new), g.children)
            .expect("children");
        g.store
            .set_references(source, parent.map(Oid::new), g.parent)
            .expect("parent");

        let grouped = g.store.get_references_for_capability(source, g.node);
        prop_assert!(grouped.values().all(|targets| !targets.is_empty()));
        prop_assert_eq!(grouped.contains_key("children"), !children.is_empty());
        prop_assert_eq!(grouped.contains_key("parent"), parent.is_some());
    }

    #[test]
    fn subtree_membership_is_reflexive(raw in 1..=NODES, edges in arb_edges()) {
        let mut g = graph();
        load(&mut g, &edges);
        prop_assert!(g.store.is_in_subtree(Oid::new(raw), &[Oid::new(raw)]));
    }

    #[test]
    fn subtree_membership_matches_reachability(
        edges in arb_edges(),
        roots in prop::collection::vec(1..=NODES, 0..3),
        node in 1..=NODES,
    ) {
        let mut g = graph();
        load(&mut g, &edges);

        let expected = reachable(&edges, &roots).contains(&node);
        let ancestors: Vec<Oid> = roots.iter().copied().map(Oid::new).collect();
        prop_assert_eq!(g.store.is_in_subtree(Oid::new(node), &ancestors), expected);

        if let Some(&root) = roots.first() {
            let listed: HashSet<u64> = g.store.subtree(Oid::new(root)).into_iter().map(Oid::get).collect();
            prop_assert_eq!(listed, reachable(&edges, &[root]));
        }
    }

    #[test]
    fn back_references_mirror_forward_edges(edges in arb_edges(), node in 1..=NODES) {
        let mut g = graph();
        load(&mut g, &edges);

        let resource = g.store.registry().builtins().resource;
        let family = g.store.registry().builtins().sheet_to_sheet;
        let mut sources: Vec<u64> = g.store
            .get_back_references(Oid::new(node), resource, family)
            .map(|r| r.source.get())
            .collect();
        sources.sort_unstable();

        let mut expected: Vec<u64> = edges
            .iter()
            .filter(|&&(_, target)| target == node)
            .map(|&(source, _)| source)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        expected.sort_unstable();
        prop_assert_eq!(sources, expected);
    }
}
