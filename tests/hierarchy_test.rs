mod helpers;

use helpers::{raw, test_engine, test_options, train};
use mnemograph::engine::Engine;
use mnemograph::graph::types::NodeId;
use mnemograph::graph::{Graph, GraphConfig};

/// Every hierarchy's payload is its children's payloads concatenated, and
/// its level is one above its highest child.
fn assert_hierarchies_consistent(graph: &Graph) {
    for (id, node) in graph.nodes().filter(|(_, n)| n.is_hierarchy()) {
        let mut expected = Vec::new();
        let mut max_child = 0;
        for child in &node.children {
            expected.extend_from_slice(&graph.payload(*child).unwrap());
            max_child = max_child.max(graph.node(*child).unwrap().level);
        }
        assert_eq!(graph.payload(id).unwrap().as_ref(), expected.as_slice(), "node {id}");
        assert_eq!(node.level, max_child + 1, "node {id}");
        assert_eq!(node.payload_len, expected.len());
    }
}

#[test]
fn repeated_pair_forms_level_one_node() {
    let mut engine = test_engine();
    train(&mut engine, "ab", 5);

    let graph = engine.graph();
    let level_one: Vec<NodeId> = graph.nodes_at_level(1).to_vec();
    assert!(
        level_one
            .iter()
            .any(|id| graph.payload(*id).unwrap().as_ref() == b"ab"),
        "no level-1 node for \"ab\""
    );
    assert_hierarchies_consistent(graph);
}

#[test]
fn one_observation_forms_nothing() {
    let mut engine = test_engine();
    train(&mut engine, "ab", 1);
    assert!(engine.graph().nodes_at_level(1).is_empty());
}

#[test]
fn whole_chunk_folds_into_one_node() {
    let mut engine = test_engine();
    train(&mut engine, "abcd", 2);

    let graph = engine.graph();
    let (len, candidates) = graph.longest_match(b"abcd").unwrap();
    assert_eq!(len, 4);
    let h = candidates[0];
    assert_eq!(graph.node(h).unwrap().children.len(), 4);
    assert_eq!(graph.node(raw(graph, b"a")).unwrap().parent_count(), 1);
}

#[test]
fn known_hierarchy_becomes_the_learning_unit() {
    let mut engine = test_engine();
    train(&mut engine, "abcd", 2);
    let edges = engine.edge_count();

    engine.write_input(b"abcd");
    let result = engine.process_with(false).unwrap();
    assert_eq!(result.learned.units, 1);
    assert_eq!(result.learned.hierarchies_formed, 0);
    assert_eq!(engine.edge_count(), edges);
}

#[test]
fn duplicate_hierarchies_are_not_created() {
    let mut engine = test_engine();
    train(&mut engine, "xy", 2);
    train(&mut engine, "zxy", 3);
    let graph = engine.graph();
    let xy: Vec<_> = graph
        .lookup(b"xy")
        .iter()
        .filter(|id| graph.node(**id).unwrap().is_hierarchy())
        .collect();
    assert_eq!(xy.len(), 1);
}

#[test]
fn large_hierarchies_rebuild_their_payload() {
    let mut options = test_options();
    options.graph = GraphConfig {
        inline_payload_limit: 2,
        ..GraphConfig::default()
    };
    let mut engine = Engine::in_memory(options);
    for line in ["the cat sat", "the cat ran", "a cat sat", "the dog sat"] {
        train(&mut engine, line, 3);
    }

    let graph = engine.graph();
    assert!(graph.max_level() >= 1);
    assert!(graph
        .nodes()
        .any(|(_, n)| n.is_hierarchy() && n.stored_payload().is_none()));
    assert_hierarchies_consistent(graph);
}

#[test]
fn hierarchy_wiring_is_bidirectional() {
    let mut engine = test_engine();
    train(&mut engine, "ab", 2);
    let graph = engine.graph();
    let h = graph.nodes_at_level(1)[0];
    for child in &graph.node(h).unwrap().children {
        assert!(graph.find_edge(h, *child).is_some());
        assert!(graph.find_edge(*child, h).is_some());
    }
}
