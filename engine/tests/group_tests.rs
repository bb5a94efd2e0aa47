use std::collections::{HashMap, HashSet};

use engine::model::socket::SocketRef;
use engine::{
    Node, NodeTree, TreeKind, TypeRegistry, make_group, resolve_types, sort_nodes, ungroup,
};

use uuid::Uuid;

fn named_socket(tree: &NodeTree, node: Uuid, name: &str, output: bool) -> SocketRef {
    let n = tree.node(node).expect("node exists");
    let list = if output { &n.outputs } else { &n.inputs };
    let socket = list.iter().find(|s| s.name == name).expect("socket exists");
    SocketRef::new(node, socket.id)
}

/// A → B → C shader chain with resolved types and sorted order.
fn chain_tree() -> (NodeTree, Uuid, Uuid, Uuid) {
    let registry = TypeRegistry::with_builtin_types();
    let mut tree = NodeTree::new(TreeKind::Shader, "t");
    let a = tree.add_node(Node::new("shader.value", "A"));
    let b = tree.add_node(Node::new("shader.math", "B"));
    let c = tree.add_node(Node::new("shader.math", "C"));
    resolve_types(&registry, &mut tree).unwrap();
    tree.add_link(
        named_socket(&tree, a, "value", true),
        named_socket(&tree, b, "a", false),
    )
    .unwrap();
    tree.add_link(
        named_socket(&tree, b, "value", true),
        named_socket(&tree, c, "a", false),
    )
    .unwrap();
    sort_nodes(&mut tree);
    (tree, a, b, c)
}

/// Connectivity fingerprint that survives node identity changes.
fn connectivity(tree: &NodeTree) -> HashSet<(String, String, String, String)> {
    tree.links
        .iter()
        .filter_map(|link| {
            let from_node = tree.node(link.from.node)?;
            let to_node = tree.node(link.to.node)?;
            Some((
                from_node.type_id.clone(),
                from_node.output(link.from.socket)?.name.clone(),
                to_node.type_id.clone(),
                to_node.input(link.to.socket)?.name.clone(),
            ))
        })
        .collect()
}

fn type_multiset(tree: &NodeTree) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for node in &tree.nodes {
        *counts.entry(node.type_id.clone()).or_insert(0) += 1;
    }
    counts
}

#[test]
fn grouping_exposes_the_crossing_output() {
    let (mut tree, a, b, c) = chain_tree();
    let selection: HashSet<Uuid> = [a, b].into_iter().collect();

    let group = make_group(&mut tree, &selection).unwrap();

    let group_node = tree.node(group).unwrap();
    // A's output is consumed inside the group, so only B's output crosses
    // the boundary.
    assert_eq!(group_node.outputs.len(), 1);
    // A has no inputs; B's "a" is fed internally, so only B's "b" is open.
    assert_eq!(group_node.inputs.len(), 1);

    // The crossing link now runs group → C, through the matching external
    // index.
    let boundary = &group_node.outputs[0];
    assert_ne!(boundary.own_index, 0);
    let link = tree
        .links
        .iter()
        .find(|l| l.to.node == c)
        .expect("link into C survives");
    assert_eq!(link.from.node, group);
    assert_eq!(link.from.socket, boundary.id);

    let interior = group_node.group.as_deref().unwrap();
    assert_eq!(interior.nodes.len(), 2);
    assert_eq!(interior.links.len(), 1);
    let exposed = interior
        .nodes
        .iter()
        .flat_map(|n| n.outputs.iter())
        .find(|s| !s.intern)
        .expect("one interior output is exposed");
    assert_eq!(exposed.own_index, boundary.own_index);
}

#[test]
fn group_then_ungroup_restores_types_and_connectivity() {
    let (mut tree, a, b, _c) = chain_tree();
    let before_types = type_multiset(&tree);
    let before_links = connectivity(&tree);

    let selection: HashSet<Uuid> = [a, b].into_iter().collect();
    let group = make_group(&mut tree, &selection).unwrap();
    ungroup(&mut tree, group).unwrap();

    assert_eq!(type_multiset(&tree), before_types);
    assert_eq!(connectivity(&tree), before_links);
}

#[test]
fn grouping_a_group_is_rejected_without_changes() {
    let (mut tree, a, b, c) = chain_tree();
    let selection: HashSet<Uuid> = [a, b].into_iter().collect();
    let group = make_group(&mut tree, &selection).unwrap();

    let before = tree.clone();
    let nested: HashSet<Uuid> = [group, c].into_iter().collect();
    assert!(make_group(&mut tree, &nested).is_err());
    assert_eq!(tree, before);
}

#[test]
fn straddling_node_aborts_grouping() {
    // A(selected) → X(unselected) → B(selected): X would have to live on
    // both sides of the boundary.
    let registry = TypeRegistry::with_builtin_types();
    let mut tree = NodeTree::new(TreeKind::Shader, "t");
    let a = tree.add_node(Node::new("shader.value", "A"));
    let x = tree.add_node(Node::new("shader.math", "X"));
    let b = tree.add_node(Node::new("shader.math", "B"));
    resolve_types(&registry, &mut tree).unwrap();
    tree.add_link(
        named_socket(&tree, a, "value", true),
        named_socket(&tree, x, "a", false),
    )
    .unwrap();
    tree.add_link(
        named_socket(&tree, x, "value", true),
        named_socket(&tree, b, "a", false),
    )
    .unwrap();
    sort_nodes(&mut tree);

    let before = tree.clone();
    let selection: HashSet<Uuid> = [a, b].into_iter().collect();
    assert!(make_group(&mut tree, &selection).is_err());
    assert_eq!(tree, before);
}

#[test]
fn ungrouping_a_plain_node_is_an_error() {
    let (mut tree, a, _b, _c) = chain_tree();
    assert!(ungroup(&mut tree, a).is_err());
}

#[test]
fn tree_with_group_round_trips_through_json() {
    let (mut tree, a, b, _c) = chain_tree();
    let selection: HashSet<Uuid> = [a, b].into_iter().collect();
    make_group(&mut tree, &selection).unwrap();

    let json = tree.save().unwrap();
    let mut loaded = NodeTree::load(&json).unwrap();

    let registry = TypeRegistry::with_builtin_types();
    resolve_types(&registry, &mut loaded).unwrap();
    sort_nodes(&mut loaded);

    assert_eq!(type_multiset(&tree), type_multiset(&loaded));
    assert_eq!(connectivity(&tree), connectivity(&loaded));
    let group_node = loaded.nodes.iter().find(|n| n.is_group()).unwrap();
    assert_eq!(group_node.outputs.len(), 1);
}
