use engine::model::socket::SocketRef;
use engine::model::sort::{cycle_links, sort_nodes};
use engine::{LEVEL_UNLINKED, Node, NodeTree, TreeKind, TypeRegistry, resolve_types};

use uuid::Uuid;

fn named_socket(tree: &NodeTree, node: Uuid, name: &str, output: bool) -> SocketRef {
    let n = tree.node(node).expect("node exists");
    let list = if output { &n.outputs } else { &n.inputs };
    let socket = list.iter().find(|s| s.name == name).expect("socket exists");
    SocketRef::new(node, socket.id)
}

#[test]
fn chain_is_sorted_with_levels() {
    let registry = TypeRegistry::with_builtin_types();
    let mut tree = NodeTree::new(TreeKind::Shader, "chain");
    // Deliberately inserted sink-first.
    let c = tree.add_node(Node::new("shader.math", "C"));
    let b = tree.add_node(Node::new("shader.math", "B"));
    let a = tree.add_node(Node::new("shader.value", "A"));
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

    let order: Vec<Uuid> = tree.nodes.iter().map(|n| n.id).collect();
    assert_eq!(order, vec![a, b, c]);
    assert_eq!(tree.node(a).unwrap().level, LEVEL_UNLINKED);
    assert_eq!(tree.node(b).unwrap().level, 1);
    assert_eq!(tree.node(c).unwrap().level, 2);
    assert!(cycle_links(&tree).is_empty());
}

#[test]
fn every_noncycle_link_goes_up_in_level() {
    let registry = TypeRegistry::with_builtin_types();
    let mut tree = NodeTree::new(TreeKind::Shader, "diamond");
    let v1 = tree.add_node(Node::new("shader.value", "v1"));
    let v2 = tree.add_node(Node::new("shader.value", "v2"));
    let m1 = tree.add_node(Node::new("shader.math", "m1"));
    let m2 = tree.add_node(Node::new("shader.math", "m2"));
    let join = tree.add_node(Node::new("shader.math", "join"));
    resolve_types(&registry, &mut tree).unwrap();

    for (from, to, input) in [
        (v1, m1, "a"),
        (v2, m2, "a"),
        (m1, join, "a"),
        (m2, join, "b"),
    ] {
        tree.add_link(
            named_socket(&tree, from, "value", true),
            named_socket(&tree, to, input, false),
        )
        .unwrap();
    }

    sort_nodes(&mut tree);
    assert!(cycle_links(&tree).is_empty());

    for link in &tree.links {
        let from = tree.node(link.from.node).unwrap().level;
        let to = tree.node(link.to.node).unwrap().level;
        if from != LEVEL_UNLINKED && to != LEVEL_UNLINKED {
            assert!(from < to, "link must go from lower to higher level");
        }
    }
}

#[test]
fn only_first_flagged_output_stays_active() {
    let registry = TypeRegistry::with_builtin_types();
    let mut tree = NodeTree::new(TreeKind::Compositor, "outputs");
    let source = tree.add_node(Node::new("composite.color", "src"));
    let mut p = Node::new("composite.output", "P");
    p.do_output = true;
    let mut q = Node::new("composite.output", "Q");
    q.do_output = true;
    let p = tree.add_node(p);
    let q = tree.add_node(q);
    resolve_types(&registry, &mut tree).unwrap();

    for sink in [p, q] {
        tree.add_link(
            named_socket(&tree, source, "image", true),
            named_socket(&tree, sink, "image", false),
        )
        .unwrap();
    }

    sort_nodes(&mut tree);

    let active: Vec<Uuid> = tree
        .nodes
        .iter()
        .filter(|n| n.type_id == "composite.output" && n.do_output)
        .map(|n| n.id)
        .collect();
    assert_eq!(active, vec![p]);
}

#[test]
fn file_outputs_are_exempt_from_exclusivity() {
    let registry = TypeRegistry::with_builtin_types();
    let mut tree = NodeTree::new(TreeKind::Compositor, "files");
    let mut f1 = Node::new("composite.file_output", "f1");
    f1.do_output = true;
    let mut f2 = Node::new("composite.file_output", "f2");
    f2.do_output = true;
    tree.add_node(f1);
    tree.add_node(f2);
    resolve_types(&registry, &mut tree).unwrap();

    sort_nodes(&mut tree);

    let active = tree.nodes.iter().filter(|n| n.do_output).count();
    assert_eq!(active, 2);
}

#[test]
fn unflagged_output_type_gets_one_active() {
    let registry = TypeRegistry::with_builtin_types();
    let mut tree = NodeTree::new(TreeKind::Compositor, "auto");
    tree.add_node(Node::new("composite.output", "first"));
    tree.add_node(Node::new("composite.output", "second"));
    resolve_types(&registry, &mut tree).unwrap();

    sort_nodes(&mut tree);

    let active: Vec<&str> = tree
        .nodes
        .iter()
        .filter(|n| n.do_output)
        .map(|n| n.name.as_str())
        .collect();
    assert_eq!(active, vec!["first"]);
}
