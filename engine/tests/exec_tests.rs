use std::collections::HashSet;
use std::sync::Arc;

use engine::model::socket::{SocketRef, SocketType};
use engine::{
    Node, NodeClass, NodeTree, SocketTemplate, SocketValue, TreeKind, TypeDescriptor,
    TypeRegistry, begin_exec, end_exec, exec_tree, make_group, resolve_types, sort_nodes,
    stack_value,
};

use uuid::Uuid;

fn named_socket(tree: &NodeTree, node: Uuid, name: &str, output: bool) -> SocketRef {
    let n = tree.node(node).expect("node exists");
    let list = if output { &n.outputs } else { &n.inputs };
    let socket = list.iter().find(|s| s.name == name).expect("socket exists");
    SocketRef::new(node, socket.id)
}

fn caller() -> Arc<()> {
    Arc::new(())
}

/// value(2) and value(3) feeding math(add).
fn adder_tree() -> (NodeTree, Uuid, Uuid, Uuid) {
    let registry = TypeRegistry::with_builtin_types();
    let mut tree = NodeTree::new(TreeKind::Shader, "adder");
    let mut v1 = Node::new("shader.value", "two");
    v1.properties.set("value", 2.0);
    let v1 = tree.add_node(v1);
    let mut v2 = Node::new("shader.value", "three");
    v2.properties.set("value", 3.0);
    let v2 = tree.add_node(v2);
    let mut m = Node::new("shader.math", "sum");
    m.properties.set("operation", "add");
    let m = tree.add_node(m);
    resolve_types(&registry, &mut tree).unwrap();
    tree.add_link(
        named_socket(&tree, v1, "value", true),
        named_socket(&tree, m, "a", false),
    )
    .unwrap();
    tree.add_link(
        named_socket(&tree, v2, "value", true),
        named_socket(&tree, m, "b", false),
    )
    .unwrap();
    sort_nodes(&mut tree);
    (tree, v1, v2, m)
}

#[test]
fn sequential_pass_computes_the_sum() {
    let (mut tree, _v1, _v2, m) = adder_tree();
    begin_exec(&mut tree, 1).unwrap();
    exec_tree(&mut tree, caller(), 0).unwrap();

    let out = stack_value(&tree, named_socket(&tree, m, "value", true), 0).unwrap();
    assert_eq!(out, SocketValue::Value(5.0));
    end_exec(&mut tree);
}

#[test]
fn begin_exec_twice_is_a_no_op() {
    let (mut tree, _v1, _v2, m) = adder_tree();
    begin_exec(&mut tree, 2).unwrap();
    let before: Vec<Option<usize>> = tree
        .nodes
        .iter()
        .flat_map(|n| n.outputs.iter())
        .map(|s| s.stack_index)
        .collect();

    begin_exec(&mut tree, 7).unwrap();
    let after: Vec<Option<usize>> = tree
        .nodes
        .iter()
        .flat_map(|n| n.outputs.iter())
        .map(|s| s.stack_index)
        .collect();
    assert_eq!(before, after);

    // Still two thread slots from the first call.
    exec_tree(&mut tree, caller(), 1).unwrap();
    assert!(exec_tree(&mut tree, caller(), 2).is_err());
    let _ = stack_value(&tree, named_socket(&tree, m, "value", true), 1).unwrap();
    end_exec(&mut tree);
}

#[test]
fn end_exec_releases_everything_and_is_reentrant() {
    let (mut tree, _v1, _v2, m) = adder_tree();
    begin_exec(&mut tree, 1).unwrap();
    end_exec(&mut tree);
    end_exec(&mut tree);

    assert!(stack_value(&tree, named_socket(&tree, m, "value", true), 0).is_none());
    assert!(
        tree.nodes
            .iter()
            .flat_map(|n| n.outputs.iter())
            .all(|s| s.stack_index.is_none())
    );
    assert!(exec_tree(&mut tree, caller(), 0).is_err());
}

#[test]
fn thread_slots_are_independent() {
    let (mut tree, _v1, _v2, m) = adder_tree();
    begin_exec(&mut tree, 2).unwrap();
    exec_tree(&mut tree, caller(), 0).unwrap();
    exec_tree(&mut tree, caller(), 1).unwrap();
    for thread in 0..2 {
        let out = stack_value(&tree, named_socket(&tree, m, "value", true), thread).unwrap();
        assert_eq!(out, SocketValue::Value(5.0));
    }
    end_exec(&mut tree);
}

#[test]
fn stack_indices_stay_contiguous_across_group_nesting() {
    let (mut tree, _v1, v2, m) = adder_tree();
    let selection: HashSet<Uuid> = [v2, m].into_iter().collect();
    make_group(&mut tree, &selection).unwrap();

    begin_exec(&mut tree, 1).unwrap();

    fn collect_indices(tree: &NodeTree, seen: &mut Vec<usize>) {
        for node in &tree.nodes {
            for socket in &node.outputs {
                if let Some(index) = socket.stack_index {
                    seen.push(index);
                }
            }
            if let Some(group) = node.group.as_deref() {
                collect_indices(group, seen);
            }
        }
    }
    let mut seen = Vec::new();
    collect_indices(&tree, &mut seen);
    seen.sort_unstable();
    let expected: Vec<usize> = (0..seen.len()).collect();
    assert_eq!(seen, expected, "slots form a duplicate-free [0, total) range");
    assert_eq!(engine::exec::stack_size(&tree), Some(seen.len()));
    end_exec(&mut tree);
}

#[test]
fn group_instances_evaluate_through_their_boundary() {
    let (mut tree, _v1, v2, m) = adder_tree();
    let selection: HashSet<Uuid> = [v2, m].into_iter().collect();
    let group = make_group(&mut tree, &selection).unwrap();

    begin_exec(&mut tree, 1).unwrap();
    exec_tree(&mut tree, caller(), 0).unwrap();

    let boundary = SocketRef::new(group, tree.node(group).unwrap().outputs[0].id);
    let out = stack_value(&tree, boundary, 0).unwrap();
    assert_eq!(out, SocketValue::Value(5.0));
    end_exec(&mut tree);
}

#[test]
fn nodes_without_callbacks_pass_through_silently() {
    let mut registry = TypeRegistry::with_builtin_types();
    registry.register(
        TreeKind::Shader,
        TypeDescriptor::new("shader.stub", "Stub", NodeClass::Operator)
            .with_inputs(vec![SocketTemplate::new("in", SocketType::Value)])
            .with_outputs(vec![SocketTemplate::new("out", SocketType::Value)]),
    );

    let mut tree = NodeTree::new(TreeKind::Shader, "stubbed");
    let stub = tree.add_node(Node::new("shader.stub", "stub"));
    let mut m = Node::new("shader.math", "sum");
    m.properties.set("operation", "add");
    let m = tree.add_node(m);
    resolve_types(&registry, &mut tree).unwrap();
    tree.add_link(
        named_socket(&tree, stub, "out", true),
        named_socket(&tree, m, "a", false),
    )
    .unwrap();
    sort_nodes(&mut tree);

    begin_exec(&mut tree, 1).unwrap();
    exec_tree(&mut tree, caller(), 0).unwrap();

    // The stub produced nothing; math treats the missing value as zero.
    let out = stack_value(&tree, named_socket(&tree, m, "value", true), 0).unwrap();
    assert_eq!(out, SocketValue::Value(0.0));
    end_exec(&mut tree);
}
