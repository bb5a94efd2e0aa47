//! Stack allocator: gives every socket in a (possibly nested) tree a slot in
//! one flat value array.

use crate::model::tree::NodeTree;

/// Assign stack slots across the whole tree, groups included, and return the
/// total slot count.
///
/// Output sockets share one global numbering, so the assigned indices form a
/// contiguous duplicate-free `[0, total)` range; each group instance gets a
/// contiguous private sub-range directly after the group node's own outputs.
/// Re-running the allocator invalidates every previously assigned index.
pub fn allocate(tree: &mut NodeTree) -> usize {
    allocate_range(tree, 0)
}

fn allocate_range(tree: &mut NodeTree, start: usize) -> usize {
    let mut index = start;
    let mut ext_in = 0usize;
    let mut ext_out = 0usize;

    for node in &mut tree.nodes {
        for socket in &mut node.inputs {
            // Inputs read the producer's slot (or their own default); they
            // only need an external index for group boundary wiring.
            socket.stack_index = None;
            socket.stack_index_ext = if socket.intern {
                None
            } else {
                let at = ext_in;
                ext_in += 1;
                Some(at)
            };
        }
        for socket in &mut node.outputs {
            socket.stack_index = Some(index);
            index += 1;
            socket.stack_index_ext = if socket.intern {
                None
            } else {
                let at = ext_out;
                ext_out += 1;
                Some(at)
            };
        }
        if let Some(group) = node.group.as_mut() {
            let base = index;
            index = allocate_range(group, base);
            node.stack_base = base;
            node.stack_span = index - base;
        }
    }

    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node::Node;
    use crate::model::socket::{Socket, SocketType};
    use crate::model::tree::TreeKind;

    fn node_with_outputs(name: &str, outputs: usize) -> Node {
        let mut node = Node::new("test.op", name);
        node.inputs.push(Socket::new("in", SocketType::Value));
        for i in 0..outputs {
            node.outputs
                .push(Socket::new(&format!("out{}", i), SocketType::Value));
        }
        node
    }

    #[test]
    fn indices_are_contiguous_and_unique() {
        let mut tree = NodeTree::new(TreeKind::Shader, "t");
        tree.add_node(node_with_outputs("a", 2));
        tree.add_node(node_with_outputs("b", 1));
        tree.add_node(node_with_outputs("c", 3));

        let total = allocate(&mut tree);
        assert_eq!(total, 6);

        let mut seen: Vec<usize> = tree
            .nodes
            .iter()
            .flat_map(|n| n.outputs.iter())
            .filter_map(|s| s.stack_index)
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn rerun_reassigns_from_zero() {
        let mut tree = NodeTree::new(TreeKind::Shader, "t");
        tree.add_node(node_with_outputs("a", 2));
        let first = allocate(&mut tree);
        tree.add_node(node_with_outputs("b", 2));
        let second = allocate(&mut tree);

        assert_eq!(first, 2);
        assert_eq!(second, 4);
        assert_eq!(tree.nodes[0].outputs[0].stack_index, Some(0));
    }
}
