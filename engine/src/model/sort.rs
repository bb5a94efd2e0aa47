//! Dependency sorter: orders a tree's nodes so producers precede consumers
//! and assigns each node its topological depth.
//!
//! Sorting always terminates, even on cyclic graphs; a cycle merely leaves a
//! back-edge (source level >= sink level) that the executors detect and skip
//! at run time.

use std::collections::{HashMap, HashSet};

use log::warn;
use uuid::Uuid;

use super::node::LEVEL_UNLINKED;
use super::tree::NodeTree;
use crate::registry::NodeClass;

/// Sort `tree.nodes` into dependency order (DFS finish order) and assign
/// levels, then resolve which output nodes are active.
///
/// Must run after every topology change before the order is relied on.
pub fn sort_nodes(tree: &mut NodeTree) {
    // Group interiors sort independently; their order matters to the stack
    // allocator and the group executor just like the parent's does.
    for node in &mut tree.nodes {
        if let Some(group) = node.group.as_mut() {
            sort_nodes(group);
        }
    }

    let count = tree.nodes.len();
    let index_of: HashMap<Uuid, usize> = tree
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id, i))
        .collect();
    // Effective input-link map, rebuilt from scratch on every sort so stale
    // entries never leak: input socket id -> source node index.
    let mut source_of: HashMap<Uuid, usize> = HashMap::new();
    for link in &tree.links {
        if let Some(&src) = index_of.get(&link.from.node) {
            source_of.insert(link.to.socket, src);
        }
    }

    let mut visited = vec![false; count];
    let mut levels = vec![0u16; count];
    let mut order: Vec<usize> = Vec::with_capacity(count);

    for start in 0..count {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        // Explicit DFS stack of (node index, next input to inspect).
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        while let Some(frame) = stack.last_mut() {
            let (current, cursor) = (frame.0, frame.1);
            let node = &tree.nodes[current];

            let mut descended = false;
            let mut next_cursor = cursor;
            while next_cursor < node.inputs.len() {
                let socket_id = node.inputs[next_cursor].id;
                next_cursor += 1;
                if let Some(&src) = source_of.get(&socket_id) {
                    if !visited[src] {
                        visited[src] = true;
                        frame.1 = next_cursor;
                        stack.push((src, 0));
                        descended = true;
                        break;
                    }
                }
            }
            if descended {
                continue;
            }

            // All producers emitted (or on the stack above us): finish this
            // node. In-progress ancestors still carry level 0, which is what
            // makes a cycle come out as a detectable back-edge.
            let mut has_input_link = false;
            let mut max_source_level = 0u16;
            for socket in &node.inputs {
                if let Some(&src) = source_of.get(&socket.id) {
                    has_input_link = true;
                    let source_level = levels[src];
                    if source_level != LEVEL_UNLINKED {
                        max_source_level = max_source_level.max(source_level);
                    }
                }
            }
            levels[current] = if has_input_link {
                1 + max_source_level
            } else {
                LEVEL_UNLINKED
            };
            order.push(current);
            stack.pop();
        }
    }

    for (index, level) in levels.iter().enumerate() {
        tree.nodes[index].level = *level;
    }
    let mut slots: Vec<Option<_>> = std::mem::take(&mut tree.nodes)
        .into_iter()
        .map(Some)
        .collect();
    tree.nodes = order.iter().filter_map(|&i| slots[i].take()).collect();

    resolve_active_outputs(tree);
}

/// Keep at most one active output node per output type: the first flagged
/// node of a type wins, later ones are cleared, and if none is flagged the
/// first encountered gets it. File-style outputs opt out of exclusivity and
/// all stay active.
fn resolve_active_outputs(tree: &mut NodeTree) {
    let mut first_of_type: Vec<(String, usize)> = Vec::new();
    let mut active: HashSet<String> = HashSet::new();

    for index in 0..tree.nodes.len() {
        let Some(info) = tree.nodes[index].typeinfo.clone() else {
            continue;
        };
        if info.class != NodeClass::Output || !info.exclusive_active {
            continue;
        }
        if !first_of_type.iter().any(|(t, _)| *t == info.type_id) {
            first_of_type.push((info.type_id.clone(), index));
        }
        if tree.nodes[index].do_output && !active.insert(info.type_id.clone()) {
            tree.nodes[index].do_output = false;
        }
    }

    for (type_id, index) in first_of_type {
        if !active.contains(&type_id) {
            tree.nodes[index].do_output = true;
        }
    }
}

/// Enumerate links the last sort left as back-edges: the source's level is
/// not strictly below the sink's, and neither end is an unlinked leaf.
pub fn cycle_links(tree: &NodeTree) -> Vec<Uuid> {
    let level_of: HashMap<Uuid, u16> = tree.nodes.iter().map(|n| (n.id, n.level)).collect();
    tree.links
        .iter()
        .filter(|link| {
            match (level_of.get(&link.from.node), level_of.get(&link.to.node)) {
                (Some(&from), Some(&to)) => {
                    from != LEVEL_UNLINKED && to != LEVEL_UNLINKED && from >= to
                }
                _ => {
                    warn!("link {} references a node outside the tree", link.id);
                    false
                }
            }
        })
        .map(|link| link.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node::Node;
    use crate::model::socket::{Socket, SocketRef, SocketType};
    use crate::model::tree::TreeKind;

    fn chain_node(name: &str) -> Node {
        let mut node = Node::new("test.op", name);
        node.inputs.push(Socket::new("in", SocketType::Value));
        node.outputs.push(Socket::new("out", SocketType::Value));
        node
    }

    fn connect(tree: &mut NodeTree, from: Uuid, to: Uuid) {
        let from_sock = tree.node(from).unwrap().outputs[0].id;
        let to_sock = tree.node(to).unwrap().inputs[0].id;
        tree.add_link(SocketRef::new(from, from_sock), SocketRef::new(to, to_sock))
            .unwrap();
    }

    #[test]
    fn linear_chain_levels() {
        let mut tree = NodeTree::new(TreeKind::Shader, "t");
        // Insert in reverse so the sort has work to do.
        let c = tree.add_node(chain_node("c"));
        let b = tree.add_node(chain_node("b"));
        let a = tree.add_node(chain_node("a"));
        connect(&mut tree, a, b);
        connect(&mut tree, b, c);

        sort_nodes(&mut tree);

        let order: Vec<Uuid> = tree.nodes.iter().map(|n| n.id).collect();
        assert_eq!(order, vec![a, b, c]);
        assert_eq!(tree.node(a).unwrap().level, LEVEL_UNLINKED);
        assert_eq!(tree.node(b).unwrap().level, 1);
        assert_eq!(tree.node(c).unwrap().level, 2);
        assert!(cycle_links(&tree).is_empty());
    }

    #[test]
    fn two_cycle_leaves_one_back_edge() {
        let mut tree = NodeTree::new(TreeKind::Shader, "t");
        let x = tree.add_node(chain_node("x"));
        let y = tree.add_node(chain_node("y"));
        connect(&mut tree, y, x);
        connect(&mut tree, x, y);

        sort_nodes(&mut tree);

        assert_eq!(cycle_links(&tree).len(), 1);
    }

    #[test]
    fn resort_is_a_fixed_point() {
        let mut tree = NodeTree::new(TreeKind::Shader, "t");
        let c = tree.add_node(chain_node("c"));
        let a = tree.add_node(chain_node("a"));
        let b = tree.add_node(chain_node("b"));
        connect(&mut tree, a, b);
        connect(&mut tree, b, c);

        sort_nodes(&mut tree);
        let first: Vec<(Uuid, u16)> = tree.nodes.iter().map(|n| (n.id, n.level)).collect();
        sort_nodes(&mut tree);
        let second: Vec<(Uuid, u16)> = tree.nodes.iter().map(|n| (n.id, n.level)).collect();
        assert_eq!(first, second);
    }
}
