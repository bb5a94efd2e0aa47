//! Group flattening: turn a selected subgraph into a nested tree, or splice
//! a group's contents back into its parent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::warn;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::link::Link;
use crate::model::node::{GROUP_TYPE, Node};
use crate::model::socket::{Socket, SocketRef};
use crate::model::sort::sort_nodes;
use crate::model::tree::NodeTree;
use crate::registry::{NodeClass, SocketTemplate, TypeDescriptor};

/// Synthesize the boundary descriptor of a group tree.
///
/// Sockets consumed by an in-group link are tagged internal; every other
/// socket is exposed and receives a stable non-zero `own_index` (an index
/// assigned once is reused forever, so existing group instances never
/// silently rewire). Nesting groups inside groups is unsupported and fails
/// fast.
pub fn build_group_type(group_tree: &mut NodeTree) -> Result<TypeDescriptor, EngineError> {
    if let Some(nested) = group_tree.nodes.iter().find(|n| n.is_group()) {
        return Err(EngineError::group(format!(
            "tree '{}' contains the group node '{}'; groups cannot nest",
            group_tree.name, nested.name
        )));
    }

    let driven: HashSet<Uuid> = group_tree.links.iter().map(|l| l.to.socket).collect();
    let consumed: HashSet<Uuid> = group_tree.links.iter().map(|l| l.from.socket).collect();

    let mut next_index = group_tree
        .nodes
        .iter()
        .flat_map(|n| n.inputs.iter().chain(n.outputs.iter()))
        .map(|s| s.own_index)
        .max()
        .unwrap_or(0)
        + 1;

    let mut inputs: Vec<SocketTemplate> = Vec::new();
    let mut outputs: Vec<SocketTemplate> = Vec::new();
    for node in &mut group_tree.nodes {
        for socket in &mut node.inputs {
            socket.intern = driven.contains(&socket.id);
            if !socket.intern {
                if socket.own_index == 0 {
                    socket.own_index = next_index;
                    next_index += 1;
                }
                inputs.push(boundary_template(socket));
            }
        }
        for socket in &mut node.outputs {
            socket.intern = consumed.contains(&socket.id);
            if !socket.intern {
                if socket.own_index == 0 {
                    socket.own_index = next_index;
                    next_index += 1;
                }
                outputs.push(boundary_template(socket));
            }
        }
    }

    Ok(TypeDescriptor::new(GROUP_TYPE, &group_tree.name, NodeClass::Group)
        .with_inputs(inputs)
        .with_outputs(outputs))
}

fn boundary_template(socket: &Socket) -> SocketTemplate {
    let mut template = SocketTemplate::new(&socket.name, socket.data_type)
        .with_default(socket.default_value)
        .with_range(socket.min, socket.max);
    template.own_index = socket.own_index;
    template
}

/// Collapse the selected nodes into a new group node.
///
/// Fails without changing the tree when the selection contains a group node,
/// or when some unselected node both consumes from and feeds into the
/// selection (it would have to sit inside and outside the group at once).
/// Boundary links are rewritten to the group node's matching external
/// socket; a boundary link whose socket has no external counterpart is
/// dropped with a diagnostic. Returns the new group node's id.
pub fn make_group(tree: &mut NodeTree, selection: &HashSet<Uuid>) -> Result<Uuid, EngineError> {
    if selection.is_empty() {
        return Err(EngineError::group("nothing selected"));
    }
    for id in selection {
        let node = tree.require_node(*id)?;
        if node.is_group() {
            return Err(EngineError::group(format!(
                "selected node '{}' is itself a group; groups cannot nest",
                node.name
            )));
        }
    }

    // An unselected node with both an inbound edge from the selection and an
    // outbound edge into it cannot be placed on either side.
    let mut fed_by_selection: HashSet<Uuid> = HashSet::new();
    let mut feeds_selection: HashSet<Uuid> = HashSet::new();
    for link in &tree.links {
        let from_selected = selection.contains(&link.from.node);
        let to_selected = selection.contains(&link.to.node);
        if from_selected && !to_selected {
            fed_by_selection.insert(link.to.node);
        }
        if !from_selected && to_selected {
            feeds_selection.insert(link.from.node);
        }
    }
    if let Some(torn) = fed_by_selection.intersection(&feeds_selection).next() {
        let name = tree.node(*torn).map(|n| n.name.clone()).unwrap_or_default();
        return Err(EngineError::group(format!(
            "node '{}' both feeds and consumes the selection; grouping aborted",
            name
        )));
    }

    // Placement only: center of the selection's bounding box.
    let mut min = (f64::INFINITY, f64::INFINITY);
    let mut max = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for node in tree.nodes.iter().filter(|n| selection.contains(&n.id)) {
        min.0 = min.0.min(node.location.0);
        min.1 = min.1.min(node.location.1);
        max.0 = max.0.max(node.location.0);
        max.1 = max.1.max(node.location.1);
    }
    let center = ((min.0 + max.0) / 2.0, (min.1 + max.1) / 2.0);

    // Move the selection and its interior links into a fresh child tree.
    let mut child = NodeTree::new(tree.kind, "Group");
    child.types_resolved = tree.types_resolved;
    let mut remaining_nodes = Vec::with_capacity(tree.nodes.len());
    for node in tree.nodes.drain(..) {
        if selection.contains(&node.id) {
            child.nodes.push(node);
        } else {
            remaining_nodes.push(node);
        }
    }
    tree.nodes = remaining_nodes;

    let mut remaining_links = Vec::with_capacity(tree.links.len());
    for link in tree.links.drain(..) {
        if selection.contains(&link.from.node) && selection.contains(&link.to.node) {
            child.links.push(link);
        } else {
            remaining_links.push(link);
        }
    }
    tree.links = remaining_links;

    let descriptor = build_group_type(&mut child)?;
    sort_nodes(&mut child);

    let mut group_node = Node::new(GROUP_TYPE, &child.name);
    group_node.location = center;
    for template in &descriptor.inputs {
        group_node.inputs.push(template.instantiate());
    }
    for template in &descriptor.outputs {
        group_node.outputs.push(template.instantiate());
    }
    group_node.typeinfo = Some(Arc::new(descriptor));
    group_node.group = Some(Box::new(child));
    let group_id = group_node.id;

    // Rewrite links that crossed the selection boundary.
    let child_ref = group_node.group.as_deref();
    let mut dropped: Vec<Uuid> = Vec::new();
    for link in &mut tree.links {
        if selection.contains(&link.to.node) {
            match boundary_rewrite(child_ref, &group_node, link.to, true) {
                Some(target) => link.to = target,
                None => dropped.push(link.id),
            }
        } else if selection.contains(&link.from.node) {
            match boundary_rewrite(child_ref, &group_node, link.from, false) {
                Some(source) => link.from = source,
                None => dropped.push(link.id),
            }
        }
    }
    if !dropped.is_empty() {
        warn!(
            "dropped {} boundary link(s) without an external socket while grouping",
            dropped.len()
        );
        tree.links.retain(|l| !dropped.contains(&l.id));
    }

    tree.add_node(group_node);
    sort_nodes(tree);
    Ok(group_id)
}

/// Map a link endpoint that moved into the child tree onto the group node's
/// external socket with the same `own_index`.
fn boundary_rewrite(
    child: Option<&NodeTree>,
    group_node: &Node,
    at: SocketRef,
    input_side: bool,
) -> Option<SocketRef> {
    let child = child?;
    let interior = if input_side {
        child.input_socket(at)?
    } else {
        child.output_socket(at)?
    };
    if interior.intern || interior.own_index == 0 {
        return None;
    }
    let boundary = if input_side {
        &group_node.inputs
    } else {
        &group_node.outputs
    };
    boundary
        .iter()
        .find(|s| s.own_index == interior.own_index)
        .map(|s| SocketRef::new(group_node.id, s.id))
}

/// Dissolve a group node back into its parent tree.
///
/// The child tree's contents are deep-copied with fresh ids (the group
/// node's tree itself is never mutated), positions are offset by the group
/// node's location, and links that terminated at the group node are rewired
/// to the matching copied interior socket.
pub fn ungroup(tree: &mut NodeTree, group_id: Uuid) -> Result<(), EngineError> {
    let position = tree
        .nodes
        .iter()
        .position(|n| n.id == group_id)
        .ok_or_else(|| EngineError::invalid_argument(format!("node {} not in tree '{}'", group_id, tree.name)))?;
    if !tree.nodes[position].is_group() || tree.nodes[position].group.is_none() {
        return Err(EngineError::invalid_argument(format!(
            "node '{}' is not a group",
            tree.nodes[position].name
        )));
    }
    let group_node = tree.nodes.remove(position);
    let child = group_node
        .group
        .as_deref()
        .ok_or_else(|| EngineError::group("group node has no child tree"))?;

    // Deep copy with id remapping, so the group's own tree stays untouched.
    let mut socket_map: HashMap<Uuid, Uuid> = HashMap::new();
    let mut node_map: HashMap<Uuid, Uuid> = HashMap::new();
    let mut copies: Vec<Node> = Vec::with_capacity(child.nodes.len());
    for interior in &child.nodes {
        let mut copy = interior.clone();
        copy.id = Uuid::new_v4();
        node_map.insert(interior.id, copy.id);
        copy.location.0 += group_node.location.0;
        copy.location.1 += group_node.location.1;
        for socket in copy.inputs.iter_mut().chain(copy.outputs.iter_mut()) {
            let fresh = Uuid::new_v4();
            socket_map.insert(socket.id, fresh);
            socket.id = fresh;
            // The copies are plain nodes again; boundary bookkeeping would
            // collide with sockets from other dissolved groups.
            socket.intern = false;
            socket.own_index = 0;
            socket.clear_exec_state();
            socket.cache = None;
        }
        copies.push(copy);
    }

    for link in &child.links {
        let (Some(&from_node), Some(&to_node)) =
            (node_map.get(&link.from.node), node_map.get(&link.to.node))
        else {
            warn!("group link {} references a node outside the group", link.id);
            continue;
        };
        let (Some(&from_socket), Some(&to_socket)) =
            (socket_map.get(&link.from.socket), socket_map.get(&link.to.socket))
        else {
            warn!("group link {} references an unknown socket", link.id);
            continue;
        };
        tree.links.push(Link::new(
            SocketRef::new(from_node, from_socket),
            SocketRef::new(to_node, to_socket),
        ));
    }

    // Rewire links that terminated at the group node to the copied interior
    // socket carrying the same external index.
    let mut dropped: Vec<Uuid> = Vec::new();
    for link in &mut tree.links {
        if link.to.node == group_id {
            match interior_copy_ref(child, &group_node, &node_map, &socket_map, link.to, true) {
                Some(target) => link.to = target,
                None => dropped.push(link.id),
            }
        } else if link.from.node == group_id {
            match interior_copy_ref(child, &group_node, &node_map, &socket_map, link.from, false) {
                Some(source) => link.from = source,
                None => dropped.push(link.id),
            }
        }
    }
    if !dropped.is_empty() {
        warn!(
            "dropped {} link(s) without a matching interior socket while ungrouping",
            dropped.len()
        );
        tree.links.retain(|l| !dropped.contains(&l.id));
    }

    tree.nodes.extend(copies);
    sort_nodes(tree);
    Ok(())
}

/// Trace a group node's external socket to the matching interior socket and
/// remap it through the copy tables.
fn interior_copy_ref(
    child: &NodeTree,
    group_node: &Node,
    node_map: &HashMap<Uuid, Uuid>,
    socket_map: &HashMap<Uuid, Uuid>,
    at: SocketRef,
    input_side: bool,
) -> Option<SocketRef> {
    let boundary = if input_side {
        group_node.input(at.socket)?
    } else {
        group_node.output(at.socket)?
    };
    if boundary.own_index == 0 {
        return None;
    }
    for interior in &child.nodes {
        let sockets = if input_side {
            &interior.inputs
        } else {
            &interior.outputs
        };
        for socket in sockets {
            if !socket.intern && socket.own_index == boundary.own_index {
                let node = *node_map.get(&interior.id)?;
                let socket = *socket_map.get(&socket.id)?;
                return Some(SocketRef::new(node, socket));
            }
        }
    }
    None
}
