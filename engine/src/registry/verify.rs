//! Type resolution and socket verification.
//!
//! Stored nodes only carry a type id; `resolve_types` must run before any
//! execution or editing so every node holds a live descriptor, and it keeps
//! each node's socket lists in sync with that descriptor's templates.

use log::{debug, warn};
use uuid::Uuid;

use super::{SocketTemplate, TypeRegistry};
use crate::error::EngineError;
use crate::model::socket::{Socket, SocketDirection};
use crate::model::tree::NodeTree;

/// Resolve every node's descriptor from the registry table for the tree's
/// kind, then verify every node's sockets.
///
/// Group nodes synthesize their descriptor from their child tree (which is
/// resolved first). A node whose type cannot be found is pruned from the
/// tree with a diagnostic instead of being left dangling.
pub fn resolve_types(registry: &TypeRegistry, tree: &mut NodeTree) -> Result<(), EngineError> {
    let ids: Vec<Uuid> = tree.nodes.iter().map(|n| n.id).collect();
    let mut pruned: Vec<(Uuid, String)> = Vec::new();

    for id in ids {
        let kind = tree.kind;
        let node = tree.require_node_mut(id)?;
        if node.is_group() {
            let Some(child) = node.group.as_mut() else {
                pruned.push((id, node.type_id.clone()));
                continue;
            };
            resolve_types(registry, child)?;
            match crate::group::build_group_type(child) {
                Ok(descriptor) => node.typeinfo = Some(std::sync::Arc::new(descriptor)),
                Err(err) => {
                    warn!("group node '{}' has an invalid child tree: {}", node.name, err);
                    pruned.push((id, node.type_id.clone()));
                }
            }
        } else if let Some(descriptor) = registry.get(kind, &node.type_id) {
            node.typeinfo = Some(descriptor);
        } else {
            pruned.push((id, node.type_id.clone()));
        }
    }

    for (id, type_id) in pruned {
        let node = tree.remove_node(id)?;
        warn!(
            "pruned node '{}': type '{}' is not registered for {:?} trees",
            node.name, type_id, tree.kind
        );
    }

    let ids: Vec<Uuid> = tree.nodes.iter().map(|n| n.id).collect();
    for id in ids {
        verify_node(tree, id)?;
    }

    tree.types_resolved = true;
    Ok(())
}

/// Reconcile a node's sockets with its descriptor's templates.
///
/// Sockets are matched by `(own_index, name)`; matched sockets keep their
/// identity (and therefore their links) while type and limits are updated in
/// place. Unmatched sockets are deleted together with every link touching
/// them, and newly templated sockets are appended in template order.
/// Calling this twice without a template change is a no-op.
pub fn verify_node(tree: &mut NodeTree, node_id: Uuid) -> Result<(), EngineError> {
    let Some(info) = tree.require_node(node_id)?.typeinfo.clone() else {
        debug!("verify skipped: node {} has no resolved type", node_id);
        return Ok(());
    };
    verify_side(tree, node_id, SocketDirection::Input, &info.inputs)?;
    verify_side(tree, node_id, SocketDirection::Output, &info.outputs)?;
    Ok(())
}

fn verify_side(
    tree: &mut NodeTree,
    node_id: Uuid,
    direction: SocketDirection,
    templates: &[SocketTemplate],
) -> Result<(), EngineError> {
    let node = tree.require_node_mut(node_id)?;
    let mut leftovers: Vec<Option<Socket>> = std::mem::take(node.sockets_mut(direction))
        .into_iter()
        .map(Some)
        .collect();

    let mut rebuilt: Vec<Socket> = Vec::with_capacity(templates.len());
    for template in templates {
        let matched = leftovers.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|s| s.own_index == template.own_index && s.name == template.name)
        });
        match matched.and_then(|pos| leftovers[pos].take()) {
            Some(mut socket) => {
                socket.data_type = template.data_type;
                socket.min = template.min;
                socket.max = template.max;
                rebuilt.push(socket);
            }
            None => rebuilt.push(template.instantiate()),
        }
    }
    *node.sockets_mut(direction) = rebuilt;

    let orphaned: Vec<Uuid> = leftovers.into_iter().flatten().map(|s| s.id).collect();
    if !orphaned.is_empty() {
        let before = tree.links.len();
        tree.links
            .retain(|l| !orphaned.contains(&l.from.socket) && !orphaned.contains(&l.to.socket));
        debug!(
            "verify removed {} socket(s) and {} link(s) from node {}",
            orphaned.len(),
            before - tree.links.len(),
            node_id
        );
    }
    Ok(())
}
