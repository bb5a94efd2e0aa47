//! Sequential executor: one full pass over a sorted tree per thread slot.
//!
//! Thread slots never share mutable state (each has its own value stack), so
//! a render driver may run one pass per tile thread concurrently with no
//! locking, as long as the tree itself is not edited meanwhile.

use std::any::Any;
use std::sync::Arc;

use log::{debug, warn};

use super::ExecCtx;
use crate::error::EngineError;
use crate::model::node::Node;
use crate::model::socket::SocketValue;
use crate::model::tree::{ExecStacks, NodeTree};
use crate::registry::NodeClass;

/// Run every node of the tree once, in sorted order, against the given
/// thread slot's value stack.
pub fn exec_tree(
    tree: &mut NodeTree,
    caller: Arc<dyn Any + Send + Sync>,
    thread: usize,
) -> Result<(), EngineError> {
    let mut exec = tree.exec.take().ok_or_else(|| {
        EngineError::exec(format!(
            "tree '{}' has no execution context; call begin_exec first",
            tree.name
        ))
    })?;
    let result = run_pass(tree, &mut exec, caller, thread);
    tree.exec = Some(exec);
    result
}

fn run_pass(
    tree: &NodeTree,
    exec: &mut ExecStacks,
    caller: Arc<dyn Any + Send + Sync>,
    thread: usize,
) -> Result<(), EngineError> {
    let stack_count = exec.stacks.len();
    let stack = exec.stacks.get_mut(thread).ok_or_else(|| {
        EngineError::invalid_argument(format!(
            "thread index {} out of range ({} stack(s) allocated)",
            thread, stack_count
        ))
    })?;
    let ctx = ExecCtx { caller, thread };

    for node in &tree.nodes {
        if node.is_group() {
            let ext_inputs = gather_inputs(tree, node, stack);
            let outputs = group_outputs(node, &ctx, &ext_inputs)?;
            for (socket, value) in node.outputs.iter().zip(outputs) {
                if let Some(index) = socket.stack_index.filter(|&i| i < stack.len()) {
                    stack[index] = value;
                }
            }
            continue;
        }

        let Some(exec_fn) = node.typeinfo.as_ref().and_then(|t| t.exec.clone()) else {
            debug!("node '{}' has no execute callback, passing through", node.name);
            continue;
        };
        let inputs = gather_inputs(tree, node, stack);
        let count = node.outputs.len();
        match node.outputs.first().and_then(|s| s.stack_index) {
            Some(first) if first + count <= stack.len() => {
                exec_fn(&ctx, node, &inputs, &mut stack[first..first + count]);
            }
            None if count == 0 => {
                exec_fn(&ctx, node, &inputs, &mut []);
            }
            _ => {
                return Err(EngineError::exec(format!(
                    "stack slots for node '{}' were never allocated; re-run begin_exec",
                    node.name
                )));
            }
        }
    }
    Ok(())
}

/// Resolve a node's input values: the producing slot when linked, the
/// socket's own default otherwise.
pub(crate) fn gather_inputs(tree: &NodeTree, node: &Node, stack: &[SocketValue]) -> Vec<SocketValue> {
    node.inputs
        .iter()
        .map(|socket| match tree.input_link(socket.id) {
            Some(link) => tree
                .output_socket(link.from)
                .and_then(|s| s.stack_index)
                .and_then(|index| stack.get(index))
                .cloned()
                .unwrap_or_else(|| socket.default_stack_value()),
            None => socket.default_stack_value(),
        })
        .collect()
}

/// Execute a group node's interior and return the values of its external
/// output sockets, in the order of `gnode.outputs`.
///
/// The interior runs against the group instance's private slot range,
/// realized as a scratch buffer local to this call; exposed sockets wire to
/// the parent-resolved `ext_inputs` by external index. In a group opened for
/// editing only the active output nodes among the interior output nodes run;
/// otherwise every interior node runs as plain computation.
pub(crate) fn group_outputs(
    gnode: &Node,
    ctx: &ExecCtx,
    ext_inputs: &[SocketValue],
) -> Result<Vec<SocketValue>, EngineError> {
    let Some(gtree) = gnode.group.as_deref() else {
        return Err(EngineError::exec(format!("node '{}' is not a group", gnode.name)));
    };
    let base = gnode.stack_base;
    let mut scratch: Vec<SocketValue> = vec![SocketValue::None; gnode.stack_span];
    let ext: Vec<(u32, &SocketValue)> = gnode
        .inputs
        .iter()
        .zip(ext_inputs)
        .map(|(socket, value)| (socket.own_index, value))
        .collect();

    for inner in &gtree.nodes {
        if inner.is_group() {
            warn!("nested group node '{}' skipped", inner.name);
            continue;
        }
        if gtree.edit
            && inner
                .typeinfo
                .as_ref()
                .is_some_and(|t| t.class == NodeClass::Output)
            && !inner.do_output
        {
            continue;
        }
        let Some(exec_fn) = inner.typeinfo.as_ref().and_then(|t| t.exec.clone()) else {
            debug!("node '{}' has no execute callback, passing through", inner.name);
            continue;
        };

        let inputs: Vec<SocketValue> = inner
            .inputs
            .iter()
            .map(|socket| {
                if let Some(link) = gtree.input_link(socket.id) {
                    gtree
                        .output_socket(link.from)
                        .and_then(|s| s.stack_index)
                        .and_then(|index| index.checked_sub(base))
                        .and_then(|offset| scratch.get(offset))
                        .cloned()
                        .unwrap_or_else(|| socket.default_stack_value())
                } else if !socket.intern && socket.own_index != 0 {
                    ext.iter()
                        .find(|(index, _)| *index == socket.own_index)
                        .map(|(_, value)| (*value).clone())
                        .unwrap_or_else(|| socket.default_stack_value())
                } else {
                    socket.default_stack_value()
                }
            })
            .collect();

        let count = inner.outputs.len();
        let offset = inner
            .outputs
            .first()
            .and_then(|s| s.stack_index)
            .and_then(|index| index.checked_sub(base));
        match offset {
            Some(offset) if offset + count <= scratch.len() => {
                exec_fn(ctx, inner, &inputs, &mut scratch[offset..offset + count]);
            }
            None if count == 0 => {
                exec_fn(ctx, inner, &inputs, &mut []);
            }
            _ => {
                return Err(EngineError::exec(format!(
                    "group interior node '{}' has no allocated slot range",
                    inner.name
                )));
            }
        }
    }

    let mut outputs = Vec::with_capacity(gnode.outputs.len());
    for boundary in &gnode.outputs {
        let mut value = SocketValue::None;
        'search: for inner in &gtree.nodes {
            for socket in &inner.outputs {
                if !socket.intern && socket.own_index == boundary.own_index {
                    if let Some(offset) = socket.stack_index.and_then(|i| i.checked_sub(base)) {
                        if let Some(found) = scratch.get(offset) {
                            value = found.clone();
                        }
                    }
                    break 'search;
                }
            }
        }
        outputs.push(value);
    }
    Ok(outputs)
}
