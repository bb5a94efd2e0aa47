//! Execution layer: stack allocation, the sequential per-thread executor and
//! the threaded compositor executor.

pub mod sequential;
pub mod stack;
pub mod threaded;

pub use sequential::exec_tree;
pub use threaded::{ExecOutcome, ThreadedExecOpts, mark_needs_exec};

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::EngineError;
use crate::model::socket::SocketValue;
use crate::model::tree::{ExecStacks, NodeTree};

/// Context handed to every node execute callback.
///
/// `caller` is the driver's opaque payload (render settings, frame buffers)
/// threaded through unchanged; `thread` identifies the stack slot or worker
/// running the callback.
pub struct ExecCtx {
    pub caller: Arc<dyn Any + Send + Sync>,
    pub thread: usize,
}

impl ExecCtx {
    pub fn caller_as<T: 'static>(&self) -> Option<&T> {
        self.caller.downcast_ref()
    }
}

/// Allocate the tree's execution context: run the stack allocator, size one
/// value stack per thread slot, and mark socket usage from the links.
///
/// Idempotent: a second call while a context is live is a no-op.
pub fn begin_exec(tree: &mut NodeTree, threads: usize) -> Result<(), EngineError> {
    if tree.exec.is_some() {
        return Ok(());
    }
    if !tree.types_resolved {
        return Err(EngineError::exec(format!(
            "tree '{}' has unresolved node types; call resolve_types first",
            tree.name
        )));
    }
    let total = stack::allocate(tree);
    mark_usage(tree);
    let threads = threads.max(1);
    tree.exec = Some(ExecStacks {
        total,
        stacks: vec![vec![SocketValue::None; total]; threads],
    });
    Ok(())
}

/// Release the execution context and all stack indices. Safe to call even if
/// `begin_exec` never ran.
pub fn end_exec(tree: &mut NodeTree) {
    tree.exec = None;
    clear_exec_state(tree);
}

/// Total stack slots of the live execution context, if any.
pub fn stack_size(tree: &NodeTree) -> Option<usize> {
    tree.exec.as_ref().map(|e| e.total)
}

/// Read a socket's computed value from a thread slot's stack.
///
/// Valid only between `begin_exec` and `end_exec`. Output sockets read their
/// own slot; input sockets resolve through their driving link, falling back
/// to the socket default when unlinked.
pub fn stack_value(
    tree: &NodeTree,
    at: crate::model::socket::SocketRef,
    thread: usize,
) -> Option<SocketValue> {
    let exec = tree.exec.as_ref()?;
    let stack = exec.stacks.get(thread)?;
    let node = tree.node(at.node)?;
    if let Some(socket) = node.output(at.socket) {
        return stack.get(socket.stack_index?).cloned();
    }
    let socket = node.input(at.socket)?;
    match tree.input_link(at.socket) {
        Some(link) => {
            let producer = tree.output_socket(link.from)?;
            stack.get(producer.stack_index?).cloned()
        }
        None => Some(socket.default_stack_value()),
    }
}

fn clear_exec_state(tree: &mut NodeTree) {
    for node in &mut tree.nodes {
        node.stack_base = 0;
        node.stack_span = 0;
        for socket in node.inputs.iter_mut().chain(node.outputs.iter_mut()) {
            socket.clear_exec_state();
        }
        if let Some(group) = node.group.as_mut() {
            clear_exec_state(group);
        }
    }
}

/// Record which sockets have a driving link and which have consumers; the
/// compositor uses the consumer flag to pick buffers worth keeping.
fn mark_usage(tree: &mut NodeTree) {
    let driven: HashSet<Uuid> = tree.links.iter().map(|l| l.to.socket).collect();
    let consumed: HashSet<Uuid> = tree.links.iter().map(|l| l.from.socket).collect();
    for node in &mut tree.nodes {
        for socket in &mut node.inputs {
            socket.has_producer = driven.contains(&socket.id);
            socket.has_consumer = false;
        }
        for socket in &mut node.outputs {
            socket.has_producer = false;
            socket.has_consumer = consumed.contains(&socket.id);
        }
        if let Some(group) = node.group.as_mut() {
            mark_usage(group);
        }
    }
}
