//! Threaded compositor executor.
//!
//! One shared flat stack, node-level task parallelism: the dispatch loop
//! runs on the calling thread and owns all scheduling state, a bounded
//! worker pool runs only the node execute callbacks. A node is never handed
//! to a worker before every producer feeding its linked inputs is ready.

use std::any::Any;
use std::cmp;
use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use uuid::Uuid;

use super::sequential::{gather_inputs, group_outputs};
use super::{ExecCtx, begin_exec};
use crate::error::EngineError;
use crate::model::node::{LEVEL_UNLINKED, Node};
use crate::model::socket::SocketValue;
use crate::model::tree::{ExecStacks, NodeTree, TreeKind};
use crate::registry::NodeClass;

pub type CancelFn = Arc<dyn Fn() -> bool + Send + Sync>;
/// Progress report: nodes remaining, name of a node currently processing.
pub type ProgressFn = Arc<dyn Fn(usize, Option<&str>) + Send + Sync>;

pub struct ThreadedExecOpts {
    pub caller: Arc<dyn Any + Send + Sync>,
    /// Worker count; defaults to the machine's available parallelism.
    pub threads: Option<usize>,
    pub cancel: Option<CancelFn>,
    pub progress: Option<ProgressFn>,
    /// Release intermediate buffers as soon as all consumers finished.
    pub free_buffers: bool,
    /// No display attached: viewer nodes are skipped entirely.
    pub headless: bool,
}

impl ThreadedExecOpts {
    pub fn new(caller: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            caller,
            threads: None,
            cancel: None,
            progress: None,
            free_buffers: false,
            headless: false,
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFn) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_free_buffers(mut self, free: bool) -> Self {
        self.free_buffers = free;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    fn worker_count(&self) -> usize {
        if let Some(count) = self.threads {
            return cmp::max(1, count);
        }
        let logical = thread::available_parallelism().map(|v| v.get()).unwrap_or(1);
        cmp::max(1, logical)
    }
}

/// Result of a threaded run. A cancelled run's outputs are invalid and must
/// be discarded by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    pub cancelled: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeState {
    Unscheduled,
    Processing,
    Ready,
    Finished,
}

struct Job {
    index: usize,
    node: Node,
    inputs: Vec<SocketValue>,
}

/// Decide which nodes must run this pass.
///
/// A node needs execution when one of its consumed outputs has no cached
/// buffer, or when a forward-edge producer either needs execution itself or
/// lost its cached buffer. A back-edge (producer level not below consumer
/// level, neither side an unlinked leaf) is a detected cycle: the consumer
/// is forced to skip with a diagnostic, which is what keeps the dispatch
/// loop from deadlocking on cyclic graphs. Viewer nodes need nothing when
/// running headless or while the tree is open for group editing.
pub fn mark_needs_exec(tree: &mut NodeTree, headless: bool) {
    let index_of: HashMap<Uuid, usize> = tree
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id, i))
        .collect();

    let mut decisions: Vec<bool> = Vec::with_capacity(tree.nodes.len());
    for node in &tree.nodes {
        let mut need = node.need_exec;
        for socket in &node.outputs {
            if socket.has_consumer && socket.cache.is_none() {
                need = true;
            }
        }

        let mut cycle = false;
        for socket in &node.inputs {
            let Some(link) = tree.input_link(socket.id) else {
                continue;
            };
            let Some(&src) = index_of.get(&link.from.node) else {
                continue;
            };
            let source = &tree.nodes[src];
            if source.level != LEVEL_UNLINKED
                && node.level != LEVEL_UNLINKED
                && source.level >= node.level
            {
                warn!(
                    "cycle detected on link '{}' -> '{}'; skipping '{}' this run",
                    source.name, node.name, node.name
                );
                cycle = true;
                break;
            }
            let source_needs = decisions.get(src).copied().unwrap_or(false);
            let source_cache_missing = source
                .output(link.from.socket)
                .map(|s| s.cache.is_none())
                .unwrap_or(true);
            if source_needs || source_cache_missing {
                need = true;
            }
        }
        if cycle {
            need = false;
        }

        if let Some(info) = &node.typeinfo {
            if info.display_only && (headless || tree.edit) {
                need = false;
            }
        }
        decisions.push(need);
    }

    for (node, need) in tree.nodes.iter_mut().zip(&decisions) {
        node.need_exec = *need;
    }
}

/// Run the tree to completion on a worker pool.
///
/// Allocates an execution context if none is live (the shared stack is a
/// single slot; compositor buffers are too large to duplicate per thread),
/// decides which nodes need work, then dispatches until every node is
/// finished or the caller aborts.
pub fn execute(tree: &mut NodeTree, opts: &ThreadedExecOpts) -> Result<ExecOutcome, EngineError> {
    if tree.kind != TreeKind::Compositor {
        return Err(EngineError::invalid_argument(format!(
            "threaded execution applies to compositor trees, '{}' is {:?}",
            tree.name, tree.kind
        )));
    }
    begin_exec(tree, 1)?;
    mark_needs_exec(tree, opts.headless);

    let mut exec = tree
        .exec
        .take()
        .ok_or_else(|| EngineError::exec("execution context vanished after begin_exec"))?;
    let result = dispatch(tree, &mut exec, opts);
    tree.exec = Some(exec);
    result
}

fn dispatch(
    tree: &mut NodeTree,
    exec: &mut ExecStacks,
    opts: &ThreadedExecOpts,
) -> Result<ExecOutcome, EngineError> {
    let count = tree.nodes.len();
    let stack = exec
        .stacks
        .first_mut()
        .ok_or_else(|| EngineError::exec("execution context has no stack"))?;

    let index_of: HashMap<Uuid, usize> = tree
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id, i))
        .collect();
    // Producer indices per node, for the readiness gate and buffer keep-alive.
    let mut sources: Vec<Vec<usize>> = vec![Vec::new(); count];
    for link in &tree.links {
        if let (Some(&to), Some(&from)) = (index_of.get(&link.to.node), index_of.get(&link.from.node)) {
            sources[to].push(from);
        }
    }

    let mut states = vec![NodeState::Unscheduled; count];
    for i in 0..count {
        if !tree.nodes[i].need_exec {
            // Already satisfied: surface its cached buffers and treat as done.
            states[i] = NodeState::Finished;
            for socket in &tree.nodes[i].outputs {
                if let (Some(index), Some(cache)) = (socket.stack_index, socket.cache.as_ref()) {
                    if index < stack.len() {
                        stack[index] = cache.clone();
                    }
                }
            }
        }
    }

    let worker_count = opts.worker_count();
    debug!(
        "dispatching tree '{}' on {} worker(s), {} node(s) to run",
        tree.name,
        worker_count,
        states.iter().filter(|s| **s == NodeState::Unscheduled).count()
    );

    let (job_tx, job_rx) = mpsc::channel::<Job>();
    let (result_tx, result_rx) = mpsc::channel::<(usize, Vec<SocketValue>)>();
    let job_rx = Arc::new(Mutex::new(job_rx));

    let mut workers = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        let job_rx = Arc::clone(&job_rx);
        let result_tx = result_tx.clone();
        let caller = Arc::clone(&opts.caller);
        workers.push(thread::spawn(move || {
            let ctx = ExecCtx {
                caller,
                thread: worker_id,
            };
            loop {
                let job = {
                    let receiver = job_rx.lock().expect("job queue poisoned");
                    receiver.recv()
                };
                let Ok(job) = job else { break };
                let outputs = run_job(&ctx, &job);
                if result_tx.send((job.index, outputs)).is_err() {
                    break;
                }
            }
        }));
    }
    drop(result_tx);

    let mut free_slots = worker_count;
    let mut in_flight = 0usize;
    let mut cancelled = false;

    let outcome = 'dispatch: loop {
        // Cooperative abort, polled once per iteration: every pending node
        // is short-circuited to ready. In-flight callbacks still run to
        // completion; their results are discarded below.
        if !cancelled && opts.cancel.as_ref().map(|f| f()).unwrap_or(false) {
            info!("execution of tree '{}' cancelled", tree.name);
            cancelled = true;
            for state in states.iter_mut() {
                if *state != NodeState::Finished {
                    *state = NodeState::Ready;
                }
            }
        }

        if !cancelled {
            while free_slots > 0 {
                let next = (0..count).find(|&i| {
                    states[i] == NodeState::Unscheduled
                        && sources[i]
                            .iter()
                            .all(|&s| matches!(states[s], NodeState::Ready | NodeState::Finished))
                });
                let Some(next) = next else { break };
                let inputs = gather_inputs(tree, &tree.nodes[next], stack);
                let job = Job {
                    index: next,
                    node: tree.nodes[next].clone(),
                    inputs,
                };
                states[next] = NodeState::Processing;
                in_flight += 1;
                free_slots -= 1;
                if job_tx.send(job).is_err() {
                    break 'dispatch Err(EngineError::exec("worker pool shut down unexpectedly"));
                }
            }
        }

        if let Some(progress) = &opts.progress {
            let remaining = states.iter().filter(|s| **s != NodeState::Finished).count();
            let current = states
                .iter()
                .position(|s| *s == NodeState::Processing)
                .map(|i| tree.nodes[i].name.as_str());
            progress(remaining, current);
        }

        while let Ok((index, outputs)) = result_rx.try_recv() {
            in_flight -= 1;
            free_slots += 1;
            apply_result(tree, stack, &mut states, index, outputs, cancelled);
        }

        // Reclaim: ready nodes become finished; optionally release buffers
        // no unfinished consumer still needs.
        let mut reclaimed = false;
        for state in states.iter_mut() {
            if *state == NodeState::Ready {
                *state = NodeState::Finished;
                reclaimed = true;
            }
        }
        if reclaimed && opts.free_buffers && !cancelled {
            free_finished_buffers(tree, stack, &states, &sources);
        }

        if states.iter().all(|s| *s == NodeState::Finished) {
            break Ok(ExecOutcome { cancelled });
        }

        if in_flight > 0 {
            match result_rx.recv_timeout(Duration::from_millis(10)) {
                Ok((index, outputs)) => {
                    in_flight -= 1;
                    free_slots += 1;
                    apply_result(tree, stack, &mut states, index, outputs, cancelled);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    break Err(EngineError::exec("worker pool disconnected mid-run"));
                }
            }
        } else if !cancelled {
            let stuck: Vec<&str> = states
                .iter()
                .enumerate()
                .filter(|(_, s)| **s != NodeState::Finished)
                .map(|(i, _)| tree.nodes[i].name.as_str())
                .collect();
            break Err(EngineError::exec(format!(
                "dispatch stalled with unfinished nodes: {}",
                stuck.join(", ")
            )));
        }
    };

    drop(job_tx);
    for handle in workers {
        if handle.join().is_err() {
            error!("compositor worker thread panicked");
        }
    }
    outcome
}

fn run_job(ctx: &ExecCtx, job: &Job) -> Vec<SocketValue> {
    let node = &job.node;
    if node.is_group() {
        return match group_outputs(node, ctx, &job.inputs) {
            Ok(outputs) => outputs,
            Err(err) => {
                error!("group node '{}' failed: {}", node.name, err);
                vec![SocketValue::None; node.outputs.len()]
            }
        };
    }
    match node.typeinfo.as_ref().and_then(|t| t.exec.clone()) {
        Some(exec_fn) => {
            let mut outputs = vec![SocketValue::None; node.outputs.len()];
            exec_fn(ctx, node, &job.inputs, &mut outputs);
            outputs
        }
        None => {
            debug!("node '{}' has no execute callback, passing through", node.name);
            vec![SocketValue::None; node.outputs.len()]
        }
    }
}

/// Store a finished node's outputs in the shared stack and the socket
/// caches, then mark it ready. Results arriving after an abort only release
/// the worker slot.
fn apply_result(
    tree: &mut NodeTree,
    stack: &mut [SocketValue],
    states: &mut [NodeState],
    index: usize,
    outputs: Vec<SocketValue>,
    cancelled: bool,
) {
    if cancelled {
        return;
    }
    let Some(node) = tree.nodes.get_mut(index) else {
        return;
    };
    for (socket, value) in node.outputs.iter_mut().zip(outputs) {
        if let Some(slot) = socket.stack_index.filter(|&i| i < stack.len()) {
            stack[slot] = value.clone();
        }
        socket.cache = if value.is_none() { None } else { Some(value) };
    }
    node.need_exec = false;
    if let Some(state) = states.get_mut(index) {
        *state = NodeState::Ready;
    }
}

/// Release buffers of finished nodes, keeping externally-visible outputs and
/// anything an unfinished consumer still reads.
fn free_finished_buffers(
    tree: &mut NodeTree,
    stack: &mut [SocketValue],
    states: &[NodeState],
    sources: &[Vec<usize>],
) {
    let count = tree.nodes.len();
    let mut free_mark = vec![false; count];
    for i in 0..count {
        if states[i] != NodeState::Finished {
            continue;
        }
        let visible = tree.nodes[i]
            .typeinfo
            .as_ref()
            .is_some_and(|t| t.class == NodeClass::Output);
        if !visible {
            free_mark[i] = true;
        }
    }
    for i in 0..count {
        if states[i] == NodeState::Finished {
            continue;
        }
        for &src in &sources[i] {
            free_mark[src] = false;
        }
    }
    for i in 0..count {
        if !free_mark[i] {
            continue;
        }
        let name = tree.nodes[i].name.clone();
        for socket in &mut tree.nodes[i].outputs {
            if socket.cache.is_some() {
                debug!("releasing buffer of '{}'.{}", name, socket.name);
            }
            socket.cache = None;
            if let Some(slot) = socket.stack_index.filter(|&s| s < stack.len()) {
                stack[slot] = SocketValue::None;
            }
        }
    }
}
