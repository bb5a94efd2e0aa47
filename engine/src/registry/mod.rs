//! Node type registry: maps a node's type id to its descriptor.

pub mod builtin;
mod verify;

pub use verify::{resolve_types, verify_node};

use std::collections::HashMap;
use std::sync::Arc;

use crate::exec::ExecCtx;
use crate::model::node::Node;
use crate::model::socket::{Socket, SocketType, SocketValue};
use crate::model::tree::TreeKind;

/// Node execute callback: reads its declared inputs, writes its declared
/// outputs, returns nothing.
pub type NodeExecFn =
    Arc<dyn Fn(&ExecCtx, &Node, &[SocketValue], &mut [SocketValue]) + Send + Sync>;

/// Coarse classification of a node type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeClass {
    /// Produces values from settings or external resources only.
    Input,
    /// Surfaces a result outside the tree (composite, viewer, file).
    Output,
    /// Plain computation.
    Operator,
    /// Synthesized descriptor of a group node.
    Group,
}

/// Template from which socket instances are built and against which they are
/// re-verified.
#[derive(Clone, Debug, PartialEq)]
pub struct SocketTemplate {
    pub name: String,
    pub data_type: SocketType,
    pub default_value: [f64; 4],
    pub min: f64,
    pub max: f64,
    /// Non-zero only on group boundary templates.
    pub own_index: u32,
}

impl SocketTemplate {
    pub fn new(name: &str, data_type: SocketType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            default_value: [0.0; 4],
            min: 0.0,
            max: 1.0,
            own_index: 0,
        }
    }

    pub fn with_default(mut self, value: [f64; 4]) -> Self {
        self.default_value = value;
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Build a fresh socket instance from this template.
    pub fn instantiate(&self) -> Socket {
        let mut socket = Socket::new(&self.name, self.data_type);
        socket.default_value = self.default_value;
        socket.min = self.min;
        socket.max = self.max;
        socket.own_index = self.own_index;
        socket
    }
}

/// Immutable description of a node type, shared by all its instances.
#[derive(Clone)]
pub struct TypeDescriptor {
    pub type_id: String,
    pub name: String,
    pub description: String,
    pub class: NodeClass,
    /// Output whose result is display-only (viewer): no downstream consumer
    /// exists when running headless.
    pub display_only: bool,
    /// Participates in the one-active-output-per-type rule. File outputs
    /// opt out and all stay active.
    pub exclusive_active: bool,
    pub inputs: Vec<SocketTemplate>,
    pub outputs: Vec<SocketTemplate>,
    pub exec: Option<NodeExecFn>,
}

impl TypeDescriptor {
    pub fn new(type_id: &str, name: &str, class: NodeClass) -> Self {
        Self {
            type_id: type_id.to_string(),
            name: name.to_string(),
            description: String::new(),
            class,
            display_only: false,
            exclusive_active: true,
            inputs: Vec::new(),
            outputs: Vec::new(),
            exec: None,
        }
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.description = desc.to_string();
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<SocketTemplate>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<SocketTemplate>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_exec(mut self, exec: NodeExecFn) -> Self {
        self.exec = Some(exec);
        self
    }

    pub fn with_display_only(mut self) -> Self {
        self.display_only = true;
        self
    }

    pub fn with_non_exclusive_output(mut self) -> Self {
        self.exclusive_active = false;
        self
    }
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("type_id", &self.type_id)
            .field("class", &self.class)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("has_exec", &self.exec.is_some())
            .finish()
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

/// Per-tree-kind descriptor tables.
pub struct TypeRegistry {
    tables: HashMap<TreeKind, HashMap<String, Arc<TypeDescriptor>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    /// A registry with all built-in shader and compositor types registered.
    pub fn with_builtin_types() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, kind: TreeKind, descriptor: TypeDescriptor) {
        self.tables
            .entry(kind)
            .or_default()
            .insert(descriptor.type_id.clone(), Arc::new(descriptor));
    }

    pub fn get(&self, kind: TreeKind, type_id: &str) -> Option<Arc<TypeDescriptor>> {
        self.tables.get(&kind)?.get(type_id).cloned()
    }

    pub fn unregister(&mut self, kind: TreeKind, type_id: &str) -> bool {
        self.tables
            .get_mut(&kind)
            .map(|table| table.remove(type_id).is_some())
            .unwrap_or(false)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
