//! Node model: a typed unit of computation with input/output sockets.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::property::PropertyMap;
use super::socket::{Socket, SocketDirection};
use super::tree::NodeTree;
use crate::registry::TypeDescriptor;

/// Level assigned to nodes with no input links at all. Such nodes never take
/// part in a dependency cycle, which the executors rely on when classifying
/// back-edges.
pub const LEVEL_UNLINKED: u16 = 0xFFF;

/// Type id of group nodes. Their descriptor is synthesized from the child
/// tree rather than looked up in the registry.
pub const GROUP_TYPE: &str = "group";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Node {
    pub id: Uuid,
    /// References a `TypeDescriptor` registered for the tree's kind,
    /// e.g. "shader.math" or "composite.blur".
    pub type_id: String,
    pub name: String,
    /// Editor placement. Only used when grouping computes a bounding box;
    /// carries no evaluation semantics.
    pub location: (f64, f64),
    pub inputs: Vec<Socket>,
    pub outputs: Vec<Socket>,
    pub properties: PropertyMap,
    /// Active-output flag; at most one per output type per tree after
    /// sorting (file outputs excepted).
    #[serde(default)]
    pub do_output: bool,
    /// Group nodes own their child tree outright.
    #[serde(default)]
    pub group: Option<Box<NodeTree>>,

    // --- resolved / execution state ---
    #[serde(skip)]
    pub typeinfo: Option<Arc<TypeDescriptor>>,
    /// Topological depth from the last sort. `LEVEL_UNLINKED` for nodes
    /// without input links.
    #[serde(skip)]
    pub level: u16,
    /// Compositor re-execution flag set by `tag_changed` and
    /// `mark_needs_exec`.
    #[serde(skip)]
    pub need_exec: bool,
    /// First stack slot of a group instance's private range.
    #[serde(skip)]
    pub stack_base: usize,
    /// Number of slots in that range.
    #[serde(skip)]
    pub stack_span: usize,
}

impl Node {
    pub fn new(type_id: &str, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            type_id: type_id.to_string(),
            name: name.to_string(),
            location: (0.0, 0.0),
            inputs: Vec::new(),
            outputs: Vec::new(),
            properties: PropertyMap::new(),
            do_output: false,
            group: None,
            typeinfo: None,
            level: LEVEL_UNLINKED,
            need_exec: false,
            stack_base: 0,
            stack_span: 0,
        }
    }

    pub fn is_group(&self) -> bool {
        self.type_id == GROUP_TYPE
    }

    pub fn input(&self, socket_id: Uuid) -> Option<&Socket> {
        self.inputs.iter().find(|s| s.id == socket_id)
    }

    pub fn output(&self, socket_id: Uuid) -> Option<&Socket> {
        self.outputs.iter().find(|s| s.id == socket_id)
    }

    pub fn socket(&self, direction: SocketDirection, socket_id: Uuid) -> Option<&Socket> {
        match direction {
            SocketDirection::Input => self.input(socket_id),
            SocketDirection::Output => self.output(socket_id),
        }
    }

    pub fn sockets(&self, direction: SocketDirection) -> &[Socket] {
        match direction {
            SocketDirection::Input => &self.inputs,
            SocketDirection::Output => &self.outputs,
        }
    }

    pub fn sockets_mut(&mut self, direction: SocketDirection) -> &mut Vec<Socket> {
        match direction {
            SocketDirection::Input => &mut self.inputs,
            SocketDirection::Output => &mut self.outputs,
        }
    }

    /// Whether `socket_id` belongs to this node, on either side.
    pub fn owns_socket(&self, socket_id: Uuid) -> bool {
        self.input(socket_id).is_some() || self.output(socket_id).is_some()
    }
}
