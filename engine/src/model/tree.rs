//! Node tree: owns the nodes and links of one graph and provides safe
//! topology mutation (the socket/link store).

use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::link::Link;
use super::node::Node;
use super::socket::{Socket, SocketDirection, SocketRef, SocketValue};
use crate::error::EngineError;
use crate::registry::SocketTemplate;

/// Which registry table applies to a tree.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TreeKind {
    Shader,
    Compositor,
}

/// Per-thread value stacks owned by the tree between `begin_exec` and
/// `end_exec`.
#[derive(Debug, Default)]
pub(crate) struct ExecStacks {
    pub total: usize,
    pub stacks: Vec<Vec<SocketValue>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct NodeTree {
    pub kind: TreeKind,
    pub name: String,
    /// Kept in dependency-sorted order; any topology change invalidates the
    /// order until the sorter runs again.
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
    /// True while this tree is a group opened for isolated editing.
    #[serde(default)]
    pub edit: bool,

    #[serde(skip)]
    pub types_resolved: bool,
    #[serde(skip)]
    pub(crate) exec: Option<ExecStacks>,
}

impl Default for TreeKind {
    fn default() -> Self {
        TreeKind::Shader
    }
}

impl Clone for ExecStacks {
    fn clone(&self) -> Self {
        // Execution state never travels with a copied tree.
        ExecStacks::default()
    }
}

impl PartialEq for ExecStacks {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl NodeTree {
    pub fn new(kind: TreeKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            nodes: Vec::new(),
            links: Vec::new(),
            edit: false,
            types_resolved: false,
            exec: None,
        }
    }

    pub fn load(json_str: &str) -> Result<Self, EngineError> {
        let tree: NodeTree = serde_json::from_str(json_str)?;
        Ok(tree)
    }

    pub fn save(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(self)?)
    }

    // --- lookups ---

    pub fn node(&self, id: Uuid) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: Uuid) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub(crate) fn require_node(&self, id: Uuid) -> Result<&Node, EngineError> {
        self.node(id)
            .ok_or_else(|| EngineError::invalid_argument(format!("node {} not in tree '{}'", id, self.name)))
    }

    pub(crate) fn require_node_mut(&mut self, id: Uuid) -> Result<&mut Node, EngineError> {
        let name = self.name.clone();
        self.node_mut(id)
            .ok_or_else(|| EngineError::invalid_argument(format!("node {} not in tree '{}'", id, name)))
    }

    /// Resolve a link endpoint to its output socket.
    pub fn output_socket(&self, at: SocketRef) -> Option<&Socket> {
        self.node(at.node)?.output(at.socket)
    }

    /// Resolve a link endpoint to its input socket.
    pub fn input_socket(&self, at: SocketRef) -> Option<&Socket> {
        self.node(at.node)?.input(at.socket)
    }

    /// The single link driving an input socket, if any.
    pub fn input_link(&self, to_socket: Uuid) -> Option<&Link> {
        self.links.iter().find(|l| l.to.socket == to_socket)
    }

    /// All links fanning out from an output socket.
    pub fn links_from(&self, from_socket: Uuid) -> Vec<&Link> {
        self.links.iter().filter(|l| l.from.socket == from_socket).collect()
    }

    // --- topology mutation ---

    pub fn add_node(&mut self, node: Node) -> Uuid {
        let id = node.id;
        self.nodes.push(node);
        id
    }

    /// Remove a node and every link touching it.
    pub fn remove_node(&mut self, id: Uuid) -> Result<Node, EngineError> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| EngineError::invalid_argument(format!("node {} not in tree '{}'", id, self.name)))?;
        self.links.retain(|l| l.from.node != id && l.to.node != id);
        Ok(self.nodes.remove(index))
    }

    /// Append a new socket built from a template; returns its id.
    pub fn add_socket(
        &mut self,
        node_id: Uuid,
        direction: SocketDirection,
        template: &SocketTemplate,
    ) -> Result<Uuid, EngineError> {
        let node = self.require_node_mut(node_id)?;
        let socket = template.instantiate();
        let id = socket.id;
        node.sockets_mut(direction).push(socket);
        Ok(id)
    }

    /// Remove a socket: every link touching it goes first, then the socket
    /// itself is detached and returned.
    pub fn remove_socket(&mut self, node_id: Uuid, socket_id: Uuid) -> Result<Socket, EngineError> {
        {
            let node = self.require_node(node_id)?;
            if !node.owns_socket(socket_id) {
                return Err(EngineError::invalid_argument(format!(
                    "socket {} not owned by node '{}'",
                    socket_id, node.name
                )));
            }
        }
        self.links
            .retain(|l| l.from.socket != socket_id && l.to.socket != socket_id);

        let node = self.require_node_mut(node_id)?;
        for side in [SocketDirection::Input, SocketDirection::Output] {
            let sockets = node.sockets_mut(side);
            if let Some(pos) = sockets.iter().position(|s| s.id == socket_id) {
                return Ok(sockets.remove(pos));
            }
        }
        Err(EngineError::invalid_argument(format!(
            "socket {} disappeared from node {} during removal",
            socket_id, node_id
        )))
    }

    /// Connect an output socket to an input socket.
    ///
    /// Any link already driving `to` is removed first, so the
    /// one-link-per-input invariant holds unconditionally.
    pub fn add_link(&mut self, from: SocketRef, to: SocketRef) -> Result<Uuid, EngineError> {
        if self.output_socket(from).is_none() {
            return Err(EngineError::invalid_argument(format!(
                "link source {:?} is not an output socket of this tree",
                from
            )));
        }
        if self.input_socket(to).is_none() {
            return Err(EngineError::invalid_argument(format!(
                "link target {:?} is not an input socket of this tree",
                to
            )));
        }
        if let Some(existing) = self.input_link(to.socket).map(|l| l.id) {
            debug!("replacing existing link on input socket {}", to.socket);
            self.remove_link(existing)?;
        }
        let link = Link::new(from, to);
        let id = link.id;
        self.links.push(link);
        Ok(id)
    }

    pub fn remove_link(&mut self, link_id: Uuid) -> Result<Link, EngineError> {
        let index = self
            .links
            .iter()
            .position(|l| l.id == link_id)
            .ok_or_else(|| EngineError::invalid_argument(format!("link {} not in tree '{}'", link_id, self.name)))?;
        Ok(self.links.remove(index))
    }

    /// Compositor change notification: drop the node's cached output buffers
    /// and flag it for re-execution. Deliberately does not propagate; callers
    /// walk dependents themselves when wider invalidation is needed.
    pub fn tag_changed(&mut self, node_id: Uuid) -> Result<(), EngineError> {
        if self.kind != TreeKind::Compositor {
            return Ok(());
        }
        let node = self.require_node_mut(node_id)?;
        for socket in &mut node.outputs {
            socket.cache = None;
        }
        node.need_exec = true;
        Ok(())
    }
}
