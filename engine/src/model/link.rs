//! Link model: a directed edge between two sockets.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::socket::SocketRef;

/// A connection from one node's output socket to another node's input socket.
///
/// Fan-out from an output is unrestricted; each input socket accepts at most
/// one inbound link (enforced by the store).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Link {
    pub id: Uuid,
    /// Source (an output socket)
    pub from: SocketRef,
    /// Destination (an input socket)
    pub to: SocketRef,
}

impl Link {
    pub fn new(from: SocketRef, to: SocketRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            from,
            to,
        }
    }
}
