//! Socket model for the node graph.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Semantic type of the value a socket carries.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SocketType {
    /// Single float
    Value,
    /// 3-component vector
    Vector,
    /// RGBA color
    Color,
    /// Pixel buffer (compositor)
    Image,
}

/// Direction of a socket on its node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketDirection {
    Input,
    Output,
}

/// A compositor pixel buffer. Opaque to the engine: node callbacks read and
/// write the float data, the engine only manages lifetime.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageBuf {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl ImageBuf {
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![0.0; width * height * channels],
        }
    }

    pub fn filled(width: usize, height: usize, channels: usize, value: f32) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![value; width * height * channels],
        }
    }
}

/// A value in the execution stack: one slot per output socket.
///
/// Buffers are shared via `Arc` so that fan-out to several consumers never
/// copies pixel data; releasing a slot just drops one reference.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum SocketValue {
    #[default]
    None,
    Value(f64),
    Vector([f64; 3]),
    Color([f64; 4]),
    Image(Arc<ImageBuf>),
}

impl SocketValue {
    pub fn as_value(&self, default: f64) -> f64 {
        match self {
            SocketValue::Value(v) => *v,
            _ => default,
        }
    }

    pub fn as_vector(&self, default: [f64; 3]) -> [f64; 3] {
        match self {
            SocketValue::Vector(v) => *v,
            _ => default,
        }
    }

    pub fn as_color(&self, default: [f64; 4]) -> [f64; 4] {
        match self {
            SocketValue::Color(c) => *c,
            _ => default,
        }
    }

    pub fn as_image(&self) -> Option<&Arc<ImageBuf>> {
        match self {
            SocketValue::Image(img) => Some(img),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, SocketValue::None)
    }
}

/// Identifies a specific socket on a specific node.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SocketRef {
    pub node: Uuid,
    pub socket: Uuid,
}

impl SocketRef {
    pub fn new(node: Uuid, socket: Uuid) -> Self {
        Self { node, socket }
    }
}

/// An input or output terminal on a node.
///
/// The persistent fields describe the socket as edited and saved; everything
/// under "execution state" is assigned by the stack allocator when an
/// execution context begins and is meaningless outside of it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Socket {
    pub id: Uuid,
    pub name: String,
    pub data_type: SocketType,
    /// Literal value used when the socket is unlinked. Unused components
    /// stay zero for scalar/vector types.
    pub default_value: [f64; 4],
    pub min: f64,
    pub max: f64,
    /// Stable external index once exposed on a group boundary; 0 = never
    /// exposed. Must survive edits so existing group instances keep their
    /// wiring.
    #[serde(default)]
    pub own_index: u32,
    /// Consumed by an in-group link, therefore hidden from the boundary.
    #[serde(default)]
    pub intern: bool,

    // --- execution state (valid only while an execution context is live) ---
    #[serde(skip)]
    pub stack_index: Option<usize>,
    #[serde(skip)]
    pub stack_index_ext: Option<usize>,
    #[serde(skip)]
    pub has_producer: bool,
    #[serde(skip)]
    pub has_consumer: bool,
    /// Compositor result buffer kept between runs until invalidated.
    #[serde(skip)]
    pub cache: Option<SocketValue>,
}

impl Socket {
    pub fn new(name: &str, data_type: SocketType) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            data_type,
            default_value: [0.0; 4],
            min: 0.0,
            max: 1.0,
            own_index: 0,
            intern: false,
            stack_index: None,
            stack_index_ext: None,
            has_producer: false,
            has_consumer: false,
            cache: None,
        }
    }

    /// The stack value this socket yields when nothing drives it.
    pub fn default_stack_value(&self) -> SocketValue {
        let v = self.default_value;
        match self.data_type {
            SocketType::Value => SocketValue::Value(v[0]),
            SocketType::Vector => SocketValue::Vector([v[0], v[1], v[2]]),
            SocketType::Color => SocketValue::Color(v),
            SocketType::Image => SocketValue::None,
        }
    }

    /// Drop all execution-scoped state.
    pub fn clear_exec_state(&mut self) {
        self.stack_index = None;
        self.stack_index_ext = None;
        self.has_producer = false;
        self.has_consumer = false;
    }
}
