pub mod error;
pub mod exec;
pub mod group;
pub mod model;
pub mod registry;

pub use error::EngineError;
pub use exec::{ExecCtx, begin_exec, end_exec, exec_tree, mark_needs_exec, stack_value};
pub use group::{build_group_type, make_group, ungroup};
pub use model::link::Link;
pub use model::node::{GROUP_TYPE, LEVEL_UNLINKED, Node};
pub use model::property::{PropertyMap, PropertyValue};
pub use model::socket::{
    ImageBuf, Socket, SocketDirection, SocketRef, SocketType, SocketValue,
};
pub use model::sort::{cycle_links, sort_nodes};
pub use model::tree::{NodeTree, TreeKind};
pub use registry::{
    NodeClass, NodeExecFn, SocketTemplate, TypeDescriptor, TypeRegistry, resolve_types,
    verify_node,
};
