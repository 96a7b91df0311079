//! The dataflow graph itself: nodes, ports, arcs, data types, context
//! stacks, and the arena-backed graph store that owns all of them.

pub mod arc;
pub mod context;
pub mod datatype;
pub mod graph;
pub mod ids;
pub mod node;
pub mod port;
pub mod value;

pub use arc::ArcData;
pub use context::{ContextFrame, ContextStack};
pub use datatype::DataType;
pub use graph::{GraphEdit, GraphStore, Masters};
pub use ids::{AnyEntity, Arc, Node, Port};
pub use node::{
    BlackboxData, ClockDomainKind, ContextRootData, CopyMode, FifoData, FifoPortData, MasterKind,
    NodeData, NodeKind, StateUpdateVariant, SubsystemData,
};
pub use port::{PortData, PortKind};
pub use value::NumericValue;
