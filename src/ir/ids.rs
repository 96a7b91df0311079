//! Entity references into the graph store's arenas.
//!
//! Nodes, ports, and arcs are never referenced by live pointer -- every
//! cross-reference in this crate is one of these opaque indices, resolved
//! through the owning [`super::graph::GraphStore`]'s arenas. This is what
//! lets the store model cyclic structures (a node's ports point back at the
//! node, a context root's family container points back at the root, ...)
//! without reference counting.

use dataflow_entity::entity_impl;
use std::fmt;

/// A reference to a node in the graph store.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node(u32);
entity_impl!(Node, "n");

/// A reference to a port owned by some node.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Port(u32);
entity_impl!(Port, "p");

/// A reference to an arc connecting two ports.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Arc(u32);
entity_impl!(Arc, "a");

/// Any of the entities that a diagnostic can be anchored to.
///
/// Errors raised by the core (see [`crate::result::CoreError`]) carry one of
/// these so the caller can point back at the offending part of the graph.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub enum AnyEntity {
    /// The graph as a whole, not a specific entity within it.
    Graph,
    /// A node.
    Node(Node),
    /// A port.
    Port(Port),
    /// An arc.
    Arc(Arc),
}

impl fmt::Display for AnyEntity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            AnyEntity::Graph => write!(f, "<graph>"),
            AnyEntity::Node(n) => n.fmt(f),
            AnyEntity::Port(p) => p.fmt(f),
            AnyEntity::Arc(a) => a.fmt(f),
        }
    }
}

impl fmt::Debug for AnyEntity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        (self as &dyn fmt::Display).fmt(f)
    }
}

impl From<Node> for AnyEntity {
    fn from(n: Node) -> Self {
        AnyEntity::Node(n)
    }
}

impl From<Port> for AnyEntity {
    fn from(p: Port) -> Self {
        AnyEntity::Port(p)
    }
}

impl From<Arc> for AnyEntity {
    fn from(a: Arc) -> Self {
        AnyEntity::Arc(a)
    }
}
