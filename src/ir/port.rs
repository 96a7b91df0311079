//! Ports: named connection points owned exclusively by one node.

use crate::ir::ids::{Arc, Node};
use smallvec::SmallVec;

/// Which kind of port this is.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PortKind {
    /// A regular input; at most one driving arc.
    Input,
    /// A regular output; may drive many arcs, all sharing type and sample time.
    Output,
    /// The boolean enable input/output of an enable context.
    Enable,
    /// The integer select input of a mux.
    Select,
    /// An order-constraint input; may have multiple drivers, may be
    /// disconnected, carries no data.
    OrderConstraintIn,
    /// An order-constraint output; may be disconnected, carries no data.
    OrderConstraintOut,
}

impl PortKind {
    /// `true` for the two order-constraint variants.
    pub fn is_order_constraint(self) -> bool {
        matches!(self, PortKind::OrderConstraintIn | PortKind::OrderConstraintOut)
    }

    /// `true` for input-direction ports (data or order-constraint-in).
    pub fn is_input(self) -> bool {
        matches!(self, PortKind::Input | PortKind::Enable | PortKind::Select | PortKind::OrderConstraintIn)
    }

    /// `true` for output-direction ports (data or order-constraint-out).
    pub fn is_output(self) -> bool {
        matches!(self, PortKind::Output | PortKind::OrderConstraintOut)
    }

    /// Whether this port kind permits more than one driving arc.
    pub fn allows_multiple_drivers(self) -> bool {
        matches!(self, PortKind::OrderConstraintIn)
    }
}

/// A port's data, owned by exactly one node for its whole life.
#[derive(Clone, Debug)]
pub struct PortData {
    /// The node this port belongs to.
    pub owner: Node,
    /// Which kind of port this is.
    pub kind: PortKind,
    /// Position among the owner's ports of the same direction (0-based).
    pub index: u32,
    /// Arcs attached to this port: for an input port, normally 0 or 1
    /// (more only if `kind.allows_multiple_drivers()`); for an output port,
    /// as many as fan out from it.
    pub arcs: SmallVec<[Arc; 2]>,
}

impl PortData {
    /// Construct a new, unconnected port.
    pub fn new(owner: Node, kind: PortKind, index: u32) -> Self {
        PortData {
            owner,
            kind,
            index,
            arcs: SmallVec::new(),
        }
    }

    /// Number of arcs currently attached.
    pub fn arc_count(&self) -> usize {
        self.arcs.len()
    }

    /// `true` if no arc is attached.
    pub fn is_disconnected(&self) -> bool {
        self.arcs.is_empty()
    }
}
