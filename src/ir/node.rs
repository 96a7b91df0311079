//! Nodes: vertices of the dataflow graph, polymorphic over a capability set.
//!
//! Every node shares a common header (id is implicit in the `Node` key,
//! name, parent, partition, ports, context stack, scheduled order) plus a
//! variant payload in `NodeKind`. Capability queries dispatch on the
//! variant tag rather than through a trait object, keeping nodes plain
//! data that the graph store's arena can own directly.

use crate::ir::context::ContextStack;
use crate::ir::ids::{Node, Port};
use crate::ir::value::NumericValue;
use std::collections::HashMap;

/// The five singleton nodes that always exist, one per graph.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MasterKind {
    /// Sole source of externally-supplied input values.
    Input,
    /// Sole sink of externally-observable output values.
    Output,
    /// Sink for visualization taps (scope/display blocks).
    Visualization,
    /// Sink for order-constraint-only termination (e.g. unused order ports).
    Terminator,
    /// Sink that every disconnected port is rewired to after pruning.
    Unconnected,
}

/// Specialization required of a clock-domain subsystem before it can act as
/// a context root.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ClockDomainKind {
    /// Upsampling rate change.
    Upsample,
    /// Downsampling rate change.
    Downsample,
}

/// Shared data for any context root (enabled subsystem, clock domain, mux).
#[derive(Clone, Debug, Default)]
pub struct ContextRootData {
    /// Number of numbered sub-contexts this root has (1 for enabled
    /// subsystems and clock domains, N for an N-input mux).
    pub sub_context_count: u32,
    /// Map from partition number to this root's family container in that
    /// partition.
    pub family_containers: HashMap<i32, Node>,
    /// Whether this root's driver(s) should be replicated per partition
    /// instead of crossing partitions via a FIFO.
    pub replicate_driver: bool,
}

impl ContextRootData {
    /// Construct a new context root with `sub_context_count` numbered
    /// sub-contexts.
    pub fn new(sub_context_count: u32) -> Self {
        ContextRootData {
            sub_context_count,
            family_containers: HashMap::new(),
            replicate_driver: false,
        }
    }
}

/// Data shared by every node that owns children in the hierarchy.
#[derive(Clone, Debug, Default)]
pub struct SubsystemData {
    /// Direct children of this subsystem.
    pub children: Vec<Node>,
}

/// Which flavor of state-update this is, used when a stateful node's update
/// must be split into latching/zero-filling halves.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum StateUpdateVariant {
    /// The ordinary single state-update for a stateful node.
    Plain,
    /// The "hold last value" half of an enable-output/upsample-output update,
    /// placed in sub-context 0 of the governing clock-domain family container.
    Latching,
    /// The "write zero" half of the same split, placed in sub-context 1.
    ZeroFilling,
}

/// A blackbox (user-authored) node's declared combinational-path surface.
///
/// There is no static verification that this list is accurate -- the core
/// simply trusts it.
#[derive(Clone, Debug, Default)]
pub struct BlackboxData {
    /// Output ports registered as combinationally dependent on *some* input;
    /// only arcs leaving these ports are disconnected when the scheduler's
    /// pre-conditions run.
    pub registered_output_ports: Vec<Port>,
}

/// Per-port vectorization and initial-condition state for a thread-crossing
/// FIFO.
#[derive(Clone, Debug, Default)]
pub struct FifoPortData {
    /// Granularity of one transfer on this port.
    pub block_size: u32,
    /// Inner-loop step size within one transfer, on the input side.
    pub sub_block_in: u32,
    /// Inner-loop step size within one transfer, on the output side.
    pub sub_block_out: u32,
    /// Initial conditions delivered before any produced element.
    pub initial_conditions: Vec<NumericValue>,
}

/// How the emitter should copy data in and out of a FIFO's backing buffer;
/// purely a hint carried through to the (external) C emitter.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CopyMode {
    /// `memcpy` inlined by the compiler for small, statically-known sizes.
    ClangMemcpyInlined,
    /// Unaligned fast-path copy.
    FastCopyUnaligned,
    /// Plain `memcpy`.
    Memcpy,
}

/// A thread-crossing FIFO's full state.
#[derive(Clone, Debug, Default)]
pub struct FifoData {
    /// Capacity in blocks.
    pub depth: u32,
    /// Per-port state, indexed the same way as the node's port lists.
    pub ports: Vec<FifoPortData>,
    /// Emission hint for the backend.
    pub copy_mode: Option<CopyMode>,
}

/// The variant payload distinguishing one kind of node from another.
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// A primitive compute node (arithmetic, compare, trig, ...); semantics
    /// are owned by an external shim, the core only needs to know whether
    /// it holds state and/or has a combinational path, and -- for
    /// blackboxes -- which outputs are registered as combinational.
    Primitive {
        /// The imported block-function tag, e.g. `"Compare"`.
        block_function: String,
        /// Whether this node holds state across invocations.
        has_state: bool,
        /// Whether *any* input combinationally reaches *some* output.
        has_combinational_path: bool,
        /// Present only for user-authored blackbox nodes.
        blackbox: Option<BlackboxData>,
    },
    /// A non-leaf, non-context-root grouping node.
    Subsystem(SubsystemData),
    /// A context root over an enable boolean.
    EnabledSubsystem(SubsystemData, ContextRootData),
    /// A context root over a rate-change relationship. `None` means the
    /// clock domain has not yet been specialized into an upsample or
    /// downsample variant -- context discovery treats that as an error.
    ClockDomain(SubsystemData, ContextRootData, Option<ClockDomainKind>),
    /// A context root with N sub-contexts selected by an integer.
    Mux(ContextRootData),
    /// An upsample/downsample rate-change leaf, living inside a clock domain.
    RateChange(ClockDomainKind),
    /// A delay-like state node holding `initial_conditions.len()` past values.
    Delay {
        /// Values emitted before the first real input has propagated.
        initial_conditions: Vec<NumericValue>,
        /// Number of cycles of delay.
        depth: u32,
    },
    /// The register-to-next-state commit for a stateful node.
    StateUpdate {
        /// The stateful node this commits.
        primary: Node,
        /// Which half of a split update this is.
        variant: StateUpdateVariant,
    },
    /// Assigns a mux-like context root's selected output to its context
    /// variable, placed inside the relevant sub-context.
    ContextVariableUpdate {
        /// The owning context root.
        context_root: Node,
        /// Which of the root's context variables this updates.
        variable_index: u32,
    },
    /// One per (context-root, partition) pair; holds that root's
    /// sub-context containers for that partition.
    ContextFamilyContainer {
        /// The context root this family belongs to.
        context_root: Node,
        /// The sub-context containers built under this family so far.
        children: Vec<Node>,
    },
    /// Holds the nodes belonging to one sub-context of one family container.
    ContextContainer {
        /// The owning family container.
        family: Node,
        /// Which sub-context this is.
        sub_context: u32,
        /// The nodes migrated into this sub-context.
        children: Vec<Node>,
    },
    /// A placeholder standing in for a context root in a partition where
    /// the root does not physically live.
    DummyReplica {
        /// The context root this replicates.
        target_root: Node,
    },
    /// The sole inter-thread communication primitive.
    ThreadCrossingFifo(FifoData),
    /// One of the five singletons.
    Master(MasterKind),
}

impl NodeKind {
    /// `true` if this node holds state that is not simply a combinational
    /// pass-through.
    pub fn has_state(&self) -> bool {
        match self {
            NodeKind::Primitive { has_state, .. } => *has_state,
            NodeKind::Delay { .. } => true,
            _ => false,
        }
    }

    /// `true` if some output is combinationally reachable from some input.
    pub fn has_combinational_path(&self) -> bool {
        match self {
            NodeKind::Primitive {
                has_combinational_path,
                ..
            } => *has_combinational_path,
            NodeKind::Mux(_) => true,
            NodeKind::RateChange(_) => false,
            _ => false,
        }
    }

    /// `true` if this node can be expanded into sub-block-sized primitives.
    pub fn can_expand(&self) -> bool {
        matches!(self, NodeKind::Primitive { .. })
    }

    /// `true` for enabled subsystems, clock domains, and muxes.
    pub fn is_context_root(&self) -> bool {
        matches!(
            self,
            NodeKind::EnabledSubsystem(..) | NodeKind::ClockDomain(..) | NodeKind::Mux(_)
        )
    }

    /// `true` for ordinary compute primitives.
    pub fn is_primitive(&self) -> bool {
        matches!(self, NodeKind::Primitive { .. })
    }

    /// `true` for the five graph-wide singletons.
    pub fn is_master(&self) -> bool {
        matches!(self, NodeKind::Master(_))
    }

    /// `true` for any node that groups children (subsystem or context root).
    pub fn is_subsystem_like(&self) -> bool {
        matches!(
            self,
            NodeKind::Subsystem(_) | NodeKind::EnabledSubsystem(..) | NodeKind::ClockDomain(..)
        )
    }

    /// Borrow this node's context-root data, if it is one.
    pub fn context_root_data(&self) -> Option<&ContextRootData> {
        match self {
            NodeKind::EnabledSubsystem(_, root) | NodeKind::ClockDomain(_, root, _) => Some(root),
            NodeKind::Mux(root) => Some(root),
            _ => None,
        }
    }

    /// Mutably borrow this node's context-root data, if it is one.
    pub fn context_root_data_mut(&mut self) -> Option<&mut ContextRootData> {
        match self {
            NodeKind::EnabledSubsystem(_, root) | NodeKind::ClockDomain(_, root, _) => Some(root),
            NodeKind::Mux(root) => Some(root),
            _ => None,
        }
    }

    /// Borrow this node's child list, if it has one.
    pub fn children(&self) -> Option<&[Node]> {
        match self {
            NodeKind::Subsystem(data) => Some(&data.children),
            NodeKind::EnabledSubsystem(data, _) => Some(&data.children),
            NodeKind::ClockDomain(data, _, _) => Some(&data.children),
            NodeKind::ContextFamilyContainer { children, .. } => Some(children),
            NodeKind::ContextContainer { children, .. } => Some(children),
            _ => None,
        }
    }

    /// Mutably borrow this node's child list, if it has one.
    pub fn children_mut(&mut self) -> Option<&mut Vec<Node>> {
        match self {
            NodeKind::Subsystem(data) => Some(&mut data.children),
            NodeKind::EnabledSubsystem(data, _) => Some(&mut data.children),
            NodeKind::ClockDomain(data, _, _) => Some(&mut data.children),
            NodeKind::ContextFamilyContainer { children, .. } => Some(children),
            NodeKind::ContextContainer { children, .. } => Some(children),
            _ => None,
        }
    }
}

/// A graph vertex: the common header plus its [`NodeKind`] payload.
#[derive(Clone, Debug)]
pub struct NodeData {
    /// Human-readable display name.
    pub name: String,
    /// Parent in the hierarchy; `None` for top-level nodes and masters.
    pub parent: Option<Node>,
    /// Runtime thread this node is assigned to; `-1` means unassigned.
    pub partition: i32,
    /// Sub-blocking length; `-1` means unassigned.
    pub sub_blocking_length: i32,
    /// Ordered input ports.
    pub input_ports: Vec<Port>,
    /// Ordered output ports.
    pub output_ports: Vec<Port>,
    /// The enable input/output port, if this node has one.
    pub enable_port: Option<Port>,
    /// The select input port, if this node is a mux.
    pub select_port: Option<Port>,
    /// The order-constraint-in port, if allocated.
    pub order_constraint_in: Option<Port>,
    /// The order-constraint-out port, if allocated.
    pub order_constraint_out: Option<Port>,
    /// This node's enclosing contexts, outermost first.
    pub context_stack: ContextStack,
    /// Position assigned by the scheduler; `None` before scheduling.
    pub schedule_order: Option<u32>,
    /// The variant payload.
    pub kind: NodeKind,
}

impl NodeData {
    /// Construct a new node with no ports, no context, and no parent.
    pub fn new(name: impl Into<String>, parent: Option<Node>, kind: NodeKind) -> Self {
        NodeData {
            name: name.into(),
            parent,
            partition: -1,
            sub_blocking_length: -1,
            input_ports: Vec::new(),
            output_ports: Vec::new(),
            enable_port: None,
            select_port: None,
            order_constraint_in: None,
            order_constraint_out: None,
            context_stack: ContextStack::empty(),
            schedule_order: None,
            kind,
        }
    }

    /// `true` if this node holds state without a combinational path -- the
    /// condition under which a state-update node is synthesized and its
    /// output arcs are disconnected from the rest of the schedule.
    pub fn has_unclocked_state(&self) -> bool {
        self.kind.has_state() && !self.kind.has_combinational_path()
    }
}
