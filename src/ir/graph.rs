//! The graph store: owns nodes, arcs, and ports, and provides the
//! hierarchy traversal, cloning, and atomic mutation primitives every later
//! pass is built on.
//!
//! Nodes, ports, and arcs are arena-allocated records keyed by stable ids
//! (never live pointers), so deletion is just zeroing an arena slot and
//! scrubbing the id out of every index that pointed at it -- there is no
//! reference counting and no "weak" port reference type to get wrong.

use std::collections::HashMap;

use dataflow_entity::{EntityRef, PrimaryMap};
use log::trace;

use crate::ir::arc::ArcData;
use crate::ir::ids::{AnyEntity, Arc, Node, Port};
use crate::ir::node::{MasterKind, NodeData, NodeKind};
use crate::ir::port::{PortData, PortKind};
use crate::result::{CoreError, CoreResult};

/// The five always-present singleton nodes.
#[derive(Copy, Clone, Debug)]
pub struct Masters {
    /// Sole source of externally-supplied input values.
    pub input: Node,
    /// Sole sink of externally-observable output values.
    pub output: Node,
    /// Sink for visualization taps.
    pub visualization: Node,
    /// Sink for order-constraint-only termination.
    pub terminator: Node,
    /// Sink every disconnected port is rewired to after pruning.
    pub unconnected: Node,
}

/// Owns every node, port, and arc in one graph.
pub struct GraphStore {
    nodes: PrimaryMap<Node, Option<NodeData>>,
    ports: PrimaryMap<Port, Option<PortData>>,
    arcs: PrimaryMap<Arc, Option<ArcData>>,
    top_level: Vec<Node>,
    masters: Masters,
}

/// A batch of removals and additions applied atomically by
/// [`GraphStore::apply_edit`].
#[derive(Default)]
pub struct GraphEdit {
    /// Arcs to disconnect and drop.
    pub remove_arcs: Vec<Arc>,
    /// Nodes to remove, cascading to their ports and any arcs still
    /// attached to those ports.
    pub remove_nodes: Vec<Node>,
    /// New arcs to connect after the removals above have taken effect.
    pub add_arcs: Vec<ArcData>,
}

impl GraphStore {
    /// Construct an empty graph, seeded with the five master nodes.
    pub fn new() -> Self {
        let mut nodes = PrimaryMap::new();
        let mut push_master = |kind: MasterKind, name: &str| -> Node {
            nodes.push(Some(NodeData::new(name, None, NodeKind::Master(kind))))
        };
        let input = push_master(MasterKind::Input, "Input");
        let output = push_master(MasterKind::Output, "Output");
        let visualization = push_master(MasterKind::Visualization, "Visualization");
        let terminator = push_master(MasterKind::Terminator, "Terminator");
        let unconnected = push_master(MasterKind::Unconnected, "Unconnected");
        GraphStore {
            nodes,
            ports: PrimaryMap::new(),
            arcs: PrimaryMap::new(),
            top_level: Vec::new(),
            masters: Masters {
                input,
                output,
                visualization,
                terminator,
                unconnected,
            },
        }
    }

    /// The five singleton masters.
    pub fn masters(&self) -> Masters {
        self.masters
    }

    /// Nodes with no parent (other than the masters, which are tracked
    /// separately).
    pub fn top_level(&self) -> &[Node] {
        &self.top_level
    }

    // ---- lookup -----------------------------------------------------

    /// `true` if `n` refers to a live (not-yet-removed) node.
    pub fn node_is_live(&self, n: Node) -> bool {
        self.nodes.get(n).map_or(false, |slot| slot.is_some())
    }

    /// Borrow a node's data.
    pub fn node(&self, n: Node) -> &NodeData {
        self.nodes[n]
            .as_ref()
            .unwrap_or_else(|| panic!("access to removed node {}", n))
    }

    /// Mutably borrow a node's data.
    pub fn node_mut(&mut self, n: Node) -> &mut NodeData {
        self.nodes[n]
            .as_mut()
            .unwrap_or_else(|| panic!("access to removed node {}", n))
    }

    /// Borrow a port's data.
    pub fn port(&self, p: Port) -> &PortData {
        self.ports[p]
            .as_ref()
            .unwrap_or_else(|| panic!("access to removed port {}", p))
    }

    /// Mutably borrow a port's data.
    pub fn port_mut(&mut self, p: Port) -> &mut PortData {
        self.ports[p]
            .as_mut()
            .unwrap_or_else(|| panic!("access to removed port {}", p))
    }

    /// Borrow an arc's data.
    pub fn arc(&self, a: Arc) -> &ArcData {
        self.arcs[a]
            .as_ref()
            .unwrap_or_else(|| panic!("access to removed arc {}", a))
    }

    /// Iterate the ids of every live node.
    pub fn node_ids(&self) -> impl Iterator<Item = Node> + '_ {
        self.nodes
            .keys()
            .filter(move |&n| self.nodes[n].is_some())
    }

    /// Iterate the ids of every live arc.
    pub fn arc_ids(&self) -> impl Iterator<Item = Arc> + '_ {
        self.arcs.keys().filter(move |&a| self.arcs[a].is_some())
    }

    // ---- construction -------------------------------------------------

    /// Create a new node and, if it has a parent, append it to that
    /// parent's child list. Top-level (parentless) nodes are appended to
    /// [`Self::top_level`].
    pub fn create_node(&mut self, data: NodeData) -> Node {
        let parent = data.parent;
        let id = self.nodes.push(Some(data));
        match parent {
            Some(p) => {
                if let Some(children) = self.node_mut(p).kind.children_mut() {
                    children.push(id);
                } else {
                    panic!("parent {} of new node {} cannot hold children", p, id);
                }
            }
            None => self.top_level.push(id),
        }
        id
    }

    /// Move `n` out of its current parent's child list (or [`Self::top_level`])
    /// and into `new_parent`'s, updating `n`'s own `parent` field. Used by
    /// encapsulation to migrate nodes into the context containers built for
    /// them and to place newly-synthesized containers in the hierarchy.
    pub fn reparent(&mut self, n: Node, new_parent: Option<Node>) {
        let old_parent = self.node(n).parent;
        match old_parent {
            Some(p) => {
                if let Some(children) = self.node_mut(p).kind.children_mut() {
                    children.retain(|&c| c != n);
                }
            }
            None => self.top_level.retain(|&c| c != n),
        }
        match new_parent {
            Some(p) => {
                if let Some(children) = self.node_mut(p).kind.children_mut() {
                    children.push(n);
                } else {
                    panic!("new parent {} of node {} cannot hold children", p, n);
                }
            }
            None => self.top_level.push(n),
        }
        self.node_mut(n).parent = new_parent;
    }

    /// Allocate a new port of the given kind on `owner`, appending it to
    /// the appropriate ordered port list.
    pub fn create_port(&mut self, owner: Node, kind: PortKind) -> Port {
        let index = match kind {
            PortKind::Input => self.node(owner).input_ports.len() as u32,
            PortKind::Output => self.node(owner).output_ports.len() as u32,
            _ => 0,
        };
        let id = self.ports.push(Some(PortData::new(owner, kind, index)));
        let node = self.node_mut(owner);
        match kind {
            PortKind::Input => node.input_ports.push(id),
            PortKind::Output => node.output_ports.push(id),
            PortKind::Enable => node.enable_port = Some(id),
            PortKind::Select => node.select_port = Some(id),
            PortKind::OrderConstraintIn => node.order_constraint_in = Some(id),
            PortKind::OrderConstraintOut => node.order_constraint_out = Some(id),
        }
        id
    }

    /// Connect `src` to `dst` with a fresh arc, enforcing the single-driver
    /// rule for ordinary input ports.
    pub fn create_arc(&mut self, data: ArcData) -> CoreResult<Arc> {
        let dst_kind = self.port(data.dst).kind;
        if !dst_kind.allows_multiple_drivers() && !self.port(data.dst).is_disconnected() {
            return Err(CoreError::StructuralViolation {
                location: AnyEntity::Port(data.dst),
                context: format!(
                    "port {} on node {} already has a driving arc",
                    data.dst,
                    self.port(data.dst).owner
                ),
            });
        }
        let src = data.src;
        let dst = data.dst;
        let id = self.arcs.push(Some(data));
        self.port_mut(src).arcs.push(id);
        self.port_mut(dst).arcs.push(id);
        Ok(id)
    }

    /// Connect `src` to `dst` with a fresh arc, without the single-driver
    /// check -- used internally once a caller has already established the
    /// invariant holds (e.g. cloning, or order-constraint-in ports, which
    /// permit multiple drivers).
    pub fn create_arc_unchecked(&mut self, data: ArcData) -> Arc {
        let src = data.src;
        let dst = data.dst;
        let id = self.arcs.push(Some(data));
        self.port_mut(src).arcs.push(id);
        self.port_mut(dst).arcs.push(id);
        id
    }

    // ---- destruction ----------------------------------------------------

    /// Detach and remove a single arc, scrubbing its id from both endpoint
    /// ports' arc lists.
    pub fn remove_arc(&mut self, a: Arc) {
        let data = match self.arcs[a].take() {
            Some(d) => d,
            None => return,
        };
        self.port_mut(data.src).arcs.retain(|&x| x != a);
        self.port_mut(data.dst).arcs.retain(|&x| x != a);
    }

    /// Remove a node, cascading to: every arc still attached to one of its
    /// ports, its entry in its parent's child list (or `top_level`), its
    /// entry in any context root's `family_containers` map, and -- if it is
    /// itself a context root -- every other node's dangling reference back
    /// to it is the caller's responsibility (nodes are never force-removed
    /// out from under a live context).
    pub fn remove_node(&mut self, n: Node) {
        let data = match self.nodes[n].take() {
            Some(d) => d,
            None => return,
        };
        for &p in data.input_ports.iter().chain(data.output_ports.iter()) {
            self.remove_port_arcs(p);
            self.ports[p] = None;
        }
        for p in [
            data.enable_port,
            data.select_port,
            data.order_constraint_in,
            data.order_constraint_out,
        ]
        .into_iter()
        .flatten()
        {
            self.remove_port_arcs(p);
            self.ports[p] = None;
        }
        match data.parent {
            Some(parent) if self.node_is_live(parent) => {
                if let Some(children) = self.node_mut(parent).kind.children_mut() {
                    children.retain(|&c| c != n);
                }
            }
            _ => self.top_level.retain(|&c| c != n),
        }
        // Scrub this node out of every context root's per-partition map.
        for id in self.node_ids().collect::<Vec<_>>() {
            if let Some(root) = self.node_mut(id).kind.context_root_data_mut() {
                root.family_containers.retain(|_, v| *v != n);
            }
        }
        trace!("removed node {}", n);
    }

    fn remove_port_arcs(&mut self, p: Port) {
        let arcs: Vec<Arc> = self.port(p).arcs.iter().copied().collect();
        for a in arcs {
            self.remove_arc(a);
        }
    }

    /// Apply a batch of removals followed by additions as a single atomic
    /// step: callers compute the whole diff first (e.g. rewiring, which
    /// must disconnect old arcs and add new arcs atomically) and hand it
    /// to one call so no intermediate state is observable.
    pub fn apply_edit(&mut self, edit: GraphEdit) -> Vec<Arc> {
        for a in edit.remove_arcs {
            self.remove_arc(a);
        }
        for n in edit.remove_nodes {
            self.remove_node(n);
        }
        edit.add_arcs
            .into_iter()
            .map(|data| self.create_arc_unchecked(data))
            .collect()
    }

    // ---- traversal ------------------------------------------------------

    /// Collect every descendant of `root` (not including `root` itself),
    /// optionally stopping recursion at context-family-containers and
    /// optionally filtering to a single partition.
    pub fn descendants_of(
        &self,
        root: Node,
        stop_at_family_containers: bool,
        partition: Option<i32>,
    ) -> Vec<Node> {
        let mut out = Vec::new();
        let mut stack: Vec<Node> = match self.node(root).kind.children() {
            Some(children) => children.to_vec(),
            None => Vec::new(),
        };
        while let Some(n) = stack.pop() {
            let keep = partition.map_or(true, |p| self.node(n).partition == p);
            if keep {
                out.push(n);
            }
            let is_family = matches!(self.node(n).kind, NodeKind::ContextFamilyContainer { .. });
            if is_family && stop_at_family_containers {
                continue;
            }
            if let Some(children) = self.node(n).kind.children() {
                stack.extend(children.iter().copied());
            }
        }
        out
    }

    /// Walk the weakly-connected components of the live graph, grouping
    /// nodes that are joined by any arc (data or order-constraint) in
    /// either direction.
    pub fn connected_components(&self) -> Vec<Vec<Node>> {
        let mut visited: HashMap<Node, bool> = HashMap::new();
        let mut components = Vec::new();
        for start in self.node_ids() {
            if visited.contains_key(&start) {
                continue;
            }
            let mut component = Vec::new();
            let mut stack = vec![start];
            visited.insert(start, true);
            while let Some(n) = stack.pop() {
                component.push(n);
                for neighbor in self.neighbors_of(n) {
                    if !visited.contains_key(&neighbor) {
                        visited.insert(neighbor, true);
                        stack.push(neighbor);
                    }
                }
            }
            component.sort_by_key(|n| n.index());
            components.push(component);
        }
        components
    }

    fn neighbors_of(&self, n: Node) -> Vec<Node> {
        let data = self.node(n);
        let mut out = Vec::new();
        let all_ports = data
            .input_ports
            .iter()
            .chain(data.output_ports.iter())
            .copied()
            .chain(data.enable_port)
            .chain(data.select_port)
            .chain(data.order_constraint_in)
            .chain(data.order_constraint_out);
        for p in all_ports {
            for &a in &self.port(p).arcs {
                let arc = self.arc(a);
                let other_port = if arc.src == p { arc.dst } else { arc.src };
                out.push(self.port(other_port).owner);
            }
        }
        out
    }

    // ---- cloning ---------------------------------------------------------

    /// Deep-clone the whole live graph, returning the clone together with
    /// node-id maps in both directions. Used by the scheduler to sort a
    /// disposable copy without mutating the canonical graph.
    pub fn clone_graph(&self) -> (GraphStore, HashMap<Node, Node>, HashMap<Node, Node>) {
        let mut copy = GraphStore {
            nodes: PrimaryMap::new(),
            ports: PrimaryMap::new(),
            arcs: PrimaryMap::new(),
            top_level: Vec::new(),
            masters: self.masters,
        };
        let mut orig_to_copy_node: HashMap<Node, Node> = HashMap::new();
        let mut copy_to_orig_node: HashMap<Node, Node> = HashMap::new();
        let mut orig_to_copy_port: HashMap<Port, Port> = HashMap::new();

        // Pass 1: clone every node's header + ports verbatim, carrying
        // self-referential node links (parent, context roots, etc.) as the
        // *original* ids for now.
        for n in self.node_ids() {
            let orig = self.node(n).clone();
            let new_id = copy.nodes.push(Some(orig));
            orig_to_copy_node.insert(n, new_id);
            copy_to_orig_node.insert(new_id, n);
        }
        for p in self.ports.keys() {
            if let Some(orig) = &self.ports[p] {
                let new_id = copy.ports.push(Some(orig.clone()));
                orig_to_copy_port.insert(p, new_id);
            } else {
                copy.ports.push(None);
            }
        }
        for a in self.arc_ids() {
            let orig = self.arc(a).clone();
            copy.arcs.push(Some(orig));
        }

        // Pass 2: translate every id that was copied verbatim in pass 1.
        for (&_orig, &new_id) in orig_to_copy_node.iter() {
            let data = copy.nodes[new_id].as_mut().unwrap();
            data.parent = data.parent.and_then(|p| orig_to_copy_node.get(&p).copied());
            data.schedule_order = None;
            for p in data
                .input_ports
                .iter_mut()
                .chain(data.output_ports.iter_mut())
            {
                *p = orig_to_copy_port[p];
            }
            for p in [
                &mut data.enable_port,
                &mut data.select_port,
                &mut data.order_constraint_in,
                &mut data.order_constraint_out,
            ] {
                if let Some(port) = p {
                    *port = orig_to_copy_port[port];
                }
            }
            if let Some(children) = data.kind.children_mut() {
                for c in children.iter_mut() {
                    *c = orig_to_copy_node[c];
                }
            }
            match &mut data.kind {
                NodeKind::StateUpdate { primary, .. } => {
                    *primary = orig_to_copy_node[primary];
                }
                NodeKind::ContextVariableUpdate { context_root, .. } => {
                    *context_root = orig_to_copy_node[context_root];
                }
                NodeKind::ContextFamilyContainer { context_root, .. } => {
                    *context_root = orig_to_copy_node[context_root];
                }
                NodeKind::ContextContainer { family, .. } => {
                    *family = orig_to_copy_node[family];
                }
                NodeKind::DummyReplica { target_root } => {
                    *target_root = orig_to_copy_node[target_root];
                }
                _ => {}
            }
            if let Some(root) = data.kind.context_root_data_mut() {
                root.family_containers = root
                    .family_containers
                    .iter()
                    .map(|(&part, &n)| (part, orig_to_copy_node[&n]))
                    .collect();
            }
        }
        // Context stacks reference context roots by `Node`; translate them.
        for (_, &new_id) in orig_to_copy_node.iter() {
            let translated: Vec<crate::ir::context::ContextFrame> = copy.nodes[new_id]
                .as_ref()
                .unwrap()
                .context_stack
                .frames()
                .iter()
                .map(|f| crate::ir::context::ContextFrame::new(orig_to_copy_node[&f.root], f.sub_context))
                .collect();
            let mut stack = crate::ir::context::ContextStack::empty();
            for f in translated {
                stack.push(f);
            }
            copy.nodes[new_id].as_mut().unwrap().context_stack = stack;
        }
        for p in copy.ports.keys() {
            if let Some(port) = copy.ports[p].as_mut() {
                port.owner = orig_to_copy_node[&port.owner];
            }
        }
        for a in copy.arcs.keys() {
            if let Some(arc) = copy.arcs[a].as_mut() {
                arc.src = orig_to_copy_port[&arc.src];
                arc.dst = orig_to_copy_port[&arc.dst];
            }
        }
        for &n in &self.top_level {
            copy.top_level.push(orig_to_copy_node[&n]);
        }
        copy.masters = Masters {
            input: orig_to_copy_node[&self.masters.input],
            output: orig_to_copy_node[&self.masters.output],
            visualization: orig_to_copy_node[&self.masters.visualization],
            terminator: orig_to_copy_node[&self.masters.terminator],
            unconnected: orig_to_copy_node[&self.masters.unconnected],
        };

        (copy, orig_to_copy_node, copy_to_orig_node)
    }

    // ---- validation -------------------------------------------------------

    /// Run every live node's self-check: port counts within declared
    /// bounds, port data types consistent, context-root existence where
    /// required.
    pub fn validate(&self) -> CoreResult<()> {
        for n in self.node_ids() {
            self.validate_node(n)?;
        }
        Ok(())
    }

    fn validate_node(&self, n: Node) -> CoreResult<()> {
        let data = self.node(n);
        for &p in &data.input_ports {
            let port = self.port(p);
            if !port.kind.allows_multiple_drivers() && port.arc_count() > 1 {
                return Err(CoreError::StructuralViolation {
                    location: AnyEntity::Port(p),
                    context: format!("input port {} on node {} has more than one driver", p, n),
                });
            }
        }
        if let Some(enable) = data.enable_port {
            let port = self.port(enable);
            if port.kind != PortKind::Enable {
                return Err(CoreError::StructuralViolation {
                    location: AnyEntity::Port(enable),
                    context: format!("node {} enable port has wrong kind", n),
                });
            }
        }
        for &out in &data.output_ports {
            let port = self.port(out);
            let mut reference_type = None;
            for &a in &port.arcs {
                let arc = self.arc(a);
                match (&reference_type, &arc.data_type) {
                    (None, dt) => reference_type = dt.clone(),
                    (Some(expected), Some(actual)) if expected != actual => {
                        return Err(CoreError::StructuralViolation {
                            location: AnyEntity::Port(out),
                            context: format!(
                                "output port {} on node {} drives arcs of mismatched type",
                                out, n
                            ),
                        });
                    }
                    _ => {}
                }
            }
        }
        if let Some(root) = data.kind.context_root_data() {
            for (&partition, &container) in root.family_containers.iter() {
                if !self.node_is_live(container) {
                    return Err(CoreError::ContextInvariantViolation {
                        location: AnyEntity::Node(n),
                        context: format!(
                            "context root {} has a dangling family container for partition {}",
                            n, partition
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}
