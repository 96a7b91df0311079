//! Encapsulation & rewiring: turns the context stacks assigned by context
//! discovery into real hierarchy. Every live node is migrated into a chain
//! of context-family and sub-context containers mirroring its
//! [`ContextStack`], creating those containers on demand and nesting them
//! so a family container for an inner context root lands inside the
//! sub-context container of whatever encloses it.
//!
//! A context root whose driver should be replicated per partition (rather
//! than crossing partitions through a thread-crossing FIFO later) gets its
//! driver cloned into every other partition its context reaches, with a
//! [`NodeKind::DummyReplica`] standing in for the root itself there,
//! order-constrained to run after the local driver copy so a
//! partition-local copy of the root's decision is always available before
//! anything in that partition consumes it.
//!
//! Once every node (including context roots and replicas) sits in its
//! container, any arc that still crosses a context or partition boundary
//! is rewired to terminate at the relevant family container's boundary
//! port instead of its original endpoint.

use std::collections::{BTreeSet, HashSet};

use crate::ir::{ArcData, ContextFrame, ContextStack, GraphEdit, GraphStore, Node, NodeData, NodeKind, Port, PortKind};
use crate::result::CoreResult;

/// Run the encapsulation pass over the whole graph.
pub fn encapsulate(graph: &mut GraphStore) -> CoreResult<()> {
    let mut driver_arcs: HashSet<crate::ir::Arc> = HashSet::new();
    let replicas = replicate_context_drivers(graph, &mut driver_arcs);
    migrate_nodes_into_containers(graph);
    wire_family_driver_order_constraints(graph, &mut driver_arcs);
    place_context_roots_and_replicas(graph, &replicas);
    rewire_arcs_across_contexts(graph, &driver_arcs);
    place_enable_driven_subsystems(graph);
    Ok(())
}

fn order_constraint_out(graph: &mut GraphStore, n: Node) -> Port {
    match graph.node(n).order_constraint_out {
        Some(p) => p,
        None => graph.create_port(n, PortKind::OrderConstraintOut),
    }
}

fn order_constraint_in(graph: &mut GraphStore, n: Node) -> Port {
    match graph.node(n).order_constraint_in {
        Some(p) => p,
        None => graph.create_port(n, PortKind::OrderConstraintIn),
    }
}

/// For every context root marked `replicate_driver`, clone its decision
/// driver into each partition its context reaches (reusing the original
/// where it is already local), and synthesize a [`NodeKind::DummyReplica`]
/// in each foreign partition, order-constrained after that partition's
/// driver copy so it always observes the root's latest decision.
///
/// A stateful driver is never cloned -- duplicating it would duplicate its
/// state -- so foreign partitions fall back to sharing the single original
/// driver node across a partition-crossing order-constraint arc.
fn replicate_context_drivers(graph: &mut GraphStore, driver_arcs: &mut HashSet<crate::ir::Arc>) -> Vec<(Node, Node, i32)> {
    let roots: Vec<Node> = graph
        .node_ids()
        .filter(|&n| graph.node(n).kind.is_context_root())
        .collect();

    let mut replicas = Vec::new();

    for root in roots {
        let replicate = graph
            .node(root)
            .kind
            .context_root_data()
            .map_or(false, |d| d.replicate_driver);
        if !replicate {
            continue;
        }

        let decision_port = graph.node(root).select_port.or(graph.node(root).enable_port);
        let driver = match decision_port.and_then(|p| graph.port(p).arcs.first().copied()) {
            Some(a) => graph.port(graph.arc(a).src).owner,
            None => continue,
        };

        let mut context_partitions: BTreeSet<i32> = graph
            .node_ids()
            .filter(|&n| graph.node(n).context_stack.roots().any(|r| r == root))
            .map(|n| graph.node(n).partition)
            .collect();
        context_partitions.insert(graph.node(root).partition);

        let driver_partition = graph.node(driver).partition;
        let can_clone = !graph.node(driver).kind.has_state();

        let mut driver_copies: std::collections::HashMap<i32, Node> = std::collections::HashMap::new();
        driver_copies.insert(driver_partition, driver);

        for &partition in &context_partitions {
            if driver_copies.contains_key(&partition) {
                continue;
            }
            let copy = if can_clone {
                clone_driver_for_partition(graph, driver, partition)
            } else {
                driver
            };
            driver_copies.insert(partition, copy);
        }

        let own_partition = graph.node(root).partition;
        for &partition in &context_partitions {
            if partition == own_partition {
                continue;
            }
            let replica = graph.create_node(NodeData::new(
                format!("{}_replica_p{}", graph.node(root).name, partition),
                None,
                NodeKind::DummyReplica { target_root: root },
            ));
            graph.node_mut(replica).partition = partition;

            let copy = *driver_copies.get(&partition).unwrap_or(&driver);
            let copy_out = order_constraint_out(graph, copy);
            let replica_in = graph.create_port(replica, PortKind::OrderConstraintIn);
            if let Ok(arc) = graph.create_arc(ArcData::order_constraint(copy_out, replica_in)) {
                driver_arcs.insert(arc);
            }
            replicas.push((replica, root, partition));
        }
    }

    replicas
}

/// Shallow-clone a stateless driver node into `partition`, reconnecting its
/// inputs to the same sources as the original so the clone recomputes the
/// same decision locally instead of needing the original's value to cross
/// a partition boundary.
fn clone_driver_for_partition(graph: &mut GraphStore, driver: Node, partition: i32) -> Node {
    let kind = graph.node(driver).kind.clone();
    let name = format!("{}_driver_p{}", graph.node(driver).name, partition);
    let clone = graph.create_node(NodeData::new(name, None, kind));
    graph.node_mut(clone).partition = partition;

    let inputs: Vec<Port> = graph.node(driver).input_ports.clone();
    for in_port in inputs {
        let source_arc = graph.port(in_port).arcs.first().copied().map(|a| graph.arc(a).clone());
        let new_in = graph.create_port(clone, PortKind::Input);
        if let Some(arc) = source_arc {
            let data = ArcData {
                src: arc.src,
                dst: new_in,
                data_type: arc.data_type,
                sample_time: arc.sample_time,
                delay: arc.delay,
                slack: arc.slack,
            };
            let _ = graph.create_arc(data);
        }
    }
    clone
}

/// Find (creating if necessary) the context-family container for `root` in
/// `partition`, parented under `parent`.
pub(crate) fn ensure_family_container(
    graph: &mut GraphStore,
    parent: Option<Node>,
    root: Node,
    partition: i32,
) -> Node {
    if let Some(&existing) = graph
        .node(root)
        .kind
        .context_root_data()
        .and_then(|d| d.family_containers.get(&partition))
    {
        return existing;
    }
    let family = graph.create_node(NodeData::new(
        format!("{}_family_p{}", graph.node(root).name, partition),
        parent,
        NodeKind::ContextFamilyContainer {
            context_root: root,
            children: Vec::new(),
        },
    ));
    graph.node_mut(family).partition = partition;
    graph
        .node_mut(root)
        .kind
        .context_root_data_mut()
        .unwrap()
        .family_containers
        .insert(partition, family);
    family
}

/// Find (creating if necessary) the sub-context container for `sub_context`
/// under `family`. Shared with state-update synthesis, which needs to place
/// latching/zero-filling halves in specific numbered sub-contexts of a
/// family container that may not have needed that sub-context before.
pub(crate) fn ensure_subcontext_container(graph: &mut GraphStore, family: Node, sub_context: u32) -> Node {
    let existing = graph
        .node(family)
        .kind
        .children()
        .unwrap_or(&[])
        .iter()
        .copied()
        .find(|&c| {
            matches!(
                graph.node(c).kind,
                NodeKind::ContextContainer { sub_context: s, .. } if s == sub_context
            )
        });
    if let Some(c) = existing {
        return c;
    }
    let partition = graph.node(family).partition;
    let container = graph.create_node(NodeData::new(
        format!("sub_context_{}", sub_context),
        Some(family),
        NodeKind::ContextContainer {
            family,
            sub_context,
            children: Vec::new(),
        },
    ));
    graph.node_mut(container).partition = partition;
    container
}

/// Build (or reuse) the full chain of containers implied by `stack` in
/// `partition`, returning the innermost one -- the parent that a node with
/// this exact stack and partition should live under. `None` means top-level.
///
/// Shared with FIFO insertion, which places a new thread-crossing FIFO in
/// the same container chain its source node lives in (or one frame
/// shallower, when the source is an enable output).
pub(crate) fn resolve_container_chain(graph: &mut GraphStore, stack: &ContextStack, partition: i32) -> Option<Node> {
    let mut parent: Option<Node> = None;
    for frame in stack.frames() {
        let family = ensure_family_container(graph, parent, frame.root, partition);
        let sub_context = ensure_subcontext_container(graph, family, frame.sub_context);
        parent = Some(sub_context);
    }
    parent
}

/// Migrate every live, non-container, non-master node into the container
/// chain implied by its own context stack and partition.
fn migrate_nodes_into_containers(graph: &mut GraphStore) {
    let candidates: Vec<Node> = graph
        .node_ids()
        .filter(|&n| {
            let kind = &graph.node(n).kind;
            !kind.is_master()
                && !matches!(
                    kind,
                    NodeKind::ContextFamilyContainer { .. } | NodeKind::ContextContainer { .. }
                )
        })
        .collect();

    for n in candidates {
        let stack = graph.node(n).context_stack.clone();
        if stack.is_empty() {
            continue;
        }
        let partition = graph.node(n).partition;
        let target = resolve_container_chain(graph, &stack, partition);
        if graph.node(n).parent != target {
            graph.reparent(n, target);
        }
    }
}

/// For each context root, wire an order-constraint arc from each unique
/// driver source port (per-partition, per the replication above) into the
/// matching family container's order-constraint input -- duplicate drivers
/// sharing a source port contribute only one arc.
fn wire_family_driver_order_constraints(graph: &mut GraphStore, driver_arcs: &mut HashSet<crate::ir::Arc>) {
    let roots: Vec<Node> = graph
        .node_ids()
        .filter(|&n| graph.node(n).kind.is_context_root())
        .collect();

    for root in roots {
        let decision_port = match graph.node(root).select_port.or(graph.node(root).enable_port) {
            Some(p) => p,
            None => continue,
        };
        let families: Vec<(i32, Node)> = graph
            .node(root)
            .kind
            .context_root_data()
            .map(|d| d.family_containers.iter().map(|(&p, &f)| (p, f)).collect())
            .unwrap_or_default();

        for (partition, family) in families {
            let mut seen_src: HashSet<Port> = HashSet::new();
            let drivers: Vec<Port> = graph
                .port(decision_port)
                .arcs
                .iter()
                .map(|&a| graph.arc(a).src)
                .filter(|&src| graph.node(graph.port(src).owner).partition == partition)
                .collect();
            for src in drivers {
                if !seen_src.insert(src) {
                    continue;
                }
                let family_in = order_constraint_in(graph, family);
                if let Ok(arc) = graph.create_arc(ArcData::order_constraint(src, family_in)) {
                    driver_arcs.insert(arc);
                }
            }
        }
    }
}

/// Move each context root into its own family container for its own
/// partition, and each dummy-replica into the family container of the
/// partition it stands in for.
fn place_context_roots_and_replicas(graph: &mut GraphStore, replicas: &[(Node, Node, i32)]) {
    let roots: Vec<Node> = graph
        .node_ids()
        .filter(|&n| graph.node(n).kind.is_context_root())
        .collect();

    for root in roots {
        let own_partition = graph.node(root).partition;
        let stack = graph.node(root).context_stack.clone();
        let enclosing = resolve_container_chain(graph, &stack, own_partition);
        let family = ensure_family_container(graph, enclosing, root, own_partition);
        if graph.node(root).parent != Some(family) {
            graph.reparent(root, Some(family));
        }
    }

    for &(replica, root, partition) in replicas {
        let stack = graph.node(root).context_stack.clone();
        let enclosing = resolve_container_chain(graph, &stack, partition);
        let family = ensure_family_container(graph, enclosing, root, partition);
        if graph.node(replica).parent != Some(family) {
            graph.reparent(replica, Some(family));
        }
    }
}

/// A node's context stack, extended with a self-frame when the node is
/// itself a context root -- models an arc leaving the root's own output as
/// though it were one frame deeper, so it routes to the root's own family
/// container rather than straight past it.
fn effective_context_stack(graph: &GraphStore, n: Node) -> ContextStack {
    let stack = graph.node(n).context_stack.clone();
    if graph.node(n).kind.is_context_root() {
        stack.with_appended(ContextFrame::new(n, 0))
    } else {
        stack
    }
}

/// Find (creating if necessary) `root`'s family container for `partition`.
fn family_container_for(graph: &mut GraphStore, root: Node, partition: i32) -> Node {
    if let Some(&existing) = graph
        .node(root)
        .kind
        .context_root_data()
        .and_then(|d| d.family_containers.get(&partition))
    {
        return existing;
    }
    let stack = graph.node(root).context_stack.clone();
    let enclosing = resolve_container_chain(graph, &stack, partition);
    ensure_family_container(graph, enclosing, root, partition)
}

/// The container boundary port an arc endpoint with context `ctx` should
/// land on, in `partition`: the family container of whichever context root
/// sits one frame past the common-prefix index `k`.
fn rewired_boundary_port(graph: &mut GraphStore, ctx: &ContextStack, partition: i32, k: usize, direction: PortKind) -> Port {
    let target_root = if k + 1 >= ctx.len() {
        ctx.innermost().expect("rewiring only runs on a non-empty context stack").root
    } else {
        ctx.frames()[k + 1].root
    };
    let family = family_container_for(graph, target_root, partition);
    graph.create_port(family, direction)
}

/// Rewire every arc crossing a context or partition boundary so it
/// terminates at a family container boundary port instead of its original
/// endpoint. Driver arcs synthesized above are excluded; they already
/// terminate where they need to.
///
/// These boundary ports are purely structural markers of where a value
/// crosses a container boundary -- like the original's single shared port
/// per container, but allocated one per arc here rather than shared,
/// since an ordinary input port on this graph only ever accepts one
/// driving arc.
fn rewire_arcs_across_contexts(graph: &mut GraphStore, driver_arcs: &HashSet<crate::ir::Arc>) {
    let candidates: Vec<crate::ir::Arc> = graph.arc_ids().filter(|a| !driver_arcs.contains(a)).collect();

    let mut edit = GraphEdit::default();
    for a in candidates {
        let arc = graph.arc(a).clone();
        let src_owner = graph.port(arc.src).owner;
        let dst_owner = graph.port(arc.dst).owner;
        if src_owner == dst_owner {
            continue;
        }

        let src_ctx = effective_context_stack(graph, src_owner);
        let dst_ctx = effective_context_stack(graph, dst_owner);
        let src_partition = graph.node(src_owner).partition;
        let dst_partition = graph.node(dst_owner).partition;

        let dst_at_or_below_src = dst_ctx.is_sub_context_of(&src_ctx);
        let rewire_src = !dst_at_or_below_src || (src_partition != dst_partition && !src_ctx.is_empty());

        let src_at_or_below_dst = src_ctx.is_sub_context_of(&dst_ctx);
        let rewire_dst = !src_at_or_below_dst || (src_partition != dst_partition && !dst_ctx.is_empty());

        if !rewire_src && !rewire_dst {
            continue;
        }

        let k = src_ctx.common_prefix_len(&dst_ctx);

        let new_src = rewire_src.then(|| rewired_boundary_port(graph, &src_ctx, src_partition, k, PortKind::Output));
        let new_dst = rewire_dst.then(|| rewired_boundary_port(graph, &dst_ctx, dst_partition, k, PortKind::Input));

        if let (Some(ns), Some(nd)) = (new_src, new_dst) {
            if graph.port(ns).owner == graph.port(nd).owner {
                continue;
            }
        }

        let final_src = new_src.unwrap_or(arc.src);
        let final_dst = new_dst.unwrap_or(arc.dst);

        edit.remove_arcs.push(a);
        edit.add_arcs.push(ArcData {
            src: final_src,
            dst: final_dst,
            data_type: arc.data_type,
            sample_time: arc.sample_time,
            delay: arc.delay,
            slack: arc.slack,
        });
    }
    graph.apply_edit(edit);
}

/// Assign an enabled subsystem's partition from whatever drives its enable
/// decision, when the subsystem has none yet. This model folds the enable
/// signal into one shared port on the subsystem rather than separate
/// enable-input/enable-output nodes, so only the tail of the original
/// per-partition enable-input cloning applies: a subsystem adopts the
/// partition of its enable driver.
fn place_enable_driven_subsystems(graph: &mut GraphStore) {
    let roots: Vec<Node> = graph
        .node_ids()
        .filter(|&n| matches!(graph.node(n).kind, NodeKind::EnabledSubsystem(..)))
        .collect();

    for root in roots {
        if graph.node(root).partition != -1 {
            continue;
        }
        let enable_port = match graph.node(root).enable_port {
            Some(p) => p,
            None => continue,
        };
        let driver_partition = graph
            .port(enable_port)
            .arcs
            .first()
            .copied()
            .map(|a| graph.port(graph.arc(a).src).owner)
            .map(|owner| graph.node(owner).partition);
        if let Some(p) = driver_partition {
            if p != -1 {
                graph.node_mut(root).partition = p;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_analysis::discover_and_mark_contexts;
    use crate::ir::{ContextRootData, DataType};

    fn gain(graph: &mut GraphStore, parent: Option<Node>, name: &str) -> Node {
        graph.create_node(NodeData::new(
            name,
            parent,
            NodeKind::Primitive {
                block_function: "Gain".to_string(),
                has_state: false,
                has_combinational_path: true,
                blackbox: None,
            },
        ))
    }

    #[test]
    fn child_of_enabled_subsystem_lands_in_a_sub_context_container() {
        let mut graph = GraphStore::new();
        let root = graph.create_node(NodeData::new(
            "Enabled",
            None,
            NodeKind::EnabledSubsystem(Default::default(), ContextRootData::new(1)),
        ));
        let child = gain(&mut graph, Some(root), "Inner");

        discover_and_mark_contexts(&mut graph).unwrap();
        encapsulate(&mut graph).unwrap();

        let container = graph.node(child).parent.expect("child has a parent");
        assert!(matches!(
            graph.node(container).kind,
            NodeKind::ContextContainer { sub_context: 0, .. }
        ));
        let family = match &graph.node(container).kind {
            NodeKind::ContextContainer { family, .. } => *family,
            _ => unreachable!(),
        };
        assert!(matches!(
            graph.node(family).kind,
            NodeKind::ContextFamilyContainer { context_root, .. } if context_root == root
        ));
        assert_eq!(graph.node(family).parent, None);
    }

    #[test]
    fn reusing_the_same_context_reuses_the_same_container() {
        let mut graph = GraphStore::new();
        let root = graph.create_node(NodeData::new(
            "Enabled",
            None,
            NodeKind::EnabledSubsystem(Default::default(), ContextRootData::new(1)),
        ));
        let a = gain(&mut graph, Some(root), "A");
        let b = gain(&mut graph, Some(root), "B");

        discover_and_mark_contexts(&mut graph).unwrap();
        encapsulate(&mut graph).unwrap();

        assert_eq!(graph.node(a).parent, graph.node(b).parent);
    }

    #[test]
    fn context_root_moves_into_its_own_family_container() {
        let mut graph = GraphStore::new();
        let root = graph.create_node(NodeData::new(
            "Enabled",
            None,
            NodeKind::EnabledSubsystem(Default::default(), ContextRootData::new(1)),
        ));
        graph.node_mut(root).partition = 0;
        let child = gain(&mut graph, Some(root), "Inner");
        graph.node_mut(child).partition = 0;

        discover_and_mark_contexts(&mut graph).unwrap();
        encapsulate(&mut graph).unwrap();

        let family = *graph
            .node(root)
            .kind
            .context_root_data()
            .unwrap()
            .family_containers
            .get(&0)
            .unwrap();
        assert_eq!(graph.node(root).parent, Some(family));
    }

    #[test]
    fn arc_crossing_into_a_context_is_rewired_to_the_family_container() {
        let mut graph = GraphStore::new();
        let root = graph.create_node(NodeData::new(
            "Enabled",
            None,
            NodeKind::EnabledSubsystem(Default::default(), ContextRootData::new(1)),
        ));
        graph.node_mut(root).partition = 0;

        let producer = gain(&mut graph, None, "Producer");
        graph.node_mut(producer).partition = 0;
        let inner = gain(&mut graph, Some(root), "Inner");
        graph.node_mut(inner).partition = 0;

        let producer_out = graph.create_port(producer, PortKind::Output);
        let inner_in = graph.create_port(inner, PortKind::Input);
        graph
            .create_arc(ArcData::new(producer_out, inner_in, DataType::int(32), 0))
            .unwrap();

        discover_and_mark_contexts(&mut graph).unwrap();
        encapsulate(&mut graph).unwrap();

        assert!(graph.port(inner_in).arcs.is_empty());

        let family = *graph
            .node(root)
            .kind
            .context_root_data()
            .unwrap()
            .family_containers
            .get(&0)
            .unwrap();
        let boundary_arc_exists = graph.node(family).input_ports.iter().any(|&p| {
            graph
                .port(p)
                .arcs
                .iter()
                .any(|&a| graph.arc(a).src == producer_out)
        });
        assert!(boundary_arc_exists, "expected a boundary arc on the family container");
    }
}
