//! Scheduler (sort half of the scheduling/FIFO layer): a destructive,
//! hierarchical topological sort run on a throwaway clone of the graph, one
//! partition at a time, with the resulting schedule indices back-propagated
//! onto the canonical graph.
//!
//! Hierarchy containers (`ContextFamilyContainer`, `ContextContainer`) carry
//! no ports of their own -- every real data and order-constraint arc
//! connects leaf nodes directly, regardless of nesting depth, mirroring the
//! "no physical arc-splicing at context boundaries" choice made in
//! `encapsulation`. That means a container's place in the schedule is only
//! a bookkeeping marker for where an emitter should open/close a block; the
//! actual ordering of real work is carried entirely by real arcs between
//! leaves. So rather than threading containers through the same worklist as
//! everything else, each container is treated as one atomic unit: its
//! external in/out-degree is computed over its *entire* transitive content
//! (so an arc reaching three levels deep into a family container still
//! gates it correctly), and once it is picked off the worklist its contents
//! are scheduled recursively, sub-context by sub-context, before its own
//! external output arcs are released.

use std::collections::{BTreeSet, HashMap, HashSet};

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use crate::entity::EntityRef;
use crate::ir::{Arc, ArcData, GraphStore, Node, NodeKind, Port};
use crate::result::{CoreError, CoreResult, CycleResidual};
use crate::settings::{CompileFlags, ScheduleHeuristic};
use crate::timing;

/// Run the scheduler over the whole graph, one partition at a time, and
/// write the resulting `schedule_order` back onto every original node.
pub fn schedule(graph: &mut GraphStore, flags: &CompileFlags) -> CoreResult<()> {
    let _t = timing::schedule();

    let (mut clone, _orig_to_copy, copy_to_orig) = graph.clone_graph();
    disconnect_preconditions(&mut clone);

    let mut next_index: u32 = 0;
    let mut rng = match flags.heuristic {
        ScheduleHeuristic::Random => Some(Pcg32::seed_from_u64(flags.seed)),
        _ => None,
    };

    for partition in distinct_partitions(&clone) {
        let roots = flatten_schedulable(&clone, clone.top_level().to_vec(), partition);
        run_sort(&mut clone, &roots, flags, &mut rng, &mut next_index)?;
    }

    for n in clone.node_ids().collect::<Vec<_>>() {
        if let Some(order) = clone.node(n).schedule_order {
            graph.node_mut(copy_to_orig[&n]).schedule_order = Some(order);
        }
    }
    Ok(())
}

/// The distinct partition values actually assigned to non-master nodes, or
/// `[None]` (whole-graph, the default case) when nothing has been
/// partitioned at all.
fn distinct_partitions(graph: &GraphStore) -> Vec<Option<i32>> {
    let parts: BTreeSet<i32> = graph
        .node_ids()
        .filter(|&n| !graph.node(n).kind.is_master())
        .map(|n| graph.node(n).partition)
        .filter(|&p| p != -1)
        .collect();
    if parts.is_empty() {
        vec![None]
    } else {
        parts.into_iter().map(Some).collect()
    }
}

/// Disconnect the arcs the sort must never treat as real dependencies:
/// anything landing on the unconnected/terminator masters, a stateful
/// node's output arcs other than to its own state-update (a blackbox's
/// combinational outputs are exempted), a thread-crossing FIFO's arcs into
/// a foreign partition's state-update node, and a blackbox's registered
/// (non-combinational) output arcs.
fn disconnect_preconditions(graph: &mut GraphStore) {
    let masters = graph.masters();

    let false_deps: Vec<Arc> = graph
        .arc_ids()
        .filter(|&a| {
            let dst = graph.port(graph.arc(a).dst).owner;
            dst == masters.unconnected || dst == masters.terminator
        })
        .collect();
    for a in false_deps {
        graph.remove_arc(a);
    }

    let unclocked_state: Vec<Node> = graph
        .node_ids()
        .filter(|&n| graph.node(n).kind.has_unclocked_state())
        .filter(|&n| !matches!(&graph.node(n).kind, NodeKind::Primitive { blackbox: Some(_), .. }))
        .collect();
    for n in unclocked_state {
        let own_update: HashSet<Node> = graph
            .node_ids()
            .filter(|&u| matches!(graph.node(u).kind, NodeKind::StateUpdate { primary, .. } if primary == n))
            .collect();
        let arcs: Vec<Arc> = graph
            .node(n)
            .output_ports
            .iter()
            .flat_map(|&p| graph.port(p).arcs.clone())
            .collect();
        for a in arcs {
            let dst = graph.port(graph.arc(a).dst).owner;
            if !own_update.contains(&dst) {
                graph.remove_arc(a);
            }
        }
    }

    let fifos: Vec<Node> = graph
        .node_ids()
        .filter(|&n| matches!(graph.node(n).kind, NodeKind::ThreadCrossingFifo(_)))
        .collect();
    for fifo in fifos {
        let fifo_partition = graph.node(fifo).partition;
        let arcs: Vec<Arc> = graph
            .node(fifo)
            .output_ports
            .iter()
            .flat_map(|&p| graph.port(p).arcs.clone())
            .collect();
        for a in arcs {
            let dst = graph.port(graph.arc(a).dst).owner;
            let foreign_state_update = matches!(graph.node(dst).kind, NodeKind::StateUpdate { .. })
                && graph.node(dst).partition != fifo_partition;
            if foreign_state_update {
                graph.remove_arc(a);
            }
        }
    }

    let registered_ports: Vec<Port> = graph
        .node_ids()
        .filter_map(|n| match &graph.node(n).kind {
            NodeKind::Primitive {
                blackbox: Some(b), ..
            } => Some(b.registered_output_ports.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    for p in registered_ports {
        let arcs = graph.port(p).arcs.clone();
        for a in arcs {
            graph.remove_arc(a);
        }
    }
}

/// Transparent grouping nodes that hold no ports of their own and whose
/// descendants are walked through rather than scheduled themselves.
fn is_transparent_wrapper(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::Subsystem(_) | NodeKind::EnabledSubsystem(..) | NodeKind::ClockDomain(..)
    )
}

/// Walk `roots` (and, transparently, every non-context-root subsystem
/// reached along the way), collecting every schedulable node that belongs
/// to `partition` (or everything, for `None`) into a flat candidate list.
/// Context-family containers are included but not descended into -- they
/// are scheduled as one atomic unit by [`schedule_one`]. Mux context roots
/// are never added directly: they are scheduled as part of their own
/// family container's processing.
fn flatten_schedulable(graph: &GraphStore, roots: Vec<Node>, partition: Option<i32>) -> Vec<Node> {
    let mut out = Vec::new();
    let mut stack = roots;
    let mut seen = HashSet::new();
    while let Some(n) = stack.pop() {
        if !seen.insert(n) {
            continue;
        }
        if graph.node(n).schedule_order.is_some() {
            continue;
        }
        if is_transparent_wrapper(&graph.node(n).kind) {
            if let Some(children) = graph.node(n).kind.children() {
                stack.extend(children.iter().copied());
            }
            continue;
        }
        if matches!(graph.node(n).kind, NodeKind::Mux(_)) {
            continue;
        }
        let matches_partition =
            partition.map_or(true, |p| graph.node(n).partition == p || graph.node(n).partition == -1);
        if matches_partition {
            out.push(n);
        }
    }
    out
}

/// Every real node an atomic's external degree must be computed over: the
/// node itself, plus -- for a family container -- its entire transitive
/// content (so an arc reaching deep inside still gates the whole unit) and
/// its own context-root node (so the root's decision-driving arc, and the
/// root's own output once the family is done, both attach to this atomic).
fn atomic_members(graph: &GraphStore, atomic: Node) -> Vec<Node> {
    match &graph.node(atomic).kind {
        NodeKind::ContextFamilyContainer { context_root, .. } => {
            let mut members = graph.descendants_of(atomic, false, None);
            members.push(atomic);
            if !members.contains(context_root) {
                members.push(*context_root);
            }
            members
        }
        _ => vec![atomic],
    }
}

fn in_like_ports(graph: &GraphStore, n: Node) -> Vec<Port> {
    graph
        .node(n)
        .input_ports
        .iter()
        .copied()
        .chain(graph.node(n).enable_port)
        .chain(graph.node(n).select_port)
        .chain(graph.node(n).order_constraint_in)
        .collect()
}

fn out_like_ports(graph: &GraphStore, n: Node) -> Vec<Port> {
    graph
        .node(n)
        .output_ports
        .iter()
        .copied()
        .chain(graph.node(n).order_constraint_out)
        .collect()
}

fn compute_in_degree(graph: &GraphStore, atomic: Node, owner_of: &HashMap<Node, Node>) -> usize {
    let mut count = 0;
    for m in atomic_members(graph, atomic) {
        for p in in_like_ports(graph, m) {
            for &a in graph.port(p).arcs.iter() {
                let src_owner = graph.port(graph.arc(a).src).owner;
                if owner_of.get(&src_owner).map_or(false, |&src_atomic| src_atomic != atomic) {
                    count += 1;
                }
            }
        }
    }
    count
}

fn assign_order(graph: &mut GraphStore, n: Node, next_index: &mut u32) {
    graph.node_mut(n).schedule_order = Some(*next_index);
    *next_index += 1;
}

/// Run one worklist-draining topological sort over `atomics`, assigning
/// schedule indices (possibly several, for a family container) as each is
/// picked, and recurse into `run_sort` again when scope is genuinely
/// independent of the caller's degree bookkeeping (sub-context bodies).
fn run_sort(
    graph: &mut GraphStore,
    atomics: &[Node],
    flags: &CompileFlags,
    rng: &mut Option<Pcg32>,
    next_index: &mut u32,
) -> CoreResult<()> {
    let mut owner_of: HashMap<Node, Node> = HashMap::new();
    for &a in atomics {
        for m in atomic_members(graph, a) {
            owner_of.insert(m, a);
        }
    }

    let mut in_degree: HashMap<Node, usize> = HashMap::new();
    for &a in atomics {
        in_degree.insert(a, compute_in_degree(graph, a, &owner_of));
    }

    let mut discovered: BTreeSet<Node> = atomics.iter().copied().collect();
    let mut worklist: Vec<Node> = atomics
        .iter()
        .copied()
        .filter(|a| in_degree[a] == 0)
        .collect();
    worklist.sort_by_key(|n| n.index());

    while !worklist.is_empty() {
        let pick_at = match flags.heuristic {
            ScheduleHeuristic::Bfs => 0,
            ScheduleHeuristic::Dfs => worklist.len() - 1,
            ScheduleHeuristic::Random => {
                let rng = rng.as_mut().expect("Random heuristic requires a seeded generator");
                rng.gen_range(0, worklist.len())
            }
        };
        let picked = worklist.remove(pick_at);
        discovered.remove(&picked);

        schedule_one(graph, picked, flags, rng, next_index)?;

        let mut decremented = Vec::new();
        for m in atomic_members(graph, picked) {
            for p in out_like_ports(graph, m) {
                let arcs = graph.port(p).arcs.clone();
                for a in arcs {
                    let dst_owner = graph.port(graph.arc(a).dst).owner;
                    if let Some(&dst_atomic) = owner_of.get(&dst_owner) {
                        if dst_atomic != picked {
                            decremented.push(dst_atomic);
                        }
                    }
                    graph.remove_arc(a);
                }
            }
        }
        for neighbor in decremented {
            if !discovered.contains(&neighbor) {
                continue;
            }
            let deg = in_degree.get_mut(&neighbor).expect("neighbor tracked by this run");
            *deg = deg.saturating_sub(1);
            if *deg == 0 && !worklist.contains(&neighbor) {
                worklist.push(neighbor);
            }
        }
    }

    if !discovered.is_empty() {
        let residual = discovered
            .iter()
            .map(|&n| CycleResidual {
                node: n,
                in_degree: in_degree[&n],
                residual_sources: atomic_members(graph, n)
                    .into_iter()
                    .flat_map(|m| in_like_ports(graph, m))
                    .flat_map(|p| graph.port(p).arcs.clone())
                    .map(|a| graph.arc(a).src)
                    .collect(),
            })
            .collect();
        return Err(CoreError::scheduling_failure(residual));
    }
    Ok(())
}

/// Assign the schedule index (or indices) for one worklist pick. An
/// ordinary node gets a single index. A family container gets emitted
/// first, then each of its sub-context containers in order (container
/// marker first, then its own contents recursively sorted), and finally --
/// only for a mux -- the context root itself, once, the first time any of
/// its (possibly per-partition-replicated) family containers reaches it.
fn schedule_one(
    graph: &mut GraphStore,
    picked: Node,
    flags: &CompileFlags,
    rng: &mut Option<Pcg32>,
    next_index: &mut u32,
) -> CoreResult<()> {
    let context_root = match &graph.node(picked).kind {
        NodeKind::ContextFamilyContainer { context_root, .. } => *context_root,
        _ => {
            assign_order(graph, picked, next_index);
            return Ok(());
        }
    };

    assign_order(graph, picked, next_index);
    let partition = graph.node(picked).partition;
    let sub_context_count = graph
        .node(context_root)
        .kind
        .context_root_data()
        .map_or(0, |d| d.sub_context_count);
    let children = graph.node(picked).kind.children().unwrap_or(&[]).to_vec();

    for sub_context in 0..sub_context_count {
        let container = children.iter().copied().find(|&c| {
            matches!(
                graph.node(c).kind,
                NodeKind::ContextContainer { sub_context: s, .. } if s == sub_context
            )
        });
        let container = match container {
            Some(c) => c,
            None => continue,
        };
        assign_order(graph, container, next_index);
        let inner_roots = flatten_schedulable(
            graph,
            graph.node(container).kind.children().unwrap_or(&[]).to_vec(),
            Some(partition),
        );
        if !inner_roots.is_empty() {
            run_sort(graph, &inner_roots, flags, rng, next_index)?;
        }
    }

    if matches!(graph.node(context_root).kind, NodeKind::Mux(_)) && graph.node(context_root).schedule_order.is_none()
    {
        assign_order(graph, context_root, next_index);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ContextRootData, NodeData, PortKind, SubsystemData};

    fn primitive(graph: &mut GraphStore, name: &str, has_state: bool, has_combinational_path: bool) -> Node {
        graph.create_node(NodeData::new(
            name,
            None,
            NodeKind::Primitive {
                block_function: "Gain".to_string(),
                has_state,
                has_combinational_path,
                blackbox: None,
            },
        ))
    }

    #[test]
    fn linear_chain_schedules_in_dependency_order() {
        let mut graph = GraphStore::new();
        let a = primitive(&mut graph, "A", false, true);
        let b = primitive(&mut graph, "B", false, true);
        let a_out = graph.create_port(a, PortKind::Output);
        let b_in = graph.create_port(b, PortKind::Input);
        graph
            .create_arc(ArcData::new(a_out, b_in, crate::ir::DataType::int(32), 1))
            .unwrap();

        schedule(&mut graph, &CompileFlags::default()).unwrap();

        assert!(graph.node(a).schedule_order.unwrap() < graph.node(b).schedule_order.unwrap());
    }

    #[test]
    fn cycle_is_reported_as_a_scheduling_failure() {
        let mut graph = GraphStore::new();
        let a = primitive(&mut graph, "A", false, true);
        let b = primitive(&mut graph, "B", false, true);
        let a_out = graph.create_port(a, PortKind::Output);
        let b_in = graph.create_port(b, PortKind::Input);
        let b_out = graph.create_port(b, PortKind::Output);
        let a_in = graph.create_port(a, PortKind::Input);
        graph
            .create_arc(ArcData::new(a_out, b_in, crate::ir::DataType::int(32), 1))
            .unwrap();
        graph
            .create_arc(ArcData::new(b_out, a_in, crate::ir::DataType::int(32), 1))
            .unwrap();

        let err = schedule(&mut graph, &CompileFlags::default()).unwrap_err();
        assert!(matches!(err, CoreError::SchedulingFailure { .. }));
    }

    #[test]
    fn family_container_contents_schedule_inside_its_bracket() {
        let mut graph = GraphStore::new();
        let root = graph.create_node(NodeData::new(
            "Enabled",
            None,
            NodeKind::EnabledSubsystem(SubsystemData::default(), ContextRootData::new(1)),
        ));
        let inner = primitive(&mut graph, "Inner", false, true);
        graph
            .node_mut(inner)
            .context_stack
            .push(crate::ir::ContextFrame::new(root, 0));

        let family = graph.create_node(NodeData::new(
            "EnabledFamily",
            None,
            NodeKind::ContextFamilyContainer {
                context_root: root,
                children: Vec::new(),
            },
        ));
        graph
            .node_mut(root)
            .kind
            .context_root_data_mut()
            .unwrap()
            .family_containers
            .insert(-1, family);
        let sub = graph.create_node(NodeData::new(
            "sub_context_0",
            Some(family),
            NodeKind::ContextContainer {
                family,
                sub_context: 0,
                children: Vec::new(),
            },
        ));
        graph.reparent(inner, Some(sub));

        schedule(&mut graph, &CompileFlags::default()).unwrap();

        assert!(graph.node(family).schedule_order.unwrap() < graph.node(sub).schedule_order.unwrap());
        assert!(graph.node(sub).schedule_order.unwrap() < graph.node(inner).schedule_order.unwrap());
    }
}
