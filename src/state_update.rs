//! State-update synthesis and pruning: synthesizes the pseudo-nodes that
//! commit a stateful node's next value and a context root's selected
//! branch, then cleans up the graph those pseudo-nodes and the earlier
//! passes leave behind -- disconnected output ports, emptied-out plain
//! subsystems, and subsystems still missing a partition or sub-blocking
//! assignment.

use std::collections::{HashSet, VecDeque};

use crate::encapsulation::ensure_subcontext_container;
use crate::ir::{
    ArcData, ClockDomainKind, GraphStore, Node, NodeData, NodeKind, Port, PortKind, StateUpdateVariant,
};
use crate::result::{CoreError, CoreResult, CoreWarning};
use crate::settings::CompileFlags;

/// Run the whole state-update and cleanup pass, returning any warnings
/// collected along the way.
pub fn run(graph: &mut GraphStore, flags: &CompileFlags) -> CoreResult<Vec<CoreWarning>> {
    let mut warnings = Vec::new();
    synthesize_state_updates(graph)?;
    synthesize_context_variable_updates(graph);
    warnings.extend(prune_dead_outputs(graph, flags));
    remove_empty_plain_subsystems(graph);
    order_constrain_zero_indegree_context_members(graph);
    warnings.extend(backfill_partitions(graph, flags)?);
    Ok(warnings)
}

fn order_constraint_out(graph: &mut GraphStore, n: Node) -> crate::ir::Port {
    match graph.node(n).order_constraint_out {
        Some(p) => p,
        None => graph.create_port(n, PortKind::OrderConstraintOut),
    }
}

/// Synthesize the state-update node(s) for every node holding unclocked
/// state. A node whose innermost context is an enabled subsystem or an
/// upsampling clock domain gets the latching/zero-filling split, placed in
/// sub-contexts 0 and 1 of that context's family container; everything else
/// gets one plain update. Either way, the update is order-constrained after
/// the primary node and after every current consumer of its outputs, so it
/// always runs last.
fn synthesize_state_updates(graph: &mut GraphStore) -> CoreResult<()> {
    let stateful: Vec<Node> = graph
        .node_ids()
        .filter(|&n| graph.node(n).kind.has_unclocked_state())
        .collect();

    for n in stateful {
        let consumers: Vec<Node> = graph
            .node(n)
            .output_ports
            .iter()
            .flat_map(|&p| graph.port(p).arcs.iter().copied().collect::<Vec<_>>())
            .map(|a| graph.port(graph.arc(a).dst).owner)
            .collect();

        let split_root = graph.node(n).context_stack.innermost().and_then(|frame| {
            let is_split_context = matches!(graph.node(frame.root).kind, NodeKind::EnabledSubsystem(..))
                || matches!(
                    graph.node(frame.root).kind,
                    NodeKind::ClockDomain(_, _, Some(ClockDomainKind::Upsample))
                );
            if is_split_context {
                Some(frame.root)
            } else {
                None
            }
        });

        match split_root {
            Some(root) => {
                let partition = graph.node(n).partition;
                let family = *graph
                    .node(root)
                    .kind
                    .context_root_data()
                    .and_then(|d| d.family_containers.get(&partition))
                    .ok_or_else(|| CoreError::ContextInvariantViolation {
                        location: crate::ir::AnyEntity::Node(root),
                        context: format!(
                            "context root {} has no family container for partition {}",
                            root, partition
                        ),
                    })?;
                let latching_parent = ensure_subcontext_container(graph, family, 0);
                let zero_fill_parent = ensure_subcontext_container(graph, family, 1);
                let latching = graph.create_node(NodeData::new(
                    format!("{}_latch", graph.node(n).name),
                    Some(latching_parent),
                    NodeKind::StateUpdate {
                        primary: n,
                        variant: StateUpdateVariant::Latching,
                    },
                ));
                let zero_fill = graph.create_node(NodeData::new(
                    format!("{}_zero_fill", graph.node(n).name),
                    Some(zero_fill_parent),
                    NodeKind::StateUpdate {
                        primary: n,
                        variant: StateUpdateVariant::ZeroFilling,
                    },
                ));
                wire_update_order_constraints(graph, n, &consumers, latching);
                wire_update_order_constraints(graph, n, &consumers, zero_fill);
            }
            None => {
                let update = graph.create_node(NodeData::new(
                    format!("{}_update", graph.node(n).name),
                    graph.node(n).parent,
                    NodeKind::StateUpdate {
                        primary: n,
                        variant: StateUpdateVariant::Plain,
                    },
                ));
                wire_update_order_constraints(graph, n, &consumers, update);
            }
        }
    }
    Ok(())
}

fn wire_update_order_constraints(graph: &mut GraphStore, primary: Node, consumers: &[Node], update: Node) {
    let update_in = graph.create_port(update, PortKind::OrderConstraintIn);
    let primary_out = order_constraint_out(graph, primary);
    let _ = graph.create_arc(ArcData::order_constraint(primary_out, update_in));
    for &consumer in consumers {
        if consumer == update {
            continue;
        }
        let consumer_out = order_constraint_out(graph, consumer);
        let _ = graph.create_arc(ArcData::order_constraint(consumer_out, update_in));
    }
}

/// Synthesize a context-variable-update pseudo-node for every context root,
/// capturing whatever currently drives its select/enable port so the
/// decision survives even after the root's own children have migrated away
/// into context containers.
fn synthesize_context_variable_updates(graph: &mut GraphStore) {
    let roots: Vec<Node> = graph
        .node_ids()
        .filter(|&n| graph.node(n).kind.is_context_root())
        .collect();

    for root in roots {
        let decision_port = graph.node(root).select_port.or(graph.node(root).enable_port);
        let driver = decision_port.and_then(|p| graph.port(p).arcs.first().copied());

        let update = graph.create_node(NodeData::new(
            format!("{}_context_var", graph.node(root).name),
            graph.node(root).parent,
            NodeKind::ContextVariableUpdate {
                context_root: root,
                variable_index: 0,
            },
        ));

        if let Some(arc) = driver {
            let driver_node = graph.port(graph.arc(arc).src).owner;
            let driver_out = order_constraint_out(graph, driver_node);
            let update_in = graph.create_port(update, PortKind::OrderConstraintIn);
            let _ = graph.create_arc(ArcData::order_constraint(driver_out, update_in));
        }
    }
}

/// `true` iff `p` is driven by a real downstream dependency: not the
/// terminator master, not the unconnected master, and the visualization
/// master only when `flags` says visualization taps count as real.
fn has_real_consumer(graph: &GraphStore, p: Port, flags: &CompileFlags) -> bool {
    let terminator = graph.masters().terminator;
    let unconnected = graph.masters().unconnected;
    let visualization = graph.masters().visualization;
    graph.port(p).arcs.iter().any(|&a| {
        let dst_owner = graph.port(graph.arc(a).dst).owner;
        if dst_owner == terminator || dst_owner == unconnected {
            return false;
        }
        if dst_owner == visualization {
            return flags.prune_counts_visualization_arcs;
        }
        true
    })
}

/// Every port whose arcs count toward a node's out-degree for pruning:
/// data outputs plus the order-constraint-out port, mirroring the
/// scheduler's own `out_like_ports` convention so a node already
/// order-constrained to a surviving consumer (its own state-update node,
/// say) is never treated as dead.
fn out_like_ports(graph: &GraphStore, n: Node) -> Vec<Port> {
    graph
        .node(n)
        .output_ports
        .iter()
        .copied()
        .chain(graph.node(n).order_constraint_out)
        .collect()
}

/// `true` iff `n` is a node kind pruning is never allowed to delete:
/// masters, subsystems, and state-update nodes.
fn prune_excluded(graph: &GraphStore, n: Node) -> bool {
    graph.node(n).kind.is_master()
        || matches!(graph.node(n).kind, NodeKind::Subsystem(_) | NodeKind::StateUpdate { .. })
}

fn zero_out_degree(graph: &GraphStore, n: Node, flags: &CompileFlags) -> bool {
    !prune_excluded(graph, n) && out_like_ports(graph, n).iter().all(|&p| !has_real_consumer(graph, p, flags))
}

/// Iteratively remove every non-subsystem, non-state-update node whose
/// out-degree (ignoring the unconnected/terminator masters, and the
/// visualization master unless the flag says otherwise) has fallen to
/// zero. Each removal disconnects its input arcs too, so the newly
/// zero-out-degree candidates -- its former source neighbors -- are
/// re-checked until the pass converges. Once nothing more can be removed,
/// every output port still without a real consumer is rewired to the
/// unconnected master, warning once per port so pruning never happens
/// silently.
fn prune_dead_outputs(graph: &mut GraphStore, flags: &CompileFlags) -> Vec<CoreWarning> {
    let mut removed: HashSet<Node> = HashSet::new();
    let mut queue: VecDeque<Node> = graph
        .node_ids()
        .filter(|&n| zero_out_degree(graph, n, flags))
        .collect();

    while let Some(n) = queue.pop_front() {
        if removed.contains(&n) || !graph.node_is_live(n) {
            continue;
        }
        if !zero_out_degree(graph, n, flags) {
            continue;
        }

        let upstream: Vec<Node> = graph
            .node(n)
            .input_ports
            .iter()
            .copied()
            .chain(graph.node(n).enable_port)
            .chain(graph.node(n).select_port)
            .chain(graph.node(n).order_constraint_in)
            .flat_map(|p| graph.port(p).arcs.iter().copied().collect::<Vec<_>>())
            .map(|a| graph.port(graph.arc(a).src).owner)
            .collect();

        graph.remove_node(n);
        removed.insert(n);

        for up in upstream {
            if !removed.contains(&up) && graph.node_is_live(up) && zero_out_degree(graph, up, flags) {
                queue.push_back(up);
            }
        }
    }

    let unconnected = graph.masters().unconnected;
    let ports: Vec<Port> = graph
        .node_ids()
        .filter(|&n| !graph.node(n).kind.is_master())
        .flat_map(|n| graph.node(n).output_ports.clone())
        .collect();

    let mut warnings = Vec::new();
    for p in ports {
        if has_real_consumer(graph, p, flags) {
            continue;
        }
        let already_unconnected = graph
            .port(p)
            .arcs
            .iter()
            .any(|&a| graph.port(graph.arc(a).dst).owner == unconnected);
        if already_unconnected {
            continue;
        }
        let in_port = graph.create_port(unconnected, PortKind::Input);
        let _ = graph.create_arc(ArcData::order_constraint(p, in_port));
        warnings.push(CoreWarning::PrunedOutputPort { port: p });
    }
    warnings
}

/// Delete plain (non-context-root) subsystems left with no children after
/// migration, walking bottom-up so a subsystem emptied by removing its own
/// now-empty children is caught too.
fn remove_empty_plain_subsystems(graph: &mut GraphStore) {
    loop {
        let empty: Vec<Node> = graph
            .node_ids()
            .filter(|&n| matches!(graph.node(n).kind, NodeKind::Subsystem(_)))
            .filter(|&n| graph.node(n).kind.children().map_or(false, |c| c.is_empty()))
            .collect();
        if empty.is_empty() {
            break;
        }
        for n in empty {
            graph.remove_node(n);
        }
    }
}

/// Within every sub-context container, order-constrain any node with zero
/// in-degree (no data or order arc driving it at all) after that context's
/// variable-update node, so it cannot be scheduled before the context's
/// governing decision is known.
fn order_constrain_zero_indegree_context_members(graph: &mut GraphStore) {
    let containers: Vec<Node> = graph
        .node_ids()
        .filter(|&n| matches!(graph.node(n).kind, NodeKind::ContextContainer { .. }))
        .collect();

    for container in containers {
        let root = match &graph.node(container).kind {
            NodeKind::ContextContainer { family, .. } => match &graph.node(*family).kind {
                NodeKind::ContextFamilyContainer { context_root, .. } => *context_root,
                _ => continue,
            },
            _ => continue,
        };
        let context_var_update = graph.node_ids().find(|&n| {
            matches!(
                graph.node(n).kind,
                NodeKind::ContextVariableUpdate { context_root, .. } if context_root == root
            )
        });
        let update = match context_var_update {
            Some(u) => u,
            None => continue,
        };

        let members = graph.node(container).kind.children().unwrap_or(&[]).to_vec();
        for member in members {
            let has_in_edge = [
                graph.node(member).input_ports.clone(),
                graph.node(member).enable_port.into_iter().collect::<Vec<_>>(),
                graph.node(member).select_port.into_iter().collect::<Vec<_>>(),
                graph
                    .node(member)
                    .order_constraint_in
                    .into_iter()
                    .collect::<Vec<_>>(),
            ]
            .into_iter()
            .flatten()
            .any(|p| !graph.port(p).is_disconnected());
            if has_in_edge {
                continue;
            }
            let update_out = order_constraint_out(graph, update);
            let member_in = graph.create_port(member, PortKind::OrderConstraintIn);
            let _ = graph.create_arc(ArcData::order_constraint(update_out, member_in));
        }
    }
}

/// Bottom-up partition backfill for subsystem-like nodes still unassigned,
/// inferring from a descendant when one exists.
fn backfill_partitions(graph: &mut GraphStore, flags: &CompileFlags) -> CoreResult<Vec<CoreWarning>> {
    let mut warnings = Vec::new();
    let subsystems: Vec<Node> = graph
        .node_ids()
        .filter(|&n| graph.node(n).kind.is_subsystem_like())
        .collect();

    for n in subsystems {
        if graph.node(n).partition != -1 {
            continue;
        }
        let partition = graph
            .descendants_of(n, true, None)
            .into_iter()
            .map(|d| graph.node(d).partition)
            .find(|&p| p != -1);
        match partition {
            Some(p) => {
                graph.node_mut(n).partition = p;
                warnings.push(CoreWarning::BackfilledPartition { node: n });
            }
            None if flags.strict_partitions => {
                return Err(CoreError::StructuralViolation {
                    location: crate::ir::AnyEntity::Node(n),
                    context: "no concrete partition could be inferred for this subsystem"
                        .to_string(),
                });
            }
            None => {
                graph.node_mut(n).partition = 0;
                warnings.push(CoreWarning::BackfilledPartition { node: n });
            }
        }
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stateful_primitive(graph: &mut GraphStore, parent: Option<Node>, name: &str) -> Node {
        graph.create_node(NodeData::new(
            name,
            parent,
            NodeKind::Primitive {
                block_function: "UnitDelay".to_string(),
                has_state: true,
                has_combinational_path: false,
                blackbox: None,
            },
        ))
    }

    #[test]
    fn plain_state_gets_one_update_node() {
        let mut graph = GraphStore::new();
        let n = stateful_primitive(&mut graph, None, "D");
        let flags = CompileFlags::default();
        run(&mut graph, &flags).unwrap();

        let updates: Vec<Node> = graph
            .node_ids()
            .filter(|&id| matches!(graph.node(id).kind, NodeKind::StateUpdate { primary, .. } if primary == n))
            .collect();
        assert_eq!(updates.len(), 1);
        assert!(matches!(
            graph.node(updates[0]).kind,
            NodeKind::StateUpdate { variant: StateUpdateVariant::Plain, .. }
        ));
    }

    #[test]
    fn dead_combinational_node_is_pruned_entirely() {
        let mut graph = GraphStore::new();
        let n = graph.create_node(NodeData::new(
            "Gain",
            None,
            NodeKind::Primitive {
                block_function: "Gain".to_string(),
                has_state: false,
                has_combinational_path: true,
                blackbox: None,
            },
        ));
        graph.create_port(n, PortKind::Output);
        let flags = CompileFlags::default();
        run(&mut graph, &flags).unwrap();

        assert!(!graph.node_is_live(n));
    }

    #[test]
    fn pruning_converges_along_a_chain_of_dead_producers() {
        let mut graph = GraphStore::new();
        let upstream = graph.create_node(NodeData::new(
            "Upstream",
            None,
            NodeKind::Primitive {
                block_function: "Gain".to_string(),
                has_state: false,
                has_combinational_path: true,
                blackbox: None,
            },
        ));
        let downstream = graph.create_node(NodeData::new(
            "Downstream",
            None,
            NodeKind::Primitive {
                block_function: "Gain".to_string(),
                has_state: false,
                has_combinational_path: true,
                blackbox: None,
            },
        ));
        let upstream_out = graph.create_port(upstream, PortKind::Output);
        let downstream_in = graph.create_port(downstream, PortKind::Input);
        graph
            .create_arc(ArcData::new(upstream_out, downstream_in, crate::ir::DataType::int(32), 0))
            .unwrap();
        graph.create_port(downstream, PortKind::Output);

        let flags = CompileFlags::default();
        run(&mut graph, &flags).unwrap();

        assert!(!graph.node_is_live(downstream));
        assert!(!graph.node_is_live(upstream));
    }

    #[test]
    fn stateful_node_with_no_data_consumer_survives_pruning_and_gets_rewired() {
        let mut graph = GraphStore::new();
        let n = stateful_primitive(&mut graph, None, "D");
        let out = graph.create_port(n, PortKind::Output);
        let flags = CompileFlags::default();
        let warnings = run(&mut graph, &flags).unwrap();

        assert!(graph.node_is_live(n));
        assert!(warnings
            .iter()
            .any(|w| matches!(w, CoreWarning::PrunedOutputPort { port } if *port == out)));
        assert_eq!(graph.port(out).arcs.len(), 1);
        let dst = graph.port(graph.arc(graph.port(out).arcs[0]).dst).owner;
        assert_eq!(dst, graph.masters().unconnected);
    }

    #[test]
    fn unresolvable_partition_in_strict_mode_is_an_error() {
        let mut graph = GraphStore::new();
        graph.create_node(NodeData::new("Empty", None, NodeKind::Subsystem(Default::default())));
        let flags = CompileFlags {
            strict_partitions: true,
            ..CompileFlags::default()
        };
        assert!(run(&mut graph, &flags).is_err());
    }
}
