//! Context discovery: assigns every node its enclosing [`ContextStack`],
//! walking the hierarchy top-down and marking the conditional regions
//! implied by muxes, enabled subsystems, and clock domains.
//!
//! Enabled subsystems and clock domains are explicit in the hierarchy --
//! their children are simply the node's existing child list, and discovery
//! just pushes one more frame before recursing. Mux contexts are implicit:
//! a mux's "branch" is whatever combinational cone feeds one of its data
//! inputs, discovered by walking backwards from each input and marking a
//! node as belonging to the branch only once every one of its output arcs
//! has already been marked into that same branch. That "all consumers
//! marked" rule is what keeps a node shared between two branches (or
//! between a branch and the level outside the mux) from being pulled into
//! either one.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::ir::{AnyEntity, ContextFrame, ContextStack, GraphStore, Node, NodeKind, PortKind};
use crate::result::{CoreError, CoreResult};

/// Run context discovery over the whole graph: assign every node's
/// [`ContextStack`], then patch up arcs feeding the visualization master so
/// they cross enable boundaries through a genuine enable-output tap instead
/// of bypassing them.
pub fn discover_and_mark_contexts(graph: &mut GraphStore) -> CoreResult<()> {
    let top = graph.top_level().to_vec();
    discover_level(graph, &top, &ContextStack::empty())?;
    fixup_visualization_enable_outputs(graph);
    Ok(())
}

/// Process one sibling level: nodes in `nodes` all share the same ambient
/// `stack` before this call (they are not yet inside any context this call
/// introduces).
fn discover_level(graph: &mut GraphStore, nodes: &[Node], stack: &ContextStack) -> CoreResult<()> {
    let mut muxes = Vec::new();
    let mut enabled_subsystems = Vec::new();
    let mut clock_domains = Vec::new();
    let mut plain_subsystems = Vec::new();
    let mut leaves = Vec::new();

    for &n in nodes {
        match graph.node(n).kind {
            NodeKind::Mux(_) => muxes.push(n),
            NodeKind::EnabledSubsystem(..) => enabled_subsystems.push(n),
            NodeKind::ClockDomain(_, _, None) => {
                return Err(CoreError::ContextInvariantViolation {
                    location: AnyEntity::Node(n),
                    context: "clock domain has not been specialized into an upsample or \
                              downsample variant"
                        .to_string(),
                });
            }
            NodeKind::ClockDomain(_, _, Some(_)) => clock_domains.push(n),
            NodeKind::Subsystem(_) => plain_subsystems.push(n),
            _ => leaves.push(n),
        }
    }

    for n in leaves {
        graph.node_mut(n).context_stack = stack.clone();
    }

    for n in plain_subsystems {
        graph.node_mut(n).context_stack = stack.clone();
        let children = graph.node(n).kind.children().unwrap_or(&[]).to_vec();
        discover_level(graph, &children, stack)?;
    }

    for n in enabled_subsystems.into_iter().chain(clock_domains) {
        graph.node_mut(n).context_stack = stack.clone();
        let inner_stack = stack.with_appended(ContextFrame::new(n, 0));
        let children = graph.node(n).kind.children().unwrap_or(&[]).to_vec();
        discover_level(graph, &children, &inner_stack)?;
    }

    discover_mux_contexts_at_level(graph, &muxes, stack);

    Ok(())
}

/// Nodes considered a boundary the mux backward-walk never crosses: nodes
/// with their own state, and other context roots (their own children are
/// handled by their own recursive call, not pulled into this mux's branch).
fn is_mux_walk_boundary(graph: &GraphStore, n: Node) -> bool {
    let kind = &graph.node(n).kind;
    kind.has_state() || kind.is_context_root() || matches!(kind, NodeKind::RateChange(_))
}

/// Backward-mark the combinational cone feeding `mux`'s `port_index`-th
/// data input, returning the set of nodes that belong exclusively to that
/// branch.
fn mark_mux_branch(graph: &GraphStore, mux: Node, port_index: u32) -> HashSet<Node> {
    let mut membership = HashSet::new();
    let port = match graph.node(mux).input_ports.get(port_index as usize) {
        Some(&p) => p,
        None => return membership,
    };
    let driving_arc = match graph.port(port).arcs.first().copied() {
        Some(a) => a,
        None => return membership,
    };

    let mut marked_arcs = HashSet::new();
    marked_arcs.insert(driving_arc);
    let seed = graph.port(graph.arc(driving_arc).src).owner;
    let mut queue = VecDeque::new();
    queue.push_back(seed);

    loop {
        let mut changed = false;
        // Re-derive the candidate set from currently-marked arcs each pass,
        // since earlier candidates may only become eligible once a later
        // arc on one of their other output ports gets marked.
        let mut candidates: HashSet<Node> = marked_arcs
            .iter()
            .map(|&a| graph.port(graph.arc(a).src).owner)
            .collect();
        while let Some(n) = queue.pop_front() {
            candidates.insert(n);
        }

        for n in candidates {
            if membership.contains(&n) || n == mux {
                continue;
            }
            if is_mux_walk_boundary(graph, n) {
                continue;
            }
            let all_marked = graph
                .node(n)
                .output_ports
                .iter()
                .all(|p| graph.port(*p).arcs.iter().all(|a| marked_arcs.contains(a)));
            if !all_marked {
                continue;
            }
            membership.insert(n);
            changed = true;
            for &p in &graph.node(n).input_ports {
                for &a in &graph.port(p).arcs {
                    if marked_arcs.insert(a) {
                        queue.push_back(graph.port(graph.arc(a).src).owner);
                    }
                }
            }
        }

        if !changed {
            break;
        }
    }

    membership
}

/// Assign context stacks for every mux at one sibling level. Muxes are
/// processed together so a mux nested entirely inside another mux's branch
/// gets its own context stack extended with the outer mux's frame first.
fn discover_mux_contexts_at_level(graph: &mut GraphStore, muxes: &[Node], stack: &ContextStack) {
    if muxes.is_empty() {
        return;
    }

    let mut membership: HashMap<(Node, u32), HashSet<Node>> = HashMap::new();
    for &m in muxes {
        let count = sub_context_count(graph, m);
        for k in 0..count {
            membership.insert((m, k), mark_mux_branch(graph, m, k));
        }
    }

    let contains_count = |m: Node| -> usize {
        membership.values().filter(|set| set.contains(&m)).count()
    };
    let mut order = muxes.to_vec();
    order.sort_by_key(|&m| contains_count(m));

    for &m in &order {
        let enclosing = membership.iter().find_map(|(&(om, ok), set)| {
            if om != m && set.contains(&m) {
                Some(ContextFrame::new(om, ok))
            } else {
                None
            }
        });
        let mux_own_stack = match enclosing {
            Some(frame) => stack.with_appended(frame),
            None => stack.clone(),
        };
        graph.node_mut(m).context_stack = mux_own_stack.clone();

        for k in 0..sub_context_count(graph, m) {
            let branch_stack = mux_own_stack.with_appended(ContextFrame::new(m, k));
            for &member in &membership[&(m, k)] {
                if muxes.contains(&member) {
                    continue;
                }
                graph.node_mut(member).context_stack = branch_stack.clone();
            }
        }
    }
}

fn sub_context_count(graph: &GraphStore, mux: Node) -> u32 {
    graph
        .node(mux)
        .kind
        .context_root_data()
        .map_or(0, |d| d.sub_context_count)
}

/// Arcs feeding the visualization master bypass the normal enable-output
/// mechanism -- their source may live deep inside an enabled subsystem with
/// no genuine output port carrying the tap across the boundary. Walk each
/// such arc's source up through its enabled-subsystem ancestors, splicing
/// in a fresh output port and an internal arc at every boundary crossed, so
/// later passes see an ordinary chain of enable outputs.
fn fixup_visualization_enable_outputs(graph: &mut GraphStore) {
    let vis = graph.masters().visualization;
    let vis_arcs: Vec<_> = graph
        .arc_ids()
        .filter(|&a| graph.port(graph.arc(a).dst).owner == vis)
        .collect();

    for arc_id in vis_arcs {
        let data_type = graph.arc(arc_id).data_type.clone();
        let sample_time = graph.arc(arc_id).sample_time;
        let dst = graph.arc(arc_id).dst;

        let mut current_src_port = graph.arc(arc_id).src;
        let mut current_node = graph.port(current_src_port).owner;
        let mut crossed = false;

        loop {
            let parent = graph.node(current_node).parent;
            let crosses_enable_boundary = parent.map_or(false, |p| {
                matches!(graph.node(p).kind, NodeKind::EnabledSubsystem(..))
            });
            if !crosses_enable_boundary {
                break;
            }
            let p = parent.unwrap();
            let new_port = graph.create_port(p, PortKind::Output);
            let segment = match &data_type {
                Some(dt) => crate::ir::ArcData::new(current_src_port, new_port, dt.clone(), sample_time),
                None => crate::ir::ArcData::order_constraint(current_src_port, new_port),
            };
            graph.create_arc_unchecked(segment);
            current_src_port = new_port;
            current_node = p;
            crossed = true;
        }

        if crossed {
            graph.remove_arc(arc_id);
            let final_segment = match &data_type {
                Some(dt) => crate::ir::ArcData::new(current_src_port, dst, dt.clone(), sample_time),
                None => crate::ir::ArcData::order_constraint(current_src_port, dst),
            };
            graph.create_arc_unchecked(final_segment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DataType, NodeData};

    fn primitive(graph: &mut GraphStore, parent: Option<Node>, name: &str) -> Node {
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
    fn top_level_leaves_get_empty_stack() {
        let mut graph = GraphStore::new();
        let a = primitive(&mut graph, None, "A");
        discover_and_mark_contexts(&mut graph).unwrap();
        assert!(graph.node(a).context_stack.is_empty());
    }

    #[test]
    fn enabled_subsystem_child_gets_one_frame() {
        let mut graph = GraphStore::new();
        let root = graph.create_node(NodeData::new(
            "Enabled",
            None,
            NodeKind::EnabledSubsystem(Default::default(), crate::ir::ContextRootData::new(1)),
        ));
        let child = primitive(&mut graph, Some(root), "Inner");
        discover_and_mark_contexts(&mut graph).unwrap();
        assert!(graph.node(root).context_stack.is_empty());
        assert_eq!(graph.node(child).context_stack.len(), 1);
        assert_eq!(graph.node(child).context_stack.innermost().unwrap().root, root);
    }

    #[test]
    fn unspecialized_clock_domain_is_an_error() {
        let mut graph = GraphStore::new();
        graph.create_node(NodeData::new(
            "Domain",
            None,
            NodeKind::ClockDomain(Default::default(), crate::ir::ContextRootData::new(1), None),
        ));
        assert!(discover_and_mark_contexts(&mut graph).is_err());
    }

    #[test]
    fn mux_branch_member_gets_marked_exclusively() {
        let mut graph = GraphStore::new();
        let mux = graph.create_node(NodeData::new(
            "Mux",
            None,
            NodeKind::Mux(crate::ir::ContextRootData::new(2)),
        ));
        let select = graph.create_port(mux, PortKind::Select);
        let in0 = graph.create_port(mux, PortKind::Input);
        let in1 = graph.create_port(mux, PortKind::Input);
        let _ = select;

        let branch0 = primitive(&mut graph, None, "Branch0");
        let branch0_out = graph.create_port(branch0, PortKind::Output);
        graph
            .create_arc(crate::ir::ArcData::new(branch0_out, in0, DataType::int(32), 1))
            .unwrap();

        let branch1 = primitive(&mut graph, None, "Branch1");
        let branch1_out = graph.create_port(branch1, PortKind::Output);
        graph
            .create_arc(crate::ir::ArcData::new(branch1_out, in1, DataType::int(32), 1))
            .unwrap();

        discover_and_mark_contexts(&mut graph).unwrap();

        assert_eq!(graph.node(branch0).context_stack.len(), 1);
        assert_eq!(graph.node(branch0).context_stack.innermost().unwrap().sub_context, 0);
        assert_eq!(graph.node(branch1).context_stack.innermost().unwrap().sub_context, 1);
        assert!(graph.node(mux).context_stack.is_empty());
    }

    #[test]
    fn node_feeding_two_branches_of_same_mux_stays_outside() {
        let mut graph = GraphStore::new();
        let mux = graph.create_node(NodeData::new(
            "Mux",
            None,
            NodeKind::Mux(crate::ir::ContextRootData::new(2)),
        ));
        let _select = graph.create_port(mux, PortKind::Select);
        let in0 = graph.create_port(mux, PortKind::Input);
        let in1 = graph.create_port(mux, PortKind::Input);

        let shared = primitive(&mut graph, None, "Shared");
        let shared_out = graph.create_port(shared, PortKind::Output);
        graph
            .create_arc(crate::ir::ArcData::new(shared_out, in0, DataType::int(32), 1))
            .unwrap();
        graph
            .create_arc(crate::ir::ArcData::new(shared_out, in1, DataType::int(32), 1))
            .unwrap();

        discover_and_mark_contexts(&mut graph).unwrap();

        assert!(graph.node(shared).context_stack.is_empty());
    }
}
