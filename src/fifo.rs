//! Thread-crossing FIFO insertion: groups cross-partition arcs into FIFOs,
//! absorbs adjacent delays into a FIFO's initial state, reshapes
//! initial-condition counts to each port's block alignment, merges FIFOs
//! sharing a partition pair and block size, and validates every FIFO
//! invariant before handing off to the scheduler.

use std::collections::HashMap;

use crate::encapsulation::resolve_container_chain;
use crate::entity::EntityRef;
use crate::ir::{
    AnyEntity, Arc, ArcData, DataType, FifoData, FifoPortData, GraphEdit, GraphStore, Node,
    NodeData, NodeKind, NumericValue, Port, PortKind,
};
use crate::result::{CoreError, CoreResult, CoreWarning};
use crate::settings::CompileFlags;
use crate::timing;

/// Capacity, in blocks, given to every newly synthesized FIFO before delay
/// absorption and reshaping might grow or shrink it.
const DEFAULT_DEPTH_BLOCKS: u32 = 4;

/// Run the whole FIFO layer: placement, delay absorption, initial-condition
/// reshaping, merging, and end-of-pass validation.
pub fn insert_fifos(graph: &mut GraphStore, _flags: &CompileFlags) -> CoreResult<Vec<CoreWarning>> {
    let _t = timing::insert_fifos();
    let fifos = place_fifos(graph);

    let mut warnings = Vec::new();
    for &fifo in &fifos {
        loop {
            let mut changed = absorb_input_delay(graph, fifo, &mut warnings);
            changed |= absorb_output_delay(graph, fifo, &mut warnings);
            if !changed {
                break;
            }
        }
    }
    for &fifo in &fifos {
        reshape_for_block_size(graph, fifo);
    }
    merge_fifos(graph, &fifos);
    validate_fifos(graph)?;
    Ok(warnings)
}

/// Group every cross-partition, data-carrying arc by (source partition,
/// destination partition, source port) and synthesize one FIFO per group.
fn place_fifos(graph: &mut GraphStore) -> Vec<Node> {
    let mut groups: HashMap<(i32, i32, Port), Vec<Arc>> = HashMap::new();
    for a in graph.arc_ids().collect::<Vec<_>>() {
        let arc = graph.arc(a).clone();
        if arc.is_order_constraint() {
            continue;
        }
        let src_owner = graph.port(arc.src).owner;
        let dst_owner = graph.port(arc.dst).owner;
        let src_partition = graph.node(src_owner).partition;
        let dst_partition = graph.node(dst_owner).partition;
        if src_partition == dst_partition {
            continue;
        }
        groups
            .entry((src_partition, dst_partition, arc.src))
            .or_insert_with(Vec::new)
            .push(a);
    }

    let mut keys: Vec<(i32, i32, Port)> = groups.keys().copied().collect();
    keys.sort_by_key(|&(sp, dp, p)| (sp, dp, p.index()));

    keys.into_iter()
        .map(|key| {
            let arcs = groups.remove(&key).expect("key came from this map");
            synthesize_one_fifo(graph, key, arcs)
        })
        .collect()
}

/// Synthesize one FIFO for a (source partition, destination partition,
/// source port) group: place it in the source's context (one frame
/// shallower if the source is an enable output), wire source in and rewire
/// every grouped arc's source to the FIFO's output.
fn synthesize_one_fifo(
    graph: &mut GraphStore,
    (src_partition, _dst_partition, src_port): (i32, i32, Port),
    arcs: Vec<Arc>,
) -> Node {
    let src_node = graph.port(src_port).owner;
    let block_size = effective_block_size(graph, src_node);

    let mut stack = graph.node(src_node).context_stack.clone();
    if graph.port(src_port).kind == PortKind::Enable {
        stack = stack.without_innermost();
    }
    let parent = resolve_container_chain(graph, &stack, src_partition);

    let fifo = graph.create_node(NodeData::new(
        format!("{}_fifo_p{}", graph.node(src_node).name, src_partition),
        parent,
        NodeKind::ThreadCrossingFifo(FifoData {
            depth: DEFAULT_DEPTH_BLOCKS,
            ports: vec![FifoPortData {
                block_size,
                sub_block_in: block_size,
                sub_block_out: block_size,
                initial_conditions: Vec::new(),
            }],
            copy_mode: None,
        }),
    ));
    graph.node_mut(fifo).partition = src_partition;
    graph.node_mut(fifo).context_stack = stack;

    let sample = graph.arc(arcs[0]).clone();
    let data_type = sample
        .data_type
        .clone()
        .expect("arcs grouped for a FIFO are data-carrying");
    let sample_time = sample.sample_time;

    let fifo_in = graph.create_port(fifo, PortKind::Input);
    let fifo_out = graph.create_port(fifo, PortKind::Output);
    graph.create_arc_unchecked(ArcData::new(src_port, fifo_in, data_type, sample_time));

    let mut edit = GraphEdit::default();
    for a in arcs {
        let old = graph.arc(a).clone();
        edit.remove_arcs.push(a);
        edit.add_arcs.push(ArcData {
            src: fifo_out,
            dst: old.dst,
            data_type: old.data_type,
            sample_time: old.sample_time,
            delay: old.delay,
            slack: old.slack,
        });
    }
    graph.apply_edit(edit);

    fifo
}

/// A node's own imported sub-blocking length, or `1` (no vectorization)
/// when unset.
fn effective_block_size(graph: &GraphStore, n: Node) -> u32 {
    let len = graph.node(n).sub_blocking_length;
    if len > 0 {
        len as u32
    } else {
        1
    }
}

/// The data type carried by a FIFO channel, read off whichever of its two
/// ports (output preferred) still has a connected arc.
fn channel_data_type(graph: &GraphStore, fifo: Node, channel: usize) -> Option<DataType> {
    let out_port = graph.node(fifo).output_ports.get(channel).copied();
    let in_port = graph.node(fifo).input_ports.get(channel).copied();
    for p in [out_port, in_port].into_iter().flatten() {
        if let Some(dt) = graph
            .port(p)
            .arcs
            .iter()
            .find_map(|&a| graph.arc(a).data_type.clone())
        {
            return Some(dt);
        }
    }
    None
}

/// How many initial-condition elements channel `channel` of `fifo` could
/// still absorb without violating the capacity invariant.
fn free_capacity(graph: &GraphStore, fifo: Node, channel: usize) -> usize {
    let (depth, port) = match &graph.node(fifo).kind {
        NodeKind::ThreadCrossingFifo(data) => match data.ports.get(channel) {
            Some(p) => (data.depth, p.clone()),
            None => return 0,
        },
        _ => return 0,
    };
    let element_count = channel_data_type(graph, fifo, channel).map_or(1, |dt| dt.element_count()) as usize;
    let denom = (port.block_size as usize * element_count) / (port.sub_block_in.max(1) as usize);
    if denom == 0 {
        return 0;
    }
    let max_allowed = (depth.saturating_sub(1) as usize) * denom;
    max_allowed.saturating_sub(port.initial_conditions.len())
}

fn order_constraint_in_connected(graph: &GraphStore, n: Node) -> bool {
    graph
        .node(n)
        .order_constraint_in
        .map_or(false, |p| !graph.port(p).is_disconnected())
}

fn order_constraint_out_connected(graph: &GraphStore, n: Node) -> bool {
    graph
        .node(n)
        .order_constraint_out
        .map_or(false, |p| !graph.port(p).is_disconnected())
}

/// Absorb a delay adjacent to `fifo`'s input, if one is present, the FIFO is
/// its sole consumer, and the FIFO carries no order-constraint-in arcs.
/// Partial absorption is not modeled: a delay too deep to fit entirely is
/// left in place and reported as a residual warning instead.
fn absorb_input_delay(graph: &mut GraphStore, fifo: Node, warnings: &mut Vec<CoreWarning>) -> bool {
    if order_constraint_in_connected(graph, fifo) {
        return false;
    }
    let channel = 0usize;
    let fifo_in = match graph.node(fifo).input_ports.get(channel).copied() {
        Some(p) => p,
        None => return false,
    };
    let in_arc = match graph.port(fifo_in).arcs.first().copied() {
        Some(a) => a,
        None => return false,
    };
    let delay_out = graph.arc(in_arc).src;
    let delay = graph.port(delay_out).owner;
    let initial_conditions = match &graph.node(delay).kind {
        NodeKind::Delay { initial_conditions, .. } => initial_conditions.clone(),
        _ => return false,
    };
    if graph.port(delay_out).arcs.len() != 1 {
        // The delay feeds something besides this FIFO; absorbing it would
        // change what that other consumer sees.
        return false;
    }

    let free = free_capacity(graph, fifo, channel);
    if initial_conditions.len() > free {
        warnings.push(CoreWarning::PartialDelayAbsorption {
            fifo,
            residual: (initial_conditions.len() - free) as u32,
        });
        return false;
    }

    let delay_in = graph.node(delay).input_ports.get(0).copied();
    let upstream_arc = delay_in.and_then(|p| graph.port(p).arcs.first().copied());
    let upstream = upstream_arc.map(|a| graph.arc(a).clone());

    let mut edit = GraphEdit::default();
    edit.remove_nodes.push(delay);
    if let Some(up) = &upstream {
        edit.add_arcs.push(ArcData {
            src: up.src,
            dst: fifo_in,
            data_type: up.data_type.clone(),
            sample_time: up.sample_time,
            delay: up.delay,
            slack: up.slack,
        });
    }
    graph.apply_edit(edit);

    if let NodeKind::ThreadCrossingFifo(data) = &mut graph.node_mut(fifo).kind {
        let mut new_ics = initial_conditions;
        new_ics.append(&mut data.ports[channel].initial_conditions);
        data.ports[channel].initial_conditions = new_ics;
    }
    true
}

/// Absorb delay(s) adjacent to `fifo`'s output, if every current consumer of
/// that output is a `Delay` carrying identical initial conditions and the
/// FIFO carries no order-constraint-out arcs.
fn absorb_output_delay(graph: &mut GraphStore, fifo: Node, warnings: &mut Vec<CoreWarning>) -> bool {
    if order_constraint_out_connected(graph, fifo) {
        return false;
    }
    let channel = 0usize;
    let fifo_out = match graph.node(fifo).output_ports.get(channel).copied() {
        Some(p) => p,
        None => return false,
    };
    let arcs: Vec<Arc> = graph.port(fifo_out).arcs.iter().copied().collect();
    if arcs.is_empty() {
        return false;
    }

    let mut delays = Vec::new();
    let mut shared_ics: Option<Vec<NumericValue>> = None;
    for &a in &arcs {
        let dst = graph.port(graph.arc(a).dst).owner;
        match &graph.node(dst).kind {
            NodeKind::Delay { initial_conditions, .. } => match &shared_ics {
                None => {
                    shared_ics = Some(initial_conditions.clone());
                    delays.push(dst);
                }
                Some(ics) if ics == initial_conditions => delays.push(dst),
                Some(_) => return false,
            },
            _ => return false,
        }
    }
    let shared_ics = match shared_ics {
        Some(ics) => ics,
        None => return false,
    };

    let free = free_capacity(graph, fifo, channel);
    if shared_ics.len() > free {
        warnings.push(CoreWarning::PartialDelayAbsorption {
            fifo,
            residual: (shared_ics.len() - free) as u32,
        });
        return false;
    }

    let mut edit = GraphEdit::default();
    for &delay in &delays {
        if let Some(&op) = graph.node(delay).output_ports.get(0) {
            for &a in graph.port(op).arcs.iter() {
                let downstream = graph.arc(a).clone();
                edit.add_arcs.push(ArcData {
                    src: fifo_out,
                    dst: downstream.dst,
                    data_type: downstream.data_type,
                    sample_time: downstream.sample_time,
                    delay: downstream.delay,
                    slack: downstream.slack,
                });
            }
        }
        edit.remove_nodes.push(delay);
    }
    graph.apply_edit(edit);

    if let NodeKind::ThreadCrossingFifo(data) = &mut graph.node_mut(fifo).kind {
        let mut new_ics = shared_ics;
        new_ics.append(&mut data.ports[channel].initial_conditions);
        data.ports[channel].initial_conditions = new_ics;
    }
    true
}

/// The alignment denominator for one FIFO channel: block-size × per-element
/// count ÷ sub-block-size (input side).
fn alignment_denominator(graph: &GraphStore, fifo: Node, channel: usize) -> usize {
    let port = match &graph.node(fifo).kind {
        NodeKind::ThreadCrossingFifo(data) => match data.ports.get(channel) {
            Some(p) => p.clone(),
            None => return 0,
        },
        _ => return 0,
    };
    let element_count = channel_data_type(graph, fifo, channel).map_or(1, |dt| dt.element_count()) as usize;
    (port.block_size as usize * element_count) / (port.sub_block_in.max(1) as usize)
}

/// If a channel's initial-condition count is not a multiple of its
/// alignment denominator, move the excess (the modulo) into a synthesized
/// delay node inserted at the FIFO's input.
fn reshape_for_block_size(graph: &mut GraphStore, fifo: Node) {
    let channel = 0usize;
    let denom = alignment_denominator(graph, fifo, channel);
    if denom == 0 {
        return;
    }
    let ic_count = match &graph.node(fifo).kind {
        NodeKind::ThreadCrossingFifo(data) => data
            .ports
            .get(channel)
            .map_or(0, |p| p.initial_conditions.len()),
        _ => return,
    };
    let remainder = ic_count % denom;
    if remainder == 0 {
        return;
    }

    let moved = match &mut graph.node_mut(fifo).kind {
        NodeKind::ThreadCrossingFifo(data) => {
            let ics = &mut data.ports[channel].initial_conditions;
            let split_at = ics.len() - remainder;
            ics.split_off(split_at)
        }
        _ => return,
    };

    let fifo_in = graph.node(fifo).input_ports[channel];
    let in_arc = graph.port(fifo_in).arcs.first().copied();
    let upstream = in_arc.map(|a| graph.arc(a).clone());

    let delay = graph.create_node(NodeData::new(
        format!("{}_ic_align", graph.node(fifo).name),
        graph.node(fifo).parent,
        NodeKind::Delay {
            initial_conditions: moved,
            depth: remainder as u32,
        },
    ));
    graph.node_mut(delay).partition = graph.node(fifo).partition;
    let delay_in = graph.create_port(delay, PortKind::Input);
    let delay_out = graph.create_port(delay, PortKind::Output);

    let mut edit = GraphEdit::default();
    if let (Some(a), Some(up)) = (in_arc, &upstream) {
        edit.remove_arcs.push(a);
        edit.add_arcs.push(ArcData {
            src: up.src,
            dst: delay_in,
            data_type: up.data_type.clone(),
            sample_time: up.sample_time,
            delay: up.delay,
            slack: up.slack,
        });
        edit.add_arcs.push(ArcData {
            src: delay_out,
            dst: fifo_in,
            data_type: up.data_type.clone(),
            sample_time: up.sample_time,
            delay: 0,
            slack: 0,
        });
    }
    graph.apply_edit(edit);
}

/// Merge FIFOs sharing a (source partition, destination partition, block
/// size) key into a single multi-port FIFO, as long as neither carries an
/// order-constraint arc. Merge compatibility beyond matching block size is
/// intentionally conservative.
fn merge_fifos(graph: &mut GraphStore, fifos: &[Node]) {
    let mut groups: HashMap<(i32, i32, u32), Vec<Node>> = HashMap::new();
    for &f in fifos {
        if !graph.node_is_live(f) {
            continue;
        }
        if order_constraint_in_connected(graph, f) || order_constraint_out_connected(graph, f) {
            continue;
        }
        let partition = graph.node(f).partition;
        let block_size = match &graph.node(f).kind {
            NodeKind::ThreadCrossingFifo(data) => data.ports.get(0).map(|p| p.block_size),
            _ => None,
        };
        let block_size = match block_size {
            Some(b) => b,
            None => continue,
        };
        let dst_partition = match channel_dst_partition(graph, f, 0) {
            Some(p) => p,
            None => continue,
        };
        groups
            .entry((partition, dst_partition, block_size))
            .or_insert_with(Vec::new)
            .push(f);
    }

    for (_, members) in groups {
        if members.len() < 2 {
            continue;
        }
        let survivor = members[0];
        for &victim in &members[1..] {
            merge_one_into(graph, survivor, victim);
        }
    }
}

fn channel_dst_partition(graph: &GraphStore, fifo: Node, channel: usize) -> Option<i32> {
    let out_port = *graph.node(fifo).output_ports.get(channel)?;
    graph.port(out_port).arcs.iter().find_map(|&a| {
        let dst = graph.port(graph.arc(a).dst).owner;
        Some(graph.node(dst).partition)
    })
}

/// Fold `victim`'s single channel into `survivor` as an additional port
/// pair, then delete `victim`.
fn merge_one_into(graph: &mut GraphStore, survivor: Node, victim: Node) {
    let victim_port_data = match &graph.node(victim).kind {
        NodeKind::ThreadCrossingFifo(data) => match data.ports.get(0) {
            Some(p) => p.clone(),
            None => return,
        },
        _ => return,
    };

    if let NodeKind::ThreadCrossingFifo(data) = &mut graph.node_mut(survivor).kind {
        data.ports.push(victim_port_data);
    } else {
        return;
    }
    let survivor_in = graph.create_port(survivor, PortKind::Input);
    let survivor_out = graph.create_port(survivor, PortKind::Output);

    let victim_in_arc = graph
        .node(victim)
        .input_ports
        .get(0)
        .and_then(|&p| graph.port(p).arcs.first().copied());
    let victim_out_arcs: Vec<Arc> = graph
        .node(victim)
        .output_ports
        .get(0)
        .map(|&p| graph.port(p).arcs.iter().copied().collect())
        .unwrap_or_default();

    let mut edit = GraphEdit::default();
    if let Some(a) = victim_in_arc {
        let arc = graph.arc(a).clone();
        edit.add_arcs.push(ArcData {
            src: arc.src,
            dst: survivor_in,
            data_type: arc.data_type,
            sample_time: arc.sample_time,
            delay: arc.delay,
            slack: arc.slack,
        });
    }
    for a in victim_out_arcs {
        let arc = graph.arc(a).clone();
        edit.add_arcs.push(ArcData {
            src: survivor_out,
            dst: arc.dst,
            data_type: arc.data_type,
            sample_time: arc.sample_time,
            delay: arc.delay,
            slack: arc.slack,
        });
    }
    edit.remove_nodes.push(victim);
    graph.apply_edit(edit);
}

/// Check every FIFO invariant: capacity, block-alignment, equal per-port
/// initial-condition block counts, and sub-block sizes dividing block size.
fn validate_fifos(graph: &GraphStore) -> CoreResult<()> {
    for n in graph.node_ids().collect::<Vec<_>>() {
        let data = match &graph.node(n).kind {
            NodeKind::ThreadCrossingFifo(d) => d.clone(),
            _ => continue,
        };
        let mut block_counts = Vec::new();
        for (i, port) in data.ports.iter().enumerate() {
            if port.block_size % port.sub_block_in.max(1) != 0
                || port.block_size % port.sub_block_out.max(1) != 0
            {
                return Err(CoreError::FifoInvariantViolation {
                    location: AnyEntity::Node(n),
                    context: format!("port {} sub-block size does not divide block size", i),
                });
            }
            let element_count = channel_data_type(graph, n, i).map_or(1, |dt| dt.element_count()) as usize;
            let denom = (port.block_size as usize * element_count) / (port.sub_block_in.max(1) as usize);
            if denom == 0 {
                continue;
            }
            let max_allowed = (data.depth.saturating_sub(1) as usize) * denom;
            if port.initial_conditions.len() > max_allowed {
                return Err(CoreError::FifoInvariantViolation {
                    location: AnyEntity::Node(n),
                    context: format!(
                        "port {} has {} initial conditions, exceeding capacity {}",
                        i,
                        port.initial_conditions.len(),
                        max_allowed
                    ),
                });
            }
            if port.initial_conditions.len() % denom != 0 {
                return Err(CoreError::FifoInvariantViolation {
                    location: AnyEntity::Node(n),
                    context: format!("port {} initial-condition count is not block-aligned", i),
                });
            }
            block_counts.push(port.initial_conditions.len() / denom);
        }
        if let Some(&first) = block_counts.first() {
            if block_counts.iter().any(|&c| c != first) {
                return Err(CoreError::FifoInvariantViolation {
                    location: AnyEntity::Node(n),
                    context: "ports disagree on initial-condition block count".to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primitive(graph: &mut GraphStore, name: &str, partition: i32) -> Node {
        let n = graph.create_node(NodeData::new(
            name,
            None,
            NodeKind::Primitive {
                block_function: "Gain".to_string(),
                has_state: false,
                has_combinational_path: true,
                blackbox: None,
            },
        ));
        graph.node_mut(n).partition = partition;
        n
    }

    #[test]
    fn cross_partition_arc_gets_a_fifo_in_the_source_partition() {
        let mut graph = GraphStore::new();
        let a = primitive(&mut graph, "A", 0);
        let b = primitive(&mut graph, "B", 1);
        let a_out = graph.create_port(a, PortKind::Output);
        let b_in = graph.create_port(b, PortKind::Input);
        graph
            .create_arc(ArcData::new(a_out, b_in, DataType::int(32), 1))
            .unwrap();

        let flags = CompileFlags::default();
        insert_fifos(&mut graph, &flags).unwrap();

        let fifos: Vec<Node> = graph
            .node_ids()
            .filter(|&n| matches!(graph.node(n).kind, NodeKind::ThreadCrossingFifo(_)))
            .collect();
        assert_eq!(fifos.len(), 1);
        assert_eq!(graph.node(fifos[0]).partition, 0);
        assert!(graph.port(b_in).arcs.iter().any(|&arc| {
            let src = graph.arc(arc).src;
            graph.port(src).owner == fifos[0]
        }));
    }

    #[test]
    fn adjacent_input_delay_is_fully_absorbed() {
        let mut graph = GraphStore::new();
        let a = primitive(&mut graph, "A", 0);
        let delay = graph.create_node(NodeData::new(
            "D",
            None,
            NodeKind::Delay {
                initial_conditions: vec![NumericValue::real(0.0), NumericValue::real(0.0), NumericValue::real(0.0)],
                depth: 3,
            },
        ));
        graph.node_mut(delay).partition = 0;
        let b = primitive(&mut graph, "B", 1);

        let a_out = graph.create_port(a, PortKind::Output);
        let d_in = graph.create_port(delay, PortKind::Input);
        let d_out = graph.create_port(delay, PortKind::Output);
        let b_in = graph.create_port(b, PortKind::Input);
        graph
            .create_arc(ArcData::new(a_out, d_in, DataType::int(32), 1))
            .unwrap();
        graph
            .create_arc(ArcData::new(d_out, b_in, DataType::int(32), 1))
            .unwrap();

        let flags = CompileFlags::default();
        insert_fifos(&mut graph, &flags).unwrap();

        assert!(!graph.node_is_live(delay));
        let fifo = graph
            .node_ids()
            .find(|&n| matches!(graph.node(n).kind, NodeKind::ThreadCrossingFifo(_)))
            .expect("a fifo was synthesized");
        match &graph.node(fifo).kind {
            NodeKind::ThreadCrossingFifo(data) => {
                assert_eq!(data.ports[0].initial_conditions.len(), 3);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn validation_catches_misaligned_initial_conditions() {
        let mut graph = GraphStore::new();
        graph.create_node(NodeData::new(
            "Bad",
            None,
            NodeKind::ThreadCrossingFifo(FifoData {
                depth: 4,
                ports: vec![FifoPortData {
                    block_size: 4,
                    sub_block_in: 2,
                    sub_block_out: 2,
                    initial_conditions: vec![NumericValue::real(0.0); 3],
                }],
                copy_mode: None,
            }),
        ));

        let flags = CompileFlags::default();
        let err = insert_fifos(&mut graph, &flags).unwrap_err();
        assert!(matches!(err, CoreError::FifoInvariantViolation { .. }));
    }
}
