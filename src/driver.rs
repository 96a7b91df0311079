//! In-memory stand-ins for the external importer/emitter interfaces, plus
//! the `Compiler` façade that drives all five passes end to end.
//!
//! The real front end (a GraphML ingester) and back end (a C emitter) live
//! outside this crate; this module defines the seam they plug into --
//! [`GraphSource`] on the way in, [`CompileReport`] on the way out -- and
//! ships the minimal stand-ins needed to exercise the pipeline without
//! either one, mirroring the split Cranelift keeps between
//! `cranelift_codegen::Context` and its caller-supplied `TargetIsa`/`Function`.

use std::collections::BTreeMap;

use crate::ir::{GraphStore, Node, NodeKind};
use crate::result::{CoreError, CoreResult, CoreWarning};
use crate::settings::CompileFlags;
use crate::{context_analysis, encapsulation, fifo, scheduler, state_update};

/// Supplies the graph to compile.
///
/// Stands in for a real GraphML ingester: production code would implement
/// this over a parsed document, assigning node/arc identities itself before
/// handing the graph to the core. [`GraphStore`] implements it directly so
/// a caller (or test) that already has one in hand can pass it straight to
/// [`Compiler::compile`].
pub trait GraphSource {
    /// Produce the graph to compile, consuming this source.
    fn into_graph(self) -> GraphStore;
}

impl GraphSource for GraphStore {
    fn into_graph(self) -> GraphStore {
        self
    }
}

/// One partition's emission-ready node order: the "output surface" the
/// external C emitter consumes.
#[derive(Debug, Clone)]
pub struct PartitionSchedule {
    /// The partition number, or `None` if the graph was never partitioned.
    pub partition: Option<i32>,
    /// Nodes in this partition, in ascending schedule order.
    pub nodes: Vec<Node>,
}

/// Everything a C emitter needs after a successful compile: the graph
/// itself (now encapsulated, pruned, FIFO'd, and scheduled), its derived
/// per-partition order, and any non-fatal warnings collected along the way.
#[derive(Debug, Clone)]
pub struct CompileReport {
    /// Every partition's schedule, ordered by partition number (unassigned
    /// nodes last).
    pub partitions: Vec<PartitionSchedule>,
    /// Non-fatal conditions surfaced by the passes.
    pub warnings: Vec<CoreWarning>,
}

/// Runs the pipeline over a graph: context discovery, encapsulation,
/// state-update synthesis, FIFO insertion, then scheduling.
///
/// FIFO insertion runs before scheduling even though `lib.rs` lists
/// `scheduler` ahead of `fifo` -- the scheduler's partition-local sort (see
/// its module doc) assumes every cross-partition arc has already been
/// replaced by a FIFO pair, so running it first would leave cross-partition
/// dependencies for the sort to silently ignore instead of order through a
/// FIFO.
#[derive(Clone, Debug, Default)]
pub struct Compiler {
    flags: CompileFlags,
}

impl Compiler {
    /// Build a compiler with the given flags.
    pub fn new(flags: CompileFlags) -> Self {
        Compiler { flags }
    }

    /// The flags this compiler was built with.
    pub fn flags(&self) -> &CompileFlags {
        &self.flags
    }

    /// Run every pass over `source`'s graph and return the emission-ready
    /// report, or the first fatal error encountered. Each pass is
    /// all-or-nothing: a `CoreError` from any step aborts the whole
    /// compile rather than leaving a partially-transformed graph for the
    /// caller to inspect.
    pub fn compile(&self, source: impl GraphSource) -> CoreResult<CompileReport> {
        let mut graph = source.into_graph();

        context_analysis::discover_and_mark_contexts(&mut graph)?;
        encapsulation::encapsulate(&mut graph)?;

        let mut warnings = state_update::run(&mut graph, &self.flags)?;
        warnings.extend(fifo::insert_fifos(&mut graph, &self.flags)?);
        scheduler::schedule(&mut graph, &self.flags)?;

        Ok(CompileReport {
            partitions: partition_schedules(&graph),
            warnings,
        })
    }
}

/// Group every scheduled, non-master node by partition and sort each group
/// by `schedule_order`.
fn partition_schedules(graph: &GraphStore) -> Vec<PartitionSchedule> {
    let mut by_partition: BTreeMap<Option<i32>, Vec<Node>> = BTreeMap::new();
    for n in graph.node_ids() {
        if graph.node(n).kind.is_master() {
            continue;
        }
        if graph.node(n).schedule_order.is_none() {
            continue;
        }
        let partition = match graph.node(n).partition {
            -1 => None,
            p => Some(p),
        };
        by_partition.entry(partition).or_insert_with(Vec::new).push(n);
    }

    by_partition
        .into_iter()
        .map(|(partition, mut nodes)| {
            nodes.sort_by_key(|&n| graph.node(n).schedule_order);
            PartitionSchedule { partition, nodes }
        })
        .collect()
}

/// Map a fatal [`CoreError`] to the process exit status an external CLI
/// driver must surface, per the "exit statuses" contract on the output
/// surface: `0` for success, a distinct small code per error kind so a
/// caller can dispatch on it without string-matching the display message.
pub fn exit_status(result: &CoreResult<CompileReport>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(CoreError::MalformedInput { .. }) => 1,
        Err(CoreError::StructuralViolation { .. }) => 2,
        Err(CoreError::ContextInvariantViolation { .. }) => 3,
        Err(CoreError::SchedulingFailure { .. }) => 4,
        Err(CoreError::FifoInvariantViolation { .. }) => 5,
    }
}

/// The GraphML-visible `block_function` tag a pseudo-node synthesized by
/// the core carries, per the "persistent state" contract on the output
/// surface -- so a re-serialized graph stays round-trippable through the
/// ingester even for nodes the core itself created. `None` for anything
/// the ingester originally supplied.
pub fn graphml_block_function_tag(kind: &NodeKind) -> Option<&'static str> {
    match kind {
        NodeKind::ContextContainer { .. } => Some("ContextContainer"),
        NodeKind::ContextFamilyContainer { .. } => Some("ContextFamilyContainer"),
        NodeKind::DummyReplica { .. } => Some("DummyReplica"),
        NodeKind::StateUpdate { .. } => Some("StateUpdate"),
        NodeKind::ThreadCrossingFifo(_) => Some("ThreadCrossingFIFO"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::ir::{ArcData, DataType, NodeData, PortKind};

    #[test]
    fn pure_combinational_chain_schedules_in_dependency_order() {
        let mut graph = GraphStore::new();

        let compare = graph.create_node(NodeData::new(
            "Compare",
            None,
            NodeKind::Primitive {
                block_function: "Compare".to_string(),
                has_state: false,
                has_combinational_path: true,
                blackbox: None,
            },
        ));
        let downstream = graph.create_node(NodeData::new(
            "Sink",
            None,
            NodeKind::Primitive {
                block_function: "Gain".to_string(),
                has_state: false,
                has_combinational_path: true,
                blackbox: None,
            },
        ));
        let compare_out = graph.create_port(compare, PortKind::Output);
        let downstream_in = graph.create_port(downstream, PortKind::Input);
        graph
            .create_arc(ArcData::new(compare_out, downstream_in, DataType::boolean(), 0))
            .unwrap();

        let report = Compiler::new(CompileFlags::default())
            .compile(graph)
            .expect("pure combinational chain compiles");

        assert_eq!(report.partitions.len(), 1);
        let order = &report.partitions[0].nodes;
        let compare_pos = order.iter().position(|&n| n == compare).unwrap();
        let downstream_pos = order.iter().position(|&n| n == downstream).unwrap();
        assert!(compare_pos < downstream_pos);
    }

    #[test]
    fn cycle_surfaces_as_exit_status_four() {
        let mut graph = GraphStore::new();
        let a = graph.create_node(NodeData::new(
            "A",
            None,
            NodeKind::Primitive {
                block_function: "Gain".to_string(),
                has_state: false,
                has_combinational_path: true,
                blackbox: None,
            },
        ));
        let b = graph.create_node(NodeData::new(
            "B",
            None,
            NodeKind::Primitive {
                block_function: "Gain".to_string(),
                has_state: false,
                has_combinational_path: true,
                blackbox: None,
            },
        ));
        let a_out = graph.create_port(a, PortKind::Output);
        let a_in = graph.create_port(a, PortKind::Input);
        let b_out = graph.create_port(b, PortKind::Output);
        let b_in = graph.create_port(b, PortKind::Input);

        let ty = DataType::int(32);
        graph.create_arc(ArcData::new(a_out, b_in, ty.clone(), 0)).unwrap();
        graph.create_arc(ArcData::new(b_out, a_in, ty, 0)).unwrap();

        let result = Compiler::new(CompileFlags::default()).compile(graph);
        assert!(result.is_err());
        assert_eq!(exit_status(&result), 4);
    }

    #[test]
    fn graphml_tag_identifies_synthesized_containers_only() {
        assert_eq!(
            graphml_block_function_tag(&NodeKind::ContextContainer {
                family: Node::new(0),
                sub_context: 0,
                children: Vec::new(),
            }),
            Some("ContextContainer")
        );
        assert_eq!(
            graphml_block_function_tag(&NodeKind::Primitive {
                block_function: "Gain".to_string(),
                has_state: false,
                has_combinational_path: true,
                blackbox: None,
            }),
            None
        );
    }
}
