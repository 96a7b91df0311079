//! End-to-end coverage of the compiler façade over a handful of small,
//! hand-built graphs, each exercising a different corner of the pipeline:
//! a plain combinational chain, one enabled subsystem crossed by a real
//! arc, a cross-partition delay absorbed into a FIFO, and a dependency
//! cycle.

use dataflow_ir::driver::{exit_status, Compiler};
use dataflow_ir::ir::{
    ArcData, ContextRootData, DataType, GraphStore, NodeData, NodeKind, NumericValue, PortKind,
    SubsystemData,
};
use dataflow_ir::settings::CompileFlags;

fn primitive(graph: &mut GraphStore, name: &str, parent: Option<dataflow_ir::ir::Node>) -> dataflow_ir::ir::Node {
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
fn pure_combinational_chain() {
    let mut graph = GraphStore::new();
    let compare = primitive(&mut graph, "Compare", None);
    let sink = primitive(&mut graph, "Sink", None);
    let compare_out = graph.create_port(compare, PortKind::Output);
    let sink_in = graph.create_port(sink, PortKind::Input);
    graph
        .create_arc(ArcData::new(compare_out, sink_in, DataType::boolean(), 0))
        .unwrap();

    let report = Compiler::new(CompileFlags::default())
        .compile(graph)
        .expect("a combinational chain with no contexts compiles cleanly");

    assert!(report.warnings.is_empty());
    assert_eq!(report.partitions.len(), 1);
    let order = &report.partitions[0].nodes;
    let compare_pos = order.iter().position(|&n| n == compare).unwrap();
    let sink_pos = order.iter().position(|&n| n == sink).unwrap();
    assert!(compare_pos < sink_pos);
}

#[test]
fn enabled_subsystem_crossed_by_a_real_arc_schedules_in_dependency_order() {
    let mut graph = GraphStore::new();

    let root = graph.create_node(NodeData::new(
        "Enabled",
        None,
        NodeKind::EnabledSubsystem(SubsystemData::default(), ContextRootData::new(1)),
    ));
    let enable_port = graph.create_port(root, PortKind::Enable);
    let truth = primitive(&mut graph, "True", None);
    let truth_out = graph.create_port(truth, PortKind::Output);
    graph
        .create_arc(ArcData::new(truth_out, enable_port, DataType::boolean(), 0))
        .unwrap();

    let upstream = primitive(&mut graph, "InSrc", None);
    let a = primitive(&mut graph, "A", Some(root));
    let b = primitive(&mut graph, "B", Some(root));
    let c = primitive(&mut graph, "C", Some(root));
    let downstream = primitive(&mut graph, "Sink", None);

    let upstream_out = graph.create_port(upstream, PortKind::Output);
    let a_in = graph.create_port(a, PortKind::Input);
    let a_out = graph.create_port(a, PortKind::Output);
    let b_in = graph.create_port(b, PortKind::Input);
    let b_out = graph.create_port(b, PortKind::Output);
    let c_in = graph.create_port(c, PortKind::Input);
    let c_out = graph.create_port(c, PortKind::Output);
    let downstream_in = graph.create_port(downstream, PortKind::Input);

    let ty = DataType::int(32);
    graph.create_arc(ArcData::new(upstream_out, a_in, ty.clone(), 0)).unwrap();
    graph.create_arc(ArcData::new(a_out, b_in, ty.clone(), 0)).unwrap();
    graph.create_arc(ArcData::new(b_out, c_in, ty.clone(), 0)).unwrap();
    graph.create_arc(ArcData::new(c_out, downstream_in, ty, 0)).unwrap();

    let report = Compiler::new(CompileFlags::default())
        .compile(graph)
        .expect("one enabled subsystem with a real crossing arc compiles cleanly");

    let order = &report.partitions[0].nodes;
    let pos = |n| order.iter().position(|&x| x == n).unwrap();
    assert!(pos(upstream) < pos(a));
    assert!(pos(a) < pos(b));
    assert!(pos(b) < pos(c));
    assert!(pos(c) < pos(downstream));
}

#[test]
fn delay_on_a_partition_boundary_is_absorbed_into_a_fifo() {
    let mut graph = GraphStore::new();

    let producer = primitive(&mut graph, "Producer", None);
    graph.node_mut(producer).partition = 0;
    let delay = graph.create_node(NodeData::new(
        "Delay",
        None,
        NodeKind::Delay {
            initial_conditions: vec![
                NumericValue::real(0.0),
                NumericValue::real(0.0),
                NumericValue::real(0.0),
            ],
            depth: 3,
        },
    ));
    graph.node_mut(delay).partition = 0;
    let consumer = primitive(&mut graph, "Consumer", None);
    graph.node_mut(consumer).partition = 1;

    let producer_out = graph.create_port(producer, PortKind::Output);
    let delay_in = graph.create_port(delay, PortKind::Input);
    let delay_out = graph.create_port(delay, PortKind::Output);
    let consumer_in = graph.create_port(consumer, PortKind::Input);

    let ty = DataType::int(32);
    graph.create_arc(ArcData::new(producer_out, delay_in, ty.clone(), 0)).unwrap();
    graph.create_arc(ArcData::new(delay_out, consumer_in, ty, 0)).unwrap();

    let report = Compiler::new(CompileFlags::default())
        .compile(graph)
        .expect("a delay fully absorbable into FIFO capacity compiles cleanly");

    assert_eq!(report.partitions.len(), 2);
    let fifo_exists = report
        .partitions
        .iter()
        .flat_map(|p| p.nodes.iter())
        .any(|&n| n != producer && n != consumer && n != delay);
    assert!(fifo_exists, "a FIFO node should have been synthesized");
}

#[test]
fn two_node_cycle_is_rejected_with_exit_status_four() {
    let mut graph = GraphStore::new();
    let a = primitive(&mut graph, "A", None);
    let b = primitive(&mut graph, "B", None);
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
