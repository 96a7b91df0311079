//! Arcs: directed edges from one output-like port to one input-like port.

use crate::ir::datatype::DataType;
use crate::ir::ids::Port;

/// A directed edge carrying a typed value (or, for order-constraint arcs, no
/// data at all) from a source port to a destination port.
///
/// Arcs are owned by the graph store's arena; they hold the *indices* of
/// their endpoint ports, never live references, so removing an endpoint is
/// just scrubbing the arc's id out of that port's `arcs` list (see
/// [`super::graph::GraphStore::remove_arc`]).
#[derive(Clone, Debug)]
pub struct ArcData {
    /// The driving output (or order-constraint-out) port.
    pub src: Port,
    /// The driven input (or order-constraint-in) port.
    pub dst: Port,
    /// The type carried, or `None` for an order-constraint arc.
    pub data_type: Option<DataType>,
    /// Sample time, in the importer's native units; `0` for order-constraint
    /// arcs.
    pub sample_time: i64,
    /// Delay in cycles.
    pub delay: i32,
    /// Slack in cycles.
    pub slack: i32,
}

impl ArcData {
    /// Construct a data-carrying arc.
    pub fn new(src: Port, dst: Port, data_type: DataType, sample_time: i64) -> Self {
        ArcData {
            src,
            dst,
            data_type: Some(data_type),
            sample_time,
            delay: 0,
            slack: 0,
        }
    }

    /// Construct an order-constraint arc (no data, used purely to force
    /// scheduling order).
    pub fn order_constraint(src: Port, dst: Port) -> Self {
        ArcData {
            src,
            dst,
            data_type: None,
            sample_time: 0,
            delay: 0,
            slack: 0,
        }
    }

    /// `true` for an order-constraint arc.
    pub fn is_order_constraint(&self) -> bool {
        self.data_type.is_none()
    }
}
