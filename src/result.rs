//! Typed errors and warnings raised by the core.
//!
//! Every error carries the offending entity (when available) and a
//! human-readable, fully-qualified context string. No pass attempts local
//! recovery -- passes are all-or-nothing, so a `CoreError` always aborts
//! the current compile. This mirrors the split Cranelift keeps between a
//! typed `CodegenError` and a `pretty_error` formatter.

use failure_derive::Fail;

use crate::ir::AnyEntity;

/// A fatal error raised by one of the core passes.
#[derive(Fail, Debug)]
pub enum CoreError {
    /// Unsupported dialect tag, missing required property, or unparseable
    /// numeric/type string. Raised during property import helpers.
    #[fail(display = "malformed input at {}: {}", location, context)]
    MalformedInput {
        /// Where the bad input was encountered.
        location: AnyEntity,
        /// Human-readable description.
        context: String,
    },

    /// Port missing a required driver, driver-count mismatch, enable/select
    /// port type mismatch, or output-port type/sample-time mismatch.
    /// Raised by per-node validation.
    #[fail(display = "structural violation at {}: {}", location, context)]
    StructuralViolation {
        /// The offending port or node.
        location: AnyEntity,
        /// Human-readable description.
        context: String,
    },

    /// Unspecialized clock domain, context-root self-dependency, cast
    /// failure, or missing family container.
    #[fail(display = "context invariant violation at {}: {}", location, context)]
    ContextInvariantViolation {
        /// The offending node.
        location: AnyEntity,
        /// Human-readable description.
        context: String,
    },

    /// A topological sort terminated with nodes still awaiting scheduling:
    /// a dependency cycle.
    #[fail(display = "scheduling cycle detected among {} node(s)", residual_count)]
    SchedulingFailure {
        /// Number of nodes that never reached zero in-degree; mirrors
        /// `residual.len()` and exists so the `Fail` display string can
        /// reference it without calling a method in the attribute.
        residual_count: usize,
        /// Each surviving node, its residual in-degree, and the source
        /// ports of each remaining incoming edge.
        residual: Vec<CycleResidual>,
    },

    /// Initial-condition count not a multiple of block size (or exceeding
    /// capacity), mismatched block counts across ports, or a sub-block size
    /// that does not divide the block size.
    #[fail(display = "FIFO invariant violation at {}: {}", location, context)]
    FifoInvariantViolation {
        /// The offending FIFO (or FIFO port).
        location: AnyEntity,
        /// Human-readable description.
        context: String,
    },
}

/// One node surviving a failed topological sort, with its residual
/// in-edges, used to build the scheduling-cycle diagnostic.
#[derive(Debug, Clone)]
pub struct CycleResidual {
    /// The node that never reached zero in-degree.
    pub node: crate::ir::Node,
    /// Remaining in-degree at the point the sort gave up.
    pub in_degree: usize,
    /// Source ports of each remaining incoming arc.
    pub residual_sources: Vec<crate::ir::Port>,
}

/// A non-fatal condition worth surfacing to the caller: backfilled
/// partition numbers on subsystems, floating-point select-port drivers,
/// and pruned output ports.
#[derive(Debug, Clone)]
pub enum CoreWarning {
    /// A subsystem's partition or sub-blocking length was inferred from a
    /// descendant rather than explicitly assigned.
    BackfilledPartition {
        /// The subsystem that was backfilled.
        node: crate::ir::Node,
    },
    /// A select port is driven by a floating-point value.
    FloatingPointSelect {
        /// The mux whose select port is floating-point.
        node: crate::ir::Node,
    },
    /// An output port had no remaining consumer and was pruned.
    PrunedOutputPort {
        /// The port that was pruned.
        port: crate::ir::Port,
    },
    /// An adjacent delay's initial conditions did not entirely fit in a
    /// FIFO's free capacity; only the prefix that fit was absorbed.
    PartialDelayAbsorption {
        /// The FIFO the delay was adjacent to.
        fifo: crate::ir::Node,
        /// Number of initial-condition elements left unabsorbed.
        residual: u32,
    },
}

impl CoreError {
    /// Build a [`CoreError::SchedulingFailure`] from its residual list,
    /// filling in the redundant `residual_count` used by the `Fail` display
    /// string.
    pub fn scheduling_failure(residual: Vec<CycleResidual>) -> CoreError {
        CoreError::SchedulingFailure {
            residual_count: residual.len(),
            residual,
        }
    }
}

/// The result type returned by every core pass.
pub type CoreResult<T> = Result<T, CoreError>;

/// Pretty-print a [`CoreError`] the way a human debugging a failed compile
/// would want to read it, mirroring Cranelift's `print_errors::pretty_error`.
pub fn pretty_error(err: &CoreError) -> String {
    match err {
        CoreError::SchedulingFailure { residual } => {
            let mut s = format!(
                "scheduling cycle detected ({} node(s) unordered):\n",
                residual.len()
            );
            for r in residual {
                s.push_str(&format!(
                    "  {} (in-degree {}), remaining sources: {:?}\n",
                    r.node, r.in_degree, r.residual_sources
                ));
            }
            s
        }
        other => other.to_string(),
    }
}
