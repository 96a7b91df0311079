//! Compile-time flags threaded through the passes: the scheduler's ordering
//! heuristic and random seed, strict-vs-warn partition backfill, and
//! whether visualization arcs survive pruning.

/// Which order the scheduler's worklist is drained in.
/// Heuristic choice is an optimization knob only: correctness does not
/// depend on it, every choice either produces a valid topological order or
/// reports a cycle.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ScheduleHeuristic {
    /// First element of the worklist (breadth-first-like).
    Bfs,
    /// Last element of the worklist (depth-first-like).
    Dfs,
    /// Uniformly random choice, using the configured seed.
    Random,
}

/// Flags controlling the behavior of the whole compilation pipeline.
#[derive(Clone, Debug)]
pub struct CompileFlags {
    /// When `true`, a subsystem left with no concrete partition or
    /// sub-blocking assignment after backfill is an error rather than a
    /// warning.
    pub strict_partitions: bool,
    /// When `true` (the default), arcs feeding the visualization master
    /// survive pruning even though they have no path to a "real" output.
    /// No default is externally mandated, so we default to retaining them
    /// so pruning never silently drops a GraphML-visible visualization tap.
    pub retain_visualization_arcs: bool,
    /// Whether pruning considers an arc to the visualization master when
    /// computing a node's out-degree.
    pub prune_counts_visualization_arcs: bool,
    /// The scheduler's worklist-draining heuristic.
    pub heuristic: ScheduleHeuristic,
    /// Seed for the `ScheduleHeuristic::Random` PRNG.
    pub seed: u64,
}

impl Default for CompileFlags {
    fn default() -> Self {
        CompileFlags {
            strict_partitions: false,
            retain_visualization_arcs: true,
            prune_counts_visualization_arcs: false,
            heuristic: ScheduleHeuristic::Bfs,
            seed: 0,
        }
    }
}
