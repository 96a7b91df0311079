//! IR compiler for hierarchical, multi-rate dataflow graphs.
//!
//! Five passes run in sequence over a graph handed to us by an (external)
//! importer: context discovery (`context_analysis`), encapsulation and
//! cross-context rewiring (`encapsulation`), state-update synthesis and
//! pruning (`state_update`), and scheduling with thread-crossing FIFO
//! insertion (`scheduler`, `fifo`). The graph itself -- nodes, ports, arcs,
//! and the mutation primitives every pass builds on -- lives in `ir`.

#![deny(trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub use dataflow_entity as entity;

pub mod context_analysis;
pub mod driver;
pub mod encapsulation;
pub mod fifo;
pub mod ir;
pub mod result;
pub mod scheduler;
pub mod settings;
pub mod state_update;
pub mod timing;

pub use crate::result::{CoreError, CoreResult, CoreWarning};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
