//! Graph partitioning compiler and data transcoding runtime for accelerator
//! dataflow graphs.
//!
//! The crate takes a compiled task graph, carves the kernel tasks into
//! islands, and replaces each island with a single program task carrying a
//! [`compiler::ComputeProgram`]: cooked WGSL kernels, data interfaces, and
//! the attribute table shared by the packed buffers. The runtime side packs
//! CPU data collections into the wire format kernels read, drives a
//! [`runtime::ComputeBackend`] through the staged execution state machine,
//! and unpacks readbacks into collections keyed by virtual output pin.

pub mod codec;
pub mod compiler;
pub mod data;
pub mod diag;
pub mod graph;
pub mod kernel;
pub mod runtime;

pub use compiler::{compile, ComputeProgram};
pub use data::{DataCollection, DataItem, NamedAttribute, Point};
pub use diag::{Diagnostic, DiagnosticSink, Severity};
pub use graph::{CompiledTask, TaskId, TaskInput, TaskKind};
pub use kernel::KernelSettings;
pub use runtime::{ComputeBackend, ExecutionContext, RunStatus, SimulatorBackend};
