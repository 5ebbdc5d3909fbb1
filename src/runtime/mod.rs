//! Runtime: backends, run preparation, and the execution state machine.

pub mod backend;
pub mod execute;
pub mod provider;

pub use backend::{ComputeBackend, DispatchRequest, ReadbackMessage, SimulatorBackend};
pub use execute::{ExecutionContext, RunStatus};
pub use provider::{ComponentBounds, PreparedRun};
