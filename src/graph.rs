//! Compiled task graph model.
//!
//! A compiled graph is a flat list of tasks whose ids are indices into that
//! list. Edges are stored on the consumer side as [`TaskInput`]s; successor
//! maps are derived on demand. The partitioner rewrites this list in place:
//! gather tasks are appended, accelerator tasks are replaced by a single
//! program task and then culled.

use std::collections::HashMap;
use std::sync::Arc;

use crate::compiler::program::ComputeProgram;
use crate::kernel::KernelSettings;

pub type TaskId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Regular CPU task. Opaque to this crate beyond its pins and edges.
    Cpu,
    /// Task whose settings describe an accelerator kernel.
    Kernel,
    /// CPU gather injected in front of a kernel input pin with multiple
    /// incident edges.
    Gather,
    /// Synthesized task that owns a [`ComputeProgram`] for one island.
    Program,
}

/// One inbound edge. Pins are `None` for pinless dependency-only edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInput {
    pub upstream: TaskId,
    pub upstream_pin: Option<String>,
    pub downstream_pin: Option<String>,
}

impl TaskInput {
    pub fn new(
        upstream: TaskId,
        upstream_pin: impl Into<String>,
        downstream_pin: impl Into<String>,
    ) -> Self {
        Self {
            upstream,
            upstream_pin: Some(upstream_pin.into()),
            downstream_pin: Some(downstream_pin.into()),
        }
    }

    pub fn dependency_only(upstream: TaskId) -> Self {
        Self {
            upstream,
            upstream_pin: None,
            downstream_pin: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledTask {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Index of the execution stack (loop/subgraph scope) the task runs in.
    pub stack_index: usize,
    pub inputs: Vec<TaskInput>,
    /// Present iff `kind == TaskKind::Kernel`.
    pub settings: Option<Arc<KernelSettings>>,
    /// Present iff `kind == TaskKind::Program`.
    pub program: Option<Arc<ComputeProgram>>,
}

impl CompiledTask {
    pub fn cpu(id: TaskId, stack_index: usize) -> Self {
        Self {
            id,
            kind: TaskKind::Cpu,
            stack_index,
            inputs: Vec::new(),
            settings: None,
            program: None,
        }
    }

    pub fn kernel(id: TaskId, stack_index: usize, settings: Arc<KernelSettings>) -> Self {
        Self {
            id,
            kind: TaskKind::Kernel,
            stack_index,
            inputs: Vec::new(),
            settings: Some(settings),
            program: None,
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<TaskInput>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn is_kernel(&self) -> bool {
        self.kind == TaskKind::Kernel
    }
}

/// Invert the consumer-side edges into an upstream -> downstream map.
pub fn task_successors(tasks: &[CompiledTask]) -> HashMap<TaskId, Vec<TaskId>> {
    let mut successors: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
    for task in tasks {
        for input in &task.inputs {
            let downstream = successors.entry(input.upstream).or_default();
            if !downstream.contains(&task.id) {
                downstream.push(task.id);
            }
        }
    }
    successors
}

/// Remove every task for which `cull` returns true and remap the ids of the
/// survivors (and of their inputs) so ids stay dense indices. Edges whose
/// upstream was culled are dropped; callers are expected to have rewired any
/// edge they still need before culling.
pub fn cull_tasks(tasks: &mut Vec<CompiledTask>, cull: impl Fn(&CompiledTask) -> bool) {
    let mut remap: Vec<Option<TaskId>> = vec![None; tasks.len()];
    let mut next = 0;
    for task in tasks.iter() {
        if !cull(task) {
            remap[task.id] = Some(next);
            next += 1;
        }
    }

    tasks.retain(|task| remap[task.id].is_some());
    for task in tasks.iter_mut() {
        task.id = remap[task.id].unwrap_or(task.id);
        task.inputs.retain(|input| remap[input.upstream].is_some());
        for input in &mut task.inputs {
            if let Some(new_id) = remap[input.upstream] {
                input.upstream = new_id;
            }
        }
    }
}
