//! Graph partitioner: turns kernel tasks into compute program tasks.
//!
//! Pipeline: gather injection, island labeling, subset collection, per-island
//! validation, wiring and program assembly, then a final cull of the kernel
//! tasks each program replaced. Invalid islands are reported and skipped;
//! their tasks stay in the graph untouched so the owner can surface the
//! failure next to the responsible nodes.

pub mod gather;
pub mod islands;
pub mod program;
pub mod wiring;

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::diag::DiagnosticSink;
use crate::graph::{cull_tasks, CompiledTask, TaskId, TaskKind};
use crate::kernel::validate_kernel;

pub use gather::inject_gather_tasks;
pub use islands::{collect_gpu_subsets, label_islands};
pub use program::ComputeProgram;
pub use wiring::{apply_wiring, plan_wiring};

/// Partition the compiled task list. On return, every schedulable island has
/// been replaced by a program task carrying its [`ComputeProgram`]; gather
/// tasks injected along the way remain as CPU tasks. The returned programs
/// are the same ones attached to the program tasks, in creation order.
pub fn compile(
    tasks: &mut Vec<CompiledTask>,
    sink: &mut DiagnosticSink,
) -> Result<Vec<Arc<ComputeProgram>>> {
    inject_gather_tasks(tasks);
    let labels = label_islands(tasks);
    let subsets = collect_gpu_subsets(tasks, &labels)?;

    let mut programs: Vec<Arc<ComputeProgram>> = Vec::new();
    let mut replaced: Vec<TaskId> = Vec::new();

    for (index, subset) in subsets.iter().enumerate() {
        let mut subset_valid = true;
        for &member in subset {
            let Some(settings) = tasks[member].settings.clone() else {
                subset_valid = false;
                continue;
            };
            if !validate_kernel(&settings, sink) {
                subset_valid = false;
            }
        }
        if !subset_valid {
            warn!(
                target: "compute",
                island = labels[subset[0]],
                "island contains invalid kernels and is not scheduled"
            );
            continue;
        }

        let name = format!("program{index}");
        let plan = plan_wiring(tasks, subset);
        let Some(program) = program::build_program(tasks, subset, &plan, &name, sink) else {
            continue;
        };
        apply_wiring(tasks, &plan, program.clone());
        replaced.extend(subset.iter().copied());
        programs.push(program);
    }

    if !replaced.is_empty() {
        cull_tasks(tasks, |task| replaced.contains(&task.id));
    }

    debug!(
        target: "compute",
        programs = programs.len(),
        tasks = tasks.len(),
        "graph partitioning finished"
    );

    // Kernel tasks that survive here belong to discarded islands; they are
    // inert (no program will dispatch them) but keep their diagnostics
    // anchored to real tasks.
    debug_assert!(tasks
        .iter()
        .all(|t| t.kind != TaskKind::Program || t.program.is_some()));

    Ok(programs)
}
