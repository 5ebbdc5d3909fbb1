//! Gather task injection.
//!
//! A kernel input pin reads exactly one buffer, so an input pin with several
//! incident edges gets a CPU gather task in front of it that merges the
//! incoming collections into one. After injection every kernel input pin has
//! at most one edge, which the rest of the compiler relies on.

use crate::graph::{CompiledTask, TaskId, TaskInput, TaskKind};

/// Default pin labels carried by injected gather tasks.
pub const GATHER_IN_PIN: &str = "In";
pub const GATHER_OUT_PIN: &str = "Out";

/// Insert gather tasks in front of every kernel input pin with more than one
/// edge. Two passes per kernel: the first mints one gather per crowded pin
/// and hands it the pin's edges, the second rewires the kernel so its first
/// edge on that pin points at the gather and the rest disappear.
pub fn inject_gather_tasks(tasks: &mut Vec<CompiledTask>) {
    let kernel_ids: Vec<TaskId> = tasks
        .iter()
        .filter(|t| t.is_kernel())
        .map(|t| t.id)
        .collect();

    for id in kernel_ids {
        // Pass 1: one gather per input pin that has more than one edge.
        let mut crowded: Vec<(String, TaskId)> = Vec::new();
        {
            let mut pin_order: Vec<&String> = Vec::new();
            for input in &tasks[id].inputs {
                if let Some(pin) = &input.downstream_pin {
                    if !pin_order.contains(&pin) {
                        pin_order.push(pin);
                    }
                }
            }
            let pin_order: Vec<String> = pin_order.into_iter().cloned().collect();

            for pin in pin_order {
                let edges: Vec<TaskInput> = tasks[id]
                    .inputs
                    .iter()
                    .filter(|input| input.downstream_pin.as_deref() == Some(pin.as_str()))
                    .cloned()
                    .collect();
                if edges.len() < 2 {
                    continue;
                }
                let gather_id = tasks.len();
                let stack_index = tasks[id].stack_index;
                let mut gather = CompiledTask::cpu(gather_id, stack_index);
                gather.kind = TaskKind::Gather;
                gather.inputs = edges
                    .into_iter()
                    .map(|edge| TaskInput {
                        upstream: edge.upstream,
                        upstream_pin: edge.upstream_pin,
                        downstream_pin: Some(GATHER_IN_PIN.to_string()),
                    })
                    .collect();
                tasks.push(gather);
                crowded.push((pin, gather_id));
            }
        }

        // Pass 2: rewire the kernel's edges onto the gathers.
        if crowded.is_empty() {
            continue;
        }
        let gather_for = |pin: &str| {
            crowded
                .iter()
                .find(|(p, _)| p == pin)
                .map(|(_, gather)| *gather)
        };
        let mut rewired: Vec<String> = Vec::new();
        let old_inputs = std::mem::take(&mut tasks[id].inputs);
        let mut new_inputs = Vec::with_capacity(old_inputs.len());
        for input in old_inputs {
            let Some(pin) = input.downstream_pin.clone() else {
                new_inputs.push(input);
                continue;
            };
            let Some(gather) = gather_for(&pin) else {
                new_inputs.push(input);
                continue;
            };
            if rewired.contains(&pin) {
                continue;
            }
            rewired.push(pin.clone());
            new_inputs.push(TaskInput::new(gather, GATHER_OUT_PIN, pin));
        }
        tasks[id].inputs = new_inputs;
    }
}
