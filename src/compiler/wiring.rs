//! Boundary wiring between an island and the surrounding CPU graph.
//!
//! The island's member tasks are replaced by one synthesized program task.
//! Every edge crossing the boundary is renamed onto a virtual pin of that
//! task: inbound edges get `<pin>-VirtualIn<N>` labels, outbound edges get
//! `<pin>-VirtualOut<N>` labels, reused when several consumers read the same
//! member output pin. Wiring is planned as a pure computation first and only
//! applied once the program built successfully, so a discarded island leaves
//! the task graph untouched.

use std::collections::HashMap;
use std::sync::Arc;

use crate::compiler::program::ComputeProgram;
use crate::graph::{CompiledTask, TaskId, TaskInput, TaskKind};

/// One inbound boundary edge, in virtual pin order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedInput {
    pub virtual_pin: String,
    /// Member task and pin the edge used to feed.
    pub member: TaskId,
    pub member_pin: String,
    /// CPU producer behind the boundary.
    pub producer: TaskId,
    pub producer_pin: Option<String>,
}

/// One outbound boundary pin, in virtual pin order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOutput {
    pub virtual_pin: String,
    pub member: TaskId,
    pub member_pin: String,
}

#[derive(Debug, Default)]
pub struct WiringPlan {
    pub stack_index: usize,
    /// (task, pin, is_input) -> virtual pin label.
    pub pins: HashMap<(TaskId, String, bool), String>,
    pub inputs: Vec<PlannedInput>,
    pub outputs: Vec<PlannedOutput>,
    /// Edges the program task will carry.
    program_inputs: Vec<TaskInput>,
    /// (consumer task, input index, virtual output pin) rewires.
    rewires: Vec<(TaskId, usize, Option<String>)>,
}

impl WiringPlan {
    pub fn virtual_input_of(&self, member: TaskId, pin: &str) -> Option<&str> {
        self.pins
            .get(&(member, pin.to_string(), true))
            .map(String::as_str)
    }

    pub fn virtual_output_of(&self, member: TaskId, pin: &str) -> Option<&str> {
        self.pins
            .get(&(member, pin.to_string(), false))
            .map(String::as_str)
    }
}

/// Compute the boundary wiring for one island subset without touching the
/// task list.
pub fn plan_wiring(tasks: &[CompiledTask], subset: &[TaskId]) -> WiringPlan {
    let members: Vec<bool> = {
        let mut members = vec![false; tasks.len()];
        for &id in subset {
            members[id] = true;
        }
        members
    };

    let mut plan = WiringPlan {
        stack_index: subset.first().map(|&id| tasks[id].stack_index).unwrap_or(0),
        ..WiringPlan::default()
    };

    // Inbound edges, in member order.
    for &member in subset {
        for input in &tasks[member].inputs {
            if members[input.upstream] {
                continue;
            }
            let Some(pin) = input.downstream_pin.clone() else {
                // Dependency-only edge: the program task inherits it.
                let edge = TaskInput::dependency_only(input.upstream);
                if !plan.program_inputs.contains(&edge) {
                    plan.program_inputs.push(edge);
                }
                continue;
            };
            let key = (member, pin.clone(), true);
            if plan.pins.contains_key(&key) {
                // Gathers guarantee one edge per pin; a second edge here
                // would be a compiler inconsistency and is ignored.
                continue;
            }
            let virtual_pin = format!("{pin}-VirtualIn{}", plan.inputs.len());
            plan.pins.insert(key, virtual_pin.clone());
            plan.inputs.push(PlannedInput {
                virtual_pin: virtual_pin.clone(),
                member,
                member_pin: pin,
                producer: input.upstream,
                producer_pin: input.upstream_pin.clone(),
            });
            plan.program_inputs.push(TaskInput {
                upstream: input.upstream,
                upstream_pin: input.upstream_pin.clone(),
                downstream_pin: Some(virtual_pin),
            });
        }
    }

    // Outbound edges: every non-member consumer of a member pin is rewired
    // onto the program task; the virtual output label is minted once per
    // member pin and reused.
    for task in tasks {
        if members[task.id] {
            continue;
        }
        for (index, input) in task.inputs.iter().enumerate() {
            if !members[input.upstream] {
                continue;
            }
            let Some(pin) = input.upstream_pin.clone() else {
                plan.rewires.push((task.id, index, None));
                continue;
            };
            let key = (input.upstream, pin.clone(), false);
            let virtual_pin = match plan.pins.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let label = format!("{pin}-VirtualOut{}", plan.outputs.len());
                    plan.pins.insert(key, label.clone());
                    plan.outputs.push(PlannedOutput {
                        virtual_pin: label.clone(),
                        member: input.upstream,
                        member_pin: pin,
                    });
                    label
                }
            };
            plan.rewires.push((task.id, index, Some(virtual_pin)));
        }
    }

    plan
}

/// Materialize the plan: append the program task, point every planned
/// consumer edge at it. Member tasks are left in place; the caller culls
/// them once all islands are processed.
pub fn apply_wiring(
    tasks: &mut Vec<CompiledTask>,
    plan: &WiringPlan,
    program: Arc<ComputeProgram>,
) -> TaskId {
    let program_task = tasks.len();
    tasks.push(CompiledTask {
        id: program_task,
        kind: TaskKind::Program,
        stack_index: plan.stack_index,
        inputs: plan.program_inputs.clone(),
        settings: None,
        program: Some(program),
    });

    for (consumer, input_index, virtual_pin) in &plan.rewires {
        let input = &mut tasks[*consumer].inputs[*input_index];
        input.upstream = program_task;
        input.upstream_pin = virtual_pin.clone();
    }

    program_task
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{InputPin, KernelKind, KernelSettings, PinKind};

    fn kernel_settings() -> Arc<KernelSettings> {
        Arc::new(KernelSettings {
            name: "K".into(),
            kind: KernelKind::PointProcessor,
            dispatch: None,
            source: String::new(),
            input_pins: vec![InputPin {
                label: "In".into(),
                kind: PinKind::Collection,
            }],
            output_pins: vec![],
            thread_count_multiplier: 1,
        })
    }

    /// cpu0 -> k1 -> k2 -> cpu3, with cpu4 also reading k2's output.
    fn fixture() -> (Vec<CompiledTask>, Vec<TaskId>) {
        let mut tasks = vec![
            CompiledTask::cpu(0, 0),
            CompiledTask::kernel(1, 0, kernel_settings()),
            CompiledTask::kernel(2, 0, kernel_settings()),
            CompiledTask::cpu(3, 0),
            CompiledTask::cpu(4, 0),
        ];
        tasks[1].inputs = vec![TaskInput::new(0, "Out", "In")];
        tasks[2].inputs = vec![TaskInput::new(1, "Out", "In")];
        tasks[3].inputs = vec![TaskInput::new(2, "Out", "In")];
        tasks[4].inputs = vec![TaskInput::new(2, "Out", "In")];
        (tasks, vec![1, 2])
    }

    #[test]
    fn boundary_edges_get_virtual_pins() {
        let (tasks, subset) = fixture();
        let plan = plan_wiring(&tasks, &subset);

        assert_eq!(plan.inputs.len(), 1);
        assert_eq!(plan.inputs[0].virtual_pin, "In-VirtualIn0");
        assert_eq!(plan.inputs[0].producer, 0);

        // Two consumers of the same member pin share one virtual output.
        assert_eq!(plan.outputs.len(), 1);
        assert_eq!(plan.outputs[0].virtual_pin, "Out-VirtualOut0");
        assert_eq!(plan.outputs[0].member, 2);
        assert_eq!(plan.rewires.len(), 2);
    }

    #[test]
    fn apply_rewires_consumers_onto_the_program_task() {
        let (mut tasks, subset) = fixture();
        let plan = plan_wiring(&tasks, &subset);
        let program = Arc::new(ComputeProgram::empty_for_tests("p0"));
        let program_task = apply_wiring(&mut tasks, &plan, program);

        assert_eq!(program_task, 5);
        assert_eq!(tasks[program_task].kind, TaskKind::Program);
        assert_eq!(tasks[program_task].inputs.len(), 1);
        assert_eq!(
            tasks[program_task].inputs[0].downstream_pin.as_deref(),
            Some("In-VirtualIn0")
        );

        for consumer in [3, 4] {
            assert_eq!(tasks[consumer].inputs[0].upstream, program_task);
            assert_eq!(
                tasks[consumer].inputs[0].upstream_pin.as_deref(),
                Some("Out-VirtualOut0")
            );
        }
    }

    #[test]
    fn inner_island_edges_are_not_boundary_edges() {
        let (tasks, subset) = fixture();
        let plan = plan_wiring(&tasks, &subset);
        assert!(plan.virtual_input_of(2, "In").is_none());
        assert_eq!(plan.virtual_input_of(1, "In"), Some("In-VirtualIn0"));
    }
}
