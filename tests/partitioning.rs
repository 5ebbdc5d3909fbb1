use std::sync::Arc;

use node_forge_compute::codec::RecordType;
use node_forge_compute::compiler::compile;
use node_forge_compute::kernel::{
    BufferSizeMode, InputPin, KernelKind, KernelSettings, OutputPin, PinKind,
};
use node_forge_compute::{CompiledTask, DiagnosticSink, TaskInput, TaskKind};

fn processor(name: &str) -> Arc<KernelSettings> {
    Arc::new(KernelSettings {
        name: name.into(),
        kind: KernelKind::PointProcessor,
        dispatch: None,
        source: String::new(),
        input_pins: vec![InputPin {
            label: "In".into(),
            kind: PinKind::Collection,
        }],
        output_pins: vec![OutputPin {
            label: "Out".into(),
            kind: PinKind::Collection,
            record_type: RecordType::Points,
            size_mode: BufferSizeMode::FromFirstPin,
            created_attributes: vec![],
        }],
        thread_count_multiplier: 1,
    })
}

fn connect(tasks: &mut [CompiledTask], from: usize, to: usize) {
    tasks[to].inputs.push(TaskInput::new(from, "Out", "In"));
}

#[test]
fn kernel_chain_is_one_program_with_one_boundary_pin_each_way() {
    // cpu0 -> k1 -> k2 -> k3 -> cpu4
    let mut tasks = vec![
        CompiledTask::cpu(0, 0),
        CompiledTask::kernel(1, 0, processor("a")),
        CompiledTask::kernel(2, 0, processor("b")),
        CompiledTask::kernel(3, 0, processor("c")),
        CompiledTask::cpu(4, 0),
    ];
    for (from, to) in [(0, 1), (1, 2), (2, 3), (3, 4)] {
        connect(&mut tasks, from, to);
    }

    let mut sink = DiagnosticSink::new();
    let programs = compile(&mut tasks, &mut sink).expect("compile");

    assert_eq!(programs.len(), 1);
    assert_eq!(programs[0].kernels.len(), 3);
    assert_eq!(programs[0].virtual_inputs.len(), 1);
    assert_eq!(programs[0].virtual_outputs.len(), 1);
}

#[test]
fn cpu_tasks_split_the_graph_into_two_programs() {
    // cpu0 -> k1 -> k2 -> cpu3 -> k4 -> cpu5
    let mut tasks = vec![
        CompiledTask::cpu(0, 0),
        CompiledTask::kernel(1, 0, processor("a")),
        CompiledTask::kernel(2, 0, processor("b")),
        CompiledTask::cpu(3, 0),
        CompiledTask::kernel(4, 0, processor("c")),
        CompiledTask::cpu(5, 0),
    ];
    for window in [(0, 1), (1, 2), (2, 3), (3, 4), (4, 5)] {
        connect(&mut tasks, window.0, window.1);
    }

    let mut sink = DiagnosticSink::new();
    let programs = compile(&mut tasks, &mut sink).expect("compile");

    assert_eq!(programs.len(), 2);
    assert_eq!(programs[0].kernels.len(), 2);
    assert_eq!(programs[1].kernels.len(), 1);
    assert!(!sink.has_errors());

    // Every kernel task was replaced; the CPU chain survives around the
    // program tasks.
    assert!(tasks.iter().all(|t| t.kind != TaskKind::Kernel));
    assert_eq!(
        tasks.iter().filter(|t| t.kind == TaskKind::Program).count(),
        2
    );
    assert_eq!(tasks.len(), 5);
}

#[test]
fn fan_in_pin_gets_a_gather_feeding_the_program() {
    // Two producers on one kernel input pin.
    let mut tasks = vec![
        CompiledTask::cpu(0, 0),
        CompiledTask::cpu(1, 0),
        CompiledTask::kernel(2, 0, processor("merge")),
        CompiledTask::cpu(3, 0),
    ];
    connect(&mut tasks, 0, 2);
    connect(&mut tasks, 1, 2);
    connect(&mut tasks, 2, 3);

    let mut sink = DiagnosticSink::new();
    let programs = compile(&mut tasks, &mut sink).expect("compile");
    assert_eq!(programs.len(), 1);

    let gather = tasks
        .iter()
        .find(|t| t.kind == TaskKind::Gather)
        .expect("gather task");
    assert_eq!(gather.inputs.len(), 2);
    assert!(gather
        .inputs
        .iter()
        .all(|i| i.downstream_pin.as_deref() == Some("In")));

    // The program reads the merged collection through its one virtual input.
    let program_task = tasks
        .iter()
        .find(|t| t.kind == TaskKind::Program)
        .expect("program task");
    assert_eq!(program_task.inputs.len(), 1);
    assert_eq!(program_task.inputs[0].upstream, gather.id);
    assert_eq!(
        program_task.inputs[0].downstream_pin.as_deref(),
        Some("In-VirtualIn0")
    );
    assert_eq!(programs[0].virtual_inputs.len(), 1);
}

#[test]
fn island_output_label_is_shared_by_all_consumers() {
    let mut tasks = vec![
        CompiledTask::cpu(0, 0),
        CompiledTask::kernel(1, 0, processor("k")),
        CompiledTask::cpu(2, 0),
        CompiledTask::cpu(3, 0),
    ];
    connect(&mut tasks, 0, 1);
    connect(&mut tasks, 1, 2);
    connect(&mut tasks, 1, 3);

    let mut sink = DiagnosticSink::new();
    let programs = compile(&mut tasks, &mut sink).expect("compile");
    assert_eq!(programs.len(), 1);
    assert_eq!(programs[0].virtual_outputs.len(), 1);

    let program_id = tasks
        .iter()
        .find(|t| t.kind == TaskKind::Program)
        .expect("program task")
        .id;
    let consumers: Vec<&CompiledTask> = tasks
        .iter()
        .filter(|t| t.kind == TaskKind::Cpu && !t.inputs.is_empty())
        .collect();
    assert_eq!(consumers.len(), 2);
    for consumer in consumers {
        assert_eq!(consumer.inputs[0].upstream, program_id);
        assert_eq!(
            consumer.inputs[0].upstream_pin.as_deref(),
            Some("Out-VirtualOut0")
        );
    }
}

#[test]
fn kernels_in_different_stacks_compile_to_separate_programs() {
    let mut tasks = vec![
        CompiledTask::cpu(0, 0),
        CompiledTask::kernel(1, 0, processor("outer")),
        CompiledTask::kernel(2, 1, processor("inner")),
    ];
    connect(&mut tasks, 0, 1);
    connect(&mut tasks, 0, 2);

    let mut sink = DiagnosticSink::new();
    let programs = compile(&mut tasks, &mut sink).expect("compile");

    assert_eq!(programs.len(), 2);
    let stacks: Vec<usize> = programs.iter().map(|p| p.stack_index).collect();
    assert!(stacks.contains(&0));
    assert!(stacks.contains(&1));
}

#[test]
fn kernel_settings_deserialize_from_json_with_defaults() {
    // Authored settings omit everything that has a default: pin kinds,
    // record type, size mode, dispatch and the thread multiplier.
    let settings: KernelSettings = serde_json::from_str(
        r#"{
            "name": "Jitter",
            "kind": "PointProcessor",
            "source": "",
            "input_pins": [{ "label": "In" }],
            "output_pins": [{ "label": "Out" }]
        }"#,
    )
    .expect("deserialize");
    assert_eq!(settings.input_pins[0].kind, PinKind::Collection);
    assert_eq!(settings.output_pins[0].record_type, RecordType::Points);
    assert_eq!(settings.output_pins[0].size_mode, BufferSizeMode::FromFirstPin);
    assert_eq!(settings.thread_count_multiplier, 1);

    let mut tasks = vec![
        CompiledTask::cpu(0, 0),
        CompiledTask::kernel(1, 0, Arc::new(settings)),
        CompiledTask::cpu(2, 0),
    ];
    connect(&mut tasks, 0, 1);
    connect(&mut tasks, 1, 2);

    let mut sink = DiagnosticSink::new();
    let programs = compile(&mut tasks, &mut sink).expect("compile");
    assert_eq!(programs.len(), 1);
    assert!(!sink.has_errors());
}

#[test]
fn cyclic_cpu_graph_is_a_fatal_compile_error() {
    let mut tasks = vec![CompiledTask::cpu(0, 0), CompiledTask::cpu(1, 0)];
    connect(&mut tasks, 0, 1);
    connect(&mut tasks, 1, 0);

    let mut sink = DiagnosticSink::new();
    assert!(compile(&mut tasks, &mut sink).is_err());
}
