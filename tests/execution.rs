use std::collections::HashMap;
use std::sync::Arc;
use std::task::Poll;

use node_forge_compute::codec::{AttributeType, AttributeValue, RecordType};
use node_forge_compute::compiler::{compile, ComputeProgram};
use node_forge_compute::kernel::{
    BufferSizeMode, InputPin, KernelKind, KernelSettings, OutputPin, PinKind,
};
use node_forge_compute::{
    CompiledTask, DataCollection, DataItem, Diagnostic, DiagnosticSink, ExecutionContext,
    NamedAttribute, Point, RunStatus, Severity, SimulatorBackend, TaskInput,
};

fn processor(source: &str) -> Arc<KernelSettings> {
    Arc::new(KernelSettings {
        name: "Scale".into(),
        kind: KernelKind::PointProcessor,
        dispatch: None,
        source: source.into(),
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

/// cpu -> kernel -> cpu, compiled down to its one program.
fn processor_program(source: &str) -> Arc<ComputeProgram> {
    let mut tasks = vec![
        CompiledTask::cpu(0, 0),
        CompiledTask::kernel(1, 0, processor(source)),
        CompiledTask::cpu(2, 0),
    ];
    tasks[1].inputs = vec![TaskInput::new(0, "Out", "In")];
    tasks[2].inputs = vec![TaskInput::new(1, "Out", "In")];

    let mut sink = DiagnosticSink::new();
    let programs = compile(&mut tasks, &mut sink).expect("compile");
    assert_eq!(programs.len(), 1, "diagnostics: {:?}", sink.messages());
    programs[0].clone()
}

fn weighted_input() -> DataCollection {
    DataCollection::new(vec![DataItem::Points {
        points: vec![Point::at([1.0, 2.0, 3.0]), Point::at([-4.0, 0.5, 9.0])],
        attributes: vec![NamedAttribute::new(
            AttributeType::Float,
            "Weight",
            vec![AttributeValue::Float(0.25), AttributeValue::Float(-3.5)],
        )],
    }])
}

const PASSTHROUGH: &str = "\
    let Thread = In_GetThreadData(ThreadIndex);
    if (!Thread.valid) { return; }
    Out_SetFloat(Thread.data_index, Thread.elem_index, 'Weight',
        In_GetFloat(Thread.data_index, Thread.elem_index, 'Weight'));
";

fn inputs_for(program: &ComputeProgram, collection: DataCollection) -> HashMap<String, DataCollection> {
    let label = program.virtual_inputs[0].label.clone();
    HashMap::from([(label, collection)])
}

#[test]
fn processor_run_round_trips_points_and_attributes() {
    let program = processor_program(PASSTHROUGH);
    let input = weighted_input();
    let mut context = ExecutionContext::new(program.clone(), inputs_for(&program, input.clone()));
    let mut backend = SimulatorBackend::new();

    assert_eq!(context.poll(&mut backend), Poll::Ready(RunStatus::Succeeded));
    assert_eq!(backend.dispatch_count(), 1);

    let output = context
        .outputs()
        .get(&program.virtual_outputs[0].label)
        .expect("output collection");
    assert_eq!(output, &input);
}

#[test]
fn generator_run_produces_default_points() {
    let settings = Arc::new(KernelSettings {
        name: "Spawn".into(),
        kind: KernelKind::PointGenerator { point_count: 3 },
        dispatch: None,
        source: String::new(),
        input_pins: vec![],
        output_pins: vec![OutputPin {
            label: "Out".into(),
            kind: PinKind::Collection,
            record_type: RecordType::Points,
            size_mode: BufferSizeMode::FixedElementCount(3),
            created_attributes: vec![],
        }],
        thread_count_multiplier: 1,
    });
    let mut tasks = vec![
        CompiledTask::kernel(0, 0, settings),
        CompiledTask::cpu(1, 0),
    ];
    tasks[1].inputs = vec![TaskInput::new(0, "Out", "In")];

    let mut sink = DiagnosticSink::new();
    let programs = compile(&mut tasks, &mut sink).expect("compile");
    assert_eq!(programs.len(), 1);
    let program = programs[0].clone();

    let mut context = ExecutionContext::new(program.clone(), HashMap::new());
    let mut backend = SimulatorBackend::new();
    assert_eq!(context.poll(&mut backend), Poll::Ready(RunStatus::Succeeded));

    let output = context
        .outputs()
        .get(&program.virtual_outputs[0].label)
        .expect("output collection");
    assert_eq!(
        output,
        &DataCollection::new(vec![DataItem::points(vec![Point::default(); 3])])
    );
}

#[test]
fn run_stays_pending_while_compilation_is_outstanding() {
    let program = processor_program(PASSTHROUGH);
    let inputs = inputs_for(&program, weighted_input());
    let mut context = ExecutionContext::new(program, inputs);
    let mut backend = SimulatorBackend::new();
    backend.never_ready = true;

    for _ in 0..4 {
        assert_eq!(context.poll(&mut backend), Poll::Pending);
    }
    assert_eq!(backend.dispatch_count(), 0);

    backend.never_ready = false;
    assert_eq!(context.poll(&mut backend), Poll::Ready(RunStatus::Succeeded));
}

#[test]
fn deferred_readbacks_park_the_run_until_delivery() {
    let program = processor_program(PASSTHROUGH);
    let inputs = inputs_for(&program, weighted_input());
    let mut context = ExecutionContext::new(program.clone(), inputs);
    let mut backend = SimulatorBackend::new();
    backend.defer_readbacks = true;

    assert_eq!(context.poll(&mut backend), Poll::Pending);
    assert_eq!(backend.dispatch_count(), 1);
    assert!(context.outputs().is_empty());

    backend.flush_readbacks();
    assert_eq!(context.poll(&mut backend), Poll::Ready(RunStatus::Succeeded));
    assert!(context
        .outputs()
        .contains_key(&program.virtual_outputs[0].label));
}

#[test]
fn dispatch_failure_fails_the_run_with_a_diagnostic() {
    let program = processor_program(PASSTHROUGH);
    let inputs = inputs_for(&program, weighted_input());
    let mut context = ExecutionContext::new(program, inputs);
    let mut backend = SimulatorBackend::new();
    backend.fail_dispatch = true;

    assert_eq!(context.poll(&mut backend), Poll::Ready(RunStatus::Failed));
    assert!(context.diagnostics().has_errors());
    assert!(context.outputs().is_empty());

    // A failed run stays failed.
    backend.fail_dispatch = false;
    assert_eq!(context.poll(&mut backend), Poll::Ready(RunStatus::Failed));
}

#[test]
fn compiler_failure_message_aborts_the_run() {
    let program = processor_program(PASSTHROUGH);
    let inputs = inputs_for(&program, weighted_input());
    let mut context = ExecutionContext::new(program, inputs);
    let mut backend = SimulatorBackend::new();
    backend.compile_messages = vec![Diagnostic::new(
        Severity::Info,
        "internal error: compilation failed for entry point",
    )];

    assert_eq!(context.poll(&mut backend), Poll::Ready(RunStatus::Failed));
    assert!(context.diagnostics().has_errors());
    assert_eq!(backend.dispatch_count(), 0);
}

fn plain_input() -> DataCollection {
    DataCollection::new(vec![DataItem::points(vec![Point::default(); 2])])
}

#[test]
fn kernel_failing_runtime_validation_is_skipped_not_the_run() {
    // cpu -> weight reader -> passthrough -> cpu, fed points without the
    // 'Weight' column the first kernel needs.
    let mut tasks = vec![
        CompiledTask::cpu(0, 0),
        CompiledTask::kernel(1, 0, processor(PASSTHROUGH)),
        CompiledTask::kernel(2, 0, processor("")),
        CompiledTask::cpu(3, 0),
    ];
    tasks[1].inputs = vec![TaskInput::new(0, "Out", "In")];
    tasks[2].inputs = vec![TaskInput::new(1, "Out", "In")];
    tasks[3].inputs = vec![TaskInput::new(2, "Out", "In")];

    let mut sink = DiagnosticSink::new();
    let programs = compile(&mut tasks, &mut sink).expect("compile");
    assert_eq!(programs.len(), 1);
    let program = programs[0].clone();
    assert_eq!(program.kernels.len(), 2);

    let mut context = ExecutionContext::new(program.clone(), inputs_for(&program, plain_input()));
    let mut backend = SimulatorBackend::new();

    assert_eq!(context.poll(&mut backend), Poll::Ready(RunStatus::Succeeded));
    assert_eq!(backend.dispatch_count(), 1);
    assert!(context.diagnostics().has_errors());

    // The surviving kernel saw an empty collection from its skipped
    // producer and still wrote its own output shape.
    let output = context
        .outputs()
        .get(&program.virtual_outputs[0].label)
        .expect("output collection");
    let DataItem::Points { points, .. } = &output.items[0] else {
        panic!("expected points");
    };
    assert_eq!(points.len(), 2);
}

#[test]
fn run_fails_when_no_kernel_passes_runtime_validation() {
    let program = processor_program(PASSTHROUGH);
    let mut context = ExecutionContext::new(program.clone(), inputs_for(&program, plain_input()));
    let mut backend = SimulatorBackend::new();

    assert_eq!(context.poll(&mut backend), Poll::Ready(RunStatus::Failed));
    assert!(context.diagnostics().has_errors());
    assert_eq!(backend.dispatch_count(), 0);
}

#[test]
fn missing_input_runs_to_an_empty_output() {
    let program = processor_program(PASSTHROUGH);
    // No collection bound to the virtual input pin.
    let mut context = ExecutionContext::new(program.clone(), HashMap::new());
    let mut backend = SimulatorBackend::new();

    assert_eq!(context.poll(&mut backend), Poll::Ready(RunStatus::Succeeded));
    let output = context
        .outputs()
        .get(&program.virtual_outputs[0].label)
        .expect("output collection");
    assert!(output.is_empty());
}
