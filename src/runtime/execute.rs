//! Execution state machine for one run of a compute program.
//!
//! A run is polled forward through fixed stages; every stage before
//! finalization may park the run and be retried on the next tick. Readback
//! completions arrive as channel messages, possibly from device threads; the
//! pending set lives behind a mutex shared with the abort path so a late
//! completion after an abort is a no-op.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::task::Poll;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

use crate::codec::unpack::unpack_collection;
use crate::compiler::program::ComputeProgram;
use crate::data::DataCollection;
use crate::diag::DiagnosticSink;
use crate::runtime::backend::{ComputeBackend, DispatchRequest, ReadbackMessage};
use crate::runtime::provider::{prepare_run, ComponentBounds, PreparedRun};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    EnsureCompiled,
    ValidateCompilation,
    BindInputs,
    Dispatch,
    AwaitAsync,
    Finalize,
    Done(RunStatus),
}

pub struct ExecutionContext {
    program: Arc<ComputeProgram>,
    inputs: HashMap<String, DataCollection>,
    seed: u32,
    bounds: ComponentBounds,
    stage: Stage,
    prepared: Option<PreparedRun>,
    /// Readback interfaces still in flight; shared with the abort path.
    pending: Arc<Mutex<HashSet<usize>>>,
    sender: Sender<ReadbackMessage>,
    receiver: Receiver<ReadbackMessage>,
    completed: HashMap<usize, Vec<u32>>,
    outputs: HashMap<String, DataCollection>,
    diagnostics: DiagnosticSink,
}

impl ExecutionContext {
    /// `inputs` is keyed by the program's virtual input pin labels.
    pub fn new(program: Arc<ComputeProgram>, inputs: HashMap<String, DataCollection>) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            program,
            inputs,
            seed: 0,
            bounds: ComponentBounds::default(),
            stage: Stage::EnsureCompiled,
            prepared: None,
            pending: Arc::new(Mutex::new(HashSet::new())),
            sender,
            receiver,
            completed: HashMap::new(),
            outputs: HashMap::new(),
            diagnostics: DiagnosticSink::new(),
        }
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_bounds(mut self, bounds: ComponentBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Outputs keyed by virtual output pin, available after a successful run.
    pub fn outputs(&self) -> &HashMap<String, DataCollection> {
        &self.outputs
    }

    pub fn diagnostics(&self) -> &DiagnosticSink {
        &self.diagnostics
    }

    /// Cancel the run. Pending readbacks are forgotten; messages that arrive
    /// afterwards are dropped unprocessed.
    pub fn abort(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        while self.receiver.try_recv().is_ok() {}
        self.prepared = None;
        self.completed.clear();
        self.stage = Stage::Done(RunStatus::Failed);
    }

    fn fail(&mut self, text: String) -> Poll<RunStatus> {
        self.diagnostics.error(text);
        self.abort();
        Poll::Ready(RunStatus::Failed)
    }

    /// Advance the run as far as possible this tick.
    pub fn poll(&mut self, backend: &mut dyn ComputeBackend) -> Poll<RunStatus> {
        loop {
            match self.stage {
                Stage::EnsureCompiled => {
                    if !backend.compilation_ready(&self.program) {
                        return Poll::Pending;
                    }
                    self.stage = Stage::ValidateCompilation;
                }
                Stage::ValidateCompilation => {
                    let messages = backend.take_compile_messages(&self.program);
                    let mut fatal = false;
                    for message in messages {
                        fatal |= message.aborts_run();
                        self.diagnostics.push(message);
                    }
                    if fatal {
                        return self.fail(format!(
                            "kernel compilation failed for program '{}'",
                            self.program.name
                        ));
                    }
                    self.stage = Stage::BindInputs;
                }
                Stage::BindInputs => {
                    let prepared = prepare_run(
                        &self.program,
                        &self.inputs,
                        self.seed,
                        self.bounds,
                        &mut self.diagnostics,
                    );
                    let Some(prepared) = prepared else {
                        self.abort();
                        return Poll::Ready(RunStatus::Failed);
                    };
                    {
                        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
                        *pending = prepared.readbacks.iter().map(|r| r.interface).collect();
                    }
                    self.prepared = Some(prepared);
                    self.stage = Stage::Dispatch;
                }
                Stage::Dispatch => {
                    let Some(prepared) = self.prepared.take() else {
                        return self.fail("dispatch reached with nothing prepared".into());
                    };
                    for (interface, words) in &prepared.uploads {
                        backend.upload(*interface, words.clone());
                    }
                    for dispatch in &prepared.dispatches {
                        let request = DispatchRequest {
                            program: &self.program,
                            kernel_index: dispatch.kernel_index,
                            thread_count: dispatch.thread_count,
                            meta_words: dispatch.meta_words.clone(),
                        };
                        if let Err(err) = backend.dispatch(request) {
                            return self.fail(format!(
                                "dispatch of kernel '{}' failed: {err:#}",
                                self.program.kernels[dispatch.kernel_index].settings.name
                            ));
                        }
                    }
                    for readback in &prepared.readbacks {
                        if let Err(err) = backend.read_back(readback.interface, &self.sender) {
                            return self.fail(format!(
                                "readback request for '{}' failed: {err:#}",
                                readback.virtual_pin
                            ));
                        }
                    }
                    self.prepared = Some(prepared);
                    self.stage = Stage::AwaitAsync;
                }
                Stage::AwaitAsync => {
                    let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
                    while let Ok(message) = self.receiver.try_recv() {
                        if pending.remove(&message.interface) {
                            self.completed.insert(message.interface, message.words);
                        }
                    }
                    let all_done = pending.is_empty();
                    drop(pending);
                    if !all_done {
                        return Poll::Pending;
                    }
                    self.stage = Stage::Finalize;
                }
                Stage::Finalize => {
                    let Some(prepared) = self.prepared.take() else {
                        return self.fail("finalize reached with nothing prepared".into());
                    };
                    for readback in &prepared.readbacks {
                        let words = self.completed.remove(&readback.interface);
                        let collection = match words {
                            None => DataCollection::empty(),
                            Some(words) => match unpack_collection(&readback.desc, &words) {
                                Ok(collection) => collection,
                                Err(err) => {
                                    self.diagnostics.warning(format!(
                                        "output '{}' could not be unpacked ({err}); substituting empty data",
                                        readback.virtual_pin
                                    ));
                                    DataCollection::empty()
                                }
                            },
                        };
                        self.outputs.insert(readback.virtual_pin.clone(), collection);
                    }
                    debug!(
                        target: "compute",
                        program = %self.program.name,
                        outputs = self.outputs.len(),
                        "run finished"
                    );
                    self.stage = Stage::Done(RunStatus::Succeeded);
                }
                Stage::Done(status) => return Poll::Ready(status),
            }
        }
    }
}
