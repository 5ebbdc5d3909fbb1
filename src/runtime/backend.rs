//! Accelerator abstraction and the in-process simulator.
//!
//! The execution context talks to the device through [`ComputeBackend`]:
//! compilation readiness, buffer upload, dispatch, and asynchronous readback
//! delivered as messages over a channel. [`SimulatorBackend`] implements the
//! trait on the CPU with deterministic semantics (processor passthrough,
//! generator defaults) so the full compile-execute path can be exercised in
//! tests without a device.

use std::collections::HashMap;

use anyhow::{bail, Result};
use crossbeam_channel::Sender;

use crate::codec::attrs::INTRINSIC_ATTRS;
use crate::codec::pack::point_value;
use crate::compiler::program::ComputeProgram;
use crate::data::Point;
use crate::diag::Diagnostic;
use crate::kernel::cook::META_OUT_ITEMS_WORD;
use crate::kernel::KernelKind;

/// One completed readback: the device-side contents of an interface buffer.
#[derive(Debug)]
pub struct ReadbackMessage {
    pub interface: usize,
    pub words: Vec<u32>,
}

#[derive(Debug)]
pub struct DispatchRequest<'a> {
    pub program: &'a ComputeProgram,
    pub kernel_index: usize,
    pub thread_count: u32,
    pub meta_words: Vec<u32>,
}

pub trait ComputeBackend {
    /// Whether every kernel of the program has finished compiling. Polled
    /// each tick; returning false parks the run without error.
    fn compilation_ready(&mut self, program: &ComputeProgram) -> bool;

    /// Drain the compiler messages produced for this program.
    fn take_compile_messages(&mut self, program: &ComputeProgram) -> Vec<Diagnostic>;

    /// Write an interface buffer to the device.
    fn upload(&mut self, interface: usize, words: Vec<u32>);

    /// Submit one kernel dispatch. Buffers were uploaded beforehand and
    /// intermediates stay on the device between dispatches.
    fn dispatch(&mut self, request: DispatchRequest<'_>) -> Result<()>;

    /// Request the contents of an interface buffer once prior dispatches are
    /// done; delivery is a [`ReadbackMessage`] on the given sender, possibly
    /// from another thread.
    fn read_back(&mut self, interface: usize, sender: &Sender<ReadbackMessage>) -> Result<()>;
}

/// Deterministic CPU stand-in for a device.
#[derive(Default)]
pub struct SimulatorBackend {
    buffers: HashMap<usize, Vec<u32>>,
    /// Report compilation as never finishing.
    pub never_ready: bool,
    /// Fail every dispatch submission.
    pub fail_dispatch: bool,
    /// Messages handed out once by `take_compile_messages`.
    pub compile_messages: Vec<Diagnostic>,
    /// Hold readback messages until `flush_readbacks` is called.
    pub defer_readbacks: bool,
    deferred: Vec<(Sender<ReadbackMessage>, ReadbackMessage)>,
    dispatch_count: usize,
}

impl SimulatorBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatch_count
    }

    /// Deliver every deferred readback message.
    pub fn flush_readbacks(&mut self) {
        for (sender, message) in self.deferred.drain(..) {
            let _ = sender.send(message);
        }
    }

    fn simulate_processor(input: &[u32], output: &mut [u32]) {
        let items = input[0] as usize;
        for item in 0..items {
            if 1 + item >= input.len() || 1 + item >= output.len() {
                break;
            }
            let src_header = (input[1 + item] / 4) as usize;
            let dst_header = (output[1 + item] / 4) as usize;
            let count = input[src_header + 3].min(output[dst_header + 3]) as usize;
            for attr in 0..crate::codec::attrs::MAX_ATTRS {
                let src_slot = src_header + 4 + attr * 2;
                let dst_slot = dst_header + 4 + attr * 2;
                if input[src_slot + 1] == 0 || output[dst_slot + 1] == 0 {
                    continue;
                }
                let stride_words = ((input[src_slot] & 0xff) / 4) as usize;
                let src = (input[src_slot + 1] / 4) as usize;
                let dst = (output[dst_slot + 1] / 4) as usize;
                let len = stride_words * count;
                let (src_end, dst_end) = (src + len, dst + len);
                if src_end <= input.len() && dst_end <= output.len() {
                    output[dst..dst_end].copy_from_slice(&input[src..src_end]);
                }
            }
        }
    }

    fn simulate_generator(output: &mut [u32]) {
        let items = output[0];
        let default = Point::default();
        for item in 0..items as usize {
            let header = (output[1 + item] / 4) as usize;
            let count = output[header + 3] as usize;
            for (slot, _) in INTRINSIC_ATTRS.iter().enumerate() {
                let slot_word = header + 4 + slot * 2;
                if output[slot_word + 1] == 0 {
                    continue;
                }
                let stride_words = ((output[slot_word] & 0xff) / 4) as usize;
                let base = (output[slot_word + 1] / 4) as usize;
                let Some(value) = point_value(&default, slot as u32) else {
                    continue;
                };
                let mut words: Vec<u32> = Vec::with_capacity(stride_words);
                value.write_words(&mut words);
                for element in 0..count {
                    let at = base + element * stride_words;
                    output[at..at + stride_words].copy_from_slice(&words);
                }
            }
        }
    }

}

impl ComputeBackend for SimulatorBackend {
    fn compilation_ready(&mut self, _program: &ComputeProgram) -> bool {
        !self.never_ready
    }

    fn take_compile_messages(&mut self, _program: &ComputeProgram) -> Vec<Diagnostic> {
        std::mem::take(&mut self.compile_messages)
    }

    fn upload(&mut self, interface: usize, words: Vec<u32>) {
        self.buffers.insert(interface, words);
    }

    fn dispatch(&mut self, request: DispatchRequest<'_>) -> Result<()> {
        if self.fail_dispatch {
            bail!("simulated dispatch failure");
        }
        self.dispatch_count += 1;
        if request.thread_count == 0 {
            // Nothing runs; output buffers keep their zero item count.
            return Ok(());
        }

        let kernel = &request.program.kernels[request.kernel_index];
        let inputs: Vec<usize> = request
            .program
            .edges_for_kernel(request.kernel_index)
            .filter(|edge| edge.is_input)
            .map(|edge| edge.interface_index)
            .collect();
        let outputs: Vec<usize> = request
            .program
            .edges_for_kernel(request.kernel_index)
            .filter(|edge| !edge.is_input)
            .map(|edge| edge.interface_index)
            .collect();

        // Header writer: stamp item counts from the meta uniform.
        for (pin_index, &interface) in outputs.iter().enumerate() {
            let items = request.meta_words[META_OUT_ITEMS_WORD + pin_index];
            if let Some(buffer) = self.buffers.get_mut(&interface) {
                buffer[0] = items;
            }
        }

        match kernel.settings.kind {
            KernelKind::PointProcessor => {
                let input = inputs.first().and_then(|i| self.buffers.get(i)).cloned();
                if let (Some(input), Some(&out)) = (input, outputs.first()) {
                    if let Some(output) = self.buffers.get_mut(&out) {
                        Self::simulate_processor(&input, output);
                    }
                }
            }
            KernelKind::PointGenerator { .. } => {
                if let Some(output) = outputs.first().and_then(|i| self.buffers.get_mut(i)) {
                    Self::simulate_generator(output);
                }
            }
            KernelKind::Custom => {}
        }
        Ok(())
    }

    fn read_back(&mut self, interface: usize, sender: &Sender<ReadbackMessage>) -> Result<()> {
        let Some(words) = self.buffers.get(&interface) else {
            bail!("readback of interface {interface} before any upload");
        };
        let message = ReadbackMessage {
            interface,
            words: words.clone(),
        };
        if self.defer_readbacks {
            self.deferred.push((sender.clone(), message));
        } else {
            let _ = sender.send(message);
        }
        Ok(())
    }
}
