//! Data providers: everything a run needs before its first dispatch.
//!
//! Resolving a run walks the program's kernels in order, shaping each
//! interface: upload interfaces pack the CPU collections fed through the
//! boundary pins, collection interfaces get their descriptor from the
//! producing kernel's settings chained over its resolved inputs, and every
//! kernel gets its meta uniform (thread count, seed, per-pin item counts,
//! component bounds). Attribute usages are re-validated here against the
//! actual shapes; a kernel that fails is skipped with a diagnostic and the
//! rest of the run still dispatches. Only a run with no dispatch left is
//! refused.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::codec::desc::{DataCollectionDesc, DataDesc};
use crate::codec::pack::{pack_collection, prepare_for_kernel_output};
use crate::compiler::program::{ComputeProgram, DataInterface};
use crate::data::DataCollection;
use crate::diag::{Diagnostic, DiagnosticSink, Severity};
use crate::kernel::cook::{
    KERNEL_META_WORDS, META_BOUNDS_MAX_WORD, META_BOUNDS_MIN_WORD, META_NUM_THREADS_WORD,
    META_OUT_ITEMS_WORD, META_SEED_WORD,
};
use crate::kernel::{scan_attribute_usages, validate_attribute_usages, PinKind};

#[derive(Debug, Clone)]
pub struct PreparedDispatch {
    pub kernel_index: usize,
    pub thread_count: u32,
    pub meta_words: Vec<u32>,
}

/// A buffer to deliver back to the CPU when the run completes.
#[derive(Debug, Clone)]
pub struct ReadbackTarget {
    pub interface: usize,
    pub virtual_pin: String,
    pub desc: DataCollectionDesc,
}

#[derive(Debug, Default)]
pub struct PreparedRun {
    /// Interface buffers to upload before dispatching, in upload order.
    pub uploads: Vec<(usize, Vec<u32>)>,
    pub dispatches: Vec<PreparedDispatch>,
    pub readbacks: Vec<ReadbackTarget>,
}

/// Component bounds handed to kernels through the meta uniform.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComponentBounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

fn meta_words(
    thread_count: u32,
    seed: u32,
    out_items: &[u32],
    bounds: ComponentBounds,
) -> Vec<u32> {
    let mut words = vec![0u32; KERNEL_META_WORDS];
    words[META_NUM_THREADS_WORD] = thread_count;
    words[META_SEED_WORD] = seed;
    for (i, &items) in out_items.iter().take(4).enumerate() {
        words[META_OUT_ITEMS_WORD + i] = items;
    }
    for i in 0..3 {
        words[META_BOUNDS_MIN_WORD + i] = bounds.min[i].to_bits();
        words[META_BOUNDS_MAX_WORD + i] = bounds.max[i].to_bits();
    }
    words
}

/// Resolve descriptors, pack buffers and build dispatches for one run.
/// `inputs` is keyed by virtual input pin label. Returns `None` after
/// reporting diagnostics when the run cannot be submitted.
pub fn prepare_run(
    program: &ComputeProgram,
    inputs: &HashMap<String, DataCollection>,
    seed: u32,
    bounds: ComponentBounds,
    sink: &mut DiagnosticSink,
) -> Option<PreparedRun> {
    let table = &program.attribute_table;
    let mut run = PreparedRun::default();
    let mut interface_descs: HashMap<usize, DataCollectionDesc> = HashMap::new();

    // Upload interfaces first: their shape comes from the data itself.
    for (index, interface) in program.interfaces.iter().enumerate() {
        let DataInterface::Upload { virtual_pin } = interface else {
            continue;
        };
        let collection = match virtual_pin {
            None => DataCollection::empty(),
            Some(label) => match inputs.get(label) {
                Some(collection) => collection.clone(),
                None => {
                    warn!(target: "compute", pin = %label, "no input bound to virtual pin, uploading empty collection");
                    DataCollection::empty()
                }
            },
        };
        let desc = DataCollectionDesc::new(
            collection
                .items
                .iter()
                .map(|item| DataDesc::describe(item, table))
                .collect(),
        );
        let words = match pack_collection(&desc, &collection) {
            Ok(words) => words,
            Err(err) => {
                sink.error(format!("packing upload for program '{}': {err:#}", program.name));
                return None;
            }
        };
        run.uploads.push((index, words));
        interface_descs.insert(index, desc);
    }

    // Kernels in order: every producer precedes its consumers.
    for (kernel_index, kernel) in program.kernels.iter().enumerate() {
        let settings = &kernel.settings;

        let mut input_descs: Vec<(String, DataCollectionDesc)> = Vec::new();
        for edge in program.edges_for_kernel(kernel_index).filter(|e| e.is_input) {
            match &program.interfaces[edge.interface_index] {
                DataInterface::Upload { .. } | DataInterface::Collection { .. } => {
                    let desc = interface_descs
                        .get(&edge.interface_index)
                        .cloned()
                        .unwrap_or_default();
                    input_descs.push((edge.pin.clone(), desc));
                }
                // Opaque resources have no collection shape.
                _ => {}
            }
        }

        let mut output_descs: Vec<(String, DataCollectionDesc)> = Vec::new();
        let mut output_uploads: Vec<(usize, Vec<u32>)> = Vec::new();
        let mut out_items: Vec<u32> = Vec::new();
        let mut outputs_ok = true;
        for edge in program
            .edges_for_kernel(kernel_index)
            .filter(|e| !e.is_input)
        {
            let Some(pin) = settings.output_pin(&edge.pin) else {
                continue;
            };
            if pin.kind != PinKind::Collection {
                continue;
            }
            let mut desc = settings.output_pin_desc(pin, &input_descs);
            // Created attributes carried a placeholder id until now.
            for item in &mut desc.data {
                item.attributes.retain_mut(|attr| {
                    if attr.index != u32::MAX {
                        return true;
                    }
                    match table.index_of(&attr.key()) {
                        Some(index) => {
                            attr.index = index;
                            true
                        }
                        None => {
                            warn!(
                                target: "compute",
                                attribute = %attr.name,
                                "created attribute missing from program table, dropped"
                            );
                            false
                        }
                    }
                });
            }
            out_items.push(desc.data.len() as u32);
            let words = match prepare_for_kernel_output(&desc) {
                Ok(words) => words,
                Err(err) => {
                    sink.push(
                        Diagnostic::new(
                            Severity::Error,
                            format!("kernel '{}': {err:#}", settings.name),
                        )
                        .with_task(kernel.task),
                    );
                    outputs_ok = false;
                    break;
                }
            };
            output_uploads.push((edge.interface_index, words));
            interface_descs.insert(edge.interface_index, desc.clone());
            output_descs.push((edge.pin.clone(), desc));
        }
        if !outputs_ok {
            continue;
        }

        // Shape-dependent attribute checks, now that shapes are known. A
        // failing kernel is skipped; its outputs stay empty collections.
        let usages = scan_attribute_usages(&settings.source);
        let mut kernel_sink = DiagnosticSink::new();
        let usages_ok = validate_attribute_usages(
            settings,
            &usages,
            &input_descs,
            &output_descs,
            &mut kernel_sink,
        );
        for mut message in kernel_sink.messages().to_vec() {
            message.task = Some(kernel.task);
            sink.push(message);
        }
        if !usages_ok {
            continue;
        }
        run.uploads.extend(output_uploads);

        let first_output_desc = output_descs.first().map(|(_, desc)| desc);
        let thread_count = settings.thread_count(&input_descs, first_output_desc);
        run.dispatches.push(PreparedDispatch {
            kernel_index,
            thread_count,
            meta_words: meta_words(thread_count, seed, &out_items, bounds),
        });
    }

    // Collection interfaces whose producer was skipped (here or at compile
    // time) still need a device buffer: a lone zero word is a well-formed
    // empty collection for consumers and readbacks alike.
    let uploaded: HashSet<usize> = run.uploads.iter().map(|&(index, _)| index).collect();
    for (index, interface) in program.interfaces.iter().enumerate() {
        if matches!(interface, DataInterface::Collection { .. }) && !uploaded.contains(&index) {
            run.uploads.push((index, vec![0]));
        }
    }

    if run.dispatches.is_empty() {
        sink.error(format!(
            "no kernel of program '{}' could be scheduled",
            program.name
        ));
        return None;
    }

    for (index, interface) in program.interfaces.iter().enumerate() {
        let DataInterface::Collection {
            requires_readback: true,
            virtual_pin: Some(virtual_pin),
            ..
        } = interface
        else {
            continue;
        };
        let desc = interface_descs.get(&index).cloned().unwrap_or_default();
        run.readbacks.push(ReadbackTarget {
            interface: index,
            virtual_pin: virtual_pin.clone(),
            desc,
        });
    }

    Some(run)
}
