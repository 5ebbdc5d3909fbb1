//! Compute program assembly.
//!
//! One island subset becomes one [`ComputeProgram`]: an ordered list of
//! kernel invocations, the data interfaces they read and write, the edges
//! binding kernels to interfaces, and the frozen attribute table that maps
//! every attribute name the program touches to a global id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::codec::attrs::{AttributeKey, AttributeTable, AttributeTableBuilder};
use crate::compiler::wiring::WiringPlan;
use crate::diag::{Diagnostic, DiagnosticSink, Severity};
use crate::graph::{CompiledTask, TaskId};
use crate::kernel::{
    cook_kernel_source, scan_attribute_usages, validate_attribute_usages, CookedKernel,
    KernelSettings, PinBinding, PinKind,
};

/// A buffer or resource shared between kernels and/or the CPU boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataInterface {
    /// CPU collection packed and uploaded at run start. `virtual_pin == None`
    /// feeds an unconnected input pin with an empty collection.
    Upload { virtual_pin: Option<String> },
    /// Device buffer written by one kernel, possibly read back at run end.
    /// `producer_kernel == None` marks the output of a kernel that was
    /// excluded from the program; the buffer stays an empty collection.
    Collection {
        producer_kernel: Option<usize>,
        producer_pin: String,
        requires_readback: bool,
        virtual_pin: Option<String>,
    },
    /// Opaque texture resource provided by the boundary.
    Texture { virtual_pin: Option<String> },
    /// Opaque landscape/heightfield resource provided by the boundary.
    Landscape { virtual_pin: Option<String> },
    /// Per-dispatch kernel parameters (thread count, seed, bounds).
    KernelMeta { kernel: usize },
}

/// Binds one kernel pin to one data interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub kernel_index: usize,
    pub binding_index: u32,
    pub interface_index: usize,
    pub is_input: bool,
    pub pin: String,
    /// Stable name surfaced in backend tooling: `<pin>_<kernel name>`.
    pub binding_name: String,
}

#[derive(Debug, Clone)]
pub struct KernelInvocation {
    /// Task id the kernel came from, as compiled (before island culling).
    pub task: TaskId,
    pub settings: Arc<KernelSettings>,
    pub cooked: CookedKernel,
    pub meta_interface: usize,
}

/// Inbound boundary pin and the upload interface behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualInput {
    pub label: String,
    pub interface: usize,
    pub producer: TaskId,
    pub producer_pin: Option<String>,
}

/// Outbound boundary pin and the readback interface behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualOutput {
    pub label: String,
    pub interface: usize,
}

#[derive(Debug)]
pub struct ComputeProgram {
    pub name: String,
    pub stack_index: usize,
    pub kernels: Vec<KernelInvocation>,
    pub interfaces: Vec<DataInterface>,
    pub edges: Vec<GraphEdge>,
    pub attribute_table: AttributeTable,
    pub virtual_inputs: Vec<VirtualInput>,
    pub virtual_outputs: Vec<VirtualOutput>,
}

impl ComputeProgram {
    pub fn edges_for_kernel(&self, kernel_index: usize) -> impl Iterator<Item = &GraphEdge> {
        self.edges
            .iter()
            .filter(move |edge| edge.kernel_index == kernel_index)
    }

    #[cfg(test)]
    pub fn empty_for_tests(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stack_index: 0,
            kernels: Vec::new(),
            interfaces: Vec::new(),
            edges: Vec::new(),
            attribute_table: AttributeTable::default(),
            virtual_inputs: Vec::new(),
            virtual_outputs: Vec::new(),
        }
    }
}

/// Build the program for one island subset. A kernel that fails validation
/// or cooking here is excluded with a diagnostic while the rest of the
/// island still assembles; only an island with no surviving kernel is
/// dropped altogether. Graph inconsistencies (a member without settings, an
/// edge the wiring plan cannot resolve) discard the island; the surrounding
/// graph is unaffected because wiring has not been applied yet.
pub fn build_program(
    tasks: &[CompiledTask],
    subset: &[TaskId],
    plan: &WiringPlan,
    name: &str,
    sink: &mut DiagnosticSink,
) -> Option<Arc<ComputeProgram>> {
    let members: HashSet<TaskId> = subset.iter().copied().collect();

    let mut settings_of: Vec<Arc<KernelSettings>> = Vec::with_capacity(subset.len());
    for &member in subset {
        match &tasks[member].settings {
            Some(settings) => settings_of.push(settings.clone()),
            None => {
                sink.error(format!("task {member} is in an island but has no kernel settings"));
                return None;
            }
        }
    }

    // Attribute table: usages first, then created attributes, in kernel order.
    let mut table_builder = AttributeTableBuilder::new();
    for settings in &settings_of {
        for usage in scan_attribute_usages(&settings.source) {
            table_builder.register(AttributeKey::new(usage.ty, usage.name));
        }
        for pin in &settings.output_pins {
            for key in &pin.created_attributes {
                table_builder.register(key.clone());
            }
        }
    }
    let table = table_builder.freeze();

    // Pin-direction checks are static; shape checks run again at execution
    // time once data arrives. A failing kernel is excluded, not the island.
    let mut excluded: HashSet<TaskId> = HashSet::new();
    for (&member, settings) in subset.iter().zip(&settings_of) {
        let usages = scan_attribute_usages(&settings.source);
        let mut kernel_sink = DiagnosticSink::new();
        let ok = validate_attribute_usages(settings, &usages, &[], &[], &mut kernel_sink);
        for mut message in kernel_sink.messages().to_vec() {
            message.task = Some(member);
            sink.push(message);
        }
        if !ok {
            excluded.insert(member);
        }
    }

    let mut interfaces: Vec<DataInterface> = Vec::new();
    let mut edges: Vec<GraphEdge> = Vec::new();
    let mut kernels: Vec<KernelInvocation> = Vec::new();
    let mut virtual_inputs: Vec<VirtualInput> = Vec::new();
    // (producer task, producer pin) -> collection interface.
    let mut produced: HashMap<(TaskId, String), usize> = HashMap::new();

    // Interfaces an excluded kernel would have written. They keep their zero
    // item count at run time, so consumers read a well-formed empty
    // collection instead of garbage.
    let placeholder_outputs = |member: TaskId,
                               settings: &Arc<KernelSettings>,
                               interfaces: &mut Vec<DataInterface>,
                               produced: &mut HashMap<(TaskId, String), usize>| {
        for pin in settings
            .output_pins
            .iter()
            .filter(|p| p.kind == PinKind::Collection)
        {
            let virtual_pin = plan
                .virtual_output_of(member, &pin.label)
                .map(str::to_string);
            interfaces.push(DataInterface::Collection {
                producer_kernel: None,
                producer_pin: pin.label.clone(),
                requires_readback: virtual_pin.is_some(),
                virtual_pin,
            });
            produced.insert((member, pin.label.clone()), interfaces.len() - 1);
        }
    };

    for (&member, settings) in subset.iter().zip(&settings_of) {
        if excluded.contains(&member) {
            placeholder_outputs(member, settings, &mut interfaces, &mut produced);
            continue;
        }

        // Bind group layout: input pins in order, then collection output
        // pins, then the meta uniform.
        let mut binding = 0u32;
        let mut pin_bindings: Vec<PinBinding> = Vec::new();
        for pin in &settings.input_pins {
            pin_bindings.push(PinBinding {
                pin: pin.label.clone(),
                binding,
                is_input: true,
            });
            binding += 1;
        }
        for pin in settings
            .output_pins
            .iter()
            .filter(|p| p.kind == PinKind::Collection)
        {
            pin_bindings.push(PinBinding {
                pin: pin.label.clone(),
                binding,
                is_input: false,
            });
            binding += 1;
        }

        let cooked = match cook_kernel_source(settings, &pin_bindings, binding, &table) {
            Ok(cooked) => cooked,
            Err(err) => {
                sink.push(
                    Diagnostic::new(
                        Severity::Error,
                        format!("kernel '{}': {err:#}", settings.name),
                    )
                    .with_task(member),
                );
                placeholder_outputs(member, settings, &mut interfaces, &mut produced);
                continue;
            }
        };

        let kernel_index = kernels.len();
        for (pin, pin_binding) in settings.input_pins.iter().zip(&pin_bindings) {
            let edge = tasks[member]
                .inputs
                .iter()
                .find(|input| input.downstream_pin.as_deref() == Some(pin.label.as_str()));

            let interface_index = match edge {
                Some(edge) if members.contains(&edge.upstream) => {
                    let Some(upstream_pin) = edge.upstream_pin.clone() else {
                        sink.error(format!(
                            "kernel '{}': pin '{}' is fed by a pinless edge",
                            settings.name, pin.label
                        ));
                        return None;
                    };
                    match produced.get(&(edge.upstream, upstream_pin.clone())) {
                        Some(&index) => index,
                        None => {
                            sink.error(format!(
                                "kernel '{}': pin '{}' reads unknown island output '{}'",
                                settings.name, pin.label, upstream_pin
                            ));
                            return None;
                        }
                    }
                }
                Some(_) | None => {
                    // Boundary or unconnected pin.
                    let virtual_pin = plan
                        .virtual_input_of(member, &pin.label)
                        .map(str::to_string);
                    let interface = match pin.kind {
                        PinKind::Collection => DataInterface::Upload {
                            virtual_pin: virtual_pin.clone(),
                        },
                        PinKind::Texture => DataInterface::Texture {
                            virtual_pin: virtual_pin.clone(),
                        },
                        PinKind::Landscape => DataInterface::Landscape {
                            virtual_pin: virtual_pin.clone(),
                        },
                    };
                    interfaces.push(interface);
                    let index = interfaces.len() - 1;
                    if let (Some(label), Some(edge)) = (virtual_pin, edge) {
                        virtual_inputs.push(VirtualInput {
                            label,
                            interface: index,
                            producer: edge.upstream,
                            producer_pin: edge.upstream_pin.clone(),
                        });
                    }
                    index
                }
            };

            edges.push(GraphEdge {
                kernel_index,
                binding_index: pin_binding.binding,
                interface_index,
                is_input: true,
                pin: pin.label.clone(),
                binding_name: format!("{}_{}", pin.label, settings.name),
            });
        }

        for (pin, pin_binding) in settings
            .output_pins
            .iter()
            .filter(|p| p.kind == PinKind::Collection)
            .zip(&pin_bindings[settings.input_pins.len()..])
        {
            let virtual_pin = plan
                .virtual_output_of(member, &pin.label)
                .map(str::to_string);
            interfaces.push(DataInterface::Collection {
                producer_kernel: Some(kernel_index),
                producer_pin: pin.label.clone(),
                requires_readback: virtual_pin.is_some(),
                virtual_pin,
            });
            let interface_index = interfaces.len() - 1;
            produced.insert((member, pin.label.clone()), interface_index);

            edges.push(GraphEdge {
                kernel_index,
                binding_index: pin_binding.binding,
                interface_index,
                is_input: false,
                pin: pin.label.clone(),
                binding_name: format!("{}_{}", pin.label, settings.name),
            });
        }

        interfaces.push(DataInterface::KernelMeta {
            kernel: kernel_index,
        });
        let meta_interface = interfaces.len() - 1;

        kernels.push(KernelInvocation {
            task: member,
            settings: settings.clone(),
            cooked,
            meta_interface,
        });
    }

    if kernels.is_empty() {
        sink.warning(format!("island '{name}' produced no kernels and is not scheduled"));
        return None;
    }

    let virtual_outputs = plan
        .outputs
        .iter()
        .filter_map(|output| {
            let interface = *produced.get(&(output.member, output.member_pin.clone()))?;
            Some(VirtualOutput {
                label: output.virtual_pin.clone(),
                interface,
            })
        })
        .collect();

    debug!(
        target: "compute",
        name,
        kernels = kernels.len(),
        interfaces = interfaces.len(),
        attributes = table.len(),
        "assembled compute program"
    );

    Some(Arc::new(ComputeProgram {
        name: name.to_string(),
        stack_index: plan.stack_index,
        kernels,
        interfaces,
        edges,
        attribute_table: table,
        virtual_inputs,
        virtual_outputs,
    }))
}
