//! Human-readable accessor declarations for a kernel's pins.
//!
//! This text is surfaced next to the source editor so authors can see the
//! functions in scope without reading the cooked output. It mirrors what
//! [`crate::kernel::cook`] actually generates.

use std::fmt::Write as _;

use crate::codec::attrs::{AttributeType, INTRINSIC_ATTRS};
use crate::kernel::{KernelSettings, PinKind};

const ALL_TYPES: [AttributeType; 9] = [
    AttributeType::Bool,
    AttributeType::Int,
    AttributeType::Float,
    AttributeType::Float2,
    AttributeType::Float3,
    AttributeType::Float4,
    AttributeType::Rotator,
    AttributeType::Quat,
    AttributeType::Transform,
];

/// Declarations for every function the cooked kernel puts in scope.
pub fn kernel_declarations(settings: &KernelSettings) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "fn GetNumThreads() -> u32;");
    let _ = writeln!(out, "fn GetSeed() -> u32;");
    let _ = writeln!(out, "fn GetComponentBoundsMin() -> vec3<f32>;");
    let _ = writeln!(out, "fn GetComponentBoundsMax() -> vec3<f32>;");

    for pin in &settings.input_pins {
        if pin.kind != PinKind::Collection {
            let _ = writeln!(out, "\n// Resource pin '{}'", pin.label);
            let _ = writeln!(
                out,
                "fn {}_Sample(UV: vec2<f32>) -> vec4<f32>;",
                pin.label
            );
            if pin.kind == PinKind::Landscape {
                let _ = writeln!(
                    out,
                    "fn {}_GetHeight(Position: vec2<f32>) -> f32;",
                    pin.label
                );
            }
            continue;
        }
        let _ = writeln!(out, "\n// Input pin '{}'", pin.label);
        write_pin_common(&mut out, &pin.label);
        for ty in ALL_TYPES {
            let _ = writeln!(
                out,
                "fn {}_Get{}(DataIndex: u32, ElementIndex: u32, Attribute: u32) -> {};",
                pin.label,
                ty.token(),
                ty.wgsl_type()
            );
        }
        write_point_getters(&mut out, &pin.label);
        let _ = writeln!(
            out,
            "fn {}_IsPointRemoved(DataIndex: u32, ElementIndex: u32) -> bool;",
            pin.label
        );
    }

    for pin in &settings.output_pins {
        if pin.kind != PinKind::Collection {
            let _ = writeln!(out, "\n// '{}' is an opaque resource pin.", pin.label);
            continue;
        }
        let _ = writeln!(out, "\n// Output pin '{}'", pin.label);
        write_pin_common(&mut out, &pin.label);
        for ty in ALL_TYPES {
            let _ = writeln!(
                out,
                "fn {}_Set{}(DataIndex: u32, ElementIndex: u32, Attribute: u32, Value: {});",
                pin.label,
                ty.token(),
                ty.wgsl_type()
            );
        }
        for (name, ty) in INTRINSIC_ATTRS {
            let _ = writeln!(
                out,
                "fn {}_Set{name}(DataIndex: u32, ElementIndex: u32, Value: {});",
                pin.label,
                ty.wgsl_type()
            );
        }
        let _ = writeln!(
            out,
            "fn {}_InitializePoint(DataIndex: u32, ElementIndex: u32);",
            pin.label
        );
        let _ = writeln!(
            out,
            "fn {}_RemovePoint(DataIndex: u32, ElementIndex: u32);",
            pin.label
        );
    }

    out
}

fn write_pin_common(out: &mut String, pin: &str) {
    let _ = writeln!(out, "fn {pin}_GetNumData() -> u32;");
    let _ = writeln!(out, "fn {pin}_GetNumElements(DataIndex: u32) -> u32;");
    let _ = writeln!(
        out,
        "fn {pin}_GetThreadData(ThreadIndex: u32) -> ThreadData; // .valid, .data_index, .elem_index"
    );
}

fn write_point_getters(out: &mut String, pin: &str) {
    for (name, ty) in INTRINSIC_ATTRS {
        let _ = writeln!(
            out,
            "fn {pin}_Get{name}(DataIndex: u32, ElementIndex: u32) -> {};",
            ty.wgsl_type()
        );
    }
}
