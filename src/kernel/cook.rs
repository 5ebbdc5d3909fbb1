//! Cooked kernel source generation.
//!
//! Cooking turns authored kernel text into a self-contained WGSL module:
//! storage-buffer bindings for every collection pin, texture bindings with
//! sampling helpers for opaque pins, the generated accessor
//! surface, the entry point with its header-writer pass, the kind-specific
//! prologue (attribute auto-copy for processors, point initialization for
//! generators), and the user body with every quoted attribute name replaced
//! by its global id.

use std::fmt::Write as _;

use anyhow::{bail, Result};

use crate::codec::attrs::{AttributeKey, AttributeTable, AttributeType};
use crate::kernel::scan::scan_attribute_usages;
use crate::kernel::{KernelKind, KernelSettings, PinKind};

pub const WORKGROUP_SIZE: u32 = 64;

/// Size of the per-dispatch kernel meta uniform, in words. Offsets follow the
/// WGSL uniform layout of the generated `KernelMeta` struct.
pub const KERNEL_META_WORDS: usize = 16;
pub const META_NUM_THREADS_WORD: usize = 0;
pub const META_SEED_WORD: usize = 1;
/// Item counts of up to four output collection pins, in pin order.
pub const META_OUT_ITEMS_WORD: usize = 4;
pub const META_BOUNDS_MIN_WORD: usize = 8;
pub const META_BOUNDS_MAX_WORD: usize = 12;

/// Component selectors of `meta.out_items`, in output pin order.
const OUT_ITEM_COMPONENTS: [&str; 4] = ["x", "y", "z", "w"];

/// One collection pin's place in the cooked module's bind group.
#[derive(Debug, Clone)]
pub struct PinBinding {
    pub pin: String,
    pub binding: u32,
    pub is_input: bool,
}

#[derive(Debug, Clone)]
pub struct CookedKernel {
    pub source: String,
    pub entry_point: &'static str,
    pub workgroup_size: u32,
}

/// Replace every quoted attribute name in accessor calls with its global id.
fn substitute_attribute_ids(
    settings: &KernelSettings,
    table: &AttributeTable,
) -> Result<String> {
    let mut source = settings.source.clone();
    let usages = scan_attribute_usages(&settings.source);
    for usage in usages.iter().rev() {
        let key = AttributeKey::new(usage.ty, usage.name.clone());
        let Some(id) = table.index_of(&key) else {
            bail!(
                "kernel '{}': attribute '{}' was not registered with the program",
                settings.name,
                usage.name
            );
        };
        source.replace_range(usage.name_span.0..usage.name_span.1, &format!("{id}u"));
    }
    Ok(source)
}

fn typed_get_body(pin: &str, ty: AttributeType) -> String {
    let word = |i: u32| format!("{pin}_ElementWord(DataIndex, ElementIndex, Attribute, {i}u)");
    let float = |i: u32| format!("bitcast<f32>({})", word(i));
    match ty {
        AttributeType::Bool => format!("return {} != 0u;", word(0)),
        AttributeType::Int => format!("return bitcast<i32>({});", word(0)),
        AttributeType::Float => format!("return {};", float(0)),
        AttributeType::Float2 => format!("return vec2<f32>({}, {});", float(0), float(1)),
        AttributeType::Float3 | AttributeType::Rotator => format!(
            "return vec3<f32>({}, {}, {});",
            float(0),
            float(1),
            float(2)
        ),
        AttributeType::Float4 | AttributeType::Quat => format!(
            "return vec4<f32>({}, {}, {}, {});",
            float(0),
            float(1),
            float(2),
            float(3)
        ),
        AttributeType::Transform => {
            let mut cols = Vec::new();
            for c in 0..4 {
                cols.push(format!(
                    "vec4<f32>({}, {}, {}, {})",
                    float(c * 4),
                    float(c * 4 + 1),
                    float(c * 4 + 2),
                    float(c * 4 + 3)
                ));
            }
            format!("return mat4x4<f32>({});", cols.join(", "))
        }
    }
}

fn typed_set_body(pin: &str, ty: AttributeType) -> String {
    let store = |i: u32, value: String| {
        format!("{pin}_SetElementWord(DataIndex, ElementIndex, Attribute, {i}u, {value});")
    };
    let component = |name: &str| format!("bitcast<u32>(Value.{name})");
    match ty {
        AttributeType::Bool => store(0, "select(0u, 1u, Value)".into()),
        AttributeType::Int => store(0, "bitcast<u32>(Value)".into()),
        AttributeType::Float => store(0, "bitcast<u32>(Value)".into()),
        AttributeType::Float2 => format!("{}\n    {}", store(0, component("x")), store(1, component("y"))),
        AttributeType::Float3 | AttributeType::Rotator => format!(
            "{}\n    {}\n    {}",
            store(0, component("x")),
            store(1, component("y")),
            store(2, component("z"))
        ),
        AttributeType::Float4 | AttributeType::Quat => format!(
            "{}\n    {}\n    {}\n    {}",
            store(0, component("x")),
            store(1, component("y")),
            store(2, component("z")),
            store(3, component("w"))
        ),
        AttributeType::Transform => {
            let mut lines = Vec::new();
            for c in 0..4u32 {
                for r in 0..4u32 {
                    lines.push(store(
                        c * 4 + r,
                        format!("bitcast<u32>(Value[{c}][{r}])"),
                    ));
                }
            }
            lines.join("\n    ")
        }
    }
}

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

/// Intrinsic point properties: (accessor name, slot, wgsl type, typed accessor
/// suffix the named accessor forwards to).
const POINT_PROPS: [(&str, u32, &str, &str); 9] = [
    ("Position", 0, "vec3<f32>", "Float3"),
    ("Rotation", 1, "vec4<f32>", "Quat"),
    ("Scale", 2, "vec3<f32>", "Float3"),
    ("BoundsMin", 3, "vec3<f32>", "Float3"),
    ("BoundsMax", 4, "vec3<f32>", "Float3"),
    ("Color", 5, "vec4<f32>", "Float4"),
    ("Density", 6, "f32", "Float"),
    ("Seed", 7, "i32", "Int"),
    ("Steepness", 8, "f32", "Float"),
];

fn write_pin_internals(out: &mut String, pin: &str, binding: u32, is_input: bool) {
    let access = if is_input { "read" } else { "read_write" };
    let _ = writeln!(
        out,
        "@group(0) @binding({binding}) var<storage, {access}> {pin}_buf: array<u32>;"
    );
    let _ = writeln!(
        out,
        "fn {pin}_LoadWord(WordIndex: u32) -> u32 {{ return {pin}_buf[WordIndex]; }}"
    );
    if !is_input {
        let _ = writeln!(
            out,
            "fn {pin}_StoreWord(WordIndex: u32, Value: u32) {{ {pin}_buf[WordIndex] = Value; }}"
        );
    }
    let _ = writeln!(
        out,
        "fn {pin}_DataHeaderWord(DataIndex: u32) -> u32 {{ return {pin}_buf[1u + DataIndex] / 4u; }}"
    );
    let _ = writeln!(
        out,
        "fn {pin}_GetNumElements(DataIndex: u32) -> u32 {{ return {pin}_buf[{pin}_DataHeaderWord(DataIndex) + 3u]; }}"
    );
    // Attribute header slot: packed (id << 8 | stride bytes), payload address.
    let _ = writeln!(
        out,
        "fn {pin}_AttributeHeader(DataIndex: u32, Attribute: u32) -> vec2<u32> {{\n    let Slot = {pin}_DataHeaderWord(DataIndex) + 4u + Attribute * 2u;\n    return vec2<u32>({pin}_buf[Slot], {pin}_buf[Slot + 1u]);\n}}"
    );
    let _ = writeln!(
        out,
        "fn {pin}_ElementWord(DataIndex: u32, ElementIndex: u32, Attribute: u32, Word: u32) -> u32 {{\n    let Header = {pin}_AttributeHeader(DataIndex, Attribute);\n    let StrideWords = (Header.x & 0xffu) / 4u;\n    return {pin}_buf[Header.y / 4u + ElementIndex * StrideWords + Word];\n}}"
    );
    if !is_input {
        let _ = writeln!(
            out,
            "fn {pin}_SetElementWord(DataIndex: u32, ElementIndex: u32, Attribute: u32, Word: u32, Value: u32) {{\n    let Header = {pin}_AttributeHeader(DataIndex, Attribute);\n    let StrideWords = (Header.x & 0xffu) / 4u;\n    {pin}_buf[Header.y / 4u + ElementIndex * StrideWords + Word] = Value;\n}}"
        );
    }
}

fn write_pin_num_data(out: &mut String, pin: &str, out_item_component: Option<&str>) {
    // Output buffers carry a zero item count until the header writer runs,
    // so their data count comes from the dispatch meta uniform instead.
    match out_item_component {
        None => {
            let _ = writeln!(
                out,
                "fn {pin}_GetNumData() -> u32 {{ return {pin}_buf[0u]; }}"
            );
        }
        Some(component) => {
            let _ = writeln!(
                out,
                "fn {pin}_GetNumData() -> u32 {{ return meta.out_items.{component}; }}"
            );
        }
    }
    let _ = writeln!(
        out,
        "fn {pin}_GetThreadData(ThreadIndex: u32) -> ThreadData {{\n    var Remaining = ThreadIndex;\n    let NumData = {pin}_GetNumData();\n    for (var DataIndex: u32 = 0u; DataIndex < NumData; DataIndex = DataIndex + 1u) {{\n        let Count = {pin}_GetNumElements(DataIndex);\n        if (Remaining < Count) {{ return ThreadData(true, DataIndex, Remaining); }}\n        Remaining = Remaining - Count;\n    }}\n    return ThreadData(false, 0u, 0u);\n}}"
    );
}

fn write_input_accessors(out: &mut String, pin: &str) {
    for ty in ALL_TYPES {
        let _ = writeln!(
            out,
            "fn {pin}_Get{}(DataIndex: u32, ElementIndex: u32, Attribute: u32) -> {} {{\n    {}\n}}",
            ty.token(),
            ty.wgsl_type(),
            typed_get_body(pin, ty)
        );
    }
    for (name, slot, wgsl_ty, suffix) in POINT_PROPS {
        let _ = writeln!(
            out,
            "fn {pin}_Get{name}(DataIndex: u32, ElementIndex: u32) -> {wgsl_ty} {{ return {pin}_Get{suffix}(DataIndex, ElementIndex, {slot}u); }}"
        );
    }
    // Removed records are marked with a non-finite density.
    let _ = writeln!(
        out,
        "fn {pin}_IsPointRemoved(DataIndex: u32, ElementIndex: u32) -> bool {{\n    let Bits = {pin}_ElementWord(DataIndex, ElementIndex, 6u, 0u);\n    return (Bits & 0x7f800000u) == 0x7f800000u;\n}}"
    );
}

fn write_output_accessors(out: &mut String, pin: &str) {
    for ty in ALL_TYPES {
        let _ = writeln!(
            out,
            "fn {pin}_Set{}(DataIndex: u32, ElementIndex: u32, Attribute: u32, Value: {}) {{\n    {}\n}}",
            ty.token(),
            ty.wgsl_type(),
            typed_set_body(pin, ty)
        );
    }
    for (name, slot, wgsl_ty, suffix) in POINT_PROPS {
        let _ = writeln!(
            out,
            "fn {pin}_Set{name}(DataIndex: u32, ElementIndex: u32, Value: {wgsl_ty}) {{ {pin}_Set{suffix}(DataIndex, ElementIndex, {slot}u, Value); }}"
        );
    }
    let _ = writeln!(
        out,
        "fn {pin}_InitializePoint(DataIndex: u32, ElementIndex: u32) {{\n    {pin}_SetPosition(DataIndex, ElementIndex, vec3<f32>(0.0));\n    {pin}_SetRotation(DataIndex, ElementIndex, vec4<f32>(0.0, 0.0, 0.0, 1.0));\n    {pin}_SetScale(DataIndex, ElementIndex, vec3<f32>(1.0));\n    {pin}_SetBoundsMin(DataIndex, ElementIndex, vec3<f32>(-1.0));\n    {pin}_SetBoundsMax(DataIndex, ElementIndex, vec3<f32>(1.0));\n    {pin}_SetColor(DataIndex, ElementIndex, vec4<f32>(1.0));\n    {pin}_SetDensity(DataIndex, ElementIndex, 1.0);\n    {pin}_SetSeed(DataIndex, ElementIndex, 0);\n    {pin}_SetSteepness(DataIndex, ElementIndex, 1.0);\n}}"
    );
    let _ = writeln!(
        out,
        "fn {pin}_RemovePoint(DataIndex: u32, ElementIndex: u32) {{\n    {pin}_SetElementWord(DataIndex, ElementIndex, 6u, 0u, 0x7fc00000u);\n}}"
    );
}

/// Sampling surface of an opaque texture pin. Landscape pins additionally
/// map world positions through the component bounds to a height sample.
fn write_texture_accessors(out: &mut String, pin: &str, binding: u32, with_height: bool) {
    let _ = writeln!(
        out,
        "@group(0) @binding({binding}) var {pin}_texture: texture_2d<f32>;"
    );
    let _ = writeln!(
        out,
        "fn {pin}_Sample(UV: vec2<f32>) -> vec4<f32> {{\n    let Dim = vec2<f32>(textureDimensions({pin}_texture));\n    let Texel = vec2<i32>(clamp(UV, vec2<f32>(0.0), vec2<f32>(1.0)) * (Dim - vec2<f32>(1.0)));\n    return textureLoad({pin}_texture, Texel, 0);\n}}"
    );
    if with_height {
        let _ = writeln!(
            out,
            "fn {pin}_GetHeight(Position: vec2<f32>) -> f32 {{\n    let Min = GetComponentBoundsMin().xy;\n    let Extent = max(GetComponentBoundsMax().xy - Min, vec2<f32>(1e-3));\n    return {pin}_Sample((Position - Min) / Extent).x;\n}}"
        );
    }
}

fn processor_prologue(input: &str, output: &str) -> String {
    format!(
        r#"    let Thread = {input}_GetThreadData(ThreadIndex);
    if (!Thread.valid) {{ return; }}
    if ({input}_IsPointRemoved(Thread.data_index, Thread.elem_index)) {{
        {output}_RemovePoint(Thread.data_index, Thread.elem_index);
        return;
    }}
    for (var Attribute: u32 = 0u; Attribute < 128u; Attribute = Attribute + 1u) {{
        let Src = {input}_AttributeHeader(Thread.data_index, Attribute);
        let Dst = {output}_AttributeHeader(Thread.data_index, Attribute);
        if (Src.y != 0u && Dst.y != 0u) {{
            let StrideWords = (Src.x & 0xffu) / 4u;
            for (var Word: u32 = 0u; Word < StrideWords; Word = Word + 1u) {{
                {output}_StoreWord(Dst.y / 4u + Thread.elem_index * StrideWords + Word,
                    {input}_LoadWord(Src.y / 4u + Thread.elem_index * StrideWords + Word));
            }}
        }}
    }}
"#
    )
}

fn generator_prologue(output: &str) -> String {
    format!(
        r#"    let Thread = {output}_GetThreadData(ThreadIndex);
    if (!Thread.valid) {{ return; }}
    {output}_InitializePoint(Thread.data_index, Thread.elem_index);
"#
    )
}

/// Generate the full WGSL module for one kernel.
pub fn cook_kernel_source(
    settings: &KernelSettings,
    bindings: &[PinBinding],
    meta_binding: u32,
    table: &AttributeTable,
) -> Result<CookedKernel> {
    let user_source = substitute_attribute_ids(settings, table)?;

    let binding_of = |label: &str, is_input: bool| -> Option<&PinBinding> {
        bindings
            .iter()
            .find(|b| b.pin == label && b.is_input == is_input)
    };

    let mut out = String::new();
    out.push_str("struct ThreadData {\n    valid: bool,\n    data_index: u32,\n    elem_index: u32,\n}\n\n");
    out.push_str("struct KernelMeta {\n    num_threads: u32,\n    seed: u32,\n    out_items: vec4<u32>,\n    bounds_min: vec3<f32>,\n    bounds_max: vec3<f32>,\n}\n");
    let _ = writeln!(
        out,
        "@group(0) @binding({meta_binding}) var<uniform> meta: KernelMeta;"
    );
    out.push_str("fn GetNumThreads() -> u32 { return meta.num_threads; }\n");
    out.push_str("fn GetSeed() -> u32 { return meta.seed; }\n");
    out.push_str("fn GetComponentBoundsMin() -> vec3<f32> { return meta.bounds_min; }\n");
    out.push_str("fn GetComponentBoundsMax() -> vec3<f32> { return meta.bounds_max; }\n\n");

    for pin in &settings.input_pins {
        let Some(binding) = binding_of(&pin.label, true) else {
            bail!(
                "kernel '{}': input pin '{}' has no buffer binding",
                settings.name,
                pin.label
            );
        };
        match pin.kind {
            PinKind::Collection => {
                write_pin_internals(&mut out, &pin.label, binding.binding, true);
                write_pin_num_data(&mut out, &pin.label, None);
                write_input_accessors(&mut out, &pin.label);
            }
            PinKind::Texture => {
                write_texture_accessors(&mut out, &pin.label, binding.binding, false);
            }
            PinKind::Landscape => {
                write_texture_accessors(&mut out, &pin.label, binding.binding, true);
            }
        }
        out.push('\n');
    }
    let mut out_components: Vec<(&str, &str)> = Vec::new();
    for pin in settings
        .output_pins
        .iter()
        .filter(|p| p.kind == PinKind::Collection)
    {
        let Some(binding) = binding_of(&pin.label, false) else {
            bail!(
                "kernel '{}': output pin '{}' has no buffer binding",
                settings.name,
                pin.label
            );
        };
        let Some(&component) = OUT_ITEM_COMPONENTS.get(out_components.len()) else {
            bail!(
                "kernel '{}': at most {} output collection pins are supported",
                settings.name,
                OUT_ITEM_COMPONENTS.len()
            );
        };
        out_components.push((pin.label.as_str(), component));
        write_pin_internals(&mut out, &pin.label, binding.binding, false);
        write_pin_num_data(&mut out, &pin.label, Some(component));
        write_output_accessors(&mut out, &pin.label);
        out.push('\n');
    }

    let _ = writeln!(out, "fn ExecuteThread(ThreadIndex: u32) {{\n{user_source}\n}}\n");

    let _ = writeln!(out, "@compute @workgroup_size({WORKGROUP_SIZE})");
    out.push_str("fn main(@builtin(global_invocation_id) gid: vec3<u32>) {\n");
    // Thread 0 stamps each output buffer's item count so readers can tell an
    // executed kernel from one that never ran.
    for (pin, component) in &out_components {
        let _ = writeln!(
            out,
            "    if (gid.x == 0u) {{ {pin}_StoreWord(0u, meta.out_items.{component}); }}"
        );
    }
    if !out_components.is_empty() {
        out.push_str("    storageBarrier();\n");
    }
    out.push_str("    let ThreadIndex = gid.x;\n");
    out.push_str("    if (ThreadIndex >= GetNumThreads()) { return; }\n");

    match &settings.kind {
        KernelKind::PointProcessor => {
            let input = settings
                .input_pins
                .iter()
                .find(|p| p.kind == PinKind::Collection);
            let output = settings
                .output_pins
                .iter()
                .find(|p| p.kind == PinKind::Collection);
            let (Some(input), Some(output)) = (input, output) else {
                bail!(
                    "kernel '{}': point processor needs collection pins on both sides",
                    settings.name
                );
            };
            out.push_str(&processor_prologue(&input.label, &output.label));
        }
        KernelKind::PointGenerator { .. } => {
            let Some(output) = settings
                .output_pins
                .iter()
                .find(|p| p.kind == PinKind::Collection)
            else {
                bail!(
                    "kernel '{}': point generator needs a collection output pin",
                    settings.name
                );
            };
            out.push_str(&generator_prologue(&output.label));
        }
        KernelKind::Custom => {}
    }

    out.push_str("    ExecuteThread(ThreadIndex);\n}\n");

    Ok(CookedKernel {
        source: out,
        entry_point: "main",
        workgroup_size: WORKGROUP_SIZE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::attrs::AttributeTableBuilder;
    use crate::codec::desc::RecordType;
    use crate::kernel::{BufferSizeMode, InputPin, OutputPin};

    fn processor(source: &str) -> KernelSettings {
        KernelSettings {
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
        }
    }

    fn bindings() -> Vec<PinBinding> {
        vec![
            PinBinding {
                pin: "In".into(),
                binding: 0,
                is_input: true,
            },
            PinBinding {
                pin: "Out".into(),
                binding: 1,
                is_input: false,
            },
        ]
    }

    #[test]
    fn attribute_names_are_replaced_by_global_ids() {
        let mut builder = AttributeTableBuilder::new();
        builder.register(AttributeKey::new(AttributeType::Float, "Weight"));
        let table = builder.freeze();

        let settings = processor("Out_SetFloat(0u, ThreadIndex, 'Weight', 2.0);");
        let cooked = cook_kernel_source(&settings, &bindings(), 2, &table).expect("cook");
        assert!(cooked.source.contains("Out_SetFloat(0u, ThreadIndex, 32u, 2.0);"));
        assert!(!cooked.source.contains("'Weight'"));
    }

    #[test]
    fn unregistered_attribute_fails_cooking() {
        let table = AttributeTableBuilder::new().freeze();
        let settings = processor("let x = In_GetFloat(0u, ThreadIndex, 'Missing');");
        assert!(cook_kernel_source(&settings, &bindings(), 2, &table).is_err());
    }

    #[test]
    fn cooked_source_stamps_output_headers() {
        let table = AttributeTableBuilder::new().freeze();
        let settings = processor("");
        let cooked = cook_kernel_source(&settings, &bindings(), 2, &table).expect("cook");
        assert!(cooked
            .source
            .contains("Out_StoreWord(0u, meta.out_items.x);"));
        assert!(cooked.source.contains("storageBarrier();"));
        assert_eq!(cooked.entry_point, "main");
    }
}
