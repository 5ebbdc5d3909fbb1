//! Attribute types, values, and the per-program attribute lookup table.
//!
//! Attribute ids are global to one compute program. Ids 0..NUM_RESERVED_ATTRS
//! are reserved for intrinsic point properties (only 0..=8 are currently
//! assigned); custom attributes are handed ids from NUM_RESERVED_ATTRS upward
//! in first-seen order during program assembly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Ids 0..32 are reserved for intrinsic point properties.
pub const NUM_RESERVED_ATTRS: usize = 32;
/// Total attribute id space; every packed item header carries one slot per id.
pub const MAX_ATTRS: usize = 128;

/// Closed set of element types an attribute can carry across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    Bool,
    Int,
    Float,
    Float2,
    Float3,
    Float4,
    Rotator,
    Quat,
    Transform,
}

impl AttributeType {
    /// Packed stride per element, in bytes. Bool widens to a full word;
    /// Transform is a row-major 4x4 f32 matrix.
    pub fn stride_bytes(self) -> u32 {
        match self {
            AttributeType::Bool | AttributeType::Int | AttributeType::Float => 4,
            AttributeType::Float2 => 8,
            AttributeType::Float3 | AttributeType::Rotator => 12,
            AttributeType::Float4 | AttributeType::Quat => 16,
            AttributeType::Transform => 64,
        }
    }

    pub fn stride_words(self) -> u32 {
        self.stride_bytes() / 4
    }

    /// Type suffix used by the kernel accessor surface (`In_GetFloat`, ...).
    pub fn token(self) -> &'static str {
        match self {
            AttributeType::Bool => "Bool",
            AttributeType::Int => "Int",
            AttributeType::Float => "Float",
            AttributeType::Float2 => "Float2",
            AttributeType::Float3 => "Float3",
            AttributeType::Float4 => "Float4",
            AttributeType::Rotator => "Rotator",
            AttributeType::Quat => "Quat",
            AttributeType::Transform => "Transform",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "Bool" => AttributeType::Bool,
            "Int" => AttributeType::Int,
            "Float" => AttributeType::Float,
            "Float2" => AttributeType::Float2,
            "Float3" => AttributeType::Float3,
            "Float4" => AttributeType::Float4,
            "Rotator" => AttributeType::Rotator,
            "Quat" => AttributeType::Quat,
            "Transform" => AttributeType::Transform,
            _ => return None,
        })
    }

    /// WGSL spelling of the element type for generated accessors.
    pub fn wgsl_type(self) -> &'static str {
        match self {
            AttributeType::Bool => "bool",
            AttributeType::Int => "i32",
            AttributeType::Float => "f32",
            AttributeType::Float2 => "vec2<f32>",
            AttributeType::Float3 | AttributeType::Rotator => "vec3<f32>",
            AttributeType::Float4 | AttributeType::Quat => "vec4<f32>",
            AttributeType::Transform => "mat4x4<f32>",
        }
    }
}

/// A typed attribute value. One variant per [`AttributeType`].
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Float2([f32; 2]),
    Float3([f32; 3]),
    Float4([f32; 4]),
    Rotator([f32; 3]),
    Quat([f32; 4]),
    Transform([f32; 16]),
}

impl AttributeValue {
    pub fn ty(&self) -> AttributeType {
        match self {
            AttributeValue::Bool(_) => AttributeType::Bool,
            AttributeValue::Int(_) => AttributeType::Int,
            AttributeValue::Float(_) => AttributeType::Float,
            AttributeValue::Float2(_) => AttributeType::Float2,
            AttributeValue::Float3(_) => AttributeType::Float3,
            AttributeValue::Float4(_) => AttributeType::Float4,
            AttributeValue::Rotator(_) => AttributeType::Rotator,
            AttributeValue::Quat(_) => AttributeType::Quat,
            AttributeValue::Transform(_) => AttributeType::Transform,
        }
    }

    pub fn zeroed(ty: AttributeType) -> Self {
        match ty {
            AttributeType::Bool => AttributeValue::Bool(false),
            AttributeType::Int => AttributeValue::Int(0),
            AttributeType::Float => AttributeValue::Float(0.0),
            AttributeType::Float2 => AttributeValue::Float2([0.0; 2]),
            AttributeType::Float3 => AttributeValue::Float3([0.0; 3]),
            AttributeType::Float4 => AttributeValue::Float4([0.0; 4]),
            AttributeType::Rotator => AttributeValue::Rotator([0.0; 3]),
            AttributeType::Quat => AttributeValue::Quat([0.0, 0.0, 0.0, 1.0]),
            AttributeType::Transform => {
                let mut m = [0.0; 16];
                m[0] = 1.0;
                m[5] = 1.0;
                m[10] = 1.0;
                m[15] = 1.0;
                AttributeValue::Transform(m)
            }
        }
    }

    /// Append the packed words of this value.
    pub fn write_words(&self, out: &mut Vec<u32>) {
        match self {
            AttributeValue::Bool(b) => out.push(u32::from(*b)),
            AttributeValue::Int(i) => out.push(*i as u32),
            AttributeValue::Float(f) => out.push(f.to_bits()),
            AttributeValue::Float2(v) => out.extend(v.iter().map(|f| f.to_bits())),
            AttributeValue::Float3(v) | AttributeValue::Rotator(v) => {
                out.extend(v.iter().map(|f| f.to_bits()))
            }
            AttributeValue::Float4(v) | AttributeValue::Quat(v) => {
                out.extend(v.iter().map(|f| f.to_bits()))
            }
            AttributeValue::Transform(m) => out.extend(m.iter().map(|f| f.to_bits())),
        }
    }

    /// Read one value of `ty` from packed words. `words` must hold at least
    /// `ty.stride_words()` entries.
    pub fn read_words(ty: AttributeType, words: &[u32]) -> Self {
        let f = |i: usize| f32::from_bits(words[i]);
        match ty {
            AttributeType::Bool => AttributeValue::Bool(words[0] != 0),
            AttributeType::Int => AttributeValue::Int(words[0] as i32),
            AttributeType::Float => AttributeValue::Float(f(0)),
            AttributeType::Float2 => AttributeValue::Float2([f(0), f(1)]),
            AttributeType::Float3 => AttributeValue::Float3([f(0), f(1), f(2)]),
            AttributeType::Rotator => AttributeValue::Rotator([f(0), f(1), f(2)]),
            AttributeType::Float4 => AttributeValue::Float4([f(0), f(1), f(2), f(3)]),
            AttributeType::Quat => AttributeValue::Quat([f(0), f(1), f(2), f(3)]),
            AttributeType::Transform => {
                let mut m = [0.0; 16];
                for (i, slot) in m.iter_mut().enumerate() {
                    *slot = f(i);
                }
                AttributeValue::Transform(m)
            }
        }
    }
}

/// Identity of an attribute within a program: name + type. The same name with
/// two different types is two distinct table entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeKey {
    pub ty: AttributeType,
    pub name: String,
}

impl AttributeKey {
    pub fn new(ty: AttributeType, name: impl Into<String>) -> Self {
        Self {
            ty,
            name: name.into(),
        }
    }
}

/// An attribute bound to its global id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDesc {
    pub index: u32,
    pub ty: AttributeType,
    pub name: String,
}

impl AttributeDesc {
    pub fn new(index: u32, ty: AttributeType, name: impl Into<String>) -> Self {
        Self {
            index,
            ty,
            name: name.into(),
        }
    }

    pub fn key(&self) -> AttributeKey {
        AttributeKey::new(self.ty, self.name.clone())
    }

    pub fn is_intrinsic(&self) -> bool {
        (self.index as usize) < NUM_RESERVED_ATTRS
    }
}

/// Intrinsic point property slots, in id order starting at 0.
pub const INTRINSIC_ATTRS: [(&str, AttributeType); 9] = [
    ("Position", AttributeType::Float3),
    ("Rotation", AttributeType::Quat),
    ("Scale", AttributeType::Float3),
    ("BoundsMin", AttributeType::Float3),
    ("BoundsMax", AttributeType::Float3),
    ("Color", AttributeType::Float4),
    ("Density", AttributeType::Float),
    ("Seed", AttributeType::Int),
    ("Steepness", AttributeType::Float),
];

pub const POSITION_SLOT: u32 = 0;
pub const ROTATION_SLOT: u32 = 1;
pub const SCALE_SLOT: u32 = 2;
pub const BOUNDS_MIN_SLOT: u32 = 3;
pub const BOUNDS_MAX_SLOT: u32 = 4;
pub const COLOR_SLOT: u32 = 5;
pub const DENSITY_SLOT: u32 = 6;
pub const SEED_SLOT: u32 = 7;
pub const STEEPNESS_SLOT: u32 = 8;

/// Descriptors for every intrinsic point property slot.
pub fn intrinsic_point_attrs() -> Vec<AttributeDesc> {
    INTRINSIC_ATTRS
        .iter()
        .enumerate()
        .map(|(slot, (name, ty))| AttributeDesc::new(slot as u32, *ty, *name))
        .collect()
}

/// Mutable attribute table used while a program is assembled. Custom keys get
/// ids from NUM_RESERVED_ATTRS upward in first-seen order; once the program is
/// built the table is frozen into an immutable [`AttributeTable`].
#[derive(Debug, Default)]
pub struct AttributeTableBuilder {
    entries: Vec<AttributeKey>,
    indices: HashMap<AttributeKey, u32>,
}

impl AttributeTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom attribute key and return its global id. Re-registering
    /// a known key returns the existing id. Returns `None` when the table is
    /// full; the attribute is dropped from the program in that case.
    pub fn register(&mut self, key: AttributeKey) -> Option<u32> {
        if let Some(index) = self.indices.get(&key) {
            return Some(*index);
        }
        let index = NUM_RESERVED_ATTRS + self.entries.len();
        if index >= MAX_ATTRS {
            warn!(
                target: "compute",
                name = %key.name,
                "attribute table full ({MAX_ATTRS} ids), dropping attribute"
            );
            return None;
        }
        self.entries.push(key.clone());
        self.indices.insert(key, index as u32);
        Some(index as u32)
    }

    pub fn freeze(self) -> AttributeTable {
        AttributeTable {
            entries: self.entries,
            indices: self.indices,
        }
    }
}

/// Immutable name/type -> global id table owned by a compute program.
#[derive(Debug, Default, Clone)]
pub struct AttributeTable {
    entries: Vec<AttributeKey>,
    indices: HashMap<AttributeKey, u32>,
}

impl AttributeTable {
    pub fn index_of(&self, key: &AttributeKey) -> Option<u32> {
        self.indices.get(key).copied()
    }

    /// Custom entries in id order, paired with their global ids.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &AttributeKey)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, key)| ((NUM_RESERVED_ATTRS + i) as u32, key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_ids_start_after_reserved_range_and_dedup() {
        let mut builder = AttributeTableBuilder::new();
        let a = builder.register(AttributeKey::new(AttributeType::Float, "Weight"));
        let b = builder.register(AttributeKey::new(AttributeType::Int, "Count"));
        let a_again = builder.register(AttributeKey::new(AttributeType::Float, "Weight"));
        assert_eq!(a, Some(32));
        assert_eq!(b, Some(33));
        assert_eq!(a_again, Some(32));

        // Same name, different type is a distinct entry.
        let a_int = builder.register(AttributeKey::new(AttributeType::Int, "Weight"));
        assert_eq!(a_int, Some(34));
    }

    #[test]
    fn table_rejects_overflow() {
        let mut builder = AttributeTableBuilder::new();
        for i in 0..(MAX_ATTRS - NUM_RESERVED_ATTRS) {
            assert!(builder
                .register(AttributeKey::new(AttributeType::Float, format!("a{i}")))
                .is_some());
        }
        assert!(builder
            .register(AttributeKey::new(AttributeType::Float, "overflow"))
            .is_none());

        let table = builder.freeze();
        assert_eq!(table.len(), MAX_ATTRS - NUM_RESERVED_ATTRS);
        assert_eq!(
            table.index_of(&AttributeKey::new(AttributeType::Float, "a0")),
            Some(32)
        );
    }

    #[test]
    fn strides_match_packed_layout() {
        assert_eq!(AttributeType::Bool.stride_bytes(), 4);
        assert_eq!(AttributeType::Rotator.stride_bytes(), 12);
        assert_eq!(AttributeType::Quat.stride_bytes(), 16);
        assert_eq!(AttributeType::Transform.stride_bytes(), 64);
    }

    #[test]
    fn value_words_round_trip() {
        let v = AttributeValue::Float3([1.0, -2.5, 3.25]);
        let mut words = Vec::new();
        v.write_words(&mut words);
        assert_eq!(words.len(), 3);
        assert_eq!(AttributeValue::read_words(AttributeType::Float3, &words), v);
    }
}
