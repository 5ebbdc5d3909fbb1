//! In-memory form of the data that crosses the accelerator boundary.
//!
//! The packed wire form lives in [`crate::codec`]; this module is the CPU-side
//! representation the packer consumes and the unpacker produces.

use crate::codec::attrs::{AttributeKey, AttributeType, AttributeValue};
use crate::codec::desc::RecordType;

/// One spatial record. Field defaults follow the accelerator-side
/// `InitializePoint` contract so generated and CPU-authored points agree.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub position: [f32; 3],
    /// Unit quaternion, xyzw.
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
    pub bounds_min: [f32; 3],
    pub bounds_max: [f32; 3],
    pub color: [f32; 4],
    pub density: f32,
    pub seed: i32,
    pub steepness: f32,
}

impl Default for Point {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0; 3],
            bounds_min: [-1.0; 3],
            bounds_max: [1.0; 3],
            color: [1.0; 4],
            density: 1.0,
            seed: 0,
            steepness: 1.0,
        }
    }
}

impl Point {
    pub fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

/// A custom attribute column: one value per element of the owning item.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedAttribute {
    pub key: AttributeKey,
    pub values: Vec<AttributeValue>,
}

impl NamedAttribute {
    pub fn new(ty: AttributeType, name: impl Into<String>, values: Vec<AttributeValue>) -> Self {
        Self {
            key: AttributeKey::new(ty, name),
            values,
        }
    }
}

/// One data item of a collection.
#[derive(Debug, Clone, PartialEq)]
pub enum DataItem {
    Points {
        points: Vec<Point>,
        attributes: Vec<NamedAttribute>,
    },
    AttributeSet {
        element_count: usize,
        attributes: Vec<NamedAttribute>,
    },
}

impl DataItem {
    pub fn points(points: Vec<Point>) -> Self {
        DataItem::Points {
            points,
            attributes: Vec::new(),
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            DataItem::Points { .. } => RecordType::Points,
            DataItem::AttributeSet { .. } => RecordType::AttributeSet,
        }
    }

    pub fn element_count(&self) -> usize {
        match self {
            DataItem::Points { points, .. } => points.len(),
            DataItem::AttributeSet { element_count, .. } => *element_count,
        }
    }

    pub fn attributes(&self) -> &[NamedAttribute] {
        match self {
            DataItem::Points { attributes, .. } => attributes,
            DataItem::AttributeSet { attributes, .. } => attributes,
        }
    }

    pub fn attributes_mut(&mut self) -> &mut Vec<NamedAttribute> {
        match self {
            DataItem::Points { attributes, .. } => attributes,
            DataItem::AttributeSet { attributes, .. } => attributes,
        }
    }

    pub fn find_attribute(&self, name: &str) -> Option<&NamedAttribute> {
        self.attributes().iter().find(|a| a.key.name == name)
    }
}

/// Everything flowing through one pin: zero or more data items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataCollection {
    pub items: Vec<DataItem>,
}

impl DataCollection {
    pub fn new(items: Vec<DataItem>) -> Self {
        Self { items }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total elements across items of the given record type.
    pub fn element_count(&self, record_type: RecordType) -> usize {
        self.items
            .iter()
            .filter(|item| item.record_type() == record_type)
            .map(DataItem::element_count)
            .sum()
    }

    /// Merge another collection's items after this one's.
    pub fn append(&mut self, mut other: DataCollection) {
        self.items.append(&mut other.items);
    }
}
