//! Descriptors for packed data collections.
//!
//! Both sides of the boundary share the same arithmetic: the packer writes
//! addresses a descriptor predicts, generated kernel code reads them, and the
//! unpacker checks the buffer against the descriptor it was given.

use anyhow::{bail, Result};

use crate::codec::attrs::{intrinsic_point_attrs, AttributeDesc, AttributeTable};
use crate::codec::{ATTRIBUTE_HEADER_SIZE_BYTES, DATA_HEADER_SIZE_BYTES};
use crate::data::DataItem;

/// Wire type id of a data item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum RecordType {
    Points,
    AttributeSet,
}

impl RecordType {
    pub fn type_id(self) -> u32 {
        match self {
            RecordType::Points => 0,
            RecordType::AttributeSet => 1,
        }
    }

    pub fn from_type_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(RecordType::Points),
            1 => Some(RecordType::AttributeSet),
            _ => None,
        }
    }
}

/// Shape of one packed data item.
#[derive(Debug, Clone, PartialEq)]
pub struct DataDesc {
    pub record_type: RecordType,
    pub element_count: usize,
    /// Every attribute present on the item, intrinsics included, each bound
    /// to its global id.
    pub attributes: Vec<AttributeDesc>,
}

impl DataDesc {
    pub fn new(record_type: RecordType, element_count: usize) -> Self {
        let attributes = match record_type {
            RecordType::Points => intrinsic_point_attrs(),
            RecordType::AttributeSet => Vec::new(),
        };
        Self {
            record_type,
            element_count,
            attributes,
        }
    }

    /// Describe an in-memory item. Custom attributes resolve their global id
    /// through the program's attribute table; attributes the table does not
    /// know are not part of the program and are left out of the packed form.
    pub fn describe(item: &DataItem, table: &AttributeTable) -> Self {
        let mut desc = Self::new(item.record_type(), item.element_count());
        for attr in item.attributes() {
            if let Some(index) = table.index_of(&attr.key) {
                desc.attributes
                    .push(AttributeDesc::new(index, attr.key.ty, attr.key.name.clone()));
            }
        }
        desc
    }

    /// Header + payload bytes of this item when packed. Computed in `u64`;
    /// whether the result fits a wire address is checked per collection.
    pub fn packed_size_bytes(&self) -> u64 {
        let payload: u64 = self
            .attributes
            .iter()
            .map(|a| a.ty.stride_bytes() as u64 * self.element_count as u64)
            .sum();
        DATA_HEADER_SIZE_BYTES as u64 + payload
    }

    /// Byte offset of an attribute header slot within this item's header.
    pub fn attribute_header_offset(slot: u32) -> u32 {
        crate::codec::DATA_PREAMBLE_SIZE_BYTES + slot * ATTRIBUTE_HEADER_SIZE_BYTES
    }

    pub fn find_attribute(&self, name: &str) -> Option<&AttributeDesc> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Shape of a whole packed collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataCollectionDesc {
    pub data: Vec<DataDesc>,
}

impl DataCollectionDesc {
    pub fn new(data: Vec<DataDesc>) -> Self {
        Self { data }
    }

    /// Bytes of the collection header: item count plus one address per item.
    pub fn collection_header_size_bytes(&self) -> u64 {
        4 * (1 + self.data.len() as u64)
    }

    /// Byte address of each item's header, in item order. Addresses are only
    /// meaningful once [`Self::packed_size_words`] has accepted the size.
    pub fn item_addresses(&self) -> Vec<u32> {
        let mut addresses = Vec::with_capacity(self.data.len());
        let mut cursor = self.collection_header_size_bytes();
        for desc in &self.data {
            addresses.push(cursor as u32);
            cursor += desc.packed_size_bytes();
        }
        addresses
    }

    pub fn packed_size_bytes(&self) -> u64 {
        self.collection_header_size_bytes()
            + self.data.iter().map(DataDesc::packed_size_bytes).sum::<u64>()
    }

    /// Buffer size in words. Every address in the wire format is a `u32` byte
    /// offset, so a collection past that range cannot be packed at all.
    pub fn packed_size_words(&self) -> Result<usize> {
        let bytes = self.packed_size_bytes();
        if bytes > u32::MAX as u64 {
            bail!("packed collection needs {bytes} bytes, past the addressable range");
        }
        Ok((bytes / 4) as usize)
    }

    /// Total elements across items of the given record type.
    pub fn element_count_for(&self, record_type: RecordType) -> usize {
        self.data
            .iter()
            .filter(|d| d.record_type == record_type)
            .map(|d| d.element_count)
            .sum()
    }

    /// Append another collection's items after this one's.
    pub fn combine(&mut self, mut other: DataCollectionDesc) {
        self.data.append(&mut other.data);
    }
}
