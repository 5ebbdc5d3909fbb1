//! Packing data collections into the flat word buffer kernels read.
//!
//! Buffer layout, all addresses in bytes:
//!
//! ```text
//! word 0                item count
//! words 1..=N           byte address of each item's header
//! per item header       type id | attribute count | preamble size | element count
//!                       then one 8-byte slot per attribute id 0..MAX_ATTRS:
//!                       (global index << 8 | stride bytes, payload address)
//! payload               tightly packed value arrays, one per present attribute
//! ```
//!
//! A zero payload address marks an absent attribute; slot ids make lookup in
//! generated kernel code a direct index, no search.

use anyhow::{bail, Result};

use crate::codec::attrs::{
    AttributeValue, BOUNDS_MAX_SLOT, BOUNDS_MIN_SLOT, COLOR_SLOT, DENSITY_SLOT, POSITION_SLOT,
    ROTATION_SLOT, SCALE_SLOT, SEED_SLOT, STEEPNESS_SLOT,
};
use crate::codec::desc::{DataCollectionDesc, DataDesc};
use crate::codec::DATA_PREAMBLE_SIZE_BYTES;
use crate::data::{DataCollection, DataItem, Point};

/// Word offsets of the payload array of each attribute of each item, in
/// descriptor order. Produced while stamping headers so the packer can fill
/// payloads without recomputing addresses.
struct PackedLayout {
    /// `payload_words[item][attr]` = first payload word of that attribute.
    payload_words: Vec<Vec<usize>>,
}

/// Write the collection address table and every item header into `words`,
/// leaving word 0 (item count) untouched.
fn stamp_headers(words: &mut [u32], desc: &DataCollectionDesc) -> PackedLayout {
    let addresses = desc.item_addresses();
    for (i, address) in addresses.iter().enumerate() {
        words[1 + i] = *address;
    }

    let mut payload_words = Vec::with_capacity(desc.data.len());
    for (item_desc, address) in desc.data.iter().zip(&addresses) {
        let header_word = (*address / 4) as usize;
        words[header_word] = item_desc.record_type.type_id();
        words[header_word + 1] = item_desc.attributes.len() as u32;
        words[header_word + 2] = DATA_PREAMBLE_SIZE_BYTES;
        words[header_word + 3] = item_desc.element_count as u32;

        let mut payload_address = address + crate::codec::DATA_HEADER_SIZE_BYTES;
        let mut item_payload_words = Vec::with_capacity(item_desc.attributes.len());
        for attr in &item_desc.attributes {
            let slot_word =
                header_word + (DataDesc::attribute_header_offset(attr.index) / 4) as usize;
            words[slot_word] = (attr.index << 8) | attr.ty.stride_bytes();
            words[slot_word + 1] = payload_address;
            item_payload_words.push((payload_address / 4) as usize);
            payload_address += attr.ty.stride_bytes() * item_desc.element_count as u32;
        }
        payload_words.push(item_payload_words);
    }

    PackedLayout { payload_words }
}

/// Value of an intrinsic point property slot. Reserved slots without an
/// assigned property (9..32) return `None` and pack as zeroes.
pub(crate) fn point_value(point: &Point, slot: u32) -> Option<AttributeValue> {
    Some(match slot {
        POSITION_SLOT => AttributeValue::Float3(point.position),
        ROTATION_SLOT => AttributeValue::Quat(point.rotation),
        SCALE_SLOT => AttributeValue::Float3(point.scale),
        BOUNDS_MIN_SLOT => AttributeValue::Float3(point.bounds_min),
        BOUNDS_MAX_SLOT => AttributeValue::Float3(point.bounds_max),
        COLOR_SLOT => AttributeValue::Float4(point.color),
        DENSITY_SLOT => AttributeValue::Float(point.density),
        SEED_SLOT => AttributeValue::Int(point.seed),
        STEEPNESS_SLOT => AttributeValue::Float(point.steepness),
        _ => return None,
    })
}

/// Pack a collection into the wire form described by `desc`. The descriptor
/// must have been computed from the same collection (or a superset shape);
/// shape disagreements are caller bugs, not runtime data errors.
pub fn pack_collection(desc: &DataCollectionDesc, collection: &DataCollection) -> Result<Vec<u32>> {
    if desc.data.len() != collection.items.len() {
        bail!(
            "descriptor has {} items, collection has {}",
            desc.data.len(),
            collection.items.len()
        );
    }

    let mut words = vec![0u32; desc.packed_size_words()?];
    words[0] = collection.items.len() as u32;
    let layout = stamp_headers(&mut words, desc);

    for (item_index, (item_desc, item)) in desc.data.iter().zip(&collection.items).enumerate() {
        if item_desc.record_type != item.record_type()
            || item_desc.element_count != item.element_count()
        {
            bail!("descriptor/item shape mismatch at item {item_index}");
        }

        for (attr_index, attr) in item_desc.attributes.iter().enumerate() {
            let mut payload = Vec::with_capacity(
                (attr.ty.stride_words() as usize) * item_desc.element_count,
            );
            if attr.is_intrinsic() {
                let DataItem::Points { points, .. } = item else {
                    bail!(
                        "intrinsic attribute '{}' on non-point item {item_index}",
                        attr.name
                    );
                };
                for point in points {
                    let Some(value) = point_value(point, attr.index) else {
                        break;
                    };
                    value.write_words(&mut payload);
                }
            } else {
                let Some(column) = item.find_attribute(&attr.name) else {
                    bail!("item {item_index} is missing attribute '{}'", attr.name);
                };
                if column.key.ty != attr.ty || column.values.len() != item_desc.element_count {
                    bail!("attribute '{}' does not match its descriptor", attr.name);
                }
                for value in &column.values {
                    value.write_words(&mut payload);
                }
            }

            let start = layout.payload_words[item_index][attr_index];
            words[start..start + payload.len()].copy_from_slice(&payload);
        }
    }

    Ok(words)
}

/// Build the buffer a kernel writes its output into: correct size, every
/// header stamped so generated code can address payloads, item count left at
/// zero until the kernel's header-writer pass runs on the device.
pub fn prepare_for_kernel_output(desc: &DataCollectionDesc) -> Result<Vec<u32>> {
    let mut words = vec![0u32; desc.packed_size_words()?];
    stamp_headers(&mut words, desc);
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::attrs::{AttributeDesc, AttributeType, NUM_RESERVED_ATTRS};
    use crate::codec::desc::RecordType;
    use crate::data::NamedAttribute;

    #[test]
    fn header_slots_encode_index_and_stride() {
        let desc = DataCollectionDesc::new(vec![DataDesc::new(RecordType::Points, 1)]);
        let words = pack_collection(&desc, &DataCollection::new(vec![DataItem::points(vec![
            Point::default(),
        ])]))
        .expect("pack");

        assert_eq!(words[0], 1);
        let header = (words[1] / 4) as usize;
        assert_eq!(words[header], 0); // points type id
        assert_eq!(words[header + 1], 9); // intrinsics only
        assert_eq!(words[header + 2], DATA_PREAMBLE_SIZE_BYTES);
        assert_eq!(words[header + 3], 1);

        // Position slot: index 0, stride 12, non-zero payload address.
        let slot = header + (DataDesc::attribute_header_offset(0) / 4) as usize;
        assert_eq!(words[slot], 12);
        assert_ne!(words[slot + 1], 0);

        // Unused slot 9 stays zeroed (absent marker).
        let unused = header + (DataDesc::attribute_header_offset(9) / 4) as usize;
        assert_eq!(words[unused], 0);
        assert_eq!(words[unused + 1], 0);
    }

    #[test]
    fn kernel_output_buffer_has_zero_item_count_but_live_headers() {
        let mut item = DataDesc::new(RecordType::AttributeSet, 5);
        item.attributes.push(AttributeDesc::new(
            NUM_RESERVED_ATTRS as u32,
            AttributeType::Int,
            "Count",
        ));
        let desc = DataCollectionDesc::new(vec![item]);
        let words = prepare_for_kernel_output(&desc).expect("prepare");

        assert_eq!(words[0], 0);
        let header = (words[1] / 4) as usize;
        assert_eq!(words[header], 1); // attribute set type id
        assert_eq!(words[header + 3], 5);
        let slot = header
            + (DataDesc::attribute_header_offset(NUM_RESERVED_ATTRS as u32) / 4) as usize;
        assert_eq!(words[slot], ((NUM_RESERVED_ATTRS as u32) << 8) | 4);
    }

    #[test]
    fn reserved_slot_without_backing_property_packs_zeroes() {
        let mut item = DataDesc::new(RecordType::Points, 1);
        item.attributes
            .push(AttributeDesc::new(9, AttributeType::Float, "Spare"));
        let desc = DataCollectionDesc::new(vec![item]);
        let collection =
            DataCollection::new(vec![DataItem::points(vec![Point::default()])]);
        let words = pack_collection(&desc, &collection).expect("pack");

        let header = (words[1] / 4) as usize;
        let slot = header + (DataDesc::attribute_header_offset(9) / 4) as usize;
        assert_eq!(words[slot], (9 << 8) | 4);
        let payload = (words[slot + 1] / 4) as usize;
        assert_eq!(words[payload], 0);
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let desc = DataCollectionDesc::new(vec![DataDesc::new(RecordType::Points, 2)]);
        let collection = DataCollection::new(vec![DataItem::AttributeSet {
            element_count: 2,
            attributes: vec![NamedAttribute::new(
                AttributeType::Float,
                "W",
                vec![AttributeValue::Float(0.0); 2],
            )],
        }]);
        assert!(pack_collection(&desc, &collection).is_err());
    }
}
