//! Unpacking kernel-written buffers back into data collections.
//!
//! The buffer came from a device and is untrusted: every address is bounds
//! checked and every disagreement with the descriptor is a recoverable
//! [`UnpackError`], never a panic. Callers typically turn a mismatch into an
//! empty output plus a diagnostic.

use thiserror::Error;

use crate::codec::attrs::{
    AttributeValue, BOUNDS_MAX_SLOT, BOUNDS_MIN_SLOT, COLOR_SLOT, DENSITY_SLOT, POSITION_SLOT,
    ROTATION_SLOT, SCALE_SLOT, SEED_SLOT, STEEPNESS_SLOT,
};
use crate::codec::desc::{DataCollectionDesc, DataDesc, RecordType};
use crate::data::{DataCollection, DataItem, NamedAttribute, Point};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnpackError {
    /// The buffer disagrees with the descriptor about its shape. Recoverable:
    /// the caller substitutes an empty collection and reports a diagnostic.
    #[error("buffer declares {declared} {what}, descriptor expects {expected}")]
    DataMismatch {
        what: &'static str,
        declared: u32,
        expected: u32,
    },
    /// An address or payload extent points outside the buffer.
    #[error("packed data address out of bounds: {address} (buffer is {buffer_bytes} bytes)")]
    OutOfBounds { address: u32, buffer_bytes: u32 },
    /// The buffer is smaller than its own header claims.
    #[error("buffer truncated: need {needed} words, have {have}")]
    Truncated { needed: usize, have: usize },
}

fn read_payload(
    words: &[u32],
    address: u32,
    stride_words: u32,
    count: usize,
) -> Result<Vec<&[u32]>, UnpackError> {
    let buffer_bytes = (words.len() * 4) as u32;
    let total_words = stride_words as usize * count;
    let start = (address / 4) as usize;
    if address % 4 != 0 || start + total_words > words.len() {
        return Err(UnpackError::OutOfBounds {
            address,
            buffer_bytes,
        });
    }
    Ok(words[start..start + total_words]
        .chunks_exact(stride_words as usize)
        .collect())
}

fn normalized_quat(q: [f32; 4]) -> [f32; 4] {
    let norm = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    if norm.is_finite() && norm > f32::EPSILON {
        [q[0] / norm, q[1] / norm, q[2] / norm, q[3] / norm]
    } else {
        [0.0, 0.0, 0.0, 1.0]
    }
}

fn apply_point_value(point: &mut Point, slot: u32, value: AttributeValue) {
    match (slot, value) {
        (POSITION_SLOT, AttributeValue::Float3(v)) => point.position = v,
        (ROTATION_SLOT, AttributeValue::Quat(q)) => point.rotation = normalized_quat(q),
        (SCALE_SLOT, AttributeValue::Float3(v)) => point.scale = v,
        (BOUNDS_MIN_SLOT, AttributeValue::Float3(v)) => point.bounds_min = v,
        (BOUNDS_MAX_SLOT, AttributeValue::Float3(v)) => point.bounds_max = v,
        (COLOR_SLOT, AttributeValue::Float4(v)) => point.color = v,
        (DENSITY_SLOT, AttributeValue::Float(v)) => point.density = v,
        (SEED_SLOT, AttributeValue::Int(v)) => point.seed = v,
        (STEEPNESS_SLOT, AttributeValue::Float(v)) => point.steepness = v,
        _ => {}
    }
}

fn unpack_item(
    desc: &DataDesc,
    words: &[u32],
    header_word: usize,
) -> Result<DataItem, UnpackError> {
    let declared_type = words[header_word];
    if declared_type != desc.record_type.type_id() {
        return Err(UnpackError::DataMismatch {
            what: "type id",
            declared: declared_type,
            expected: desc.record_type.type_id(),
        });
    }
    let declared_elements = words[header_word + 3];
    if declared_elements != desc.element_count as u32 {
        return Err(UnpackError::DataMismatch {
            what: "elements",
            declared: declared_elements,
            expected: desc.element_count as u32,
        });
    }
    let count = desc.element_count;

    let mut points = vec![Point::default(); count];
    let mut attributes: Vec<NamedAttribute> = Vec::new();

    for attr in &desc.attributes {
        let slot_word =
            header_word + (DataDesc::attribute_header_offset(attr.index) / 4) as usize;
        if slot_word + 1 >= words.len() {
            return Err(UnpackError::Truncated {
                needed: slot_word + 2,
                have: words.len(),
            });
        }
        let payload_address = words[slot_word + 1];
        if payload_address == 0 {
            // Absent attribute: intrinsics keep their defaults, custom
            // columns are simply not materialized.
            continue;
        }

        let elements = read_payload(words, payload_address, attr.ty.stride_words(), count)?;
        if attr.is_intrinsic() {
            for (point, element) in points.iter_mut().zip(&elements) {
                apply_point_value(point, attr.index, AttributeValue::read_words(attr.ty, element));
            }
        } else {
            let values = elements
                .iter()
                .map(|element| AttributeValue::read_words(attr.ty, element))
                .collect();
            attributes.push(NamedAttribute::new(attr.ty, attr.name.clone(), values));
        }
    }

    Ok(match desc.record_type {
        RecordType::Points => {
            // Records a kernel marked invalid carry a non-finite density and
            // are dropped, together with their custom attribute values.
            let keep: Vec<bool> = points.iter().map(|p| p.density.is_finite()).collect();
            if keep.iter().any(|k| !k) {
                points = points
                    .into_iter()
                    .zip(&keep)
                    .filter_map(|(p, keep)| keep.then_some(p))
                    .collect();
                for attr in &mut attributes {
                    attr.values = std::mem::take(&mut attr.values)
                        .into_iter()
                        .zip(&keep)
                        .filter_map(|(v, keep)| keep.then_some(v))
                        .collect();
                }
            }
            DataItem::Points { points, attributes }
        }
        RecordType::AttributeSet => DataItem::AttributeSet {
            element_count: count,
            attributes,
        },
    })
}

/// Unpack a device-written buffer against the descriptor it was allocated
/// with. An item count of zero means the producing kernel never ran; that is
/// a well-formed empty collection, not a mismatch.
pub fn unpack_collection(
    desc: &DataCollectionDesc,
    words: &[u32],
) -> Result<DataCollection, UnpackError> {
    if words.is_empty() {
        return Err(UnpackError::Truncated {
            needed: 1,
            have: 0,
        });
    }
    let declared_items = words[0];
    if declared_items == 0 {
        return Ok(DataCollection::empty());
    }
    if declared_items as usize != desc.data.len() {
        return Err(UnpackError::DataMismatch {
            what: "items",
            declared: declared_items,
            expected: desc.data.len() as u32,
        });
    }
    if words.len() < 1 + desc.data.len() {
        return Err(UnpackError::Truncated {
            needed: 1 + desc.data.len(),
            have: words.len(),
        });
    }

    let mut items = Vec::with_capacity(desc.data.len());
    for (index, item_desc) in desc.data.iter().enumerate() {
        let address = words[1 + index];
        let header_word = (address / 4) as usize;
        let header_words = (crate::codec::DATA_HEADER_SIZE_BYTES / 4) as usize;
        if address % 4 != 0 || header_word + header_words > words.len() {
            return Err(UnpackError::OutOfBounds {
                address,
                buffer_bytes: (words.len() * 4) as u32,
            });
        }
        items.push(unpack_item(item_desc, words, header_word)?);
    }

    Ok(DataCollection::new(items))
}
