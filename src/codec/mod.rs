//! Binary codec for accelerator data collections.
//!
//! A data collection crosses the CPU/accelerator boundary as a flat `u32`
//! buffer: a collection header (item count + per-item byte addresses), one
//! fixed-size header per item with a slot for every attribute id, and the
//! tightly packed payload arrays. [`pack`] and [`unpack`] implement the two
//! directions; [`attrs`] owns the type/stride/slot rules and [`desc`] the
//! size/address arithmetic both sides share.

pub mod attrs;
pub mod desc;
pub mod pack;
pub mod unpack;

pub use attrs::{
    AttributeDesc, AttributeKey, AttributeTable, AttributeTableBuilder, AttributeType,
    AttributeValue, MAX_ATTRS, NUM_RESERVED_ATTRS,
};
pub use desc::{DataCollectionDesc, DataDesc, RecordType};
pub use pack::{pack_collection, prepare_for_kernel_output};
pub use unpack::{unpack_collection, UnpackError};

/// Bytes per attribute header slot: one packed (index, stride) word and one
/// payload address word.
pub const ATTRIBUTE_HEADER_SIZE_BYTES: u32 = 8;

/// Bytes of per-item preamble before the attribute header slots: type id,
/// attribute count, preamble size, type info.
pub const DATA_PREAMBLE_SIZE_BYTES: u32 = 16;

/// Full per-item header: preamble plus one slot for every attribute id.
pub const DATA_HEADER_SIZE_BYTES: u32 =
    DATA_PREAMBLE_SIZE_BYTES + attrs::MAX_ATTRS as u32 * ATTRIBUTE_HEADER_SIZE_BYTES;
