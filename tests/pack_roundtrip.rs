use node_forge_compute::codec::{
    pack_collection, prepare_for_kernel_output, unpack_collection, AttributeDesc, AttributeType,
    AttributeValue, DataCollectionDesc, DataDesc, RecordType, NUM_RESERVED_ATTRS,
};
use node_forge_compute::{DataCollection, DataItem, NamedAttribute, Point};
use proptest::prelude::*;

fn weighted_desc(element_count: usize) -> DataCollectionDesc {
    let mut item = DataDesc::new(RecordType::Points, element_count);
    item.attributes.push(AttributeDesc::new(
        NUM_RESERVED_ATTRS as u32,
        AttributeType::Float,
        "Weight",
    ));
    DataCollectionDesc::new(vec![item])
}

fn weighted_collection(points: Vec<Point>, weights: Vec<f32>) -> DataCollection {
    let values = weights.into_iter().map(AttributeValue::Float).collect();
    DataCollection::new(vec![DataItem::Points {
        points,
        attributes: vec![NamedAttribute::new(AttributeType::Float, "Weight", values)],
    }])
}

#[test]
fn weight_floats_survive_bit_exact() {
    // Values a lossy float path would mangle: negative zero, subnormals,
    // extremes, infinities and a NaN payload.
    let weights = vec![
        0.0f32,
        -0.0,
        f32::MIN_POSITIVE,
        f32::from_bits(1), // smallest subnormal
        f32::MAX,
        f32::MIN,
        f32::INFINITY,
        f32::NEG_INFINITY,
        f32::from_bits(0x7fc0_1234), // NaN with payload bits
    ];
    let points = vec![Point::default(); weights.len()];
    let desc = weighted_desc(weights.len());
    let collection = weighted_collection(points, weights.clone());

    let words = pack_collection(&desc, &collection).expect("pack");
    let unpacked = unpack_collection(&desc, &words).expect("unpack");

    let column = unpacked.items[0]
        .find_attribute("Weight")
        .expect("weight column");
    assert_eq!(column.values.len(), weights.len());
    for (value, expected) in column.values.iter().zip(&weights) {
        let AttributeValue::Float(f) = value else {
            panic!("expected float value");
        };
        assert_eq!(f.to_bits(), expected.to_bits());
    }
}

#[test]
fn empty_collection_is_header_only() {
    let desc = DataCollectionDesc::new(vec![]);
    let words = pack_collection(&desc, &DataCollection::empty()).expect("pack");
    assert_eq!(words, vec![0]);
    let unpacked = unpack_collection(&desc, &words).expect("unpack");
    assert!(unpacked.is_empty());
}

#[test]
fn kernel_output_buffer_unpacks_empty_until_a_kernel_runs() {
    let desc = weighted_desc(16);
    let words = prepare_for_kernel_output(&desc).expect("prepare");
    let unpacked = unpack_collection(&desc, &words).expect("unpack");
    assert!(unpacked.is_empty());
}

#[test]
fn attribute_set_output_buffer_unpacks_empty_too() {
    let mut item = DataDesc::new(RecordType::AttributeSet, 4);
    item.attributes.push(AttributeDesc::new(
        NUM_RESERVED_ATTRS as u32,
        AttributeType::Int,
        "Count",
    ));
    let desc = DataCollectionDesc::new(vec![item]);
    let words = prepare_for_kernel_output(&desc).expect("prepare");
    let unpacked = unpack_collection(&desc, &words).expect("unpack");
    assert!(unpacked.is_empty());
}

#[test]
fn attribute_set_round_trips() {
    let mut item = DataDesc::new(RecordType::AttributeSet, 2);
    item.attributes.push(AttributeDesc::new(
        NUM_RESERVED_ATTRS as u32,
        AttributeType::Transform,
        "Local",
    ));
    item.attributes.push(AttributeDesc::new(
        NUM_RESERVED_ATTRS as u32 + 1,
        AttributeType::Bool,
        "Visible",
    ));
    let desc = DataCollectionDesc::new(vec![item]);

    let mut local = [0.0f32; 16];
    for (i, slot) in local.iter_mut().enumerate() {
        *slot = i as f32 * 0.5 - 3.0;
    }
    let collection = DataCollection::new(vec![DataItem::AttributeSet {
        element_count: 2,
        attributes: vec![
            NamedAttribute::new(
                AttributeType::Transform,
                "Local",
                vec![
                    AttributeValue::Transform(local),
                    AttributeValue::zeroed(AttributeType::Transform),
                ],
            ),
            NamedAttribute::new(
                AttributeType::Bool,
                "Visible",
                vec![AttributeValue::Bool(true), AttributeValue::Bool(false)],
            ),
        ],
    }]);

    let words = pack_collection(&desc, &collection).expect("pack");
    let unpacked = unpack_collection(&desc, &words).expect("unpack");
    assert_eq!(unpacked, collection);
}

fn point_strategy() -> impl Strategy<Value = Point> {
    (
        prop::array::uniform3(-1.0e6f32..1.0e6),
        prop::array::uniform3(0.01f32..100.0),
        0.01f32..64.0,
        any::<i32>(),
    )
        .prop_map(|(position, scale, density, seed)| Point {
            position,
            scale,
            density,
            seed,
            ..Point::default()
        })
}

proptest! {
    #[test]
    fn points_with_weights_round_trip(
        rows in prop::collection::vec((point_strategy(), any::<u32>()), 1..24)
    ) {
        let (points, weight_bits): (Vec<Point>, Vec<u32>) = rows.into_iter().unzip();
        let weights: Vec<f32> = weight_bits.iter().map(|&b| f32::from_bits(b)).collect();
        let desc = weighted_desc(points.len());
        let collection = weighted_collection(points.clone(), weights);

        let words = pack_collection(&desc, &collection).expect("pack");
        let unpacked = unpack_collection(&desc, &words).expect("unpack");

        let DataItem::Points { points: got, attributes } = &unpacked.items[0] else {
            panic!("expected points");
        };
        prop_assert_eq!(got, &points);
        for (value, &bits) in attributes[0].values.iter().zip(&weight_bits) {
            let AttributeValue::Float(f) = value else {
                panic!("expected float value");
            };
            prop_assert_eq!(f.to_bits(), bits);
        }
    }
}
