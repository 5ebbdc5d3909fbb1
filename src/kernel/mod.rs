//! Kernel settings model.
//!
//! A kernel is authored as a settings object (deserialized from JSON like any
//! other node settings) carrying its pins, its dispatch rules and its source
//! text. Everything derived from it lives in the submodules: accessor
//! declarations, the attribute-usage scanner, validity checks, and the cooked
//! WGSL source.

pub mod cook;
pub mod declarations;
pub mod scan;
pub mod validate;

use serde::{Deserialize, Serialize};

use crate::codec::attrs::AttributeKey;
use crate::codec::desc::{DataCollectionDesc, DataDesc, RecordType};

pub use cook::{cook_kernel_source, CookedKernel, PinBinding};
pub use declarations::kernel_declarations;
pub use scan::{scan_attribute_usages, AttributeUsage, UsageVerb};
pub use validate::{validate_attribute_usages, validate_kernel, validate_wgsl};

/// How many threads one dispatch of a custom kernel gets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadCountMode {
    Fixed(u32),
    /// One thread per element that the first output pin will hold.
    FromFirstOutputPin,
    /// One thread per element of the cartesian product of the named input
    /// pins' element counts.
    FromProductOfPins(Vec<String>),
}

/// How large an output pin's buffer is, in elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferSizeMode {
    FixedElementCount(u32),
    /// Mirror the shape of the first input pin, item for item.
    FromFirstPin,
    /// Single item sized by the product of the named input pins' counts.
    FromProductOfPins(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelKind {
    /// One thread per input element; output mirrors the primary input and
    /// unset attributes are carried over automatically.
    PointProcessor,
    /// Produces a fixed number of fresh points, initialized to defaults.
    PointGenerator { point_count: u32 },
    /// Fully user-specified dispatch and output sizing.
    Custom,
}

/// What a pin carries. Opaque resource pins get dedicated data interfaces
/// instead of packed collection buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinKind {
    Collection,
    Texture,
    Landscape,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPin {
    pub label: String,
    #[serde(default = "PinKind::collection")]
    pub kind: PinKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPin {
    pub label: String,
    #[serde(default = "PinKind::collection")]
    pub kind: PinKind,
    #[serde(default = "RecordType::points")]
    pub record_type: RecordType,
    #[serde(default = "BufferSizeMode::from_first_pin")]
    pub size_mode: BufferSizeMode,
    /// Attributes this kernel creates on the pin (in addition to whatever
    /// flows through).
    #[serde(default)]
    pub created_attributes: Vec<AttributeKey>,
}

impl PinKind {
    fn collection() -> Self {
        PinKind::Collection
    }
}

impl RecordType {
    fn points() -> Self {
        RecordType::Points
    }
}

impl BufferSizeMode {
    fn from_first_pin() -> Self {
        BufferSizeMode::FromFirstPin
    }
}

fn one() -> u32 {
    1
}

/// Authored description of one accelerator kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSettings {
    /// Node name, used in diagnostics and binding names.
    pub name: String,
    pub kind: KernelKind,
    #[serde(default)]
    pub dispatch: Option<ThreadCountMode>,
    /// Kernel body text; see [`cook`] for the functions in scope.
    pub source: String,
    pub input_pins: Vec<InputPin>,
    pub output_pins: Vec<OutputPin>,
    /// Threads per logical element, for kernels that run several passes per
    /// element. Must be at least 1.
    #[serde(default = "one")]
    pub thread_count_multiplier: u32,
}

impl KernelSettings {
    pub fn input_pin(&self, label: &str) -> Option<&InputPin> {
        self.input_pins.iter().find(|p| p.label == label)
    }

    pub fn output_pin(&self, label: &str) -> Option<&OutputPin> {
        self.output_pins.iter().find(|p| p.label == label)
    }

    pub fn primary_input(&self) -> Option<&InputPin> {
        self.input_pins.first()
    }

    /// Number of threads a dispatch needs, given the resolved descriptor of
    /// every input pin and of the first output pin.
    pub fn thread_count(
        &self,
        input_descs: &[(String, DataCollectionDesc)],
        first_output_desc: Option<&DataCollectionDesc>,
    ) -> u32 {
        let pin_elements = |label: &str| -> u32 {
            input_descs
                .iter()
                .find(|(pin, _)| pin == label)
                .map(|(_, desc)| {
                    desc.data.iter().map(|d| d.element_count as u32).sum::<u32>()
                })
                .unwrap_or(0)
        };

        let base = match &self.kind {
            KernelKind::PointProcessor => self
                .primary_input()
                .map(|pin| pin_elements(&pin.label))
                .unwrap_or(0),
            KernelKind::PointGenerator { point_count } => *point_count,
            KernelKind::Custom => match self.dispatch.as_ref() {
                Some(ThreadCountMode::Fixed(count)) => *count,
                Some(ThreadCountMode::FromFirstOutputPin) => first_output_desc
                    .map(|desc| {
                        desc.data.iter().map(|d| d.element_count as u32).sum::<u32>()
                    })
                    .unwrap_or(0),
                Some(ThreadCountMode::FromProductOfPins(labels)) => labels
                    .iter()
                    .map(|label| pin_elements(label))
                    .product(),
                None => 0,
            },
        };
        base * self.thread_count_multiplier.max(1)
    }

    /// Shape of one output pin given the resolved input shapes. Created
    /// attributes are appended with a placeholder id; program assembly
    /// rebinds them through the attribute table.
    pub fn output_pin_desc(
        &self,
        pin: &OutputPin,
        input_descs: &[(String, DataCollectionDesc)],
    ) -> DataCollectionDesc {
        let input = |label: &str| {
            input_descs
                .iter()
                .find(|(l, _)| l == label)
                .map(|(_, desc)| desc)
        };
        let total_elements = |label: &str| -> usize {
            input(label)
                .map(|desc| desc.data.iter().map(|d| d.element_count).sum())
                .unwrap_or(0)
        };

        let mut desc = match &self.kind {
            KernelKind::PointGenerator { point_count } => DataCollectionDesc::new(vec![
                DataDesc::new(RecordType::Points, *point_count as usize),
            ]),
            KernelKind::PointProcessor => {
                // Pass the primary input through item for item.
                let primary = self.primary_input().map(|p| p.label.clone());
                primary
                    .and_then(|label| input(&label).cloned())
                    .unwrap_or_default()
            }
            KernelKind::Custom => match &pin.size_mode {
                BufferSizeMode::FixedElementCount(count) => DataCollectionDesc::new(vec![
                    DataDesc::new(pin.record_type, *count as usize),
                ]),
                BufferSizeMode::FromFirstPin => {
                    let primary = self.primary_input().map(|p| p.label.clone());
                    primary
                        .and_then(|label| input(&label).cloned())
                        .unwrap_or_default()
                }
                BufferSizeMode::FromProductOfPins(labels) => {
                    let count: usize = labels.iter().map(|l| total_elements(l)).product();
                    DataCollectionDesc::new(vec![DataDesc::new(pin.record_type, count)])
                }
            },
        };

        for key in &pin.created_attributes {
            for item in &mut desc.data {
                if item.find_attribute(&key.name).is_none() {
                    item.attributes.push(crate::codec::attrs::AttributeDesc::new(
                        u32::MAX,
                        key.ty,
                        key.name.clone(),
                    ));
                }
            }
        }
        desc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::attrs::AttributeType;

    fn processor() -> KernelSettings {
        KernelSettings {
            name: "Scale".into(),
            kind: KernelKind::PointProcessor,
            dispatch: None,
            source: String::new(),
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

    #[test]
    fn processor_threads_follow_primary_input() {
        let settings = processor();
        let inputs = vec![(
            "In".to_string(),
            DataCollectionDesc::new(vec![
                DataDesc::new(RecordType::Points, 7),
                DataDesc::new(RecordType::Points, 3),
            ]),
        )];
        assert_eq!(settings.thread_count(&inputs, None), 10);

        let desc = settings.output_pin_desc(&settings.output_pins[0], &inputs);
        assert_eq!(desc.data.len(), 2);
        assert_eq!(desc.element_count_for(RecordType::Points), 10);
    }

    #[test]
    fn product_dispatch_multiplies_pin_counts() {
        let mut settings = processor();
        settings.kind = KernelKind::Custom;
        settings.dispatch = Some(ThreadCountMode::FromProductOfPins(vec![
            "A".into(),
            "B".into(),
        ]));
        settings.thread_count_multiplier = 2;
        let inputs = vec![
            (
                "A".to_string(),
                DataCollectionDesc::new(vec![DataDesc::new(RecordType::Points, 4)]),
            ),
            (
                "B".to_string(),
                DataCollectionDesc::new(vec![DataDesc::new(RecordType::AttributeSet, 5)]),
            ),
        ];
        assert_eq!(settings.thread_count(&inputs, None), 40);
    }

    #[test]
    fn settings_round_trip_through_json() {
        let mut settings = processor();
        settings.output_pins[0]
            .created_attributes
            .push(AttributeKey::new(AttributeType::Float, "Weight"));
        let json = serde_json::to_string(&settings).expect("serialize");
        let back: KernelSettings = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, settings);
    }
}
