//! Kernel validity checks.
//!
//! A kernel that fails validation is excluded from its program; the rest of
//! the compile proceeds. Checks come in two stages: settings-only checks that
//! need no data shapes, and attribute-usage checks that need the resolved
//! descriptor of every pin.

use anyhow::{anyhow, Result};

use crate::codec::desc::DataCollectionDesc;
use crate::diag::DiagnosticSink;
use crate::kernel::scan::{AttributeUsage, UsageVerb};
use crate::kernel::{KernelKind, KernelSettings, ThreadCountMode};

/// Parse and validate a cooked WGSL module. Returns the naga error text with
/// source spans rendered, suitable for a diagnostic.
pub fn validate_wgsl(source: &str) -> Result<()> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|err| anyhow!("wgsl parse failed: {}", err.emit_to_string(source)))?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::default(),
    )
    .validate(&module)
    .map_err(|err| anyhow!("wgsl validation failed: {}", err.emit_to_string(source)))?;
    Ok(())
}

fn is_valid_pin_label(label: &str) -> bool {
    let mut chars = label.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Settings-only checks. Returns false (with error diagnostics) when the
/// kernel cannot be scheduled at all.
pub fn validate_kernel(settings: &KernelSettings, sink: &mut DiagnosticSink) -> bool {
    let mut ok = true;
    let mut fail = |sink: &mut DiagnosticSink, text: String| {
        sink.error(format!("kernel '{}': {text}", settings.name));
        ok = false;
    };

    if settings.thread_count_multiplier == 0 {
        fail(sink, "thread count multiplier must be at least 1".into());
    }

    let mut labels: Vec<&str> = Vec::new();
    for label in settings
        .input_pins
        .iter()
        .map(|p| p.label.as_str())
        .chain(settings.output_pins.iter().map(|p| p.label.as_str()))
    {
        if !is_valid_pin_label(label) {
            fail(sink, format!("pin label '{label}' is not a valid identifier"));
        }
        if labels.contains(&label) {
            fail(sink, format!("duplicate pin label '{label}'"));
        }
        labels.push(label);
    }

    for pin in &settings.output_pins {
        if pin.kind != crate::kernel::PinKind::Collection {
            fail(
                sink,
                format!("output pin '{}' must carry a collection", pin.label),
            );
        }
    }

    let collection_outputs = settings
        .output_pins
        .iter()
        .filter(|p| p.kind == crate::kernel::PinKind::Collection)
        .count();
    if collection_outputs > 4 {
        fail(
            sink,
            format!("{collection_outputs} output collection pins; at most 4 are supported"),
        );
    }

    match &settings.kind {
        KernelKind::PointProcessor => {
            if settings.input_pins.is_empty() || settings.output_pins.is_empty() {
                fail(
                    sink,
                    "point processor needs at least one input and one output pin".into(),
                );
            }
        }
        KernelKind::PointGenerator { point_count } => {
            if *point_count == 0 {
                fail(sink, "point generator must produce at least one point".into());
            }
        }
        KernelKind::Custom => match settings.dispatch.as_ref() {
            None => fail(sink, "custom kernel is missing its dispatch mode".into()),
            Some(ThreadCountMode::Fixed(0)) => {
                fail(sink, "fixed dispatch must request at least one thread".into());
            }
            Some(ThreadCountMode::FromProductOfPins(pins)) => {
                for pin in pins {
                    if settings.input_pin(pin).is_none() {
                        fail(
                            sink,
                            format!("dispatch references unknown input pin '{pin}'"),
                        );
                    }
                }
            }
            _ => {}
        },
    }

    if let KernelKind::Custom = settings.kind {
        for pin in &settings.output_pins {
            if let crate::kernel::BufferSizeMode::FromProductOfPins(pins) = &pin.size_mode {
                for source_pin in pins {
                    if settings.input_pin(source_pin).is_none() {
                        fail(
                            sink,
                            format!(
                                "output pin '{}' is sized from unknown input pin '{source_pin}'",
                                pin.label
                            ),
                        );
                    }
                }
            }
        }
    }

    ok
}

fn find_desc<'a>(
    descs: &'a [(String, DataCollectionDesc)],
    pin: &str,
) -> Option<&'a DataCollectionDesc> {
    descs.iter().find(|(label, _)| label == pin).map(|(_, d)| d)
}

/// Check every scanned attribute usage against the resolved pin shapes.
/// A failure excludes this kernel only; diagnostics name the pin, the
/// accessor function and the attribute, with the source position.
pub fn validate_attribute_usages(
    settings: &KernelSettings,
    usages: &[AttributeUsage],
    input_descs: &[(String, DataCollectionDesc)],
    output_descs: &[(String, DataCollectionDesc)],
    sink: &mut DiagnosticSink,
) -> bool {
    let mut ok = true;

    for usage in usages {
        let verb = match usage.verb {
            UsageVerb::Get => "Get",
            UsageVerb::Set => "Set",
        };
        let function = format!("{}_{verb}{}", usage.pin, usage.ty.token());
        let mut fail = |sink: &mut DiagnosticSink, text: String| {
            sink.push(
                crate::diag::Diagnostic::new(
                    crate::diag::Severity::Error,
                    format!("kernel '{}': {function}: {text}", settings.name),
                )
                .with_location(usage.line, usage.column),
            );
            ok = false;
        };

        let desc = match usage.verb {
            UsageVerb::Set => {
                if settings.input_pin(&usage.pin).is_some() {
                    fail(
                        sink,
                        format!("cannot write attribute '{}' on input pin '{}'", usage.name, usage.pin),
                    );
                    continue;
                }
                if settings.output_pin(&usage.pin).is_none() {
                    fail(sink, format!("'{}' is not an output pin", usage.pin));
                    continue;
                }
                find_desc(output_descs, &usage.pin)
            }
            UsageVerb::Get => {
                if settings.input_pin(&usage.pin).is_none() {
                    fail(sink, format!("'{}' is not an input pin", usage.pin));
                    continue;
                }
                find_desc(input_descs, &usage.pin)
            }
        };

        // A pin whose shape is not resolved yet is checked again once data
        // arrives. An empty pin has nothing to check: it dispatches zero
        // threads, so the accessor never executes.
        let Some(desc) = desc else {
            continue;
        };
        let Some(first_item) = desc.data.first() else {
            continue;
        };

        match first_item.find_attribute(&usage.name) {
            None => fail(
                sink,
                format!("attribute '{}' does not exist on pin '{}'", usage.name, usage.pin),
            ),
            Some(attr) if attr.ty != usage.ty => fail(
                sink,
                format!(
                    "attribute '{}' on pin '{}' is {}, accessed as {}",
                    usage.name,
                    usage.pin,
                    attr.ty.token(),
                    usage.ty.token()
                ),
            ),
            Some(_) => {}
        }
    }

    ok
}
