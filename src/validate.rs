//! Integrity checks for format lists, run before a list is trusted for negotiation.

use crate::error::{FormatsError, IntegrityKind, Result};
use crate::format::FormatCatalog;
use crate::layout::ChannelLayouts;
use crate::list::FormatList;

/// A diagnostic as recorded by a collecting sink. Every finding is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Caller-supplied context, typically the filter or link name.
    pub context: String,
    /// Human-readable description.
    pub message: String,
}

/// Destination for validator findings.
pub trait DiagnosticSink {
    /// Record one finding.
    fn report(&mut self, context: &str, message: &str);
}

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&mut self, context: &str, message: &str) {
        tracing::error!(context, "{}", message);
    }
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn report(&mut self, context: &str, message: &str) {
        self.push(Diagnostic {
            context: context.to_string(),
            message: message.to_string(),
        });
    }
}

/// Which flavour of generic list is being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    PixelFormats,
    SampleFormats,
    SampleRates,
}

impl ListKind {
    fn name(self) -> &'static str {
        match self {
            ListKind::PixelFormats => "pixel format",
            ListKind::SampleFormats => "sample format",
            ListKind::SampleRates => "sample rate",
        }
    }
}

/// Check a generic list according to `kind`.
pub fn validate(
    sink: &mut impl DiagnosticSink,
    context: &str,
    list: &FormatList,
    kind: ListKind,
    catalog: &impl FormatCatalog,
) -> Result<()> {
    match kind {
        ListKind::PixelFormats => check_pixel_formats(sink, context, list, catalog),
        ListKind::SampleFormats => check_sample_formats(sink, context, list, catalog),
        ListKind::SampleRates => check_sample_rates(sink, context, list),
    }
}

/// Pixel formats: non-empty, no duplicates, every entry known to the catalog.
pub fn check_pixel_formats(
    sink: &mut impl DiagnosticSink,
    context: &str,
    list: &FormatList,
    catalog: &impl FormatCatalog,
) -> Result<()> {
    let kind = ListKind::PixelFormats;
    if list.values().iter().any(|&f| catalog.pixel_descriptor(f).is_none()) {
        return fail(sink, context, kind.name(), IntegrityKind::InvalidValue);
    }
    check_list(sink, context, kind.name(), list)
}

/// Sample formats: non-empty, no duplicates, every entry known to the catalog.
pub fn check_sample_formats(
    sink: &mut impl DiagnosticSink,
    context: &str,
    list: &FormatList,
    catalog: &impl FormatCatalog,
) -> Result<()> {
    let kind = ListKind::SampleFormats;
    if list.values().iter().any(|&f| catalog.sample_descriptor(f).is_none()) {
        return fail(sink, context, kind.name(), IntegrityKind::InvalidValue);
    }
    check_list(sink, context, kind.name(), list)
}

/// Sample rates: empty means "any" and passes; otherwise positive and unique.
pub fn check_sample_rates(
    sink: &mut impl DiagnosticSink,
    context: &str,
    list: &FormatList,
) -> Result<()> {
    if list.is_empty() {
        return Ok(());
    }
    let kind = ListKind::SampleRates;
    if list.values().iter().any(|&rate| rate <= 0) {
        return fail(sink, context, kind.name(), IntegrityKind::InvalidValue);
    }
    check_list(sink, context, kind.name(), list)
}

/// Channel layouts: wildcards pass; explicit lists must be non-empty with no
/// duplicate entries and no known layout next to a bare count of the same width.
pub fn check_channel_layouts(
    sink: &mut impl DiagnosticSink,
    context: &str,
    layouts: &ChannelLayouts,
) -> Result<()> {
    let ChannelLayouts::Listed(entries) = layouts else {
        return Ok(());
    };
    let name = "channel layout";
    if entries.is_empty() {
        return fail(sink, context, name, IntegrityKind::Empty);
    }
    for (i, &a) in entries.iter().enumerate() {
        for &b in &entries[i + 1..] {
            if a == b {
                return fail(sink, context, name, IntegrityKind::Duplicate);
            }
            if a.overlaps(b) {
                return fail(sink, context, name, IntegrityKind::Ambiguous);
            }
        }
    }
    Ok(())
}

fn check_list(
    sink: &mut impl DiagnosticSink,
    context: &str,
    name: &str,
    list: &FormatList,
) -> Result<()> {
    if list.is_empty() {
        return fail(sink, context, name, IntegrityKind::Empty);
    }
    let values = list.values();
    for (i, v) in values.iter().enumerate() {
        if values[i + 1..].contains(v) {
            return fail(sink, context, name, IntegrityKind::Duplicate);
        }
    }
    Ok(())
}

fn fail(
    sink: &mut impl DiagnosticSink,
    context: &str,
    name: &str,
    kind: IntegrityKind,
) -> Result<()> {
    sink.report(context, &format!("{} in {} list", kind, name));
    Err(FormatsError::Integrity {
        list: name.to_string(),
        kind,
    })
}
