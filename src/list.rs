//! Generic format sets: discrete formats and sample rates.

use crate::error::Result;
use crate::format::{FormatCatalog, FormatId, MediaType, PIX_FLAG_SW_FLAT_SUB};

/// A set of acceptable formats (or sample rates) for one end of a link.
///
/// Order carries no meaning but is preserved so negotiation is deterministic.
/// For sample rates an empty list means any rate is accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatList {
    values: Vec<FormatId>,
}

impl FormatList {
    /// An empty list.
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Every format the catalog registers for `media`.
    pub fn all_formats(media: MediaType, catalog: &impl FormatCatalog) -> Self {
        Self {
            values: catalog.formats(media),
        }
    }

    /// The "any sample rate" list.
    pub fn all_samplerates() -> Self {
        Self::new()
    }

    /// Build a list from explicit values. Duplicates are kept as given.
    pub fn from_slice(values: &[FormatId]) -> Self {
        Self {
            values: values.to_vec(),
        }
    }

    /// All pixel formats whose flags include every bit of `want` and none of `reject`.
    pub fn pixdesc_filter(catalog: &impl FormatCatalog, want: u32, reject: u32) -> Self {
        catalog
            .formats(MediaType::Video)
            .into_iter()
            .filter(|&fmt| {
                catalog
                    .pixel_descriptor(fmt)
                    .map(|desc| desc.filter_flags() & (want | reject) == want)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Software, non-planar, chroma-subsampled pixel formats.
    pub fn flat_subsampled_formats(catalog: &impl FormatCatalog) -> Self {
        Self::pixdesc_filter(catalog, PIX_FLAG_SW_FLAT_SUB, 0)
    }

    /// All planar audio sample formats.
    pub fn planar_sample_formats(catalog: &impl FormatCatalog) -> Self {
        catalog
            .formats(MediaType::Audio)
            .into_iter()
            .filter(|&fmt| {
                catalog
                    .sample_descriptor(fmt)
                    .map(|desc| desc.planar)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Append `value` to `*list`, creating the list first if there is none.
    ///
    /// On allocation failure `*list` is left exactly as it was.
    pub fn add(list: &mut Option<FormatList>, value: FormatId) -> Result<()> {
        match list {
            Some(existing) => {
                existing.values.try_reserve(1)?;
                existing.values.push(value);
            }
            None => {
                let mut values = Vec::new();
                values.try_reserve(1)?;
                values.push(value);
                *list = Some(FormatList { values });
            }
        }
        Ok(())
    }

    /// The stored values in insertion order.
    pub fn values(&self) -> &[FormatId] {
        &self.values
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no value is stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether `value` is stored.
    pub fn contains(&self, value: FormatId) -> bool {
        self.values.contains(&value)
    }

    pub(crate) fn from_vec(values: Vec<FormatId>) -> Self {
        Self { values }
    }
}

impl FromIterator<FormatId> for FormatList {
    fn from_iter<I: IntoIterator<Item = FormatId>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<FormatId>> for FormatList {
    fn from(values: Vec<FormatId>) -> Self {
        Self { values }
    }
}
