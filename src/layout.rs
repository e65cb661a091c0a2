//! Channel layouts and channel-layout sets.
//!
//! A [`ChannelLayout`] is either a speaker bitmask with a known disposition or
//! a bare channel count that accepts any arrangement of that many channels.
//! The legacy 64-bit packing (high bit marks a count) is still available
//! through [`ChannelLayout::to_bits`] and [`ChannelLayout::from_bits`].

use crate::error::{FormatsError, Result};
use crate::invariant_ppt::{assert_invariant, LAYOUT_NO_AMBIGUITY};

const COUNT_FLAG: u64 = 0x8000_0000_0000_0000;
const COUNT_MASK: u64 = 0x7FFF_FFFF;

/// Front left speaker.
pub const CH_FRONT_LEFT: u64 = 0x1;
/// Front right speaker.
pub const CH_FRONT_RIGHT: u64 = 0x2;
/// Front center speaker.
pub const CH_FRONT_CENTER: u64 = 0x4;
/// Low-frequency effects.
pub const CH_LOW_FREQUENCY: u64 = 0x8;
/// Back left speaker.
pub const CH_BACK_LEFT: u64 = 0x10;
/// Back right speaker.
pub const CH_BACK_RIGHT: u64 = 0x20;
/// Back center speaker.
pub const CH_BACK_CENTER: u64 = 0x100;
/// Side left speaker.
pub const CH_SIDE_LEFT: u64 = 0x200;
/// Side right speaker.
pub const CH_SIDE_RIGHT: u64 = 0x400;

/// A channel layout with a known disposition, or a bare channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    /// Speaker bitmask.
    Known(u64),
    /// Any arrangement of this many channels.
    Count(u32),
}

impl ChannelLayout {
    pub const MONO: ChannelLayout = ChannelLayout::Known(CH_FRONT_CENTER);
    pub const STEREO: ChannelLayout = ChannelLayout::Known(CH_FRONT_LEFT | CH_FRONT_RIGHT);
    pub const LAYOUT_2POINT1: ChannelLayout =
        ChannelLayout::Known(CH_FRONT_LEFT | CH_FRONT_RIGHT | CH_LOW_FREQUENCY);
    pub const SURROUND: ChannelLayout =
        ChannelLayout::Known(CH_FRONT_LEFT | CH_FRONT_RIGHT | CH_FRONT_CENTER);
    pub const QUAD: ChannelLayout = ChannelLayout::Known(
        CH_FRONT_LEFT | CH_FRONT_RIGHT | CH_BACK_LEFT | CH_BACK_RIGHT,
    );
    pub const LAYOUT_5POINT0: ChannelLayout = ChannelLayout::Known(
        CH_FRONT_LEFT | CH_FRONT_RIGHT | CH_FRONT_CENTER | CH_SIDE_LEFT | CH_SIDE_RIGHT,
    );
    pub const LAYOUT_5POINT1: ChannelLayout = ChannelLayout::Known(
        CH_FRONT_LEFT
            | CH_FRONT_RIGHT
            | CH_FRONT_CENTER
            | CH_LOW_FREQUENCY
            | CH_SIDE_LEFT
            | CH_SIDE_RIGHT,
    );
    pub const LAYOUT_7POINT1: ChannelLayout = ChannelLayout::Known(
        CH_FRONT_LEFT
            | CH_FRONT_RIGHT
            | CH_FRONT_CENTER
            | CH_LOW_FREQUENCY
            | CH_BACK_LEFT
            | CH_BACK_RIGHT
            | CH_SIDE_LEFT
            | CH_SIDE_RIGHT,
    );

    /// Number of channels described.
    pub fn channels(self) -> u32 {
        match self {
            ChannelLayout::Known(mask) => mask.count_ones(),
            ChannelLayout::Count(n) => n,
        }
    }

    /// Whether the speaker disposition is known.
    pub fn is_known(self) -> bool {
        matches!(self, ChannelLayout::Known(_))
    }

    /// Legacy packing: counts set the high bit and keep the count in the low 31 bits.
    ///
    /// Returns `None` for values the packing cannot hold: a known mask using
    /// bit 63, or a count above `0x7FFF_FFFF`.
    pub fn to_bits(self) -> Option<u64> {
        match self {
            ChannelLayout::Known(mask) if mask & COUNT_FLAG == 0 => Some(mask),
            ChannelLayout::Count(n) if u64::from(n) <= COUNT_MASK => {
                Some(COUNT_FLAG | u64::from(n))
            }
            _ => None,
        }
    }

    /// Inverse of [`ChannelLayout::to_bits`].
    pub fn from_bits(bits: u64) -> Self {
        if bits & COUNT_FLAG != 0 {
            ChannelLayout::Count((bits & COUNT_MASK) as u32)
        } else {
            ChannelLayout::Known(bits)
        }
    }

    /// Channel count encoded in `bits`, or 0 when `bits` is a real layout.
    pub fn count_of_bits(bits: u64) -> u32 {
        match Self::from_bits(bits) {
            ChannelLayout::Count(n) => n,
            ChannelLayout::Known(_) => 0,
        }
    }

    /// Whether two entries would be redundant inside one list.
    pub(crate) fn overlaps(self, other: ChannelLayout) -> bool {
        if self == other {
            return true;
        }
        self.is_known() != other.is_known() && self.channels() == other.channels()
    }
}

impl std::fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelLayout::Known(mask) => write!(f, "0x{:x}", mask),
            ChannelLayout::Count(n) => write!(f, "{} channels", n),
        }
    }
}

/// A set of acceptable channel layouts for one end of an audio link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelLayouts {
    /// Explicit entries.
    Listed(Vec<ChannelLayout>),
    /// Any layout with a known disposition.
    AllLayouts,
    /// Any layout or channel count, known disposition or not.
    AllCounts,
}

impl Default for ChannelLayouts {
    fn default() -> Self {
        ChannelLayouts::Listed(Vec::new())
    }
}

impl ChannelLayouts {
    /// Any layout with a known disposition.
    pub fn all_layouts() -> Self {
        ChannelLayouts::AllLayouts
    }

    /// Any layout or channel count.
    pub fn all_counts() -> Self {
        ChannelLayouts::AllCounts
    }

    /// Build an explicit list, rejecting layout/count ambiguity.
    ///
    /// Exact duplicates are kept; use the validators to catch them.
    pub fn from_slice(layouts: &[ChannelLayout]) -> Result<Self> {
        let mut list = None;
        for &layout in layouts {
            Self::add(&mut list, layout)?;
        }
        Ok(list.unwrap_or_default())
    }

    /// Append `layout` to `*list`, creating an explicit list if there is none.
    ///
    /// Fails without side effects if the list is a wildcard, if the new entry
    /// would clash with a known layout or bare count of the same channel number,
    /// or if the list cannot grow.
    pub fn add(list: &mut Option<ChannelLayouts>, layout: ChannelLayout) -> Result<()> {
        match list {
            Some(ChannelLayouts::Listed(entries)) => {
                if entries.iter().any(|&e| {
                    e.is_known() != layout.is_known() && e.channels() == layout.channels()
                }) {
                    return Err(FormatsError::AmbiguousLayout(layout.to_string()));
                }
                entries.try_reserve(1)?;
                entries.push(layout);
                assert_invariant(
                    LAYOUT_NO_AMBIGUITY,
                    entries
                        .iter()
                        .filter(|e| e.channels() == layout.channels())
                        .all(|e| e.is_known() == layout.is_known()),
                    "Layout appended without count ambiguity",
                    Some("ChannelLayouts::add"),
                );
            }
            Some(_) => return Err(FormatsError::WildcardList),
            None => {
                let mut entries = Vec::new();
                entries.try_reserve(1)?;
                entries.push(layout);
                *list = Some(ChannelLayouts::Listed(entries));
            }
        }
        Ok(())
    }

    /// True for [`ChannelLayouts::AllLayouts`] and [`ChannelLayouts::AllCounts`].
    pub fn all_layouts_flag(&self) -> bool {
        !matches!(self, ChannelLayouts::Listed(_))
    }

    /// True for [`ChannelLayouts::AllCounts`].
    pub fn all_counts_flag(&self) -> bool {
        matches!(self, ChannelLayouts::AllCounts)
    }

    /// Explicit entries; empty for wildcards.
    pub fn layouts(&self) -> &[ChannelLayout] {
        match self {
            ChannelLayouts::Listed(entries) => entries,
            _ => &[],
        }
    }

    /// How generic the set is: 0 listed, 1 all known layouts, 2 all counts.
    pub(crate) fn genericity(&self) -> u8 {
        match self {
            ChannelLayouts::Listed(_) => 0,
            ChannelLayouts::AllLayouts => 1,
            ChannelLayouts::AllCounts => 2,
        }
    }

    /// Whether `layout` is accepted by this set.
    pub fn accepts(&self, layout: ChannelLayout) -> bool {
        match self {
            ChannelLayouts::AllCounts => true,
            ChannelLayouts::AllLayouts => layout.is_known(),
            ChannelLayouts::Listed(entries) => entries.iter().any(|&e| {
                e == layout || (layout.is_known() && e == ChannelLayout::Count(layout.channels()))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_layout_decodes_to_zero_count() {
        let bits = ChannelLayout::STEREO.to_bits().unwrap();
        assert_eq!(ChannelLayout::count_of_bits(bits), 0);
        assert_eq!(ChannelLayout::from_bits(bits), ChannelLayout::STEREO);
    }

    #[test]
    fn count_sets_high_bit() {
        assert_eq!(ChannelLayout::Count(2).to_bits(), Some(0x8000_0000_0000_0002));
    }

    #[test]
    fn unpackable_values_have_no_bits() {
        assert_eq!(ChannelLayout::Known(1 << 63).to_bits(), None);
        assert_eq!(ChannelLayout::Known(u64::MAX).to_bits(), None);
        assert_eq!(ChannelLayout::Count(0x8000_0001).to_bits(), None);
        assert_eq!(ChannelLayout::Count(u32::MAX).to_bits(), None);
        assert_eq!(
            ChannelLayout::Count(0x7FFF_FFFF).to_bits(),
            Some(0x8000_0000_7FFF_FFFF)
        );
        assert_eq!(
            ChannelLayout::Known(1 << 62).to_bits().map(ChannelLayout::from_bits),
            Some(ChannelLayout::Known(1 << 62))
        );
    }

    #[test]
    fn channels_of_standard_layouts() {
        assert_eq!(ChannelLayout::MONO.channels(), 1);
        assert_eq!(ChannelLayout::STEREO.channels(), 2);
        assert_eq!(ChannelLayout::LAYOUT_5POINT1.channels(), 6);
        assert_eq!(ChannelLayout::LAYOUT_7POINT1.channels(), 8);
    }

    #[test]
    fn add_rejects_count_next_to_same_width_layout() {
        let mut list = None;
        ChannelLayouts::add(&mut list, ChannelLayout::STEREO).unwrap();
        let err = ChannelLayouts::add(&mut list, ChannelLayout::Count(2)).unwrap_err();
        assert!(matches!(err, FormatsError::AmbiguousLayout(_)));
        assert_eq!(list.unwrap().layouts(), &[ChannelLayout::STEREO]);
    }

    #[test]
    fn add_rejects_wildcards() {
        let mut list = Some(ChannelLayouts::all_counts());
        assert!(matches!(
            ChannelLayouts::add(&mut list, ChannelLayout::MONO),
            Err(FormatsError::WildcardList)
        ));
        assert_eq!(list, Some(ChannelLayouts::AllCounts));
    }

    #[test]
    fn flags_follow_variant() {
        assert!(ChannelLayouts::AllCounts.all_layouts_flag());
        assert!(ChannelLayouts::AllCounts.all_counts_flag());
        assert!(ChannelLayouts::AllLayouts.all_layouts_flag());
        assert!(!ChannelLayouts::AllLayouts.all_counts_flag());
        assert!(!ChannelLayouts::default().all_layouts_flag());
    }

    #[test]
    fn count_entry_accepts_known_layouts_of_that_width() {
        let list = ChannelLayouts::from_slice(&[ChannelLayout::Count(2)]).unwrap();
        assert!(list.accepts(ChannelLayout::STEREO));
        assert!(list.accepts(ChannelLayout::Count(2)));
        assert!(!list.accepts(ChannelLayout::MONO));
    }

    proptest! {
        #[test]
        fn count_round_trips(count in 0u32..0x7FFF_FFFF) {
            let bits = ChannelLayout::Count(count).to_bits().unwrap();
            prop_assert_eq!(ChannelLayout::count_of_bits(bits), count);
        }
    }
}
