//! Merge engine: compatibility checks and destructive intersection of shared sets.
//!
//! Every `merge_*` function takes two referenced sets from a registry. On
//! [`MergeOutcome::Merged`] all slots that pointed at either set point at the
//! single surviving set, whose contents are the intersection. On
//! [`MergeOutcome::Incompatible`] or an error both sets are exactly as before.
//!
//! Which physical set survives is an implementation detail; only contents and
//! the fact that every former reference now agrees are guaranteed.

use crate::error::{MergeOutcome, Result};
use crate::format::{FormatCatalog, FormatId, MediaType};
use crate::invariant_ppt::{assert_invariant, MERGE_IS_INTERSECTION, MERGE_NO_PARTIAL};
use crate::layout::{ChannelLayout, ChannelLayouts};
use crate::list::FormatList;
use crate::registry::{Intersection, SetId, SetRegistry, Side};

/// Whether two format lists share a format, without merging them.
///
/// For video, a merge that would lose chroma or alpha counts as incompatible.
pub fn can_merge_formats(
    a: &FormatList,
    b: &FormatList,
    media: MediaType,
    catalog: &impl FormatCatalog,
) -> bool {
    if media == MediaType::Video && loses_chroma_or_alpha(a, b, catalog) {
        return false;
    }
    a.values().iter().any(|&v| b.contains(v))
}

/// Whether two sample-rate lists share a rate. Empty lists accept any rate.
pub fn can_merge_samplerates(a: &FormatList, b: &FormatList) -> bool {
    a.is_empty() || b.is_empty() || a.values().iter().any(|&v| b.contains(v))
}

/// Whether some channel layout or count is admitted by both sets.
pub fn can_merge_channel_layouts(a: &ChannelLayouts, b: &ChannelLayouts) -> bool {
    let (generic, specific) = if a.genericity() >= b.genericity() {
        (a, b)
    } else {
        (b, a)
    };
    match (generic, specific) {
        (ChannelLayouts::AllLayouts, ChannelLayouts::Listed(entries)) => {
            entries.iter().any(|l| l.is_known())
        }
        (ChannelLayouts::Listed(la), ChannelLayouts::Listed(lb)) => la
            .iter()
            .any(|&x| lb.iter().any(|&y| layouts_meet(x, y))),
        _ => true,
    }
}

/// Merge two format sets of the given media type.
pub fn merge_formats(
    registry: &mut SetRegistry<FormatList>,
    a: SetId,
    b: SetId,
    media: MediaType,
    catalog: &impl FormatCatalog,
) -> Result<MergeOutcome> {
    let before = snapshot(registry, a, b);
    let outcome = registry.merge_with(a, b, |ca, cb| {
        if media == MediaType::Video && loses_chroma_or_alpha(ca, cb, catalog) {
            tracing::debug!("merge_formats: refusing merge that would drop chroma or alpha");
            return Ok(Intersection::Disjoint);
        }
        intersect_values(ca, cb)
    })?;
    check_untouched(registry, a, b, before, outcome);
    Ok(outcome)
}

/// Merge two sample-rate sets. An empty set accepts any rate.
pub fn merge_samplerates(
    registry: &mut SetRegistry<FormatList>,
    a: SetId,
    b: SetId,
) -> Result<MergeOutcome> {
    let before = snapshot(registry, a, b);
    let outcome = registry.merge_with(a, b, |ca, cb| {
        if ca.is_empty() {
            return Ok(Intersection::Keep(Side::Second));
        }
        if cb.is_empty() {
            return Ok(Intersection::Keep(Side::First));
        }
        intersect_values(ca, cb)
    })?;
    check_untouched(registry, a, b, before, outcome);
    Ok(outcome)
}

/// Merge two channel-layout sets.
pub fn merge_channel_layouts(
    registry: &mut SetRegistry<ChannelLayouts>,
    a: SetId,
    b: SetId,
) -> Result<MergeOutcome> {
    let before = snapshot(registry, a, b);
    let outcome = registry.merge_with(a, b, intersect_layouts)?;
    check_untouched(registry, a, b, before, outcome);
    Ok(outcome)
}

fn snapshot<S>(registry: &SetRegistry<S>, a: SetId, b: SetId) -> (usize, usize) {
    (registry.refcount(a), registry.refcount(b))
}

fn check_untouched<S>(
    registry: &SetRegistry<S>,
    a: SetId,
    b: SetId,
    before: (usize, usize),
    outcome: MergeOutcome,
) {
    if outcome == MergeOutcome::Incompatible {
        assert_invariant(
            MERGE_NO_PARTIAL,
            snapshot(registry, a, b) == before,
            "Incompatible merge leaves both sets referenced as before",
            Some("merge"),
        );
    }
}

fn layouts_meet(x: ChannelLayout, y: ChannelLayout) -> bool {
    x == y
        || (x.is_known() && y == ChannelLayout::Count(x.channels()))
        || (y.is_known() && x == ChannelLayout::Count(y.channels()))
}

/// Refuse merges where both sides have formats with chroma (or alpha) but the
/// formats they actually share do not.
fn loses_chroma_or_alpha(a: &FormatList, b: &FormatList, catalog: &impl FormatCatalog) -> bool {
    let (mut alpha_kept, mut alpha_possible) = (false, false);
    let (mut chroma_kept, mut chroma_possible) = (false, false);
    for &fa in a.values() {
        let Some(da) = catalog.pixel_descriptor(fa) else {
            continue;
        };
        for &fb in b.values() {
            let Some(db) = catalog.pixel_descriptor(fb) else {
                continue;
            };
            alpha_possible |= da.has_alpha() && db.has_alpha();
            chroma_possible |= da.has_chroma() && db.has_chroma();
            if fa == fb {
                alpha_kept |= da.has_alpha();
                chroma_kept |= da.has_chroma();
            }
        }
    }
    (alpha_possible && !alpha_kept) || (chroma_possible && !chroma_kept)
}

fn intersect_values(a: &FormatList, b: &FormatList) -> Result<Intersection<FormatList>> {
    let common = a.values().iter().filter(|&&v| b.contains(v)).count();
    if common == 0 {
        return Ok(Intersection::Disjoint);
    }
    if common == a.len() {
        return Ok(Intersection::Keep(Side::First));
    }
    if b.values().iter().all(|&v| a.contains(v)) {
        return Ok(Intersection::Keep(Side::Second));
    }

    let mut values: Vec<FormatId> = Vec::new();
    values.try_reserve_exact(common)?;
    values.extend(a.values().iter().copied().filter(|&v| b.contains(v)));
    assert_invariant(
        MERGE_IS_INTERSECTION,
        values.iter().all(|&v| a.contains(v) && b.contains(v)),
        "Merged values are accepted by both operands",
        Some("intersect_values"),
    );
    Ok(Intersection::Replace(FormatList::from_vec(values)))
}

fn intersect_layouts(
    a: &ChannelLayouts,
    b: &ChannelLayouts,
) -> Result<Intersection<ChannelLayouts>> {
    let (generic, specific, specific_side) = if a.genericity() >= b.genericity() {
        (a, b, Side::Second)
    } else {
        (b, a, Side::First)
    };

    match (generic, specific) {
        (ChannelLayouts::Listed(la), ChannelLayouts::Listed(lb)) => intersect_listed(la, lb),
        (ChannelLayouts::AllLayouts, ChannelLayouts::Listed(entries)) => {
            // Bare counts are dropped here even though a later merge could
            // have turned them into known layouts.
            let known = entries.iter().filter(|l| l.is_known()).count();
            if known == 0 {
                Ok(Intersection::Disjoint)
            } else if known == entries.len() {
                Ok(Intersection::Keep(specific_side))
            } else {
                let mut kept = Vec::new();
                kept.try_reserve_exact(known)?;
                kept.extend(entries.iter().copied().filter(|l| l.is_known()));
                Ok(Intersection::Replace(ChannelLayouts::Listed(kept)))
            }
        }
        _ => Ok(Intersection::Keep(specific_side)),
    }
}

fn intersect_listed(
    a: &[ChannelLayout],
    b: &[ChannelLayout],
) -> Result<Intersection<ChannelLayouts>> {
    let mut out = Vec::new();
    out.try_reserve(a.len() + b.len())?;
    let mut a_matched = try_flags(a.len())?;
    let mut b_matched = try_flags(b.len())?;

    // known layouts present on both sides
    for (i, &la) in a.iter().enumerate() {
        if !la.is_known() {
            continue;
        }
        if let Some(j) = (0..b.len()).find(|&j| !b_matched[j] && b[j] == la) {
            out.push(la);
            a_matched[i] = true;
            b_matched[j] = true;
        }
    }
    // known layouts on one side admitted by a bare count on the other
    for (i, &la) in a.iter().enumerate() {
        if la.is_known() && !a_matched[i] && b.contains(&ChannelLayout::Count(la.channels())) {
            out.push(la);
        }
    }
    for (j, &lb) in b.iter().enumerate() {
        if lb.is_known() && !b_matched[j] && a.contains(&ChannelLayout::Count(lb.channels())) {
            out.push(lb);
        }
    }
    // bare counts present on both sides
    for &la in a.iter().filter(|l| !l.is_known()) {
        if b.contains(&la) {
            out.push(la);
        }
    }

    if out.is_empty() {
        return Ok(Intersection::Disjoint);
    }
    assert_invariant(
        MERGE_IS_INTERSECTION,
        out.iter().all(|&l| {
            a.iter().any(|&x| layouts_meet(x, l)) && b.iter().any(|&y| layouts_meet(y, l))
        }),
        "Merged layouts are admitted by both operands",
        Some("intersect_listed"),
    );
    let same_as = |side: &[ChannelLayout]| {
        side.len() == out.len() && side.iter().all(|l| out.contains(l))
    };
    if same_as(a) {
        return Ok(Intersection::Keep(Side::First));
    }
    if same_as(b) {
        return Ok(Intersection::Keep(Side::Second));
    }
    Ok(Intersection::Replace(ChannelLayouts::Listed(out)))
}

fn try_flags(len: usize) -> Result<Vec<bool>> {
    let mut flags = Vec::new();
    flags.try_reserve_exact(len)?;
    flags.resize(len, false);
    Ok(flags)
}
