//! Every fallible update must either complete or leave sets, references and
//! slots exactly as they were when memory runs out.

use auxide_formats::format::{BuiltinCatalog, MediaType};
use auxide_formats::layout::{ChannelLayout, ChannelLayouts};
use auxide_formats::list::FormatList;
use auxide_formats::merge::{merge_channel_layouts, merge_formats};
use auxide_formats::registry::{SetId, SetRegistry, SlotId};
use auxide_formats::{FormatsError, MergeOutcome};
use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;

thread_local! {
    static FAIL_ALLOC: Cell<bool> = const { Cell::new(false) };
}

struct FailingAllocator;

unsafe impl GlobalAlloc for FailingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if FAIL_ALLOC.try_with(Cell::get).unwrap_or(false) {
            return std::ptr::null_mut();
        }
        unsafe { System.alloc(layout) }
    }
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }
}

#[global_allocator]
static A: FailingAllocator = FailingAllocator;

/// Run `f` with every allocation on this thread failing.
fn without_memory<T>(f: impl FnOnce() -> T) -> T {
    FAIL_ALLOC.with(|fail| fail.set(true));
    let out = f();
    FAIL_ALLOC.with(|fail| fail.set(false));
    out
}

/// Exercise every path once with memory available so lazily initialised
/// statics are in place before allocation is switched off.
fn warm_up() {
    let mut reg = SetRegistry::new();
    let slots: Vec<SlotId> = (0..4).map(|_| reg.new_slot()).collect();
    let a = reg
        .attach(FormatList::from_slice(&[1, 2, 3]), &slots[..1])
        .unwrap()
        .unwrap();
    let b = reg
        .attach(FormatList::from_slice(&[2, 3, 4]), &slots[1..2])
        .unwrap()
        .unwrap();
    reg.add_reference(b, slots[2]).unwrap();
    reg.remove_reference(slots[2]);
    merge_formats(&mut reg, a, b, MediaType::Audio, &BuiltinCatalog).unwrap();
    reg.release_slot(slots[1]);
    reg.remove_reference(slots[0]);

    let mut layouts = SetRegistry::new();
    let (la, lb) = (layouts.new_slot(), layouts.new_slot());
    let x = layouts
        .attach(
            ChannelLayouts::from_slice(&[ChannelLayout::STEREO, ChannelLayout::Count(6)]).unwrap(),
            &[la],
        )
        .unwrap()
        .unwrap();
    let y = layouts
        .attach(
            ChannelLayouts::from_slice(&[ChannelLayout::STEREO, ChannelLayout::LAYOUT_5POINT1])
                .unwrap(),
            &[lb],
        )
        .unwrap()
        .unwrap();
    merge_channel_layouts(&mut layouts, x, y).unwrap();

    let mut list = None;
    FormatList::add(&mut list, 1).unwrap();
}

type Snapshot<S> = (Vec<Option<S>>, Vec<Vec<SlotId>>, Vec<Option<SetId>>);

fn snapshot<S: Clone>(reg: &SetRegistry<S>, sets: &[SetId], slots: &[SlotId]) -> Snapshot<S> {
    (
        sets.iter().map(|&id| reg.contents(id).cloned()).collect(),
        sets.iter().map(|&id| reg.refs(id).to_vec()).collect(),
        slots.iter().map(|&slot| reg.get(slot)).collect(),
    )
}

#[test]
fn merge_formats_replace_leaves_operands_intact() {
    warm_up();
    let mut reg = SetRegistry::new();
    let slots: Vec<SlotId> = (0..3).map(|_| reg.new_slot()).collect();
    let a = reg
        .attach(FormatList::from_slice(&[1, 2, 3]), &slots[..1])
        .unwrap()
        .unwrap();
    let b = reg
        .attach(FormatList::from_slice(&[2, 3, 4]), &slots[1..])
        .unwrap()
        .unwrap();
    let before = snapshot(&reg, &[a, b], &slots);

    let result = without_memory(|| {
        merge_formats(&mut reg, a, b, MediaType::Audio, &BuiltinCatalog)
    });
    assert!(matches!(result, Err(FormatsError::Alloc(_))));
    assert_eq!(snapshot(&reg, &[a, b], &slots), before);

    let outcome = merge_formats(&mut reg, a, b, MediaType::Audio, &BuiltinCatalog).unwrap();
    assert_eq!(outcome, MergeOutcome::Merged);
    assert_eq!(reg.set_of(slots[0]).unwrap().values(), &[2, 3]);
}

#[test]
fn merge_formats_keep_fails_when_refs_cannot_grow() {
    warm_up();
    let mut reg = SetRegistry::new();
    let slots: Vec<SlotId> = (0..2).map(|_| reg.new_slot()).collect();
    let a = reg
        .attach(FormatList::from_slice(&[1, 2]), &slots[..1])
        .unwrap()
        .unwrap();
    let b = reg
        .attach(FormatList::from_slice(&[1, 2, 3]), &slots[1..])
        .unwrap()
        .unwrap();
    let before = snapshot(&reg, &[a, b], &slots);

    let result = without_memory(|| {
        merge_formats(&mut reg, a, b, MediaType::Audio, &BuiltinCatalog)
    });
    assert!(matches!(result, Err(FormatsError::Alloc(_))));
    assert_eq!(snapshot(&reg, &[a, b], &slots), before);
    assert_eq!(reg.live_sets(), 2);
}

#[test]
fn merge_channel_layouts_listed_leaves_operands_intact() {
    warm_up();
    let mut reg = SetRegistry::new();
    let slots: Vec<SlotId> = (0..2).map(|_| reg.new_slot()).collect();
    let a = reg
        .attach(
            ChannelLayouts::from_slice(&[ChannelLayout::STEREO, ChannelLayout::Count(6)]).unwrap(),
            &slots[..1],
        )
        .unwrap()
        .unwrap();
    let b = reg
        .attach(
            ChannelLayouts::from_slice(&[
                ChannelLayout::STEREO,
                ChannelLayout::LAYOUT_5POINT1,
                ChannelLayout::MONO,
            ])
            .unwrap(),
            &slots[1..],
        )
        .unwrap()
        .unwrap();
    let before = snapshot(&reg, &[a, b], &slots);

    let result = without_memory(|| merge_channel_layouts(&mut reg, a, b));
    assert!(matches!(result, Err(FormatsError::Alloc(_))));
    assert_eq!(snapshot(&reg, &[a, b], &slots), before);

    assert_eq!(merge_channel_layouts(&mut reg, a, b).unwrap(), MergeOutcome::Merged);
    assert_eq!(
        reg.set_of(slots[1]).unwrap().layouts(),
        &[ChannelLayout::STEREO, ChannelLayout::LAYOUT_5POINT1]
    );
}

#[test]
fn attach_stores_nothing_without_memory() {
    warm_up();
    let mut reg = SetRegistry::new();
    let slots: Vec<SlotId> = (0..2).map(|_| reg.new_slot()).collect();
    let list = FormatList::from_slice(&[7, 8]);

    let result = without_memory(|| reg.attach(list, &slots));
    assert!(matches!(result, Err(FormatsError::Alloc(_))));
    assert_eq!(reg.live_sets(), 0);
    assert!(slots.iter().all(|&slot| reg.get(slot).is_none()));

    let id = reg
        .attach(FormatList::from_slice(&[7, 8]), &slots)
        .unwrap()
        .unwrap();
    assert_eq!(reg.refs(id), slots.as_slice());
}

#[test]
fn add_reference_fails_cleanly_when_refs_are_full() {
    warm_up();
    let mut reg = SetRegistry::new();
    let slots: Vec<SlotId> = (0..2).map(|_| reg.new_slot()).collect();
    let id = reg
        .attach(FormatList::from_slice(&[1]), &slots[..1])
        .unwrap()
        .unwrap();
    let before = snapshot(&reg, &[id], &slots);

    let result = without_memory(|| reg.add_reference(id, slots[1]));
    assert!(matches!(result, Err(FormatsError::Alloc(_))));
    assert_eq!(snapshot(&reg, &[id], &slots), before);
}

#[test]
fn reference_updates_with_spare_capacity_need_no_memory() {
    warm_up();
    let mut reg = SetRegistry::new();
    let slots: Vec<SlotId> = (0..4).map(|_| reg.new_slot()).collect();
    let id = reg
        .attach(FormatList::from_slice(&[1]), &slots[..3])
        .unwrap()
        .unwrap();
    reg.remove_reference(slots[2]);

    without_memory(|| reg.add_reference(id, slots[3])).unwrap();
    assert_eq!(reg.refs(id), &[slots[0], slots[1], slots[3]]);

    without_memory(|| {
        reg.remove_reference(slots[0]);
        reg.remove_reference(slots[1]);
        reg.remove_reference(slots[3]);
    });
    assert!(!reg.is_live(id));
    assert_eq!(reg.live_sets(), 0);
}

#[test]
fn format_list_add_keeps_list_without_memory() {
    warm_up();
    let mut empty: Option<FormatList> = None;
    let result = without_memory(|| FormatList::add(&mut empty, 1));
    assert!(matches!(result, Err(FormatsError::Alloc(_))));
    assert!(empty.is_none());

    let mut full = Some(FormatList::from_slice(&[1, 2]));
    let result = without_memory(|| FormatList::add(&mut full, 3));
    assert!(matches!(result, Err(FormatsError::Alloc(_))));
    assert_eq!(full.unwrap().values(), &[1, 2]);
}

#[test]
fn channel_layouts_add_keeps_list_without_memory() {
    warm_up();
    let mut empty: Option<ChannelLayouts> = None;
    let result = without_memory(|| ChannelLayouts::add(&mut empty, ChannelLayout::MONO));
    assert!(matches!(result, Err(FormatsError::Alloc(_))));
    assert!(empty.is_none());

    let mut full = Some(ChannelLayouts::Listed(vec![
        ChannelLayout::MONO,
        ChannelLayout::STEREO,
    ]));
    let result = without_memory(|| ChannelLayouts::add(&mut full, ChannelLayout::LAYOUT_5POINT1));
    assert!(matches!(result, Err(FormatsError::Alloc(_))));
    assert_eq!(
        full.unwrap().layouts(),
        &[ChannelLayout::MONO, ChannelLayout::STEREO]
    );
}
