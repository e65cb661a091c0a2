//! Reference registry: an arena of shared format sets and the slots that point at them.
//!
//! Links never hold a set directly. They hold a [`SlotId`]; the registry stores
//! what each slot currently points at and, for every set, the
//! list of slots pointing back at it. That reverse index is what lets a merge
//! repoint every link that referenced either operand in one step.
//!
//! A set lives exactly as long as at least one slot references it. Sets enter
//! the arena through [`SetRegistry::attach`], which references them from their
//! first slots in the same call, so an unreferenced set is never stored.

use crate::error::{FormatsError, MergeOutcome, Result};
use crate::invariant_ppt::{
    assert_invariant, INSTALL_ALL_OR_NOTHING, MERGE_RETARGETS_ALL, REFCOUNT_MATCHES_REFS,
    SLOTS_POINT_TO_OWNER, UNREF_FREES_LAST,
};

/// Handle to a set stored in a [`SetRegistry`].
///
/// Handles are generational: once the set is freed, the handle stays invalid
/// even if its storage is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetId {
    index: u32,
    generation: u32,
}

/// Handle to a backpointer slot owned by an external structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub(crate) usize);

impl SlotId {
    /// Raw index of the slot.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Which operand of a merge survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    First,
    Second,
}

/// Result of a kind-specific intersection.
#[derive(Debug)]
pub(crate) enum Intersection<S> {
    /// Nothing is accepted by both operands.
    Disjoint,
    /// The intersection equals this operand's current contents.
    Keep(Side),
    /// The intersection is new contents.
    Replace(S),
}

#[derive(Debug)]
struct SetEntry<S> {
    contents: S,
    refs: Vec<SlotId>,
}

#[derive(Debug)]
struct Occupant<S> {
    generation: u32,
    entry: Option<SetEntry<S>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Vacant,
    Held(SetId),
    /// Handed back by its owner; waiting in `free_slots` for `new_slot`.
    Released,
}

/// Arena of shared sets of type `S` and the slots that reference them.
#[derive(Debug)]
pub struct SetRegistry<S> {
    sets: Vec<Occupant<S>>,
    free: Vec<u32>,
    slots: Vec<SlotState>,
    free_slots: Vec<usize>,
}

impl<S> Default for SetRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SetRegistry<S> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sets: Vec::new(),
            free: Vec::new(),
            slots: Vec::new(),
            free_slots: Vec::new(),
        }
    }

    /// Create an empty slot for an external owner, reusing a released one if any.
    pub fn new_slot(&mut self) -> SlotId {
        if let Some(index) = self.free_slots.pop() {
            self.slots[index] = SlotState::Vacant;
            return SlotId(index);
        }
        self.slots.push(SlotState::Vacant);
        SlotId(self.slots.len() - 1)
    }

    /// Drop whatever `slot` references and hand the slot back for reuse.
    ///
    /// The owner must not use `slot` afterwards; until [`SetRegistry::new_slot`]
    /// hands it out again it behaves like an unknown slot.
    pub fn release_slot(&mut self, slot: SlotId) {
        if !matches!(
            self.slots.get(slot.0),
            Some(SlotState::Vacant | SlotState::Held(_))
        ) {
            return;
        }
        self.remove_reference(slot);
        // Without room to record it the slot just stays vacant.
        if self.free_slots.try_reserve(1).is_ok() {
            self.slots[slot.0] = SlotState::Released;
            self.free_slots.push(slot.0);
        }
        tracing::debug!("release_slot: slot {} released", slot.0);
    }

    /// Number of slots ever handed out, released ones included.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The set `slot` currently points at.
    pub fn get(&self, slot: SlotId) -> Option<SetId> {
        match self.slots.get(slot.0) {
            Some(SlotState::Held(id)) => Some(*id),
            _ => None,
        }
    }

    /// Contents of the set `slot` currently points at.
    pub fn set_of(&self, slot: SlotId) -> Option<&S> {
        self.get(slot).and_then(|id| self.contents(id))
    }

    /// Contents of a live set.
    pub fn contents(&self, id: SetId) -> Option<&S> {
        self.entry(id).map(|e| &e.contents)
    }

    /// Number of slots referencing the set; 0 once it has been freed.
    pub fn refcount(&self, id: SetId) -> usize {
        self.entry(id).map_or(0, |e| e.refs.len())
    }

    /// Slots referencing the set, in the order they were added.
    pub fn refs(&self, id: SetId) -> &[SlotId] {
        self.entry(id).map_or(&[], |e| e.refs.as_slice())
    }

    /// Whether the handle still names a live set.
    pub fn is_live(&self, id: SetId) -> bool {
        self.entry(id).is_some()
    }

    /// Number of live sets.
    pub fn live_sets(&self) -> usize {
        self.sets.iter().filter(|o| o.entry.is_some()).count()
    }

    /// Store `contents` as a new set referenced from every slot in `slots`.
    ///
    /// With no slots the contents are dropped and `Ok(None)` is returned.
    /// Fails without touching any slot if one is unknown, already in use, listed
    /// twice, or if storage cannot grow.
    pub fn attach(&mut self, contents: S, slots: &[SlotId]) -> Result<Option<SetId>> {
        if slots.is_empty() {
            tracing::debug!("attach: no slots, dropping set");
            return Ok(None);
        }
        for (i, &slot) in slots.iter().enumerate() {
            self.check_vacant(slot)?;
            if slots[..i].contains(&slot) {
                return Err(FormatsError::SlotInUse(slot.0));
            }
        }

        let mut refs = Vec::new();
        refs.try_reserve_exact(slots.len())?;
        refs.extend_from_slice(slots);
        if self.free.is_empty() {
            self.sets.try_reserve(1)?;
            // Room for every index to come back, so freeing never allocates.
            self.free.try_reserve(self.sets.len() + 1)?;
        }

        let entry = SetEntry { contents, refs };
        let id = match self.free.pop() {
            Some(index) => {
                let occupant = &mut self.sets[index as usize];
                occupant.entry = Some(entry);
                SetId {
                    index,
                    generation: occupant.generation,
                }
            }
            None => {
                self.sets.push(Occupant {
                    generation: 0,
                    entry: Some(entry),
                });
                SetId {
                    index: (self.sets.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        for &slot in slots {
            self.slots[slot.0] = SlotState::Held(id);
        }

        assert_invariant(
            INSTALL_ALL_OR_NOTHING,
            slots.iter().all(|&s| self.get(s) == Some(id)),
            "Every slot references the attached set",
            Some("attach"),
        );
        self.check_backpointers(id, "attach");
        tracing::debug!("attach: set {:?} with {} references", id, slots.len());
        Ok(Some(id))
    }

    /// Record `slot` as a reference to `id` and point the slot at it.
    pub fn add_reference(&mut self, id: SetId, slot: SlotId) -> Result<()> {
        self.check_vacant(slot)?;
        let entry = self.entry_mut(id).ok_or(FormatsError::UnknownSet)?;
        entry.refs.try_reserve(1)?;
        entry.refs.push(slot);
        self.slots[slot.0] = SlotState::Held(id);

        self.check_backpointers(id, "add_reference");
        tracing::debug!("add_reference: slot {} -> set {:?}", slot.0, id);
        Ok(())
    }

    /// Drop the reference held by `slot`, freeing the set if it was the last one.
    ///
    /// An empty or unknown slot is left alone. The slot is always empty afterwards.
    pub fn remove_reference(&mut self, slot: SlotId) {
        let Some(id) = self.get(slot) else {
            return;
        };
        self.slots[slot.0] = SlotState::Vacant;

        let Some(entry) = self.entry_mut(id) else {
            return;
        };
        if let Some(pos) = entry.refs.iter().position(|&s| s == slot) {
            entry.refs.remove(pos);
        }
        let remaining = entry.refs.len();
        if remaining == 0 {
            self.free_set(id);
            assert_invariant(
                UNREF_FREES_LAST,
                !self.is_live(id),
                "Set freed with its last reference",
                Some("remove_reference"),
            );
            tracing::debug!(
                "remove_reference: slot {} released last reference, set {:?} freed",
                slot.0,
                id
            );
        } else {
            self.check_backpointers(id, "remove_reference");
            tracing::debug!(
                "remove_reference: slot {} released set {:?}, {} left",
                slot.0,
                id,
                remaining
            );
        }
    }

    /// Move the reference held by `old` to `new` without changing the set.
    ///
    /// Does nothing if `old` is empty. `new` must be empty.
    pub fn change_reference(&mut self, old: SlotId, new: SlotId) -> Result<()> {
        if old.0 >= self.slots.len() {
            return Err(FormatsError::UnknownSlot(old.0));
        }
        let Some(id) = self.get(old) else {
            return Ok(());
        };
        if old == new {
            return Ok(());
        }
        self.check_vacant(new)?;

        let entry = self.entry_mut(id).ok_or(FormatsError::UnknownSet)?;
        if let Some(r) = entry.refs.iter_mut().find(|r| **r == old) {
            *r = new;
        }
        self.slots[new.0] = SlotState::Held(id);
        self.slots[old.0] = SlotState::Vacant;

        self.check_backpointers(id, "change_reference");
        tracing::debug!("change_reference: set {:?} moved from slot {} to {}", id, old.0, new.0);
        Ok(())
    }

    /// Repoint every slot referencing `from` at `to` and free `from`.
    ///
    /// `from` and `to` must be distinct live sets. Returns the contents `from`
    /// held. On failure nothing has changed.
    pub fn retarget_all(&mut self, from: SetId, to: SetId) -> Result<S> {
        if from == to {
            return Err(FormatsError::UnknownSet);
        }
        let moving = self.entry(from).ok_or(FormatsError::UnknownSet)?.refs.len();
        let target = self.entry_mut(to).ok_or(FormatsError::UnknownSet)?;
        target.refs.try_reserve(moving)?;

        let drained = self.sets[from.index as usize]
            .entry
            .take()
            .ok_or(FormatsError::UnknownSet)?;
        self.release_index(from);

        for &slot in &drained.refs {
            self.slots[slot.0] = SlotState::Held(to);
        }
        if let Some(target) = self.entry_mut(to) {
            target.refs.extend_from_slice(&drained.refs);
        }

        assert_invariant(
            MERGE_RETARGETS_ALL,
            drained.refs.iter().all(|&s| self.get(s) == Some(to)),
            "Every drained slot points at the target",
            Some("retarget_all"),
        );
        self.check_backpointers(to, "retarget_all");
        tracing::debug!("retarget_all: {} references moved {:?} -> {:?}", moving, from, to);
        Ok(drained.contents)
    }

    /// Generic merge engine shared by every set kind.
    ///
    /// `intersect` inspects both operands without mutating them. Nothing is
    /// written until the intersection is known and every allocation it needs has
    /// succeeded, so `Incompatible` and errors leave both sets untouched.
    pub(crate) fn merge_with<F>(&mut self, a: SetId, b: SetId, intersect: F) -> Result<MergeOutcome>
    where
        F: FnOnce(&S, &S) -> Result<Intersection<S>>,
    {
        let refs_a = self.entry(a).ok_or(FormatsError::UnknownSet)?.refs.len();
        let refs_b = self.entry(b).ok_or(FormatsError::UnknownSet)?.refs.len();
        if refs_a == 0 || refs_b == 0 {
            return Err(FormatsError::Unreferenced);
        }
        if a == b {
            return Ok(MergeOutcome::Merged);
        }

        let intersection = match (self.contents(a), self.contents(b)) {
            (Some(ca), Some(cb)) => intersect(ca, cb)?,
            _ => return Err(FormatsError::UnknownSet),
        };

        let (survivor, loser, replacement) = match intersection {
            Intersection::Disjoint => {
                tracing::debug!("merge: {:?} and {:?} are incompatible", a, b);
                return Ok(MergeOutcome::Incompatible);
            }
            Intersection::Keep(Side::First) => (a, b, None),
            Intersection::Keep(Side::Second) => (b, a, None),
            // Fewer slots to rewrite if the better-referenced set survives.
            Intersection::Replace(contents) if refs_a >= refs_b => (a, b, Some(contents)),
            Intersection::Replace(contents) => (b, a, Some(contents)),
        };

        let expected = refs_a + refs_b;
        let moving = self.refcount(loser);
        self.entry_mut(survivor)
            .ok_or(FormatsError::UnknownSet)?
            .refs
            .try_reserve(moving)?;
        self.retarget_all(loser, survivor)?;
        if let (Some(contents), Some(target)) = (replacement, self.entry_mut(survivor)) {
            target.contents = contents;
        }

        assert_invariant(
            MERGE_RETARGETS_ALL,
            self.refcount(survivor) == expected,
            "Survivor holds every reference of both operands",
            Some("merge"),
        );
        tracing::debug!("merge: {:?} + {:?} -> {:?} ({} references)", a, b, survivor, expected);
        Ok(MergeOutcome::Merged)
    }

    fn entry(&self, id: SetId) -> Option<&SetEntry<S>> {
        self.sets
            .get(id.index as usize)
            .filter(|o| o.generation == id.generation)
            .and_then(|o| o.entry.as_ref())
    }

    fn entry_mut(&mut self, id: SetId) -> Option<&mut SetEntry<S>> {
        self.sets
            .get_mut(id.index as usize)
            .filter(|o| o.generation == id.generation)
            .and_then(|o| o.entry.as_mut())
    }

    fn check_vacant(&self, slot: SlotId) -> Result<()> {
        match self.slots.get(slot.0) {
            None | Some(SlotState::Released) => Err(FormatsError::UnknownSlot(slot.0)),
            Some(SlotState::Held(_)) => Err(FormatsError::SlotInUse(slot.0)),
            Some(SlotState::Vacant) => Ok(()),
        }
    }

    fn free_set(&mut self, id: SetId) {
        if let Some(occupant) = self.sets.get_mut(id.index as usize) {
            if occupant.generation == id.generation {
                occupant.entry = None;
                self.release_index(id);
            }
        }
    }

    fn release_index(&mut self, id: SetId) {
        let occupant = &mut self.sets[id.index as usize];
        occupant.generation = occupant.generation.wrapping_add(1);
        self.free.push(id.index);
    }

    fn check_backpointers(&self, id: SetId, context: &str) {
        let refs = self.refs(id);
        assert_invariant(
            REFCOUNT_MATCHES_REFS,
            refs.iter()
                .enumerate()
                .all(|(i, slot)| !refs[i + 1..].contains(slot)),
            "Each slot is registered once",
            Some(context),
        );
        assert_invariant(
            SLOTS_POINT_TO_OWNER,
            refs.iter().all(|&s| self.get(s) == Some(id)),
            "Every registered slot points back at its set",
            Some(context),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_slots(n: usize) -> (SetRegistry<Vec<i32>>, Vec<SlotId>) {
        let mut reg = SetRegistry::new();
        let slots = (0..n).map(|_| reg.new_slot()).collect();
        (reg, slots)
    }

    #[test]
    fn attach_with_no_slots_drops_contents() {
        let (mut reg, _) = registry_with_slots(0);
        assert!(reg.attach(vec![1, 2], &[]).unwrap().is_none());
        assert_eq!(reg.live_sets(), 0);
    }

    #[test]
    fn attach_rejects_duplicate_slot_atomically() {
        let (mut reg, slots) = registry_with_slots(2);
        let err = reg.attach(vec![1], &[slots[0], slots[1], slots[0]]).unwrap_err();
        assert!(matches!(err, FormatsError::SlotInUse(0)));
        assert!(reg.get(slots[0]).is_none());
        assert!(reg.get(slots[1]).is_none());
        assert_eq!(reg.live_sets(), 0);
    }

    #[test]
    fn add_then_remove_frees_on_last() {
        let (mut reg, slots) = registry_with_slots(2);
        let id = reg.attach(vec![7], &[slots[0]]).unwrap().unwrap();
        reg.add_reference(id, slots[1]).unwrap();
        assert_eq!(reg.refcount(id), 2);

        reg.remove_reference(slots[0]);
        assert!(reg.get(slots[0]).is_none());
        assert_eq!(reg.refcount(id), 1);
        assert!(reg.is_live(id));

        reg.remove_reference(slots[1]);
        assert!(reg.get(slots[1]).is_none());
        assert!(!reg.is_live(id));
        assert_eq!(reg.refcount(id), 0);
    }

    #[test]
    fn remove_reference_on_empty_slot_is_noop() {
        let (mut reg, slots) = registry_with_slots(1);
        reg.remove_reference(slots[0]);
        reg.remove_reference(SlotId(99));
        assert!(reg.get(slots[0]).is_none());
    }

    #[test]
    fn add_reference_to_occupied_slot_fails() {
        let (mut reg, slots) = registry_with_slots(2);
        let a = reg.attach(vec![1], &[slots[0]]).unwrap().unwrap();
        let b = reg.attach(vec![2], &[slots[1]]).unwrap().unwrap();
        assert!(matches!(
            reg.add_reference(a, slots[1]),
            Err(FormatsError::SlotInUse(1))
        ));
        assert_eq!(reg.get(slots[1]), Some(b));
        assert_eq!(reg.refcount(a), 1);
    }

    #[test]
    fn stale_handle_after_slot_reuse() {
        let (mut reg, slots) = registry_with_slots(1);
        let old = reg.attach(vec![1], &[slots[0]]).unwrap().unwrap();
        reg.remove_reference(slots[0]);
        let new = reg.attach(vec![2], &[slots[0]]).unwrap().unwrap();
        assert_ne!(old, new);
        assert!(!reg.is_live(old));
        let spare = reg.new_slot();
        assert!(matches!(
            reg.add_reference(old, spare),
            Err(FormatsError::UnknownSet)
        ));
        assert!(reg.get(spare).is_none());
        assert_eq!(reg.contents(new), Some(&vec![2]));
    }

    #[test]
    fn change_reference_moves_backpointer() {
        let (mut reg, slots) = registry_with_slots(3);
        let id = reg.attach(vec![1], &[slots[0], slots[1]]).unwrap().unwrap();
        reg.change_reference(slots[0], slots[2]).unwrap();
        assert!(reg.get(slots[0]).is_none());
        assert_eq!(reg.get(slots[2]), Some(id));
        assert_eq!(reg.refs(id), &[slots[2], slots[1]]);
    }

    #[test]
    fn change_reference_from_empty_slot_is_noop() {
        let (mut reg, slots) = registry_with_slots(2);
        reg.change_reference(slots[0], slots[1]).unwrap();
        assert!(reg.get(slots[1]).is_none());
    }

    #[test]
    fn retarget_all_moves_every_slot() {
        let (mut reg, slots) = registry_with_slots(4);
        let a = reg.attach(vec![1], &[slots[0], slots[1]]).unwrap().unwrap();
        let b = reg.attach(vec![2], &[slots[2], slots[3]]).unwrap().unwrap();
        let drained = reg.retarget_all(a, b).unwrap();
        assert_eq!(drained, vec![1]);
        assert!(!reg.is_live(a));
        assert_eq!(reg.refcount(b), 4);
        for slot in slots {
            assert_eq!(reg.get(slot), Some(b));
        }
    }

    #[test]
    fn merge_with_disjoint_touches_nothing() {
        let (mut reg, slots) = registry_with_slots(2);
        let a = reg.attach(vec![1], &[slots[0]]).unwrap().unwrap();
        let b = reg.attach(vec![2], &[slots[1]]).unwrap().unwrap();
        let outcome = reg.merge_with(a, b, |_, _| Ok(Intersection::Disjoint)).unwrap();
        assert_eq!(outcome, MergeOutcome::Incompatible);
        assert_eq!(reg.contents(a), Some(&vec![1]));
        assert_eq!(reg.contents(b), Some(&vec![2]));
        assert_eq!(reg.refs(a), &[slots[0]]);
        assert_eq!(reg.refs(b), &[slots[1]]);
    }

    #[test]
    fn merge_with_replace_keeps_better_referenced_set() {
        let (mut reg, slots) = registry_with_slots(3);
        let a = reg.attach(vec![1, 2], &[slots[0]]).unwrap().unwrap();
        let b = reg.attach(vec![2, 3], &[slots[1], slots[2]]).unwrap().unwrap();
        let outcome = reg
            .merge_with(a, b, |_, _| Ok(Intersection::Replace(vec![2])))
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Merged);
        assert!(!reg.is_live(a));
        assert_eq!(reg.contents(b), Some(&vec![2]));
        assert_eq!(reg.refcount(b), 3);
    }

    #[test]
    fn merge_with_freed_set_fails() {
        let (mut reg, slots) = registry_with_slots(2);
        let a = reg.attach(vec![1], &[slots[0]]).unwrap().unwrap();
        let b = reg.attach(vec![1], &[slots[1]]).unwrap().unwrap();
        reg.remove_reference(slots[0]);
        assert!(matches!(
            reg.merge_with(a, b, |_, _| Ok(Intersection::Keep(Side::First))),
            Err(FormatsError::UnknownSet)
        ));
        assert_eq!(reg.refcount(b), 1);
    }

    #[test]
    fn merge_with_same_set_is_trivial() {
        let (mut reg, slots) = registry_with_slots(2);
        let a = reg.attach(vec![1], &[slots[0], slots[1]]).unwrap().unwrap();
        let outcome = reg
            .merge_with(a, a, |_, _| panic!("intersection must not run"))
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Merged);
        assert_eq!(reg.refcount(a), 2);
    }

    #[test]
    fn released_slot_is_reused_and_unusable_until_then() {
        let (mut reg, slots) = registry_with_slots(3);
        let id = reg.attach(vec![1], &[slots[0], slots[1]]).unwrap().unwrap();
        reg.release_slot(slots[0]);
        reg.release_slot(slots[0]);
        assert_eq!(reg.refs(id), &[slots[1]]);
        assert!(matches!(
            reg.add_reference(id, slots[0]),
            Err(FormatsError::UnknownSlot(0))
        ));

        let again = reg.new_slot();
        assert_eq!(again, slots[0]);
        assert!(reg.get(again).is_none());
        reg.add_reference(id, again).unwrap();
        assert_eq!(reg.slot_count(), 3);
        assert_eq!(reg.new_slot(), SlotId(3));
    }

    #[test]
    fn releasing_last_slot_frees_set() {
        let (mut reg, slots) = registry_with_slots(1);
        let id = reg.attach(vec![1], &[slots[0]]).unwrap().unwrap();
        reg.release_slot(slots[0]);
        assert!(!reg.is_live(id));
        assert_eq!(reg.live_sets(), 0);
    }
}
