// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwap;
use portable_atomic::AtomicU128;
use tracing::warn;

use crate::array_map::{PairSlot, UnsafeArrayMap};
use crate::bitset;
use crate::factory::FactoryShared;
use crate::field::BaggageField;

pub(crate) type Slots = Vec<PairSlot<BaggageField, String>>;

const UNCLAIMED: u128 = 0;

fn pack_owner(trace_id: u64, span_id: u64) -> u128 {
    ((trace_id as u128) << 64) | span_id as u128
}

/// Holds the baggage fields of one trace context.
///
/// The field/value pairs live in an immutable array behind an atomically
/// swapped reference. Reads load the current array and never block; every
/// write builds a full copy and publishes it with a single compare-and-swap,
/// so a reader holding an older array can keep using it safely forever.
///
/// A state becomes exclusively owned by one `(trace_id, span_id)` through a
/// one-shot claim on its ownership marker; [`crate::BaggageStateFactory::decorate`]
/// drives claiming and reconciles sibling states that mutated independently.
pub struct BaggageState {
    pub(crate) shared: Arc<FactoryShared>,
    // Packed (trace_id, span_id); zero means unclaimed, so ids are nonzero.
    owner: AtomicU128,
    state: ArcSwap<Slots>,
}

impl BaggageState {
    pub(crate) fn new(shared: Arc<FactoryShared>) -> Self {
        let initial = Arc::clone(&shared.initial_state);
        Self {
            shared,
            owner: AtomicU128::new(UNCLAIMED),
            state: ArcSwap::new(initial),
        }
    }

    /// Claims this state for `(trace_id, span_id)`. Succeeds when unclaimed
    /// or already claimed by the same pair.
    pub(crate) fn try_claim(&self, trace_id: u64, span_id: u64) -> bool {
        let id = pack_owner(trace_id, span_id);
        debug_assert!(id != UNCLAIMED, "trace and span ids must be nonzero");
        match self
            .owner
            .compare_exchange(UNCLAIMED, id, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == id,
        }
    }

    pub(crate) fn load_state(&self) -> Arc<Slots> {
        self.state.load_full()
    }

    pub(crate) fn store_state(&self, slots: Arc<Slots>) {
        self.state.store(slots);
    }

    /// Whether this state still shares the factory's initial array, meaning
    /// no update ever landed.
    pub(crate) fn is_initial_state(&self) -> bool {
        let state = self.state.load();
        Arc::ptr_eq(&*state, &self.shared.initial_state)
    }

    /// When true, fields not declared up front may be appended, and
    /// [`BaggageState::get_all_fields`] cannot be served from a cached list.
    pub fn is_dynamic(&self) -> bool {
        self.shared.is_dynamic
    }

    /// The fields present, regardless of value, in slot order. Not
    /// deduplicated.
    pub fn get_all_fields(&self) -> Vec<BaggageField> {
        if !self.shared.is_dynamic {
            return self.shared.initial_fields.clone();
        }
        let state = self.state.load();
        state.iter().map_while(|slot| slot.key().cloned()).collect()
    }

    /// The value assigned to `field`, or `None` when the field is absent or
    /// unassigned.
    pub fn get_value(&self, field: &BaggageField) -> Option<String> {
        let state = self.state.load();
        let i = index_of_field(&self.shared, &state, field)?;
        state[i].value().cloned()
    }

    /// Read-only view of every current field/value pair.
    pub fn to_map(&self) -> UnsafeArrayMap<BaggageField, String> {
        UnsafeArrayMap::create(self.state.load_full())
    }

    /// Read-only view of the current pairs with `filtered` fields redacted.
    pub fn to_map_filtering_fields(
        &self,
        filtered: &[BaggageField],
    ) -> UnsafeArrayMap<BaggageField, String> {
        self.to_map().filter_keys(filtered)
    }

    /// Records a value change for `field`; `None` clears the assignment.
    ///
    /// Returns true when the underlying state changed. Returns false without
    /// writing when the value is already current, when the field is unknown
    /// and dynamic fields are disallowed, when the dynamic-field cap is
    /// reached, or when the bounded retry budget is exhausted under
    /// contention; the last two also log a warning.
    pub fn update_value(&self, field: &BaggageField, value: Option<&str>) -> bool {
        let mut attempts = self.shared.update_attempts;
        while attempts > 0 {
            let current = self.state.load_full();
            match index_of_field(&self.shared, &current, field) {
                Some(i) => {
                    if current[i].value().map(String::as_str) == value {
                        return false;
                    }
                    // Same field, different value.
                    if self.try_replace_value(&current, i, value) {
                        return true;
                    }
                }
                None => {
                    if !self.shared.is_dynamic {
                        return false; // this policy does not allow new fields
                    }
                    if current.len() + 1 > self.shared.max_dynamic_fields {
                        warn!(
                            "Ignoring request to add more than {} dynamic baggage fields",
                            self.shared.max_dynamic_fields
                        );
                        return false;
                    }
                    if self.try_append_field(&current, field, value) {
                        return true;
                    }
                }
            }
            attempts -= 1;
        }

        warn!(
            "Failed to update baggage field {field} after {} attempts",
            self.shared.update_attempts
        );
        false
    }

    /// Fields are append-only, so a lost race can always be retried against a
    /// fresh read: existing slots never move.
    fn try_replace_value(&self, current: &Arc<Slots>, i: usize, value: Option<&str>) -> bool {
        let mut next: Slots = current.as_ref().clone();
        next[i].value = value.map(str::to_owned);
        self.compare_and_set(current, next)
    }

    fn try_append_field(
        &self,
        current: &Arc<Slots>,
        field: &BaggageField,
        value: Option<&str>,
    ) -> bool {
        let mut next: Slots = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(PairSlot::new(field.clone(), value.map(str::to_owned)));
        self.compare_and_set(current, next)
    }

    fn compare_and_set(&self, expected: &Arc<Slots>, next: Slots) -> bool {
        let previous = self.state.compare_and_swap(expected, Arc::new(next));
        Arc::ptr_eq(&*previous, expected)
    }

    /// Folds `theirs` into this state's current array and returns the result
    /// without publishing it.
    ///
    /// For every field of `theirs`: absent in ours means append; present in
    /// ours with no assigned value means take theirs'; present in ours with a
    /// value means ours wins unconditionally. Appends are bounded by the
    /// dynamic-field cap; additions past it are dropped in scan order with
    /// one logged warning. When nothing would change, the current array is
    /// returned as-is so callers can detect a no-op by identity.
    pub(crate) fn merge_state_keeping_ours_on_conflict(&self, theirs: &BaggageState) -> Arc<Slots> {
        let ours = self.state.load_full();
        let their_state = theirs.state.load_full();

        // Scan first to see whether values change, the array grows, or
        // neither. Slot counts stay within bitset capacity: the factory caps
        // declared and dynamic fields at 64.
        let mut change_in_ours: u64 = 0;
        let mut new_to_ours: u64 = 0;
        for (i, slot) in their_state.iter().enumerate() {
            let Some(their_key) = slot.key() else { break };
            match index_of_field(&self.shared, &ours, their_key) {
                None => new_to_ours = bitset::set_bit(new_to_ours, i),
                Some(our_index) => {
                    if ours[our_index].value().is_some() {
                        continue; // ours wins
                    }
                    if ours[our_index].value != slot.value {
                        change_in_ours = bitset::set_bit(change_in_ours, i);
                    }
                }
            }
        }
        if change_in_ours == 0 && new_to_ours == 0 {
            return ours;
        }

        let capacity_left = self.shared.max_dynamic_fields.saturating_sub(ours.len());
        if bitset::size(new_to_ours) > capacity_left {
            warn!(
                "Ignoring request to add more than {} dynamic baggage fields",
                self.shared.max_dynamic_fields
            );
            let mut kept = 0;
            for i in 0..their_state.len() {
                if !bitset::is_set(new_to_ours, i) {
                    continue;
                }
                if kept < capacity_left {
                    kept += 1;
                } else {
                    new_to_ours = bitset::unset_bit(new_to_ours, i);
                }
            }
            if change_in_ours == 0 && new_to_ours == 0 {
                return ours;
            }
        }

        let mut merged: Slots = Vec::with_capacity(ours.len() + bitset::size(new_to_ours));
        merged.extend(ours.iter().cloned());
        for (i, slot) in their_state.iter().enumerate() {
            let Some(their_key) = slot.key() else { break };
            if bitset::is_set(change_in_ours, i) {
                if let Some(our_index) = index_of_field(&self.shared, &merged, their_key) {
                    merged[our_index].value = slot.value.clone();
                }
            } else if bitset::is_set(new_to_ours, i) {
                merged.push(slot.clone());
            }
        }
        Arc::new(merged)
    }
}

/// Finds the slot of `field`: the precomputed index for declared fields,
/// otherwise a scan of the dynamically appended tail.
pub(crate) fn index_of_field(
    shared: &FactoryShared,
    slots: &[PairSlot<BaggageField, String>],
    field: &BaggageField,
) -> Option<usize> {
    if let Some(&i) = shared.field_indices.get(field) {
        return Some(i);
    }
    for (i, slot) in slots.iter().enumerate().skip(shared.initial_state.len()) {
        match slot.key() {
            None => break,
            Some(key) if key == field => return Some(i),
            Some(_) => {}
        }
    }
    None
}

impl PartialEq for BaggageState {
    fn eq(&self, other: &Self) -> bool {
        self.state.load_full() == other.state.load_full()
    }
}

impl fmt::Debug for BaggageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load_full();
        f.debug_struct("BaggageState")
            .field("state", state.as_ref())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::BaggageStateFactory;
    use pretty_assertions::assert_eq;

    fn field(name: &str) -> BaggageField {
        BaggageField::new(name).unwrap()
    }

    fn static_factory(names: &[&str]) -> BaggageStateFactory {
        let mut builder = BaggageStateFactory::builder();
        for name in names {
            builder.set_field(field(name));
        }
        builder.build().unwrap()
    }

    fn dynamic_factory() -> BaggageStateFactory {
        let mut builder = BaggageStateFactory::builder();
        builder.set_dynamic_fields();
        builder.build().unwrap()
    }

    #[test]
    fn update_and_read_declared_field() {
        let state = static_factory(&["user-id"]).create();
        let user_id = field("user-id");

        assert_eq!(state.get_value(&user_id), None);
        assert!(state.update_value(&user_id, Some("romeo")));
        assert_eq!(state.get_value(&user_id), Some("romeo".to_string()));

        // clearing the assignment keeps the field present
        assert!(state.update_value(&user_id, None));
        assert_eq!(state.get_value(&user_id), None);
        assert_eq!(state.get_all_fields(), vec![user_id]);
    }

    #[test]
    fn redundant_update_reports_no_change() {
        let state = static_factory(&["user-id"]).create();
        let user_id = field("user-id");

        assert!(state.update_value(&user_id, Some("romeo")));
        let before = state.load_state();
        assert!(!state.update_value(&user_id, Some("romeo")));
        assert!(Arc::ptr_eq(&before, &state.load_state()));
    }

    #[test]
    fn unknown_field_is_dropped_when_not_dynamic() {
        let state = static_factory(&["user-id"]).create();
        let before = state.load_state();

        assert!(!state.update_value(&field("country-code"), Some("FO")));
        assert!(Arc::ptr_eq(&before, &state.load_state()));
    }

    #[test]
    fn dynamic_fields_are_appended() {
        let state = dynamic_factory().create();
        let country = field("country-code");
        let user = field("user-id");

        assert!(state.update_value(&country, Some("FO")));
        assert!(state.update_value(&user, Some("romeo")));
        assert_eq!(state.get_value(&country), Some("FO".to_string()));
        assert_eq!(state.get_all_fields(), vec![country, user]);
    }

    #[test]
    fn dynamic_field_cap_is_enforced() {
        let mut builder = BaggageStateFactory::builder();
        builder.set_dynamic_fields().set_max_dynamic_fields(2);
        let state = builder.build().unwrap().create();

        assert!(state.update_value(&field("a"), Some("1")));
        assert!(state.update_value(&field("b"), Some("2")));
        let before = state.load_state();
        assert!(!state.update_value(&field("c"), Some("3")));
        assert!(Arc::ptr_eq(&before, &state.load_state()));

        // existing fields stay updatable at the cap
        assert!(state.update_value(&field("a"), Some("9")));
    }

    #[test]
    fn all_fields_is_cached_for_static_sets() {
        let state = static_factory(&["a", "b"]).create();
        assert_eq!(state.get_all_fields(), vec![field("a"), field("b")]);
        assert!(!state.is_dynamic());
    }

    #[test]
    fn filtered_map_redacts_fields() {
        let state = dynamic_factory().create();
        state.update_value(&field("a"), Some("1"));
        state.update_value(&field("b"), Some("2"));

        let map = state.to_map_filtering_fields(&[field("a")]);
        assert_eq!(map.len(), 1);
        assert!(!map.contains_key(&field("a")));
        assert_eq!(map.get(&field("b")), Some(&"2".to_string()));
    }

    #[test]
    fn merge_keeps_ours_on_conflict() {
        let factory = dynamic_factory();
        let ours = factory.create();
        ours.update_value(&field("a"), Some("1"));
        ours.update_value(&field("b"), None);

        let theirs = factory.create();
        theirs.update_value(&field("a"), Some("2"));
        theirs.update_value(&field("b"), Some("3"));
        theirs.update_value(&field("c"), Some("4"));

        let merged = ours.merge_state_keeping_ours_on_conflict(&theirs);
        ours.store_state(merged);

        assert_eq!(ours.get_value(&field("a")), Some("1".to_string()));
        assert_eq!(ours.get_value(&field("b")), Some("3".to_string()));
        assert_eq!(ours.get_value(&field("c")), Some("4".to_string()));
    }

    #[test]
    fn merge_with_no_changes_returns_ours_by_identity() {
        let factory = dynamic_factory();
        let ours = factory.create();
        ours.update_value(&field("a"), Some("1"));

        let theirs = factory.create();
        theirs.update_value(&field("a"), Some("2"));

        let before = ours.load_state();
        let merged = ours.merge_state_keeping_ours_on_conflict(&theirs);
        assert!(Arc::ptr_eq(&before, &merged));
    }

    #[test]
    fn merge_past_cap_drops_only_overflow_fields() {
        let mut builder = BaggageStateFactory::builder();
        builder.set_dynamic_fields().set_max_dynamic_fields(3);
        let factory = builder.build().unwrap();

        let ours = factory.create();
        ours.update_value(&field("a"), Some("1"));

        let theirs = factory.create();
        theirs.update_value(&field("b"), Some("2"));
        theirs.update_value(&field("c"), Some("3"));
        theirs.update_value(&field("d"), Some("4"));

        let merged = ours.merge_state_keeping_ours_on_conflict(&theirs);
        ours.store_state(merged);

        assert_eq!(ours.get_value(&field("b")), Some("2".to_string()));
        assert_eq!(ours.get_value(&field("c")), Some("3".to_string()));
        assert_eq!(ours.get_value(&field("d")), None);
        assert_eq!(ours.get_all_fields().len(), 3);
    }

    #[test]
    fn claim_is_exclusive_but_reentrant() {
        let state = dynamic_factory().create();
        assert!(state.try_claim(1, 2));
        assert!(state.try_claim(1, 2));
        assert!(!state.try_claim(1, 3));
    }

    #[test]
    fn state_equality_compares_current_arrays() {
        let factory = dynamic_factory();
        let left = factory.create();
        let right = factory.create();
        assert_eq!(&*left, &*right);

        left.update_value(&field("a"), Some("1"));
        assert_ne!(&*left, &*right);

        right.update_value(&field("a"), Some("1"));
        assert_eq!(&*left, &*right);
    }
}
