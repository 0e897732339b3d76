// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::Arc;

use crate::bitset;

/// Most keys that can be redacted from one [`UnsafeArrayMap`] view.
pub const MAX_FILTERED_KEYS: usize = bitset::MAX_SIZE;

/// One key/value slot of a packed pair array.
///
/// A `None` key marks the end of the used range: scanning stops at the first
/// one and everything at or after it is ignored. A present key may still
/// carry a `None` value, meaning the field exists but nothing was assigned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairSlot<K, V> {
    pub(crate) key: Option<K>,
    pub(crate) value: Option<V>,
}

impl<K, V> PairSlot<K, V> {
    pub fn new(key: K, value: Option<V>) -> Self {
        Self {
            key: Some(key),
            value,
        }
    }

    /// An end-of-data sentinel slot.
    pub fn sentinel() -> Self {
        Self {
            key: None,
            value: None,
        }
    }

    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }
}

/// The shared backing storage of an [`UnsafeArrayMap`].
pub type PairArray<K, V> = Arc<Vec<PairSlot<K, V>>>;

/// A read-only map view over a shared array of key/value slots.
///
/// The backing array is shared with the caller to [`UnsafeArrayMap::create`]
/// rather than copied, hence being called "unsafe": the view trusts the
/// caller to keep keys unique within the used range and to never mutate an
/// array it has already published. This supports cheap views over
/// copy-on-write arrays; many views may share one backing array.
///
/// An input with no keys coerces to the detached empty view, which holds no
/// backing reference at all.
pub struct UnsafeArrayMap<K, V> {
    slots: Option<PairArray<K, V>>,
    // Index of the first sentinel slot; the logical pair count before
    // redaction.
    to_index: usize,
    // Bit i set means the pair at slot i is hidden from every operation.
    filtered: u64,
    len: usize,
}

impl<K, V> Clone for UnsafeArrayMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            to_index: self.to_index,
            filtered: self.filtered,
            len: self.len,
        }
    }
}

impl<K, V> UnsafeArrayMap<K, V> {
    /// The empty view. Holds no backing array.
    pub fn empty() -> Self {
        Self {
            slots: None,
            to_index: 0,
            filtered: 0,
            len: 0,
        }
    }

    /// Builds a view over `slots`, bounded to the range before the first
    /// sentinel. The input is neither copied nor mutated.
    pub fn create(slots: PairArray<K, V>) -> Self {
        let mut to_index = 0;
        while to_index < slots.len() && slots[to_index].key.is_some() {
            to_index += 1;
        }
        if to_index == 0 {
            return Self::empty();
        }
        Self {
            slots: Some(slots),
            to_index,
            filtered: 0,
            len: to_index,
        }
    }

    /// The number of visible pairs.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn backing(&self) -> &[PairSlot<K, V>] {
        match &self.slots {
            Some(slots) => slots.as_slice(),
            None => &[],
        }
    }

    /// Iterates the visible pairs in scan order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            cursor: Cursor::new(self),
        }
    }

    /// Iterates the visible keys in scan order.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys {
            cursor: Cursor::new(self),
        }
    }

    /// Iterates the visible values in scan order, `None` for unassigned ones.
    pub fn values(&self) -> Values<'_, K, V> {
        Values {
            cursor: Cursor::new(self),
        }
    }
}

impl<K: PartialEq, V> UnsafeArrayMap<K, V> {
    fn slot_index_of_key(&self, key: &K) -> Option<usize> {
        let slots = self.backing();
        (0..self.to_index).find(|&i| {
            !bitset::is_set(self.filtered, i) && slots[i].key.as_ref() == Some(key)
        })
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.slot_index_of_key(key).is_some()
    }

    /// Looks up the value mapped to `key`.
    ///
    /// Returns `None` both when the key is absent and when it is present with
    /// no assigned value; use [`UnsafeArrayMap::contains_key`] to tell the
    /// two apart.
    pub fn get(&self, key: &K) -> Option<&V> {
        let i = self.slot_index_of_key(key)?;
        self.backing()[i].value.as_ref()
    }

    /// Redacts every visible slot whose key equals one of `filtered_keys`.
    ///
    /// Already-redacted slots are not scanned, so filtering is cumulative and
    /// idempotent. When nothing newly matches, the view is returned
    /// unchanged; when every remaining pair matches, the detached empty view
    /// is returned.
    ///
    /// # Panics
    ///
    /// Panics when more than [`MAX_FILTERED_KEYS`] keys are passed, or when
    /// the view spans more than [`MAX_FILTERED_KEYS`] pairs (individual slots
    /// past that capacity cannot be marked).
    pub fn filter_keys(&self, filtered_keys: &[K]) -> Self {
        if filtered_keys.is_empty() {
            return self.clone();
        }
        assert!(
            filtered_keys.len() <= MAX_FILTERED_KEYS,
            "cannot redact more than {MAX_FILTERED_KEYS} keys"
        );
        assert!(
            self.to_index <= MAX_FILTERED_KEYS,
            "cannot redact keys of a map wider than {MAX_FILTERED_KEYS} pairs"
        );
        let Some(slots) = &self.slots else {
            return Self::empty();
        };

        let mut filtered = self.filtered;
        for i in 0..self.to_index {
            if bitset::is_set(self.filtered, i) {
                continue;
            }
            let key = slots[i].key.as_ref();
            if filtered_keys.iter().any(|candidate| Some(candidate) == key) {
                filtered = bitset::set_bit(filtered, i);
            }
        }

        if filtered == self.filtered {
            return self.clone();
        }
        if bitset::size(filtered) == self.to_index {
            return Self::empty();
        }
        Self {
            slots: Some(Arc::clone(slots)),
            to_index: self.to_index,
            filtered,
            len: self.to_index - bitset::size(filtered),
        }
    }
}

impl<K, V: PartialEq> UnsafeArrayMap<K, V> {
    /// Whether any visible pair carries `value`; `None` matches unassigned
    /// values only.
    pub fn contains_value(&self, value: Option<&V>) -> bool {
        let slots = self.backing();
        (0..self.to_index).any(|i| {
            !bitset::is_set(self.filtered, i) && slots[i].value.as_ref() == value
        })
    }
}

impl<K: Clone, V: Clone> UnsafeArrayMap<K, V> {
    /// Copies the visible keys into `dest` in scan order.
    ///
    /// The destination's allocation is reused when its capacity suffices and
    /// replaced otherwise; the result never aliases the backing array.
    pub fn copy_keys_into(&self, dest: &mut Vec<K>) {
        dest.clear();
        dest.extend(self.keys().cloned());
    }

    /// Copies the visible values into `dest` in scan order, `None` for
    /// unassigned ones. Same allocation contract as
    /// [`UnsafeArrayMap::copy_keys_into`].
    pub fn copy_values_into(&self, dest: &mut Vec<Option<V>>) {
        dest.clear();
        dest.extend(self.values().map(|value| value.cloned()));
    }

    /// Copies the visible pairs into `dest` in scan order. Same allocation
    /// contract as [`UnsafeArrayMap::copy_keys_into`].
    pub fn copy_entries_into(&self, dest: &mut Vec<Entry<K, V>>) {
        dest.clear();
        dest.extend(
            self.iter()
                .map(|entry| Entry::new((*entry.key).clone(), entry.value.cloned())),
        );
    }
}

impl<K: fmt::Display, V: fmt::Display> fmt::Display for UnsafeArrayMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UnsafeArrayMap{")?;
        let mut first = true;
        for entry in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            match entry.value {
                Some(value) => write!(f, "{}={}", entry.key, value)?,
                None => write!(f, "{}=null", entry.key)?,
            }
        }
        f.write_str("}")
    }
}

/// One visible key/value pair of an [`UnsafeArrayMap`].
///
/// Two entries are equal iff both their keys and their values are equal; an
/// unassigned value only equals another unassigned value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Entry<K, V> {
    key: K,
    value: Option<V>,
}

impl<K, V> Entry<K, V> {
    pub fn new(key: K, value: Option<V>) -> Self {
        Self { key, value }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }
}

impl<K: fmt::Display, V: fmt::Display> fmt::Display for Entry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "Entry{{{}={}}}", self.key, value),
            None => write!(f, "Entry{{{}=null}}", self.key),
        }
    }
}

struct Cursor<'a, K, V> {
    slots: &'a [PairSlot<K, V>],
    to_index: usize,
    filtered: u64,
    i: usize,
    remaining: usize,
}

impl<'a, K, V> Cursor<'a, K, V> {
    fn new(map: &'a UnsafeArrayMap<K, V>) -> Self {
        Self {
            slots: map.backing(),
            to_index: map.to_index,
            filtered: map.filtered,
            i: 0,
            remaining: map.len,
        }
    }

    fn next_slot(&mut self) -> Option<&'a PairSlot<K, V>> {
        while self.i < self.to_index {
            let i = self.i;
            self.i += 1;
            if bitset::is_set(self.filtered, i) {
                continue;
            }
            self.remaining -= 1;
            return Some(&self.slots[i]);
        }
        None
    }
}

/// Iterator over the visible pairs of an [`UnsafeArrayMap`].
pub struct Iter<'a, K, V> {
    cursor: Cursor<'a, K, V>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = Entry<&'a K, &'a V>;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor.next_slot()?;
        // Visible slots always have a key; the cursor stops at the sentinel.
        let key = slot.key.as_ref()?;
        Some(Entry::new(key, slot.value.as_ref()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.cursor.remaining, Some(self.cursor.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

/// Iterator over the visible keys of an [`UnsafeArrayMap`].
pub struct Keys<'a, K, V> {
    cursor: Cursor<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next_slot()?.key.as_ref()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.cursor.remaining, Some(self.cursor.remaining))
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}

/// Iterator over the visible values of an [`UnsafeArrayMap`].
pub struct Values<'a, K, V> {
    cursor: Cursor<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = Option<&'a V>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.cursor.next_slot()?.value.as_ref())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.cursor.remaining, Some(self.cursor.remaining))
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {}
