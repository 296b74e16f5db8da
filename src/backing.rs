//! Rule name to backing array correspondence.
//!
//! Each entry records the registration index from which it is visible. An
//! entry inserted while the registry held `k` rules only affects statements
//! flushed at index `k` or later, which keeps later materializations from
//! leaking into earlier rules.

use crate::names::Name;
use rustc_hash::FxHashMap;

/// One `rule -> array` entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackingEntry {
    pub array: Name,
    pub visible_from: usize,
}

/// Monotonically growing map from rule names to backing arrays.
#[derive(Clone, Debug, Default)]
pub struct BackingMap {
    entries: FxHashMap<Name, BackingEntry>,
    order: Vec<Name>,
}

impl BackingMap {
    pub fn new() -> Self {
        BackingMap::default()
    }

    /// Insert an entry. Existing entries are never replaced; returns
    /// `false` if `rule` was already backed.
    pub fn insert(&mut self, rule: &Name, array: &Name, visible_from: usize) -> bool {
        if self.entries.contains_key(rule) {
            return false;
        }
        self.entries.insert(
            rule.clone(),
            BackingEntry {
                array: array.clone(),
                visible_from,
            },
        );
        self.order.push(rule.clone());
        true
    }

    /// Backing array of `rule`, regardless of visibility.
    pub fn get(&self, rule: &str) -> Option<&Name> {
        self.entries.get(rule).map(|e| &e.array)
    }

    pub fn entry(&self, rule: &str) -> Option<&BackingEntry> {
        self.entries.get(rule)
    }

    pub fn contains(&self, rule: &str) -> bool {
        self.entries.contains_key(rule)
    }

    /// Backing array of `rule` as seen by statements flushed at `index`.
    pub fn get_at(&self, rule: &str, index: usize) -> Option<&Name> {
        self.entries
            .get(rule)
            .filter(|e| e.visible_from <= index)
            .map(|e| &e.array)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Name, &BackingEntry)> {
        self.order.iter().map(move |n| (n, &self.entries[n]))
    }
}
