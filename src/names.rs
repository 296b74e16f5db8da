//! Unique name generation for one plan.
//!
//! Every identifier that ends up in a kernel (bound index variables,
//! substitution rules, backing arrays) is issued here, so two names handed
//! out by the same allocator never collide.

use crate::error::{Error, Result};
use rustc_hash::FxHashSet;
use std::rc::Rc;

/// Shared, cheaply clonable identifier.
pub type Name = Rc<str>;

/// Category of a generated name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NameKind {
    /// Bound index variable (loop index / rule parameter).
    Index,
    /// Substitution rule.
    Rule,
    /// Concrete array (input, temporary or output).
    Array,
}

/// Issues globally unique identifiers, tagged by category.
#[derive(Debug, Clone)]
pub struct NameAllocator {
    prefixes: [Name; 3],
    counters: [u32; 3],
    taken: FxHashSet<Name>,
}

impl NameAllocator {
    /// Create an allocator with the given prefixes for index variables,
    /// rules and arrays.
    pub fn new(index_prefix: &str, rule_prefix: &str, array_prefix: &str) -> Self {
        NameAllocator {
            prefixes: [index_prefix.into(), rule_prefix.into(), array_prefix.into()],
            counters: [0; 3],
            taken: FxHashSet::default(),
        }
    }

    fn slot(kind: NameKind) -> usize {
        match kind {
            NameKind::Index => 0,
            NameKind::Rule => 1,
            NameKind::Array => 2,
        }
    }

    /// Issue a fresh name of the given kind.
    pub fn fresh(&mut self, kind: NameKind) -> Name {
        let slot = Self::slot(kind);
        loop {
            let candidate: Name = format!("{}{}", self.prefixes[slot], self.counters[slot]).into();
            self.counters[slot] += 1;
            // A reserved user name may shadow a generated one; skip it.
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// Issue `n` fresh index variables.
    pub fn fresh_indices(&mut self, n: usize) -> Vec<Name> {
        (0..n).map(|_| self.fresh(NameKind::Index)).collect()
    }

    /// Reserve a caller-chosen name so it is never generated.
    pub fn reserve(&mut self, name: &str) -> Result<Name> {
        if name.is_empty() {
            return Err(Error::DuplicateName(name.to_string()));
        }
        let name: Name = name.into();
        if !self.taken.insert(name.clone()) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        Ok(name)
    }

    /// Check whether a name has been issued or reserved.
    pub fn is_taken(&self, name: &str) -> bool {
        self.taken.contains(name)
    }

    /// Number of names issued or reserved so far.
    pub fn len(&self) -> usize {
        self.taken.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taken.is_empty()
    }
}

impl Default for NameAllocator {
    fn default() -> Self {
        NameAllocator::new("i", "subst", "arr")
    }
}
