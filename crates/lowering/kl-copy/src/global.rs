//! Substitutions accumulated across every copy of a compilation unit

use crate::error::CopyError;
use indexmap::IndexMap;
use kl_ir::DeclId;
use rustc_hash::FxHashSet;

/// Where an original declaration went, and which inlined function
/// produced the copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubstitutedDecl {
    /// Function whose body was being inlined when the copy was made
    pub inlined_function: DeclId,
    /// The fresh declaration
    pub replacement: DeclId,
}

/// Original declaration to its latest copy, across the whole unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalSubstitutionMap {
    entries: IndexMap<DeclId, SubstitutedDecl>,
}

impl GlobalSubstitutionMap {
    /// Record a substitution, returning the entry it replaces
    pub fn insert(&mut self, original: DeclId, substituted: SubstitutedDecl) -> Option<SubstitutedDecl> {
        self.entries.insert(original, substituted)
    }

    /// Direct entry for `original`
    pub fn get(&self, original: DeclId) -> Option<&SubstitutedDecl> {
        self.entries.get(&original)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no substitution was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (DeclId, SubstitutedDecl)> + '_ {
        self.entries.iter().map(|(original, substituted)| (*original, *substituted))
    }

    /// Follow entries from `key` while `mapper` yields a next key, returning
    /// the last entry reached. Revisiting a key is an error.
    pub fn deep_search(
        &self,
        key: DeclId,
        mapper: impl Fn(&SubstitutedDecl) -> Option<DeclId>,
    ) -> Result<Option<SubstitutedDecl>, CopyError> {
        let mut visited = FxHashSet::default();
        let mut current = key;
        let mut found = None;
        loop {
            if !visited.insert(current) {
                return Err(CopyError::SubstitutionCycle { key: current });
            }
            let Some(entry) = self.entries.get(&current) else {
                return Ok(found);
            };
            found = Some(*entry);
            match mapper(entry) {
                Some(next) => current = next,
                None => return Ok(found),
            }
        }
    }

    /// Follow replacements to the final copy of `key`
    pub fn resolve(&self, key: DeclId) -> Result<Option<SubstitutedDecl>, CopyError> {
        self.deep_search(key, |entry| Some(entry.replacement))
    }
}
