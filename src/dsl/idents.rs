//! Identifier table: maps macro and movement names to where they live.

use std::collections::BTreeMap;

use serde::Serialize;

/// What a name refers to. Indices are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentEntry {
    Macro(usize),
    Movement { track: usize, movement: usize },
}

/// Name → definition map built by the parser. The first definition of a
/// name wins; later ones are rejected and reported by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct IdentTable {
    entries: BTreeMap<String, IdentEntry>,
}

impl IdentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<IdentEntry> {
        self.entries.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn macro_index(&self, name: &str) -> Option<usize> {
        match self.get(name)? {
            IdentEntry::Macro(index) => Some(index),
            IdentEntry::Movement { .. } => None,
        }
    }

    /// Register `name` unless it is already taken. Returns the existing
    /// entry on conflict.
    pub fn define(&mut self, name: &str, entry: IdentEntry) -> Result<(), IdentEntry> {
        match self.entries.get(name) {
            Some(existing) => Err(*existing),
            None => {
                self.entries.insert(name.to_string(), entry);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, IdentEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), *entry))
    }
}
