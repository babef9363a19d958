//! Append-only string interning.

use std::hash::BuildHasherDefault;
use std::sync::Arc;

use indexmap::IndexSet;
use rustc_hash::FxHasher;

use crate::data::{StringId, INVALID_ID};

type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;

/// Maps each distinct string to a stable 32-bit ID.
///
/// A registry may share a frozen parent: lookups consult the parent first and
/// new strings land in the child, with IDs offset past the parent's length.
/// The parent is never mutated through the child.
#[derive(Debug, Default, Clone)]
pub struct StringRegistry {
    parent: Option<Arc<StringRegistry>>,
    base: u32,
    local: FxIndexSet<String>,
}

impl StringRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a child registry deferring to `parent` for known strings.
    pub fn with_parent(parent: Arc<StringRegistry>) -> Self {
        let base = parent.len();
        StringRegistry {
            parent: Some(parent),
            base,
            local: FxIndexSet::default(),
        }
    }

    /// Rebuilds a registry from a serialized string table.
    pub fn from_table(table: Vec<String>) -> Self {
        let mut local = FxIndexSet::default();
        for s in table {
            local.insert(s);
        }
        StringRegistry {
            parent: None,
            base: 0,
            local,
        }
    }

    /// Total number of interned strings, including the parent's.
    pub fn len(&self) -> u32 {
        self.base + self.local.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interns `value`, returning the existing ID when already present.
    pub fn intern(&mut self, value: &str) -> StringId {
        if let Some(parent) = &self.parent {
            if let Some(id) = parent.try_lookup(value) {
                return id;
            }
        }

        if let Some(index) = self.local.get_index_of(value) {
            return self.base + index as u32;
        }

        let (index, _) = self.local.insert_full(value.to_owned());
        self.base + index as u32
    }

    /// Returns the string for `id`. Panics on an ID this registry never
    /// produced.
    pub fn lookup(&self, id: StringId) -> &str {
        assert_ne!(id, INVALID_ID, "invalid string ID");

        if id < self.base {
            return self
                .parent
                .as_ref()
                .expect("ID below base without parent")
                .lookup(id);
        }

        self.local
            .get_index((id - self.base) as usize)
            .map(String::as_str)
            .unwrap_or_else(|| panic!("string ID {id} out of range"))
    }

    pub fn try_lookup(&self, value: &str) -> Option<StringId> {
        if let Some(parent) = &self.parent {
            if let Some(id) = parent.try_lookup(value) {
                return Some(id);
            }
        }

        self.local
            .get_index_of(value)
            .map(|index| self.base + index as u32)
    }

    /// Interns every entry of a foreign string table and returns the old → new
    /// aliasing table.
    pub fn merge(&mut self, table: &[String]) -> Vec<StringId> {
        table.iter().map(|s| self.intern(s)).collect()
    }

    /// Serializable table of the locally owned strings. Only meaningful for
    /// parentless registries.
    pub fn to_table(&self) -> Vec<String> {
        debug_assert!(self.parent.is_none(), "cannot serialize a child registry");
        self.local.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.local.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_stable() {
        let mut reg = StringRegistry::new();
        let a = reg.intern("VS_Main");
        let b = reg.intern("PS_Main");
        assert_ne!(a, b);
        assert_eq!(reg.intern("VS_Main"), a);
        assert_eq!(reg.lookup(a), "VS_Main");
        assert_eq!(reg.try_lookup("PS_Main"), Some(b));
        assert_eq!(reg.try_lookup("CS_Main"), None);
    }

    #[test]
    fn child_defers_to_parent() {
        let mut parent = StringRegistry::new();
        let shared = parent.intern("FEATURE_A");
        let parent = Arc::new(parent);

        let mut child = StringRegistry::with_parent(parent.clone());
        assert_eq!(child.intern("FEATURE_A"), shared);

        let local = child.intern("FEATURE_B");
        assert_eq!(local, parent.len());
        assert_eq!(child.lookup(local), "FEATURE_B");
        assert_eq!(child.lookup(shared), "FEATURE_A");
        assert_eq!(parent.try_lookup("FEATURE_B"), None);
    }

    #[test]
    fn merge_builds_alias_table() {
        let mut reg = StringRegistry::new();
        reg.intern("x");
        let table = vec!["y".to_string(), "x".to_string()];
        let aliases = reg.merge(&table);
        assert_eq!(aliases.len(), 2);
        assert_eq!(reg.lookup(aliases[0]), "y");
        assert_eq!(reg.lookup(aliases[1]), "x");
        assert_eq!(aliases[1], 0);
    }

    #[test]
    fn table_round_trip() {
        let mut reg = StringRegistry::new();
        reg.intern("a");
        reg.intern("b");
        let restored = StringRegistry::from_table(reg.to_table());
        assert_eq!(restored.try_lookup("a"), Some(0));
        assert_eq!(restored.try_lookup("b"), Some(1));
    }
}
