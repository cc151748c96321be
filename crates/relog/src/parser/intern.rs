//! Interned-string arena.
//!
//! Attribute keys and repeated values recur millions of times across a log
//! stream; interning collapses them into shared `Arc<str>` handles instead
//! of one allocation per occurrence. The arena also guarantees every string
//! handed out is an owned copy, so records never borrow from the input
//! buffer the parser read them from.

use std::collections::HashSet;
use std::sync::Arc;

/// Entry ceiling: once the arena holds this many distinct strings, new ones
/// are still copied out but no longer retained, bounding arena memory the
/// same way the pools bound buffer memory.
const MAX_ENTRIES: usize = 4096;

#[derive(Debug, Default)]
pub struct StringArena {
    entries: HashSet<Arc<str>>,
}

impl StringArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a shared handle for `s`, copying it into the arena on first
    /// sight (while below the entry ceiling).
    pub fn intern(&mut self, s: &str) -> Arc<str> {
        if let Some(existing) = self.entries.get(s) {
            return Arc::clone(existing);
        }
        let owned: Arc<str> = Arc::from(s);
        if self.entries.len() < MAX_ENTRIES {
            self.entries.insert(Arc::clone(&owned));
        }
        owned
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_shares_storage() {
        let mut arena = StringArena::new();
        let a = arena.intern("level");
        let b = arena.intern("level");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_distinct_strings_distinct_entries() {
        let mut arena = StringArena::new();
        arena.intern("msg");
        arena.intern("time");
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_ceiling_stops_retention_not_copying() {
        let mut arena = StringArena::new();
        for i in 0..MAX_ENTRIES {
            arena.intern(&format!("key-{i}"));
        }
        assert_eq!(arena.len(), MAX_ENTRIES);

        // Past the ceiling: still get a usable owned copy, arena unchanged.
        let overflow = arena.intern("one-too-many");
        assert_eq!(overflow.as_ref(), "one-too-many");
        assert_eq!(arena.len(), MAX_ENTRIES);
    }
}
