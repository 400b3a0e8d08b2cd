//! Identifier interning.
//!
//! The lookup cache (`environment::EnvironmentRegistry`) keys
//! `previous_lookups` and `lookup_results` by identifier on the hot path of
//! every variable reference; interning turns that into a `u32` compare
//! instead of a string compare, the same trade the teacher makes by keying
//! its caches on `H256`/`Address` rather than raw bytes
//! (`jit/cache.rs::CacheKey`, `jit/counter.rs::ExecutionCounter`).

use std::sync::RwLock;

use rustc_hash::FxHashMap;

/// An interned identifier. Cheap to copy, compare and hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

struct Interner {
    strings: Vec<Box<str>>,
    ids: FxHashMap<Box<str>, u32>,
}

impl Interner {
    fn new() -> Self {
        Interner {
            strings: Vec::new(),
            ids: FxHashMap::default(),
        }
    }

    fn intern(&mut self, name: &str) -> Symbol {
        if let Some(&id) = self.ids.get(name) {
            return Symbol(id);
        }
        let id = self.strings.len() as u32;
        let boxed: Box<str> = name.into();
        self.strings.push(boxed.clone());
        self.ids.insert(boxed, id);
        Symbol(id)
    }

    fn resolve(&self, sym: Symbol) -> Option<&str> {
        self.strings.get(sym.0 as usize).map(|s| s.as_ref())
    }
}

static TABLE: RwLock<Option<Interner>> = RwLock::new(None);

fn with_interner<R>(f: impl FnOnce(&mut Interner) -> R) -> R {
    #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
    let mut guard = TABLE.write().unwrap();
    let interner = guard.get_or_insert_with(Interner::new);
    f(interner)
}

impl Symbol {
    /// Interns `name`, returning the same `Symbol` for repeated interning of
    /// equal strings.
    pub fn intern(name: &str) -> Symbol {
        with_interner(|table| table.intern(name))
    }

    /// Resolves this symbol back to its string form.
    ///
    /// Panics only if called with a `Symbol` from a different process /
    /// address space than the one that interned it, which cannot happen
    /// through this crate's public API.
    pub fn as_str(self) -> String {
        #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
        let guard = TABLE.read().unwrap();
        guard
            .as_ref()
            .and_then(|table| table.resolve(self))
            .map(str::to_owned)
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let a = Symbol::intern("x");
        let b = Symbol::intern("x");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_names_get_distinct_symbols() {
        let a = Symbol::intern("foo_distinct_1");
        let b = Symbol::intern("bar_distinct_1");
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_through_as_str() {
        let sym = Symbol::intern("round_trip_marker");
        assert_eq!(sym.as_str(), "round_trip_marker");
    }
}
