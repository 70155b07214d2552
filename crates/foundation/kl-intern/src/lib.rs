//! String interning for declaration names

pub use lasso::Spur as Symbol;
use lasso::ThreadedRodeo;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Thread-safe string interner shared by every table of a compilation unit
#[derive(Clone)]
pub struct Interner {
    inner: Arc<ThreadedRodeo>,
}

impl Interner {
    /// Create an empty interner
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ThreadedRodeo::new()),
        }
    }

    /// Intern `text`, returning the existing symbol when already known
    pub fn intern(&self, text: &str) -> Symbol {
        self.inner.get_or_intern(text)
    }

    /// Resolve a symbol; unknown symbols resolve to `<?>`
    pub fn resolve(&self, sym: Symbol) -> String {
        self.try_resolve(sym).unwrap_or_else(|| "<?>".to_string())
    }

    /// Resolve a symbol if it was produced by this interner
    pub fn try_resolve(&self, sym: Symbol) -> Option<String> {
        self.inner.try_resolve(&sym).map(ToString::to_string)
    }

    /// Look up a string without interning it
    pub fn get(&self, text: &str) -> Option<Symbol> {
        self.inner.get(text)
    }

    /// Number of distinct strings
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether nothing has been interned yet
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Interner {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Interner")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl Serialize for Interner {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Interner {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        ThreadedRodeo::deserialize(deserializer).map(|rodeo| Self {
            inner: Arc::new(rodeo),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let interner = Interner::new();
        let first = interner.intern("load");
        let second = interner.intern("load");
        assert_eq!(first, second);
        assert_eq!(interner.resolve(first), "load");
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_clones_share_storage() {
        let interner = Interner::new();
        let clone = interner.clone();
        let sym = clone.intern("shared");
        assert_eq!(interner.get("shared"), Some(sym));
    }

    #[test]
    fn test_serde_keeps_symbols_stable() {
        let interner = Interner::new();
        let sym = interner.intern("compute");
        let json = serde_json::to_string(&interner).unwrap();
        let restored: Interner = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.resolve(sym), "compute");
    }
}
