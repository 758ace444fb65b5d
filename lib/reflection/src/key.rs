use core::fmt;
use std::{
    hash::{Hash, Hasher},
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_SYMBOL_ID: AtomicU64 = AtomicU64::new(1);

/// A process-unique symbol.
///
/// Symbols compare and hash by identity; the description is cosmetic.
/// They are valid property keys and valid graph names.
#[derive(Clone, Debug)]
pub struct Symbol {
    id: u64,
    description: Option<Rc<str>>,
}

impl Symbol {
    pub fn new(description: impl Into<Option<String>>) -> Self {
        Self {
            id: NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed),
            description: description.into().map(Rc::from),
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "Symbol({description})"),
            None => write!(f, "Symbol(#{})", self.id),
        }
    }
}

/// A property key: an interned string or a [`Symbol`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    String(Rc<str>),
    Symbol(Symbol),
}

impl PropertyKey {
    pub fn string(s: impl AsRef<str>) -> Self {
        PropertyKey::String(Rc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyKey::String(s) => Some(s),
            PropertyKey::Symbol(_) => None,
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        PropertyKey::string(s)
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        PropertyKey::String(Rc::from(s.as_str()))
    }
}

impl From<Symbol> for PropertyKey {
    fn from(symbol: Symbol) -> Self {
        PropertyKey::Symbol(symbol)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::String(s) => write!(f, "{s}"),
            PropertyKey::Symbol(symbol) => write!(f, "{symbol}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_are_unique_even_with_equal_descriptions() {
        let a = Symbol::new("shared".to_string());
        let b = Symbol::new("shared".to_string());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn string_keys_compare_by_content() {
        assert_eq!(PropertyKey::from("x"), PropertyKey::string("x"));
        assert_ne!(PropertyKey::from("x"), PropertyKey::from("y"));
    }
}
