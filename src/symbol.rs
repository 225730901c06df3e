use std::collections::HashMap;
use std::fmt;

/// Small integer id of an interned name.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u32);

impl Symbol {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

/// The interning service the parser calls into.
///
/// The runtime normally owns the table; the parser only asks for ids and,
/// when reporting errors or dumping trees, for the bytes back.
pub trait Interner {
    fn intern(&mut self, name: &[u8]) -> Symbol;
    fn name(&self, sym: Symbol) -> &[u8];
}

/// Default [Interner] backed by a vector and a reverse map.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    names: Vec<Box<[u8]>>,
    ids: HashMap<Box<[u8]>, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Lossy UTF-8 rendering, for messages and dumps.
    pub fn display(&self, sym: Symbol) -> String {
        String::from_utf8_lossy(self.name(sym)).into_owned()
    }

    pub fn lookup(&self, name: &[u8]) -> Option<Symbol> {
        self.ids.get(name).copied()
    }
}

impl Interner for SymbolTable {
    fn intern(&mut self, name: &[u8]) -> Symbol {
        if let Some(sym) = self.ids.get(name) {
            return *sym;
        }
        let sym = Symbol(self.names.len() as u32);
        let boxed: Box<[u8]> = name.into();
        self.names.push(boxed.clone());
        self.ids.insert(boxed, sym);
        sym
    }

    fn name(&self, sym: Symbol) -> &[u8] {
        &self.names[sym.index()]
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let mut table = SymbolTable::new();
        let a = table.intern(b"foo");
        let b = table.intern(b"bar");
        assert_eq!(table.intern(b"foo"), a);
        assert!(a != b);
        assert_eq!(table.name(b), b"bar");
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup(b"baz"), None);
    }
}
