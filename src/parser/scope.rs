use crate::symbol::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// The program itself.
    TopLevel,
    /// `def` body. Starts empty and hides outer locals.
    Method,
    /// `class`/`module`/`class <<` body. Starts empty and hides outer locals.
    Class,
    /// Block or lambda body. Sees outer locals, declares into its own frame.
    Block,
}

impl ScopeKind {
    fn is_transparent(self) -> bool {
        matches!(self, ScopeKind::Block)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame {
    kind: ScopeKind,
    locals: Vec<Symbol>,
}

/// Stack of local variable scopes.
///
/// A frame's variable list only grows while it is on the stack, and keeps
/// declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeStack {
    frames: Vec<Frame>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame {
                kind: ScopeKind::TopLevel,
                locals: Vec::new(),
            }],
        }
    }

    pub fn push_scope(&mut self, kind: ScopeKind) {
        self.frames.push(Frame {
            kind,
            locals: Vec::new(),
        });
    }

    /// Pops the innermost scope and returns its locals in declaration order.
    /// The outermost scope is never popped.
    pub fn pop_scope(&mut self) -> Vec<Symbol> {
        if self.frames.len() <= 1 {
            return self.current_locals().to_vec();
        }
        self.frames.pop().map(|f| f.locals).unwrap_or_default()
    }

    pub fn declare(&mut self, sym: Symbol) {
        if let Some(frame) = self.frames.last_mut() {
            if !frame.locals.contains(&sym) {
                frame.locals.push(sym);
            }
        }
    }

    pub fn is_local(&self, sym: Symbol) -> bool {
        for frame in self.frames.iter().rev() {
            if frame.locals.contains(&sym) {
                return true;
            }
            if !frame.kind.is_transparent() {
                break;
            }
        }
        false
    }

    pub fn current_locals(&self) -> &[Symbol] {
        self.frames.last().map_or(&[], |f| &f.locals)
    }

    /// Whether code here runs inside a method body (possibly in a block).
    pub fn in_method(&self) -> bool {
        for frame in self.frames.iter().rev() {
            match frame.kind {
                ScopeKind::Method => return true,
                ScopeKind::Block => {}
                ScopeKind::Class | ScopeKind::TopLevel => return false,
            }
        }
        false
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::symbol::{Interner, SymbolTable};

    #[test]
    fn test_block_sees_outer() {
        let mut table = SymbolTable::new();
        let a = table.intern(b"a");
        let b = table.intern(b"b");
        let mut scopes = ScopeStack::new();
        scopes.declare(a);
        scopes.push_scope(ScopeKind::Block);
        assert!(scopes.is_local(a));
        scopes.declare(b);
        assert!(scopes.is_local(b));
        assert_eq!(scopes.pop_scope(), vec![b]);
        assert!(!scopes.is_local(b));
    }

    #[test]
    fn test_method_hides_outer() {
        let mut table = SymbolTable::new();
        let a = table.intern(b"a");
        let mut scopes = ScopeStack::new();
        scopes.declare(a);
        scopes.push_scope(ScopeKind::Method);
        assert!(!scopes.is_local(a));
        assert!(scopes.in_method());
        scopes.push_scope(ScopeKind::Block);
        assert!(scopes.in_method());
        assert!(!scopes.is_local(a));
        scopes.pop_scope();
        scopes.pop_scope();
        assert!(scopes.is_local(a));
        assert!(!scopes.in_method());
    }

    #[test]
    fn test_declare_is_idempotent() {
        let mut table = SymbolTable::new();
        let a = table.intern(b"a");
        let b = table.intern(b"b");
        let mut scopes = ScopeStack::new();
        scopes.declare(a);
        scopes.declare(b);
        scopes.declare(a);
        assert_eq!(scopes.current_locals(), &[a, b]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push(bool),
        Pop,
        Declare(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<bool>().prop_map(Op::Push),
            Just(Op::Pop),
            (0u8..6).prop_map(Op::Declare),
        ]
    }

    proptest! {
        #[test]
        fn prop_declared_is_local_until_popped(ops in proptest::collection::vec(op(), 0..40)) {
            let mut table = SymbolTable::new();
            let syms = (0..6).map(|i| table.intern(format!("v{}", i).as_bytes())).collect::<Vec<_>>();
            let mut scopes = ScopeStack::new();
            // Model: per frame, (transparent, declared names).
            let mut model: Vec<(bool, Vec<u8>)> = vec![(false, Vec::new())];
            for op in ops {
                match op {
                    Op::Push(block) => {
                        scopes.push_scope(if block { ScopeKind::Block } else { ScopeKind::Method });
                        model.push((block, Vec::new()));
                    }
                    Op::Pop => {
                        scopes.pop_scope();
                        if model.len() > 1 {
                            model.pop();
                        }
                    }
                    Op::Declare(i) => {
                        scopes.declare(syms[i as usize]);
                        prop_assert!(scopes.is_local(syms[i as usize]));
                        if let Some(frame) = model.last_mut() {
                            frame.1.push(i);
                        }
                    }
                }
                for i in 0..6u8 {
                    let mut expected = false;
                    for (transparent, names) in model.iter().rev() {
                        if names.contains(&i) {
                            expected = true;
                            break;
                        }
                        if !transparent {
                            break;
                        }
                    }
                    prop_assert_eq!(scopes.is_local(syms[i as usize]), expected);
                }
            }
        }
    }
}
