use std::fmt::Write;

use crate::symbol::{Interner, Symbol};

use super::{Arena, HashEntry, NodeId, NodeKind, Params};

/// Renders the subtree at `id` as a one-line s-expression.
///
/// Absent optional children are written as `_`.
///
/// ```text
/// (scope [a] (stmts (asgn (lvar a) (int 1)) (call (lvar a) - (int 1))))
/// ```
pub fn dump<I: Interner + ?Sized>(arena: &Arena, symbols: &I, id: NodeId) -> String {
    let mut out = String::new();
    Dumper {
        arena,
        symbols,
        out: &mut out,
    }
    .node(id);
    out
}

struct Dumper<'a, I: ?Sized> {
    arena: &'a Arena,
    symbols: &'a I,
    out: &'a mut String,
}

impl<I: Interner + ?Sized> Dumper<'_, I> {
    fn sym(&mut self, sym: Symbol) {
        self.out
            .push_str(&String::from_utf8_lossy(self.symbols.name(sym)));
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.out.push('"');
        for &b in bytes {
            match b {
                b'"' => self.out.push_str("\\\""),
                b'\\' => self.out.push_str("\\\\"),
                b'\n' => self.out.push_str("\\n"),
                b'\t' => self.out.push_str("\\t"),
                0x20..=0x7E => self.out.push(b as char),
                _ => {
                    let _ = write!(self.out, "\\x{:02X}", b);
                }
            }
        }
        self.out.push('"');
    }

    fn opt(&mut self, id: Option<NodeId>) {
        match id {
            Some(id) => self.node(id),
            None => self.out.push('_'),
        }
    }

    fn list(&mut self, ids: &[NodeId]) {
        for &id in ids {
            self.out.push(' ');
            self.node(id);
        }
    }

    fn params(&mut self, params: &Params) {
        self.list(&params.required);
        self.list(&params.optional);
        if let Some(rest) = params.rest {
            self.out.push(' ');
            self.node(rest);
        }
        self.list(&params.post);
        self.list(&params.kwargs);
        for id in [params.kwrest, params.block].into_iter().flatten() {
            self.out.push(' ');
            self.node(id);
        }
    }

    fn node(&mut self, id: NodeId) {
        let arena = self.arena;
        let kind = &arena[id].kind;
        self.out.push('(');
        self.out.push_str(kind.tag());
        match kind {
            NodeKind::Scope { locals, body } => {
                self.out.push_str(" [");
                for (i, &local) in locals.iter().enumerate() {
                    if i > 0 {
                        self.out.push(' ');
                    }
                    self.sym(local);
                }
                self.out.push(']');
                if let Some(body) = body {
                    self.out.push(' ');
                    self.node(*body);
                }
            }
            NodeKind::Stmts(ids)
            | NodeKind::Yield(ids)
            | NodeKind::Array(ids)
            | NodeKind::Dstr(ids)
            | NodeKind::Dxstr(ids)
            | NodeKind::Dsym(ids)
            | NodeKind::Words(ids)
            | NodeKind::Symbols(ids) => self.list(ids),
            NodeKind::Begin(body)
            | NodeKind::Return(body)
            | NodeKind::Break(body)
            | NodeKind::Next(body)
            | NodeKind::Splat(body) => {
                if let Some(body) = body {
                    self.out.push(' ');
                    self.node(*body);
                }
            }
            NodeKind::Rescue {
                body,
                clauses,
                else_,
            } => {
                self.out.push(' ');
                self.opt(*body);
                self.list(clauses);
                self.out.push(' ');
                self.opt(*else_);
            }
            NodeKind::RescueClause {
                exceptions,
                var,
                body,
            } => {
                self.out.push_str(" [");
                for (i, &e) in exceptions.iter().enumerate() {
                    if i > 0 {
                        self.out.push(' ');
                    }
                    self.node(e);
                }
                self.out.push_str("] ");
                self.opt(*var);
                self.out.push(' ');
                self.opt(*body);
            }
            NodeKind::Ensure { body, ensure } => {
                self.out.push(' ');
                self.opt(*body);
                self.out.push(' ');
                self.opt(*ensure);
            }
            NodeKind::If { cond, then, else_ } => {
                self.out.push(' ');
                self.node(*cond);
                self.out.push(' ');
                self.opt(*then);
                self.out.push(' ');
                self.opt(*else_);
            }
            NodeKind::While {
                cond,
                body,
                do_while,
            }
            | NodeKind::Until {
                cond,
                body,
                do_while,
            } => {
                if *do_while {
                    self.out.push_str("-post");
                }
                self.out.push(' ');
                self.node(*cond);
                self.out.push(' ');
                self.opt(*body);
            }
            NodeKind::For { var, iter, body } => {
                self.out.push(' ');
                self.node(*var);
                self.out.push(' ');
                self.node(*iter);
                self.out.push(' ');
                self.opt(*body);
            }
            NodeKind::Case {
                subject,
                whens,
                else_,
            } => {
                self.out.push(' ');
                self.opt(*subject);
                self.list(whens);
                self.out.push(' ');
                self.opt(*else_);
            }
            NodeKind::When { conds, body } => {
                self.list(conds);
                self.out.push(' ');
                self.opt(*body);
            }
            NodeKind::And(a, b)
            | NodeKind::Or(a, b)
            | NodeKind::Dot2(a, b)
            | NodeKind::Dot3(a, b)
            | NodeKind::Flip2(a, b)
            | NodeKind::Flip3(a, b)
            | NodeKind::Masgn { lhs: a, rhs: b }
            | NodeKind::Asgn {
                target: a,
                value: b,
            } => {
                self.out.push(' ');
                self.node(*a);
                self.out.push(' ');
                self.node(*b);
            }
            NodeKind::Not(a)
            | NodeKind::Defined(a)
            | NodeKind::Match(a)
            | NodeKind::DoubleSplat(a)
            | NodeKind::BlockPass(a)
            | NodeKind::Preexe(a)
            | NodeKind::Postexe(a) => {
                self.out.push(' ');
                self.node(*a);
            }
            NodeKind::Mlhs { pre, rest, post } => {
                self.list(pre);
                if let Some(rest) = rest {
                    self.out.push(' ');
                    self.node(*rest);
                }
                self.list(post);
            }
            NodeKind::OpAsgn { target, op, value } => {
                self.out.push(' ');
                self.node(*target);
                self.out.push(' ');
                self.sym(*op);
                self.out.push(' ');
                self.node(*value);
            }
            NodeKind::Call {
                recv,
                name,
                args,
                block,
                ..
            } => {
                self.out.push(' ');
                self.node(*recv);
                self.out.push(' ');
                self.sym(*name);
                self.list(args);
                if let Some(block) = block {
                    self.out.push(' ');
                    self.node(*block);
                }
            }
            NodeKind::FCall { name, args, block } => {
                self.out.push(' ');
                self.sym(*name);
                self.list(args);
                if let Some(block) = block {
                    self.out.push(' ');
                    self.node(*block);
                }
            }
            NodeKind::Super { args, block } => {
                self.list(args);
                if let Some(block) = block {
                    self.out.push(' ');
                    self.node(*block);
                }
            }
            NodeKind::ZSuper { block } => {
                if let Some(block) = block {
                    self.out.push(' ');
                    self.node(*block);
                }
            }
            NodeKind::Redo
            | NodeKind::Retry
            | NodeKind::Nil
            | NodeKind::True
            | NodeKind::False
            | NodeKind::SelfRef
            | NodeKind::Error => {}
            NodeKind::Hash(entries) => {
                for entry in entries {
                    match entry {
                        HashEntry::Pair(k, v) => {
                            self.out.push_str(" (pair ");
                            self.node(*k);
                            self.out.push(' ');
                            self.node(*v);
                            self.out.push(')');
                        }
                        HashEntry::DoubleSplat(v) => {
                            self.out.push_str(" (dsplat ");
                            self.node(*v);
                            self.out.push(')');
                        }
                    }
                }
            }
            NodeKind::Lvar(sym)
            | NodeKind::Ivar(sym)
            | NodeKind::Gvar(sym)
            | NodeKind::Cvar(sym)
            | NodeKind::Const(sym)
            | NodeKind::Colon3(sym)
            | NodeKind::Sym(sym)
            | NodeKind::Arg(sym)
            | NodeKind::BlockArg(sym) => {
                self.out.push(' ');
                self.sym(*sym);
            }
            NodeKind::Colon2(scope, name) => {
                self.out.push(' ');
                self.node(*scope);
                self.out.push(' ');
                self.sym(*name);
            }
            NodeKind::NthRef(n) => {
                let _ = write!(self.out, " {}", n);
            }
            NodeKind::BackRef(c) => {
                let _ = write!(self.out, " {}", *c as char);
            }
            NodeKind::Int(value) => {
                let _ = write!(self.out, " {}", value);
            }
            NodeKind::Float(value) => {
                let _ = write!(self.out, " {:?}", value.into_inner());
            }
            NodeKind::Str(bytes) | NodeKind::Xstr(bytes) => {
                self.out.push(' ');
                self.bytes(bytes);
            }
            NodeKind::Regx { source, flags } => {
                self.out.push(' ');
                self.bytes(source);
                if !flags.is_empty() {
                    let _ = write!(self.out, " {}", flags);
                }
            }
            NodeKind::Dregx { parts, flags } => {
                if !flags.is_empty() {
                    let _ = write!(self.out, " {}", flags);
                }
                self.list(parts);
            }
            NodeKind::Args(params) => self.params(params),
            NodeKind::OptArg { name, default } => {
                self.out.push(' ');
                self.sym(*name);
                self.out.push(' ');
                self.node(*default);
            }
            NodeKind::RestArg(name) | NodeKind::KwRest(name) => {
                if let Some(name) = name {
                    self.out.push(' ');
                    self.sym(*name);
                }
            }
            NodeKind::Kwarg { name, default } => {
                self.out.push(' ');
                self.sym(*name);
                if let Some(default) = default {
                    self.out.push(' ');
                    self.node(*default);
                }
            }
            NodeKind::Iter { params, body } | NodeKind::Lambda { params, body } => {
                self.out.push(' ');
                self.opt(*params);
                self.out.push(' ');
                self.node(*body);
            }
            NodeKind::Def { name, params, body } => {
                self.out.push(' ');
                self.sym(*name);
                self.out.push(' ');
                self.opt(*params);
                self.out.push(' ');
                self.node(*body);
            }
            NodeKind::Sdef {
                recv,
                name,
                params,
                body,
            } => {
                self.out.push(' ');
                self.node(*recv);
                self.out.push(' ');
                self.sym(*name);
                self.out.push(' ');
                self.opt(*params);
                self.out.push(' ');
                self.node(*body);
            }
            NodeKind::Class {
                path,
                superclass,
                body,
            } => {
                self.out.push(' ');
                self.node(*path);
                self.out.push(' ');
                self.opt(*superclass);
                self.out.push(' ');
                self.node(*body);
            }
            NodeKind::Sclass { target: a, body }
            | NodeKind::Module { path: a, body } => {
                self.out.push(' ');
                self.node(*a);
                self.out.push(' ');
                self.node(*body);
            }
            NodeKind::Alias(a, b) | NodeKind::Galias(a, b) => {
                self.out.push(' ');
                self.sym(*a);
                self.out.push(' ');
                self.sym(*b);
            }
            NodeKind::Undef(names) => {
                for &name in names {
                    self.out.push(' ');
                    self.sym(name);
                }
            }
        }
        self.out.push(')');
    }
}

#[cfg(test)]
mod tests {
    use num_bigint::BigInt;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ast::{Node, DUMMY_RANGE};
    use crate::symbol::SymbolTable;

    fn add(arena: &mut Arena, kind: NodeKind) -> NodeId {
        arena
            .alloc(Node {
                kind,
                range: DUMMY_RANGE,
                line: 1,
                file: 0,
            })
            .unwrap()
    }

    #[test]
    fn test_dump_small_tree() {
        let mut arena = Arena::default();
        let mut symbols = SymbolTable::new();
        let a = symbols.intern(b"a");
        let plus = symbols.intern(b"+");
        let lvar = add(&mut arena, NodeKind::Lvar(a));
        let one = add(&mut arena, NodeKind::Int(BigInt::from(1)));
        let s = add(&mut arena, NodeKind::Str(b"x\"y\n".to_vec()));
        let call = add(
            &mut arena,
            NodeKind::Call {
                recv: lvar,
                name: plus,
                args: vec![one],
                block: None,
                safe_nav: false,
            },
        );
        let cond = add(
            &mut arena,
            NodeKind::If {
                cond: call,
                then: Some(s),
                else_: None,
            },
        );
        let root = add(
            &mut arena,
            NodeKind::Scope {
                locals: vec![a],
                body: Some(cond),
            },
        );
        assert_eq!(
            dump(&arena, &symbols, root),
            r#"(scope [a] (if (call (lvar a) + (int 1)) (str "x\"y\n") _))"#
        );
    }
}
