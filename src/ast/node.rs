use num_bigint::BigInt;
use ordered_float::NotNan;

use crate::symbol::Symbol;

use super::CodeRange;

/// Handle of a node in an [Arena](super::Arena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(super) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub range: CodeRange,
    /// 1-based line of the node's first byte.
    pub line: u32,
    /// Index into the parse result's file name list.
    pub file: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashEntry {
    /// `key => value` or `key: value`
    Pair(NodeId, NodeId),
    /// `**value`
    DoubleSplat(NodeId),
}

/// Formal parameters of a method, block or lambda.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Params {
    /// [NodeKind::Arg] or, in blocks, a destructuring [NodeKind::Mlhs].
    pub required: Vec<NodeId>,
    /// [NodeKind::OptArg]
    pub optional: Vec<NodeId>,
    /// [NodeKind::RestArg]
    pub rest: Option<NodeId>,
    pub post: Vec<NodeId>,
    /// [NodeKind::Kwarg]
    pub kwargs: Vec<NodeId>,
    /// [NodeKind::KwRest]
    pub kwrest: Option<NodeId>,
    /// [NodeKind::BlockArg]
    pub block: Option<NodeId>,
}

impl Params {
    pub fn is_empty(&self) -> bool {
        *self == Params::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// A local variable scope: the program root, method/class/module bodies,
    /// and block/lambda bodies.
    Scope {
        locals: Vec<Symbol>,
        body: Option<NodeId>,
    },
    /// Two or more statements.
    Stmts(Vec<NodeId>),
    /// `begin ... end` or `( ... )` without handlers.
    Begin(Option<NodeId>),
    Rescue {
        body: Option<NodeId>,
        /// [NodeKind::RescueClause]
        clauses: Vec<NodeId>,
        else_: Option<NodeId>,
    },
    RescueClause {
        exceptions: Vec<NodeId>,
        var: Option<NodeId>,
        body: Option<NodeId>,
    },
    Ensure {
        body: Option<NodeId>,
        ensure: Option<NodeId>,
    },

    /// `if`, `unless` (branches swapped), `?:` and modifiers.
    If {
        cond: NodeId,
        then: Option<NodeId>,
        else_: Option<NodeId>,
    },
    While {
        cond: NodeId,
        body: Option<NodeId>,
        /// `begin ... end while cond`
        do_while: bool,
    },
    Until {
        cond: NodeId,
        body: Option<NodeId>,
        do_while: bool,
    },
    For {
        var: NodeId,
        iter: NodeId,
        body: Option<NodeId>,
    },
    Case {
        subject: Option<NodeId>,
        /// [NodeKind::When]
        whens: Vec<NodeId>,
        else_: Option<NodeId>,
    },
    When {
        conds: Vec<NodeId>,
        body: Option<NodeId>,
    },
    And(NodeId, NodeId),
    Or(NodeId, NodeId),
    Not(NodeId),
    Defined(NodeId),

    /// `a, b = c`
    Masgn {
        /// [NodeKind::Mlhs]
        lhs: NodeId,
        rhs: NodeId,
    },
    Mlhs {
        pre: Vec<NodeId>,
        /// [NodeKind::Splat]
        rest: Option<NodeId>,
        post: Vec<NodeId>,
    },
    /// Assignment to a variable, constant, attribute or index.
    /// Attribute and index targets are [NodeKind::Call]s naming the reader.
    Asgn {
        target: NodeId,
        value: NodeId,
    },
    /// `target op= value`, including `||=` and `&&=`.
    OpAsgn {
        target: NodeId,
        op: Symbol,
        value: NodeId,
    },

    Call {
        recv: NodeId,
        name: Symbol,
        args: Vec<NodeId>,
        /// [NodeKind::Iter] or [NodeKind::BlockPass]
        block: Option<NodeId>,
        /// `recv&.name`
        safe_nav: bool,
    },
    /// Receiverless call, including a bare identifier that is not a local.
    FCall {
        name: Symbol,
        args: Vec<NodeId>,
        block: Option<NodeId>,
    },
    Super {
        args: Vec<NodeId>,
        block: Option<NodeId>,
    },
    /// `super` without arguments or parentheses.
    ZSuper {
        block: Option<NodeId>,
    },
    Yield(Vec<NodeId>),
    Return(Option<NodeId>),
    Break(Option<NodeId>),
    Next(Option<NodeId>),
    Redo,
    Retry,

    Array(Vec<NodeId>),
    Hash(Vec<HashEntry>),
    Dot2(NodeId, NodeId),
    Dot3(NodeId, NodeId),
    /// Range literal in a condition.
    Flip2(NodeId, NodeId),
    Flip3(NodeId, NodeId),
    /// Regexp literal in a condition, matched against `$_`.
    Match(NodeId),

    Lvar(Symbol),
    Ivar(Symbol),
    Gvar(Symbol),
    Cvar(Symbol),
    Const(Symbol),
    /// `Scope::Name`
    Colon2(NodeId, Symbol),
    /// `::Name`
    Colon3(Symbol),
    /// `$1` etc.
    NthRef(u32),
    /// `$&`, `` $` ``, `$'`, `$+`
    BackRef(u8),

    Nil,
    True,
    False,
    SelfRef,
    Int(BigInt),
    Float(NotNan<f64>),
    Str(Vec<u8>),
    Dstr(Vec<NodeId>),
    Xstr(Vec<u8>),
    Dxstr(Vec<NodeId>),
    Regx {
        source: Vec<u8>,
        flags: String,
    },
    Dregx {
        parts: Vec<NodeId>,
        flags: String,
    },
    Sym(Symbol),
    Dsym(Vec<NodeId>),
    /// `%w[]`, `%W[]`; elements are [NodeKind::Str] or [NodeKind::Dstr].
    Words(Vec<NodeId>),
    /// `%i[]`, `%I[]`
    Symbols(Vec<NodeId>),

    Splat(Option<NodeId>),
    DoubleSplat(NodeId),
    BlockPass(NodeId),
    Args(Box<Params>),
    Arg(Symbol),
    OptArg {
        name: Symbol,
        default: NodeId,
    },
    RestArg(Option<Symbol>),
    Kwarg {
        name: Symbol,
        default: Option<NodeId>,
    },
    KwRest(Option<Symbol>),
    BlockArg(Symbol),

    /// `{ |params| ... }` or `do |params| ... end`
    Iter {
        params: Option<NodeId>,
        /// [NodeKind::Scope]
        body: NodeId,
    },
    Lambda {
        params: Option<NodeId>,
        body: NodeId,
    },
    Def {
        name: Symbol,
        params: Option<NodeId>,
        body: NodeId,
    },
    Sdef {
        recv: NodeId,
        name: Symbol,
        params: Option<NodeId>,
        body: NodeId,
    },
    Class {
        path: NodeId,
        superclass: Option<NodeId>,
        body: NodeId,
    },
    /// `class << target`
    Sclass {
        target: NodeId,
        body: NodeId,
    },
    Module {
        path: NodeId,
        body: NodeId,
    },
    Alias(Symbol, Symbol),
    /// `alias $new $old`
    Galias(Symbol, Symbol),
    Undef(Vec<Symbol>),
    /// `BEGIN { ... }`
    Preexe(NodeId),
    /// `END { ... }`
    Postexe(NodeId),

    /// Placeholder left where an error was reported.
    Error,
}

impl NodeKind {
    /// Short lowercase tag, used by the dump and in messages.
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::Scope { .. } => "scope",
            NodeKind::Stmts(_) => "stmts",
            NodeKind::Begin(_) => "begin",
            NodeKind::Rescue { .. } => "rescue",
            NodeKind::RescueClause { .. } => "resbody",
            NodeKind::Ensure { .. } => "ensure",
            NodeKind::If { .. } => "if",
            NodeKind::While { .. } => "while",
            NodeKind::Until { .. } => "until",
            NodeKind::For { .. } => "for",
            NodeKind::Case { .. } => "case",
            NodeKind::When { .. } => "when",
            NodeKind::And(..) => "and",
            NodeKind::Or(..) => "or",
            NodeKind::Not(_) => "not",
            NodeKind::Defined(_) => "defined",
            NodeKind::Masgn { .. } => "masgn",
            NodeKind::Mlhs { .. } => "mlhs",
            NodeKind::Asgn { .. } => "asgn",
            NodeKind::OpAsgn { .. } => "op-asgn",
            NodeKind::Call { safe_nav: false, .. } => "call",
            NodeKind::Call { safe_nav: true, .. } => "csend",
            NodeKind::FCall { .. } => "fcall",
            NodeKind::Super { .. } => "super",
            NodeKind::ZSuper { .. } => "zsuper",
            NodeKind::Yield(_) => "yield",
            NodeKind::Return(_) => "return",
            NodeKind::Break(_) => "break",
            NodeKind::Next(_) => "next",
            NodeKind::Redo => "redo",
            NodeKind::Retry => "retry",
            NodeKind::Array(_) => "array",
            NodeKind::Hash(_) => "hash",
            NodeKind::Dot2(..) => "dot2",
            NodeKind::Dot3(..) => "dot3",
            NodeKind::Flip2(..) => "flip2",
            NodeKind::Flip3(..) => "flip3",
            NodeKind::Match(_) => "match",
            NodeKind::Lvar(_) => "lvar",
            NodeKind::Ivar(_) => "ivar",
            NodeKind::Gvar(_) => "gvar",
            NodeKind::Cvar(_) => "cvar",
            NodeKind::Const(_) => "const",
            NodeKind::Colon2(..) => "colon2",
            NodeKind::Colon3(_) => "colon3",
            NodeKind::NthRef(_) => "nth-ref",
            NodeKind::BackRef(_) => "back-ref",
            NodeKind::Nil => "nil",
            NodeKind::True => "true",
            NodeKind::False => "false",
            NodeKind::SelfRef => "self",
            NodeKind::Int(_) => "int",
            NodeKind::Float(_) => "float",
            NodeKind::Str(_) => "str",
            NodeKind::Dstr(_) => "dstr",
            NodeKind::Xstr(_) => "xstr",
            NodeKind::Dxstr(_) => "dxstr",
            NodeKind::Regx { .. } => "regx",
            NodeKind::Dregx { .. } => "dregx",
            NodeKind::Sym(_) => "sym",
            NodeKind::Dsym(_) => "dsym",
            NodeKind::Words(_) => "words",
            NodeKind::Symbols(_) => "symbols",
            NodeKind::Splat(_) => "splat",
            NodeKind::DoubleSplat(_) => "dsplat",
            NodeKind::BlockPass(_) => "block-pass",
            NodeKind::Args(_) => "args",
            NodeKind::Arg(_) => "arg",
            NodeKind::OptArg { .. } => "optarg",
            NodeKind::RestArg(_) => "restarg",
            NodeKind::Kwarg { .. } => "kwarg",
            NodeKind::KwRest(_) => "kwrest",
            NodeKind::BlockArg(_) => "blockarg",
            NodeKind::Iter { .. } => "iter",
            NodeKind::Lambda { .. } => "lambda",
            NodeKind::Def { .. } => "def",
            NodeKind::Sdef { .. } => "sdef",
            NodeKind::Class { .. } => "class",
            NodeKind::Sclass { .. } => "sclass",
            NodeKind::Module { .. } => "module",
            NodeKind::Alias(..) => "alias",
            NodeKind::Galias(..) => "galias",
            NodeKind::Undef(_) => "undef",
            NodeKind::Preexe(_) => "preexe",
            NodeKind::Postexe(_) => "postexe",
            NodeKind::Error => "error",
        }
    }

    /// Whether evaluating this node never produces a value
    /// (`return`, `break`, `next`, `redo`, `retry`).
    pub fn is_void_value(&self) -> bool {
        matches!(
            self,
            NodeKind::Return(_)
                | NodeKind::Break(_)
                | NodeKind::Next(_)
                | NodeKind::Redo
                | NodeKind::Retry
        )
    }
}
