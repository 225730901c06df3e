use crate::ast::{CodeRange, HashEntry, NodeId, NodeKind, DUMMY_RANGE};
use crate::diagnostic::Diagnostics;
use crate::symbol::Symbol;

use super::lexer::{punct_text, Token, TokenHead, TokenKind, TokenValue};
use super::{PResult, Parser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(super) struct PrecCtx {
    /// Command calls like `f x` cannot begin here due to the precedence of the previous token,
    /// therefore the parser should deliberately parse it and issue a diagnostic.
    pub(super) invalid_command: bool,
}

impl PrecCtx {
    pub(super) fn with_invalid_command(self) -> Self {
        Self {
            invalid_command: true,
            ..self
        }
    }
}

/// What a call applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Callee {
    /// Receiverless `name`
    Fn(Symbol),
    /// `recv.name`, `recv&.name` or `recv::name`
    Method {
        recv: NodeId,
        name: Symbol,
        safe_nav: bool,
    },
    Super,
    Yield,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ConstScope {
    /// `Foo`
    Lexical,
    /// `::Foo`
    Top,
    /// `expr::Foo`
    Expr(NodeId),
}

/// Arguments of one call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct CallArgs {
    pub(super) args: Vec<NodeId>,
    pub(super) block_pass: Option<NodeId>,
    pub(super) range: CodeRange,
}

impl Default for CallArgs {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            block_pass: None,
            range: DUMMY_RANGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum ExprLike {
    Expr(NodeId),
    /// `foo`, to be extended as:
    ///
    /// - `foo` itself
    /// - `foo(args)` parenthesized call
    /// - `foo args` non-parenthesized call
    /// - `foo { |args| ... }` block call
    /// - `foo = value` local variable assignment
    Identifier {
        range: CodeRange,
        /// Is there already a local variable with the same name in the scope?
        /// Used to determine whether to extend as a local variable or a method call
        /// when interpreting it as an right-hand side expression.
        ///
        /// If the expression is going to be used as a left-hand side expression,
        /// it is always interpreted as a local variable regardless of this flag.
        has_local: bool,
        name: Symbol,
    },
    /// `Foo`, `::Foo` or `obj::Foo`, to be extended as:
    ///
    /// - the constant itself
    /// - `Foo(args)` or `obj::Foo(args)` parenthesized call
    /// - `Foo args` or `obj::Foo args` non-parenthesized call
    /// - `Foo { |args| ... }` block call
    Const {
        range: CodeRange,
        scope: ConstScope,
        name: Symbol,
    },
    /// call without arguments or block, to be extended with either.
    ///
    /// Expressions identified as ArglessCall include:
    ///
    /// - `foo!` or `foo?`
    /// - `foo.bar` or `foo&.bar`
    /// - `foo::bar` (other than const)
    /// - `super` and `yield`
    ArglessCall { range: CodeRange, callee: Callee },
    /// call with parenthesized arguments but without block, to be extended as:
    ///
    /// - call with block
    BlocklessCall {
        range: CodeRange,
        callee: Callee,
        args: CallArgs,
    },
}

impl ExprLike {
    pub(super) fn range(&self, parser: &Parser<'_>) -> CodeRange {
        match self {
            ExprLike::Expr(node) => parser.range_of(*node),
            ExprLike::Identifier { range, .. }
            | ExprLike::Const { range, .. }
            | ExprLike::ArglessCall { range, .. }
            | ExprLike::BlocklessCall { range, .. } => *range,
        }
    }

    /// Can take arguments without parentheses.
    fn is_command_head(&self) -> bool {
        matches!(
            self,
            ExprLike::Identifier { .. } | ExprLike::Const { .. } | ExprLike::ArglessCall { .. }
        )
    }

    fn takes_paren_args(&self) -> bool {
        self.is_command_head()
    }

    fn is_blockable(&self) -> bool {
        match self {
            ExprLike::Expr(_) => false,
            ExprLike::Identifier { .. } | ExprLike::Const { .. } => true,
            ExprLike::ArglessCall { callee, .. } | ExprLike::BlocklessCall { callee, .. } => {
                *callee != Callee::Yield
            }
        }
    }

    fn is_assignable(&self, parser: &Parser<'_>) -> bool {
        match self {
            ExprLike::Identifier { .. } | ExprLike::Const { .. } => true,
            ExprLike::ArglessCall {
                callee: Callee::Method { .. },
                ..
            } => true,
            ExprLike::ArglessCall { .. } | ExprLike::BlocklessCall { .. } => false,
            ExprLike::Expr(node) => matches!(
                parser.arena[*node].kind,
                NodeKind::Lvar(_)
                    | NodeKind::Ivar(_)
                    | NodeKind::Gvar(_)
                    | NodeKind::Cvar(_)
                    | NodeKind::NthRef(_)
                    | NodeKind::BackRef(_)
                    | NodeKind::Nil
                    | NodeKind::SelfRef
                    | NodeKind::True
                    | NodeKind::False
                    | NodeKind::Call { block: None, .. }
            ),
        }
    }
}

/// Binary operators handled by precedence climbing, loosest first.
const PREC_OROR: u8 = 1;
const PREC_ANDAND: u8 = 2;
const PREC_EQ: u8 = 3;
const PREC_INEQ: u8 = 4;
const PREC_BITOR: u8 = 5;
const PREC_BITAND: u8 = 6;
const PREC_SHIFT: u8 = 7;
const PREC_ADDITIVE: u8 = 8;
const PREC_MULTIPLICATIVE: u8 = 9;

fn binop_prec(kind: TokenKind) -> Option<u8> {
    Some(match kind {
        TokenKind::VertVert => PREC_OROR,
        TokenKind::AmpAmp => PREC_ANDAND,
        TokenKind::LtEqGt
        | TokenKind::EqEq
        | TokenKind::EqEqEq
        | TokenKind::ExclEq
        | TokenKind::EqMatch
        | TokenKind::ExclTilde => PREC_EQ,
        TokenKind::Lt | TokenKind::LtEq | TokenKind::Gt | TokenKind::GtEq => PREC_INEQ,
        TokenKind::Vert | TokenKind::Caret => PREC_BITOR,
        TokenKind::Amp => PREC_BITAND,
        TokenKind::LtLt | TokenKind::GtGt => PREC_SHIFT,
        TokenKind::Plus | TokenKind::Minus => PREC_ADDITIVE,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => PREC_MULTIPLICATIVE,
        _ => return None,
    })
}

/// Whether `token` can start the first argument of a command call.
pub(super) fn is_arg_begin(token: TokenHead) -> bool {
    matches!(
        token.kind,
        TokenKind::Identifier
            | TokenKind::Const
            | TokenKind::MethodName
            | TokenKind::Label
            | TokenKind::Symbol
            | TokenKind::IvarName
            | TokenKind::CvarName
            | TokenKind::GvarName
            | TokenKind::NthRef
            | TokenKind::BackRef
            | TokenKind::Integer
            | TokenKind::Float
            | TokenKind::Char
            | TokenKind::StringBegin
            | TokenKind::XStringBegin
            | TokenKind::RegexpBegin
            | TokenKind::SymbolBegin
            | TokenKind::WordsBegin
            | TokenKind::SymbolsBegin
            | TokenKind::HeredocBegin
            | TokenKind::LParenArg
            | TokenKind::LBracketPrefix
            | TokenKind::ColonColonPrefix
            | TokenKind::Arrow
            | TokenKind::Excl
            | TokenKind::Tilde
            | TokenKind::PlusPrefix
            | TokenKind::MinusPrefix
            | TokenKind::MinusNum
            | TokenKind::StarPrefix
            | TokenKind::StarStarPrefix
            | TokenKind::AmpPrefix
            | TokenKind::KeywordCapitalDoubleUnderscoreEncoding
            | TokenKind::KeywordCapitalDoubleUnderscoreLine
            | TokenKind::KeywordCapitalDoubleUnderscoreFile
            | TokenKind::KeywordBegin
            | TokenKind::KeywordBreak
            | TokenKind::KeywordCase
            | TokenKind::KeywordClass
            | TokenKind::KeywordDef
            | TokenKind::KeywordDefinedQ
            | TokenKind::KeywordFalse
            | TokenKind::KeywordFor
            | TokenKind::KeywordIf
            | TokenKind::KeywordModule
            | TokenKind::KeywordNext
            | TokenKind::KeywordNil
            | TokenKind::KeywordNot
            | TokenKind::KeywordRedo
            | TokenKind::KeywordRetry
            | TokenKind::KeywordReturn
            | TokenKind::KeywordSelf
            | TokenKind::KeywordSuper
            | TokenKind::KeywordTrue
            | TokenKind::KeywordUnless
            | TokenKind::KeywordUntil
            | TokenKind::KeywordWhile
            | TokenKind::KeywordYield
    )
}

/// Method name spelled by an operator token, as in `def +(x)` or `a.+(b)`.
pub(super) fn operator_method_name(kind: TokenKind) -> Option<&'static str> {
    match kind {
        TokenKind::Excl
        | TokenKind::ExclEq
        | TokenKind::ExclTilde
        | TokenKind::Percent
        | TokenKind::Amp
        | TokenKind::AmpPrefix
        | TokenKind::Star
        | TokenKind::StarPrefix
        | TokenKind::StarStar
        | TokenKind::StarStarPrefix
        | TokenKind::Plus
        | TokenKind::PlusPrefix
        | TokenKind::Minus
        | TokenKind::MinusPrefix
        | TokenKind::Slash
        | TokenKind::Lt
        | TokenKind::LtLt
        | TokenKind::LtEq
        | TokenKind::LtEqGt
        | TokenKind::EqEq
        | TokenKind::EqEqEq
        | TokenKind::EqMatch
        | TokenKind::Gt
        | TokenKind::GtEq
        | TokenKind::GtGt
        | TokenKind::Aref
        | TokenKind::Aset
        | TokenKind::Caret
        | TokenKind::Vert
        | TokenKind::Tilde => Some(punct_text(kind)),
        _ => None,
    }
}

impl Parser<'_> {
    pub(super) fn parse_stmt(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let first = self.fill_token(diag)?;
        let mut node = match first.kind {
            TokenKind::KeywordAlias => self.parse_alias(diag)?,
            TokenKind::KeywordUndef => self.parse_undef(diag)?,
            TokenKind::KeywordCapitalBegin => self.parse_preexe(diag)?,
            TokenKind::KeywordCapitalEnd => self.parse_postexe(diag)?,
            TokenKind::StarPrefix => {
                let mlhs = self.parse_mlhs_rest(diag, Vec::new(), first.range)?;
                self.parse_masgn(diag, mlhs)?
            }
            _ => self.parse_expr_stmt(diag)?,
        };
        if let Some(label) = self.pending_label.take() {
            diag.error(self.range_of(label), "syntax error, unexpected label");
        }

        loop {
            let token = self.fill_token(diag)?;
            let kind = match token.kind {
                TokenKind::KeywordIfInfix | TokenKind::KeywordUnlessInfix => {
                    self.bump();
                    let cond = self.parse_expr_value(diag)?;
                    let cond = self.cond(diag, cond)?;
                    if token.kind == TokenKind::KeywordIfInfix {
                        NodeKind::If {
                            cond,
                            then: Some(node),
                            else_: None,
                        }
                    } else {
                        NodeKind::If {
                            cond,
                            then: None,
                            else_: Some(node),
                        }
                    }
                }
                TokenKind::KeywordWhileInfix | TokenKind::KeywordUntilInfix => {
                    self.bump();
                    let cond = self.parse_expr_value(diag)?;
                    let cond = self.cond(diag, cond)?;
                    let do_while = first.kind == TokenKind::KeywordBegin
                        && matches!(self.arena[node].kind, NodeKind::Begin(_));
                    if token.kind == TokenKind::KeywordWhileInfix {
                        NodeKind::While {
                            cond,
                            body: Some(node),
                            do_while,
                        }
                    } else {
                        NodeKind::Until {
                            cond,
                            body: Some(node),
                            do_while,
                        }
                    }
                }
                TokenKind::KeywordRescueInfix => {
                    self.bump();
                    let rescue = self.parse_expr_value(diag)?;
                    self.rescue_modifier(diag, node, rescue)?
                }
                _ => break,
            };
            let range = self.range_of(node) | CodeRange::from(token.range.start..self.last_end);
            node = self.alloc(diag, kind, range)?;
        }
        Ok(node)
    }

    /// `body rescue value`
    fn rescue_modifier(
        &mut self,
        diag: &mut Diagnostics,
        body: NodeId,
        value: NodeId,
    ) -> PResult<NodeKind> {
        let clause = self.alloc(
            diag,
            NodeKind::RescueClause {
                exceptions: Vec::new(),
                var: None,
                body: Some(value),
            },
            self.range_of(value),
        )?;
        Ok(NodeKind::Rescue {
            body: Some(body),
            clauses: vec![clause],
            else_: None,
        })
    }

    /// An expression statement, which may turn out to be the first target of
    /// a multiple assignment or an assignment with several values.
    fn parse_expr_stmt(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let start = self.fill_token(diag)?.range;
        let node = self.parse_expr(diag, PrecCtx::default())?;
        let token = self.fill_token(diag)?;
        match token.kind {
            TokenKind::Comma => {
                if let NodeKind::Asgn { target, value } = self.arena[node].kind {
                    // `a = 1, 2`
                    self.bump();
                    let mut items = vec![value];
                    self.parse_mrhs_items(diag, &mut items)?;
                    let range = self.list_range(&items);
                    let array = self.alloc(diag, NodeKind::Array(items), range)?;
                    self.arena[node].kind = NodeKind::Asgn {
                        target,
                        value: array,
                    };
                    self.arena[node].range |= range;
                    return Ok(node);
                }
                let first = self.target_of_node(diag, node)?;
                let mlhs = self.parse_mlhs_rest(diag, vec![first], start)?;
                if self.fill_token(diag)?.kind == TokenKind::RParen {
                    // `(a, b) = ...`: the caller assigns.
                    return Ok(mlhs);
                }
                self.parse_masgn(diag, mlhs)
            }
            TokenKind::Eq if matches!(self.arena[node].kind, NodeKind::Mlhs { .. }) => {
                self.parse_masgn(diag, node)
            }
            _ => Ok(node),
        }
    }

    fn parse_masgn(&mut self, diag: &mut Diagnostics, lhs: NodeId) -> PResult<NodeId> {
        self.expect(diag, TokenKind::Eq, "'='")?;
        let rhs = self.parse_mrhs(diag)?;
        let range = self.range_of(lhs) | self.range_of(rhs);
        self.alloc(diag, NodeKind::Masgn { lhs, rhs }, range)
    }

    /// Right-hand side of a multiple assignment: a single value (possibly a
    /// command) or a list that becomes an array.
    fn parse_mrhs(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let token = self.fill_token(diag)?;
        let first = if token.kind == TokenKind::StarPrefix {
            self.parse_splat_item(diag)?
        } else {
            let like = self.parse_arg_like(diag, PrecCtx::default())?;
            let node = self.finish_command(diag, like, PrecCtx::default(), true)?;
            self.value_expr(diag, node);
            node
        };
        let is_splat = matches!(self.arena[first].kind, NodeKind::Splat(_));
        if !is_splat && self.fill_token(diag)?.kind != TokenKind::Comma {
            return Ok(first);
        }
        let mut items = vec![first];
        if self.eat(diag, TokenKind::Comma)?.is_some() {
            self.parse_mrhs_items(diag, &mut items)?;
        }
        let range = self.list_range(&items);
        self.alloc(diag, NodeKind::Array(items), range)
    }

    /// Items after the first comma of a value list.
    fn parse_mrhs_items(&mut self, diag: &mut Diagnostics, items: &mut Vec<NodeId>) -> PResult<()> {
        loop {
            let item = self.parse_list_item(diag)?;
            items.push(item);
            if self.eat(diag, TokenKind::Comma)?.is_none() {
                return Ok(());
            }
        }
    }

    /// `*value` or a plain value, as found in `when`, `rescue` and value
    /// lists.
    pub(super) fn parse_list_item(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        if self.fill_token(diag)?.kind == TokenKind::StarPrefix {
            self.parse_splat_item(diag)
        } else {
            self.parse_arg_value(diag)
        }
    }

    fn parse_splat_item(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let star = self.bump();
        let value = self.parse_arg_value(diag)?;
        let range = star.range | self.range_of(value);
        self.alloc(diag, NodeKind::Splat(Some(value)), range)
    }

    /// Parses the rest of a comma-separated target list. `pre` holds the
    /// targets already read; when it is empty the list starts at a `*`.
    pub(super) fn parse_mlhs_rest(
        &mut self,
        diag: &mut Diagnostics,
        mut pre: Vec<NodeId>,
        start: CodeRange,
    ) -> PResult<NodeId> {
        let mut rest = None;
        let mut post = Vec::new();
        let mut first = pre.is_empty();
        loop {
            if !first && self.eat(diag, TokenKind::Comma)?.is_none() {
                break;
            }
            first = false;
            let token = self.fill_token(diag)?;
            match token.kind {
                // Trailing comma: `a, = list`
                TokenKind::Eq
                | TokenKind::RParen
                | TokenKind::KeywordIn
                | TokenKind::Vert
                | TokenKind::Newline => break,
                TokenKind::StarPrefix | TokenKind::Star => {
                    let star = self.bump();
                    let next = self.fill_token(diag)?;
                    let target = if matches!(
                        next.kind,
                        TokenKind::Comma
                            | TokenKind::Eq
                            | TokenKind::RParen
                            | TokenKind::KeywordIn
                            | TokenKind::Newline
                    ) {
                        None
                    } else {
                        Some(self.parse_mlhs_item(diag)?)
                    };
                    let range = star.range | target.map_or(DUMMY_RANGE, |t| self.range_of(t));
                    let splat = self.alloc(diag, NodeKind::Splat(target), range)?;
                    if rest.is_some() {
                        self.unexpected(diag, token, None);
                    } else {
                        rest = Some(splat);
                    }
                }
                _ => {
                    let item = self.parse_mlhs_item(diag)?;
                    if rest.is_some() {
                        post.push(item);
                    } else {
                        pre.push(item);
                    }
                }
            }
        }
        let range = start | CodeRange::from(start.start..self.last_end);
        self.alloc(diag, NodeKind::Mlhs { pre, rest, post }, range)
    }

    /// One target of a target list; `( ... )` nests.
    pub(super) fn parse_mlhs_item(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let token = self.fill_token(diag)?;
        if matches!(
            token.kind,
            TokenKind::LParen | TokenKind::LParenArg | TokenKind::LParenCall
        ) {
            let open = self.bump();
            let mlhs = self.nested(open.range.start, |p| {
                if p.fill_token(diag)?.kind == TokenKind::StarPrefix {
                    p.parse_mlhs_rest(diag, Vec::new(), open.range)
                } else {
                    let first = p.parse_mlhs_item(diag)?;
                    p.parse_mlhs_rest(diag, vec![first], open.range)
                }
            })?;
            let close = self.expect(diag, TokenKind::RParen, "')'")?;
            self.arena[mlhs].range |= close;
            return Ok(mlhs);
        }
        let like = self.parse_postfix(diag)?;
        self.target_of_like(diag, like)
    }

    /// Converts an operand to an assignment target, declaring a local
    /// variable if it names one.
    pub(super) fn target_of_like(&mut self, diag: &mut Diagnostics, like: ExprLike) -> PResult<NodeId> {
        match like {
            ExprLike::Identifier { range, name, .. } => {
                self.scopes.declare(name);
                self.alloc(diag, NodeKind::Lvar(name), range)
            }
            ExprLike::Const { range, .. } => {
                let node = self.expr_of(diag, like)?;
                self.check_const_target(diag, range);
                Ok(node)
            }
            ExprLike::ArglessCall {
                callee: Callee::Method { .. },
                ..
            } => self.expr_of(diag, like),
            _ => {
                let node = self.expr_of(diag, like)?;
                self.target_of_node(diag, node)
            }
        }
    }

    /// Converts an already built node to an assignment target.
    pub(super) fn target_of_node(&mut self, diag: &mut Diagnostics, node: NodeId) -> PResult<NodeId> {
        let range = self.range_of(node);
        if let Some(name) = self.vcall_name(node) {
            // A bare identifier that was read as a method call.
            self.arena.recycle(node);
            self.scopes.declare(name);
            return self.alloc(diag, NodeKind::Lvar(name), range);
        }
        let message = match &self.arena[node].kind {
            NodeKind::Lvar(_)
            | NodeKind::Ivar(_)
            | NodeKind::Gvar(_)
            | NodeKind::Cvar(_)
            | NodeKind::Mlhs { .. }
            | NodeKind::Call { block: None, .. }
            | NodeKind::Error => return Ok(node),
            NodeKind::Const(_) | NodeKind::Colon2(..) | NodeKind::Colon3(_) => {
                self.check_const_target(diag, range);
                return Ok(node);
            }
            NodeKind::NthRef(_) | NodeKind::BackRef(_) => format!(
                "Can't set variable {}",
                String::from_utf8_lossy(self.lexer.slice(range))
            ),
            NodeKind::SelfRef => "Can't change the value of self".to_owned(),
            NodeKind::Nil => "Can't assign to nil".to_owned(),
            NodeKind::True => "Can't assign to true".to_owned(),
            NodeKind::False => "Can't assign to false".to_owned(),
            kind => format!("can't assign to {}", kind.tag()),
        };
        diag.error(range, message);
        Ok(node)
    }

    /// The name of `node` if it is an identifier written alone, which
    /// became a call only because no such local existed.
    fn vcall_name(&self, node: NodeId) -> Option<Symbol> {
        match &self.arena[node].kind {
            NodeKind::FCall {
                name,
                args,
                block: None,
            } if args.is_empty()
                && self.lexer.slice(self.range_of(node)) == self.symbols.name(*name) =>
            {
                Some(*name)
            }
            _ => None,
        }
    }

    fn check_const_target(&mut self, diag: &mut Diagnostics, range: CodeRange) {
        if self.scopes.in_method() {
            diag.error(range, "dynamic constant assignment");
        }
    }

    /// `expr` level: `and`, `or`, `not` and commands.
    pub(super) fn parse_expr(&mut self, diag: &mut Diagnostics, prec: PrecCtx) -> PResult<NodeId> {
        let mut lhs = self.parse_expr_not(diag, prec)?;
        loop {
            let token = self.fill_token(diag)?;
            let is_and = match token.kind {
                TokenKind::KeywordAnd => true,
                TokenKind::KeywordOr => false,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_expr_not(diag, prec)?;
            let range = self.range_of(lhs) | self.range_of(rhs);
            let kind = if is_and {
                NodeKind::And(lhs, rhs)
            } else {
                NodeKind::Or(lhs, rhs)
            };
            lhs = self.alloc(diag, kind, range)?;
        }
        Ok(lhs)
    }

    pub(super) fn parse_expr_value(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let node = self.parse_expr(diag, PrecCtx::default())?;
        self.value_expr(diag, node);
        Ok(node)
    }

    fn parse_expr_not(&mut self, diag: &mut Diagnostics, prec: PrecCtx) -> PResult<NodeId> {
        let token = self.fill_token(diag)?;
        if token.kind != TokenKind::KeywordNot {
            return self.parse_expr_cmd(diag, prec);
        }
        self.bump();
        let operand = self.nested(token.range.start, |p| p.parse_expr_not(diag, prec))?;
        let operand = self.cond(diag, operand)?;
        let range = token.range | self.range_of(operand);
        self.alloc(diag, NodeKind::Not(operand), range)
    }

    fn parse_expr_cmd(&mut self, diag: &mut Diagnostics, prec: PrecCtx) -> PResult<NodeId> {
        let like = self.parse_arg_like(diag, prec)?;
        self.finish_command(diag, like, prec, true)
    }

    /// Turns `like` into a command call if arguments follow, or into a
    /// plain expression otherwise.
    pub(super) fn finish_command(
        &mut self,
        diag: &mut Diagnostics,
        like: ExprLike,
        prec: PrecCtx,
        allow_do_block: bool,
    ) -> PResult<NodeId> {
        let token = self.fill_token(diag)?;
        if like.is_command_head() && is_arg_begin(token) {
            if prec.invalid_command {
                diag.error(
                    token.range,
                    "non-parenthesized calls are not allowed in this context",
                );
            }
            return self.parse_command(diag, like, allow_do_block);
        }
        self.expr_of(diag, like)
    }

    /// `head arg, arg ...`, optionally followed by a `do` block that binds
    /// to `head`.
    fn parse_command(
        &mut self,
        diag: &mut Diagnostics,
        like: ExprLike,
        allow_do_block: bool,
    ) -> PResult<NodeId> {
        let pos = like.range(self).start;
        self.nested(pos, |p| p.parse_command_args(diag, like, allow_do_block))
    }

    fn parse_command_args(
        &mut self,
        diag: &mut Diagnostics,
        like: ExprLike,
        allow_do_block: bool,
    ) -> PResult<NodeId> {
        let saved = self.lexer.cmdarg.clone();
        self.lexer.cmdarg.push(true);
        let args = self.parse_call_args(diag, None)?;
        self.lexer.cmdarg = saved;
        let mut node = self.call_with_args(diag, like, args)?;
        if allow_do_block {
            let token = self.fill_token(diag)?;
            if matches!(token.kind, TokenKind::KeywordDoBlock | TokenKind::LBraceArg) {
                let block = self.parse_block(diag)?;
                node = self.attach_block(diag, node, block)?;
                // `foo 1 do ... end.bar`
                let like = self.parse_postfix_from(diag, ExprLike::Expr(node))?;
                node = self.finish_command(diag, like, PrecCtx::default(), false)?;
            }
        }
        Ok(node)
    }

    /// `arg` level: operators, ternary and assignment.
    pub(super) fn parse_arg(&mut self, diag: &mut Diagnostics, prec: PrecCtx) -> PResult<NodeId> {
        let like = self.parse_arg_like(diag, prec)?;
        self.expr_of(diag, like)
    }

    pub(super) fn parse_arg_value(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let node = self.parse_arg(diag, PrecCtx::default())?;
        self.value_expr(diag, node);
        Ok(node)
    }

    pub(super) fn parse_arg_like(&mut self, diag: &mut Diagnostics, prec: PrecCtx) -> PResult<ExprLike> {
        let pos = self.fill_token(diag)?.range.start;
        self.nested(pos, |p| p.parse_ternary(diag, prec))
    }

    /// `cond ? a : b`
    fn parse_ternary(&mut self, diag: &mut Diagnostics, prec: PrecCtx) -> PResult<ExprLike> {
        let cond = self.parse_range(diag, prec)?;
        let token = self.fill_token(diag)?;
        if token.kind != TokenKind::Question {
            return Ok(cond);
        }
        self.bump();
        let cond = self.expr_of(diag, cond)?;
        self.value_expr(diag, cond);
        let cond = self.cond(diag, cond)?;
        self.skip_newlines(diag)?;
        let then = self.parse_arg(diag, prec.with_invalid_command())?;
        self.skip_newlines(diag)?;
        self.expect(diag, TokenKind::Colon, "':'")?;
        self.skip_newlines(diag)?;
        let else_ = self.parse_arg(diag, prec.with_invalid_command())?;
        let range = self.range_of(cond) | self.range_of(else_);
        let node = self.alloc(
            diag,
            NodeKind::If {
                cond,
                then: Some(then),
                else_: Some(else_),
            },
            range,
        )?;
        Ok(ExprLike::Expr(node))
    }

    fn parse_range(&mut self, diag: &mut Diagnostics, prec: PrecCtx) -> PResult<ExprLike> {
        let lhs = self.parse_binary(diag, prec, PREC_OROR)?;
        let token = self.fill_token(diag)?;
        let exclusive = match token.kind {
            TokenKind::DotDot => false,
            TokenKind::DotDotDot => true,
            _ => return Ok(lhs),
        };
        self.bump();
        let lhs = self.expr_of(diag, lhs)?;
        let rhs = self.parse_binary(diag, prec.with_invalid_command(), PREC_OROR)?;
        let rhs = self.expr_of(diag, rhs)?;
        self.value_expr(diag, lhs);
        self.value_expr(diag, rhs);
        let range = self.range_of(lhs) | self.range_of(rhs);
        let kind = if exclusive {
            NodeKind::Dot3(lhs, rhs)
        } else {
            NodeKind::Dot2(lhs, rhs)
        };
        Ok(ExprLike::Expr(self.alloc(diag, kind, range)?))
    }

    /// Binary operators binding at least as tight as `min`.
    fn parse_binary(&mut self, diag: &mut Diagnostics, prec: PrecCtx, min: u8) -> PResult<ExprLike> {
        let mut lhs = self.parse_uminus(diag, prec)?;
        let mut last_prec = None;
        loop {
            let token = self.fill_token(diag)?;
            let Some(op_prec) = binop_prec(token.kind) else {
                break;
            };
            if op_prec < min {
                break;
            }
            if op_prec == PREC_EQ && last_prec == Some(PREC_EQ) {
                diag.error(token.range, "these operators cannot be chained");
            }
            self.bump();
            let l = self.expr_of(diag, lhs)?;
            let rhs = self.parse_binary(diag, prec.with_invalid_command(), op_prec + 1)?;
            let r = self.expr_of(diag, rhs)?;
            let range = self.range_of(l) | self.range_of(r);
            let kind = match token.kind {
                TokenKind::VertVert => NodeKind::Or(l, r),
                TokenKind::AmpAmp => NodeKind::And(l, r),
                _ => {
                    self.value_expr(diag, l);
                    self.value_expr(diag, r);
                    let name = self.intern(punct_text(token.kind).as_bytes());
                    NodeKind::Call {
                        recv: l,
                        name,
                        args: vec![r],
                        block: None,
                        safe_nav: false,
                    }
                }
            };
            lhs = ExprLike::Expr(self.alloc(diag, kind, range)?);
            last_prec = Some(op_prec);
        }
        Ok(lhs)
    }

    /// Unary minus, which binds looser than `**`: `-a ** b` is `-(a ** b)`.
    fn parse_uminus(&mut self, diag: &mut Diagnostics, prec: PrecCtx) -> PResult<ExprLike> {
        let token = self.fill_token(diag)?;
        if token.kind != TokenKind::MinusPrefix {
            return self.parse_pow(diag, prec);
        }
        self.bump();
        let operand = self.nested(token.range.start, |p| p.parse_uminus(diag, prec))?;
        let operand = self.expr_of(diag, operand)?;
        let node = self.unary_call(diag, operand, "-@", token.range)?;
        Ok(ExprLike::Expr(node))
    }

    fn parse_pow(&mut self, diag: &mut Diagnostics, prec: PrecCtx) -> PResult<ExprLike> {
        let first = self.fill_token(diag)?;
        let lhs = self.parse_unary(diag, prec)?;
        let token = self.fill_token(diag)?;
        if token.kind != TokenKind::StarStar {
            return Ok(lhs);
        }
        self.bump();
        let mut base = self.expr_of(diag, lhs)?;
        // `-2 ** 2` is `-(2 ** 2)`: take the sign back off the literal.
        let negated = first.kind == TokenKind::MinusNum
            && self.range_of(base).start == first.range.start
            && self.unnegate_literal(base);
        if negated {
            self.arena[base].range.start += 1;
        }
        let exponent = self.nested(token.range.start, |p| {
            p.parse_uminus(diag, prec.with_invalid_command())
        })?;
        let exponent = self.expr_of(diag, exponent)?;
        self.value_expr(diag, base);
        self.value_expr(diag, exponent);
        let name = self.intern(b"**");
        let range = self.range_of(base) | self.range_of(exponent);
        base = self.alloc(
            diag,
            NodeKind::Call {
                recv: base,
                name,
                args: vec![exponent],
                block: None,
                safe_nav: false,
            },
            range,
        )?;
        if negated {
            base = self.unary_call(diag, base, "-@", first.range)?;
        }
        Ok(ExprLike::Expr(base))
    }

    fn unnegate_literal(&mut self, node: NodeId) -> bool {
        match &mut self.arena[node].kind {
            NodeKind::Int(value) => {
                *value = -std::mem::take(value);
                true
            }
            NodeKind::Float(value) => {
                *value = -*value;
                true
            }
            _ => false,
        }
    }

    fn parse_unary(&mut self, diag: &mut Diagnostics, prec: PrecCtx) -> PResult<ExprLike> {
        let token = self.fill_token(diag)?;
        let name = match token.kind {
            TokenKind::Excl => "!",
            TokenKind::Tilde => "~",
            TokenKind::PlusPrefix => "+@",
            TokenKind::MinusPrefix => "-@",
            _ => return self.parse_operand(diag, prec),
        };
        self.bump();
        let operand = self.nested(token.range.start, |p| p.parse_unary(diag, prec))?;
        let operand = if token.kind == TokenKind::Excl {
            // `! foo 1`
            self.finish_command(diag, operand, prec, false)?
        } else {
            self.expr_of(diag, operand)?
        };
        self.value_expr(diag, operand);
        let node = if token.kind == TokenKind::Excl {
            let operand = self.cond(diag, operand)?;
            let range = token.range | self.range_of(operand);
            self.alloc(diag, NodeKind::Not(operand), range)?
        } else {
            self.unary_call(diag, operand, name, token.range)?
        };
        Ok(ExprLike::Expr(node))
    }

    fn unary_call(
        &mut self,
        diag: &mut Diagnostics,
        operand: NodeId,
        name: &str,
        op_range: CodeRange,
    ) -> PResult<NodeId> {
        let name = self.intern(name.as_bytes());
        let range = op_range | self.range_of(operand);
        self.alloc(
            diag,
            NodeKind::Call {
                recv: operand,
                name,
                args: Vec::new(),
                block: None,
                safe_nav: false,
            },
            range,
        )
    }

    /// A postfix expression, possibly the target of `=` or `op=`.
    fn parse_operand(&mut self, diag: &mut Diagnostics, prec: PrecCtx) -> PResult<ExprLike> {
        let like = self.parse_postfix(diag)?;
        let token = self.fill_token(diag)?;
        match token.kind {
            TokenKind::Eq if like.is_assignable(self) => {
                self.bump();
                let target = self.target_of_like(diag, like)?;
                let value = self.parse_assign_rhs(diag, prec, token.range)?;
                let range = self.range_of(target) | self.range_of(value);
                let node = self.alloc(diag, NodeKind::Asgn { target, value }, range)?;
                Ok(ExprLike::Expr(node))
            }
            TokenKind::OpAssign if like.is_assignable(self) => {
                let op_token = self.bump();
                let op = match op_token.value {
                    TokenValue::Symbol(op) => op,
                    _ => unreachable!("operator assignment without an operator"),
                };
                let target = self.target_of_like(diag, like)?;
                let value = self.parse_assign_rhs(diag, prec, token.range)?;
                let range = self.range_of(target) | self.range_of(value);
                let node = self.alloc(diag, NodeKind::OpAsgn { target, op, value }, range)?;
                Ok(ExprLike::Expr(node))
            }
            _ if prec.invalid_command && like.is_command_head() && is_arg_begin(token) => {
                diag.error(
                    token.range,
                    "non-parenthesized calls are not allowed in this context",
                );
                let node = self.parse_command(diag, like, false)?;
                Ok(ExprLike::Expr(node))
            }
            _ => Ok(like),
        }
    }

    /// The value of `target = value`. A command is allowed unless the
    /// assignment itself sits where commands are not.
    fn parse_assign_rhs(
        &mut self,
        diag: &mut Diagnostics,
        prec: PrecCtx,
        op_range: CodeRange,
    ) -> PResult<NodeId> {
        let token = self.fill_token(diag)?;
        if token.kind == TokenKind::StarPrefix {
            // `a = *b, c`
            let mut items = vec![self.parse_splat_item(diag)?];
            if self.eat(diag, TokenKind::Comma)?.is_some() {
                self.parse_mrhs_items(diag, &mut items)?;
            }
            let range = self.list_range(&items);
            return self.alloc(diag, NodeKind::Array(items), range);
        }
        let like = self.parse_arg_like(diag, prec)?;
        let command = like.is_command_head() && is_arg_begin(self.fill_token(diag)?);
        let mut value = if prec.invalid_command {
            self.expr_of(diag, like)?
        } else {
            self.finish_command(diag, like, prec, true)?
        };
        self.value_expr(diag, value);
        let token = self.fill_token(diag)?;
        if token.kind == TokenKind::KeywordRescueInfix && !command {
            self.bump();
            let rescue = self.parse_arg_value(diag)?;
            let kind = self.rescue_modifier(diag, value, rescue)?;
            let range = self.range_of(value) | self.range_of(rescue);
            value = self.alloc(diag, kind, range)?;
        }
        Ok(value)
    }

    pub(super) fn parse_postfix(&mut self, diag: &mut Diagnostics) -> PResult<ExprLike> {
        let like = self.parse_primary(diag)?;
        self.parse_postfix_from(diag, like)
    }

    /// Method calls, indexing, `::` and blocks following `like`.
    pub(super) fn parse_postfix_from(
        &mut self,
        diag: &mut Diagnostics,
        mut like: ExprLike,
    ) -> PResult<ExprLike> {
        loop {
            let token = self.fill_token(diag)?;
            like = match token.kind {
                TokenKind::LParenCall if like.takes_paren_args() => {
                    let args = self.parse_paren_args(diag)?;
                    let range = like.range(self) | args.range;
                    let callee = self.callee_of(diag, like)?;
                    ExprLike::BlocklessCall {
                        range,
                        callee,
                        args,
                    }
                }
                TokenKind::LBracket => {
                    let open = self.bump();
                    let recv = self.expr_of(diag, like)?;
                    let args = self.parse_call_args(diag, Some(TokenKind::RBracket))?;
                    let close = self.expect(diag, TokenKind::RBracket, "']'")?;
                    let name = self.intern(b"[]");
                    let range = self.range_of(recv) | close;
                    let node = self.alloc(
                        diag,
                        NodeKind::Call {
                            recv,
                            name,
                            args: args.args,
                            block: args.block_pass,
                            safe_nav: false,
                        },
                        range,
                    )?;
                    ExprLike::Expr(node)
                }
                TokenKind::Dot | TokenKind::AmpDot => {
                    self.bump();
                    let recv = self.expr_of(diag, like)?;
                    self.parse_method_after_dot(diag, recv, token.kind == TokenKind::AmpDot)?
                }
                TokenKind::ColonColon => {
                    self.bump();
                    let recv = self.expr_of(diag, like)?;
                    self.parse_after_colon2(diag, recv)?
                }
                TokenKind::LBrace | TokenKind::KeywordDo if like.is_blockable() => {
                    let block = self.parse_block(diag)?;
                    let node = self.call_of(diag, like)?;
                    ExprLike::Expr(self.attach_block(diag, node, block)?)
                }
                _ => break,
            };
        }
        Ok(like)
    }

    fn parse_method_after_dot(
        &mut self,
        diag: &mut Diagnostics,
        recv: NodeId,
        safe_nav: bool,
    ) -> PResult<ExprLike> {
        let token = self.fill_token(diag)?;
        let name = match token.kind {
            TokenKind::Identifier | TokenKind::Const | TokenKind::MethodName => {
                let token = self.bump();
                self.token_symbol(&token)
            }
            // `recv.()`
            TokenKind::LParenCall => self.intern(b"call"),
            kind => match operator_method_name(kind) {
                Some(name) => {
                    self.bump();
                    self.intern(name.as_bytes())
                }
                None => {
                    self.unexpected(diag, token, Some("method name"));
                    return Ok(ExprLike::Expr(recv));
                }
            },
        };
        let range = self.range_of(recv) | CodeRange::from(token.range.start..self.last_end);
        Ok(ExprLike::ArglessCall {
            range,
            callee: Callee::Method {
                recv,
                name,
                safe_nav,
            },
        })
    }

    fn parse_after_colon2(&mut self, diag: &mut Diagnostics, recv: NodeId) -> PResult<ExprLike> {
        let token = self.fill_token(diag)?;
        match token.kind {
            TokenKind::Const => {
                let token = self.bump();
                let name = self.token_symbol(&token);
                let range = self.range_of(recv) | token.range;
                if self.fill_token(diag)?.kind == TokenKind::LParenCall {
                    // `Foo::Bar(x)` calls a method.
                    return Ok(ExprLike::ArglessCall {
                        range,
                        callee: Callee::Method {
                            recv,
                            name,
                            safe_nav: false,
                        },
                    });
                }
                Ok(ExprLike::Const {
                    range,
                    scope: ConstScope::Expr(recv),
                    name,
                })
            }
            TokenKind::Identifier | TokenKind::MethodName => {
                let token = self.bump();
                let name = self.token_symbol(&token);
                Ok(ExprLike::ArglessCall {
                    range: self.range_of(recv) | token.range,
                    callee: Callee::Method {
                        recv,
                        name,
                        safe_nav: false,
                    },
                })
            }
            _ => {
                self.unexpected(diag, token, Some("constant or method name"));
                Ok(ExprLike::Expr(recv))
            }
        }
    }

    pub(super) fn parse_paren_args(&mut self, diag: &mut Diagnostics) -> PResult<CallArgs> {
        let open = self.bump();
        let mut args = self.parse_call_args(diag, Some(TokenKind::RParen))?;
        let close = self.expect(diag, TokenKind::RParen, "')'")?;
        args.range = open.range | close;
        Ok(args)
    }

    /// Comma-separated call arguments. With a `closer`, newlines between
    /// arguments are allowed and a trailing comma is accepted; the closer
    /// itself is left in place.
    ///
    /// `key => value` and `key: value` pairs are gathered into one trailing
    /// hash argument.
    pub(super) fn parse_call_args(
        &mut self,
        diag: &mut Diagnostics,
        closer: Option<TokenKind>,
    ) -> PResult<CallArgs> {
        let mut args = CallArgs::default();
        let mut pairs = Vec::new();
        let mut hash_range = DUMMY_RANGE;
        if let Some(closer) = closer {
            self.skip_newlines(diag)?;
            if self.fill_token(diag)?.kind == closer {
                return Ok(args);
            }
        }
        loop {
            let token = self.fill_token(diag)?;
            if args.block_pass.is_some() {
                // The block argument must come last.
                self.unexpected(diag, token, None);
            }
            match token.kind {
                TokenKind::StarPrefix => {
                    let splat = self.parse_splat_item(diag)?;
                    self.check_after_keywords(diag, &pairs, splat);
                    args.range |= self.range_of(splat);
                    args.args.push(splat);
                }
                TokenKind::StarStarPrefix => {
                    let star = self.bump();
                    let value = self.parse_arg_value(diag)?;
                    hash_range |= star.range | self.range_of(value);
                    pairs.push(HashEntry::DoubleSplat(value));
                }
                TokenKind::AmpPrefix => {
                    let amp = self.bump();
                    let value = self.parse_arg_value(diag)?;
                    let range = amp.range | self.range_of(value);
                    args.range |= range;
                    args.block_pass = Some(self.alloc(diag, NodeKind::BlockPass(value), range)?);
                }
                TokenKind::Label => {
                    let label = self.bump();
                    let key = self.label_key(diag, &label)?;
                    let value = self.parse_arg_value(diag)?;
                    hash_range |= label.range | self.range_of(value);
                    pairs.push(HashEntry::Pair(key, value));
                }
                _ => {
                    let like = self.parse_arg_like(diag, PrecCtx::default())?;
                    if let Some(key) = self.pending_label.take() {
                        let value = self.parse_arg_value(diag)?;
                        hash_range |= self.range_of(key) | self.range_of(value);
                        pairs.push(HashEntry::Pair(key, value));
                    } else {
                        let node = self.finish_command(diag, like, PrecCtx::default(), false)?;
                        self.value_expr(diag, node);
                        if self.eat(diag, TokenKind::FatArrow)?.is_some() {
                            let value = self.parse_arg_value(diag)?;
                            hash_range |= self.range_of(node) | self.range_of(value);
                            pairs.push(HashEntry::Pair(node, value));
                        } else {
                            self.check_after_keywords(diag, &pairs, node);
                            args.range |= self.range_of(node);
                            args.args.push(node);
                        }
                    }
                }
            }
            if self.eat(diag, TokenKind::Comma)?.is_none() {
                break;
            }
            if let Some(closer) = closer {
                self.skip_newlines(diag)?;
                if self.fill_token(diag)?.kind == closer {
                    break;
                }
            }
        }
        if closer.is_some() {
            self.skip_newlines(diag)?;
        }
        if !pairs.is_empty() {
            let hash = self.alloc(diag, NodeKind::Hash(pairs), hash_range)?;
            args.range |= hash_range;
            args.args.push(hash);
        }
        Ok(args)
    }

    /// Positional arguments may not follow `key: value` pairs.
    fn check_after_keywords(&self, diag: &mut Diagnostics, pairs: &[HashEntry], arg: NodeId) {
        if !pairs.is_empty() {
            diag.error(
                self.range_of(arg),
                "positional argument after keyword arguments",
            );
        }
    }

    /// Symbol node for a `name:` label.
    pub(super) fn label_key(
        &mut self,
        diag: &mut Diagnostics,
        label: &Token,
    ) -> PResult<NodeId> {
        let name = self.token_symbol(label);
        let range = CodeRange {
            start: label.range.start,
            end: label.range.end - 1,
        };
        self.alloc(diag, NodeKind::Sym(name), range)
    }

    pub(super) fn expr_of(&mut self, diag: &mut Diagnostics, like: ExprLike) -> PResult<NodeId> {
        match like {
            ExprLike::Expr(node) => Ok(node),
            ExprLike::Identifier {
                range,
                has_local,
                name,
            } => {
                let kind = if has_local {
                    NodeKind::Lvar(name)
                } else {
                    NodeKind::FCall {
                        name,
                        args: Vec::new(),
                        block: None,
                    }
                };
                self.alloc(diag, kind, range)
            }
            ExprLike::Const { range, scope, name } => {
                let kind = match scope {
                    ConstScope::Lexical => NodeKind::Const(name),
                    ConstScope::Top => NodeKind::Colon3(name),
                    ConstScope::Expr(recv) => NodeKind::Colon2(recv, name),
                };
                self.alloc(diag, kind, range)
            }
            ExprLike::ArglessCall { range, callee } => self.build_call(diag, callee, None, range),
            ExprLike::BlocklessCall {
                range,
                callee,
                args,
            } => self.build_call(diag, callee, Some(args), range),
        }
    }

    /// Like [Parser::expr_of], but a bare name is always a call.
    fn call_of(&mut self, diag: &mut Diagnostics, like: ExprLike) -> PResult<NodeId> {
        match like {
            ExprLike::Identifier { .. } | ExprLike::Const { .. } => {
                self.call_with_args(diag, like, CallArgs::default())
            }
            _ => self.expr_of(diag, like),
        }
    }

    fn callee_of(&mut self, diag: &mut Diagnostics, like: ExprLike) -> PResult<Callee> {
        Ok(match like {
            ExprLike::Identifier { name, .. } => Callee::Fn(name),
            ExprLike::Const {
                scope: ConstScope::Expr(recv),
                name,
                ..
            } => Callee::Method {
                recv,
                name,
                safe_nav: false,
            },
            ExprLike::Const { name, .. } => Callee::Fn(name),
            ExprLike::ArglessCall { callee, .. } | ExprLike::BlocklessCall { callee, .. } => callee,
            ExprLike::Expr(node) => {
                // `(expr) args`: not callable, keep the arguments anyway.
                diag.error(self.range_of(node), "Need a dot to call an expression");
                let name = self.intern(b"call");
                Callee::Method {
                    recv: node,
                    name,
                    safe_nav: false,
                }
            }
        })
    }

    pub(super) fn call_with_args(
        &mut self,
        diag: &mut Diagnostics,
        like: ExprLike,
        args: CallArgs,
    ) -> PResult<NodeId> {
        let range = like.range(self) | args.range;
        if let ExprLike::BlocklessCall {
            callee,
            args: mut prev,
            ..
        } = like
        {
            prev.args.extend(args.args);
            prev.block_pass = prev.block_pass.or(args.block_pass);
            return self.build_call(diag, callee, Some(prev), range);
        }
        let callee = self.callee_of(diag, like)?;
        self.build_call(diag, callee, Some(args), range)
    }

    fn build_call(
        &mut self,
        diag: &mut Diagnostics,
        callee: Callee,
        args: Option<CallArgs>,
        range: CodeRange,
    ) -> PResult<NodeId> {
        let has_args = args.is_some();
        let CallArgs {
            args, block_pass, ..
        } = args.unwrap_or_default();
        let kind = match callee {
            Callee::Fn(name) => NodeKind::FCall {
                name,
                args,
                block: block_pass,
            },
            Callee::Method {
                recv,
                name,
                safe_nav,
            } => NodeKind::Call {
                recv,
                name,
                args,
                block: block_pass,
                safe_nav,
            },
            Callee::Super if has_args => NodeKind::Super {
                args,
                block: block_pass,
            },
            Callee::Super => NodeKind::ZSuper { block: None },
            Callee::Yield => {
                if let Some(block_pass) = block_pass {
                    diag.error(
                        self.range_of(block_pass),
                        "block argument should not be given",
                    );
                }
                NodeKind::Yield(args)
            }
        };
        self.alloc(diag, kind, range)
    }

    pub(super) fn attach_block(
        &mut self,
        diag: &mut Diagnostics,
        node: NodeId,
        block: NodeId,
    ) -> PResult<NodeId> {
        let block_range = self.range_of(block);
        let slot = match &mut self.arena[node].kind {
            NodeKind::Call { block, .. }
            | NodeKind::FCall { block, .. }
            | NodeKind::Super { block, .. }
            | NodeKind::ZSuper { block } => Some(block),
            _ => None,
        };
        let message = match slot {
            Some(slot) if slot.is_none() => {
                *slot = Some(block);
                None
            }
            Some(_) => Some("both block arg and actual block given"),
            None => Some("block given to yield"),
        };
        if let Some(message) = message {
            diag.error(block_range, message);
        }
        self.arena[node].range |= block_range;
        Ok(node)
    }

    /// Rewrites a node used as a condition: range literals become
    /// flip-flops and regexp literals match against `$_`.
    pub(super) fn cond(&mut self, diag: &mut Diagnostics, node: NodeId) -> PResult<NodeId> {
        match self.arena[node].kind {
            NodeKind::Dot2(a, b) => {
                self.arena[node].kind = NodeKind::Flip2(a, b);
                Ok(node)
            }
            NodeKind::Dot3(a, b) => {
                self.arena[node].kind = NodeKind::Flip3(a, b);
                Ok(node)
            }
            NodeKind::And(a, b) => {
                let (a, b) = (self.cond(diag, a)?, self.cond(diag, b)?);
                self.arena[node].kind = NodeKind::And(a, b);
                Ok(node)
            }
            NodeKind::Or(a, b) => {
                let (a, b) = (self.cond(diag, a)?, self.cond(diag, b)?);
                self.arena[node].kind = NodeKind::Or(a, b);
                Ok(node)
            }
            NodeKind::Regx { .. } | NodeKind::Dregx { .. } => {
                let range = self.range_of(node);
                self.alloc(diag, NodeKind::Match(node), range)
            }
            _ => Ok(node),
        }
    }

    /// Range covering a non-empty node list.
    pub(super) fn list_range(&self, items: &[NodeId]) -> CodeRange {
        items
            .iter()
            .fold(DUMMY_RANGE, |range, &item| range | self.range_of(item))
    }

    /// Reports a node that cannot produce a value used as one.
    pub(super) fn value_expr(&mut self, diag: &mut Diagnostics, node: NodeId) {
        if self.arena[node].kind.is_void_value() {
            diag.error(self.range_of(node), "void value expression");
        }
    }

    /// Interned name carried by a name token.
    pub(super) fn token_symbol(&mut self, token: &Token) -> Symbol {
        match token.value {
            TokenValue::Symbol(sym) => sym,
            _ => {
                let name = self.lexer.slice(token.range).to_vec();
                self.intern(&name)
            }
        }
    }
}
