use crate::ast::{CodeRange, NodeId, NodeKind, Params};
use crate::diagnostic::Diagnostics;
use crate::symbol::Symbol;

use super::expr::{operator_method_name, ExprLike};
use super::lexer::{BitStack, LexerState, Token, TokenKind};
use super::scope::ScopeKind;
use super::{PResult, Parser};

/// Where a parameter list stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ParamsEnd {
    /// `def f(a)` and `->(a)`
    RParen,
    /// `{ |a| }`
    Vert,
    /// `def f a`
    Newline,
    /// `-> a { }`
    LambdaBody,
}

/// Parameter kinds must come in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Required,
    Optional,
    Rest,
    Post,
    Keyword,
    KeywordRest,
    Block,
}

impl Parser<'_> {
    /// Saves the `do` binding state and starts a fresh one for a body.
    fn enter_body(&mut self) -> (BitStack, BitStack) {
        let saved = (self.lexer.cond.clone(), self.lexer.cmdarg.clone());
        self.lexer.cond.push(false);
        self.lexer.cmdarg.push(false);
        saved
    }

    fn leave_body(&mut self, saved: (BitStack, BitStack)) {
        (self.lexer.cond, self.lexer.cmdarg) = saved;
    }

    /// `def name(params) ... end` or `def recv.name ...`
    pub(super) fn parse_def(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let keyword = self.bump();
        self.open_block();

        let token = self.fill_token(diag)?;
        let mut recv = None;
        if matches!(
            token.kind,
            TokenKind::LParen | TokenKind::LParenCall | TokenKind::LParenArg
        ) {
            // `def (expr).name`
            let open = self.bump();
            let expr = self.parse_expr_value(diag)?;
            let close = self.expect(diag, TokenKind::RParen, "')'")?;
            self.arena[expr].range |= open.range | close;
            recv = Some(expr);
            if self.eat(diag, TokenKind::Dot)?.is_none()
                && self.eat(diag, TokenKind::ColonColon)?.is_none()
            {
                let token = self.fill_token(diag)?;
                self.unexpected(diag, token, Some("'.'"));
            }
            self.lexer.state = LexerState::FName;
        }
        let mut name = self.parse_fname(diag)?;
        if recv.is_none() {
            let token = self.fill_token(diag)?;
            if matches!(token.kind, TokenKind::Dot | TokenKind::ColonColon) {
                // The name read so far was the receiver.
                let (name_token, sym) = name;
                let kind = match self.lexer.slice(name_token) {
                    b"self" => NodeKind::SelfRef,
                    b"nil" => NodeKind::Nil,
                    b"true" => NodeKind::True,
                    b"false" => NodeKind::False,
                    text if text.first().is_some_and(u8::is_ascii_uppercase) => {
                        NodeKind::Const(sym)
                    }
                    text if text.starts_with(b"@@") => NodeKind::Cvar(sym),
                    text if text.starts_with(b"@") => NodeKind::Ivar(sym),
                    text if text.starts_with(b"$") => NodeKind::Gvar(sym),
                    _ if self.scopes.is_local(sym) => NodeKind::Lvar(sym),
                    _ => NodeKind::FCall {
                        name: sym,
                        args: Vec::new(),
                        block: None,
                    },
                };
                recv = Some(self.alloc(diag, kind, name_token)?);
                self.bump();
                self.lexer.state = LexerState::FName;
                name = self.parse_fname(diag)?;
            }
        }
        let (_, name) = name;

        let saved = self.enter_body();
        self.push_scope(ScopeKind::Method);
        let token = self.fill_token(diag)?;
        let params = match token.kind {
            TokenKind::LParen | TokenKind::LParenCall | TokenKind::LParenArg => {
                self.bump();
                let params = self.parse_param_list(diag, ParamsEnd::RParen, false)?;
                self.expect(diag, TokenKind::RParen, "')'")?;
                params
            }
            TokenKind::Newline | TokenKind::Semicolon => None,
            _ => self.parse_param_list(diag, ParamsEnd::Newline, false)?,
        };
        let body = self.parse_body_stmt(diag)?;
        let end = self.expect_end(diag)?;
        let scope = self.pop_scope(diag, body, keyword.range | end)?;
        self.leave_body(saved);
        self.close_block();

        let kind = match recv {
            Some(recv) => NodeKind::Sdef {
                recv,
                name,
                params,
                body: scope,
            },
            None => NodeKind::Def {
                name,
                params,
                body: scope,
            },
        };
        self.alloc(diag, kind, keyword.range | end)
    }

    /// A method name after `def`: an identifier, a keyword, an operator or
    /// a setter name. Variables are accepted too, as singleton receivers.
    fn parse_fname(&mut self, diag: &mut Diagnostics) -> PResult<(CodeRange, Symbol)> {
        let token = self.fill_token(diag)?;
        match token.kind {
            TokenKind::Identifier
            | TokenKind::Const
            | TokenKind::MethodName
            | TokenKind::IvarName
            | TokenKind::CvarName
            | TokenKind::GvarName => {
                let token = self.bump();
                Ok((token.range, self.token_symbol(&token)))
            }
            kind if kind.is_keyword() => {
                self.bump();
                let text = self.lexer.slice(token.range).to_vec();
                Ok((token.range, self.intern(&text)))
            }
            kind => match operator_method_name(kind) {
                Some(text) => {
                    self.bump();
                    Ok((token.range, self.intern(text.as_bytes())))
                }
                None => {
                    self.unexpected(diag, token, Some("method name"));
                    Ok((token.range, self.intern(b"")))
                }
            },
        }
    }

    /// A name operand of `alias` and `undef`: a method name or a symbol.
    fn parse_fitem(&mut self, diag: &mut Diagnostics) -> PResult<Symbol> {
        let token = self.fill_token(diag)?;
        match token.kind {
            TokenKind::Symbol => {
                let token = self.bump();
                Ok(self.token_symbol(&token))
            }
            TokenKind::SymbolBegin => {
                let node = self.parse_string_literal(diag)?;
                match self.arena[node].kind {
                    NodeKind::Sym(sym) => Ok(sym),
                    _ => {
                        diag.error(self.range_of(node), "dynamic symbol is not allowed here");
                        Ok(self.intern(b""))
                    }
                }
            }
            TokenKind::IvarName | TokenKind::CvarName | TokenKind::GvarName => {
                self.unexpected(diag, token, Some("method name"));
                let token = self.bump();
                Ok(self.token_symbol(&token))
            }
            _ => Ok(self.parse_fname(diag)?.1),
        }
    }

    /// `alias new old` or `alias $new $old`
    pub(super) fn parse_alias(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let keyword = self.bump();
        let token = self.fill_token(diag)?;
        if matches!(
            token.kind,
            TokenKind::GvarName | TokenKind::BackRef | TokenKind::NthRef
        ) {
            let new = self.bump();
            let new_name = self.gvar_alias_name(&new);
            let old = self.fill_token(diag)?;
            let kind = match old.kind {
                TokenKind::GvarName | TokenKind::BackRef => {
                    let old = self.bump();
                    let old_name = self.gvar_alias_name(&old);
                    NodeKind::Galias(new_name, old_name)
                }
                TokenKind::NthRef => {
                    self.bump();
                    diag.error(old.range, "can't make alias for the number variables");
                    NodeKind::Error
                }
                _ => {
                    self.unexpected(diag, old, Some("global variable"));
                    NodeKind::Error
                }
            };
            if new.kind == TokenKind::NthRef {
                diag.error(new.range, "can't make alias for the number variables");
            }
            let range = CodeRange::from(keyword.range.start..self.last_end);
            return self.alloc(diag, kind, range);
        }

        let new = self.parse_fitem(diag)?;
        self.lexer.state = LexerState::FName;
        let old = self.parse_fitem(diag)?;
        let range = CodeRange::from(keyword.range.start..self.last_end);
        self.alloc(diag, NodeKind::Alias(new, old), range)
    }

    fn gvar_alias_name(&mut self, token: &Token) -> Symbol {
        let text = self.lexer.slice(token.range).to_vec();
        self.intern(&text)
    }

    /// `undef a, :b`
    pub(super) fn parse_undef(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let keyword = self.bump();
        let mut names = vec![self.parse_fitem(diag)?];
        while self.eat(diag, TokenKind::Comma)?.is_some() {
            self.lexer.state = LexerState::FName;
            names.push(self.parse_fitem(diag)?);
        }
        let range = CodeRange::from(keyword.range.start..self.last_end);
        self.alloc(diag, NodeKind::Undef(names), range)
    }

    /// `BEGIN { ... }`
    pub(super) fn parse_preexe(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let keyword = self.bump();
        if self.scopes.depth() != 1 || self.lexer.open_blocks != 0 {
            diag.error(keyword.range, "BEGIN is permitted only at toplevel");
        }
        let body = self.parse_exe_body(diag)?;
        let range = keyword.range | self.range_of(body);
        self.alloc(diag, NodeKind::Preexe(body), range)
    }

    /// `END { ... }`, which runs as a block at exit.
    pub(super) fn parse_postexe(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let keyword = self.bump();
        if self.scopes.in_method() {
            diag.warning(keyword.range, "END in method; use at_exit");
        }
        self.push_scope(ScopeKind::Block);
        let body = self.parse_exe_body(diag)?;
        let range = self.range_of(body);
        let scope = self.pop_scope(diag, Some(body), range)?;
        self.alloc(diag, NodeKind::Postexe(scope), keyword.range | range)
    }

    fn parse_exe_body(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let open = self.fill_token(diag)?;
        let open = if matches!(
            open.kind,
            TokenKind::LBrace | TokenKind::LBraceArg | TokenKind::LBraceHash
        ) {
            self.bump().range
        } else {
            self.unexpected(diag, open, Some("'{'"));
            open.range
        };
        self.open_block();
        let body = self.nested(open.start, |p| p.parse_stmts(diag))?;
        let close = self.expect(diag, TokenKind::RBrace, "'}'")?;
        self.close_block();
        self.alloc(diag, NodeKind::Begin(body), open | close)
    }

    /// `class Name < Super ... end` or `class << target ... end`
    pub(super) fn parse_class(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let keyword = self.bump();
        self.open_block();
        if self.eat(diag, TokenKind::LtLt)?.is_some() {
            let target = self.parse_expr_value(diag)?;
            self.skip_terms(diag)?;
            let saved = self.enter_body();
            self.push_scope(ScopeKind::Class);
            let body = self.parse_body_stmt(diag)?;
            let end = self.expect_end(diag)?;
            let scope = self.pop_scope(diag, body, keyword.range | end)?;
            self.leave_body(saved);
            self.close_block();
            return self.alloc(diag, NodeKind::Sclass { target, body: scope }, keyword.range | end);
        }

        if self.scopes.in_method() {
            diag.error(keyword.range, "class definition in method body");
        }
        let path = self.parse_cpath(diag)?;
        let superclass = if self.eat(diag, TokenKind::Lt)?.is_some() {
            Some(self.parse_expr_value(diag)?)
        } else {
            None
        };
        self.skip_terms(diag)?;
        let saved = self.enter_body();
        self.push_scope(ScopeKind::Class);
        let body = self.parse_body_stmt(diag)?;
        let end = self.expect_end(diag)?;
        let scope = self.pop_scope(diag, body, keyword.range | end)?;
        self.leave_body(saved);
        self.close_block();
        self.alloc(
            diag,
            NodeKind::Class {
                path,
                superclass,
                body: scope,
            },
            keyword.range | end,
        )
    }

    /// `module Name ... end`
    pub(super) fn parse_module(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let keyword = self.bump();
        self.open_block();
        if self.scopes.in_method() {
            diag.error(keyword.range, "module definition in method body");
        }
        let path = self.parse_cpath(diag)?;
        self.skip_terms(diag)?;
        let saved = self.enter_body();
        self.push_scope(ScopeKind::Class);
        let body = self.parse_body_stmt(diag)?;
        let end = self.expect_end(diag)?;
        let scope = self.pop_scope(diag, body, keyword.range | end)?;
        self.leave_body(saved);
        self.close_block();
        self.alloc(diag, NodeKind::Module { path, body: scope }, keyword.range | end)
    }

    /// The name of a class or module: `Foo`, `::Foo` or `expr::Foo`.
    fn parse_cpath(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let like = self.parse_postfix(diag)?;
        let is_const = matches!(like, ExprLike::Const { .. });
        let node = self.expr_of(diag, like)?;
        if !is_const {
            diag.error(self.range_of(node), "class/module name must be CONSTANT");
        }
        Ok(node)
    }

    /// `{ |params| ... }` or `do |params| ... end`
    pub(super) fn parse_block(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let open = self.bump();
        self.nested(open.range.start, |p| p.parse_block_rest(diag, open))
    }

    fn parse_block_rest(&mut self, diag: &mut Diagnostics, open: Token) -> PResult<NodeId> {
        let is_brace = matches!(open.kind, TokenKind::LBrace | TokenKind::LBraceArg);
        self.open_block();
        let saved = if is_brace {
            None
        } else {
            Some(self.enter_body())
        };
        self.push_scope(ScopeKind::Block);

        let token = self.fill_token(diag)?;
        let params = match token.kind {
            TokenKind::VertVert => {
                self.bump();
                None
            }
            TokenKind::Vert => {
                self.bump();
                let params = self.parse_param_list(diag, ParamsEnd::Vert, true)?;
                if self.eat(diag, TokenKind::Semicolon)?.is_some() {
                    self.parse_block_locals(diag)?;
                }
                self.expect(diag, TokenKind::Vert, "'|'")?;
                params
            }
            _ => None,
        };

        let (body, end) = if is_brace {
            let body = self.parse_stmts(diag)?;
            (body, self.expect(diag, TokenKind::RBrace, "'}'")?)
        } else {
            let body = self.parse_body_stmt(diag)?;
            (body, self.expect_end(diag)?)
        };
        let range = open.range | end;
        let scope = self.pop_scope(diag, body, range)?;
        if let Some(saved) = saved {
            self.leave_body(saved);
        }
        self.close_block();
        self.alloc(diag, NodeKind::Iter { params, body: scope }, range)
    }

    /// `; a, b` in block parameters: variables local to the block.
    fn parse_block_locals(&mut self, diag: &mut Diagnostics) -> PResult<()> {
        loop {
            let token = self.fill_token(diag)?;
            if token.kind != TokenKind::Identifier {
                self.unexpected(diag, token, Some("local variable name"));
                return Ok(());
            }
            let token = self.bump();
            let name = self.token_symbol(&token);
            self.declare_param(diag, name, token.range);
            if self.eat(diag, TokenKind::Comma)?.is_none() {
                return Ok(());
            }
        }
    }

    /// `->(params) { ... }` or `-> params do ... end`
    pub(super) fn parse_lambda(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let arrow = self.bump();
        self.open_block();
        self.push_scope(ScopeKind::Block);
        let token = self.fill_token(diag)?;
        let params = match token.kind {
            TokenKind::LParen | TokenKind::LParenCall | TokenKind::LParenArg => {
                self.bump();
                let params = self.parse_param_list(diag, ParamsEnd::RParen, false)?;
                self.expect(diag, TokenKind::RParen, "')'")?;
                params
            }
            _ => self.parse_param_list(diag, ParamsEnd::LambdaBody, false)?,
        };

        let token = self.fill_token(diag)?;
        let (body, end) = match token.kind {
            TokenKind::LBrace | TokenKind::LBraceArg | TokenKind::LBraceHash => {
                self.bump();
                let body = self.parse_stmts(diag)?;
                (body, self.expect(diag, TokenKind::RBrace, "'}'")?)
            }
            TokenKind::KeywordDo | TokenKind::KeywordDoBlock | TokenKind::KeywordDoCond => {
                self.bump();
                let saved = self.enter_body();
                let body = self.parse_body_stmt(diag)?;
                let end = self.expect_end(diag)?;
                self.leave_body(saved);
                (body, end)
            }
            _ => {
                self.unexpected(diag, token, Some("lambda body"));
                (None, token.range)
            }
        };
        let range = arrow.range | end;
        let scope = self.pop_scope(diag, body, range)?;
        self.close_block();
        self.alloc(diag, NodeKind::Lambda { params, body: scope }, range)
    }

    /// Declares a parameter in the current scope, rejecting repeats.
    fn declare_param(&mut self, diag: &mut Diagnostics, name: Symbol, range: CodeRange) {
        if self.scopes.current_locals().contains(&name) && !self.symbols.name(name).starts_with(b"_")
        {
            diag.error(range, "duplicated argument name");
        }
        self.scopes.declare(name);
    }

    fn is_params_end(&self, kind: TokenKind, end: ParamsEnd) -> bool {
        let at_end = match end {
            ParamsEnd::RParen => kind == TokenKind::RParen,
            ParamsEnd::Vert => matches!(kind, TokenKind::Vert | TokenKind::Semicolon),
            ParamsEnd::Newline => matches!(kind, TokenKind::Newline | TokenKind::Semicolon),
            ParamsEnd::LambdaBody => matches!(
                kind,
                TokenKind::LBrace
                    | TokenKind::LBraceArg
                    | TokenKind::LBraceHash
                    | TokenKind::KeywordDo
                    | TokenKind::KeywordDoBlock
                    | TokenKind::KeywordDoCond
            ),
        };
        at_end || kind == TokenKind::EOF
    }

    /// Parses formal parameters up to `end`, which is left in place.
    /// Returns `None` for an empty list.
    pub(super) fn parse_param_list(
        &mut self,
        diag: &mut Diagnostics,
        end: ParamsEnd,
        block: bool,
    ) -> PResult<Option<NodeId>> {
        let start = self.fill_token(diag)?.range.start;
        let mut params = Params::default();
        let mut stage = Stage::Required;
        loop {
            if end == ParamsEnd::RParen {
                self.skip_newlines(diag)?;
            }
            let token = self.fill_token(diag)?;
            if self.is_params_end(token.kind, end) {
                break;
            }
            let (node, next_stage) = match token.kind {
                TokenKind::Identifier => {
                    let token = self.bump();
                    let name = self.token_symbol(&token);
                    self.declare_param(diag, name, token.range);
                    if self.eat(diag, TokenKind::Eq)?.is_some() {
                        let default = if block {
                            let like = self.parse_postfix(diag)?;
                            self.expr_of(diag, like)?
                        } else {
                            self.parse_arg_value(diag)?
                        };
                        let range = token.range | self.range_of(default);
                        let node = self.alloc(diag, NodeKind::OptArg { name, default }, range)?;
                        (node, Stage::Optional)
                    } else {
                        let node = self.alloc(diag, NodeKind::Arg(name), token.range)?;
                        let stage = if stage == Stage::Required {
                            Stage::Required
                        } else {
                            Stage::Post
                        };
                        (node, stage)
                    }
                }
                TokenKind::Label => {
                    let label = self.bump();
                    let name = self.token_symbol(&label);
                    self.declare_param(diag, name, label.range);
                    let next = self.fill_token(diag)?;
                    let default = if next.kind == TokenKind::Comma || self.is_params_end(next.kind, end)
                    {
                        None
                    } else if block {
                        let like = self.parse_postfix(diag)?;
                        Some(self.expr_of(diag, like)?)
                    } else {
                        Some(self.parse_arg_value(diag)?)
                    };
                    let range = CodeRange::from(label.range.start..self.last_end);
                    let node = self.alloc(diag, NodeKind::Kwarg { name, default }, range)?;
                    (node, Stage::Keyword)
                }
                TokenKind::Star | TokenKind::StarPrefix => {
                    let star = self.bump();
                    let name = self.param_name(diag)?;
                    let range = CodeRange::from(star.range.start..self.last_end);
                    let node = self.alloc(diag, NodeKind::RestArg(name), range)?;
                    (node, Stage::Rest)
                }
                TokenKind::StarStar | TokenKind::StarStarPrefix => {
                    let star = self.bump();
                    let name = self.param_name(diag)?;
                    let range = CodeRange::from(star.range.start..self.last_end);
                    let node = self.alloc(diag, NodeKind::KwRest(name), range)?;
                    (node, Stage::KeywordRest)
                }
                TokenKind::Amp | TokenKind::AmpPrefix => {
                    let amp = self.bump();
                    let name = match self.param_name(diag)? {
                        Some(name) => name,
                        None => {
                            let token = self.fill_token(diag)?;
                            self.unexpected(diag, token, Some("block argument name"));
                            self.intern(b"&")
                        }
                    };
                    let range = CodeRange::from(amp.range.start..self.last_end);
                    let node = self.alloc(diag, NodeKind::BlockArg(name), range)?;
                    (node, Stage::Block)
                }
                TokenKind::LParen | TokenKind::LParenArg | TokenKind::LParenCall => {
                    let node = self.parse_destructuring_param(diag)?;
                    let stage = if stage == Stage::Required {
                        Stage::Required
                    } else {
                        Stage::Post
                    };
                    (node, stage)
                }
                _ => {
                    self.unexpected(diag, token, None);
                    self.bump();
                    break;
                }
            };

            let in_order = match next_stage {
                Stage::Required => stage == Stage::Required,
                Stage::Optional => stage <= Stage::Optional,
                Stage::Rest => stage < Stage::Rest,
                Stage::Post => matches!(stage, Stage::Optional | Stage::Rest | Stage::Post),
                Stage::Keyword => stage <= Stage::Keyword,
                Stage::KeywordRest => stage < Stage::KeywordRest,
                Stage::Block => stage < Stage::Block,
            };
            if !in_order {
                diag.error(self.range_of(node), "syntax error, unexpected parameter order");
            }
            match next_stage {
                Stage::Required => params.required.push(node),
                Stage::Optional => params.optional.push(node),
                Stage::Rest => params.rest = Some(node),
                Stage::Post => params.post.push(node),
                Stage::Keyword => params.kwargs.push(node),
                Stage::KeywordRest => params.kwrest = Some(node),
                Stage::Block => params.block = Some(node),
            }
            stage = stage.max(next_stage);

            if self.eat(diag, TokenKind::Comma)?.is_none() {
                break;
            }
            // `|a, |` takes the first element only.
            if block && self.fill_token(diag)?.kind == TokenKind::Vert && params.rest.is_none() {
                let range = CodeRange::from(self.last_end..self.last_end);
                params.rest = Some(self.alloc(diag, NodeKind::RestArg(None), range)?);
                break;
            }
        }
        if end == ParamsEnd::RParen {
            self.skip_newlines(diag)?;
        }
        if params.is_empty() {
            return Ok(None);
        }
        let range = CodeRange::from(start..self.last_end);
        Ok(Some(self.alloc(diag, NodeKind::Args(Box::new(params)), range)?))
    }

    /// Optional name after `*`, `**` or `&`.
    fn param_name(&mut self, diag: &mut Diagnostics) -> PResult<Option<Symbol>> {
        match self.eat(diag, TokenKind::Identifier)? {
            Some(token) => {
                let name = self.token_symbol(&token);
                self.declare_param(diag, name, token.range);
                Ok(Some(name))
            }
            None => Ok(None),
        }
    }

    /// `(a, (b, *c))` as a parameter.
    fn parse_destructuring_param(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let open = self.bump();
        let mut pre = Vec::new();
        let mut rest = None;
        let mut post = Vec::new();
        loop {
            let token = self.fill_token(diag)?;
            let item = match token.kind {
                TokenKind::Identifier => {
                    let token = self.bump();
                    let name = self.token_symbol(&token);
                    self.declare_param(diag, name, token.range);
                    self.alloc(diag, NodeKind::Arg(name), token.range)?
                }
                TokenKind::LParen | TokenKind::LParenArg | TokenKind::LParenCall => {
                    self.nested(token.range.start, |p| p.parse_destructuring_param(diag))?
                }
                TokenKind::Star | TokenKind::StarPrefix => {
                    let star = self.bump();
                    let name = self.param_name(diag)?;
                    let range = CodeRange::from(star.range.start..self.last_end);
                    let splat = self.alloc(diag, NodeKind::RestArg(name), range)?;
                    if rest.is_some() {
                        self.unexpected(diag, token, None);
                    }
                    rest = Some(splat);
                    if self.eat(diag, TokenKind::Comma)?.is_none() {
                        break;
                    }
                    continue;
                }
                _ => {
                    self.unexpected(diag, token, Some("parameter"));
                    break;
                }
            };
            if rest.is_some() {
                post.push(item);
            } else {
                pre.push(item);
            }
            if self.eat(diag, TokenKind::Comma)?.is_none() {
                break;
            }
        }
        let close = self.expect(diag, TokenKind::RParen, "')'")?;
        self.alloc(diag, NodeKind::Mlhs { pre, rest, post }, open.range | close)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::parser::{parse, ParseOptions, ParseResult};
    use crate::symbol::SymbolTable;

    fn parse_str(src: &str, symbols: &mut SymbolTable) -> ParseResult {
        parse(src.as_bytes(), ParseOptions::new().with_capture(10, 10), symbols)
    }

    fn dump(src: &str) -> String {
        let mut symbols = SymbolTable::new();
        let result = parse_str(src, &mut symbols);
        assert_eq!(result.diagnostics, vec![], "{}", src);
        result.dump(&symbols).unwrap_or_default()
    }

    fn messages(src: &str) -> Vec<String> {
        let mut symbols = SymbolTable::new();
        parse_str(src, &mut symbols)
            .diagnostics
            .into_iter()
            .map(|d| d.message)
            .collect()
    }

    #[test]
    fn test_def() {
        assert_eq!(
            dump("def foo(a, b = 1, *r, c, k:, j: 2, **o, &blk)\nend"),
            "(scope [] (def foo (args (arg a) (optarg b (int 1)) (restarg r) (arg c) (kwarg k) (kwarg j (int 2)) (kwrest o) (blockarg blk)) (scope [a b r c k j o blk])))"
        );
        assert_eq!(
            dump("def ==(o)\nend"),
            "(scope [] (def == (args (arg o)) (scope [o])))"
        );
        assert_eq!(
            dump("def self.foo; end"),
            "(scope [] (sdef (self) foo _ (scope [])))"
        );
    }

    #[test]
    fn test_class_and_module() {
        assert_eq!(
            dump("class A < B; def x; end; end"),
            "(scope [] (class (const A) (const B) (scope [] (def x _ (scope [])))))"
        );
        assert_eq!(
            dump("module A::B\nend"),
            "(scope [] (module (colon2 (const A) B) (scope [])))"
        );
        assert_eq!(
            dump("class << self\nend"),
            "(scope [] (sclass (self) (scope [])))"
        );
    }

    #[test]
    fn test_definition_errors() {
        assert_eq!(
            messages("def f\nclass A; end\nend"),
            vec!["class definition in method body".to_owned()]
        );
        assert_eq!(
            messages("def f(a, a)\nend"),
            vec!["duplicated argument name".to_owned()]
        );
        assert_eq!(messages("def f(_, _)\nend"), Vec::<String>::new());
        assert_eq!(
            messages("class foo\nend"),
            vec!["class/module name must be CONSTANT".to_owned()]
        );
    }

    #[test]
    fn test_alias_and_undef() {
        assert_eq!(dump("alias foo bar"), "(scope [] (alias foo bar))");
        assert_eq!(dump("alias :+ :-"), "(scope [] (alias + -))");
        assert_eq!(dump("alias $a $b"), "(scope [] (galias $a $b))");
        assert_eq!(dump("undef a, b"), "(scope [] (undef a b))");
        assert_eq!(
            messages("alias $a $1"),
            vec!["can't make alias for the number variables".to_owned()]
        );
    }

    #[test]
    fn test_begin_end_blocks() {
        assert_eq!(dump("BEGIN { 1 }"), "(scope [] (preexe (begin (int 1))))");
        assert_eq!(
            messages("def f\nBEGIN { 1 }\nend"),
            vec!["BEGIN is permitted only at toplevel".to_owned()]
        );
        assert_eq!(
            messages("def f\nEND { 1 }\nend"),
            vec!["END in method; use at_exit".to_owned()]
        );
    }

    #[test]
    fn test_blocks_and_lambdas() {
        assert_eq!(
            dump("foo { |a, (b, c); d| a }"),
            "(scope [] (fcall foo (iter (args (arg a) (mlhs (arg b) (arg c))) (scope [a b c d] (lvar a)))))"
        );
        assert_eq!(
            dump("foo do |x| end"),
            "(scope [] (fcall foo (iter (args (arg x)) (scope [x]))))"
        );
        assert_eq!(
            dump("->(x) { x }"),
            "(scope [] (lambda (args (arg x)) (scope [x] (lvar x))))"
        );
        assert_eq!(dump("-> { }"), "(scope [] (lambda _ (scope [])))");
    }
}
