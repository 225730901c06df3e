use num_bigint::BigInt;

use crate::ast::{HashEntry, NodeId, NodeKind, DUMMY_RANGE};
use crate::diagnostic::Diagnostics;

use super::expr::{is_arg_begin, Callee, ConstScope, ExprLike, PrecCtx};
use super::lexer::{LexerState, TokenKind, TokenValue};
use super::{is_stmts_end, PResult, Parser};

impl Parser<'_> {
    /// Parses a primary expression: a literal, a variable, a bracketed
    /// expression or a keyword construct.
    pub(super) fn parse_primary(&mut self, diag: &mut Diagnostics) -> PResult<ExprLike> {
        let token = self.fill_token(diag)?;
        let node = match token.kind {
            TokenKind::Identifier
            | TokenKind::Const
            | TokenKind::MethodName
            | TokenKind::ColonColonPrefix
            | TokenKind::KeywordSuper
            | TokenKind::KeywordYield => return self.parse_name(diag),
            TokenKind::Integer
            | TokenKind::Float
            | TokenKind::MinusNum
            | TokenKind::Char
            | TokenKind::Symbol
            | TokenKind::IvarName
            | TokenKind::CvarName
            | TokenKind::GvarName
            | TokenKind::NthRef
            | TokenKind::BackRef
            | TokenKind::KeywordNil
            | TokenKind::KeywordTrue
            | TokenKind::KeywordFalse
            | TokenKind::KeywordSelf
            | TokenKind::KeywordRedo
            | TokenKind::KeywordRetry
            | TokenKind::KeywordCapitalDoubleUnderscoreFile
            | TokenKind::KeywordCapitalDoubleUnderscoreLine
            | TokenKind::KeywordCapitalDoubleUnderscoreEncoding => self.parse_atom(diag)?,

            TokenKind::StringBegin
            | TokenKind::XStringBegin
            | TokenKind::RegexpBegin
            | TokenKind::SymbolBegin
            | TokenKind::WordsBegin
            | TokenKind::SymbolsBegin => self.parse_string_literal(diag)?,
            TokenKind::HeredocBegin => {
                let token = self.bump();
                let node = self.alloc(diag, NodeKind::Str(Vec::new()), token.range)?;
                self.lexer.attach_heredoc_node(node);
                node
            }

            TokenKind::LParen | TokenKind::LParenArg => self.parse_paren(diag)?,
            TokenKind::LBracketPrefix => self.parse_array(diag)?,
            TokenKind::LBraceHash => self.parse_hash(diag)?,
            TokenKind::Arrow => self.parse_lambda(diag)?,

            TokenKind::KeywordReturn | TokenKind::KeywordBreak | TokenKind::KeywordNext => {
                self.parse_jump(diag)?
            }
            TokenKind::KeywordDefinedQ => self.parse_defined(diag)?,
            TokenKind::KeywordNot => self.parse_not_call(diag)?,

            TokenKind::KeywordBegin => self.parse_begin(diag)?,
            TokenKind::KeywordIf | TokenKind::KeywordUnless => self.parse_if(diag)?,
            TokenKind::KeywordWhile | TokenKind::KeywordUntil => self.parse_while(diag)?,
            TokenKind::KeywordCase => self.parse_case(diag)?,
            TokenKind::KeywordFor => self.parse_for(diag)?,
            TokenKind::KeywordDef => self.parse_def(diag)?,
            TokenKind::KeywordClass => self.parse_class(diag)?,
            TokenKind::KeywordModule => self.parse_module(diag)?,

            _ => {
                self.unexpected(diag, token, None);
                if !is_stmts_end(token.kind)
                    && !matches!(token.kind, TokenKind::Newline | TokenKind::Semicolon)
                {
                    self.bump();
                }
                self.alloc(diag, NodeKind::Error, token.range)?
            }
        };
        Ok(ExprLike::Expr(node))
    }

    /// Identifiers and other heads that may still become calls.
    fn parse_name(&mut self, diag: &mut Diagnostics) -> PResult<ExprLike> {
        let token = self.bump();
        let like = match token.kind {
            TokenKind::Identifier => {
                let name = self.token_symbol(&token);
                ExprLike::Identifier {
                    range: token.range,
                    has_local: self.scopes.is_local(name),
                    name,
                }
            }
            TokenKind::Const => ExprLike::Const {
                range: token.range,
                scope: ConstScope::Lexical,
                name: self.token_symbol(&token),
            },
            // `foo!` or `foo?`
            TokenKind::MethodName => ExprLike::ArglessCall {
                range: token.range,
                callee: Callee::Fn(self.token_symbol(&token)),
            },
            TokenKind::ColonColonPrefix => {
                let next = self.fill_token(diag)?;
                if next.kind != TokenKind::Const {
                    self.unexpected(diag, next, Some("constant"));
                    return Ok(ExprLike::Expr(self.alloc(diag, NodeKind::Error, token.range)?));
                }
                let name_token = self.bump();
                ExprLike::Const {
                    range: token.range | name_token.range,
                    scope: ConstScope::Top,
                    name: self.token_symbol(&name_token),
                }
            }
            TokenKind::KeywordSuper => ExprLike::ArglessCall {
                range: token.range,
                callee: Callee::Super,
            },
            TokenKind::KeywordYield => ExprLike::ArglessCall {
                range: token.range,
                callee: Callee::Yield,
            },
            kind => unreachable!("parse_name on {kind:?}"),
        };
        Ok(like)
    }

    /// Literals and variables that need no recursion.
    fn parse_atom(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let token = self.fill_token(diag)?;
        let node = match token.kind {
            TokenKind::Integer | TokenKind::Float => {
                let token = self.bump();
                let kind = numeric_kind(token.value);
                self.alloc(diag, kind, token.range)?
            }
            TokenKind::MinusNum => {
                let minus = self.bump();
                let token = self.fill_token(diag)?;
                if !matches!(token.kind, TokenKind::Integer | TokenKind::Float) {
                    self.unexpected(diag, token, Some("numeric literal"));
                    self.alloc(diag, NodeKind::Error, minus.range)?
                } else {
                    let token = self.bump();
                    let kind = match numeric_kind(token.value) {
                        NodeKind::Int(value) => NodeKind::Int(-value),
                        NodeKind::Float(value) => NodeKind::Float(-value),
                        kind => kind,
                    };
                    self.alloc(diag, kind, minus.range | token.range)?
                }
            }
            TokenKind::Char => {
                let token = self.bump();
                let bytes = match token.value {
                    TokenValue::Bytes(bytes) => bytes,
                    _ => Vec::new(),
                };
                self.alloc(diag, NodeKind::Str(bytes), token.range)?
            }
            TokenKind::Symbol => {
                let token = self.bump();
                let name = self.token_symbol(&token);
                self.alloc(diag, NodeKind::Sym(name), token.range)?
            }
            TokenKind::IvarName | TokenKind::CvarName | TokenKind::GvarName => {
                let token = self.bump();
                let name = self.token_symbol(&token);
                let kind = match token.kind {
                    TokenKind::IvarName => NodeKind::Ivar(name),
                    TokenKind::CvarName => NodeKind::Cvar(name),
                    _ => NodeKind::Gvar(name),
                };
                self.alloc(diag, kind, token.range)?
            }
            TokenKind::NthRef | TokenKind::BackRef => {
                let token = self.bump();
                let kind = match token.value {
                    TokenValue::NthRef(n) => NodeKind::NthRef(n),
                    TokenValue::BackRef(c) => NodeKind::BackRef(c),
                    _ => NodeKind::Error,
                };
                self.alloc(diag, kind, token.range)?
            }
            TokenKind::KeywordNil
            | TokenKind::KeywordTrue
            | TokenKind::KeywordFalse
            | TokenKind::KeywordSelf
            | TokenKind::KeywordRedo
            | TokenKind::KeywordRetry => {
                let token = self.bump();
                let kind = match token.kind {
                    TokenKind::KeywordNil => NodeKind::Nil,
                    TokenKind::KeywordTrue => NodeKind::True,
                    TokenKind::KeywordFalse => NodeKind::False,
                    TokenKind::KeywordSelf => NodeKind::SelfRef,
                    TokenKind::KeywordRedo => NodeKind::Redo,
                    _ => NodeKind::Retry,
                };
                self.alloc(diag, kind, token.range)?
            }
            TokenKind::KeywordCapitalDoubleUnderscoreFile => {
                let token = self.bump();
                let file = diag.source_map().locate(token.range.start).0;
                let name = diag.source_map().file_name(file).as_bytes().to_vec();
                self.alloc(diag, NodeKind::Str(name), token.range)?
            }
            TokenKind::KeywordCapitalDoubleUnderscoreLine => {
                let token = self.bump();
                let line = diag.source_map().line_of(token.range.start);
                self.alloc(diag, NodeKind::Int(BigInt::from(line)), token.range)?
            }
            TokenKind::KeywordCapitalDoubleUnderscoreEncoding => {
                // Encodings are not modelled; leave a call the consumer can
                // resolve.
                let token = self.bump();
                let name = self.intern(b"__ENCODING__");
                self.alloc(
                    diag,
                    NodeKind::FCall {
                        name,
                        args: Vec::new(),
                        block: None,
                    },
                    token.range,
                )?
            }
            kind => unreachable!("parse_atom on {kind:?}"),
        };
        Ok(node)
    }

    /// `( stmts )`. A parenthesized target list such as `(a, b)` comes
    /// back as an [NodeKind::Mlhs] for the caller to assign to.
    fn parse_paren(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let open = self.bump();
        while matches!(
            self.fill_token(diag)?.kind,
            TokenKind::Newline | TokenKind::Semicolon
        ) {
            self.bump();
        }
        if self.fill_token(diag)?.kind == TokenKind::StarPrefix {
            let mlhs = self.parse_mlhs_rest(diag, Vec::new(), open.range)?;
            let close = self.expect(diag, TokenKind::RParen, "')'")?;
            self.arena[mlhs].range |= close;
            return Ok(mlhs);
        }
        if self.fill_token(diag)?.kind == TokenKind::RParen {
            let close = self.bump();
            return self.alloc(diag, NodeKind::Begin(None), open.range | close.range);
        }

        let first = self.parse_stmt(diag)?;
        if matches!(self.arena[first].kind, NodeKind::Mlhs { .. })
            && self.fill_token(diag)?.kind == TokenKind::RParen
        {
            let close = self.bump();
            self.arena[first].range |= open.range | close.range;
            return Ok(first);
        }
        let mut stmts = vec![first];
        if matches!(
            self.fill_token(diag)?.kind,
            TokenKind::Newline | TokenKind::Semicolon
        ) {
            if let Some(rest) = self.parse_stmts(diag)? {
                let more = match &mut self.arena[rest].kind {
                    NodeKind::Stmts(more) => Some(std::mem::take(more)),
                    _ => None,
                };
                match more {
                    Some(more) => {
                        stmts.extend(more);
                        self.arena.recycle(rest);
                    }
                    None => stmts.push(rest),
                }
            }
        }
        let close = self.expect(diag, TokenKind::RParen, "')'")?;
        if open.kind == TokenKind::LParenArg {
            // `foo (1) { }` gives the block to `foo`.
            self.lexer.state = LexerState::EndArg;
        }
        let body = if stmts.len() == 1 {
            stmts[0]
        } else {
            let range = self.list_range(&stmts);
            self.alloc(diag, NodeKind::Stmts(stmts), range)?
        };
        self.alloc(diag, NodeKind::Begin(Some(body)), open.range | close)
    }

    /// `[a, *b, k => v]`
    fn parse_array(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let open = self.bump();
        let args = self.parse_call_args(diag, Some(TokenKind::RBracket))?;
        let close = self.expect(diag, TokenKind::RBracket, "']'")?;
        if let Some(block_pass) = args.block_pass {
            diag.error(
                self.range_of(block_pass),
                "block argument should not be given",
            );
        }
        self.alloc(diag, NodeKind::Array(args.args), open.range | close)
    }

    /// `{ k => v, k: v, "k": v, **h }`
    fn parse_hash(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let open = self.bump();
        let mut entries = Vec::new();
        loop {
            self.skip_newlines(diag)?;
            let token = self.fill_token(diag)?;
            match token.kind {
                TokenKind::RBrace => break,
                TokenKind::StarStarPrefix => {
                    self.bump();
                    let value = self.parse_arg_value(diag)?;
                    entries.push(HashEntry::DoubleSplat(value));
                }
                TokenKind::Label => {
                    let label = self.bump();
                    let key = self.label_key(diag, &label)?;
                    self.skip_newlines(diag)?;
                    let value = self.parse_arg_value(diag)?;
                    entries.push(HashEntry::Pair(key, value));
                }
                _ => {
                    let key = self.parse_arg(diag, PrecCtx::default())?;
                    let key = match self.pending_label.take() {
                        Some(label) => label,
                        None => {
                            self.value_expr(diag, key);
                            self.skip_newlines(diag)?;
                            self.expect(diag, TokenKind::FatArrow, "'=>'")?;
                            key
                        }
                    };
                    self.skip_newlines(diag)?;
                    let value = self.parse_arg_value(diag)?;
                    entries.push(HashEntry::Pair(key, value));
                }
            }
            self.skip_newlines(diag)?;
            if self.eat(diag, TokenKind::Comma)?.is_none() {
                break;
            }
        }
        self.skip_newlines(diag)?;
        let close = self.expect(diag, TokenKind::RBrace, "'}'")?;
        self.alloc(diag, NodeKind::Hash(entries), open.range | close)
    }

    /// `return`, `break` and `next`, with optional values. Several values
    /// become an array.
    fn parse_jump(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let keyword = self.bump();
        let token = self.fill_token(diag)?;
        let value = if is_arg_begin(token) && token.kind != TokenKind::AmpPrefix {
            let args = self.parse_call_args(diag, None)?;
            if let Some(block_pass) = args.block_pass {
                diag.error(
                    self.range_of(block_pass),
                    "block argument should not be given",
                );
            }
            let single = args.args.len() == 1
                && !matches!(self.arena[args.args[0]].kind, NodeKind::Splat(_));
            if single {
                Some(args.args[0])
            } else if args.args.is_empty() {
                None
            } else {
                let range = self.list_range(&args.args);
                Some(self.alloc(diag, NodeKind::Array(args.args), range)?)
            }
        } else {
            None
        };
        let range = keyword.range | value.map_or(DUMMY_RANGE, |v| self.range_of(v));
        let kind = match keyword.kind {
            TokenKind::KeywordReturn => NodeKind::Return(value),
            TokenKind::KeywordBreak => NodeKind::Break(value),
            _ => NodeKind::Next(value),
        };
        self.alloc(diag, kind, range)
    }

    /// `defined?(expr)` or `defined? arg`
    fn parse_defined(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let keyword = self.bump();
        let (operand, end) = if self.fill_token(diag)?.kind == TokenKind::LParenCall {
            self.bump();
            self.skip_newlines(diag)?;
            let operand = self.parse_expr(diag, PrecCtx::default())?;
            self.skip_newlines(diag)?;
            let close = self.expect(diag, TokenKind::RParen, "')'")?;
            (operand, close)
        } else {
            let operand = self.parse_arg(diag, PrecCtx::default().with_invalid_command())?;
            (operand, self.range_of(operand))
        };
        self.alloc(diag, NodeKind::Defined(operand), keyword.range | end)
    }

    /// `not(expr)` in operand position.
    fn parse_not_call(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let keyword = self.bump();
        let token = self.fill_token(diag)?;
        if token.kind != TokenKind::LParenCall {
            self.unexpected(diag, token, Some("'('"));
            let operand = self.parse_arg_value(diag)?;
            let operand = self.cond(diag, operand)?;
            let range = keyword.range | self.range_of(operand);
            return self.alloc(diag, NodeKind::Not(operand), range);
        }
        self.bump();
        self.skip_newlines(diag)?;
        let operand = if self.fill_token(diag)?.kind == TokenKind::RParen {
            self.alloc(diag, NodeKind::Nil, token.range)?
        } else {
            let operand = self.parse_expr_value(diag)?;
            self.cond(diag, operand)?
        };
        self.skip_newlines(diag)?;
        let close = self.expect(diag, TokenKind::RParen, "')'")?;
        self.alloc(diag, NodeKind::Not(operand), keyword.range | close)
    }
}

fn numeric_kind(value: TokenValue) -> NodeKind {
    match value {
        TokenValue::Int(value) => NodeKind::Int(value),
        TokenValue::Float(value) => NodeKind::Float(value),
        // The lexer already reported a malformed literal.
        _ => NodeKind::Int(BigInt::from(0)),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::parser::{parse, ParseOptions};
    use crate::symbol::SymbolTable;

    fn dump(src: &str) -> String {
        let mut symbols = SymbolTable::new();
        let result = parse(src.as_bytes(), ParseOptions::new().with_capture(10, 10), &mut symbols);
        assert_eq!(result.diagnostics, vec![], "{}", src);
        result.dump(&symbols).unwrap_or_default()
    }

    #[test]
    fn test_literals() {
        assert_eq!(dump("42"), "(scope [] (int 42))");
        assert_eq!(dump("-42"), "(scope [] (int -42))");
        assert_eq!(dump("?a"), "(scope [] (str \"a\"))");
        assert_eq!(dump(":foo"), "(scope [] (sym foo))");
        assert_eq!(dump("nil"), "(scope [] (nil))");
        assert_eq!(dump("self"), "(scope [] (self))");
        assert_eq!(dump("$1"), "(scope [] (nth-ref 1))");
        assert_eq!(dump("$&"), "(scope [] (back-ref &))");
    }

    #[test]
    fn test_file_and_line() {
        let mut symbols = SymbolTable::new();
        let result = parse(
            b"\n__LINE__\n__FILE__",
            ParseOptions::new().with_filename("a.rb").with_capture(10, 10),
            &mut symbols,
        );
        assert_eq!(
            result.dump(&symbols).unwrap_or_default(),
            "(scope [] (stmts (int 2) (str \"a.rb\")))"
        );
    }

    #[test]
    fn test_array_and_hash() {
        assert_eq!(dump("[1, *a]"), "(scope [] (array (int 1) (splat (fcall a))))");
        assert_eq!(
            dump("{a: 1, \"b\": 2, 3 => 4, **h}"),
            "(scope [] (hash (pair (sym a) (int 1)) (pair (sym b) (int 2)) (pair (int 3) (int 4)) (dsplat (fcall h))))"
        );
        assert_eq!(dump("[\n1,\n2,\n]"), "(scope [] (array (int 1) (int 2)))");
    }

    #[test]
    fn test_parens() {
        assert_eq!(dump("()"), "(scope [] (begin))");
        assert_eq!(
            dump("(1; 2)"),
            "(scope [] (begin (stmts (int 1) (int 2))))"
        );
    }

    #[test]
    fn test_jumps() {
        assert_eq!(dump("return"), "(scope [] (return))");
        assert_eq!(dump("return 1"), "(scope [] (return (int 1)))");
        assert_eq!(
            dump("return 1, 2"),
            "(scope [] (return (array (int 1) (int 2))))"
        );
    }
}
