use crate::ast::{CodeRange, NodeId, NodeKind, DUMMY_RANGE};
use crate::diagnostic::Diagnostics;

use super::lexer::TokenKind;
use super::{PResult, Parser};

impl Parser<'_> {
    /// Skips statement terminators.
    pub(super) fn skip_terms(&mut self, diag: &mut Diagnostics) -> PResult<()> {
        while matches!(
            self.fill_token(diag)?.kind,
            TokenKind::Newline | TokenKind::Semicolon
        ) {
            self.bump();
        }
        Ok(())
    }

    /// `begin ... end`
    pub(super) fn parse_begin(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let keyword = self.bump();
        self.open_block();
        let body = self.parse_body_stmt(diag)?;
        let end = self.expect_end(diag)?;
        self.close_block();
        self.alloc(diag, NodeKind::Begin(body), keyword.range | end)
    }

    /// A statement list followed by optional `rescue`, `else` and `ensure`
    /// sections, as found in `begin`, `def`, class bodies and `do` blocks.
    pub(super) fn parse_body_stmt(&mut self, diag: &mut Diagnostics) -> PResult<Option<NodeId>> {
        let mut body = self.parse_stmts(diag)?;

        let mut clauses = Vec::new();
        while self.fill_token(diag)?.kind == TokenKind::KeywordRescue {
            clauses.push(self.parse_rescue_clause(diag)?);
        }

        let mut else_ = None;
        if let Some(keyword) = self.eat(diag, TokenKind::KeywordElse)? {
            let stmts = self.parse_stmts(diag)?;
            if clauses.is_empty() {
                diag.warning(keyword.range, "else without rescue is useless");
                let joined: Vec<NodeId> = body.into_iter().chain(stmts).collect();
                body = match joined.len() {
                    0 => None,
                    1 => Some(joined[0]),
                    _ => {
                        let range = self.list_range(&joined);
                        Some(self.alloc(diag, NodeKind::Stmts(joined), range)?)
                    }
                };
            } else {
                else_ = stmts;
            }
        }

        if !clauses.is_empty() {
            let range = body.map_or(DUMMY_RANGE, |b| self.range_of(b))
                | self.list_range(&clauses)
                | else_.map_or(DUMMY_RANGE, |e| self.range_of(e));
            body = Some(self.alloc(
                diag,
                NodeKind::Rescue {
                    body,
                    clauses,
                    else_,
                },
                range,
            )?);
        }

        if let Some(keyword) = self.eat(diag, TokenKind::KeywordEnsure)? {
            let ensure = self.parse_stmts(diag)?;
            let range = body.map_or(DUMMY_RANGE, |b| self.range_of(b))
                | keyword.range
                | ensure.map_or(DUMMY_RANGE, |e| self.range_of(e));
            body = Some(self.alloc(diag, NodeKind::Ensure { body, ensure }, range)?);
        }
        Ok(body)
    }

    /// `rescue A, B => e then ...`
    fn parse_rescue_clause(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let keyword = self.bump();
        let mut exceptions = Vec::new();
        if !matches!(
            self.fill_token(diag)?.kind,
            TokenKind::FatArrow | TokenKind::KeywordThen | TokenKind::Newline | TokenKind::Semicolon
        ) {
            loop {
                exceptions.push(self.parse_list_item(diag)?);
                if self.eat(diag, TokenKind::Comma)?.is_none() {
                    break;
                }
                self.skip_newlines(diag)?;
            }
        }
        let var = if self.eat(diag, TokenKind::FatArrow)?.is_some() {
            Some(self.parse_mlhs_item(diag)?)
        } else {
            None
        };
        self.skip_then(diag, TokenKind::KeywordThen)?;
        let body = self.parse_stmts(diag)?;
        let range = CodeRange::from(keyword.range.start..self.last_end);
        self.alloc(
            diag,
            NodeKind::RescueClause {
                exceptions,
                var,
                body,
            },
            range,
        )
    }

    /// `if`/`unless` with `elsif` and `else` branches.
    pub(super) fn parse_if(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let keyword = self.bump();
        self.open_block();
        let cond = self.parse_expr_value(diag)?;
        let cond = self.cond(diag, cond)?;
        self.skip_then(diag, TokenKind::KeywordThen)?;
        let then = self.parse_stmts(diag)?;
        let else_ = if keyword.kind == TokenKind::KeywordUnless {
            if let Some(token) = self.eat(diag, TokenKind::KeywordElsif)? {
                self.unexpected(diag, token.head(), None);
            }
            match self.eat(diag, TokenKind::KeywordElse)? {
                Some(_) => self.parse_stmts(diag)?,
                None => None,
            }
        } else {
            self.parse_if_tail(diag)?
        };
        let end = self.expect_end(diag)?;
        self.close_block();
        let kind = if keyword.kind == TokenKind::KeywordUnless {
            NodeKind::If {
                cond,
                then: else_,
                else_: then,
            }
        } else {
            NodeKind::If { cond, then, else_ }
        };
        self.alloc(diag, kind, keyword.range | end)
    }

    fn parse_if_tail(&mut self, diag: &mut Diagnostics) -> PResult<Option<NodeId>> {
        let token = self.fill_token(diag)?;
        match token.kind {
            TokenKind::KeywordElsif => {
                self.bump();
                let cond = self.parse_expr_value(diag)?;
                let cond = self.cond(diag, cond)?;
                self.skip_then(diag, TokenKind::KeywordThen)?;
                let then = self.parse_stmts(diag)?;
                let else_ = self.nested(token.range.start, |p| p.parse_if_tail(diag))?;
                let range = CodeRange::from(token.range.start..self.last_end);
                Ok(Some(self.alloc(diag, NodeKind::If { cond, then, else_ }, range)?))
            }
            TokenKind::KeywordElse => {
                self.bump();
                self.parse_stmts(diag)
            }
            _ => Ok(None),
        }
    }

    /// The condition of `while`, `until` and `for`, during which `do`
    /// belongs to the loop.
    fn parse_loop_cond(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        self.lexer.cond.push(true);
        let cond = self.parse_expr_value(diag);
        self.lexer.cond.pop();
        cond
    }

    pub(super) fn parse_while(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let keyword = self.bump();
        self.open_block();
        let cond = self.parse_loop_cond(diag)?;
        let cond = self.cond(diag, cond)?;
        self.skip_then(diag, TokenKind::KeywordDoCond)?;
        let body = self.parse_stmts(diag)?;
        let end = self.expect_end(diag)?;
        self.close_block();
        let kind = if keyword.kind == TokenKind::KeywordUntil {
            NodeKind::Until {
                cond,
                body,
                do_while: false,
            }
        } else {
            NodeKind::While {
                cond,
                body,
                do_while: false,
            }
        };
        self.alloc(diag, kind, keyword.range | end)
    }

    /// `case subject when a, *b then ... else ... end`
    pub(super) fn parse_case(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let keyword = self.bump();
        self.open_block();
        let subject = if matches!(
            self.fill_token(diag)?.kind,
            TokenKind::Newline | TokenKind::Semicolon
        ) {
            None
        } else {
            Some(self.parse_expr_value(diag)?)
        };
        self.skip_terms(diag)?;

        let mut whens = Vec::new();
        while let Some(when) = self.eat(diag, TokenKind::KeywordWhen)? {
            let mut conds = Vec::new();
            loop {
                conds.push(self.parse_list_item(diag)?);
                if self.eat(diag, TokenKind::Comma)?.is_none() {
                    break;
                }
                self.skip_newlines(diag)?;
            }
            self.skip_then(diag, TokenKind::KeywordThen)?;
            let body = self.parse_stmts(diag)?;
            let range = CodeRange::from(when.range.start..self.last_end);
            whens.push(self.alloc(diag, NodeKind::When { conds, body }, range)?);
        }
        if whens.is_empty() {
            let token = self.fill_token(diag)?;
            self.unexpected(diag, token, Some("'when'"));
        }
        let else_ = match self.eat(diag, TokenKind::KeywordElse)? {
            Some(_) => self.parse_stmts(diag)?,
            None => None,
        };
        let end = self.expect_end(diag)?;
        self.close_block();
        self.alloc(
            diag,
            NodeKind::Case {
                subject,
                whens,
                else_,
            },
            keyword.range | end,
        )
    }

    /// `for a, b in list do ... end`
    pub(super) fn parse_for(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let keyword = self.bump();
        self.open_block();
        let first = self.parse_mlhs_item(diag)?;
        let var = if self.fill_token(diag)?.kind == TokenKind::Comma {
            let start = self.range_of(first);
            self.parse_mlhs_rest(diag, vec![first], start)?
        } else {
            first
        };
        self.expect(diag, TokenKind::KeywordIn, "'in'")?;
        let iter = self.parse_loop_cond(diag)?;
        self.skip_then(diag, TokenKind::KeywordDoCond)?;
        let body = self.parse_stmts(diag)?;
        let end = self.expect_end(diag)?;
        self.close_block();
        self.alloc(diag, NodeKind::For { var, iter, body }, keyword.range | end)
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
    fn test_if_chain() {
        assert_eq!(
            dump("if a then 1 elsif b then 2 else 3 end"),
            "(scope [] (if (fcall a) (int 1) (if (fcall b) (int 2) (int 3))))"
        );
        assert_eq!(
            dump("unless a\n1\nelse\n2\nend"),
            "(scope [] (if (fcall a) (int 2) (int 1)))"
        );
    }

    #[test]
    fn test_loops() {
        assert_eq!(
            dump("while a do b end"),
            "(scope [] (while (fcall a) (fcall b)))"
        );
        assert_eq!(
            dump("until a\nb\nend"),
            "(scope [] (until (fcall a) (fcall b)))"
        );
        assert_eq!(
            dump("for x, y in z do x end"),
            "(scope [x y] (for (mlhs (lvar x) (lvar y)) (fcall z) (lvar x)))"
        );
    }

    #[test]
    fn test_case() {
        assert_eq!(
            dump("case x\nwhen 1, *a then 2\nelse 3\nend"),
            "(scope [] (case (fcall x) (when (int 1) (splat (fcall a)) (int 2)) (int 3)))"
        );
    }

    #[test]
    fn test_begin_rescue() {
        assert_eq!(
            dump("begin\n a\nrescue E => e\n b\nelse\n c\nensure\n d\nend"),
            "(scope [e] (begin (ensure (rescue (fcall a) (resbody [(const E)] (lvar e) (fcall b)) (fcall c)) (fcall d))))"
        );
    }

    #[test]
    fn test_else_without_rescue() {
        let mut symbols = SymbolTable::new();
        let result = parse(
            b"begin\n1\nelse\n2\nend",
            ParseOptions::new().with_capture(10, 10),
            &mut symbols,
        );
        assert_eq!(result.warning_count, 1);
        assert_eq!(
            result.dump(&symbols).unwrap_or_default(),
            "(scope [] (begin (stmts (int 1) (int 2))))"
        );
    }
}
