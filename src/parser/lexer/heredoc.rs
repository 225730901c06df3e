use std::collections::VecDeque;

use tracing::trace;

use crate::{
    ast::{CodeRange, NodeId},
    diagnostic::Diagnostics,
};

use super::{
    literal::{StrKind, StrTerm},
    is_ident_continue, Lexer, LexerState, PResult, ParseError, Token, TokenKind, TokenValue,
    TAB_WIDTH,
};

/// Terminator description of a heredoc.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct HeredocTerm {
    pub(super) id: Vec<u8>,
    /// `<<-` or `<<~`: the terminator may be indented.
    pub(super) allow_indent: bool,
    /// `<<~`: common indentation is removed from the body.
    pub(super) squiggly: bool,
    /// The quote around the identifier, or 0.
    pub(super) quote: u8,
}

#[derive(Debug)]
struct PendingHeredoc {
    term: HeredocTerm,
    start: usize,
    node: Option<NodeId>,
}

/// Heredocs opened on the current line, waiting for the newline.
#[derive(Debug, Default)]
pub(super) struct HeredocQueue {
    pending: VecDeque<PendingHeredoc>,
    /// The newline after the openers was consumed; bodies come next.
    pub(super) due: bool,
}

impl HeredocQueue {
    pub(super) fn has_unread(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(super) fn first_unread_id(&self) -> Option<Vec<u8>> {
        self.pending.front().map(|h| h.term.id.clone())
    }
}

/// A heredoc whose body is about to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(in crate::parser) struct HeredocBody {
    /// Placeholder node created for the opener.
    pub(in crate::parser) node: Option<NodeId>,
    pub(in crate::parser) squiggly: bool,
    pub(in crate::parser) kind: StrKind,
    pub(in crate::parser) start: usize,
}

impl Lexer {
    /// Tries to read `<<ID`, `<<-ID`, `<<~ID` or a quoted variant. The
    /// position is at the second `<`. Leaves the position alone and returns
    /// `None` if this is not a heredoc.
    pub(super) fn lex_heredoc_opener(
        &mut self,
        diag: &mut Diagnostics,
        start: usize,
        space_before: bool,
    ) -> PResult<Option<Token>> {
        let rollback = self.pos;
        self.pos += 1;
        let (allow_indent, squiggly) = match self.peek_byte() {
            b'-' => (true, false),
            b'~' => (true, true),
            _ => (false, false),
        };
        if allow_indent {
            self.pos += 1;
        }
        let quote = self.peek_byte();
        let id = if matches!(quote, b'\'' | b'"' | b'`') {
            self.pos += 1;
            let id_start = self.pos;
            while self.pos < self.src.len() && !matches!(self.src[self.pos], b'\n') {
                if self.src[self.pos] == quote {
                    break;
                }
                self.pos += 1;
            }
            if self.peek_byte() != quote {
                diag.error(
                    CodeRange {
                        start,
                        end: self.pos,
                    },
                    "unterminated here document identifier",
                );
                self.pos = rollback;
                return Ok(None);
            }
            let id = self.src[id_start..self.pos].to_vec();
            self.pos += 1;
            id
        } else {
            if !is_ident_continue(quote) {
                self.pos = rollback;
                return Ok(None);
            }
            let id_start = self.pos;
            self.skip_ident_chars();
            self.src[id_start..self.pos].to_vec()
        };
        let quote = if matches!(quote, b'\'' | b'"' | b'`') {
            quote
        } else {
            0
        };
        self.heredocs.pending.push_back(PendingHeredoc {
            term: HeredocTerm {
                id,
                allow_indent,
                squiggly,
                quote,
            },
            start,
            node: None,
        });
        self.state = LexerState::End;
        Ok(Some(Token::new(
            TokenKind::HeredocBegin,
            start,
            self.pos,
            space_before,
        )))
    }

    /// Associates the most recent heredoc opener with its placeholder node.
    pub(in crate::parser) fn attach_heredoc_node(&mut self, node: NodeId) {
        if let Some(h) = self.heredocs.pending.iter_mut().rev().find(|h| h.node.is_none()) {
            h.node = Some(node);
        }
    }

    /// Acknowledges a [TokenKind::HeredocBodies] marker.
    pub(in crate::parser) fn begin_heredoc_bodies(&mut self) {
        self.heredocs.due = false;
    }

    /// Starts reading the next pending body, in declaration order.
    pub(in crate::parser) fn next_heredoc_body(&mut self) -> Option<HeredocBody> {
        let pending = self.heredocs.pending.pop_front()?;
        trace!(
            id = %String::from_utf8_lossy(&pending.term.id),
            remaining = self.heredocs.pending.len(),
            "reading heredoc body"
        );
        let kind = if pending.term.quote == b'`' {
            StrKind::XString
        } else {
            StrKind::String
        };
        let body = HeredocBody {
            node: pending.node,
            squiggly: pending.term.squiggly,
            kind,
            start: pending.start,
        };
        let mut term = StrTerm::new(kind, pending.term.quote != b'\'', 0, b'\n', pending.start);
        term.heredoc = Some(pending.term);
        term.line_head = true;
        self.strterm = Some(term);
        Some(body)
    }

    pub(super) fn lex_heredoc_body(&mut self, diag: &mut Diagnostics) -> PResult<Token> {
        let Some(term) = self.strterm.as_ref() else {
            unreachable!("heredoc body without an open literal");
        };
        let Some(heredoc) = term.heredoc.clone() else {
            unreachable!("heredoc body without a terminator");
        };
        let interpolate = term.interpolate;
        let line_head = term.line_head;
        let term_start = term.start;
        let start = self.pos;

        if line_head {
            if self.pos >= self.src.len() && !self.fetch_more(diag) {
                return Err(ParseError::Unterminated {
                    message: format!(
                        "can't find heredoc delimiter \"{}\" anywhere before EOF",
                        String::from_utf8_lossy(&heredoc.id)
                    ),
                    pos: term_start,
                });
            }
            if let Some(end) = self.match_terminator(&heredoc) {
                self.pos = end;
                self.strterm = None;
                return Ok(Token::new(TokenKind::StringEnd, start, end, false));
            }
        }

        if interpolate && !line_head && self.peek_byte() == b'#' {
            match self.peek_byte_at(1) {
                b'{' => {
                    self.pos += 2;
                    self.push_context(start)?;
                    return Ok(Token::new(
                        TokenKind::StringInterpolationBegin,
                        start,
                        self.pos,
                        false,
                    ));
                }
                b'@' | b'$' if self.interpolated_var_follows(1) => {
                    self.pos += 1;
                    self.var_pending = true;
                    return Ok(Token::new(
                        TokenKind::StringVarInterpolation,
                        start,
                        self.pos,
                        false,
                    ));
                }
                _ => {}
            }
        }

        let mut buf = Vec::new();
        let mut ends_line = false;
        loop {
            if self.pos >= self.src.len() && !self.fetch_more(diag) {
                break;
            }
            let c = self.peek_byte();
            if interpolate && c == b'#' {
                let next = self.peek_byte_at(1);
                if next == b'{' || (matches!(next, b'@' | b'$') && self.interpolated_var_follows(1))
                {
                    break;
                }
            }
            self.pos += 1;
            if c == b'\\' && interpolate {
                self.read_escape(diag, &mut buf);
                continue;
            }
            if buf.len() < self.token_buffer_max {
                buf.push(c);
            }
            if c == b'\n' {
                ends_line = true;
                break;
            }
        }
        if self.pos == start && self.pos >= self.src.len() {
            return Err(ParseError::Unterminated {
                message: format!(
                    "can't find heredoc delimiter \"{}\" anywhere before EOF",
                    String::from_utf8_lossy(&heredoc.id)
                ),
                pos: start,
            });
        }
        if buf.len() >= self.token_buffer_max {
            diag.warning(
                CodeRange {
                    start,
                    end: self.pos,
                },
                "string too long (truncated)",
            );
        }
        if let Some(term) = &mut self.strterm {
            term.line_head = ends_line;
        }
        Ok(
            Token::new(TokenKind::StringContent, start, self.pos, false).with_value(
                TokenValue::Content {
                    bytes: buf,
                    line_head,
                },
            ),
        )
    }

    /// If the line at the current position is the terminator, returns the
    /// position after it (including its newline).
    fn match_terminator(&self, heredoc: &HeredocTerm) -> Option<usize> {
        let mut pos = self.pos;
        if heredoc.allow_indent {
            while matches!(self.src.get(pos), Some(b' ' | b'\t')) {
                pos += 1;
            }
        }
        if !self.src[pos..].starts_with(&heredoc.id) {
            return None;
        }
        pos += heredoc.id.len();
        if self.src.get(pos) == Some(&b'\r') {
            pos += 1;
        }
        match self.src.get(pos) {
            None => Some(pos),
            Some(b'\n') => Some(pos + 1),
            Some(_) => None,
        }
    }
}

/// Indentation width of a heredoc line, tabs advancing to the next multiple
/// of 8. `None` for a line holding only whitespace.
pub(in crate::parser) fn line_indent(line: &[u8]) -> Option<usize> {
    let mut width = 0;
    for (i, &c) in line.iter().enumerate() {
        match c {
            b' ' => width += 1,
            b'\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
            b'\n' => return None,
            b'\r' if line.get(i + 1) == Some(&b'\n') => return None,
            _ => return Some(width),
        }
    }
    // Whitespace before an interpolation.
    Some(width)
}

/// Removes up to `width` columns of leading whitespace. A tab crossing the
/// boundary is kept.
pub(in crate::parser) fn strip_indent(line: &[u8], width: usize) -> &[u8] {
    let mut col = 0;
    let mut i = 0;
    while i < line.len() && col < width {
        let next = match line[i] {
            b' ' => col + 1,
            b'\t' => (col / TAB_WIDTH + 1) * TAB_WIDTH,
            _ => break,
        };
        if next > width {
            break;
        }
        col = next;
        i += 1;
    }
    &line[i..]
}
