use crate::ast::{CodeRange, NodeId, NodeKind};
use crate::diagnostic::Diagnostics;

use super::lexer::{line_indent, strip_indent, StrKind, Token, TokenKind, TokenValue};
use super::{PResult, Parser};

/// A piece of a literal body.
#[derive(Debug)]
enum Part {
    Text {
        bytes: Vec<u8>,
        range: CodeRange,
        /// Starts a heredoc body line.
        line_head: bool,
    },
    Node(NodeId),
}

impl Parser<'_> {
    /// Parses a quoted literal starting at its opener: strings, backticks,
    /// regexps, quoted symbols and word lists. Adjacent plain strings are
    /// joined.
    pub(super) fn parse_string_literal(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let open = self.bump();
        let kind = match open.kind {
            TokenKind::WordsBegin | TokenKind::SymbolsBegin => {
                return self.parse_word_list(diag, open)
            }
            TokenKind::XStringBegin => StrKind::XString,
            TokenKind::RegexpBegin => StrKind::Regexp,
            TokenKind::SymbolBegin => StrKind::Symbol,
            _ => StrKind::String,
        };
        let mut node = self.parse_quoted(diag, &open, kind)?;
        if kind != StrKind::String {
            return Ok(node);
        }
        while self.pending_label.is_none() && self.fill_token(diag)?.kind == TokenKind::StringBegin
        {
            let open = self.bump();
            let next = self.parse_quoted(diag, &open, StrKind::String)?;
            if let Some(label) = self.pending_label.take() {
                diag.error(self.range_of(label), "syntax error, unexpected label");
                continue;
            }
            node = self.concat_strings(diag, node, next)?;
        }
        Ok(node)
    }

    /// One literal whose opener was just consumed.
    fn parse_quoted(&mut self, diag: &mut Diagnostics, open: &Token, kind: StrKind) -> PResult<NodeId> {
        let parts = self.parse_string_parts(diag)?;
        let token = self.fill_token(diag)?;
        let (end, flags, label) = match token.kind {
            TokenKind::StringEnd => {
                let end = self.bump();
                let flags = match end.value {
                    TokenValue::Bytes(flags) => String::from_utf8_lossy(&flags).into_owned(),
                    _ => String::new(),
                };
                (end.range, flags, false)
            }
            TokenKind::StringEndColon => (self.bump().range, String::new(), true),
            _ => {
                self.unexpected(diag, token, Some("string end"));
                (token.range, String::new(), false)
            }
        };
        let range = open.range | end;
        if label {
            // `"name": value`
            let kind = self.literal_kind(diag, StrKind::Symbol, parts, String::new())?;
            let node = self.alloc(diag, kind, range)?;
            self.pending_label = Some(node);
            return Ok(node);
        }
        let kind = self.literal_kind(diag, kind, parts, flags)?;
        self.alloc(diag, kind, range)
    }

    /// `%w[a b#{c}]` and `%i[...]`
    fn parse_word_list(&mut self, diag: &mut Diagnostics, open: Token) -> PResult<NodeId> {
        let element = if open.kind == TokenKind::WordsBegin {
            StrKind::String
        } else {
            StrKind::Symbol
        };
        let mut words = Vec::new();
        let end = loop {
            let token = self.fill_token(diag)?;
            match token.kind {
                TokenKind::WordSeparator => {
                    self.bump();
                }
                TokenKind::StringEnd => break self.bump().range,
                TokenKind::StringContent
                | TokenKind::StringInterpolationBegin
                | TokenKind::StringVarInterpolation => {
                    let start = token.range.start;
                    let parts = self.parse_string_parts(diag)?;
                    let kind = self.literal_kind(diag, element, parts, String::new())?;
                    let range = CodeRange::from(start..self.last_end);
                    words.push(self.alloc(diag, kind, range)?);
                }
                _ => {
                    self.unexpected(diag, token, Some("string end"));
                    break token.range;
                }
            }
        };
        let kind = if element == StrKind::String {
            NodeKind::Words(words)
        } else {
            NodeKind::Symbols(words)
        };
        self.alloc(diag, kind, open.range | end)
    }

    /// Reads text and interpolations up to the next delimiter token, which
    /// is left in place.
    fn parse_string_parts(&mut self, diag: &mut Diagnostics) -> PResult<Vec<Part>> {
        let mut parts = Vec::new();
        loop {
            let token = self.fill_token(diag)?;
            match token.kind {
                TokenKind::StringContent => {
                    let token = self.bump();
                    let (bytes, line_head) = match token.value {
                        TokenValue::Content { bytes, line_head } => (bytes, line_head),
                        _ => (self.lexer.slice(token.range).to_vec(), false),
                    };
                    parts.push(Part::Text {
                        bytes,
                        range: token.range,
                        line_head,
                    });
                }
                TokenKind::StringInterpolationBegin => {
                    let open = self.bump();
                    let body = self.parse_stmts(diag)?;
                    let close = self.expect(diag, TokenKind::StringInterpolationEnd, "'}'")?;
                    let node = self.alloc(diag, NodeKind::Begin(body), open.range | close)?;
                    parts.push(Part::Node(node));
                }
                TokenKind::StringVarInterpolation => {
                    self.bump();
                    let like = self.parse_primary(diag)?;
                    let node = self.expr_of(diag, like)?;
                    parts.push(Part::Node(node));
                }
                _ => return Ok(parts),
            }
        }
    }

    /// Builds the node kind for a literal body: a plain node when the body
    /// is text only, an interpolating one otherwise.
    fn literal_kind(
        &mut self,
        diag: &mut Diagnostics,
        kind: StrKind,
        parts: Vec<Part>,
        flags: String,
    ) -> PResult<NodeKind> {
        let mut merged: Vec<Part> = Vec::with_capacity(parts.len());
        for part in parts {
            if let Part::Text {
                bytes: more,
                range: more_range,
                ..
            } = &part
            {
                if more.is_empty() {
                    continue;
                }
                if let Some(Part::Text { bytes, range, .. }) = merged.last_mut() {
                    bytes.extend_from_slice(more);
                    *range |= *more_range;
                    continue;
                }
            }
            merged.push(part);
        }

        if let [] | [Part::Text { .. }] = merged.as_slice() {
            let bytes = match merged.pop() {
                Some(Part::Text { bytes, .. }) => bytes,
                _ => Vec::new(),
            };
            return Ok(match kind {
                StrKind::String | StrKind::Words => NodeKind::Str(bytes),
                StrKind::XString => NodeKind::Xstr(bytes),
                StrKind::Regexp => NodeKind::Regx {
                    source: bytes,
                    flags,
                },
                StrKind::Symbol | StrKind::Symbols => NodeKind::Sym(self.intern(&bytes)),
            });
        }

        let mut nodes = Vec::with_capacity(merged.len());
        for part in merged {
            nodes.push(match part {
                Part::Text { bytes, range, .. } => self.alloc(diag, NodeKind::Str(bytes), range)?,
                Part::Node(node) => node,
            });
        }
        Ok(match kind {
            StrKind::String | StrKind::Words => NodeKind::Dstr(nodes),
            StrKind::XString => NodeKind::Dxstr(nodes),
            StrKind::Regexp => NodeKind::Dregx {
                parts: nodes,
                flags,
            },
            StrKind::Symbol | StrKind::Symbols => NodeKind::Dsym(nodes),
        })
    }

    /// `"a" "b"`: folds `b` into `a`.
    fn concat_strings(&mut self, diag: &mut Diagnostics, a: NodeId, b: NodeId) -> PResult<NodeId> {
        let range = self.range_of(a) | self.range_of(b);
        let mut parts = self.take_string_parts(a);
        parts.extend(self.take_string_parts(b));

        let mut merged: Vec<NodeId> = Vec::with_capacity(parts.len());
        for part in parts {
            if let Some(&last) = merged.last() {
                let both_plain = matches!(self.arena[last].kind, NodeKind::Str(_))
                    && matches!(self.arena[part].kind, NodeKind::Str(_));
                if both_plain {
                    let more = match std::mem::replace(&mut self.arena[part].kind, NodeKind::Nil) {
                        NodeKind::Str(bytes) => bytes,
                        _ => Vec::new(),
                    };
                    let more_range = self.range_of(part);
                    self.arena.recycle(part);
                    if let NodeKind::Str(bytes) = &mut self.arena[last].kind {
                        bytes.extend(more);
                    }
                    self.arena[last].range |= more_range;
                    continue;
                }
            }
            merged.push(part);
        }

        if let &[only] = merged.as_slice() {
            if matches!(self.arena[only].kind, NodeKind::Str(_)) {
                self.arena[only].range = range;
                return Ok(only);
            }
        }
        self.alloc(diag, NodeKind::Dstr(merged), range)
    }

    /// The pieces of a string node; a [NodeKind::Dstr] is dissolved.
    fn take_string_parts(&mut self, node: NodeId) -> Vec<NodeId> {
        match &mut self.arena[node].kind {
            NodeKind::Dstr(parts) => {
                let parts = std::mem::take(parts);
                self.arena.recycle(node);
                parts
            }
            _ => vec![node],
        }
    }

    /// Reads the bodies of the heredocs opened on the line just finished and
    /// fills in their placeholder nodes.
    pub(super) fn read_heredoc_bodies(&mut self, diag: &mut Diagnostics) -> PResult<()> {
        self.lexer.begin_heredoc_bodies();
        let last_end = self.last_end;
        let pending_label = self.pending_label.take();
        while let Some(body) = self.lexer.next_heredoc_body() {
            let mut parts = self.parse_string_parts(diag)?;
            self.expect(diag, TokenKind::StringEnd, "heredoc terminator")?;
            if body.squiggly {
                dedent(&mut parts);
            }
            if let Some(node) = body.node {
                let kind = self.literal_kind(diag, body.kind, parts, String::new())?;
                self.arena[node].kind = kind;
            }
        }
        self.last_end = last_end;
        self.pending_label = pending_label;
        Ok(())
    }
}

/// Removes the common indentation of a `<<~` body. Lines holding only
/// whitespace do not count towards it.
fn dedent(parts: &mut [Part]) {
    let width = parts
        .iter()
        .filter_map(|part| match part {
            Part::Text {
                bytes,
                line_head: true,
                ..
            } => line_indent(bytes),
            _ => None,
        })
        .min();
    let Some(width) = width else {
        return;
    };
    for part in parts {
        if let Part::Text {
            bytes,
            line_head: true,
            ..
        } = part
        {
            let stripped = strip_indent(bytes, width).to_vec();
            *bytes = stripped;
        }
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
    fn test_plain_literals() {
        assert_eq!(dump(r#""a\tb""#), r#"(scope [] (str "a\tb"))"#);
        assert_eq!(dump("'a' \"b\""), r#"(scope [] (str "ab"))"#);
        assert_eq!(dump("`ls`"), r#"(scope [] (xstr "ls"))"#);
        assert_eq!(dump("/a+/im"), r#"(scope [] (regx "a+" im))"#);
        assert_eq!(dump(r#":"foo""#), "(scope [] (sym foo))");
    }

    #[test]
    fn test_interpolation() {
        assert_eq!(
            dump(r#""a#{1}b""#),
            r#"(scope [] (dstr (str "a") (begin (int 1)) (str "b")))"#
        );
        assert_eq!(
            dump(r##"@x = 1; "#@x!""##),
            r#"(scope [] (stmts (asgn (ivar @x) (int 1)) (dstr (ivar @x) (str "!"))))"#
        );
        assert_eq!(
            dump(r##""a" "#{1}""##),
            r#"(scope [] (dstr (str "a") (begin (int 1))))"#
        );
    }

    #[test]
    fn test_word_lists() {
        assert_eq!(
            dump("%w[a bc]"),
            r#"(scope [] (words (str "a") (str "bc")))"#
        );
        assert_eq!(dump("%i[a b]"), "(scope [] (symbols (sym a) (sym b)))");
    }

    #[test]
    fn test_heredoc() {
        assert_eq!(
            dump("x = <<EOS\n  a\nEOS\nx"),
            r#"(scope [x] (stmts (asgn (lvar x) (str "  a\n")) (lvar x)))"#
        );
        assert_eq!(
            dump("foo(<<~A, <<-B)\n    a\n      b\n    A\n  c\n  B\n"),
            r#"(scope [] (fcall foo (str "a\n  b\n") (str "  c\n")))"#
        );
    }

    #[test]
    fn test_string_label() {
        assert_eq!(
            dump(r#"{"a": 1}"#),
            "(scope [] (hash (pair (sym a) (int 1))))"
        );
    }
}
