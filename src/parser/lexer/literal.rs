use crate::{
    ast::CodeRange,
    diagnostic::Diagnostics,
    symbol::{Interner, Symbol},
};

use super::{
    heredoc::HeredocTerm, is_ident_continue, is_ident_start, is_space, Lexer, LexerState,
    PResult, ParseError, Token, TokenKind, TokenValue,
};

/// What a string-like literal turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(in crate::parser) enum StrKind {
    String,
    XString,
    Regexp,
    Symbol,
    Words,
    Symbols,
}

impl StrKind {
    fn is_list(self) -> bool {
        matches!(self, StrKind::Words | StrKind::Symbols)
    }
}

/// The literal currently being scanned.
#[derive(Debug, Clone)]
pub(super) struct StrTerm {
    pub(super) kind: StrKind,
    pub(super) interpolate: bool,
    /// Opening bracket for nesting delimiters, or 0.
    open: u8,
    close: u8,
    nest: usize,
    label_ok: bool,
    /// Opened with `%`; only changes the unterminated message.
    percent: bool,
    /// Position of the opening delimiter.
    pub(super) start: usize,
    /// Inside a word of `%w` and friends.
    word_started: bool,
    pub(super) heredoc: Option<HeredocTerm>,
    /// The next heredoc fragment starts a body line.
    pub(super) line_head: bool,
}

impl StrTerm {
    pub(super) fn new(kind: StrKind, interpolate: bool, open: u8, close: u8, start: usize) -> Self {
        StrTerm {
            kind,
            interpolate,
            open,
            close,
            nest: 0,
            label_ok: false,
            percent: false,
            start,
            word_started: false,
            heredoc: None,
            line_head: false,
        }
    }

    pub(super) fn unterminated_message(&self) -> &'static str {
        if self.kind == StrKind::Regexp {
            "unterminated regexp meets end of file"
        } else if self.percent {
            "unterminated quoted string meets end of file"
        } else {
            "unterminated string meets end of file"
        }
    }
}

/// How backslashes inside literal content are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeMode {
    /// `"..."`: every escape sequence is decoded.
    Full,
    /// Regexps keep escapes for the regexp engine.
    Regexp,
    /// `'...'`: only `\\` and escaped delimiters.
    Quote,
}

impl Lexer {
    pub(super) fn begin_string(
        &mut self,
        kind: StrKind,
        interpolate: bool,
        open: u8,
        close: u8,
        start: usize,
    ) {
        self.strterm = Some(StrTerm::new(kind, interpolate, open, close, start));
    }

    pub(super) fn set_label_ok(&mut self, label_ok: bool) {
        if let Some(term) = &mut self.strterm {
            term.label_ok = label_ok;
        }
    }

    /// Produces the next token inside a string-like literal.
    pub(super) fn lex_string(
        &mut self,
        diag: &mut Diagnostics,
        symbols: &mut dyn Interner,
    ) -> PResult<Token> {
        if self.var_pending {
            self.var_pending = false;
            return Ok(if self.peek_byte() == b'$' {
                self.lex_gvar(diag, symbols, false)
            } else {
                self.lex_ivar(diag, symbols, false)
            });
        }
        let Some(term) = self.strterm.as_ref() else {
            unreachable!("lex_string without an open literal");
        };
        if term.heredoc.is_some() {
            return self.lex_heredoc_body(diag);
        }
        let (kind, interpolate, close) = (term.kind, term.interpolate, term.close);
        let start = self.pos;

        if kind.is_list() && self.string_nest() == 0 {
            let mut skipped = false;
            loop {
                if self.pos >= self.src.len() && !self.fetch_more(diag) {
                    break;
                }
                if !is_space(self.peek_byte()) {
                    break;
                }
                self.pos += 1;
                skipped = true;
            }
            if skipped {
                let word_started = self.strterm.as_ref().is_some_and(|t| t.word_started);
                if word_started {
                    if let Some(term) = &mut self.strterm {
                        term.word_started = false;
                    }
                    return Ok(Token::new(TokenKind::WordSeparator, start, self.pos, false));
                }
            }
        }

        let start = self.pos;
        if self.pos >= self.src.len() && !self.fetch_more(diag) {
            return Err(self.unterminated());
        }
        let c = self.peek_byte();
        if c == close && self.string_nest() == 0 {
            self.pos += 1;
            return Ok(self.finish_string(diag, start));
        }
        if interpolate && c == b'#' {
            match self.peek_byte_at(1) {
                b'{' => {
                    self.pos += 2;
                    self.mark_word_started();
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
                    self.mark_word_started();
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

        let mode = if kind == StrKind::Regexp {
            EscapeMode::Regexp
        } else if interpolate {
            EscapeMode::Full
        } else {
            EscapeMode::Quote
        };
        let mut buf = Vec::new();
        let mut truncated = false;
        loop {
            if self.pos >= self.src.len() && !self.fetch_more(diag) {
                break;
            }
            let c = self.peek_byte();
            let nest = self.string_nest();
            if c == close && nest == 0 {
                break;
            }
            if kind.is_list() && nest == 0 && is_space(c) {
                break;
            }
            if interpolate && c == b'#' {
                let next = self.peek_byte_at(1);
                if next == b'{' || (matches!(next, b'@' | b'$') && self.interpolated_var_follows(1)) {
                    break;
                }
            }
            let before = buf.len();
            if c == b'\\' {
                self.pos += 1;
                self.read_content_escape(diag, mode, kind, &mut buf);
            } else {
                self.adjust_nest(c);
                buf.push(c);
                self.pos += 1;
            }
            if buf.len() > self.token_buffer_max {
                buf.truncate(before.min(self.token_buffer_max));
                truncated = true;
            }
        }
        if buf.is_empty() && self.pos == start {
            return Err(self.unterminated());
        }
        if truncated {
            diag.warning(
                CodeRange {
                    start,
                    end: self.pos,
                },
                "string too long (truncated)",
            );
        }
        self.mark_word_started();
        Ok(
            Token::new(TokenKind::StringContent, start, self.pos, false).with_value(
                TokenValue::Content {
                    bytes: buf,
                    line_head: false,
                },
            ),
        )
    }

    fn string_nest(&self) -> usize {
        self.strterm.as_ref().map_or(0, |t| t.nest)
    }

    fn adjust_nest(&mut self, c: u8) {
        if let Some(term) = &mut self.strterm {
            if term.open != 0 {
                if c == term.open {
                    term.nest += 1;
                } else if c == term.close && term.nest > 0 {
                    term.nest -= 1;
                }
            }
        }
    }

    fn mark_word_started(&mut self) {
        if let Some(term) = &mut self.strterm {
            term.word_started = true;
        }
    }

    pub(super) fn unterminated(&self) -> ParseError {
        match &self.strterm {
            Some(term) => ParseError::Unterminated {
                message: term.unterminated_message().to_owned(),
                pos: term.start,
            },
            None => ParseError::Unterminated {
                message: "unterminated string meets end of file".to_owned(),
                pos: self.pos,
            },
        }
    }

    /// Whether `#` at `offset` from here is followed by `@name`, `@@name`
    /// or a global variable.
    pub(super) fn interpolated_var_follows(&self, offset: usize) -> bool {
        match self.peek_byte_at(offset) {
            b'@' => {
                let next = self.peek_byte_at(offset + 1);
                if next == b'@' {
                    is_ident_start(self.peek_byte_at(offset + 2))
                } else {
                    is_ident_start(next)
                }
            }
            b'$' => {
                let next = self.peek_byte_at(offset + 1);
                is_ident_start(next) || b"~*$?!@/\\;,.=:<>\"&`'+0123456789".contains(&next)
            }
            _ => false,
        }
    }

    /// Consumes the closing delimiter's aftermath and leaves the literal.
    fn finish_string(&mut self, diag: &mut Diagnostics, start: usize) -> Token {
        let Some(term) = self.strterm.take() else {
            unreachable!("finish_string without an open literal");
        };
        if term.kind == StrKind::Regexp {
            let flags_start = self.pos;
            while self.peek_byte().is_ascii_alphabetic() {
                self.pos += 1;
            }
            let mut flags = Vec::new();
            let mut unknown = Vec::new();
            for &c in &self.src[flags_start..self.pos] {
                if b"imxounes".contains(&c) {
                    if !flags.contains(&c) {
                        flags.push(c);
                    }
                } else {
                    unknown.push(c);
                }
            }
            if !unknown.is_empty() {
                diag.error(
                    CodeRange {
                        start: flags_start,
                        end: self.pos,
                    },
                    format!(
                        "unknown regexp option{} - {}",
                        if unknown.len() > 1 { "s" } else { "" },
                        String::from_utf8_lossy(&unknown)
                    ),
                );
            }
            self.state = LexerState::End;
            return Token::new(TokenKind::StringEnd, start, self.pos, false)
                .with_value(TokenValue::Bytes(flags));
        }
        if term.label_ok && self.peek_byte() == b':' && self.peek_byte_at(1) != b':' {
            self.pos += 1;
            self.state = LexerState::Begin;
            return Token::new(TokenKind::StringEndColon, start, self.pos, false);
        }
        self.state = LexerState::End;
        Token::new(TokenKind::StringEnd, start, self.pos, false)
    }

    /// Handles a backslash (already consumed) in literal content.
    fn read_content_escape(
        &mut self,
        diag: &mut Diagnostics,
        mode: EscapeMode,
        kind: StrKind,
        buf: &mut Vec<u8>,
    ) {
        let (open, close) = self
            .strterm
            .as_ref()
            .map_or((0, 0), |t| (t.open, t.close));
        let c = self.peek_byte();
        match mode {
            EscapeMode::Full => {
                if kind.is_list() && is_space(c) {
                    buf.push(c);
                    self.pos += 1;
                } else if c == close || (open != 0 && c == open) {
                    buf.push(c);
                    self.pos += 1;
                } else {
                    self.read_escape(diag, buf);
                }
            }
            EscapeMode::Regexp => {
                if c == close && close == b'/' {
                    buf.push(c);
                    self.pos += 1;
                } else if c == b'\n' {
                    self.pos += 1;
                } else {
                    buf.push(b'\\');
                    if self.pos < self.src.len() {
                        buf.push(c);
                        self.pos += 1;
                    }
                }
            }
            EscapeMode::Quote => {
                if c == b'\\' || c == close || (open != 0 && c == open) {
                    buf.push(c);
                    self.pos += 1;
                } else if kind.is_list() && is_space(c) {
                    buf.push(c);
                    self.pos += 1;
                } else {
                    buf.push(b'\\');
                }
            }
        }
    }

    /// Decodes one escape sequence after `\` and appends the bytes.
    pub(super) fn read_escape(&mut self, diag: &mut Diagnostics, buf: &mut Vec<u8>) {
        let start = self.pos.saturating_sub(1);
        let c = self.peek_byte();
        if self.pos >= self.src.len() {
            diag.error(
                CodeRange {
                    start,
                    end: self.pos,
                },
                "Invalid escape character syntax",
            );
            return;
        }
        self.pos += 1;
        match c {
            b'n' => buf.push(b'\n'),
            b't' => buf.push(b'\t'),
            b'r' => buf.push(b'\r'),
            b'f' => buf.push(b'\x0C'),
            b'v' => buf.push(b'\x0B'),
            b'a' => buf.push(b'\x07'),
            b'e' => buf.push(b'\x1B'),
            b's' => buf.push(b' '),
            b'b' => buf.push(b'\x08'),
            b'\n' => {}
            b'0'..=b'7' => {
                let mut value = u32::from(c - b'0');
                for _ in 0..2 {
                    match self.peek_byte() {
                        d @ b'0'..=b'7' => {
                            value = value * 8 + u32::from(d - b'0');
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                buf.push(value as u8);
            }
            b'x' => {
                let mut value = 0u32;
                let mut digits = 0;
                while digits < 2 {
                    match (self.peek_byte() as char).to_digit(16) {
                        Some(d) => {
                            value = value * 16 + d;
                            self.pos += 1;
                            digits += 1;
                        }
                        None => break,
                    }
                }
                if digits == 0 {
                    diag.error(
                        CodeRange {
                            start,
                            end: self.pos,
                        },
                        "invalid hex escape",
                    );
                    return;
                }
                buf.push(value as u8);
            }
            b'u' => self.read_unicode_escape(diag, start, buf),
            b'M' => {
                if self.peek_byte() != b'-' {
                    self.invalid_escape(diag, start);
                    return;
                }
                self.pos += 1;
                if let Some(b) = self.read_meta_or_control_operand(diag) {
                    buf.push(b | 0x80);
                }
            }
            b'C' | b'c' => {
                if c == b'C' {
                    if self.peek_byte() != b'-' {
                        self.invalid_escape(diag, start);
                        return;
                    }
                    self.pos += 1;
                }
                if self.peek_byte() == b'?' {
                    self.pos += 1;
                    buf.push(0x7F);
                } else if let Some(b) = self.read_meta_or_control_operand(diag) {
                    buf.push(b & 0x9F);
                }
            }
            _ => buf.push(c),
        }
    }

    fn read_meta_or_control_operand(&mut self, diag: &mut Diagnostics) -> Option<u8> {
        if self.pos >= self.src.len() {
            self.invalid_escape(diag, self.pos);
            return None;
        }
        let c = self.peek_byte();
        self.pos += 1;
        if c == b'\\' {
            let mut inner = Vec::new();
            self.read_escape(diag, &mut inner);
            inner.last().copied()
        } else {
            Some(c)
        }
    }

    fn invalid_escape(&self, diag: &mut Diagnostics, start: usize) {
        diag.error(
            CodeRange {
                start,
                end: self.pos,
            },
            "Invalid escape character syntax",
        );
    }

    fn read_unicode_escape(&mut self, diag: &mut Diagnostics, start: usize, buf: &mut Vec<u8>) {
        if self.peek_byte() == b'{' {
            self.pos += 1;
            loop {
                while matches!(self.peek_byte(), b' ' | b'\t') {
                    self.pos += 1;
                }
                if self.peek_byte() == b'}' {
                    self.pos += 1;
                    return;
                }
                let Some(cp) = self.read_hex(6) else {
                    diag.error(
                        CodeRange {
                            start,
                            end: self.pos,
                        },
                        "invalid Unicode escape",
                    );
                    return;
                };
                self.push_code_point(diag, start, cp, buf);
                if !matches!(self.peek_byte(), b' ' | b'\t' | b'}') {
                    diag.error(
                        CodeRange {
                            start,
                            end: self.pos,
                        },
                        "invalid Unicode escape",
                    );
                    return;
                }
            }
        }
        let digits_start = self.pos;
        match self.read_hex(4) {
            Some(cp) if self.pos - digits_start == 4 => self.push_code_point(diag, start, cp, buf),
            _ => diag.error(
                CodeRange {
                    start,
                    end: self.pos,
                },
                "invalid Unicode escape",
            ),
        }
    }

    fn read_hex(&mut self, max_digits: usize) -> Option<u32> {
        let mut value = 0u32;
        let mut digits = 0;
        while digits < max_digits {
            match (self.peek_byte() as char).to_digit(16) {
                Some(d) => {
                    value = value * 16 + d;
                    self.pos += 1;
                    digits += 1;
                }
                None => break,
            }
        }
        (digits > 0).then_some(value)
    }

    fn push_code_point(&self, diag: &mut Diagnostics, start: usize, cp: u32, buf: &mut Vec<u8>) {
        match char::from_u32(cp) {
            Some(ch) => {
                let mut tmp = [0; 4];
                buf.extend_from_slice(ch.encode_utf8(&mut tmp).as_bytes());
            }
            None => diag.error(
                CodeRange {
                    start,
                    end: self.pos,
                },
                "invalid Unicode code point",
            ),
        }
    }

    /// `%` literals. The position is just after `%`.
    pub(super) fn lex_percent(
        &mut self,
        diag: &mut Diagnostics,
        start: usize,
        space_before: bool,
    ) -> PResult<Token> {
        let mut ty = b'Q';
        if self.peek_byte().is_ascii_alphanumeric() {
            ty = self.peek_byte();
            self.pos += 1;
        }
        if self.pos >= self.src.len() && !self.fetch_more(diag) {
            return Err(ParseError::Unterminated {
                message: "unterminated quoted string meets end of file".to_owned(),
                pos: start,
            });
        }
        let delim = self.peek_byte();
        self.pos += 1;
        if delim.is_ascii_alphanumeric() {
            diag.error(
                CodeRange {
                    start,
                    end: self.pos,
                },
                "unknown type of %string",
            );
        }
        let (open, close) = match delim {
            b'(' => (b'(', b')'),
            b'[' => (b'[', b']'),
            b'{' => (b'{', b'}'),
            b'<' => (b'<', b'>'),
            _ => (0, delim),
        };
        let (kind, interpolate, token) = match ty {
            b'Q' => (StrKind::String, true, TokenKind::StringBegin),
            b'q' => (StrKind::String, false, TokenKind::StringBegin),
            b'W' => (StrKind::Words, true, TokenKind::WordsBegin),
            b'w' => (StrKind::Words, false, TokenKind::WordsBegin),
            b'I' => (StrKind::Symbols, true, TokenKind::SymbolsBegin),
            b'i' => (StrKind::Symbols, false, TokenKind::SymbolsBegin),
            b'x' => (StrKind::XString, true, TokenKind::XStringBegin),
            b'r' => (StrKind::Regexp, true, TokenKind::RegexpBegin),
            b's' => (StrKind::Symbol, false, TokenKind::SymbolBegin),
            _ => {
                diag.error(
                    CodeRange {
                        start,
                        end: self.pos,
                    },
                    "unknown type of %string",
                );
                (StrKind::String, true, TokenKind::StringBegin)
            }
        };
        let mut term = StrTerm::new(kind, interpolate, open, close, start);
        term.percent = true;
        self.strterm = Some(term);
        Ok(Token::new(token, start, self.pos, space_before))
    }

    /// `?a` character literals. The position is just after `?`. Returns
    /// `None` when the `?` is the conditional operator.
    pub(super) fn lex_char(
        &mut self,
        diag: &mut Diagnostics,
        prev: LexerState,
        start: usize,
        space_before: bool,
    ) -> PResult<Option<Token>> {
        if prev.force_single_question_mark() || self.pos >= self.src.len() {
            return Ok(None);
        }
        let c = self.peek_byte();
        if is_space(c) {
            return Ok(None);
        }
        if is_ident_continue(c) && is_ident_continue(self.peek_byte_at(1)) {
            return Ok(None);
        }
        let mut buf = Vec::new();
        if c == b'\\' {
            self.pos += 1;
            self.read_escape(diag, &mut buf);
        } else {
            let len = utf8_len(c).min(self.src.len() - self.pos);
            buf.extend_from_slice(&self.src[self.pos..self.pos + len]);
            self.pos += len;
        }
        self.state = LexerState::End;
        Ok(Some(
            Token::new(TokenKind::Char, start, self.pos, space_before)
                .with_value(TokenValue::Bytes(buf)),
        ))
    }

    /// Reads the name of a `:name` symbol. The position is just after `:`.
    pub(super) fn lex_symbol_name(
        &mut self,
        diag: &mut Diagnostics,
        symbols: &mut dyn Interner,
    ) -> Option<Symbol> {
        let start = self.pos;
        let c = self.peek_byte();
        let ok = match c {
            b'@' => {
                self.pos += 1;
                if self.peek_byte() == b'@' {
                    self.pos += 1;
                }
                self.scan_ident_tail()
            }
            b'$' => {
                self.pos += 1;
                let next = self.peek_byte();
                if is_ident_start(next) || next.is_ascii_digit() {
                    self.scan_ident_tail()
                } else if next == b'-' {
                    self.pos += 1;
                    if is_ident_continue(self.peek_byte()) {
                        self.pos += 1;
                    }
                    true
                } else if b"~*$?!@/\\;,.=:<>\"&`'+".contains(&next) {
                    self.pos += 1;
                    true
                } else {
                    false
                }
            }
            c if is_ident_start(c) => {
                self.scan_ident_tail();
                match self.peek_byte() {
                    b'!' | b'?' if self.peek_byte_at(1) != b'=' => self.pos += 1,
                    b'=' if self.assigner_suffix_follows() => self.pos += 1,
                    _ => {}
                }
                true
            }
            _ => self.scan_operator_name(),
        };
        if !ok || self.pos == start {
            self.pos = start;
            return None;
        }
        Some(self.intern_name(diag, symbols, start, self.pos, "symbol"))
    }

    fn scan_ident_tail(&mut self) -> bool {
        if !is_ident_start(self.peek_byte()) && !self.peek_byte().is_ascii_digit() {
            return false;
        }
        self.skip_ident_chars();
        true
    }

    fn scan_operator_name(&mut self) -> bool {
        const OPERATORS: &[&[u8]] = &[
            b"[]=", b"[]", b"<=>", b"===", b"==", b"=~", b"!=", b"!~", b"!", b"**", b"*",
            b">=", b">>", b">", b"<=", b"<<", b"<", b"+@", b"-@", b"+", b"-", b"/", b"%",
            b"&", b"|", b"^", b"~@", b"~", b"`",
        ];
        let rest = &self.src[self.pos..];
        match OPERATORS.iter().find(|op| rest.starts_with(op)) {
            Some(op) => {
                self.pos += op.len();
                true
            }
            None => false,
        }
    }
}

pub(super) fn utf8_len(lead: u8) -> usize {
    match lead {
        0xF0..=0xF7 => 4,
        0xE0..=0xEF => 3,
        0xC0..=0xDF => 2,
        _ => 1,
    }
}
