use num_bigint::BigInt;
use num_traits::Zero;
use ordered_float::NotNan;

use crate::{ast::CodeRange, diagnostic::Diagnostics};

use super::{Lexer, Token, TokenKind, TokenValue};

impl Lexer {
    /// Reads an integer or float literal whose digits start at the current
    /// position. `start` may point at a preceding `+` or `.`, which is then
    /// part of the token.
    pub(super) fn lex_number(
        &mut self,
        diag: &mut Diagnostics,
        start: usize,
        space_before: bool,
    ) -> Token {
        if self.src[start] == b'.' {
            let mut text = b"0.".to_vec();
            self.scan_digits(diag, &mut text, |b| b.is_ascii_digit());
            self.scan_exponent(diag, &mut text);
            return self.float_token(diag, start, &text, space_before);
        }

        if self.peek_byte() == b'0' {
            let radix = match self.peek_byte_at(1) {
                b'x' | b'X' => Some(16),
                b'b' | b'B' => Some(2),
                b'o' | b'O' => Some(8),
                b'd' | b'D' => Some(10),
                b'_' | b'0'..=b'9' => None,
                _ => return self.decimal_literal(diag, start, space_before),
            };
            self.pos += if radix.is_some() { 2 } else { 1 };
            let radix = radix.unwrap_or(8);
            let mut digits = Vec::new();
            // Octal takes all decimal digits so that `08` is reported.
            let scan_radix = if radix == 8 { 10 } else { radix };
            self.scan_digits(diag, &mut digits, |b| (b as char).is_digit(scan_radix));
            let end = self.pos;
            let range = CodeRange { start, end };
            if digits.is_empty() {
                diag.error(range, "numeric literal without digits");
                return Token::new(TokenKind::Integer, start, end, space_before)
                    .with_value(TokenValue::Int(BigInt::zero()));
            }
            let valid = digits.iter().all(|&b| (b as char).is_digit(radix));
            if !valid {
                diag.error(range, "Invalid octal digit");
                return Token::new(TokenKind::Integer, start, end, space_before)
                    .with_value(TokenValue::Int(BigInt::zero()));
            }
            let value = BigInt::parse_bytes(&digits, radix).unwrap_or_else(BigInt::zero);
            return Token::new(TokenKind::Integer, start, end, space_before)
                .with_value(TokenValue::Int(value));
        }

        self.decimal_literal(diag, start, space_before)
    }

    fn decimal_literal(&mut self, diag: &mut Diagnostics, start: usize, space_before: bool) -> Token {
        let mut text = Vec::new();
        self.scan_digits(diag, &mut text, |b| b.is_ascii_digit());
        let mut is_float = false;
        if self.peek_byte() == b'.' && self.peek_byte_at(1).is_ascii_digit() {
            self.pos += 1;
            text.push(b'.');
            self.scan_digits(diag, &mut text, |b| b.is_ascii_digit());
            is_float = true;
        }
        if self.scan_exponent(diag, &mut text) {
            is_float = true;
        }
        if is_float {
            return self.float_token(diag, start, &text, space_before);
        }
        let value = BigInt::parse_bytes(&text, 10).unwrap_or_else(BigInt::zero);
        Token::new(TokenKind::Integer, start, self.pos, space_before)
            .with_value(TokenValue::Int(value))
    }

    /// Reads `e[+-]digits` if present.
    fn scan_exponent(&mut self, diag: &mut Diagnostics, text: &mut Vec<u8>) -> bool {
        if !matches!(self.peek_byte(), b'e' | b'E') {
            return false;
        }
        let sign = matches!(self.peek_byte_at(1), b'+' | b'-');
        let digit_at = if sign { 2 } else { 1 };
        if !self.peek_byte_at(digit_at).is_ascii_digit() {
            return false;
        }
        text.push(b'e');
        if sign {
            text.push(self.peek_byte_at(1));
        }
        self.pos += digit_at;
        self.scan_digits(diag, text, |b| b.is_ascii_digit());
        true
    }

    /// Collects digits accepted by `accept`, dropping `_` separators.
    /// A doubled or trailing `_` is reported.
    fn scan_digits(&mut self, diag: &mut Diagnostics, out: &mut Vec<u8>, accept: impl Fn(u8) -> bool) {
        let mut last_underscore: Option<usize> = None;
        loop {
            let b = self.peek_byte();
            if b == b'_' {
                if last_underscore.is_some() || out.is_empty() && !self.is_digit_run_start() {
                    break;
                }
                last_underscore = Some(self.pos);
                self.pos += 1;
            } else if accept(b) {
                last_underscore = None;
                out.push(b);
                self.pos += 1;
            } else {
                break;
            }
        }
        if let Some(pos) = last_underscore {
            diag.error(
                CodeRange {
                    start: pos,
                    end: pos + 1,
                },
                "trailing '_' in number",
            );
        }
    }

    // `0_7` is octal, so a leading underscore right after the `0` is fine.
    fn is_digit_run_start(&self) -> bool {
        self.pos > 0 && self.src[self.pos - 1] == b'0'
    }

    fn float_token(
        &mut self,
        diag: &mut Diagnostics,
        start: usize,
        text: &[u8],
        space_before: bool,
    ) -> Token {
        let range = CodeRange {
            start,
            end: self.pos,
        };
        let value = std::str::from_utf8(text)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        if value.is_infinite() {
            diag.warning(
                range,
                format!("float {} out of range", String::from_utf8_lossy(text)),
            );
        }
        let value = NotNan::new(value).unwrap_or_else(|_| NotNan::zero());
        Token::new(TokenKind::Float, start, self.pos, space_before)
            .with_value(TokenValue::Float(value))
    }
}
