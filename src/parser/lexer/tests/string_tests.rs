use pretty_assertions::assert_eq;

use crate::parser::ParseError;

use super::*;
use TokenKind::*;

fn lex_error(src: &str) -> ParseError {
    match try_lex_with(src, |_, _, _| {}) {
        Ok(lexed) => panic!("{:?} lexed to {:?}", src, lexed.tokens),
        Err(e) => e,
    }
}

fn nested_interpolation(depth: usize) -> String {
    let mut src = "x".to_owned();
    for _ in 0..depth {
        src = format!("\"#{{{}}}\"", src);
    }
    src
}

#[test]
fn test_plain_strings() {
    let lexed = lex(r#""a\tb" 'c\n'"#);
    assert_eq!(
        lexed.tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
        vec![StringBegin, StringContent, StringEnd, StringBegin, StringContent, StringEnd]
    );
    assert_eq!(lexed.tokens[1].value, content(b"a\tb"));
    assert_eq!(lexed.tokens[4].value, content(b"c\\n"));
}

#[test]
fn test_empty_string() {
    assert_eq!(kinds(r#""""#), vec![StringBegin, StringEnd]);
}

#[test]
fn test_escapes() {
    let lexed = lex(r#""\x41é\u{1F600 21}\101""#);
    assert_eq!(
        lexed.tokens[1].value,
        content("A\u{e9}\u{1F600}!A".as_bytes())
    );
    let lexed = lex(r#"'it\'s \\'"#);
    assert_eq!(lexed.tokens[1].value, content(b"it's \\"));
}

#[test]
fn test_escape_errors() {
    let lexed = lex(r#""\u{110000}""#);
    assert_eq!(messages(&lexed.diagnostics), vec!["invalid Unicode code point"]);
    let lexed = lex(r#""\u12""#);
    assert_eq!(messages(&lexed.diagnostics), vec!["invalid Unicode escape"]);
}

#[test]
fn test_interpolation() {
    assert_eq!(
        kinds_and_text(r#""a#{b}c""#),
        vec![
            (StringBegin, "\""),
            (StringContent, "a"),
            (StringInterpolationBegin, "#{"),
            (Identifier, "b"),
            (StringInterpolationEnd, "}"),
            (StringContent, "c"),
            (StringEnd, "\""),
        ]
    );
    assert_eq!(
        kinds(r##""#@a #$b""##),
        vec![
            StringBegin,
            StringVarInterpolation,
            IvarName,
            StringContent,
            StringVarInterpolation,
            GvarName,
            StringEnd,
        ]
    );
    // Not interpolated in single quotes.
    assert_eq!(kinds("'#{a}'"), vec![StringBegin, StringContent, StringEnd]);
}

#[test]
fn test_interpolation_nesting_limit() {
    assert!(try_lex_with(&nested_interpolation(64), |_, _, _| {}).is_ok());
    assert_eq!(
        lex_error(&nested_interpolation(65)),
        ParseError::NestingTooDeep {
            limit: 64,
            // The 65th `#{`.
            pos: 3 * 64 + 1,
        }
    );
}

#[test]
fn test_string_label() {
    assert_eq!(
        kinds(r#"{"a": 1}"#),
        vec![LBraceHash, StringBegin, StringContent, StringEndColon, Integer, RBrace]
    );
    assert_eq!(
        kinds(r#"x ? "a" : 1"#),
        vec![Identifier, Question, StringBegin, StringContent, StringEnd, Colon, Integer]
    );
}

#[test]
fn test_word_lists() {
    assert_eq!(
        kinds_and_text("%w[ a  b ]"),
        vec![
            (WordsBegin, "%w["),
            (StringContent, "a"),
            (WordSeparator, "  "),
            (StringContent, "b"),
            (WordSeparator, " "),
            (StringEnd, "]"),
        ]
    );
    assert_eq!(
        kinds("%i(a b)"),
        vec![SymbolsBegin, StringContent, WordSeparator, StringContent, StringEnd]
    );
    let lexed = lex(r"%w(a\ b)");
    assert_eq!(lexed.tokens[1].value, content(b"a b"));
}

#[test]
fn test_percent_literals() {
    assert_eq!(kinds("%q(a(b)c)"), vec![StringBegin, StringContent, StringEnd]);
    assert_eq!(kinds("%s(a)"), vec![SymbolBegin, StringContent, StringEnd]);
    assert_eq!(kinds("%x(ls)"), vec![XStringBegin, StringContent, StringEnd]);
    let lexed = lex("%z(a)");
    assert_eq!(messages(&lexed.diagnostics), vec!["unknown type of %string"]);
}

#[test]
fn test_regexp_flags() {
    let lexed = lex(r"/a\d/mi");
    assert_eq!(
        lexed.tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
        vec![RegexpBegin, StringContent, StringEnd]
    );
    assert_eq!(lexed.tokens[1].value, content(br"a\d"));
    assert_eq!(lexed.tokens[2].value, TokenValue::Bytes(b"mi".to_vec()));

    let lexed = lex("/a/iq");
    assert_eq!(messages(&lexed.diagnostics), vec!["unknown regexp option - q"]);
    assert_eq!(lexed.tokens[2].value, TokenValue::Bytes(b"i".to_vec()));
    let lexed = lex("/a/qz");
    assert_eq!(messages(&lexed.diagnostics), vec!["unknown regexp options - qz"]);
}

#[test]
fn test_symbols_and_chars() {
    assert_eq!(kinds(":foo"), vec![Symbol]);
    assert_eq!(kinds(":\"a b\""), vec![SymbolBegin, StringContent, StringEnd]);
    assert_eq!(lex("?a").tokens[0].value, TokenValue::Bytes(b"a".to_vec()));
    assert_eq!(lex("?\\n").tokens[0].value, TokenValue::Bytes(b"\n".to_vec()));
}

#[test]
fn test_unterminated_literals() {
    assert_eq!(
        lex_error("x = \"abc"),
        ParseError::Unterminated {
            message: "unterminated string meets end of file".to_owned(),
            pos: 4,
        }
    );
    assert_eq!(
        lex_error("/abc"),
        ParseError::Unterminated {
            message: "unterminated regexp meets end of file".to_owned(),
            pos: 0,
        }
    );
    assert_eq!(
        lex_error("%w(a"),
        ParseError::Unterminated {
            message: "unterminated quoted string meets end of file".to_owned(),
            pos: 0,
        }
    );
}

#[test]
fn test_heredoc() {
    assert_eq!(
        kinds_and_text("<<EOS\nab\nEOS\n"),
        vec![
            (HeredocBegin, "<<EOS"),
            (Newline, "\n"),
            (HeredocBodies, ""),
            (StringContent, "ab\n"),
            (StringEnd, "EOS\n"),
        ]
    );
    let lexed = lex("<<EOS\nab\nEOS\n");
    assert_eq!(
        lexed.tokens[3].value,
        TokenValue::Content {
            bytes: b"ab\n".to_vec(),
            line_head: true,
        }
    );
}

#[test]
fn test_heredocs_read_in_order() {
    assert_eq!(
        kinds("foo(<<A, <<~B)\na\nA\n  b\n  B\n"),
        vec![
            Identifier,
            LParenCall,
            HeredocBegin,
            Comma,
            HeredocBegin,
            RParen,
            Newline,
            HeredocBodies,
            StringContent,
            StringEnd,
            StringContent,
            StringEnd,
        ]
    );
}

#[test]
fn test_heredoc_interpolation() {
    assert_eq!(
        kinds("<<EOS\nx#{y}\nEOS\n"),
        vec![
            HeredocBegin,
            Newline,
            HeredocBodies,
            StringContent,
            StringInterpolationBegin,
            Identifier,
            StringInterpolationEnd,
            StringContent,
            StringEnd,
        ]
    );
    assert_eq!(
        kinds("<<'EOS'\nx#{y}\nEOS\n"),
        vec![HeredocBegin, Newline, HeredocBodies, StringContent, StringEnd]
    );
}

#[test]
fn test_unterminated_heredoc() {
    assert_eq!(
        lex_error("<<EOS\nab\n"),
        ParseError::Unterminated {
            message: "can't find heredoc delimiter \"EOS\" anywhere before EOF".to_owned(),
            pos: 0,
        }
    );
}
