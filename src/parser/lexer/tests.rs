use crate::{
    ast::CodeRange,
    diagnostic::{Diagnostic, Diagnostics},
    parser::{scope::ScopeStack, PResult},
    symbol::{Interner, SymbolTable},
};

use super::{Lexer, LexerConfig, LexerState, Token, TokenKind, TokenValue};

mod keywords_tests;
mod numeric_tests;
mod spacing_tests;
mod string_tests;

struct Lexed {
    tokens: Vec<Token>,
    diagnostics: Vec<Diagnostic>,
}

/// Lexes `src` to the end, reading heredoc bodies when they become due.
/// `setup` runs before the first token.
fn try_lex_with(
    src: &str,
    setup: impl FnOnce(&mut Lexer, &mut ScopeStack, &mut SymbolTable),
) -> PResult<Lexed> {
    let mut diag = Diagnostics::capturing(10, 10);
    diag.source_map_mut().add_chunk(0, src.as_bytes(), None, 1);
    let mut symbols = SymbolTable::new();
    let mut scopes = ScopeStack::new();
    let mut lexer = Lexer::new(
        src.as_bytes().to_vec(),
        LexerConfig {
            max_nesting_depth: 64,
            token_buffer_max: 65536,
            more_input: None,
        },
    );
    setup(&mut lexer, &mut scopes, &mut symbols);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.lex(&mut diag, &mut symbols, &scopes)?;
        match token.kind {
            TokenKind::EOF => break,
            TokenKind::HeredocBodies => {
                tokens.push(token);
                lexer.begin_heredoc_bodies();
                while lexer.next_heredoc_body().is_some() {
                    loop {
                        let token = lexer.lex(&mut diag, &mut symbols, &scopes)?;
                        let end = token.kind == TokenKind::StringEnd;
                        tokens.push(token);
                        if end {
                            break;
                        }
                    }
                }
            }
            _ => tokens.push(token),
        }
    }
    Ok(Lexed {
        tokens,
        diagnostics: diag.into_records(),
    })
}

fn lex_with(
    src: &str,
    setup: impl FnOnce(&mut Lexer, &mut ScopeStack, &mut SymbolTable),
) -> Lexed {
    match try_lex_with(src, setup) {
        Ok(lexed) => lexed,
        Err(e) => panic!("failed to lex {:?}: {}", src, e),
    }
}

fn lex(src: &str) -> Lexed {
    lex_with(src, |_, _, _| {})
}

/// Token kinds, asserting a clean run.
fn kinds(src: &str) -> Vec<TokenKind> {
    let lexed = lex(src);
    assert_eq!(lexed.diagnostics, Vec::new(), "diagnostics for {:?}", src);
    lexed.tokens.iter().map(|t| t.kind).collect()
}

/// Token kinds paired with the source text they cover.
fn kinds_and_text(src: &str) -> Vec<(TokenKind, &str)> {
    let lexed = lex(src);
    assert_eq!(lexed.diagnostics, Vec::new(), "diagnostics for {:?}", src);
    lexed
        .tokens
        .iter()
        .map(|t| (t.kind, &src[t.range.range()]))
        .collect()
}

fn messages(diagnostics: &[Diagnostic]) -> Vec<&str> {
    diagnostics.iter().map(|d| d.message.as_str()).collect()
}

fn content(bytes: &[u8]) -> TokenValue {
    TokenValue::Content {
        bytes: bytes.to_vec(),
        line_head: false,
    }
}

#[test]
fn test_lex_empty() {
    assert_eq!(kinds(""), Vec::new());
    assert_eq!(kinds("  \n\n# comment\n"), Vec::new());
}

#[test]
fn test_lex_identifiers() {
    use TokenKind::*;
    assert_eq!(
        kinds_and_text("foo Bar baz? qux!"),
        vec![
            (Identifier, "foo"),
            (Const, "Bar"),
            (MethodName, "baz?"),
            (MethodName, "qux!"),
        ]
    );
}

#[test]
fn test_lex_label_after_command() {
    use TokenKind::*;
    assert_eq!(kinds("foo bar: 1"), vec![Identifier, Label, Integer]);
    // The colon must touch the name.
    assert_eq!(kinds("a ? b : c"), vec![Identifier, Question, Identifier, Colon, Identifier]);
}

#[test]
fn test_lex_label_value_is_interned_name() {
    let mut expected = None;
    let lexed = lex_with("foo bar: 1", |_, _, symbols| {
        expected = Some(symbols.intern(b"bar"));
    });
    assert_eq!(
        lexed.tokens[1].value,
        TokenValue::Symbol(expected.expect("interned"))
    );
}

#[test]
fn test_lex_variables() {
    use TokenKind::*;
    let lexed = lex("@a @@b $c $1 $&");
    assert_eq!(
        lexed.tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
        vec![IvarName, CvarName, GvarName, NthRef, BackRef]
    );
    assert_eq!(lexed.tokens[3].value, TokenValue::NthRef(1));
    assert_eq!(lexed.tokens[4].value, TokenValue::BackRef(b'&'));
}

#[test]
fn test_lex_token_ranges() {
    let lexed = lex("ab  = 12");
    let ranges = lexed.tokens.iter().map(|t| t.range).collect::<Vec<_>>();
    assert_eq!(
        ranges,
        vec![
            CodeRange { start: 0, end: 2 },
            CodeRange { start: 4, end: 5 },
            CodeRange { start: 6, end: 8 },
        ]
    );
    assert_eq!(
        lexed.tokens.iter().map(|t| t.space_before).collect::<Vec<_>>(),
        vec![false, true, true]
    );
}

#[test]
fn test_lex_end_marker() {
    use TokenKind::*;
    assert_eq!(kinds("a\n__END__\nnot code ("), vec![Identifier, Newline]);
}

#[test]
fn test_lex_embedded_document() {
    use TokenKind::*;
    assert_eq!(kinds("=begin\nanything\n=end\n1"), vec![Integer]);
    assert!(try_lex_with("=begin\nanything", |_, _, _| {}).is_err());
}

#[test]
fn test_lex_newline_folding() {
    use TokenKind::*;
    assert_eq!(kinds("a\nb"), vec![Identifier, Newline, Identifier]);
    // After an operator the newline is insignificant.
    assert_eq!(kinds("1 +\n2"), vec![Integer, Plus, Integer]);
    // A leading `.` continues the previous line.
    assert_eq!(kinds("a\n  .b"), vec![Identifier, Dot, Identifier]);
}

mod proptests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn test_relex_is_deterministic(src in "[a-z0-9 +*()\\[\\]\n.,=-]{0,40}") {
            let first = try_lex_with(&src, |_, _, _| {});
            let second = try_lex_with(&src, |_, _, _| {});
            match (first, second) {
                (Ok(a), Ok(b)) => {
                    prop_assert_eq!(a.tokens, b.tokens);
                    prop_assert_eq!(a.diagnostics, b.diagnostics);
                }
                (Err(_), Err(_)) => {}
                _ => prop_assert!(false, "lexing {:?} is not deterministic", src),
            }
        }

        #[test]
        fn test_token_ranges_are_ordered(src in "[a-z0-9 +*()\n.,=-]{0,40}") {
            if let Ok(lexed) = try_lex_with(&src, |_, _, _| {}) {
                let mut last = 0;
                for token in &lexed.tokens {
                    prop_assert!(token.range.start <= token.range.end);
                    prop_assert!(token.range.start >= last);
                    last = token.range.end;
                }
                prop_assert!(last <= src.len());
            }
        }
    }
}
