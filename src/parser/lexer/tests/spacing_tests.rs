use pretty_assertions::assert_eq;

use super::*;
use TokenKind::*;

fn with_local(src: &str, name: &str) -> Lexed {
    lex_with(src, |_, scopes, symbols| {
        scopes.declare(symbols.intern(name.as_bytes()));
    })
}

fn token_kinds(lexed: &Lexed) -> Vec<TokenKind> {
    lexed.tokens.iter().map(|t| t.kind).collect()
}

#[test]
fn test_minus_after_command_is_argument_sign() {
    let lexed = lex("foo -1");
    assert_eq!(token_kinds(&lexed), vec![Identifier, MinusNum, Integer]);
    assert_eq!(
        messages(&lexed.diagnostics),
        vec!["ambiguous first argument; put parentheses or even spaces"]
    );
    assert_eq!(lexed.diagnostics[0].range, CodeRange { start: 4, end: 5 });
}

#[test]
fn test_minus_after_local_variable_is_binary() {
    let lexed = with_local("a -1", "a");
    assert_eq!(token_kinds(&lexed), vec![Identifier, Minus, Integer]);
    assert_eq!(lexed.diagnostics, Vec::new());
}

#[test]
fn test_spaced_minus_is_binary() {
    assert_eq!(kinds("foo - 1"), vec![Identifier, Minus, Integer]);
    assert_eq!(kinds("foo-1"), vec![Identifier, Minus, Integer]);
    assert_eq!(kinds("-x"), vec![MinusPrefix, Identifier]);
}

#[test]
fn test_minus_variants() {
    assert_eq!(kinds("x -= 1"), vec![Identifier, OpAssign, Integer]);
    assert_eq!(kinds("-> { }"), vec![Arrow, LBrace, RBrace]);
    assert_eq!(kinds("def -@; end"), vec![KeywordDef, MethodName, Semicolon, KeywordEnd]);
}

#[test]
fn test_star_spacing() {
    let lexed = lex("foo *a");
    assert_eq!(token_kinds(&lexed), vec![Identifier, StarPrefix, Identifier]);
    assert_eq!(
        messages(&lexed.diagnostics),
        vec!["'*' interpreted as argument prefix"]
    );
    assert_eq!(kinds("foo * a"), vec![Identifier, Star, Identifier]);
    assert_eq!(kinds("foo*a"), vec![Identifier, Star, Identifier]);
    assert_eq!(kinds("[*a]"), vec![LBracketPrefix, StarPrefix, Identifier, RBracket]);
}

#[test]
fn test_bracket_spacing() {
    assert_eq!(
        kinds("foo [1]"),
        vec![Identifier, LBracketPrefix, Integer, RBracket]
    );
    assert_eq!(kinds("foo[1]"), vec![Identifier, LBracket, Integer, RBracket]);
    let lexed = with_local("a [1]", "a");
    assert_eq!(
        token_kinds(&lexed),
        vec![Identifier, LBracket, Integer, RBracket]
    );
}

#[test]
fn test_element_method_names() {
    assert_eq!(
        kinds("def []; end"),
        vec![KeywordDef, Aref, Semicolon, KeywordEnd]
    );
    assert_eq!(
        kinds("def []=; end"),
        vec![KeywordDef, Aset, Semicolon, KeywordEnd]
    );
}

#[test]
fn test_paren_spacing() {
    assert_eq!(kinds("(1)"), vec![LParen, Integer, RParen]);
    assert_eq!(kinds("foo(1)"), vec![Identifier, LParenCall, Integer, RParen]);
    assert_eq!(kinds("foo (1)"), vec![Identifier, LParenArg, Integer, RParen]);
}

#[test]
fn test_brace_kinds() {
    let lexed = lex_with("{}", |lexer, _, _| lexer.state = LexerState::EndArg);
    assert_eq!(token_kinds(&lexed), vec![LBraceArg, RBrace]);
    assert_eq!(kinds("{}"), vec![LBraceHash, RBrace]);
    assert_eq!(kinds("foo {}"), vec![Identifier, LBrace, RBrace]);
    assert_eq!(
        kinds("foo(1) {}"),
        vec![Identifier, LParenCall, Integer, RParen, LBrace, RBrace]
    );
}

#[test]
fn test_colon_colon_spacing() {
    assert_eq!(kinds("Foo::Bar"), vec![Const, ColonColon, Const]);
    assert_eq!(kinds("::Bar"), vec![ColonColonPrefix, Const]);
    assert_eq!(kinds("foo ::Bar"), vec![Identifier, ColonColonPrefix, Const]);
}
