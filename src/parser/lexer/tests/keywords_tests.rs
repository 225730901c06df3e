use pretty_assertions::assert_eq;

use super::*;
use TokenKind::*;

#[test]
fn test_keywords_in_statement_position() {
    assert_eq!(
        kinds("if a then b end"),
        vec![KeywordIf, Identifier, KeywordThen, Identifier, KeywordEnd]
    );
    assert_eq!(
        kinds("while x\nend"),
        vec![KeywordWhile, Identifier, Newline, KeywordEnd]
    );
}

#[test]
fn test_modifier_keywords() {
    assert_eq!(kinds("a if b"), vec![Identifier, KeywordIfInfix, Identifier]);
    assert_eq!(
        kinds("a unless b"),
        vec![Identifier, KeywordUnlessInfix, Identifier]
    );
    assert_eq!(kinds("a while b"), vec![Identifier, KeywordWhileInfix, Identifier]);
    assert_eq!(kinds("a until b"), vec![Identifier, KeywordUntilInfix, Identifier]);
    assert_eq!(kinds("a rescue nil"), vec![Identifier, KeywordRescueInfix, KeywordNil]);
}

#[test]
fn test_keyword_after_dot_is_method_name() {
    assert_eq!(kinds("x.class"), vec![Identifier, Dot, Identifier]);
    assert_eq!(kinds("x.if"), vec![Identifier, Dot, Identifier]);
}

#[test]
fn test_keyword_as_method_name_after_def() {
    assert_eq!(kinds("def end"), vec![KeywordDef, KeywordEnd]);
    assert_eq!(kinds("def if"), vec![KeywordDef, KeywordIf]);
}

#[test]
fn test_special_keywords() {
    assert_eq!(
        kinds("__FILE__; __LINE__; __ENCODING__"),
        vec![
            KeywordCapitalDoubleUnderscoreFile,
            Semicolon,
            KeywordCapitalDoubleUnderscoreLine,
            Semicolon,
            KeywordCapitalDoubleUnderscoreEncoding,
        ]
    );
    assert_eq!(
        kinds("BEGIN { }"),
        vec![KeywordCapitalBegin, LBrace, RBrace]
    );
}

#[test]
fn test_end_marker_only_at_line_start() {
    assert_eq!(kinds("x __END__"), vec![Identifier, Identifier]);
}

#[test]
fn test_do_variants() {
    assert_eq!(kinds("foo do end"), vec![Identifier, KeywordDo, KeywordEnd]);

    let lexed = lex_with("x do", |lexer, _, _| lexer.cond.push(true));
    assert_eq!(lexed.tokens[1].kind, KeywordDoCond);

    let lexed = lex_with("a b do", |lexer, _, _| lexer.cmdarg.push(true));
    assert_eq!(
        lexed.tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
        vec![Identifier, Identifier, KeywordDoBlock]
    );

    // The command name itself keeps `do` for the command.
    let lexed = lex_with("a do", |lexer, _, _| lexer.cmdarg.push(true));
    assert_eq!(lexed.tokens[1].kind, KeywordDo);
}

#[test]
fn test_keyword_display() {
    assert_eq!(KeywordEnd.to_string(), "'end'");
    assert_eq!(EOF.to_string(), "end of file");
    assert!(KeywordIfInfix.is_keyword());
    assert!(!Identifier.is_keyword());
}
