use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use crate::ast::pos_in;
use crate::diagnostic::Severity;
use crate::symbol::{Interner, SymbolTable};

use super::lexer::{Lexer, LexerConfig};
use super::{parse, InputChunk, ParseError, ParseOptions, ParseResult, Parser};

fn parse_captured(src: &str, symbols: &mut SymbolTable) -> ParseResult {
    parse(
        src.as_bytes(),
        ParseOptions::new().with_capture(10, 10),
        symbols,
    )
}

fn dump(src: &str) -> String {
    let mut symbols = SymbolTable::new();
    let result = parse_captured(src, &mut symbols);
    assert_eq!(result.diagnostics, vec![], "{}", src);
    result.dump(&symbols).unwrap_or_default()
}

fn messages(src: &str) -> Vec<String> {
    let mut symbols = SymbolTable::new();
    parse_captured(src, &mut symbols)
        .diagnostics
        .into_iter()
        .map(|d| d.message)
        .collect()
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("lock")).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_empty_program() {
    assert_eq!(dump(""), "(scope [])");
    assert_eq!(dump("\n;;\n"), "(scope [])");
}

#[test]
fn test_local_variable_changes_minus() {
    assert_eq!(
        dump("a = 1; a -1"),
        "(scope [a] (stmts (asgn (lvar a) (int 1)) (call (lvar a) - (int 1))))"
    );

    let mut symbols = SymbolTable::new();
    let result = parse_captured("foo -1", &mut symbols);
    assert_eq!(
        result.dump(&symbols).unwrap_or_default(),
        "(scope [] (fcall foo (int -1)))"
    );
    assert_eq!(result.warning_count, 1);
    assert_eq!(result.diagnostics[0].severity, Severity::Warning);
    assert_eq!(
        result.diagnostics[0].message,
        "ambiguous first argument; put parentheses or even spaces"
    );
}

#[test]
fn test_predeclared_locals() {
    let mut symbols = SymbolTable::new();
    let a = symbols.intern(b"a");
    let result = parse(
        b"a -1",
        ParseOptions::new().with_capture(10, 10).with_locals([a]),
        &mut symbols,
    );
    assert_eq!(
        result.dump(&symbols).unwrap_or_default(),
        "(scope [a] (call (lvar a) - (int 1)))"
    );
    assert_eq!(result.locals, vec![a]);
}

#[test]
fn test_operator_precedence() {
    assert_eq!(
        dump("1 + 2 * 3"),
        "(scope [] (call (int 1) + (call (int 2) * (int 3))))"
    );
    assert_eq!(
        dump("-2 ** 2"),
        "(scope [] (call (call (int 2) ** (int 2)) -@))"
    );
    assert_eq!(
        dump("not a and b"),
        "(scope [] (and (not (fcall a)) (fcall b)))"
    );
}

#[test]
fn test_multiple_assignment() {
    assert_eq!(
        dump("a, b = 1, 2"),
        "(scope [a b] (masgn (mlhs (lvar a) (lvar b)) (array (int 1) (int 2))))"
    );
    assert_eq!(
        dump("(a, b) = 1, 2"),
        "(scope [a b] (masgn (mlhs (lvar a) (lvar b)) (array (int 1) (int 2))))"
    );
    assert_eq!(
        dump("a = 1, 2"),
        "(scope [a] (asgn (lvar a) (array (int 1) (int 2))))"
    );
}

#[test]
fn test_operator_assignment() {
    assert_eq!(dump("a += 1"), "(scope [a] (op-asgn (lvar a) + (int 1)))");
    assert_eq!(
        dump("a.b ||= 1"),
        "(scope [] (op-asgn (call (fcall a) b) || (int 1)))"
    );
}

#[test]
fn test_safe_navigation() {
    assert_eq!(dump("a&.b"), "(scope [] (csend (fcall a) b))");
}

#[test]
fn test_conditions_are_rewritten() {
    assert_eq!(
        dump("if a..b then 1 end"),
        "(scope [] (if (flip2 (fcall a) (fcall b)) (int 1) _))"
    );
    assert_eq!(
        dump("if /x/ then 1 end"),
        r#"(scope [] (if (match (regx "x")) (int 1) _))"#
    );
    // Only conditions are rewritten.
    assert_eq!(dump("a..b"), "(scope [] (dot2 (fcall a) (fcall b)))");
}

#[test]
fn test_block_binding() {
    // `do` goes to the command, `{}` to the nearest call.
    assert_eq!(
        dump("foo bar do end"),
        "(scope [] (fcall foo (fcall bar) (iter _ (scope []))))"
    );
    assert_eq!(
        dump("foo bar { }"),
        "(scope [] (fcall foo (fcall bar (iter _ (scope [])))))"
    );
    assert_eq!(
        dump("foo (1) { }"),
        "(scope [] (fcall foo (begin (int 1)) (iter _ (scope []))))"
    );
}

#[test]
fn test_block_sees_outer_locals() {
    assert_eq!(
        dump("x = 1\nfoo { y = x }"),
        "(scope [x] (stmts (asgn (lvar x) (int 1)) (fcall foo (iter _ (scope [y] (asgn (lvar y) (lvar x)))))))"
    );
}

#[test]
fn test_method_body_hides_outer_locals() {
    assert_eq!(
        dump("x = 1\ndef f\nx\nend"),
        "(scope [x] (stmts (asgn (lvar x) (int 1)) (def f _ (scope [] (fcall x)))))"
    );
}

#[test]
fn test_dynamic_constant_assignment() {
    assert_eq!(
        messages("def f\nA = 1\nend"),
        vec!["dynamic constant assignment".to_owned()]
    );
    assert_eq!(messages("A = 1"), Vec::<String>::new());
}

#[test]
fn test_semantic_errors() {
    assert_eq!(
        messages("$1 = 2"),
        vec!["Can't set variable $1".to_owned()]
    );
    assert_eq!(
        messages("self = 2"),
        vec!["Can't change the value of self".to_owned()]
    );
    assert_eq!(
        messages("foo(&b) { }"),
        vec!["both block arg and actual block given".to_owned()]
    );
    assert_eq!(
        messages("x = return"),
        vec!["void value expression".to_owned()]
    );
}

#[test]
fn test_layout_does_not_change_tree() {
    assert_eq!(
        dump("if true then 1 else 2 end"),
        dump("if true\n  1\nelse\n  2\nend\n")
    );
    assert_eq!(
        dump("if true then 1 else 2 end"),
        "(scope [] (if (true) (int 1) (int 2)))"
    );
}

#[test]
fn test_recoverable_error_keeps_tree() {
    let mut symbols = SymbolTable::new();
    let result = parse_captured("def f\nclass A; end\nend\n", &mut symbols);
    assert!(result.tree.is_some());
    assert!(result.fatal.is_none());
    assert_eq!(result.error_count, 1);
    assert!(!result.is_ok());
}

#[test]
fn test_unterminated_string_is_fatal() {
    let mut symbols = SymbolTable::new();
    let result = parse_captured("x = 1\ny = \"abc", &mut symbols);
    assert_eq!(result.tree, None);
    assert_eq!(
        result.fatal,
        Some(ParseError::Unterminated {
            message: "unterminated string meets end of file".to_owned(),
            pos: 10,
        })
    );
    assert_eq!(result.error_count, 1);
    let diag = &result.diagnostics[0];
    assert_eq!((diag.line, diag.column), (2, 5));
    assert_eq!(diag.message, "unterminated string meets end of file");
}

#[test]
fn test_diagnostic_positions() {
    let mut symbols = SymbolTable::new();
    let result = parse(
        b"\n\nfoo -1",
        ParseOptions::new()
            .with_filename("a.rb")
            .with_line(10)
            .with_capture(10, 10),
        &mut symbols,
    );
    let diag = &result.diagnostics[0];
    assert_eq!((diag.line, diag.column), (12, 5));
    assert_eq!(result.files, vec!["a.rb".to_owned()]);
    assert_eq!(result.files[diag.file as usize], "a.rb");
}

#[test]
fn test_capture_limits() {
    let mut symbols = SymbolTable::new();
    let result = parse(
        b"foo -1\nfoo -2\nfoo -3\n",
        ParseOptions::new().with_capture(10, 2),
        &mut symbols,
    );
    assert_eq!(result.warning_count, 3);
    assert_eq!(result.diagnostics.len(), 2);
    assert!(result.is_ok());
}

#[test]
fn test_streaming_diagnostics() {
    let buf = SharedBuf::default();
    let mut symbols = SymbolTable::new();
    let result = parse(
        b"foo -1",
        ParseOptions::new()
            .with_filename("t.rb")
            .with_diagnostic_writer(Box::new(buf.clone())),
        &mut symbols,
    );
    assert_eq!(result.diagnostics, vec![]);
    assert_eq!(result.warning_count, 1);
    assert_eq!(
        buf.contents(),
        "t.rb:1:5: warning: ambiguous first argument; put parentheses or even spaces\n"
    );
}

#[test]
fn test_more_input_completes_open_construct() {
    let mut chunks = vec![
        InputChunk {
            bytes: b"  1\n".to_vec(),
            filename: None,
        },
        InputChunk {
            bytes: b"end\n".to_vec(),
            filename: None,
        },
    ]
    .into_iter();
    let mut symbols = SymbolTable::new();
    let result = parse(
        b"def f\n",
        ParseOptions::new()
            .with_capture(10, 10)
            .with_more_input(Box::new(move || chunks.next())),
        &mut symbols,
    );
    assert_eq!(result.diagnostics, vec![]);
    assert_eq!(
        result.dump(&symbols).unwrap_or_default(),
        "(scope [] (def f _ (scope [] (int 1))))"
    );
}

#[test]
fn test_more_input_tracks_files() {
    let mut chunks = vec![InputChunk {
        bytes: b"x -1\nend\n".to_vec(),
        filename: Some("b.rb".to_owned()),
    }]
    .into_iter();
    let mut symbols = SymbolTable::new();
    let result = parse(
        b"def f\n",
        ParseOptions::new()
            .with_filename("a.rb")
            .with_capture(10, 10)
            .with_more_input(Box::new(move || chunks.next())),
        &mut symbols,
    );
    assert_eq!(result.files, vec!["a.rb".to_owned(), "b.rb".to_owned()]);
    let diag = &result.diagnostics[0];
    assert_eq!(result.files[diag.file as usize], "b.rb");
    assert_eq!(diag.line, 1);
}

#[test]
fn test_more_input_exhausted() {
    let mut symbols = SymbolTable::new();
    let result = parse(
        b"x = \"abc",
        ParseOptions::new()
            .with_capture(10, 10)
            .with_more_input(Box::new(|| None)),
        &mut symbols,
    );
    assert!(matches!(result.fatal, Some(ParseError::Unterminated { .. })));
}

fn nesting_fatal(src: &str) -> Option<ParseError> {
    let mut symbols = SymbolTable::new();
    let result = parse_captured(src, &mut symbols);
    if result.fatal.is_some() {
        assert_eq!(result.tree, None);
        assert_eq!(result.error_count, 1);
    }
    result.fatal
}

#[test]
fn test_nested_interpolation() {
    let mut src = "x".to_owned();
    for _ in 0..24 {
        src = format!("\"#{{{}}}\"", src);
    }
    let mut symbols = SymbolTable::new();
    assert!(parse_captured(&src, &mut symbols).is_ok());
}

#[test]
fn test_nested_blocks_within_limit() {
    let src = format!("{}x{}", "foo { ".repeat(8), " }".repeat(8));
    assert_eq!(nesting_fatal(&src), None);
    let src = format!("{}x{}", "foo do\n".repeat(8), "\nend".repeat(8));
    assert_eq!(nesting_fatal(&src), None);
}

#[test]
fn test_nesting_limit_is_fatal() {
    let parens = format!("{}1{}", "(".repeat(100), ")".repeat(100));
    let interpolation = format!("{}x{}", "\"#{".repeat(100), "}\"".repeat(100));
    let brace_blocks = format!("{}x{}", "foo { ".repeat(2000), " }".repeat(2000));
    let do_blocks = format!("{}x{}", "foo 1 do\n".repeat(2000), "\nend".repeat(2000));
    let commands = format!("{}1", "foo ".repeat(2000));
    let exe_bodies = format!("{}x{}", "END { ".repeat(2000), " }".repeat(2000));
    for src in [
        &parens,
        &interpolation,
        &brace_blocks,
        &do_blocks,
        &commands,
        &exe_bodies,
    ] {
        assert!(
            matches!(
                nesting_fatal(src),
                Some(ParseError::NestingTooDeep { limit: 32, .. })
            ),
            "{}",
            &src[..20]
        );
    }
}

#[test]
fn test_nesting_limit_is_configurable() {
    let src = format!("{}1{}", "[".repeat(10), "]".repeat(10));
    let mut symbols = SymbolTable::new();
    let result = parse(
        src.as_bytes(),
        ParseOptions::new().with_capture(10, 10).with_max_nesting_depth(4),
        &mut symbols,
    );
    assert_eq!(
        result.fatal,
        Some(ParseError::NestingTooDeep { limit: 4, pos: 4 })
    );
}

#[test]
fn test_nesting_depth_restored_after_error() {
    let mut symbols = SymbolTable::new();
    let lexer = Lexer::new(
        Vec::new(),
        LexerConfig {
            max_nesting_depth: 2,
            token_buffer_max: 16,
            more_input: None,
        },
    );
    let mut parser = Parser::new(lexer, &mut symbols, 16, 2);
    let result = parser.nested(0, |p| p.nested(1, |p| p.nested(2, |_| Ok(()))));
    assert_eq!(
        result,
        Err(ParseError::NestingTooDeep { limit: 2, pos: 2 })
    );
    assert_eq!(parser.depth, 0);
    assert_eq!(parser.nested(0, |p| Ok(p.depth)), Ok(1));
}

#[test]
fn test_positional_argument_after_keywords() {
    let src = "p(a: 1, 2)";
    let mut symbols = SymbolTable::new();
    let result = parse_captured(src, &mut symbols);
    assert!(result.tree.is_some());
    assert_eq!(result.error_count, 1);
    assert_eq!(
        result.diagnostics[0].message,
        "positional argument after keyword arguments"
    );
    assert_eq!(result.diagnostics[0].range, pos_in(src, "2", 0));

    assert_eq!(
        messages("p(a: 1, *b)"),
        vec!["positional argument after keyword arguments".to_owned()]
    );
    assert_eq!(
        messages("p k => 1, 2"),
        vec!["positional argument after keyword arguments".to_owned()]
    );
    assert_eq!(
        dump("p(1, *b, a: 2, **c)"),
        "(scope [] (fcall p (int 1) (splat (fcall b)) (hash (pair (sym a) (int 2)) (dsplat (fcall c)))))"
    );
}

#[test]
fn test_token_buffer_max_caps_names() {
    let capped = |src: &str| {
        let mut symbols = SymbolTable::new();
        let result = parse(
            src.as_bytes(),
            ParseOptions::new().with_capture(10, 10).with_token_buffer_max(10),
            &mut symbols,
        );
        let messages = result
            .diagnostics
            .iter()
            .map(|d| (d.severity, d.message.clone()))
            .collect::<Vec<_>>();
        (result.dump(&symbols).unwrap_or_default(), messages)
    };
    let long = "a".repeat(100);

    assert_eq!(
        capped(&format!("\"{long}\"")),
        (
            "(scope [] (str \"aaaaaaaaaa\"))".to_owned(),
            vec![(Severity::Warning, "string too long (truncated)".to_owned())]
        )
    );
    assert_eq!(
        capped(&format!(":{long}")),
        (
            "(scope [] (sym aaaaaaaaaa))".to_owned(),
            vec![(Severity::Warning, "symbol too long (truncated)".to_owned())]
        )
    );
    assert_eq!(
        capped(&format!("{long} = 1")),
        (
            "(scope [aaaaaaaaaa] (asgn (lvar aaaaaaaaaa) (int 1)))".to_owned(),
            vec![(Severity::Warning, "identifier too long (truncated)".to_owned())]
        )
    );
    assert_eq!(
        capped(&format!("@{long}")).1,
        vec![(Severity::Warning, "identifier too long (truncated)".to_owned())]
    );
    assert_eq!(capped(":short").1, vec![]);
}

#[test]
fn test_invalid_multibyte_identifier() {
    let invalid = |src: &[u8]| {
        let mut symbols = SymbolTable::new();
        let result = parse(src, ParseOptions::new().with_capture(10, 10), &mut symbols);
        let messages = result
            .diagnostics
            .iter()
            .map(|d| (d.range, d.message.clone()))
            .collect::<Vec<_>>();
        (result.dump(&symbols), messages)
    };
    let message = "invalid multibyte char (UTF-8)".to_owned();

    assert_eq!(
        invalid(b"x = 1 \xff\n"),
        (
            Some("(scope [x] (asgn (lvar x) (int 1)))".to_owned()),
            vec![(pos_in(b"x = 1 \xff\n", b"\xff", 0), message.clone())]
        )
    );
    // A truncated sequence is skipped whole.
    assert_eq!(
        invalid(b"1; \xe3\x81").1,
        vec![(pos_in(b"1; \xe3\x81", b"\xe3\x81", 0), message.clone())]
    );
    // A bad byte ends the identifier in front of it.
    assert_eq!(
        invalid(b"ab\xff = 1").1,
        vec![(pos_in(b"ab\xff = 1", b"\xff", 0), message)]
    );
    assert_eq!(
        dump("\u{3c0} = 1"),
        "(scope [\u{3c0}] (asgn (lvar \u{3c0}) (int 1)))"
    );
}

#[test]
fn test_node_limit_is_fatal() {
    let mut symbols = SymbolTable::new();
    let result = parse(
        b"[1, 2, 3, 4, 5, 6, 7, 8]",
        ParseOptions::new().with_capture(10, 10).with_max_nodes(4),
        &mut symbols,
    );
    assert_eq!(result.tree, None);
    assert!(matches!(result.fatal, Some(ParseError::Arena(_))));
}

#[test]
fn test_node_at() {
    let mut symbols = SymbolTable::new();
    let result = parse_captured("x = foo(1, 22)", &mut symbols);
    let node = result.node_at(12).expect("node at offset");
    assert_eq!(
        crate::ast::dump(&result.arena, &symbols, node),
        "(int 22)"
    );
}

proptest! {
    #[test]
    fn test_squiggly_heredoc_removes_common_indent(
        lines in prop::collection::vec((0usize..5, "[a-z]{1,4}"), 1..6)
    ) {
        let body = lines
            .iter()
            .map(|(indent, word)| format!("{}{}\n", " ".repeat(*indent), word))
            .collect::<String>();
        let common = lines.iter().map(|(indent, _)| *indent).min().unwrap_or(0);
        let expected = lines
            .iter()
            .map(|(indent, word)| format!("{}{}\\n", " ".repeat(indent - common), word))
            .collect::<String>();
        let src = format!("x = <<~EOS\n{}EOS\n", body);
        prop_assert_eq!(
            dump(&src),
            format!("(scope [x] (asgn (lvar x) (str \"{}\")))", expected)
        );
    }

    #[test]
    fn test_locals_keep_first_declaration_order(
        names in prop::collection::vec("v[a-e]", 0..12)
    ) {
        let src = names.iter().map(|name| format!("{} = 1\n", name)).collect::<String>();
        let mut symbols = SymbolTable::new();
        let result = parse_captured(&src, &mut symbols);
        let mut expected: Vec<&str> = Vec::new();
        for name in &names {
            if !expected.contains(&name.as_str()) {
                expected.push(name);
            }
        }
        let locals = result
            .locals
            .iter()
            .map(|&sym| String::from_utf8_lossy(symbols.name(sym)).into_owned())
            .collect::<Vec<_>>();
        prop_assert_eq!(locals, expected);
    }
}
