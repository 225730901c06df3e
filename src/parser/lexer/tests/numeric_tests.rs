use num_bigint::BigInt;
use ordered_float::NotNan;
use pretty_assertions::assert_eq;

use super::*;

fn values(src: &str) -> Vec<TokenValue> {
    let lexed = lex(src);
    assert_eq!(lexed.diagnostics, Vec::new(), "diagnostics for {:?}", src);
    lexed.tokens.into_iter().map(|t| t.value).collect()
}

fn int(n: i64) -> TokenValue {
    TokenValue::Int(BigInt::from(n))
}

fn float(f: f64) -> TokenValue {
    TokenValue::Float(NotNan::new(f).expect("not NaN"))
}

#[test]
fn test_integer_radixes() {
    assert_eq!(
        values("0x1F 0b101 0o17 017 0d99 0"),
        vec![int(31), int(5), int(15), int(15), int(99), int(0)]
    );
}

#[test]
fn test_integer_separators() {
    assert_eq!(values("1_000 0_7"), vec![int(1000), int(7)]);
}

#[test]
fn test_big_integer() {
    let big = "123456789012345678901234567890";
    assert_eq!(
        values(big),
        vec![TokenValue::Int(
            BigInt::parse_bytes(big.as_bytes(), 10).expect("valid")
        )]
    );
}

#[test]
fn test_floats() {
    assert_eq!(
        values("1.5 1.5e3 2e-2 0.25"),
        vec![float(1.5), float(1500.0), float(0.02), float(0.25)]
    );
}

#[test]
fn test_method_call_on_integer_is_not_float() {
    use TokenKind::*;
    assert_eq!(kinds("1.abs"), vec![Integer, Dot, Identifier]);
    assert_eq!(kinds("1..2"), vec![Integer, DotDot, Integer]);
}

#[test]
fn test_signed_numbers() {
    use TokenKind::*;
    assert_eq!(
        kinds_and_text("+1"),
        vec![(Integer, "+1")]
    );
    assert_eq!(
        kinds_and_text("-1"),
        vec![(MinusNum, "-"), (Integer, "1")]
    );
}

#[test]
fn test_numeric_errors() {
    let lexed = lex("0x");
    assert_eq!(messages(&lexed.diagnostics), vec!["numeric literal without digits"]);

    let lexed = lex("08");
    assert_eq!(messages(&lexed.diagnostics), vec!["Invalid octal digit"]);

    let lexed = lex("1__0");
    assert_eq!(messages(&lexed.diagnostics), vec!["trailing '_' in number"]);
}

#[test]
fn test_float_out_of_range() {
    let lexed = lex("1e400");
    assert_eq!(lexed.tokens[0].kind, TokenKind::Float);
    assert_eq!(messages(&lexed.diagnostics), vec!["float 1e400 out of range"]);
}
