use std::{collections::HashMap, fmt, sync::LazyLock};

use bit_vec::BitVec;
use num_bigint::BigInt;
use ordered_float::NotNan;
use tracing::trace;

use crate::{
    ast::CodeRange,
    diagnostic::Diagnostics,
    symbol::{Interner, Symbol},
};

use super::{scope::ScopeStack, InputChunk, MoreInput, PResult, ParseError};

mod heredoc;
mod literal;
mod numeric;

#[cfg(test)]
mod tests;

pub(super) use heredoc::{line_indent, strip_indent};
pub(super) use literal::StrKind;
use literal::utf8_len;

const TAB_WIDTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Token {
    pub(super) kind: TokenKind,
    pub(super) range: CodeRange,
    pub(super) space_before: bool,
    pub(super) value: TokenValue,
}

/// The parts of a [Token] the grammar branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct TokenHead {
    pub(super) kind: TokenKind,
    pub(super) range: CodeRange,
    pub(super) space_before: bool,
}

impl Token {
    pub(super) fn head(&self) -> TokenHead {
        TokenHead {
            kind: self.kind,
            range: self.range,
            space_before: self.space_before,
        }
    }

    fn new(kind: TokenKind, start: usize, end: usize, space_before: bool) -> Self {
        Token {
            kind,
            range: CodeRange { start, end },
            space_before,
            value: TokenValue::None,
        }
    }

    fn with_value(mut self, value: TokenValue) -> Self {
        self.value = value;
        self
    }
}

/// Semantic payload of a token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(super) enum TokenValue {
    #[default]
    None,
    /// Names, labels, symbols and the operator of `op=`.
    Symbol(Symbol),
    /// Character literals and regexp flags.
    Bytes(Vec<u8>),
    /// Decoded string content. `line_head` marks heredoc fragments that
    /// start a body line.
    Content { bytes: Vec<u8>, line_head: bool },
    Int(BigInt),
    Float(NotNan<f64>),
    NthRef(u32),
    BackRef(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum TokenKind {
    /// `__ENCODING__`, namely `keyword__ENCODING__`
    KeywordCapitalDoubleUnderscoreEncoding,
    /// `__LINE__`, namely `keyword__LINE__`
    KeywordCapitalDoubleUnderscoreLine,
    /// `__FILE__`, namely `keyword__FILE__`
    KeywordCapitalDoubleUnderscoreFile,
    /// `BEGIN`, namely `keyword_BEGIN`
    KeywordCapitalBegin,
    /// `END`, namely `keyword_END`
    KeywordCapitalEnd,
    /// `alias`, namely `keyword_alias`
    KeywordAlias,
    /// `and`, namely `keyword_and`
    KeywordAnd,
    /// `begin`, namely `keyword_begin`
    KeywordBegin,
    /// `break`, namely `keyword_break`
    KeywordBreak,
    /// `case`, namely `keyword_case`
    KeywordCase,
    /// `class`, namely `keyword_class`
    KeywordClass,
    /// `def`, namely `keyword_def`
    KeywordDef,
    /// `defined?`, namely `keyword_defined`
    KeywordDefinedQ,
    /// `do` binding to the nearest call, namely `keyword_do`
    KeywordDo,
    /// `do` of `while`/`until`/`for`, namely `keyword_do_cond`
    KeywordDoCond,
    /// `do` binding to a command call, namely `keyword_do_block`
    KeywordDoBlock,
    /// `else`, namely `keyword_else`
    KeywordElse,
    /// `elsif`, namely `keyword_elsif`
    KeywordElsif,
    /// `end`, namely `keyword_end`
    KeywordEnd,
    /// `ensure`, namely `keyword_ensure`
    KeywordEnsure,
    /// `false`, namely `keyword_false`
    KeywordFalse,
    /// `for`, namely `keyword_for`
    KeywordFor,
    /// `if`, namely `keyword_if`
    KeywordIf,
    /// `if` postfix, namely `modifier_if`
    KeywordIfInfix,
    /// `in`, namely `keyword_in`
    KeywordIn,
    /// `module`, namely `keyword_module`
    KeywordModule,
    /// `next`, namely `keyword_next`
    KeywordNext,
    /// `nil`, namely `keyword_nil`
    KeywordNil,
    /// `not`, namely `keyword_not`
    KeywordNot,
    /// `or`, namely `keyword_or`
    KeywordOr,
    /// `redo`, namely `keyword_redo`
    KeywordRedo,
    /// `rescue`, namely `keyword_rescue`
    KeywordRescue,
    /// `rescue` postfix, namely `modifier_rescue`
    KeywordRescueInfix,
    /// `retry`, namely `keyword_retry`
    KeywordRetry,
    /// `return`, namely `keyword_return`
    KeywordReturn,
    /// `self`, namely `keyword_self`
    KeywordSelf,
    /// `super`, namely `keyword_super`
    KeywordSuper,
    /// `then`, namely `keyword_then`
    KeywordThen,
    /// `true`, namely `keyword_true`
    KeywordTrue,
    /// `undef`, namely `keyword_undef`
    KeywordUndef,
    /// `unless`, namely `keyword_unless`
    KeywordUnless,
    /// `unless` postfix, namely `modifier_unless`
    KeywordUnlessInfix,
    /// `until`, namely `keyword_until`
    KeywordUntil,
    /// `until` postfix, namely `modifier_until`
    KeywordUntilInfix,
    /// `when`, namely `keyword_when`
    KeywordWhen,
    /// `while`, namely `keyword_while`
    KeywordWhile,
    /// `while` postfix, namely `modifier_while`
    KeywordWhileInfix,
    /// `yield`, namely `keyword_yield`
    KeywordYield,

    /// `foo` etc., namely `tIDENTIFIER`
    Identifier,
    /// `Foo` etc., namely `tCONSTANT`
    Const,
    /// `foo!`, `foo?`, and `foo=` in method name position, namely `tFID`.
    /// Also `+@` and friends after `def`, `.`, or `alias`.
    MethodName,
    /// `foo:` etc., namely `tLABEL`
    Label,
    /// `:foo`, `:+`, `:@a` etc., namely `tSYMBEG` followed by the name
    Symbol,
    /// `@foo` etc., namely `tIVAR`
    IvarName,
    /// `@@foo` etc., namely `tCVAR`
    CvarName,
    /// `$foo` etc., namely `tGVAR`
    GvarName,
    /// `$1` etc., namely `tNTH_REF`
    NthRef,
    /// `$&` etc., namely `tBACK_REF`
    BackRef,

    /// `123` etc., namely `tINTEGER`
    Integer,
    /// `1.5` etc., namely `tFLOAT`
    Float,
    /// `?a` etc., namely `tCHAR`
    Char,

    /// `"`, `'`, `%q(`, `%Q(`, `%(`, namely `tSTRING_BEG`
    StringBegin,
    /// `` ` `` and `%x(`, namely `tXSTRING_BEG`
    XStringBegin,
    /// `/` and `%r(`, namely `tREGEXP_BEG`
    RegexpBegin,
    /// `:"`, `:'` and `%s(`, namely `tSYMBEG` followed by a string
    SymbolBegin,
    /// `%w(` and `%W(`, namely `tWORDS_BEG`
    WordsBegin,
    /// `%i(` and `%I(`, namely `tSYMBOLS_BEG`
    SymbolsBegin,
    /// `<<FOO`, `<<-FOO`, `<<~FOO`, namely `tHEREDOC_BEG`
    HeredocBegin,
    /// The closing delimiter, namely `tSTRING_END` and `tREGEXP_END`.
    /// Regexp flags are in the value.
    StringEnd,
    /// `":` closing a string label, namely `tLABEL_END`
    StringEndColon,
    /// Literal text, namely `tSTRING_CONTENT`
    StringContent,
    /// `#{`, namely `tSTRING_DBEG`
    StringInterpolationBegin,
    /// `}` closing `#{`, namely `tSTRING_DEND`
    StringInterpolationEnd,
    /// `#@foo` etc., namely `tSTRING_DVAR` followed by the variable name
    StringVarInterpolation,
    /// Whitespace between elements of `%w` and friends
    WordSeparator,
    /// Zero-width marker after the line on which heredocs were opened.
    /// The parser reads the pending bodies when it sees this.
    HeredocBodies,

    /// `+=` etc., namely `tOP_ASGN`. The operator is in the value.
    OpAssign,

    /// `!`, namely `'!'`
    Excl,
    /// `!=`, namely `tNEQ`
    ExclEq,
    /// `!~`, namely `tNMATCH`
    ExclTilde,
    /// `%`, namely `'%'`
    Percent,
    /// `&`, namely `'&'`
    Amp,
    /// `&` but block argument only, namely `tAMPER`
    AmpPrefix,
    /// `&&`, namely `tANDOP`
    AmpAmp,
    /// `&.`, namely `tANDDOT`
    AmpDot,
    /// `(` starting an expression, namely `tLPAREN`
    LParen,
    /// `(` right after a method name, namely `'('`
    LParenCall,
    /// `(` after a method name and a space, namely `tLPAREN_ARG`
    LParenArg,
    /// `)`, namely `')'`
    RParen,
    /// `*`, namely `'*'`
    Star,
    /// `*` but argument splat only, namely `tSTAR`
    StarPrefix,
    /// `**`, namely `tPOW`
    StarStar,
    /// `**` but keyword argument splat only, namely `tDSTAR`
    StarStarPrefix,
    /// `+`, namely `'+'`
    Plus,
    /// `+` but unary operator only, namely `tUPLUS`
    PlusPrefix,
    /// `,`, namely `','`
    Comma,
    /// `-`, namely `'-'`
    Minus,
    /// `-` but unary operator only, namely `tUMINUS`
    MinusPrefix,
    /// `-` directly followed by a numeric literal, namely `tUMINUS_NUM`
    MinusNum,
    /// `->`, namely `tLAMBDA`
    Arrow,
    /// `.`, namely `'.'`
    Dot,
    /// `..`, namely `tDOT2`
    DotDot,
    /// `...`, namely `tDOT3`
    DotDotDot,
    /// `/`, namely `'/'`
    Slash,
    /// `:`, namely `':'`
    Colon,
    /// `::`, namely `tCOLON2`
    ColonColon,
    /// `::` but prefix only, namely `tCOLON3`
    ColonColonPrefix,
    /// `;`, namely `';'`
    Semicolon,
    /// EOL in certain contexts, namely `'\n'`
    Newline,
    /// `<`, namely `'<'`
    Lt,
    /// `<<`, namely `tLSHFT`
    LtLt,
    /// `<=`, namely `tLEQ`
    LtEq,
    /// `<=>`, namely `tCMP`
    LtEqGt,
    /// `=`, namely `'='`
    Eq,
    /// `==`, namely `tEQ`
    EqEq,
    /// `===`, namely `tEQQ`
    EqEqEq,
    /// `=>`, namely `tASSOC`
    FatArrow,
    /// `=~`, namely `tMATCH`
    EqMatch,
    /// `>`, namely `'>'`
    Gt,
    /// `>=`, namely `tGEQ`
    GtEq,
    /// `>>`, namely `tRSHFT`
    GtGt,
    /// `?`, namely `'?'`
    Question,
    /// `[`, namely `'['`
    LBracket,
    /// `[` but prefix only, namely `tLBRACK`
    LBracketPrefix,
    /// `[]` as a method name, namely `tAREF`
    Aref,
    /// `[]=` as a method name, namely `tASET`
    Aset,
    /// `]`, namely `']'`
    RBracket,
    /// `^`, namely `'^'`
    Caret,
    /// `{` of a block attached to the preceding primary, namely `'{'`
    LBrace,
    /// `{` of a block attached to a command, namely `tLBRACE_ARG`
    LBraceArg,
    /// `{` of a hash literal, namely `tLBRACE`
    LBraceHash,
    /// `|`, namely `'|'`
    Vert,
    /// `||`, namely `tOROP`
    VertVert,
    /// `}`, namely `'}'`
    RBrace,
    /// `~`, namely `'~'`
    Tilde,
    /// End of file, which is one of:
    ///
    /// - The real end of file (0 bytes wide)
    /// - The NUL (\\x00), EOT (\\x04) or SUB (\\x1A) character
    /// - The `__END__` keyword occupying the whole line
    ///
    /// Once seen, the lexer keeps returning it.
    EOF,
}

impl TokenKind {
    pub(super) fn is_keyword(self) -> bool {
        (self as u32) <= (TokenKind::KeywordYield as u32)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::Identifier => "local variable or method",
            TokenKind::Const => "constant",
            TokenKind::MethodName => "method name",
            TokenKind::Label => "label",
            TokenKind::Symbol | TokenKind::SymbolBegin => "symbol literal",
            TokenKind::IvarName => "instance variable",
            TokenKind::CvarName => "class variable",
            TokenKind::GvarName => "global variable",
            TokenKind::NthRef => "numbered reference",
            TokenKind::BackRef => "back reference",
            TokenKind::Integer => "integer literal",
            TokenKind::Float => "float literal",
            TokenKind::Char => "character literal",
            TokenKind::StringBegin | TokenKind::HeredocBegin => "string literal",
            TokenKind::XStringBegin => "backtick literal",
            TokenKind::RegexpBegin => "regexp literal",
            TokenKind::WordsBegin | TokenKind::SymbolsBegin => "word list",
            TokenKind::StringEnd | TokenKind::StringEndColon => "string end",
            TokenKind::StringContent => "string content",
            TokenKind::StringInterpolationBegin => "'#{'",
            TokenKind::StringInterpolationEnd => "'}'",
            TokenKind::StringVarInterpolation => "string interpolation",
            TokenKind::WordSeparator => "word separator",
            TokenKind::HeredocBodies => "here document",
            TokenKind::OpAssign => "operator-assignment",
            TokenKind::Newline => "end of line",
            TokenKind::EOF => "end of file",
            TokenKind::KeywordDoCond | TokenKind::KeywordDoBlock | TokenKind::KeywordDo => "'do'",
            TokenKind::KeywordIfInfix => "'if'",
            TokenKind::KeywordUnlessInfix => "'unless'",
            TokenKind::KeywordWhileInfix => "'while'",
            TokenKind::KeywordUntilInfix => "'until'",
            TokenKind::KeywordRescueInfix => "'rescue'",
            _ => {
                return match KEYWORDS.iter().find(|(_, kw)| kw.token == *self) {
                    Some((name, _)) => write!(f, "'{}'", String::from_utf8_lossy(name)),
                    None => write!(f, "'{}'", punct_text(*self)),
                }
            }
        };
        f.write_str(s)
    }
}

pub(super) fn punct_text(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::Excl => "!",
        TokenKind::ExclEq => "!=",
        TokenKind::ExclTilde => "!~",
        TokenKind::Percent => "%",
        TokenKind::Amp | TokenKind::AmpPrefix => "&",
        TokenKind::AmpAmp => "&&",
        TokenKind::AmpDot => "&.",
        TokenKind::LParen | TokenKind::LParenCall | TokenKind::LParenArg => "(",
        TokenKind::RParen => ")",
        TokenKind::Star | TokenKind::StarPrefix => "*",
        TokenKind::StarStar | TokenKind::StarStarPrefix => "**",
        TokenKind::Plus | TokenKind::PlusPrefix => "+",
        TokenKind::Comma => ",",
        TokenKind::Minus | TokenKind::MinusPrefix | TokenKind::MinusNum => "-",
        TokenKind::Arrow => "->",
        TokenKind::Dot => ".",
        TokenKind::DotDot => "..",
        TokenKind::DotDotDot => "...",
        TokenKind::Slash => "/",
        TokenKind::Colon => ":",
        TokenKind::ColonColon | TokenKind::ColonColonPrefix => "::",
        TokenKind::Semicolon => ";",
        TokenKind::Lt => "<",
        TokenKind::LtLt => "<<",
        TokenKind::LtEq => "<=",
        TokenKind::LtEqGt => "<=>",
        TokenKind::Eq => "=",
        TokenKind::EqEq => "==",
        TokenKind::EqEqEq => "===",
        TokenKind::FatArrow => "=>",
        TokenKind::EqMatch => "=~",
        TokenKind::Gt => ">",
        TokenKind::GtEq => ">=",
        TokenKind::GtGt => ">>",
        TokenKind::Question => "?",
        TokenKind::LBracket | TokenKind::LBracketPrefix => "[",
        TokenKind::Aref => "[]",
        TokenKind::Aset => "[]=",
        TokenKind::RBracket => "]",
        TokenKind::Caret => "^",
        TokenKind::LBrace | TokenKind::LBraceArg | TokenKind::LBraceHash => "{",
        TokenKind::Vert => "|",
        TokenKind::VertVert => "||",
        TokenKind::RBrace => "}",
        TokenKind::Tilde => "~",
        _ => "?",
    }
}

/// Lexer state, shared with the parser, deciding how ambiguous
/// characters are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub(super) enum LexerState {
    /// Expects an expression.
    /// Equivalent to `EXPR_BEG`.
    ///
    /// Occurrences:
    ///
    /// - The beginning of the file
    /// - After `\n` or `;`
    /// - After most prefix or infix operators, `(`, `[`, `{` and `,`
    ///
    /// Effects:
    ///
    /// - `\n` is skipped as whitespace
    /// - When there is ambiguity between prefix and infix operators,
    ///   prefix is preferred.
    /// - `name:` is a label unless a statement starts here.
    #[default]
    Begin,
    /// After a complete operand, such as a literal or a closing bracket.
    /// Equivalent to `EXPR_END`.
    ///
    /// Effects:
    ///
    /// - `\n` is a real token unless the next line starts with `.` or `&.`.
    /// - Operators are infix.
    End,
    /// After the `)` of a parenthesized first command argument.
    /// Equivalent to `EXPR_ENDARG`.
    ///
    /// Effects are equivalent to [LexerState::End] except:
    ///
    /// - `{` opens a block of the enclosing command.
    /// - `do` binds to the enclosing command.
    EndArg,
    /// After a method name in `def`, a `)` or `->`.
    /// Equivalent to `EXPR_ENDFN`.
    ///
    /// Effects are equivalent to [LexerState::End] except:
    ///
    /// - `{` opens a block.
    EndFn,
    /// After a method name that may take arguments without parentheses.
    /// Equivalent to `EXPR_ARG`.
    ///
    /// Occurrences:
    ///
    /// - After an identifier that is not a known local variable
    /// - After a method name following `.`, `&.` or `::`
    /// - After `defined?`, `not`, `super` and `yield`
    ///
    /// Effects are equivalent to [LexerState::End] except:
    ///
    /// - Labels are accepted.
    /// - `?` can start a character literal.
    /// - `+`, `-`, `*`, `**`, `&`, `::`, `[`, `/` and `%` become prefix
    ///   operators when preceded by whitespace and not followed by it.
    /// - `(` preceded by whitespace is [TokenKind::LParenArg].
    /// - `<<` preceded by whitespace can start a heredoc.
    Arg,
    /// Like [LexerState::Arg], for a name at the beginning of a statement.
    /// Equivalent to `EXPR_CMDARG`.
    ///
    /// The difference only matters to `do`, which binds to this name
    /// instead of an enclosing command.
    CmdArg,
    /// Expects an optional expression.
    /// Equivalent to `EXPR_MID`.
    ///
    /// Occurrences:
    ///
    /// - After `return`, `break` and `next`
    /// - After `rescue` (except the infix `rescue` operator)
    ///
    /// Effects are equivalent to [LexerState::Begin] except:
    ///
    /// - `\n` is a real token.
    /// - `if`, `unless`, `while`, `until` and `rescue` are modifiers.
    Mid,
    /// Expects a method name for definition.
    /// Equivalent to `EXPR_FNAME`.
    ///
    /// Occurrences:
    ///
    /// - After `def`, `alias` and `undef`
    /// - After `def recv.`
    ///
    /// Effects:
    ///
    /// - Overridable operators, `foo=`, `+@` and friends are method names.
    /// - Keywords are still recognized, and the parser accepts them as names.
    FName,
    /// Expects a method name for calling.
    /// Equivalent to `EXPR_DOT`.
    ///
    /// Occurrences:
    ///
    /// - After `.`, `&.`, or `::` (except `::` as a prefix)
    ///
    /// Effects:
    ///
    /// - Keywords are plain identifiers.
    /// - Heredocs are suppressed.
    Dot,
    /// Right after `class`. Equivalent to `EXPR_CLASS`.
    ///
    /// Effects are equivalent to [LexerState::Begin] except:
    ///
    /// - `<<` never starts a heredoc, so `class <<self` works.
    Class,
    /// Like [LexerState::Begin] but labels are not accepted.
    /// Equivalent to `EXPR_VALUE`.
    ///
    /// Occurrences:
    ///
    /// - After `if`, `while`, `case`, `and`, `or` and other keywords
    ///   taking an expression
    /// - After `?` of the conditional operator
    Value,
}

impl LexerState {
    fn is_beg(&self) -> bool {
        matches!(
            self,
            LexerState::Begin | LexerState::Mid | LexerState::Value | LexerState::Class
        )
    }

    fn is_arg(&self) -> bool {
        matches!(self, LexerState::Arg | LexerState::CmdArg)
    }

    fn is_end(&self) -> bool {
        matches!(
            self,
            LexerState::End | LexerState::EndArg | LexerState::EndFn
        )
    }

    fn is_after_operator(&self) -> bool {
        matches!(self, LexerState::FName | LexerState::Dot)
    }

    /// Should we fold lines if `\n` is found?
    fn fold_newline(&self) -> bool {
        matches!(
            self,
            LexerState::Begin
                | LexerState::FName
                | LexerState::Dot
                | LexerState::Class
                | LexerState::Value
        )
    }

    /// Should we convert `if`, `unless`, `while`, `until`
    /// and `rescue` to infix operators?
    fn prefer_modifier_if(&self) -> bool {
        !matches!(
            self,
            LexerState::Begin | LexerState::Value | LexerState::Class
        )
    }

    /// Should we prefer prefix-only tokens over ordinary ones for:
    ///
    /// - `+`, `-`
    /// - `*`, `**`, `&`
    /// - `/`, `%`
    /// - `[`
    fn prefer_prefix_operator(&self, space_before: bool, space_after: bool) -> bool {
        self.is_beg() || (self.is_arg() && space_before && !space_after)
    }

    /// Whether the prefix reading was only chosen because of the spacing,
    /// which deserves an ambiguity warning.
    fn ambiguous_prefix(&self, space_before: bool, space_after: bool) -> bool {
        !self.is_beg() && self.prefer_prefix_operator(space_before, space_after)
    }

    fn allow_label(&self, cmd_state: bool) -> bool {
        (*self == LexerState::Begin && !cmd_state) || self.is_arg()
    }

    fn allow_heredoc(&self, space_before: bool) -> bool {
        !matches!(self, LexerState::Dot | LexerState::Class)
            && !self.is_end()
            && (!self.is_arg() || space_before)
    }

    /// Should we split `||` so that `{ || }` opens empty block parameters?
    fn split_vert_vert(&self) -> bool {
        *self == LexerState::Begin
    }

    /// If true, `?` cannot be a part of a character literal.
    fn force_single_question_mark(&self) -> bool {
        self.is_end()
    }

    fn after_operator(&self) -> LexerState {
        if self.is_after_operator() {
            LexerState::Arg
        } else {
            LexerState::Begin
        }
    }
}

/// Stack of one-bit flags; the top bit is the current one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct BitStack(BitVec);

impl BitStack {
    pub(super) fn push(&mut self, bit: bool) {
        self.0.push(bit);
    }

    pub(super) fn pop(&mut self) {
        self.0.pop();
    }

    /// Pops the top and ors it into the new top.
    pub(super) fn lexpop(&mut self) {
        let top = self.0.pop().unwrap_or(false);
        if top {
            match self.0.len() {
                0 => self.0.push(true),
                len => self.0.set(len - 1, true),
            }
        }
    }

    pub(super) fn is_set(&self) -> bool {
        match self.0.len() {
            0 => false,
            len => self.0.get(len - 1).unwrap_or(false),
        }
    }
}

/// State saved when entering `#{`, restored at the matching `}`.
#[derive(Debug)]
struct LexContext {
    strterm: Option<literal::StrTerm>,
    state: LexerState,
    cmd_start: bool,
    cond: BitStack,
    cmdarg: BitStack,
    paren_nest: usize,
}

pub(super) struct LexerConfig {
    pub(super) max_nesting_depth: usize,
    pub(super) token_buffer_max: usize,
    pub(super) more_input: Option<MoreInput>,
}

pub(super) struct Lexer {
    src: Vec<u8>,
    pos: usize,
    ended: bool,
    pub(super) state: LexerState,
    pub(super) cmd_start: bool,
    pub(super) cond: BitStack,
    pub(super) cmdarg: BitStack,
    paren_nest: usize,
    /// Keyword blocks and brackets the parser has open. Only consulted to
    /// decide whether more input is worth asking for.
    pub(super) open_blocks: usize,
    strterm: Option<literal::StrTerm>,
    /// `#` of `#@foo` was returned; the variable comes next.
    var_pending: bool,
    /// The previous token was `->`.
    after_arrow: bool,
    heredocs: heredoc::HeredocQueue,
    contexts: Vec<LexContext>,
    max_nesting_depth: usize,
    token_buffer_max: usize,
    more_input: Option<MoreInput>,
}

impl Lexer {
    pub(super) fn new(src: Vec<u8>, config: LexerConfig) -> Self {
        Self {
            src,
            pos: 0,
            ended: false,
            state: LexerState::Begin,
            cmd_start: true,
            cond: BitStack::default(),
            cmdarg: BitStack::default(),
            paren_nest: 0,
            open_blocks: 0,
            strterm: None,
            var_pending: false,
            after_arrow: false,
            heredocs: heredoc::HeredocQueue::default(),
            contexts: Vec::new(),
            max_nesting_depth: config.max_nesting_depth,
            token_buffer_max: config.token_buffer_max,
            more_input: config.more_input,
        }
    }

    pub(super) fn slice(&self, range: CodeRange) -> &[u8] {
        self.src.get(range.range()).unwrap_or(&[])
    }

    pub(super) fn pos(&self) -> usize {
        self.pos
    }

    pub(super) fn lex(
        &mut self,
        diag: &mut Diagnostics,
        symbols: &mut dyn Interner,
        scopes: &ScopeStack,
    ) -> PResult<Token> {
        if self.strterm.is_some() {
            return self.lex_string(diag, symbols);
        }
        if self.heredocs.due {
            return Ok(Token::new(
                TokenKind::HeredocBodies,
                self.pos,
                self.pos,
                false,
            ));
        }
        let cmd_state = std::mem::replace(&mut self.cmd_start, false);
        let after_arrow = std::mem::replace(&mut self.after_arrow, false);
        let mut space_before = false;
        loop {
            space_before |= self.lex_space();
            if self.ended {
                return Ok(Token::new(TokenKind::EOF, self.pos, self.pos, space_before));
            }
            let start = self.pos;
            match self.peek_byte() {
                b'\0' | b'\x04' | b'\x1A' => {
                    if self.pos >= self.src.len() {
                        if self.wants_more(cmd_state) && self.fetch_more(diag) {
                            continue;
                        }
                    } else {
                        self.pos += 1;
                    }
                    return self.lex_eof(start, space_before);
                }
                b'\n' => {
                    if self.heredocs.has_unread() {
                        self.pos += 1;
                        self.heredocs.due = true;
                        if self.state.fold_newline() {
                            return Ok(Token::new(
                                TokenKind::HeredocBodies,
                                self.pos,
                                self.pos,
                                true,
                            ));
                        }
                        self.state = LexerState::Begin;
                        self.cmd_start = true;
                        return Ok(Token::new(TokenKind::Newline, start, self.pos, space_before));
                    }
                    if self.state.fold_newline() {
                        self.pos += 1;
                        space_before = true;
                        continue;
                    }
                    if self.does_force_fold() {
                        space_before = true;
                        continue;
                    }
                    self.pos += 1;
                    self.state = LexerState::Begin;
                    self.cmd_start = true;
                    return Ok(Token::new(TokenKind::Newline, start, self.pos, space_before));
                }
                b'=' if self.is_beginning_of_line(self.pos) && self.at_word(b"=begin") => {
                    self.skip_embedded_doc(diag)?;
                    space_before = true;
                    continue;
                }
                b'\x80'..=b'\xFF' if self.ident_char_len(start).is_none() => {
                    self.pos += 1;
                    while matches!(self.peek_byte(), 0x80..=0xBF) {
                        self.pos += 1;
                    }
                    diag.error(
                        CodeRange {
                            start,
                            end: self.pos,
                        },
                        "invalid multibyte char (UTF-8)",
                    );
                    space_before = true;
                    continue;
                }
                b'_' | b'a'..=b'z' | b'A'..=b'Z' | b'\x80'..=b'\xFF' => {
                    return Ok(self.lex_ident(diag, symbols, scopes, cmd_state, space_before));
                }
                b'0'..=b'9' => {
                    let tok = self.lex_number(diag, start, space_before);
                    self.state = LexerState::End;
                    return Ok(tok);
                }
                b'\x01'..=b'\x08'
                | b'\x0E'..=b'\x19'
                | b'\x1B'..=b'\x1F'
                | b'\x7F'
                | b'\\' => {
                    self.pos += 1;
                    diag.error(
                        CodeRange {
                            start,
                            end: self.pos,
                        },
                        format!("Invalid char '\\x{:02X}' in expression", self.src[start]),
                    );
                    space_before = true;
                    continue;
                }
                _ => {
                    return self.lex_punct(diag, symbols, scopes, cmd_state, after_arrow, space_before);
                }
            }
        }
    }

    fn lex_eof(&mut self, start: usize, space_before: bool) -> PResult<Token> {
        if !self.contexts.is_empty() {
            return Err(ParseError::Unterminated {
                message: "unterminated string meets end of file".to_owned(),
                pos: start,
            });
        }
        if let Some(id) = self.heredocs.first_unread_id() {
            return Err(ParseError::Unterminated {
                message: format!(
                    "can't find heredoc delimiter \"{}\" anywhere before EOF",
                    String::from_utf8_lossy(&id)
                ),
                pos: start,
            });
        }
        self.ended = true;
        Ok(Token::new(TokenKind::EOF, start, self.pos, space_before))
    }

    fn lex_ident(
        &mut self,
        diag: &mut Diagnostics,
        symbols: &mut dyn Interner,
        scopes: &ScopeStack,
        cmd_state: bool,
        space_before: bool,
    ) -> Token {
        let start = self.pos;
        let prev = self.state;
        self.skip_ident_chars();
        let mut kind = if self.src[start].is_ascii_uppercase() {
            TokenKind::Const
        } else {
            TokenKind::Identifier
        };
        match self.peek_byte() {
            b'!' | b'?' if self.peek_byte_at(1) != b'=' || self.peek_byte_at(2) == b'=' => {
                self.pos += 1;
                kind = TokenKind::MethodName;
            }
            b'=' if prev == LexerState::FName && self.assigner_suffix_follows() => {
                self.pos += 1;
                kind = TokenKind::MethodName;
            }
            _ => {}
        }
        let name_end = self.pos;
        let name = &self.src[start..name_end];

        if prev.allow_label(cmd_state)
            && self.peek_byte() == b':'
            && self.peek_byte_at(1) != b':'
            && !name.ends_with(b"=")
        {
            let sym = self.intern_name(diag, symbols, start, name_end, "identifier");
            self.pos += 1;
            self.state = LexerState::Begin;
            return Token::new(TokenKind::Label, start, self.pos, space_before)
                .with_value(TokenValue::Symbol(sym));
        }

        if prev != LexerState::Dot {
            if let Some(kw) = KEYWORDS.get(name) {
                if kw.token == TokenKind::EOF {
                    if self.is_beginning_of_line(start) && self.is_end_of_line(self.pos) {
                        // `__END__`: the rest of the buffer is data.
                        self.ended = true;
                        self.pos = self.src.len();
                        return Token::new(TokenKind::EOF, start, start + 7, space_before);
                    }
                } else {
                    return self.lex_keyword(kw, prev, start, space_before);
                }
            }
        }

        let sym = self.intern_name(diag, symbols, start, name_end, "identifier");
        self.state = if prev.is_beg() || prev == LexerState::Dot || prev.is_arg() {
            if cmd_state {
                LexerState::CmdArg
            } else {
                LexerState::Arg
            }
        } else if prev == LexerState::FName {
            LexerState::EndFn
        } else {
            LexerState::End
        };
        if prev != LexerState::Dot
            && kind == TokenKind::Identifier
            && matches!(self.src[start], b'a'..=b'z' | b'_')
            && scopes.is_local(sym)
        {
            self.state = LexerState::End;
        }
        Token::new(kind, start, self.pos, space_before).with_value(TokenValue::Symbol(sym))
    }

    fn lex_keyword(
        &mut self,
        kw: &Keyword,
        prev: LexerState,
        start: usize,
        space_before: bool,
    ) -> Token {
        let end = self.pos;
        self.state = kw.state;
        if prev == LexerState::FName {
            self.state = LexerState::EndFn;
            return Token::new(kw.token, start, end, space_before);
        }
        if self.state == LexerState::Begin {
            self.cmd_start = true;
        }
        let kind = if kw.token == TokenKind::KeywordDo {
            if self.cond.is_set() {
                TokenKind::KeywordDoCond
            } else if (self.cmdarg.is_set() && prev != LexerState::CmdArg)
                || matches!(prev, LexerState::EndArg | LexerState::Begin)
            {
                TokenKind::KeywordDoBlock
            } else {
                TokenKind::KeywordDo
            }
        } else if prev.prefer_modifier_if() {
            if kw.modifier != kw.token {
                self.state = LexerState::Begin;
            }
            kw.modifier
        } else {
            kw.token
        };
        Token::new(kind, start, end, space_before)
    }

    /// `=` after a name in [LexerState::FName] makes a setter name
    /// unless it belongs to `==`, `=~` or `=>`.
    fn assigner_suffix_follows(&self) -> bool {
        let b1 = self.peek_byte_at(1);
        !matches!(b1, b'~' | b'>') && (b1 != b'=' || self.peek_byte_at(2) == b'>')
    }

    fn lex_punct(
        &mut self,
        diag: &mut Diagnostics,
        symbols: &mut dyn Interner,
        scopes: &ScopeStack,
        cmd_state: bool,
        after_arrow: bool,
        space_before: bool,
    ) -> PResult<Token> {
        let start = self.pos;
        let prev = self.state;
        let mut value = TokenValue::None;
        let first = self.peek_byte();
        self.pos += 1;
        let kind = match first {
            b'*' => {
                let pow = self.peek_byte() == b'*';
                if pow {
                    self.pos += 1;
                }
                if self.peek_byte() == b'=' {
                    self.pos += 1;
                    value = TokenValue::Symbol(symbols.intern(if pow { b"**" } else { b"*" }));
                    self.state = LexerState::Begin;
                    TokenKind::OpAssign
                } else {
                    let space_after = self.peek_space();
                    let kind = if prev.prefer_prefix_operator(space_before, space_after) {
                        if prev.ambiguous_prefix(space_before, space_after) {
                            diag.warning(
                                CodeRange {
                                    start,
                                    end: self.pos,
                                },
                                if pow {
                                    "'**' interpreted as argument prefix"
                                } else {
                                    "'*' interpreted as argument prefix"
                                },
                            );
                        }
                        if pow {
                            TokenKind::StarStarPrefix
                        } else {
                            TokenKind::StarPrefix
                        }
                    } else if pow {
                        TokenKind::StarStar
                    } else {
                        TokenKind::Star
                    };
                    self.state = prev.after_operator();
                    kind
                }
            }
            b'!' => {
                if prev.is_after_operator() {
                    self.state = LexerState::Arg;
                    if self.peek_byte() == b'@' {
                        self.pos += 1;
                        value = TokenValue::Symbol(symbols.intern(b"!"));
                        TokenKind::MethodName
                    } else {
                        TokenKind::Excl
                    }
                } else {
                    self.state = LexerState::Begin;
                    match self.peek_byte() {
                        b'=' => {
                            self.pos += 1;
                            TokenKind::ExclEq
                        }
                        b'~' => {
                            self.pos += 1;
                            TokenKind::ExclTilde
                        }
                        _ => TokenKind::Excl,
                    }
                }
            }
            b'=' => {
                self.state = prev.after_operator();
                match self.peek_byte() {
                    b'=' => {
                        self.pos += 1;
                        if self.peek_byte() == b'=' {
                            self.pos += 1;
                            TokenKind::EqEqEq
                        } else {
                            TokenKind::EqEq
                        }
                    }
                    b'~' => {
                        self.pos += 1;
                        TokenKind::EqMatch
                    }
                    b'>' => {
                        self.pos += 1;
                        TokenKind::FatArrow
                    }
                    _ => TokenKind::Eq,
                }
            }
            b'<' => {
                if self.peek_byte() == b'<' && prev.allow_heredoc(space_before) {
                    if let Some(tok) = self.lex_heredoc_opener(diag, start, space_before)? {
                        return Ok(tok);
                    }
                }
                if prev.is_after_operator() {
                    self.state = LexerState::Arg;
                } else {
                    if prev == LexerState::Class {
                        self.cmd_start = true;
                    }
                    self.state = LexerState::Begin;
                }
                match self.peek_byte() {
                    b'=' => {
                        self.pos += 1;
                        if self.peek_byte() == b'>' {
                            self.pos += 1;
                            TokenKind::LtEqGt
                        } else {
                            TokenKind::LtEq
                        }
                    }
                    b'<' => {
                        self.pos += 1;
                        if self.peek_byte() == b'=' {
                            self.pos += 1;
                            value = TokenValue::Symbol(symbols.intern(b"<<"));
                            self.state = LexerState::Begin;
                            TokenKind::OpAssign
                        } else {
                            TokenKind::LtLt
                        }
                    }
                    _ => TokenKind::Lt,
                }
            }
            b'>' => {
                self.state = prev.after_operator();
                match self.peek_byte() {
                    b'=' => {
                        self.pos += 1;
                        TokenKind::GtEq
                    }
                    b'>' => {
                        self.pos += 1;
                        if self.peek_byte() == b'=' {
                            self.pos += 1;
                            value = TokenValue::Symbol(symbols.intern(b">>"));
                            self.state = LexerState::Begin;
                            TokenKind::OpAssign
                        } else {
                            TokenKind::GtGt
                        }
                    }
                    _ => TokenKind::Gt,
                }
            }
            b'"' => {
                self.begin_string(StrKind::String, true, b'\0', b'"', start);
                self.set_label_ok(prev.allow_label(cmd_state));
                TokenKind::StringBegin
            }
            b'\'' => {
                self.begin_string(StrKind::String, false, b'\0', b'\'', start);
                self.set_label_ok(prev.allow_label(cmd_state));
                TokenKind::StringBegin
            }
            b'`' => match prev {
                LexerState::FName => {
                    self.state = LexerState::EndFn;
                    value = TokenValue::Symbol(symbols.intern(b"`"));
                    TokenKind::MethodName
                }
                LexerState::Dot => {
                    self.state = if cmd_state {
                        LexerState::CmdArg
                    } else {
                        LexerState::Arg
                    };
                    value = TokenValue::Symbol(symbols.intern(b"`"));
                    TokenKind::MethodName
                }
                _ => {
                    self.begin_string(StrKind::XString, true, b'\0', b'`', start);
                    TokenKind::XStringBegin
                }
            },
            b'?' => {
                if let Some(tok) = self.lex_char(diag, prev, start, space_before)? {
                    return Ok(tok);
                }
                self.state = LexerState::Value;
                TokenKind::Question
            }
            b'&' => match self.peek_byte() {
                b'&' => {
                    self.pos += 1;
                    self.state = LexerState::Begin;
                    if self.peek_byte() == b'=' {
                        self.pos += 1;
                        value = TokenValue::Symbol(symbols.intern(b"&&"));
                        TokenKind::OpAssign
                    } else {
                        TokenKind::AmpAmp
                    }
                }
                b'=' => {
                    self.pos += 1;
                    self.state = LexerState::Begin;
                    value = TokenValue::Symbol(symbols.intern(b"&"));
                    TokenKind::OpAssign
                }
                b'.' => {
                    self.pos += 1;
                    self.state = LexerState::Dot;
                    TokenKind::AmpDot
                }
                _ => {
                    let space_after = self.peek_space();
                    let kind = if prev.prefer_prefix_operator(space_before, space_after) {
                        if prev.ambiguous_prefix(space_before, space_after) {
                            diag.warning(
                                CodeRange {
                                    start,
                                    end: self.pos,
                                },
                                "'&' interpreted as argument prefix",
                            );
                        }
                        TokenKind::AmpPrefix
                    } else {
                        TokenKind::Amp
                    };
                    self.state = prev.after_operator();
                    kind
                }
            },
            b'|' => match self.peek_byte() {
                b'|' if prev.split_vert_vert() => {
                    self.state = LexerState::Begin;
                    TokenKind::Vert
                }
                b'|' => {
                    self.pos += 1;
                    self.state = LexerState::Begin;
                    if self.peek_byte() == b'=' {
                        self.pos += 1;
                        value = TokenValue::Symbol(symbols.intern(b"||"));
                        TokenKind::OpAssign
                    } else {
                        TokenKind::VertVert
                    }
                }
                b'=' => {
                    self.pos += 1;
                    self.state = LexerState::Begin;
                    value = TokenValue::Symbol(symbols.intern(b"|"));
                    TokenKind::OpAssign
                }
                _ => {
                    self.state = prev.after_operator();
                    TokenKind::Vert
                }
            },
            b'+' => {
                let next = self.peek_byte();
                if prev.is_after_operator() {
                    self.state = LexerState::Arg;
                    if next == b'@' {
                        self.pos += 1;
                        value = TokenValue::Symbol(symbols.intern(b"+@"));
                        TokenKind::MethodName
                    } else {
                        TokenKind::Plus
                    }
                } else if next == b'=' {
                    self.pos += 1;
                    self.state = LexerState::Begin;
                    value = TokenValue::Symbol(symbols.intern(b"+"));
                    TokenKind::OpAssign
                } else if prev.prefer_prefix_operator(space_before, self.peek_space()) {
                    if prev.ambiguous_prefix(space_before, false) {
                        self.warn_ambiguous_first_argument(diag, start);
                    }
                    self.state = LexerState::Begin;
                    if next.is_ascii_digit() {
                        let tok = self.lex_number(diag, start, space_before);
                        self.state = LexerState::End;
                        return Ok(tok);
                    }
                    TokenKind::PlusPrefix
                } else {
                    self.state = LexerState::Begin;
                    TokenKind::Plus
                }
            }
            b'-' => {
                let next = self.peek_byte();
                if prev.is_after_operator() {
                    self.state = LexerState::Arg;
                    if next == b'@' {
                        self.pos += 1;
                        value = TokenValue::Symbol(symbols.intern(b"-@"));
                        TokenKind::MethodName
                    } else {
                        TokenKind::Minus
                    }
                } else if next == b'=' {
                    self.pos += 1;
                    self.state = LexerState::Begin;
                    value = TokenValue::Symbol(symbols.intern(b"-"));
                    TokenKind::OpAssign
                } else if next == b'>' {
                    self.pos += 1;
                    self.state = LexerState::EndFn;
                    self.after_arrow = true;
                    TokenKind::Arrow
                } else if prev.prefer_prefix_operator(space_before, self.peek_space()) {
                    if prev.ambiguous_prefix(space_before, false) {
                        self.warn_ambiguous_first_argument(diag, start);
                    }
                    self.state = LexerState::Begin;
                    if next.is_ascii_digit() {
                        TokenKind::MinusNum
                    } else {
                        TokenKind::MinusPrefix
                    }
                } else {
                    self.state = LexerState::Begin;
                    TokenKind::Minus
                }
            }
            b'.' => match self.peek_byte() {
                b'.' => {
                    self.pos += 1;
                    self.state = LexerState::Begin;
                    if self.peek_byte() == b'.' {
                        self.pos += 1;
                        TokenKind::DotDotDot
                    } else {
                        TokenKind::DotDot
                    }
                }
                b'0'..=b'9' => {
                    let tok = self.lex_number(diag, start, space_before);
                    diag.error(
                        tok.range,
                        "no .<digit> floating literal anymore; put 0 before dot",
                    );
                    self.state = LexerState::End;
                    return Ok(tok);
                }
                _ => {
                    self.state = LexerState::Dot;
                    TokenKind::Dot
                }
            },
            b')' | b']' | b'}' => {
                if first == b'}' && self.paren_nest == 0 && !self.contexts.is_empty() {
                    self.pop_context();
                    return Ok(Token::new(
                        TokenKind::StringInterpolationEnd,
                        start,
                        self.pos,
                        space_before,
                    ));
                }
                self.cond.lexpop();
                self.cmdarg.lexpop();
                self.paren_nest = self.paren_nest.saturating_sub(1);
                match first {
                    b')' => {
                        self.state = LexerState::EndFn;
                        TokenKind::RParen
                    }
                    b']' => {
                        self.state = LexerState::End;
                        TokenKind::RBracket
                    }
                    _ => {
                        self.state = LexerState::End;
                        TokenKind::RBrace
                    }
                }
            }
            b':' => match self.peek_byte() {
                b':' => {
                    self.pos += 1;
                    if prev.is_beg()
                        || prev == LexerState::Class
                        || (prev.is_arg() && space_before)
                    {
                        self.state = LexerState::Begin;
                        TokenKind::ColonColonPrefix
                    } else {
                        self.state = LexerState::Dot;
                        TokenKind::ColonColon
                    }
                }
                b'"' if !prev.is_end() => {
                    self.pos += 1;
                    self.begin_string(StrKind::Symbol, true, b'\0', b'"', start);
                    TokenKind::SymbolBegin
                }
                b'\'' if !prev.is_end() => {
                    self.pos += 1;
                    self.begin_string(StrKind::Symbol, false, b'\0', b'\'', start);
                    TokenKind::SymbolBegin
                }
                next if prev.is_end() || is_space(next) || next == b'#' || next == 0 => {
                    self.state = LexerState::Begin;
                    TokenKind::Colon
                }
                _ => match self.lex_symbol_name(diag, symbols) {
                    Some(sym) => {
                        self.state = LexerState::End;
                        value = TokenValue::Symbol(sym);
                        TokenKind::Symbol
                    }
                    None => {
                        self.state = LexerState::Begin;
                        TokenKind::Colon
                    }
                },
            },
            b'/' => {
                if prev.is_beg() {
                    self.begin_string(StrKind::Regexp, true, b'\0', b'/', start);
                    TokenKind::RegexpBegin
                } else if self.peek_byte() == b'=' {
                    self.pos += 1;
                    self.state = LexerState::Begin;
                    value = TokenValue::Symbol(symbols.intern(b"/"));
                    TokenKind::OpAssign
                } else if prev.prefer_prefix_operator(space_before, self.peek_space()) {
                    self.warn_ambiguous_first_argument(diag, start);
                    self.begin_string(StrKind::Regexp, true, b'\0', b'/', start);
                    TokenKind::RegexpBegin
                } else {
                    self.state = prev.after_operator();
                    TokenKind::Slash
                }
            }
            b'^' => {
                if self.peek_byte() == b'=' {
                    self.pos += 1;
                    self.state = LexerState::Begin;
                    value = TokenValue::Symbol(symbols.intern(b"^"));
                    TokenKind::OpAssign
                } else {
                    self.state = prev.after_operator();
                    TokenKind::Caret
                }
            }
            b';' => {
                self.state = LexerState::Begin;
                self.cmd_start = true;
                TokenKind::Semicolon
            }
            b',' => {
                self.state = LexerState::Begin;
                TokenKind::Comma
            }
            b'~' => {
                if prev.is_after_operator() {
                    if self.peek_byte() == b'@' {
                        self.pos += 1;
                    }
                    self.state = LexerState::Arg;
                } else {
                    self.state = LexerState::Begin;
                }
                TokenKind::Tilde
            }
            b'(' => {
                let kind = if prev.is_beg() {
                    TokenKind::LParen
                } else if !space_before {
                    TokenKind::LParenCall
                } else if prev.is_arg() {
                    TokenKind::LParenArg
                } else {
                    if prev == LexerState::EndFn && !after_arrow {
                        diag.warning(
                            CodeRange {
                                start,
                                end: self.pos,
                            },
                            "parentheses after method name is interpreted as an argument list, not a decomposed argument",
                        );
                    }
                    TokenKind::LParenCall
                };
                self.open_paren();
                kind
            }
            b'[' => {
                if prev.is_after_operator() {
                    self.state = LexerState::Arg;
                    if self.peek_byte() == b']' {
                        self.pos += 1;
                        if self.peek_byte() == b'=' {
                            self.pos += 1;
                            TokenKind::Aset
                        } else {
                            TokenKind::Aref
                        }
                    } else {
                        self.open_paren();
                        self.state = LexerState::Arg;
                        TokenKind::LBracket
                    }
                } else {
                    let kind = if prev.is_beg() || (prev.is_arg() && space_before) {
                        TokenKind::LBracketPrefix
                    } else {
                        TokenKind::LBracket
                    };
                    self.open_paren();
                    kind
                }
            }
            b'{' => {
                let kind = if prev.is_arg() || matches!(prev, LexerState::End | LexerState::EndFn)
                {
                    TokenKind::LBrace
                } else if prev == LexerState::EndArg {
                    TokenKind::LBraceArg
                } else {
                    TokenKind::LBraceHash
                };
                self.open_paren();
                if kind != TokenKind::LBraceHash {
                    self.cmd_start = true;
                }
                kind
            }
            b'%' => {
                if prev.is_beg() {
                    return self.lex_percent(diag, start, space_before);
                }
                if self.peek_byte() == b'=' {
                    self.pos += 1;
                    self.state = LexerState::Begin;
                    value = TokenValue::Symbol(symbols.intern(b"%"));
                    TokenKind::OpAssign
                } else if prev.prefer_prefix_operator(space_before, self.peek_space()) {
                    self.warn_ambiguous_first_argument(diag, start);
                    return self.lex_percent(diag, start, space_before);
                } else {
                    self.state = prev.after_operator();
                    TokenKind::Percent
                }
            }
            b'$' => {
                self.pos = start;
                return Ok(self.lex_gvar(diag, symbols, space_before));
            }
            b'@' => {
                self.pos = start;
                return Ok(self.lex_ivar(diag, symbols, space_before));
            }
            _ => {
                // Printable ASCII that starts no token, e.g. a stray `\`.
                diag.error(
                    CodeRange {
                        start,
                        end: self.pos,
                    },
                    format!("Invalid char '{}' in expression", first as char),
                );
                self.cmd_start = cmd_state;
                return self.lex(diag, symbols, scopes);
            }
        };
        Ok(Token::new(kind, start, self.pos, space_before).with_value(value))
    }

    fn open_paren(&mut self) {
        self.paren_nest += 1;
        self.cond.push(false);
        self.cmdarg.push(false);
        self.state = LexerState::Begin;
    }

    fn warn_ambiguous_first_argument(&self, diag: &mut Diagnostics, start: usize) {
        diag.warning(
            CodeRange {
                start,
                end: start + 1,
            },
            "ambiguous first argument; put parentheses or even spaces",
        );
    }

    fn lex_gvar(
        &mut self,
        diag: &mut Diagnostics,
        symbols: &mut dyn Interner,
        space_before: bool,
    ) -> Token {
        let start = self.pos;
        let prev = self.state;
        self.pos += 1;
        self.state = LexerState::End;
        let kind = match self.peek_byte() {
            b'_' if !is_ident_continue(self.peek_byte_at(1)) => {
                self.pos += 1;
                TokenKind::GvarName
            }
            b'~' | b'*' | b'$' | b'?' | b'!' | b'@' | b'/' | b'\\' | b';' | b',' | b'.'
            | b'=' | b':' | b'<' | b'>' | b'"' | b'0' => {
                self.pos += 1;
                TokenKind::GvarName
            }
            b'-' => {
                self.pos += 1;
                if is_ident_continue(self.peek_byte()) {
                    self.pos += 1;
                }
                TokenKind::GvarName
            }
            c @ (b'&' | b'`' | b'\'' | b'+') => {
                self.pos += 1;
                if prev != LexerState::FName {
                    return Token::new(TokenKind::BackRef, start, self.pos, space_before)
                        .with_value(TokenValue::BackRef(c));
                }
                TokenKind::GvarName
            }
            b'1'..=b'9' => {
                while self.peek_byte().is_ascii_digit() {
                    self.pos += 1;
                }
                if prev != LexerState::FName {
                    let digits = &self.src[start + 1..self.pos];
                    let n = std::str::from_utf8(digits)
                        .ok()
                        .and_then(|s| s.parse::<u32>().ok());
                    let n = match n {
                        Some(n) => n,
                        None => {
                            diag.warning(
                                CodeRange {
                                    start,
                                    end: self.pos,
                                },
                                format!(
                                    "'${}' is too big for a number variable, always nil",
                                    String::from_utf8_lossy(digits)
                                ),
                            );
                            u32::MAX
                        }
                    };
                    return Token::new(TokenKind::NthRef, start, self.pos, space_before)
                        .with_value(TokenValue::NthRef(n));
                }
                TokenKind::GvarName
            }
            c if is_ident_continue(c) => {
                self.skip_ident_chars();
                TokenKind::GvarName
            }
            _ => {
                diag.error(
                    CodeRange {
                        start,
                        end: self.pos,
                    },
                    "'$' without identifiers is not allowed as a global variable name",
                );
                TokenKind::GvarName
            }
        };
        let sym = self.intern_name(diag, symbols, start, self.pos, "identifier");
        Token::new(kind, start, self.pos, space_before).with_value(TokenValue::Symbol(sym))
    }

    fn lex_ivar(
        &mut self,
        diag: &mut Diagnostics,
        symbols: &mut dyn Interner,
        space_before: bool,
    ) -> Token {
        let start = self.pos;
        self.pos += 1;
        let kind = if self.peek_byte() == b'@' {
            self.pos += 1;
            TokenKind::CvarName
        } else {
            TokenKind::IvarName
        };
        let what = if kind == TokenKind::CvarName {
            "class variable"
        } else {
            "instance variable"
        };
        let c = self.peek_byte();
        if c.is_ascii_digit() {
            while self.peek_byte().is_ascii_digit() {
                self.pos += 1;
            }
            diag.error(
                CodeRange {
                    start,
                    end: self.pos,
                },
                format!(
                    "'{}' is not allowed as {} {} name",
                    String::from_utf8_lossy(&self.src[start..self.pos]),
                    if kind == TokenKind::CvarName { "a" } else { "an" },
                    what
                ),
            );
        } else if !is_ident_continue(c) {
            diag.error(
                CodeRange {
                    start,
                    end: self.pos,
                },
                format!(
                    "'{}' without identifiers is not allowed as {} {} name",
                    String::from_utf8_lossy(&self.src[start..self.pos]),
                    if kind == TokenKind::CvarName { "a" } else { "an" },
                    what
                ),
            );
        }
        self.skip_ident_chars();
        self.state = LexerState::End;
        let sym = self.intern_name(diag, symbols, start, self.pos, "identifier");
        Token::new(kind, start, self.pos, space_before).with_value(TokenValue::Symbol(sym))
    }

    /// Enters `#{`: saves the string and lexer state and starts afresh.
    fn push_context(&mut self, pos: usize) -> PResult<()> {
        if self.contexts.len() >= self.max_nesting_depth {
            return Err(ParseError::NestingTooDeep {
                limit: self.max_nesting_depth,
                pos,
            });
        }
        trace!(depth = self.contexts.len() + 1, "enter interpolation");
        self.contexts.push(LexContext {
            strterm: self.strterm.take(),
            state: self.state,
            cmd_start: self.cmd_start,
            cond: std::mem::take(&mut self.cond),
            cmdarg: std::mem::take(&mut self.cmdarg),
            paren_nest: self.paren_nest,
        });
        self.state = LexerState::Begin;
        self.cmd_start = true;
        self.paren_nest = 0;
        Ok(())
    }

    fn pop_context(&mut self) {
        if let Some(ctx) = self.contexts.pop() {
            trace!(depth = self.contexts.len(), "leave interpolation");
            self.strterm = ctx.strterm;
            self.state = ctx.state;
            self.cmd_start = ctx.cmd_start;
            self.cond = ctx.cond;
            self.cmdarg = ctx.cmdarg;
            self.paren_nest = ctx.paren_nest;
        }
    }

    /// Whether hitting the end of the buffer here leaves something open:
    /// a literal, a bracket, a keyword block, or an operator missing its
    /// right operand.
    fn wants_more(&self, cmd_state: bool) -> bool {
        self.strterm.is_some()
            || !self.contexts.is_empty()
            || self.paren_nest > 0
            || self.open_blocks > 0
            || self.heredocs.has_unread()
            || (!cmd_state && (self.state.is_beg() || self.state.is_after_operator()))
    }

    /// Asks the more-input callback for another chunk. Returns whether
    /// anything was appended.
    fn fetch_more(&mut self, diag: &mut Diagnostics) -> bool {
        let Some(more) = self.more_input.as_mut() else {
            return false;
        };
        let Some(InputChunk { bytes, filename }) = more() else {
            return false;
        };
        if bytes.is_empty() {
            return false;
        }
        trace!(len = bytes.len(), filename = ?filename, "more input");
        let offset = self.src.len();
        diag.source_map_mut()
            .add_chunk(offset, &bytes, filename.as_deref(), 1);
        self.src.extend_from_slice(&bytes);
        true
    }

    fn skip_embedded_doc(&mut self, diag: &mut Diagnostics) -> PResult<()> {
        let start = self.pos;
        self.skip_line();
        loop {
            if self.peek_byte() == b'\n' {
                self.pos += 1;
            }
            if self.pos >= self.src.len() && !self.fetch_more(diag) {
                return Err(ParseError::Unterminated {
                    message: "embedded document meets end of file".to_owned(),
                    pos: start,
                });
            }
            if self.at_word(b"=end") {
                self.skip_line();
                return Ok(());
            }
            self.skip_line();
        }
    }

    /// Whether `word` starts at the current position and is followed by
    /// whitespace or the end of the line.
    fn at_word(&self, word: &[u8]) -> bool {
        self.src[self.pos..].starts_with(word)
            && matches!(
                self.src.get(self.pos + word.len()).copied().unwrap_or(0),
                0 | b' ' | b'\t' | b'\r' | b'\n'
            )
    }

    /// Skips whitespace, comments and escaped newlines, stopping at `\n`.
    fn lex_space(&mut self) -> bool {
        let start = self.pos;
        loop {
            match self.peek_byte() {
                b'\t' | b'\x0B' | b'\x0C' | b'\r' | b' ' => {
                    self.pos += 1;
                }
                b'\\' => {
                    if self.peek_byte_at(1) == b'\n' {
                        self.pos += 2;
                    } else if self.peek_byte_at(1) == b'\r' && self.peek_byte_at(2) == b'\n' {
                        self.pos += 3;
                    } else {
                        break;
                    }
                }
                b'#' => {
                    // The LF, if any, is left for the caller.
                    self.skip_line();
                }
                _ => {
                    break;
                }
            }
        }
        self.pos > start
    }

    /// Checks whether the `\n` at the current position is followed by a
    /// line starting with `.` or `&.`; if so, skips up to it.
    fn does_force_fold(&mut self) -> bool {
        let rollback = self.pos;
        self.pos += 1;
        loop {
            match self.peek_byte() {
                b'\t' | b'\x0B' | b'\x0C' | b'\r' | b' ' => {
                    self.pos += 1;
                }
                b'#' => {
                    self.skip_line();
                    if self.peek_byte() == b'\n' {
                        self.pos += 1;
                    }
                }
                _ => {
                    break;
                }
            }
        }
        let force_fold = match self.peek_byte() {
            b'.' => self.peek_byte_at(1) != b'.',
            b'&' => self.peek_byte_at(1) == b'.',
            _ => false,
        };
        if !force_fold {
            self.pos = rollback;
        }
        force_fold
    }

    // Stops before the next LF or EOF.
    fn skip_line(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos] != b'\n' {
            self.pos += 1;
        }
    }

    fn peek_space(&self) -> bool {
        is_space(self.peek_byte())
    }

    /// Length of the identifier character at `pos`, if there is one.
    /// Non-ASCII characters must be well-formed UTF-8.
    fn ident_char_len(&self, pos: usize) -> Option<usize> {
        let b = *self.src.get(pos)?;
        if b < 0x80 {
            return is_ident_continue(b).then_some(1);
        }
        let len = utf8_len(b);
        let bytes = self.src.get(pos..pos + len)?;
        std::str::from_utf8(bytes).ok().map(|_| len)
    }

    fn skip_ident_chars(&mut self) {
        while let Some(len) = self.ident_char_len(self.pos) {
            self.pos += len;
        }
    }

    /// Interns the name at `start..end`, keeping at most
    /// `token_buffer_max` bytes of it.
    fn intern_name(
        &self,
        diag: &mut Diagnostics,
        symbols: &mut dyn Interner,
        start: usize,
        end: usize,
        what: &str,
    ) -> Symbol {
        let name = &self.src[start..end];
        if name.len() <= self.token_buffer_max {
            return symbols.intern(name);
        }
        diag.warning(CodeRange { start, end }, format!("{what} too long (truncated)"));
        symbols.intern(&name[..self.token_buffer_max])
    }

    fn peek_byte(&self) -> u8 {
        self.src.get(self.pos).copied().unwrap_or(0)
    }

    fn peek_byte_at(&self, offset: usize) -> u8 {
        self.src.get(self.pos + offset).copied().unwrap_or(0)
    }

    fn is_beginning_of_line(&self, pos: usize) -> bool {
        pos == 0 || self.src[pos - 1] == b'\n'
    }

    fn is_end_of_line(&self, pos: usize) -> bool {
        pos == self.src.len()
            || self.src[pos] == b'\n'
            || (self.src[pos] == b'\r' && self.src.get(pos + 1).copied() == Some(b'\n'))
    }
}

fn is_space(b: u8) -> bool {
    matches!(b, b'\t' | b'\n' | b'\x0B' | b'\x0C' | b'\r' | b' ')
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

#[derive(Debug)]
struct Keyword {
    token: TokenKind,
    modifier: TokenKind,
    state: LexerState,
}

static KEYWORDS: LazyLock<HashMap<&'static [u8], Keyword>> = LazyLock::new(|| {
    use LexerState::*;
    use TokenKind::*;
    let kw = |token, state| Keyword {
        token,
        modifier: token,
        state,
    };
    let modifier = |token, modifier, state| Keyword {
        token,
        modifier,
        state,
    };
    HashMap::from_iter(vec![
        (
            &b"__ENCODING__"[..],
            kw(KeywordCapitalDoubleUnderscoreEncoding, End),
        ),
        (b"__LINE__", kw(KeywordCapitalDoubleUnderscoreLine, End)),
        // It requires an additional position check
        (b"__END__", kw(EOF, End)),
        (b"__FILE__", kw(KeywordCapitalDoubleUnderscoreFile, End)),
        (b"BEGIN", kw(KeywordCapitalBegin, End)),
        (b"END", kw(KeywordCapitalEnd, End)),
        (b"alias", kw(KeywordAlias, FName)),
        (b"and", kw(KeywordAnd, Value)),
        (b"begin", kw(KeywordBegin, Begin)),
        (b"break", kw(KeywordBreak, Mid)),
        (b"case", kw(KeywordCase, Value)),
        (b"class", kw(KeywordClass, Class)),
        (b"def", kw(KeywordDef, FName)),
        (b"defined?", kw(KeywordDefinedQ, Arg)),
        (b"do", kw(KeywordDo, Begin)),
        (b"else", kw(KeywordElse, Begin)),
        (b"elsif", kw(KeywordElsif, Value)),
        (b"end", kw(KeywordEnd, End)),
        (b"ensure", kw(KeywordEnsure, Begin)),
        (b"false", kw(KeywordFalse, End)),
        (b"for", kw(KeywordFor, Value)),
        (b"if", modifier(KeywordIf, KeywordIfInfix, Value)),
        (b"in", kw(KeywordIn, Value)),
        (b"module", kw(KeywordModule, Value)),
        (b"next", kw(KeywordNext, Mid)),
        (b"nil", kw(KeywordNil, End)),
        (b"not", kw(KeywordNot, Arg)),
        (b"or", kw(KeywordOr, Value)),
        (b"redo", kw(KeywordRedo, End)),
        (b"rescue", modifier(KeywordRescue, KeywordRescueInfix, Mid)),
        (b"retry", kw(KeywordRetry, End)),
        (b"return", kw(KeywordReturn, Mid)),
        (b"self", kw(KeywordSelf, End)),
        (b"super", kw(KeywordSuper, Arg)),
        (b"then", kw(KeywordThen, Begin)),
        (b"true", kw(KeywordTrue, End)),
        (b"undef", kw(KeywordUndef, FName)),
        (b"unless", modifier(KeywordUnless, KeywordUnlessInfix, Value)),
        (b"until", modifier(KeywordUntil, KeywordUntilInfix, Value)),
        (b"when", kw(KeywordWhen, Value)),
        (b"while", modifier(KeywordWhile, KeywordWhileInfix, Value)),
        (b"yield", kw(KeywordYield, Arg)),
    ])
});
