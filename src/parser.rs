mod control;
mod definition;
mod expr;
mod lexer;
mod primary;
mod scope;
mod strings;
#[cfg(test)]
mod tests;

use std::fmt;
use std::io::{self, Write};

use tracing::{debug, warn};

use crate::ast::{Arena, ArenaExhausted, CodeRange, Node, NodeId, NodeKind};
use crate::diagnostic::{Diagnostic, Diagnostics};
use crate::symbol::{Interner, Symbol};

use lexer::{Lexer, LexerConfig, Token, TokenHead, TokenKind};
use scope::{ScopeKind, ScopeStack};

/// A piece of source handed over by the [MoreInput] callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputChunk {
    pub bytes: Vec<u8>,
    /// Names a new file; `None` continues the current one.
    pub filename: Option<String>,
}

/// Called when the input runs out while a construct is still open.
/// Returning `None` means the input really ended.
pub type MoreInput = Box<dyn FnMut() -> Option<InputChunk>>;

/// How to parse one compilation unit.
pub struct ParseOptions {
    /// Reported in diagnostics and by `__FILE__`; `"-"` when absent.
    pub filename: Option<String>,
    /// Line number of the first line.
    pub line: u32,
    /// Locals already defined by a previous chunk (e.g. an interactive
    /// session); they are visible at top level.
    pub locals: Vec<Symbol>,
    /// Collect diagnostics in the result instead of printing them.
    pub capture_errors: bool,
    pub error_limit: usize,
    pub warning_limit: usize,
    pub max_nesting_depth: usize,
    pub max_nodes: usize,
    /// Longest string or symbol content kept; longer text is truncated.
    pub token_buffer_max: usize,
    pub more_input: Option<MoreInput>,
    /// Where streamed diagnostics go. Defaults to stderr.
    pub diagnostic_writer: Option<Box<dyn Write>>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            filename: None,
            line: 1,
            locals: Vec::new(),
            capture_errors: false,
            error_limit: 10,
            warning_limit: 10,
            max_nesting_depth: 32,
            max_nodes: 1 << 22,
            token_buffer_max: 65536,
            more_input: None,
            diagnostic_writer: None,
        }
    }
}

impl fmt::Debug for ParseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseOptions")
            .field("filename", &self.filename)
            .field("line", &self.line)
            .field("locals", &self.locals)
            .field("capture_errors", &self.capture_errors)
            .field("error_limit", &self.error_limit)
            .field("warning_limit", &self.warning_limit)
            .field("max_nesting_depth", &self.max_nesting_depth)
            .field("max_nodes", &self.max_nodes)
            .field("token_buffer_max", &self.token_buffer_max)
            .field("more_input", &self.more_input.is_some())
            .field("diagnostic_writer", &self.diagnostic_writer.is_some())
            .finish()
    }
}

impl ParseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    pub fn with_locals(mut self, locals: impl IntoIterator<Item = Symbol>) -> Self {
        self.locals = locals.into_iter().collect();
        self
    }

    /// Switches to capture mode with the given per-severity limits.
    pub fn with_capture(mut self, error_limit: usize, warning_limit: usize) -> Self {
        self.capture_errors = true;
        self.error_limit = error_limit;
        self.warning_limit = warning_limit;
        self
    }

    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    pub fn with_token_buffer_max(mut self, len: usize) -> Self {
        self.token_buffer_max = len;
        self
    }

    pub fn with_more_input(mut self, more_input: MoreInput) -> Self {
        self.more_input = Some(more_input);
        self
    }

    pub fn with_diagnostic_writer(mut self, writer: Box<dyn Write>) -> Self {
        self.diagnostic_writer = Some(writer);
        self
    }
}

/// A problem that stops the parse altogether.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Arena(#[from] ArenaExhausted),
    #[error("nesting too deep (limit {limit})")]
    NestingTooDeep { limit: usize, pos: usize },
    /// A literal, heredoc or comment still open at the end of the input.
    #[error("{message}")]
    Unterminated { message: String, pos: usize },
}

impl ParseError {
    fn pos(&self) -> Option<usize> {
        match self {
            ParseError::Arena(_) => None,
            ParseError::NestingTooDeep { pos, .. } | ParseError::Unterminated { pos, .. } => {
                Some(*pos)
            }
        }
    }
}

pub(crate) type PResult<T> = Result<T, ParseError>;

#[derive(Debug)]
pub struct ParseResult {
    /// The root [NodeKind::Scope], or `None` after a fatal error.
    pub tree: Option<NodeId>,
    pub arena: Arena,
    /// Locals of the top-level scope, in declaration order.
    pub locals: Vec<Symbol>,
    pub error_count: usize,
    pub warning_count: usize,
    /// Captured diagnostics; empty in streaming mode.
    pub diagnostics: Vec<Diagnostic>,
    /// File names referenced by [Node::file] and [Diagnostic::file].
    pub files: Vec<String>,
    pub fatal: Option<ParseError>,
}

impl ParseResult {
    /// A tree was built and no error was reported.
    pub fn is_ok(&self) -> bool {
        self.tree.is_some() && self.error_count == 0
    }

    pub fn dump(&self, symbols: &dyn Interner) -> Option<String> {
        self.tree
            .map(|tree| crate::ast::dump(&self.arena, symbols, tree))
    }

    /// The smallest node whose range covers byte `pos`.
    pub fn node_at(&self, pos: usize) -> Option<NodeId> {
        self.tree?;
        self.arena
            .iter()
            .filter(|(_, node)| !node.range.is_dummy() && node.range.contains(pos))
            .min_by_key(|(_, node)| node.range.end - node.range.start)
            .map(|(id, _)| id)
    }
}

/// Parses `src` into a tree.
///
/// Recoverable problems are reported as diagnostics and leave
/// [NodeKind::Error] placeholders; only a [ParseError] discards the tree.
pub fn parse(src: &[u8], options: ParseOptions, symbols: &mut dyn Interner) -> ParseResult {
    let ParseOptions {
        filename,
        line,
        locals,
        capture_errors,
        error_limit,
        warning_limit,
        max_nesting_depth,
        max_nodes,
        token_buffer_max,
        more_input,
        diagnostic_writer,
    } = options;
    let mut diag = if capture_errors {
        Diagnostics::capturing(error_limit, warning_limit)
    } else {
        Diagnostics::streaming(diagnostic_writer.unwrap_or_else(|| Box::new(io::stderr())))
    };
    diag.source_map_mut()
        .add_chunk(0, src, filename.as_deref(), line);
    debug!(
        filename = filename.as_deref().unwrap_or("-"),
        len = src.len(),
        "parse start"
    );

    let lexer = Lexer::new(
        src.to_vec(),
        LexerConfig {
            max_nesting_depth,
            token_buffer_max,
            more_input,
        },
    );
    let mut parser = Parser::new(lexer, symbols, max_nodes, max_nesting_depth);
    for sym in locals {
        parser.scopes.declare(sym);
    }

    let (tree, fatal) = match parser.parse_program(&mut diag) {
        Ok(tree) => (Some(tree), None),
        Err(e) => {
            let pos = e.pos().unwrap_or_else(|| parser.lexer.pos());
            diag.error(CodeRange { start: pos, end: pos }, e.to_string());
            warn!(error = %e, "parse aborted");
            (None, Some(e))
        }
    };
    let locals = parser.scopes.current_locals().to_vec();
    let arena = parser.arena;
    debug!(
        nodes = arena.live_count(),
        errors = diag.error_count(),
        warnings = diag.warning_count(),
        "parse finish"
    );
    let files = diag.source_map().files().to_vec();
    ParseResult {
        tree,
        arena,
        locals,
        error_count: diag.error_count(),
        warning_count: diag.warning_count(),
        files,
        diagnostics: diag.into_records(),
        fatal,
    }
}

struct Parser<'s> {
    lexer: Lexer,
    symbols: &'s mut dyn Interner,
    arena: Arena,
    scopes: ScopeStack,
    next_token: Option<Token>,
    /// End of the last bumped token.
    last_end: usize,
    depth: usize,
    max_depth: usize,
    /// A `"str":` label was just parsed as an operand; holds the key.
    pending_label: Option<NodeId>,
}

impl<'s> Parser<'s> {
    fn new(lexer: Lexer, symbols: &'s mut dyn Interner, max_nodes: usize, max_depth: usize) -> Self {
        Self {
            lexer,
            symbols,
            arena: Arena::with_limit(max_nodes),
            scopes: ScopeStack::new(),
            next_token: None,
            last_end: 0,
            depth: 0,
            max_depth,
            pending_label: None,
        }
    }
}

impl Parser<'_> {
    fn parse_program(&mut self, diag: &mut Diagnostics) -> PResult<NodeId> {
        let mut stmts = Vec::new();
        loop {
            if let Some(body) = self.parse_stmts(diag)? {
                stmts.push(body);
            }
            let token = self.fill_token(diag)?;
            if token.kind == TokenKind::EOF {
                break;
            }
            // A closer with nothing to close.
            self.unexpected(diag, token, None);
            self.bump();
        }
        let body = match stmts.len() {
            0 => None,
            1 => Some(stmts[0]),
            _ => {
                let range = self.arena[stmts[0]].range | self.arena[stmts[stmts.len() - 1]].range;
                Some(self.alloc(diag, NodeKind::Stmts(stmts), range)?)
            }
        };
        let locals = self.scopes.current_locals().to_vec();
        let range = CodeRange {
            start: 0,
            end: self.last_end,
        };
        self.alloc(diag, NodeKind::Scope { locals, body }, range)
    }

    /// Parses statements up to a closing keyword, bracket or end of input.
    /// The closer is left for the caller.
    fn parse_stmts(&mut self, diag: &mut Diagnostics) -> PResult<Option<NodeId>> {
        let mut stmts = Vec::new();
        loop {
            let token = self.fill_token(diag)?;
            match token.kind {
                TokenKind::Newline | TokenKind::Semicolon => {
                    self.bump();
                    continue;
                }
                kind if is_stmts_end(kind) => break,
                _ => {}
            }
            let stmt = self.parse_stmt(diag)?;
            stmts.push(stmt);

            let token = self.fill_token(diag)?;
            match token.kind {
                TokenKind::Newline | TokenKind::Semicolon => {}
                kind if is_stmts_end(kind) => {}
                _ => {
                    self.unexpected(diag, token, None);
                    self.skip_to_stmt_end(diag)?;
                }
            }
        }
        Ok(match stmts.len() {
            0 => None,
            1 => Some(stmts[0]),
            _ => {
                let range = self.arena[stmts[0]].range | self.arena[stmts[stmts.len() - 1]].range;
                Some(self.alloc(diag, NodeKind::Stmts(stmts), range)?)
            }
        })
    }

    /// Error recovery: drops tokens until a statement boundary.
    fn skip_to_stmt_end(&mut self, diag: &mut Diagnostics) -> PResult<()> {
        loop {
            let token = self.fill_token(diag)?;
            match token.kind {
                TokenKind::Newline | TokenKind::Semicolon => return Ok(()),
                kind if is_stmts_end(kind) => return Ok(()),
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn fill_token(&mut self, diag: &mut Diagnostics) -> PResult<TokenHead> {
        let token = match self.next_token.take() {
            Some(token) => token,
            None => loop {
                let token = self
                    .lexer
                    .lex(diag, &mut *self.symbols, &self.scopes)?;
                if token.kind == TokenKind::HeredocBodies {
                    self.read_heredoc_bodies(diag)?;
                    continue;
                }
                break token;
            },
        };
        let head = token.head();
        self.next_token = Some(token);
        Ok(head)
    }

    fn bump(&mut self) -> Token {
        match self.next_token.take() {
            Some(token) => {
                self.last_end = token.range.end;
                token
            }
            None => panic!("bump: no token to bump"),
        }
    }

    /// Consumes the next token if it is `kind`.
    fn eat(&mut self, diag: &mut Diagnostics, kind: TokenKind) -> PResult<Option<Token>> {
        if self.fill_token(diag)?.kind == kind {
            Ok(Some(self.bump()))
        } else {
            Ok(None)
        }
    }

    /// Consumes `kind` or reports it missing. A closer or the end of input
    /// is left in place so the enclosing construct can see it.
    fn expect(&mut self, diag: &mut Diagnostics, kind: TokenKind, what: &str) -> PResult<CodeRange> {
        let token = self.fill_token(diag)?;
        if token.kind == kind {
            return Ok(self.bump().range);
        }
        self.unexpected(diag, token, Some(what));
        if !is_stmts_end(token.kind) && token.kind != TokenKind::Newline {
            self.bump();
        }
        Ok(CodeRange {
            start: token.range.start,
            end: token.range.start,
        })
    }

    fn expect_end(&mut self, diag: &mut Diagnostics) -> PResult<CodeRange> {
        self.expect(diag, TokenKind::KeywordEnd, "'end'")
    }

    fn skip_newlines(&mut self, diag: &mut Diagnostics) -> PResult<()> {
        while self.eat(diag, TokenKind::Newline)?.is_some() {}
        Ok(())
    }

    /// Skips the `then`/`do`-like separator after a condition: newlines,
    /// semicolons, and `keyword` if given.
    fn skip_then(&mut self, diag: &mut Diagnostics, keyword: TokenKind) -> PResult<()> {
        let mut seen = false;
        loop {
            let token = self.fill_token(diag)?;
            match token.kind {
                TokenKind::Newline | TokenKind::Semicolon => {
                    self.bump();
                    seen = true;
                }
                kind if kind == keyword => {
                    self.bump();
                    return Ok(());
                }
                _ => {
                    if !seen {
                        self.unexpected(diag, token, Some(&format!("{}", keyword)));
                    }
                    return Ok(());
                }
            }
        }
    }

    fn unexpected(&mut self, diag: &mut Diagnostics, token: TokenHead, expecting: Option<&str>) {
        let message = match expecting {
            Some(expecting) => format!(
                "syntax error, unexpected {}, expecting {}",
                token.kind, expecting
            ),
            None => format!("syntax error, unexpected {}", token.kind),
        };
        diag.error(token.range, message);
    }

    fn alloc(&mut self, diag: &Diagnostics, kind: NodeKind, range: CodeRange) -> PResult<NodeId> {
        let (file, line, _) = diag.source_map().locate(range.start);
        Ok(self.arena.alloc(Node {
            kind,
            range,
            line,
            file,
        })?)
    }

    fn range_of(&self, node: NodeId) -> CodeRange {
        self.arena[node].range
    }

    /// Runs `f` one nesting level deeper. Every recursive cycle of the
    /// grammar goes through here, so `max_depth` bounds the native stack.
    fn nested<T>(
        &mut self,
        pos: usize,
        f: impl FnOnce(&mut Self) -> PResult<T>,
    ) -> PResult<T> {
        if self.depth >= self.max_depth {
            return Err(ParseError::NestingTooDeep {
                limit: self.max_depth,
                pos,
            });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// A keyword block (`if`, `def`, `do`, ...) was opened. While any is
    /// open, running out of input asks for more.
    fn open_block(&mut self) {
        self.lexer.open_blocks += 1;
    }

    fn close_block(&mut self) {
        self.lexer.open_blocks = self.lexer.open_blocks.saturating_sub(1);
    }

    fn push_scope(&mut self, kind: ScopeKind) {
        self.scopes.push_scope(kind);
    }

    /// Pops the innermost scope and wraps `body` in its [NodeKind::Scope].
    fn pop_scope(&mut self, diag: &Diagnostics, body: Option<NodeId>, range: CodeRange) -> PResult<NodeId> {
        let locals = self.scopes.pop_scope();
        self.alloc(diag, NodeKind::Scope { locals, body }, range)
    }

    fn intern(&mut self, name: &[u8]) -> Symbol {
        self.symbols.intern(name)
    }
}

/// Tokens that close a statement list. The enclosing construct decides
/// whether the one it sees is the one it wanted.
fn is_stmts_end(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::EOF
            | TokenKind::KeywordEnd
            | TokenKind::KeywordElse
            | TokenKind::KeywordElsif
            | TokenKind::KeywordWhen
            | TokenKind::KeywordEnsure
            | TokenKind::KeywordRescue
            | TokenKind::KeywordThen
            | TokenKind::RParen
            | TokenKind::RBracket
            | TokenKind::RBrace
            | TokenKind::StringInterpolationEnd
    )
}
