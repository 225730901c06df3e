use std::collections::HashMap;

use lsp_types::notification::{
    DidChangeTextDocument, DidCloseTextDocument, DidOpenTextDocument, Notification as _,
    PublishDiagnostics,
};
use lsp_types::request::HoverRequest;
use lsp_types::{
    Diagnostic, DiagnosticSeverity, Hover, HoverContents, HoverProviderCapability,
    InitializeParams, MarkedString, Position, PublishDiagnosticsParams, ServerCapabilities,
    TextDocumentContentChangeEvent, TextDocumentSyncCapability, TextDocumentSyncKind,
    TextDocumentSyncOptions, Uri,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use lsp_server::{Connection, ExtractError, Message, Notification, Request, RequestId, Response};
use rbfront::{parse, ParseOptions, ParseResult, Severity, SymbolTable};

fn main() -> Result<(), anyhow::Error> {
    // stdout carries the protocol.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    info!("starting rbfront language server");

    let (connection, io_threads) = Connection::stdio();

    let server_capabilities = serde_json::to_value(&ServerCapabilities {
        text_document_sync: Some(TextDocumentSyncCapability::Options(
            TextDocumentSyncOptions {
                open_close: Some(true),
                change: Some(TextDocumentSyncKind::FULL),
                ..Default::default()
            },
        )),
        hover_provider: Some(HoverProviderCapability::Simple(true)),
        ..Default::default()
    })?;
    let initialization_params = match connection.initialize(server_capabilities) {
        Ok(it) => it,
        Err(e) => {
            if e.channel_is_disconnected() {
                io_threads.join()?;
            }
            return Err(e.into());
        }
    };
    main_loop(connection, initialization_params)?;
    io_threads.join()?;

    info!("shutting down server");
    Ok(())
}

fn main_loop(connection: Connection, params: serde_json::Value) -> Result<(), anyhow::Error> {
    let _params: InitializeParams = serde_json::from_value(params)?;
    let mut documents: HashMap<Uri, String> = HashMap::new();
    for msg in &connection.receiver {
        match msg {
            Message::Request(req) => {
                if connection.handle_shutdown(&req)? {
                    return Ok(());
                }
                debug!(method = %req.method, "request");
                let req = match cast::<HoverRequest>(req) {
                    Ok((id, params)) => {
                        let position = params.text_document_position_params;
                        let result = documents
                            .get(&position.text_document.uri)
                            .and_then(|src| hover(src, position.position));
                        send_response(&connection, id, serde_json::to_value(&result)?)?;
                        continue;
                    }
                    Err(err @ ExtractError::JsonError { .. }) => {
                        warn!(error = ?err, "malformed hover request");
                        continue;
                    }
                    Err(ExtractError::MethodMismatch(req)) => req,
                };
                debug!(method = %req.method, "unhandled request");
            }
            Message::Response(resp) => {
                debug!(id = ?resp.id, "response");
            }
            Message::Notification(not) => {
                let not = match cast_n::<DidOpenTextDocument>(not) {
                    Ok(params) => {
                        let uri = params.text_document.uri;
                        publish_diagnostics(&connection, &uri, &params.text_document.text)?;
                        documents.insert(uri, params.text_document.text);
                        continue;
                    }
                    Err(err @ ExtractError::JsonError { .. }) => {
                        warn!(error = ?err, "malformed didOpen");
                        continue;
                    }
                    Err(ExtractError::MethodMismatch(not)) => not,
                };
                let not = match cast_n::<DidChangeTextDocument>(not) {
                    Ok(params) => {
                        let uri = params.text_document.uri;
                        let text = match params.content_changes.into_iter().last() {
                            Some(TextDocumentContentChangeEvent {
                                range: None, text, ..
                            }) => text,
                            _ => {
                                warn!("unsupported content change");
                                continue;
                            }
                        };
                        publish_diagnostics(&connection, &uri, &text)?;
                        documents.insert(uri, text);
                        continue;
                    }
                    Err(err @ ExtractError::JsonError { .. }) => {
                        warn!(error = ?err, "malformed didChange");
                        continue;
                    }
                    Err(ExtractError::MethodMismatch(not)) => not,
                };
                let not = match cast_n::<DidCloseTextDocument>(not) {
                    Ok(params) => {
                        documents.remove(&params.text_document.uri);
                        continue;
                    }
                    Err(err @ ExtractError::JsonError { .. }) => {
                        warn!(error = ?err, "malformed didClose");
                        continue;
                    }
                    Err(ExtractError::MethodMismatch(not)) => not,
                };
                debug!(method = %not.method, "unhandled notification");
            }
        }
    }
    Ok(())
}

fn parse_document(src: &str, symbols: &mut SymbolTable) -> ParseResult {
    parse(
        src.as_bytes(),
        ParseOptions::new().with_capture(100, 100),
        symbols,
    )
}

fn publish_diagnostics(connection: &Connection, uri: &Uri, src: &str) -> Result<(), anyhow::Error> {
    let mut symbols = SymbolTable::new();
    let result = parse_document(src, &mut symbols);
    let index = LineIndex::new(src);
    let diagnostics = result
        .diagnostics
        .iter()
        .map(|d| Diagnostic {
            range: lsp_types::Range {
                start: index.position(d.range.start),
                end: index.position(d.range.end.max(d.range.start)),
            },
            severity: Some(match d.severity {
                Severity::Error => DiagnosticSeverity::ERROR,
                Severity::Warning => DiagnosticSeverity::WARNING,
            }),
            message: d.message.clone(),
            ..Default::default()
        })
        .collect::<Vec<_>>();
    debug!(
        errors = result.error_count,
        warnings = result.warning_count,
        "publishing diagnostics"
    );
    connection.sender.send(Message::Notification(Notification {
        method: PublishDiagnostics::METHOD.to_owned(),
        params: serde_json::to_value(PublishDiagnosticsParams {
            uri: uri.clone(),
            diagnostics,
            version: None,
        })?,
    }))?;
    Ok(())
}

/// The dump of the innermost node under the cursor.
fn hover(src: &str, position: Position) -> Option<Hover> {
    let mut symbols = SymbolTable::new();
    let result = parse_document(src, &mut symbols);
    let index = LineIndex::new(src);
    let offset = index.offset(position)?;
    let node = result.node_at(offset)?;
    let range = result.arena[node].range;
    Some(Hover {
        contents: HoverContents::Scalar(MarkedString::String(rbfront::ast::dump(
            &result.arena,
            &symbols,
            node,
        ))),
        range: Some(lsp_types::Range {
            start: index.position(range.start),
            end: index.position(range.end),
        }),
    })
}

fn send_response(
    connection: &Connection,
    id: RequestId,
    result: serde_json::Value,
) -> Result<(), anyhow::Error> {
    connection.sender.send(Message::Response(Response {
        id,
        result: Some(result),
        error: None,
    }))?;
    Ok(())
}

/// Converts between byte offsets and LSP positions, whose columns count
/// UTF-16 code units.
struct LineIndex<'a> {
    src: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(src: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(src.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { src, line_starts }
    }

    fn position(&self, offset: usize) -> Position {
        let offset = offset.min(self.src.len());
        let line = self.line_starts.partition_point(|&start| start <= offset) - 1;
        let mut start = self.line_starts[line];
        let mut end = offset;
        while !self.src.is_char_boundary(end) {
            end -= 1;
        }
        start = start.min(end);
        let character = self.src[start..end].encode_utf16().count();
        Position {
            line: line as u32,
            character: character as u32,
        }
    }

    fn offset(&self, position: Position) -> Option<usize> {
        let start = *self.line_starts.get(position.line as usize)?;
        let line_end = self
            .line_starts
            .get(position.line as usize + 1)
            .copied()
            .unwrap_or(self.src.len());
        let mut units = 0;
        for (i, c) in self.src[start..line_end].char_indices() {
            if units >= position.character as usize {
                return Some(start + i);
            }
            units += c.len_utf16();
        }
        Some(line_end)
    }
}

fn cast<R>(req: Request) -> Result<(RequestId, R::Params), ExtractError<Request>>
where
    R: lsp_types::request::Request,
    R::Params: serde::de::DeserializeOwned,
{
    req.extract(R::METHOD)
}

fn cast_n<N>(not: Notification) -> Result<N::Params, ExtractError<Notification>>
where
    N: lsp_types::notification::Notification,
    N::Params: serde::de::DeserializeOwned,
{
    not.extract(N::METHOD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_index_utf16() {
        let index = LineIndex::new("a\n\u{1F600}b\n");
        assert_eq!(index.position(0), Position::new(0, 0));
        assert_eq!(index.position(2), Position::new(1, 0));
        assert_eq!(index.position(6), Position::new(1, 2));
        assert_eq!(index.offset(Position::new(1, 2)), Some(6));
        assert_eq!(index.offset(Position::new(5, 0)), None);
    }

    #[test]
    fn test_hover_dumps_innermost_node() {
        let hover = hover("x = 1 + 2\n", Position::new(0, 8)).map(|h| h.contents);
        assert_eq!(
            hover,
            Some(HoverContents::Scalar(MarkedString::String("(int 2)".to_owned())))
        );
    }
}
