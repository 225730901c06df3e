use std::fmt;
use std::io::{self, Write};

use crate::ast::CodeRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

/// A lexical, syntactic or semantic problem found while parsing.
///
/// `line` and `column` are 1-based; `column` counts bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Diagnostic {
    pub severity: Severity,
    pub range: CodeRange,
    pub file: u16,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Error => write!(f, "{}:{}: {}", self.line, self.column, self.message),
            Severity::Warning => write!(
                f,
                "{}:{}: warning: {}",
                self.line, self.column, self.message
            ),
        }
    }
}

/// Maps byte offsets of the (possibly multi-chunk) input to file, line and column.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    files: Vec<String>,
    segments: Vec<Segment>,
    line_starts: Vec<usize>,
    open_line: bool,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    offset: usize,
    file: u16,
    first_line: u32,
    first_line_index: usize,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `bytes` appended at `offset`.
    ///
    /// A chunk naming a different file starts over at `line`; a chunk without a
    /// name continues the current file.
    pub fn add_chunk(&mut self, offset: usize, bytes: &[u8], filename: Option<&str>, line: u32) {
        let current = self.segments.last().map(|seg| seg.file);
        let file = match (filename, current) {
            (None, Some(file)) => Some(file),
            (Some(name), Some(file)) if self.files[file as usize] == name => Some(file),
            _ => None,
        };
        match file {
            Some(_) => {
                if !self.open_line {
                    self.line_starts.push(offset);
                }
            }
            None => {
                let name = filename.unwrap_or("-").to_owned();
                let file = match self.files.iter().position(|f| *f == name) {
                    Some(idx) => idx as u16,
                    None => {
                        self.files.push(name);
                        (self.files.len() - 1) as u16
                    }
                };
                self.segments.push(Segment {
                    offset,
                    file,
                    first_line: line,
                    first_line_index: self.line_starts.len(),
                });
                self.line_starts.push(offset);
            }
        }
        for (i, &b) in bytes.iter().enumerate() {
            if b == b'\n' && i + 1 < bytes.len() {
                self.line_starts.push(offset + i + 1);
            }
        }
        if let Some(&last) = bytes.last() {
            self.open_line = last != b'\n';
        }
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn file_name(&self, file: u16) -> &str {
        self.files.get(file as usize).map_or("-", |s| s.as_str())
    }

    /// Returns `(file, line, column)` of `pos`.
    pub fn locate(&self, pos: usize) -> (u16, u32, u32) {
        if self.segments.is_empty() {
            return (0, 1, pos as u32 + 1);
        }
        let seg_idx = self.segments.partition_point(|seg| seg.offset <= pos);
        let seg = &self.segments[seg_idx.max(1) - 1];
        let line_idx = self.line_starts.partition_point(|&start| start <= pos);
        let line_idx = (line_idx.max(1) - 1).max(seg.first_line_index);
        let line = seg.first_line + (line_idx - seg.first_line_index) as u32;
        let column = pos.saturating_sub(self.line_starts[line_idx]) as u32 + 1;
        (seg.file, line, column)
    }

    pub fn line_of(&self, pos: usize) -> u32 {
        self.locate(pos).1
    }
}

/// The diagnostics sink.
///
/// In streaming mode every report is written out immediately and only
/// counted. In capture mode reports are stored until the per-severity limit
/// is reached; later ones are counted but dropped.
pub struct Diagnostics {
    capture: bool,
    error_limit: usize,
    warning_limit: usize,
    error_count: usize,
    warning_count: usize,
    captured_errors: usize,
    captured_warnings: usize,
    records: Vec<Diagnostic>,
    writer: Box<dyn Write>,
    source_map: SourceMap,
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("capture", &self.capture)
            .field("error_count", &self.error_count)
            .field("warning_count", &self.warning_count)
            .field("records", &self.records)
            .finish_non_exhaustive()
    }
}

impl Diagnostics {
    pub fn streaming(writer: Box<dyn Write>) -> Self {
        Self {
            capture: false,
            error_limit: 0,
            warning_limit: 0,
            error_count: 0,
            warning_count: 0,
            captured_errors: 0,
            captured_warnings: 0,
            records: Vec::new(),
            writer,
            source_map: SourceMap::new(),
        }
    }

    pub fn capturing(error_limit: usize, warning_limit: usize) -> Self {
        Self {
            capture: true,
            error_limit,
            warning_limit,
            ..Self::streaming(Box::new(io::sink()))
        }
    }

    pub fn source_map(&self) -> &SourceMap {
        &self.source_map
    }

    pub fn source_map_mut(&mut self) -> &mut SourceMap {
        &mut self.source_map
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn records(&self) -> &[Diagnostic] {
        &self.records
    }

    pub fn error(&mut self, range: CodeRange, message: impl Into<String>) {
        self.report(Severity::Error, range, message.into());
    }

    pub fn warning(&mut self, range: CodeRange, message: impl Into<String>) {
        self.report(Severity::Warning, range, message.into());
    }

    fn report(&mut self, severity: Severity, range: CodeRange, message: String) {
        let (file, line, column) = self.source_map.locate(range.start);
        let diag = Diagnostic {
            severity,
            range,
            file,
            line,
            column,
            message,
        };
        match severity {
            Severity::Error => self.error_count += 1,
            Severity::Warning => self.warning_count += 1,
        }
        if self.capture {
            let (captured, limit) = match severity {
                Severity::Error => (&mut self.captured_errors, self.error_limit),
                Severity::Warning => (&mut self.captured_warnings, self.warning_limit),
            };
            if *captured < limit {
                *captured += 1;
                self.records.push(diag);
            }
        } else {
            let name = self.source_map.file_name(file);
            let _ = writeln!(self.writer, "{}:{}", name, diag);
        }
    }

    pub fn into_records(self) -> Vec<Diagnostic> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn range(start: usize, end: usize) -> CodeRange {
        CodeRange { start, end }
    }

    #[test]
    fn test_locate_lines_and_columns() {
        let mut map = SourceMap::new();
        map.add_chunk(0, b"ab\ncd\n\nef", Some("a.rb"), 1);
        assert_eq!(map.locate(0), (0, 1, 1));
        assert_eq!(map.locate(1), (0, 1, 2));
        assert_eq!(map.locate(3), (0, 2, 1));
        assert_eq!(map.locate(6), (0, 3, 1));
        assert_eq!(map.locate(8), (0, 4, 2));
    }

    #[test]
    fn test_locate_with_starting_line() {
        let mut map = SourceMap::new();
        map.add_chunk(0, b"x\ny", None, 10);
        assert_eq!(map.locate(2), (0, 11, 1));
        assert_eq!(map.file_name(0), "-");
    }

    #[test]
    fn test_locate_across_chunks() {
        let mut map = SourceMap::new();
        map.add_chunk(0, b"foo(\n", Some("a.rb"), 1);
        map.add_chunk(5, b"1)\n", None, 1);
        map.add_chunk(8, b"bar\n", Some("b.rb"), 1);
        assert_eq!(map.locate(5), (0, 2, 1));
        assert_eq!(map.locate(6), (0, 2, 2));
        assert_eq!(map.locate(9), (1, 1, 2));
        assert_eq!(map.files(), &["a.rb".to_owned(), "b.rb".to_owned()]);
    }

    #[test]
    fn test_capture_limit_keeps_counting() {
        let mut diag = Diagnostics::capturing(2, 1);
        diag.source_map_mut().add_chunk(0, b"abcdef", None, 1);
        for i in 0..5 {
            diag.error(range(i, i + 1), format!("e{}", i));
        }
        diag.warning(range(0, 1), "w0");
        diag.warning(range(1, 2), "w1");
        assert_eq!(diag.error_count(), 5);
        assert_eq!(diag.warning_count(), 2);
        let messages = diag
            .records()
            .iter()
            .map(|d| d.message.as_str())
            .collect::<Vec<_>>();
        assert_eq!(messages, vec!["e0", "e1", "w0"]);
        assert_eq!(diag.records()[1].column, 2);
    }

    #[test]
    fn test_streaming_prints_and_stores_nothing() {
        let buf = SharedBuf::default();
        let mut diag = Diagnostics::streaming(Box::new(buf.clone()));
        diag.source_map_mut()
            .add_chunk(0, b"x = 1\ny = $\n", Some("t.rb"), 1);
        diag.error(range(10, 11), "syntax error");
        diag.warning(range(0, 1), "unused");
        assert_eq!(diag.records(), &[]);
        assert_eq!(diag.error_count(), 1);
        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(out, "t.rb:2:5: syntax error\nt.rb:1:1: warning: unused\n");
    }
}
