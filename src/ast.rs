mod arena;
mod dump;
mod node;

use std::fmt;
use std::ops::{BitOr, BitOrAssign, Range};

pub use arena::{Arena, ArenaExhausted};
pub use dump::dump;
pub use node::{HashEntry, Node, NodeId, NodeKind, Params};

/// Byte range in the parser's input buffer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeRange {
    pub start: usize,
    pub end: usize,
}
impl CodeRange {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
    pub fn is_dummy(&self) -> bool {
        self.start > self.end
    }
    pub fn contains(&self, pos: usize) -> bool {
        self.start <= pos && pos <= self.end
    }
}
impl fmt::Debug for CodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == DUMMY_RANGE {
            write!(f, "DUMMY_RANGE")
        } else {
            write!(f, "{}..{}", self.start, self.end)
        }
    }
}
impl From<Range<usize>> for CodeRange {
    fn from(range: Range<usize>) -> Self {
        CodeRange {
            start: range.start,
            end: range.end,
        }
    }
}
impl From<CodeRange> for Range<usize> {
    fn from(range: CodeRange) -> Self {
        range.start..range.end
    }
}
pub const DUMMY_RANGE: CodeRange = CodeRange { start: 1, end: 0 };

impl BitOr for CodeRange {
    type Output = CodeRange;
    fn bitor(self, rhs: Self) -> Self::Output {
        if rhs.is_dummy() {
            self
        } else if self.is_dummy() {
            rhs
        } else {
            CodeRange {
                start: self.start.min(rhs.start),
                end: self.end.max(rhs.end),
            }
        }
    }
}
impl BitOrAssign for CodeRange {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

/// Range of the `idx`-th occurrence of `sub_text`.
#[cfg(test)]
pub(crate) fn pos_in<T, U>(all_text: T, sub_text: U, mut idx: usize) -> CodeRange
where
    T: AsRef<[u8]>,
    U: AsRef<[u8]>,
{
    let all_text: &[u8] = all_text.as_ref();
    let sub_text: &[u8] = sub_text.as_ref();
    let mut i = 0;
    while i + sub_text.len() <= all_text.len() {
        if all_text[i..i + sub_text.len()] == *sub_text {
            if idx == 0 {
                return CodeRange {
                    start: i,
                    end: i + sub_text.len(),
                };
            }
            idx -= 1;
        }
        i += 1;
    }
    DUMMY_RANGE
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_range_union() {
        let a = CodeRange { start: 3, end: 5 };
        let b = CodeRange { start: 1, end: 4 };
        assert_eq!(a | b, CodeRange { start: 1, end: 5 });
        assert_eq!(a | DUMMY_RANGE, a);
        assert_eq!(DUMMY_RANGE | b, b);
    }

    #[test]
    fn test_pos_in() {
        assert_eq!(pos_in("a + a", "a", 1), CodeRange { start: 4, end: 5 });
        assert_eq!(pos_in("a + a", "b", 0), DUMMY_RANGE);
    }
}
