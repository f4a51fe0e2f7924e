//! Byte spans into source text.

/// A half-open byte range `[start, end)` into a source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `[start, end)` lies entirely inside this span.
    pub fn covers(&self, start: usize, end: usize) -> bool {
        self.start <= start && end <= self.end
    }

    /// Move both ends by `delta` bytes.
    pub fn shifted(&self, delta: isize) -> Span {
        Span {
            start: offset_by(self.start, delta),
            end: offset_by(self.end, delta),
        }
    }

    /// Move only the end by `delta` bytes.
    pub fn stretched(&self, delta: isize) -> Span {
        Span {
            start: self.start,
            end: offset_by(self.end, delta),
        }
    }
}

fn offset_by(value: usize, delta: isize) -> usize {
    value.saturating_add_signed(delta)
}

/// 1-based line and column (in characters) of a byte offset.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |idx| idx + 1);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_line_and_column() {
        let src = "a = 1 ;\nbb = 22 ;";
        assert_eq!(line_col(src, 0), (1, 1));
        assert_eq!(line_col(src, 8), (2, 1));
        assert_eq!(line_col(src, 13), (2, 6));
    }

    #[test]
    fn shifts_and_stretches() {
        let span = Span::new(4, 6);
        assert_eq!(span.shifted(3), Span::new(7, 9));
        assert_eq!(span.stretched(-1), Span::new(4, 5));
        assert!(span.covers(4, 6));
        assert!(!span.covers(3, 5));
    }
}
