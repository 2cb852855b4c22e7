use crate::position::{FileId, Position, Span};
use std::sync::Arc;

pub type SourceId = FileId;

/// One loaded program text with a precomputed line table.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub id: SourceId,
    pub name: Arc<str>,
    pub text: Arc<str>,
    line_starts: Arc<Vec<usize>>,
}

impl SourceFile {
    pub fn new(id: SourceId, name: impl Into<Arc<str>>, text: impl Into<Arc<str>>) -> Self {
        let text = text.into();
        let mut line_starts = Vec::with_capacity(text.len() / 32 + 1);
        line_starts.push(0);
        for (idx, ch) in text.char_indices() {
            if ch == '\n' {
                line_starts.push(idx + 1);
            }
        }
        Self {
            id,
            name: name.into(),
            text,
            line_starts: Arc::new(line_starts),
        }
    }

    /// A file that is not registered in any map, used for expression fragments.
    pub fn fragment(text: impl Into<Arc<str>>) -> Self {
        Self::new(FileId::new(u32::MAX), "<fragment>", text)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    #[inline]
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    pub fn position(&self, offset: usize) -> Position {
        let line_index = match self.line_starts.binary_search(&offset) {
            Ok(exact) => exact,
            Err(insert) => insert - 1,
        };
        let line_offset = self.line_starts[line_index];
        let column = self.text[line_offset..offset].chars().count() as u32 + 1;
        Position::new(line_index as u32 + 1, column, offset)
    }

    pub fn span(&self, start: usize, end: usize) -> Span {
        Span::new(self.id, self.position(start), self.position(end))
    }

    /// Text of a 1-based line without its terminator. Out of range lines are empty.
    pub fn line_text(&self, line: u32) -> &str {
        if line == 0 {
            return "";
        }
        let index = line as usize - 1;
        let Some(&start) = self.line_starts.get(index) else {
            return "";
        };
        let end = self
            .line_starts
            .get(index + 1)
            .map(|next| next - 1)
            .unwrap_or(self.text.len());
        self.text[start..end].trim_end_matches('\r')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_text_strips_terminators() {
        let file = SourceFile::new(FileId::new(0), "t", "a = 1\r\nb\n\nlast");
        assert_eq!(file.line_text(1), "a = 1");
        assert_eq!(file.line_text(2), "b");
        assert_eq!(file.line_text(3), "");
        assert_eq!(file.line_text(4), "last");
        assert_eq!(file.line_text(9), "");
    }

    #[test]
    fn positions_are_one_based() {
        let file = SourceFile::new(FileId::new(0), "t", "ab\ncd");
        let pos = file.position(4);
        assert_eq!((pos.line, pos.column), (2, 2));
    }
}
