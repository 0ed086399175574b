//! Byte offset ↔ line/column bookkeeping.
//!
//! The parser reports byte offsets; V8 reports UTF-16 offsets and source
//! maps use UTF-16 columns. For ASCII text all three agree.

/// Line table over a piece of code
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    code: &'a str,
    /// Byte offset of each line start
    line_starts: Vec<usize>,
    /// UTF-16 offset of each line start
    utf16_starts: Vec<u32>,
    ascii: bool,
}

impl<'a> LineIndex<'a> {
    /// Index the line starts of `code`
    #[must_use]
    pub fn new(code: &'a str) -> Self {
        let ascii = code.is_ascii();
        let mut line_starts = vec![0];
        let mut utf16_starts = vec![0];
        let mut utf16 = 0u32;
        for (i, c) in code.char_indices() {
            utf16 += c.len_utf16() as u32;
            if c == '\n' {
                line_starts.push(i + 1);
                utf16_starts.push(utf16);
            }
        }
        Self {
            code,
            line_starts,
            utf16_starts,
            ascii,
        }
    }

    fn line_of(&self, byte: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= byte).saturating_sub(1)
    }

    fn clamp(&self, byte: usize) -> usize {
        let mut byte = byte.min(self.code.len());
        while !self.code.is_char_boundary(byte) {
            byte -= 1;
        }
        byte
    }

    fn utf16_len(&self, from: usize, to: usize) -> u32 {
        if self.ascii {
            (to - from) as u32
        } else {
            self.code[from..to].encode_utf16().count() as u32
        }
    }

    /// 0-based line and UTF-16 column of a byte offset
    #[must_use]
    pub fn position(&self, byte: usize) -> (u32, u32) {
        let byte = self.clamp(byte);
        let line = self.line_of(byte);
        (line as u32, self.utf16_len(self.line_starts[line], byte))
    }

    /// UTF-16 offset of a byte offset, as V8 reports it
    #[must_use]
    pub fn utf16_offset(&self, byte: usize) -> u32 {
        let byte = self.clamp(byte);
        let line = self.line_of(byte);
        self.utf16_starts[line] + self.utf16_len(self.line_starts[line], byte)
    }
}

/// Byte offset of a UTF-16 offset in `code`, clamped to its length
#[must_use]
pub fn utf16_to_byte(code: &str, offset: u32) -> usize {
    if code.is_ascii() {
        return (offset as usize).min(code.len());
    }
    let mut utf16 = 0u32;
    for (i, c) in code.char_indices() {
        if utf16 >= offset {
            return i;
        }
        utf16 += c.len_utf16() as u32;
    }
    code.len()
}

/// UTF-16 offset of a byte offset in `code`
#[must_use]
pub fn byte_to_utf16(code: &str, byte: usize) -> u32 {
    LineIndex::new(code).utf16_offset(byte)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_positions() {
        let index = LineIndex::new("a();\nb();\n\nc();");
        assert_eq!(index.position(0), (0, 0));
        assert_eq!(index.position(6), (1, 1));
        assert_eq!(index.position(11), (3, 0));
        assert_eq!(index.utf16_offset(11), 11);
    }

    #[test]
    fn test_multibyte_columns_are_utf16() {
        // "é" is 2 bytes / 1 unit, "😀" is 4 bytes / 2 units
        let code = "x='é😀';\ny();";
        let index = LineIndex::new(code);
        let y = code.find('y').unwrap();
        assert_eq!(index.position(y), (1, 0));
        assert_eq!(index.utf16_offset(y), 9);
        let semi = code.find(';').unwrap();
        assert_eq!(index.position(semi), (0, 7));
    }

    #[test]
    fn test_utf16_round_trip() {
        let code = "a😀b\nc";
        for byte in [0, 1, 5, 6, 7] {
            let utf16 = byte_to_utf16(code, byte);
            assert_eq!(utf16_to_byte(code, utf16), byte);
        }
        assert_eq!(utf16_to_byte(code, 100), code.len());
    }

    #[test]
    fn test_offsets_past_end_are_clamped() {
        let index = LineIndex::new("ab");
        assert_eq!(index.position(10), (0, 2));
    }
}
