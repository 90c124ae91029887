//! Content Stream Text Extraction
//!
//! Walks the text operators of a decoded page content stream and emits one
//! [`TextBlock`] per show operator, positioned by the current text matrix.
//! Glyph widths are not known here, so consecutive show operators on the
//! same line share the line origin.
//!
//! Operators handled: `BT`, `ET`, `Tm`, `Td`, `TD`, `TL`, `T*`, `Tj`, `TJ`,
//! `'` and `"`. Everything else is ignored.

use lopdf::content::Operation;
use lopdf::Object;

use super::TextBlock;

/// TJ adjustments (thousandths of text space) more negative than this are
/// treated as a word gap.
const WORD_GAP_THRESHOLD: f32 = -200.0;

/// Affine text matrix `[a b c d e f]`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f32; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    /// Pre-multiply by a translation, as `Td` does with the line matrix.
    fn translated(&self, tx: f32, ty: f32) -> Matrix {
        let [a, b, c, d, e, f] = self.0;
        Matrix([a, b, c, d, e + tx * a + ty * c, f + tx * b + ty * d])
    }

    fn origin(&self) -> (f32, f32) {
        (self.0[4], self.0[5])
    }
}

/// Text state machine for one page
pub(crate) struct TextExtractor {
    page: u32,
    text_matrix: Matrix,
    line_matrix: Matrix,
    leading: f32,
    blocks: Vec<TextBlock>,
}

impl TextExtractor {
    pub(crate) fn new(page: u32) -> Self {
        Self {
            page,
            text_matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
            leading: 0.0,
            blocks: Vec::new(),
        }
    }

    pub(crate) fn run(mut self, operations: &[Operation]) -> Vec<TextBlock> {
        for op in operations {
            self.apply(op);
        }
        self.blocks
    }

    fn apply(&mut self, op: &Operation) {
        let operands = &op.operands;
        match op.operator.as_str() {
            "BT" => {
                self.text_matrix = Matrix::IDENTITY;
                self.line_matrix = Matrix::IDENTITY;
            }
            "Tm" => {
                if let Some(m) = numbers::<6>(operands) {
                    self.line_matrix = Matrix(m);
                    self.text_matrix = self.line_matrix;
                }
            }
            "Td" => {
                if let Some([tx, ty]) = numbers::<2>(operands) {
                    self.move_line(tx, ty);
                }
            }
            "TD" => {
                if let Some([tx, ty]) = numbers::<2>(operands) {
                    self.leading = -ty;
                    self.move_line(tx, ty);
                }
            }
            "TL" => {
                if let Some([leading]) = numbers::<1>(operands) {
                    self.leading = leading;
                }
            }
            "T*" => self.next_line(),
            "Tj" => {
                if let Some(text) = operands.first().and_then(decode_string) {
                    self.emit(text);
                }
            }
            "'" => {
                self.next_line();
                if let Some(text) = operands.first().and_then(decode_string) {
                    self.emit(text);
                }
            }
            "\"" => {
                self.next_line();
                if let Some(text) = operands.get(2).and_then(decode_string) {
                    self.emit(text);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    self.emit(decode_array(items));
                }
            }
            _ => {}
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = self.line_matrix.translated(tx, ty);
        self.text_matrix = self.line_matrix;
    }

    fn next_line(&mut self) {
        let leading = self.leading;
        self.move_line(0.0, -leading);
    }

    fn emit(&mut self, raw: String) {
        let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            return;
        }
        let (x, y) = self.text_matrix.origin();
        self.blocks.push(TextBlock {
            page: self.page,
            x: f64::from(x),
            y: f64::from(y),
            text,
        });
    }
}

fn numbers<const N: usize>(operands: &[Object]) -> Option<[f32; N]> {
    if operands.len() < N {
        return None;
    }
    let mut out = [0.0f32; N];
    for (slot, operand) in out.iter_mut().zip(operands) {
        *slot = operand.as_float().ok()?;
    }
    Some(out)
}

/// Decode a PDF string object: UTF-16BE when it carries a byte order mark,
/// otherwise one char per byte.
pub(crate) fn decode_string(object: &Object) -> Option<String> {
    match object {
        Object::String(bytes, _) => Some(decode_bytes(bytes)),
        _ => None,
    }
}

fn decode_bytes(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| char::from(b)).collect()
    }
}

fn decode_array(items: &[Object]) -> String {
    let mut text = String::new();
    for item in items {
        match item {
            Object::String(bytes, _) => text.push_str(&decode_bytes(bytes)),
            other => {
                if let Ok(adjust) = other.as_float() {
                    if adjust < WORD_GAP_THRESHOLD {
                        text.push(' ');
                    }
                }
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(operator: &str, operands: Vec<Object>) -> Operation {
        Operation::new(operator, operands)
    }

    #[test]
    fn test_td_positions_blocks() {
        let ops = vec![
            op("BT", vec![]),
            op("Td", vec![100.into(), 700.into()]),
            op("Tj", vec![Object::string_literal("Q1 16A")]),
            op("Td", vec![0.into(), (-20).into()]),
            op("Tj", vec![Object::string_literal("L1   10A ")]),
            op("ET", vec![]),
        ];
        let blocks = TextExtractor::new(1).run(&ops);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].text, "Q1 16A");
        assert_eq!((blocks[0].x, blocks[0].y), (100.0, 700.0));
        assert_eq!(blocks[1].text, "L1 10A");
        assert_eq!((blocks[1].x, blocks[1].y), (100.0, 680.0));
    }

    #[test]
    fn test_tm_and_next_line() {
        let ops = vec![
            op("BT", vec![]),
            op("Tm", vec![1.into(), 0.into(), 0.into(), 1.into(), 50.into(), 500.into()]),
            op("TL", vec![12.into()]),
            op("T*", vec![]),
            op("Tj", vec![Object::string_literal("T1 230V")]),
            op("ET", vec![]),
        ];
        let blocks = TextExtractor::new(2).run(&ops);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].page, 2);
        assert_eq!((blocks[0].x, blocks[0].y), (50.0, 488.0));
    }

    #[test]
    fn test_tj_array_word_gaps() {
        let array = Object::Array(vec![
            Object::string_literal("Q1"),
            Object::Integer(-250),
            Object::string_literal("16"),
            Object::Integer(-20),
            Object::string_literal("A"),
        ]);
        let blocks = TextExtractor::new(1).run(&[op("BT", vec![]), op("TJ", vec![array])]);
        assert_eq!(blocks[0].text, "Q1 16A");
    }

    #[test]
    fn test_utf16_strings() {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in "2,5mm²".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        let object = Object::String(bytes, lopdf::StringFormat::Hexadecimal);
        assert_eq!(decode_string(&object).as_deref(), Some("2,5mm²"));
    }

    #[test]
    fn test_whitespace_only_skipped() {
        let blocks = TextExtractor::new(1).run(&[
            op("BT", vec![]),
            op("Tj", vec![Object::string_literal("   ")]),
        ]);
        assert!(blocks.is_empty());
    }
}
