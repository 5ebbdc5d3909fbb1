//! Attribute-usage scanner for kernel source text.
//!
//! Finds accessor calls of the shape `<pin>_{Get|Set}<Type>( ... 'name' ... )`
//! and reports the pin, verb, element type, attribute name and the 1-based
//! source position. This is a restricted single-purpose tokenizer, not a
//! general parser: it understands identifiers, comments and balanced
//! parentheses, nothing more. Calls without a quoted name are intrinsic
//! accessors and are not usages.

use crate::codec::attrs::AttributeType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageVerb {
    Get,
    Set,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeUsage {
    pub pin: String,
    pub verb: UsageVerb,
    pub ty: AttributeType,
    pub name: String,
    pub line: u32,
    pub column: u32,
    /// Byte range of the quoted name (quotes included), for substitution.
    pub name_span: (usize, usize),
}

// Longest-first so Float does not shadow Float2/3/4.
const TYPE_TOKENS: [&str; 9] = [
    "Transform", "Rotator", "Float4", "Float3", "Float2", "Float", "Quat", "Bool", "Int",
];

/// Split an identifier into (pin, verb, type) if it has the accessor shape.
fn split_accessor(ident: &str) -> Option<(&str, UsageVerb, AttributeType)> {
    for token in TYPE_TOKENS {
        let Some(stem) = ident.strip_suffix(token) else {
            continue;
        };
        let (rest, verb) = if let Some(rest) = stem.strip_suffix("_Get") {
            (rest, UsageVerb::Get)
        } else if let Some(rest) = stem.strip_suffix("_Set") {
            (rest, UsageVerb::Set)
        } else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        let ty = AttributeType::from_token(token)?;
        return Some((rest, verb, ty));
    }
    None
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(byte)
    }

    fn skip_comment(&mut self) -> bool {
        match (self.peek(), self.peek_at(1)) {
            (Some(b'/'), Some(b'/')) => {
                while let Some(byte) = self.peek() {
                    if byte == b'\n' {
                        break;
                    }
                    self.bump();
                }
                true
            }
            (Some(b'/'), Some(b'*')) => {
                self.bump();
                self.bump();
                while self.pos < self.bytes.len() {
                    if self.peek() == Some(b'*') && self.peek_at(1) == Some(b'/') {
                        self.bump();
                        self.bump();
                        break;
                    }
                    self.bump();
                }
                true
            }
            _ => false,
        }
    }
}

fn is_ident_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

fn is_ident_continue(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// Look ahead from an accessor identifier for `( ... 'name' ... )` and return
/// the name with its byte span. Does not advance the cursor.
fn quoted_name_in_call(cursor: &Cursor<'_>) -> Option<(String, (usize, usize))> {
    let bytes = cursor.bytes;
    let mut pos = cursor.pos;
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    if bytes.get(pos) != Some(&b'(') {
        return None;
    }
    pos += 1;
    let mut depth = 1usize;
    while pos < bytes.len() && depth > 0 {
        match bytes[pos] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b'\'' => {
                let start = pos;
                pos += 1;
                let name_start = pos;
                while pos < bytes.len() && bytes[pos] != b'\'' && bytes[pos] != b'\n' {
                    pos += 1;
                }
                if bytes.get(pos) != Some(&b'\'') {
                    return None;
                }
                let name = String::from_utf8_lossy(&bytes[name_start..pos]).into_owned();
                return Some((name, (start, pos + 1)));
            }
            _ => {}
        }
        pos += 1;
    }
    None
}

/// Scan kernel source for attribute accessor calls, in source order.
pub fn scan_attribute_usages(source: &str) -> Vec<AttributeUsage> {
    let mut usages = Vec::new();
    let mut cursor = Cursor::new(source);

    while let Some(byte) = cursor.peek() {
        if cursor.skip_comment() {
            continue;
        }
        if !is_ident_start(byte) {
            cursor.bump();
            continue;
        }

        let start = cursor.pos;
        let line = cursor.line;
        let column = cursor.column;
        while cursor.peek().is_some_and(is_ident_continue) {
            cursor.bump();
        }
        let ident = &source[start..cursor.pos];

        let Some((pin, verb, ty)) = split_accessor(ident) else {
            continue;
        };
        let Some((name, name_span)) = quoted_name_in_call(&cursor) else {
            continue;
        };
        usages.push(AttributeUsage {
            pin: pin.to_string(),
            verb,
            ty,
            name,
            line,
            column,
            name_span,
        });
    }

    usages
}
