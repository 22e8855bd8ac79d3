//! Metadata tokens identifying entities in a module graph.
//!
//! Every type, field and method owned by a [`crate::metadata::module::Module`] carries a
//! [`Token`]: a 32-bit identity combining a table kind tag (top byte) with a 1-based row id
//! (lower three bytes). Tokens are allocated by the owning module when an entity is added and
//! stay stable across edits, which makes them usable as map keys for memoization.

use std::fmt;

use strum::Display;

/// The table kind encoded in a token's top byte.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// The module itself (one row per module)
    #[strum(serialize = "Module")]
    Module,
    /// A type definition
    #[strum(serialize = "TypeDef")]
    TypeDef,
    /// A field definition
    #[strum(serialize = "Field")]
    Field,
    /// A method definition
    #[strum(serialize = "MethodDef")]
    MethodDef,
}

impl TokenKind {
    /// The table tag byte for this kind.
    #[must_use]
    pub fn table(&self) -> u8 {
        match self {
            TokenKind::Module => 0x00,
            TokenKind::TypeDef => 0x02,
            TokenKind::Field => 0x04,
            TokenKind::MethodDef => 0x06,
        }
    }

    /// Decode a table tag byte, `None` for tables this graph does not model.
    #[must_use]
    pub fn from_table(table: u8) -> Option<TokenKind> {
        match table {
            0x00 => Some(TokenKind::Module),
            0x02 => Some(TokenKind::TypeDef),
            0x04 => Some(TokenKind::Field),
            0x06 => Some(TokenKind::MethodDef),
            _ => None,
        }
    }
}

/// A metadata token: table kind in the top byte, 1-based row id below.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u32);

impl Token {
    /// Create a `Token` from a raw 32-bit value.
    #[must_use]
    pub fn new(value: u32) -> Token {
        Token(value)
    }

    /// Create a token of the given kind and row.
    #[must_use]
    pub fn from_parts(kind: TokenKind, row: u32) -> Token {
        Token((u32::from(kind.table()) << 24) | (row & 0x00FF_FFFF))
    }

    /// A type-definition token with the given row id.
    #[must_use]
    pub fn type_def(row: u32) -> Token {
        Token::from_parts(TokenKind::TypeDef, row)
    }

    /// A field token with the given row id.
    #[must_use]
    pub fn field(row: u32) -> Token {
        Token::from_parts(TokenKind::Field, row)
    }

    /// A method-definition token with the given row id.
    #[must_use]
    pub fn method(row: u32) -> Token {
        Token::from_parts(TokenKind::MethodDef, row)
    }

    /// The raw 32-bit value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The table tag byte (top 8 bits).
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// The decoded table kind, `None` for tables this graph does not model.
    #[must_use]
    pub fn kind(&self) -> Option<TokenKind> {
        TokenKind::from_table(self.table())
    }

    /// The 1-based row id (lower 24 bits).
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// `true` when the row id is 0, which no allocated entity carries.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.row() == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "Token({}:{})", kind, self.row()),
            None => write!(f, "Token(0x{:08X})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_parts() {
        let token = Token::method(0x2A);
        assert_eq!(token.value(), 0x0600_002A);
        assert_eq!(token.table(), 0x06);
        assert_eq!(token.kind(), Some(TokenKind::MethodDef));
        assert_eq!(token.row(), 0x2A);
        assert!(!token.is_null());
    }

    #[test]
    fn null_token() {
        let token = Token::type_def(0);
        assert!(token.is_null());
        assert_eq!(token.kind(), Some(TokenKind::TypeDef));
    }

    #[test]
    fn row_masking() {
        let token = Token::from_parts(TokenKind::Field, 0xFF00_0001);
        assert_eq!(token.table(), 0x04);
        assert_eq!(token.row(), 1);
    }

    #[test]
    fn display_and_debug() {
        let token = Token::type_def(7);
        assert_eq!(format!("{token}"), "0x02000007");
        assert_eq!(format!("{token:?}"), "Token(TypeDef:7)");

        let unknown = Token::new(0x1B00_0001);
        assert_eq!(format!("{unknown:?}"), "Token(0x1B000001)");
    }

    #[test]
    fn ordering_follows_raw_value() {
        assert!(Token::type_def(1) < Token::type_def(2));
        assert!(Token::type_def(2) < Token::field(1));
    }
}
