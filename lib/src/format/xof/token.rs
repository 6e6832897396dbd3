use std::io::Cursor;

use strum::FromRepr;
use uuid::Uuid;
use zerocopy::LittleEndian;

use crate::{
    bail_data, ensure_data,
    error::ImportError,
    format::xof::FloatSize,
    util::read::{read_bytes, read_f32, read_f64, read_u16, read_u32},
};

/// One lexical token. Text and binary files both lex into this.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Name(String),
    String(String),
    Integer(u32),
    Float(f64),
    Guid(Uuid),
    OBrace,
    CBrace,
    OParen,
    CParen,
    OBracket,
    CBracket,
    OAngle,
    CAngle,
    Dot,
    Comma,
    Semicolon,
    Template,
    Array,
    Primitive(PrimitiveType),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PrimitiveType {
    Word,
    DWord,
    Float,
    Double,
    Char,
    UChar,
    SWord,
    SDWord,
    Void,
    String,
    Unicode,
    CString,
}

impl PrimitiveType {
    pub fn from_keyword(word: &str) -> Option<Self> {
        Some(match word {
            "WORD" => Self::Word,
            "DWORD" => Self::DWord,
            "FLOAT" => Self::Float,
            "DOUBLE" => Self::Double,
            "CHAR" => Self::Char,
            "UCHAR" | "BYTE" => Self::UChar,
            "SWORD" => Self::SWord,
            "SDWORD" => Self::SDWord,
            "VOID" => Self::Void,
            "STRING" | "LPSTR" => Self::String,
            "UNICODE" => Self::Unicode,
            "CSTRING" => Self::CString,
            _ => return None,
        })
    }

    #[inline]
    pub fn is_string(self) -> bool { matches!(self, Self::String | Self::Unicode | Self::CString) }
}

/// Binary token ids.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromRepr)]
#[repr(u16)]
enum BinaryToken {
    Name = 1,
    String = 2,
    Integer = 3,
    Guid = 5,
    IntegerList = 6,
    FloatList = 7,
    OBrace = 10,
    CBrace = 11,
    OParen = 12,
    CParen = 13,
    OBracket = 14,
    CBracket = 15,
    OAngle = 16,
    CAngle = 17,
    Dot = 18,
    Comma = 19,
    Semicolon = 20,
    Template = 31,
    Word = 40,
    DWord = 41,
    Float = 42,
    Double = 43,
    Char = 44,
    UChar = 45,
    SWord = 46,
    SDWord = 47,
    Void = 48,
    LpStr = 49,
    Unicode = 50,
    CString = 51,
    Array = 52,
}

/// Lexes a binary token stream. Integer and float lists are flattened into
/// one token per value.
pub fn tokenize_binary(data: &[u8], float_size: FloatSize) -> Result<Vec<Token>, ImportError> {
    let mut tokens = Vec::new();
    let mut r = Cursor::new(data);
    let remaining = |r: &Cursor<&[u8]>| data.len() - r.position() as usize;
    while remaining(&r) > 0 {
        let pos = r.position();
        if remaining(&r) < 2 || data[pos as usize..].iter().all(|&b| b == 0) {
            // Some writers pad the stream to a DWORD boundary.
            break;
        }
        let id = read_u16::<LittleEndian, _>(&mut r)?;
        let Some(kind) = BinaryToken::from_repr(id) else {
            bail_data!("Unknown binary token {id:#X} at {:#X}", pos);
        };
        let token = match kind {
            BinaryToken::Name => {
                let len = read_u32::<LittleEndian, _>(&mut r)? as usize;
                ensure_data!(len <= remaining(&r), "Name at {pos:#X} overruns the stream");
                Token::Name(String::from_utf8_lossy(&read_bytes(&mut r, len)?).into_owned())
            }
            BinaryToken::String => {
                let len = read_u32::<LittleEndian, _>(&mut r)? as usize;
                ensure_data!(len <= remaining(&r), "String at {pos:#X} overruns the stream");
                let bytes = read_bytes(&mut r, len)?;
                // Writers may include the terminator in the length.
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                tokens.push(Token::String(String::from_utf8_lossy(&bytes[..end]).into_owned()));
                match BinaryToken::from_repr(read_u16::<LittleEndian, _>(&mut r)?) {
                    Some(BinaryToken::Semicolon) => Token::Semicolon,
                    Some(BinaryToken::Comma) => Token::Comma,
                    other => bail_data!("String at {pos:#X} terminated by {other:?}"),
                }
            }
            BinaryToken::Integer => Token::Integer(read_u32::<LittleEndian, _>(&mut r)?),
            BinaryToken::Guid => {
                let d1 = read_u32::<LittleEndian, _>(&mut r)?;
                let d2 = read_u16::<LittleEndian, _>(&mut r)?;
                let d3 = read_u16::<LittleEndian, _>(&mut r)?;
                let mut d4 = [0u8; 8];
                d4.copy_from_slice(&read_bytes(&mut r, 8)?);
                Token::Guid(Uuid::from_fields(d1, d2, d3, &d4))
            }
            BinaryToken::IntegerList => {
                let count = read_u32::<LittleEndian, _>(&mut r)? as usize;
                ensure_data!(
                    count.checked_mul(4).map_or(false, |n| n <= remaining(&r)),
                    "Integer list of {count} at {pos:#X} overruns the stream"
                );
                for _ in 0..count {
                    tokens.push(Token::Integer(read_u32::<LittleEndian, _>(&mut r)?));
                }
                continue;
            }
            BinaryToken::FloatList => {
                let count = read_u32::<LittleEndian, _>(&mut r)? as usize;
                let width = match float_size {
                    FloatSize::F32 => 4,
                    FloatSize::F64 => 8,
                };
                ensure_data!(
                    count.checked_mul(width).map_or(false, |n| n <= remaining(&r)),
                    "Float list of {count} at {pos:#X} overruns the stream"
                );
                for _ in 0..count {
                    let value = match float_size {
                        FloatSize::F32 => read_f32::<LittleEndian, _>(&mut r)? as f64,
                        FloatSize::F64 => read_f64::<LittleEndian, _>(&mut r)?,
                    };
                    tokens.push(Token::Float(value));
                }
                continue;
            }
            BinaryToken::OBrace => Token::OBrace,
            BinaryToken::CBrace => Token::CBrace,
            BinaryToken::OParen => Token::OParen,
            BinaryToken::CParen => Token::CParen,
            BinaryToken::OBracket => Token::OBracket,
            BinaryToken::CBracket => Token::CBracket,
            BinaryToken::OAngle => Token::OAngle,
            BinaryToken::CAngle => Token::CAngle,
            BinaryToken::Dot => Token::Dot,
            BinaryToken::Comma => Token::Comma,
            BinaryToken::Semicolon => Token::Semicolon,
            BinaryToken::Template => Token::Template,
            BinaryToken::Array => Token::Array,
            BinaryToken::Word => Token::Primitive(PrimitiveType::Word),
            BinaryToken::DWord => Token::Primitive(PrimitiveType::DWord),
            BinaryToken::Float => Token::Primitive(PrimitiveType::Float),
            BinaryToken::Double => Token::Primitive(PrimitiveType::Double),
            BinaryToken::Char => Token::Primitive(PrimitiveType::Char),
            BinaryToken::UChar => Token::Primitive(PrimitiveType::UChar),
            BinaryToken::SWord => Token::Primitive(PrimitiveType::SWord),
            BinaryToken::SDWord => Token::Primitive(PrimitiveType::SDWord),
            BinaryToken::Void => Token::Primitive(PrimitiveType::Void),
            BinaryToken::LpStr => Token::Primitive(PrimitiveType::String),
            BinaryToken::Unicode => Token::Primitive(PrimitiveType::Unicode),
            BinaryToken::CString => Token::Primitive(PrimitiveType::CString),
        };
        tokens.push(token);
    }
    Ok(tokens)
}

/// Lexes a text token stream.
pub fn tokenize_text(data: &[u8]) -> Result<Vec<Token>, ImportError> {
    let mut lexer = TextLexer { data, pos: 0, line: 1 };
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

struct TextLexer<'a> {
    data: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> TextLexer<'a> {
    #[inline]
    fn peek(&self) -> Option<u8> { self.data.get(self.pos).copied() }

    #[inline]
    fn peek_at(&self, offset: usize) -> Option<u8> { self.data.get(self.pos + offset).copied() }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                b'\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                c if c.is_ascii_whitespace() || c == 0 => self.pos += 1,
                b'#' => self.skip_line(),
                b'/' if self.peek_at(1) == Some(b'/') => self.skip_line(),
                _ => break,
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek() {
            if c == b'\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn take_while<F: Fn(u8) -> bool>(&mut self, f: F) -> &'a [u8] {
        let start = self.pos;
        while self.peek().map_or(false, &f) {
            self.pos += 1;
        }
        let data = self.data;
        &data[start..self.pos]
    }

    fn next_token(&mut self) -> Result<Option<Token>, ImportError> {
        self.skip_whitespace_and_comments();
        let Some(c) = self.peek() else { return Ok(None) };
        let token = match c {
            b'{' => self.punct(Token::OBrace),
            b'}' => self.punct(Token::CBrace),
            b'(' => self.punct(Token::OParen),
            b')' => self.punct(Token::CParen),
            b'[' => self.punct(Token::OBracket),
            b']' => self.punct(Token::CBracket),
            b',' => self.punct(Token::Comma),
            b';' => self.punct(Token::Semicolon),
            b'>' => self.punct(Token::CAngle),
            b'.' if !self.peek_at(1).map_or(false, |c| c.is_ascii_digit()) => {
                self.punct(Token::Dot)
            }
            b'<' => self.guid()?,
            b'"' => self.string()?,
            c if c.is_ascii_digit() || c == b'-' || c == b'+' || c == b'.' => self.number()?,
            c if c.is_ascii_alphabetic() || c == b'_' => self.word(),
            c => bail_data!("Unexpected character {:?} on line {}", c as char, self.line),
        };
        Ok(Some(token))
    }

    #[inline]
    fn punct(&mut self, token: Token) -> Token {
        self.pos += 1;
        token
    }

    fn guid(&mut self) -> Result<Token, ImportError> {
        let line = self.line;
        self.pos += 1;
        let text = self.take_while(|c| c != b'>');
        let text = String::from_utf8_lossy(text).trim().to_string();
        ensure_data!(self.peek() == Some(b'>'), "Unterminated GUID on line {line}");
        self.pos += 1;
        match Uuid::parse_str(&text) {
            Ok(guid) => Ok(Token::Guid(guid)),
            Err(e) => bail_data!("Invalid GUID <{text}> on line {line}: {e}"),
        }
    }

    fn string(&mut self) -> Result<Token, ImportError> {
        let line = self.line;
        self.pos += 1;
        let text = self.take_while(|c| c != b'"');
        ensure_data!(self.peek() == Some(b'"'), "Unterminated string on line {line}");
        self.pos += 1;
        self.line += text.iter().filter(|&&c| c == b'\n').count();
        Ok(Token::String(String::from_utf8_lossy(text).into_owned()))
    }

    fn number(&mut self) -> Result<Token, ImportError> {
        let line = self.line;
        let text = self
            .take_while(|c| c.is_ascii_digit() || matches!(c, b'.' | b'e' | b'E' | b'+' | b'-'));
        let text = std::str::from_utf8(text).unwrap_or_default();
        if text.contains(['.', 'e', 'E']) {
            match text.parse::<f64>() {
                Ok(v) => Ok(Token::Float(v)),
                Err(_) => bail_data!("Invalid float '{text}' on line {line}"),
            }
        } else {
            match text.parse::<i64>() {
                // Negative values keep their two's complement bit pattern.
                Ok(v) => Ok(Token::Integer(v as u32)),
                Err(_) => bail_data!("Invalid integer '{text}' on line {line}"),
            }
        }
    }

    fn word(&mut self) -> Token {
        let text =
            self.take_while(|c| c.is_ascii_alphanumeric() || matches!(c, b'_' | b'-' | b'.'));
        let text = String::from_utf8_lossy(text).into_owned();
        match text.as_str() {
            "template" | "TEMPLATE" => Token::Template,
            "array" | "ARRAY" => Token::Array,
            word => match PrimitiveType::from_keyword(word) {
                Some(ty) => Token::Primitive(ty),
                None => Token::Name(text),
            },
        }
    }
}

/// Cursor over a lexed token stream.
#[derive(Debug)]
pub struct TokenStream<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> TokenStream<'a> {
    #[inline]
    pub fn new(tokens: &'a [Token]) -> Self { Self { tokens, pos: 0 } }

    #[inline]
    pub fn peek(&self) -> Option<&'a Token> { self.tokens.get(self.pos) }

    #[inline]
    pub fn position(&self) -> usize { self.pos }

    #[inline]
    pub fn is_empty(&self) -> bool { self.pos >= self.tokens.len() }

    #[inline]
    pub fn next_token(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consumes the next token if it equals `token`.
    pub fn accept(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn expect(&mut self, token: &Token) -> Result<(), ImportError> {
        match self.next_token() {
            Some(t) if t == token => Ok(()),
            other => bail_data!("Expected {token:?} at token {}, found {other:?}", self.pos),
        }
    }

    pub fn expect_name(&mut self) -> Result<&'a str, ImportError> {
        match self.next_token() {
            Some(Token::Name(name)) => Ok(name),
            other => bail_data!("Expected a name at token {}, found {other:?}", self.pos),
        }
    }

    pub fn accept_name(&mut self) -> Option<&'a str> {
        match self.peek() {
            Some(Token::Name(name)) => {
                self.pos += 1;
                Some(name)
            }
            _ => None,
        }
    }

    pub fn accept_guid(&mut self) -> Option<Uuid> {
        match self.peek() {
            Some(Token::Guid(guid)) => {
                self.pos += 1;
                Some(*guid)
            }
            _ => None,
        }
    }

    /// Skips `;` and `,`. Writers disagree on where separators go, so data
    /// parsing treats them as optional whitespace.
    pub fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(Token::Semicolon | Token::Comma)) {
            self.pos += 1;
        }
    }
}
