//! Lexer: source text to token stream
//!
//! Tokens keep their byte span and the separator text (whitespace and
//! comments) that *follows* them, so the exact source can be reconstructed
//! from the stream. The stream always ends with an `Eof` sentinel so
//! lookahead never runs past the end.
//!
//! Host-registered named constants shadow plain identifiers and lex as
//! numeric named-constant tokens.

use std::collections::HashMap;

use crate::error::{CompileErrorKind, CompileFail, Span};

#[cfg(test)]
mod tests;

/* ===================== Tokens ===================== */

/// Keywords and operators, ordered so that operator lexing can take the
/// longest match (`>>>=` before `>>>` before `>>` before `>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kw {
    // statements / declarations
    If,
    Else,
    While,
    Do,
    For,
    Repeat,
    Switch,
    Case,
    Default,
    Break,
    Continue,
    Return,
    Try,
    Throw,
    Catch,
    Finally,
    New,
    Class,
    Extends,
    Public,
    Private,
    Protected,
    Static,
    Synchronized,
    Extern,
    // types
    Int,
    Float,
    Boolean,
    Str,
    VoidType,
    // literals
    True,
    False,
    Null,
    Nan,
    This,
    // operators
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    AndAssign,
    OrAssign,
    XorAssign,
    ShlAssign,
    ShrAssign,
    AsrAssign,
    Eq,
    Ne,
    Lo,
    Hi,
    Ls,
    Hs,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Power,
    Incr,
    Decr,
    Shl,
    Shr,
    Asr,
    BitAnd,
    BitOr,
    BitXor,
    LogAnd,
    LogOr,
    TxtAnd,
    TxtOr,
    TxtNot,
    Not,
    BitNot,
    Question,
    Colon,
    Comma,
    Semicolon,
    Dot,
    OpenPar,
    ClosePar,
    OpenBrace,
    CloseBrace,
    OpenIndex,
    CloseIndex,
}

/// Token kind. Numbers are parsed during lexing; identifiers and keywords
/// keep their text on the token itself.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword(Kw),
    Ident,
    IntLit(i32),
    FloatLit(f32),
    StrLit(String),
    /// Host-defined named numeric constant.
    DefNum(i32),
    Eof,
}

/// One token of the input stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
    /// Whitespace and comments between this token and the next.
    pub sep: String,
}

impl Token {
    pub fn keyword(&self) -> Option<Kw> {
        match self.kind {
            TokenKind::Keyword(k) => Some(k),
            _ => None,
        }
    }

    pub fn is_kw(&self, k: Kw) -> bool {
        self.kind == TokenKind::Keyword(k)
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }
}

/* ===================== Keyword tables ===================== */

const WORD_KEYWORDS: &[(&str, Kw)] = &[
    ("if", Kw::If),
    ("else", Kw::Else),
    ("while", Kw::While),
    ("do", Kw::Do),
    ("for", Kw::For),
    ("repeat", Kw::Repeat),
    ("switch", Kw::Switch),
    ("case", Kw::Case),
    ("default", Kw::Default),
    ("break", Kw::Break),
    ("continue", Kw::Continue),
    ("return", Kw::Return),
    ("try", Kw::Try),
    ("throw", Kw::Throw),
    ("catch", Kw::Catch),
    ("finally", Kw::Finally),
    ("new", Kw::New),
    ("class", Kw::Class),
    ("extends", Kw::Extends),
    ("public", Kw::Public),
    ("private", Kw::Private),
    ("protected", Kw::Protected),
    ("static", Kw::Static),
    ("synchronized", Kw::Synchronized),
    ("extern", Kw::Extern),
    ("int", Kw::Int),
    ("float", Kw::Float),
    ("boolean", Kw::Boolean),
    ("bool", Kw::Boolean),
    ("string", Kw::Str),
    ("void", Kw::VoidType),
    ("true", Kw::True),
    ("false", Kw::False),
    ("null", Kw::Null),
    ("nan", Kw::Nan),
    ("this", Kw::This),
    ("and", Kw::TxtAnd),
    ("or", Kw::TxtOr),
    ("not", Kw::TxtNot),
];

/// Operators ordered longest first so a simple scan takes the longest match.
const OPERATORS: &[(&str, Kw)] = &[
    (">>>=", Kw::ShrAssign),
    ("<<=", Kw::ShlAssign),
    (">>=", Kw::AsrAssign),
    (">>>", Kw::Shr),
    ("==", Kw::Eq),
    ("!=", Kw::Ne),
    ("<=", Kw::Ls),
    (">=", Kw::Hs),
    ("+=", Kw::AddAssign),
    ("-=", Kw::SubAssign),
    ("*=", Kw::MulAssign),
    ("/=", Kw::DivAssign),
    ("%=", Kw::ModAssign),
    ("&=", Kw::AndAssign),
    ("|=", Kw::OrAssign),
    ("^=", Kw::XorAssign),
    ("&&", Kw::LogAnd),
    ("||", Kw::LogOr),
    ("++", Kw::Incr),
    ("--", Kw::Decr),
    ("<<", Kw::Shl),
    (">>", Kw::Asr),
    ("**", Kw::Power),
    ("=", Kw::Assign),
    ("<", Kw::Lo),
    (">", Kw::Hi),
    ("+", Kw::Add),
    ("-", Kw::Sub),
    ("*", Kw::Mul),
    ("/", Kw::Div),
    ("%", Kw::Mod),
    ("&", Kw::BitAnd),
    ("|", Kw::BitOr),
    ("^", Kw::BitXor),
    ("!", Kw::Not),
    ("~", Kw::BitNot),
    ("?", Kw::Question),
    (":", Kw::Colon),
    (",", Kw::Comma),
    (";", Kw::Semicolon),
    (".", Kw::Dot),
    ("(", Kw::OpenPar),
    (")", Kw::ClosePar),
    ("{", Kw::OpenBrace),
    ("}", Kw::CloseBrace),
    ("[", Kw::OpenIndex),
    ("]", Kw::CloseIndex),
];

fn lookup_word(text: &str) -> Option<Kw> {
    WORD_KEYWORDS
        .iter()
        .find(|(w, _)| *w == text)
        .map(|(_, k)| *k)
}

/* ===================== Lexer ===================== */

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    constants: &'a HashMap<String, i32>,
}

/// Tokenize the whole source, failing at the first illegal character or
/// malformed literal. `constants` are the host-registered named numbers.
pub fn tokenize(
    source: &str,
    constants: &HashMap<String, i32>,
) -> Result<Vec<Token>, CompileFail> {
    let mut lx = Lexer {
        src: source.as_bytes(),
        pos: 0,
        constants,
    };
    let mut out: Vec<Token> = Vec::new();

    // Separator text before the first token attaches to nothing; skip it
    // but remember it on a leading sentinel would complicate the stream, so
    // source reconstruction starts at the first token.
    let _ = lx.take_separator()?;

    loop {
        let start = lx.pos;
        let Some(c) = lx.peek() else {
            out.push(Token {
                kind: TokenKind::Eof,
                text: String::new(),
                span: Span::new(start as u32, start as u32),
                sep: String::new(),
            });
            return Ok(out);
        };

        let kind = if c.is_ascii_digit() {
            lx.lex_number()?
        } else if c == b'"' {
            lx.lex_string()?
        } else if c == b'_' || c.is_ascii_alphabetic() || c >= 0x80 {
            lx.lex_word()?
        } else {
            lx.lex_operator()?
        };

        let end = lx.pos;
        let text = String::from_utf8_lossy(&lx.src[start..end]).into_owned();
        let sep = lx.take_separator()?;
        out.push(Token {
            kind,
            text,
            span: Span::new(start as u32, end as u32),
            sep,
        });
    }
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, off: usize) -> Option<u8> {
        self.src.get(self.pos + off).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn fail(&self, kind: CompileErrorKind, start: usize) -> CompileFail {
        CompileFail::new(kind, Span::new(start as u32, self.pos.max(start + 1) as u32))
    }

    /// Consume whitespace and comments, returning them verbatim. An
    /// unterminated block comment is an error at its opening position.
    fn take_separator(&mut self) -> Result<String, CompileFail> {
        let start = self.pos;
        loop {
            match self.peek() {
                Some(c) if (c as char).is_whitespace() => {
                    self.pos += 1;
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let open = self.pos;
                    self.pos += 2;
                    loop {
                        match self.peek() {
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.pos += 2;
                                break;
                            }
                            Some(_) => self.pos += 1,
                            None => return Err(self.fail(CompileErrorKind::CloseBlock, open)),
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(String::from_utf8_lossy(&self.src[start..self.pos]).into_owned())
    }

    /// Decimal, hex (`0x`), float and exponent literals.
    fn lex_number(&mut self) -> Result<TokenKind, CompileFail> {
        let start = self.pos;

        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X')) {
            self.pos += 2;
            let digits = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            if self.pos == digits {
                return Err(self.fail(CompileErrorKind::BadNum, start));
            }
            let text = std::str::from_utf8(&self.src[digits..self.pos]).unwrap();
            let v = u32::from_str_radix(text, 16)
                .map_err(|_| self.fail(CompileErrorKind::BadNum, start))?;
            return Ok(TokenKind::IntLit(v as i32));
        }

        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }

        let mut float = false;
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            float = true;
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let mut off = 1;
            if matches!(self.peek_at(1), Some(b'+') | Some(b'-')) {
                off = 2;
            }
            if matches!(self.peek_at(off), Some(c) if c.is_ascii_digit()) {
                float = true;
                self.pos += off;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }

        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        if float {
            let v: f32 = text
                .parse()
                .map_err(|_| self.fail(CompileErrorKind::BadNum, start))?;
            Ok(TokenKind::FloatLit(v))
        } else {
            let v: i32 = text
                .parse()
                .map_err(|_| self.fail(CompileErrorKind::BadNum, start))?;
            Ok(TokenKind::IntLit(v))
        }
    }

    /// Quoted string with `\n \r \t \" \\` escapes. Unterminated strings
    /// (end of line or end of input) are an error.
    fn lex_string(&mut self) -> Result<TokenKind, CompileFail> {
        let start = self.pos;
        self.bump(); // opening quote
        let mut value: Vec<u8> = Vec::new();
        loop {
            match self.bump() {
                Some(b'"') => {
                    return Ok(TokenKind::StrLit(
                        String::from_utf8_lossy(&value).into_owned(),
                    ))
                }
                Some(b'\\') => match self.bump() {
                    Some(b'n') => value.push(b'\n'),
                    Some(b'r') => value.push(b'\r'),
                    Some(b't') => value.push(b'\t'),
                    Some(b'"') => value.push(b'"'),
                    Some(b'\\') => value.push(b'\\'),
                    _ => return Err(self.fail(CompileErrorKind::BadString, start)),
                },
                Some(b'\n') | None => {
                    return Err(self.fail(CompileErrorKind::BadString, start))
                }
                Some(c) => value.push(c),
            }
        }
    }

    /// Identifier, word keyword, or host-defined named constant. Scans by
    /// decoded character so multi-byte letters stay whole.
    fn lex_word(&mut self) -> Result<TokenKind, CompileFail> {
        let start = self.pos;
        let rest = String::from_utf8_lossy(&self.src[start..]).into_owned();
        let mut len = 0;
        for c in rest.chars() {
            if c == '_' || c.is_alphanumeric() {
                len += c.len_utf8();
            } else {
                break;
            }
        }
        if len == 0 {
            // A non-ASCII byte that does not start a letter.
            self.pos += 1;
            return Err(self.fail(CompileErrorKind::BadChar, start));
        }
        self.pos = start + len;
        let text = &rest[..len];
        Ok(if let Some(kw) = lookup_word(text) {
            TokenKind::Keyword(kw)
        } else if let Some(&v) = self.constants.get(text) {
            TokenKind::DefNum(v)
        } else {
            TokenKind::Ident
        })
    }

    fn lex_operator(&mut self) -> Result<TokenKind, CompileFail> {
        let start = self.pos;
        for (text, kw) in OPERATORS {
            if self.src[self.pos..].starts_with(text.as_bytes()) {
                self.pos += text.len();
                return Ok(TokenKind::Keyword(*kw));
            }
        }
        self.pos += 1;
        Err(self.fail(CompileErrorKind::BadChar, start))
    }
}
