use num_bigint::BigInt;

use super::position::Range;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Comment,

    // Literals
    Int(BigInt),
    Str(String),
    Char(char),
    Nil,
    T,
    F,

    Ident(String),

    // Keywords
    Import,
    Br,
    El,
    Loop,

    // Structure
    Dot,
    Semi,
    LBrace,
    RBrace,
    LBrack,
    RBrack,
}

/// Payload-free token tag, used for expected-token sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Comment,
    Int,
    Str,
    Char,
    Nil,
    T,
    F,
    Ident,
    Import,
    Br,
    El,
    Loop,
    Dot,
    Semi,
    LBrace,
    RBrace,
    LBrack,
    RBrack,
}

impl Token {
    pub fn kind(&self) -> TokenKind {
        match self {
            Token::Comment => TokenKind::Comment,
            Token::Int(_) => TokenKind::Int,
            Token::Str(_) => TokenKind::Str,
            Token::Char(_) => TokenKind::Char,
            Token::Nil => TokenKind::Nil,
            Token::T => TokenKind::T,
            Token::F => TokenKind::F,
            Token::Ident(_) => TokenKind::Ident,
            Token::Import => TokenKind::Import,
            Token::Br => TokenKind::Br,
            Token::El => TokenKind::El,
            Token::Loop => TokenKind::Loop,
            Token::Dot => TokenKind::Dot,
            Token::Semi => TokenKind::Semi,
            Token::LBrace => TokenKind::LBrace,
            Token::RBrace => TokenKind::RBrace,
            Token::LBrack => TokenKind::LBrack,
            Token::RBrack => TokenKind::RBrack,
        }
    }

    /// Maps an exact word to its keyword token, if it is one.
    pub fn keyword(word: &str) -> Option<Token> {
        Some(match word {
            "br" => Token::Br,
            "el" => Token::El,
            "loop" => Token::Loop,
            "import" => Token::Import,
            "T" => Token::T,
            "F" => Token::F,
            "@" => Token::Nil,
            _ => return None,
        })
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TokenKind::Comment => "comment",
            TokenKind::Int => "integer",
            TokenKind::Str => "string",
            TokenKind::Char => "character",
            TokenKind::Nil => "nil",
            TokenKind::T => "T keyword",
            TokenKind::F => "F keyword",
            TokenKind::Ident => "identifier",
            TokenKind::Import => "import keyword",
            TokenKind::Br => "br keyword",
            TokenKind::El => "el keyword",
            TokenKind::Loop => "loop keyword",
            TokenKind::Dot => "dot",
            TokenKind::Semi => "semicolon",
            TokenKind::LBrace => "left brace",
            TokenKind::RBrace => "right brace",
            TokenKind::LBrack => "left square bracket",
            TokenKind::RBrack => "right square bracket",
        };
        write!(f, "{}", name)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const MAX_LEN: usize = 18;
        match self {
            Token::Int(n) => write!(f, "{} ({})", self.kind(), n),
            Token::Str(s) if s.chars().count() > MAX_LEN => {
                let head: String = s.chars().take(MAX_LEN).collect();
                write!(f, "{} ({:?}...)", self.kind(), head)
            }
            Token::Str(s) => write!(f, "{} ({:?})", self.kind(), s),
            Token::Char(c) => write!(f, "{} ({:?})", self.kind(), c),
            Token::Ident(name) => write!(f, "{} (`{}`)", self.kind(), name),
            _ => write!(f, "{}", self.kind()),
        }
    }
}

/// A token together with the range it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub range: Range,
}
