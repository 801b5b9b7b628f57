use std::path::Path;
use std::sync::Arc;

use num_bigint::BigInt;
use thiserror::Error;

use super::position::{Position, Range};
use super::token::{Spanned, Token};

/// Characters that may appear in a word alongside letters.
pub const SYMBOLS: &str = "!@$%^&*-+/=<>";

#[derive(Debug, Clone, Error)]
#[error("{}:{}: {}", .file.display(), .range, .message)]
pub struct LexError {
    pub message: String,
    pub file: Arc<Path>,
    pub range: Range,
}

/// Pull-based tokenizer.
///
/// Each call to [`Lexer::next_token`] skips whitespace and returns the next
/// token, including comments. Filtering comments is the caller's job.
pub struct Lexer {
    source: Vec<char>,
    idx: usize,
    /// Position of the current character.
    pos: Position,
    /// Position of the most recently consumed character.
    last: Position,
    file: Arc<Path>,
}

impl Lexer {
    pub fn new(source: &str, file: Arc<Path>) -> Self {
        Lexer {
            source: source.chars().collect(),
            idx: 0,
            pos: Position::start(),
            last: Position::start(),
            file,
        }
    }

    pub fn file(&self) -> &Arc<Path> {
        &self.file
    }

    /// True once every character has been consumed.
    pub fn is_end(&self) -> bool {
        self.idx >= self.source.len()
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.idx).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.idx + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current()?;
        self.last = self.pos;
        self.pos.advance(ch);
        self.idx += 1;
        Some(ch)
    }

    fn error(&self, message: impl Into<String>, range: Range) -> LexError {
        LexError {
            message: message.into(),
            file: self.file.clone(),
            range,
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Returns the next token, `Ok(None)` at end of input.
    pub fn next_token(&mut self) -> Result<Option<Spanned>, LexError> {
        self.skip_whitespace();
        let start = self.pos;

        let token = match self.current() {
            None => return Ok(None),
            Some('#') => {
                while let Some(ch) = self.current() {
                    if ch == '\n' {
                        break;
                    }
                    self.advance();
                }
                Token::Comment
            }
            Some(ch @ ('.' | ';' | '{' | '}' | '[' | ']')) => {
                self.advance();
                match ch {
                    '.' => Token::Dot,
                    ';' => Token::Semi,
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    '[' => Token::LBrack,
                    _ => Token::RBrack,
                }
            }
            Some('"') => self.read_string()?,
            Some('\'') => self.read_char()?,
            Some('0') if matches!(self.peek(), Some('x' | 'X')) => self.read_radix(16, "hex")?,
            Some('0') if matches!(self.peek(), Some('b' | 'B')) => self.read_radix(2, "binary")?,
            Some(ch) if ch.is_ascii_digit() => self.read_decimal()?,
            Some(ch) if is_word_char(ch) => self.read_word(),
            Some(ch) => {
                return Err(self.error(
                    format!("unexpected character reached: {:?}", ch),
                    Range::at(start),
                ));
            }
        };

        Ok(Some(Spanned {
            token,
            range: Range::new(start, self.last),
        }))
    }

    /// Reads the whole input, comments included.
    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn read_string(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        self.advance(); // opening quote

        let mut string = String::new();
        loop {
            match self.current() {
                Some('"') => {
                    self.advance();
                    return Ok(Token::Str(string));
                }
                Some('\\') => {
                    self.advance();
                    let code = self.current().ok_or_else(|| {
                        self.error(
                            "expected escape code; instead got end of input",
                            Range::new(start, self.last),
                        )
                    })?;
                    let ch = escape(code).ok_or_else(|| {
                        self.error(
                            format!("unknown escape code: {:?}", code),
                            Range::new(start, self.pos),
                        )
                    })?;
                    string.push(ch);
                    self.advance();
                }
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
                None => {
                    return Err(self.error(
                        "expected string character or close quote; instead got end of input",
                        Range::new(start, self.last),
                    ));
                }
            }
        }
    }

    fn read_char(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        self.advance(); // quote

        match self.current() {
            Some('\\') => {
                self.advance();
                let code = self.current().ok_or_else(|| {
                    self.error(
                        "expected escape code; instead got end of input",
                        Range::new(start, self.last),
                    )
                })?;
                let ch = escape(code).ok_or_else(|| {
                    self.error(
                        format!("unknown escape code: {:?}", code),
                        Range::new(start, self.pos),
                    )
                })?;
                self.advance();
                Ok(Token::Char(ch))
            }
            Some(ch) if ch.is_ascii_digit() || is_word_char(ch) => {
                self.advance();
                Ok(Token::Char(ch))
            }
            Some(ch) => Err(self.error(
                format!("expected non-whitespace character; instead got {:?}", ch),
                Range::new(start, self.pos),
            )),
            None => Err(self.error(
                "expected character; instead got end of input",
                Range::at(start),
            )),
        }
    }

    fn read_radix(&mut self, radix: u32, name: &str) -> Result<Token, LexError> {
        let start = self.pos;
        self.advance(); // '0'
        self.advance(); // 'x' / 'b'

        let mut digits = String::new();
        while let Some(ch) = self.current() {
            if ch.is_digit(radix) {
                digits.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if digits.is_empty() {
            let got = match self.current() {
                Some(ch) => format!("{:?}", ch),
                None => "end of input".to_string(),
            };
            return Err(self.error(
                format!("expected {} digit; instead got {}", name, got),
                Range::new(start, self.last),
            ));
        }

        let value = BigInt::parse_bytes(digits.as_bytes(), radix).ok_or_else(|| {
            self.error(
                format!("invalid {} number: {}", name, digits),
                Range::new(start, self.last),
            )
        })?;
        Ok(Token::Int(value))
    }

    fn read_decimal(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        let mut digits = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        let value = BigInt::parse_bytes(digits.as_bytes(), 10).ok_or_else(|| {
            self.error(
                format!("invalid integer: {}", digits),
                Range::new(start, self.last),
            )
        })?;
        Ok(Token::Int(value))
    }

    fn read_word(&mut self) -> Token {
        let mut word = String::new();
        while let Some(ch) = self.current() {
            if is_word_char(ch) {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        Token::keyword(&word).unwrap_or(Token::Ident(word))
    }
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphabetic() || SYMBOLS.contains(ch)
}

/// Resolves the character after a backslash.
pub fn escape(code: char) -> Option<char> {
    Some(match code {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        's' => ' ',
        '"' => '"',
        '\'' => '\'',
        '\\' => '\\',
        _ => return None,
    })
}
