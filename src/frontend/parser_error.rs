use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use super::lexer::LexError;
use super::position::Range;
use super::token::TokenKind;

/// A parsing error with source location.
///
/// `found` is the offending token rendered for humans, or `None` when the
/// input ended early. `range` falls back to the last consumed token at end
/// of input so locations always point into the file.
#[derive(Debug, Clone, Error)]
pub struct ParseError {
    pub expected: Vec<TokenKind>,
    pub found: Option<String>,
    pub note: Option<String>,
    pub file: Arc<Path>,
    pub range: Range,
}

impl ParseError {
    pub fn message(&self) -> String {
        let got = match &self.found {
            Some(found) => format!("`{}` token", found),
            None => "end of input".to_string(),
        };
        let mut msg = match self.expected.as_slice() {
            [] => format!("unexpected {}", got),
            [one] => format!("expected `{}` token; instead got {}", one, got),
            many => {
                let names: Vec<String> = many.iter().map(|k| format!("`{}`", k)).collect();
                format!("expected one of {} token; instead got {}", names.join(", "), got)
            }
        };
        if let Some(note) = &self.note {
            msg.push_str(": ");
            msg.push_str(note);
        }
        msg
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.file.display(), self.range, self.message())
    }
}

/// Anything that stops a single file from parsing.
#[derive(Debug, Clone, Error)]
pub enum SyntaxError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl SyntaxError {
    pub fn range(&self) -> Range {
        match self {
            SyntaxError::Lex(e) => e.range,
            SyntaxError::Parse(e) => e.range,
        }
    }

    pub fn file(&self) -> &Arc<Path> {
        match self {
            SyntaxError::Lex(e) => &e.file,
            SyntaxError::Parse(e) => &e.file,
        }
    }
}
