use std::fmt::Write;

use crate::frontend::token::{Spanned, Token};

/// Prints a token stream for `--tokens`.
pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints the human-readable token text
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, tokens: &[Spanned]) {
        print!("{}", self.render(tokens));
    }

    pub fn render(&self, tokens: &[Spanned]) -> String {
        let mut out = String::new();
        for s in tokens {
            self.render_one(&mut out, s);
        }
        out
    }

    fn render_one(&self, out: &mut String, s: &Spanned) {
        let start = s.range.start;
        let kind = self.kind(&s.token);
        let colr = if self.color { self.color(&s.token) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        let _ = if self.show_debug_repr {
            writeln!(
                out,
                "[{:02}:{:02}] {}{:<8} {:?}{}",
                start.line, start.col, colr, kind, s.token, reset
            )
        } else {
            writeln!(
                out,
                "[{:02}:{:02}] {}{:<8} {}{}",
                start.line, start.col, colr, kind, s.token, reset
            )
        };
    }

    fn kind(&self, t: &Token) -> &'static str {
        use Token::*;
        match t {
            Comment => "COMMENT",

            // literals
            Int(_) => "INT",
            Str(_) => "STRING",
            Char(_) => "CHAR",
            Nil | T | F => "CONST",

            // names
            Ident(_) => "IDENT",

            // structure
            LBrack | RBrack => "BRACKET",
            LBrace | RBrace => "BRACE",
            Dot | Semi => "PUNCT",

            Import | Br | El | Loop => "KEYWORD",
        }
    }

    fn color(&self, t: &Token) -> &'static str {
        use Token::*;
        match t {
            Comment => Self::DIM,
            Str(_) | Char(_) => Self::GRN,
            Int(_) | Nil | T | F => Self::CYN,
            Ident(_) => Self::YEL,
            Import | Br | El | Loop => Self::MAG,
            _ => Self::RESET,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;
    use std::path::Path;
    use std::sync::Arc;

    fn tokens(src: &str) -> Vec<Spanned> {
        Lexer::new(src, Arc::from(Path::new("t.sbl")))
            .tokenize()
            .unwrap()
    }

    #[test]
    fn test_plain_render() {
        let out = TokenDumper::new()
            .no_color()
            .pretty()
            .render(&tokens("main { 12 x; } # done"));
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], "[01:01] IDENT    identifier (`main`)");
        assert_eq!(lines[2], "[01:08] INT      integer (12)");
        assert_eq!(lines.last().copied(), Some("[01:16] COMMENT  comment"));
    }

    #[test]
    fn test_color_wraps_tokens() {
        let out = TokenDumper::new().render(&tokens("br"));
        assert!(out.contains("\x1b[35m"));
        assert!(out.ends_with("\x1b[0m\n"));
    }
}
