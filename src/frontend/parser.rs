use std::path::Path;
use std::sync::Arc;

use crate::lang::ast::{
    Block, Branch, FunDef, Import, Item, ItemKind, Loop, Source, StackAction, StackStmt, Stmt,
    TopLevel,
};

use super::lexer::Lexer;
use super::parser_error::{ParseError, SyntaxError};
use super::position::Range;
use super::token::{Spanned, Token, TokenKind};

/// Grammar nodes that know which tokens can start them.
///
/// The parser never backtracks; every choice between productions is made by
/// testing the lookahead token against these sets.
pub trait FirstSet {
    const FIRST: &'static [TokenKind];

    fn starts_with(kind: TokenKind) -> bool {
        Self::FIRST.contains(&kind)
    }
}

impl FirstSet for Item {
    const FIRST: &'static [TokenKind] = &[
        TokenKind::Int,
        TokenKind::Ident,
        TokenKind::Char,
        TokenKind::Str,
        TokenKind::Nil,
        TokenKind::T,
        TokenKind::F,
        TokenKind::LBrack,
    ];
}

impl FirstSet for StackStmt {
    const FIRST: &'static [TokenKind] = &[
        TokenKind::Dot,
        TokenKind::Int,
        TokenKind::Ident,
        TokenKind::Char,
        TokenKind::Str,
        TokenKind::Nil,
        TokenKind::T,
        TokenKind::F,
        TokenKind::LBrack,
        TokenKind::Semi,
    ];
}

impl FirstSet for Branch {
    const FIRST: &'static [TokenKind] = &[TokenKind::Br];
}

impl FirstSet for Loop {
    const FIRST: &'static [TokenKind] = &[TokenKind::Loop];
}

impl FirstSet for Stmt {
    const FIRST: &'static [TokenKind] = &[
        TokenKind::Dot,
        TokenKind::Int,
        TokenKind::Ident,
        TokenKind::Char,
        TokenKind::Str,
        TokenKind::Nil,
        TokenKind::T,
        TokenKind::F,
        TokenKind::LBrack,
        TokenKind::Semi,
        TokenKind::Br,
        TokenKind::Loop,
    ];
}

impl FirstSet for Block {
    const FIRST: &'static [TokenKind] = &[TokenKind::LBrace];
}

impl FirstSet for FunDef {
    const FIRST: &'static [TokenKind] = &[TokenKind::Ident];
}

impl FirstSet for Import {
    const FIRST: &'static [TokenKind] = &[TokenKind::Import];
}

impl FirstSet for TopLevel {
    const FIRST: &'static [TokenKind] = &[TokenKind::Import, TokenKind::Ident];
}

/// How deep blocks and stack literals may nest inside one another.
pub const MAX_NESTING: usize = 256;

/// Recursive-descent parser for SBL.
///
/// Pulls tokens from the lexer one at a time and keeps a single token of
/// lookahead. Comments are dropped as they are read.
pub struct Parser {
    lexer: Lexer,
    current: Option<Spanned>,
    /// Range of the most recently consumed token.
    ///
    /// Used as the error location once the input has run out.
    last_range: Range,
    /// Open `{` and `[` enclosing the lookahead.
    depth: usize,
}

impl Parser {
    pub fn new(source: &str, file: Arc<Path>) -> Self {
        Parser {
            lexer: Lexer::new(source, file),
            current: None,
            last_range: Range::default(),
            depth: 0,
        }
    }

    pub fn file(&self) -> &Arc<Path> {
        self.lexer.file()
    }

    /// Parses a whole file.
    pub fn parse(mut self) -> Result<Source, SyntaxError> {
        self.fill()?;

        let mut items = Vec::new();
        while let Some(kind) = self.peek() {
            if Import::starts_with(kind) {
                items.push(TopLevel::Import(self.import()?));
            } else if FunDef::starts_with(kind) {
                items.push(TopLevel::FunDef(self.fun_def()?));
            } else {
                return Err(self.unexpected(TopLevel::FIRST, None));
            }
        }

        Ok(Source {
            file: self.file().clone(),
            items,
        })
    }

    /// Loads the next non-comment token into the lookahead slot.
    fn fill(&mut self) -> Result<(), SyntaxError> {
        loop {
            match self.lexer.next_token()? {
                Some(Spanned {
                    token: Token::Comment,
                    ..
                }) => continue,
                next => {
                    self.current = next;
                    return Ok(());
                }
            }
        }
    }

    fn peek(&self) -> Option<TokenKind> {
        self.current.as_ref().map(|s| s.token.kind())
    }

    /// Consumes the lookahead token and returns it.
    fn advance(&mut self) -> Result<Spanned, SyntaxError> {
        let Some(spanned) = self.current.take() else {
            return Err(self.unexpected(&[], None));
        };
        self.last_range = spanned.range;
        self.fill()?;
        Ok(spanned)
    }

    /// Consumes a token of the given kind or fails naming it.
    fn expect(&mut self, kind: TokenKind) -> Result<Spanned, SyntaxError> {
        if self.peek() == Some(kind) {
            self.advance()
        } else {
            Err(self.unexpected(&[kind], None))
        }
    }

    fn unexpected(&self, expected: &[TokenKind], note: Option<&str>) -> SyntaxError {
        let (found, range) = match &self.current {
            Some(spanned) => (Some(spanned.token.to_string()), spanned.range),
            None => (None, self.last_range),
        };
        SyntaxError::Parse(ParseError {
            expected: expected.to_vec(),
            found,
            note: note.map(str::to_string),
            file: self.file().clone(),
            range,
        })
    }

    /// Enters one level of nesting; every caller leaves it with [`Parser::unnest`].
    fn nest(&mut self) -> Result<(), SyntaxError> {
        if self.depth >= MAX_NESTING {
            let note = format!(
                "blocks and stack literals cannot nest deeper than {} levels",
                MAX_NESTING
            );
            return Err(self.unexpected(&[], Some(&note)));
        }
        self.depth += 1;
        Ok(())
    }

    fn unnest(&mut self) {
        self.depth -= 1;
    }

    fn import(&mut self) -> Result<Import, SyntaxError> {
        let start = self.expect(TokenKind::Import)?.range;
        let path = match self.expect(TokenKind::Str)?.token {
            Token::Str(path) => path,
            _ => unreachable!("expect() returned a non-string token"),
        };
        let end = self.expect(TokenKind::Semi)?.range;
        Ok(Import {
            path,
            range: start.to(end),
        })
    }

    fn fun_def(&mut self) -> Result<FunDef, SyntaxError> {
        let head = self.expect(TokenKind::Ident)?;
        let name = match head.token {
            Token::Ident(name) => name,
            _ => unreachable!("expect() returned a non-identifier token"),
        };
        let block = self.block()?;
        Ok(FunDef {
            name,
            range: head.range.to(block.range),
            block,
            file: self.file().clone(),
        })
    }

    fn block(&mut self) -> Result<Block, SyntaxError> {
        self.nest()?;
        let start = self.expect(TokenKind::LBrace)?.range;
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                Some(TokenKind::RBrace) => break,
                Some(kind) if Stmt::starts_with(kind) => stmts.push(self.stmt()?),
                _ => {
                    let mut expected = Stmt::FIRST.to_vec();
                    expected.push(TokenKind::RBrace);
                    return Err(self.unexpected(&expected, None));
                }
            }
        }
        let end = self.expect(TokenKind::RBrace)?.range;
        self.unnest();
        Ok(Block {
            stmts,
            range: start.to(end),
        })
    }

    fn stmt(&mut self) -> Result<Stmt, SyntaxError> {
        match self.peek() {
            Some(kind) if Branch::starts_with(kind) => Ok(Stmt::Branch(self.branch()?)),
            Some(kind) if Loop::starts_with(kind) => Ok(Stmt::Loop(self.loop_stmt()?)),
            Some(kind) if StackStmt::starts_with(kind) => Ok(Stmt::Stack(self.stack_stmt()?)),
            _ => Err(self.unexpected(Stmt::FIRST, None)),
        }
    }

    fn branch(&mut self) -> Result<Branch, SyntaxError> {
        let start = self.expect(TokenKind::Br)?.range;
        let br_block = self.block()?;
        let el_block = if self.peek() == Some(TokenKind::El) {
            self.advance()?;
            Some(self.block()?)
        } else {
            None
        };
        let end = el_block.as_ref().map_or(br_block.range, |b| b.range);
        Ok(Branch {
            br_block,
            el_block,
            range: start.to(end),
        })
    }

    fn loop_stmt(&mut self) -> Result<Loop, SyntaxError> {
        let start = self.expect(TokenKind::Loop)?.range;
        let block = self.block()?;
        Ok(Loop {
            range: start.to(block.range),
            block,
        })
    }

    fn stack_stmt(&mut self) -> Result<StackStmt, SyntaxError> {
        let start = self.current.as_ref().map_or(self.last_range, |s| s.range);
        let mut actions = Vec::new();
        loop {
            match self.peek() {
                Some(TokenKind::Semi) => break,
                Some(TokenKind::Dot) => {
                    self.advance()?;
                    actions.push(StackAction::pop(self.pop_target()?));
                }
                Some(kind) if Item::starts_with(kind) => {
                    actions.push(StackAction::push(self.item()?));
                }
                _ => {
                    let mut expected = vec![TokenKind::Dot];
                    expected.extend_from_slice(Item::FIRST);
                    expected.push(TokenKind::Semi);
                    return Err(self.unexpected(&expected, None));
                }
            }
        }
        let end = self.expect(TokenKind::Semi)?.range;
        Ok(StackStmt {
            actions,
            range: start.to(end),
        })
    }

    /// The item after a `.`: only names, nil and integers can be popped into.
    fn pop_target(&mut self) -> Result<Item, SyntaxError> {
        const POP_FIRST: &[TokenKind] = &[TokenKind::Ident, TokenKind::Nil, TokenKind::Int];
        match self.peek() {
            Some(kind) if POP_FIRST.contains(&kind) => self.item(),
            Some(kind) if Item::starts_with(kind) => Err(self.unexpected(
                POP_FIRST,
                Some("only names, nil and integers can follow `.`"),
            )),
            _ => Err(self.unexpected(POP_FIRST, None)),
        }
    }

    fn item(&mut self) -> Result<Item, SyntaxError> {
        if self.peek() == Some(TokenKind::LBrack) {
            return self.stack_literal();
        }
        if !self.peek().is_some_and(Item::starts_with) {
            return Err(self.unexpected(Item::FIRST, None));
        }

        let Spanned { token, range } = self.advance()?;
        let kind = match token {
            Token::Int(n) => ItemKind::Int(n),
            Token::Ident(name) => ItemKind::Ident(name),
            Token::Char(c) => ItemKind::Char(c),
            Token::Str(s) => ItemKind::Str(s),
            Token::Nil => ItemKind::Nil,
            Token::T => ItemKind::Bool(true),
            Token::F => ItemKind::Bool(false),
            other => unreachable!("token {} passed the item FIRST set", other),
        };
        Ok(Item::new(kind, range))
    }

    fn stack_literal(&mut self) -> Result<Item, SyntaxError> {
        self.nest()?;
        let start = self.expect(TokenKind::LBrack)?.range;
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(TokenKind::RBrack) => break,
                Some(kind) if Item::starts_with(kind) => items.push(self.item()?),
                _ => {
                    let mut expected = Item::FIRST.to_vec();
                    expected.push(TokenKind::RBrack);
                    return Err(self.unexpected(&expected, None));
                }
            }
        }
        let end = self.expect(TokenKind::RBrack)?.range;
        self.unnest();
        Ok(Item::new(ItemKind::Stack(items), start.to(end)))
    }
}

/// Parses `source` as the contents of `file`.
pub fn parse(source: &str, file: Arc<Path>) -> Result<Source, SyntaxError> {
    Parser::new(source, file).parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;
    use pretty_assertions::assert_eq;

    fn file() -> Arc<Path> {
        Arc::from(Path::new("test.sbl"))
    }

    fn parse_ok(src: &str) -> Source {
        match parse(src, file()) {
            Ok(source) => source,
            Err(e) => panic!("parse failed: {}", e),
        }
    }

    fn parse_err(src: &str) -> SyntaxError {
        match parse(src, file()) {
            Ok(source) => panic!("expected parse error, got {:?}", source),
            Err(e) => e,
        }
    }

    fn only_fun(src: &str) -> FunDef {
        let source = parse_ok(src);
        let funs: Vec<_> = source.fun_defs().cloned().collect();
        assert_eq!(funs.len(), 1, "expected one function in {:?}", src);
        funs.into_iter().next().unwrap()
    }

    fn kinds(stmt: &StackStmt) -> Vec<(bool, ItemKind)> {
        stmt.actions
            .iter()
            .map(|a| (a.pop, a.item.kind.clone()))
            .collect()
    }

    #[test]
    fn test_empty_source() {
        let source = parse_ok("  # nothing here\n");
        assert!(source.items.is_empty());
    }

    #[test]
    fn test_push_and_pop_items() {
        let fun = only_fun("main { 1 'a \"s\" T F @ x .y .@ .3 ; }");
        assert_eq!(fun.name, "main");
        let Stmt::Stack(stmt) = &fun.block.stmts[0] else {
            panic!("expected stack statement");
        };
        assert_eq!(
            kinds(stmt),
            vec![
                (false, ItemKind::Int(BigInt::from(1))),
                (false, ItemKind::Char('a')),
                (false, ItemKind::Str("s".into())),
                (false, ItemKind::Bool(true)),
                (false, ItemKind::Bool(false)),
                (false, ItemKind::Nil),
                (false, ItemKind::Ident("x".into())),
                (true, ItemKind::Ident("y".into())),
                (true, ItemKind::Nil),
                (true, ItemKind::Int(BigInt::from(3))),
            ]
        );
    }

    #[test]
    fn test_nested_stack_literal() {
        let fun = only_fun("main { [1 [a] \"b\"] ; }");
        let Stmt::Stack(stmt) = &fun.block.stmts[0] else {
            panic!("expected stack statement");
        };
        let ItemKind::Stack(items) = &stmt.actions[0].item.kind else {
            panic!("expected stack literal");
        };
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[1].kind, ItemKind::Stack(inner) if inner.len() == 1));
        assert!(!stmt.actions[0].item.is_const());
    }

    #[test]
    fn test_empty_statement() {
        let fun = only_fun("main { ; ; }");
        assert_eq!(fun.block.stmts.len(), 2);
        assert!(matches!(&fun.block.stmts[0], Stmt::Stack(s) if s.actions.is_empty()));
    }

    #[test]
    fn test_branch_with_and_without_el() {
        let fun = only_fun("main { T; br { 1; } el { 2; } br { 3; } }");
        let Stmt::Branch(with_el) = &fun.block.stmts[1] else {
            panic!("expected branch");
        };
        assert!(with_el.el_block.is_some());
        let Stmt::Branch(without) = &fun.block.stmts[2] else {
            panic!("expected branch");
        };
        assert!(without.el_block.is_none());
    }

    #[test]
    fn test_loop() {
        let fun = only_fun("count { loop { 1 - ; } }");
        let Stmt::Loop(l) = &fun.block.stmts[0] else {
            panic!("expected loop");
        };
        assert_eq!(l.block.stmts.len(), 1);
    }

    #[test]
    fn test_imports_and_functions_in_order() {
        let source = parse_ok("import \"lib.sbl\";\nmain { }\nimport \"other.sbl\";\nhelper { }");
        let imports: Vec<_> = source.imports().map(|i| i.path.as_str()).collect();
        assert_eq!(imports, vec!["lib.sbl", "other.sbl"]);
        let funs: Vec<_> = source.fun_defs().map(|f| f.name.as_str()).collect();
        assert_eq!(funs, vec!["main", "helper"]);
    }

    #[test]
    fn test_comments_are_skipped() {
        let fun = only_fun("# header\nmain { # inside\n 1 ; # trailing\n}");
        assert_eq!(fun.block.stmts.len(), 1);
    }

    #[test]
    fn test_ranges() {
        let source = parse_ok("main {\n  1 2 ;\n}");
        let fun = source.fun_defs().next().unwrap();
        assert_eq!(fun.range.to_string(), "1:1-3:1");
        assert_eq!(fun.block.stmts[0].range().to_string(), "2:3-7");
        assert!(Arc::ptr_eq(&fun.file, &source.file));
    }

    #[test]
    fn test_missing_semicolon_names_expected_set() {
        let err = parse_err("main { 1 2 }");
        let msg = err.to_string();
        assert!(msg.contains("`semicolon`"), "msg was: {}", msg);
        assert!(msg.contains("`right brace` token"), "msg was: {}", msg);
        assert_eq!(err.range().to_string(), "1:12");
    }

    #[test]
    fn test_unexpected_end_of_input() {
        let err = parse_err("main { 1 ;");
        let msg = err.to_string();
        assert!(msg.contains("instead got end of input"), "msg was: {}", msg);
        assert!(msg.starts_with("test.sbl:"), "msg was: {}", msg);
    }

    #[test]
    fn test_bad_pop_target() {
        let err = parse_err("main { .\"s\" ; }");
        let msg = err.to_string();
        assert!(msg.contains("only names, nil and integers"), "msg was: {}", msg);
    }

    #[test]
    fn test_top_level_statement_rejected() {
        let err = parse_err("1 ;");
        let SyntaxError::Parse(e) = err else {
            panic!("expected parse error");
        };
        assert_eq!(e.expected, vec![TokenKind::Import, TokenKind::Ident]);
    }

    #[test]
    fn test_import_requires_string() {
        let err = parse_err("import lib;");
        assert!(err.to_string().contains("expected `string` token"));
    }

    fn nested_stacks(depth: usize) -> String {
        format!("main {{ {}{} ; }}", "[".repeat(depth), "]".repeat(depth))
    }

    #[test]
    fn test_nesting_limit() {
        // The function body is the first level.
        parse_ok(&nested_stacks(MAX_NESTING - 1));

        let err = parse_err(&nested_stacks(MAX_NESTING));
        let msg = err.to_string();
        assert!(msg.contains("cannot nest deeper than 256 levels"), "msg was: {}", msg);
        assert_eq!(err.range().start.col, 8 + MAX_NESTING - 1);
    }

    #[test]
    fn test_runaway_nesting_is_an_error() {
        let err = parse_err(&nested_stacks(50_000));
        assert!(matches!(err, SyntaxError::Parse(_)));

        let src = format!("main {{ T; {}{} }}", "br { ".repeat(50_000), "} ".repeat(50_000));
        let err = parse_err(&src);
        assert!(err.to_string().contains("cannot nest deeper"), "got: {}", err);

        let src = format!("main {{ {}{} }}", "loop { ".repeat(1_000), "} ".repeat(1_000));
        assert!(parse_err(&src).to_string().contains("cannot nest deeper"));
    }

    #[test]
    fn test_lex_error_surfaces() {
        let err = parse_err("main { ~ }");
        assert!(matches!(err, SyntaxError::Lex(_)));
    }
}
