//! # SBL abstract syntax tree
//!
//! Produced by the parser, flattened by the preprocessor, consumed by the
//! bytecode compiler. Every node keeps the range it was parsed from.

use std::path::Path;
use std::sync::Arc;

use num_bigint::BigInt;

use crate::frontend::position::Range;

/// A literal or name appearing in a stack statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub kind: ItemKind,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    Int(BigInt),
    Ident(String),
    Char(char),
    Str(String),
    Bool(bool),
    Nil,
    /// `[ ... ]`, nestable, may mix names and literals.
    Stack(Vec<Item>),
}

impl Item {
    pub fn new(kind: ItemKind, range: Range) -> Self {
        Item { kind, range }
    }

    /// True when no identifier appears anywhere inside this item.
    pub fn is_const(&self) -> bool {
        match &self.kind {
            ItemKind::Ident(_) => false,
            ItemKind::Stack(items) => items.iter().all(Item::is_const),
            _ => true,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self.kind {
            ItemKind::Int(_) => "integer",
            ItemKind::Ident(_) => "identifier",
            ItemKind::Char(_) => "character",
            ItemKind::Str(_) => "string",
            ItemKind::Bool(_) => "boolean",
            ItemKind::Nil => "nil",
            ItemKind::Stack(_) => "stack",
        }
    }
}

/// One push or pop inside a stack statement.
#[derive(Debug, Clone, PartialEq)]
pub struct StackAction {
    pub item: Item,
    pub pop: bool,
}

impl StackAction {
    pub fn push(item: Item) -> Self {
        StackAction { item, pop: false }
    }

    pub fn pop(item: Item) -> Self {
        StackAction { item, pop: true }
    }
}

/// `a .b [c 1] ;`
#[derive(Debug, Clone, PartialEq)]
pub struct StackStmt {
    pub actions: Vec<StackAction>,
    pub range: Range,
}

/// `br { ... } el { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub br_block: Block,
    pub el_block: Option<Block>,
    pub range: Range,
}

/// `loop { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct Loop {
    pub block: Block,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Stack(StackStmt),
    Branch(Branch),
    Loop(Loop),
}

impl Stmt {
    pub fn range(&self) -> Range {
        match self {
            Stmt::Stack(s) => s.range,
            Stmt::Branch(b) => b.range,
            Stmt::Loop(l) => l.range,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub range: Range,
}

/// A named top-level function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunDef {
    pub name: String,
    pub block: Block,
    pub range: Range,
    /// File the definition was parsed from.
    pub file: Arc<Path>,
}

/// `import "path";`
#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub path: String,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TopLevel {
    FunDef(FunDef),
    Import(Import),
}

/// The parsed contents of one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub file: Arc<Path>,
    pub items: Vec<TopLevel>,
}

impl Source {
    pub fn fun_defs(&self) -> impl Iterator<Item = &FunDef> {
        self.items.iter().filter_map(|top| match top {
            TopLevel::FunDef(f) => Some(f),
            TopLevel::Import(_) => None,
        })
    }

    pub fn imports(&self) -> impl Iterator<Item = &Import> {
        self.items.iter().filter_map(|top| match top {
            TopLevel::Import(i) => Some(i),
            TopLevel::FunDef(_) => None,
        })
    }
}
