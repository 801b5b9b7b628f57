use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use super::compile_error::CompileError;
use super::op::{Op, OpCode};
use crate::frontend::position::Range;

/// Where a piece of bytecode came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Origin {
    pub file: Arc<Path>,
    pub range: Range,
}

impl Origin {
    pub fn new(file: Arc<Path>, range: Range) -> Self {
        Origin { file, range }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.range)
    }
}

/// A single instruction with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct BC {
    pub op: Op,
    pub origin: Origin,
}

impl BC {
    pub fn opcode(&self) -> OpCode {
        self.op.opcode()
    }
}

/// A compiled function.
#[derive(Debug, Clone, PartialEq)]
pub struct Fun {
    pub name: String,
    pub code: Vec<BC>,
    /// Definition site.
    pub origin: Origin,
}

impl Fun {
    pub fn ops(&self) -> impl Iterator<Item = &Op> {
        self.code.iter().map(|bc| &bc.op)
    }
}

/// All compiled functions of a program, by name.
///
/// Insertion order is kept so listings come out in definition order.
#[derive(Debug, Clone, Default)]
pub struct FunTable {
    funs: Vec<Fun>,
    index: HashMap<String, usize>,
}

impl FunTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a function. A name that is already taken is an error citing
    /// both definitions.
    pub fn insert(&mut self, fun: Fun) -> Result<(), CompileError> {
        if let Some(&existing) = self.index.get(&fun.name) {
            return Err(CompileError::DuplicateFunction {
                name: fun.name.clone(),
                first: self.funs[existing].origin.clone(),
                second: fun.origin,
            });
        }
        self.index.insert(fun.name.clone(), self.funs.len());
        self.funs.push(fun);
        Ok(())
    }

    /// Moves every function of `other` into this table.
    pub fn merge(&mut self, other: FunTable) -> Result<(), CompileError> {
        for fun in other.funs {
            self.insert(fun)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Fun> {
        self.index.get(name).map(|&i| &self.funs[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fun> {
        self.funs.iter()
    }

    pub fn len(&self) -> usize {
        self.funs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funs.is_empty()
    }
}
