use std::collections::HashMap;

use log::{debug, trace};

use crate::{
    bytecode::{
        compile_error::CompileError,
        ir::{BC, Fun, FunTable, Origin},
        op::{Op, PopTarget},
    },
    frontend::position::Range,
    lang::{
        ast::{Block, Branch, FunDef, Item, ItemKind, Loop, StackAction, Stmt},
        value::Val,
    },
    runtime::builtins::{APPEND, Builtins},
};

/// Lowers function definitions to bytecode.
///
/// Pass 1 collects every function name so calls can refer forward. Pass 2
/// lowers each body into its own instruction vector.
pub struct Compiler<'a> {
    builtins: &'a Builtins,
}

impl<'a> Compiler<'a> {
    pub fn new(builtins: &'a Builtins) -> Self {
        Self { builtins }
    }

    pub fn compile(&self, defs: &[FunDef]) -> Result<FunTable, CompileError> {
        let mut names: HashMap<&str, &FunDef> = HashMap::new();
        for def in defs {
            if let Some(first) = names.insert(def.name.as_str(), def) {
                return Err(CompileError::DuplicateFunction {
                    name: def.name.clone(),
                    first: Origin::new(first.file.clone(), first.range),
                    second: Origin::new(def.file.clone(), def.range),
                });
            }
        }

        let mut table = FunTable::new();
        for def in defs {
            let fun = FunBuilder::new(self, &names, def).build()?;
            trace!("compiled `{}` ({} instructions)", fun.name, fun.code.len());
            table.insert(fun)?;
        }
        debug!("compiled {} functions", table.len());
        Ok(table)
    }
}

/// A code slot: either a finished instruction or a jump waiting for its target.
enum Slot {
    Ready(BC),
    Reserved(Origin),
}

/// Lowering state for one function body.
struct FunBuilder<'c> {
    compiler: &'c Compiler<'c>,
    names: &'c HashMap<&'c str, &'c FunDef>,
    def: &'c FunDef,
    slots: Vec<Slot>,
}

impl<'c> FunBuilder<'c> {
    fn new(
        compiler: &'c Compiler<'c>,
        names: &'c HashMap<&'c str, &'c FunDef>,
        def: &'c FunDef,
    ) -> Self {
        FunBuilder {
            compiler,
            names,
            def,
            slots: Vec::new(),
        }
    }

    fn build(mut self) -> Result<Fun, CompileError> {
        let def = self.def;
        self.block(&def.block)?;
        self.emit(Op::Ret, Range::at(def.block.range.end));

        let mut code = Vec::with_capacity(self.slots.len());
        for (addr, slot) in self.slots.into_iter().enumerate() {
            match slot {
                Slot::Ready(bc) => code.push(bc),
                Slot::Reserved(_) => {
                    return Err(CompileError::UnpatchedJump {
                        function: def.name.clone(),
                        addr,
                    });
                }
            }
        }

        Ok(Fun {
            name: def.name.clone(),
            code,
            origin: Origin::new(def.file.clone(), def.range),
        })
    }

    fn origin(&self, range: Range) -> Origin {
        Origin::new(self.def.file.clone(), range)
    }

    /// Index of the next instruction.
    fn here(&self) -> usize {
        self.slots.len()
    }

    fn emit(&mut self, op: Op, range: Range) {
        let origin = self.origin(range);
        self.slots.push(Slot::Ready(BC { op, origin }));
    }

    fn reserve(&mut self, range: Range) -> usize {
        let addr = self.here();
        let origin = self.origin(range);
        self.slots.push(Slot::Reserved(origin));
        addr
    }

    fn patch(&mut self, addr: usize, op: Op) {
        if let Some(slot) = self.slots.get_mut(addr) {
            if let Slot::Reserved(origin) = slot {
                let origin = origin.clone();
                *slot = Slot::Ready(BC { op, origin });
            }
        }
    }

    fn block(&mut self, block: &Block) -> Result<(), CompileError> {
        for stmt in &block.stmts {
            match stmt {
                Stmt::Stack(stmt) => {
                    for action in &stmt.actions {
                        self.action(action)?;
                    }
                }
                Stmt::Branch(branch) => self.branch(branch)?,
                Stmt::Loop(l) => self.loop_stmt(l)?,
            }
        }
        Ok(())
    }

    fn action(&mut self, action: &StackAction) -> Result<(), CompileError> {
        if action.pop {
            self.pop_item(&action.item)
        } else {
            self.push_item(&action.item);
            Ok(())
        }
    }

    fn is_callable(&self, name: &str) -> bool {
        self.names.contains_key(name) || self.compiler.builtins.contains(name)
    }

    fn push_item(&mut self, item: &Item) {
        if let Some(val) = Val::from_const(item) {
            self.emit(Op::Push(val), item.range);
            return;
        }

        // only names and stacks holding names are left
        match &item.kind {
            ItemKind::Ident(name) if self.is_callable(name) => {
                self.emit(Op::Call(name.clone()), item.range)
            }
            ItemKind::Ident(name) => self.emit(Op::Load(name.clone()), item.range),
            ItemKind::Stack(items) => {
                self.emit(Op::Push(Val::Stack(Vec::new())), item.range);
                for elem in items {
                    self.push_item(elem);
                    self.emit(Op::Call(APPEND.to_string()), elem.range);
                }
            }
            _ => unreachable!("constant item {:?} failed to materialize", item.kind),
        }
    }

    fn pop_item(&mut self, item: &Item) -> Result<(), CompileError> {
        let target = match &item.kind {
            ItemKind::Ident(name) => PopTarget::Bind(name.clone()),
            ItemKind::Nil => PopTarget::Discard(Val::Nil),
            ItemKind::Int(n) => PopTarget::Discard(Val::Int(n.clone())),
            _ => {
                return Err(CompileError::MalformedPopTarget {
                    found: item.describe(),
                    origin: self.origin(item.range),
                });
            }
        };
        self.emit(Op::Pop(target), item.range);
        Ok(())
    }

    fn branch(&mut self, branch: &Branch) -> Result<(), CompileError> {
        let jmpz = self.reserve(branch.range);
        self.block(&branch.br_block)?;

        match &branch.el_block {
            Some(el_block) => {
                let jmp = self.reserve(branch.range);
                let el_start = self.here();
                self.patch(jmpz, Op::Jmpz(el_start));
                self.block(el_block)?;
                let end = self.here();
                self.patch(jmp, Op::Jmp(end));
            }
            None => {
                let end = self.here();
                self.patch(jmpz, Op::Jmpz(end));
            }
        }
        Ok(())
    }

    fn loop_stmt(&mut self, l: &Loop) -> Result<(), CompileError> {
        let start = self.reserve(l.range);
        self.block(&l.block)?;
        self.emit(Op::Jmp(start), Range::at(l.block.range.end));
        let end = self.here();
        self.patch(start, Op::Jmpz(end));
        Ok(())
    }
}

/// Compiles definitions against the standard builtin table.
pub fn compile(defs: &[FunDef]) -> Result<FunTable, CompileError> {
    Compiler::new(&Builtins::standard()).compile(defs)
}
