//! Builtin functions.
//!
//! Builtins run directly against the operand stack, without a frame of their
//! own. Every builtin checks its operands before removing anything, so a
//! failing builtin leaves the stack as it found it.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::Write;

use num_bigint::BigInt;
use num_traits::Zero;

use crate::lang::value::Val;
use crate::runtime::runtime_error::Fault;

/// Appends the top value to the stack value beneath it. Emitted by the
/// compiler for stack literals that contain names; `#` cannot start an
/// identifier, so user code never sees it.
pub const APPEND: &str = "#append";

/// Where `print` and `println` write.
pub trait OutputSink {
    fn write_text(&mut self, text: &str) -> std::io::Result<()>;
    fn write_line(&mut self, text: &str) -> std::io::Result<()>;
}

impl<W: Write + ?Sized> OutputSink for W {
    fn write_text(&mut self, text: &str) -> std::io::Result<()> {
        self.write_all(text.as_bytes())?;
        self.flush()
    }

    fn write_line(&mut self, text: &str) -> std::io::Result<()> {
        self.write_all(text.as_bytes())?;
        self.write_all(b"\n")?;
        self.flush()
    }
}

/// What a builtin can touch.
pub struct BuiltinCtx<'a> {
    pub stack: &'a mut Vec<Val>,
    pub out: &'a mut dyn OutputSink,
}

pub type BuiltinFn = fn(&mut BuiltinCtx<'_>) -> Result<(), Fault>;

/// Name to builtin lookup, built once per run.
#[derive(Clone)]
pub struct Builtins {
    table: HashMap<&'static str, BuiltinFn>,
}

impl Builtins {
    pub fn empty() -> Self {
        Builtins {
            table: HashMap::new(),
        }
    }

    pub fn standard() -> Self {
        let mut b = Builtins::empty();
        b.register("+", add);
        b.register("-", sub);
        b.register("*", mul);
        b.register("/", div);
        b.register("==", eq);
        b.register("!=", ne);
        b.register("<", lt);
        b.register("<=", le);
        b.register(">", gt);
        b.register(">=", ge);
        b.register("push", push);
        b.register("pop", pop);
        b.register("len", len);
        b.register("$", depth);
        b.register("^", dup);
        b.register("print", print);
        b.register("println", println);
        b.register(APPEND, append);
        b
    }

    pub fn register(&mut self, name: &'static str, f: BuiltinFn) {
        self.table.insert(name, f);
    }

    pub fn get(&self, name: &str) -> Option<BuiltinFn> {
        self.table.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.table.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for Builtins {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for Builtins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builtins")
            .field("names", &self.names())
            .finish()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// The two topmost values, deeper one first, without removing them.
fn top_two(stack: &[Val]) -> Result<(&Val, &Val), Fault> {
    match stack {
        [.., lhs, rhs] => Ok((lhs, rhs)),
        _ => Err(Fault::EmptyStack("pop from")),
    }
}

fn top(stack: &[Val]) -> Result<&Val, Fault> {
    stack.last().ok_or(Fault::EmptyStack("pop from"))
}

/// Replaces the two topmost values with `result`.
fn replace_two(stack: &mut Vec<Val>, result: Val) {
    stack.truncate(stack.len().saturating_sub(2));
    stack.push(result);
}

fn binary(
    ctx: &mut BuiltinCtx<'_>,
    f: impl FnOnce(&Val, &Val) -> Result<Val, Fault>,
) -> Result<(), Fault> {
    let (lhs, rhs) = top_two(ctx.stack)?;
    let result = f(lhs, rhs)?;
    replace_two(ctx.stack, result);
    Ok(())
}

fn int_op(
    op: &str,
    lhs: &Val,
    rhs: &Val,
    f: impl FnOnce(&BigInt, &BigInt) -> Result<BigInt, Fault>,
) -> Result<Val, Fault> {
    match (lhs, rhs) {
        (Val::Int(a), Val::Int(b)) => Ok(Val::Int(f(a, b)?)),
        _ if lhs.kind() != rhs.kind() => Err(Fault::mismatch(op, lhs, rhs)),
        _ => Err(Fault::wrong_type(op, "integer", lhs)),
    }
}

fn compare(ctx: &mut BuiltinCtx<'_>, op: &str, test: fn(Ordering) -> bool) -> Result<(), Fault> {
    binary(ctx, |lhs, rhs| Ok(Val::Bool(test(lhs.try_cmp(rhs, op)?))))
}

fn append_to(ctx: &mut BuiltinCtx<'_>, op: &str) -> Result<(), Fault> {
    let (target, _) = top_two(ctx.stack)?;
    if !matches!(target, Val::Stack(_)) {
        return Err(Fault::wrong_type(op, "stack", target));
    }
    if let Some(val) = ctx.stack.pop() {
        if let Some(Val::Stack(items)) = ctx.stack.last_mut() {
            items.push(val);
        }
    }
    Ok(())
}

fn pop_text(ctx: &mut BuiltinCtx<'_>) -> Result<String, Fault> {
    let val = ctx.stack.pop().ok_or(Fault::EmptyStack("print from"))?;
    Ok(val.to_string())
}

// =============================================================================
// Arithmetic
// =============================================================================

fn add(ctx: &mut BuiltinCtx<'_>) -> Result<(), Fault> {
    binary(ctx, |lhs, rhs| match (lhs, rhs) {
        (Val::Str(a), Val::Str(b)) => Ok(Val::Str(format!("{}{}", a, b))),
        (Val::Stack(a), Val::Stack(b)) => Ok(Val::Stack(a.iter().chain(b).cloned().collect())),
        _ => int_op("+", lhs, rhs, |a, b| Ok(a + b)),
    })
}

fn sub(ctx: &mut BuiltinCtx<'_>) -> Result<(), Fault> {
    binary(ctx, |lhs, rhs| int_op("-", lhs, rhs, |a, b| Ok(a - b)))
}

fn mul(ctx: &mut BuiltinCtx<'_>) -> Result<(), Fault> {
    binary(ctx, |lhs, rhs| int_op("*", lhs, rhs, |a, b| Ok(a * b)))
}

/// Truncates toward zero.
fn div(ctx: &mut BuiltinCtx<'_>) -> Result<(), Fault> {
    binary(ctx, |lhs, rhs| {
        int_op("/", lhs, rhs, |a, b| {
            if b.is_zero() {
                Err(Fault::DivideByZero)
            } else {
                Ok(a / b)
            }
        })
    })
}

// =============================================================================
// Comparison
// =============================================================================

fn eq(ctx: &mut BuiltinCtx<'_>) -> Result<(), Fault> {
    binary(ctx, |lhs, rhs| Ok(Val::Bool(lhs.try_eq(rhs, "==")?)))
}

fn ne(ctx: &mut BuiltinCtx<'_>) -> Result<(), Fault> {
    binary(ctx, |lhs, rhs| Ok(Val::Bool(!lhs.try_eq(rhs, "!=")?)))
}

fn lt(ctx: &mut BuiltinCtx<'_>) -> Result<(), Fault> {
    compare(ctx, "<", Ordering::is_lt)
}

fn le(ctx: &mut BuiltinCtx<'_>) -> Result<(), Fault> {
    compare(ctx, "<=", Ordering::is_le)
}

fn gt(ctx: &mut BuiltinCtx<'_>) -> Result<(), Fault> {
    compare(ctx, ">", Ordering::is_gt)
}

fn ge(ctx: &mut BuiltinCtx<'_>) -> Result<(), Fault> {
    compare(ctx, ">=", Ordering::is_ge)
}

// =============================================================================
// Collections
// =============================================================================

/// ( stack v -- stack )
fn push(ctx: &mut BuiltinCtx<'_>) -> Result<(), Fault> {
    append_to(ctx, "push")
}

fn append(ctx: &mut BuiltinCtx<'_>) -> Result<(), Fault> {
    append_to(ctx, APPEND)
}

/// ( stack -- stack v )
fn pop(ctx: &mut BuiltinCtx<'_>) -> Result<(), Fault> {
    let val = match ctx.stack.last_mut() {
        Some(Val::Stack(items)) => items
            .pop()
            .ok_or_else(|| Fault::EmptyCollection("pop".to_string()))?,
        Some(other) => return Err(Fault::wrong_type("pop", "stack", other)),
        None => return Err(Fault::EmptyStack("pop from")),
    };
    ctx.stack.push(val);
    Ok(())
}

/// ( stack|string -- int )
fn len(ctx: &mut BuiltinCtx<'_>) -> Result<(), Fault> {
    let n = match top(ctx.stack)? {
        Val::Stack(items) => items.len(),
        Val::Str(s) => s.chars().count(),
        other => return Err(Fault::wrong_type("len", "stack or string", other)),
    };
    ctx.stack.pop();
    ctx.stack.push(Val::Int(BigInt::from(n)));
    Ok(())
}

// =============================================================================
// Stack introspection
// =============================================================================

fn depth(ctx: &mut BuiltinCtx<'_>) -> Result<(), Fault> {
    let n = ctx.stack.len();
    ctx.stack.push(Val::Int(BigInt::from(n)));
    Ok(())
}

fn dup(ctx: &mut BuiltinCtx<'_>) -> Result<(), Fault> {
    let val = ctx
        .stack
        .last()
        .cloned()
        .ok_or(Fault::EmptyStack("duplicate top of"))?;
    ctx.stack.push(val);
    Ok(())
}

// =============================================================================
// I/O
// =============================================================================

fn print(ctx: &mut BuiltinCtx<'_>) -> Result<(), Fault> {
    let text = pop_text(ctx)?;
    ctx.out.write_text(&text)?;
    Ok(())
}

fn println(ctx: &mut BuiltinCtx<'_>) -> Result<(), Fault> {
    let text = pop_text(ctx)?;
    ctx.out.write_line(&text)?;
    Ok(())
}
