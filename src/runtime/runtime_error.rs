use serde::Serialize;
use thiserror::Error;

use crate::bytecode::ir::Origin;
use crate::lang::value::{Val, ValKind};

/// What went wrong while executing, independent of where.
#[derive(Debug, Error)]
pub enum Fault {
    /// The operand names what was attempted, e.g. "pop from".
    #[error("could not {0} empty stack")]
    EmptyStack(&'static str),

    #[error("`{op}` cannot combine {lhs} with {rhs}")]
    TypeMismatch {
        op: String,
        lhs: ValKind,
        rhs: ValKind,
    },

    #[error("`{op}` expected {expected}; instead got {found}")]
    WrongType {
        op: String,
        expected: &'static str,
        found: ValKind,
    },

    #[error("division by zero")]
    DivideByZero,

    #[error("local `{0}` is not bound")]
    UnboundLocal(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("call depth limit exceeded ({0}); possible infinite recursion")]
    RecursionLimit(usize),

    #[error("operand stack size limit exceeded ({0})")]
    StackLimit(usize),

    #[error("execution step limit exceeded ({0})")]
    StepLimit(u64),

    #[error("`{0}` on an empty stack value")]
    EmptyCollection(String),

    #[error("interrupted")]
    Interrupted,

    #[error("could not write output: {0}")]
    Output(#[from] std::io::Error),
}

impl Fault {
    pub fn mismatch(op: &str, lhs: &Val, rhs: &Val) -> Self {
        Fault::TypeMismatch {
            op: op.to_string(),
            lhs: lhs.kind(),
            rhs: rhs.kind(),
        }
    }

    pub fn wrong_type(op: &str, expected: &'static str, found: &Val) -> Self {
        Fault::WrongType {
            op: op.to_string(),
            expected,
            found: found.kind(),
        }
    }
}

/// One live call at the time of an error.
#[derive(Debug, Clone, Serialize)]
pub struct TraceFrame {
    pub function: String,
    pub defined_at: Origin,
    /// `None` for the entry call.
    pub called_from: Option<Origin>,
}

impl std::fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "`{}` (defined at {})", self.function, self.defined_at)?;
        if let Some(site) = &self.called_from {
            write!(f, " called from {}", site)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub struct RuntimeError {
    #[source]
    pub fault: Fault,
    /// Instruction that was executing.
    pub location: Option<Origin>,
    /// Innermost call first.
    pub trace: Vec<TraceFrame>,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "runtime error: {}: {}", location, self.fault)?,
            None => write!(f, "runtime error: {}", self.fault)?,
        }

        if !self.trace.is_empty() {
            write!(f, "\n  call stack:")?;

            for (i, frame) in self.trace.iter().enumerate() {
                write!(f, "\n    {}: {}", i, frame)?;
            }
        }
        Ok(())
    }
}

impl RuntimeError {
    pub fn new(fault: Fault) -> Self {
        RuntimeError {
            fault,
            location: None,
            trace: Vec::new(),
        }
    }

    pub fn at(mut self, location: Origin) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_trace(mut self, trace: Vec<TraceFrame>) -> Self {
        self.trace = trace;
        self
    }
}
