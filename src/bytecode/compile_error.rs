use thiserror::Error;

use super::ir::Origin;

#[derive(Debug, Clone, Error)]
pub enum CompileError {
    /// Two top-level functions with the same name.
    DuplicateFunction {
        name: String,
        first: Origin,
        second: Origin,
    },
    /// A pop target the compiler cannot bind or discard.
    MalformedPopTarget { found: &'static str, origin: Origin },
    /// Internal compiler error: a reserved jump slot was never filled in.
    UnpatchedJump { function: String, addr: usize },
}

impl CompileError {
    /// Where the error points, if anywhere.
    pub fn origin(&self) -> Option<&Origin> {
        match self {
            CompileError::DuplicateFunction { second, .. } => Some(second),
            CompileError::MalformedPopTarget { origin, .. } => Some(origin),
            CompileError::UnpatchedJump { .. } => None,
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::DuplicateFunction {
                name,
                first,
                second,
            } => {
                write!(f, "compile error: function `{}` is defined twice", name)?;
                write!(f, "\n  first defined at {}", first)?;
                write!(f, "\n  defined again at {}", second)
            }
            CompileError::MalformedPopTarget { found, origin } => {
                write!(f, "compile error: {}: cannot pop into a {}", origin, found)?;
                write!(f, "\n  hint: only names, nil and integers can follow `.`")
            }
            CompileError::UnpatchedJump { function, addr } => write!(
                f,
                "compile error: internal error: jump at {} in `{}` was never patched",
                addr, function
            ),
        }
    }
}
