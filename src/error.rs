//! Crate-level error type.
//!
//! Every stage has its own error; [`Error`] gathers them so the driver can
//! report any failure the same way and pick an exit code from
//! [`Error::kind`].

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::bytecode::compile_error::CompileError;
use crate::frontend::parser_error::SyntaxError;
use crate::frontend::position::Range;
use crate::frontend::preprocess::ImportError;
use crate::runtime::runtime_error::{Fault, RuntimeError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Import(#[from] ImportError),

    /// A failure inside an imported file, seen from the file importing it.
    #[error("{source}\n  imported from {}:{range}", .path.display())]
    Chained {
        path: PathBuf,
        range: Range,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lex,
    Parse,
    ImportResolution,
    Chained,
    Compile,
    RuntimeType,
    HostRecursionLimit,
    /// Operand stack or step budget exhausted.
    ResourceLimit,
    Interrupted,
    Io,
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Syntax(SyntaxError::Lex(_)) => ErrorKind::Lex,
            Error::Syntax(SyntaxError::Parse(_)) => ErrorKind::Parse,
            Error::Import(_) => ErrorKind::ImportResolution,
            Error::Chained { .. } => ErrorKind::Chained,
            Error::Compile(_) => ErrorKind::Compile,
            Error::Runtime(e) => match e.fault {
                Fault::RecursionLimit(_) => ErrorKind::HostRecursionLimit,
                Fault::StackLimit(_) | Fault::StepLimit(_) => ErrorKind::ResourceLimit,
                Fault::Interrupted => ErrorKind::Interrupted,
                _ => ErrorKind::RuntimeType,
            },
            Error::Io { .. } => ErrorKind::Io,
        }
    }

    /// The error at the bottom of an import chain.
    pub fn root_cause(&self) -> &Error {
        let mut err = self;
        while let Error::Chained { source, .. } = err {
            err = &**source;
        }
        err
    }

    /// Files that imported their way down to the failure, outermost first.
    pub fn import_chain(&self) -> Vec<&Path> {
        let mut chain = Vec::new();
        let mut err = self;
        while let Error::Chained { path, source, .. } = err {
            chain.push(path.as_path());
            err = &**source;
        }
        chain
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser::parse;
    use std::sync::Arc;

    fn syntax_error() -> Error {
        let err = parse("main {", Arc::from(Path::new("c.sbl"))).unwrap_err();
        Error::from(err)
    }

    #[test]
    fn test_chain_accessors() {
        let err = Error::Chained {
            path: PathBuf::from("a.sbl"),
            range: Range::default(),
            source: Box::new(Error::Chained {
                path: PathBuf::from("b.sbl"),
                range: Range::default(),
                source: Box::new(syntax_error()),
            }),
        };
        assert_eq!(err.kind(), ErrorKind::Chained);
        assert_eq!(err.root_cause().kind(), ErrorKind::Parse);
        assert_eq!(err.import_chain(), vec![Path::new("a.sbl"), Path::new("b.sbl")]);

        let msg = err.to_string();
        assert!(msg.starts_with("c.sbl:"), "msg was: {}", msg);
        let b = msg.find("imported from b.sbl").unwrap();
        let a = msg.find("imported from a.sbl").unwrap();
        assert!(b < a, "msg was: {}", msg);
    }

    #[test]
    fn test_runtime_kinds() {
        let err = Error::from(RuntimeError::new(Fault::RecursionLimit(3)));
        assert_eq!(err.kind(), ErrorKind::HostRecursionLimit);
        let err = Error::from(RuntimeError::new(Fault::StackLimit(10)));
        assert_eq!(err.kind(), ErrorKind::ResourceLimit);
        let err = Error::from(RuntimeError::new(Fault::Interrupted));
        assert_eq!(err.kind(), ErrorKind::Interrupted);
        let err = Error::from(RuntimeError::new(Fault::DivideByZero));
        assert_eq!(err.kind(), ErrorKind::RuntimeType);
    }
}
