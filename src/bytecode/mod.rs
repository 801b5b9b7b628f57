pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod ir;
pub mod op;

pub use compile::Compiler;
pub use compile_error::CompileError;
pub use ir::{BC, Fun, FunTable, Origin};
pub use op::{Op, OpCode, PopTarget};
