//! SBL: a small stack-based language.
//!
//! Source files go through [`frontend`] (tokenizer, parser, import
//! resolution), are lowered to bytecode by [`bytecode`] and run on the stack
//! machine in [`runtime`]. [`pipeline`] strings the stages together.

pub mod bytecode;
pub mod error;
pub mod frontend;
pub mod lang;
pub mod pipeline;
pub mod runtime;

pub use error::{Error, ErrorKind};
pub use pipeline::{LoadConfig, load_program, load_programs, run_program};
