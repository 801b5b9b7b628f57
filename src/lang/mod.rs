//! # SBL language model
//!
//! - [`ast`]: what the parser produces and the compiler consumes.
//! - [`value`]: what lives on the operand stack at run time.

pub mod ast;
pub mod value;
