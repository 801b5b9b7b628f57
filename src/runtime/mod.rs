pub mod builtins;
pub mod runtime_error;
pub mod vm;

pub use builtins::{Builtins, OutputSink};
pub use runtime_error::{Fault, RuntimeError, TraceFrame};
pub use vm::{Snapshot, Vm, VmConfig};
