use super::disasm::format_value as operand;
use crate::lang::value::Val;

// =============================================================================
// OP - Bytecode instructions
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Push a copy of the operand.
    Push(Val),

    /// Pop the top value, binding or discarding it.
    Pop(PopTarget),

    /// Push the value of a local.
    Load(String),

    /// Peek the top value and jump to the absolute index when it is falsy.
    /// The value stays on the stack.
    Jmpz(usize),

    /// Unconditional jump to an absolute index.
    Jmp(usize),

    /// Call a user function or builtin, resolved by name at run time.
    Call(String),

    Ret,
}

/// What a `POP` does with the value it removes.
#[derive(Debug, Clone, PartialEq)]
pub enum PopTarget {
    /// `.name` binds a local in the current frame.
    Bind(String),
    /// `.@` or `.3`: the value is dropped. The operand is kept for listings.
    Discard(Val),
}

/// Payload-free opcode tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Push,
    Pop,
    Load,
    Jmpz,
    Jmp,
    Call,
    Ret,
}

impl Op {
    pub fn opcode(&self) -> OpCode {
        match self {
            Op::Push(_) => OpCode::Push,
            Op::Pop(_) => OpCode::Pop,
            Op::Load(_) => OpCode::Load,
            Op::Jmpz(_) => OpCode::Jmpz,
            Op::Jmp(_) => OpCode::Jmp,
            Op::Call(_) => OpCode::Call,
            Op::Ret => OpCode::Ret,
        }
    }

    /// Jump target, if this is a jump.
    pub fn target(&self) -> Option<usize> {
        match self {
            Op::Jmpz(addr) | Op::Jmp(addr) => Some(*addr),
            _ => None,
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OpCode::Push => "PUSH",
            OpCode::Pop => "POP",
            OpCode::Load => "LOAD",
            OpCode::Jmpz => "JMPZ",
            OpCode::Jmp => "JMP",
            OpCode::Call => "CALL",
            OpCode::Ret => "RET",
        };
        write!(f, "{}", name)
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::Push(v) => write!(f, "PUSH {}", operand(v)),
            Op::Pop(PopTarget::Bind(name)) => write!(f, "POP {}", name),
            Op::Pop(PopTarget::Discard(v)) => write!(f, "POP ({})", operand(v)),
            Op::Load(name) => write!(f, "LOAD {}", name),
            Op::Jmpz(addr) => write!(f, "JMPZ {}", addr),
            Op::Jmp(addr) => write!(f, "JMP {}", addr),
            Op::Call(name) => write!(f, "CALL {}", name),
            Op::Ret => write!(f, "RET"),
        }
    }
}
