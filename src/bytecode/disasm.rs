use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;

use crate::bytecode::{
    ir::{Fun, FunTable},
    op::{Op, OpCode, PopTarget},
};
use crate::lang::value::Val;

/// Disassembly of every function in definition order.
pub fn disassemble(table: &FunTable) -> String {
    let mut out = String::new();
    out.push_str("=== BYTECODE PROGRAM ===\n\n");
    for fun in table.iter() {
        out.push_str(&disassemble_fun(fun));
        out.push('\n');
    }
    out
}

/// Disassembly of a single function.
pub fn disassemble_fun(fun: &Fun) -> String {
    let mut out = String::new();
    let targets: BTreeSet<usize> = fun.ops().filter_map(Op::target).collect();

    // Writing into a String cannot fail.
    let _ = writeln!(out, "════════════════════════════════════════");
    let _ = writeln!(out, " {}  ({})", fun.name, fun.origin);
    let _ = writeln!(out, " {} instructions", fun.code.len());
    let _ = writeln!(out, "════════════════════════════════════════");

    for (ip, bc) in fun.code.iter().enumerate() {
        let is_target = targets.contains(&ip);
        if is_target {
            let _ = writeln!(out, "      ┌──────────────────────────────────");
        }
        let marker = if is_target { "► " } else { "  " };
        let text = format_op(&bc.op, ip);
        let _ = writeln!(out, "{:04} {}{:<32} ; {}", ip, marker, text, bc.origin.range);
    }
    out
}

fn format_op(op: &Op, ip: usize) -> String {
    let name = op.opcode().to_string();
    match op {
        Op::Push(v) => format!("{:<11} {}", name, format_value(v)),
        Op::Pop(PopTarget::Bind(local)) => format!("{:<11} {}", name, local),
        Op::Pop(PopTarget::Discard(v)) => format!("{:<11} ({})", name, format_value(v)),
        Op::Load(local) => format!("{:<11} {}", name, local),
        Op::Call(callee) => format!("{:<11} {}", name, callee),
        Op::Jmpz(target) | Op::Jmp(target) => {
            let direction = if *target <= ip { "↑" } else { "↓" };
            format!("{:<11} {} (→ {:04})", name, direction, target)
        }
        Op::Ret => name,
    }
}

/// Values as they would be written in source.
pub fn format_value(v: &Val) -> String {
    match v {
        Val::Str(s) => format!("{:?}", s),
        Val::Char(c) => format!("'{}", c.escape_default()),
        Val::Bool(true) => "T".to_string(),
        Val::Bool(false) => "F".to_string(),
        Val::Nil => "@".to_string(),
        Val::Int(n) => n.to_string(),
        Val::Stack(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", inner.join(" "))
        }
    }
}

/// Instruction counts per function and per opcode.
pub fn stats(table: &FunTable) -> String {
    let mut out = String::new();
    let total: usize = table.iter().map(|f| f.code.len()).sum();

    let _ = writeln!(out, "=== BYTECODE STATISTICS ===\n");
    let _ = writeln!(out, "Functions:        {}", table.len());
    let _ = writeln!(out, "Instructions:     {}", total);
    let _ = writeln!(out);

    let mut counts: HashMap<OpCode, usize> = HashMap::new();
    for fun in table.iter() {
        for op in fun.ops() {
            *counts.entry(op.opcode()).or_insert(0) += 1;
        }
    }

    let _ = writeln!(out, "Op frequency:");
    let mut counts: Vec<_> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.to_string().cmp(&b.0.to_string())));
    for (op, count) in counts {
        let pct = (count as f64 / total.max(1) as f64) * 100.0;
        let _ = writeln!(out, "  {:<14} {:>4} ({:>5.1}%)", op.to_string(), count, pct);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::compile;
    use crate::frontend::parser::parse;
    use std::path::Path;
    use std::sync::Arc;

    fn table(src: &str) -> FunTable {
        let source = parse(src, Arc::from(Path::new("d.sbl"))).unwrap();
        let defs: Vec<_> = source.fun_defs().cloned().collect();
        compile(&defs).unwrap()
    }

    #[test]
    fn test_marks_jump_targets() {
        let out = disassemble(&table("main { T; br { 1; } el { 2; } }"));
        assert!(out.contains(" main  (d.sbl:"), "out was:\n{}", out);
        assert!(out.contains("0001   JMPZ        ↓ (→ 0004)"), "out was:\n{}", out);
        assert!(out.contains("0004 ► PUSH        2"), "out was:\n{}", out);
        assert!(out.contains("0005 ► RET"), "out was:\n{}", out);
    }

    #[test]
    fn test_backward_jump_arrow() {
        let out = disassemble(&table("main { T; loop { .@ F; } }"));
        assert!(out.contains("JMP         ↑ (→ 0001)"), "out was:\n{}", out);
    }

    #[test]
    fn test_format_value() {
        let v = Val::Stack(vec![Val::from("a"), Val::Char('\n'), Val::Nil, Val::Bool(true)]);
        assert_eq!(format_value(&v), "[\"a\" '\\n @ T]");
    }

    #[test]
    fn test_stats_counts_opcodes() {
        let out = stats(&table("main { 1 2 + ; } f { x ; }"));
        assert!(out.contains("Functions:        2"), "out was:\n{}", out);
        assert!(out.contains("Instructions:     6"), "out was:\n{}", out);
        assert!(out.contains("PUSH              2"), "out was:\n{}", out);
    }
}
