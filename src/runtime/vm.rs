use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, trace};
use serde::Serialize;

use crate::bytecode::disasm::format_value;
use crate::bytecode::ir::{Fun, FunTable, Origin};
use crate::bytecode::op::{Op, PopTarget};
use crate::lang::value::Val;
use crate::runtime::builtins::{BuiltinCtx, Builtins, OutputSink};
use crate::runtime::runtime_error::{Fault, RuntimeError, TraceFrame};

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Frames allowed on the call stack, `main` included.
    pub max_call_depth: usize,
    /// Values allowed on the operand stack.
    pub max_stack_size: usize,
    /// Instructions allowed per run; `None` is unbounded.
    pub max_steps: Option<u64>,
    /// Checked before every instruction; when set, the run stops.
    pub interrupt: Option<Arc<AtomicBool>>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 1000,
            max_stack_size: 10_000,
            max_steps: None,
            interrupt: None,
        }
    }
}

impl VmConfig {
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_max_stack_size(mut self, size: usize) -> Self {
        self.max_stack_size = size;
        self
    }

    pub fn with_max_steps(mut self, steps: Option<u64>) -> Self {
        self.max_steps = steps;
        self
    }

    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }
}

/// One active call.
struct Frame<'t> {
    fun: &'t Fun,
    locals: HashMap<String, Val>,
    pc: usize,
    call_site: Option<Origin>,
}

/// Stack machine for compiled SBL.
///
/// There is one operand stack for the whole run. Calls push a [`Frame`]
/// onto an explicit call stack and the dispatch loop always executes the
/// innermost one, so SBL recursion never consumes host stack.
///
/// Frames are not unwound on error, so [`Vm::snapshot`] still shows the
/// state at the failing instruction.
pub struct Vm<'t, O: OutputSink> {
    funs: &'t FunTable,
    builtins: &'t Builtins,
    config: VmConfig,
    out: O,
    stack: Vec<Val>,
    frames: Vec<Frame<'t>>,
    steps: u64,
}

impl<'t, O: OutputSink> Vm<'t, O> {
    pub fn new(funs: &'t FunTable, builtins: &'t Builtins, config: VmConfig, out: O) -> Self {
        Vm {
            funs,
            builtins,
            config,
            out,
            stack: Vec::new(),
            frames: Vec::new(),
            steps: 0,
        }
    }

    pub fn stack(&self) -> &[Val] {
        &self.stack
    }

    pub fn output(&self) -> &O {
        &self.out
    }

    pub fn into_output(self) -> O {
        self.out
    }

    /// Runs `main`. A program without functions does nothing.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        if self.funs.is_empty() {
            debug!("empty program; nothing to run");
            return Ok(());
        }
        let funs = self.funs;
        let main = funs
            .get("main")
            .ok_or_else(|| RuntimeError::new(Fault::UnknownFunction("main".to_string())))?;

        self.enter(main, None)?;
        let result = self.execute();
        debug!("executed {} instructions", self.steps);
        result
    }

    /// Pushes a frame for `fun`, failing once the call stack is full.
    fn enter(&mut self, fun: &'t Fun, call_site: Option<Origin>) -> Result<(), RuntimeError> {
        if self.frames.len() >= self.config.max_call_depth {
            let err = RuntimeError::new(Fault::RecursionLimit(self.config.max_call_depth));
            let err = match call_site {
                Some(site) => err.at(site),
                None => err,
            };
            return Err(err.with_trace(self.trace()));
        }

        self.frames.push(Frame {
            fun,
            locals: HashMap::new(),
            pc: 0,
            call_site,
        });
        Ok(())
    }

    /// Executes the innermost frame until the call stack is empty.
    fn execute(&mut self) -> Result<(), RuntimeError> {
        while let Some(frame) = self.frames.last() {
            let fun = frame.fun;
            let pc = frame.pc;
            // Falling off the end behaves like RET.
            let Some(bc) = fun.code.get(pc) else {
                self.frames.pop();
                continue;
            };

            self.check_limits(&bc.origin)?;
            trace!("{} {:04} {} | stack depth {}", fun.name, pc, bc.op, self.stack.len());

            let mut next = pc + 1;
            match &bc.op {
                Op::Push(v) => self.stack.push(v.clone()),

                Op::Pop(target) => {
                    let val = self
                        .stack
                        .pop()
                        .ok_or_else(|| self.fail(Fault::EmptyStack("pop from"), &bc.origin))?;
                    if let PopTarget::Bind(name) = target {
                        self.frame_mut().locals.insert(name.clone(), val);
                    }
                }

                Op::Load(name) => {
                    let val = self
                        .frame()
                        .locals
                        .get(name)
                        .cloned()
                        .ok_or_else(|| self.fail(Fault::UnboundLocal(name.clone()), &bc.origin))?;
                    self.stack.push(val);
                }

                Op::Jmpz(addr) => {
                    let cond = self
                        .stack
                        .last()
                        .ok_or_else(|| self.fail(Fault::EmptyStack("compare to"), &bc.origin))?;
                    if !cond.is_truthy() {
                        next = *addr;
                    }
                }

                Op::Jmp(addr) => next = *addr,

                Op::Call(name) => {
                    let funs = self.funs;
                    if let Some(callee) = funs.get(name) {
                        // The caller resumes after the CALL once the callee returns.
                        self.enter(callee, Some(bc.origin.clone()))?;
                        let caller = self.frames.len() - 2;
                        self.frames[caller].pc = next;
                        continue;
                    }
                    self.call_builtin(name, &bc.origin)?;
                }

                Op::Ret => {
                    self.frames.pop();
                    continue;
                }
            }

            self.check_stack_size(&bc.origin)?;
            self.frame_mut().pc = next;
        }

        Ok(())
    }

    fn call_builtin(&mut self, name: &str, origin: &Origin) -> Result<(), RuntimeError> {
        let Some(builtin) = self.builtins.get(name) else {
            return Err(self.fail(Fault::UnknownFunction(name.to_string()), origin));
        };
        let mut ctx = BuiltinCtx {
            stack: &mut self.stack,
            out: &mut self.out,
        };
        builtin(&mut ctx).map_err(|fault| self.fail(fault, origin))
    }

    /// Interrupt flag and step budget, checked before each instruction.
    fn check_limits(&mut self, origin: &Origin) -> Result<(), RuntimeError> {
        self.check_interrupt(origin)?;
        self.steps += 1;
        match self.config.max_steps {
            Some(max) if self.steps > max => Err(self.fail(Fault::StepLimit(max), origin)),
            _ => Ok(()),
        }
    }

    fn check_stack_size(&self, origin: &Origin) -> Result<(), RuntimeError> {
        if self.stack.len() > self.config.max_stack_size {
            return Err(self.fail(Fault::StackLimit(self.config.max_stack_size), origin));
        }
        Ok(())
    }

    fn check_interrupt(&self, origin: &Origin) -> Result<(), RuntimeError> {
        match &self.config.interrupt {
            Some(flag) if flag.load(Ordering::Relaxed) => {
                Err(self.fail(Fault::Interrupted, origin))
            }
            _ => Ok(()),
        }
    }

    fn frame(&self) -> &Frame<'t> {
        // `execute` only runs an instruction while a frame is live.
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut Frame<'t> {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn trace(&self) -> Vec<TraceFrame> {
        self.frames
            .iter()
            .rev()
            .map(|f| TraceFrame {
                function: f.fun.name.clone(),
                defined_at: f.fun.origin.clone(),
                called_from: f.call_site.clone(),
            })
            .collect()
    }

    fn fail(&self, fault: Fault, origin: &Origin) -> RuntimeError {
        RuntimeError::new(fault)
            .at(origin.clone())
            .with_trace(self.trace())
    }

    /// Live frames (innermost first) and the operand stack.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            frames: self
                .frames
                .iter()
                .rev()
                .map(|f| FrameSnapshot {
                    function: f.fun.name.clone(),
                    defined_at: f.fun.origin.clone(),
                    called_from: f.call_site.clone(),
                    pc: f.pc,
                    locals: f
                        .locals
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                })
                .collect(),
            stack: self.stack.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameSnapshot {
    pub function: String,
    pub defined_at: Origin,
    pub called_from: Option<Origin>,
    pub pc: usize,
    pub locals: BTreeMap<String, Val>,
}

/// VM state for post-mortem dumps.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub frames: Vec<FrameSnapshot>,
    /// Bottom first.
    pub stack: Vec<Val>,
}

impl Snapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "call stack:")?;
        for frame in &self.frames {
            write!(
                f,
                "    {} (defined at {}) pc {:04}",
                frame.function, frame.defined_at, frame.pc
            )?;
            if let Some(site) = &frame.called_from {
                write!(f, " called from {}", site)?;
            }
            writeln!(f)?;
            writeln!(f, "    locals:")?;
            for (name, val) in &frame.locals {
                writeln!(f, "        {} = {}", name, format_value(val))?;
            }
        }
        writeln!(f, "stack:")?;
        for val in self.stack.iter().rev() {
            writeln!(f, "    {}", format_value(val))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::compile;
    use crate::frontend::parser::parse;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn table(src: &str) -> FunTable {
        let source = match parse(src, Arc::from(Path::new("vm.sbl"))) {
            Ok(source) => source,
            Err(e) => panic!("parse failed: {}", e),
        };
        let defs: Vec<_> = source.fun_defs().cloned().collect();
        match compile(&defs) {
            Ok(table) => table,
            Err(e) => panic!("compile failed: {}", e),
        }
    }

    /// Runs a program, returning its output and final stack.
    fn run_with(src: &str, config: VmConfig) -> (Result<(), RuntimeError>, String, Vec<Val>) {
        let table = table(src);
        let builtins = Builtins::standard();
        let mut vm = Vm::new(&table, &builtins, config, Vec::new());
        let result = vm.run();
        let stack = vm.stack().to_vec();
        let out = String::from_utf8(vm.into_output()).unwrap();
        (result, out, stack)
    }

    fn run(src: &str) -> (String, Vec<Val>) {
        let (result, out, stack) = run_with(src, VmConfig::default());
        if let Err(e) = result {
            panic!("run failed: {}", e);
        }
        (out, stack)
    }

    fn run_err(src: &str) -> RuntimeError {
        run_with(src, VmConfig::default())
            .0
            .expect_err("program should fail")
    }

    #[test]
    fn test_empty_program_runs_nothing() {
        let (out, stack) = run("");
        assert_eq!(out, "");
        assert!(stack.is_empty());
    }

    #[test]
    fn test_missing_main() {
        let err = run_err("helper { }");
        assert!(matches!(err.fault, Fault::UnknownFunction(ref n) if n == "main"));
    }

    #[test]
    fn test_locals_and_arithmetic() {
        let (out, _) = run("main { 10 3 - .x; x x * println; }");
        assert_eq!(out, "49\n");
    }

    #[test]
    fn test_branch_peeks_condition() {
        let (_, stack) = run("main { T; br { 1; } el { 2; } }");
        assert_eq!(stack, vec![Val::Bool(true), Val::from(1)]);

        let (_, stack) = run("main { 0; br { 1; } el { 2; } }");
        assert_eq!(stack, vec![Val::from(0), Val::from(2)]);
    }

    #[test]
    fn test_falsy_values_skip_branch() {
        for falsy in ["F", "0", "@", "\"\"", "[]"] {
            let src = format!("main {{ {}; br {{ \"yes\"; }} }}", falsy);
            let (_, stack) = run(&src);
            assert_eq!(stack.len(), 1, "{} should be falsy", falsy);
        }
    }

    #[test]
    fn test_countdown_loop() {
        let (out, stack) = run(
            "main { 3; loop { ^ print; 1 -; } .@; }
            ",
        );
        assert_eq!(out, "321");
        assert!(stack.is_empty());
    }

    #[test]
    fn test_user_calls_and_forward_reference() {
        let (out, _) = run("main { 4 square println; } square { .n n n *; }");
        assert_eq!(out, "16\n");
    }

    #[test]
    fn test_recursion() {
        let src = "
            main { 5 fact println; }
            fact {
                .n n 1 <=;
                br { .@ 1; } el { .@ n n 1 - fact *; }
            }
        ";
        let (out, _) = run(src);
        assert_eq!(out, "120\n");
    }

    #[test]
    fn test_stack_literal_with_names() {
        let (out, _) = run("main { 2 .x [1 x [x]] println; }");
        assert_eq!(out, "[1, 2, [2]]\n");
    }

    #[test]
    fn test_pushed_constant_is_not_shared() {
        let (out, _) = run("main { f f; } f { [] 1 push println; }");
        assert_eq!(out, "[1]\n[1]\n");
    }

    #[test]
    fn test_empty_pop_reports_location_and_chain() {
        let err = run_err("main {\n  f;\n}\nf {\n  .x;\n}");
        assert!(matches!(err.fault, Fault::EmptyStack(_)));
        assert_eq!(err.location.as_ref().unwrap().to_string(), "vm.sbl:5:4");
        let names: Vec<_> = err.trace.iter().map(|t| t.function.as_str()).collect();
        assert_eq!(names, vec!["f", "main"]);
        assert_eq!(err.trace[0].called_from.as_ref().unwrap().to_string(), "vm.sbl:2:3");
        assert!(err.trace[1].called_from.is_none());
    }

    #[test]
    fn test_jmpz_on_empty_stack() {
        let err = run_err("main { br { 1; } }");
        assert_eq!(err.fault.to_string(), "could not compare to empty stack");
    }

    #[test]
    fn test_unbound_local() {
        let err = run_err("main { y; }");
        assert!(matches!(err.fault, Fault::UnboundLocal(ref n) if n == "y"));
    }

    #[test]
    fn test_divide_by_zero_keeps_operands() {
        let table = table("main { 10 0 /; }");
        let builtins = Builtins::standard();
        let mut vm = Vm::new(&table, &builtins, VmConfig::default(), Vec::new());
        let err = vm.run().unwrap_err();
        assert!(matches!(err.fault, Fault::DivideByZero));
        assert_eq!(vm.stack(), &[Val::from(10), Val::from(0)]);
    }

    #[test]
    fn test_recursion_limit() {
        let config = VmConfig::default().with_max_call_depth(50);
        let (result, _, _) = run_with("main { forever; } forever { forever; }", config);
        let err = result.unwrap_err();
        assert!(matches!(err.fault, Fault::RecursionLimit(50)));
        assert_eq!(err.trace.len(), 50);
    }

    #[test]
    fn test_default_depth_limit_is_reported_on_small_thread() {
        let handle = std::thread::Builder::new()
            .stack_size(8 * 1024 * 1024)
            .spawn(|| {
                let (result, _, _) =
                    run_with("main { down; } down { down; }", VmConfig::default());
                result.map_err(|e| e.fault.to_string())
            })
            .unwrap();
        let err = handle.join().unwrap().unwrap_err();
        assert_eq!(
            err,
            "call depth limit exceeded (1000); possible infinite recursion"
        );
    }

    #[test]
    fn test_deep_calls_do_not_use_host_stack() {
        let handle = std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(|| {
                let config = VmConfig::default().with_max_call_depth(200_000);
                let (result, _, _) = run_with("main { down; } down { down; }", config);
                result.map_err(|e| (e.trace.len(), e.fault.to_string()))
            })
            .unwrap();
        let (depth, msg) = handle.join().unwrap().unwrap_err();
        assert_eq!(depth, 200_000);
        assert!(msg.contains("(200000)"), "msg was: {}", msg);
    }

    #[test]
    fn test_deep_recursion_unwinds() {
        let src = "
            main { 900 count println; }
            count {
                .n n 0 ==;
                br { .@ 0; } el { .@ n 1 - count 1 +; }
            }
        ";
        let (out, stack) = run(src);
        assert_eq!(out, "900\n");
        assert!(stack.is_empty());
    }

    #[test]
    fn test_operand_stack_limit() {
        let config = VmConfig::default().with_max_stack_size(100);
        let (result, _, stack) = run_with("main { loop { T; } }", config);
        assert!(matches!(result.unwrap_err().fault, Fault::StackLimit(100)));
        assert_eq!(stack.len(), 101);

        let config = VmConfig::default().with_max_stack_size(3);
        let (result, _, _) = run_with("main { 1 2 3 $; }", config);
        assert!(matches!(result.unwrap_err().fault, Fault::StackLimit(3)));
    }

    #[test]
    fn test_step_limit() {
        let config = VmConfig::default().with_max_steps(Some(25));
        let (result, _, _) = run_with("main { T; loop { } }", config);
        let err = result.unwrap_err();
        assert!(matches!(err.fault, Fault::StepLimit(25)));

        let config = VmConfig::default().with_max_steps(Some(25));
        let (result, out, _) = run_with("main { \"ok\" println; }", config);
        assert!(result.is_ok());
        assert_eq!(out, "ok\n");
    }

    #[test]
    fn test_interrupt_flag_stops_run() {
        let flag = Arc::new(AtomicBool::new(true));
        let config = VmConfig::default().with_interrupt(flag);
        let (result, _, _) = run_with("main { loop { T; } }", config);
        assert!(matches!(result.unwrap_err().fault, Fault::Interrupted));
    }

    #[test]
    fn test_snapshot_after_failure() {
        let table = table("main { 7 .a 1; f; } f { .b \"s\" 2 +; }");
        let builtins = Builtins::standard();
        let mut vm = Vm::new(&table, &builtins, VmConfig::default(), Vec::new());
        assert!(vm.run().is_err());

        let snap = vm.snapshot();
        assert_eq!(snap.frames.len(), 2);
        assert_eq!(snap.frames[0].function, "f");
        assert_eq!(snap.frames[0].locals.get("b"), Some(&Val::from(1)));
        assert_eq!(snap.frames[1].locals.get("a"), Some(&Val::from(7)));
        assert_eq!(snap.stack, vec![Val::from("s"), Val::from(2)]);

        let text = snap.to_string();
        assert!(text.contains("call stack:\n    f (defined at vm.sbl:"), "text was:\n{}", text);
        assert!(text.contains("        b = 1"), "text was:\n{}", text);

        let json = snap.to_json().unwrap();
        assert!(json.contains("\"function\": \"f\""), "json was:\n{}", json);
    }
}
