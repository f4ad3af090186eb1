//! JIT compiler for postfix expressions on x86-64.
//!
//! The evaluation stack is kept in a two-register window (`primary` holds
//! the most recent value, `secondary` the one beneath it). Everything
//! deeper lives on the native stack: every literal spills `secondary` with
//! a `push`, every operator refills it with a `pop`. The emitted function
//! takes no arguments and returns the result in RAX.

use super::codebuf::CodeBuffer;
use super::memory::{ExecutableMemory, MemoryError};
use super::peephole::Peephole;
use super::x86_64::{Inst, Reg};
use crate::config::RuntimeConfig;
use crate::error::{Result, RpnError};
use crate::lexer::{self, BinOp, Token};

/// Signature of a compiled expression.
pub type ExprFn = extern "C" fn() -> i64;

/// Two logical register roles over a fixed pair of physical registers.
///
/// The roles always name different registers: the window starts as
/// (RCX, RAX) and [`RegisterWindow::swap`] is the only way to change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWindow {
    primary: Reg,
    secondary: Reg,
}

impl RegisterWindow {
    pub fn new() -> Self {
        Self {
            primary: Reg::Rcx,
            secondary: Reg::Rax,
        }
    }

    /// Register holding the most recent value.
    pub fn primary(&self) -> Reg {
        self.primary
    }

    /// Register holding the value beneath it.
    pub fn secondary(&self) -> Reg {
        self.secondary
    }

    /// Exchange the roles. Emits no code.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.primary, &mut self.secondary);
    }
}

impl Default for RegisterWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// A compiled expression, ready to call.
pub struct CompiledExpr {
    /// Keeps the code mapped for as long as `entry` may be called
    memory: ExecutableMemory,
    entry: ExprFn,
    code: Vec<u8>,
    listing: Vec<Inst>,
    elided: usize,
}

impl CompiledExpr {
    /// Run the compiled code.
    ///
    /// Division is not checked. A zero divisor or `i64::MIN / -1` raises
    /// the hardware divide exception, which on unix delivers SIGFPE and
    /// terminates the process. Use [`crate::evaluate`] to get
    /// [`RpnError::ArithmeticFault`] instead.
    pub fn call(&self) -> i64 {
        (self.entry)()
    }

    /// Bytes that were emitted, captured before the region became execute-only.
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Instructions that reached the assembler, in order.
    pub fn listing(&self) -> &[Inst] {
        &self.listing
    }

    /// Number of push/pop pairs removed by the peephole pass.
    pub fn elided_pairs(&self) -> usize {
        self.elided
    }

    /// Size of the underlying mapping.
    pub fn mapped_size(&self) -> usize {
        self.memory.size()
    }
}

/// JIT compiler for one expression.
pub struct JitCompiler {
    buf: CodeBuffer,
    peephole: Peephole,
    window: RegisterWindow,
    listing: Vec<Inst>,
    /// Logical evaluation stack depth
    depth: usize,
    stack_limit: usize,
}

impl JitCompiler {
    /// Map a fresh writable code region sized from `config`.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        Ok(Self {
            buf: CodeBuffer::new(config.code_capacity)?,
            peephole: Peephole::new(),
            window: RegisterWindow::new(),
            listing: Vec::new(),
            depth: 0,
            stack_limit: config.stack_limit,
        })
    }

    /// Compile an expression to native code.
    pub fn compile(mut self, expr: &str) -> Result<CompiledExpr> {
        for tok in lexer::tokenize(expr) {
            match lexer::classify(tok)? {
                Token::Literal(value) => self.compile_literal(value)?,
                Token::Op(op) => self.compile_op(op)?,
            }
        }

        match self.depth {
            0 => return Err(RpnError::MissingResult),
            1 => {}
            n => return Err(RpnError::UnconsumedOperands(n - 1)),
        }

        self.emit_epilogue()?;
        self.finish()
    }

    fn emit(&mut self, inst: Inst) -> Result<()> {
        if let Some(emitted) = self.peephole.submit(&mut self.buf, inst)? {
            self.listing.push(emitted);
        }
        Ok(())
    }

    fn compile_literal(&mut self, value: i64) -> Result<()> {
        if self.depth >= self.stack_limit {
            return Err(RpnError::StackOverflow {
                limit: self.stack_limit,
            });
        }
        self.depth += 1;

        // Spill secondary, the new value becomes primary
        self.emit(Inst::Push(self.window.secondary()))?;
        self.window.swap();
        self.emit(Inst::MovImm(self.window.primary(), value))
    }

    fn compile_op(&mut self, op: BinOp) -> Result<()> {
        if self.depth < 2 {
            return Err(RpnError::StackUnderflow);
        }

        let (primary, secondary) = (self.window.primary(), self.window.secondary());
        match op {
            BinOp::Add => self.emit(Inst::Add(primary, secondary))?,
            BinOp::Mul => self.emit(Inst::Imul(primary, secondary))?,
            BinOp::Sub => {
                // secondary holds the left operand
                self.emit(Inst::Sub(secondary, primary))?;
                self.window.swap();
            }
            BinOp::Div | BinOp::Rem => self.compile_divide(op)?,
        }

        // Refill secondary from the native stack
        self.emit(Inst::Pop(self.window.secondary()))?;
        self.depth -= 1;
        Ok(())
    }

    /// IDIV needs the dividend in RAX; the divisor may sit anywhere else.
    fn compile_divide(&mut self, op: BinOp) -> Result<()> {
        if self.window.primary() == Reg::Rax {
            // Divisor is in RAX: exchange values, keep the roles
            self.emit(Inst::Xchg(self.window.primary(), self.window.secondary()))?;
        } else {
            // Dividend is already in RAX: exchange the roles
            self.window.swap();
        }
        debug_assert_eq!(self.window.primary(), Reg::Rax);

        self.emit(Inst::Cqo)?;
        self.emit(Inst::Idiv(self.window.secondary()))?;
        if op == BinOp::Rem {
            self.emit(Inst::Mov(self.window.primary(), Reg::Rdx))?;
        }
        Ok(())
    }

    fn emit_epilogue(&mut self) -> Result<()> {
        // Balance the spill made by the first literal
        self.emit(Inst::Pop(self.window.secondary()))?;
        if self.window.primary() != Reg::Rax {
            self.emit(Inst::Mov(Reg::Rax, self.window.primary()))?;
        }
        self.emit(Inst::Ret)?;
        if let Some(emitted) = self.peephole.flush(&mut self.buf)? {
            self.listing.push(emitted);
        }
        Ok(())
    }

    fn finish(self) -> Result<CompiledExpr> {
        let code = self.buf.code().to_vec();
        let elided = self.peephole.elided();
        let memory = self.buf.finalize()?;

        // SAFETY: the region now holds a complete function that keeps the
        // native stack balanced and only clobbers RAX, RCX and RDX.
        let entry = unsafe { memory.as_fn::<ExprFn>() }.ok_or(MemoryError::InvalidSize)?;

        Ok(CompiledExpr {
            memory,
            entry,
            code,
            listing: self.listing,
            elided,
        })
    }
}

/// Compile with an explicit configuration.
pub fn compile_with_config(expr: &str, config: &RuntimeConfig) -> Result<CompiledExpr> {
    if !cfg!(all(target_arch = "x86_64", unix)) {
        return Err(RpnError::UnsupportedTarget);
    }

    let result = JitCompiler::new(config).and_then(|compiler| compiler.compile(expr));
    if config.trace_jit {
        match &result {
            Ok(compiled) => {
                eprintln!(
                    "[JIT] Compiled '{}' ({} bytes, {} spill pairs elided)",
                    expr,
                    compiled.code().len(),
                    compiled.elided_pairs()
                );
                for inst in compiled.listing() {
                    eprintln!("[JIT]   {}", inst);
                }
            }
            Err(e) => eprintln!("[JIT] Failed to compile '{}': {}", expr, e),
        }
    }
    result
}

/// Compile an expression with the default configuration.
pub fn compile(expr: &str) -> Result<CompiledExpr> {
    compile_with_config(expr, &RuntimeConfig::default())
}

#[cfg(all(test, target_arch = "x86_64", unix))]
mod tests {
    use super::*;

    fn run(expr: &str) -> i64 {
        compile(expr).unwrap().call()
    }

    #[test]
    fn test_window_swap() {
        let mut window = RegisterWindow::new();
        assert_eq!(window.primary(), Reg::Rcx);
        assert_eq!(window.secondary(), Reg::Rax);
        window.swap();
        assert_eq!(window.primary(), Reg::Rax);
        assert_eq!(window.secondary(), Reg::Rcx);
        window.swap();
        assert_eq!(window, RegisterWindow::default());
    }

    #[test]
    fn test_single_literal_bytes() {
        let compiled = compile("5").unwrap();
        assert_eq!(
            compiled.code(),
            &[
                0x50, // push rax
                0x48, 0xB8, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // mov rax, 5
                0x59, // pop rcx
                0xC3, // ret
            ]
        );
        assert_eq!(compiled.call(), 5);
    }

    #[test]
    fn test_spill_reload_elided() {
        let compiled = compile("1 2 + 3 +").unwrap();
        assert_eq!(compiled.elided_pairs(), 1);
        assert_eq!(
            compiled.listing(),
            &[
                Inst::Push(Reg::Rax),
                Inst::MovImm(Reg::Rax, 1),
                Inst::Push(Reg::Rcx),
                Inst::MovImm(Reg::Rcx, 2),
                Inst::Add(Reg::Rcx, Reg::Rax),
                Inst::MovImm(Reg::Rax, 3),
                Inst::Add(Reg::Rax, Reg::Rcx),
                Inst::Pop(Reg::Rcx),
                Inst::Pop(Reg::Rcx),
                Inst::Ret,
            ]
        );
        assert_eq!(compiled.call(), 6);
    }

    #[test]
    fn test_result_moved_to_rax() {
        let compiled = compile("1 2 +").unwrap();
        assert_eq!(compiled.listing().last(), Some(&Inst::Ret));
        assert!(compiled.listing().contains(&Inst::Mov(Reg::Rax, Reg::Rcx)));
        assert_eq!(compiled.call(), 3);
    }

    #[test]
    fn test_operand_order() {
        assert_eq!(run("10 3 -"), 7);
        assert_eq!(run("3 10 -"), -7);
        assert_eq!(run("1 10 3 - -"), -6);
    }

    #[test]
    fn test_truncating_division() {
        assert_eq!(run("7 2 /"), 3);
        assert_eq!(run("-7 2 /"), -3);
        assert_eq!(run("7 2 %"), 1);
        assert_eq!(run("-7 2 %"), -1);
    }

    #[test]
    fn test_divide_with_divisor_in_rax() {
        let compiled = compile("8 6 2 / /").unwrap();
        assert!(compiled.listing().contains(&Inst::Xchg(Reg::Rax, Reg::Rcx)));
        assert_eq!(compiled.call(), 2);

        assert_eq!(run("23 17 5 % %"), 1);
    }

    #[test]
    fn test_larger_expression() {
        assert_eq!(run("3 4 + 2 * 7 -"), 7);
        assert_eq!(run("2 3 4 * 5 6 - * +"), -10);
    }

    #[test]
    fn test_deep_spill() {
        let n = 150;
        let mut expr: Vec<String> = (1..=n).map(|i| i.to_string()).collect();
        expr.extend(std::iter::repeat_n("+".to_string(), n - 1));
        assert_eq!(run(&expr.join(" ")), (n * (n + 1) / 2) as i64);
    }

    #[test]
    fn test_repeated_calls_are_deterministic() {
        let compiled = compile("100 7 % 3 * 2 /").unwrap();
        let first = compiled.call();
        for _ in 0..1000 {
            assert_eq!(compiled.call(), first);
        }
    }

    #[test]
    fn test_bound_violations() {
        assert_eq!(compile("1 2 +  3").err(), Some(RpnError::UnconsumedOperands(1)));
        assert_eq!(compile("").err(), Some(RpnError::MissingResult));
        assert_eq!(compile("+").err(), Some(RpnError::StackUnderflow));
        assert_eq!(compile("4 -").err(), Some(RpnError::StackUnderflow));
        assert_eq!(
            compile("1 2x +").err(),
            Some(RpnError::InvalidToken("2x".to_string()))
        );
    }

    #[test]
    fn test_stack_limit() {
        let config = RuntimeConfig {
            stack_limit: 2,
            ..Default::default()
        };
        assert_eq!(
            compile_with_config("1 2 3", &config).err(),
            Some(RpnError::StackOverflow { limit: 2 })
        );
        assert_eq!(compile_with_config("1 2 + 3 +", &config).unwrap().call(), 6);
    }

    #[test]
    fn test_code_buffer_overflow() {
        let expr = vec!["1"; 400].join(" ");
        assert_eq!(
            compile(&expr).err(),
            Some(RpnError::CodeBufferOverflow { capacity: 4096 })
        );

        let config = RuntimeConfig {
            code_capacity: 12,
            ..Default::default()
        };
        assert_eq!(
            compile_with_config("5", &config).err(),
            Some(RpnError::CodeBufferOverflow { capacity: 12 })
        );
    }

    #[test]
    fn test_code_region_allocation_failure() {
        let config = RuntimeConfig {
            code_capacity: 1 << 62,
            ..Default::default()
        };
        assert_eq!(
            compile_with_config("1", &config).err(),
            Some(RpnError::Memory(MemoryError::AllocationFailed))
        );

        let config = RuntimeConfig {
            code_capacity: 0,
            ..Default::default()
        };
        assert_eq!(
            compile_with_config("1", &config).err(),
            Some(RpnError::Memory(MemoryError::InvalidSize))
        );
    }

    #[test]
    fn test_compiled_expr_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledExpr>();
    }

    #[test]
    fn test_concurrent_calls() {
        let compiled = compile("6 7 * 2 -").unwrap();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        assert_eq!(compiled.call(), 40);
                    }
                });
            }
        });
    }
}
