//! JIT compilation of postfix expressions.
//!
//! - Executable memory allocation (writable, then execute-only)
//! - Fixed-capacity code buffer
//! - x86-64 instruction encoding
//! - One-instruction peephole window
//! - Register-window code generator
//!
//! This module is only compiled when the `jit` feature is enabled.

mod codebuf;
pub mod compiler;
mod memory;
mod peephole;
pub mod x86_64;

pub use compiler::{CompiledExpr, ExprFn, JitCompiler, RegisterWindow, compile, compile_with_config};
pub use memory::{ExecutableMemory, MemoryError, WritableMemory};
