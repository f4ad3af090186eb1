//! rpnjit - postfix arithmetic, interpreted or compiled to x86-64.
//!
//! [`evaluate`] runs an expression on the reference stack interpreter.
//! [`compile`] translates the same expression to native code; calling the
//! result must give the same value.

pub mod config;
pub mod error;
#[cfg(feature = "jit")]
pub mod jit;
pub mod lexer;
pub mod vm;

// Re-export commonly used types
pub use config::{JitMode, RuntimeConfig};
pub use error::{Result, RpnError};
#[cfg(feature = "jit")]
pub use jit::{CompiledExpr, compile, compile_with_config};
pub use vm::Interpreter;

/// Evaluate an expression with the reference interpreter.
pub fn evaluate(expr: &str) -> Result<i64> {
    evaluate_with_config(expr, &RuntimeConfig::default())
}

pub fn evaluate_with_config(expr: &str, config: &RuntimeConfig) -> Result<i64> {
    Interpreter::new(config).evaluate(expr)
}
