//! Reference interpreter.
//!
//! Evaluates postfix expressions against an explicit, bounded value stack.
//! The JIT must reproduce its results exactly.

mod interp;

pub use interp::{Interpreter, ValueStack, apply};
