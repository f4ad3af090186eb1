//! Error types shared by the interpreter and the JIT.

#[cfg(feature = "jit")]
use crate::jit::MemoryError;
use crate::lexer::BinOp;

/// Every way an expression can fail to evaluate or compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpnError {
    /// Token is neither an operator nor a parseable integer literal.
    InvalidToken(String),
    /// Value stack (or logical JIT depth) would exceed its bound.
    StackOverflow { limit: usize },
    /// An operator was applied with fewer than two values available.
    StackUnderflow,
    /// Extra values remain after the last token.
    UnconsumedOperands(usize),
    /// No value remains after the last token.
    MissingResult,
    /// Instruction encoding would write past the code region.
    CodeBufferOverflow { capacity: usize },
    /// Executable memory could not be mapped or protected.
    #[cfg(feature = "jit")]
    Memory(MemoryError),
    /// Division or remainder by zero, or `i64::MIN / -1`.
    ArithmeticFault { op: BinOp },
    /// The host cannot run x86-64 machine code.
    UnsupportedTarget,
    /// Configuration file could not be read or parsed.
    Config(String),
}

impl std::fmt::Display for RpnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpnError::InvalidToken(tok) => write!(f, "invalid token: {}", tok),
            RpnError::StackOverflow { limit } => {
                write!(f, "stack overflow (limit {} values)", limit)
            }
            RpnError::StackUnderflow => write!(f, "stack underflow"),
            RpnError::UnconsumedOperands(n) => write!(f, "{} extra values left on stack", n),
            RpnError::MissingResult => write!(f, "no value left on stack"),
            RpnError::CodeBufferOverflow { capacity } => {
                write!(f, "overflowed JIT buffer ({} bytes)", capacity)
            }
            #[cfg(feature = "jit")]
            RpnError::Memory(e) => write!(f, "{}", e),
            RpnError::ArithmeticFault { op } => {
                write!(f, "arithmetic fault in '{}'", op.symbol())
            }
            RpnError::UnsupportedTarget => {
                write!(f, "JIT requires an x86-64 unix host")
            }
            RpnError::Config(msg) => write!(f, "config error: {}", msg),
        }
    }
}

impl std::error::Error for RpnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            #[cfg(feature = "jit")]
            RpnError::Memory(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "jit")]
impl From<MemoryError> for RpnError {
    fn from(e: MemoryError) -> Self {
        RpnError::Memory(e)
    }
}

pub type Result<T> = std::result::Result<T, RpnError>;
