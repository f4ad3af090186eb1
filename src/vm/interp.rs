use crate::config::RuntimeConfig;
use crate::error::{Result, RpnError};
use crate::lexer::{self, BinOp, Token};

/// Fixed-capacity value stack.
#[derive(Debug)]
pub struct ValueStack {
    values: Vec<i64>,
    limit: usize,
}

impl ValueStack {
    pub fn new(limit: usize) -> Self {
        Self {
            values: Vec::with_capacity(limit),
            limit,
        }
    }

    pub fn push(&mut self, value: i64) -> Result<()> {
        if self.values.len() >= self.limit {
            return Err(RpnError::StackOverflow { limit: self.limit });
        }
        self.values.push(value);
        Ok(())
    }

    /// Pop the two topmost values as `(a, b)`, where `b` was pushed last.
    pub fn pop_pair(&mut self) -> Result<(i64, i64)> {
        if self.values.len() < 2 {
            return Err(RpnError::StackUnderflow);
        }
        let b = self.values.pop().ok_or(RpnError::StackUnderflow)?;
        let a = self.values.pop().ok_or(RpnError::StackUnderflow)?;
        Ok((a, b))
    }

    /// Consume the stack, requiring exactly one value.
    pub fn into_result(self) -> Result<i64> {
        match self.values.as_slice() {
            [] => Err(RpnError::MissingResult),
            [value] => Ok(*value),
            rest => Err(RpnError::UnconsumedOperands(rest.len() - 1)),
        }
    }
}

/// Apply a binary operator with machine semantics.
///
/// Add, subtract and multiply wrap like the native instructions. Division
/// truncates toward zero; the cases where `idiv` would trap are reported
/// as [`RpnError::ArithmeticFault`].
pub fn apply(op: BinOp, a: i64, b: i64) -> Result<i64> {
    match op {
        BinOp::Add => Ok(a.wrapping_add(b)),
        BinOp::Sub => Ok(a.wrapping_sub(b)),
        BinOp::Mul => Ok(a.wrapping_mul(b)),
        BinOp::Div => a.checked_div(b).ok_or(RpnError::ArithmeticFault { op }),
        BinOp::Rem => a.checked_rem(b).ok_or(RpnError::ArithmeticFault { op }),
    }
}

/// Reference stack interpreter.
pub struct Interpreter {
    stack_limit: usize,
}

impl Interpreter {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            stack_limit: config.stack_limit,
        }
    }

    pub fn evaluate(&self, expr: &str) -> Result<i64> {
        let mut stack = ValueStack::new(self.stack_limit);

        for tok in lexer::tokenize(expr) {
            match lexer::classify(tok)? {
                Token::Op(op) => {
                    let (a, b) = stack.pop_pair()?;
                    stack.push(apply(op, a, b)?)?;
                }
                Token::Literal(value) => stack.push(value)?,
            }
        }

        stack.into_result()
    }
}
