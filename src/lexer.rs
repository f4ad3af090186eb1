//! Tokenizer for postfix expressions.
//!
//! Tokens are whitespace-delimited and classified lazily: the tokenizer
//! itself performs no validation, callers decide what each token means
//! through [`classify`].

use crate::error::{Result, RpnError};

/// Binary operators understood by both engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    pub fn from_symbol(s: &str) -> Option<Self> {
        match s {
            "+" => Some(BinOp::Add),
            "-" => Some(BinOp::Sub),
            "*" => Some(BinOp::Mul),
            "/" => Some(BinOp::Div),
            "%" => Some(BinOp::Rem),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
        }
    }
}

/// A classified token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Op(BinOp),
    Literal(i64),
}

/// Split an expression into its raw tokens, left to right.
///
/// The returned iterator borrows `expr`; call again to restart.
pub fn tokenize(expr: &str) -> impl Iterator<Item = &str> + '_ {
    expr.split_whitespace()
}

/// Classify one raw token as an operator or an integer literal.
pub fn classify(tok: &str) -> Result<Token> {
    if let Some(op) = BinOp::from_symbol(tok) {
        return Ok(Token::Op(op));
    }
    parse_literal(tok)
        .map(Token::Literal)
        .ok_or_else(|| RpnError::InvalidToken(tok.to_string()))
}

/// Parse an integer literal with C-style radix prefixes.
///
/// Accepts an optional sign, then `0x`/`0X` hex, `0`-prefixed octal or
/// plain decimal. The whole token must be consumed.
pub fn parse_literal(tok: &str) -> Option<i64> {
    let (negative, body) = match tok.as_bytes().first()? {
        b'-' => (true, &tok[1..]),
        b'+' => (false, &tok[1..]),
        _ => (false, tok),
    };

    let (radix, digits) = if let Some(hex) = body
        .strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
    {
        (16, hex)
    } else if body.len() > 1 && body.starts_with('0') {
        (8, &body[1..])
    } else {
        (10, body)
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }

    let magnitude = u64::from_str_radix(digits, radix).ok()?;
    if negative {
        // i64::MIN has no positive counterpart
        if magnitude == 1 << 63 {
            Some(i64::MIN)
        } else {
            i64::try_from(magnitude).ok().map(|v| -v)
        }
    } else {
        i64::try_from(magnitude).ok()
    }
}
