//! x86-64 instruction encoding for JIT compilation.
//!
//! Only the handful of 64-bit register forms the expression compiler needs
//! are encoded: register-direct ModR/M, no memory operands, no extended
//! registers (so REX is always the bare `REX.W`).

use super::codebuf::CodeBuffer;
use crate::error::Result;

/// x86-64 general-purpose registers addressable without REX.B/REX.R.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0, // Return value, dividend/quotient
    Rcx = 1,
    Rdx = 2, // Remainder
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
}

impl Reg {
    /// Get the register code (lower 3 bits).
    pub fn code(self) -> u8 {
        (self as u8) & 0x7
    }
}

impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Reg::Rax => "rax",
            Reg::Rcx => "rcx",
            Reg::Rdx => "rdx",
            Reg::Rbx => "rbx",
            Reg::Rsp => "rsp",
            Reg::Rbp => "rbp",
            Reg::Rsi => "rsi",
            Reg::Rdi => "rdi",
        };
        f.write_str(name)
    }
}

/// One abstract machine instruction, in Intel operand order (dst first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inst {
    /// ADD r64, r/m64
    Add(Reg, Reg),
    /// SUB r64, r/m64
    Sub(Reg, Reg),
    /// IMUL r64, r/m64
    Imul(Reg, Reg),
    /// CQO: sign-extend RAX into RDX:RAX
    Cqo,
    /// IDIV r/m64: RDX:RAX / r, quotient in RAX, remainder in RDX
    Idiv(Reg),
    /// MOV r64, imm64
    MovImm(Reg, i64),
    /// MOV r64, r/m64
    Mov(Reg, Reg),
    Pop(Reg),
    Push(Reg),
    Ret,
    /// XCHG r64, r64
    Xchg(Reg, Reg),
}

impl std::fmt::Display for Inst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Inst::Add(a, b) => write!(f, "add {}, {}", a, b),
            Inst::Sub(a, b) => write!(f, "sub {}, {}", a, b),
            Inst::Imul(a, b) => write!(f, "imul {}, {}", a, b),
            Inst::Cqo => write!(f, "cqo"),
            Inst::Idiv(r) => write!(f, "idiv {}", r),
            Inst::MovImm(r, imm) => write!(f, "mov {}, {}", r, imm),
            Inst::Mov(a, b) => write!(f, "mov {}, {}", a, b),
            Inst::Pop(r) => write!(f, "pop {}", r),
            Inst::Push(r) => write!(f, "push {}", r),
            Inst::Ret => write!(f, "ret"),
            Inst::Xchg(a, b) => write!(f, "xchg {}, {}", a, b),
        }
    }
}

const REX_W: u8 = 0x48;

const OP_ADD_RR: u8 = 0x03;
const OP_SUB_RR: u8 = 0x2B;
const OP_IMUL_RR: [u8; 2] = [0x0F, 0xAF];
const OP_CQO: u8 = 0x99;
const OP_IDIV: u8 = 0xF7;
const OP_MOV_RI: u8 = 0xB8;
const OP_MOV_RR: u8 = 0x8B;
const OP_POP: u8 = 0x58;
const OP_PUSH: u8 = 0x50;
const OP_RET: u8 = 0xC3;
const OP_XCHG_RR: u8 = 0x87;
const OP_XCHG_RAX: u8 = 0x90;

/// x86-64 assembler.
pub struct X86_64Assembler<'a> {
    buf: &'a mut CodeBuffer,
}

impl<'a> X86_64Assembler<'a> {
    pub fn new(buf: &'a mut CodeBuffer) -> Self {
        Self { buf }
    }

    /// Encode ModR/M byte in register-direct mode (mod = 0b11).
    fn modrm_direct(reg: u8, rm: u8) -> u8 {
        0xC0 | ((reg & 0x7) << 3) | (rm & 0x7)
    }

    /// REX.W, opcode, ModR/M with `reg` in the reg field.
    fn emit_rr(&mut self, opcode: &[u8], reg: Reg, rm: Reg) -> Result<()> {
        self.buf.emit_u8(REX_W)?;
        self.buf.emit_bytes(opcode)?;
        self.buf.emit_u8(Self::modrm_direct(reg.code(), rm.code()))
    }

    /// Append the encoding of one instruction.
    pub fn emit(&mut self, inst: Inst) -> Result<()> {
        match inst {
            Inst::Add(dst, src) => self.emit_rr(&[OP_ADD_RR], dst, src),
            Inst::Sub(dst, src) => self.emit_rr(&[OP_SUB_RR], dst, src),
            Inst::Imul(dst, src) => self.emit_rr(&OP_IMUL_RR, dst, src),
            Inst::Mov(dst, src) => self.emit_rr(&[OP_MOV_RR], dst, src),
            Inst::Cqo => self.buf.emit_bytes(&[REX_W, OP_CQO]),
            Inst::Idiv(src) => {
                // F7 /7
                self.buf.emit_bytes(&[REX_W, OP_IDIV])?;
                self.buf.emit_u8(Self::modrm_direct(7, src.code()))
            }
            Inst::MovImm(dst, imm) => {
                self.buf.emit_bytes(&[REX_W, OP_MOV_RI + dst.code()])?;
                self.buf.emit_u64(imm as u64)
            }
            Inst::Pop(reg) => self.buf.emit_u8(OP_POP + reg.code()),
            Inst::Push(reg) => self.buf.emit_u8(OP_PUSH + reg.code()),
            Inst::Ret => self.buf.emit_u8(OP_RET),
            Inst::Xchg(a, b) => {
                // Short form 90 +r when either side is RAX
                if a == Reg::Rax {
                    self.buf.emit_bytes(&[REX_W, OP_XCHG_RAX + b.code()])
                } else if b == Reg::Rax {
                    self.buf.emit_bytes(&[REX_W, OP_XCHG_RAX + a.code()])
                } else {
                    self.emit_rr(&[OP_XCHG_RR], a, b)
                }
            }
        }
    }
}
