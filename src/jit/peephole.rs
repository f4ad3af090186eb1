//! One-instruction peephole window in front of the assembler.

use super::codebuf::CodeBuffer;
use super::x86_64::{Inst, X86_64Assembler};
use crate::error::Result;

/// Holds at most one pending instruction.
///
/// A `pop r` immediately followed by `push r` (or the reverse) is dropped
/// without emitting anything. This relies on the code generator always
/// overwriting a register right after it is pushed back, so the stale value
/// left behind is never observed.
#[derive(Debug, Default)]
pub struct Peephole {
    pending: Option<Inst>,
    elided: usize,
}

impl Peephole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `inst`, first emitting whatever was pending unless the two cancel.
    /// Returns the instruction that reached the assembler, if any.
    pub fn submit(&mut self, buf: &mut CodeBuffer, inst: Inst) -> Result<Option<Inst>> {
        match (self.pending, inst) {
            (Some(Inst::Pop(a)), Inst::Push(b)) | (Some(Inst::Push(a)), Inst::Pop(b))
                if a == b =>
            {
                self.pending = None;
                self.elided += 1;
                Ok(None)
            }
            _ => {
                let emitted = self.flush(buf)?;
                self.pending = Some(inst);
                Ok(emitted)
            }
        }
    }

    /// Emit the pending instruction, if any.
    pub fn flush(&mut self, buf: &mut CodeBuffer) -> Result<Option<Inst>> {
        match self.pending.take() {
            Some(inst) => {
                X86_64Assembler::new(buf).emit(inst)?;
                Ok(Some(inst))
            }
            None => Ok(None),
        }
    }

    /// Number of cancelled pairs so far.
    pub fn elided(&self) -> usize {
        self.elided
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::jit::x86_64::Reg;

    #[test]
    fn test_pop_push_cancels() {
        let mut buf = CodeBuffer::new(64).unwrap();
        let mut peep = Peephole::new();
        peep.submit(&mut buf, Inst::Pop(Reg::Rax)).unwrap();
        peep.submit(&mut buf, Inst::Push(Reg::Rax)).unwrap();
        assert_eq!(peep.flush(&mut buf).unwrap(), None);
        assert!(buf.code().is_empty());
        assert_eq!(peep.elided(), 1);
    }

    #[test]
    fn test_push_pop_cancels() {
        let mut buf = CodeBuffer::new(64).unwrap();
        let mut peep = Peephole::new();
        peep.submit(&mut buf, Inst::Push(Reg::Rcx)).unwrap();
        peep.submit(&mut buf, Inst::Pop(Reg::Rcx)).unwrap();
        peep.flush(&mut buf).unwrap();
        assert!(buf.code().is_empty());
    }

    #[test]
    fn test_different_registers_do_not_cancel() {
        let mut buf = CodeBuffer::new(64).unwrap();
        let mut peep = Peephole::new();
        peep.submit(&mut buf, Inst::Push(Reg::Rax)).unwrap();
        peep.submit(&mut buf, Inst::Pop(Reg::Rcx)).unwrap();
        assert_eq!(buf.code(), &[0x50]);
        assert_eq!(peep.flush(&mut buf).unwrap(), Some(Inst::Pop(Reg::Rcx)));
        assert_eq!(buf.code(), &[0x50, 0x59]);
        assert_eq!(peep.elided(), 0);
    }

    #[test]
    fn test_pop_pop_does_not_cancel() {
        let mut buf = CodeBuffer::new(64).unwrap();
        let mut peep = Peephole::new();
        peep.submit(&mut buf, Inst::Pop(Reg::Rax)).unwrap();
        peep.submit(&mut buf, Inst::Pop(Reg::Rax)).unwrap();
        peep.flush(&mut buf).unwrap();
        assert_eq!(buf.code(), &[0x58, 0x58]);
    }

    #[test]
    fn test_flush_empty_is_noop() {
        let mut buf = CodeBuffer::new(64).unwrap();
        let mut peep = Peephole::new();
        assert_eq!(peep.flush(&mut buf).unwrap(), None);
        assert_eq!(peep.flush(&mut buf).unwrap(), None);
        assert!(buf.code().is_empty());
    }

    #[test]
    fn test_only_one_instruction_is_held() {
        let mut buf = CodeBuffer::new(64).unwrap();
        let mut peep = Peephole::new();
        assert_eq!(peep.submit(&mut buf, Inst::Cqo).unwrap(), None);
        assert!(buf.code().is_empty());
        assert_eq!(peep.submit(&mut buf, Inst::Ret).unwrap(), Some(Inst::Cqo));
        assert_eq!(buf.code(), &[0x48, 0x99]);
        assert_eq!(peep.flush(&mut buf).unwrap(), Some(Inst::Ret));
        assert_eq!(buf.code(), &[0x48, 0x99, 0xC3]);
    }
}
