//! Code buffer for building JIT code.
//!
//! Machine code is written straight into a [`WritableMemory`] region with
//! a fixed capacity. Every byte goes through [`CodeBuffer::emit_u8`], which
//! is the single place the capacity bound is enforced.

use super::memory::{ExecutableMemory, MemoryError, WritableMemory};
use crate::error::{Result, RpnError};

/// A fixed-capacity buffer for building machine code.
pub struct CodeBuffer {
    mem: WritableMemory,
    /// Usable bytes; may be smaller than the page-rounded mapping
    capacity: usize,
    /// Write cursor
    len: usize,
}

impl CodeBuffer {
    /// Map a fresh region able to hold `capacity` bytes of code.
    pub fn new(capacity: usize) -> std::result::Result<Self, MemoryError> {
        let mem = WritableMemory::new(capacity)?;
        Ok(Self {
            mem,
            capacity,
            len: 0,
        })
    }

    /// Emit a single byte.
    pub fn emit_u8(&mut self, byte: u8) -> Result<()> {
        if self.len >= self.capacity {
            return Err(RpnError::CodeBufferOverflow {
                capacity: self.capacity,
            });
        }
        self.mem.as_mut_slice()[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Emit multiple bytes.
    pub fn emit_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        bytes.iter().try_for_each(|&b| self.emit_u8(b))
    }

    /// Emit a 64-bit value (little-endian).
    pub fn emit_u64(&mut self, value: u64) -> Result<()> {
        self.emit_bytes(&value.to_le_bytes())
    }

    /// Get the code bytes (for inspection).
    pub fn code(&self) -> &[u8] {
        &self.mem.as_slice()[..self.len]
    }

    /// Flip the region to executable and hand it back.
    pub fn finalize(self) -> std::result::Result<ExecutableMemory, MemoryError> {
        self.mem.finalize()
    }
}
