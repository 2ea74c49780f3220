use tracing::trace;

use crate::error::{MemoryError, Result};
use crate::guest::GuestMemory;
use crate::map::normalize_address;

/// A repositionable sequential reader over guest memory.
///
/// Positions are counted in steps of the width the cursor was created with.
pub trait InstructionCursor: Send {
    /// Moves the cursor by `steps` elements (negative values rewind).
    fn advance(&mut self, steps: i32);

    /// Reads the element at the current position, then moves past it.
    ///
    /// A failed read leaves the position unchanged.
    fn read(&mut self) -> Result<u32>;

    /// Guest address of the next element [`InstructionCursor::read`] would return.
    fn current_address(&self) -> u32;
}

/// Creates cursors bound to a guest address.
pub trait CursorFactory: Send + Sync {
    /// Resolves the backing region for `address` and returns a cursor positioned on it.
    ///
    /// `step_bytes` must be 1, 2 or 4.
    fn cursor_at(&self, address: u32, step_bytes: u32) -> Result<Box<dyn InstructionCursor>>;
}

/// Cursor over [`GuestMemory`].
#[derive(Debug, Clone)]
pub struct MemoryCursor {
    mem: GuestMemory,
    address: u32,
    step: u32,
}

impl MemoryCursor {
    pub fn new(mem: GuestMemory, address: u32, step: u32) -> Result<Self> {
        if !matches!(step, 1 | 2 | 4) {
            return Err(MemoryError::InvalidStep { step });
        }
        let address = normalize_address(address);
        if !mem.is_mapped(address) {
            return Err(MemoryError::Unmapped { addr: address });
        }
        Ok(Self { mem, address, step })
    }

    pub fn step(&self) -> u32 {
        self.step
    }
}

impl InstructionCursor for MemoryCursor {
    fn advance(&mut self, steps: i32) {
        let delta = i64::from(steps) * i64::from(self.step);
        self.address = (i64::from(self.address) + delta) as u32;
    }

    fn read(&mut self) -> Result<u32> {
        let value = match self.step {
            1 => u32::from(self.mem.read_u8(self.address)?),
            2 => u32::from(self.mem.read_u16(self.address)?),
            _ => self.mem.read_u32(self.address)?,
        };
        self.address = self.address.wrapping_add(self.step);
        Ok(value)
    }

    fn current_address(&self) -> u32 {
        self.address
    }
}

impl CursorFactory for GuestMemory {
    fn cursor_at(&self, address: u32, step_bytes: u32) -> Result<Box<dyn InstructionCursor>> {
        trace!(address = format_args!("0x{address:08x}"), step_bytes, "resolving cursor");
        Ok(Box::new(MemoryCursor::new(self.clone(), address, step_bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::START_RAM;

    #[test]
    fn cursor_reads_sequentially_and_rewinds() {
        let mem = GuestMemory::new();
        mem.write_words(START_RAM, &[10, 11, 12, 13]).unwrap();

        let mut cursor = mem.cursor_at(START_RAM, 4).unwrap();
        assert_eq!(cursor.read().unwrap(), 10);
        assert_eq!(cursor.read().unwrap(), 11);
        assert_eq!(cursor.current_address(), START_RAM + 8);

        cursor.advance(-2);
        assert_eq!(cursor.read().unwrap(), 10);
        cursor.advance(2);
        assert_eq!(cursor.read().unwrap(), 13);
    }

    #[test]
    fn narrow_steps() {
        let mem = GuestMemory::new();
        mem.write_u32(START_RAM, 0x4433_2211).unwrap();

        let mut bytes = mem.cursor_at(START_RAM, 1).unwrap();
        assert_eq!(bytes.read().unwrap(), 0x11);
        assert_eq!(bytes.read().unwrap(), 0x22);

        let mut halves = mem.cursor_at(START_RAM, 2).unwrap();
        halves.advance(1);
        assert_eq!(halves.read().unwrap(), 0x4433);
    }

    #[test]
    fn resolution_fails_loudly() {
        let mem = GuestMemory::new();
        assert_eq!(
            mem.cursor_at(0x0000_1000, 4).err(),
            Some(MemoryError::Unmapped { addr: 0x1000 })
        );
        assert_eq!(
            mem.cursor_at(START_RAM, 3).err(),
            Some(MemoryError::InvalidStep { step: 3 })
        );
    }

    #[test]
    fn failed_read_keeps_position() {
        let mem = GuestMemory::new();
        let mut cursor = mem.cursor_at(START_RAM, 4).unwrap();
        cursor.advance(-1);
        let before = cursor.current_address();
        assert!(cursor.read().is_err());
        assert_eq!(cursor.current_address(), before);
    }
}
