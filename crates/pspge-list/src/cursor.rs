//! Instruction-fetch cursor cache.
//!
//! Resolving a cursor goes through the memory facility and is the slow path; straight-line
//! execution should resolve once and then only reposition. PC changes are fed through
//! [`CursorCache::on_pc_changed`], which decides between reusing the producer-supplied base
//! cursor, repositioning the current cursor, or scheduling a fresh resolution.

use pspge_mem::{InstructionCursor, START_RAM};
use tracing::trace;

use crate::error::{ListError, Result};

pub(crate) const WORD_STEP: u32 = 4;

/// Cursor supplied together with a stall address update, valid for `[start, end)`.
pub(crate) struct BaseCursor {
    cursor: Box<dyn InstructionCursor>,
    start: u32,
    end: u32,
}

impl BaseCursor {
    fn covers(&self, addr: u32) -> bool {
        addr >= self.start && addr < self.end
    }
}

pub(crate) enum ActiveCursor {
    None,
    /// The base cursor is the active one.
    Base,
    /// A fresh cursor must be resolved at this address before the next access.
    Pending(u32),
    Owned(Box<dyn InstructionCursor>),
}

pub(crate) struct CursorCache {
    active: ActiveCursor,
    base: Option<BaseCursor>,
    resolutions: u64,
}

impl Default for CursorCache {
    fn default() -> Self {
        Self {
            active: ActiveCursor::None,
            base: None,
            resolutions: 0,
        }
    }
}

fn word_delta(to: u32, from: u32) -> i32 {
    ((i64::from(to) - i64::from(from)) / i64::from(WORD_STEP)) as i32
}

impl CursorCache {
    pub fn clear(&mut self) {
        self.active = ActiveCursor::None;
        self.base = None;
    }

    pub fn has_base(&self) -> bool {
        self.base.is_some()
    }

    /// Number of cursors resolved through the factory since the cache was created.
    pub fn resolutions(&self) -> u64 {
        self.resolutions
    }

    pub fn set_base(&mut self, cursor: Box<dyn InstructionCursor>, start: u32, end: u32) {
        // Dropping the previous base while it is active must not leave a dangling selection.
        if matches!(self.active, ActiveCursor::Base) {
            self.active = ActiveCursor::None;
        }
        self.base = Some(BaseCursor { cursor, start, end });
    }

    pub fn set_active(&mut self, cursor: Box<dyn InstructionCursor>) {
        self.active = ActiveCursor::Owned(cursor);
    }

    pub fn on_pc_changed(&mut self, old: u32, new: u32) {
        if let Some(base) = self.base.as_mut().filter(|base| base.covers(new)) {
            let delta = word_delta(new, base.cursor.current_address());
            base.cursor.advance(delta);
            self.active = ActiveCursor::Base;
            trace!(new = format_args!("0x{new:08x}"), delta, "reusing base cursor");
            return;
        }

        let crosses_into_ram = old < START_RAM && new >= START_RAM;
        if new >= old && !crosses_into_ram {
            match &mut self.active {
                ActiveCursor::Owned(cursor) => {
                    cursor.advance(word_delta(new, old));
                    return;
                }
                ActiveCursor::Pending(addr) => {
                    *addr = new;
                    return;
                }
                ActiveCursor::None | ActiveCursor::Base => {}
            }
        }

        trace!(
            old = format_args!("0x{old:08x}"),
            new = format_args!("0x{new:08x}"),
            "scheduling fresh cursor"
        );
        self.active = ActiveCursor::Pending(new);
    }

    /// Address a cursor must be resolved at before the next access, if any.
    ///
    /// `pc` is used when no cursor has been selected yet.
    pub fn pending_resolution(&self, pc: u32) -> Option<u32> {
        match self.active {
            ActiveCursor::Pending(addr) => Some(addr),
            ActiveCursor::None => Some(pc),
            ActiveCursor::Base if self.base.is_none() => Some(pc),
            ActiveCursor::Base | ActiveCursor::Owned(_) => None,
        }
    }

    /// Installs a cursor resolved at `addr`.
    ///
    /// Returns `false` when the cache moved on to another address in the meantime; the cursor is
    /// dropped and the caller has to resolve again.
    pub fn install_resolved(
        &mut self,
        addr: u32,
        pc: u32,
        cursor: Box<dyn InstructionCursor>,
    ) -> bool {
        match self.pending_resolution(pc) {
            Some(pending) if pending == addr => {
                self.resolutions += 1;
                self.active = ActiveCursor::Owned(cursor);
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    /// Returns the active cursor. Fails if a resolution is still outstanding.
    pub fn cursor_mut(&mut self) -> Result<&mut dyn InstructionCursor> {
        match &mut self.active {
            ActiveCursor::Owned(cursor) => Ok(cursor.as_mut()),
            ActiveCursor::Base => match self.base.as_mut() {
                Some(base) => Ok(base.cursor.as_mut()),
                None => Err(ListError::NoActiveCursor),
            },
            ActiveCursor::None | ActiveCursor::Pending(_) => Err(ListError::NoActiveCursor),
        }
    }

    pub fn is_base_active(&self) -> bool {
        matches!(self.active, ActiveCursor::Base)
    }
}
