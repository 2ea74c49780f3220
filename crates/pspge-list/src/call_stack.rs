//! Fixed-depth CALL/RET stack.

use crate::error::ListError;

/// Hardware nesting limit for CALL.
pub const CALL_STACK_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallFrame {
    pub return_pc: u32,
    pub base_offset: u32,
}

/// Frames live in a fixed array; the stack never grows past [`CALL_STACK_CAPACITY`].
#[derive(Debug, Clone)]
pub struct CallStack {
    frames: [CallFrame; CALL_STACK_CAPACITY],
    depth: usize,
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new()
    }
}

impl CallStack {
    pub const fn new() -> Self {
        Self {
            frames: [CallFrame {
                return_pc: 0,
                base_offset: 0,
            }; CALL_STACK_CAPACITY],
            depth: 0,
        }
    }

    /// Pushes a frame; a full stack is left untouched and reported as an overflow.
    pub fn push(&mut self, frame: CallFrame) -> Result<(), ListError> {
        let slot = self
            .frames
            .get_mut(self.depth)
            .ok_or(ListError::CallStackOverflow { depth: self.depth })?;
        *slot = frame;
        self.depth += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<CallFrame> {
        self.depth = self.depth.checked_sub(1)?;
        Some(self.frames[self.depth])
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }

    pub fn clear(&mut self) {
        self.depth = 0;
    }

    /// Live frames, outermost first.
    pub fn frames(&self) -> &[CallFrame] {
        &self.frames[..self.depth]
    }
}
