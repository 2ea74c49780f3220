//! Builtin sequential GE engine.
//!
//! The engine owns the queue of started lists and walks each one word by word. It interprets the
//! commands that steer list execution itself (jumps, calls, SIGNAL/FINISH/END and the relative
//! addressing registers) and forwards everything else to a [`CommandSink`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, trace};

use crate::addr::BaseRegisters;
use crate::backend::{BackendKind, ListBackend, QueuePlacement};
use crate::config::GeConfig;
use crate::error::{ListError, Result};
use crate::list::DisplayList;
use crate::status::ListStatus;

/// Command opcodes (bits 24..32 of a command word).
pub mod opcode {
    pub const NOP: u8 = 0x00;
    pub const JUMP: u8 = 0x08;
    pub const BJUMP: u8 = 0x09;
    pub const CALL: u8 = 0x0A;
    pub const RET: u8 = 0x0B;
    pub const END: u8 = 0x0C;
    pub const SIGNAL: u8 = 0x0E;
    pub const FINISH: u8 = 0x0F;
    pub const BASE: u8 = 0x10;
    pub const OFFSET_ADDR: u8 = 0x13;
    pub const ORIGIN: u8 = 0x14;
}

/// SIGNAL behaviors (bits 16..24 of the SIGNAL argument).
pub mod signal_behavior {
    pub const SUSPEND: u32 = 0x01;
    pub const CONTINUE: u32 = 0x02;
    pub const PAUSE: u32 = 0x03;
    pub const SYNC: u32 = 0x08;
    pub const JUMP: u32 = 0x10;
    pub const CALL: u32 = 0x11;
    pub const RET: u32 = 0x12;
    pub const RJUMP: u32 = 0x13;
    pub const RCALL: u32 = 0x14;
    pub const OJUMP: u32 = 0x15;
    pub const OCALL: u32 = 0x16;
}

pub const fn command(op: u8, arg: u32) -> u32 {
    ((op as u32) << 24) | (arg & 0x00FF_FFFF)
}

/// Relative addressing registers of the builtin engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeRegisters {
    pub base: u32,
    pub base_offset: u32,
}

impl BaseRegisters for GeRegisters {
    fn base(&self) -> u32 {
        self.base
    }

    fn base_offset(&self) -> u32 {
        self.base_offset
    }

    fn set_base_offset(&mut self, offset: u32) {
        self.base_offset = offset;
    }
}

/// Consumer of the commands the engine does not interpret itself (the rasterizer).
pub trait CommandSink {
    /// `pc` is the address of `command`.
    fn execute(&mut self, list_id: usize, pc: u32, command: u32);

    /// Result of the last bounding-box test; BJUMP branches when it is `false`.
    fn bounding_box_visible(&mut self) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullCommandSink;

impl CommandSink for NullCommandSink {
    fn execute(&mut self, _list_id: usize, _pc: u32, _command: u32) {}
}

/// Why [`SequentialEngine::execute`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// END was executed; `finished` tells whether a FINISH preceded it.
    Ended { finished: bool },
    Paused,
    /// The stall address was reached and no producer extended it within the sync timeout.
    Stalled,
}

impl ExecOutcome {
    pub fn is_ended(self) -> bool {
        matches!(self, ExecOutcome::Ended { .. })
    }
}

#[derive(Debug)]
pub struct SequentialEngine {
    queue: Mutex<VecDeque<Arc<DisplayList>>>,
    sync_timeout_ms: u64,
}

impl Default for SequentialEngine {
    fn default() -> Self {
        Self::new(Duration::from_millis(GeConfig::DEFAULT_SYNC_TIMEOUT_MS))
    }
}

impl SequentialEngine {
    pub fn new(sync_timeout: Duration) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            sync_timeout_ms: u64::try_from(sync_timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn from_config(config: &GeConfig) -> Self {
        Self::new(Duration::from_millis(config.sync_timeout_ms))
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Arc<DisplayList>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `list`. A list that is already queued moves to the requested end instead of being
    /// queued twice.
    pub fn enqueue(&self, list: Arc<DisplayList>, placement: QueuePlacement) {
        let mut queue = self.queue();
        queue.retain(|queued| !Arc::ptr_eq(queued, &list));
        match placement {
            QueuePlacement::Tail => queue.push_back(list),
            QueuePlacement::Head => queue.push_front(list),
        }
    }

    pub fn pop_next(&self) -> Option<Arc<DisplayList>> {
        self.queue().pop_front()
    }

    /// Drops `list` from the queue. Returns whether it was queued.
    pub fn withdraw(&self, list: &DisplayList) -> bool {
        let mut queue = self.queue();
        let before = queue.len();
        queue.retain(|queued| !std::ptr::eq(queued.as_ref(), list));
        queue.len() != before
    }

    pub fn queued_len(&self) -> usize {
        self.queue().len()
    }

    /// Ids of the queued lists, front first.
    pub fn queued_ids(&self) -> Vec<usize> {
        self.queue().iter().map(|list| list.id()).collect()
    }

    /// Executes queued lists in order until the queue is empty or a list cannot run to its END.
    ///
    /// A list that pauses or stalls is put back at the head of the queue so it resumes first, as
    /// is a list whose execution fails; resetting that list is what takes it out of the queue.
    /// Lists that were reset or are already done are dropped without running.
    pub fn run_queued(
        &self,
        regs: &mut GeRegisters,
        sink: &mut dyn CommandSink,
    ) -> Result<Vec<(usize, ExecOutcome)>> {
        let mut outcomes = Vec::new();
        while let Some(list) = self.pop_next() {
            if list.is_reset() || list.is_done() {
                debug!(id = list.id(), status = %list.status(), "dropping inactive GE list");
                continue;
            }
            let outcome = match self.execute(&list, regs, sink) {
                Ok(outcome) => outcome,
                Err(err) => {
                    // Keep the faulting list reachable so the caller can inspect or reset it.
                    self.enqueue(list, QueuePlacement::Head);
                    return Err(err);
                }
            };
            outcomes.push((list.id(), outcome));
            if !outcome.is_ended() {
                self.enqueue(list, QueuePlacement::Head);
                break;
            }
        }
        Ok(outcomes)
    }

    /// Runs `list` until it ends, pauses, or stalls past the sync timeout.
    pub fn execute(
        &self,
        list: &DisplayList,
        regs: &mut GeRegisters,
        sink: &mut dyn CommandSink,
    ) -> Result<ExecOutcome> {
        if list.is_reset() {
            return Err(ListError::ListReset { id: list.id() });
        }
        if list.is_restarted() {
            list.clear_restart();
        }
        list.set_status(ListStatus::Drawing);
        debug!(id = list.id(), pc = format_args!("0x{:08x}", list.pc()), "GE list drawing");

        loop {
            if list.is_paused() {
                debug!(id = list.id(), "GE list paused");
                return Ok(ExecOutcome::Paused);
            }

            if list.is_stall_reached() {
                list.set_status(ListStatus::StallReached);
                if !list.wait_for_sync(self.sync_timeout_ms) {
                    debug!(
                        id = list.id(),
                        stall = format_args!("0x{:08x}", list.stall_address()),
                        "GE list stalled"
                    );
                    return Ok(ExecOutcome::Stalled);
                }
                if !list.is_stall_reached() {
                    list.set_status(ListStatus::Drawing);
                }
                continue;
            }

            let word = list.read_next_instruction()?;
            if let Some(outcome) = self.dispatch(list, word, regs, sink)? {
                return Ok(outcome);
            }
        }
    }

    fn dispatch(
        &self,
        list: &DisplayList,
        word: u32,
        regs: &mut GeRegisters,
        sink: &mut dyn CommandSink,
    ) -> Result<Option<ExecOutcome>> {
        let op = (word >> 24) as u8;
        let arg = word & 0x00FF_FFFF;
        trace!(
            id = list.id(),
            pc = format_args!("0x{:08x}", list.pc().wrapping_sub(4)),
            word = format_args!("0x{word:08x}"),
            "GE command"
        );

        match op {
            opcode::NOP => {}
            opcode::JUMP => list.jump_relative_offset(arg, &*regs),
            opcode::BJUMP => {
                if !sink.bounding_box_visible() {
                    list.jump_relative_offset(arg, &*regs);
                }
            }
            opcode::CALL => list.call_relative_offset(arg, &*regs)?,
            opcode::RET => list.ret(regs),
            opcode::END => return self.end(list, arg, regs),
            opcode::SIGNAL => {
                let behavior = (arg >> 16) & 0xFF;
                let signal = arg & 0xFFFF;
                if matches!(
                    behavior,
                    signal_behavior::SUSPEND
                        | signal_behavior::CONTINUE
                        | signal_behavior::PAUSE
                        | signal_behavior::SYNC
                ) {
                    list.push_signal_callback(list.id(), behavior, signal);
                }
            }
            opcode::FINISH => {
                list.finish_list();
                list.push_finish_callback(list.id(), arg);
            }
            opcode::BASE => regs.base = (arg << 8) & 0xFF00_0000,
            opcode::OFFSET_ADDR => regs.base_offset = arg << 8,
            opcode::ORIGIN => regs.base_offset = list.pc().wrapping_sub(4),
            _ => sink.execute(list.id(), list.pc().wrapping_sub(4), word),
        }
        Ok(None)
    }

    /// END either completes the list or, right after a control-flow SIGNAL, redirects it.
    fn end(
        &self,
        list: &DisplayList,
        arg: u32,
        regs: &mut GeRegisters,
    ) -> Result<Option<ExecOutcome>> {
        // An END at the very start of a region has no readable predecessor.
        let previous = match list.read_previous_instruction() {
            Ok(word) => word,
            Err(ListError::Memory(_)) => command(opcode::NOP, 0),
            Err(err) => return Err(err),
        };
        if (previous >> 24) as u8 == opcode::SIGNAL {
            let behavior = (previous >> 16) & 0xFF;
            let target = ((previous & 0xFFFF) << 16) | (arg & 0xFFFF);
            match behavior {
                signal_behavior::JUMP => {
                    list.jump_absolute(target);
                    return Ok(None);
                }
                signal_behavior::CALL => {
                    list.call_absolute(target, &*regs)?;
                    return Ok(None);
                }
                signal_behavior::RET => {
                    list.ret(regs);
                    return Ok(None);
                }
                signal_behavior::RJUMP => {
                    list.jump_relative(target, &*regs);
                    return Ok(None);
                }
                signal_behavior::RCALL => {
                    list.call_relative(target, &*regs)?;
                    return Ok(None);
                }
                signal_behavior::OJUMP => {
                    list.jump_relative_offset(target, &*regs);
                    return Ok(None);
                }
                signal_behavior::OCALL => {
                    list.call_relative_offset(target, &*regs)?;
                    return Ok(None);
                }
                signal_behavior::PAUSE => {
                    list.pause_list();
                    return Ok(Some(ExecOutcome::Paused));
                }
                _ => {}
            }
        }

        list.end_list();
        list.set_status(ListStatus::Done);
        let finished = list.is_ended();
        debug!(id = list.id(), finished, "GE list end");
        Ok(Some(ExecOutcome::Ended { finished }))
    }
}

impl ListBackend for SequentialEngine {
    fn kind(&self) -> BackendKind {
        BackendKind::Builtin
    }

    fn on_reset(&self, list: &DisplayList) {
        if self.withdraw(list) {
            debug!(id = list.id(), "GE list withdrawn on reset");
        }
    }

    fn submit(&self, list: Arc<DisplayList>, placement: QueuePlacement) {
        self.enqueue(list, placement);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_encoding() {
        assert_eq!(command(opcode::END, 0), 0x0C00_0000);
        assert_eq!(command(opcode::BASE, 0xFF08_0000), 0x1008_0000);
    }

    #[test]
    fn base_registers_trait_view() {
        let mut regs = GeRegisters {
            base: 0x0800_0000,
            base_offset: 0x40,
        };
        let view: &mut dyn BaseRegisters = &mut regs;
        view.set_base_offset(0x80);
        assert_eq!(view.base(), 0x0800_0000);
        assert_eq!(regs.base_offset, 0x80);
    }
}
