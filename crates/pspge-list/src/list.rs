//! The display-list context.

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use pspge_mem::{normalize_address, CursorFactory, InstructionCursor};
use tracing::{debug, warn};

use crate::addr::{normalize_pc, relative_offset_target, relative_target, BaseRegisters};
use crate::backend::{CallbackSink, ListBackend, QueuePlacement};
use crate::call_stack::{CallFrame, CallStack};
use crate::cursor::{CursorCache, WORD_STEP};
use crate::error::Result;
use crate::status::ListStatus;
use crate::sync::SyncSignal;

/// Optional parameter block passed when a list is enqueued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptParams {
    /// Guest address of a GE context save area.
    pub context_addr: u32,
    pub stack_count: u32,
    /// Guest address of the list's private stack area; used for busy detection.
    pub stack_addr: u32,
}

/// Collaborators shared by every list slot.
#[derive(Clone)]
pub struct ListServices {
    pub backend: Arc<dyn ListBackend>,
    pub callbacks: Arc<dyn CallbackSink>,
    pub cursors: Arc<dyn CursorFactory>,
}

impl fmt::Debug for ListServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListServices")
            .field("backend", &self.backend.kind())
            .finish_non_exhaustive()
    }
}

/// State touched by the consumer on every fetch and by producers on stall updates.
struct ListRegs {
    list_addr: u32,
    stall_addr: u32,
    cbid: i32,
    opt_params: Option<ListOptParams>,
    stack_addr: u32,
    save_context_addr: u32,
    pc: u32,
    stack: CallStack,
    status: ListStatus,
    cursors: CursorCache,
}

impl ListRegs {
    fn new() -> Self {
        Self {
            list_addr: 0,
            stall_addr: 0,
            cbid: 0,
            opt_params: None,
            stack_addr: 0,
            save_context_addr: 0,
            pc: 0,
            stack: CallStack::new(),
            status: ListStatus::Done,
            cursors: CursorCache::default(),
        }
    }

    fn set_pc(&mut self, pc: u32) {
        let pc = normalize_pc(pc);
        if self.pc != pc {
            let old = self.pc;
            self.pc = pc;
            self.cursors.on_pc_changed(old, pc);
        }
    }

    /// Returns whether the stall address actually changed.
    fn update_stall_addr(&mut self, stall_addr: u32) -> bool {
        let stall_addr = normalize_pc(stall_addr);
        if self.stall_addr == stall_addr {
            return false;
        }
        self.stall_addr = stall_addr;
        true
    }

    fn is_stall_reached(&self) -> bool {
        self.pc == self.stall_addr && self.stall_addr != 0
    }

    fn push_frame(&mut self, base_offset: u32) -> Result<()> {
        let pc = self.pc;
        let frame = CallFrame {
            return_pc: pc,
            base_offset,
        };
        self.stack.push(frame).inspect_err(|err| {
            warn!(pc = format_args!("0x{pc:08x}"), "GE call rejected: {err}");
        })
    }
}

/// One pooled GE display list.
///
/// Every operation takes `&self`; the consumer (execution backend) and any number of producer
/// threads share the list through an `Arc`. PC, call stack, stall address, cursors and status sit
/// behind one short-lived lock which is never held while collaborators are called. Control flags
/// are plain atomics.
pub struct DisplayList {
    id: usize,
    services: ListServices,
    regs: Mutex<ListRegs>,
    paused: AtomicBool,
    finished: AtomicBool,
    ended: AtomicBool,
    reset: AtomicBool,
    restarted: AtomicBool,
    sync: SyncSignal,
    blocked_threads: Mutex<Vec<u32>>,
}

impl DisplayList {
    /// Creates a list slot in the reset state.
    pub fn new(id: usize, services: ListServices) -> Self {
        let list = Self {
            id,
            services,
            regs: Mutex::new(ListRegs::new()),
            paused: AtomicBool::new(false),
            finished: AtomicBool::new(true),
            ended: AtomicBool::new(true),
            reset: AtomicBool::new(true),
            restarted: AtomicBool::new(false),
            sync: SyncSignal::new(),
            blocked_threads: Mutex::new(Vec::new()),
        };
        list.reset_state();
        list
    }

    fn regs(&self) -> MutexGuard<'_, ListRegs> {
        self.regs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the registers with the active cursor resolved.
    ///
    /// Resolution goes through the memory facility with the lock released; if the PC moved in
    /// the meantime the stale cursor is dropped and resolution starts over.
    fn regs_with_cursor(&self) -> Result<MutexGuard<'_, ListRegs>> {
        loop {
            let regs = self.regs();
            let Some(addr) = regs.cursors.pending_resolution(regs.pc) else {
                return Ok(regs);
            };
            drop(regs);

            let cursor = self.services.cursors.cursor_at(addr, WORD_STEP)?;
            let mut regs = self.regs();
            let pc = regs.pc;
            if regs.cursors.install_resolved(addr, pc, cursor) {
                return Ok(regs);
            }
        }
    }

    fn blocked(&self) -> MutexGuard<'_, Vec<u32>> {
        self.blocked_threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn services(&self) -> &ListServices {
        &self.services
    }

    /// Back to the never-submitted state, leaving `status` alone.
    fn clear(&self, regs: &mut ListRegs) {
        regs.stack.clear();
        regs.cursors.clear();
        regs.pc = 0;
        regs.save_context_addr = 0;
        self.blocked().clear();
        self.finished.store(true, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        self.reset.store(true, Ordering::Release);
        self.ended.store(true, Ordering::Release);
        self.restarted.store(false, Ordering::Release);
    }

    /// Prepares the slot for a new submission.
    pub fn init(
        &self,
        list_addr: u32,
        stall_addr: u32,
        cbid: i32,
        opt_params: Option<ListOptParams>,
    ) {
        let mut regs = self.regs();
        self.clear(&mut regs);

        let list_addr = normalize_pc(list_addr);
        regs.list_addr = list_addr;
        regs.stall_addr = normalize_pc(stall_addr);
        regs.cbid = cbid;
        regs.opt_params = opt_params;
        regs.stack_addr = opt_params.map_or(0, |p| p.stack_addr);
        regs.set_pc(list_addr);
        regs.status = if regs.pc == regs.stall_addr {
            ListStatus::StallReached
        } else {
            ListStatus::Queued
        };

        self.finished.store(false, Ordering::Release);
        self.reset.store(false, Ordering::Release);
        self.ended.store(false, Ordering::Release);
        self.sync.clear();

        debug!(
            id = self.id,
            list = format_args!("0x{:08x}", regs.list_addr),
            stall = format_args!("0x{:08x}", regs.stall_addr),
            cbid,
            status = %regs.status,
            "GE list init"
        );
    }

    /// Returns the slot to the never-submitted state and withdraws it from the backend.
    pub fn reset(&self) {
        self.reset_state();
        self.services.backend.on_reset(self);
    }

    fn reset_state(&self) {
        let mut regs = self.regs();
        regs.status = ListStatus::Done;
        self.clear(&mut regs);
    }

    // Control flow.

    pub fn set_pc(&self, pc: u32) {
        self.regs().set_pc(pc);
    }

    pub fn pc(&self) -> u32 {
        self.regs().pc
    }

    pub fn jump_absolute(&self, arg: u32) {
        self.regs().set_pc(normalize_address(arg));
    }

    pub fn jump_relative(&self, arg: u32, base: &dyn BaseRegisters) {
        self.regs().set_pc(relative_target(base, arg));
    }

    pub fn jump_relative_offset(&self, arg: u32, base: &dyn BaseRegisters) {
        self.regs().set_pc(relative_offset_target(base, arg));
    }

    /// Pushes the current PC and base offset, then jumps to `normalize_address(arg)`.
    ///
    /// A call past the maximum nesting depth fails with
    /// [`ListError::CallStackOverflow`](crate::ListError::CallStackOverflow) and changes nothing.
    pub fn call_absolute(&self, arg: u32, base: &dyn BaseRegisters) -> Result<()> {
        let mut regs = self.regs();
        regs.push_frame(base.base_offset())?;
        regs.set_pc(normalize_address(arg));
        Ok(())
    }

    pub fn call_relative(&self, arg: u32, base: &dyn BaseRegisters) -> Result<()> {
        let mut regs = self.regs();
        regs.push_frame(base.base_offset())?;
        regs.set_pc(relative_target(base, arg));
        Ok(())
    }

    pub fn call_relative_offset(&self, arg: u32, base: &dyn BaseRegisters) -> Result<()> {
        let mut regs = self.regs();
        regs.push_frame(base.base_offset())?;
        regs.set_pc(relative_offset_target(base, arg));
        Ok(())
    }

    /// Returns from the innermost call; an unmatched return does nothing.
    pub fn ret(&self, base: &mut dyn BaseRegisters) {
        let mut regs = self.regs();
        if let Some(frame) = regs.stack.pop() {
            base.set_base_offset(frame.base_offset);
            regs.set_pc(frame.return_pc);
        }
    }

    pub fn is_stack_empty(&self) -> bool {
        self.regs().stack.is_empty()
    }

    pub fn stack_depth(&self) -> usize {
        self.regs().stack.depth()
    }

    // Stall protocol.

    pub fn set_stall_address(&self, stall_addr: u32) {
        let changed = self.regs().update_stall_addr(stall_addr);
        if changed {
            self.stall_address_changed();
        }
    }

    /// Moves the stall address and installs `cursor` as the fast-path reader for `[start, end)`.
    ///
    /// Both are swapped under the same lock so the consumer never sees the new stall address
    /// paired with a stale cursor.
    pub fn set_stall_address_with_cursor(
        &self,
        stall_addr: u32,
        cursor: Box<dyn InstructionCursor>,
        start: u32,
        end: u32,
    ) {
        let changed = {
            let mut regs = self.regs();
            let changed = regs.update_stall_addr(stall_addr);
            regs.cursors.set_base(cursor, start, end);
            let pc = regs.pc;
            regs.cursors.on_pc_changed(pc, pc);
            changed
        };
        if changed {
            self.stall_address_changed();
        }
    }

    fn stall_address_changed(&self) {
        debug!(
            id = self.id,
            stall = format_args!("0x{:08x}", self.stall_address()),
            "GE stall address updated"
        );
        self.services.backend.on_stall_address_updated(self);
        self.signal();
    }

    pub fn stall_address(&self) -> u32 {
        self.regs().stall_addr
    }

    pub fn is_stall_reached(&self) -> bool {
        self.regs().is_stall_reached()
    }

    pub fn has_stall_address(&self) -> bool {
        self.regs().stall_addr != 0
    }

    pub fn is_stalled_at_start(&self) -> bool {
        let regs = self.regs();
        regs.is_stall_reached() && regs.pc == regs.list_addr
    }

    /// Status as reported to the guest.
    ///
    /// A stored `StallReached` whose stall address has since moved reads as `Drawing` until the
    /// consumer resumes and updates the status itself.
    pub fn sync_status(&self) -> ListStatus {
        let regs = self.regs();
        if regs.status == ListStatus::StallReached && !regs.is_stall_reached() {
            return ListStatus::Drawing;
        }
        regs.status
    }

    /// Raw stored status.
    pub fn status(&self) -> ListStatus {
        self.regs().status
    }

    pub fn set_status(&self, status: ListStatus) {
        self.regs().status = status;
    }

    pub fn is_done(&self) -> bool {
        matches!(self.status(), ListStatus::Done | ListStatus::CancelDone)
    }

    pub fn is_drawing(&self) -> bool {
        self.status() == ListStatus::Drawing
    }

    // Synchronization.

    pub fn signal(&self) {
        self.sync.signal();
    }

    /// Blocks until [`DisplayList::signal`] is called or `timeout_ms` elapses.
    pub fn wait_for_sync(&self, timeout_ms: u64) -> bool {
        self.sync.wait(Duration::from_millis(timeout_ms))
    }

    // Lifecycle.

    pub fn start_list(self: &Arc<Self>) {
        self.paused.store(false, Ordering::Release);
        debug!(id = self.id, "GE list start");
        self.services.backend.on_start(self);
        self.services
            .backend
            .submit(Arc::clone(self), QueuePlacement::Tail);
        self.signal();
    }

    pub fn start_list_head(self: &Arc<Self>) {
        self.paused.store(false, Ordering::Release);
        debug!(id = self.id, "GE list start (head)");
        self.services.backend.on_start_head(self);
        self.services
            .backend
            .submit(Arc::clone(self), QueuePlacement::Head);
    }

    pub fn pause_list(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn clear_paused(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn restart_list(&self) {
        self.paused.store(false, Ordering::Release);
        self.restarted.store(true, Ordering::Release);
        debug!(id = self.id, "GE list restart");
        self.signal();
        self.services.backend.on_restart(self);
    }

    pub fn clear_restart(&self) {
        self.restarted.store(false, Ordering::Release);
    }

    pub fn finish_list(&self) {
        self.finished.store(true, Ordering::Release);
        self.services.backend.on_finish(self);
    }

    /// Marks the list ended if, and only if, it has already finished.
    pub fn end_list(&self) {
        self.ended.store(self.is_finished(), Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    pub fn is_reset(&self) -> bool {
        self.reset.load(Ordering::Acquire)
    }

    pub fn is_restarted(&self) -> bool {
        self.restarted.load(Ordering::Acquire)
    }

    // Callbacks.

    pub fn push_signal_callback(&self, list_id: usize, behavior: u32, signal: u32) {
        let (cbid, pc) = self.callback_target();
        self.services
            .callbacks
            .trigger_signal_callback(cbid, list_id, pc, behavior, signal);
    }

    pub fn push_finish_callback(&self, list_id: usize, arg: u32) {
        let (cbid, pc) = self.callback_target();
        self.services
            .callbacks
            .trigger_finish_callback(cbid, list_id, pc, arg);
    }

    fn callback_target(&self) -> (i32, u32) {
        let (cbid, pc) = {
            let regs = self.regs();
            (regs.cbid, regs.pc)
        };
        (cbid, self.services.backend.kind().callback_pc(pc))
    }

    // Instruction fetch.

    /// Fetches the word at the PC and advances the PC past it.
    pub fn read_next_instruction(&self) -> Result<u32> {
        let mut regs = self.regs_with_cursor()?;
        let pc = regs.pc;
        let word = regs.cursors.cursor_mut()?.read()?;
        regs.pc = normalize_pc(pc.wrapping_add(4));
        Ok(word)
    }

    /// Peeks at the word before the one last fetched without moving the cursor.
    pub fn read_previous_instruction(&self) -> Result<u32> {
        let mut regs = self.regs_with_cursor()?;
        let cursor = regs.cursors.cursor_mut()?;
        cursor.advance(-2);
        match cursor.read() {
            Ok(word) => {
                cursor.advance(1);
                Ok(word)
            }
            Err(err) => {
                cursor.advance(2);
                Err(err.into())
            }
        }
    }

    pub fn undo_read(&self) -> Result<()> {
        self.undo_read_n(1)
    }

    /// Rewinds the cursor by `n` words. The PC is left for the caller to adjust.
    pub fn undo_read_n(&self, n: u32) -> Result<()> {
        let mut regs = self.regs_with_cursor()?;
        let steps = i32::try_from(n).unwrap_or(i32::MAX);
        regs.cursors.cursor_mut()?.advance(-steps);
        Ok(())
    }

    /// Replaces the active cursor.
    pub fn set_cursor(&self, cursor: Box<dyn InstructionCursor>) {
        self.regs().cursors.set_active(cursor);
    }

    pub fn has_base_cursor(&self) -> bool {
        self.regs().cursors.has_base()
    }

    /// Cursors resolved through the memory facility over the slot's lifetime.
    pub fn cursor_resolutions(&self) -> u64 {
        self.regs().cursors.resolutions()
    }

    // Submission bookkeeping.

    pub fn list_addr(&self) -> u32 {
        self.regs().list_addr
    }

    pub fn callback_id(&self) -> i32 {
        self.regs().cbid
    }

    pub fn opt_params(&self) -> Option<ListOptParams> {
        self.regs().opt_params
    }

    pub fn save_context_addr(&self) -> u32 {
        self.regs().save_context_addr
    }

    pub fn set_save_context_addr(&self, addr: u32) {
        self.regs().save_context_addr = addr;
    }

    pub fn has_save_context_addr(&self) -> bool {
        self.save_context_addr() != 0
    }

    /// Whether this list was submitted at `list_addr` or shares the guest stack at `stack_addr`.
    pub fn is_in_use(&self, list_addr: u32, stack_addr: u32) -> bool {
        let regs = self.regs();
        regs.list_addr == list_addr || (stack_addr != 0 && regs.stack_addr == stack_addr)
    }

    pub fn add_blocked_thread(&self, thread_id: u32) {
        self.blocked().push(thread_id);
    }

    pub fn blocked_threads(&self) -> Vec<u32> {
        self.blocked().clone()
    }

    pub fn take_blocked_threads(&self) -> Vec<u32> {
        core::mem::take(&mut *self.blocked())
    }
}

impl fmt::Display for DisplayList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (status, list_addr, pc, stall_addr, cbid) = {
            let regs = self.regs();
            (regs.status, regs.list_addr, regs.pc, regs.stall_addr, regs.cbid)
        };
        write!(
            f,
            "PspGeList[id=0x{:X}, status={status}, list=0x{list_addr:08X}, pc=0x{pc:08X}, \
             stall=0x{stall_addr:08X}, cbid=0x{cbid:X}, ended={}, finished={}, paused={}, \
             restarted={}, reset={}]",
            self.id,
            self.is_ended(),
            self.is_finished(),
            self.is_paused(),
            self.is_restarted(),
            self.is_reset(),
        )
    }
}

impl fmt::Debug for DisplayList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let regs = self.regs();
        f.debug_struct("DisplayList")
            .field("id", &self.id)
            .field("status", &regs.status)
            .field("list_addr", &regs.list_addr)
            .field("pc", &regs.pc)
            .field("stall_addr", &regs.stall_addr)
            .field("stack_depth", &regs.stack.depth())
            .finish_non_exhaustive()
    }
}
