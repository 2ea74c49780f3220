//! Execution backends and callback reporting.
//!
//! A list never talks to a concrete engine. Lifecycle notifications and submissions go through
//! the [`ListBackend`] capability, which is implemented by:
//! - [`SequentialEngine`](crate::engine::SequentialEngine), the builtin interpreter,
//! - [`ExternalBackend`], which forwards events to a renderer living outside this crate, and
//! - [`BackendDispatcher`], which routes to one of the two based on a runtime switch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::SequentialEngine;
use crate::list::DisplayList;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Builtin,
    External,
}

impl BackendKind {
    /// PC reported to guest signal/finish callbacks.
    ///
    /// The builtin engine reports the address after the terminating END command, i.e. one word
    /// past the current PC; external renderers already report that address themselves.
    pub const fn callback_pc(self, pc: u32) -> u32 {
        match self {
            BackendKind::Builtin => pc.wrapping_add(4),
            BackendKind::External => pc,
        }
    }
}

/// Where a started list lands in the backend's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueuePlacement {
    Tail,
    Head,
}

pub trait ListBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn on_start(&self, _list: &DisplayList) {}

    fn on_start_head(&self, _list: &DisplayList) {}

    fn on_restart(&self, _list: &DisplayList) {}

    fn on_stall_address_updated(&self, _list: &DisplayList) {}

    fn on_finish(&self, _list: &DisplayList) {}

    /// The list was reset; a backend holding it must drop it without running it again.
    fn on_reset(&self, _list: &DisplayList) {}

    /// Hands a started list to the backend for execution.
    fn submit(&self, list: Arc<DisplayList>, placement: QueuePlacement);
}

/// Guest callback trigger service.
pub trait CallbackSink: Send + Sync {
    fn trigger_signal_callback(
        &self,
        cbid: i32,
        list_id: usize,
        pc: u32,
        behavior: u32,
        signal: u32,
    );

    fn trigger_finish_callback(&self, cbid: i32, list_id: usize, pc: u32, arg: u32);
}

/// Callback sink that drops every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCallbackSink;

impl CallbackSink for NullCallbackSink {
    fn trigger_signal_callback(
        &self,
        _cbid: i32,
        _list_id: usize,
        _pc: u32,
        _behavior: u32,
        _signal: u32,
    ) {
    }

    fn trigger_finish_callback(&self, _cbid: i32, _list_id: usize, _pc: u32, _arg: u32) {}
}

/// Lifecycle events forwarded by [`ExternalBackend`].
#[derive(Debug, Clone)]
pub enum ListEvent {
    Started {
        list: Arc<DisplayList>,
        placement: QueuePlacement,
    },
    Restarted {
        list_id: usize,
    },
    StallUpdated {
        list_id: usize,
        stall_addr: u32,
    },
    Finished {
        list_id: usize,
    },
    Reset {
        list_id: usize,
    },
}

/// Backend for a renderer that runs outside this crate (another thread or process).
///
/// Every notification becomes a [`ListEvent`] on a channel; the receiving side drives the lists.
#[derive(Debug)]
pub struct ExternalBackend {
    events: mpsc::Sender<ListEvent>,
}

impl ExternalBackend {
    pub fn new(events: mpsc::Sender<ListEvent>) -> Self {
        Self { events }
    }

    pub fn channel() -> (Self, mpsc::Receiver<ListEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }

    fn send(&self, event: ListEvent) {
        if let Err(err) = self.events.send(event) {
            warn!("external GE receiver is gone; dropping {:?}", err.0);
        }
    }
}

impl ListBackend for ExternalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::External
    }

    fn on_restart(&self, list: &DisplayList) {
        self.send(ListEvent::Restarted { list_id: list.id() });
    }

    fn on_stall_address_updated(&self, list: &DisplayList) {
        self.send(ListEvent::StallUpdated {
            list_id: list.id(),
            stall_addr: list.stall_address(),
        });
    }

    fn on_finish(&self, list: &DisplayList) {
        self.send(ListEvent::Finished { list_id: list.id() });
    }

    fn on_reset(&self, list: &DisplayList) {
        self.send(ListEvent::Reset { list_id: list.id() });
    }

    fn submit(&self, list: Arc<DisplayList>, placement: QueuePlacement) {
        self.send(ListEvent::Started { list, placement });
    }
}

/// Routes list notifications to the builtin engine or, when switched on, the external backend.
pub struct BackendDispatcher {
    builtin: Arc<SequentialEngine>,
    external: Option<Arc<dyn ListBackend>>,
    external_active: AtomicBool,
}

impl BackendDispatcher {
    pub fn new(builtin: Arc<SequentialEngine>) -> Self {
        Self {
            builtin,
            external: None,
            external_active: AtomicBool::new(false),
        }
    }

    pub fn with_external(builtin: Arc<SequentialEngine>, external: Arc<dyn ListBackend>) -> Self {
        Self {
            builtin,
            external: Some(external),
            external_active: AtomicBool::new(false),
        }
    }

    pub fn builtin(&self) -> &Arc<SequentialEngine> {
        &self.builtin
    }

    /// Switches routing. Returns whether the external backend is now active; without one
    /// configured the builtin engine stays in charge.
    pub fn set_external_active(&self, active: bool) -> bool {
        let active = active && self.external.is_some();
        self.external_active.store(active, Ordering::Release);
        debug!(external = active, "GE backend selected");
        active
    }

    pub fn is_external_active(&self) -> bool {
        self.external_active.load(Ordering::Acquire)
    }

    fn active(&self) -> &dyn ListBackend {
        match &self.external {
            Some(external) if self.is_external_active() => external.as_ref(),
            _ => self.builtin.as_ref(),
        }
    }
}

impl core::fmt::Debug for BackendDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BackendDispatcher")
            .field("has_external", &self.external.is_some())
            .field("external_active", &self.is_external_active())
            .finish()
    }
}

impl ListBackend for BackendDispatcher {
    fn kind(&self) -> BackendKind {
        self.active().kind()
    }

    fn on_start(&self, list: &DisplayList) {
        self.active().on_start(list);
    }

    fn on_start_head(&self, list: &DisplayList) {
        self.active().on_start_head(list);
    }

    fn on_restart(&self, list: &DisplayList) {
        self.active().on_restart(list);
    }

    fn on_stall_address_updated(&self, list: &DisplayList) {
        self.active().on_stall_address_updated(list);
    }

    fn on_finish(&self, list: &DisplayList) {
        self.active().on_finish(list);
    }

    /// Reaches the builtin engine even while the external backend is active, so a list queued
    /// before the switch does not linger there.
    fn on_reset(&self, list: &DisplayList) {
        self.builtin.on_reset(list);
        if let Some(external) = self.external.as_ref().filter(|_| self.is_external_active()) {
            external.on_reset(list);
        }
    }

    fn submit(&self, list: Arc<DisplayList>, placement: QueuePlacement) {
        self.active().submit(list, placement);
    }
}
