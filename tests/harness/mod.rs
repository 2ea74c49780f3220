#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pspge_list::{
    CallbackSink, CommandSink, ExecOutcome, GeRegisters, ListPool, ListServices, SequentialEngine,
};
use pspge_mem::GuestMemory;

/// Guest callbacks as `(kind, cbid, pc, payload)`; `kind` is `"signal"` or `"finish"`.
#[derive(Debug, Default)]
pub struct CallbackLog(Mutex<Vec<(&'static str, i32, u32, u32)>>);

impl CallbackLog {
    pub fn entries(&self) -> Vec<(&'static str, i32, u32, u32)> {
        self.0.lock().unwrap().clone()
    }
}

impl CallbackSink for CallbackLog {
    fn trigger_signal_callback(
        &self,
        cbid: i32,
        _list_id: usize,
        pc: u32,
        _behavior: u32,
        signal: u32,
    ) {
        self.0.lock().unwrap().push(("signal", cbid, pc, signal));
    }

    fn trigger_finish_callback(&self, cbid: i32, _list_id: usize, pc: u32, arg: u32) {
        self.0.lock().unwrap().push(("finish", cbid, pc, arg));
    }
}

/// Collects every forwarded command word.
#[derive(Debug, Default)]
pub struct Forwarded(pub Vec<u32>);

impl CommandSink for Forwarded {
    fn execute(&mut self, _list_id: usize, _pc: u32, command: u32) {
        self.0.push(command);
    }
}

pub struct Rig {
    pub mem: GuestMemory,
    pub engine: Arc<SequentialEngine>,
    pub callbacks: Arc<CallbackLog>,
    pub pool: ListPool,
}

impl Rig {
    pub fn new(sync_timeout: Duration, list_count: usize) -> Self {
        let mem = GuestMemory::new();
        let engine = Arc::new(SequentialEngine::new(sync_timeout));
        let callbacks = Arc::new(CallbackLog::default());
        let pool = ListPool::new(
            ListServices {
                backend: engine.clone(),
                callbacks: callbacks.clone(),
                cursors: Arc::new(mem.clone()),
            },
            list_count,
        );
        Self {
            mem,
            engine,
            callbacks,
            pool,
        }
    }

    /// Runs the queue once on the calling thread.
    pub fn run(&self) -> (Vec<(usize, ExecOutcome)>, Forwarded) {
        let mut regs = GeRegisters::default();
        let mut sink = Forwarded::default();
        let outcomes = self.engine.run_queued(&mut regs, &mut sink).unwrap();
        (outcomes, sink)
    }
}
