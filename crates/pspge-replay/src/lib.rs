//! Replays a raw GE display list through the list front end.
//!
//! The list is loaded into guest memory and submitted to a [`ListPool`]. With the builtin backend
//! the [`SequentialEngine`] runs on a worker thread while the calling thread plays producer,
//! writing the list in chunks and advancing the stall address after each one. With the external
//! backend selected nothing executes; the lifecycle events the backend would have received are
//! collected instead.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use pspge_list::{
    normalize_pc, BackendDispatcher, CallbackSink, CommandSink, ExecOutcome, ExternalBackend,
    GeConfig, GeRegisters, ListError, ListEvent, ListPool, ListServices, ListStatus,
    QueuePlacement, SequentialEngine,
};
use pspge_mem::GuestMemory;
use tracing::{debug, info};

pub const DEFAULT_LOAD_ADDR: u32 = 0x0880_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOptions {
    pub load_addr: u32,
    /// Stream the list in chunks of this many words; `None` loads it in one go.
    pub chunk_words: Option<usize>,
    pub cbid: i32,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            load_addr: DEFAULT_LOAD_ADDR,
            chunk_words: None,
            cbid: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackRecord {
    Signal {
        cbid: i32,
        list_id: usize,
        pc: u32,
        behavior: u32,
        signal: u32,
    },
    Finish {
        cbid: i32,
        list_id: usize,
        pc: u32,
        arg: u32,
    },
}

impl fmt::Display for CallbackRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackRecord::Signal {
                cbid,
                list_id,
                pc,
                behavior,
                signal,
            } => write!(
                f,
                "signal cbid={cbid} list={list_id} pc=0x{pc:08x} behavior=0x{behavior:02x} \
                 signal=0x{signal:04x}"
            ),
            CallbackRecord::Finish {
                cbid,
                list_id,
                pc,
                arg,
            } => write!(f, "finish cbid={cbid} list={list_id} pc=0x{pc:08x} arg=0x{arg:06x}"),
        }
    }
}

#[derive(Debug, Default)]
struct RecordingCallbacks(Mutex<Vec<CallbackRecord>>);

impl RecordingCallbacks {
    fn push(&self, record: CallbackRecord) {
        debug!("{record}");
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    fn take(&self) -> Vec<CallbackRecord> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl CallbackSink for RecordingCallbacks {
    fn trigger_signal_callback(
        &self,
        cbid: i32,
        list_id: usize,
        pc: u32,
        behavior: u32,
        signal: u32,
    ) {
        self.push(CallbackRecord::Signal {
            cbid,
            list_id,
            pc,
            behavior,
            signal,
        });
    }

    fn trigger_finish_callback(&self, cbid: i32, list_id: usize, pc: u32, arg: u32) {
        self.push(CallbackRecord::Finish {
            cbid,
            list_id,
            pc,
            arg,
        });
    }
}

/// Tallies the commands the engine forwards, by opcode.
#[derive(Debug, Default)]
struct OpcodeHistogram(BTreeMap<u8, usize>);

impl CommandSink for OpcodeHistogram {
    fn execute(&mut self, _list_id: usize, _pc: u32, command: u32) {
        *self.0.entry((command >> 24) as u8).or_default() += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub outcomes: Vec<ExecOutcome>,
    /// Forwarded (non control-flow) commands per opcode.
    pub commands: BTreeMap<u8, usize>,
    pub callbacks: Vec<CallbackRecord>,
    /// Events delivered to the external backend, if it was selected.
    pub events: Vec<String>,
    pub status: ListStatus,
    pub final_state: String,
}

impl ReplayReport {
    pub fn forwarded_commands(&self) -> usize {
        self.commands.values().sum()
    }

    pub fn ended(&self) -> bool {
        self.outcomes.last().is_some_and(|o| o.is_ended())
    }
}

/// Decodes a little-endian word stream.
pub fn words_from_bytes(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        bail!(
            "display list length {} is not a multiple of 4 bytes",
            bytes.len()
        );
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect())
}

/// Reads a JSON config file, or the `PSPGE_*` environment when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<GeConfig> {
    let config = match path {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open config: {}", path.display()))?;
            let config: GeConfig = serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("failed to parse config: {}", path.display()))?;
            config.validate()?;
            config
        }
        None => GeConfig::from_env()?,
    };
    Ok(config)
}

fn describe(event: &ListEvent) -> String {
    match event {
        ListEvent::Started { list, placement } => {
            format!("started list={} placement={placement:?}", list.id())
        }
        ListEvent::Restarted { list_id } => format!("restarted list={list_id}"),
        ListEvent::StallUpdated {
            list_id,
            stall_addr,
        } => format!("stall list={list_id} addr=0x{stall_addr:08x}"),
        ListEvent::Finished { list_id } => format!("finished list={list_id}"),
        ListEvent::Reset { list_id } => format!("reset list={list_id}"),
    }
}

fn run_engine(
    engine: &SequentialEngine,
    producer_done: &AtomicBool,
) -> Result<(Vec<ExecOutcome>, OpcodeHistogram), ListError> {
    let mut regs = GeRegisters::default();
    let mut sink = OpcodeHistogram::default();
    let mut outcomes = Vec::new();
    loop {
        // A stall only means "no more data" once the producer had finished before this run.
        let done_before = producer_done.load(Ordering::Acquire);
        let ran = engine.run_queued(&mut regs, &mut sink)?;
        let Some(&(_, last)) = ran.last() else {
            break;
        };
        outcomes.extend(ran.into_iter().map(|(_, outcome)| outcome));
        match last {
            ExecOutcome::Stalled if !done_before => continue,
            _ => break,
        }
    }
    Ok((outcomes, sink))
}

pub fn replay(words: &[u32], config: &GeConfig, opts: &ReplayOptions) -> Result<ReplayReport> {
    if words.is_empty() {
        bail!("display list is empty");
    }
    let load_addr = normalize_pc(opts.load_addr);
    let chunk_words = opts.chunk_words.unwrap_or(words.len()).max(1);

    let mem = GuestMemory::new();
    let engine = Arc::new(SequentialEngine::from_config(config));
    let (external, events) = ExternalBackend::channel();
    let dispatcher = Arc::new(BackendDispatcher::with_external(
        engine.clone(),
        Arc::new(external),
    ));
    dispatcher.set_external_active(config.external_backend);
    let callbacks = Arc::new(RecordingCallbacks::default());
    let pool = ListPool::from_config(
        ListServices {
            backend: dispatcher.clone(),
            callbacks: callbacks.clone(),
            cursors: Arc::new(mem.clone()),
        },
        config,
    );

    let mut written: u32 = 0;
    let mut write_chunk = |chunk: &[u32]| -> Result<u32> {
        let addr = load_addr.wrapping_add(written);
        mem.write_words(addr, chunk)
            .with_context(|| format!("failed to load list words at 0x{addr:08x}"))?;
        let bytes = u32::try_from(chunk.len() * 4).context("display list too large")?;
        written = written.wrapping_add(bytes);
        Ok(load_addr.wrapping_add(written))
    };

    let mut chunks = words.chunks(chunk_words);
    let first = chunks.next().ok_or_else(|| anyhow!("display list is empty"))?;
    let stall = write_chunk(first)?;
    let list = pool
        .enqueue(load_addr, stall, opts.cbid, None, QueuePlacement::Tail)
        .context("failed to enqueue display list")?;
    info!(
        list = list.id(),
        load_addr = format_args!("0x{load_addr:08x}"),
        words = words.len(),
        external = dispatcher.is_external_active(),
        "replaying display list"
    );

    let producer_done = Arc::new(AtomicBool::new(false));
    let worker = if dispatcher.is_external_active() {
        None
    } else {
        let engine = engine.clone();
        let producer_done = producer_done.clone();
        Some(
            thread::Builder::new()
                .name("pspge-engine".into())
                .spawn(move || run_engine(&engine, &producer_done))
                .context("failed to spawn engine thread")?,
        )
    };

    for chunk in chunks {
        let stall = write_chunk(chunk)?;
        list.set_stall_address(stall);
    }
    producer_done.store(true, Ordering::Release);

    let (outcomes, histogram) = match worker {
        Some(worker) => worker
            .join()
            .map_err(|_| anyhow!("engine thread panicked"))?
            .context("display list execution failed")?,
        None => (Vec::new(), OpcodeHistogram::default()),
    };

    Ok(ReplayReport {
        outcomes,
        commands: histogram.0,
        callbacks: callbacks.take(),
        events: events.try_iter().map(|event| describe(&event)).collect(),
        status: list.status(),
        final_state: list.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_are_little_endian() {
        let words = words_from_bytes(&[0x00, 0x00, 0x00, 0x0F, 0x78, 0x56, 0x34, 0x12]).unwrap();
        assert_eq!(words, vec![0x0F00_0000, 0x1234_5678]);
    }

    #[test]
    fn truncated_word_is_rejected() {
        assert!(words_from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn empty_list_is_rejected() {
        assert!(replay(&[], &GeConfig::default(), &ReplayOptions::default()).is_err());
    }
}
