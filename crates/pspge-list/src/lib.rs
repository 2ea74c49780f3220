//! GE display-list execution front end.
//!
//! A [`DisplayList`] is one pooled list slot: it owns the list's program counter, call stack,
//! stall address and status, and hands out command words to whichever execution backend is
//! active. The pieces are layered as follows:
//! - [`addr`]: PC normalization and relative target computation,
//! - [`call_stack`]: the fixed-depth CALL/RET stack,
//! - [`sync`]: the release/wait handshake between producers and the consumer,
//! - `cursor`: the instruction-fetch cursor cache,
//! - [`list`]: the list context itself,
//! - [`backend`]: backend capability, builtin/external dispatch and callback reporting,
//! - [`engine`]: the builtin sequential engine that interprets control-flow commands,
//! - [`pool`]: the fixed pool of list slots and enqueue admission,
//! - [`config`]: pool size, stall wait and backend selection.

#![forbid(unsafe_code)]

pub mod addr;
pub mod backend;
pub mod call_stack;
pub mod config;
mod cursor;
pub mod engine;
pub mod error;
pub mod list;
pub mod pool;
pub mod status;
pub mod sync;

pub use addr::{normalize_pc, BaseRegisters, PC_ADDRESS_MASK};
pub use backend::{
    BackendDispatcher, BackendKind, CallbackSink, ExternalBackend, ListBackend, ListEvent,
    NullCallbackSink, QueuePlacement,
};
pub use call_stack::{CallFrame, CallStack, CALL_STACK_CAPACITY};
pub use config::{ConfigError, GeConfig};
pub use engine::{CommandSink, ExecOutcome, GeRegisters, NullCommandSink, SequentialEngine};
pub use error::ListError;
pub use list::{DisplayList, ListOptParams, ListServices};
pub use pool::{ListPool, DEFAULT_LIST_COUNT};
pub use status::ListStatus;
pub use sync::SyncSignal;
