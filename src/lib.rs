//! PSP GE display-list front end.
//!
//! Re-exports the guest memory facility ([`mem`]) and the list context, backends and builtin
//! engine ([`list`]).

#![forbid(unsafe_code)]

pub use pspge_list as list;
pub use pspge_mem as mem;

pub use pspge_list::{
    DisplayList, ExecOutcome, GeConfig, ListError, ListPool, ListServices, ListStatus,
    SequentialEngine,
};
pub use pspge_mem::GuestMemory;
