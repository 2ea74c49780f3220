//! Guest memory and region facility for the GE display-list front end.
//!
//! The GE only ever fetches command words from three places: the scratchpad, VRAM and main RAM.
//! [`GuestMemory`] models those regions with a sparse, lazily allocated backing store so a full
//! 32 MiB RAM image costs nothing until it is written.
//!
//! Sequential fetches go through [`InstructionCursor`]s created by a [`CursorFactory`]. Creating a
//! cursor resolves the backing region (and fails for unmapped addresses); advancing one is cheap.

#![forbid(unsafe_code)]

mod cursor;
mod error;
mod guest;
mod map;

pub use cursor::{CursorFactory, InstructionCursor, MemoryCursor};
pub use error::MemoryError;
pub use guest::{GuestMemory, CHUNK_SIZE};
pub use map::{
    normalize_address, Region, ADDRESS_MASK, END_RAM, END_SCRATCHPAD, END_VRAM, START_RAM,
    START_SCRATCHPAD, START_VRAM,
};
