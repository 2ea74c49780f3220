use pspge_mem::MemoryError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ListError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListError {
    #[error("guest memory fault: {0}")]
    Memory(#[from] MemoryError),

    #[error("call stack overflow at depth {depth}")]
    CallStackOverflow { depth: usize },

    #[error("display list at 0x{list_addr:08x} is already queued")]
    Busy { list_addr: u32 },

    #[error("no free display list slot")]
    NoFreeList,

    #[error("display list {id} was reset and cannot run")]
    ListReset { id: usize },

    #[error("display list has no active instruction cursor")]
    NoActiveCursor,
}
