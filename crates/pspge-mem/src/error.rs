use thiserror::Error;

pub type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("unmapped guest address 0x{addr:08x}")]
    Unmapped { addr: u32 },

    #[error("guest access out of bounds (addr=0x{addr:08x}, len={len})")]
    OutOfBounds { addr: u32, len: usize },

    #[error("unsupported cursor step of {step} bytes")]
    InvalidStep { step: u32 },
}
