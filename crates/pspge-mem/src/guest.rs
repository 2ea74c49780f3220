use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{MemoryError, Result};
use crate::map::{normalize_address, Region};

/// Allocation granularity of the sparse backing store.
pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug)]
struct RegionStore {
    region: Region,
    chunks: RwLock<Vec<Option<Box<[u8]>>>>,
}

impl RegionStore {
    fn new(region: Region) -> Self {
        let chunk_count = region.len().div_ceil(CHUNK_SIZE);
        Self {
            region,
            chunks: RwLock::new(vec![None; chunk_count]),
        }
    }

    fn read(&self, mut offset: usize, dst: &mut [u8]) {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let mut done = 0;
        while done < dst.len() {
            let chunk_idx = offset / CHUNK_SIZE;
            let in_chunk = offset % CHUNK_SIZE;
            let n = (CHUNK_SIZE - in_chunk).min(dst.len() - done);
            match &chunks[chunk_idx] {
                Some(chunk) => dst[done..done + n].copy_from_slice(&chunk[in_chunk..in_chunk + n]),
                // Never-written memory reads as zero; reads must not allocate.
                None => dst[done..done + n].fill(0),
            }
            done += n;
            offset += n;
        }
    }

    fn write(&self, mut offset: usize, src: &[u8]) {
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        let mut done = 0;
        while done < src.len() {
            let chunk_idx = offset / CHUNK_SIZE;
            let in_chunk = offset % CHUNK_SIZE;
            let n = (CHUNK_SIZE - in_chunk).min(src.len() - done);
            let chunk =
                chunks[chunk_idx].get_or_insert_with(|| vec![0u8; CHUNK_SIZE].into_boxed_slice());
            chunk[in_chunk..in_chunk + n].copy_from_slice(&src[done..done + n]);
            done += n;
            offset += n;
        }
    }

    fn allocated_chunks(&self) -> usize {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        chunks.iter().filter(|c| c.is_some()).count()
    }
}

/// Sparse guest memory covering the scratchpad, VRAM and main RAM.
///
/// Cloning is cheap and yields a handle to the same storage, so a producer thread can keep writing
/// list words while the GE consumer reads them.
#[derive(Debug, Clone)]
pub struct GuestMemory {
    regions: Arc<[RegionStore; 3]>,
}

impl Default for GuestMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestMemory {
    pub fn new() -> Self {
        Self {
            regions: Arc::new(Region::ALL.map(RegionStore::new)),
        }
    }

    fn locate(&self, addr: u32, len: usize) -> Result<(&RegionStore, usize)> {
        let addr = normalize_address(addr);
        let region = Region::containing(addr).ok_or(MemoryError::Unmapped { addr })?;
        let offset = (addr - region.start()) as usize;
        let end = offset
            .checked_add(len)
            .ok_or(MemoryError::OutOfBounds { addr, len })?;
        if end > region.len() {
            return Err(MemoryError::OutOfBounds { addr, len });
        }
        Ok((&self.regions[region.index()], offset))
    }

    pub fn read_bytes(&self, addr: u32, dst: &mut [u8]) -> Result<()> {
        let (store, offset) = self.locate(addr, dst.len())?;
        store.read(offset, dst);
        Ok(())
    }

    pub fn write_bytes(&self, addr: u32, src: &[u8]) -> Result<()> {
        let (store, offset) = self.locate(addr, src.len())?;
        store.write(offset, src);
        Ok(())
    }

    pub fn read_u8(&self, addr: u32) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_bytes(addr, &mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&self, addr: u32) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_bytes(addr, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&self, addr: u32) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_u32(&self, addr: u32, value: u32) -> Result<()> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    /// Writes consecutive little-endian words starting at `addr`.
    pub fn write_words(&self, addr: u32, words: &[u32]) -> Result<()> {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.write_bytes(addr, &bytes)
    }

    /// Whether `addr` (after mirror normalization) falls inside a mapped region.
    pub fn is_mapped(&self, addr: u32) -> bool {
        Region::containing(normalize_address(addr)).is_some()
    }

    /// Number of backing chunks allocated so far across all regions.
    pub fn allocated_chunks(&self) -> usize {
        self.regions.iter().map(RegionStore::allocated_chunks).sum()
    }
}
