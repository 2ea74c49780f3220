/// Strips the cached/uncached and kernel mirror bits from a guest address.
pub const ADDRESS_MASK: u32 = 0x3FFF_FFFF;

pub const START_SCRATCHPAD: u32 = 0x0001_0000;
pub const END_SCRATCHPAD: u32 = 0x0001_3FFF;
pub const START_VRAM: u32 = 0x0400_0000;
pub const END_VRAM: u32 = 0x041F_FFFF;
pub const START_RAM: u32 = 0x0800_0000;
pub const END_RAM: u32 = 0x09FF_FFFF;

#[inline]
pub fn normalize_address(addr: u32) -> u32 {
    addr & ADDRESS_MASK
}

/// A contiguous guest memory region that can hold command words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Scratchpad,
    Vram,
    Ram,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::Scratchpad, Region::Vram, Region::Ram];

    pub const fn start(self) -> u32 {
        match self {
            Region::Scratchpad => START_SCRATCHPAD,
            Region::Vram => START_VRAM,
            Region::Ram => START_RAM,
        }
    }

    /// Last valid byte address (inclusive).
    pub const fn end(self) -> u32 {
        match self {
            Region::Scratchpad => END_SCRATCHPAD,
            Region::Vram => END_VRAM,
            Region::Ram => END_RAM,
        }
    }

    pub const fn len(self) -> usize {
        (self.end() - self.start()) as usize + 1
    }

    pub fn contains(self, addr: u32) -> bool {
        (self.start()..=self.end()).contains(&normalize_address(addr))
    }

    /// Region holding `addr` after mirror bits are stripped.
    pub fn containing(addr: u32) -> Option<Region> {
        Self::ALL.into_iter().find(|region| region.contains(addr))
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Region::Scratchpad => 0,
            Region::Vram => 1,
            Region::Ram => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirrors_resolve_to_the_same_region() {
        assert_eq!(Region::containing(0x0880_0000), Some(Region::Ram));
        assert_eq!(Region::containing(0x4880_0000), Some(Region::Ram));
        assert_eq!(Region::containing(0x8880_0000), Some(Region::Ram));
        assert_eq!(Region::containing(0x4400_0000), Some(Region::Vram));
    }

    #[test]
    fn region_edges() {
        assert_eq!(Region::containing(START_SCRATCHPAD - 1), None);
        assert_eq!(Region::containing(END_SCRATCHPAD), Some(Region::Scratchpad));
        assert_eq!(Region::containing(END_VRAM + 1), None);
        assert_eq!(Region::containing(START_RAM), Some(Region::Ram));
        assert_eq!(Region::containing(END_RAM + 1), None);
        assert_eq!(Region::Ram.len(), 32 * 1024 * 1024);
        assert_eq!(Region::Vram.len(), 2 * 1024 * 1024);
    }
}
