//! Address normalization for list PCs and jump targets.

use pspge_mem::{normalize_address, ADDRESS_MASK};

/// Valid PC bits: mirror bits stripped and word aligned.
pub const PC_ADDRESS_MASK: u32 = 0xFFFF_FFFC & ADDRESS_MASK;

/// Masks `addr` into the instruction address space and aligns it down to a word.
///
/// Misaligned low bits are dropped silently.
#[inline]
pub fn normalize_pc(addr: u32) -> u32 {
    addr & PC_ADDRESS_MASK
}

/// Relative-addressing registers owned by the execution backend.
pub trait BaseRegisters {
    /// High address byte set by the BASE command (already shifted into bits 24..32).
    fn base(&self) -> u32;
    fn base_offset(&self) -> u32;
    fn set_base_offset(&mut self, offset: u32);
}

/// Target of a base-relative jump or call.
pub fn relative_target(regs: &dyn BaseRegisters, arg: u32) -> u32 {
    normalize_address(regs.base() | arg)
}

/// Target of a base-relative jump or call that also applies the base offset.
pub fn relative_offset_target(regs: &dyn BaseRegisters, arg: u32) -> u32 {
    normalize_address((regs.base() | arg).wrapping_add(regs.base_offset()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Regs(u32, u32);

    impl BaseRegisters for Regs {
        fn base(&self) -> u32 {
            self.0
        }

        fn base_offset(&self) -> u32 {
            self.1
        }

        fn set_base_offset(&mut self, offset: u32) {
            self.1 = offset;
        }
    }

    #[test]
    fn pc_normalization() {
        assert_eq!(normalize_pc(0x0880_0003), 0x0880_0000);
        assert_eq!(normalize_pc(0x4880_0106), 0x0880_0104);
        assert_eq!(normalize_pc(0xFFFF_FFFF), 0x3FFF_FFFC);
    }

    #[test]
    fn relative_targets() {
        let regs = Regs(0x0800_0000, 0x0010_0000);
        assert_eq!(relative_target(&regs, 0x80_0100), 0x0880_0100);
        assert_eq!(relative_offset_target(&regs, 0x80_0100), 0x0890_0100);

        // Mirror bits in the base register are stripped.
        let mirrored = Regs(0x4800_0000, 0);
        assert_eq!(relative_target(&mirrored, 0x80_0000), 0x0880_0000);
    }
}
