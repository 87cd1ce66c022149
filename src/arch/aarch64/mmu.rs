/*
 * ARM64 Memory Management Unit (MMU)
 *
 * Identity map with 1GB blocks, walked from a single level 1 table
 * (4KB granule, T0SZ = 25, so translation starts at level 1):
 * - Block 0: 0x0000_0000 - 0x3FFF_FFFF, device memory (peripherals)
 * - Blocks 1..: RAM, normal write-back memory
 *
 * Caches only come on once the map is live. Teardown turns both off again
 * and cleans the data cache so the next stage sees memory as written.
 */

use core::arch::asm;

/// Number of entries per page table level
const TABLE_ENTRIES: usize = 512;

/// Block size at Level 1 (1 GB)
const BLOCK_SIZE_1GB: u64 = 1 << 30;

/// Page table entry bits
const PTE_VALID: u64 = 1 << 0;
const PTE_BLOCK: u64 = 0 << 1;
const PTE_ATTR_NORMAL: u64 = 0 << 2; // MAIR index 0
const PTE_ATTR_DEVICE: u64 = 1 << 2; // MAIR index 1
const PTE_AP_RW: u64 = 0 << 6;
const PTE_SH_INNER: u64 = 3 << 8;
const PTE_AF: u64 = 1 << 10;
const PTE_PXN: u64 = 1 << 53;
const PTE_UXN: u64 = 1 << 54;

/// Memory attributes for MAIR_EL1
const MAIR_NORMAL: u64 = 0xFF; // Normal memory, write-back cacheable
const MAIR_DEVICE: u64 = 0x00; // Device-nGnRnE

const TCR_T0SZ: u64 = 25;
const TCR_IRGN0_WBWA: u64 = 1 << 8;
const TCR_ORGN0_WBWA: u64 = 1 << 10;
const TCR_SH0_INNER: u64 = 3 << 12;
const TCR_TG0_4K: u64 = 0 << 14;
const TCR_EPD1: u64 = 1 << 23;
const TCR_IPS_36BIT: u64 = 0b001 << 32;

const SCTLR_M: u64 = 1 << 0;
const SCTLR_C: u64 = 1 << 2;
const SCTLR_I: u64 = 1 << 12;

/// Page table alignment (must be 4KB aligned)
#[repr(C, align(4096))]
struct PageTable {
    entries: [u64; TABLE_ENTRIES],
}

static mut L1_TABLE: PageTable = PageTable {
    entries: [0; TABLE_ENTRIES],
};

extern "C" {
    fn dcache_clean_invalidate_all();
}

fn block_descriptor(index: usize) -> u64 {
    let phys = index as u64 * BLOCK_SIZE_1GB;
    let common = phys | PTE_BLOCK | PTE_VALID | PTE_AF | PTE_AP_RW;
    if index == 0 {
        common | PTE_ATTR_DEVICE | PTE_PXN | PTE_UXN
    } else {
        common | PTE_ATTR_NORMAL | PTE_SH_INNER
    }
}

/// Identity map peripherals and RAM up to `ram_end`, then enable the MMU and
/// caches
///
/// Does nothing if translation is already on.
pub fn init(ram_end: u64) {
    if is_enabled() {
        return;
    }
    let blocks = (ram_end.div_ceil(BLOCK_SIZE_1GB) as usize).clamp(2, TABLE_ENTRIES);

    unsafe {
        let table = &mut *core::ptr::addr_of_mut!(L1_TABLE);
        for (i, entry) in table.entries.iter_mut().enumerate() {
            *entry = if i < blocks { block_descriptor(i) } else { 0 };
        }

        // Index 0: Normal memory (write-back cacheable)
        // Index 1: Device memory (non-cacheable, non-bufferable)
        let mair: u64 = (MAIR_DEVICE << 8) | MAIR_NORMAL;
        asm!("msr mair_el1, {}", in(reg) mair);

        let tcr = TCR_T0SZ
            | TCR_IRGN0_WBWA
            | TCR_ORGN0_WBWA
            | TCR_SH0_INNER
            | TCR_TG0_4K
            | TCR_EPD1
            | TCR_IPS_36BIT;
        asm!("msr tcr_el1, {}", in(reg) tcr);

        let ttbr0 = table as *const PageTable as u64;
        asm!("msr ttbr0_el1, {}", in(reg) ttbr0);

        // Make table writes visible to the walker before enabling
        asm!("dsb ish", "tlbi vmalle1", "dsb ish", "isb");

        let mut sctlr: u64;
        asm!("mrs {}, sctlr_el1", out(reg) sctlr);
        sctlr |= SCTLR_M | SCTLR_C | SCTLR_I;
        asm!("msr sctlr_el1, {}", "isb", in(reg) sctlr);
    }
    log::debug!("mmu: {} x 1GB identity mapped", blocks);
}

/// Disable translation and caches, writing back dirty lines
pub fn shutdown() {
    if !is_enabled() {
        return;
    }
    unsafe {
        let mut sctlr: u64;
        asm!("mrs {}, sctlr_el1", out(reg) sctlr);
        sctlr &= !(SCTLR_M | SCTLR_C | SCTLR_I);
        asm!("msr sctlr_el1, {}", "isb", in(reg) sctlr);

        dcache_clean_invalidate_all();

        asm!("ic iallu", "tlbi vmalle1", "dsb sy", "isb");
    }
}

/// Check if MMU is enabled
pub fn is_enabled() -> bool {
    let sctlr: u64;
    unsafe {
        asm!("mrs {}, sctlr_el1", out(reg) sctlr);
    }
    (sctlr & SCTLR_M) != 0
}
