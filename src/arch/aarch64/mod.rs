//! AArch64 (ARM64) Architecture Support
//!
//! Boot code, exception vectors, MMU, PL011 console and the privileged
//! memory backend for QEMU `virt`

pub mod board;
pub mod counter;
pub mod exceptions;
pub mod memory;
pub mod mmu;
pub mod uart;

use core::arch::{asm, global_asm};

use crate::platform::BOOT_ARGS;

// Include boot assembly
global_asm!(include_str!("boot.S"));

// Include exception vector table
global_asm!(include_str!("exceptions.S"));

/// Current exception level (CurrentEL bits [3:2])
pub fn current_el() -> u8 {
    let el: u64;
    unsafe {
        asm!("mrs {0}, CurrentEL", out(reg) el, options(nomem, nostack));
    }
    ((el >> 2) & 3) as u8
}

/// Halt the CPU
pub fn hlt() {
    unsafe {
        asm!("wfe"); // Wait For Event
    }
}

pub fn halt() -> ! {
    loop {
        hlt();
    }
}

/// Branch to `entry` with `x0..x4 = args`
///
/// Returns only if the next stage does.
///
/// # Safety
///
/// `entry` must be code that expects to be entered this way, with the MMU
/// and caches off.
pub unsafe fn jump(entry: u64, args: [u64; BOOT_ARGS]) {
    asm!(
        "blr {entry}",
        entry = in(reg) entry,
        inout("x0") args[0] => _,
        inout("x1") args[1] => _,
        inout("x2") args[2] => _,
        inout("x3") args[3] => _,
        inout("x4") args[4] => _,
        clobber_abi("C"),
    );
}
