//! Physical memory access for the proxy
//!
//! Every access runs under the exception guard. Bulk copies go byte by byte
//! so a fault stops at the exact address and the guard never steps over more
//! than one trapped instruction.

use core::arch::asm;
use core::ptr::{read_volatile, write_volatile};

use super::exceptions::{faulted, guarded, GuardMode};
use crate::error::FaultInfo;
use crate::proxy::access::{Privileged, Width, CALL_ARGS};

/// Argument block shared with the `proxy_call` trampoline
#[repr(C)]
struct CallBlock {
    target: u64,
    args: [u64; CALL_ARGS],
    ret: [u64; 2],
}

extern "C" {
    fn proxy_call(block: *mut CallBlock);
}

/// Cache line sizes from CTR_EL0: (dcache, icache)
fn cache_lines() -> (u64, u64) {
    let ctr: u64;
    unsafe {
        asm!("mrs {0}, ctr_el0", out(reg) ctr, options(nomem, nostack));
    }
    let dline = 4 << ((ctr >> 16) & 0xF);
    let iline = 4 << (ctr & 0xF);
    (dline, iline)
}

/// Make freshly written code visible to instruction fetch
fn sync_icache(addr: u64, len: u64) {
    if len == 0 {
        return;
    }
    let (dline, iline) = cache_lines();
    let end = addr + len;
    unsafe {
        let mut at = addr & !(dline - 1);
        while at < end {
            asm!("dc cvau, {0}", in(reg) at);
            at += dline;
        }
        asm!("dsb ish");
        let mut at = addr & !(iline - 1);
        while at < end {
            asm!("ic ivau, {0}", in(reg) at);
            at += iline;
        }
        asm!("dsb ish", "isb");
    }
}

/// The real [`Privileged`] backend
pub struct HwMemory;

impl Privileged for HwMemory {
    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), FaultInfo> {
        guarded(GuardMode::Skip, || {
            for (i, b) in buf.iter_mut().enumerate() {
                // SAFETY: a trap here is caught and the load skipped
                *b = unsafe { read_volatile((addr + i as u64) as *const u8) };
                if faulted() {
                    break;
                }
            }
        })
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), FaultInfo> {
        guarded(GuardMode::Skip, || {
            for (i, &b) in data.iter().enumerate() {
                unsafe { write_volatile((addr + i as u64) as *mut u8, b) };
                if faulted() {
                    break;
                }
            }
        })?;
        guarded(GuardMode::Skip, || sync_icache(addr, data.len() as u64))
    }

    /// One store of `width` per element, so MMIO sees the access size it expects
    fn fill(&mut self, addr: u64, len: u64, pattern: u64, width: Width) -> Result<(), FaultInfo> {
        let step = width.bytes();
        guarded(GuardMode::Skip, || {
            let mut at = addr;
            while at < addr + len {
                // SAFETY: `at` is aligned to `width`; a trap is caught and skipped
                unsafe {
                    match width {
                        Width::W8 => write_volatile(at as *mut u8, pattern as u8),
                        Width::W16 => write_volatile(at as *mut u16, pattern as u16),
                        Width::W32 => write_volatile(at as *mut u32, pattern as u32),
                        Width::W64 => write_volatile(at as *mut u64, pattern),
                    }
                }
                if faulted() {
                    break;
                }
                at += step;
            }
        })?;
        guarded(GuardMode::Skip, || sync_icache(addr, len))
    }

    fn read_reg(&mut self, addr: u64, width: Width) -> Result<u64, FaultInfo> {
        guarded(GuardMode::Skip, || unsafe {
            match width {
                Width::W8 => read_volatile(addr as *const u8) as u64,
                Width::W16 => read_volatile(addr as *const u16) as u64,
                Width::W32 => read_volatile(addr as *const u32) as u64,
                Width::W64 => read_volatile(addr as *const u64),
            }
        })
    }

    fn write_reg(&mut self, addr: u64, width: Width, value: u64) -> Result<(), FaultInfo> {
        guarded(GuardMode::Skip, || unsafe {
            match width {
                Width::W8 => write_volatile(addr as *mut u8, value as u8),
                Width::W16 => write_volatile(addr as *mut u16, value as u16),
                Width::W32 => write_volatile(addr as *mut u32, value as u32),
                Width::W64 => write_volatile(addr as *mut u64, value),
            }
        })
    }

    unsafe fn call(&mut self, addr: u64, args: &[u64; CALL_ARGS]) -> Result<[u64; 2], FaultInfo> {
        let mut block = CallBlock {
            target: addr,
            args: *args,
            ret: [0; 2],
        };
        let ptr = core::ptr::addr_of_mut!(block);
        guarded(GuardMode::Return, || proxy_call(ptr))?;
        Ok(block.ret)
    }

    fn current_el(&self) -> u8 {
        super::current_el()
    }
}
