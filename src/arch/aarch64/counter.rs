//! ARM Generic Timer counter
//!
//! Timeouts on the proxy link are measured against the virtual counter.

use core::arch::asm;

/// Read the virtual counter (CNTVCT_EL0)
#[inline]
pub fn read_counter() -> u64 {
    let count: u64;
    unsafe {
        asm!(
            "isb",
            "mrs {0}, cntvct_el0",
            out(reg) count,
            options(nomem, nostack, preserves_flags)
        );
    }
    count
}

/// Counter frequency in Hz, from CNTFRQ_EL0
#[inline]
pub fn read_counter_frequency() -> u64 {
    let freq: u64;
    unsafe {
        asm!(
            "mrs {0}, cntfrq_el0",
            out(reg) freq,
            options(nomem, nostack, preserves_flags)
        );
    }
    freq
}

/// Convert microseconds to counter ticks
pub fn us_to_ticks(us: u64) -> u64 {
    ((us as u128 * read_counter_frequency() as u128) / 1_000_000) as u64
}

/// Point in time a wait gives up at
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<u64>,
}

impl Deadline {
    /// `None` never expires
    pub fn after_us(us: Option<u64>) -> Self {
        Deadline {
            at: us.map(|us| read_counter().saturating_add(us_to_ticks(us))),
        }
    }

    pub fn expired(&self) -> bool {
        match self.at {
            Some(at) => read_counter() >= at,
            None => false,
        }
    }
}
