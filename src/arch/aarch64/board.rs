//! QEMU `virt` board
//!
//! Memory map constants, the device tree handed over by the loader, and the
//! [`Platform`] implementation the boot flow and proxy run against.

use alloc::vec::Vec;

use super::{exceptions, mmu, uart};
use crate::config::PolicyMode;
use crate::error::PlatformError;
use crate::fdt::{self, Fdt};
use crate::platform::{MemoryLayout, Platform, Subsystem};
use crate::proxy::access::AccessPolicy;

/// PL011 UART base address (QEMU virt machine)
pub const UART_BASE: usize = 0x0900_0000;

pub const RAM_BASE: u64 = 0x4000_0000;
/// Used when the device tree has no `/memory` node (`-m 1G`)
pub const DEFAULT_RAM_SIZE: u64 = 0x4000_0000;

/// Where an appended kernel is relocated to, clear of the monitor image
pub const KERNEL_BASE: u64 = 0x4800_0000;

/// Most device trees QEMU generates stay far below this
const MAX_DTB_SIZE: usize = 0x10_0000;

extern "C" {
    static _monitor_start: u8;
    static _monitor_end: u8;
    static _payload_start: u8;
    static _payload_end: u8;
}

fn symbol(sym: *const u8) -> u64 {
    sym as u64
}

/// Reserved window appended payloads land in
pub fn payload_window() -> (u64, u64) {
    unsafe {
        (
            symbol(core::ptr::addr_of!(_payload_start)),
            symbol(core::ptr::addr_of!(_payload_end)),
        )
    }
}

/// Extent of the loaded monitor, including stack and heap
pub fn monitor_range() -> (u64, u64) {
    unsafe {
        (
            symbol(core::ptr::addr_of!(_monitor_start)),
            symbol(core::ptr::addr_of!(_monitor_end)),
        )
    }
}

/// Validate a device tree at `addr`
///
/// # Safety
///
/// `addr` must be zero or readable for the blob's length.
unsafe fn fdt_at(addr: u64) -> Option<Fdt<'static>> {
    if addr == 0 || addr % 8 != 0 {
        return None;
    }
    let header = core::slice::from_raw_parts(addr as *const u8, fdt::HEADER_LEN);
    let size = fdt::total_size(header)?;
    if size > MAX_DTB_SIZE {
        return None;
    }
    Fdt::new(core::slice::from_raw_parts(addr as *const u8, size)).ok()
}

pub struct VirtPlatform {
    fdt: Option<Fdt<'static>>,
    dtb: u64,
}

impl VirtPlatform {
    /// Take the device tree passed in `x0`, or find the one QEMU put at the
    /// start of RAM
    ///
    /// # Safety
    ///
    /// `dtb` must be zero or point at readable memory.
    pub unsafe fn new(dtb: u64) -> Self {
        for addr in [dtb, RAM_BASE] {
            if let Some(fdt) = fdt_at(addr) {
                return VirtPlatform {
                    fdt: Some(fdt),
                    dtb: addr,
                };
            }
        }
        VirtPlatform { fdt: None, dtb: 0 }
    }

    /// Address of the device tree in use, zero without one
    pub fn dtb(&self) -> u64 {
        self.dtb
    }

    /// `(base, size)` of RAM
    pub fn ram(&self) -> (u64, u64) {
        self.fdt
            .and_then(|fdt| fdt.reg("/memory").ok())
            .unwrap_or((RAM_BASE, DEFAULT_RAM_SIZE))
    }

    pub fn layout(&self) -> MemoryLayout {
        let (ram_base, ram_size) = self.ram();
        MemoryLayout {
            peripherals_end: RAM_BASE,
            ram: (ram_base, ram_base + ram_size),
            monitor: monitor_range(),
            payload: payload_window(),
            dtb: self.fdt.map(|fdt| (self.dtb, fdt.total_size() as u64)),
        }
    }

    pub fn policy(&self, mode: PolicyMode) -> AccessPolicy {
        match mode {
            PolicyMode::Unrestricted => AccessPolicy::unrestricted(),
            PolicyMode::Board => self.layout().policy(),
        }
    }
}

impl Platform for VirtPlatform {
    fn init(&mut self, subsystem: Subsystem) -> Result<(), PlatformError> {
        match subsystem {
            Subsystem::Console => uart::init(),
            Subsystem::Exceptions => exceptions::install(),
            Subsystem::Mmu => {
                let (base, size) = self.ram();
                mmu::init(base + size);
            }
            // No simple framebuffer on virt
            Subsystem::Display => return Err(PlatformError::Unsupported),
        }
        Ok(())
    }

    fn device_property(&self, path: &str, name: &str) -> Result<Vec<u8>, PlatformError> {
        let fdt = self.fdt.ok_or(PlatformError::NotFound)?;
        if name.is_empty() {
            return if fdt.node_exists(path) {
                Ok(Vec::new())
            } else {
                Err(PlatformError::NotFound)
            };
        }
        Ok(fdt.property(path, name)?.to_vec())
    }

    fn shutdown_exceptions(&mut self) {
        exceptions::shutdown();
    }

    fn shutdown_mmu(&mut self) {
        mmu::shutdown();
    }

    fn shutdown_display(&mut self, _restore_logo: bool) {}
}
