//! Collaborator seams and the boot vector
//!
//! The proxy never touches board bring-up, the hardware description or the
//! payload formats directly. It consumes them through the traits below, so
//! the same engine runs against QEMU `virt` and against the host simulators.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::error::{FaultInfo, PlatformError, Status};
use crate::proxy::access::{AccessPolicy, MemoryRegion, Privileged, Rights};

/// Number of argument words handed to the next stage (`x0`-`x4`)
pub const BOOT_ARGS: usize = 5;

/// Entry point plus arguments for the next execution stage
///
/// Deliberately not `Clone`: a vector is produced once, by a boot command or
/// by the payload scanner, and consumed once by the final jump.
#[derive(Debug, PartialEq, Eq)]
pub struct BootVector {
    entry: u64,
    args: [u64; BOOT_ARGS],
    restore_logo: bool,
}

impl BootVector {
    /// `None` for a null entry
    pub fn new(entry: u64, args: [u64; BOOT_ARGS], restore_logo: bool) -> Option<Self> {
        if entry == 0 {
            return None;
        }
        Some(BootVector {
            entry,
            args,
            restore_logo,
        })
    }

    pub fn entry(&self) -> u64 {
        self.entry
    }

    pub fn args(&self) -> &[u64; BOOT_ARGS] {
        &self.args
    }

    pub fn restore_logo(&self) -> bool {
        self.restore_logo
    }

    /// Give up the vector for the jump
    pub fn into_parts(self) -> (u64, [u64; BOOT_ARGS]) {
        (self.entry, self.args)
    }
}

impl fmt::Display for BootVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entry: {:#x} a0: {:#x} a1: {:#x} a2: {:#x} a3: {:#x} a4: {:#x}",
            self.entry, self.args[0], self.args[1], self.args[2], self.args[3], self.args[4]
        )
    }
}

/// Hardware subsystems the monitor brings up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Subsystem {
    Exceptions = 0,
    Mmu = 1,
    Console = 2,
    Display = 3,
}

impl Subsystem {
    /// Bring-up order
    pub const BRING_UP: [Subsystem; 4] = [
        Subsystem::Console,
        Subsystem::Exceptions,
        Subsystem::Mmu,
        Subsystem::Display,
    ];

    pub fn from_u64(n: u64) -> Option<Self> {
        match n {
            0 => Some(Subsystem::Exceptions),
            1 => Some(Subsystem::Mmu),
            2 => Some(Subsystem::Console),
            3 => Some(Subsystem::Display),
            _ => None,
        }
    }

    /// Whether a failure to bring this up is fatal
    pub fn is_mandatory(self) -> bool {
        !matches!(self, Subsystem::Display)
    }
}

/// Board bring-up, hardware description and teardown
///
/// Every method must be idempotent: calling it twice leaves the same state
/// as calling it once.
pub trait Platform {
    /// Bring up (or re-run bring-up of) one subsystem
    fn init(&mut self, subsystem: Subsystem) -> Result<(), PlatformError>;

    /// Read-only hardware description lookup
    ///
    /// An empty `name` tests for the node itself and yields no bytes.
    fn device_property(&self, path: &str, name: &str) -> Result<Vec<u8>, PlatformError>;

    /// Put exception vectors back the way the next stage expects them
    fn shutdown_exceptions(&mut self);

    /// Disable address translation and caches
    fn shutdown_mmu(&mut self);

    /// Restore the display, keeping the boot logo if asked to
    fn shutdown_display(&mut self, restore_logo: bool);
}

/// Bring up all subsystems in order
///
/// Optional subsystems that fail are logged and skipped.
pub fn hardware_init(platform: &mut dyn Platform) -> Result<(), PlatformError> {
    for subsystem in Subsystem::BRING_UP {
        match platform.init(subsystem) {
            Ok(()) => log::debug!("{:?} up", subsystem),
            Err(e) if !subsystem.is_mandatory() => {
                log::info!("{:?} not available: {}", subsystem, e)
            }
            Err(e) => {
                log::error!("{:?} bring-up failed: {}", subsystem, e);
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Why a payload could not become the next stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// Nothing bootable where payloads live
    #[error("no valid payload")]
    NoValidImage,
    /// A header promised more bytes than the payload window holds
    #[error("payload truncated")]
    Truncated,
    /// Relocation target overlaps the payload source
    #[error("kernel destination overlaps payload")]
    Overlap,
    #[error("fault at {:#x}", .0.far)]
    Fault(FaultInfo),
}

impl From<PayloadError> for Status {
    fn from(e: PayloadError) -> Self {
        match e {
            PayloadError::NoValidImage => Status::NotFound,
            PayloadError::Truncated => Status::IntegrityError,
            PayloadError::Overlap => Status::OutOfRange,
            PayloadError::Fault(_) => Status::ExecutionFault,
        }
    }
}

/// "Load candidate blob, return boot vector or failure"
pub trait ImageLoader {
    fn load_candidate(&mut self, mem: &mut dyn Privileged) -> Result<BootVector, PayloadError>;

    /// `(base, len)` of the memory `load_candidate` would read, if any
    fn source_span(&self, mem: &mut dyn Privileged) -> Option<(u64, u64)>;
}

/// Where a board keeps the monitor and the inputs it reads
///
/// Ranges are `(start, end)`; the device tree is `(base, len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    /// Device window below RAM
    pub peripherals_end: u64,
    pub ram: (u64, u64),
    /// Monitor image, payload window included
    pub monitor: (u64, u64),
    pub payload: (u64, u64),
    pub dtb: Option<(u64, u64)>,
}

impl MemoryLayout {
    /// Peripherals read/write and RAM with every right. The monitor image
    /// except its payload window and the device tree it serves properties
    /// from are write-protected.
    pub fn policy(&self) -> AccessPolicy {
        let (ram_start, ram_end) = self.ram;
        let (mon_start, mon_end) = self.monitor;
        let (pay_start, pay_end) = self.payload;
        let mut policy = AccessPolicy::new()
            .allow(MemoryRegion::new(0, self.peripherals_end, Rights::READ_WRITE))
            .allow(MemoryRegion::new(ram_start, ram_end - ram_start, Rights::ALL))
            .protect(mon_start, pay_start - mon_start)
            .protect(pay_end, mon_end - pay_end);
        if let Some((base, len)) = self.dtb {
            policy = policy.protect(base, len);
        }
        policy
    }
}

/// Sentinel for identity words the hardware description lacks
pub const UNKNOWN_ID: u32 = !0;

/// Board identity, probed from the hardware description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub model: String,
    pub target: String,
    pub board_id: u32,
    pub chip_id: u32,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        DeviceInfo {
            model: String::new(),
            target: String::new(),
            board_id: UNKNOWN_ID,
            chip_id: UNKNOWN_ID,
        }
    }
}

fn string_prop(platform: &dyn Platform, path: &str, name: &str) -> Option<String> {
    let raw = platform.device_property(path, name).ok()?;
    let text = raw.split(|&b| b == 0).next().unwrap_or(&[]);
    core::str::from_utf8(text).ok().map(String::from)
}

fn u32_prop(platform: &dyn Platform, path: &str, name: &str) -> Option<u32> {
    let raw = platform.device_property(path, name).ok()?;
    let word: [u8; 4] = raw.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(word))
}

impl DeviceInfo {
    /// Query model, target and the `/chosen` ids
    pub fn probe(platform: &dyn Platform) -> DeviceInfo {
        let mut info = DeviceInfo {
            model: string_prop(platform, "/", "model").unwrap_or_default(),
            target: string_prop(platform, "/", "target-type")
                .or_else(|| string_prop(platform, "/", "compatible"))
                .unwrap_or_default(),
            ..DeviceInfo::default()
        };

        if platform.device_property("/chosen", "").is_err() {
            log::warn!("No chosen node!");
            return info;
        }
        match u32_prop(platform, "/chosen", "board-id") {
            Some(id) => info.board_id = id,
            None => log::warn!("Failed to find board-id"),
        }
        match u32_prop(platform, "/chosen", "chip-id") {
            Some(id) => info.chip_id = id,
            None => log::warn!("Failed to find chip-id"),
        }
        info
    }

    pub fn log(&self) {
        log::info!("Device info:");
        log::info!("  Model: {}", self.model);
        log::info!("  Target: {}", self.target);
        log::info!("  Board-ID: {:#x}", self.board_id);
        log::info!("  Chip-ID: {:#x}", self.chip_id);
    }
}
