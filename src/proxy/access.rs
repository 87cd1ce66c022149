//! Memory & execution access layer
//!
//! All raw hardware access goes through the [`Privileged`] trait. The layer
//! on top of it checks each request against an [`AccessPolicy`] before a
//! single byte is touched, which is what makes writes all-or-nothing.
//!
//! The policy is a deployment decision: the board policy only admits the
//! regions the board declares and write-protects the monitor's own image,
//! stack and heap. Builds with `unrestricted-access` skip the checks.

use alloc::vec::Vec;

use crate::error::{AccessError, FaultInfo};

/// Argument registers set by [`Privileged::call`] (`x0`-`x5`)
pub const CALL_ARGS: usize = 6;

/// Access rights for a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Rights {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Rights {
    pub const READ: Rights = Rights {
        read: true,
        write: false,
        execute: false,
    };

    pub const WRITE: Rights = Rights {
        read: false,
        write: true,
        execute: false,
    };

    pub const EXECUTE: Rights = Rights {
        read: false,
        write: false,
        execute: true,
    };

    /// Device registers: never executable
    pub const READ_WRITE: Rights = Rights {
        read: true,
        write: true,
        execute: false,
    };

    pub const ALL: Rights = Rights {
        read: true,
        write: true,
        execute: true,
    };

    /// Check if these rights include all of `other`
    pub fn has(&self, other: Rights) -> bool {
        (!other.read || self.read)
            && (!other.write || self.write)
            && (!other.execute || self.execute)
    }
}

/// Address span plus the rights granted on it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u64,
    pub len: u64,
    pub rights: Rights,
}

impl MemoryRegion {
    pub const fn new(base: u64, len: u64, rights: Rights) -> Self {
        MemoryRegion { base, len, rights }
    }

    /// One past the last byte, `None` if the region wraps
    pub fn end(&self) -> Option<u64> {
        self.base.checked_add(self.len)
    }

    /// Whether `addr..addr+len` lies entirely inside this region
    pub fn contains(&self, addr: u64, len: u64) -> bool {
        match (self.end(), addr.checked_add(len)) {
            (Some(end), Some(span_end)) => addr >= self.base && span_end <= end,
            _ => false,
        }
    }

    pub fn overlaps(&self, addr: u64, len: u64) -> bool {
        let end = self.end().unwrap_or(u64::MAX);
        let span_end = addr.saturating_add(len);
        len != 0 && self.len != 0 && addr < end && span_end > self.base
    }
}

/// Which spans the proxy may touch
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    regions: Vec<MemoryRegion>,
    /// Never writable, whatever `regions` says
    protected: Vec<MemoryRegion>,
    unrestricted: bool,
}

impl AccessPolicy {
    /// Empty allow-list: nothing is accessible
    pub fn new() -> Self {
        AccessPolicy::default()
    }

    pub fn unrestricted() -> Self {
        AccessPolicy {
            unrestricted: true,
            ..AccessPolicy::default()
        }
    }

    pub fn allow(mut self, region: MemoryRegion) -> Self {
        self.regions.push(region);
        self
    }

    /// Deny writes to `base..base+len`
    pub fn protect(mut self, base: u64, len: u64) -> Self {
        self.protected.push(MemoryRegion::new(base, len, Rights::READ));
        self
    }

    pub fn is_unrestricted(&self) -> bool {
        self.unrestricted
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    /// Prove `addr..addr+len` is accessible with `needed`
    ///
    /// A span must fit inside a single allow-listed region.
    pub fn check(&self, addr: u64, len: u64, needed: Rights) -> Result<(), AccessError> {
        if addr.checked_add(len).is_none() {
            return Err(AccessError::OutOfRange);
        }
        if len == 0 || self.unrestricted {
            return Ok(());
        }
        let granted = self
            .regions
            .iter()
            .any(|r| r.contains(addr, len) && r.rights.has(needed));
        if !granted {
            return Err(AccessError::OutOfRange);
        }
        if needed.write && self.protected.iter().any(|p| p.overlaps(addr, len)) {
            return Err(AccessError::OutOfRange);
        }
        Ok(())
    }
}

/// Register access width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Width {
    W8 = 1,
    W16 = 2,
    W32 = 4,
    W64 = 8,
}

impl Width {
    pub fn from_bytes(n: u64) -> Option<Self> {
        match n {
            1 => Some(Width::W8),
            2 => Some(Width::W16),
            4 => Some(Width::W32),
            8 => Some(Width::W64),
            _ => None,
        }
    }

    pub fn bytes(self) -> u64 {
        self as u64
    }

    /// Keep only the low `self` bytes of `value`
    pub fn truncate(self, value: u64) -> u64 {
        match self {
            Width::W64 => value,
            w => value & ((1u64 << (8 * w.bytes())) - 1),
        }
    }
}

/// Capability-scoped privileged access
///
/// This is the only seam through which the proxy touches physical memory,
/// device registers or foreign code. Implementations run each operation
/// under an exception guard and report a trap as [`FaultInfo`].
pub trait Privileged {
    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), FaultInfo>;

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), FaultInfo>;

    /// Store the low `width` bytes of `pattern` with one `width`-sized store
    /// per element; never reads the destination
    fn fill(&mut self, addr: u64, len: u64, pattern: u64, width: Width) -> Result<(), FaultInfo>;

    /// Single naturally-aligned access of exactly `width` bytes
    fn read_reg(&mut self, addr: u64, width: Width) -> Result<u64, FaultInfo>;

    fn write_reg(&mut self, addr: u64, width: Width, value: u64) -> Result<(), FaultInfo>;

    /// Branch to `addr` with `x0..x5 = args`, return `x0, x1`
    ///
    /// # Safety
    ///
    /// Runs arbitrary code with the monitor's privileges. The callee may
    /// corrupt any state, including the monitor's own; nothing is sandboxed.
    unsafe fn call(&mut self, addr: u64, args: &[u64; CALL_ARGS]) -> Result<[u64; 2], FaultInfo>;

    /// Current exception level (0-3)
    fn current_el(&self) -> u8;
}

/// Policy-checked front end over a [`Privileged`] implementation
pub struct AccessLayer<'a> {
    mem: &'a mut dyn Privileged,
    policy: AccessPolicy,
}

impl<'a> AccessLayer<'a> {
    pub fn new(mem: &'a mut dyn Privileged, policy: AccessPolicy) -> Self {
        AccessLayer { mem, policy }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn current_el(&self) -> u8 {
        self.mem.current_el()
    }

    /// Raw access for collaborators that do their own checks (payload loader)
    pub fn privileged(&mut self) -> &mut dyn Privileged {
        &mut *self.mem
    }

    pub fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), AccessError> {
        self.policy.check(addr, buf.len() as u64, Rights::READ)?;
        self.mem.read(addr, buf).map_err(AccessError::Fault)
    }

    /// Either the whole span is written or nothing is
    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), AccessError> {
        self.policy.check(addr, data.len() as u64, Rights::WRITE)?;
        self.mem.write(addr, data).map_err(AccessError::Fault)
    }

    pub fn fill(&mut self, addr: u64, len: u64, pattern: u64, width: Width) -> Result<(), AccessError> {
        if addr % width.bytes() != 0 || len % width.bytes() != 0 {
            return Err(AccessError::InvalidArgument);
        }
        self.policy.check(addr, len, Rights::WRITE)?;
        self.mem
            .fill(addr, len, width.truncate(pattern), width)
            .map_err(AccessError::Fault)
    }

    pub fn read_reg(&mut self, addr: u64, width: Width) -> Result<u64, AccessError> {
        if addr % width.bytes() != 0 {
            return Err(AccessError::InvalidArgument);
        }
        self.policy.check(addr, width.bytes(), Rights::READ)?;
        self.mem.read_reg(addr, width).map_err(AccessError::Fault)
    }

    pub fn write_reg(&mut self, addr: u64, width: Width, value: u64) -> Result<(), AccessError> {
        if addr % width.bytes() != 0 {
            return Err(AccessError::InvalidArgument);
        }
        self.policy.check(addr, width.bytes(), Rights::WRITE)?;
        self.mem
            .write_reg(addr, width, width.truncate(value))
            .map_err(AccessError::Fault)
    }

    /// Invoke device code; a trap comes back as [`AccessError::Fault`]
    pub fn call(&mut self, addr: u64, args: &[u64; CALL_ARGS]) -> Result<[u64; 2], AccessError> {
        if addr % 4 != 0 {
            return Err(AccessError::InvalidArgument);
        }
        self.policy.check(addr, 4, Rights::EXECUTE)?;
        // SAFETY: `call` is an explicit power-user capability; the target was
        // admitted by the policy and the host accepts the consequences.
        unsafe { self.mem.call(addr, args) }.map_err(AccessError::Fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimMemory;
    use proptest::prelude::*;

    const BASE: u64 = 0x1000;
    const SIZE: usize = 0x10000;

    fn policy() -> AccessPolicy {
        AccessPolicy::new()
            .allow(MemoryRegion::new(BASE, SIZE as u64, Rights::ALL))
            .protect(0x8000, 0x1000)
    }

    #[test]
    fn memory_peek_returns_exact_bytes() {
        let mut mem = SimMemory::new(BASE, SIZE);
        let pattern: [u8; 16] = core::array::from_fn(|i| i as u8);
        mem.load(0x1000, &pattern);
        let mut access = AccessLayer::new(&mut mem, policy());

        let mut buf = [0xEEu8; 16];
        access.read(0x1000, &mut buf).unwrap();
        assert_eq!(buf, pattern);
    }

    #[test]
    fn span_leaving_region_is_out_of_range() {
        let mut mem = SimMemory::new(BASE, SIZE);
        let mut access = AccessLayer::new(&mut mem, policy());
        let end = BASE + SIZE as u64;
        assert_eq!(access.write(end - 2, &[1, 2, 3]), Err(AccessError::OutOfRange));
        let mut buf = [0u8; 4];
        assert_eq!(access.read(BASE - 1, &mut buf), Err(AccessError::OutOfRange));
        assert_eq!(access.read(u64::MAX - 1, &mut buf), Err(AccessError::OutOfRange));
    }

    #[test]
    fn protected_range_is_readable_but_not_writable() {
        let mut mem = SimMemory::new(BASE, SIZE);
        let mut access = AccessLayer::new(&mut mem, policy());
        let mut buf = [0u8; 8];
        access.read(0x8000, &mut buf).unwrap();
        assert_eq!(access.write(0x7FFC, &[0; 8]), Err(AccessError::OutOfRange));
        assert_eq!(
            access.fill(0x8800, 16, 0, Width::W8),
            Err(AccessError::OutOfRange)
        );
    }

    #[test]
    fn rights_are_enforced() {
        let mut mem = SimMemory::new(BASE, SIZE);
        let policy = AccessPolicy::new().allow(MemoryRegion::new(BASE, 0x100, Rights::READ_WRITE));
        let mut access = AccessLayer::new(&mut mem, policy);
        assert_eq!(
            access.call(BASE, &[0; CALL_ARGS]),
            Err(AccessError::OutOfRange)
        );
    }

    #[test]
    fn fill_writes_pattern_of_width() {
        let mut mem = SimMemory::new(BASE, SIZE);
        {
            let mut access = AccessLayer::new(&mut mem, policy());
            access.fill(0x2000, 8, 0xFFFF_BEEF, Width::W16).unwrap();
            assert_eq!(
                access.fill(0x2001, 8, 0, Width::W16),
                Err(AccessError::InvalidArgument)
            );
            assert_eq!(
                access.fill(0x2000, 7, 0, Width::W16),
                Err(AccessError::InvalidArgument)
            );
        }
        assert_eq!(mem.bytes(0x2000, 8), &[0xEF, 0xBE, 0xEF, 0xBE, 0xEF, 0xBE, 0xEF, 0xBE]);
        assert_eq!(mem.reads(), 0);
    }

    #[test]
    fn fill_stores_whole_elements() {
        let mut mem = SimMemory::new(BASE, SIZE);
        AccessLayer::new(&mut mem, policy())
            .fill(0x2000, 16, 0x0000_0301, Width::W32)
            .unwrap();
        assert_eq!(
            mem.stores(),
            &[
                (0x2000, Width::W32),
                (0x2004, Width::W32),
                (0x2008, Width::W32),
                (0x200C, Width::W32),
            ]
        );
        assert_eq!(mem.bytes(0x2000, 8), &[1, 3, 0, 0, 1, 3, 0, 0]);
    }

    #[test]
    fn register_accesses_are_aligned_and_truncated() {
        let mut mem = SimMemory::new(BASE, SIZE);
        let mut access = AccessLayer::new(&mut mem, policy());
        access.write_reg(0x3000, Width::W32, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(access.read_reg(0x3000, Width::W32).unwrap(), 0x5566_7788);
        assert_eq!(access.read_reg(0x3000, Width::W8).unwrap(), 0x88);
        assert_eq!(access.read_reg(0x3004, Width::W32).unwrap(), 0);
        assert_eq!(
            access.read_reg(0x3002, Width::W32),
            Err(AccessError::InvalidArgument)
        );
    }

    #[test]
    fn call_marshals_registers_and_reports_faults() {
        let mut mem = SimMemory::new(BASE, SIZE);
        mem.install(0x4000, |args| Ok([args[0] + args[5], args[1]]));
        let fault = FaultInfo {
            esr: 0x9600_0010,
            far: 0xDEAD,
            elr: 0x5000,
        };
        mem.install(0x5000, move |_| Err(fault));

        let mut access = AccessLayer::new(&mut mem, policy());
        assert_eq!(
            access.call(0x4000, &[1, 2, 3, 4, 5, 6]).unwrap(),
            [7, 2]
        );
        assert_eq!(
            access.call(0x5000, &[0; CALL_ARGS]),
            Err(AccessError::Fault(fault))
        );
        assert_eq!(
            access.call(0x4002, &[0; CALL_ARGS]),
            Err(AccessError::InvalidArgument)
        );
    }

    #[test]
    fn unrestricted_policy_still_rejects_wrapping_spans() {
        let policy = AccessPolicy::unrestricted();
        assert!(policy.check(0xFFFF_0000, 0x100, Rights::ALL).is_ok());
        assert_eq!(
            policy.check(u64::MAX, 2, Rights::READ),
            Err(AccessError::OutOfRange)
        );
    }

    proptest! {
        #[test]
        fn writes_are_all_or_nothing(
            offset in 0u64..(SIZE as u64 + 0x100),
            data in prop::collection::vec(any::<u8>(), 1..512),
        ) {
            let addr = BASE + offset;
            let mut mem = SimMemory::new(BASE, SIZE);
            mem.load(BASE, &alloc::vec![0x5A; SIZE]);

            let result = {
                let mut access = AccessLayer::new(&mut mem, policy());
                access.write(addr, &data)
            };

            let visible_end = (addr + data.len() as u64).min(BASE + SIZE as u64);
            let shown = if addr < visible_end {
                mem.bytes(addr, (visible_end - addr) as usize).to_vec()
            } else {
                alloc::vec::Vec::new()
            };
            match result {
                Ok(()) => prop_assert_eq!(&shown[..], &data[..]),
                Err(AccessError::OutOfRange) => prop_assert!(shown.iter().all(|&b| b == 0x5A)),
                Err(e) => prop_assert!(false, "unexpected error {:?}", e),
            }
        }
    }
}
