//! Host-side stand-ins for the hardware seams
//!
//! Only compiled for tests. Each simulator records enough of what happened
//! for assertions about ordering and idempotence.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{FaultInfo, PlatformError, TransportError};
use crate::proxy::access::{Privileged, Width, CALL_ARGS};
use crate::proxy::codec::{self, Command, Reply};
use crate::proxy::framer::{Frame, FrameKind, Transport, Payload, MARKER};
use crate::platform::{Platform, Subsystem};

/// ESR for a data abort taken at the current EL, IL set
pub const DATA_ABORT_ESR: u64 = (0x25 << 26) | (1 << 25);
/// ESR for an instruction abort taken at the current EL, IL set
pub const INSN_ABORT_ESR: u64 = (0x21 << 26) | (1 << 25);

/// Scripted byte link
pub struct SimTransport {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    /// Timeouts reported once `rx` is drained, before disconnecting
    idle_timeouts: usize,
    /// Error for the next `n` writes
    write_error: Option<(TransportError, usize)>,
    shutdowns: usize,
    console: bool,
}

impl SimTransport {
    pub fn with_input(bytes: &[u8]) -> Self {
        SimTransport {
            rx: bytes.iter().copied().collect(),
            tx: Vec::new(),
            idle_timeouts: 2,
            write_error: None,
            shutdowns: 0,
            console: false,
        }
    }

    pub fn output(&self) -> &[u8] {
        &self.tx
    }

    pub fn fail_writes(&mut self, e: TransportError) {
        self.write_error = Some((e, usize::MAX));
    }

    pub fn fail_next_writes(&mut self, e: TransportError, n: usize) {
        self.write_error = Some((e, n));
    }

    pub fn set_console(&mut self, console: bool) {
        self.console = console;
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns
    }

    /// Decode every reply frame written so far
    pub fn replies(&self) -> Vec<Reply> {
        let mut link = SimTransport::with_input(&self.tx);
        let mut framer = crate::proxy::framer::Framer::new(&mut link, 10);
        let mut out = Vec::new();
        while let Ok(frame) = framer.receive() {
            if let Some(reply) = codec::decode_reply(&frame) {
                out.push(reply);
            }
        }
        out
    }
}

impl Transport for SimTransport {
    fn read_byte(&mut self, _timeout_us: Option<u64>) -> Result<u8, TransportError> {
        if let Some(b) = self.rx.pop_front() {
            return Ok(b);
        }
        if self.idle_timeouts > 0 {
            self.idle_timeouts -= 1;
            return Err(TransportError::Timeout);
        }
        Err(TransportError::Disconnected)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if let Some((e, n)) = self.write_error.as_mut() {
            if *n > 0 {
                *n -= 1;
                return Err(*e);
            }
        }
        self.tx.extend_from_slice(data);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.shutdowns += 1;
    }

    fn is_console(&self) -> bool {
        self.console
    }
}

/// Wire bytes for a sequence of host requests
pub fn request_stream(cmds: &[Command]) -> Vec<u8> {
    let mut wire = Vec::new();
    for cmd in cmds {
        wire.extend_from_slice(&codec::encode_request(cmd).to_wire());
    }
    wire
}

/// Raw request frame, for opcodes outside the enumeration
pub fn raw_request(opcode: u16, seq: u16, body: &[u8]) -> Vec<u8> {
    let mut payload = Payload::new();
    let _ = payload.extend_from_slice(&opcode.to_le_bytes());
    let _ = payload.extend_from_slice(&seq.to_le_bytes());
    let _ = payload.extend_from_slice(body);
    Frame {
        kind: FrameKind::Request,
        payload,
    }
    .to_wire()
    .to_vec()
}

/// ARM64 `Image` with a counting body after the header
pub fn arm64_image(text_offset: u64, size: usize) -> Vec<u8> {
    let mut img = alloc::vec![0u8; size];
    img[0..4].copy_from_slice(&0x1400_0010u32.to_le_bytes());
    img[8..16].copy_from_slice(&text_offset.to_le_bytes());
    img[16..24].copy_from_slice(&(size as u64).to_le_bytes());
    img[56..60].copy_from_slice(&crate::payload::IMAGE_MAGIC.to_le_bytes());
    for (i, b) in img[64..].iter_mut().enumerate() {
        *b = i as u8;
    }
    img
}

/// Line noise that contains marker fragments but never a whole marker
pub fn noise(len: usize) -> Vec<u8> {
    let pattern = [0x00, MARKER[0], MARKER[1], 0x13, MARKER[0], 0x42, MARKER[2]];
    pattern.iter().copied().cycle().take(len).collect()
}

type CallFn = Box<dyn FnMut(&[u64; CALL_ARGS]) -> Result<[u64; 2], FaultInfo>>;

/// Flat simulated physical memory with callable addresses
pub struct SimMemory {
    base: u64,
    mem: Vec<u8>,
    calls: BTreeMap<u64, CallFn>,
    faulting: Vec<(u64, u64)>,
    reads: usize,
    writes: usize,
    /// `(addr, width)` of every sized store from `fill` and `write_reg`
    stores: Vec<(u64, Width)>,
    el: u8,
}

impl SimMemory {
    pub fn new(base: u64, size: usize) -> Self {
        SimMemory {
            base,
            mem: alloc::vec![0; size],
            calls: BTreeMap::new(),
            faulting: Vec::new(),
            reads: 0,
            writes: 0,
            stores: Vec::new(),
            el: 1,
        }
    }

    pub fn load(&mut self, addr: u64, data: &[u8]) {
        let at = (addr - self.base) as usize;
        self.mem[at..at + data.len()].copy_from_slice(data);
    }

    pub fn bytes(&self, addr: u64, len: usize) -> &[u8] {
        let at = (addr - self.base) as usize;
        &self.mem[at..at + len]
    }

    /// Register code at `addr` for [`Privileged::call`]
    pub fn install(
        &mut self,
        addr: u64,
        f: impl FnMut(&[u64; CALL_ARGS]) -> Result<[u64; 2], FaultInfo> + 'static,
    ) {
        self.calls.insert(addr, Box::new(f));
    }

    /// Accesses touching `base..base+len` trap
    pub fn fault_range(&mut self, base: u64, len: u64) {
        self.faulting.push((base, len));
    }

    pub fn set_el(&mut self, el: u8) {
        self.el = el;
    }

    /// Read operations performed, including register reads
    pub fn reads(&self) -> usize {
        self.reads
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn stores(&self) -> &[(u64, Width)] {
        &self.stores
    }

    fn span(&self, addr: u64, len: u64) -> Result<core::ops::Range<usize>, FaultInfo> {
        let fault = FaultInfo {
            esr: DATA_ABORT_ESR,
            far: addr,
            elr: 0,
        };
        let end = addr.checked_add(len).ok_or(fault)?;
        if addr < self.base || end > self.base + self.mem.len() as u64 {
            return Err(fault);
        }
        if self
            .faulting
            .iter()
            .any(|&(b, l)| addr < b + l && end > b)
        {
            return Err(fault);
        }
        let at = (addr - self.base) as usize;
        Ok(at..at + len as usize)
    }
}

impl Privileged for SimMemory {
    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), FaultInfo> {
        let span = self.span(addr, buf.len() as u64)?;
        self.reads += 1;
        buf.copy_from_slice(&self.mem[span]);
        Ok(())
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), FaultInfo> {
        let span = self.span(addr, data.len() as u64)?;
        self.writes += 1;
        self.mem[span].copy_from_slice(data);
        Ok(())
    }

    fn fill(&mut self, addr: u64, len: u64, pattern: u64, width: Width) -> Result<(), FaultInfo> {
        self.span(addr, len)?;
        self.writes += 1;
        let mut at = addr;
        while at < addr + len {
            let span = self.span(at, width.bytes())?;
            let n = span.len();
            self.mem[span].copy_from_slice(&pattern.to_le_bytes()[..n]);
            self.stores.push((at, width));
            at += width.bytes();
        }
        Ok(())
    }

    fn read_reg(&mut self, addr: u64, width: Width) -> Result<u64, FaultInfo> {
        let span = self.span(addr, width.bytes())?;
        self.reads += 1;
        let mut word = [0u8; 8];
        word[..span.len()].copy_from_slice(&self.mem[span]);
        Ok(u64::from_le_bytes(word))
    }

    fn write_reg(&mut self, addr: u64, width: Width, value: u64) -> Result<(), FaultInfo> {
        let span = self.span(addr, width.bytes())?;
        self.writes += 1;
        let n = span.len();
        self.mem[span].copy_from_slice(&value.to_le_bytes()[..n]);
        self.stores.push((addr, width));
        Ok(())
    }

    unsafe fn call(&mut self, addr: u64, args: &[u64; CALL_ARGS]) -> Result<[u64; 2], FaultInfo> {
        match self.calls.get_mut(&addr) {
            Some(f) => f(args),
            None => Err(FaultInfo {
                esr: INSN_ABORT_ESR,
                far: addr,
                elr: addr,
            }),
        }
    }

    fn current_el(&self) -> u8 {
        self.el
    }
}

/// Board model with a property map and a teardown journal
pub struct SimPlatform {
    props: BTreeMap<(String, String), Vec<u8>>,
    failing: Vec<Subsystem>,
    inits: Vec<Subsystem>,
    /// Teardown steps that changed state, in order
    journal: Vec<&'static str>,
    exceptions_live: bool,
    mmu_on: bool,
    display_live: bool,
    logo_restored: bool,
}

impl SimPlatform {
    pub fn new() -> Self {
        SimPlatform {
            props: BTreeMap::new(),
            failing: Vec::new(),
            inits: Vec::new(),
            journal: Vec::new(),
            exceptions_live: false,
            mmu_on: false,
            display_live: false,
            logo_restored: false,
        }
    }

    pub fn set_property(&mut self, path: &str, name: &str, value: &[u8]) {
        self.props
            .insert((String::from(path), String::from(name)), value.to_vec());
    }

    pub fn fail_init(&mut self, subsystem: Subsystem) {
        self.failing.push(subsystem);
    }

    pub fn inits(&self) -> &[Subsystem] {
        &self.inits
    }

    pub fn journal(&self) -> &[&'static str] {
        &self.journal
    }

    /// (exceptions live, MMU on, display live, logo restored)
    pub fn hw_state(&self) -> (bool, bool, bool, bool) {
        (
            self.exceptions_live,
            self.mmu_on,
            self.display_live,
            self.logo_restored,
        )
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for SimPlatform {
    fn init(&mut self, subsystem: Subsystem) -> Result<(), PlatformError> {
        if self.failing.contains(&subsystem) {
            return Err(PlatformError::InitFailed);
        }
        self.inits.push(subsystem);
        match subsystem {
            Subsystem::Exceptions => self.exceptions_live = true,
            Subsystem::Mmu => self.mmu_on = true,
            Subsystem::Display => self.display_live = true,
            Subsystem::Console => {}
        }
        Ok(())
    }

    fn device_property(&self, path: &str, name: &str) -> Result<Vec<u8>, PlatformError> {
        if name.is_empty() {
            let exists = self.props.keys().any(|(p, _)| p == path);
            return if exists {
                Ok(Vec::new())
            } else {
                Err(PlatformError::NotFound)
            };
        }
        self.props
            .get(&(String::from(path), String::from(name)))
            .cloned()
            .ok_or(PlatformError::NotFound)
    }

    fn shutdown_exceptions(&mut self) {
        if self.exceptions_live {
            self.exceptions_live = false;
            self.journal.push("exceptions");
        }
    }

    fn shutdown_mmu(&mut self) {
        if self.mmu_on {
            self.mmu_on = false;
            self.journal.push("mmu");
        }
    }

    fn shutdown_display(&mut self, restore_logo: bool) {
        if self.display_live {
            self.display_live = false;
            self.logo_restored = restore_logo;
            self.journal.push("display");
        }
    }
}
