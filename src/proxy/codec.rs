//! Request codec
//!
//! Request payload:
//!
//! ```text
//!  opcode u16 | seq u16 | args[argc] u64 | (variable only) data_len u32 | data
//! ```
//!
//! Reply payload:
//!
//! ```text
//!  opcode u16 | seq u16 | status u32 | nwords u8 | 3 x reserved | words[nwords] u64
//!  | data_len u32 | data
//! ```
//!
//! All integers are little endian. Argument words are native AArch64
//! register width because they are placed straight into call registers.

use crate::config::{MAX_DATA, MAX_FRAME_PAYLOAD};
use crate::error::Status;
use crate::proxy::framer::{Frame, FrameKind, Payload};

/// Most argument words any opcode takes
pub const MAX_ARGS: usize = 8;

/// Most result words any reply carries
pub const MAX_RESULTS: usize = 4;

const REQUEST_HEADER: usize = 4;
const REPLY_HEADER: usize = 12;

pub type Data = heapless::Vec<u8, MAX_DATA>;

/// Closed opcode enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Nop = 0x0000,
    Version = 0x0001,
    DeviceInfo = 0x0002,
    GetProperty = 0x0003,
    Read8 = 0x0010,
    Read16 = 0x0011,
    Read32 = 0x0012,
    Read64 = 0x0013,
    Write8 = 0x0018,
    Write16 = 0x0019,
    Write32 = 0x001A,
    Write64 = 0x001B,
    MemRead = 0x0020,
    MemWrite = 0x0021,
    MemFill = 0x0022,
    Call = 0x0030,
    XferBegin = 0x0040,
    XferPush = 0x0041,
    XferPull = 0x0042,
    XferEnd = 0x0043,
    XferAbort = 0x0044,
    Action = 0x0050,
    Boot = 0x0060,
}

impl Opcode {
    pub const ALL: [Opcode; 23] = [
        Opcode::Nop,
        Opcode::Version,
        Opcode::DeviceInfo,
        Opcode::GetProperty,
        Opcode::Read8,
        Opcode::Read16,
        Opcode::Read32,
        Opcode::Read64,
        Opcode::Write8,
        Opcode::Write16,
        Opcode::Write32,
        Opcode::Write64,
        Opcode::MemRead,
        Opcode::MemWrite,
        Opcode::MemFill,
        Opcode::Call,
        Opcode::XferBegin,
        Opcode::XferPush,
        Opcode::XferPull,
        Opcode::XferEnd,
        Opcode::XferAbort,
        Opcode::Action,
        Opcode::Boot,
    ];

    /// Convert from the wire value
    pub fn from_u16(n: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| *op as u16 == n)
    }

    /// Fixed number of argument words
    pub fn arg_count(self) -> usize {
        match self {
            Opcode::Nop | Opcode::Version | Opcode::DeviceInfo | Opcode::GetProperty => 0,
            Opcode::Read8 | Opcode::Read16 | Opcode::Read32 | Opcode::Read64 => 1,
            Opcode::Write8 | Opcode::Write16 | Opcode::Write32 | Opcode::Write64 => 2,
            Opcode::MemRead => 2,
            Opcode::MemWrite => 1,
            Opcode::MemFill => 4,
            Opcode::Call => 7,
            Opcode::XferBegin => 4,
            Opcode::XferPush => 2,
            Opcode::XferPull => 3,
            Opcode::XferEnd => 2,
            Opcode::XferAbort => 1,
            Opcode::Action => 2,
            Opcode::Boot => 7,
        }
    }

    /// Whether a length-prefixed data block follows the arguments
    pub fn has_data(self) -> bool {
        matches!(
            self,
            Opcode::GetProperty | Opcode::MemWrite | Opcode::XferPush
        )
    }

    /// Exact request payload size, excluding any data block
    fn fixed_len(self) -> usize {
        REQUEST_HEADER + 8 * self.arg_count() + if self.has_data() { 4 } else { 0 }
    }
}

/// A decoded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub opcode: Opcode,
    pub seq: u16,
    args: [u64; MAX_ARGS],
    pub data: Data,
}

impl Command {
    pub fn new(opcode: Opcode, seq: u16, args: &[u64]) -> Self {
        let mut words = [0u64; MAX_ARGS];
        let n = args.len().min(MAX_ARGS);
        words[..n].copy_from_slice(&args[..n]);
        Command {
            opcode,
            seq,
            args: words,
            data: Data::new(),
        }
    }

    pub fn with_data(mut self, data: &[u8]) -> Self {
        self.data.clear();
        let _ = self.data.extend_from_slice(&data[..data.len().min(MAX_DATA)]);
        self
    }

    /// Argument word `i`, zero past the opcode's count
    pub fn arg(&self, i: usize) -> u64 {
        if i < self.opcode.arg_count() {
            self.args[i]
        } else {
            0
        }
    }

    pub fn args(&self) -> &[u64] {
        &self.args[..self.opcode.arg_count()]
    }
}

/// Why a frame did not decode; keeps enough to address the reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("opcode {opcode:#06x} seq {seq}: {status}")]
pub struct DecodeError {
    pub opcode: u16,
    pub seq: u16,
    pub status: Status,
}

fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn le_u32(b: &[u8], at: usize) -> u32 {
    let mut w = [0u8; 4];
    w.copy_from_slice(&b[at..at + 4]);
    u32::from_le_bytes(w)
}

fn le_u64(b: &[u8], at: usize) -> u64 {
    let mut w = [0u8; 8];
    w.copy_from_slice(&b[at..at + 8]);
    u64::from_le_bytes(w)
}

/// Decode a request frame
pub fn decode(frame: &Frame) -> Result<Command, DecodeError> {
    let p = &frame.payload[..];
    if p.len() < REQUEST_HEADER {
        return Err(DecodeError {
            opcode: if p.len() >= 2 { le_u16(p, 0) } else { 0 },
            seq: 0,
            status: Status::MalformedCommand,
        });
    }
    let raw = le_u16(p, 0);
    let seq = le_u16(p, 2);
    let malformed = DecodeError {
        opcode: raw,
        seq,
        status: Status::MalformedCommand,
    };

    if frame.kind != FrameKind::Request {
        return Err(malformed);
    }

    let opcode = Opcode::from_u16(raw).ok_or(DecodeError {
        opcode: raw,
        seq,
        status: Status::UnknownCommand,
    })?;

    let fixed = opcode.fixed_len();
    if p.len() < fixed || (!opcode.has_data() && p.len() != fixed) {
        return Err(malformed);
    }

    let mut cmd = Command::new(opcode, seq, &[]);
    for i in 0..opcode.arg_count() {
        cmd.args[i] = le_u64(p, REQUEST_HEADER + 8 * i);
    }

    if opcode.has_data() {
        let declared = le_u32(p, fixed - 4) as usize;
        let rest = &p[fixed..];
        if declared != rest.len() || declared > MAX_DATA {
            return Err(malformed);
        }
        cmd.data.extend_from_slice(rest).map_err(|_| malformed)?;
    }

    Ok(cmd)
}

/// Encode a request (host side)
pub fn encode_request(cmd: &Command) -> Frame {
    let mut payload = Payload::new();
    let _ = payload.extend_from_slice(&(cmd.opcode as u16).to_le_bytes());
    let _ = payload.extend_from_slice(&cmd.seq.to_le_bytes());
    for word in cmd.args() {
        let _ = payload.extend_from_slice(&word.to_le_bytes());
    }
    if cmd.opcode.has_data() {
        let _ = payload.extend_from_slice(&(cmd.data.len() as u32).to_le_bytes());
        let _ = payload.extend_from_slice(&cmd.data);
    }
    Frame {
        kind: FrameKind::Request,
        payload,
    }
}

/// A reply to exactly one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub opcode: u16,
    pub seq: u16,
    pub status: Status,
    words: heapless::Vec<u64, MAX_RESULTS>,
    pub data: Data,
}

impl Reply {
    pub fn ok(cmd: &Command) -> Self {
        Self::status(cmd.opcode as u16, cmd.seq, Status::Ok)
    }

    pub fn error(cmd: &Command, status: Status) -> Self {
        Self::status(cmd.opcode as u16, cmd.seq, status)
    }

    pub fn status(opcode: u16, seq: u16, status: Status) -> Self {
        Reply {
            opcode,
            seq,
            status,
            words: heapless::Vec::new(),
            data: Data::new(),
        }
    }

    /// Append a result word; extra words past [`MAX_RESULTS`] are dropped
    pub fn word(mut self, value: u64) -> Self {
        let _ = self.words.push(value);
        self
    }

    pub fn with_data(mut self, data: &[u8]) -> Self {
        self.data.clear();
        let _ = self.data.extend_from_slice(&data[..data.len().min(MAX_DATA)]);
        self
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }
}

impl From<DecodeError> for Reply {
    fn from(e: DecodeError) -> Self {
        Reply::status(e.opcode, e.seq, e.status)
    }
}

/// Encode a reply; total for any reply the types can hold
pub fn encode(reply: &Reply) -> Frame {
    let mut payload = Payload::new();
    let _ = payload.extend_from_slice(&reply.opcode.to_le_bytes());
    let _ = payload.extend_from_slice(&reply.seq.to_le_bytes());
    let _ = payload.extend_from_slice(&(reply.status as u32).to_le_bytes());
    let _ = payload.extend_from_slice(&[reply.words.len() as u8, 0, 0, 0]);
    for word in &reply.words {
        let _ = payload.extend_from_slice(&word.to_le_bytes());
    }
    let _ = payload.extend_from_slice(&(reply.data.len() as u32).to_le_bytes());
    let _ = payload.extend_from_slice(&reply.data);
    debug_assert!(payload.len() <= MAX_FRAME_PAYLOAD);
    Frame {
        kind: FrameKind::Reply,
        payload,
    }
}

/// Decode a reply frame (host side)
pub fn decode_reply(frame: &Frame) -> Option<Reply> {
    let p = &frame.payload[..];
    if frame.kind != FrameKind::Reply || p.len() < REPLY_HEADER {
        return None;
    }
    let status = Status::from_u32(le_u32(p, 4))?;
    let nwords = p[8] as usize;
    if nwords > MAX_RESULTS {
        return None;
    }
    let data_at = REPLY_HEADER + 8 * nwords;
    if p.len() < data_at + 4 {
        return None;
    }
    let mut reply = Reply::status(le_u16(p, 0), le_u16(p, 2), status);
    for i in 0..nwords {
        reply = reply.word(le_u64(p, REPLY_HEADER + 8 * i));
    }
    let len = le_u32(p, data_at) as usize;
    let data = &p[data_at + 4..];
    if data.len() != len || len > MAX_DATA {
        return None;
    }
    Some(reply.with_data(data))
}
