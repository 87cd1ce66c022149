//! Transport framer
//!
//! Turns a lossy byte stream into integrity-checked frames:
//!
//! ```text
//!  FF 55 AA | kind | len (u16 LE) | payload[len] | crc16 (BE)
//! ```
//!
//! The CRC covers `kind`, `len` and the payload. A candidate frame that times
//! out, declares an impossible length or fails its CRC is dropped and every
//! byte after its first marker byte is scanned again, so a stray marker in line
//! noise can never swallow a real frame that follows it.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::config::MAX_FRAME_PAYLOAD;
use crate::error::TransportError;
use crate::proxy::checksum::Crc16;

/// Start-of-frame marker
pub const MARKER: [u8; 3] = [0xFF, 0x55, 0xAA];

/// Marker, kind, length and CRC bytes around the payload
pub const FRAME_OVERHEAD: usize = MARKER.len() + 1 + 2 + 2;

/// Largest frame on the wire
pub const MAX_WIRE_FRAME: usize = MAX_FRAME_PAYLOAD + FRAME_OVERHEAD;

pub type Payload = heapless::Vec<u8, MAX_FRAME_PAYLOAD>;

/// A byte-oriented duplex link
///
/// Implemented by the console UART on hardware and by simulators in tests.
/// Any endpoint implementing it can be bound as the proxy transport.
pub trait Transport {
    /// Read one byte. `None` waits forever, `Some(us)` gives up with
    /// [`TransportError::Timeout`] after that many microseconds.
    fn read_byte(&mut self, timeout_us: Option<u64>) -> Result<u8, TransportError>;

    /// Write all of `data`, blocking until the port accepts it
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Quiesce the endpoint. Must be safe to call repeatedly.
    fn shutdown(&mut self) {}

    /// True for the console the next stage keeps using after handoff
    fn is_console(&self) -> bool {
        false
    }
}

/// Frame direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Request = 0x01,
    Reply = 0x02,
}

impl FrameKind {
    pub fn from_u8(n: u8) -> Option<Self> {
        match n {
            0x01 => Some(FrameKind::Request),
            0x02 => Some(FrameKind::Reply),
            _ => None,
        }
    }
}

/// One integrity-checked unit of wire data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Payload,
}

impl Frame {
    /// Serialize marker, header, payload and CRC
    pub fn to_wire(&self) -> heapless::Vec<u8, MAX_WIRE_FRAME> {
        encode_frame(self.kind, &self.payload)
    }
}

/// Build the wire bytes for one frame
///
/// Payloads are bounded by [`Payload`]'s capacity, so this cannot overflow.
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> heapless::Vec<u8, MAX_WIRE_FRAME> {
    let len = (payload.len().min(MAX_FRAME_PAYLOAD) as u16).to_le_bytes();
    let payload = &payload[..payload.len().min(MAX_FRAME_PAYLOAD)];

    let mut crc = Crc16::default();
    crc.update(kind as u8);
    crc.update_slice(&len);
    crc.update_slice(payload);

    let mut wire = heapless::Vec::new();
    let _ = wire.extend_from_slice(&MARKER);
    let _ = wire.push(kind as u8);
    let _ = wire.extend_from_slice(&len);
    let _ = wire.extend_from_slice(payload);
    let _ = wire.extend_from_slice(&crc.finish().to_be_bytes());
    wire
}

/// Counters surfaced through the Stats action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerStats {
    pub frames_rx: u64,
    pub frames_tx: u64,
    /// Bytes dropped while hunting for a marker
    pub discarded: u64,
    pub crc_errors: u64,
    /// Candidates abandoned on timeout or bad length
    pub resyncs: u64,
}

enum Dropped {
    /// Candidate abandoned, resume scanning
    Resync,
    Fatal(TransportError),
}

impl From<TransportError> for Dropped {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Disconnected => Dropped::Fatal(e),
            _ => Dropped::Resync,
        }
    }
}

pub struct Framer<'a> {
    link: &'a mut dyn Transport,
    /// Bytes already received that must be scanned again
    replay: VecDeque<u8>,
    byte_timeout_us: u64,
    stats: FramerStats,
}

impl<'a> Framer<'a> {
    pub fn new(link: &'a mut dyn Transport, byte_timeout_us: u64) -> Self {
        Framer {
            link,
            replay: VecDeque::new(),
            byte_timeout_us,
            stats: FramerStats::default(),
        }
    }

    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    /// The bound transport, for teardown
    pub fn link(&mut self) -> &mut dyn Transport {
        &mut *self.link
    }

    /// Write one complete frame
    pub fn send(&mut self, kind: FrameKind, payload: &[u8]) -> Result<(), TransportError> {
        let wire = encode_frame(kind, payload);
        self.link.write(&wire)?;
        self.link.flush()?;
        self.stats.frames_tx += 1;
        Ok(())
    }

    /// Block until a valid frame arrives
    ///
    /// Only [`TransportError::Disconnected`] is returned; every other
    /// transport hiccup is absorbed by resynchronisation.
    pub fn receive(&mut self) -> Result<Frame, TransportError> {
        loop {
            match self.try_candidate() {
                Ok(frame) => {
                    self.stats.frames_rx += 1;
                    return Ok(frame);
                }
                Err(Dropped::Resync) => continue,
                Err(Dropped::Fatal(e)) => return Err(e),
            }
        }
    }

    fn next_byte(&mut self, timeout_us: Option<u64>) -> Result<u8, TransportError> {
        match self.replay.pop_front() {
            Some(b) => Ok(b),
            None => self.link.read_byte(timeout_us),
        }
    }

    /// Consume bytes until the full marker has been seen
    fn hunt(&mut self) -> Result<(), TransportError> {
        let mut matched = 0;
        while matched < MARKER.len() {
            let b = match self.next_byte(None) {
                Ok(b) => b,
                Err(TransportError::Disconnected) => return Err(TransportError::Disconnected),
                Err(_) => continue,
            };
            if b == MARKER[matched] {
                matched += 1;
            } else {
                self.stats.discarded += matched as u64;
                if b == MARKER[0] {
                    matched = 1;
                } else {
                    matched = 0;
                    self.stats.discarded += 1;
                }
            }
        }
        Ok(())
    }

    fn try_candidate(&mut self) -> Result<Frame, Dropped> {
        self.hunt().map_err(Dropped::Fatal)?;

        let mut seen: Vec<u8> = Vec::with_capacity(16);
        seen.extend_from_slice(&MARKER);

        let result = self.collect(&mut seen);
        if result.is_err() {
            // Rescan everything after the first marker byte
            for &b in seen[1..].iter().rev() {
                self.replay.push_front(b);
            }
        }
        result
    }

    fn collect(&mut self, seen: &mut Vec<u8>) -> Result<Frame, Dropped> {
        let timeout = Some(self.byte_timeout_us);
        let take = |framer: &mut Self, seen: &mut Vec<u8>| -> Result<u8, Dropped> {
            match framer.next_byte(timeout) {
                Ok(b) => {
                    seen.push(b);
                    Ok(b)
                }
                Err(e) => {
                    if e.is_recoverable() {
                        framer.stats.resyncs += 1;
                    }
                    Err(e.into())
                }
            }
        };

        let kind_byte = take(self, seen)?;
        let lo = take(self, seen)?;
        let hi = take(self, seen)?;
        let len = u16::from_le_bytes([lo, hi]) as usize;
        if len > MAX_FRAME_PAYLOAD {
            self.stats.resyncs += 1;
            return Err(Dropped::Resync);
        }

        let mut payload = Payload::new();
        for _ in 0..len {
            let b = take(self, seen)?;
            let _ = payload.push(b);
        }
        let c_hi = take(self, seen)?;
        let c_lo = take(self, seen)?;

        let mut crc = Crc16::default();
        crc.update(kind_byte);
        crc.update(lo);
        crc.update(hi);
        crc.update_slice(&payload);
        if crc.finish() != u16::from_be_bytes([c_hi, c_lo]) {
            self.stats.crc_errors += 1;
            return Err(Dropped::Resync);
        }

        match FrameKind::from_u8(kind_byte) {
            Some(kind) => Ok(Frame { kind, payload }),
            None => Err(Dropped::Resync),
        }
    }
}
