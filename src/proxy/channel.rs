//! Bulk data channel
//!
//! Chunked transfers layered on ordinary commands. A transfer is opened with
//! a direction, a destination (or source) span and flags, fed or drained in
//! chunks, then closed against a host-declared CRC-32.
//!
//! Host-to-device destinations stay tainted from `begin` until an `end`
//! whose CRC matches both the stream and the memory it landed in. Spans of
//! host-to-device transfers that are still open stay tainted whatever else
//! verifies over them. Code refuses to run from tainted memory.

use alloc::vec::Vec;

use crate::config::MAX_DATA;
use crate::error::{AccessError, Status};
use crate::proxy::access::{AccessLayer, Rights};
use crate::proxy::checksum::Crc32;
use crate::proxy::codec::Data;

/// Chunks may arrive at any offset; CRC is taken over the span at `end`
pub const FLAG_RANDOM_ACCESS: u64 = 1 << 0;

const KNOWN_FLAGS: u64 = FLAG_RANDOM_ACCESS;

pub type ChannelId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device (push)
    ToDevice,
    /// Device to host (pull)
    FromDevice,
}

impl Direction {
    pub fn from_u64(n: u64) -> Option<Self> {
        match n {
            0 => Some(Direction::ToDevice),
            1 => Some(Direction::FromDevice),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// No such open transfer
    #[error("invalid channel")]
    InvalidChannel,
    /// Channel table full
    #[error("busy")]
    Busy,
    #[error("out of sequence")]
    OutOfSequence,
    #[error("out of range")]
    OutOfRange,
    #[error("invalid argument")]
    InvalidArgument,
    /// Transfer was aborted earlier by an error with this status
    #[error("transfer aborted ({0})")]
    Aborted(Status),
    /// CRC or length disagreed at `end`
    #[error("integrity mismatch (crc {crc:#010x}, {len} bytes)")]
    Mismatch { crc: u32, len: u64 },
    #[error(transparent)]
    Access(#[from] AccessError),
}

impl From<ChannelError> for Status {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::InvalidChannel => Status::InvalidChannel,
            ChannelError::Busy => Status::Busy,
            ChannelError::OutOfSequence => Status::OutOfSequence,
            ChannelError::OutOfRange => Status::OutOfRange,
            ChannelError::InvalidArgument => Status::InvalidArgument,
            ChannelError::Aborted(status) => status,
            ChannelError::Mismatch { .. } => Status::IntegrityError,
            ChannelError::Access(e) => e.into(),
        }
    }
}

/// Outcome of a verified transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completed {
    pub crc: u32,
    pub len: u64,
}

#[derive(Debug)]
struct Transfer {
    id: ChannelId,
    direction: Direction,
    addr: u64,
    len: u64,
    random: bool,
    /// Next expected offset; high-water mark for random access
    next: u64,
    crc: Crc32,
    aborted: Option<Status>,
}

impl Transfer {
    /// Validate a chunk against the transfer's geometry
    fn admit(&self, offset: u64, len: u64) -> Result<(), ChannelError> {
        if let Some(status) = self.aborted {
            return Err(ChannelError::Aborted(status));
        }
        if !self.random && offset != self.next {
            return Err(ChannelError::OutOfSequence);
        }
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(ChannelError::OutOfRange),
        }
    }
}

/// Open transfers plus the taint list
#[derive(Debug)]
pub struct ChannelTable {
    transfers: Vec<Transfer>,
    next_id: ChannelId,
    max: usize,
    /// Disjoint, non-adjacent `(base, len)` spans whose contents are unverified
    taints: Vec<(u64, u64)>,
}

impl ChannelTable {
    pub fn new(max: usize) -> Self {
        ChannelTable {
            transfers: Vec::with_capacity(max),
            next_id: 1,
            max,
            taints: Vec::new(),
        }
    }

    /// Transfers still occupying a slot, aborted ones included
    pub fn open_count(&self) -> usize {
        self.transfers.len()
    }

    fn find(&mut self, id: ChannelId) -> Result<&mut Transfer, ChannelError> {
        self.transfers
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(ChannelError::InvalidChannel)
    }

    fn take(&mut self, id: ChannelId) -> Result<Transfer, ChannelError> {
        let at = self
            .transfers
            .iter()
            .position(|t| t.id == id)
            .ok_or(ChannelError::InvalidChannel)?;
        Ok(self.transfers.remove(at))
    }

    pub fn begin(
        &mut self,
        access: &AccessLayer<'_>,
        direction: Direction,
        addr: u64,
        len: u64,
        flags: u64,
    ) -> Result<ChannelId, ChannelError> {
        if len == 0 || flags & !KNOWN_FLAGS != 0 {
            return Err(ChannelError::InvalidArgument);
        }
        let needed = match direction {
            Direction::ToDevice => Rights::WRITE,
            Direction::FromDevice => Rights::READ,
        };
        access.policy().check(addr, len, needed)?;
        if self.transfers.len() >= self.max {
            return Err(ChannelError::Busy);
        }

        let id = self.next_id;
        self.next_id = self.next_id.checked_add(1).ok_or(ChannelError::Busy)?;
        if direction == Direction::ToDevice {
            self.taint(addr, len);
        }
        self.transfers.push(Transfer {
            id,
            direction,
            addr,
            len,
            random: flags & FLAG_RANDOM_ACCESS != 0,
            next: 0,
            crc: Crc32::new(),
            aborted: None,
        });
        log::debug!("xfer {} open: {:?} {:#x}+{:#x}", id, direction, addr, len);
        Ok(id)
    }

    /// Store one host chunk; returns the next expected offset
    pub fn push(
        &mut self,
        access: &mut AccessLayer<'_>,
        id: ChannelId,
        offset: u64,
        data: &[u8],
    ) -> Result<u64, ChannelError> {
        let xfer = self.find(id)?;
        if xfer.direction != Direction::ToDevice {
            return Err(ChannelError::InvalidArgument);
        }
        let result = xfer
            .admit(offset, data.len() as u64)
            .and_then(|()| Ok(access.write(xfer.addr + offset, data)?));
        match result {
            Ok(()) => {
                let end = offset + data.len() as u64;
                if xfer.random {
                    xfer.next = xfer.next.max(end);
                } else {
                    xfer.crc.update_slice(data);
                    xfer.next = end;
                }
                Ok(end)
            }
            Err(e) => Err(Self::abort_on(xfer, e)),
        }
    }

    /// Read one chunk for the host; returns the next offset and the bytes
    pub fn pull(
        &mut self,
        access: &mut AccessLayer<'_>,
        id: ChannelId,
        offset: u64,
        len: u64,
    ) -> Result<(u64, Data), ChannelError> {
        if len as usize > MAX_DATA {
            return Err(ChannelError::InvalidArgument);
        }
        let xfer = self.find(id)?;
        if xfer.direction != Direction::FromDevice {
            return Err(ChannelError::InvalidArgument);
        }
        let mut data = Data::new();
        let _ = data.resize(len as usize, 0);
        let result = xfer
            .admit(offset, len)
            .and_then(|()| Ok(access.read(xfer.addr + offset, &mut data)?));
        match result {
            Ok(()) => {
                let end = offset + len;
                if xfer.random {
                    xfer.next = xfer.next.max(end);
                } else {
                    xfer.crc.update_slice(&data);
                    xfer.next = end;
                }
                Ok((end, data))
            }
            Err(e) => Err(Self::abort_on(xfer, e)),
        }
    }

    /// Close a transfer and verify it
    ///
    /// The transfer is gone afterwards whatever the outcome. A verified
    /// host-to-device span is no longer tainted, except where another open
    /// host-to-device transfer may still write.
    pub fn end(
        &mut self,
        access: &mut AccessLayer<'_>,
        id: ChannelId,
        expected_crc: u32,
    ) -> Result<Completed, ChannelError> {
        let xfer = self.take(id)?;
        if let Some(status) = xfer.aborted {
            log::warn!("xfer {} ended after abort: {}", id, status);
            return Err(ChannelError::Aborted(status));
        }

        let complete = xfer.random || xfer.next == xfer.len;
        let mut crc = if xfer.random {
            Self::crc_of(access, xfer.addr, xfer.len)?
        } else {
            xfer.crc.finish()
        };
        let streamed = !xfer.random && xfer.direction == Direction::ToDevice;
        if streamed && complete && crc == expected_crc {
            // An overlapping transfer may have rewritten the span since
            crc = Self::crc_of(access, xfer.addr, xfer.len)?;
        }
        let done = Completed { crc, len: xfer.len };

        if !complete || crc != expected_crc {
            log::warn!(
                "xfer {} integrity mismatch: crc {:#010x} expected {:#010x}, {}/{} bytes",
                id,
                crc,
                expected_crc,
                xfer.next,
                xfer.len
            );
            return Err(ChannelError::Mismatch {
                crc,
                len: xfer.next,
            });
        }
        if xfer.direction == Direction::ToDevice {
            self.untaint(xfer.addr, xfer.len);
            let writers: Vec<(u64, u64)> = self
                .transfers
                .iter()
                .filter(|t| t.direction == Direction::ToDevice)
                .map(|t| (t.addr, t.len))
                .collect();
            for (addr, len) in writers {
                self.taint(addr, len);
            }
        }
        log::debug!("xfer {} verified: crc {:#010x}", id, crc);
        Ok(done)
    }

    /// Drop a transfer; a host-to-device span stays tainted
    pub fn abort(&mut self, id: ChannelId) -> Result<(), ChannelError> {
        self.take(id)?;
        log::debug!("xfer {} aborted by host", id);
        Ok(())
    }

    /// Whether `addr..addr+len` overlaps unverified memory
    pub fn is_tainted(&self, addr: u64, len: u64) -> bool {
        let end = addr.saturating_add(len.max(1));
        self.taints
            .iter()
            .any(|&(b, l)| addr < b.saturating_add(l) && end > b)
    }

    fn abort_on(xfer: &mut Transfer, e: ChannelError) -> ChannelError {
        if xfer.aborted.is_none() {
            let status = Status::from(e);
            log::warn!("xfer {} aborted: {}", xfer.id, e);
            xfer.aborted = Some(status);
        }
        e
    }

    fn crc_of(access: &mut AccessLayer<'_>, addr: u64, len: u64) -> Result<u32, ChannelError> {
        let mut crc = Crc32::new();
        let mut buf = [0u8; 256];
        let mut done = 0;
        while done < len {
            let n = (len - done).min(buf.len() as u64) as usize;
            access.read(addr + done, &mut buf[..n])?;
            crc.update_slice(&buf[..n]);
            done += n as u64;
        }
        Ok(crc.finish())
    }

    /// Add `addr..addr+len`, folding in every span it touches
    fn taint(&mut self, addr: u64, len: u64) {
        let mut base = addr;
        let mut end = addr.saturating_add(len);
        self.taints.retain(|&(b, l)| {
            let e = b.saturating_add(l);
            if b <= end && e >= base {
                base = base.min(b);
                end = end.max(e);
                false
            } else {
                true
            }
        });
        self.taints.push((base, end - base));
    }

    /// Remove `addr..addr+len` from every taint, splitting where needed
    fn untaint(&mut self, addr: u64, len: u64) {
        let end = addr + len;
        let mut kept = Vec::with_capacity(self.taints.len() + 1);
        for &(b, l) in &self.taints {
            let e = b + l;
            if e <= addr || b >= end {
                kept.push((b, l));
                continue;
            }
            if b < addr {
                kept.push((b, addr - b));
            }
            if e > end {
                kept.push((end, e - end));
            }
        }
        self.taints = kept;
    }
}
