//! Appended payload scanner
//!
//! Blobs concatenated after the monitor image land in a reserved window.
//! The scanner walks them in order: device trees are remembered, and the
//! first ARM64 `Image` is relocated to a 2MB-aligned base and becomes the
//! next stage with `x0` pointing at the last device tree seen.

use alloc::vec;

use crate::error::FaultInfo;
use crate::fdt;
use crate::platform::{BootVector, ImageLoader, PayloadError};
use crate::proxy::access::Privileged;

/// `ARM\x64` at offset 56 of an ARM64 `Image` header
pub const IMAGE_MAGIC: u32 = 0x644d_5241;
pub const IMAGE_HEADER_LEN: usize = 64;

/// Kernels are placed `text_offset` above a 2MB boundary
pub const KERNEL_ALIGN: u64 = 0x20_0000;

const COPY_CHUNK: usize = 0x1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blob {
    Fdt { size: u64 },
    Image { text_offset: u64, image_size: u64 },
}

/// Identify the blob whose first bytes are `header`
pub fn identify(header: &[u8; IMAGE_HEADER_LEN]) -> Option<Blob> {
    if let Some(size) = fdt::total_size(header) {
        if size >= fdt::HEADER_LEN {
            return Some(Blob::Fdt { size: size as u64 });
        }
    }
    let word = |at: usize| {
        let mut w = [0u8; 8];
        w.copy_from_slice(&header[at..at + 8]);
        u64::from_le_bytes(w)
    };
    let magic = u32::from_le_bytes([header[56], header[57], header[58], header[59]]);
    if magic == IMAGE_MAGIC {
        return Some(Blob::Image {
            text_offset: word(8),
            image_size: word(16),
        });
    }
    None
}

pub struct PayloadScanner {
    /// Reserved window the payload is appended into
    start: u64,
    end: u64,
    kernel_base: u64,
    /// Device tree handed over when the payload carries none
    fallback_dtb: u64,
}

impl PayloadScanner {
    pub fn new(start: u64, end: u64, kernel_base: u64, fallback_dtb: u64) -> Self {
        PayloadScanner {
            start,
            end,
            kernel_base,
            fallback_dtb,
        }
    }

    fn header(
        &self,
        mem: &mut dyn Privileged,
        at: u64,
    ) -> Result<Option<[u8; IMAGE_HEADER_LEN]>, FaultInfo> {
        if at + IMAGE_HEADER_LEN as u64 > self.end {
            return Ok(None);
        }
        let mut header = [0u8; IMAGE_HEADER_LEN];
        mem.read(at, &mut header)?;
        Ok(Some(header))
    }

    /// Copy `len` bytes from `src` to `dst` through the privileged seam
    fn relocate(
        mem: &mut dyn Privileged,
        src: u64,
        dst: u64,
        len: u64,
    ) -> Result<(), PayloadError> {
        if src < dst + len && dst < src + len {
            return Err(PayloadError::Overlap);
        }
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut done = 0;
        while done < len {
            let n = (len - done).min(COPY_CHUNK as u64) as usize;
            mem.read(src + done, &mut buf[..n]).map_err(PayloadError::Fault)?;
            mem.write(dst + done, &buf[..n]).map_err(PayloadError::Fault)?;
            done += n as u64;
        }
        Ok(())
    }

    /// Bytes the kernel at `at` occupies in the window
    fn image_len(&self, at: u64, image_size: u64) -> Result<u64, PayloadError> {
        let room = self.end - at;
        match image_size {
            // Old kernels leave image_size zero: take the rest of the window
            0 => Ok(room),
            n if n > room => Err(PayloadError::Truncated),
            n => Ok(n.max(IMAGE_HEADER_LEN as u64)),
        }
    }

    /// Total bytes of recognised blobs in the window
    pub fn payload_size(&self, mem: &mut dyn Privileged) -> u64 {
        let mut at = self.start;
        while let Ok(Some(header)) = self.header(mem, at) {
            match identify(&header) {
                Some(Blob::Fdt { size }) => at = at.saturating_add(size),
                Some(Blob::Image { image_size, .. }) => {
                    at = match self.image_len(at, image_size) {
                        Ok(len) => at + len,
                        Err(_) => self.end,
                    };
                    break;
                }
                None => break,
            }
        }
        at.min(self.end) - self.start
    }
}

impl ImageLoader for PayloadScanner {
    fn load_candidate(&mut self, mem: &mut dyn Privileged) -> Result<BootVector, PayloadError> {
        let mut at = self.start;
        let mut dtb = None;

        loop {
            let header = match self.header(mem, at).map_err(PayloadError::Fault)? {
                Some(header) => header,
                None => return Err(PayloadError::NoValidImage),
            };
            match identify(&header) {
                Some(Blob::Fdt { size }) => {
                    if at + size > self.end {
                        return Err(PayloadError::Truncated);
                    }
                    log::info!("Found a device tree at {:#x} ({:#x} bytes)", at, size);
                    dtb = Some(at);
                    at += size;
                }
                Some(Blob::Image {
                    text_offset,
                    image_size,
                }) => {
                    let size = self.image_len(at, image_size)?;
                    let entry = (self.kernel_base + KERNEL_ALIGN - 1) / KERNEL_ALIGN * KERNEL_ALIGN
                        + text_offset;
                    log::info!(
                        "Found a kernel at {:#x} ({:#x} bytes), loading to {:#x}",
                        at,
                        size,
                        entry
                    );
                    Self::relocate(mem, at, entry, size)?;
                    let dtb = dtb.unwrap_or(self.fallback_dtb);
                    return BootVector::new(entry, [dtb, 0, 0, 0, 0], false)
                        .ok_or(PayloadError::NoValidImage);
                }
                None => {
                    log::debug!("payload ends at {:#x}", at);
                    return Err(PayloadError::NoValidImage);
                }
            }
        }
    }

    fn source_span(&self, mem: &mut dyn Privileged) -> Option<(u64, u64)> {
        let len = self.payload_size(mem).max(IMAGE_HEADER_LEN as u64);
        Some((self.start, len.min(self.end - self.start)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{arm64_image as image, SimMemory};

    const WINDOW: u64 = 0x1_0000;
    const WINDOW_END: u64 = 0x9_0000;
    const KERNEL_BASE: u64 = 0x20_0000;
    const MEM_SIZE: usize = 0x40_0000;

    fn scanner() -> PayloadScanner {
        PayloadScanner::new(WINDOW, WINDOW_END, KERNEL_BASE, 0x4000_0000)
    }

    #[test]
    fn empty_window_has_no_image() {
        let mut mem = SimMemory::new(0, MEM_SIZE);
        assert_eq!(
            scanner().load_candidate(&mut mem),
            Err(PayloadError::NoValidImage)
        );
        assert_eq!(scanner().payload_size(&mut mem), 0);
    }

    #[test]
    fn dtb_then_kernel_becomes_next_stage() {
        let mut mem = SimMemory::new(0, MEM_SIZE);
        let dtb = crate::fdt::build::virt();
        let kernel = image(0x8_0000, 0x2000);
        mem.load(WINDOW, &dtb);
        mem.load(WINDOW + dtb.len() as u64, &kernel);

        let vector = scanner().load_candidate(&mut mem).unwrap();
        assert_eq!(vector.entry(), KERNEL_BASE + 0x8_0000);
        assert_eq!(vector.args(), &[WINDOW, 0, 0, 0, 0]);
        assert_eq!(mem.bytes(vector.entry(), kernel.len()), &kernel[..]);
        assert_eq!(
            scanner().payload_size(&mut mem),
            dtb.len() as u64 + kernel.len() as u64
        );
    }

    #[test]
    fn bare_kernel_gets_fallback_dtb() {
        let mut mem = SimMemory::new(0, MEM_SIZE);
        mem.load(WINDOW, &image(0, 0x200));
        let vector = scanner().load_candidate(&mut mem).unwrap();
        assert_eq!(vector.entry(), KERNEL_BASE);
        assert_eq!(vector.args()[0], 0x4000_0000);
    }

    #[test]
    fn unaligned_kernel_base_rounds_up() {
        let mut mem = SimMemory::new(0, MEM_SIZE);
        mem.load(WINDOW, &image(0x80, 0x200));
        let mut scanner = PayloadScanner::new(WINDOW, WINDOW_END, KERNEL_BASE - 0x1_0000, 0);
        assert_eq!(
            scanner.load_candidate(&mut mem).unwrap().entry(),
            KERNEL_BASE + 0x80
        );
    }

    #[test]
    fn kernel_larger_than_window_is_truncated() {
        let mut mem = SimMemory::new(0, MEM_SIZE);
        let mut kernel = image(0, 0x200);
        kernel[16..24].copy_from_slice(&0x10_0000u64.to_le_bytes());
        mem.load(WINDOW, &kernel);
        assert_eq!(scanner().load_candidate(&mut mem), Err(PayloadError::Truncated));
        assert_eq!(mem.bytes(KERNEL_BASE, 4), &[0; 4]);
        assert_eq!(scanner().payload_size(&mut mem), WINDOW_END - WINDOW);
    }

    #[test]
    fn source_span_covers_consumed_blobs() {
        let mut mem = SimMemory::new(0, MEM_SIZE);
        let dtb = crate::fdt::build::virt();
        mem.load(WINDOW, &dtb);
        mem.load(WINDOW + dtb.len() as u64, &image(0, 0x400));
        assert_eq!(
            scanner().source_span(&mut mem),
            Some((WINDOW, dtb.len() as u64 + 0x400))
        );

        let mut empty = SimMemory::new(0, MEM_SIZE);
        assert_eq!(
            scanner().source_span(&mut empty),
            Some((WINDOW, IMAGE_HEADER_LEN as u64))
        );
    }

    #[test]
    fn dtb_alone_is_not_bootable() {
        let mut mem = SimMemory::new(0, MEM_SIZE);
        mem.load(WINDOW, &crate::fdt::build::virt());
        assert_eq!(
            scanner().load_candidate(&mut mem),
            Err(PayloadError::NoValidImage)
        );
    }

    #[test]
    fn dtb_past_window_end_is_truncated() {
        let mut mem = SimMemory::new(0, MEM_SIZE);
        let dtb = crate::fdt::build::virt();
        mem.load(WINDOW, &dtb);
        let mut short = PayloadScanner::new(WINDOW, WINDOW + dtb.len() as u64 - 4, KERNEL_BASE, 0);
        assert_eq!(short.load_candidate(&mut mem), Err(PayloadError::Truncated));
    }

    #[test]
    fn overlapping_destination_is_refused() {
        let mut mem = SimMemory::new(0, MEM_SIZE);
        mem.load(WINDOW, &image(0, 0x200));
        // 2MB alignment moves the kernel clear of the window
        let mut rounded = PayloadScanner::new(WINDOW, WINDOW_END, WINDOW, 0);
        assert_eq!(rounded.load_candidate(&mut mem).unwrap().entry(), KERNEL_ALIGN);

        let mut mem = SimMemory::new(0, MEM_SIZE);
        mem.load(KERNEL_ALIGN, &image(0x100, 0x400));
        let mut in_place =
            PayloadScanner::new(KERNEL_ALIGN, KERNEL_ALIGN + 0x1000, KERNEL_ALIGN, 0);
        assert_eq!(in_place.load_candidate(&mut mem), Err(PayloadError::Overlap));
    }
}
