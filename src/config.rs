//! Build-time configuration
//!
//! Everything here is fixed at compile time; Cargo features pick variants.

use log::LevelFilter;

/// Protocol revision reported by the Version command
pub const PROTOCOL_VERSION: u64 = 1;

/// Largest frame payload in either direction
pub const MAX_FRAME_PAYLOAD: usize = 0x1100;

/// Largest data block carried by one command or reply
pub const MAX_DATA: usize = 0x1000;

/// Version string printed in the banner
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Which access policy the proxy enforces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    /// Only board-declared regions, monitor image write-protected
    Board,
    /// Every address is accessible
    Unrestricted,
}

/// Proxy tuning knobs
#[derive(Debug, Clone, Copy)]
pub struct ProxyConfig {
    /// Inter-byte timeout inside a frame before resynchronising
    pub byte_timeout_us: u64,
    /// Concurrently open bulk transfers
    pub max_transfers: usize,
    /// Tries per reply before a recoverable send error ends the session
    pub send_attempts: u32,
    /// Faults tolerated inside one guarded operation before halting
    pub max_nested_faults: u32,
    pub log_level: LevelFilter,
    pub policy: PolicyMode,
}

impl ProxyConfig {
    pub const DEFAULT: ProxyConfig = ProxyConfig {
        byte_timeout_us: 100_000,
        max_transfers: 4,
        send_attempts: 3,
        max_nested_faults: 16,
        log_level: if cfg!(feature = "verbose") {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
        policy: if cfg!(feature = "unrestricted-access") {
            PolicyMode::Unrestricted
        } else {
            PolicyMode::Board
        },
    };
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
