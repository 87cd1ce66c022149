//! proxymon - ARM64 secondary-stage monitor with a remote command proxy
//!
//! The portable parts (protocol engine, payload scanner, boot flow) build and
//! test on the host. Everything that touches the hardware lives in
//! [`arch::aarch64`] and only builds for bare-metal AArch64.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod boot;
pub mod config;
pub mod error;
pub mod fdt;
pub mod handoff;
pub mod logger;
pub mod payload;
pub mod platform;
pub mod proxy;

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub mod allocator;
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub mod arch;

#[cfg(test)]
mod sim;

pub use boot::{BootError, Orchestrator};
pub use config::ProxyConfig;
pub use error::Status;
pub use platform::BootVector;
