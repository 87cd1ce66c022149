//! Remote command protocol engine
//!
//! Layers, bottom up: [`framer`] (bytes to frames), [`codec`] (frames to
//! commands and replies), [`access`] and [`channel`] (what commands act on),
//! [`dispatch`] (opcode to handler) and [`session`] (the run loop).

pub mod access;
pub mod channel;
pub mod checksum;
pub mod codec;
pub mod dispatch;
pub mod framer;
pub mod session;

pub use access::{AccessLayer, AccessPolicy, MemoryRegion, Privileged, Rights, Width};
pub use codec::{Command, Opcode, Reply};
pub use dispatch::ProxyContext;
pub use framer::{Frame, FrameKind, Framer, Transport};
pub use session::{Session, SessionState};
