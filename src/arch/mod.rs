//! Architecture support

pub mod aarch64;
