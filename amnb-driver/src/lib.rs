//! AMNB driver interface
//!
//! The crate provides an interface between a byte-transport device driver and the
//! AMNB stack. Limited scope facilitates compatibility across versions.
//! Driver crates should depend on this crate. AMNB stack users should depend on
//! the `amnb` crate instead.
//!
//! A [`device::Device`] abstracts one half-duplex byte medium, e.g. a single-wire
//! UART or an RS-485 transceiver. The stack polls it for pending bytes before
//! starting a transmission and pumps it one byte at a time in both directions;
//! per-byte timeouts are the device's own responsibility and surface as
//! [`device::DeviceTimeout`].
#![no_std]

pub mod device;

pub mod time {
    pub use embassy_time::{Duration, Instant};
}
