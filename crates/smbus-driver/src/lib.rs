//! Pure Rust SMBus host-controller driver for reading memory modules.
//!
//! Talks to the chipset SMBus controller directly (Intel ICH/PCH, or the
//! PIIX4 family: AMD/ATI/Hygon FCHs, VIA, ServerWorks) and reads SPD data
//! and on-module temperature sensors from DDR3, DDR4 and DDR5 DIMMs.
//!
//! # Layers
//!
//! ```text
//! DimmMonitor            slot enumeration, periodic temperature poll
//!   └─ BusSession        bus lock, SPD paging cache, generation routing
//!        └─ Backend      I801 | Piix4, chosen once at bring-up
//!             └─ BusPort DevPort (/dev/port, sysfs, /dev/mem, flock)
//!                        SimulatedPort (CI, fault injection)
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use smbus_driver::ports::DevPort;
//! use smbus_driver::BusSession;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let port = DevPort::open()?;
//! let Some(mut session) = BusSession::bring_up(port) else {
//!     println!("no SMBus controller");
//!     return Ok(());
//! };
//! for slot in 0..8 {
//!     if let Some(generation) = session.spd_probe(slot) {
//!         let temp = session.thermal_read(slot).ok();
//!         println!("slot {slot}: {generation} {temp:?}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! A missing controller is `None`, never an error: callers report "no data"
//! and carry on.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod config;
mod controller;
pub mod controllers;
pub mod delegate;
mod error;
mod monitor;
mod port;
pub mod ports;
mod protocol;
mod session;
pub mod spd;

/// Silicon constants (re-exported from smbus-chip).
pub use smbus_chip as chip;

pub use config::{BusConfig, DumpMode};
pub use controller::{
    Backend, BackendKind, Capabilities, Controller, ControllerInfo, Detected, Quirks, PRIORITY,
};
pub use error::{BusFault, Result, SmbusError};
pub use monitor::{DimmMonitor, MonitoredSlot, Reading};
pub use port::{BusPort, Transport};
pub use protocol::{Direction, Payload, Protocol, Transaction, BLOCK_MAX};
pub use session::BusSession;
pub use spd::{Generation, SpdAddress, SpdDump, ThermalSensor};

/// Bring up a session on `port` with the default configuration
///
/// `None` when no supported controller is present.
pub fn bring_up<P: BusPort>(port: P) -> Option<BusSession<P>> {
    BusSession::bring_up(port)
}
