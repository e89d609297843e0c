//! Silicon model for PC chipset SMBus host controllers and the memory-module
//! devices that live behind them.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model: PCI identifiers, host-controller register maps, per-device
//! capability tables, and the register layout of SPD EEPROMs, SPD5 hubs and
//! on-module thermal sensors.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`pci`] | Vendor IDs, bus/device/function addressing, config-space offsets |
//! | [`i801`] | Intel ICH/PCH SMBus register map and device table |
//! | [`piix4`] | PIIX4-compatible (AMD/ATI/VIA/ServerWorks) register map, SB800 PM layout, device table |
//! | [`spd`] | DDR3/DDR4/DDR5 SPD addressing, SPD5 hub MR map, thermal-sensor registers |
//! | [`delegate`] | Routine names and word layout of the delegated-execution transport |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod delegate;
pub mod i801;
pub mod pci;
pub mod piix4;
pub mod spd;

/// A bounded wait: at most `retries` polls, sleeping `quantum_us` before each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    /// Maximum number of status polls.
    pub retries: u32,
    /// Sleep before each poll, in microseconds.
    pub quantum_us: u32,
}

impl PollBudget {
    /// Build a budget.
    #[must_use]
    pub const fn new(retries: u32, quantum_us: u32) -> Self {
        Self {
            retries,
            quantum_us,
        }
    }

    /// Worst-case time spent sleeping, in microseconds.
    #[must_use]
    pub const fn worst_case_us(&self) -> u64 {
        self.retries as u64 * self.quantum_us as u64
    }
}
