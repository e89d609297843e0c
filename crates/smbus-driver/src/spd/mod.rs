//! SPD/DIMM decode layer
//!
//! Per-generation address arithmetic and sensor locations. The bus work
//! (probing, page selection, retries) lives on [`crate::BusSession`]; this
//! module only says *where* a logical byte or a temperature lives.
//!
//! | Generation | Size | Paging | Sensor |
//! |------------|------|--------|--------|
//! | DDR3 (and older flat EEPROMs) | 256 | none | TSOD at `0x18 \| slot`, gated by byte 32 bit 7 |
//! | DDR4 | 512 | 2 × 256, bus-wide latch at 0x36/0x37 | TSOD at `0x18 \| slot`, gated by byte 14 bit 7 |
//! | DDR5 | 1024 | 8 × 128, MR11 on the hub | in the hub, gated by MR5 bit 1 |

pub mod ddr4;
pub mod ddr5;
pub mod thermal;

use crate::error::{Result, SmbusError};
use smbus_chip::spd::{memory_type, DDR3_SIZE, DDR4_SIZE, DDR5_SIZE};
use std::fmt;
use std::ops::RangeInclusive;

pub use thermal::{decode_temperature, ThermalSensor};

/// DDR3 identity, timings and manufacturing block
const DDR3_COMPACT_RANGES: &[RangeInclusive<u16>] = &[0x00..=0x3C, 0x75..=0x94];

/// Addressing scheme of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    /// Flat 256-byte EEPROM (DDR3 and older)
    Ddr3,
    /// Two-page EE1004
    Ddr4,
    /// SPD5 hub
    Ddr5,
}

impl Generation {
    /// Bytes in the module's logical address space
    pub const fn size(self) -> u16 {
        match self {
            Self::Ddr3 => DDR3_SIZE,
            Self::Ddr4 => DDR4_SIZE,
            Self::Ddr5 => DDR5_SIZE,
        }
    }

    /// Generation serving a memory-type code, if any
    pub const fn from_memory_type(code: u8) -> Option<Self> {
        if memory_type::is_ddr5_family(code) {
            Some(Self::Ddr5)
        } else if memory_type::is_ddr4_family(code) {
            Some(Self::Ddr4)
        } else if memory_type::is_legacy_family(code) {
            Some(Self::Ddr3)
        } else {
            None
        }
    }

    /// Split a logical address into page and wire offset
    ///
    /// # Errors
    ///
    /// Returns `SmbusError::Param` if `address` is outside the module.
    pub fn locate(self, address: u16) -> Result<SpdAddress> {
        match self {
            Self::Ddr3 => {
                let offset = u8::try_from(address).map_err(|_| {
                    SmbusError::param(format!("DDR3 address {address:#05x} out of range"))
                })?;
                Ok(SpdAddress { page: 0, offset })
            }
            Self::Ddr4 => ddr4::locate(address),
            Self::Ddr5 => ddr5::locate(address),
        }
    }

    /// Whether reads go through a page selection
    pub const fn is_paged(self) -> bool {
        !matches!(self, Self::Ddr3)
    }

    /// Address ranges covered by a compact dump
    pub const fn compact_ranges(self) -> &'static [RangeInclusive<u16>] {
        match self {
            Self::Ddr3 => DDR3_COMPACT_RANGES,
            Self::Ddr4 => ddr4::COMPACT_RANGES,
            Self::Ddr5 => ddr5::COMPACT_RANGES,
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ddr3 => write!(f, "DDR3"),
            Self::Ddr4 => write!(f, "DDR4"),
            Self::Ddr5 => write!(f, "DDR5"),
        }
    }
}

/// A logical SPD address resolved for the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpdAddress {
    /// Page to select first (always 0 for DDR3)
    pub page: u8,
    /// Command byte of the read
    pub offset: u8,
}

/// Result of a bulk SPD read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpdDump {
    /// Module slot
    pub slot: u8,
    /// Generation the module was read as
    pub generation: Generation,
    /// `(logical address, byte)` in ascending address order
    pub entries: Vec<(u16, u8)>,
}

impl SpdDump {
    /// Byte at `address`, if it was read
    pub fn get(&self, address: u16) -> Option<u8> {
        self.entries
            .binary_search_by_key(&address, |(a, _)| *a)
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// Full-size image; addresses not read are 0xFF
    pub fn to_image(&self) -> Vec<u8> {
        let mut image = vec![0xFF; usize::from(self.generation.size())];
        for (address, byte) in &self.entries {
            if let Some(slot) = image.get_mut(usize::from(*address)) {
                *slot = *byte;
            }
        }
        image
    }

    /// Number of bytes read
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was read
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
