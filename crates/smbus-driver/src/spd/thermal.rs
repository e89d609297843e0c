//! On-module temperature sensors
//!
//! DDR3 and DDR4 modules carry a JEDEC TSE2004 at `0x18 | slot`; its
//! temperature register travels MSB first. DDR5 hubs expose the same 13-bit
//! reading through MR49/MR50 on the hub's own address, LSB first.

use super::Generation;
use crate::protocol::Transaction;
use smbus_chip::spd::{
    self, mr, ts, TEMP_MAGNITUDE, TEMP_MASK, TEMP_NEGATIVE_OFFSET, TEMP_RESOLUTION, TEMP_SIGN,
};

/// Where a slot's sensor lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermalSensor {
    /// Discrete TSE2004 on its own address
    Tsod {
        /// Sensor slave address
        slave: u8,
    },
    /// Sensor integrated in the SPD5 hub
    Hub {
        /// Hub slave address
        slave: u8,
    },
}

impl ThermalSensor {
    /// Sensor location for a module of `generation` in `slot`
    pub const fn for_slot(generation: Generation, slot: u8) -> Self {
        match generation {
            Generation::Ddr3 | Generation::Ddr4 => Self::Tsod {
                slave: spd::ts_address(slot),
            },
            Generation::Ddr5 => Self::Hub {
                slave: spd::spd_address(slot),
            },
        }
    }

    /// Slave address the reading comes from
    pub const fn slave(self) -> u8 {
        match self {
            Self::Tsod { slave } | Self::Hub { slave } => slave,
        }
    }

    /// Word read that fetches the raw temperature
    pub const fn read_transaction(self) -> Transaction {
        match self {
            Self::Tsod { slave } => Transaction::read_word_data(slave, ts::TEMPERATURE),
            Self::Hub { slave } => Transaction::read_word_data(slave, mr::TS_TEMP),
        }
    }

    /// Convert the word as it came off the bus into degrees Celsius
    pub fn to_celsius(self, word: u16) -> f32 {
        match self {
            Self::Tsod { .. } => decode_temperature(word.swap_bytes()),
            Self::Hub { .. } => decode_temperature(word),
        }
    }
}

/// Decode a raw 13-bit two's-complement reading (0.0625 °C per LSB)
pub fn decode_temperature(raw: u16) -> f32 {
    let raw = raw & TEMP_MASK;
    let magnitude = f32::from(raw & TEMP_MAGNITUDE) * TEMP_RESOLUTION;
    if raw & TEMP_SIGN != 0 {
        magnitude - TEMP_NEGATIVE_OFFSET
    } else {
        magnitude
    }
}
