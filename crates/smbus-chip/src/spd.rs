//! Memory-module addressing on the SMBus.
//!
//! ```text
//! 0x18..0x1F  DDR3/DDR4 thermal sensor (TSOD), one per slot
//! 0x36/0x37   DDR4 EE1004 page-select (SPA0/SPA1), bus-wide
//! 0x50..0x57  SPD EEPROM (DDR3/DDR4) or SPD5 hub (DDR5), one per slot
//! ```

/// Number of module slots addressable on one SMBus segment.
pub const SLOT_COUNT: u8 = 8;

/// First SPD/hub slave address; slot N lives at `SPD_BASE | N`.
pub const SPD_BASE: u8 = 0x50;
/// First thermal-sensor slave address; slot N lives at `TS_BASE | N`.
pub const TS_BASE: u8 = 0x18;

/// SPD byte holding the memory-type code, identical across generations.
pub const MEMORY_TYPE_OFFSET: u8 = 2;

/// Memory-type codes (SPD byte 2).
pub mod memory_type {
    /// SDR SDRAM.
    pub const SDR: u8 = 0x04;
    /// DDR SDRAM.
    pub const DDR: u8 = 0x07;
    /// DDR2 SDRAM.
    pub const DDR2: u8 = 0x08;
    /// DDR3 SDRAM.
    pub const DDR3: u8 = 0x0B;
    /// DDR4 SDRAM.
    pub const DDR4: u8 = 0x0C;
    /// DDR4E SDRAM.
    pub const DDR4E: u8 = 0x0E;
    /// LPDDR3.
    pub const LPDDR3: u8 = 0x0F;
    /// LPDDR4.
    pub const LPDDR4: u8 = 0x10;
    /// LPDDR4X.
    pub const LPDDR4X: u8 = 0x11;
    /// DDR5 SDRAM.
    pub const DDR5: u8 = 0x12;
    /// LPDDR5.
    pub const LPDDR5: u8 = 0x13;
    /// DDR5 NVDIMM-P.
    pub const DDR5_NVDIMM_P: u8 = 0x14;
    /// LPDDR5X.
    pub const LPDDR5X: u8 = 0x15;

    /// Codes served by an EE1004 (two 256-byte pages).
    #[must_use]
    pub const fn is_ddr4_family(code: u8) -> bool {
        matches!(code, DDR4 | DDR4E | LPDDR4 | LPDDR4X)
    }

    /// Codes served by an SPD5 hub.
    #[must_use]
    pub const fn is_ddr5_family(code: u8) -> bool {
        matches!(code, DDR5 | LPDDR5 | DDR5_NVDIMM_P | LPDDR5X)
    }

    /// Codes served by a flat 256-byte EEPROM.
    #[must_use]
    pub const fn is_legacy_family(code: u8) -> bool {
        matches!(code, SDR | DDR | DDR2 | DDR3 | LPDDR3)
    }
}

// ── DDR3 ─────────────────────────────────────────────────────────────────────

/// DDR3 SPD size.
pub const DDR3_SIZE: u16 = 256;
/// DDR3 byte advertising the thermal sensor.
pub const DDR3_THERMAL_BYTE: u16 = 32;
/// Thermal-sensor-present bit.
pub const DDR3_THERMAL_BIT: u8 = 1 << 7;

// ── DDR4 (EE1004) ────────────────────────────────────────────────────────────

/// DDR4 SPD size.
pub const DDR4_SIZE: u16 = 512;
/// DDR4 page size.
pub const DDR4_PAGE_SIZE: u16 = 256;
/// Set page 0 (SPA0). Page 1 is `DDR4_SPA0 + 1`.
pub const DDR4_SPA0: u8 = 0x36;
/// Set page 1 (SPA1).
pub const DDR4_SPA1: u8 = 0x37;
/// DDR4 byte advertising the thermal sensor.
pub const DDR4_THERMAL_BYTE: u16 = 14;
/// Thermal-sensor-present bit.
pub const DDR4_THERMAL_BIT: u8 = 1 << 7;

// ── DDR5 (SPD5 hub, JESD300-5) ───────────────────────────────────────────────

/// DDR5 SPD size.
pub const DDR5_SIZE: u16 = 1024;
/// DDR5 page size in legacy one-byte addressing.
pub const DDR5_PAGE_SIZE: u16 = 128;
/// Number of DDR5 pages.
pub const DDR5_PAGES: u8 = 8;
/// Command bit selecting NVM memory instead of the management registers.
pub const DDR5_MEM_SPACE: u8 = 0x80;

/// SPD5 hub management registers.
pub mod mr {
    /// Device type MSB.
    pub const DEVICE_TYPE_MSB: u8 = 0x00;
    /// Device type LSB.
    pub const DEVICE_TYPE_LSB: u8 = 0x01;
    /// Device capability.
    pub const CAPABILITY: u8 = 0x05;
    /// I2C legacy-mode device configuration (page pointer in bits 2:0).
    pub const LEGACY_CONFIG: u8 = 0x0B;
    /// Thermal sensor configuration.
    pub const TS_CONFIG: u8 = 0x1A;
    /// Thermal sensor reading, low byte (high byte at 0x32).
    pub const TS_TEMP: u8 = 0x31;

    /// MR0 of every SPD5 hub.
    pub const HUB_DEVICE_TYPE: u8 = 0x51;
    /// MR1: hub with integrated thermal sensor (SPD5118).
    pub const HUB_WITH_TS: u8 = 0x18;
    /// MR1: hub without thermal sensor (SPD5108).
    pub const HUB_WITHOUT_TS: u8 = 0x08;
    /// MR5: thermal sensor supported.
    pub const CAP_TS_SUPPORT: u8 = 1 << 1;
    /// MR11: page pointer mask.
    pub const LEGACY_PAGE_MASK: u8 = 0x07;
    /// MR26: thermal sensor disabled.
    pub const TS_DISABLE: u8 = 1 << 0;
}

// ── Thermal sensor (TSE2004av) ───────────────────────────────────────────────

/// Thermal sensor registers.
pub mod ts {
    /// Capability register.
    pub const CAPABILITY: u8 = 0x00;
    /// Configuration register.
    pub const CONFIG: u8 = 0x01;
    /// Ambient temperature register (16-bit, MSB first on the wire).
    pub const TEMPERATURE: u8 = 0x05;
    /// Manufacturer ID.
    pub const MANUFACTURER: u8 = 0x06;
    /// Device ID / revision.
    pub const DEVICE_ID: u8 = 0x07;
}

/// Mask keeping the 13-bit two's-complement reading.
pub const TEMP_MASK: u16 = 0x1FFF;
/// Sign bit of the reading.
pub const TEMP_SIGN: u16 = 0x1000;
/// Magnitude bits of the reading.
pub const TEMP_MAGNITUDE: u16 = 0x0FFF;
/// Degrees Celsius per LSB.
pub const TEMP_RESOLUTION: f32 = 0.0625;
/// Offset applied to negative readings.
pub const TEMP_NEGATIVE_OFFSET: f32 = 256.0;

/// SPD slave address of a slot.
#[must_use]
pub const fn spd_address(slot: u8) -> u8 {
    SPD_BASE | (slot & 7)
}

/// Thermal-sensor slave address of a slot.
#[must_use]
pub const fn ts_address(slot: u8) -> u8 {
    TS_BASE | (slot & 7)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_addresses() {
        assert_eq!(spd_address(0), 0x50);
        assert_eq!(spd_address(7), 0x57);
        assert_eq!(ts_address(3), 0x1B);
        assert_eq!(ts_address(11), 0x1B);
    }

    #[test]
    fn family_classification_is_disjoint() {
        for code in 0..=u8::MAX {
            let hits = [
                memory_type::is_ddr4_family(code),
                memory_type::is_ddr5_family(code),
                memory_type::is_legacy_family(code),
            ]
            .iter()
            .filter(|hit| **hit)
            .count();
            assert!(hits <= 1, "code {code:#04x} in {hits} families");
        }
    }

    #[test]
    fn sizes_match_page_geometry() {
        assert_eq!(DDR4_SIZE, 2 * DDR4_PAGE_SIZE);
        assert_eq!(DDR5_SIZE, u16::from(DDR5_PAGES) * DDR5_PAGE_SIZE);
    }
}
