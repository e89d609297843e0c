//! DDR4 EE1004 addressing
//!
//! 512 bytes in two 256-byte pages. The page is latched bus-wide by a write
//! to SPA0 (0x36) or SPA1 (0x37); every EE1004 on the segment follows it.

use super::SpdAddress;
use crate::error::{Result, SmbusError};
use smbus_chip::spd::{DDR4_PAGE_SIZE, DDR4_SIZE, DDR4_SPA0};
use std::ops::RangeInclusive;

/// Identity, timings and the manufacturing block
pub const COMPACT_RANGES: &[RangeInclusive<u16>] = &[0x000..=0x07F, 0x140..=0x15F];

/// Page holding logical address `address`
#[allow(clippy::cast_possible_truncation)]
pub const fn address_to_page(address: u16) -> u8 {
    (address / DDR4_PAGE_SIZE) as u8
}

/// Offset inside the page
#[allow(clippy::cast_possible_truncation)]
pub const fn address_to_offset(address: u16) -> u8 {
    (address % DDR4_PAGE_SIZE) as u8
}

/// Slave address whose write latches `page`
pub const fn page_select_slave(page: u8) -> u8 {
    DDR4_SPA0 + page
}

/// Split a logical address
///
/// # Errors
///
/// Returns `SmbusError::Param` for addresses past the end of the EE1004.
pub fn locate(address: u16) -> Result<SpdAddress> {
    if address >= DDR4_SIZE {
        return Err(SmbusError::param(format!(
            "DDR4 address {address:#05x} out of range"
        )));
    }
    Ok(SpdAddress {
        page: address_to_page(address),
        offset: address_to_offset(address),
    })
}
