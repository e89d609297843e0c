//! DDR5 SPD5 hub addressing
//!
//! 1024 bytes of NVM seen through a 128-byte window. The window is chosen by
//! the page pointer in MR11 and read with bit 7 of the command set; commands
//! with bit 7 clear reach the hub's management registers instead.

use super::SpdAddress;
use crate::error::{Result, SmbusError};
use smbus_chip::spd::{DDR5_MEM_SPACE, DDR5_PAGE_SIZE, DDR5_SIZE};
use std::ops::RangeInclusive;

/// Identity, timings and the manufacturing block
pub const COMPACT_RANGES: &[RangeInclusive<u16>] = &[0x000..=0x07F, 0x200..=0x22F];

/// Page holding logical address `address`
#[allow(clippy::cast_possible_truncation)]
pub const fn address_to_page(address: u16) -> u8 {
    (address / DDR5_PAGE_SIZE) as u8
}

/// Command byte that reads `address` once its page is selected
#[allow(clippy::cast_possible_truncation)]
pub const fn address_to_offset(address: u16) -> u8 {
    DDR5_MEM_SPACE | (address % DDR5_PAGE_SIZE) as u8
}

/// Split a logical address
///
/// # Errors
///
/// Returns `SmbusError::Param` for addresses past the end of the hub NVM.
pub fn locate(address: u16) -> Result<SpdAddress> {
    if address >= DDR5_SIZE {
        return Err(SmbusError::param(format!(
            "DDR5 address {address:#05x} out of range"
        )));
    }
    Ok(SpdAddress {
        page: address_to_page(address),
        offset: address_to_offset(address),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_arithmetic_sets_memory_space_bit() {
        for a in 0..DDR5_SIZE {
            let loc = locate(a).unwrap();
            assert_eq!(u16::from(loc.page), a / 128);
            assert_eq!(loc.offset, 0x80 | (a % 128) as u8);
        }
        assert!(locate(1024).is_err());
    }
}
