//! PCI identifiers and configuration-space layout.

use std::fmt;

// ── Vendor IDs ───────────────────────────────────────────────────────────────

/// Intel.
pub const VENDOR_INTEL: u16 = 0x8086;
/// AMD.
pub const VENDOR_AMD: u16 = 0x1022;
/// ATI (pre-merger southbridges).
pub const VENDOR_ATI: u16 = 0x1002;
/// Hygon (licensed Zen, same FCH as AMD).
pub const VENDOR_HYGON: u16 = 0x1D94;
/// VIA Technologies.
pub const VENDOR_VIA: u16 = 0x1106;
/// Broadcom ServerWorks.
pub const VENDOR_SERVERWORKS: u16 = 0x1166;
/// EFAR Microsystems.
pub const VENDOR_EFAR: u16 = 0x1055;

// ── Standard config-space header ─────────────────────────────────────────────

/// Vendor ID (16-bit).
pub const CFG_VENDOR_ID: u8 = 0x00;
/// Device ID (16-bit).
pub const CFG_DEVICE_ID: u8 = 0x02;
/// Command register (16-bit).
pub const CFG_COMMAND: u8 = 0x04;
/// Revision ID (8-bit).
pub const CFG_REVISION: u8 = 0x08;

/// Command register: I/O space decoding enabled.
pub const COMMAND_IO_SPACE: u16 = 1 << 0;

/// What an absent function returns for its vendor/device dword.
pub const ABSENT: u32 = 0xFFFF_FFFF;

/// Bus/device/function address of a PCI function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bdf {
    /// Bus number.
    pub bus: u8,
    /// Device number (0..32).
    pub device: u8,
    /// Function number (0..8).
    pub function: u8,
}

impl Bdf {
    /// Build an address.
    #[must_use]
    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        Self {
            bus,
            device,
            function,
        }
    }

    /// Linux sysfs name in domain 0 (`0000:00:1f.3`).
    #[must_use]
    pub fn sysfs_name(&self) -> String {
        format!("0000:{self}")
    }
}

impl fmt::Display for Bdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}.{:x}",
            self.bus, self.device, self.function
        )
    }
}

/// Identity of a PCI function as read from its config header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciIdentity {
    /// Where it lives.
    pub bdf: Bdf,
    /// Vendor ID.
    pub vendor_id: u16,
    /// Device ID.
    pub device_id: u16,
    /// Revision ID.
    pub revision: u8,
}

/// Split a config dword 0 into `(vendor, device)`.
#[must_use]
pub const fn split_id(dword: u32) -> (u16, u16) {
    ((dword & 0xFFFF) as u16, (dword >> 16) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bdf_formats_like_lspci() {
        let bdf = Bdf::new(0, 0x1F, 3);
        assert_eq!(bdf.to_string(), "00:1f.3");
        assert_eq!(bdf.sysfs_name(), "0000:00:1f.3");
    }

    #[test]
    fn id_dword_splits_vendor_low() {
        assert_eq!(split_id(0x7AA3_8086), (VENDOR_INTEL, 0x7AA3));
    }
}
