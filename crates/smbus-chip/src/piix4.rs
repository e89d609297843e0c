//! PIIX4-compatible SMBus host controllers: Intel PIIX4, EFAR, ServerWorks,
//! ATI/AMD/Hygon southbridges and FCHs, and VIA south bridges.
//!
//! Legacy parts expose the I/O base in PCI config space. "SB800-class" parts
//! (ATI SBx00 rev ≥ 0x40 and every AMD/Hygon FCH) hide it in the power
//! management register block, reached through the index/data pair at
//! `0xCD6/0xCD7` or, on the newest FCH revisions, a memory-mapped window.
//!
//! ```text
//! base+0x00  HSTSTS   host status (write-1-to-clear)
//! base+0x01  SLVSTS   slave status
//! base+0x02  HSTCNT   host control (reading resets the block index)
//! base+0x03  HSTCMD   command / offset byte
//! base+0x04  HSTADD   slave address << 1 | read
//! base+0x05  HSTDAT0  data 0 / block count
//! base+0x06  HSTDAT1  data 1
//! base+0x07  BLKDAT   block data
//! base+0x08  SLVCNT   slave control (SB800 host semaphore)
//! ```

use crate::pci::{
    Bdf, VENDOR_AMD, VENDOR_ATI, VENDOR_EFAR, VENDOR_HYGON, VENDOR_INTEL, VENDOR_SERVERWORKS,
    VENDOR_VIA,
};
use crate::PollBudget;

// ── PCI configuration (legacy path) ──────────────────────────────────────────

/// SMBus base address register on most parts.
pub const CFG_SMBBA: u8 = 0x90;
/// SMBus base address register on VIA VT8231 and later.
pub const CFG_SMBBA_VIA: u8 = 0xD0;
/// Host configuration register.
pub const CFG_HSTCFG: u8 = 0xD2;
/// Mask applied to the base register.
pub const SMBBA_MASK: u16 = 0xFFF0;

/// HSTCFG bits.
pub mod hstcfg {
    /// Host controller enable.
    pub const HST_EN: u8 = 1 << 0;
}

// ── I/O registers ────────────────────────────────────────────────────────────

/// Host status.
pub const HSTSTS: u16 = 0x00;
/// Slave status.
pub const SLVSTS: u16 = 0x01;
/// Host control.
pub const HSTCNT: u16 = 0x02;
/// Host command.
pub const HSTCMD: u16 = 0x03;
/// Transmit slave address.
pub const HSTADD: u16 = 0x04;
/// Data 0.
pub const HSTDAT0: u16 = 0x05;
/// Data 1.
pub const HSTDAT1: u16 = 0x06;
/// Block data.
pub const BLKDAT: u16 = 0x07;
/// Slave control.
pub const SLVCNT: u16 = 0x08;

/// Host status bits.
pub mod status {
    /// Transaction in progress.
    pub const HOST_BUSY: u8 = 1 << 0;
    /// Completion interrupt.
    pub const INTR: u8 = 1 << 1;
    /// Device error (NAK).
    pub const DEV_ERR: u8 = 1 << 2;
    /// Bus collision.
    pub const BUS_COLL: u8 = 1 << 3;
    /// Failed transaction.
    pub const FAILED: u8 = 1 << 4;

    /// Error flags.
    pub const ERROR_FLAGS: u8 = DEV_ERR | BUS_COLL | FAILED;
}

/// Host control bits and transaction kinds.
pub mod control {
    /// Kill.
    pub const KILL: u8 = 1 << 1;
    /// Start.
    pub const START: u8 = 1 << 6;

    /// Transaction-kind field mask.
    pub const KIND_MASK: u8 = 0x1C;

    /// Quick command.
    pub const QUICK: u8 = 0x00;
    /// Send/receive byte.
    pub const BYTE: u8 = 0x04;
    /// Read/write byte data.
    pub const BYTE_DATA: u8 = 0x08;
    /// Read/write word data.
    pub const WORD_DATA: u8 = 0x0C;
    /// Block read/write.
    pub const BLOCK_DATA: u8 = 0x14;
}

/// SLVCNT semaphore bits (SB800-class).
pub mod slvcnt {
    /// Host owns the bus (write 1 to request, reads back 1 when granted).
    pub const HOST_SEMAPHORE: u8 = 1 << 4;
    /// Write 1 to release the host semaphore.
    pub const HOST_RELEASE: u8 = 1 << 5;
}

// ── SB800-class power-management block ───────────────────────────────────────

/// PM index port.
pub const SB800_PM_INDEX: u16 = 0xCD6;
/// PM data port.
pub const SB800_PM_DATA: u16 = 0xCD7;
/// Physical address of the memory-mapped PM window on newest FCH revisions.
pub const SB800_PM_MMIO: u64 = 0xFED8_0300;
/// Size of that window.
pub const SB800_PM_MMIO_SIZE: u64 = 8;

/// PM index of the enable/base pair on FCH parts that moved it to 0x00.
pub const PM_SMB_EN_FCH: u8 = 0x00;
/// PM index of the enable/base pair on SB800..Hudson parts.
pub const PM_SMB_EN_SB800: u8 = 0x2C;
/// Enable bit in the low byte when the pair is at [`PM_SMB_EN_FCH`].
pub const SMB_EN_FCH_BIT: u8 = 1 << 4;
/// Enable bit in the low byte when the pair is at [`PM_SMB_EN_SB800`].
pub const SMB_EN_SB800_BIT: u8 = 1 << 0;
/// Base mask when the pair is at [`PM_SMB_EN_SB800`].
pub const SB800_BASE_MASK: u16 = 0xFFE0;

/// Port selection registers in the PM block.
pub mod port_sel {
    /// ATI: register that says which of the two selectors is live.
    pub const SELECTOR: u8 = 0x2F;
    /// Primary selector.
    pub const PRIMARY: u8 = 0x2C;
    /// Alternate selector.
    pub const ALTERNATE: u8 = 0x2E;
    /// Selector on KERNCZ and late Hudson-2.
    pub const KERNCZ: u8 = 0x02;
    /// Field mask on SB800..Hudson.
    pub const MASK: u8 = 0x06;
    /// Field shift on SB800..Hudson.
    pub const SHIFT: u8 = 1;
    /// Field mask on KERNCZ.
    pub const MASK_KERNCZ: u8 = 0x18;
    /// Field shift on KERNCZ.
    pub const SHIFT_KERNCZ: u8 = 3;
}

// ── IMC (integrated micro-controller) mailbox ────────────────────────────────

/// LPC bridge holding the IMC-active bit.
pub const IMC_LPC: Bdf = Bdf::new(0, 0x14, 3);
/// Config offset of the IMC status byte in the LPC bridge.
pub const IMC_LPC_CFG: u8 = 0x40;
/// IMC active.
pub const IMC_ACTIVE: u8 = 1 << 7;
/// IMC index port.
pub const IMC_INDEX: u16 = 0x3E;
/// IMC data port.
pub const IMC_DATA: u16 = 0x3F;
/// Mailbox registers.
pub mod imc {
    /// Command argument / acknowledgement register.
    pub const ARG: u8 = 0x82;
    /// Command register.
    pub const CMD: u8 = 0x83;
    /// Doorbell.
    pub const DOORBELL: u8 = 0x80;
    /// Doorbell value.
    pub const RING: u8 = 0x96;
    /// Enter sleep.
    pub const SLEEP: u8 = 0xB4;
    /// Wake up.
    pub const WAKE: u8 = 0xB5;
    /// Acknowledgement read back from [`ARG`].
    pub const ACK: u8 = 0xFA;
}

// ── Timing ───────────────────────────────────────────────────────────────────

/// Completion wait: 500 polls × 250 µs.
pub const DEFAULT_POLL: PollBudget = PollBudget::new(500, 250);
/// Settle time after START on ordinary parts.
pub const START_DELAY_US: u32 = 25;
/// Settle time after START on ServerWorks CSB5 (erratum).
pub const START_DELAY_CSB5_US: u32 = 2_000;
/// Host semaphore acquisition: 5 × 1 ms.
pub const SEMAPHORE_POLL: PollBudget = PollBudget::new(5, 1_000);
/// IMC acknowledgement: 500 × 1 ms.
pub const IMC_POLL: PollBudget = PollBudget::new(500, 1_000);

// ── Device table ─────────────────────────────────────────────────────────────

/// AMD Hudson-2 SMBus device ID.
pub const DEVICE_HUDSON2: u16 = 0x780B;
/// AMD KERNCZ (all Zen FCHs) SMBus device ID.
pub const DEVICE_KERNCZ: u16 = 0x790B;
/// ATI SBx00 SMBus device ID.
pub const DEVICE_ATI_SBX00: u16 = 0x4385;
/// ServerWorks CSB5.
pub const DEVICE_CSB5: u16 = 0x0201;

/// Revision at which SBx00 switched to the SB800 PM layout.
pub const SBX00_SB800_REVISION: u8 = 0x40;
/// Hudson-2 revision at which the enable pair moved to PM 0x00.
pub const HUDSON2_FCH_REVISION: u8 = 0x41;
/// Hudson-2 revision at which port selection moved to PM 0x02.
pub const HUDSON2_KERNCZ_PORT_REVISION: u8 = 0x1F;
/// KERNCZ revision at which the enable pair moved to PM 0x00.
pub const KERNCZ_FCH_REVISION: u8 = 0x49;
/// KERNCZ revision at which the PM index/data ports may be disabled.
pub const KERNCZ_MMIO_REVISION: u8 = 0x51;

/// One supported controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    /// PCI vendor ID.
    pub vendor_id: u16,
    /// PCI device ID.
    pub device_id: u16,
    /// Marketing name.
    pub name: &'static str,
}

const fn dev(vendor_id: u16, device_id: u16, name: &'static str) -> Device {
    Device {
        vendor_id,
        device_id,
        name,
    }
}

/// Known PIIX4-compatible controllers.
pub const DEVICES: &[Device] = &[
    dev(VENDOR_INTEL, 0x7113, "82371AB (PIIX4)"),
    dev(VENDOR_INTEL, 0x719B, "82443MX"),
    dev(VENDOR_EFAR, 0x9463, "SLC90E66"),
    dev(VENDOR_SERVERWORKS, 0x0200, "OSB4"),
    dev(VENDOR_SERVERWORKS, DEVICE_CSB5, "CSB5"),
    dev(VENDOR_SERVERWORKS, 0x0203, "CSB6"),
    dev(VENDOR_SERVERWORKS, 0x0205, "HT-1000"),
    dev(VENDOR_SERVERWORKS, 0x0408, "HT-1100LD"),
    dev(VENDOR_ATI, 0x4353, "IXP200"),
    dev(VENDOR_ATI, 0x4363, "IXP300"),
    dev(VENDOR_ATI, 0x4372, "IXP400"),
    dev(VENDOR_ATI, DEVICE_ATI_SBX00, "SBx00"),
    dev(VENDOR_AMD, DEVICE_HUDSON2, "Hudson-2"),
    dev(VENDOR_AMD, DEVICE_KERNCZ, "FCH (KERNCZ)"),
    dev(VENDOR_HYGON, DEVICE_KERNCZ, "Hygon FCH"),
    dev(VENDOR_VIA, 0x3050, "VT82C596"),
    dev(VENDOR_VIA, 0x3057, "VT82C686"),
    dev(VENDOR_VIA, 0x8235, "VT8231"),
    dev(VENDOR_VIA, 0x3074, "VT8233"),
    dev(VENDOR_VIA, 0x3177, "VT8235"),
    dev(VENDOR_VIA, 0x3227, "VT8237"),
    dev(VENDOR_VIA, 0x3287, "VT8251"),
];

/// Look up a vendor/device pair.
#[must_use]
pub fn lookup(vendor_id: u16, device_id: u16) -> Option<&'static Device> {
    DEVICES
        .iter()
        .find(|d| d.vendor_id == vendor_id && d.device_id == device_id)
}

/// Config offset of the legacy base register for this part.
#[must_use]
pub const fn legacy_base_register(vendor_id: u16, device_id: u16) -> u8 {
    match (vendor_id, device_id) {
        (VENDOR_VIA, 0x3050 | 0x3057) => CFG_SMBBA,
        (VENDOR_VIA, _) => CFG_SMBBA_VIA,
        _ => CFG_SMBBA,
    }
}

/// Whether the base address lives in the SB800 PM block.
#[must_use]
pub const fn is_sb800_class(vendor_id: u16, device_id: u16, revision: u8) -> bool {
    match vendor_id {
        VENDOR_ATI => device_id == DEVICE_ATI_SBX00 && revision >= SBX00_SB800_REVISION,
        VENDOR_AMD | VENDOR_HYGON => true,
        _ => false,
    }
}

/// Whether the enable/base pair sits at PM 0x00 rather than PM 0x2C.
#[must_use]
pub const fn uses_fch_enable_register(vendor_id: u16, device_id: u16, revision: u8) -> bool {
    match (vendor_id, device_id) {
        (VENDOR_AMD, DEVICE_HUDSON2) => revision >= HUDSON2_FCH_REVISION,
        (VENDOR_AMD, DEVICE_KERNCZ) => revision >= KERNCZ_FCH_REVISION,
        (VENDOR_HYGON, DEVICE_KERNCZ) => true,
        _ => false,
    }
}

/// Whether the PM block must be reached through the memory-mapped window.
#[must_use]
pub const fn uses_pm_mmio(vendor_id: u16, device_id: u16, revision: u8) -> bool {
    matches!(vendor_id, VENDOR_AMD | VENDOR_HYGON)
        && device_id == DEVICE_KERNCZ
        && revision >= KERNCZ_MMIO_REVISION
}

/// Whether port selection lives in PM 0x02 (KERNCZ and late Hudson-2).
#[must_use]
pub const fn uses_kerncz_port_select(vendor_id: u16, device_id: u16, revision: u8) -> bool {
    vendor_id != VENDOR_ATI
        && (device_id == DEVICE_KERNCZ
            || (device_id == DEVICE_HUDSON2 && revision >= HUDSON2_KERNCZ_PORT_REVISION))
}

/// SMBus ports the controller multiplexes; 1 on parts without a selector.
#[must_use]
pub const fn port_count(vendor_id: u16, device_id: u16, revision: u8) -> u8 {
    if !is_sb800_class(vendor_id, device_id, revision) {
        return 1;
    }
    if uses_kerncz_port_select(vendor_id, device_id, revision) {
        (port_sel::MASK_KERNCZ >> port_sel::SHIFT_KERNCZ) + 1
    } else {
        (port_sel::MASK >> port_sel::SHIFT) + 1
    }
}

/// Whether the part needs the CSB5 post-start delay.
#[must_use]
pub const fn needs_start_delay(vendor_id: u16, device_id: u16) -> bool {
    vendor_id == VENDOR_SERVERWORKS && device_id == DEVICE_CSB5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sb800_class_selection() {
        assert!(!is_sb800_class(VENDOR_ATI, DEVICE_ATI_SBX00, 0x3A));
        assert!(is_sb800_class(VENDOR_ATI, DEVICE_ATI_SBX00, 0x42));
        assert!(is_sb800_class(VENDOR_AMD, DEVICE_KERNCZ, 0x61));
        assert!(!is_sb800_class(VENDOR_INTEL, 0x7113, 0x02));
    }

    #[test]
    fn enable_register_moves_with_revision() {
        assert!(!uses_fch_enable_register(VENDOR_AMD, DEVICE_KERNCZ, 0x42));
        assert!(uses_fch_enable_register(VENDOR_AMD, DEVICE_KERNCZ, 0x59));
        assert!(!uses_pm_mmio(VENDOR_AMD, DEVICE_KERNCZ, 0x4A));
        assert!(uses_pm_mmio(VENDOR_AMD, DEVICE_KERNCZ, 0x61));
    }

    #[test]
    fn via_base_register() {
        assert_eq!(legacy_base_register(VENDOR_VIA, 0x3057), CFG_SMBBA);
        assert_eq!(legacy_base_register(VENDOR_VIA, 0x3227), CFG_SMBBA_VIA);
        assert_eq!(legacy_base_register(VENDOR_SERVERWORKS, DEVICE_CSB5), CFG_SMBBA);
    }

    #[test]
    fn port_counts() {
        assert_eq!(port_count(VENDOR_AMD, DEVICE_KERNCZ, 0x61), 4);
        assert_eq!(port_count(VENDOR_ATI, DEVICE_ATI_SBX00, 0x42), 4);
        assert_eq!(port_count(VENDOR_ATI, DEVICE_ATI_SBX00, 0x3A), 1);
        assert_eq!(port_count(VENDOR_SERVERWORKS, DEVICE_CSB5, 0x93), 1);
        assert!(uses_kerncz_port_select(VENDOR_AMD, DEVICE_HUDSON2, 0x42));
        assert!(!uses_kerncz_port_select(VENDOR_AMD, DEVICE_HUDSON2, 0x14));
    }

    #[test]
    fn pm_window_covers_port_selector() {
        assert!(u64::from(port_sel::KERNCZ) < SB800_PM_MMIO_SIZE);
        assert!(u64::from(PM_SMB_EN_FCH) + 1 < SB800_PM_MMIO_SIZE);
    }
}
