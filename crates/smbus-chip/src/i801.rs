//! Intel ICH/PCH SMBus host controller ("i801").
//!
//! The controller lives at function 3 (older ICH) or 4 (some PCH SKUs) of
//! device 0x1F on bus 0. Its I/O window is BAR4.
//!
//! ```text
//! base+0x00  HSTSTS   host status (write-1-to-clear)
//! base+0x02  HSTCNT   host control (reading resets the block index)
//! base+0x03  HSTCMD   command / offset byte
//! base+0x04  HSTADD   slave address << 1 | read
//! base+0x05  HSTDAT0  data 0 / block count
//! base+0x06  HSTDAT1  data 1
//! base+0x07  BLKDAT   block data (32-byte FIFO when E32B is set)
//! base+0x08  PEC      packet error check byte
//! base+0x0C  AUXSTS   auxiliary status
//! base+0x0D  AUXCTL   auxiliary control
//! ```

use crate::pci::Bdf;
use crate::PollBudget;

// ── PCI configuration ────────────────────────────────────────────────────────

/// Usual location on ICH parts.
pub const LOCATION_ICH: Bdf = Bdf::new(0, 0x1F, 3);
/// Location on PCH parts that moved SMBus to function 4.
pub const LOCATION_PCH_F4: Bdf = Bdf::new(0, 0x1F, 4);

/// BAR4: SMBus I/O base (bit 0 is the I/O-space indicator).
pub const CFG_SMBBAR: u8 = 0x20;
/// Host configuration register.
pub const CFG_HOSTC: u8 = 0x40;

/// Mask applied to BAR4 to obtain the I/O base.
pub const SMBBAR_MASK: u32 = 0xFFE0;

/// HOSTC bits.
pub mod hostc {
    /// Host controller enable.
    pub const HST_EN: u8 = 1 << 0;
    /// Route interrupts to SMI#.
    pub const SMI_EN: u8 = 1 << 1;
    /// I2C mode (we always run in SMBus mode).
    pub const I2C_EN: u8 = 1 << 2;
    /// SPD write disable: SPD EEPROM range is write-protected.
    pub const SPD_WD: u8 = 1 << 4;
}

// ── I/O registers ────────────────────────────────────────────────────────────

/// Host status.
pub const HSTSTS: u16 = 0x00;
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
/// Packet error check.
pub const PEC: u16 = 0x08;
/// Auxiliary status.
pub const AUXSTS: u16 = 0x0C;
/// Auxiliary control.
pub const AUXCTL: u16 = 0x0D;

/// Host status bits.
pub mod status {
    /// A transaction is in progress.
    pub const HOST_BUSY: u8 = 1 << 0;
    /// Completion interrupt.
    pub const INTR: u8 = 1 << 1;
    /// Device error (NAK, timeout, unsupported command).
    pub const DEV_ERR: u8 = 1 << 2;
    /// Bus error (lost arbitration).
    pub const BUS_ERR: u8 = 1 << 3;
    /// Transaction failed (killed).
    pub const FAILED: u8 = 1 << 4;
    /// SMBALERT# asserted.
    pub const SMBALERT: u8 = 1 << 5;
    /// Hardware in-use semaphore. Reading HSTSTS sets it; writing 1 releases it.
    pub const INUSE_STS: u8 = 1 << 6;
    /// Byte done (byte-by-byte block mode).
    pub const BYTE_DONE: u8 = 1 << 7;

    /// Error flags.
    pub const ERROR_FLAGS: u8 = FAILED | BUS_ERR | DEV_ERR;
    /// Every flag cleared between transactions.
    pub const STATUS_FLAGS: u8 = BYTE_DONE | INTR | FAILED | BUS_ERR | DEV_ERR;
}

/// Host control bits and transaction-kind nibble.
pub mod control {
    /// Interrupt enable.
    pub const INTREN: u8 = 1 << 0;
    /// Kill the current transaction.
    pub const KILL: u8 = 1 << 1;
    /// Last byte (byte-by-byte block read).
    pub const LAST_BYTE: u8 = 1 << 5;
    /// Start.
    pub const START: u8 = 1 << 6;
    /// Append / check PEC.
    pub const PEC_EN: u8 = 1 << 7;

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
    /// Process call.
    pub const PROC_CALL: u8 = 0x10;
    /// Block read/write.
    pub const BLOCK_DATA: u8 = 0x14;
    /// I2C block read.
    pub const I2C_BLOCK_DATA: u8 = 0x18;
    /// Block process call.
    pub const BLOCK_PROC_CALL: u8 = 0x1C;
}

/// Auxiliary control bits.
pub mod auxctl {
    /// Hardware PEC calculation.
    pub const CRC: u8 = 1 << 0;
    /// 32-byte block buffer enable.
    pub const E32B: u8 = 1 << 1;
}

/// Auxiliary status bits.
pub mod auxsts {
    /// CRC error.
    pub const CRCE: u8 = 1 << 0;
}

// ── Timing ───────────────────────────────────────────────────────────────────

/// Completion wait: 800 polls × 250 µs = 200 ms worst case.
pub const DEFAULT_POLL: PollBudget = PollBudget::new(800, 250);
/// Pause between asserting KILL and clearing the control register.
pub const KILL_DELAY_US: u32 = 1_000;

// ── Device table ─────────────────────────────────────────────────────────────

/// Capabilities granted per device ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    /// Hardware PEC.
    pub pec: bool,
    /// 32-byte block buffer (E32B).
    pub block_buffer: bool,
    /// Block process call.
    pub block_proc_call: bool,
}

impl Features {
    const NONE: Self = Self {
        pec: false,
        block_buffer: false,
        block_proc_call: false,
    };
    const ICH4: Self = Self {
        pec: true,
        block_buffer: true,
        block_proc_call: false,
    };
    const MODERN: Self = Self {
        pec: true,
        block_buffer: true,
        block_proc_call: true,
    };
}

/// One supported controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    /// PCI device ID (vendor is always Intel).
    pub device_id: u16,
    /// Marketing name.
    pub name: &'static str,
    /// Capabilities.
    pub features: Features,
}

const fn dev(device_id: u16, name: &'static str, features: Features) -> Device {
    Device {
        device_id,
        name,
        features,
    }
}

/// Known Intel SMBus controllers.
pub const DEVICES: &[Device] = &[
    dev(0x2413, "82801AA (ICH)", Features::NONE),
    dev(0x2423, "82801AB (ICH0)", Features::NONE),
    dev(0x2443, "82801BA (ICH2)", Features::NONE),
    dev(0x2483, "82801CA (ICH3)", Features::NONE),
    dev(0x24C3, "82801DB (ICH4)", Features::ICH4),
    dev(0x24D3, "82801EB (ICH5)", Features::MODERN),
    dev(0x25A4, "6300ESB", Features::MODERN),
    dev(0x266A, "82801F (ICH6)", Features::MODERN),
    dev(0x269B, "631xESB/632xESB", Features::MODERN),
    dev(0x27DA, "82801G (ICH7)", Features::MODERN),
    dev(0x283E, "82801H (ICH8)", Features::MODERN),
    dev(0x2930, "82801I (ICH9)", Features::MODERN),
    dev(0x3A30, "82801JI (ICH10)", Features::MODERN),
    dev(0x3A60, "82801JD (ICH10)", Features::MODERN),
    dev(0x3B30, "5/3400 Series (PCH)", Features::MODERN),
    dev(0x1C22, "6 Series (Cougar Point)", Features::MODERN),
    dev(0x1D22, "C600/X79 (Patsburg)", Features::MODERN),
    dev(0x1E22, "7 Series (Panther Point)", Features::MODERN),
    dev(0x8C22, "8 Series (Lynx Point)", Features::MODERN),
    dev(0x9C22, "8 Series LP (Lynx Point-LP)", Features::MODERN),
    dev(0x8CA2, "9 Series (Wildcat Point)", Features::MODERN),
    dev(0x8D22, "C610/X99 (Wellsburg)", Features::MODERN),
    dev(0xA123, "100 Series (Sunrise Point-H)", Features::MODERN),
    dev(0x9D23, "100 Series LP (Sunrise Point-LP)", Features::MODERN),
    dev(0xA1A3, "C620 (Lewisburg)", Features::MODERN),
    dev(0xA2A3, "200 Series (Union Point)", Features::MODERN),
    dev(0xA323, "300 Series (Cannon Lake-H)", Features::MODERN),
    dev(0x9DA3, "300 Series LP (Cannon Lake-LP)", Features::MODERN),
    dev(0x02A3, "400 Series LP (Comet Lake)", Features::MODERN),
    dev(0x06A3, "400 Series (Comet Lake-H)", Features::MODERN),
    dev(0x34A3, "495 Series (Ice Lake-LP)", Features::MODERN),
    dev(0xA0A3, "500 Series LP (Tiger Lake-LP)", Features::MODERN),
    dev(0x43A3, "500 Series (Tiger Lake-H)", Features::MODERN),
    dev(0x4DA3, "Jasper Lake", Features::MODERN),
    dev(0x7AA3, "600 Series (Alder Lake-S)", Features::MODERN),
    dev(0x51A3, "600 Series (Alder Lake-P)", Features::MODERN),
    dev(0x54A3, "600 Series (Alder Lake-M)", Features::MODERN),
    dev(0x7A23, "700 Series (Raptor Lake-S)", Features::MODERN),
    dev(0x7E22, "Meteor Lake-P", Features::MODERN),
];

/// Look up a device ID.
#[must_use]
pub fn lookup(device_id: u16) -> Option<&'static Device> {
    DEVICES.iter().find(|d| d.device_id == device_id)
}
