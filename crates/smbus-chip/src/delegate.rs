//! Delegated-execution transport: a pre-loaded kernel routine performs the
//! whole transaction. The caller passes a fixed array of 64-bit words and
//! receives a fixed array back.
//!
//! ```text
//! identity   in:  []
//!            out: [vendor | device << 16, revision, io_base]
//! xfer       in:  [slave, read, command, protocol, d0, d1, d2, d3, d4]
//!            out: [d0, d1, d2, d3, d4]
//! port_sel   in:  [port]
//!            out: [previous_port]
//! ```
//!
//! `d0..d4` carry a 40-byte little-endian buffer: byte 0 is the data byte,
//! the low byte of a word, or the block length; bytes 1..=32 are block data
//! (byte 1 is also the high byte of a word).

/// I801 identity routine.
pub const I801_IDENTITY: &str = "i801.ioctl_identity";
/// I801 transaction routine.
pub const I801_XFER: &str = "i801.ioctl_smbus_xfer";
/// PIIX4 identity routine.
pub const PIIX4_IDENTITY: &str = "piix4.ioctl_identity";
/// PIIX4 transaction routine.
pub const PIIX4_XFER: &str = "piix4.ioctl_smbus_xfer";
/// PIIX4 SB800 port-select routine.
pub const PIIX4_PORT_SEL: &str = "piix4.ioctl_port_sel";

/// Words returned by an identity routine.
pub const IDENTITY_WORDS: usize = 3;
/// Words in the data buffer.
pub const DATA_WORDS: usize = 5;
/// Words passed to a transaction routine.
pub const XFER_IN_WORDS: usize = 4 + DATA_WORDS;
/// Bytes in the data buffer.
pub const DATA_BYTES: usize = DATA_WORDS * 8;

/// Protocol codes on the wire (SMBus "size" numbering).
pub mod protocol {
    /// Quick.
    pub const QUICK: u64 = 0;
    /// Byte.
    pub const BYTE: u64 = 1;
    /// Byte data.
    pub const BYTE_DATA: u64 = 2;
    /// Word data.
    pub const WORD_DATA: u64 = 3;
    /// Process call.
    pub const PROC_CALL: u64 = 4;
    /// Block data.
    pub const BLOCK_DATA: u64 = 5;
    /// Block process call.
    pub const BLOCK_PROC_CALL: u64 = 7;
}
