//! SMBus transaction model
//!
//! A [`Transaction`] is built per call, validated before any hardware is
//! touched, and consumed synchronously by the active controller.

use crate::error::{Result, SmbusError};

/// Largest SMBus block payload
pub const BLOCK_MAX: usize = 32;

/// Transfer direction, from the host's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host writes to the slave
    Write,
    /// Host reads from the slave
    Read,
}

impl Direction {
    /// R/W bit appended to the slave address
    pub const fn bit(self) -> u8 {
        match self {
            Self::Write => 0,
            Self::Read => 1,
        }
    }
}

/// SMBus transaction shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Address + R/W bit only
    Quick,
    /// Send/receive one byte, no command
    Byte,
    /// Command + one data byte
    ByteData,
    /// Command + two data bytes
    WordData,
    /// Write word, read word back
    ProcCall,
    /// Command + length + up to 32 bytes
    BlockData,
    /// Write block, read block back
    BlockProcCall,
}

impl Protocol {
    /// Whether the payload is a length-prefixed block
    pub const fn is_block(self) -> bool {
        matches!(self, Self::BlockData | Self::BlockProcCall)
    }
}

/// Data carried by a transaction or returned from it
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Payload {
    /// Nothing
    #[default]
    None,
    /// One byte
    Byte(u8),
    /// Two bytes, little-endian on the wire
    Word(u16),
    /// Block bytes (length is implicit)
    Block(Vec<u8>),
}

impl Payload {
    /// Byte value, if this is a byte payload
    pub const fn as_byte(&self) -> Option<u8> {
        match self {
            Self::Byte(b) => Some(*b),
            _ => None,
        }
    }

    /// Word value, if this is a word payload
    pub const fn as_word(&self) -> Option<u16> {
        match self {
            Self::Word(w) => Some(*w),
            _ => None,
        }
    }

    /// Block bytes, if this is a block payload
    pub fn as_block(&self) -> Option<&[u8]> {
        match self {
            Self::Block(b) => Some(b),
            _ => None,
        }
    }
}

/// One bus operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// 7-bit slave address
    pub slave: u8,
    /// Direction
    pub direction: Direction,
    /// Command/offset byte (ignored by Quick and by Byte reads)
    pub command: u8,
    /// Shape
    pub protocol: Protocol,
    /// Outgoing data
    pub payload: Payload,
    /// Request hardware packet error checking
    pub pec: bool,
}

impl Transaction {
    /// Build a transaction from its parts
    pub const fn new(
        slave: u8,
        direction: Direction,
        command: u8,
        protocol: Protocol,
        payload: Payload,
    ) -> Self {
        Self {
            slave,
            direction,
            command,
            protocol,
            payload,
            pec: false,
        }
    }

    /// Quick command
    pub const fn quick(slave: u8, direction: Direction) -> Self {
        Self::new(slave, direction, 0, Protocol::Quick, Payload::None)
    }

    /// Receive byte
    pub const fn read_byte(slave: u8) -> Self {
        Self::new(slave, Direction::Read, 0, Protocol::Byte, Payload::None)
    }

    /// Send byte (the byte travels in the command slot)
    pub const fn write_byte(slave: u8, value: u8) -> Self {
        Self::new(slave, Direction::Write, value, Protocol::Byte, Payload::None)
    }

    /// Read byte data
    pub const fn read_byte_data(slave: u8, command: u8) -> Self {
        Self::new(slave, Direction::Read, command, Protocol::ByteData, Payload::None)
    }

    /// Write byte data
    pub const fn write_byte_data(slave: u8, command: u8, value: u8) -> Self {
        Self::new(
            slave,
            Direction::Write,
            command,
            Protocol::ByteData,
            Payload::Byte(value),
        )
    }

    /// Read word data
    pub const fn read_word_data(slave: u8, command: u8) -> Self {
        Self::new(slave, Direction::Read, command, Protocol::WordData, Payload::None)
    }

    /// Write word data
    pub const fn write_word_data(slave: u8, command: u8, value: u16) -> Self {
        Self::new(
            slave,
            Direction::Write,
            command,
            Protocol::WordData,
            Payload::Word(value),
        )
    }

    /// Process call
    pub const fn proc_call(slave: u8, command: u8, value: u16) -> Self {
        Self::new(
            slave,
            Direction::Write,
            command,
            Protocol::ProcCall,
            Payload::Word(value),
        )
    }

    /// Block read
    pub const fn read_block(slave: u8, command: u8) -> Self {
        Self::new(slave, Direction::Read, command, Protocol::BlockData, Payload::None)
    }

    /// Block write
    pub fn write_block(slave: u8, command: u8, data: Vec<u8>) -> Self {
        Self::new(
            slave,
            Direction::Write,
            command,
            Protocol::BlockData,
            Payload::Block(data),
        )
    }

    /// Block process call
    pub fn block_proc_call(slave: u8, command: u8, data: Vec<u8>) -> Self {
        Self::new(
            slave,
            Direction::Write,
            command,
            Protocol::BlockProcCall,
            Payload::Block(data),
        )
    }

    /// Request PEC
    #[must_use]
    pub fn with_pec(mut self) -> Self {
        self.pec = true;
        self
    }

    /// Whether the host reads data back
    pub const fn reads_back(&self) -> bool {
        matches!(self.direction, Direction::Read)
            || matches!(self.protocol, Protocol::ProcCall | Protocol::BlockProcCall)
    }

    /// Check shape and bounds before touching hardware
    ///
    /// # Errors
    ///
    /// Returns `SmbusError::Param` when the slave address is not 7-bit, the
    /// payload does not match the protocol, or a block is not 1..=32 bytes.
    pub fn validate(&self) -> Result<()> {
        if self.slave > 0x7F {
            return Err(SmbusError::param(format!(
                "slave address {:#04x} is not 7-bit",
                self.slave
            )));
        }

        let write = self.direction == Direction::Write;
        match (self.protocol, &self.payload) {
            (Protocol::Quick | Protocol::Byte, Payload::None) => Ok(()),
            (Protocol::ByteData, Payload::Byte(_)) if write => Ok(()),
            (Protocol::ByteData | Protocol::WordData | Protocol::BlockData, Payload::None)
                if !write =>
            {
                Ok(())
            }
            (Protocol::WordData, Payload::Word(_)) if write => Ok(()),
            (Protocol::ProcCall, Payload::Word(_)) if write => Ok(()),
            (Protocol::BlockData | Protocol::BlockProcCall, Payload::Block(data)) if write => {
                if data.is_empty() || data.len() > BLOCK_MAX {
                    Err(SmbusError::param(format!(
                        "block length {} outside 1..={BLOCK_MAX}",
                        data.len()
                    )))
                } else {
                    Ok(())
                }
            }
            (protocol, payload) => Err(SmbusError::param(format!(
                "{protocol:?} {:?} cannot carry {payload:?}",
                self.direction
            ))),
        }
    }
}

/// Validate a block length read back from hardware
///
/// # Errors
///
/// Returns `SmbusError::Param` if `len` is outside 1..=32.
pub fn check_block_len(len: u8) -> Result<usize> {
    let len = usize::from(len);
    if (1..=BLOCK_MAX).contains(&len) {
        Ok(len)
    } else {
        Err(SmbusError::param(format!(
            "device returned block length {len} outside 1..={BLOCK_MAX}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_bounds() {
        assert!(Transaction::write_block(0x50, 0, vec![]).validate().is_err());
        assert!(Transaction::write_block(0x50, 0, vec![0; 33]).validate().is_err());
        assert!(Transaction::write_block(0x50, 0, vec![0; 1]).validate().is_ok());
        assert!(Transaction::write_block(0x50, 0, vec![0; 32]).validate().is_ok());
        assert!(Transaction::block_proc_call(0x50, 0, vec![]).validate().is_err());
    }

    #[test]
    fn shape_mismatch_is_param_error() {
        let tx = Transaction::new(0x50, Direction::Read, 0, Protocol::ByteData, Payload::Byte(1));
        assert!(matches!(tx.validate(), Err(SmbusError::Param { .. })));
        let tx = Transaction::new(0x50, Direction::Read, 0, Protocol::ProcCall, Payload::None);
        assert!(tx.validate().is_err());
        assert!(Transaction::quick(0x80, Direction::Write).validate().is_err());
    }

    #[test]
    fn reads_back() {
        assert!(Transaction::read_byte_data(0x50, 2).reads_back());
        assert!(Transaction::proc_call(0x50, 2, 7).reads_back());
        assert!(!Transaction::write_byte_data(0x50, 2, 7).reads_back());
    }

    #[test]
    fn hardware_block_length() {
        assert!(check_block_len(0).is_err());
        assert_eq!(check_block_len(32).unwrap(), 32);
        assert!(check_block_len(33).is_err());
    }
}
