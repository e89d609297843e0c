//! Delegated transport
//!
//! Packs a [`Transaction`] into the fixed word layout the kernel routines
//! expect and unpacks their answers. Both controller backends share this;
//! only the routine names differ.

use crate::controller::Detected;
use crate::error::{Result, SmbusError};
use crate::port::BusPort;
use crate::protocol::{check_block_len, Direction, Payload, Protocol, Transaction};
use smbus_chip::delegate::{protocol as code, DATA_BYTES, DATA_WORDS, IDENTITY_WORDS, XFER_IN_WORDS};
use smbus_chip::pci::{split_id, Bdf, PciIdentity};

/// Wire code of a protocol
pub const fn protocol_code(protocol: Protocol) -> u64 {
    match protocol {
        Protocol::Quick => code::QUICK,
        Protocol::Byte => code::BYTE,
        Protocol::ByteData => code::BYTE_DATA,
        Protocol::WordData => code::WORD_DATA,
        Protocol::ProcCall => code::PROC_CALL,
        Protocol::BlockData => code::BLOCK_DATA,
        Protocol::BlockProcCall => code::BLOCK_PROC_CALL,
    }
}

/// Protocol for a wire code
pub const fn protocol_from_code(value: u64) -> Option<Protocol> {
    match value {
        code::QUICK => Some(Protocol::Quick),
        code::BYTE => Some(Protocol::Byte),
        code::BYTE_DATA => Some(Protocol::ByteData),
        code::WORD_DATA => Some(Protocol::WordData),
        code::PROC_CALL => Some(Protocol::ProcCall),
        code::BLOCK_DATA => Some(Protocol::BlockData),
        code::BLOCK_PROC_CALL => Some(Protocol::BlockProcCall),
        _ => None,
    }
}

/// Pack the 40-byte data buffer into words, little-endian
pub fn pack_buffer(buf: &[u8; DATA_BYTES]) -> [u64; DATA_WORDS] {
    let mut words = [0u64; DATA_WORDS];
    for (word, chunk) in words.iter_mut().zip(buf.chunks_exact(8)) {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(chunk);
        *word = u64::from_le_bytes(bytes);
    }
    words
}

/// Unpack words into the 40-byte data buffer; missing words read as zero
pub fn unpack_buffer(words: &[u64]) -> [u8; DATA_BYTES] {
    let mut buf = [0u8; DATA_BYTES];
    for (chunk, word) in buf.chunks_exact_mut(8).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    buf
}

/// Fill the data buffer from an outgoing payload
pub fn payload_to_buffer(payload: &Payload) -> [u8; DATA_BYTES] {
    let mut buf = [0u8; DATA_BYTES];
    match payload {
        Payload::None => {}
        Payload::Byte(b) => buf[0] = *b,
        Payload::Word(w) => buf[..2].copy_from_slice(&w.to_le_bytes()),
        Payload::Block(data) => {
            // Validated to 1..=32 before we get here
            #[allow(clippy::cast_possible_truncation)]
            let len = data.len().min(crate::protocol::BLOCK_MAX) as u8;
            buf[0] = len;
            buf[1..=usize::from(len)].copy_from_slice(&data[..usize::from(len)]);
        }
    }
    buf
}

/// Encode a transaction's input words
pub fn encode(tx: &Transaction) -> [u64; XFER_IN_WORDS] {
    let data = pack_buffer(&payload_to_buffer(&tx.payload));
    let mut words = [0u64; XFER_IN_WORDS];
    words[0] = u64::from(tx.slave);
    words[1] = u64::from(tx.direction == Direction::Read);
    words[2] = u64::from(tx.command);
    words[3] = protocol_code(tx.protocol);
    words[4..].copy_from_slice(&data);
    words
}

/// Decode a routine's output words into the payload `tx` reads back
///
/// # Errors
///
/// Returns `SmbusError::Param` if a returned block length is out of range.
pub fn decode(tx: &Transaction, out: &[u64]) -> Result<Payload> {
    if !tx.reads_back() {
        return Ok(Payload::None);
    }
    let buf = unpack_buffer(out);
    Ok(match tx.protocol {
        Protocol::Quick => Payload::None,
        Protocol::Byte | Protocol::ByteData => Payload::Byte(buf[0]),
        Protocol::WordData | Protocol::ProcCall => {
            Payload::Word(u16::from_le_bytes([buf[0], buf[1]]))
        }
        Protocol::BlockData | Protocol::BlockProcCall => {
            let len = check_block_len(buf[0])?;
            Payload::Block(buf[1..=len].to_vec())
        }
    })
}

/// Ask an identity routine which controller the kernel side drives
///
/// `None` when the routine fails or reports nothing.
pub fn identify<P: BusPort + ?Sized>(port: &P, routine: &str, bdf: Bdf) -> Option<Detected> {
    let words = match port.delegate(routine, &[], IDENTITY_WORDS) {
        Ok(words) if words.len() >= IDENTITY_WORDS => words,
        Ok(words) => {
            tracing::debug!("{routine} returned {} words", words.len());
            return None;
        }
        Err(e) => {
            tracing::debug!("{routine}: {e}");
            return None;
        }
    };

    // Truncations intended: fields are packed into the low bits
    #[allow(clippy::cast_possible_truncation)]
    let (vendor_id, device_id) = split_id(words[0] as u32);
    #[allow(clippy::cast_possible_truncation)]
    let revision = words[1] as u8;
    #[allow(clippy::cast_possible_truncation)]
    let io_base = words[2] as u16;

    Some(Detected {
        identity: PciIdentity {
            bdf,
            vendor_id,
            device_id,
            revision,
        },
        io_base: Some(io_base),
    })
}

/// Run one transaction through a delegated routine
///
/// # Errors
///
/// Returns whatever the routine reports, or `SmbusError::Param` on a
/// malformed answer.
pub fn xfer<P: BusPort + ?Sized>(port: &P, routine: &str, tx: &Transaction) -> Result<Payload> {
    let out = port.delegate(routine, &encode(tx), DATA_WORDS)?;
    if out.len() < DATA_WORDS && tx.reads_back() {
        return Err(SmbusError::port(format!(
            "{routine} returned {} words, expected {DATA_WORDS}",
            out.len()
        )));
    }
    decode(tx, &out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_codes_round_trip() {
        for p in [
            Protocol::Quick,
            Protocol::Byte,
            Protocol::ByteData,
            Protocol::WordData,
            Protocol::ProcCall,
            Protocol::BlockData,
            Protocol::BlockProcCall,
        ] {
            assert_eq!(protocol_from_code(protocol_code(p)), Some(p));
        }
        assert_eq!(protocol_from_code(6), None);
    }

    #[test]
    fn block_write_layout() {
        let tx = Transaction::write_block(0x50, 0x10, (1..=9).collect());
        let words = encode(&tx);
        assert_eq!(&words[..4], &[0x50, 0, 0x10, code::BLOCK_DATA]);
        // byte 0 = length, bytes 1.. = data
        assert_eq!(words[4], u64::from_le_bytes([9, 1, 2, 3, 4, 5, 6, 7]));
        assert_eq!(words[5], u64::from_le_bytes([8, 9, 0, 0, 0, 0, 0, 0]));
    }

    #[test]
    fn word_read_decodes_little_endian() {
        let tx = Transaction::read_word_data(0x18, 5);
        let out = pack_buffer(&{
            let mut buf = [0u8; DATA_BYTES];
            buf[0] = 0x90;
            buf[1] = 0x01;
            buf
        });
        assert_eq!(decode(&tx, &out).unwrap(), Payload::Word(0x0190));
    }

    #[test]
    fn bad_block_length_from_kernel_is_rejected() {
        let tx = Transaction::read_block(0x50, 0);
        assert!(decode(&tx, &[0; DATA_WORDS]).is_err());
        assert!(decode(&tx, &[33; DATA_WORDS]).is_err());
    }
}
