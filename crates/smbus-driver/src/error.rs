//! Error types for SMBus and SPD operations

use crate::protocol::Protocol;
use thiserror::Error;

/// Result type alias for SMBus operations
pub type Result<T> = std::result::Result<T, SmbusError>;

/// What the host controller reported when a transaction ended badly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusFault {
    /// No device acknowledged (device error)
    Nak,
    /// Lost arbitration / bus collision
    Collision,
    /// Controller flagged the transaction as failed
    Failed,
    /// Packet error check mismatch
    Pec,
}

impl std::fmt::Display for BusFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nak => write!(f, "no acknowledge"),
            Self::Collision => write!(f, "bus collision"),
            Self::Failed => write!(f, "transaction failed"),
            Self::Pec => write!(f, "PEC mismatch"),
        }
    }
}

/// Errors that can occur during SMBus operations
#[derive(Debug, Error)]
pub enum SmbusError {
    /// No supported host controller on this machine
    #[error("No supported SMBus controller detected")]
    NoDevice,

    /// Nothing answered as a memory module in this slot
    #[error("No memory module detected in slot {slot}")]
    NoModule {
        /// Module slot
        slot: u8,
    },

    /// Bus stayed occupied
    #[error("SMBus busy (status {status:#04x})")]
    Busy {
        /// Host status register at the time of giving up
        status: u8,
    },

    /// Completion never signalled within the poll budget
    #[error("SMBus timeout after {retries} polls of {quantum_us}us")]
    Timeout {
        /// Polls performed
        retries: u32,
        /// Sleep per poll
        quantum_us: u32,
    },

    /// Hardware-reported failure
    #[error("SMBus {protocol:?} to {slave:#04x} failed: {fault} (status {status:#04x})")]
    Bus {
        /// Target slave address
        slave: u8,
        /// Protocol in flight
        protocol: Protocol,
        /// Fault class
        fault: BusFault,
        /// Host status register
        status: u8,
    },

    /// Malformed request, never sent to hardware
    #[error("Invalid request: {reason}")]
    Param {
        /// What was wrong
        reason: String,
    },

    /// Request not supported by the active controller or port
    #[error("Unsupported: {reason}")]
    Unsupported {
        /// What is missing
        reason: String,
    },

    /// The access primitive itself failed
    #[error("Bus access failed: {reason}")]
    Port {
        /// Reason for failure
        reason: String,
    },

    /// Read from a confirmed module failed
    #[error("SPD slot {slot} address {address:#05x} ({protocol:?}): {source}")]
    Spd {
        /// Module slot
        slot: u8,
        /// Logical address inside the module
        address: u16,
        /// Protocol in flight
        protocol: Protocol,
        /// Underlying failure
        #[source]
        source: Box<SmbusError>,
    },
}

impl SmbusError {
    /// Create a parameter error
    pub fn param(reason: impl Into<String>) -> Self {
        Self::Param {
            reason: reason.into(),
        }
    }

    /// Create an unsupported-request error
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }

    /// Create a port access error
    pub fn port(reason: impl Into<String>) -> Self {
        Self::Port {
            reason: reason.into(),
        }
    }

    /// Wrap a failure with the SPD location it happened at
    pub fn at_spd(self, slot: u8, address: u16, protocol: Protocol) -> Self {
        Self::Spd {
            slot,
            address,
            protocol,
            source: Box::new(self),
        }
    }

    /// Whether trying the same operation again later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Busy { .. } | Self::Timeout { .. } => true,
            Self::Bus { fault, .. } => *fault == BusFault::Collision,
            Self::Spd { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Whether the addressed device simply did not answer
    pub fn is_nak(&self) -> bool {
        match self {
            Self::Bus { fault, .. } => *fault == BusFault::Nak,
            Self::Spd { source, .. } => source.is_nak(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for SmbusError {
    fn from(e: std::io::Error) -> Self {
        Self::port(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(SmbusError::Busy { status: 1 }.is_retryable());
        assert!(SmbusError::Timeout {
            retries: 1,
            quantum_us: 1
        }
        .is_retryable());
        let nak = SmbusError::Bus {
            slave: 0x50,
            protocol: Protocol::ByteData,
            fault: BusFault::Nak,
            status: 0x04,
        };
        assert!(!nak.is_retryable());
        assert!(nak.is_nak());
        assert!(!SmbusError::param("x").is_retryable());
    }

    #[test]
    fn spd_wrapper_keeps_classification() {
        let wrapped = SmbusError::Busy { status: 0x41 }.at_spd(2, 0x140, Protocol::ByteData);
        assert!(wrapped.is_retryable());
        let text = wrapped.to_string();
        assert!(text.contains("slot 2"), "{text}");
        assert!(text.contains("0x140"), "{text}");
    }
}
