//! Bus-access port abstraction
//!
//! Everything the controller backends know about the machine goes through
//! [`BusPort`]: byte I/O, PCI configuration space, physical memory, a
//! microsecond sleep, the global bus lock, and the optional delegated
//! transport. Backends never branch on which implementation they talk to.

use crate::error::{Result, SmbusError};
use smbus_chip::pci::Bdf;
use std::fmt::Debug;
use std::time::Duration;

/// How transactions reach the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Backends program controller registers themselves
    Direct,

    /// A pre-loaded kernel routine runs whole transactions
    Delegated,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Delegated => write!(f, "delegated"),
        }
    }
}

/// Primitive hardware access used by every controller backend
///
/// Methods take `&self`: a port is a handle onto machine state, not the
/// state itself. Serialization is the caller's job, through
/// [`BusPort::acquire_bus_lock`].
pub trait BusPort: Debug {
    /// Which transport this port offers
    fn transport(&self) -> Transport;

    /// Read one byte from an I/O port
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be accessed.
    fn read_io8(&self, addr: u16) -> Result<u8>;

    /// Write one byte to an I/O port
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be accessed.
    fn write_io8(&self, addr: u16, value: u8) -> Result<()>;

    /// Read an 8-bit PCI configuration register
    ///
    /// Absent functions read as all-ones.
    ///
    /// # Errors
    ///
    /// Returns error if configuration space cannot be accessed.
    fn read_pci8(&self, bdf: Bdf, offset: u8) -> Result<u8>;

    /// Read a 16-bit PCI configuration register
    ///
    /// # Errors
    ///
    /// Returns error if configuration space cannot be accessed.
    fn read_pci16(&self, bdf: Bdf, offset: u8) -> Result<u16>;

    /// Read a 32-bit PCI configuration register
    ///
    /// # Errors
    ///
    /// Returns error if configuration space cannot be accessed.
    fn read_pci32(&self, bdf: Bdf, offset: u8) -> Result<u32>;

    /// Write an 8-bit PCI configuration register
    ///
    /// # Errors
    ///
    /// Returns error if configuration space cannot be accessed.
    fn write_pci8(&self, bdf: Bdf, offset: u8, value: u8) -> Result<()>;

    /// Write a 16-bit PCI configuration register
    ///
    /// # Errors
    ///
    /// Returns error if configuration space cannot be accessed.
    fn write_pci16(&self, bdf: Bdf, offset: u8, value: u16) -> Result<()>;

    /// Write a 32-bit PCI configuration register
    ///
    /// # Errors
    ///
    /// Returns error if configuration space cannot be accessed.
    fn write_pci32(&self, bdf: Bdf, offset: u8, value: u32) -> Result<()>;

    /// Read an aligned 32-bit word of physical memory
    ///
    /// # Errors
    ///
    /// Returns error if physical memory cannot be mapped or `phys` is unaligned.
    fn read_mmio32(&self, phys: u64) -> Result<u32>;

    /// Write one byte of physical memory, leaving its neighbours untouched
    ///
    /// # Errors
    ///
    /// Returns error if physical memory cannot be mapped.
    fn write_mmio8(&self, phys: u64, value: u8) -> Result<()>;

    /// Sleep for at least `us` microseconds
    fn sleep_micros(&self, us: u32);

    /// Take the system-wide bus lock
    ///
    /// # Errors
    ///
    /// Returns `SmbusError::Busy` if the lock is not obtained within
    /// `timeout`, or a port error if locking itself fails.
    fn acquire_bus_lock(&self, timeout: Duration) -> Result<()>;

    /// Give the bus lock back
    ///
    /// # Errors
    ///
    /// Returns error if the lock cannot be released.
    fn release_bus_lock(&self) -> Result<()>;

    /// Run a named kernel routine with fixed-size word arrays
    ///
    /// # Errors
    ///
    /// Returns `SmbusError::Unsupported` unless the port is delegated.
    fn delegate(&self, routine: &str, input: &[u64], output_len: usize) -> Result<Vec<u64>> {
        let _ = (input, output_len);
        Err(SmbusError::unsupported(format!(
            "{} transport cannot run {routine}",
            self.transport()
        )))
    }
}

impl<T: BusPort + ?Sized> BusPort for &T {
    fn transport(&self) -> Transport {
        (**self).transport()
    }
    fn read_io8(&self, addr: u16) -> Result<u8> {
        (**self).read_io8(addr)
    }
    fn write_io8(&self, addr: u16, value: u8) -> Result<()> {
        (**self).write_io8(addr, value)
    }
    fn read_pci8(&self, bdf: Bdf, offset: u8) -> Result<u8> {
        (**self).read_pci8(bdf, offset)
    }
    fn read_pci16(&self, bdf: Bdf, offset: u8) -> Result<u16> {
        (**self).read_pci16(bdf, offset)
    }
    fn read_pci32(&self, bdf: Bdf, offset: u8) -> Result<u32> {
        (**self).read_pci32(bdf, offset)
    }
    fn write_pci8(&self, bdf: Bdf, offset: u8, value: u8) -> Result<()> {
        (**self).write_pci8(bdf, offset, value)
    }
    fn write_pci16(&self, bdf: Bdf, offset: u8, value: u16) -> Result<()> {
        (**self).write_pci16(bdf, offset, value)
    }
    fn write_pci32(&self, bdf: Bdf, offset: u8, value: u32) -> Result<()> {
        (**self).write_pci32(bdf, offset, value)
    }
    fn read_mmio32(&self, phys: u64) -> Result<u32> {
        (**self).read_mmio32(phys)
    }
    fn write_mmio8(&self, phys: u64, value: u8) -> Result<()> {
        (**self).write_mmio8(phys, value)
    }
    fn sleep_micros(&self, us: u32) {
        (**self).sleep_micros(us);
    }
    fn acquire_bus_lock(&self, timeout: Duration) -> Result<()> {
        (**self).acquire_bus_lock(timeout)
    }
    fn release_bus_lock(&self) -> Result<()> {
        (**self).release_bus_lock()
    }
    fn delegate(&self, routine: &str, input: &[u64], output_len: usize) -> Result<Vec<u64>> {
        (**self).delegate(routine, input, output_len)
    }
}

impl<T: BusPort + ?Sized> BusPort for Box<T> {
    fn transport(&self) -> Transport {
        (**self).transport()
    }
    fn read_io8(&self, addr: u16) -> Result<u8> {
        (**self).read_io8(addr)
    }
    fn write_io8(&self, addr: u16, value: u8) -> Result<()> {
        (**self).write_io8(addr, value)
    }
    fn read_pci8(&self, bdf: Bdf, offset: u8) -> Result<u8> {
        (**self).read_pci8(bdf, offset)
    }
    fn read_pci16(&self, bdf: Bdf, offset: u8) -> Result<u16> {
        (**self).read_pci16(bdf, offset)
    }
    fn read_pci32(&self, bdf: Bdf, offset: u8) -> Result<u32> {
        (**self).read_pci32(bdf, offset)
    }
    fn write_pci8(&self, bdf: Bdf, offset: u8, value: u8) -> Result<()> {
        (**self).write_pci8(bdf, offset, value)
    }
    fn write_pci16(&self, bdf: Bdf, offset: u8, value: u16) -> Result<()> {
        (**self).write_pci16(bdf, offset, value)
    }
    fn write_pci32(&self, bdf: Bdf, offset: u8, value: u32) -> Result<()> {
        (**self).write_pci32(bdf, offset, value)
    }
    fn read_mmio32(&self, phys: u64) -> Result<u32> {
        (**self).read_mmio32(phys)
    }
    fn write_mmio8(&self, phys: u64, value: u8) -> Result<()> {
        (**self).write_mmio8(phys, value)
    }
    fn sleep_micros(&self, us: u32) {
        (**self).sleep_micros(us);
    }
    fn acquire_bus_lock(&self, timeout: Duration) -> Result<()> {
        (**self).acquire_bus_lock(timeout)
    }
    fn release_bus_lock(&self) -> Result<()> {
        (**self).release_bus_lock()
    }
    fn delegate(&self, routine: &str, input: &[u64], output_len: usize) -> Result<Vec<u64>> {
        (**self).delegate(routine, input, output_len)
    }
}
