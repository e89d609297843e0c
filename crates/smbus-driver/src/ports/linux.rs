//! Linux bus-access port
//!
//! - I/O ports through `/dev/port` (`pread`/`pwrite` at the port number)
//! - PCI configuration space through sysfs
//! - physical memory through [`PhysWindow`], one page kept mapped
//! - the global bus lock through [`BusLock`], `flock` on a lock file
//!
//! Needs `CAP_SYS_RAWIO` (in practice, root). [`BusLock`] alone does not.

use super::mmap::PhysWindow;
use crate::error::{Result, SmbusError};
use crate::port::{BusPort, Transport};
use rustix::fs::{flock, FlockOperation};
use rustix::io::{pread, pwrite, Errno};
use smbus_chip::pci::Bdf;
use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Default lock file shared by every process that drives the SMBus this way
pub const DEFAULT_LOCK_PATH: &str = "/run/lock/smbus-spd.lock";

const LOCK_POLL: Duration = Duration::from_millis(1);

/// Advisory lock shared by every process that drives the SMBus
#[derive(Debug)]
pub struct BusLock {
    file: File,
    path: PathBuf,
}

impl BusLock {
    /// Open (creating if needed) the lock file at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| SmbusError::port(format!("Cannot open lock file {}: {e}", path.display())))?;
        Ok(Self { file, path })
    }

    /// Take the lock, retrying until `timeout`
    ///
    /// # Errors
    ///
    /// Returns `SmbusError::Busy` if another holder keeps it past `timeout`,
    /// or a port error if `flock` itself fails.
    pub fn acquire(&self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            match flock(&self.file, FlockOperation::NonBlockingLockExclusive) {
                Ok(()) => return Ok(()),
                Err(Errno::WOULDBLOCK | Errno::INTR) if start.elapsed() < timeout => {
                    std::thread::sleep(LOCK_POLL);
                }
                Err(Errno::WOULDBLOCK) => {
                    tracing::debug!("bus lock {} still held after {timeout:?}", self.path.display());
                    return Err(SmbusError::Busy { status: 0 });
                }
                Err(e) => {
                    return Err(SmbusError::port(format!("flock {}: {e}", self.path.display())))
                }
            }
        }
    }

    /// Give the lock back
    ///
    /// # Errors
    ///
    /// Returns error if `flock` fails.
    pub fn release(&self) -> Result<()> {
        flock(&self.file, FlockOperation::Unlock)
            .map_err(|e| SmbusError::port(format!("unlock {}: {e}", self.path.display())))
    }
}

/// Direct hardware access on Linux
#[derive(Debug)]
pub struct DevPort {
    io: File,
    lock: BusLock,
    window: RefCell<Option<PhysWindow>>,
    sysfs_root: PathBuf,
}

impl DevPort {
    /// Open `/dev/port` and the default lock file
    ///
    /// # Errors
    ///
    /// Returns error if either file cannot be opened.
    pub fn open() -> Result<Self> {
        Self::open_with_lock(DEFAULT_LOCK_PATH)
    }

    /// Open `/dev/port` with a caller-chosen lock file
    ///
    /// # Errors
    ///
    /// Returns error if either file cannot be opened.
    pub fn open_with_lock(lock_path: impl AsRef<Path>) -> Result<Self> {
        let io = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/port")
            .map_err(|e| SmbusError::port(format!("Cannot open /dev/port: {e}. Running as root?")))?;

        let lock = BusLock::open(lock_path)?;

        tracing::debug!("Opened /dev/port, lock file {}", lock.path.display());

        Ok(Self {
            io,
            lock,
            window: RefCell::new(None),
            sysfs_root: PathBuf::from("/sys/bus/pci/devices"),
        })
    }

    /// Run `f` on a mapping of the page holding `phys`, reusing the last one
    fn with_window<T>(&self, phys: u64, f: impl FnOnce(&PhysWindow) -> Result<T>) -> Result<T> {
        let mut cached = self.window.borrow_mut();
        let window = match cached.take() {
            Some(window) if window.covers(phys) => window,
            _ => PhysWindow::map(phys)?,
        };
        let result = f(&window);
        *cached = Some(window);
        result
    }

    fn config_path(&self, bdf: Bdf) -> PathBuf {
        self.sysfs_root.join(bdf.sysfs_name()).join("config")
    }

    fn read_config(&self, bdf: Bdf, offset: u8, buf: &mut [u8]) -> Result<()> {
        let path = self.config_path(bdf);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                buf.fill(0xFF);
                return Ok(());
            }
            Err(e) => {
                return Err(SmbusError::port(format!("Cannot open {}: {e}", path.display())))
            }
        };
        let n = pread(&file, buf, u64::from(offset))
            .map_err(|e| SmbusError::port(format!("{} @ {offset:#x}: {e}", path.display())))?;
        if n != buf.len() {
            // Unprivileged readers only see the first 64 bytes
            return Err(SmbusError::port(format!(
                "short config read from {} @ {offset:#x} ({n} of {} bytes)",
                path.display(),
                buf.len()
            )));
        }
        Ok(())
    }

    fn write_config(&self, bdf: Bdf, offset: u8, data: &[u8]) -> Result<()> {
        let path = self.config_path(bdf);
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| SmbusError::port(format!("Cannot open {}: {e}", path.display())))?;
        let n = pwrite(&file, data, u64::from(offset))
            .map_err(|e| SmbusError::port(format!("{} @ {offset:#x}: {e}", path.display())))?;
        if n == data.len() {
            Ok(())
        } else {
            Err(SmbusError::port(format!(
                "short config write to {} @ {offset:#x}",
                path.display()
            )))
        }
    }
}

impl BusPort for DevPort {
    fn transport(&self) -> Transport {
        Transport::Direct
    }

    fn read_io8(&self, addr: u16) -> Result<u8> {
        let mut buf = [0u8; 1];
        pread(&self.io, &mut buf, u64::from(addr))
            .map_err(|e| SmbusError::port(format!("inb {addr:#06x}: {e}")))?;
        tracing::trace!("inb {addr:#06x} = {:#04x}", buf[0]);
        Ok(buf[0])
    }

    fn write_io8(&self, addr: u16, value: u8) -> Result<()> {
        tracing::trace!("outb {addr:#06x} <- {value:#04x}");
        pwrite(&self.io, &[value], u64::from(addr))
            .map_err(|e| SmbusError::port(format!("outb {addr:#06x}: {e}")))?;
        Ok(())
    }

    fn read_pci8(&self, bdf: Bdf, offset: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_config(bdf, offset, &mut buf)?;
        Ok(buf[0])
    }

    fn read_pci16(&self, bdf: Bdf, offset: u8) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_config(bdf, offset, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_pci32(&self, bdf: Bdf, offset: u8) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_config(bdf, offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write_pci8(&self, bdf: Bdf, offset: u8, value: u8) -> Result<()> {
        self.write_config(bdf, offset, &[value])
    }

    fn write_pci16(&self, bdf: Bdf, offset: u8, value: u16) -> Result<()> {
        self.write_config(bdf, offset, &value.to_le_bytes())
    }

    fn write_pci32(&self, bdf: Bdf, offset: u8, value: u32) -> Result<()> {
        self.write_config(bdf, offset, &value.to_le_bytes())
    }

    fn read_mmio32(&self, phys: u64) -> Result<u32> {
        self.with_window(phys, |w| w.read_u32(phys))
    }

    fn write_mmio8(&self, phys: u64, value: u8) -> Result<()> {
        self.with_window(phys, |w| w.write_u8(phys, value))
    }

    fn sleep_micros(&self, us: u32) {
        std::thread::sleep(Duration::from_micros(u64::from(us)));
    }

    fn acquire_bus_lock(&self, timeout: Duration) -> Result<()> {
        self.lock.acquire(timeout)
    }

    fn release_bus_lock(&self) -> Result<()> {
        self.lock.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // Requires root
    fn test_reads_host_bridge_identity() {
        let port = DevPort::open().unwrap();
        let id = port.read_pci32(Bdf::new(0, 0, 0), 0).unwrap();
        assert_ne!(id, smbus_chip::pci::ABSENT);
    }

    #[test]
    fn test_lock_excludes_second_opener() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smbus.lock");
        let a = BusLock::open(&path).unwrap();
        let b = BusLock::open(&path).unwrap();

        a.acquire(Duration::from_millis(10)).unwrap();
        let start = Instant::now();
        assert!(matches!(
            b.acquire(Duration::from_millis(10)),
            Err(SmbusError::Busy { .. })
        ));
        assert!(start.elapsed() >= Duration::from_millis(10));

        a.release().unwrap();
        b.acquire(Duration::from_millis(10)).unwrap();
        b.release().unwrap();
    }

    #[test]
    fn test_lock_file_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested.lock");
        assert!(!path.exists());
        let lock = BusLock::open(&path).unwrap();
        assert!(path.exists());
        lock.acquire(Duration::ZERO).unwrap();
        lock.release().unwrap();
    }
}
