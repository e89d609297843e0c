//! Physical memory window
//!
//! Maps the page that holds a physical address out of `/dev/mem` (opened
//! `O_SYNC`, so the kernel maps it uncached) and gives bounds-checked
//! volatile access to it: aligned 32-bit reads, single-byte writes. Unsafe
//! code is confined to this file.

use crate::error::{Result, SmbusError};
use rustix::fs::OFlags;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::ptr::NonNull;

const PAGE_SIZE: u64 = 4096;

/// One page of physical memory mapped into this process
#[derive(Debug)]
pub struct PhysWindow {
    ptr: NonNull<u8>,
    size: usize,
    page: u64,
    _file: File,
}

impl PhysWindow {
    /// Map the page containing `phys`
    ///
    /// # Errors
    ///
    /// Returns error if `/dev/mem` cannot be opened or the mapping fails
    /// (kernels built with `STRICT_DEVMEM` refuse most of the address space).
    pub fn map(phys: u64) -> Result<Self> {
        let page = phys & !(PAGE_SIZE - 1);

        // SAFETY: OFlags::SYNC.bits() is a small positive flag value
        #[allow(clippy::cast_possible_wrap)]
        let sync_flag = OFlags::SYNC.bits() as i32;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(sync_flag)
            .open("/dev/mem")
            .map_err(|e| SmbusError::port(format!("Cannot open /dev/mem: {e}")))?;

        // Truncation impossible: PAGE_SIZE is a small constant
        #[allow(clippy::cast_possible_truncation)]
        let size = PAGE_SIZE as usize;

        // SAFETY: mmap is unsafe but every precondition is checked:
        // - file is valid (just opened) and kept alive in `_file` for the mapping's lifetime
        // - size is a non-zero constant, offset is page-aligned
        // - MAP_SHARED so writes reach the device, not a private copy
        // - the mapping is released in Drop
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &file,
                page,
            )
        }
        .map_err(|e| SmbusError::port(format!("mmap of {page:#x} failed: {e}")))?;

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| SmbusError::port(format!("mmap of {page:#x} returned null")))?;

        tracing::trace!("Mapped physical page {page:#x} at {ptr:p}");

        Ok(Self {
            ptr,
            size,
            page,
            _file: file,
        })
    }

    /// Whether `phys` falls inside the mapped page
    pub fn covers(&self, phys: u64) -> bool {
        phys & !(PAGE_SIZE - 1) == self.page
    }

    fn offset_of(&self, phys: u64, width: usize) -> Result<usize> {
        let offset = phys
            .checked_sub(self.page)
            .and_then(|o| usize::try_from(o).ok())
            .filter(|o| o + width <= self.size && o % width == 0);
        offset.ok_or_else(|| {
            SmbusError::param(format!(
                "physical address {phys:#x} outside window {:#x} or unaligned",
                self.page
            ))
        })
    }

    /// Volatile 32-bit read
    ///
    /// # Errors
    ///
    /// Returns error if `phys` is unaligned or outside the mapped page.
    pub fn read_u32(&self, phys: u64) -> Result<u32> {
        let offset = self.offset_of(phys, 4)?;

        // SAFETY: offset + 4 <= size and offset is 4-aligned (checked in offset_of),
        // the page is mapped for the lifetime of self, and the read must be volatile
        // because device registers change underneath us.
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };

        tracing::trace!("mmio read {phys:#x} = {value:#010x}");
        Ok(value)
    }

    /// Volatile 8-bit write
    ///
    /// # Errors
    ///
    /// Returns error if `phys` is outside the mapped page.
    pub fn write_u8(&self, phys: u64, value: u8) -> Result<()> {
        let offset = self.offset_of(phys, 1)?;

        tracing::trace!("mmio write {phys:#x} = {value:#04x}");

        // SAFETY: offset < size (checked in offset_of) and the page is mapped
        // for the lifetime of self. A single byte store leaves adjacent
        // registers alone.
        unsafe { self.ptr.as_ptr().add(offset).write_volatile(value) };
        Ok(())
    }
}

impl Drop for PhysWindow {
    fn drop(&mut self) {
        // SAFETY: ptr/size describe exactly the mapping created in map(), and no
        // references into it outlive self.
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr().cast(), self.size) } {
            tracing::warn!("munmap of physical page {:#x} failed: {e}", self.page);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // Requires root and /dev/mem
    fn test_maps_fch_pm_window() {
        let window = PhysWindow::map(smbus_chip::piix4::SB800_PM_MMIO).unwrap();
        assert!(window.covers(smbus_chip::piix4::SB800_PM_MMIO));
        assert!(window.read_u32(smbus_chip::piix4::SB800_PM_MMIO).is_ok());
        assert!(window.read_u32(smbus_chip::piix4::SB800_PM_MMIO + 1).is_err());
    }
}
