// SPDX-License-Identifier: AGPL-3.0-only

//! Simulated platform
//!
//! A software model of everything a [`BusPort`] reaches: PCI configuration
//! space, the I801 and PIIX4-family host controllers (register-accurate
//! enough for the driver's state machines), the SB800 power-management
//! block and IMC mailbox, and the memory modules on the bus.
//!
//! Used for:
//!
//! 1. **CI without hardware**: every integration test drives the full stack
//!    through this port.
//! 2. **Spying**: port calls, transaction starts, kills, lock acquisitions
//!    and (virtual) sleep time are counted, and every transaction that reaches
//!    the bus is logged.
//! 3. **Fault injection**: stuck busy bit, stalled transaction, PEC errors,
//!    firmware holding the semaphore, silent IMC, contended lock.
//!
//! Sleeping is virtual: `sleep_micros` only advances a counter.

pub mod devices;

use self::devices::{Reply, Request, Segment, Slave};
use crate::delegate::{pack_buffer, protocol_from_code, unpack_buffer};
use crate::error::{BusFault, Result, SmbusError};
use crate::port::{BusPort, Transport};
use crate::protocol::{Direction, Protocol};
use smbus_chip::delegate::{self as routines, DATA_BYTES, XFER_IN_WORDS};
use smbus_chip::pci::{self, Bdf, VENDOR_AMD, VENDOR_ATI, VENDOR_INTEL};
use smbus_chip::{i801, piix4, spd};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::time::Duration;

/// I/O base given to a simulated Intel controller
pub const I801_BASE: u16 = 0xEFA0;
/// I/O base given to a simulated PIIX4-family controller
pub const PIIX4_BASE: u16 = 0x0B00;

const PIIX4_LEGACY_LOCATION: Bdf = Bdf::new(0, 0x07, 3);
const AMD_SMBUS_LOCATION: Bdf = Bdf::new(0, 0x14, 0);
const LPC_KERNCZ_DEVICE: u16 = 0x790E;

/// Injectable misbehaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Host-busy never clears, even after a kill
    StuckBusy,
    /// Started transactions never complete until killed
    Stall,
    /// Every PEC transaction fails its CRC
    PecError,
    /// Firmware holds the SB800 host semaphore
    SemaphoreHeld,
    /// IMC never acknowledges mailbox commands
    ImcSilent,
    /// Another process holds the bus lock
    LockContended,
}

/// One transaction that reached the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggedTransfer {
    /// Slave address
    pub slave: u8,
    /// Direction
    pub direction: Direction,
    /// Command byte
    pub command: u8,
    /// Protocol
    pub protocol: Protocol,
}

/// Spy counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Every primitive invoked on the port
    pub port_calls: u64,
    /// Transactions started (START bit or delegated xfer)
    pub starts: u64,
    /// Kill requests
    pub kills: u64,
    /// Successful bus lock acquisitions
    pub lock_acquisitions: u64,
    /// Virtual time slept, microseconds
    pub slept_us: u64,
    /// IMC sleep/wake handshakes answered
    pub imc_handshakes: u64,
    /// Single-byte writes to physical memory
    pub mmio_byte_writes: u64,
    /// Transactions in start order
    pub log: Vec<LoggedTransfer>,
}

impl SimStats {
    /// Transactions addressed to `slave`
    pub fn transfers_to(&self, slave: u8) -> usize {
        self.log.iter().filter(|t| t.slave == slave).count()
    }

    /// Writes addressed to `slave`
    pub fn writes_to(&self, slave: u8) -> usize {
        self.log
            .iter()
            .filter(|t| t.slave == slave && t.direction == Direction::Write)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    I801(i801::Features),
    Piix4,
}

#[derive(Debug, Clone)]
struct Host {
    flavor: Flavor,
    base: u16,
    bdf: Bdf,
    sts: u8,
    cnt: u8,
    cmd: u8,
    add: u8,
    dat0: u8,
    dat1: u8,
    block: [u8; 32],
    block_index: usize,
    auxctl: u8,
    auxsts: u8,
    slvcnt: u8,
    inuse: bool,
    stalled: bool,
}

impl Host {
    fn new(flavor: Flavor, base: u16, bdf: Bdf) -> Self {
        Self {
            flavor,
            base,
            bdf,
            sts: 0,
            cnt: 0,
            cmd: 0,
            add: 0,
            dat0: 0,
            dat1: 0,
            block: [0; 32],
            block_index: 0,
            auxctl: 0,
            auxsts: 0,
            slvcnt: 0,
            inuse: false,
            stalled: false,
        }
    }

    fn decodes(&self, addr: u16) -> Option<u16> {
        addr.checked_sub(self.base).filter(|off| *off < 0x10)
    }
}

#[derive(Debug, Clone)]
struct Pm {
    regs: [u8; 256],
    index: u8,
    mmio_only: bool,
    port_sel: (u8, u8, u8),
}

impl Pm {
    fn selected_port(&self) -> u8 {
        let (reg, mask, shift) = self.port_sel;
        (self.regs[usize::from(reg)] & mask) >> shift
    }

    fn select(&mut self, port: u8) -> u8 {
        let (reg, mask, shift) = self.port_sel;
        let previous = self.selected_port();
        let r = &mut self.regs[usize::from(reg)];
        *r = (*r & !mask) | ((port << shift) & mask);
        previous
    }
}

#[derive(Debug, Clone)]
struct Imc {
    index: u8,
    regs: [u8; 256],
    asleep: bool,
}

#[derive(Debug, Default)]
struct Platform {
    pci: BTreeMap<Bdf, [u8; 256]>,
    i801: Option<Host>,
    piix4: Option<Host>,
    pm: Option<Pm>,
    imc: Option<Imc>,
    segment: Segment,
    faults: Vec<Fault>,
    lock_held: bool,
    stats: SimStats,
}

impl Platform {
    fn has(&self, fault: Fault) -> bool {
        self.faults.contains(&fault)
    }

    fn config(&self, bdf: Bdf, offset: u8, len: usize) -> u32 {
        let Some(space) = self.pci.get(&bdf) else {
            return pci::ABSENT;
        };
        let mut bytes = [0xFFu8; 4];
        for (i, b) in bytes.iter_mut().take(len).enumerate() {
            if let Some(v) = space.get(usize::from(offset) + i) {
                *b = *v;
            }
        }
        u32::from_le_bytes(bytes)
    }

    fn set_config(&mut self, bdf: Bdf, offset: u8, value: u32, len: usize) {
        if let Some(space) = self.pci.get_mut(&bdf) {
            for (i, b) in value.to_le_bytes().iter().take(len).enumerate() {
                if let Some(slot) = space.get_mut(usize::from(offset) + i) {
                    *slot = *b;
                }
            }
        }
    }

    fn bus_enabled(&self, host_is_piix4: bool) -> bool {
        // SB800-class parts route to the selected port; modules sit on port 0
        !host_is_piix4 || self.pm.as_ref().map_or(true, |pm| pm.selected_port() == 0)
    }

    fn run(&mut self, request: &Request<'_>, host_is_piix4: bool) -> Option<Reply> {
        self.stats.starts += 1;
        self.stats.log.push(LoggedTransfer {
            slave: request.slave,
            direction: request.direction,
            command: request.command,
            protocol: request.protocol,
        });
        if !self.bus_enabled(host_is_piix4) {
            return None;
        }
        self.segment.execute(request)
    }

    // ── Host controller registers ────────────────────────────────────────

    fn host_mut(&mut self, addr: u16) -> Option<(&mut Host, u16)> {
        if let Some(off) = self.i801.as_ref().and_then(|h| h.decodes(addr)) {
            return self.i801.as_mut().map(|h| (h, off));
        }
        if let Some(off) = self.piix4.as_ref().and_then(|h| h.decodes(addr)) {
            return self.piix4.as_mut().map(|h| (h, off));
        }
        None
    }

    fn host_read(&mut self, addr: u16) -> Option<u8> {
        let stuck = self.has(Fault::StuckBusy);
        let semaphore_held = self.has(Fault::SemaphoreHeld);
        let (host, off) = self.host_mut(addr)?;
        let busy = if host.stalled || stuck { i801::status::HOST_BUSY } else { 0 };
        let value = match off {
            i801::HSTSTS => {
                let inuse = if host.inuse { i801::status::INUSE_STS } else { 0 };
                if matches!(host.flavor, Flavor::I801(_)) {
                    host.inuse = true;
                    host.sts | busy | inuse
                } else {
                    host.sts | busy
                }
            }
            i801::HSTCNT => {
                host.block_index = 0;
                host.cnt & !i801::control::START
            }
            i801::HSTCMD => host.cmd,
            i801::HSTADD => host.add,
            i801::HSTDAT0 => host.dat0,
            i801::HSTDAT1 => host.dat1,
            i801::BLKDAT => {
                let v = host.block.get(host.block_index).copied().unwrap_or(0);
                host.block_index += 1;
                v
            }
            piix4::SLVCNT if host.flavor == Flavor::Piix4 => {
                if semaphore_held {
                    host.slvcnt & !piix4::slvcnt::HOST_SEMAPHORE
                } else {
                    host.slvcnt
                }
            }
            i801::AUXSTS => host.auxsts,
            i801::AUXCTL => host.auxctl,
            _ => 0xFF,
        };
        Some(value)
    }

    fn host_write(&mut self, addr: u16, value: u8) -> bool {
        let Some((host, off)) = self.host_mut(addr) else {
            return false;
        };
        let mut start = false;
        let mut killed = false;
        match off {
            i801::HSTSTS => {
                host.sts &= !(value & !i801::status::HOST_BUSY & !i801::status::INUSE_STS);
                if value & i801::status::INUSE_STS != 0 {
                    host.inuse = false;
                }
            }
            i801::HSTCNT => {
                host.cnt = value;
                if value & i801::control::KILL != 0 {
                    killed = true;
                    if host.stalled {
                        host.stalled = false;
                        host.sts |= i801::status::FAILED;
                    }
                } else if value & i801::control::START != 0 {
                    start = true;
                }
            }
            i801::HSTCMD => host.cmd = value,
            i801::HSTADD => host.add = value,
            i801::HSTDAT0 => host.dat0 = value,
            i801::HSTDAT1 => host.dat1 = value,
            i801::BLKDAT => {
                if let Some(slot) = host.block.get_mut(host.block_index) {
                    *slot = value;
                }
                host.block_index += 1;
            }
            piix4::SLVCNT if host.flavor == Flavor::Piix4 => {
                if value & piix4::slvcnt::HOST_RELEASE != 0 {
                    host.slvcnt &= !piix4::slvcnt::HOST_SEMAPHORE;
                } else {
                    host.slvcnt = value;
                }
            }
            i801::AUXSTS => host.auxsts &= !value,
            i801::AUXCTL => {
                if let Flavor::I801(features) = host.flavor {
                    let mut mask = 0;
                    if features.pec {
                        mask |= i801::auxctl::CRC;
                    }
                    if features.block_buffer {
                        mask |= i801::auxctl::E32B;
                    }
                    host.auxctl = value & mask;
                }
            }
            _ => {}
        }
        let is_piix4 = host.flavor == Flavor::Piix4;
        if killed {
            self.stats.kills += 1;
        }
        if start {
            self.start(is_piix4);
        }
        true
    }

    fn start(&mut self, is_piix4: bool) {
        let stall = self.has(Fault::Stall) || self.has(Fault::StuckBusy);
        let pec_error = self.has(Fault::PecError);
        let host = if is_piix4 { self.piix4.clone() } else { self.i801.clone() };
        let Some(mut host) = host else { return };

        if stall {
            host.stalled = true;
            self.stats.starts += 1;
            self.put_host(is_piix4, host);
            return;
        }

        let kind = host.cnt & i801::control::KIND_MASK;
        let protocol = match kind {
            i801::control::QUICK => Protocol::Quick,
            i801::control::BYTE => Protocol::Byte,
            i801::control::BYTE_DATA => Protocol::ByteData,
            i801::control::WORD_DATA => Protocol::WordData,
            i801::control::PROC_CALL if !is_piix4 => Protocol::ProcCall,
            i801::control::BLOCK_DATA => Protocol::BlockData,
            i801::control::BLOCK_PROC_CALL if !is_piix4 => Protocol::BlockProcCall,
            _ => {
                host.sts |= i801::status::DEV_ERR;
                self.put_host(is_piix4, host);
                return;
            }
        };
        let direction = if host.add & 1 == 0 {
            Direction::Write
        } else {
            Direction::Read
        };
        let block_len = usize::from(host.dat0).min(32);
        let block = host.block;
        let request = Request {
            slave: host.add >> 1,
            direction,
            command: host.cmd,
            protocol,
            word: u16::from_le_bytes([host.dat0, host.dat1]),
            block: &block[..block_len],
        };
        let pec = !is_piix4 && host.cnt & i801::control::PEC_EN != 0;

        match self.run(&request, is_piix4) {
            Some(_) if pec && pec_error => {
                host.sts |= i801::status::DEV_ERR;
                host.auxsts |= i801::auxsts::CRCE;
            }
            None => host.sts |= i801::status::DEV_ERR,
            Some(reply) => {
                host.sts |= i801::status::INTR;
                match reply {
                    Reply::Ack => {}
                    Reply::Byte(b) => host.dat0 = b,
                    Reply::Word(w) => [host.dat0, host.dat1] = w.to_le_bytes(),
                    Reply::Block(data) => {
                        // Truncation impossible: blocks are at most 32 bytes
                        #[allow(clippy::cast_possible_truncation)]
                        let len = data.len().min(32) as u8;
                        host.dat0 = len;
                        host.block[..usize::from(len)].copy_from_slice(&data[..usize::from(len)]);
                        host.block_index = 0;
                    }
                }
            }
        }
        self.put_host(is_piix4, host);
    }

    fn put_host(&mut self, is_piix4: bool, host: Host) {
        if is_piix4 {
            self.piix4 = Some(host);
        } else {
            self.i801 = Some(host);
        }
    }

    // ── SB800 PM block and IMC mailbox ───────────────────────────────────

    fn io_read(&mut self, addr: u16) -> u8 {
        if let Some(v) = self.host_read(addr) {
            return v;
        }
        match addr {
            piix4::SB800_PM_INDEX => match &self.pm {
                Some(pm) if !pm.mmio_only => pm.index,
                _ => 0xFF,
            },
            piix4::SB800_PM_DATA => match &self.pm {
                Some(pm) if !pm.mmio_only => pm.regs[usize::from(pm.index)],
                _ => 0xFF,
            },
            piix4::IMC_INDEX => self.imc.as_ref().map_or(0xFF, |imc| imc.index),
            piix4::IMC_DATA => self
                .imc
                .as_ref()
                .map_or(0xFF, |imc| imc.regs[usize::from(imc.index)]),
            _ => 0xFF,
        }
    }

    fn io_write(&mut self, addr: u16, value: u8) {
        if self.host_write(addr, value) {
            return;
        }
        let imc_silent = self.has(Fault::ImcSilent);
        match addr {
            piix4::SB800_PM_INDEX => {
                if let Some(pm) = self.pm.as_mut().filter(|pm| !pm.mmio_only) {
                    pm.index = value;
                }
            }
            piix4::SB800_PM_DATA => {
                if let Some(pm) = self.pm.as_mut().filter(|pm| !pm.mmio_only) {
                    pm.regs[usize::from(pm.index)] = value;
                }
            }
            piix4::IMC_INDEX => {
                if let Some(imc) = self.imc.as_mut() {
                    imc.index = value;
                }
            }
            piix4::IMC_DATA => {
                let Some(imc) = self.imc.as_mut() else { return };
                imc.regs[usize::from(imc.index)] = value;
                if imc.index == piix4::imc::DOORBELL && value == piix4::imc::RING && !imc_silent {
                    match imc.regs[usize::from(piix4::imc::CMD)] {
                        piix4::imc::SLEEP => imc.asleep = true,
                        piix4::imc::WAKE => imc.asleep = false,
                        _ => return,
                    }
                    imc.regs[usize::from(piix4::imc::ARG)] = piix4::imc::ACK;
                    self.stats.imc_handshakes += 1;
                }
            }
            _ => {}
        }
    }

    fn pm_window(&self, phys: u64, width: u64) -> Option<usize> {
        self.pm.as_ref()?;
        let off = phys.checked_sub(piix4::SB800_PM_MMIO)?;
        (off + width <= piix4::SB800_PM_MMIO_SIZE && off % width == 0)
            .then(|| usize::try_from(off).ok())
            .flatten()
    }

    // ── Delegated routines ───────────────────────────────────────────────

    fn identity(&self, host: Option<&Host>) -> Result<Vec<u64>> {
        let host = host.ok_or(SmbusError::NoDevice)?;
        let id = self.config(host.bdf, pci::CFG_VENDOR_ID, 4);
        let revision = self.config(host.bdf, pci::CFG_REVISION, 1);
        Ok(vec![u64::from(id), u64::from(revision), u64::from(host.base)])
    }

    fn delegated_xfer(&mut self, input: &[u64], is_piix4: bool) -> Result<Vec<u64>> {
        if input.len() < XFER_IN_WORDS {
            return Err(SmbusError::param("short delegated input"));
        }
        let present = if is_piix4 { self.piix4.is_some() } else { self.i801.is_some() };
        if !present {
            return Err(SmbusError::NoDevice);
        }
        if self.has(Fault::StuckBusy) {
            return Err(SmbusError::Busy {
                status: i801::status::HOST_BUSY,
            });
        }
        let poll = if is_piix4 { piix4::DEFAULT_POLL } else { i801::DEFAULT_POLL };
        if self.has(Fault::Stall) {
            self.stats.starts += 1;
            self.stats.kills += 1;
            self.stats.slept_us += poll.worst_case_us();
            return Err(SmbusError::Timeout {
                retries: poll.retries,
                quantum_us: poll.quantum_us,
            });
        }

        let protocol = protocol_from_code(input[3])
            .ok_or_else(|| SmbusError::param(format!("protocol code {}", input[3])))?;
        let buf = unpack_buffer(&input[4..]);
        let block_len = usize::from(buf[0]).min(32);
        // Truncations intended: the kernel side takes the low bits
        #[allow(clippy::cast_possible_truncation)]
        let request = Request {
            slave: input[0] as u8,
            direction: if input[1] == 0 {
                Direction::Write
            } else {
                Direction::Read
            },
            command: input[2] as u8,
            protocol,
            word: u16::from_le_bytes([buf[0], buf[1]]),
            block: &buf[1..=block_len],
        };

        let reply = self.run(&request, is_piix4).ok_or(SmbusError::Bus {
            slave: request.slave,
            protocol,
            fault: BusFault::Nak,
            status: i801::status::DEV_ERR,
        })?;

        let mut out = [0u8; DATA_BYTES];
        match reply {
            Reply::Ack => {}
            Reply::Byte(b) => out[0] = b,
            Reply::Word(w) => out[..2].copy_from_slice(&w.to_le_bytes()),
            Reply::Block(data) => {
                let len = data.len().min(32);
                // Truncation impossible: len <= 32
                #[allow(clippy::cast_possible_truncation)]
                {
                    out[0] = len as u8;
                }
                out[1..=len].copy_from_slice(&data[..len]);
            }
        }
        Ok(pack_buffer(&out).to_vec())
    }
}

/// Simulated platform port
///
/// Built with the `with_*` methods, then handed to
/// [`crate::BusSession::detect_and_init`] by value or by reference.
///
/// ```
/// use smbus_driver::ports::SimulatedPort;
/// use smbus_driver::BusSession;
///
/// let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr4(0, true);
/// let mut session = BusSession::bring_up(&port).unwrap();
/// assert!(session.spd_probe(0).is_some());
/// assert!(port.stats().starts > 0);
/// ```
#[derive(Debug)]
pub struct SimulatedPort {
    transport: Transport,
    state: RefCell<Platform>,
}

impl Default for SimulatedPort {
    fn default() -> Self {
        Self::new()
    }
}

fn config_header(vendor: u16, device: u16, revision: u8) -> [u8; 256] {
    let mut space = [0u8; 256];
    space[0..2].copy_from_slice(&vendor.to_le_bytes());
    space[2..4].copy_from_slice(&device.to_le_bytes());
    space[4..6].copy_from_slice(&pci::COMMAND_IO_SPACE.to_le_bytes());
    space[usize::from(pci::CFG_REVISION)] = revision;
    space
}

/// Where the port-select field of an SB800-class part lives
fn port_sel_layout(vendor: u16, device: u16, revision: u8, pm: &[u8; 256]) -> (u8, u8, u8) {
    use piix4::port_sel;
    let kerncz = device == piix4::DEVICE_KERNCZ
        || (device == piix4::DEVICE_HUDSON2 && revision >= piix4::HUDSON2_KERNCZ_PORT_REVISION);
    if vendor == VENDOR_ATI {
        let reg = if pm[usize::from(port_sel::SELECTOR)] & 1 != 0 {
            port_sel::ALTERNATE
        } else {
            port_sel::PRIMARY
        };
        (reg, port_sel::MASK, port_sel::SHIFT)
    } else if kerncz {
        (port_sel::KERNCZ, port_sel::MASK_KERNCZ, port_sel::SHIFT_KERNCZ)
    } else {
        (port_sel::ALTERNATE, port_sel::MASK, port_sel::SHIFT)
    }
}

impl SimulatedPort {
    /// Empty platform: no controller, no modules
    pub fn new() -> Self {
        Self {
            transport: Transport::Direct,
            state: RefCell::new(Platform::default()),
        }
    }

    /// Serve transactions through the delegated routines instead of registers
    #[must_use]
    pub fn delegated(mut self) -> Self {
        self.transport = Transport::Delegated;
        self
    }

    /// Add an Intel controller at 00:1f.3 with the host enabled
    #[must_use]
    pub fn with_i801(self, device_id: u16) -> Self {
        self.with_i801_hostc(device_id, i801::hostc::HST_EN)
    }

    /// Add an Intel controller with an explicit HOSTC value
    #[must_use]
    pub fn with_i801_hostc(self, device_id: u16, hostc: u8) -> Self {
        let features = i801::lookup(device_id).map_or(
            i801::Features {
                pec: false,
                block_buffer: false,
                block_proc_call: false,
            },
            |d| d.features,
        );
        {
            let mut p = self.state.borrow_mut();
            let bdf = i801::LOCATION_ICH;
            let mut space = config_header(VENDOR_INTEL, device_id, 0x10);
            space[usize::from(i801::CFG_SMBBAR)..usize::from(i801::CFG_SMBBAR) + 4]
                .copy_from_slice(&(u32::from(I801_BASE) | 1).to_le_bytes());
            space[usize::from(i801::CFG_HOSTC)] = hostc;
            p.pci.insert(bdf, space);
            p.i801 = Some(Host::new(Flavor::I801(features), I801_BASE, bdf));
        }
        self
    }

    /// Add a PIIX4-family controller
    ///
    /// SB800-class parts get their base programmed into the PM block (and the
    /// memory-mapped window on the newest FCHs); everything else gets it in
    /// PCI configuration space.
    #[must_use]
    pub fn with_piix4(self, vendor: u16, device: u16, revision: u8) -> Self {
        {
            let mut p = self.state.borrow_mut();
            let sb800 = piix4::is_sb800_class(vendor, device, revision);
            let bdf = if sb800 || vendor == VENDOR_ATI {
                AMD_SMBUS_LOCATION
            } else {
                PIIX4_LEGACY_LOCATION
            };
            let mut space = config_header(vendor, device, revision);

            if sb800 {
                let mut regs = [0u8; 256];
                let [lo, hi] = PIIX4_BASE.to_le_bytes();
                if piix4::uses_fch_enable_register(vendor, device, revision) {
                    regs[usize::from(piix4::PM_SMB_EN_FCH)] = piix4::SMB_EN_FCH_BIT;
                    regs[usize::from(piix4::PM_SMB_EN_FCH) + 1] = hi;
                } else {
                    regs[usize::from(piix4::PM_SMB_EN_SB800)] = (lo & 0xE0) | piix4::SMB_EN_SB800_BIT;
                    regs[usize::from(piix4::PM_SMB_EN_SB800) + 1] = hi;
                }
                let port_sel = port_sel_layout(vendor, device, revision, &regs);
                p.pm = Some(Pm {
                    regs,
                    index: 0,
                    mmio_only: piix4::uses_pm_mmio(vendor, device, revision),
                    port_sel,
                });
            } else {
                let reg = usize::from(piix4::legacy_base_register(vendor, device));
                space[reg..reg + 2].copy_from_slice(&(PIIX4_BASE | 1).to_le_bytes());
                space[usize::from(piix4::CFG_HSTCFG)] = piix4::hstcfg::HST_EN;
            }

            p.pci.insert(bdf, space);
            p.piix4 = Some(Host::new(Flavor::Piix4, PIIX4_BASE, bdf));
        }
        self
    }

    /// Add an active IMC behind the KERNCZ LPC bridge
    #[must_use]
    pub fn with_imc(self) -> Self {
        {
            let mut p = self.state.borrow_mut();
            let mut space = config_header(VENDOR_AMD, LPC_KERNCZ_DEVICE, 0x51);
            space[usize::from(piix4::IMC_LPC_CFG)] = piix4::IMC_ACTIVE;
            p.pci.insert(piix4::IMC_LPC, space);
            p.imc = Some(Imc {
                index: 0,
                regs: [0; 256],
                asleep: false,
            });
        }
        self
    }

    /// Plug a DDR3 module (and its sensor when `thermal`)
    #[must_use]
    pub fn with_ddr3(self, slot: u8, thermal: bool) -> Self {
        self.attach(spd::spd_address(slot), devices::eeprom(devices::ddr3_image(thermal)));
        if thermal {
            self.attach(spd::ts_address(slot), devices::sensor());
        }
        self
    }

    /// Plug a DDR4 module (and its sensor when `thermal`)
    #[must_use]
    pub fn with_ddr4(self, slot: u8, thermal: bool) -> Self {
        self.attach(spd::spd_address(slot), devices::ee1004(devices::ddr4_image(thermal)));
        if thermal {
            self.attach(spd::ts_address(slot), devices::sensor());
        }
        self
    }

    /// Plug a DDR5 module; `thermal` picks an SPD5118 over an SPD5108 hub
    #[must_use]
    pub fn with_ddr5(self, slot: u8, thermal: bool) -> Self {
        self.attach(spd::spd_address(slot), devices::hub(devices::ddr5_image(), thermal));
        self
    }

    fn attach(&self, address: u8, slave: Slave) {
        self.state.borrow_mut().segment.attach(address, slave);
    }

    /// Turn on a fault
    pub fn inject(&self, fault: Fault) {
        let mut p = self.state.borrow_mut();
        if !p.faults.contains(&fault) {
            p.faults.push(fault);
        }
    }

    /// Turn every fault off
    pub fn clear_faults(&self) {
        let mut guard = self.state.borrow_mut();
        let p = &mut *guard;
        p.faults.clear();
        for host in [p.i801.as_mut(), p.piix4.as_mut()].into_iter().flatten() {
            host.stalled = false;
        }
    }

    /// Snapshot of the spy counters
    pub fn stats(&self) -> SimStats {
        self.state.borrow().stats.clone()
    }

    /// Zero the spy counters
    pub fn reset_stats(&self) {
        self.state.borrow_mut().stats = SimStats::default();
    }

    /// Set the raw temperature word a slot's sensor reports
    pub fn set_temperature(&self, slot: u8, raw: u16) {
        let mut p = self.state.borrow_mut();
        if let Some(Slave::Hub(hub)) = p.segment.slave_mut(spd::spd_address(slot)) {
            hub.set_temperature(raw);
        }
        if let Some(Slave::Sensor(sensor)) = p.segment.slave_mut(spd::ts_address(slot)) {
            sensor.set_temperature(raw);
        }
    }

    /// Poke a DDR5 hub management register behind the driver's back
    pub fn set_hub_register(&self, slot: u8, register: u8, value: u8) {
        let mut p = self.state.borrow_mut();
        if let Some(Slave::Hub(hub)) = p.segment.slave_mut(spd::spd_address(slot)) {
            hub.mr[usize::from(register & 0x7F)] = value;
        }
    }

    /// Read a DDR5 hub management register
    pub fn hub_register(&self, slot: u8, register: u8) -> Option<u8> {
        match self.state.borrow().segment.slave(spd::spd_address(slot)) {
            Some(Slave::Hub(hub)) => Some(hub.mr[usize::from(register & 0x7F)]),
            _ => None,
        }
    }

    /// Byte the module in `slot` stores at logical `address`
    pub fn spd_byte(&self, slot: u8, address: u16) -> Option<u8> {
        let p = self.state.borrow();
        let data = match p.segment.slave(spd::spd_address(slot))? {
            Slave::Eeprom { data, .. } | Slave::Ee1004 { data, .. } => data,
            Slave::Hub(hub) => &hub.nvm,
            Slave::Sensor(_) => return None,
        };
        data.get(usize::from(address)).copied()
    }

    /// Page currently latched by the DDR4 EE1004s
    pub fn ee1004_page(&self) -> u8 {
        self.state.borrow().segment.ee1004_page()
    }

    /// Whether the I801 in-use semaphore is held
    pub fn i801_inuse(&self) -> bool {
        self.state.borrow().i801.as_ref().is_some_and(|h| h.inuse)
    }

    /// Whether the SB800 host semaphore is held
    pub fn piix4_semaphore(&self) -> bool {
        self.state
            .borrow()
            .piix4
            .as_ref()
            .is_some_and(|h| h.slvcnt & piix4::slvcnt::HOST_SEMAPHORE != 0)
    }

    /// SMBus port the SB800 multiplexer currently routes to
    pub fn selected_port(&self) -> Option<u8> {
        self.state.borrow().pm.as_ref().map(Pm::selected_port)
    }

    /// Whether the IMC is asleep
    pub fn imc_asleep(&self) -> Option<bool> {
        self.state.borrow().imc.as_ref().map(|imc| imc.asleep)
    }

    /// Whether the bus lock is currently held
    pub fn lock_held(&self) -> bool {
        self.state.borrow().lock_held
    }

    fn with<T>(&self, f: impl FnOnce(&mut Platform) -> T) -> T {
        let mut p = self.state.borrow_mut();
        p.stats.port_calls += 1;
        f(&mut p)
    }
}

impl BusPort for SimulatedPort {
    fn transport(&self) -> Transport {
        self.transport
    }

    fn read_io8(&self, addr: u16) -> Result<u8> {
        Ok(self.with(|p| p.io_read(addr)))
    }

    fn write_io8(&self, addr: u16, value: u8) -> Result<()> {
        self.with(|p| p.io_write(addr, value));
        Ok(())
    }

    fn read_pci8(&self, bdf: Bdf, offset: u8) -> Result<u8> {
        // Truncation intended: one byte requested
        #[allow(clippy::cast_possible_truncation)]
        Ok(self.with(|p| p.config(bdf, offset, 1)) as u8)
    }

    fn read_pci16(&self, bdf: Bdf, offset: u8) -> Result<u16> {
        #[allow(clippy::cast_possible_truncation)]
        Ok(self.with(|p| p.config(bdf, offset, 2)) as u16)
    }

    fn read_pci32(&self, bdf: Bdf, offset: u8) -> Result<u32> {
        Ok(self.with(|p| p.config(bdf, offset, 4)))
    }

    fn write_pci8(&self, bdf: Bdf, offset: u8, value: u8) -> Result<()> {
        self.with(|p| p.set_config(bdf, offset, u32::from(value), 1));
        Ok(())
    }

    fn write_pci16(&self, bdf: Bdf, offset: u8, value: u16) -> Result<()> {
        self.with(|p| p.set_config(bdf, offset, u32::from(value), 2));
        Ok(())
    }

    fn write_pci32(&self, bdf: Bdf, offset: u8, value: u32) -> Result<()> {
        self.with(|p| p.set_config(bdf, offset, value, 4));
        Ok(())
    }

    fn read_mmio32(&self, phys: u64) -> Result<u32> {
        Ok(self.with(|p| match (p.pm_window(phys, 4), p.pm.as_ref()) {
            (Some(off), Some(pm)) => {
                u32::from_le_bytes([pm.regs[off], pm.regs[off + 1], pm.regs[off + 2], pm.regs[off + 3]])
            }
            _ => u32::MAX,
        }))
    }

    fn write_mmio8(&self, phys: u64, value: u8) -> Result<()> {
        self.with(|p| {
            p.stats.mmio_byte_writes += 1;
            if let (Some(off), Some(pm)) = (p.pm_window(phys, 1), p.pm.as_mut()) {
                pm.regs[off] = value;
            }
        });
        Ok(())
    }

    fn sleep_micros(&self, us: u32) {
        self.with(|p| p.stats.slept_us += u64::from(us));
    }

    fn acquire_bus_lock(&self, _timeout: Duration) -> Result<()> {
        self.with(|p| {
            if p.lock_held || p.has(Fault::LockContended) {
                return Err(SmbusError::Busy { status: 0 });
            }
            p.lock_held = true;
            p.stats.lock_acquisitions += 1;
            Ok(())
        })
    }

    fn release_bus_lock(&self) -> Result<()> {
        self.with(|p| p.lock_held = false);
        Ok(())
    }

    fn delegate(&self, routine: &str, input: &[u64], output_len: usize) -> Result<Vec<u64>> {
        if self.transport != Transport::Delegated {
            return Err(SmbusError::unsupported(format!(
                "direct transport cannot run {routine}"
            )));
        }
        let mut out = self.with(|p| match routine {
            routines::I801_IDENTITY => p.identity(p.i801.as_ref()),
            routines::PIIX4_IDENTITY => p.identity(p.piix4.as_ref()),
            routines::I801_XFER => p.delegated_xfer(input, false),
            routines::PIIX4_XFER => p.delegated_xfer(input, true),
            routines::PIIX4_PORT_SEL => {
                // Truncation intended: port numbers are tiny
                #[allow(clippy::cast_possible_truncation)]
                let port = input.first().copied().unwrap_or(0) as u8;
                p.pm
                    .as_mut()
                    .map(|pm| vec![u64::from(pm.select(port))])
                    .ok_or_else(|| SmbusError::unsupported("no port multiplexer"))
            }
            other => Err(SmbusError::unsupported(format!("unknown routine {other}"))),
        })?;
        out.resize(output_len, 0);
        Ok(out)
    }
}
