//! PIIX4-compatible SMBus controllers
//!
//! Two bring-up paths share one transaction engine:
//!
//! - **Legacy** (Intel PIIX4, EFAR, ServerWorks, early ATI, VIA): base and
//!   enable bit in PCI configuration space.
//! - **SB800-class** (ATI SBx00 rev ≥ 0x40, every AMD/Hygon FCH): base and
//!   enable bit in the PM block, a multiplexed bus, a host semaphore shared
//!   with firmware, and on KERNCZ an IMC that must be asked to keep off the
//!   bus.
//!
//! An SB800 transaction is bracketed as
//!
//! ```text
//! semaphore ─► IMC sleep ─► select port ─► transact ─► restore port ─► IMC wake ─► release
//! ```

use crate::config::BusConfig;
use crate::controller::{
    enable_io_space, read_identity, scan_bus0, BackendKind, Capabilities, Controller, ControllerInfo, Detected,
    Quirks,
};
use crate::delegate;
use crate::error::{BusFault, Result, SmbusError};
use crate::port::{BusPort, Transport};
use crate::protocol::{check_block_len, Direction, Payload, Protocol, Transaction};
use smbus_chip::delegate::{PIIX4_IDENTITY, PIIX4_PORT_SEL, PIIX4_XFER};
use smbus_chip::pci::{Bdf, PciIdentity, VENDOR_ATI};
use smbus_chip::piix4::{
    self, control, imc, port_sel, slvcnt, status, BLKDAT, HSTADD, HSTCMD, HSTCNT, HSTDAT0,
    HSTDAT1, HSTSTS, SLVCNT,
};
use smbus_chip::PollBudget;
use tracing::{debug, info, trace, warn};

/// Where AMD/ATI parts put the SMBus function
const AMD_SMBUS_LOCATION: Bdf = Bdf::new(0, 0x14, 0);

/// Access to the SB800 power-management block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PmAccess {
    /// Index/data pair at 0xCD6/0xCD7
    IndexData,
    /// Memory-mapped window (index/data may be disabled)
    Mmio,
}

impl PmAccess {
    fn read<P: BusPort + ?Sized>(self, port: &P, index: u8) -> Result<u8> {
        match self {
            Self::IndexData => {
                port.write_io8(piix4::SB800_PM_INDEX, index)?;
                port.read_io8(piix4::SB800_PM_DATA)
            }
            Self::Mmio => {
                let word = port.read_mmio32(piix4::SB800_PM_MMIO + u64::from(index & !3))?;
                Ok(word.to_le_bytes()[usize::from(index & 3)])
            }
        }
    }

    fn write<P: BusPort + ?Sized>(self, port: &P, index: u8, value: u8) -> Result<()> {
        match self {
            Self::IndexData => {
                port.write_io8(piix4::SB800_PM_INDEX, index)?;
                port.write_io8(piix4::SB800_PM_DATA, value)
            }
            // Byte-wide: neighbouring PM registers hold the SMBus decode enables
            Self::Mmio => port.write_mmio8(piix4::SB800_PM_MMIO + u64::from(index), value),
        }
    }
}

/// Port multiplexer location on an SB800-class part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PortSelect {
    register: u8,
    mask: u8,
    shift: u8,
}

/// SB800-class state discovered at init
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sb800 {
    pm: PmAccess,
    port_select: PortSelect,
    notify_imc: bool,
}

/// PIIX4-family host controller
#[derive(Debug)]
pub struct Piix4 {
    info: ControllerInfo,
    poll: PollBudget,
    sb800: Option<Sb800>,
    port: u8,
}

impl Controller for Piix4 {
    const KIND: BackendKind = BackendKind::Piix4;

    fn detect<P: BusPort + ?Sized>(port: &P) -> Result<Option<Detected>> {
        if port.transport() == Transport::Delegated {
            return Ok(delegate::identify(port, PIIX4_IDENTITY, AMD_SMBUS_LOCATION)
                .filter(|d| piix4::lookup(d.identity.vendor_id, d.identity.device_id).is_some()));
        }
        Ok(scan_bus0(port, |id| piix4::lookup(id.vendor_id, id.device_id).is_some())?.map(
            |identity| Detected {
                identity,
                io_base: None,
            },
        ))
    }

    fn init<P: BusPort + ?Sized>(port: &P, detected: Detected, config: &BusConfig) -> Result<Self> {
        let identity = detected.identity;
        let PciIdentity {
            vendor_id,
            device_id,
            revision,
            bdf,
        } = identity;
        let device = piix4::lookup(vendor_id, device_id).ok_or(SmbusError::NoDevice)?;
        let transport = port.transport();
        let sb800_class = piix4::is_sb800_class(vendor_id, device_id, revision);

        let ports = piix4::port_count(vendor_id, device_id, revision);
        if config.piix4_port >= ports {
            return Err(SmbusError::param(format!(
                "{} has {ports} SMBus port(s), port {} requested",
                device.name, config.piix4_port
            )));
        }

        let mut quirks = Quirks {
            post_start_delay: piix4::needs_start_delay(vendor_id, device_id),
            ..Quirks::default()
        };

        let (base, sb800) = match transport {
            Transport::Delegated => {
                let base = detected
                    .io_base
                    .ok_or_else(|| SmbusError::port("delegated identity carried no I/O base"))?;
                (base, None)
            }
            Transport::Direct if sb800_class => {
                let (base, sb800) = init_sb800(port, &identity)?;
                quirks.memory_mapped_base = sb800.pm == PmAccess::Mmio;
                quirks.notifies_imc = sb800.notify_imc;
                (base, Some(sb800))
            }
            Transport::Direct => (init_legacy(port, &identity)?, None),
        };

        if base == 0 {
            return Err(SmbusError::unsupported(format!(
                "{} at {bdf}: SMBus base unassigned",
                device.name
            )));
        }

        let info = ControllerInfo {
            kind: BackendKind::Piix4,
            name: device.name,
            identity,
            base,
            transport,
            capabilities: Capabilities {
                block: true,
                block_proc_call: false,
                proc_call: false,
                pec: false,
            },
            quirks,
        };
        debug!("{}: base {base:#06x}, {sb800:?}", info.name);

        Ok(Self {
            info,
            poll: config.piix4_poll,
            sb800,
            port: config.piix4_port,
        })
    }

    fn info(&self) -> &ControllerInfo {
        &self.info
    }

    fn check(&self, tx: &Transaction) -> Result<()> {
        let name = self.info.name;
        match tx.protocol {
            Protocol::ProcCall | Protocol::BlockProcCall => Err(SmbusError::unsupported(format!(
                "{name} has no process call"
            ))),
            _ if tx.pec => Err(SmbusError::unsupported(format!("{name} has no hardware PEC"))),
            _ => Ok(()),
        }
    }

    fn xfer<P: BusPort + ?Sized>(&mut self, port: &P, tx: &Transaction) -> Result<Payload> {
        let result = if self.info.transport == Transport::Delegated {
            self.xfer_delegated(port, tx)
        } else if let Some(sb800) = self.sb800 {
            self.xfer_sb800(port, sb800, tx)
        } else {
            self.transact(port, tx)
        };
        match &result {
            Ok(_) => trace!("{:#04x} {:?}: ok", tx.slave, tx.protocol),
            Err(e) => debug!("{:#04x} {:?}: {e}", tx.slave, tx.protocol),
        }
        result
    }
}

// ── Bring-up ─────────────────────────────────────────────────────────────────

fn init_legacy<P: BusPort + ?Sized>(port: &P, identity: &PciIdentity) -> Result<u16> {
    let bdf = identity.bdf;
    let register = piix4::legacy_base_register(identity.vendor_id, identity.device_id);
    let base = port.read_pci16(bdf, register)? & piix4::SMBBA_MASK;
    if base == 0 {
        return Ok(0);
    }

    let hstcfg = port.read_pci8(bdf, piix4::CFG_HSTCFG)?;
    if hstcfg & piix4::hstcfg::HST_EN == 0 {
        return Err(SmbusError::unsupported(format!(
            "host controller at {bdf} disabled by firmware"
        )));
    }
    enable_io_space(port, bdf)?;
    Ok(base)
}

fn init_sb800<P: BusPort + ?Sized>(port: &P, identity: &PciIdentity) -> Result<(u16, Sb800)> {
    let PciIdentity {
        vendor_id,
        device_id,
        revision,
        bdf,
    } = *identity;

    let pm = if piix4::uses_pm_mmio(vendor_id, device_id, revision) {
        PmAccess::Mmio
    } else {
        PmAccess::IndexData
    };

    let (enabled, base) = if piix4::uses_fch_enable_register(vendor_id, device_id, revision) {
        let lo = pm.read(port, piix4::PM_SMB_EN_FCH)?;
        let hi = pm.read(port, piix4::PM_SMB_EN_FCH + 1)?;
        (lo & piix4::SMB_EN_FCH_BIT != 0, u16::from(hi) << 8)
    } else {
        let lo = pm.read(port, piix4::PM_SMB_EN_SB800)?;
        let hi = pm.read(port, piix4::PM_SMB_EN_SB800 + 1)?;
        (
            lo & piix4::SMB_EN_SB800_BIT != 0,
            u16::from_le_bytes([lo, hi]) & piix4::SB800_BASE_MASK,
        )
    };
    if !enabled {
        return Err(SmbusError::unsupported(format!(
            "SMBus at {bdf} disabled in the PM block"
        )));
    }

    let port_select = if vendor_id == VENDOR_ATI {
        let alternate = pm.read(port, port_sel::SELECTOR)? & 1 != 0;
        PortSelect {
            register: if alternate {
                port_sel::ALTERNATE
            } else {
                port_sel::PRIMARY
            },
            mask: port_sel::MASK,
            shift: port_sel::SHIFT,
        }
    } else if piix4::uses_kerncz_port_select(vendor_id, device_id, revision) {
        PortSelect {
            register: port_sel::KERNCZ,
            mask: port_sel::MASK_KERNCZ,
            shift: port_sel::SHIFT_KERNCZ,
        }
    } else {
        PortSelect {
            register: port_sel::ALTERNATE,
            mask: port_sel::MASK,
            shift: port_sel::SHIFT,
        }
    };

    let notify_imc = device_id == piix4::DEVICE_KERNCZ
        && read_identity(port, piix4::IMC_LPC)?.is_some()
        && port.read_pci8(piix4::IMC_LPC, piix4::IMC_LPC_CFG)? & piix4::IMC_ACTIVE != 0;
    if notify_imc {
        info!("IMC active, will request sleep around transactions");
    }

    Ok((
        base,
        Sb800 {
            pm,
            port_select,
            notify_imc,
        },
    ))
}

// ── Transactions ─────────────────────────────────────────────────────────────

const fn kind_bits(protocol: Protocol) -> u8 {
    match protocol {
        Protocol::Quick => control::QUICK,
        Protocol::Byte => control::BYTE,
        Protocol::ByteData => control::BYTE_DATA,
        Protocol::WordData | Protocol::ProcCall => control::WORD_DATA,
        Protocol::BlockData | Protocol::BlockProcCall => control::BLOCK_DATA,
    }
}

impl Piix4 {
    const fn reg(&self, offset: u16) -> u16 {
        self.info.base + offset
    }

    fn xfer_delegated<P: BusPort + ?Sized>(&self, port: &P, tx: &Transaction) -> Result<Payload> {
        if self.port == 0 {
            return delegate::xfer(port, PIIX4_XFER, tx);
        }
        let previous = port
            .delegate(PIIX4_PORT_SEL, &[u64::from(self.port)], 1)?
            .first()
            .copied()
            .unwrap_or(0);
        let result = delegate::xfer(port, PIIX4_XFER, tx);
        if let Err(e) = port.delegate(PIIX4_PORT_SEL, &[previous], 1) {
            warn!("{}: cannot restore port {previous}: {e}", self.info.name);
        }
        result
    }

    fn xfer_sb800<P: BusPort + ?Sized>(&self, port: &P, sb800: Sb800, tx: &Transaction) -> Result<Payload> {
        self.acquire_semaphore(port)?;

        let imc_asleep = sb800.notify_imc && self.imc_command(port, imc::SLEEP);

        let result = self.with_port_selected(port, sb800, |this| this.transact(port, tx));

        if imc_asleep {
            self.imc_command(port, imc::WAKE);
        }
        if let Err(e) = self.release_semaphore(port) {
            warn!("{}: cannot release host semaphore: {e}", self.info.name);
        }
        result
    }

    fn with_port_selected<P, T>(
        &self,
        port: &P,
        sb800: Sb800,
        f: impl FnOnce(&Self) -> Result<T>,
    ) -> Result<T>
    where
        P: BusPort + ?Sized,
    {
        let PortSelect {
            register,
            mask,
            shift,
        } = sb800.port_select;
        let saved = sb800.pm.read(port, register)?;
        let wanted = (saved & !mask) | ((self.port << shift) & mask);
        if wanted != saved {
            sb800.pm.write(port, register, wanted)?;
        }

        let result = f(self);

        if wanted != saved {
            if let Err(e) = sb800.pm.write(port, register, saved) {
                warn!("{}: cannot restore port selection: {e}", self.info.name);
            }
        }
        result
    }

    fn acquire_semaphore<P: BusPort + ?Sized>(&self, port: &P) -> Result<()> {
        let mut value = 0;
        for _ in 0..piix4::SEMAPHORE_POLL.retries {
            let current = port.read_io8(self.reg(SLVCNT))?;
            port.write_io8(self.reg(SLVCNT), current | slvcnt::HOST_SEMAPHORE)?;
            value = port.read_io8(self.reg(SLVCNT))?;
            if value & slvcnt::HOST_SEMAPHORE != 0 {
                return Ok(());
            }
            port.sleep_micros(piix4::SEMAPHORE_POLL.quantum_us);
        }
        debug!("{}: firmware holds the host semaphore", self.info.name);
        Err(SmbusError::Busy { status: value })
    }

    fn release_semaphore<P: BusPort + ?Sized>(&self, port: &P) -> Result<()> {
        let current = port.read_io8(self.reg(SLVCNT))?;
        port.write_io8(self.reg(SLVCNT), current | slvcnt::HOST_RELEASE)
    }

    /// Send a mailbox command to the IMC and wait for it to acknowledge
    fn imc_command<P: BusPort + ?Sized>(&self, port: &P, command: u8) -> bool {
        let handshake = || -> Result<bool> {
            let write = |index: u8, value: u8| -> Result<()> {
                port.write_io8(piix4::IMC_INDEX, index)?;
                port.write_io8(piix4::IMC_DATA, value)
            };
            write(imc::ARG, 0)?;
            write(imc::CMD, command)?;
            write(imc::DOORBELL, imc::RING)?;

            for _ in 0..piix4::IMC_POLL.retries {
                port.write_io8(piix4::IMC_INDEX, imc::ARG)?;
                if port.read_io8(piix4::IMC_DATA)? == imc::ACK {
                    return Ok(true);
                }
                port.sleep_micros(piix4::IMC_POLL.quantum_us);
            }
            Ok(false)
        };
        match handshake() {
            Ok(true) => true,
            Ok(false) => {
                warn!("{}: IMC did not acknowledge command {command:#04x}", self.info.name);
                false
            }
            Err(e) => {
                warn!("{}: IMC mailbox failed: {e}", self.info.name);
                false
            }
        }
    }

    fn transact<P: BusPort + ?Sized>(&self, port: &P, tx: &Transaction) -> Result<Payload> {
        let sts = port.read_io8(self.reg(HSTSTS))?;
        if sts != 0 {
            debug!("{}: clearing status {sts:#04x}", self.info.name);
            port.write_io8(self.reg(HSTSTS), sts)?;
            let again = port.read_io8(self.reg(HSTSTS))?;
            if again != 0 {
                return Err(SmbusError::Busy { status: again });
            }
        }

        port.write_io8(self.reg(HSTADD), (tx.slave << 1) | tx.direction.bit())?;
        match tx.protocol {
            Protocol::Quick => {}
            Protocol::Byte => {
                if tx.direction == Direction::Write {
                    port.write_io8(self.reg(HSTCMD), tx.command)?;
                }
            }
            _ => port.write_io8(self.reg(HSTCMD), tx.command)?,
        }
        match &tx.payload {
            Payload::None => {}
            Payload::Byte(b) => port.write_io8(self.reg(HSTDAT0), *b)?,
            Payload::Word(w) => {
                let [lo, hi] = w.to_le_bytes();
                port.write_io8(self.reg(HSTDAT0), lo)?;
                port.write_io8(self.reg(HSTDAT1), hi)?;
            }
            Payload::Block(data) => {
                // Validated to 1..=32
                #[allow(clippy::cast_possible_truncation)]
                port.write_io8(self.reg(HSTDAT0), data.len() as u8)?;
                port.read_io8(self.reg(HSTCNT))?;
                for byte in data {
                    port.write_io8(self.reg(BLKDAT), *byte)?;
                }
            }
        }

        port.write_io8(self.reg(HSTCNT), kind_bits(tx.protocol))?;
        let cnt = port.read_io8(self.reg(HSTCNT))?;
        port.write_io8(self.reg(HSTCNT), cnt | control::START)?;

        port.sleep_micros(if self.info.quirks.post_start_delay {
            piix4::START_DELAY_CSB5_US
        } else {
            piix4::START_DELAY_US
        });

        let sts = self.wait(port)?;
        port.write_io8(self.reg(HSTSTS), sts)?;
        let left = port.read_io8(self.reg(HSTSTS))?;
        if left != 0 {
            warn!("{}: status {left:#04x} would not clear", self.info.name);
        }

        let fault = if sts & status::FAILED != 0 {
            Some(BusFault::Failed)
        } else if sts & status::BUS_COLL != 0 {
            Some(BusFault::Collision)
        } else if sts & status::DEV_ERR != 0 {
            Some(BusFault::Nak)
        } else {
            None
        };
        if let Some(fault) = fault {
            return Err(SmbusError::Bus {
                slave: tx.slave,
                protocol: tx.protocol,
                fault,
                status: sts,
            });
        }

        if !tx.reads_back() {
            return Ok(Payload::None);
        }
        Ok(match tx.protocol {
            Protocol::Quick => Payload::None,
            Protocol::Byte | Protocol::ByteData => Payload::Byte(port.read_io8(self.reg(HSTDAT0))?),
            Protocol::WordData | Protocol::ProcCall => {
                let lo = port.read_io8(self.reg(HSTDAT0))?;
                let hi = port.read_io8(self.reg(HSTDAT1))?;
                Payload::Word(u16::from_le_bytes([lo, hi]))
            }
            Protocol::BlockData | Protocol::BlockProcCall => {
                let len = check_block_len(port.read_io8(self.reg(HSTDAT0))?)?;
                port.read_io8(self.reg(HSTCNT))?;
                let mut data = Vec::with_capacity(len);
                for _ in 0..len {
                    data.push(port.read_io8(self.reg(BLKDAT))?);
                }
                Payload::Block(data)
            }
        })
    }

    fn wait<P: BusPort + ?Sized>(&self, port: &P) -> Result<u8> {
        let mut sts = 0;
        for _ in 0..self.poll.retries {
            port.sleep_micros(self.poll.quantum_us);
            sts = port.read_io8(self.reg(HSTSTS))?;
            if sts & status::HOST_BUSY == 0 && sts & (status::INTR | status::ERROR_FLAGS) != 0 {
                return Ok(sts);
            }
        }
        // No kill on this family; leave the flags cleared for the next caller
        port.write_io8(self.reg(HSTSTS), sts)?;
        Err(SmbusError::Timeout {
            retries: self.poll.retries,
            quantum_us: self.poll.quantum_us,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::sim::{Fault, SimulatedPort, PIIX4_BASE};
    use smbus_chip::pci::{VENDOR_AMD, VENDOR_HYGON, VENDOR_INTEL, VENDOR_VIA};

    fn bring_up(port: &SimulatedPort, config: &BusConfig) -> Piix4 {
        let detected = Piix4::detect(port).unwrap().unwrap();
        Piix4::init(port, detected, config).unwrap()
    }

    #[test]
    fn legacy_piix4_reads_config_space_base() {
        let port = SimulatedPort::new().with_piix4(VENDOR_INTEL, 0x7113, 0x02);
        let c = bring_up(&port, &BusConfig::default());
        assert_eq!(c.info().base, PIIX4_BASE);
        assert!(c.sb800.is_none());
    }

    #[test]
    fn via_uses_its_own_base_register() {
        let port = SimulatedPort::new().with_piix4(VENDOR_VIA, 0x3227, 0x00);
        let c = bring_up(&port, &BusConfig::default());
        assert_eq!(c.info().base, PIIX4_BASE);
    }

    #[test]
    fn fch_through_mmio_window() {
        let port = SimulatedPort::new().with_piix4(VENDOR_HYGON, piix4::DEVICE_KERNCZ, 0x61);
        let c = bring_up(&port, &BusConfig::default());
        assert_eq!(c.info().base, PIIX4_BASE);
        assert!(c.info().quirks.memory_mapped_base);
        assert_eq!(c.sb800.unwrap().port_select.register, port_sel::KERNCZ);
    }

    #[test]
    fn old_kerncz_uses_index_data() {
        let port = SimulatedPort::new().with_piix4(VENDOR_AMD, piix4::DEVICE_KERNCZ, 0x42);
        let c = bring_up(&port, &BusConfig::default());
        assert_eq!(c.info().base, PIIX4_BASE);
        assert!(!c.info().quirks.memory_mapped_base);
    }

    #[test]
    fn port_outside_selector_rejected() {
        let port = SimulatedPort::new().with_piix4(VENDOR_HYGON, piix4::DEVICE_KERNCZ, 0x61);
        let detected = Piix4::detect(&port).unwrap().unwrap();
        let config = BusConfig::default().with_piix4_port(4);
        let err = Piix4::init(&port, detected, &config).unwrap_err();
        assert!(matches!(err, SmbusError::Param { .. }));

        let detected = Piix4::detect(&port).unwrap().unwrap();
        let config = BusConfig::default().with_piix4_port(3);
        assert!(Piix4::init(&port, detected, &config).is_ok());
    }

    #[test]
    fn legacy_part_has_a_single_port() {
        let port = SimulatedPort::new().with_piix4(VENDOR_INTEL, 0x7113, 0x02);
        let detected = Piix4::detect(&port).unwrap().unwrap();
        let config = BusConfig::default().with_piix4_port(1);
        let err = Piix4::init(&port, detected, &config).unwrap_err();
        assert!(matches!(err, SmbusError::Param { .. }));
    }

    #[test]
    fn process_call_and_pec_rejected() {
        let port = SimulatedPort::new().with_piix4(VENDOR_INTEL, 0x7113, 0x02);
        let c = bring_up(&port, &BusConfig::default());
        assert!(c.check(&Transaction::proc_call(0x50, 0, 0)).is_err());
        assert!(c.check(&Transaction::read_byte_data(0x50, 0).with_pec()).is_err());
        assert!(c.check(&Transaction::read_block(0x50, 0)).is_ok());
    }

    #[test]
    fn semaphore_released_after_transaction() {
        let port = SimulatedPort::new()
            .with_piix4(VENDOR_AMD, piix4::DEVICE_KERNCZ, 0x61)
            .with_ddr4(0, false);
        let mut c = bring_up(&port, &BusConfig::default());
        let out = c.xfer(&port, &Transaction::read_byte_data(0x50, 2)).unwrap();
        assert_eq!(out, Payload::Byte(0x0C));
        assert!(!port.piix4_semaphore());
    }

    #[test]
    fn stall_times_out_without_kill() {
        let port = SimulatedPort::new()
            .with_piix4(VENDOR_INTEL, 0x7113, 0x02)
            .with_ddr3(0, false);
        let mut c = bring_up(&port, &BusConfig::default());
        port.inject(Fault::Stall);
        let err = c.xfer(&port, &Transaction::read_byte_data(0x50, 0)).unwrap_err();
        assert!(matches!(err, SmbusError::Timeout { .. }));
        assert_eq!(port.stats().kills, 0);
    }
}
