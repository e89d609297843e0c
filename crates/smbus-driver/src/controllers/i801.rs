//! Intel ICH/PCH SMBus controller
//!
//! Per transaction:
//!
//! ```text
//! CheckBusy ─busy─► Busy
//!     │
//! ProgramRegisters ─► AssertStart ─► PollCompletion ─► Success | ErrorFlags
//!     │                                   │
//!     └──── port failure / timeout ───────┴─► Kill
//!
//! always: write INUSE | STATUS_FLAGS back to HSTSTS
//! ```

use crate::config::BusConfig;
use crate::controller::{
    enable_io_space, read_identity, scan_bus0, BackendKind, Capabilities, Controller,
    ControllerInfo, Detected, Quirks,
};
use crate::delegate;
use crate::error::{BusFault, Result, SmbusError};
use crate::port::{BusPort, Transport};
use crate::protocol::{check_block_len, Direction, Payload, Protocol, Transaction};
use smbus_chip::delegate::{I801_IDENTITY, I801_XFER};
use smbus_chip::i801::{
    self, auxctl, auxsts, control, hostc, status, Features, AUXCTL, AUXSTS, BLKDAT, HSTADD,
    HSTCMD, HSTCNT, HSTDAT0, HSTDAT1, HSTSTS,
};
use smbus_chip::pci::{PciIdentity, VENDOR_INTEL};
use smbus_chip::PollBudget;
use tracing::{debug, info, trace, warn};

/// Intel SMBus host controller
#[derive(Debug)]
pub struct I801 {
    info: ControllerInfo,
    poll: PollBudget,
}

fn capabilities(features: Features) -> Capabilities {
    Capabilities {
        block: features.block_buffer,
        block_proc_call: features.block_proc_call,
        proc_call: true,
        pec: features.pec,
    }
}

const fn kind_bits(protocol: Protocol) -> u8 {
    match protocol {
        Protocol::Quick => control::QUICK,
        Protocol::Byte => control::BYTE,
        Protocol::ByteData => control::BYTE_DATA,
        Protocol::WordData => control::WORD_DATA,
        Protocol::ProcCall => control::PROC_CALL,
        Protocol::BlockData => control::BLOCK_DATA,
        Protocol::BlockProcCall => control::BLOCK_PROC_CALL,
    }
}

impl Controller for I801 {
    const KIND: BackendKind = BackendKind::I801;

    fn detect<P: BusPort + ?Sized>(port: &P) -> Result<Option<Detected>> {
        if port.transport() == Transport::Delegated {
            return Ok(delegate::identify(port, I801_IDENTITY, i801::LOCATION_ICH)
                .filter(|d| d.identity.vendor_id == VENDOR_INTEL)
                .filter(|d| i801::lookup(d.identity.device_id).is_some()));
        }

        let supported =
            |id: &PciIdentity| id.vendor_id == VENDOR_INTEL && i801::lookup(id.device_id).is_some();

        for bdf in [i801::LOCATION_ICH, i801::LOCATION_PCH_F4] {
            if let Some(identity) = read_identity(port, bdf)?.filter(supported) {
                return Ok(Some(Detected {
                    identity,
                    io_base: None,
                }));
            }
        }
        Ok(scan_bus0(port, supported)?.map(|identity| Detected {
            identity,
            io_base: None,
        }))
    }

    fn init<P: BusPort + ?Sized>(port: &P, detected: Detected, config: &BusConfig) -> Result<Self> {
        let identity = detected.identity;
        let device = i801::lookup(identity.device_id).ok_or(SmbusError::NoDevice)?;
        let transport = port.transport();

        let (base, write_protected) = match (transport, detected.io_base) {
            (Transport::Delegated, Some(base)) => (base, false),
            (Transport::Delegated, None) => {
                return Err(SmbusError::port("delegated identity carried no I/O base"))
            }
            (Transport::Direct, _) => {
                let bdf = identity.bdf;
                let bar = port.read_pci32(bdf, i801::CFG_SMBBAR)?;
                // Truncation intended: the I/O window lives in the low 16 bits
                #[allow(clippy::cast_possible_truncation)]
                let base = (bar & i801::SMBBAR_MASK) as u16;
                if base == 0 {
                    return Err(SmbusError::unsupported(format!(
                        "{} at {bdf}: SMBus BAR unassigned",
                        device.name
                    )));
                }
                enable_io_space(port, bdf)?;

                let original = port.read_pci8(bdf, i801::CFG_HOSTC)?;
                let mut value = original;
                if value & hostc::HST_EN == 0 {
                    info!("{} at {bdf}: enabling host controller", device.name);
                    value |= hostc::HST_EN;
                }
                if value & hostc::I2C_EN != 0 {
                    debug!("{} at {bdf}: leaving I2C mode", device.name);
                    value &= !hostc::I2C_EN;
                }
                if value != original {
                    port.write_pci8(bdf, i801::CFG_HOSTC, value)?;
                }
                (base, value & hostc::SPD_WD != 0)
            }
        };

        let info = ControllerInfo {
            kind: BackendKind::I801,
            name: device.name,
            identity,
            base,
            transport,
            capabilities: capabilities(device.features),
            quirks: Quirks {
                write_protected,
                ..Quirks::default()
            },
        };
        if write_protected {
            info!("{}: SPD write protection is on", info.name);
        }

        Ok(Self {
            info,
            poll: config.i801_poll,
        })
    }

    fn info(&self) -> &ControllerInfo {
        &self.info
    }

    fn check(&self, tx: &Transaction) -> Result<()> {
        let caps = self.info.capabilities;
        let name = self.info.name;
        match tx.protocol {
            Protocol::BlockData if !caps.block => Err(SmbusError::unsupported(format!(
                "{name} has no block buffer"
            ))),
            Protocol::BlockProcCall if !caps.block_proc_call => Err(SmbusError::unsupported(
                format!("{name} has no block process call"),
            )),
            _ if tx.pec && !caps.pec => {
                Err(SmbusError::unsupported(format!("{name} has no hardware PEC")))
            }
            _ => Ok(()),
        }
    }

    fn xfer<P: BusPort + ?Sized>(&mut self, port: &P, tx: &Transaction) -> Result<Payload> {
        if self.info.transport == Transport::Delegated {
            return delegate::xfer(port, I801_XFER, tx);
        }

        let result = self.transact(port, tx);
        if let Err(e) = &result {
            if matches!(e, SmbusError::Timeout { .. } | SmbusError::Port { .. }) {
                self.kill(port);
            }
        }

        // Clear what we left behind and release the in-use semaphore
        if let Err(e) = port.write_io8(self.reg(HSTSTS), status::INUSE_STS | status::STATUS_FLAGS) {
            warn!("{}: cannot release in-use bit: {e}", self.info.name);
        }

        match &result {
            Ok(_) => trace!("{:#04x} {:?}: ok", tx.slave, tx.protocol),
            Err(e) => debug!("{:#04x} {:?}: {e}", tx.slave, tx.protocol),
        }
        result
    }
}

impl I801 {
    const fn reg(&self, offset: u16) -> u16 {
        self.info.base + offset
    }

    fn transact<P: BusPort + ?Sized>(&self, port: &P, tx: &Transaction) -> Result<Payload> {
        let sts = port.read_io8(self.reg(HSTSTS))?;
        if sts & status::HOST_BUSY != 0 {
            port.write_io8(self.reg(HSTSTS), sts & status::STATUS_FLAGS)?;
            return Err(SmbusError::Busy { status: sts });
        }
        if sts & status::INUSE_STS != 0 {
            debug!("{}: in-use bit already set", self.info.name);
        }
        if sts & status::STATUS_FLAGS != 0 {
            debug!("{}: clearing stale status {sts:#04x}", self.info.name);
            port.write_io8(self.reg(HSTSTS), sts & status::STATUS_FLAGS)?;
        }

        let aux = self.program(port, tx)?;
        let result = self.run(port, tx);

        if aux != 0 {
            let current = port.read_io8(self.reg(AUXCTL))?;
            port.write_io8(self.reg(AUXCTL), current & !aux)?;
        }
        result
    }

    /// Load address, command and data. Returns the AUXCTL bits turned on.
    fn program<P: BusPort + ?Sized>(&self, port: &P, tx: &Transaction) -> Result<u8> {
        port.write_io8(self.reg(HSTADD), (tx.slave << 1) | tx.direction.bit())?;

        let write = tx.direction == Direction::Write;
        match tx.protocol {
            Protocol::Quick => {}
            Protocol::Byte => {
                if write {
                    port.write_io8(self.reg(HSTCMD), tx.command)?;
                }
            }
            Protocol::ByteData => {
                port.write_io8(self.reg(HSTCMD), tx.command)?;
                if let Some(b) = tx.payload.as_byte() {
                    port.write_io8(self.reg(HSTDAT0), b)?;
                }
            }
            Protocol::WordData | Protocol::ProcCall => {
                port.write_io8(self.reg(HSTCMD), tx.command)?;
                if let Some(w) = tx.payload.as_word() {
                    let [lo, hi] = w.to_le_bytes();
                    port.write_io8(self.reg(HSTDAT0), lo)?;
                    port.write_io8(self.reg(HSTDAT1), hi)?;
                }
            }
            Protocol::BlockData | Protocol::BlockProcCall => {
                port.write_io8(self.reg(HSTCMD), tx.command)?;
            }
        }

        let mut aux = 0;
        if tx.protocol.is_block() {
            aux |= auxctl::E32B;
        }
        if tx.pec {
            aux |= auxctl::CRC;
        }
        if aux != 0 {
            let current = port.read_io8(self.reg(AUXCTL))?;
            port.write_io8(self.reg(AUXCTL), current | aux)?;
            if tx.protocol.is_block() && port.read_io8(self.reg(AUXCTL))? & auxctl::E32B == 0 {
                return Err(SmbusError::unsupported(format!(
                    "{}: 32-byte buffer would not enable",
                    self.info.name
                )));
            }
        }

        if let Some(data) = tx.payload.as_block() {
            // Validated to 1..=32
            #[allow(clippy::cast_possible_truncation)]
            port.write_io8(self.reg(HSTDAT0), data.len() as u8)?;
            // Reading HSTCNT rewinds the block buffer index
            port.read_io8(self.reg(HSTCNT))?;
            for byte in data {
                port.write_io8(self.reg(BLKDAT), *byte)?;
            }
        }
        Ok(aux)
    }

    fn run<P: BusPort + ?Sized>(&self, port: &P, tx: &Transaction) -> Result<Payload> {
        let mut cnt = kind_bits(tx.protocol) | control::START;
        if tx.pec {
            cnt |= control::PEC_EN;
        }
        port.write_io8(self.reg(HSTCNT), cnt)?;

        let sts = self.wait(port)?;
        self.check_status(port, tx, sts)?;

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
        for _ in 0..self.poll.retries {
            port.sleep_micros(self.poll.quantum_us);
            let sts = port.read_io8(self.reg(HSTSTS))?;
            if sts & status::HOST_BUSY == 0 && sts & (status::ERROR_FLAGS | status::INTR) != 0 {
                return Ok(sts);
            }
        }
        Err(SmbusError::Timeout {
            retries: self.poll.retries,
            quantum_us: self.poll.quantum_us,
        })
    }

    fn check_status<P: BusPort + ?Sized>(&self, port: &P, tx: &Transaction, sts: u8) -> Result<()> {
        let fault = if sts & status::FAILED != 0 {
            BusFault::Failed
        } else if sts & status::DEV_ERR != 0 {
            if tx.pec && port.read_io8(self.reg(AUXSTS))? & auxsts::CRCE != 0 {
                port.write_io8(self.reg(AUXSTS), auxsts::CRCE)?;
                BusFault::Pec
            } else {
                BusFault::Nak
            }
        } else if sts & status::BUS_ERR != 0 {
            BusFault::Collision
        } else {
            return Ok(());
        };
        Err(SmbusError::Bus {
            slave: tx.slave,
            protocol: tx.protocol,
            fault,
            status: sts,
        })
    }

    /// Abort whatever the controller is doing; best effort, never fails
    fn kill<P: BusPort + ?Sized>(&self, port: &P) {
        warn!("{}: killing stuck transaction", self.info.name);
        let outcome = (|| -> Result<u8> {
            port.write_io8(self.reg(HSTCNT), control::KILL)?;
            port.sleep_micros(i801::KILL_DELAY_US);
            port.write_io8(self.reg(HSTCNT), 0)?;
            port.read_io8(self.reg(HSTSTS))
        })();
        match outcome {
            Ok(sts) if sts & status::HOST_BUSY != 0 => {
                warn!("{}: still busy after kill ({sts:#04x})", self.info.name);
            }
            Ok(sts) if sts & status::FAILED == 0 => {
                warn!("{}: kill not acknowledged ({sts:#04x})", self.info.name);
            }
            Ok(_) => {}
            Err(e) => warn!("{}: kill sequence failed: {e}", self.info.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::sim::{Fault, SimulatedPort, I801_BASE};

    fn bring_up(port: &SimulatedPort) -> I801 {
        let detected = I801::detect(port).unwrap().unwrap();
        I801::init(port, detected, &BusConfig::default()).unwrap()
    }

    #[test]
    fn init_reads_bar_and_write_protect() {
        let port = SimulatedPort::new().with_i801_hostc(0xA123, hostc::HST_EN | hostc::SPD_WD);
        let c = bring_up(&port);
        assert_eq!(c.info().base, I801_BASE);
        assert!(c.info().quirks.write_protected);
        assert!(c.info().capabilities.block);
    }

    #[test]
    fn init_enables_disabled_host() {
        let port = SimulatedPort::new().with_i801_hostc(0x7AA3, hostc::I2C_EN);
        bring_up(&port);
        let value = port.read_pci8(i801::LOCATION_ICH, i801::CFG_HOSTC).unwrap();
        assert_eq!(value & (hostc::HST_EN | hostc::I2C_EN), hostc::HST_EN);
    }

    #[test]
    fn unknown_device_is_not_detected() {
        let port = SimulatedPort::new().with_i801(0x1234);
        assert!(I801::detect(&port).unwrap().is_none());
    }

    #[test]
    fn block_without_buffer_is_unsupported() {
        let port = SimulatedPort::new().with_i801(0x2443);
        let c = bring_up(&port);
        assert!(matches!(
            c.check(&Transaction::read_block(0x50, 0)),
            Err(SmbusError::Unsupported { .. })
        ));
        assert!(c.check(&Transaction::read_byte_data(0x50, 0)).is_ok());
    }

    #[test]
    fn pec_error_reported_as_pec() {
        let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr4(0, false);
        let mut c = bring_up(&port);
        port.inject(Fault::PecError);
        let err = c
            .xfer(&port, &Transaction::read_byte_data(0x50, 2).with_pec())
            .unwrap_err();
        assert!(matches!(err, SmbusError::Bus { fault: BusFault::Pec, .. }));
    }

    #[test]
    fn in_use_released_after_error() {
        let port = SimulatedPort::new().with_i801(0x7AA3);
        let mut c = bring_up(&port);
        let err = c.xfer(&port, &Transaction::read_byte_data(0x50, 2)).unwrap_err();
        assert!(err.is_nak());
        assert!(!port.i801_inuse());
    }

    #[test]
    fn block_read_through_buffer() {
        let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr3(0, false);
        let mut c = bring_up(&port);
        let out = c.xfer(&port, &Transaction::read_block(0x50, 0x10)).unwrap();
        let data = out.as_block().unwrap();
        assert_eq!(data.len(), 32);
        assert_eq!(Some(data[0]), port.spd_byte(0, 0x10));
    }
}
