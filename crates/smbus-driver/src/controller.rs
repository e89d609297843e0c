//! Controller abstraction and registry
//!
//! A closed set of backends ([`Backend`]) behind one interface
//! ([`Controller`]). Bring-up walks [`PRIORITY`] and keeps the first backend
//! whose `detect` and `init` both succeed.

use crate::config::BusConfig;
use crate::controllers::{i801::I801, piix4::Piix4};
use crate::error::Result;
use crate::port::{BusPort, Transport};
use crate::protocol::{Payload, Transaction};
use smbus_chip::pci::{self, split_id, Bdf, PciIdentity};
use std::fmt;

/// Backend family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Intel ICH/PCH
    I801,

    /// PIIX4-compatible (Intel PIIX4, AMD/ATI/Hygon, VIA, ServerWorks, EFAR)
    Piix4,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I801 => write!(f, "i801"),
            Self::Piix4 => write!(f, "piix4"),
        }
    }
}

/// Bring-up order
pub const PRIORITY: [BackendKind; 2] = [BackendKind::I801, BackendKind::Piix4];

/// What a backend's `detect` found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detected {
    /// PCI identity of the controller
    pub identity: PciIdentity,
    /// I/O base, when the transport reports it directly
    pub io_base: Option<u16>,
}

/// Transfer capabilities granted by the device table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Block read/write
    pub block: bool,
    /// Block process call
    pub block_proc_call: bool,
    /// Process call
    pub proc_call: bool,
    /// Hardware packet error checking
    pub pec: bool,
}

/// Per-part behaviour discovered at init
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quirks {
    /// SPD EEPROM writes are blocked by the chipset
    pub write_protected: bool,
    /// The base was found through the memory-mapped PM window
    pub memory_mapped_base: bool,
    /// Extra settle time after START
    pub post_start_delay: bool,
    /// An IMC shares the bus and must be put to sleep around transactions
    pub notifies_imc: bool,
}

/// Everything bring-up learned about the active controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerInfo {
    /// Backend family
    pub kind: BackendKind,
    /// Marketing name from the device table
    pub name: &'static str,
    /// PCI identity
    pub identity: PciIdentity,
    /// I/O base
    pub base: u16,
    /// Transport in use
    pub transport: Transport,
    /// Capabilities
    pub capabilities: Capabilities,
    /// Quirks
    pub quirks: Quirks,
}

impl fmt::Display for ControllerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:04x}:{:04x} rev {:02x}] at {} base {:#06x} ({})",
            self.name,
            self.identity.vendor_id,
            self.identity.device_id,
            self.identity.revision,
            self.identity.bdf,
            self.base,
            self.transport
        )
    }
}

/// Interface every controller backend implements
pub trait Controller: Sized {
    /// Backend family
    const KIND: BackendKind;

    /// Look for a supported controller
    ///
    /// # Errors
    ///
    /// Returns error only if the port itself fails; "nothing found" is `Ok(None)`.
    fn detect<P: BusPort + ?Sized>(port: &P) -> Result<Option<Detected>>;

    /// Resolve the base address and read quirks
    ///
    /// # Errors
    ///
    /// Returns error if the controller is disabled or its base is unusable.
    fn init<P: BusPort + ?Sized>(port: &P, detected: Detected, config: &BusConfig) -> Result<Self>;

    /// What bring-up learned
    fn info(&self) -> &ControllerInfo;

    /// Reject requests this controller cannot carry, without touching hardware
    ///
    /// # Errors
    ///
    /// Returns `SmbusError::Unsupported`.
    fn check(&self, tx: &Transaction) -> Result<()>;

    /// Run one validated transaction. The caller holds the bus lock.
    ///
    /// # Errors
    ///
    /// Returns the bus error the controller reported.
    fn xfer<P: BusPort + ?Sized>(&mut self, port: &P, tx: &Transaction) -> Result<Payload>;
}

/// The active backend, chosen once at bring-up
#[derive(Debug)]
pub enum Backend {
    /// Intel ICH/PCH
    I801(I801),
    /// PIIX4-compatible
    Piix4(Piix4),
}

impl Backend {
    /// Bring up the first backend in [`PRIORITY`] that works
    pub fn probe<P: BusPort + ?Sized>(port: &P, config: &BusConfig) -> Option<Self> {
        for kind in PRIORITY {
            let attempt = match kind {
                BackendKind::I801 => bring_up::<I801, P>(port, config).map(|b| b.map(Self::I801)),
                BackendKind::Piix4 => bring_up::<Piix4, P>(port, config).map(|b| b.map(Self::Piix4)),
            };
            match attempt {
                Ok(Some(backend)) => {
                    tracing::info!("Using {kind} backend: {}", backend.info());
                    return Some(backend);
                }
                Ok(None) => tracing::debug!("{kind}: no matching controller"),
                Err(e) => tracing::info!("{kind}: detected but unusable: {e}"),
            }
        }
        tracing::info!("No supported SMBus controller");
        None
    }

    /// What bring-up learned
    pub fn info(&self) -> &ControllerInfo {
        match self {
            Self::I801(c) => c.info(),
            Self::Piix4(c) => c.info(),
        }
    }

    /// See [`Controller::check`]
    ///
    /// # Errors
    ///
    /// Returns `SmbusError::Unsupported`.
    pub fn check(&self, tx: &Transaction) -> Result<()> {
        match self {
            Self::I801(c) => c.check(tx),
            Self::Piix4(c) => c.check(tx),
        }
    }

    /// See [`Controller::xfer`]
    ///
    /// # Errors
    ///
    /// Returns the bus error the controller reported.
    pub fn xfer<P: BusPort + ?Sized>(&mut self, port: &P, tx: &Transaction) -> Result<Payload> {
        match self {
            Self::I801(c) => c.xfer(port, tx),
            Self::Piix4(c) => c.xfer(port, tx),
        }
    }
}

fn bring_up<C: Controller, P: BusPort + ?Sized>(port: &P, config: &BusConfig) -> Result<Option<C>> {
    let Some(detected) = C::detect(port)? else {
        return Ok(None);
    };
    C::init(port, detected, config).map(Some)
}

// ── PCI helpers ──────────────────────────────────────────────────────────────

/// Read the identity of one PCI function, `None` if absent
///
/// # Errors
///
/// Returns error if configuration space cannot be read.
pub fn read_identity<P: BusPort + ?Sized>(port: &P, bdf: Bdf) -> Result<Option<PciIdentity>> {
    let id = port.read_pci32(bdf, pci::CFG_VENDOR_ID)?;
    let (vendor_id, device_id) = split_id(id);
    if id == pci::ABSENT || vendor_id == 0xFFFF || vendor_id == 0 {
        return Ok(None);
    }
    let revision = port.read_pci8(bdf, pci::CFG_REVISION)?;
    Ok(Some(PciIdentity {
        bdf,
        vendor_id,
        device_id,
        revision,
    }))
}

/// First function on bus 0 accepted by `matches`
///
/// # Errors
///
/// Returns error if configuration space cannot be read.
pub fn scan_bus0<P, F>(port: &P, mut matches: F) -> Result<Option<PciIdentity>>
where
    P: BusPort + ?Sized,
    F: FnMut(&PciIdentity) -> bool,
{
    for device in 0..32 {
        for function in 0..8 {
            let bdf = Bdf::new(0, device, function);
            if let Some(identity) = read_identity(port, bdf)? {
                if matches(&identity) {
                    return Ok(Some(identity));
                }
            }
        }
    }
    Ok(None)
}

/// Make sure the function decodes I/O space
///
/// # Errors
///
/// Returns error if configuration space cannot be accessed.
pub fn enable_io_space<P: BusPort + ?Sized>(port: &P, bdf: Bdf) -> Result<()> {
    let command = port.read_pci16(bdf, pci::CFG_COMMAND)?;
    if command & pci::COMMAND_IO_SPACE == 0 {
        tracing::info!("Enabling I/O decoding on {bdf}");
        port.write_pci16(bdf, pci::CFG_COMMAND, command | pci::COMMAND_IO_SPACE)?;
    }
    Ok(())
}
