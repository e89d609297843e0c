//! Bus session: the single live handle to the bus
//!
//! Owns the port and the backend chosen at bring-up, serializes every
//! operation through the port's bus lock, and remembers which SPD page was
//! last selected on which slave so redundant page selects are skipped.
//!
//! ```text
//! spd_read(slot, a)
//!   └─ lock
//!       ├─ select page (skipped when cache == (slave, page))
//!       └─ read byte
//!      unlock
//! ```

use crate::config::{BusConfig, DumpMode};
use crate::controller::{Backend, ControllerInfo};
use crate::error::{Result, SmbusError};
use crate::port::BusPort;
use crate::protocol::{Direction, Payload, Protocol, Transaction};
use crate::spd::{ddr4, Generation, SpdDump, ThermalSensor};
use smbus_chip::spd::{self, memory_type, mr, MEMORY_TYPE_OFFSET, SLOT_COUNT};
use tracing::{debug, info, warn};

const SLOTS: usize = SLOT_COUNT as usize;

/// Last page selected, and on which slave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct PageCache {
    slave: Option<u8>,
    page: u8,
}

impl PageCache {
    fn matches(&self, slave: u8, page: u8) -> bool {
        self.slave == Some(slave) && self.page == page
    }

    fn set(&mut self, slave: u8, page: u8) {
        self.slave = Some(slave);
        self.page = page;
    }

    fn invalidate(&mut self) {
        self.slave = None;
    }
}

/// What the session has learned about one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct SlotState {
    generation: Option<Generation>,
    memory_type: u8,
    thermal: Option<bool>,
}

/// Live bus handle
///
/// `P` is any [`BusPort`]; pass `&port` to keep using the port afterwards.
#[derive(Debug)]
pub struct BusSession<P: BusPort> {
    port: P,
    backend: Backend,
    config: BusConfig,
    page: PageCache,
    slots: [SlotState; SLOTS],
}

impl<P: BusPort> BusSession<P> {
    /// Probe the controller registry with the default configuration
    ///
    /// `None` means no supported controller; that is not an error.
    pub fn bring_up(port: P) -> Option<Self> {
        Self::detect_and_init(port, BusConfig::default())
    }

    /// Probe the controller registry in priority order
    ///
    /// `None` means no supported controller; that is not an error.
    pub fn detect_and_init(port: P, config: BusConfig) -> Option<Self> {
        let backend = Backend::probe(&port, &config)?;
        Some(Self {
            port,
            backend,
            config,
            page: PageCache::default(),
            slots: [SlotState::default(); SLOTS],
        })
    }

    /// The active controller
    pub fn info(&self) -> &ControllerInfo {
        self.backend.info()
    }

    /// Session configuration
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// The underlying port
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Tear down the session and hand the port back
    pub fn into_port(self) -> P {
        self.port
    }

    // ── Raw transactions ─────────────────────────────────────────────────

    /// Run one transaction under the bus lock
    ///
    /// The request is validated and checked against the controller's
    /// capabilities before the port is touched.
    ///
    /// # Errors
    ///
    /// Returns `SmbusError::Param` or `SmbusError::Unsupported` without any
    /// bus access, or the failure the controller reported.
    pub fn xfer(&mut self, tx: &Transaction) -> Result<Payload> {
        tx.validate()?;
        self.backend.check(tx)?;
        // A raw transaction may move any page latch on the bus
        self.page.invalidate();
        self.with_lock(|s| s.backend.xfer(&s.port, tx))
    }

    fn with_lock<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.port.acquire_bus_lock(self.config.lock_timeout)?;
        let result = f(self);
        if let Err(e) = self.port.release_bus_lock() {
            warn!("Failed to release bus lock: {e}");
        }
        result
    }

    /// Transaction for internal sequences; the caller holds the lock
    fn raw_xfer(&mut self, tx: &Transaction) -> Result<Payload> {
        tx.validate()?;
        self.backend.check(tx)?;
        self.backend.xfer(&self.port, tx)
    }

    fn read_byte(&mut self, slave: u8, command: u8) -> Result<u8> {
        let tx = Transaction::read_byte_data(slave, command);
        match self.raw_xfer(&tx)? {
            Payload::Byte(b) => Ok(b),
            other => Err(SmbusError::port(format!("expected a byte, got {other:?}"))),
        }
    }

    fn read_word(&mut self, tx: &Transaction) -> Result<u16> {
        match self.raw_xfer(tx)? {
            Payload::Word(w) => Ok(w),
            other => Err(SmbusError::port(format!("expected a word, got {other:?}"))),
        }
    }

    // ── Paging ───────────────────────────────────────────────────────────

    /// Make `page` current for `slave`, skipping the write when cached
    fn select_page(&mut self, slave: u8, generation: Generation, page: u8) -> Result<()> {
        if !generation.is_paged() || self.page.matches(slave, page) {
            return Ok(());
        }
        let tx = match generation {
            Generation::Ddr4 => Transaction::write_byte_data(ddr4::page_select_slave(page), 0, 0),
            Generation::Ddr5 => Transaction::write_byte_data(slave, mr::LEGACY_CONFIG, page),
            Generation::Ddr3 => return Ok(()),
        };
        match self.raw_xfer(&tx) {
            Ok(_) => {
                debug!("{generation} page {page} selected for {slave:#04x}");
                self.page.set(slave, page);
                Ok(())
            }
            Err(e) => {
                self.page.invalidate();
                Err(e)
            }
        }
    }

    // ── Module detection ─────────────────────────────────────────────────

    /// Which generation answers in `slot`, probing on first use
    ///
    /// Tries DDR4, then DDR5, then a flat EEPROM. Any failure along the way
    /// means "not this generation". A positive answer is kept for the
    /// lifetime of the session.
    pub fn spd_probe(&mut self, slot: u8) -> Option<Generation> {
        let state = *self.slots.get(usize::from(slot))?;
        if state.generation.is_some() {
            return state.generation;
        }

        let found = match self.with_lock(|s| Ok(s.probe_slot(slot))) {
            Ok(found) => found,
            Err(e) => {
                debug!("slot {slot}: probe skipped: {e}");
                return None;
            }
        };
        let (generation, code) = found?;
        info!("slot {slot}: {generation} module (memory type {code:#04x})");
        self.slots[usize::from(slot)] = SlotState {
            generation: Some(generation),
            memory_type: code,
            thermal: None,
        };
        Some(generation)
    }

    fn probe_slot(&mut self, slot: u8) -> Option<(Generation, u8)> {
        let probes: [(Generation, fn(&mut Self, u8) -> Result<Option<u8>>); 3] = [
            (Generation::Ddr4, Self::probe_ddr4),
            (Generation::Ddr5, Self::probe_ddr5),
            (Generation::Ddr3, Self::probe_legacy),
        ];
        for (generation, probe) in probes {
            match probe(self, slot) {
                Ok(Some(code)) => return Some((generation, code)),
                Ok(None) => {}
                Err(e) => {
                    self.page.invalidate();
                    debug!("slot {slot}: not {generation}: {e}");
                }
            }
        }
        None
    }

    fn probe_ddr4(&mut self, slot: u8) -> Result<Option<u8>> {
        let slave = spd::spd_address(slot);
        // Only EE1004s acknowledge the page latch
        self.raw_xfer(&Transaction::quick(ddr4::page_select_slave(0), Direction::Write))?;
        self.select_page(slave, Generation::Ddr4, 0)?;
        let code = self.read_byte(slave, MEMORY_TYPE_OFFSET)?;
        Ok(memory_type::is_ddr4_family(code).then_some(code))
    }

    fn probe_ddr5(&mut self, slot: u8) -> Result<Option<u8>> {
        let slave = spd::spd_address(slot);
        // Confirm a hub before writing anything to it
        if self.read_byte(slave, mr::DEVICE_TYPE_MSB)? != mr::HUB_DEVICE_TYPE {
            return Ok(None);
        }
        let current = self.read_byte(slave, mr::LEGACY_CONFIG)? & mr::LEGACY_PAGE_MASK;
        self.page.set(slave, current);
        self.select_page(slave, Generation::Ddr5, 0)?;
        let code = self.read_byte(slave, spd::DDR5_MEM_SPACE | MEMORY_TYPE_OFFSET)?;
        Ok(memory_type::is_ddr5_family(code).then_some(code))
    }

    fn probe_legacy(&mut self, slot: u8) -> Result<Option<u8>> {
        let code = self.read_byte(spd::spd_address(slot), MEMORY_TYPE_OFFSET)?;
        Ok(memory_type::is_legacy_family(code).then_some(code))
    }

    /// Generation already known for `slot`, without touching the bus
    pub fn generation(&self, slot: u8) -> Option<Generation> {
        self.slots.get(usize::from(slot))?.generation
    }

    /// Memory-type byte read while probing `slot`
    pub fn memory_type(&self, slot: u8) -> Option<u8> {
        let state = self.slots.get(usize::from(slot))?;
        state.generation.map(|_| state.memory_type)
    }

    /// Drop everything learned about modules, forcing the next access to probe
    pub fn forget_modules(&mut self) {
        self.slots = [SlotState::default(); SLOTS];
        self.page.invalidate();
    }

    fn confirmed(&mut self, slot: u8) -> Result<Generation> {
        if slot >= SLOT_COUNT {
            return Err(SmbusError::param(format!(
                "slot {slot} outside 0..{SLOT_COUNT}"
            )));
        }
        self.spd_probe(slot).ok_or(SmbusError::NoModule { slot })
    }

    /// Retry `op` on retryable failures, with a fresh page cache each time
    fn retrying<T>(&mut self, mut op: impl FnMut(&mut Self) -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op(self) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    self.page.invalidate();
                    if !e.is_retryable() || attempt >= self.config.retries {
                        return Err(e);
                    }
                    attempt += 1;
                    debug!("retrying after: {e}");
                }
            }
        }
    }

    // ── SPD access ───────────────────────────────────────────────────────

    /// Read one byte at a logical SPD address
    ///
    /// # Errors
    ///
    /// Returns `SmbusError::Param` for a bad slot or an address outside the
    /// module, `SmbusError::NoModule` if nothing answers in the slot, or
    /// `SmbusError::Spd` wrapping the bus failure.
    pub fn spd_read(&mut self, slot: u8, address: u16) -> Result<u8> {
        let generation = self.confirmed(slot)?;
        let location = generation.locate(address)?;
        let slave = spd::spd_address(slot);

        self.retrying(|s| {
            s.with_lock(|s| {
                s.select_page(slave, generation, location.page)?;
                s.read_byte(slave, location.offset)
            })
        })
        .map_err(|e| e.at_spd(slot, address, Protocol::ByteData))
    }

    /// Bulk read with the configured coverage
    ///
    /// # Errors
    ///
    /// Same as [`Self::spd_read`]; the first failing byte aborts the dump.
    pub fn spd_dump(&mut self, slot: u8) -> Result<SpdDump> {
        self.spd_dump_with(slot, self.config.dump_mode)
    }

    /// Bulk read of the compact ranges or of the whole module
    ///
    /// # Errors
    ///
    /// Same as [`Self::spd_read`]; the first failing byte aborts the dump.
    pub fn spd_dump_with(&mut self, slot: u8, mode: DumpMode) -> Result<SpdDump> {
        let generation = self.confirmed(slot)?;
        let addresses: Vec<u16> = match mode {
            DumpMode::Full => (0..generation.size()).collect(),
            DumpMode::Compact => generation
                .compact_ranges()
                .iter()
                .flat_map(Clone::clone)
                .collect(),
        };

        let mut entries = Vec::with_capacity(addresses.len());
        for address in addresses {
            entries.push((address, self.spd_read(slot, address)?));
        }
        debug!("slot {slot}: dumped {} bytes", entries.len());
        Ok(SpdDump {
            slot,
            generation,
            entries,
        })
    }

    // ── Thermal sensor ───────────────────────────────────────────────────

    /// Whether the module in `slot` has a usable temperature sensor
    ///
    /// Determined once per slot. On DDR5 a disabled sensor is enabled. A bus
    /// failure leaves the answer undetermined and reports `false`; use
    /// [`Self::thermal_read`] to see the failure.
    pub fn thermal_available(&mut self, slot: u8) -> bool {
        self.thermal_capability(slot).unwrap_or_else(|e| {
            debug!("slot {slot}: thermal capability unknown: {e}");
            false
        })
    }

    /// Thermal capability already determined for `slot`, without touching the bus
    pub fn thermal_known(&self, slot: u8) -> Option<bool> {
        self.slots.get(usize::from(slot))?.thermal
    }

    fn thermal_capability(&mut self, slot: u8) -> Result<bool> {
        let generation = self.confirmed(slot)?;
        if let Some(known) = self.slots[usize::from(slot)].thermal {
            return Ok(known);
        }
        let available = self.detect_thermal(slot, generation)?;
        debug!("slot {slot}: thermal sensor {}", if available { "present" } else { "absent" });
        self.slots[usize::from(slot)].thermal = Some(available);
        Ok(available)
    }

    fn detect_thermal(&mut self, slot: u8, generation: Generation) -> Result<bool> {
        let (byte, bit) = match generation {
            Generation::Ddr3 => (spd::DDR3_THERMAL_BYTE, spd::DDR3_THERMAL_BIT),
            Generation::Ddr4 => (spd::DDR4_THERMAL_BYTE, spd::DDR4_THERMAL_BIT),
            Generation::Ddr5 => {
                return self
                    .retrying(|s| s.with_lock(|s| s.enable_hub_sensor(slot)))
                    .map_err(|e| e.at_spd(slot, u16::from(mr::CAPABILITY), Protocol::ByteData))
            }
        };
        if self.spd_read(slot, byte)? & bit == 0 {
            return Ok(false);
        }
        // The SPD may advertise a sensor that was never fitted
        let presence = Transaction::quick(spd::ts_address(slot), Direction::Write);
        match self.retrying(|s| s.with_lock(|s| s.raw_xfer(&presence))) {
            Ok(_) => Ok(true),
            Err(e) if e.is_nak() => Ok(false),
            Err(e) => Err(e.at_spd(slot, byte, Protocol::Quick)),
        }
    }

    fn enable_hub_sensor(&mut self, slot: u8) -> Result<bool> {
        let slave = spd::spd_address(slot);
        if self.read_byte(slave, mr::CAPABILITY)? & mr::CAP_TS_SUPPORT == 0 {
            return Ok(false);
        }
        let config = self.read_byte(slave, mr::TS_CONFIG)?;
        if config & mr::TS_DISABLE != 0 {
            info!("slot {slot}: enabling hub thermal sensor");
            self.raw_xfer(&Transaction::write_byte_data(
                slave,
                mr::TS_CONFIG,
                config & !mr::TS_DISABLE,
            ))?;
        }
        Ok(true)
    }

    /// Current module temperature in °C
    ///
    /// # Errors
    ///
    /// Returns `SmbusError::NoModule`, `SmbusError::Unsupported` when the
    /// module has no sensor, or `SmbusError::Spd` wrapping the bus failure,
    /// including one met while finding out whether a sensor is fitted.
    pub fn thermal_read(&mut self, slot: u8) -> Result<f32> {
        let generation = self.confirmed(slot)?;
        if !self.thermal_capability(slot)? {
            return Err(SmbusError::unsupported(format!(
                "slot {slot} has no thermal sensor"
            )));
        }
        let sensor = ThermalSensor::for_slot(generation, slot);
        let tx = sensor.read_transaction();
        let spd_slave = spd::spd_address(slot);

        let word = self
            .retrying(|s| {
                s.with_lock(|s| {
                    s.select_page(spd_slave, generation, 0)?;
                    s.read_word(&tx)
                })
            })
            .map_err(|e| e.at_spd(slot, u16::from(tx.command), Protocol::WordData))?;
        Ok(sensor.to_celsius(word))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::SimulatedPort;

    #[test]
    fn probe_result_is_cached() {
        let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr4(1, false);
        let mut session = BusSession::bring_up(&port).unwrap();
        assert_eq!(session.spd_probe(1), Some(Generation::Ddr4));
        let starts = port.stats().starts;
        assert_eq!(session.spd_probe(1), Some(Generation::Ddr4));
        assert_eq!(port.stats().starts, starts);
        assert_eq!(session.memory_type(1), Some(0x0C));
    }

    #[test]
    fn empty_slot_is_none_and_read_is_no_module() {
        let port = SimulatedPort::new().with_i801(0x7AA3);
        let mut session = BusSession::bring_up(&port).unwrap();
        assert_eq!(session.spd_probe(4), None);
        assert!(matches!(session.spd_read(4, 0), Err(SmbusError::NoModule { slot: 4 })));
        assert!(!session.thermal_available(4));
    }

    #[test]
    fn bad_slot_and_address_are_param_errors() {
        let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr3(0, false);
        let mut session = BusSession::bring_up(&port).unwrap();
        assert!(matches!(session.spd_read(8, 0), Err(SmbusError::Param { .. })));
        assert!(matches!(session.spd_read(0, 256), Err(SmbusError::Param { .. })));
        assert_eq!(session.spd_probe(9), None);
    }

    #[test]
    fn lock_released_after_failure() {
        let port = SimulatedPort::new().with_i801(0x7AA3);
        let mut session = BusSession::bring_up(&port).unwrap();
        assert!(session.xfer(&Transaction::read_byte_data(0x50, 0)).is_err());
        assert!(!port.lock_held());
    }

    #[test]
    fn ddr5_probe_never_writes_a_plain_eeprom() {
        let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr3(0, false);
        let mut session = BusSession::bring_up(&port).unwrap();
        assert_eq!(session.spd_probe(0), Some(Generation::Ddr3));
        assert_eq!(port.stats().writes_to(0x50), 0);
    }
}
