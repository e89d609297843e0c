// SPDX-License-Identifier: AGPL-3.0-only

//! DIMM temperature monitor
//!
//! Enumerates the eight module slots once, remembers which carry a sensor,
//! and polls them on demand. A failed reading is logged and reported as
//! `None`; it never tears down the session. A slot whose sensor check failed
//! is checked again on the next poll.

use crate::config::BusConfig;
use crate::error::SmbusError;
use crate::port::BusPort;
use crate::session::BusSession;
use crate::spd::Generation;
use smbus_chip::spd::SLOT_COUNT;
use tracing::{debug, info, warn};

/// A populated slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoredSlot {
    /// Slot index (0..8)
    pub slot: u8,
    /// Module generation
    pub generation: Generation,
    /// SPD memory-type byte
    pub memory_type: u8,
    /// Whether a temperature sensor answered, `None` while undetermined
    pub thermal: Option<bool>,
}

/// One poll result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Slot index
    pub slot: u8,
    /// Temperature in °C, `None` when there is no sensor or the read failed
    pub celsius: Option<f32>,
}

/// Periodic temperature source over a bus session
#[derive(Debug)]
pub struct DimmMonitor<P: BusPort> {
    session: BusSession<P>,
    slots: Vec<MonitoredSlot>,
}

impl<P: BusPort> DimmMonitor<P> {
    /// Bring up the bus and enumerate modules
    ///
    /// `None` when the machine has no supported controller.
    pub fn bring_up(port: P, config: BusConfig) -> Option<Self> {
        BusSession::detect_and_init(port, config).map(Self::new)
    }

    /// Enumerate modules on an existing session
    ///
    /// Modules the session already confirmed are kept as they are.
    pub fn new(session: BusSession<P>) -> Self {
        let mut monitor = Self {
            session,
            slots: Vec::new(),
        };
        monitor.enumerate();
        monitor
    }

    /// Forget what is known and probe every slot again
    pub fn rescan(&mut self) -> &[MonitoredSlot] {
        self.session.forget_modules();
        self.enumerate();
        &self.slots
    }

    fn enumerate(&mut self) {
        self.slots.clear();
        for slot in 0..SLOT_COUNT {
            let Some(generation) = self.session.spd_probe(slot) else {
                continue;
            };
            self.session.thermal_available(slot);
            self.slots.push(MonitoredSlot {
                slot,
                generation,
                memory_type: self.session.memory_type(slot).unwrap_or_default(),
                thermal: self.session.thermal_known(slot),
            });
        }
        info!(
            "{} module(s), {} with thermal sensor",
            self.slots.len(),
            self.slots.iter().filter(|s| s.thermal == Some(true)).count()
        );
    }

    /// Populated slots found by the last scan
    pub fn slots(&self) -> &[MonitoredSlot] {
        &self.slots
    }

    /// Read every populated slot once
    pub fn poll(&mut self) -> Vec<Reading> {
        let mut readings = Vec::with_capacity(self.slots.len());
        for monitored in &mut self.slots {
            let celsius = if monitored.thermal == Some(false) {
                None
            } else {
                let result = self.session.thermal_read(monitored.slot);
                monitored.thermal = self.session.thermal_known(monitored.slot);
                match result {
                    Ok(t) => Some(t),
                    Err(SmbusError::Unsupported { .. }) => {
                        debug!("slot {}: no thermal sensor", monitored.slot);
                        None
                    }
                    Err(e) => {
                        warn!("slot {}: temperature unavailable: {e}", monitored.slot);
                        None
                    }
                }
            };
            readings.push(Reading {
                slot: monitored.slot,
                celsius,
            });
        }
        readings
    }

    /// The underlying session
    pub fn session(&self) -> &BusSession<P> {
        &self.session
    }

    /// The underlying session, mutably (raw transfers, dumps)
    pub fn session_mut(&mut self) -> &mut BusSession<P> {
        &mut self.session
    }

    /// Stop monitoring and keep the session
    pub fn into_session(self) -> BusSession<P> {
        self.session
    }
}
