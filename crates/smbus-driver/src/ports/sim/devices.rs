// SPDX-License-Identifier: AGPL-3.0-only

//! SMBus slave models: SPD EEPROMs, the DDR4 EE1004, the DDR5 SPD5 hub and
//! the JEDEC TSE2004 thermal sensor, all sharing one bus segment.

use crate::protocol::{Direction, Protocol};
use smbus_chip::spd::{self, memory_type, mr, ts};
use std::collections::BTreeMap;

/// One operation as the slaves see it
#[derive(Debug, Clone)]
pub(crate) struct Request<'a> {
    pub slave: u8,
    pub direction: Direction,
    pub command: u8,
    pub protocol: Protocol,
    /// Outgoing byte (low) or word, little-endian on the wire
    pub word: u16,
    /// Outgoing block bytes
    pub block: &'a [u8],
}

/// What came back from an acknowledged operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    Ack,
    Byte(u8),
    Word(u16),
    Block(Vec<u8>),
}

#[derive(Debug, Clone)]
pub(crate) struct Hub {
    pub mr: [u8; 128],
    pub nvm: Vec<u8>,
}

impl Hub {
    fn new(nvm: Vec<u8>, thermal: bool) -> Self {
        let mut regs = [0u8; 128];
        regs[usize::from(mr::DEVICE_TYPE_MSB)] = mr::HUB_DEVICE_TYPE;
        regs[usize::from(mr::DEVICE_TYPE_LSB)] = if thermal {
            mr::HUB_WITH_TS
        } else {
            mr::HUB_WITHOUT_TS
        };
        regs[2] = 0x12; // device revision
        regs[usize::from(mr::CAPABILITY)] = if thermal { mr::CAP_TS_SUPPORT } else { 0 };
        Self { mr: regs, nvm }
    }

    fn page(&self) -> usize {
        usize::from(self.mr[usize::from(mr::LEGACY_CONFIG)] & mr::LEGACY_PAGE_MASK)
    }

    fn read(&self, command: u8) -> u8 {
        if command & spd::DDR5_MEM_SPACE == 0 {
            return self.mr[usize::from(command & 0x7F)];
        }
        let index = self.page() * usize::from(spd::DDR5_PAGE_SIZE) + usize::from(command & 0x7F);
        self.nvm.get(index).copied().unwrap_or(0xFF)
    }

    fn write(&mut self, command: u8, value: u8) {
        match command {
            mr::LEGACY_CONFIG => {
                self.mr[usize::from(mr::LEGACY_CONFIG)] = value & mr::LEGACY_PAGE_MASK;
            }
            mr::TS_CONFIG => self.mr[usize::from(mr::TS_CONFIG)] = value,
            // NVM is write-protected, other MRs are read-only here
            _ => {}
        }
    }

    pub fn set_temperature(&mut self, raw: u16) {
        let [lo, hi] = raw.to_le_bytes();
        self.mr[usize::from(mr::TS_TEMP)] = lo;
        self.mr[usize::from(mr::TS_TEMP) + 1] = hi;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Sensor {
    regs: [u16; 8],
    pointer: u8,
}

impl Sensor {
    fn new() -> Self {
        let mut regs = [0u16; 8];
        regs[usize::from(ts::CAPABILITY)] = 0x00EF;
        regs[usize::from(ts::MANUFACTURER)] = 0x0054;
        regs[usize::from(ts::DEVICE_ID)] = 0x0A00;
        regs[usize::from(ts::TEMPERATURE)] = 0x0190;
        Self { regs, pointer: 0 }
    }

    fn reg(&self, command: u8) -> u16 {
        self.regs[usize::from(command & 7)]
    }

    pub fn set_temperature(&mut self, raw: u16) {
        self.regs[usize::from(ts::TEMPERATURE)] = raw;
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Slave {
    /// Flat 256-byte EEPROM (DDR3 and older)
    Eeprom { data: Vec<u8>, pointer: u8 },
    /// Two-page EE1004; the page latch lives on the segment
    Ee1004 { data: Vec<u8>, pointer: u8 },
    /// SPD5 hub
    Hub(Hub),
    /// TSE2004 thermal sensor
    Sensor(Sensor),
}

impl Slave {
    fn read(&mut self, command: u8, ee1004_page: u8) -> u8 {
        match self {
            Self::Eeprom { data, pointer } => {
                *pointer = command.wrapping_add(1);
                data.get(usize::from(command)).copied().unwrap_or(0xFF)
            }
            Self::Ee1004 { data, pointer } => {
                *pointer = command.wrapping_add(1);
                let index = usize::from(ee1004_page) * usize::from(spd::DDR4_PAGE_SIZE)
                    + usize::from(command);
                data.get(index).copied().unwrap_or(0xFF)
            }
            Self::Hub(hub) => hub.read(command),
            Self::Sensor(sensor) => sensor.reg(command).to_be_bytes()[0],
        }
    }

    fn receive(&mut self, ee1004_page: u8) -> u8 {
        let pointer = match self {
            Self::Eeprom { pointer, .. } | Self::Ee1004 { pointer, .. } => *pointer,
            Self::Sensor(sensor) => sensor.pointer,
            Self::Hub(_) => 0,
        };
        self.read(pointer, ee1004_page)
    }

    fn send(&mut self, value: u8) {
        match self {
            Self::Eeprom { pointer, .. } | Self::Ee1004 { pointer, .. } => *pointer = value,
            Self::Sensor(sensor) => sensor.pointer = value & 7,
            Self::Hub(_) => {}
        }
    }

    fn write(&mut self, command: u8, value: u8) {
        match self {
            // SPD EEPROMs ship write-protected
            Self::Eeprom { pointer, .. } | Self::Ee1004 { pointer, .. } => {
                *pointer = command.wrapping_add(1);
            }
            Self::Hub(hub) => hub.write(command, value),
            Self::Sensor(sensor) => sensor.pointer = command & 7,
        }
    }

    fn read_word(&mut self, command: u8, ee1004_page: u8) -> u16 {
        if let Self::Sensor(sensor) = self {
            sensor.pointer = command & 7;
            // MSB travels first
            return sensor.reg(command).swap_bytes();
        }
        let lo = self.read(command, ee1004_page);
        let hi = self.read(command.wrapping_add(1), ee1004_page);
        u16::from_le_bytes([lo, hi])
    }

    fn write_word(&mut self, command: u8, value: u16) {
        match self {
            Self::Sensor(sensor) => {
                let index = usize::from(command & 7);
                // capability, temperature and ID registers are read-only
                if !matches!(command & 7, ts::CAPABILITY | ts::TEMPERATURE | ts::MANUFACTURER | ts::DEVICE_ID) {
                    sensor.regs[index] = value.swap_bytes();
                }
                sensor.pointer = command & 7;
            }
            _ => {
                let [lo, hi] = value.to_le_bytes();
                self.write(command, lo);
                self.write(command.wrapping_add(1), hi);
            }
        }
    }

    fn read_block(&mut self, command: u8, ee1004_page: u8) -> Vec<u8> {
        (0..32u8)
            .map(|i| self.read(command.wrapping_add(i), ee1004_page))
            .collect()
    }
}

/// Every slave on one SMBus segment
#[derive(Debug, Clone, Default)]
pub(crate) struct Segment {
    slaves: BTreeMap<u8, Slave>,
    ee1004_page: u8,
}

impl Segment {
    pub fn attach(&mut self, address: u8, slave: Slave) {
        self.slaves.insert(address, slave);
    }

    pub fn slave_mut(&mut self, address: u8) -> Option<&mut Slave> {
        self.slaves.get_mut(&address)
    }

    pub fn slave(&self, address: u8) -> Option<&Slave> {
        self.slaves.get(&address)
    }

    fn has_ee1004(&self) -> bool {
        self.slaves.values().any(|s| matches!(s, Slave::Ee1004 { .. }))
    }

    pub fn ee1004_page(&self) -> u8 {
        self.ee1004_page
    }

    /// Run one operation; `None` means nobody acknowledged
    pub fn execute(&mut self, request: &Request<'_>) -> Option<Reply> {
        let read = request.direction == Direction::Read;

        if request.slave == spd::DDR4_SPA0 || request.slave == spd::DDR4_SPA1 {
            // Page latch answers writes only, and only if an EE1004 is listening
            if read || !self.has_ee1004() {
                return None;
            }
            self.ee1004_page = request.slave - spd::DDR4_SPA0;
            return Some(Reply::Ack);
        }

        let page = self.ee1004_page;
        let slave = self.slaves.get_mut(&request.slave)?;
        let [lo, _] = request.word.to_le_bytes();

        let reply = match (request.protocol, read) {
            (Protocol::Quick, _) => Reply::Ack,
            (Protocol::Byte, true) => Reply::Byte(slave.receive(page)),
            (Protocol::Byte, false) => {
                slave.send(request.command);
                Reply::Ack
            }
            (Protocol::ByteData, true) => Reply::Byte(slave.read(request.command, page)),
            (Protocol::ByteData, false) => {
                slave.write(request.command, lo);
                Reply::Ack
            }
            (Protocol::WordData, true) => Reply::Word(slave.read_word(request.command, page)),
            (Protocol::WordData, false) => {
                slave.write_word(request.command, request.word);
                Reply::Ack
            }
            (Protocol::ProcCall, _) => {
                slave.write_word(request.command, request.word);
                Reply::Word(slave.read_word(request.command, page))
            }
            (Protocol::BlockData, true) => Reply::Block(slave.read_block(request.command, page)),
            (Protocol::BlockData, false) => {
                for (i, byte) in (0u8..).zip(request.block) {
                    slave.write(request.command.wrapping_add(i), *byte);
                }
                Reply::Ack
            }
            (Protocol::BlockProcCall, _) => {
                for (i, byte) in (0u8..).zip(request.block) {
                    slave.write(request.command.wrapping_add(i), *byte);
                }
                Reply::Block(slave.read_block(request.command, page))
            }
        };
        Some(reply)
    }
}

// ── Module builders ──────────────────────────────────────────────────────────

fn pattern(len: u16, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| {
            // Truncation intended: 8-bit test pattern
            #[allow(clippy::cast_possible_truncation)]
            let byte = (i.wrapping_mul(31).wrapping_add(u16::from(seed)) % 251) as u8;
            byte
        })
        .collect()
}

/// DDR3 SPD contents
pub fn ddr3_image(thermal: bool) -> Vec<u8> {
    let mut data = pattern(spd::DDR3_SIZE, 3);
    data[0] = 0x92;
    data[1] = 0x13;
    data[usize::from(spd::MEMORY_TYPE_OFFSET)] = memory_type::DDR3;
    data[usize::from(spd::DDR3_THERMAL_BYTE)] = if thermal { spd::DDR3_THERMAL_BIT } else { 0 };
    data
}

/// DDR4 SPD contents, both pages
pub fn ddr4_image(thermal: bool) -> Vec<u8> {
    let mut data = pattern(spd::DDR4_SIZE, 4);
    data[0] = 0x23;
    data[1] = 0x11;
    data[usize::from(spd::MEMORY_TYPE_OFFSET)] = memory_type::DDR4;
    data[usize::from(spd::DDR4_THERMAL_BYTE)] = if thermal { spd::DDR4_THERMAL_BIT } else { 0 };
    data
}

/// DDR5 SPD contents, all eight pages
pub fn ddr5_image() -> Vec<u8> {
    let mut data = pattern(spd::DDR5_SIZE, 5);
    data[0] = 0x30;
    data[1] = 0x10;
    data[usize::from(spd::MEMORY_TYPE_OFFSET)] = memory_type::DDR5;
    data
}

pub(crate) fn eeprom(data: Vec<u8>) -> Slave {
    Slave::Eeprom { data, pointer: 0 }
}

pub(crate) fn ee1004(data: Vec<u8>) -> Slave {
    Slave::Ee1004 { data, pointer: 0 }
}

pub(crate) fn hub(data: Vec<u8>, thermal: bool) -> Slave {
    Slave::Hub(Hub::new(data, thermal))
}

pub(crate) fn sensor() -> Slave {
    Slave::Sensor(Sensor::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_read(slave: u8, command: u8) -> Request<'static> {
        Request {
            slave,
            direction: Direction::Read,
            command,
            protocol: Protocol::ByteData,
            word: 0,
            block: &[],
        }
    }

    fn write(slave: u8, protocol: Protocol, command: u8, word: u16) -> Request<'static> {
        Request {
            slave,
            direction: Direction::Write,
            command,
            protocol,
            word,
            block: &[],
        }
    }

    #[test]
    fn ee1004_page_latch_is_bus_wide() {
        let image = ddr4_image(false);
        let mut seg = Segment::default();
        seg.attach(0x50, ee1004(image.clone()));
        seg.attach(0x51, ee1004(image.clone()));

        assert_eq!(seg.execute(&byte_read(0x50, 4)), Some(Reply::Byte(image[4])));
        assert!(seg.execute(&write(0x37, Protocol::Quick, 0, 0)).is_some());
        assert_eq!(seg.execute(&byte_read(0x51, 4)), Some(Reply::Byte(image[260])));
        assert!(seg.execute(&write(0x36, Protocol::ByteData, 0, 0)).is_some());
        assert_eq!(seg.execute(&byte_read(0x51, 4)), Some(Reply::Byte(image[4])));
    }

    #[test]
    fn page_latch_absent_without_ee1004() {
        let mut seg = Segment::default();
        seg.attach(0x50, eeprom(ddr3_image(false)));
        assert!(seg.execute(&write(0x36, Protocol::Quick, 0, 0)).is_none());
        assert!(seg.execute(&byte_read(0x52, 2)).is_none());
    }

    #[test]
    fn hub_pages_nvm_through_mr11() {
        let image = ddr5_image();
        let mut seg = Segment::default();
        seg.attach(0x50, hub(image.clone(), true));

        assert_eq!(seg.execute(&byte_read(0x50, 0)), Some(Reply::Byte(0x51)));
        assert_eq!(seg.execute(&byte_read(0x50, 0x80 | 2)), Some(Reply::Byte(image[2])));
        seg.execute(&write(0x50, Protocol::ByteData, mr::LEGACY_CONFIG, 3));
        assert_eq!(
            seg.execute(&byte_read(0x50, 0x80 | 5)),
            Some(Reply::Byte(image[3 * 128 + 5]))
        );
    }

    #[test]
    fn sensor_word_is_msb_first() {
        let mut seg = Segment::default();
        seg.attach(0x18, sensor());
        let reply = seg.execute(&Request {
            slave: 0x18,
            direction: Direction::Read,
            command: ts::TEMPERATURE,
            protocol: Protocol::WordData,
            word: 0,
            block: &[],
        });
        assert_eq!(reply, Some(Reply::Word(0x9001)));
    }
}
