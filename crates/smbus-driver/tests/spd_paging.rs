//! SPD access and page cache tests
//!
//! Module detection per generation, page selection on DDR4 (bus-wide latch)
//! and DDR5 (hub MR11), cache hits and invalidation, dumps and retries.

use smbus_driver::chip::pci::VENDOR_AMD;
use smbus_driver::chip::piix4;
use smbus_driver::chip::spd::{mr, DDR4_SIZE};
use smbus_driver::ports::sim::Fault;
use smbus_driver::ports::SimulatedPort;
use smbus_driver::{
    BusConfig, BusSession, Direction, DumpMode, Generation, SmbusError, Transaction,
};

fn session(port: &SimulatedPort) -> BusSession<&SimulatedPort> {
    BusSession::bring_up(port).expect("bring-up")
}

// ── Detection ────────────────────────────────────────────────────────────────

#[test]
fn test_probe_identifies_every_generation() {
    let port = SimulatedPort::new()
        .with_i801(0x7AA3)
        .with_ddr3(0, false)
        .with_ddr4(1, false)
        .with_ddr5(2, true);
    let mut s = session(&port);

    assert_eq!(s.spd_probe(0), Some(Generation::Ddr3));
    assert_eq!(s.spd_probe(1), Some(Generation::Ddr4));
    assert_eq!(s.spd_probe(2), Some(Generation::Ddr5));
    assert_eq!(s.spd_probe(3), None);

    assert_eq!(s.memory_type(0), Some(0x0B));
    assert_eq!(s.memory_type(1), Some(0x0C));
    assert_eq!(s.memory_type(2), Some(0x12));
    assert_eq!(s.generation(3), None);
}

#[test]
fn test_probe_never_writes_a_non_hub() {
    let port = SimulatedPort::new()
        .with_i801(0x7AA3)
        .with_ddr3(0, false)
        .with_ddr4(1, false);
    let mut s = session(&port);
    s.spd_probe(0);
    s.spd_probe(1);

    let stats = port.stats();
    assert_eq!(stats.writes_to(0x50), 0);
    assert_eq!(stats.writes_to(0x51), 0);
}

#[test]
fn test_forget_modules_probes_again() {
    let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr4(0, false);
    let mut s = session(&port);
    s.spd_probe(0);
    port.reset_stats();

    s.spd_probe(0);
    assert_eq!(port.stats().starts, 0);

    s.forget_modules();
    assert_eq!(s.generation(0), None);
    assert_eq!(s.spd_probe(0), Some(Generation::Ddr4));
    assert!(port.stats().starts > 0);
}

// ── DDR4 paging ──────────────────────────────────────────────────────────────

#[test]
fn test_ddr4_page_selected_once() {
    let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr4(0, false);
    let mut s = session(&port);
    s.spd_probe(0);
    port.reset_stats();

    let upper = s.spd_read(0, 300).expect("page 1 read");
    assert_eq!(Some(upper), port.spd_byte(0, 300));
    assert_eq!(port.stats().writes_to(0x37), 1);
    assert_eq!(port.ee1004_page(), 1);

    port.reset_stats();
    let next = s.spd_read(0, 301).expect("page 1 read");
    assert_eq!(Some(next), port.spd_byte(0, 301));
    assert_eq!(port.stats().writes_to(0x37), 0);
    assert_eq!(port.stats().writes_to(0x36), 0);

    let low = s.spd_read(0, 0).expect("page 0 read");
    assert_eq!(low, 0x23);
    assert_eq!(port.stats().writes_to(0x36), 1);
    assert_eq!(port.ee1004_page(), 0);
}

#[test]
fn test_ddr4_alternating_modules_reselect() {
    let port = SimulatedPort::new()
        .with_i801(0x7AA3)
        .with_ddr4(0, false)
        .with_ddr4(1, false);
    let mut s = session(&port);
    s.spd_probe(0);
    s.spd_probe(1);
    port.reset_stats();

    s.spd_read(0, 0).expect("A");
    s.spd_read(1, 0).expect("B");
    s.spd_read(0, 0).expect("A again");
    assert_eq!(port.stats().writes_to(0x36), 3);
}

#[test]
fn test_raw_transfer_invalidates_page_cache() {
    let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr4(0, false);
    let mut s = session(&port);
    s.spd_read(0, 300).expect("page 1 read");

    // Move the latch behind the cache's back
    s.xfer(&Transaction::write_byte_data(0x36, 0, 0))
        .expect("page 0 select");
    assert_eq!(port.ee1004_page(), 0);

    port.reset_stats();
    let byte = s.spd_read(0, 300).expect("page 1 read");
    assert_eq!(Some(byte), port.spd_byte(0, 300));
    assert_eq!(port.stats().writes_to(0x37), 1);
}

#[test]
fn test_ddr4_address_bounds() {
    let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr4(0, false);
    let mut s = session(&port);
    assert!(s.spd_read(0, DDR4_SIZE - 1).is_ok());
    assert!(matches!(
        s.spd_read(0, DDR4_SIZE),
        Err(SmbusError::Param { .. })
    ));
}

// ── DDR5 paging ──────────────────────────────────────────────────────────────

#[test]
fn test_ddr5_page_through_mr11() {
    let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr5(0, false);
    let mut s = session(&port);
    s.spd_probe(0);
    port.reset_stats();

    let byte = s.spd_read(0, 0x180).expect("page 3 read");
    assert_eq!(Some(byte), port.spd_byte(0, 0x180));
    assert_eq!(port.hub_register(0, mr::LEGACY_CONFIG), Some(3));

    let selects: Vec<_> = port
        .stats()
        .log
        .into_iter()
        .filter(|t| t.direction == Direction::Write && t.command == mr::LEGACY_CONFIG)
        .collect();
    assert_eq!(selects.len(), 1);
    assert_eq!(selects[0].slave, 0x50);

    port.reset_stats();
    s.spd_read(0, 0x1FF).expect("same page");
    assert_eq!(port.stats().writes_to(0x50), 0);
}

#[test]
fn test_ddr5_probe_picks_up_current_page() {
    let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr5(0, false);
    // Firmware left the hub on page 5
    port.set_hub_register(0, mr::LEGACY_CONFIG, 5);
    let mut s = session(&port);

    assert_eq!(s.spd_probe(0), Some(Generation::Ddr5));
    assert_eq!(port.hub_register(0, mr::LEGACY_CONFIG), Some(0));
    assert_eq!(s.spd_read(0, 2).expect("read"), 0x12);
}

#[test]
fn test_ddr5_never_touches_ee1004_latch() {
    let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr5(0, false);
    let mut s = session(&port);
    s.spd_probe(0);
    port.reset_stats();

    s.spd_read(0, 0x300).expect("page 6 read");
    let stats = port.stats();
    assert_eq!(stats.writes_to(0x36), 0);
    assert_eq!(stats.writes_to(0x37), 0);
}

// ── Dumps ────────────────────────────────────────────────────────────────────

#[test]
fn test_compact_dump_covers_identity_ranges() {
    let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr4(0, false);
    let mut s = session(&port);
    let dump = s.spd_dump(0).expect("dump");

    assert_eq!(dump.generation, Generation::Ddr4);
    assert_eq!(dump.len(), 0x80 + 0x20);
    assert_eq!(dump.get(0), Some(0x23));
    assert_eq!(dump.get(0x140), port.spd_byte(0, 0x140));
    assert_eq!(dump.get(0x100), None);
}

#[test]
fn test_full_dump_matches_module() {
    let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr3(0, false);
    let mut s = session(&port);
    let dump = s.spd_dump_with(0, DumpMode::Full).expect("dump");
    let image = dump.to_image();
    assert_eq!(image.len(), 256);
    for (address, byte) in (0u16..).zip(&image) {
        assert_eq!(Some(*byte), port.spd_byte(0, address), "address {address}");
    }
}

#[test]
fn test_configured_dump_mode() {
    let port = SimulatedPort::new()
        .with_piix4(VENDOR_AMD, piix4::DEVICE_KERNCZ, 0x61)
        .with_ddr5(0, false);
    let config = BusConfig::default().with_dump_mode(DumpMode::Full);
    let mut s = BusSession::detect_and_init(&port, config).expect("bring-up");
    let dump = s.spd_dump(0).expect("dump");
    assert_eq!(dump.len(), 1024);
    let module: Vec<u8> = (0..1024).filter_map(|a| port.spd_byte(0, a)).collect();
    assert_eq!(dump.to_image(), module);
}

#[test]
fn test_dump_of_empty_slot() {
    let port = SimulatedPort::new().with_i801(0x7AA3);
    let mut s = session(&port);
    assert!(matches!(s.spd_dump(5), Err(SmbusError::NoModule { slot: 5 })));
}

// ── Retries ──────────────────────────────────────────────────────────────────

#[test]
fn test_retryable_failures_are_retried() {
    let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr4(0, false);
    let mut s = BusSession::detect_and_init(&port, BusConfig::default().with_retries(2))
        .expect("bring-up");
    s.spd_probe(0);
    port.reset_stats();
    port.inject(Fault::LockContended);

    let err = s.spd_read(0, 0).expect_err("lock never free");
    assert!(matches!(err, SmbusError::Spd { slot: 0, address: 0, .. }));
    assert!(err.is_retryable());
    // One lock attempt per try
    assert_eq!(port.stats().port_calls, 3);
}

#[test]
fn test_timeouts_are_retried() {
    let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr4(0, false);
    let mut s = BusSession::detect_and_init(&port, BusConfig::default().with_retries(1))
        .expect("bring-up");
    s.spd_probe(0);
    port.reset_stats();
    port.inject(Fault::Stall);

    let err = s.spd_read(0, 0).expect_err("bus stalls");
    assert!(err.is_retryable());
    assert_eq!(port.stats().kills, 2);

    // A failed read leaves the page unknown, so the next read selects again
    port.clear_faults();
    port.reset_stats();
    assert_eq!(s.spd_read(0, 0).expect("recovered"), 0x23);
    assert_eq!(port.stats().writes_to(0x36), 1);
}

#[test]
fn test_no_retries_when_disabled() {
    let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr4(0, false);
    let mut s = BusSession::detect_and_init(&port, BusConfig::default().with_retries(0))
        .expect("bring-up");
    s.spd_probe(0);
    port.reset_stats();
    port.inject(Fault::LockContended);

    assert!(s.spd_read(0, 0).is_err());
    assert_eq!(port.stats().port_calls, 1);
}
