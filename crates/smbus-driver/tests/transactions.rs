//! Raw transaction tests
//!
//! Parameter checking, bounded waits, recovery, and the SB800 arbitration
//! sequence, observed through the simulated platform's spy counters.

use smbus_driver::chip::pci::{VENDOR_AMD, VENDOR_HYGON};
use smbus_driver::chip::{i801, piix4};
use smbus_driver::ports::sim::Fault;
use smbus_driver::ports::SimulatedPort;
use smbus_driver::{
    BusConfig, BusFault, BusPort, BusSession, Direction, Payload, Protocol, SmbusError,
    Transaction,
};

fn intel() -> SimulatedPort {
    SimulatedPort::new().with_i801(0x7AA3).with_ddr4(0, true)
}

fn fch() -> SimulatedPort {
    SimulatedPort::new()
        .with_piix4(VENDOR_AMD, piix4::DEVICE_KERNCZ, 0x61)
        .with_ddr4(0, true)
}

#[test]
fn test_bad_requests_never_touch_the_bus() {
    let port = intel();
    let mut session = BusSession::bring_up(&port).expect("bring-up");
    port.reset_stats();

    let requests = [
        Transaction::write_block(0x50, 0, vec![]),
        Transaction::write_block(0x50, 0, vec![0; 33]),
        Transaction::read_byte_data(0x80, 0),
        Transaction::new(0x50, Direction::Write, 0, Protocol::WordData, Payload::None),
    ];
    for tx in &requests {
        let err = session.xfer(tx).expect_err("must be rejected");
        assert!(matches!(err, SmbusError::Param { .. }), "{tx:?}: {err}");
    }
    assert_eq!(port.stats().port_calls, 0);
}

#[test]
fn test_unsupported_protocols_rejected_before_bus() {
    let port = fch();
    let mut session = BusSession::bring_up(&port).expect("bring-up");
    port.reset_stats();

    for tx in [
        Transaction::proc_call(0x50, 0, 0x1234),
        Transaction::block_proc_call(0x50, 0, vec![1, 2]),
        Transaction::read_byte_data(0x50, 0).with_pec(),
    ] {
        let err = session.xfer(&tx).expect_err("must be rejected");
        assert!(matches!(err, SmbusError::Unsupported { .. }), "{tx:?}: {err}");
    }
    assert_eq!(port.stats().port_calls, 0);
}

#[test]
fn test_byte_and_word_reads() {
    let port = intel();
    let mut session = BusSession::bring_up(&port).expect("bring-up");

    let byte = session
        .xfer(&Transaction::read_byte_data(0x50, 2))
        .expect("byte read");
    assert_eq!(byte, Payload::Byte(0x0C));

    let word = session
        .xfer(&Transaction::read_word_data(0x18, 5))
        .expect("word read");
    // Sensor sends the MSB first; the raw word arrives swapped
    assert_eq!(word, Payload::Word(0x9001));
}

#[test]
fn test_absent_slave_is_nak() {
    let port = intel();
    let mut session = BusSession::bring_up(&port).expect("bring-up");
    let err = session
        .xfer(&Transaction::read_byte_data(0x57, 0))
        .expect_err("nobody at 0x57");
    assert!(err.is_nak());
    assert!(!err.is_retryable());
    assert_eq!(port.stats().kills, 0);
}

#[test]
fn test_stuck_busy_reports_busy_without_waiting() {
    let port = intel();
    let mut session = BusSession::bring_up(&port).expect("bring-up");
    port.reset_stats();
    port.inject(Fault::StuckBusy);

    let err = session
        .xfer(&Transaction::read_byte_data(0x50, 0))
        .expect_err("bus is stuck");
    assert!(matches!(err, SmbusError::Busy { .. }));
    assert!(err.is_retryable());
    assert_eq!(port.stats().starts, 0);
    assert!(!port.lock_held());
}

#[test]
fn test_stall_times_out_and_kills_once() {
    let port = intel();
    let mut session = BusSession::bring_up(&port).expect("bring-up");
    port.reset_stats();
    port.inject(Fault::Stall);

    let err = session
        .xfer(&Transaction::read_byte_data(0x50, 0))
        .expect_err("transaction stalls");
    assert!(matches!(err, SmbusError::Timeout { .. }));

    let stats = port.stats();
    assert_eq!(stats.kills, 1);
    let budget = i801::DEFAULT_POLL.worst_case_us() + u64::from(i801::KILL_DELAY_US);
    assert!(stats.slept_us <= budget, "slept {}us", stats.slept_us);

    // The controller is usable again once the fault is gone
    port.clear_faults();
    let byte = session
        .xfer(&Transaction::read_byte_data(0x50, 2))
        .expect("recovered");
    assert_eq!(byte, Payload::Byte(0x0C));
}

#[test]
fn test_custom_poll_budget_bounds_the_wait() {
    let port = intel();
    let config = BusConfig::default().with_i801_poll(smbus_driver::chip::PollBudget::new(10, 100));
    let mut session = BusSession::detect_and_init(&port, config).expect("bring-up");
    port.reset_stats();
    port.inject(Fault::Stall);

    let err = session
        .xfer(&Transaction::read_byte_data(0x50, 0))
        .expect_err("transaction stalls");
    assert!(matches!(
        err,
        SmbusError::Timeout {
            retries: 10,
            quantum_us: 100
        }
    ));
    assert_eq!(port.stats().slept_us, 1_000 + u64::from(i801::KILL_DELAY_US));
}

#[test]
fn test_in_use_released_after_every_transaction() {
    let port = intel();
    let mut session = BusSession::bring_up(&port).expect("bring-up");

    session
        .xfer(&Transaction::read_byte_data(0x50, 0))
        .expect("read");
    assert!(!port.i801_inuse());

    let _ = session.xfer(&Transaction::read_byte_data(0x57, 0));
    assert!(!port.i801_inuse());
}

#[test]
fn test_pec_failure_is_reported() {
    let port = intel();
    let mut session = BusSession::bring_up(&port).expect("bring-up");
    port.inject(Fault::PecError);

    let err = session
        .xfer(&Transaction::read_byte_data(0x50, 2).with_pec())
        .expect_err("CRC mismatch");
    assert!(matches!(
        err,
        SmbusError::Bus {
            fault: BusFault::Pec,
            ..
        }
    ));

    // Without PEC the same read goes through
    let byte = session
        .xfer(&Transaction::read_byte_data(0x50, 2))
        .expect("read");
    assert_eq!(byte, Payload::Byte(0x0C));
}

#[test]
fn test_block_read_through_intel_buffer() {
    let port = SimulatedPort::new().with_i801(0x7AA3).with_ddr3(0, false);
    let mut session = BusSession::bring_up(&port).expect("bring-up");
    let out = session
        .xfer(&Transaction::read_block(0x50, 0))
        .expect("block read");
    let data = out.as_block().expect("block payload");
    assert_eq!(data.len(), 32);
    assert_eq!(Some(data[2]), port.spd_byte(0, 2));
}

#[test]
fn test_semaphore_held_by_firmware() {
    let port = fch();
    let mut session = BusSession::bring_up(&port).expect("bring-up");
    port.reset_stats();
    port.inject(Fault::SemaphoreHeld);

    let err = session
        .xfer(&Transaction::read_byte_data(0x50, 2))
        .expect_err("firmware owns the bus");
    assert!(matches!(err, SmbusError::Busy { .. }));
    assert_eq!(port.stats().starts, 0);
    assert!(!port.lock_held());
}

#[test]
fn test_semaphore_released_after_transaction() {
    let port = fch();
    let mut session = BusSession::bring_up(&port).expect("bring-up");
    let byte = session
        .xfer(&Transaction::read_byte_data(0x50, 2))
        .expect("read");
    assert_eq!(byte, Payload::Byte(0x0C));
    assert!(!port.piix4_semaphore());
}

#[test]
fn test_imc_put_to_sleep_and_woken() {
    let port = SimulatedPort::new()
        .with_piix4(VENDOR_AMD, piix4::DEVICE_KERNCZ, 0x61)
        .with_imc()
        .with_ddr4(0, false);
    let mut session = BusSession::bring_up(&port).expect("bring-up");
    port.reset_stats();

    session
        .xfer(&Transaction::read_byte_data(0x50, 2))
        .expect("read");
    assert_eq!(port.stats().imc_handshakes, 2);
    assert_eq!(port.imc_asleep(), Some(false));
}

#[test]
fn test_silent_imc_does_not_block_the_bus() {
    let port = SimulatedPort::new()
        .with_piix4(VENDOR_AMD, piix4::DEVICE_KERNCZ, 0x61)
        .with_imc()
        .with_ddr4(0, false);
    let mut session = BusSession::bring_up(&port).expect("bring-up");
    port.reset_stats();
    port.inject(Fault::ImcSilent);

    let byte = session
        .xfer(&Transaction::read_byte_data(0x50, 2))
        .expect("read");
    assert_eq!(byte, Payload::Byte(0x0C));
    assert_eq!(port.stats().imc_handshakes, 0);
}

#[test]
fn test_port_selection_restored() {
    let port = SimulatedPort::new()
        .with_piix4(VENDOR_HYGON, piix4::DEVICE_KERNCZ, 0x61)
        .with_ddr4(0, false);
    let config = BusConfig::default().with_piix4_port(1);
    let mut session = BusSession::detect_and_init(&port, config).expect("bring-up");

    // Modules sit on port 0, so the other port finds nothing
    let err = session
        .xfer(&Transaction::read_byte_data(0x50, 2))
        .expect_err("wrong port");
    assert!(err.is_nak());
    assert_eq!(port.selected_port(), Some(0));
    assert!(!port.piix4_semaphore());
}

#[test]
fn test_port_switch_writes_single_pm_bytes() {
    let port = SimulatedPort::new()
        .with_piix4(VENDOR_HYGON, piix4::DEVICE_KERNCZ, 0x61)
        .with_ddr4(0, false);
    let pm_window = |port: &SimulatedPort| -> Vec<u32> {
        (0..piix4::SB800_PM_MMIO_SIZE)
            .step_by(4)
            .map(|i| port.read_mmio32(piix4::SB800_PM_MMIO + i).expect("pm word"))
            .collect()
    };
    let before = pm_window(&port);

    let config = BusConfig::default().with_piix4_port(1);
    let mut session = BusSession::detect_and_init(&port, config).expect("bring-up");
    port.reset_stats();
    let _ = session.xfer(&Transaction::read_byte_data(0x50, 2));

    // Select port 1, then put port 0 back
    assert_eq!(port.stats().mmio_byte_writes, 2);
    assert_eq!(port.selected_port(), Some(0));
    assert_eq!(pm_window(&port), before);
}

#[test]
fn test_piix4_stall_is_timeout_without_kill() {
    let port = fch();
    let mut session = BusSession::bring_up(&port).expect("bring-up");
    port.reset_stats();
    port.inject(Fault::Stall);

    let err = session
        .xfer(&Transaction::read_byte_data(0x50, 2))
        .expect_err("stalls");
    assert!(matches!(err, SmbusError::Timeout { .. }));
    assert_eq!(port.stats().kills, 0);
    assert!(port.stats().slept_us <= piix4::DEFAULT_POLL.worst_case_us() + 2_000);
}

#[test]
fn test_lock_contention_is_busy() {
    let port = intel();
    let mut session = BusSession::bring_up(&port).expect("bring-up");
    port.reset_stats();
    port.inject(Fault::LockContended);

    let err = session
        .xfer(&Transaction::read_byte_data(0x50, 2))
        .expect_err("lock held elsewhere");
    assert!(matches!(err, SmbusError::Busy { status: 0 }));
    assert_eq!(port.stats().starts, 0);
}

#[test]
fn test_delegated_transfers_match_direct() {
    let direct = intel();
    let delegated = SimulatedPort::new()
        .with_i801(0x7AA3)
        .with_ddr4(0, true)
        .delegated();

    let mut a = BusSession::bring_up(&direct).expect("direct");
    let mut b = BusSession::bring_up(&delegated).expect("delegated");
    for tx in [
        Transaction::read_byte_data(0x50, 2),
        Transaction::read_word_data(0x18, 5),
        Transaction::read_block(0x50, 0),
    ] {
        assert_eq!(
            a.xfer(&tx).expect("direct xfer"),
            b.xfer(&tx).expect("delegated xfer"),
            "{tx:?}"
        );
    }

    let err = b
        .xfer(&Transaction::read_byte_data(0x57, 0))
        .expect_err("absent");
    assert!(err.is_nak());
}
