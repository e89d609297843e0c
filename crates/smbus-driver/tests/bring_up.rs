//! Controller registry and bring-up tests
//!
//! Every supported discovery path, driven through the simulated platform.

use smbus_driver::chip::pci::{VENDOR_AMD, VENDOR_ATI, VENDOR_HYGON, VENDOR_INTEL, VENDOR_SERVERWORKS, VENDOR_VIA};
use smbus_driver::chip::{i801, piix4};
use smbus_driver::ports::sim::{I801_BASE, PIIX4_BASE};
use smbus_driver::ports::SimulatedPort;
use smbus_driver::{BackendKind, BusConfig, BusPort, BusSession, Transport};

#[test]
fn test_i801_selected_over_piix4() {
    let port = SimulatedPort::new()
        .with_piix4(VENDOR_AMD, piix4::DEVICE_KERNCZ, 0x61)
        .with_i801(0xA123);
    let session = BusSession::bring_up(&port).expect("bring-up");
    assert_eq!(session.info().kind, BackendKind::I801);
    assert_eq!(session.info().base, I801_BASE);
}

#[test]
fn test_no_controller_is_none() {
    let port = SimulatedPort::new().with_ddr4(0, true);
    assert!(BusSession::bring_up(&port).is_none());
}

#[test]
fn test_unlisted_intel_device_falls_through_to_piix4() {
    let port = SimulatedPort::new()
        .with_i801(0x0001)
        .with_piix4(VENDOR_INTEL, 0x7113, 0x02);
    let session = BusSession::bring_up(&port).expect("bring-up");
    assert_eq!(session.info().kind, BackendKind::Piix4);
}

#[test]
fn test_i801_host_enable_and_write_protect() {
    let port = SimulatedPort::new().with_i801_hostc(0x7AA3, i801::hostc::SPD_WD);
    let session = BusSession::bring_up(&port).expect("bring-up");
    assert!(session.info().quirks.write_protected);

    let hostc = port
        .read_pci8(i801::LOCATION_ICH, i801::CFG_HOSTC)
        .expect("config read");
    assert_ne!(hostc & i801::hostc::HST_EN, 0, "host controller left disabled");
}

#[test]
fn test_i801_capabilities_follow_device_table() {
    let port = SimulatedPort::new().with_i801(0x24C3);
    let session = BusSession::bring_up(&port).expect("bring-up");
    let caps = session.info().capabilities;
    assert!(caps.block);
    assert!(caps.pec);
    assert!(!caps.block_proc_call);
}

#[test]
fn test_legacy_piix4_base_from_config_space() {
    let port = SimulatedPort::new().with_piix4(VENDOR_SERVERWORKS, piix4::DEVICE_CSB5, 0x93);
    let session = BusSession::bring_up(&port).expect("bring-up");
    assert_eq!(session.info().base, PIIX4_BASE);
    assert!(session.info().quirks.post_start_delay);
}

#[test]
fn test_via_base_register_offset() {
    for device in [0x3057, 0x3227] {
        let port = SimulatedPort::new().with_piix4(VENDOR_VIA, device, 0x00);
        let session = BusSession::bring_up(&port).expect("bring-up");
        assert_eq!(session.info().base, PIIX4_BASE, "VIA {device:#06x}");
    }
}

#[test]
fn test_sb800_index_data_path() {
    let port = SimulatedPort::new().with_piix4(VENDOR_AMD, piix4::DEVICE_HUDSON2, 0x14);
    let session = BusSession::bring_up(&port).expect("bring-up");
    assert_eq!(session.info().base, PIIX4_BASE);
    assert!(!session.info().quirks.memory_mapped_base);
}

#[test]
fn test_fch_enable_register_path() {
    let port = SimulatedPort::new().with_piix4(VENDOR_AMD, piix4::DEVICE_HUDSON2, 0x42);
    let session = BusSession::bring_up(&port).expect("bring-up");
    assert_eq!(session.info().base, PIIX4_BASE);
}

#[test]
fn test_fch_memory_mapped_path() {
    let port = SimulatedPort::new().with_piix4(VENDOR_HYGON, piix4::DEVICE_KERNCZ, 0x61);
    let session = BusSession::bring_up(&port).expect("bring-up");
    assert_eq!(session.info().base, PIIX4_BASE);
    assert!(session.info().quirks.memory_mapped_base);
}

#[test]
fn test_ati_sb800_and_pre_sb800() {
    let sb800 = SimulatedPort::new().with_piix4(VENDOR_ATI, piix4::DEVICE_ATI_SBX00, 0x42);
    let session = BusSession::bring_up(&sb800).expect("bring-up");
    assert_eq!(session.info().base, PIIX4_BASE);

    let legacy = SimulatedPort::new().with_piix4(VENDOR_ATI, piix4::DEVICE_ATI_SBX00, 0x3A);
    let session = BusSession::bring_up(&legacy).expect("bring-up");
    assert_eq!(session.info().base, PIIX4_BASE);
}

#[test]
fn test_imc_detected_on_kerncz() {
    let port = SimulatedPort::new()
        .with_piix4(VENDOR_AMD, piix4::DEVICE_KERNCZ, 0x59)
        .with_imc();
    let session = BusSession::bring_up(&port).expect("bring-up");
    assert!(session.info().quirks.notifies_imc);

    let quiet = SimulatedPort::new().with_piix4(VENDOR_AMD, piix4::DEVICE_KERNCZ, 0x59);
    let session = BusSession::bring_up(&quiet).expect("bring-up");
    assert!(!session.info().quirks.notifies_imc);
}

#[test]
fn test_delegated_bring_up_reports_kernel_base() {
    let port = SimulatedPort::new().with_i801(0x7AA3).delegated();
    let session = BusSession::bring_up(&port).expect("bring-up");
    assert_eq!(session.info().transport, Transport::Delegated);
    assert_eq!(session.info().base, I801_BASE);

    let port = SimulatedPort::new()
        .with_piix4(VENDOR_AMD, piix4::DEVICE_KERNCZ, 0x61)
        .delegated();
    let session = BusSession::bring_up(&port).expect("bring-up");
    assert_eq!(session.info().kind, BackendKind::Piix4);
}

#[test]
fn test_config_carried_into_session() {
    let port = SimulatedPort::new().with_i801(0x7AA3);
    let config = BusConfig::default().with_retries(5);
    let session = BusSession::detect_and_init(&port, config.clone()).expect("bring-up");
    assert_eq!(session.config(), &config);
}

#[test]
fn test_out_of_range_port_refused() {
    let port = SimulatedPort::new()
        .with_piix4(VENDOR_HYGON, piix4::DEVICE_KERNCZ, 0x61)
        .with_ddr4(0, false);
    let config = BusConfig::default().with_piix4_port(4);
    assert!(BusSession::detect_and_init(&port, config).is_none());
    assert_eq!(port.selected_port(), Some(0));
}

#[test]
fn test_legacy_piix4_refuses_port_selection() {
    let port = SimulatedPort::new().with_piix4(VENDOR_SERVERWORKS, piix4::DEVICE_CSB5, 0x93);
    let config = BusConfig::default().with_piix4_port(1);
    assert!(BusSession::detect_and_init(&port, config).is_none());

    let session = BusSession::bring_up(&port).expect("port 0 is fine");
    assert_eq!(session.info().kind, BackendKind::Piix4);
}
