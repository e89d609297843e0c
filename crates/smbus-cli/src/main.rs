//! `smbus`: command-line interface for chipset SMBus and memory-module SPD.
//!
//! ```text
//! USAGE:
//!   smbus detect                     Identify the SMBus host controller
//!   smbus scan                       List populated slots and sensors
//!   smbus dump <slot> [--full]       Hex dump of a module's SPD
//!   smbus temps [--watch <secs>]     Module temperatures
//!   smbus xfer <slave> <protocol>    Raw transaction
//! ```
//!
//! Hardware access needs root. `--simulate` runs every command against a
//! software platform instead.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use smbus_driver::chip::pci::VENDOR_AMD;
use smbus_driver::chip::piix4;
use smbus_driver::ports::{DevPort, SimulatedPort};
use smbus_driver::{
    BusConfig, BusPort, BusSession, Capabilities, DimmMonitor, Direction, DumpMode, Payload,
    Transaction,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smbus", about = "Chipset SMBus and DIMM SPD tool", version)]
struct Cli {
    /// Run against a simulated platform instead of hardware.
    #[arg(long, value_enum, global = true)]
    simulate: Option<Platform>,

    /// Lock file shared with other SMBus users.
    #[arg(long, global = true, default_value = smbus_driver::ports::linux::DEFAULT_LOCK_PATH)]
    lock: String,

    /// Extra attempts after a retryable SPD failure.
    #[arg(long, global = true, default_value_t = 2)]
    retries: u8,

    /// SB800-class SMBus port carrying the modules.
    #[arg(long, global = true, default_value_t = 0)]
    port: u8,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Clone, Copy, ValueEnum)]
enum Platform {
    /// Intel 600-series PCH with DDR4 and DDR5 modules
    Intel,
    /// AMD FCH with IMC and DDR5 modules
    Amd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Identify the SMBus host controller.
    Detect,
    /// List populated slots, module generation and thermal sensors.
    Scan,
    /// Hex dump of one module's SPD contents.
    Dump {
        /// Slot (0-7).
        slot: u8,
        /// Read the whole module instead of the identity ranges.
        #[arg(long)]
        full: bool,
    },
    /// Read every module temperature sensor.
    Temps {
        /// Keep polling every N seconds.
        #[arg(long)]
        watch: Option<u64>,
        /// Stop after this many polls (with --watch).
        #[arg(long)]
        count: Option<u32>,
    },
    /// Run one raw SMBus transaction.
    Xfer {
        /// 7-bit slave address (e.g. 0x50).
        #[arg(value_parser = parse_u8)]
        slave: u8,
        /// Transaction shape.
        #[arg(value_enum)]
        protocol: XferKind,
        /// Command / offset byte.
        #[arg(long, value_parser = parse_u8, default_value = "0")]
        command: u8,
        /// Write this value (byte, word, or comma-separated block) instead of reading.
        #[arg(long)]
        write: Option<String>,
        /// Request packet error checking.
        #[arg(long)]
        pec: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum XferKind {
    Quick,
    Byte,
    ByteData,
    WordData,
    ProcCall,
    Block,
    BlockProcCall,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = BusConfig::default()
        .with_retries(cli.retries)
        .with_piix4_port(cli.port);

    match cli.simulate {
        Some(platform) => run(simulated(platform), config, cli.command),
        None => {
            let port = DevPort::open_with_lock(&cli.lock)
                .context("cannot open /dev/port (are you root?)")?;
            run(port, config, cli.command)
        }
    }
}

fn simulated(platform: Platform) -> SimulatedPort {
    match platform {
        Platform::Intel => SimulatedPort::new()
            .with_i801(0x7AA3)
            .with_ddr4(0, true)
            .with_ddr4(1, false)
            .with_ddr5(2, true),
        Platform::Amd => SimulatedPort::new()
            .with_piix4(VENDOR_AMD, piix4::DEVICE_KERNCZ, 0x61)
            .with_imc()
            .with_ddr5(0, true)
            .with_ddr5(1, true),
    }
}

fn run<P: BusPort>(port: P, config: BusConfig, command: Cmd) -> Result<()> {
    let Some(session) = BusSession::detect_and_init(port, config) else {
        println!("No supported SMBus controller found");
        return Ok(());
    };

    match command {
        Cmd::Detect => cmd_detect(&session),
        Cmd::Scan => cmd_scan(session),
        Cmd::Dump { slot, full } => cmd_dump(session, slot, full)?,
        Cmd::Temps { watch, count } => cmd_temps(session, watch, count),
        Cmd::Xfer {
            slave,
            protocol,
            command,
            write,
            pec,
        } => cmd_xfer(session, slave, protocol, command, write.as_deref(), pec)?,
    }
    Ok(())
}

fn cmd_detect<P: BusPort>(session: &BusSession<P>) {
    let info = session.info();
    println!("Controller   : {info}");
    println!("Backend      : {}", info.kind);
    println!("Capabilities : {}", describe_caps(info.capabilities));
    let q = info.quirks;
    if q.write_protected {
        println!("               SPD write protection enabled");
    }
    if q.memory_mapped_base {
        println!("               PM block reached through MMIO");
    }
    if q.notifies_imc {
        println!("               IMC present (sleep/wake around transfers)");
    }
    if q.post_start_delay {
        println!("               post-start delay");
    }
}

fn describe_caps(caps: Capabilities) -> String {
    let mut parts = vec!["quick", "byte", "byte-data", "word-data"];
    if caps.proc_call {
        parts.push("proc-call");
    }
    if caps.block {
        parts.push("block");
    }
    if caps.block_proc_call {
        parts.push("block-proc-call");
    }
    if caps.pec {
        parts.push("pec");
    }
    parts.join(" ")
}

fn cmd_scan<P: BusPort>(session: BusSession<P>) {
    let monitor = DimmMonitor::new(session);
    if monitor.slots().is_empty() {
        println!("No memory modules found");
        return;
    }
    println!("Slot  Type  Code  Sensor");
    for s in monitor.slots() {
        println!(
            "{:>4}  {:<4}  {:#04x}  {}",
            s.slot,
            s.generation.to_string(),
            s.memory_type,
            match s.thermal {
                Some(true) => "yes",
                Some(false) => "no",
                None => "?",
            }
        );
    }
}

fn cmd_dump<P: BusPort>(mut session: BusSession<P>, slot: u8, full: bool) -> Result<()> {
    let mode = if full { DumpMode::Full } else { DumpMode::Compact };
    let dump = session
        .spd_dump_with(slot, mode)
        .with_context(|| format!("reading slot {slot}"))?;

    println!("Slot {slot}: {} ({} bytes read)", dump.generation, dump.len());
    let image = dump.to_image();
    for (row, chunk) in image.chunks(16).enumerate() {
        let base = row * 16;
        // Skip rows the compact dump never touched
        let touched = (base..base + chunk.len())
            .any(|a| u16::try_from(a).is_ok_and(|a| dump.get(a).is_some()));
        if !touched {
            continue;
        }
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        println!("{base:04x}: {}", hex.join(" "));
    }
    Ok(())
}

fn cmd_temps<P: BusPort>(session: BusSession<P>, watch: Option<u64>, count: Option<u32>) {
    let mut monitor = DimmMonitor::new(session);
    if monitor.slots().iter().all(|s| s.thermal == Some(false)) {
        println!("No module temperature sensors found");
        return;
    }

    let mut polls = 0u32;
    loop {
        for reading in monitor.poll() {
            match reading.celsius {
                Some(t) => println!("slot {}: {t:.2} °C", reading.slot),
                None => println!("slot {}: --", reading.slot),
            }
        }
        polls += 1;

        let Some(secs) = watch else { break };
        if count.is_some_and(|n| polls >= n) {
            break;
        }
        println!();
        std::thread::sleep(Duration::from_secs(secs));
    }
}

fn cmd_xfer<P: BusPort>(
    mut session: BusSession<P>,
    slave: u8,
    kind: XferKind,
    command: u8,
    write: Option<&str>,
    pec: bool,
) -> Result<()> {
    let mut tx = build_transaction(slave, kind, command, write)?;
    if pec {
        tx = tx.with_pec();
    }
    let out = session
        .xfer(&tx)
        .with_context(|| format!("{:?} to {slave:#04x}", tx.protocol))?;
    match out {
        Payload::None => println!("ok"),
        Payload::Byte(b) => println!("{b:#04x}"),
        Payload::Word(w) => println!("{w:#06x}"),
        Payload::Block(data) => {
            let hex: Vec<String> = data.iter().map(|b| format!("{b:02x}")).collect();
            println!("[{}] {}", data.len(), hex.join(" "));
        }
    }
    Ok(())
}

fn build_transaction(
    slave: u8,
    kind: XferKind,
    command: u8,
    write: Option<&str>,
) -> Result<Transaction> {
    let tx = match (kind, write) {
        (XferKind::Quick, None) => Transaction::quick(slave, Direction::Read),
        (XferKind::Quick, Some(_)) => Transaction::quick(slave, Direction::Write),
        (XferKind::Byte, None) => Transaction::read_byte(slave),
        (XferKind::Byte, Some(v)) => Transaction::write_byte(slave, parse_u8(v)?),
        (XferKind::ByteData, None) => Transaction::read_byte_data(slave, command),
        (XferKind::ByteData, Some(v)) => Transaction::write_byte_data(slave, command, parse_u8(v)?),
        (XferKind::WordData, None) => Transaction::read_word_data(slave, command),
        (XferKind::WordData, Some(v)) => {
            Transaction::write_word_data(slave, command, parse_u16(v)?)
        }
        (XferKind::ProcCall, Some(v)) => Transaction::proc_call(slave, command, parse_u16(v)?),
        (XferKind::Block, None) => Transaction::read_block(slave, command),
        (XferKind::Block, Some(v)) => Transaction::write_block(slave, command, parse_block(v)?),
        (XferKind::BlockProcCall, Some(v)) => {
            Transaction::block_proc_call(slave, command, parse_block(v)?)
        }
        (XferKind::ProcCall | XferKind::BlockProcCall, None) => {
            bail!("process calls need --write")
        }
    };
    Ok(tx)
}

// ── Argument parsing ─────────────────────────────────────────────────────────

fn parse_u8(s: &str) -> Result<u8> {
    let value = parse_u16(s)?;
    u8::try_from(value).with_context(|| format!("{s} does not fit in a byte"))
}

fn parse_u16(s: &str) -> Result<u16> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.with_context(|| format!("invalid number: {s}"))
}

fn parse_block(s: &str) -> Result<Vec<u8>> {
    s.split(',').map(parse_u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use smbus_driver::Protocol;

    #[test]
    fn test_number_parsing() {
        assert_eq!(parse_u8("0x50").unwrap(), 0x50);
        assert_eq!(parse_u8("80").unwrap(), 80);
        assert!(parse_u8("0x100").is_err());
        assert_eq!(parse_u16("0xBEEF").unwrap(), 0xBEEF);
        assert_eq!(parse_block("1,0x02, 3").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_process_call_needs_data() {
        assert!(build_transaction(0x50, XferKind::ProcCall, 0, None).is_err());
        let tx = build_transaction(0x50, XferKind::WordData, 5, Some("0x1234")).unwrap();
        assert_eq!(tx.payload, Payload::Word(0x1234));
        assert_eq!(tx.protocol, Protocol::WordData);
    }

    #[test]
    fn test_simulated_scan_finds_modules() {
        let port = simulated(Platform::Intel);
        let session = BusSession::bring_up(&port).unwrap();
        let monitor = DimmMonitor::new(session);
        assert_eq!(monitor.slots().len(), 3);
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["smbus", "--simulate", "amd", "dump", "1", "--full"]).unwrap();
        assert!(matches!(cli.command, Cmd::Dump { slot: 1, full: true }));
        let cli = Cli::try_parse_from(["smbus", "xfer", "0x18", "word-data", "--command", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Cmd::Xfer {
                slave: 0x18,
                command: 5,
                ..
            }
        ));
    }
}
