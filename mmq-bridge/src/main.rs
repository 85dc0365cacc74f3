//! # ModMiner Quad Bridge
//!
//! Serves the ModMiner Quad command protocol over TCP.
//!
//! ## Overview
//!
//! This binary puts a [`mmq_server::server::Server`] in front of one of two backends:
//! an in-memory simulated board, useful for exercising host tooling without hardware, or
//! a single FPGA reached through an AMD debug bridge mapped via the Linux UIO subsystem.
pub mod backends;

use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use clap_num::{maybe_hex, number_range};
use env_logger::Env;
use mmq_protocol::MAX_DEVICES;
use mmq_server::{
    server::Builder,
    sim::{SimDevice, SimulatedBoard},
};

const DEFAULT_TIMEOUT_US: u64 = 1000;

fn chain_count(s: &str) -> Result<u8, String> {
    number_range(s, 0, MAX_DEVICES as u8)
}

#[derive(Parser, Eq, PartialEq, Clone)]
enum DeviceImpl {
    /// Simulated board with one FPGA per live chain
    Sim {
        #[arg(
            short,
            long,
            help = "Number of chains with an FPGA attached",
            default_value = "4",
            value_parser = chain_count
        )]
        chains: u8,
        #[arg(
            short,
            long,
            help = "Status reads during which a device stays busy after JPROGRAM",
            default_value = "0"
        )]
        busy_polls: u32,
        #[arg(
            short,
            long,
            help = "Raw 16-bit sample reported by every temperature sensor",
            default_value = "0x1900",
            value_parser = maybe_hex::<u16>
        )]
        temperature: u16,
    },
    /// Single FPGA behind an AMD debug bridge exposed through UIO
    Uio {
        path: Option<PathBuf>,
        #[arg(
            short,
            long,
            help = "The timeout in microseconds",
            default_value = "1000"
        )]
        poll_timeout_us: u64,
    },
}

#[derive(Parser)]
#[command(about = "ModMiner Quad command protocol over TCP", long_about=None)]
struct Args {
    #[arg(short, long, default_value = "8332")]
    port: u16,

    #[arg(short, long, default_value = "127.0.0.1")]
    ip: IpAddr,

    #[arg(long, help = "TCP read and write timeout in seconds", default_value = "30")]
    rw_timeout_s: u64,

    #[arg(
        long,
        help = "How long a bitstream load waits for the device to clear, in milliseconds",
        default_value = "1000"
    )]
    status_poll_timeout_ms: u64,

    #[clap(subcommand)]
    device: Option<DeviceImpl>,
}

/// Attempts to automatically find the path to the Debug Bridge via the UIO driver
fn uio_driver_path() -> Option<PathBuf> {
    let uio_class_path = Path::new("/sys/class/uio");
    for entry in uio_class_path.read_dir().ok()? {
        use std::fs;

        let mut path = entry.ok()?.path();
        log::debug!("Looking at UIO path {}", path.display());
        path.push("name");
        let name = match fs::read_to_string(&path) {
            Ok(name) => name,
            Err(_) => continue,
        };
        let uio_name = name.trim();
        log::debug!("UIO has name {}", uio_name);
        if uio_name == "debug_bridge" {
            // This will be something like 'uio2'
            let uio_indexed_name = path.parent()?.file_name()?;
            let mut dev_path = PathBuf::from("/dev");
            dev_path.push(uio_indexed_name);
            return Some(dev_path);
        }
    }
    None
}

fn simulated_board(chains: u8, busy_polls: u32, temperature: u16) -> (SimulatedBoard, SimulatedBoard) {
    let devices = (0..MAX_DEVICES)
        .map(|i| (i < chains as usize).then(|| SimDevice::default().with_busy_polls(busy_polls)))
        .collect();
    let sensors = (0..MAX_DEVICES).fold(SimulatedBoard::new(vec![]), |board, i| {
        board.with_temperature(i, temperature)
    });
    (SimulatedBoard::new(devices), sensors)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    log::info!("Starting ModMiner Quad bridge");

    let args = Args::parse();
    log::debug!("Parsed arguments: ip={}, port={}", args.ip, args.port);

    let builder = Builder::new()
        .rw_timeout(Duration::from_secs(args.rw_timeout_s))
        .status_poll_timeout(Duration::from_millis(args.status_poll_timeout_ms));

    let addr = SocketAddr::new(args.ip, args.port);
    log::info!("Binding to address: {}", addr);

    let device_impl = args.device.or_else(|| {
        let path = uio_driver_path()?;
        log::info!("Auto-detected UIO driver at {}", path.display());
        Some(DeviceImpl::Uio {
            path: Some(path),
            poll_timeout_us: DEFAULT_TIMEOUT_US,
        })
    });

    match device_impl {
        Some(DeviceImpl::Sim {
            chains,
            busy_polls,
            temperature,
        }) => {
            log::info!("Simulating a board with {} FPGAs", chains);
            let (board, sensors) = simulated_board(chains, busy_polls, temperature);
            builder.build(board, sensors).listen(addr)?;
        }
        Some(DeviceImpl::Uio {
            path,
            poll_timeout_us,
        }) => {
            use crate::backends::uio::{IdleGpio, UioDriverBackend};

            let uio_path = match path.or_else(uio_driver_path) {
                None => {
                    println!(
                        "No debug bridge could be detected. Explicitly specify a path using mmq-bridge uio <path> to manually specify a driver."
                    );
                    return Ok(());
                }
                Some(path) => path,
            };

            log::info!("Initializing UIO driver server from {}", uio_path.display());
            let chain = UioDriverBackend::new(uio_path, Duration::from_micros(poll_timeout_us))?;
            builder.build(chain, IdleGpio).listen(addr)?;
        }
        None => {
            println!(
                "No debug bridge could be auto detected. Use mmq-bridge uio <path> to specify a driver or mmq-bridge sim to run a simulated board."
            )
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn chain_count_is_bounded() {
        assert_eq!(chain_count("2"), Ok(2));
        assert!(chain_count("5").is_err());
    }

    #[test]
    fn simulated_board_has_requested_chains() {
        let (board, _) = simulated_board(2, 0, 0x1900);
        assert!(board.device(0).is_some());
        assert!(board.device(1).is_some());
        assert!(board.device(2).is_none());
        assert!(board.device(3).is_none());
    }

    #[test]
    fn sim_subcommand_parses() {
        let args = Args::try_parse_from(["mmq-bridge", "sim", "--chains", "3", "-t", "0x1a00"])
            .unwrap();
        assert!(matches!(
            args.device,
            Some(DeviceImpl::Sim {
                chains: 3,
                busy_polls: 0,
                temperature: 0x1a00
            })
        ));
    }
}
