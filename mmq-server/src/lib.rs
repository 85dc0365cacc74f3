//! # ModMiner Quad Board Controller
//!
//! This crate contains the board side of the ModMiner Quad control protocol: it decodes
//! command frames arriving one byte at a time, drives the FPGAs over their JTAG scan
//! chains and reads the on-board temperature sensors.
//!
//! ## Architecture
//!
//! The crate is built around two hardware seams and a single-threaded dispatcher:
//!
//! - **[`ScanChain`] Trait**: the raw scan-chain transport (instruction/data register
//!   shifts, streamed writes, run and reset) addressed by a physical chain position
//! - **[`Gpio`] Trait**: pin direction and level control, used to bit-bang the
//!   temperature sensors
//! - **[`dispatch::Dispatcher`]**: accumulates bytes in a [`session::Session`], decides
//!   when a frame is complete, executes it and writes the response
//! - **[`server::Server`]**: a TCP frame loop feeding connection bytes into the dispatcher
//!
//! ## How It Works
//!
//! 1. A backend (e.g. [`sim::SimulatedBoard`] or a debug bridge) implements [`ScanChain`]
//!    and [`Gpio`]
//! 2. The backend is wrapped in a [`dispatch::Dispatcher`], usually through a
//!    [`server::Server`]
//! 3. Every received byte goes through [`dispatch::Dispatcher::on_byte`], which answers
//!    [`dispatch::Outcome::NeedMore`] until a frame is complete
//! 4. Completed frames are executed and answered with a fixed-size response, after which
//!    the caller rewinds the session with [`session::Session::finish_frame`]
//!
//! ## Error Handling
//!
//! The protocol has no error response. Frames that cannot be executed (unknown opcodes,
//! undiscovered devices, transport failures) surface as [`error::DispatchError`] to the
//! frame loop, which logs them and discards the buffered frame without answering.
//!
//! ## Logging
//!
//! This crate uses the `log` crate for diagnostics. Enable logging to see connections,
//! executed commands and dropped frames:
//!
//! ```ignore
//! env_logger::init();
//! ```
use std::{fmt::Display, io};

pub mod bitstream;
pub mod dispatch;
pub mod error;
pub mod registers;
pub mod server;
pub mod session;
pub mod sim;
pub mod temperature;
pub mod topology;

/// Register selected on a scan-chain device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Register {
    Instruction,
    Data,
}

/// Raw scan-chain transport.
///
/// Every chain is addressed by its physical position. Bit vectors follow the layout of
/// [`mmq_protocol::bits`]: bit `i` is `data[i / 8] & (0x80 >> (i % 8))` and is shifted
/// first.
pub trait ScanChain {
    /// Number of independent chains the board exposes.
    fn detect_ports(&mut self) -> io::Result<u8>;

    /// Number of devices answering on a chain. Zero if nothing responds.
    fn detect(&mut self, port: u8) -> io::Result<usize>;

    /// Shifts `num_bits` bits of `data` into the selected register and updates it.
    fn write(&mut self, port: u8, register: Register, data: &[u8], num_bits: usize)
    -> io::Result<()>;

    /// Shifts `num_bits` bits of `data` into the selected register, replacing them
    /// with the bits captured from the device.
    fn read(
        &mut self,
        port: u8,
        register: Register,
        data: &mut [u8],
        num_bits: usize,
    ) -> io::Result<()>;

    /// Starts a streamed write: the register stays selected after `num_bits` bits so
    /// that [`ScanChain::stream_more`] can continue the same shift.
    fn stream_start(
        &mut self,
        port: u8,
        register: Register,
        data: &[u8],
        num_bits: usize,
    ) -> io::Result<()>;

    /// Continues a streamed write. With `last` set the shift is terminated and the
    /// register updated.
    fn stream_more(&mut self, port: u8, data: &[u8], num_bits: usize, last: bool)
    -> io::Result<()>;

    /// Runs one clock cycle in the idle state, letting the device latch pending data.
    fn run(&mut self, port: u8) -> io::Result<()>;

    /// Returns the chain to its reset state.
    fn reset(&mut self, port: u8) -> io::Result<()>;
}

/// A GPIO line, identified by port and pin number.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Pin {
    pub port: u8,
    pub pin: u8,
}

impl Pin {
    /// Unpacks the `0xPN` notation used in pin tables: port in the high nibble, pin in
    /// the low nibble.
    pub const fn from_packed(packed: u8) -> Pin {
        Pin {
            port: packed >> 4,
            pin: packed & 0xf,
        }
    }
}

impl Display for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}.{}", self.port, self.pin)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    Input,
    Output,
}

/// GPIO access. The platform is assumed to be clocked and powered already.
pub trait Gpio {
    fn set_direction(&mut self, pin: Pin, direction: Direction);

    fn set(&mut self, pin: Pin, high: bool);

    fn get(&mut self, pin: Pin) -> bool;
}

#[test]
fn packed_pins() {
    assert_eq!(Pin::from_packed(0x2b), Pin { port: 2, pin: 11 });
    assert_eq!(Pin::from_packed(0x30).to_string(), "P3.0");
}
