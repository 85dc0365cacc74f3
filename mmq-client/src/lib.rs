//! # ModMiner Quad Client
//!
//! A Rust client library for driving ModMiner Quad boards from a host.
//!
//! ## Overview
//!
//! This crate provides a high-level interface to a board reachable over a byte stream
//! (usually a TCP bridge). It handles frame serialisation and response decoding and
//! provides one method per board command, plus a bitstream upload that takes care of
//! chunking.
//!
//! Two flavours are available:
//!
//! - [`MmqClient`]: blocking, on top of `std::net::TcpStream`
//! - [`nonblocking::AsyncMmqClient`]: asynchronous, on top of tokio and the
//!   `tokio-util` codec from [`mmq_protocol::codec`]
//!
//! ## Basic Usage
//!
//! ### Connecting to a Board
//!
//! ```ignore
//! use mmq_client::MmqClient;
//!
//! let mut client = MmqClient::new("127.0.0.1:8332")?;
//! println!("Board: {}", client.version()?);
//! let devices = client.device_count()?;
//! ```
//!
//! ### Loading a Bitstream and Mining
//!
//! ```ignore
//! let image = std::fs::read("fpgaminer.bit")?;
//! for device in 0..devices {
//!     assert!(client.program_bitstream(device, &image)?);
//!     client.set_clock(device, 200)?;
//!     client.submit_work(device, &work)?;
//! }
//! let result = client.read_result(0)?;
//! ```
//!
//! ## Related Crates
//!
//! - `mmq_server` - Board-side dispatcher and frame loop
//! - [`mmq_protocol`] - Frame encoding and the bit codec
use std::{
    io,
    net::{TcpStream, ToSocketAddrs},
};

use mmq_protocol::{
    BITSTREAM_CHUNK_LEN, Command, WORK_WORDS,
    codec::{check_product, word_from_response},
    error::ReadError,
};

pub mod nonblocking;

/// Client for a ModMiner Quad board.
///
/// Every method sends one frame and waits for its response.
pub struct MmqClient {
    tcp: TcpStream,
}

impl MmqClient {
    pub fn new(addr: impl ToSocketAddrs) -> io::Result<MmqClient> {
        let tcp = TcpStream::connect(addr)?;
        tcp.set_nodelay(true)?;
        Ok(MmqClient { tcp })
    }

    /// Sends a command and reads its response.
    pub fn transact(&mut self, command: Command) -> Result<Box<[u8]>, ReadError> {
        command.write_to(&mut self.tcp)?;
        Ok(command.read_response(&mut self.tcp)?)
    }

    /// Checks that the board answers.
    pub fn ping(&mut self) -> Result<(), ReadError> {
        match &*self.transact(Command::Ping)? {
            [0] => Ok(()),
            other => Err(unexpected("ping", other)),
        }
    }

    /// The product string of the board.
    pub fn version(&mut self) -> Result<String, ReadError> {
        let response = self.transact(Command::Version)?;
        Ok(check_product(&response)?.to_string())
    }

    /// Rescans the scan-chains and returns the number of FPGAs.
    pub fn device_count(&mut self) -> Result<u8, ReadError> {
        Ok(self.transact(Command::DeviceCount)?[0])
    }

    pub fn read_idcode(&mut self, device: u8) -> Result<u32, ReadError> {
        word_from_response(&self.transact(Command::ReadIdCode { device })?)
    }

    pub fn read_usercode(&mut self, device: u8) -> Result<u32, ReadError> {
        word_from_response(&self.transact(Command::ReadUserCode { device })?)
    }

    /// Uploads a bitstream.
    ///
    /// # Returns
    ///
    /// Whether the device reported a successful configuration.
    pub fn program_bitstream(&mut self, device: u8, image: &[u8]) -> Result<bool, ReadError> {
        let len = bitstream_len(image)?;
        expect_ack(
            "bitstream header",
            &self.transact(Command::BitstreamStart { device, len })?,
        )?;
        let mut chunks = image.chunks(BITSTREAM_CHUNK_LEN);
        let last = chunks.next_back().unwrap_or_default();
        for chunk in chunks {
            expect_ack(
                "bitstream chunk",
                &self.transact(Command::BitstreamChunk { data: chunk.into() })?,
            )?;
        }
        let response = self.transact(Command::BitstreamChunk { data: last.into() })?;
        Ok(response[0] == 1)
    }

    /// Sets the clock of a device in MHz.
    ///
    /// # Returns
    ///
    /// `false` if the request was over the limit and the board fell back to a safe clock.
    pub fn set_clock(&mut self, device: u8, mhz: u8) -> Result<bool, ReadError> {
        Ok(self.transact(Command::SetClock { device, mhz })?[0] == 1)
    }

    pub fn read_clock(&mut self, device: u8) -> Result<u32, ReadError> {
        word_from_response(&self.transact(Command::ReadClock { device })?)
    }

    pub fn submit_work(&mut self, device: u8, work: &[u32; WORK_WORDS]) -> Result<(), ReadError> {
        expect_ack(
            "work",
            &self.transact(Command::SubmitWork {
                device,
                work: *work,
            })?,
        )
    }

    pub fn read_result(&mut self, device: u8) -> Result<u32, ReadError> {
        word_from_response(&self.transact(Command::ReadResult { device })?)
    }

    /// Coarse temperature reading (low byte of the 9-bit sample).
    pub fn read_temperature(&mut self, device: u8) -> Result<u8, ReadError> {
        Ok(self.transact(Command::ReadTemperature { device })?[0])
    }

    /// Raw 16-bit temperature sample.
    pub fn read_temperature_high_res(&mut self, device: u8) -> Result<u16, ReadError> {
        let response = self.transact(Command::ReadTemperatureHighRes { device })?;
        Ok(u16::from_le_bytes([response[0], response[1]]))
    }

    pub fn write_register(&mut self, device: u8, address: u8, value: u32) -> Result<(), ReadError> {
        expect_ack(
            "register write",
            &self.transact(Command::WriteRegister {
                device,
                address,
                value,
            })?,
        )
    }

    pub fn read_register(&mut self, device: u8, address: u8) -> Result<u32, ReadError> {
        word_from_response(&self.transact(Command::ReadRegister { device, address })?)
    }

    /// Shifts `num_bits` bits through the USER1 register and returns the captured bits.
    pub fn shift_user1(
        &mut self,
        device: u8,
        num_bits: u8,
        data: &[u8],
    ) -> Result<Box<[u8]>, ReadError> {
        let response = self.transact(Command::ShiftUser1 {
            device,
            num_bits,
            data: data.into(),
        })?;
        expect_ack("USER1 shift", &response[..1])?;
        Ok(response[1..].into())
    }
}

pub(crate) fn bitstream_len(image: &[u8]) -> Result<u32, ReadError> {
    if image.len() < BITSTREAM_CHUNK_LEN {
        return Err(ReadError::InvalidCommand(format!(
            "bitstream of {} bytes is shorter than one chunk",
            image.len()
        )));
    }
    u32::try_from(image.len()).map_err(|_| ReadError::TooManyBytes {
        max: u32::MAX as usize,
        got: image.len(),
    })
}

pub(crate) fn expect_ack(what: &str, response: &[u8]) -> Result<(), ReadError> {
    match response {
        [1] => Ok(()),
        other => Err(unexpected(what, other)),
    }
}

fn unexpected(what: &str, response: &[u8]) -> ReadError {
    ReadError::InvalidFormat(format!("Unexpected {} response {:02x?}", what, response))
}

#[test]
fn short_bitstream_is_refused() {
    assert!(matches!(
        bitstream_len(&[0u8; 31]),
        Err(ReadError::InvalidCommand(_))
    ));
    assert_eq!(bitstream_len(&[0u8; 32]).unwrap(), 32);
}

#[test]
fn ack_must_be_a_single_one() {
    assert!(expect_ack("test", &[1]).is_ok());
    assert!(expect_ack("test", &[0]).is_err());
    assert!(expect_ack("test", &[1, 1]).is_err());
}
