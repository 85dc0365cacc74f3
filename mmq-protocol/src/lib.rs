//! # ModMiner Quad Protocol Library
//!
//! This crate implements the wire format of the ModMiner Quad control protocol, a small
//! binary protocol used to drive a board carrying up to four FPGAs, each sitting on its
//! own JTAG scan chain.
//!
//! ## Overview
//!
//! A host talks to the board over a byte stream. Every request is a frame starting with
//! an opcode and a logical device index, followed by an opcode-specific payload:
//!
//! ```text
//! [opcode: u8][device: u8][payload ...]
//! ```
//!
//! The board answers every complete frame with a response of fixed length.
//! There is no error response; a board that cannot execute a frame stays silent.
//!
//! This library provides:
//!
//! - [`Opcode`] and [`Command`]: the command set and host-side frames
//! - [`bits`]: the bit codec used for scan-chain vectors (packing, bit-order
//!   reversal and the device checksum)
//! - [`codec`]: serialisation of commands and response helpers, and with the `tokio`
//!   feature a `tokio-util` codec for asynchronous hosts
//!
//! ## Basic Usage
//!
//! ### Writing Frames
//!
//! ```
//! use mmq_protocol::Command;
//!
//! let mut buffer = Vec::new();
//! Command::SetClock { device: 1, mhz: 200 }
//!     .write_to(&mut buffer)
//!     .expect("Writing to vector shouldn't fail");
//! assert_eq!(buffer, [0x06, 0x01, 200, 0, 0, 0]);
//! ```
//!
//! ### Programming a Bitstream
//!
//! A bitstream is announced with its total length and then sent in chunks of
//! [`BITSTREAM_CHUNK_LEN`] bytes. The board keeps the header of the announcing frame
//! for the whole transfer, so chunks carry payload only:
//!
//! ```
//! use mmq_protocol::Command;
//!
//! let mut buffer = Vec::new();
//! Command::BitstreamStart { device: 0, len: 64 }.write_to(&mut buffer).unwrap();
//! Command::BitstreamChunk { data: vec![0xFF; 32].into() }.write_to(&mut buffer).unwrap();
//! assert_eq!(&buffer[..6], &[0x05, 0x00, 64, 0, 0, 0]);
//! assert_eq!(buffer.len(), 6 + 32);
//! ```
//!
//! ### Scan-Chain Vectors
//!
//! ```
//! use mmq_protocol::bits::{pack_bits, unpack_bits};
//!
//! let mut vector = [0u8; 4];
//! pack_bits(1, 32, &mut vector);
//! assert_eq!(vector, [0x80, 0, 0, 0]);
//! assert_eq!(unpack_bits(&vector, 32), 1);
//! ```
//!
//! ## Error Handling
//!
//! Host-side failures are reported as [`error::ReadError`].

pub mod protocol;
pub use protocol::*;
pub mod bits;
pub mod codec;
pub mod error;
