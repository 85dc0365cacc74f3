use std::{error::Error, fmt::Display, io};

/// Reasons a frame could not be executed.
///
/// None of these produce a response on the wire; the frame loop drops the buffered
/// frame and carries on with the next byte.
#[derive(Debug)]
pub enum DispatchError {
    /// Byte 0 of the frame is not a known opcode.
    UnknownOpcode(u8),
    /// The logical device index has not been populated by a discovery scan.
    InvalidDevice { index: u8, count: u8 },
    /// A bitstream shorter than one chunk was announced.
    InvalidBitstreamLength(u32),
    /// The device did not reach the expected state in time.
    Timeout(&'static str),
    /// The session buffer is full without forming a frame.
    FrameOverflow,
    /// A loader transition was handed fewer payload bytes than it consumes.
    ShortPayload { needed: usize, received: usize },
    /// The scan-chain transport failed.
    Transport(io::Error),
    /// The response could not be written.
    Sink(io::Error),
}

impl From<io::Error> for DispatchError {
    fn from(value: io::Error) -> Self {
        DispatchError::Transport(value)
    }
}

impl Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::UnknownOpcode(op) => write!(f, "Received unknown opcode {:#04x}", op),
            DispatchError::InvalidDevice { index, count } => write!(
                f,
                "Device index {} is not populated ({} devices discovered)",
                index, count
            ),
            DispatchError::InvalidBitstreamLength(len) => {
                write!(f, "Bitstream length {} is shorter than one chunk", len)
            }
            DispatchError::Timeout(what) => write!(f, "Timed out while waiting for {}", what),
            DispatchError::FrameOverflow => write!(f, "Frame buffer overflow"),
            DispatchError::ShortPayload { needed, received } => write!(
                f,
                "Bitstream frame carries {} payload bytes, {} needed",
                received, needed
            ),
            DispatchError::Transport(error) => write!(f, "Scan-chain transport error: {}", error),
            DispatchError::Sink(error) => write!(f, "Could not write response: {}", error),
        }
    }
}

impl Error for DispatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DispatchError::Transport(error) | DispatchError::Sink(error) => Some(error),
            _ => None,
        }
    }
}
