/// Read and write implementations for host-side frames
use std::io::{self, Read, Write};

use crate::{
    bits::byte_len,
    error::ReadError,
    protocol::{BITSTREAM_CHUNK_LEN, Command, PRODUCT_ID},
};

impl Command {
    /// Checks that payload lengths match what the board will wait for.
    pub fn validate(&self) -> Result<(), ReadError> {
        match self {
            Command::BitstreamChunk { data } if data.is_empty() => Err(
                ReadError::InvalidCommand("empty bitstream chunk".to_string()),
            ),
            Command::BitstreamChunk { data } if data.len() > BITSTREAM_CHUNK_LEN => {
                Err(ReadError::TooManyBytes {
                    max: BITSTREAM_CHUNK_LEN,
                    got: data.len(),
                })
            }
            Command::ShiftUser1 { num_bits, data, .. }
                if data.len() != byte_len(*num_bits as usize) =>
            {
                Err(ReadError::InvalidCommand(format!(
                    "shift of {} bits needs {} bytes, got {}",
                    num_bits,
                    byte_len(*num_bits as usize),
                    data.len()
                )))
            }
            Command::WriteRegister { address, .. } | Command::ReadRegister { address, .. }
                if *address > 0xF =>
            {
                Err(ReadError::InvalidCommand(format!(
                    "register address {:#x} does not fit in 4 bits",
                    address
                )))
            }
            _ => Ok(()),
        }
    }

    /// Serialises the frame exactly as the board expects it on the wire.
    pub fn write_to(&self, writer: &mut impl Write) -> Result<(), ReadError> {
        self.validate()?;
        if let Some(opcode) = self.opcode() {
            writer.write_all(&[opcode as u8, self.device()])?;
        }
        match self {
            Command::Ping
            | Command::Version
            | Command::DeviceCount
            | Command::ReadIdCode { .. }
            | Command::ReadUserCode { .. }
            | Command::ReadClock { .. }
            | Command::ReadResult { .. }
            | Command::ReadTemperature { .. }
            | Command::ReadTemperatureHighRes { .. } => {}
            Command::BitstreamStart { len, .. } => writer.write_all(&len.to_le_bytes())?,
            Command::BitstreamChunk { data } => writer.write_all(data)?,
            Command::SetClock { mhz, .. } => writer.write_all(&[*mhz, 0, 0, 0])?,
            Command::SubmitWork { work, .. } => {
                for word in work {
                    writer.write_all(&word.to_le_bytes())?;
                }
            }
            Command::WriteRegister { address, value, .. } => {
                writer.write_all(&[*address])?;
                writer.write_all(&value.to_le_bytes())?;
            }
            Command::ReadRegister { address, .. } => writer.write_all(&[*address])?,
            Command::ShiftUser1 { num_bits, data, .. } => {
                writer.write_all(&[*num_bits])?;
                writer.write_all(data)?;
            }
        }
        Ok(())
    }

    /// Reads the fixed-size response belonging to this command.
    pub fn read_response(&self, reader: &mut impl Read) -> io::Result<Box<[u8]>> {
        let mut buf = vec![0u8; self.response_len()].into_boxed_slice();
        reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Checks the response to a [`Command::Version`] request.
pub fn check_product(response: &[u8]) -> Result<&str, ReadError> {
    if response != PRODUCT_ID {
        return Err(ReadError::UnsupportedProduct(
            String::from_utf8_lossy(response)
                .trim_end_matches('\0')
                .to_string(),
        ));
    }
    str::from_utf8(&response[..response.len() - 1])
        .map_err(|e| ReadError::InvalidFormat(format!("Invalid UTF8: {}", e)))
}

/// Decodes a 4-byte response carrying a 32-bit value in host byte order.
pub fn word_from_response(response: &[u8]) -> Result<u32, ReadError> {
    let bytes: [u8; 4] = response.try_into().map_err(|_| {
        ReadError::InvalidFormat(format!("expected 4 bytes, got {}", response.len()))
    })?;
    Ok(u32::from_le_bytes(bytes))
}

#[cfg(feature = "tokio")]
pub use self::framed::MmqCodec;

#[cfg(feature = "tokio")]
mod framed {
    use std::{collections::VecDeque, io};

    use bytes::{Bytes, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};

    use crate::protocol::Command;

    /// Codec for host connections.
    ///
    /// The board answers every frame with a response of fixed length, so the
    /// codec remembers the expected lengths of encoded commands and splits
    /// incoming bytes accordingly.
    #[derive(Debug, Default)]
    pub struct MmqCodec {
        pending: VecDeque<usize>,
    }

    impl MmqCodec {
        pub fn new() -> MmqCodec {
            MmqCodec::default()
        }

        /// Number of responses that are still expected.
        pub fn pending(&self) -> usize {
            self.pending.len()
        }
    }

    impl Encoder<Command> for MmqCodec {
        type Error = io::Error;

        fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
            let mut frame = Vec::with_capacity(item.response_len().max(8));
            item.write_to(&mut frame)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
            dst.extend_from_slice(&frame);
            self.pending.push_back(item.response_len());
            Ok(())
        }
    }

    impl Decoder for MmqCodec {
        type Item = Bytes;
        type Error = io::Error;

        fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
            let Some(&len) = self.pending.front() else {
                if src.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "received bytes without a pending command",
                ));
            };
            if src.len() < len {
                src.reserve(len - src.len());
                return Ok(None);
            }
            self.pending.pop_front();
            Ok(Some(src.split_to(len).freeze()))
        }
    }

}
