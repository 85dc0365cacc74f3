//! Asynchronous client on top of tokio.
//!
//! Frames are encoded and responses split with [`MmqCodec`], which tracks the response
//! length of every command in flight.
use std::io;

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, ToSocketAddrs},
};
use tokio_util::codec::{Decoder, Encoder};

use mmq_protocol::{
    BITSTREAM_CHUNK_LEN, Command, WORK_WORDS,
    codec::{MmqCodec, check_product, word_from_response},
    error::ReadError,
};

use crate::{bitstream_len, expect_ack};

pub struct AsyncMmqClient {
    tcp: TcpStream,
    codec: MmqCodec,
    read_buf: BytesMut,
}

impl AsyncMmqClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<AsyncMmqClient> {
        let tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true)?;
        Ok(AsyncMmqClient {
            tcp,
            codec: MmqCodec::new(),
            read_buf: BytesMut::with_capacity(64),
        })
    }

    /// Sends a command and waits for its response.
    pub async fn transact(&mut self, command: Command) -> io::Result<Bytes> {
        let mut frame = BytesMut::new();
        self.codec.encode(command, &mut frame)?;
        self.tcp.write_all(&frame).await?;
        loop {
            if let Some(response) = self.codec.decode(&mut self.read_buf)? {
                return Ok(response);
            }
            if self.tcp.read_buf(&mut self.read_buf).await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "board closed the connection",
                ));
            }
        }
    }

    pub async fn ping(&mut self) -> Result<(), ReadError> {
        let response = self.transact(Command::Ping).await?;
        if &response[..] != [0] {
            return Err(ReadError::InvalidFormat(format!(
                "Unexpected ping response {:02x?}",
                &response[..]
            )));
        }
        Ok(())
    }

    pub async fn version(&mut self) -> Result<String, ReadError> {
        let response = self.transact(Command::Version).await?;
        Ok(check_product(&response)?.to_string())
    }

    pub async fn device_count(&mut self) -> Result<u8, ReadError> {
        Ok(self.transact(Command::DeviceCount).await?[0])
    }

    /// Uploads a bitstream and returns whether the device configured successfully.
    pub async fn program_bitstream(&mut self, device: u8, image: &[u8]) -> Result<bool, ReadError> {
        let len = bitstream_len(image)?;
        let response = self
            .transact(Command::BitstreamStart { device, len })
            .await?;
        expect_ack("bitstream header", &response)?;
        let mut chunks = image.chunks(BITSTREAM_CHUNK_LEN);
        let last = chunks.next_back().unwrap_or_default();
        for chunk in chunks {
            let response = self
                .transact(Command::BitstreamChunk { data: chunk.into() })
                .await?;
            expect_ack("bitstream chunk", &response)?;
        }
        let response = self
            .transact(Command::BitstreamChunk { data: last.into() })
            .await?;
        Ok(response[0] == 1)
    }

    pub async fn set_clock(&mut self, device: u8, mhz: u8) -> Result<bool, ReadError> {
        Ok(self.transact(Command::SetClock { device, mhz }).await?[0] == 1)
    }

    pub async fn submit_work(
        &mut self,
        device: u8,
        work: &[u32; WORK_WORDS],
    ) -> Result<(), ReadError> {
        let response = self
            .transact(Command::SubmitWork {
                device,
                work: *work,
            })
            .await?;
        expect_ack("work", &response)
    }

    pub async fn read_result(&mut self, device: u8) -> Result<u32, ReadError> {
        word_from_response(&self.transact(Command::ReadResult { device }).await?)
    }

    pub async fn write_register(
        &mut self,
        device: u8,
        address: u8,
        value: u32,
    ) -> Result<(), ReadError> {
        let response = self
            .transact(Command::WriteRegister {
                device,
                address,
                value,
            })
            .await?;
        expect_ack("register write", &response)
    }

    pub async fn read_register(&mut self, device: u8, address: u8) -> Result<u32, ReadError> {
        word_from_response(
            &self
                .transact(Command::ReadRegister { device, address })
                .await?,
        )
    }

    pub async fn read_temperature_high_res(&mut self, device: u8) -> Result<u16, ReadError> {
        let response = self
            .transact(Command::ReadTemperatureHighRes { device })
            .await?;
        Ok(u16::from_le_bytes([response[0], response[1]]))
    }
}
