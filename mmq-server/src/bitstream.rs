//! Resumable bitstream loading.
//!
//! A bitstream spans many frames. The first frame announces the total length, then the
//! image follows in chunks of [`BITSTREAM_CHUNK_LEN`] bytes, each answered separately.
//! The transfer progress lives in the session as a [`LoaderPhase`]; every frame runs
//! exactly one transition.
use std::time::{Duration, Instant};

use mmq_protocol::BITSTREAM_CHUNK_LEN;

use crate::{
    Register, ScanChain,
    error::DispatchError,
    registers::{IR_LEN, instruction},
};

/// Captured instruction register bit that stays set while the configuration memory is
/// being cleared.
const STATUS_BUSY: u8 = 0x08;
/// Captured instruction register bit reporting a configured device.
const STATUS_DONE: u8 = 0x04;
/// Run cycles issued after JSTART.
const STARTUP_CYCLES: usize = 16;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum LoaderPhase {
    /// No transfer.
    #[default]
    Idle,
    /// Length announced and device prepared; the first chunk is pending.
    HeaderReceived { remaining: u32 },
    /// Chunks are being streamed into the configuration register.
    Streaming { remaining: u32 },
    /// The last chunk was loaded. Left for the next [`crate::session::Session::finish_frame`].
    Complete { success: bool },
}

impl LoaderPhase {
    /// Whether frames following the current one still belong to the transfer.
    pub fn in_progress(&self) -> bool {
        matches!(
            self,
            LoaderPhase::HeaderReceived { .. } | LoaderPhase::Streaming { .. }
        )
    }

    /// Payload bytes, not counting the frame header, the next transition consumes.
    pub fn required_payload(&self) -> usize {
        match self {
            LoaderPhase::Idle | LoaderPhase::Complete { .. } => 4,
            LoaderPhase::HeaderReceived { .. } => BITSTREAM_CHUNK_LEN,
            LoaderPhase::Streaming { remaining } => (*remaining as usize).min(BITSTREAM_CHUNK_LEN),
        }
    }

    /// The single response byte announcing this phase to the host.
    pub fn response(&self) -> Option<u8> {
        match self {
            LoaderPhase::Idle => None,
            LoaderPhase::HeaderReceived { .. } | LoaderPhase::Streaming { .. } => Some(1),
            LoaderPhase::Complete { success } => Some(*success as u8),
        }
    }
}

/// Drives one device through a transfer.
pub(crate) struct Loader<'a, T> {
    chain: &'a mut T,
    position: u8,
    poll_timeout: Duration,
}

impl<'a, T: ScanChain> Loader<'a, T> {
    pub(crate) fn new(chain: &'a mut T, position: u8, poll_timeout: Duration) -> Loader<'a, T> {
        Loader {
            chain,
            position,
            poll_timeout,
        }
    }

    /// Runs the transition for `phase` on the first [`LoaderPhase::required_payload`]
    /// bytes of `payload`.
    pub(crate) fn advance(
        &mut self,
        phase: LoaderPhase,
        payload: &[u8],
    ) -> Result<LoaderPhase, DispatchError> {
        let needed = phase.required_payload();
        let payload = payload.get(..needed).ok_or(DispatchError::ShortPayload {
            needed,
            received: payload.len(),
        })?;
        match phase {
            LoaderPhase::Idle | LoaderPhase::Complete { .. } => {
                let len = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
                self.start(len)
            }
            LoaderPhase::HeaderReceived { remaining } => self.first_chunk(remaining, payload),
            LoaderPhase::Streaming { remaining } => self.next_chunk(remaining, payload),
        }
    }

    fn start(&mut self, len: u32) -> Result<LoaderPhase, DispatchError> {
        if (len as usize) < BITSTREAM_CHUNK_LEN {
            return Err(DispatchError::InvalidBitstreamLength(len));
        }
        log::info!(
            "Starting bitstream load of {} bytes on chain {}",
            len,
            self.position
        );
        self.write_instruction(instruction::JPROGRAM)?;
        self.wait_until_cleared()?;
        // The device needs a frame round-trip between CFG_IN and the first data shift.
        self.write_instruction(instruction::CFG_IN)?;
        Ok(LoaderPhase::HeaderReceived { remaining: len })
    }

    fn first_chunk(&mut self, remaining: u32, chunk: &[u8]) -> Result<LoaderPhase, DispatchError> {
        self.chain
            .stream_start(self.position, Register::Data, chunk, chunk.len() * 8)?;
        let remaining = remaining.saturating_sub(chunk.len() as u32);
        log::trace!("Streamed first chunk, {} bytes remaining", remaining);
        if remaining > 0 {
            return Ok(LoaderPhase::Streaming { remaining });
        }
        self.chain.stream_more(self.position, &[], 0, true)?;
        self.finish()
    }

    fn next_chunk(&mut self, remaining: u32, chunk: &[u8]) -> Result<LoaderPhase, DispatchError> {
        let remaining = remaining.saturating_sub(chunk.len() as u32);
        self.chain
            .stream_more(self.position, chunk, chunk.len() * 8, remaining == 0)?;
        log::trace!("Streamed chunk, {} bytes remaining", remaining);
        if remaining > 0 {
            Ok(LoaderPhase::Streaming { remaining })
        } else {
            self.finish()
        }
    }

    fn finish(&mut self) -> Result<LoaderPhase, DispatchError> {
        self.write_instruction(instruction::JSTART)?;
        for _ in 0..STARTUP_CYCLES {
            self.chain.run(self.position)?;
        }
        let success = self.status()? & STATUS_DONE != 0;
        if success {
            log::info!("Bitstream loaded on chain {}", self.position);
        } else {
            log::warn!(
                "Bitstream load on chain {} finished without DONE",
                self.position
            );
        }
        Ok(LoaderPhase::Complete { success })
    }

    fn write_instruction(&mut self, ir: u8) -> Result<(), DispatchError> {
        self.chain
            .write(self.position, Register::Instruction, &[ir], IR_LEN)?;
        Ok(())
    }

    /// Captures the instruction register while shifting in BYPASS.
    fn status(&mut self) -> Result<u8, DispatchError> {
        let mut status = [instruction::BYPASS];
        self.chain
            .read(self.position, Register::Instruction, &mut status, IR_LEN)?;
        Ok(status[0])
    }

    fn wait_until_cleared(&mut self) -> Result<(), DispatchError> {
        let start = Instant::now();
        let mut polls = 0u32;
        loop {
            polls += 1;
            if self.status()? & STATUS_BUSY == 0 {
                log::debug!("Configuration memory cleared after {} polls", polls);
                return Ok(());
            }
            if start.elapsed() >= self.poll_timeout {
                return Err(DispatchError::Timeout("configuration memory to clear"));
            }
        }
    }
}
