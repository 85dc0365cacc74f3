//! Frame decoding and command execution.
use std::{io::Write, time::Duration};

use mmq_protocol::{
    CLOCK_FALLBACK_MHZ, CLOCK_LIMIT_MHZ, HEADER_LEN, Opcode, PRODUCT_ID, WORK_WORDS,
    bits::{byte_len, reverse_bit_order},
};

use crate::{
    Gpio, Register, ScanChain,
    bitstream::{LoaderPhase, Loader},
    error::DispatchError,
    registers::{self, IR_LEN, address, instruction},
    session::Session,
    temperature::{Resolution, TemperatureReader},
    topology::DeviceTable,
};

/// Default bound for the configuration-clear poll of a bitstream load.
pub const DEFAULT_STATUS_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of feeding one byte into the dispatcher.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// A frame was executed and answered. The caller rewinds the session with
    /// [`Session::finish_frame`].
    Consumed,
    /// The buffered frame is incomplete.
    NeedMore,
}

/// Owns the board hardware and executes complete frames.
#[derive(Debug)]
pub struct Dispatcher<T, G> {
    chain: T,
    gpio: G,
    devices: DeviceTable,
    sensors: TemperatureReader,
    status_poll_timeout: Duration,
}

impl<T: ScanChain, G: Gpio> Dispatcher<T, G> {
    pub fn new(chain: T, gpio: G) -> Dispatcher<T, G> {
        Dispatcher {
            chain,
            gpio,
            devices: DeviceTable::new(),
            sensors: TemperatureReader::new(),
            status_poll_timeout: DEFAULT_STATUS_POLL_TIMEOUT,
        }
    }

    pub fn with_status_poll_timeout(mut self, timeout: Duration) -> Self {
        self.status_poll_timeout = timeout;
        self
    }

    pub fn chain(&self) -> &T {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut T {
        &mut self.chain
    }

    pub fn gpio(&self) -> &G {
        &self.gpio
    }

    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    /// Drops the buffered frame of `session`.
    ///
    /// A bitstream transfer in progress is terminated on its chain, so no streamed write
    /// is left open for the next command.
    pub fn abandon(&mut self, session: &mut Session) {
        if session.loader().in_progress() {
            let position = session
                .frame()
                .get(1)
                .and_then(|&device| self.devices.position(device));
            if let Some(position) = position {
                close_stream(&mut self.chain, position);
            }
        }
        session.abandon();
    }

    /// Appends `byte` to the session and executes the frame once it is complete.
    ///
    /// Responses are written to `sink`. On [`Outcome::Consumed`] the caller must call
    /// [`Session::finish_frame`] before feeding the next byte; on error it should call
    /// [`Dispatcher::abandon`].
    pub fn on_byte(
        &mut self,
        session: &mut Session,
        byte: u8,
        sink: &mut impl Write,
    ) -> Result<Outcome, DispatchError> {
        session.push(byte)?;
        let frame = session.frame();
        let opcode = Opcode::try_from(frame[0]).map_err(DispatchError::UnknownOpcode)?;
        if frame.len() < Self::required_len(opcode, frame, session.loader()) {
            return Ok(Outcome::NeedMore);
        }
        log::trace!("Executing frame {:02x?}", frame);
        self.execute(opcode, session, sink)?;
        Ok(Outcome::Consumed)
    }

    fn required_len(opcode: Opcode, frame: &[u8], loader: LoaderPhase) -> usize {
        match opcode {
            Opcode::ProgramBitstream => HEADER_LEN + loader.required_payload(),
            Opcode::ShiftUser1 if frame.len() >= opcode.min_frame_len() => {
                opcode.min_frame_len() + byte_len(frame[2] as usize)
            }
            _ => opcode.min_frame_len(),
        }
    }

    fn execute(
        &mut self,
        opcode: Opcode,
        session: &mut Session,
        sink: &mut impl Write,
    ) -> Result<(), DispatchError> {
        let (frame, loader) = session.split_mut();
        let device = frame[1];
        let position = if opcode.uses_scan_chain() {
            self.devices.resolve(device)?
        } else {
            self.devices.raw_position(device)
        };
        // bitstream chunks are traced by the loader
        if opcode != Opcode::ProgramBitstream || !loader.in_progress() {
            log::debug!("Received {} for device {}", opcode, device);
        }

        match opcode {
            Opcode::Ping => respond(sink, &[0]),
            Opcode::Version => respond(sink, PRODUCT_ID),
            Opcode::DeviceCount => {
                let count = self.devices.discover(&mut self.chain)?;
                respond(sink, &[count])
            }
            Opcode::ReadIdCode => {
                let mut idcode = [0u8; 4];
                self.chain.reset(position)?;
                self.chain
                    .read(position, Register::Data, &mut idcode, 32)?;
                self.chain.reset(position)?;
                reverse_bit_order(&mut idcode, 32);
                respond(sink, &idcode)
            }
            Opcode::ReadUserCode => {
                let mut usercode = [0u8; 4];
                self.chain.write(
                    position,
                    Register::Instruction,
                    &[instruction::USERCODE],
                    IR_LEN,
                )?;
                self.chain
                    .read(position, Register::Data, &mut usercode, 32)?;
                self.chain.reset(position)?;
                reverse_bit_order(&mut usercode, 32);
                respond(sink, &usercode)
            }
            Opcode::ProgramBitstream => {
                let next = Loader::new(&mut self.chain, position, self.status_poll_timeout)
                    .advance(*loader, &frame[HEADER_LEN..]);
                let next = match next {
                    Ok(next) => next,
                    Err(e) => {
                        if loader.in_progress() {
                            close_stream(&mut self.chain, position);
                        }
                        *loader = LoaderPhase::Idle;
                        return Err(e);
                    }
                };
                *loader = next;
                match next.response() {
                    Some(byte) => respond(sink, &[byte]),
                    None => Ok(()),
                }
            }
            Opcode::SetClock => {
                let requested = frame[2];
                let capped = requested > CLOCK_LIMIT_MHZ;
                let mhz = if capped {
                    log::warn!(
                        "Clock of {} MHz for device {} is over the limit, using {} MHz",
                        requested,
                        device,
                        CLOCK_FALLBACK_MHZ
                    );
                    CLOCK_FALLBACK_MHZ
                } else {
                    requested
                };
                registers::write_register(&mut self.chain, position, address::CLOCK, mhz as u32)?;
                self.devices.set_clock_capped(device, capped);
                respond(sink, &[!capped as u8])
            }
            Opcode::ReadClock => {
                let mut clock = registers::read_register_bytes(&mut self.chain, position, address::CLOCK)?;
                reverse_bit_order(&mut clock, 32);
                respond(sink, &clock)
            }
            Opcode::SubmitWork => {
                for (i, word) in frame[HEADER_LEN..HEADER_LEN + WORK_WORDS * 4]
                    .chunks_exact(4)
                    .enumerate()
                {
                    let word = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                    registers::write_register(
                        &mut self.chain,
                        position,
                        address::WORK_BASE + i as u8,
                        word,
                    )?;
                }
                respond(sink, &[1])
            }
            Opcode::ReadResult => {
                let mut result =
                    registers::read_register_bytes(&mut self.chain, position, address::RESULT)?;
                if self.devices.is_clock_capped(device) {
                    result[0] = 0;
                }
                reverse_bit_order(&mut result, 32);
                respond(sink, &result)
            }
            Opcode::ReadTemperature | Opcode::ReadTemperatureHighRes => {
                let resolution = if opcode == Opcode::ReadTemperature {
                    Resolution::Coarse
                } else {
                    Resolution::High
                };
                let value =
                    self.sensors
                        .read(&mut self.gpio, self.devices.position(device), resolution);
                respond(sink, &resolution.response(value))
            }
            Opcode::WriteRegister => {
                let mut value = [frame[3], frame[4], frame[5], frame[6]];
                reverse_bit_order(&mut value, 32);
                registers::write_register_bytes(&mut self.chain, position, frame[2], value)?;
                respond(sink, &[1])
            }
            Opcode::ReadRegister => {
                let mut value = registers::read_register_bytes(&mut self.chain, position, frame[2])?;
                reverse_bit_order(&mut value, 32);
                respond(sink, &value)
            }
            Opcode::ShiftUser1 => {
                let num_bits = frame[2] as usize;
                let len = byte_len(num_bits);
                let mut response = Vec::with_capacity(len + 1);
                response.push(1);
                response.extend_from_slice(&frame[3..3 + len]);
                reverse_bit_order(&mut response[1..], num_bits);
                self.chain.write(
                    position,
                    Register::Instruction,
                    &[instruction::USER1],
                    IR_LEN,
                )?;
                self.chain
                    .read(position, Register::Data, &mut response[1..], num_bits)?;
                self.chain.run(position)?;
                reverse_bit_order(&mut response[1..], num_bits);
                respond(sink, &response)
            }
        }
    }
}

/// Resets a chain that may be in the middle of a streamed write.
fn close_stream<T: ScanChain>(chain: &mut T, position: u8) {
    log::debug!("Closing streamed write on chain {}", position);
    if let Err(e) = chain.reset(position) {
        log::warn!("Could not reset chain {}: {}", position, e);
    }
}

fn respond(sink: &mut impl Write, response: &[u8]) -> Result<(), DispatchError> {
    log::trace!("Response {:02x?}", response);
    sink.write_all(response).map_err(DispatchError::Sink)
}
