//! An in-memory board.
//!
//! [`SimulatedBoard`] implements both [`ScanChain`] and [`Gpio`] and behaves like a
//! ModMiner Quad closely enough to exercise the whole command set: devices answer
//! IDCODE/USERCODE scans, keep a register file behind USER1, accept bitstreams through
//! CFG_IN and report DONE after JSTART when the image carried a sync word. The
//! temperature sensors shift out fixed readings. All pin activity is recorded.
use std::{collections::BTreeMap, io};

use mmq_protocol::{
    MAX_DEVICES, WORK_WORDS,
    bits::{bit, byte_len, pack_bits, parity_ok, unpack_bits},
};

use crate::{
    Direction, Gpio, Pin, Register, ScanChain,
    registers::{READ_REQUEST_BITS, WRITE_FLAG_BIT, WRITE_REQUEST_BITS, address, instruction},
    temperature::SENSOR_PINS,
};

/// Configuration sync word that every valid bitstream contains.
const SYNC_WORD: [u8; 4] = [0xAA, 0x99, 0x55, 0x66];
/// IDCODE of an XC6SLX150.
pub const DEFAULT_IDCODE: u32 = 0x0401_D093;

const STATUS_BASE: u8 = 0x80;
const STATUS_BUSY: u8 = 0x08;
const STATUS_DONE: u8 = 0x04;
const STARTUP_CYCLES: usize = 16;
const LAST_WORK_REGISTER: u8 = address::WORK_BASE + WORK_WORDS as u8 - 1;

/// One FPGA on its own scan-chain.
#[derive(Clone, Debug)]
pub struct SimDevice {
    idcode: u32,
    usercode: u32,
    registers: [u32; 16],
    instruction: Option<u8>,
    busy_polls: u32,
    busy_remaining: u32,
    configured: bool,
    bitstream: Vec<u8>,
    streaming: bool,
    startup_cycles: usize,
    pending_read: Option<u8>,
    pending_write: Option<(u8, u32)>,
    user1: Vec<u8>,
    last_data_shift: Vec<u8>,
    status_reads: u32,
    resets: u32,
}

impl Default for SimDevice {
    fn default() -> Self {
        SimDevice {
            idcode: DEFAULT_IDCODE,
            usercode: 0xFFFF_FFFF,
            registers: [0; 16],
            instruction: None,
            busy_polls: 0,
            busy_remaining: 0,
            configured: false,
            bitstream: Vec::new(),
            streaming: false,
            startup_cycles: 0,
            pending_read: None,
            pending_write: None,
            user1: Vec::new(),
            last_data_shift: Vec::new(),
            status_reads: 0,
            resets: 0,
        }
    }
}

impl SimDevice {
    pub fn with_idcode(mut self, idcode: u32) -> Self {
        self.idcode = idcode;
        self
    }

    pub fn with_usercode(mut self, usercode: u32) -> Self {
        self.usercode = usercode;
        self
    }

    /// Number of status polls the device reports busy after JPROGRAM.
    pub fn with_busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    pub fn register(&self, address: u8) -> u32 {
        self.registers[address as usize & 0xf]
    }

    pub fn set_register(&mut self, address: u8, value: u32) {
        self.registers[address as usize & 0xf] = value;
    }

    /// The currently selected instruction, `None` after a chain reset.
    pub fn instruction(&self) -> Option<u8> {
        self.instruction
    }

    pub fn bitstream(&self) -> &[u8] {
        &self.bitstream
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn status_reads(&self) -> u32 {
        self.status_reads
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// The bytes of the last data register write.
    pub fn last_data_shift(&self) -> &[u8] {
        &self.last_data_shift
    }

    fn status(&mut self) -> u8 {
        self.status_reads += 1;
        let mut status = STATUS_BASE;
        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            status |= STATUS_BUSY;
        }
        if self.configured {
            status |= STATUS_DONE;
        }
        status
    }

    fn select(&mut self, ir: u8) {
        // only the first six bits are shifted
        let ir = ir & 0xFC;
        self.instruction = Some(ir);
        self.pending_read = None;
        if ir == instruction::JPROGRAM & 0xFC {
            self.configured = false;
            self.bitstream.clear();
            self.streaming = false;
            self.startup_cycles = 0;
            self.busy_remaining = self.busy_polls;
        }
    }

    fn write_data(&mut self, data: &[u8], num_bits: usize) {
        self.last_data_shift = data[..byte_len(num_bits)].to_vec();
        if self.instruction != Some(instruction::USER1) {
            log::debug!("Ignoring data write with instruction {:?}", self.instruction);
            return;
        }
        match num_bits {
            READ_REQUEST_BITS if parity_ok(data, READ_REQUEST_BITS - 1) && !bit(data, 4) => {
                self.pending_read = Some(unpack_bits(data, 4) as u8);
            }
            WRITE_REQUEST_BITS
                if parity_ok(data, WRITE_REQUEST_BITS - 1) && bit(data, WRITE_FLAG_BIT) =>
            {
                self.pending_write = Some((unpack_bits(&data[4..], 4) as u8, unpack_bits(data, 32)));
            }
            _ => log::warn!("Rejecting malformed register request {:02x?}", data),
        }
    }

    fn read_data(&mut self, data: &mut [u8], num_bits: usize) {
        let value = match self.instruction {
            None => Some(self.idcode),
            Some(instruction::USERCODE) => Some(self.usercode),
            Some(instruction::USER1) => self.pending_read.take().map(|a| self.register(a)),
            _ => Some(0),
        };
        match value {
            Some(value) => pack_bits(value, num_bits.min(32), data),
            None => {
                // free-running shift through USER1: the previous contents come out
                let len = byte_len(num_bits);
                let mut captured = std::mem::take(&mut self.user1);
                captured.resize(len, 0);
                self.user1 = data[..len].to_vec();
                data[..len].copy_from_slice(&captured);
            }
        }
    }

    fn stream(&mut self, data: &[u8], num_bits: usize) {
        if self.instruction != Some(instruction::CFG_IN) {
            log::warn!("Dropping streamed data outside CFG_IN");
            return;
        }
        self.bitstream.extend_from_slice(&data[..byte_len(num_bits)]);
    }

    fn run(&mut self) {
        if let Some((address, value)) = self.pending_write.take() {
            self.set_register(address, value);
            if address == LAST_WORK_REGISTER {
                let result = (address::WORK_BASE..=LAST_WORK_REGISTER)
                    .map(|a| self.register(a))
                    .fold(0, |acc, word| acc ^ word);
                self.set_register(address::RESULT, result);
            }
        }
        if self.instruction == Some(instruction::JSTART) {
            self.startup_cycles += 1;
            if self.startup_cycles == STARTUP_CYCLES {
                self.configured = !self.streaming
                    && self.bitstream.windows(SYNC_WORD.len()).any(|w| w == SYNC_WORD);
            }
        }
    }

    fn reset(&mut self) {
        self.resets += 1;
        self.instruction = None;
        self.pending_read = None;
        self.streaming = false;
    }
}

/// Pin activity recorded by [`SimulatedBoard`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PinEvent {
    Direction(Pin, Direction),
    Set(Pin, bool),
    Get(Pin),
}

/// A board with one optional device per scan-chain and four temperature sensors.
#[derive(Clone, Debug, Default)]
pub struct SimulatedBoard {
    chains: Vec<Option<SimDevice>>,
    temperatures: [u16; MAX_DEVICES],
    levels: BTreeMap<Pin, bool>,
    sensor_bits: [usize; MAX_DEVICES],
    sensor_out: [bool; MAX_DEVICES],
    events: Vec<PinEvent>,
}

impl SimulatedBoard {
    pub fn new(chains: Vec<Option<SimDevice>>) -> SimulatedBoard {
        SimulatedBoard {
            chains,
            ..SimulatedBoard::default()
        }
    }

    /// A board with `count` devices on consecutive chains.
    pub fn with_devices(count: usize) -> SimulatedBoard {
        SimulatedBoard::new(vec![Some(SimDevice::default()); count])
    }

    /// Sets the raw 16-bit reading of the sensor at `position`.
    pub fn with_temperature(mut self, position: usize, raw: u16) -> Self {
        self.temperatures[position] = raw;
        self
    }

    pub fn device(&self, position: u8) -> Option<&SimDevice> {
        self.chains.get(position as usize)?.as_ref()
    }

    pub fn device_mut(&mut self, position: u8) -> Option<&mut SimDevice> {
        self.chains.get_mut(position as usize)?.as_mut()
    }

    pub fn gpio_events(&self) -> &[PinEvent] {
        &self.events
    }

    pub fn clear_gpio_events(&mut self) {
        self.events.clear();
    }

    fn chain(&mut self, port: u8) -> io::Result<&mut SimDevice> {
        self.device_mut(port).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                format!("no device on chain {}", port),
            )
        })
    }
}

impl ScanChain for SimulatedBoard {
    fn detect_ports(&mut self) -> io::Result<u8> {
        Ok(self.chains.len() as u8)
    }

    fn detect(&mut self, port: u8) -> io::Result<usize> {
        match self.chains.get(port as usize) {
            Some(device) => Ok(device.is_some() as usize),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("chain {} does not exist", port),
            )),
        }
    }

    fn write(
        &mut self,
        port: u8,
        register: Register,
        data: &[u8],
        num_bits: usize,
    ) -> io::Result<()> {
        let device = self.chain(port)?;
        match register {
            Register::Instruction => device.select(data[0]),
            Register::Data => device.write_data(data, num_bits),
        }
        Ok(())
    }

    fn read(
        &mut self,
        port: u8,
        register: Register,
        data: &mut [u8],
        num_bits: usize,
    ) -> io::Result<()> {
        let device = self.chain(port)?;
        match register {
            Register::Instruction => data[0] = device.status(),
            Register::Data => device.read_data(data, num_bits),
        }
        Ok(())
    }

    fn stream_start(
        &mut self,
        port: u8,
        register: Register,
        data: &[u8],
        num_bits: usize,
    ) -> io::Result<()> {
        let device = self.chain(port)?;
        if register != Register::Data {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "streamed writes target the data register",
            ));
        }
        device.streaming = true;
        device.stream(data, num_bits);
        Ok(())
    }

    fn stream_more(&mut self, port: u8, data: &[u8], num_bits: usize, last: bool) -> io::Result<()> {
        let device = self.chain(port)?;
        if !device.streaming {
            return Err(io::Error::other("no streamed write in progress"));
        }
        device.stream(data, num_bits);
        if last {
            device.streaming = false;
        }
        Ok(())
    }

    fn run(&mut self, port: u8) -> io::Result<()> {
        self.chain(port)?.run();
        Ok(())
    }

    fn reset(&mut self, port: u8) -> io::Result<()> {
        self.chain(port)?.reset();
        Ok(())
    }
}

impl Gpio for SimulatedBoard {
    fn set_direction(&mut self, pin: Pin, direction: Direction) {
        self.events.push(PinEvent::Direction(pin, direction));
    }

    fn set(&mut self, pin: Pin, high: bool) {
        self.events.push(PinEvent::Set(pin, high));
        let was_high = self.levels.insert(pin, high).unwrap_or(false);
        for (i, sensor) in SENSOR_PINS.iter().enumerate() {
            if sensor.cs == pin && was_high && !high {
                self.sensor_bits[i] = 0;
            }
            let selected = !self.levels.get(&sensor.cs).copied().unwrap_or(true);
            if sensor.scl == pin && !was_high && high && selected {
                let n = self.sensor_bits[i];
                self.sensor_out[i] = n < 16 && self.temperatures[i] & (0x8000 >> n) != 0;
                self.sensor_bits[i] += 1;
            }
        }
    }

    fn get(&mut self, pin: Pin) -> bool {
        self.events.push(PinEvent::Get(pin));
        match SENSOR_PINS.iter().position(|sensor| sensor.sdo == pin) {
            Some(i) => self.sensor_out[i],
            None => self.levels.get(&pin).copied().unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn idcode_is_shifted_lsb_first() {
        let mut board = SimulatedBoard::with_devices(1);
        let mut buf = [0u8; 4];
        board.reset(0).unwrap();
        board.read(0, Register::Data, &mut buf, 32).unwrap();
        assert_eq!(unpack_bits(&buf, 32), DEFAULT_IDCODE);
    }

    #[test]
    fn missing_chain_is_an_error() {
        let mut board = SimulatedBoard::new(vec![None]);
        assert_eq!(board.detect(0).unwrap(), 0);
        assert!(board.detect(1).is_err());
        assert!(board.run(0).is_err());
    }

    #[test]
    fn user1_shift_returns_previous_contents() {
        let mut board = SimulatedBoard::with_devices(1);
        board
            .write(0, Register::Instruction, &[instruction::USER1], 6)
            .unwrap();
        let mut first = [0x12, 0x34];
        board.read(0, Register::Data, &mut first, 16).unwrap();
        assert_eq!(first, [0, 0]);
        let mut second = [0x56, 0x78];
        board.read(0, Register::Data, &mut second, 16).unwrap();
        assert_eq!(second, [0x12, 0x34]);
    }
}
