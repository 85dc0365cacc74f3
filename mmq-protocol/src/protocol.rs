use std::fmt::Display;

/// Product string returned by [`Opcode::Version`], including the trailing NUL.
pub const PRODUCT_ID: &[u8] = b"ModMiner Quad v0.4-ljr-alpha\0";

/// Number of FPGAs a board can carry. The logical slot after the last one is
/// a reserved sentinel.
pub const MAX_DEVICES: usize = 4;

/// Payload bytes carried by one bitstream frame.
pub const BITSTREAM_CHUNK_LEN: usize = 32;

/// Number of 32-bit words in a work unit.
pub const WORK_WORDS: usize = 11;

/// Highest clock (MHz) accepted as requested.
pub const CLOCK_LIMIT_MHZ: u8 = 250;

/// Clock (MHz) used instead of an over-limit request.
pub const CLOCK_FALLBACK_MHZ: u8 = 50;

/// Length of the `[opcode, device]` frame header.
pub const HEADER_LEN: usize = 2;

/// Largest frame the board accepts (a work submission).
pub const MAX_FRAME_LEN: usize = HEADER_LEN + WORK_WORDS * 4;

/// Command opcodes, byte 0 of every frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Ping = 0x0,
    Version = 0x1,
    DeviceCount = 0x2,
    ReadIdCode = 0x3,
    ReadUserCode = 0x4,
    ProgramBitstream = 0x5,
    SetClock = 0x6,
    ReadClock = 0x7,
    SubmitWork = 0x8,
    ReadResult = 0x9,
    ReadTemperature = 0xA,
    WriteRegister = 0xB,
    ReadRegister = 0xC,
    ReadTemperatureHighRes = 0xD,
    ShiftUser1 = 0xE,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x0 => Opcode::Ping,
            0x1 => Opcode::Version,
            0x2 => Opcode::DeviceCount,
            0x3 => Opcode::ReadIdCode,
            0x4 => Opcode::ReadUserCode,
            0x5 => Opcode::ProgramBitstream,
            0x6 => Opcode::SetClock,
            0x7 => Opcode::ReadClock,
            0x8 => Opcode::SubmitWork,
            0x9 => Opcode::ReadResult,
            0xA => Opcode::ReadTemperature,
            0xB => Opcode::WriteRegister,
            0xC => Opcode::ReadRegister,
            0xD => Opcode::ReadTemperatureHighRes,
            0xE => Opcode::ShiftUser1,
            other => return Err(other),
        })
    }
}

impl Opcode {
    /// Smallest frame, header included, before the command may execute.
    ///
    /// For [`Opcode::ShiftUser1`] the payload length follows from byte 2, and
    /// [`Opcode::ProgramBitstream`] only states the header frame here; later
    /// frames depend on the transfer progress.
    pub const fn min_frame_len(self) -> usize {
        match self {
            Opcode::ProgramBitstream | Opcode::SetClock => 6,
            Opcode::SubmitWork => MAX_FRAME_LEN,
            Opcode::WriteRegister => 7,
            Opcode::ReadRegister | Opcode::ShiftUser1 => 3,
            _ => HEADER_LEN,
        }
    }

    /// Whether the command addresses a device over the scan-chain and thus
    /// needs a discovered logical index.
    pub const fn uses_scan_chain(self) -> bool {
        !matches!(
            self,
            Opcode::Ping
                | Opcode::Version
                | Opcode::DeviceCount
                | Opcode::ReadTemperature
                | Opcode::ReadTemperatureHighRes
        )
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({:#x})", self, *self as u8)
    }
}

/// A request sent from the host to the board.
///
/// Every command except [`Command::BitstreamChunk`] is sent as a complete
/// frame starting with `[opcode, device]`. While a bitstream transfer is in
/// progress the board keeps the header of the
/// [`Command::BitstreamStart`] frame, so chunks carry payload only.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Ping,
    Version,
    /// Rescans the scan-chains and returns the number of live devices.
    DeviceCount,
    ReadIdCode { device: u8 },
    ReadUserCode { device: u8 },
    /// Announces a bitstream of `len` bytes for `device`.
    BitstreamStart { device: u8, len: u32 },
    /// Up to [`BITSTREAM_CHUNK_LEN`] bytes of bitstream payload.
    BitstreamChunk { data: Box<[u8]> },
    SetClock { device: u8, mhz: u8 },
    ReadClock { device: u8 },
    SubmitWork { device: u8, work: [u32; WORK_WORDS] },
    ReadResult { device: u8 },
    ReadTemperature { device: u8 },
    ReadTemperatureHighRes { device: u8 },
    WriteRegister { device: u8, address: u8, value: u32 },
    ReadRegister { device: u8, address: u8 },
    /// Shifts `num_bits` bits of `data` through the USER1 register.
    ShiftUser1 { device: u8, num_bits: u8, data: Box<[u8]> },
}

impl Command {
    /// The opcode of the frame, `None` for bitstream payload chunks.
    pub fn opcode(&self) -> Option<Opcode> {
        Some(match self {
            Command::Ping => Opcode::Ping,
            Command::Version => Opcode::Version,
            Command::DeviceCount => Opcode::DeviceCount,
            Command::ReadIdCode { .. } => Opcode::ReadIdCode,
            Command::ReadUserCode { .. } => Opcode::ReadUserCode,
            Command::BitstreamStart { .. } => Opcode::ProgramBitstream,
            Command::BitstreamChunk { .. } => return None,
            Command::SetClock { .. } => Opcode::SetClock,
            Command::ReadClock { .. } => Opcode::ReadClock,
            Command::SubmitWork { .. } => Opcode::SubmitWork,
            Command::ReadResult { .. } => Opcode::ReadResult,
            Command::ReadTemperature { .. } => Opcode::ReadTemperature,
            Command::ReadTemperatureHighRes { .. } => Opcode::ReadTemperatureHighRes,
            Command::WriteRegister { .. } => Opcode::WriteRegister,
            Command::ReadRegister { .. } => Opcode::ReadRegister,
            Command::ShiftUser1 { .. } => Opcode::ShiftUser1,
        })
    }

    /// The logical device a command targets. Commands without a target send 0.
    pub fn device(&self) -> u8 {
        match self {
            Command::Ping | Command::Version | Command::DeviceCount => 0,
            Command::BitstreamChunk { .. } => 0,
            Command::ReadIdCode { device }
            | Command::ReadUserCode { device }
            | Command::BitstreamStart { device, .. }
            | Command::SetClock { device, .. }
            | Command::ReadClock { device }
            | Command::SubmitWork { device, .. }
            | Command::ReadResult { device }
            | Command::ReadTemperature { device }
            | Command::ReadTemperatureHighRes { device }
            | Command::WriteRegister { device, .. }
            | Command::ReadRegister { device, .. }
            | Command::ShiftUser1 { device, .. } => *device,
        }
    }

    /// Number of bytes the board answers with.
    ///
    /// Bitstream frames always answer with a single byte: an acknowledgement
    /// for intermediate frames and the success flag for the last one.
    pub fn response_len(&self) -> usize {
        match self {
            Command::Version => PRODUCT_ID.len(),
            Command::ReadIdCode { .. }
            | Command::ReadUserCode { .. }
            | Command::ReadClock { .. }
            | Command::ReadResult { .. }
            | Command::ReadRegister { .. } => 4,
            Command::ReadTemperatureHighRes { .. } => 2,
            Command::ShiftUser1 { num_bits, .. } => 1 + (*num_bits as usize).div_ceil(8),
            _ => 1,
        }
    }
}

#[test]
fn opcode_round_trips_through_u8() {
    for value in 0u8..=0xE {
        let opcode = Opcode::try_from(value).unwrap();
        assert_eq!(opcode as u8, value);
    }
    assert_eq!(Opcode::try_from(0xF), Err(0xF));
    assert_eq!(Opcode::try_from(0xFF), Err(0xFF));
}

#[test]
fn minimum_frame_lengths() {
    assert_eq!(Opcode::Ping.min_frame_len(), 2);
    assert_eq!(Opcode::ProgramBitstream.min_frame_len(), 6);
    assert_eq!(Opcode::SetClock.min_frame_len(), 6);
    assert_eq!(Opcode::SubmitWork.min_frame_len(), 46);
    assert_eq!(Opcode::WriteRegister.min_frame_len(), 7);
    assert_eq!(Opcode::ReadRegister.min_frame_len(), 3);
    assert_eq!(Opcode::ShiftUser1.min_frame_len(), 3);
}

#[test]
fn product_id_is_nul_terminated() {
    assert_eq!(PRODUCT_ID.len(), 29);
    assert_eq!(PRODUCT_ID.last(), Some(&0));
}
