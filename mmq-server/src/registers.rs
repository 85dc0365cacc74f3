//! Register access on top of the raw scan-chain transport.
//!
//! Every FPGA exposes a small register file behind its USER1 instruction. A read is a
//! 6-bit request (4-bit address, clear write flag, checksum) followed by a 32-bit
//! capture; a write is a single 38-bit shift (32-bit value, 4-bit address, set write
//! flag, checksum) latched by one run cycle.
use mmq_protocol::bits::{apply_odd_parity, pack_bits, unpack_bits};

use crate::{Register, ScanChain, error::DispatchError};

/// Width of the instruction register.
pub const IR_LEN: usize = 6;

/// Instruction opcodes as 6-bit scan vectors.
pub mod instruction {
    pub const USER1: u8 = 0x40;
    pub const USERCODE: u8 = 0x10;
    pub const JPROGRAM: u8 = 0xD0;
    pub const CFG_IN: u8 = 0xA0;
    pub const JSTART: u8 = 0x30;
    pub const BYPASS: u8 = 0xFF;
}

/// Register addresses of the work logic.
pub mod address {
    /// First of the eleven work words.
    pub const WORK_BASE: u8 = 0x1;
    pub const CLOCK: u8 = 0xD;
    pub const RESULT: u8 = 0xE;
}

pub const READ_REQUEST_BITS: usize = 6;
pub const WRITE_REQUEST_BITS: usize = 38;
/// Position of the write flag in a write request.
pub const WRITE_FLAG_BIT: usize = 36;
const ADDRESS_BITS: usize = 4;

/// Reads a register and returns it as a 32-bit scan vector.
pub fn read_register_bytes<T: ScanChain>(
    chain: &mut T,
    position: u8,
    address: u8,
) -> Result<[u8; 4], DispatchError> {
    chain.write(position, Register::Instruction, &[instruction::USER1], IR_LEN)?;
    let mut buf = [0u8; 4];
    pack_bits(address as u32, ADDRESS_BITS, &mut buf);
    apply_odd_parity(&mut buf, ADDRESS_BITS + 1);
    chain.write(position, Register::Data, &buf, READ_REQUEST_BITS)?;
    buf = [0; 4];
    chain.read(position, Register::Data, &mut buf, 32)?;
    chain.reset(position)?;
    log::trace!(
        "Read register {:#x} on chain {}: {:02x?}",
        address,
        position,
        buf
    );
    Ok(buf)
}

pub fn read_register<T: ScanChain>(
    chain: &mut T,
    position: u8,
    address: u8,
) -> Result<u32, DispatchError> {
    let buf = read_register_bytes(chain, position, address)?;
    Ok(unpack_bits(&buf, 32))
}

/// Writes a register from a 32-bit scan vector.
pub fn write_register_bytes<T: ScanChain>(
    chain: &mut T,
    position: u8,
    address: u8,
    value: [u8; 4],
) -> Result<(), DispatchError> {
    chain.write(position, Register::Instruction, &[instruction::USER1], IR_LEN)?;
    let mut buf = [0u8; 5];
    buf[..4].copy_from_slice(&value);
    pack_bits(address as u32 & 0xf, ADDRESS_BITS, &mut buf[4..]);
    buf[WRITE_FLAG_BIT / 8] |= 0x80 >> (WRITE_FLAG_BIT % 8);
    apply_odd_parity(&mut buf, WRITE_REQUEST_BITS - 1);
    log::trace!(
        "Write register {:#x} on chain {}: {:02x?}",
        address,
        position,
        buf
    );
    chain.write(position, Register::Data, &buf, WRITE_REQUEST_BITS)?;
    chain.run(position)?;
    Ok(())
}

pub fn write_register<T: ScanChain>(
    chain: &mut T,
    position: u8,
    address: u8,
    value: u32,
) -> Result<(), DispatchError> {
    let mut buf = [0u8; 4];
    pack_bits(value, 32, &mut buf);
    write_register_bytes(chain, position, address, buf)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{SimDevice, SimulatedBoard};
    use mmq_protocol::bits::parity_ok;

    #[test]
    fn write_then_read_back() {
        let mut board = SimulatedBoard::new(vec![Some(SimDevice::default())]);
        write_register(&mut board, 0, address::CLOCK, 200).unwrap();
        assert_eq!(board.device(0).unwrap().register(address::CLOCK), 200);
        assert_eq!(read_register(&mut board, 0, address::CLOCK).unwrap(), 200);
    }

    #[test]
    fn write_request_layout() {
        let mut board = SimulatedBoard::new(vec![Some(SimDevice::default())]);
        write_register(&mut board, 0, 0x3, 0x8000_0001).unwrap();
        let shift = board.device(0).unwrap().last_data_shift().to_vec();
        assert_eq!(shift.len(), 5);
        // value LSB first, then address 0x3, write flag, checksum
        assert_eq!(&shift[..4], &[0x80, 0x00, 0x00, 0x01]);
        assert_eq!(shift[4] & 0xf8, 0b1100_1000);
        assert!(parity_ok(&shift, WRITE_REQUEST_BITS - 1));
    }

    #[test]
    fn read_resets_chain_but_write_does_not() {
        let mut board = SimulatedBoard::new(vec![Some(SimDevice::default())]);
        read_register(&mut board, 0, address::RESULT).unwrap();
        assert_eq!(board.device(0).unwrap().resets(), 1);
        write_register(&mut board, 0, address::RESULT, 1).unwrap();
        assert_eq!(board.device(0).unwrap().resets(), 1);
    }
}
