//! # UIO Debug Bridge Backend
//!
//! Drives a single scan chain through a memory-mapped AMD debug bridge exposed via the
//! Linux UIO subsystem. The bridge only shifts raw TMS/TDI vectors, so this backend walks
//! the TAP state machine itself. Between operations the TAP rests in Run-Test/Idle,
//! except while a streamed write holds it in Shift-DR.
//!
//! ## Example Usage
//!
//! ```ignore
//! use mmq_bridge::backends::uio::{IdleGpio, UioDriverBackend};
//! use mmq_server::server::{Config, Server};
//!
//! let chain = UioDriverBackend::new("/dev/uio0", Duration::from_millis(1))?;
//! let mut server = Server::new(chain, IdleGpio, Config::default());
//! server.listen("127.0.0.1:8332")?;
//! ```
use std::{
    fs::OpenOptions,
    io,
    num::NonZero,
    path::Path,
    ptr::{NonNull, read_volatile, write_volatile},
    time::{Duration, Instant},
};

use mmq_protocol::bits::{bit, byte_len, set_bit};
use mmq_server::{Direction, Gpio, Pin, Register, ScanChain};
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap};

const LENGTH_OFFSET: usize = 0;
const TMS_REG_OFFSET: usize = 4;
const TDI_REG_OFFSET: usize = 8;
const TDO_REG_OFFSET: usize = 12;
const CONTROL_REG_OFFSET: usize = 16;

const MAP_SIZE: usize = 0x10000;

/// Bits shifted out of reset while probing for a device.
const IDCODE_BITS: usize = 32;

/// Debug bridge driver based on a UIO device
pub struct UioDriverBackend {
    jtag: *mut u32,
    /// The bridge has no interrupt line and must be polled.
    /// This timeout defines how long a poll may take before issuing a timeout error.
    poll_timeout: Duration,
    streaming: bool,
}

/// TMS/TDI vector in the bridge's layout: bit `i` is `byte[i / 8] >> (i % 8)`.
#[derive(Default)]
struct Vector {
    tms: Vec<u8>,
    tdi: Vec<u8>,
    len: usize,
}

impl Vector {
    fn push(&mut self, tms: bool, tdi: bool) {
        if self.len % 8 == 0 {
            self.tms.push(0);
            self.tdi.push(0);
        }
        let (byte, shift) = (self.len / 8, self.len % 8);
        self.tms[byte] |= (tms as u8) << shift;
        self.tdi[byte] |= (tdi as u8) << shift;
        self.len += 1;
    }

    fn tms(&mut self, path: &[bool]) -> &mut Self {
        for &tms in path {
            self.push(tms, false);
        }
        self
    }

    /// Appends `num_bits` data bits. With `exit` the last bit leaves the shift state.
    fn data(&mut self, data: &[u8], num_bits: usize, exit: bool) -> &mut Self {
        for i in 0..num_bits {
            self.push(exit && i + 1 == num_bits, bit(data, i));
        }
        self
    }
}

/// Run-Test/Idle to Shift-DR.
const IDLE_TO_SHIFT_DR: [bool; 3] = [true, false, false];
/// Run-Test/Idle to Shift-IR.
const IDLE_TO_SHIFT_IR: [bool; 4] = [true, true, false, false];
/// Exit1 to Run-Test/Idle through Update.
const EXIT_TO_IDLE: [bool; 2] = [true, false];
/// Any state to Test-Logic-Reset, then Run-Test/Idle.
const RESET_TO_IDLE: [bool; 6] = [true, true, true, true, true, false];

fn u32_from_u8_slice(slice: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf[..slice.len()].copy_from_slice(slice);
    u32::from_ne_bytes(buf)
}

fn shift_path(register: Register) -> &'static [bool] {
    match register {
        Register::Instruction => &IDLE_TO_SHIFT_IR,
        Register::Data => &IDLE_TO_SHIFT_DR,
    }
}

impl UioDriverBackend {
    pub fn new(path: impl AsRef<Path>, poll_timeout: Duration) -> io::Result<UioDriverBackend> {
        let device_path = path.as_ref();
        log::debug!("Opening UIO device: {}", device_path.display());
        let file = OpenOptions::new().read(true).write(true).open(device_path)?;
        log::debug!("UIO device file opened successfully");

        let size = NonZero::new(MAP_SIZE).ok_or_else(|| io::Error::other("empty map"))?;
        let jtag = unsafe {
            log::debug!("Mapping UIO memory (size=0x{:x})", MAP_SIZE);
            let ptr = mmap(
                None,
                size,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                file,
                0,
            )?;
            log::info!("UIO memory mapped successfully");
            ptr.as_ptr() as *mut u32
        };
        Ok(UioDriverBackend {
            jtag,
            poll_timeout,
            streaming: false,
        })
    }

    fn shift_vector(&self, vector: &Vector) -> io::Result<Box<[u8]>> {
        self.shift_data(vector.len, &vector.tms, &vector.tdi)
    }

    /// Shifts `num_bits` TMS/TDI bits through the bridge, 32 at a time, and returns TDO.
    pub fn shift_data(&self, num_bits: usize, mut tms: &[u8], mut tdi: &[u8]) -> io::Result<Box<[u8]>> {
        let num_bytes = num_bits.div_ceil(8);
        if tms.len() != num_bytes || tdi.len() != num_bytes {
            log::error!(
                "Vector size mismatch: expected {} bytes, got TMS {} and TDI {}",
                num_bytes,
                tms.len(),
                tdi.len()
            );
            return Err(io::Error::other("TMS or TDI has incorrect size"));
        }
        log::trace!("UIO shift TMS: {:02x?}", tms);
        log::trace!("UIO shift TDI: {:02x?}", tdi);

        let mut result = Vec::with_capacity(num_bytes);
        let mut bits_left = num_bits;
        while !tms.is_empty() {
            let shift_num_bits = bits_left.min(32);
            let shift_num_bytes = shift_num_bits.div_ceil(8);

            let tdo = unsafe {
                write_volatile(self.jtag.add(LENGTH_OFFSET / 4), shift_num_bits as u32);
                write_volatile(
                    self.jtag.add(TMS_REG_OFFSET / 4),
                    u32_from_u8_slice(&tms[..shift_num_bytes]),
                );
                write_volatile(
                    self.jtag.add(TDI_REG_OFFSET / 4),
                    u32_from_u8_slice(&tdi[..shift_num_bytes]),
                );
                write_volatile(self.jtag.add(CONTROL_REG_OFFSET / 4), 0x01);
                self.poll_until_ready()?;
                read_volatile(self.jtag.add(TDO_REG_OFFSET / 4)).to_ne_bytes()
            };
            result.extend_from_slice(&tdo[..shift_num_bytes]);

            tms = &tms[shift_num_bytes..];
            tdi = &tdi[shift_num_bytes..];
            bits_left -= shift_num_bits;
        }

        log::trace!("UIO shift TDO: {:02x?}", &result[..]);
        Ok(result.into_boxed_slice())
    }

    fn poll_until_ready(&self) -> io::Result<()> {
        let start = Instant::now();
        while start.elapsed() < self.poll_timeout {
            if unsafe { read_volatile(self.jtag.add(CONTROL_REG_OFFSET / 4)) } == 0 {
                return Ok(());
            }
        }
        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "Timed out while waiting for JTAG response",
        ))
    }

    fn check_port(&self, port: u8) -> io::Result<()> {
        if port != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("debug bridge has a single chain, got port {}", port),
            ));
        }
        Ok(())
    }

    fn check_idle(&self) -> io::Result<()> {
        if self.streaming {
            return Err(io::Error::other("streamed write still in progress"));
        }
        Ok(())
    }
}

impl Drop for UioDriverBackend {
    fn drop(&mut self) {
        if let Some(ptr) = NonNull::new(self.jtag) {
            unsafe {
                let _ = munmap(ptr.cast(), MAP_SIZE);
            }
        }
    }
}

impl ScanChain for UioDriverBackend {
    fn detect_ports(&mut self) -> io::Result<u8> {
        Ok(1)
    }

    fn detect(&mut self, port: u8) -> io::Result<usize> {
        self.check_port(port)?;
        self.reset(port)?;
        // Out of reset the data register holds the IDCODE, whose LSB is always set.
        let mut vector = Vector::default();
        vector
            .tms(&IDLE_TO_SHIFT_DR)
            .data(&[0xff; 4], IDCODE_BITS, true)
            .tms(&EXIT_TO_IDLE);
        let tdo = self.shift_vector(&vector)?;
        let offset = IDLE_TO_SHIFT_DR.len();
        let idcode = (0..IDCODE_BITS).fold(0u32, |acc, i| {
            let n = offset + i;
            acc | (((tdo[n / 8] >> (n % 8)) & 1) as u32) << i
        });
        log::debug!("Chain {} IDCODE {:#010x}", port, idcode);
        Ok((idcode & 1 == 1 && idcode != u32::MAX) as usize)
    }

    fn write(&mut self, port: u8, register: Register, data: &[u8], num_bits: usize) -> io::Result<()> {
        self.check_port(port)?;
        self.check_idle()?;
        let mut vector = Vector::default();
        vector
            .tms(shift_path(register))
            .data(data, num_bits, true)
            .tms(&EXIT_TO_IDLE);
        self.shift_vector(&vector)?;
        Ok(())
    }

    fn read(
        &mut self,
        port: u8,
        register: Register,
        data: &mut [u8],
        num_bits: usize,
    ) -> io::Result<()> {
        self.check_port(port)?;
        self.check_idle()?;
        let path = shift_path(register);
        let mut vector = Vector::default();
        vector
            .tms(path)
            .data(data, num_bits, true)
            .tms(&EXIT_TO_IDLE);
        let tdo = self.shift_vector(&vector)?;
        data[..byte_len(num_bits)].fill(0);
        for i in 0..num_bits {
            let n = path.len() + i;
            if (tdo[n / 8] >> (n % 8)) & 1 == 1 {
                set_bit(data, i);
            }
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
        self.check_port(port)?;
        self.check_idle()?;
        let mut vector = Vector::default();
        vector.tms(shift_path(register)).data(data, num_bits, false);
        self.shift_vector(&vector)?;
        self.streaming = true;
        Ok(())
    }

    fn stream_more(&mut self, port: u8, data: &[u8], num_bits: usize, last: bool) -> io::Result<()> {
        self.check_port(port)?;
        if !self.streaming {
            return Err(io::Error::other("no streamed write in progress"));
        }
        let mut vector = Vector::default();
        vector.data(data, num_bits, last);
        if last {
            if num_bits == 0 {
                // leaving Shift-DR clocks in one padding bit
                vector.tms(&[true]);
            }
            vector.tms(&EXIT_TO_IDLE);
        }
        self.shift_vector(&vector)?;
        self.streaming = !last;
        Ok(())
    }

    fn run(&mut self, port: u8) -> io::Result<()> {
        self.check_port(port)?;
        self.check_idle()?;
        let mut vector = Vector::default();
        vector.tms(&[false]);
        self.shift_vector(&vector)?;
        Ok(())
    }

    fn reset(&mut self, port: u8) -> io::Result<()> {
        self.check_port(port)?;
        let mut vector = Vector::default();
        vector.tms(&RESET_TO_IDLE);
        self.shift_vector(&vector)?;
        self.streaming = false;
        Ok(())
    }
}

/// GPIO side of a board without wired temperature sensors: outputs are ignored and
/// every input reads low.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleGpio;

impl Gpio for IdleGpio {
    fn set_direction(&mut self, pin: Pin, direction: Direction) {
        log::trace!("Ignoring direction {:?} for {}", direction, pin);
    }

    fn set(&mut self, pin: Pin, high: bool) {
        log::trace!("Ignoring level {} for {}", high, pin);
    }

    fn get(&mut self, _pin: Pin) -> bool {
        false
    }
}
