//! Temperature sensors.
//!
//! Every FPGA position has its own sensor on a three-wire synchronous serial bus that is
//! bit-banged over GPIO, independent of the scan-chains. Positions 0/1 and 2/3 share a
//! chip-select line.
use mmq_protocol::MAX_DEVICES;

use crate::{Direction, Gpio, Pin};

/// Chip-select, clock and data lines of one sensor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SensorPins {
    pub cs: Pin,
    pub scl: Pin,
    pub sdo: Pin,
}

const fn sensor(cs: u8, scl: u8, sdo: u8) -> SensorPins {
    SensorPins {
        cs: Pin::from_packed(cs),
        scl: Pin::from_packed(scl),
        sdo: Pin::from_packed(sdo),
    }
}

/// Sensor wiring by chain position.
pub const SENSOR_PINS: [SensorPins; MAX_DEVICES] = [
    sensor(0x14, 0x30, 0x31),
    sensor(0x14, 0x12, 0x23),
    sensor(0x2b, 0x11, 0x0b),
    sensor(0x2b, 0x10, 0x1a),
];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Resolution {
    /// 9-bit reading, answered as one byte.
    Coarse,
    /// 16-bit reading, answered as two bytes.
    High,
}

impl Resolution {
    pub fn bits(self) -> usize {
        match self {
            Resolution::Coarse => 9,
            Resolution::High => 16,
        }
    }

    /// Encodes a reading as the wire response.
    pub fn response(self, value: u16) -> Vec<u8> {
        match self {
            Resolution::Coarse => vec![value as u8],
            Resolution::High => value.to_le_bytes().to_vec(),
        }
    }
}

/// Reads the sensors, configuring their pins on first use.
#[derive(Debug, Default)]
pub struct TemperatureReader {
    initialized: bool,
}

impl TemperatureReader {
    pub fn new() -> TemperatureReader {
        TemperatureReader::default()
    }

    /// Reads the sensor at `position`. Unmapped positions read as zero without any pin
    /// activity.
    pub fn read<G: Gpio>(&mut self, gpio: &mut G, position: Option<u8>, resolution: Resolution) -> u16 {
        let Some(pins) = position.and_then(|p| SENSOR_PINS.get(p as usize)) else {
            return 0;
        };
        if !self.initialized {
            Self::init(gpio);
            self.initialized = true;
        }

        gpio.set(pins.cs, false);
        let mut value = 0u16;
        for _ in 0..resolution.bits() {
            gpio.set(pins.scl, true);
            value = (value << 1) | gpio.get(pins.sdo) as u16;
            gpio.set(pins.scl, false);
        }
        gpio.set(pins.cs, true);
        log::trace!("Temperature on position {:?}: {:#06x}", position, value);
        value
    }

    fn init<G: Gpio>(gpio: &mut G) {
        log::debug!("Configuring temperature sensor pins");
        for pins in &SENSOR_PINS {
            gpio.set(pins.cs, true);
            gpio.set(pins.scl, false);
            gpio.set_direction(pins.cs, Direction::Output);
            gpio.set_direction(pins.scl, Direction::Output);
            gpio.set_direction(pins.sdo, Direction::Input);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{PinEvent, SimulatedBoard};

    #[test]
    fn high_resolution_read() {
        let mut board = SimulatedBoard::new(vec![]).with_temperature(2, 0x1a2b);
        let mut reader = TemperatureReader::new();
        assert_eq!(reader.read(&mut board, Some(2), Resolution::High), 0x1a2b);
    }

    #[test]
    fn coarse_read_takes_nine_bits() {
        let mut board = SimulatedBoard::new(vec![]).with_temperature(0, 0b1011_0011_1000_0000);
        let mut reader = TemperatureReader::new();
        assert_eq!(
            reader.read(&mut board, Some(0), Resolution::Coarse),
            0b1_0110_0111
        );
        assert_eq!(Resolution::Coarse.response(0b1_0110_0111), vec![0b0110_0111]);
    }

    #[test]
    fn clock_is_pulsed_once_per_bit() {
        let mut board = SimulatedBoard::new(vec![]);
        let mut reader = TemperatureReader::new();
        reader.read(&mut board, Some(1), Resolution::Coarse);
        let rising = board
            .gpio_events()
            .iter()
            .filter(|e| **e == PinEvent::Set(SENSOR_PINS[1].scl, true))
            .count();
        assert_eq!(rising, 9);
        assert_eq!(
            board.gpio_events().last(),
            Some(&PinEvent::Set(SENSOR_PINS[1].cs, true))
        );
    }

    #[test]
    fn pins_are_configured_once() {
        let mut board = SimulatedBoard::new(vec![]);
        let mut reader = TemperatureReader::new();
        reader.read(&mut board, Some(0), Resolution::Coarse);
        let outputs = board
            .gpio_events()
            .iter()
            .filter(|e| matches!(e, PinEvent::Direction(_, Direction::Output)))
            .count();
        assert_eq!(outputs, 2 * MAX_DEVICES);

        board.clear_gpio_events();
        reader.read(&mut board, Some(0), Resolution::Coarse);
        assert!(!board.gpio_events().is_empty());
        assert!(
            !board
                .gpio_events()
                .iter()
                .any(|e| matches!(e, PinEvent::Direction(..)))
        );
    }

    #[test]
    fn unmapped_positions_read_zero_silently() {
        let mut board = SimulatedBoard::new(vec![]).with_temperature(0, 0xffff);
        let mut reader = TemperatureReader::new();
        assert_eq!(reader.read(&mut board, None, Resolution::High), 0);
        assert_eq!(reader.read(&mut board, Some(4), Resolution::High), 0);
        assert!(board.gpio_events().is_empty());
    }
}
