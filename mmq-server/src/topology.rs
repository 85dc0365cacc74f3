use mmq_protocol::MAX_DEVICES;

use crate::{ScanChain, error::DispatchError};

/// Logical slots, including the reserved sentinel after the last device.
pub const SLOTS: usize = MAX_DEVICES + 1;

/// Chain position reported on the wire for an unassigned slot.
pub const UNASSIGNED: u8 = 0xFF;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
struct Slot {
    position: Option<u8>,
    clock_capped: bool,
}

/// Maps logical device indices to physical chain positions.
///
/// Until the first discovery every device slot points at chain 0 and nothing counts as
/// discovered, so scan-chain commands are refused. The last slot is never assigned.
#[derive(Debug, Clone)]
pub struct DeviceTable {
    slots: [Slot; SLOTS],
    count: u8,
}

impl Default for DeviceTable {
    fn default() -> Self {
        let mut slots = [Slot {
            position: Some(0),
            clock_capped: false,
        }; SLOTS];
        slots[MAX_DEVICES].position = None;
        DeviceTable { slots, count: 0 }
    }
}

impl DeviceTable {
    pub fn new() -> DeviceTable {
        DeviceTable::default()
    }

    /// Probes every chain and records live ones in discovery order.
    ///
    /// Chains that fail to answer are skipped. Returns the number of devices found.
    pub fn discover<T: ScanChain>(&mut self, chain: &mut T) -> Result<u8, DispatchError> {
        let ports = chain.detect_ports()?;
        log::debug!("Scanning {} scan-chains", ports);
        let mut slots = [Slot::default(); SLOTS];
        let mut count = 0;
        for port in 0..ports {
            if count == MAX_DEVICES {
                log::warn!("Ignoring chains from {} on, all slots are taken", port);
                break;
            }
            match chain.detect(port) {
                Ok(0) => log::debug!("No device on chain {}", port),
                Ok(devices) => {
                    log::debug!("Chain {} has {} device(s)", port, devices);
                    slots[count].position = Some(port);
                    count += 1;
                }
                Err(e) => log::warn!("Chain {} did not respond: {}", port, e),
            }
        }
        self.slots = slots;
        self.count = count as u8;
        log::info!("Discovered {} device(s)", count);
        Ok(self.count)
    }

    /// Number of devices found by the last discovery.
    pub fn count(&self) -> u8 {
        self.count
    }

    /// Chain position of a discovered device.
    pub fn resolve(&self, index: u8) -> Result<u8, DispatchError> {
        if index >= self.count {
            return Err(DispatchError::InvalidDevice {
                index,
                count: self.count,
            });
        }
        self.position(index).ok_or(DispatchError::InvalidDevice {
            index,
            count: self.count,
        })
    }

    /// The raw slot mapping, `None` for unassigned and out-of-range slots.
    pub fn position(&self, index: u8) -> Option<u8> {
        self.slots.get(index as usize)?.position
    }

    /// The slot mapping as a wire byte, [`UNASSIGNED`] where no chain is mapped.
    pub fn raw_position(&self, index: u8) -> u8 {
        self.position(index).unwrap_or(UNASSIGNED)
    }

    pub fn is_clock_capped(&self, index: u8) -> bool {
        self.slots
            .get(index as usize)
            .is_some_and(|slot| slot.clock_capped)
    }

    pub fn set_clock_capped(&mut self, index: u8, capped: bool) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            slot.clock_capped = capped;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{SimDevice, SimulatedBoard};

    #[test]
    fn initial_table() {
        let table = DeviceTable::new();
        assert_eq!(table.count(), 0);
        assert_eq!(table.raw_position(0), 0);
        assert_eq!(table.raw_position(3), 0);
        assert_eq!(table.raw_position(4), UNASSIGNED);
        assert!(matches!(
            table.resolve(0),
            Err(DispatchError::InvalidDevice { index: 0, count: 0 })
        ));
    }

    #[test]
    fn two_live_chains_fill_first_slots() {
        let mut board = SimulatedBoard::new(vec![
            None,
            Some(SimDevice::default()),
            None,
            Some(SimDevice::default()),
        ]);
        let mut table = DeviceTable::new();
        assert_eq!(table.discover(&mut board).unwrap(), 2);
        assert_eq!(table.resolve(0).unwrap(), 1);
        assert_eq!(table.resolve(1).unwrap(), 3);
        assert_eq!(table.position(2), None);
        assert_eq!(table.position(3), None);
        assert_eq!(table.raw_position(4), UNASSIGNED);
        assert!(table.resolve(2).is_err());
    }

    #[test]
    fn at_most_four_devices() {
        let mut board = SimulatedBoard::new((0..6).map(|_| Some(SimDevice::default())).collect());
        let mut table = DeviceTable::new();
        assert_eq!(table.discover(&mut board).unwrap(), 4);
        assert_eq!(table.resolve(3).unwrap(), 3);
        assert_eq!(table.raw_position(4), UNASSIGNED);
    }

    #[test]
    fn rediscovery_clears_stale_state() {
        let mut board = SimulatedBoard::new(vec![Some(SimDevice::default()); 3]);
        let mut table = DeviceTable::new();
        table.discover(&mut board).unwrap();
        table.set_clock_capped(2, true);

        let mut smaller = SimulatedBoard::new(vec![Some(SimDevice::default())]);
        assert_eq!(table.discover(&mut smaller).unwrap(), 1);
        assert!(!table.is_clock_capped(2));
        assert_eq!(table.position(2), None);
    }

    #[test]
    fn clock_capped_flag_is_per_slot() {
        let mut table = DeviceTable::new();
        table.set_clock_capped(1, true);
        assert!(table.is_clock_capped(1));
        assert!(!table.is_clock_capped(0));
        table.set_clock_capped(9, true);
        assert!(!table.is_clock_capped(9));
    }
}
