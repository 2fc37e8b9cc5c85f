//! Drive slots owned by one emulated machine

use crate::drive::config::DriveConfig;
use crate::drive::mechanics::Drive;

/// Standard number of drive slots
pub const STANDARD_SLOTS: usize = 4;

/// Decode a drive-select latch.
///
/// Bit 2 wins over bit 1 over bit 0; bit 3 selects drive 3 only when none
/// of the others is set. Conflicting selects are undefined on real
/// hardware and resolve by this priority here.
pub fn decode_drive_select(latch: u8) -> Option<usize> {
    if latch & 0x04 != 0 {
        Some(2)
    } else if latch & 0x02 != 0 {
        Some(1)
    } else if latch & 0x01 != 0 {
        Some(0)
    } else if latch & 0x08 != 0 {
        Some(3)
    } else {
        None
    }
}

/// Slot id to drive map
pub struct DriveTable {
    drives: Vec<Drive>,
}

impl DriveTable {
    /// One drive per configuration, numbered from 0
    pub fn new(configs: &[DriveConfig]) -> Self {
        Self {
            drives: configs
                .iter()
                .enumerate()
                .map(|(id, config)| Drive::new(id, *config))
                .collect(),
        }
    }

    /// Four identical drives
    pub fn standard(config: DriveConfig) -> Self {
        Self::new(&[config; STANDARD_SLOTS])
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.drives.len()
    }

    /// Are there no slots?
    pub fn is_empty(&self) -> bool {
        self.drives.is_empty()
    }

    /// Drive in a slot
    pub fn get(&self, id: usize) -> Option<&Drive> {
        self.drives.get(id)
    }

    /// Drive in a slot, mutably
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Drive> {
        self.drives.get_mut(id)
    }

    /// Drive picked by a select latch
    pub fn select(&mut self, latch: u8) -> Option<&mut Drive> {
        decode_drive_select(latch).and_then(move |id| self.drives.get_mut(id))
    }

    /// Iterate every slot
    pub fn iter(&self) -> impl Iterator<Item = &Drive> {
        self.drives.iter()
    }

    /// Iterate every slot mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Drive> {
        self.drives.iter_mut()
    }
}
