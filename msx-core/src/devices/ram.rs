// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Plain RAM: a flat byte buffer, readable and writable, with a cache line
//! for both directions. Addresses wrap within the device's own size.

use common::serialize::SerializationError;
use common::EmuTime;

use crate::device::MSXDevice;

pub struct RamDevice {
    name: String,
    data: Vec<u8>,
}

impl RamDevice {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            data: vec![0; size],
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    fn index(&self, addr: u16) -> usize {
        (addr & 0x3FFF) as usize % self.data.len()
    }
}

impl MSXDevice for RamDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_mem(&mut self, addr: u16, _time: EmuTime) -> u8 {
        self.data[self.index(addr)]
    }

    fn write_mem(&mut self, addr: u16, value: u8, _time: EmuTime) {
        let idx = self.index(addr);
        self.data[idx] = value;
    }

    fn peek_mem(&self, addr: u16, _time: EmuTime) -> u8 {
        self.data[self.index(addr)]
    }

    fn read_cache_line(&self, start: u16) -> Option<&[u8]> {
        let start = self.index(start);
        self.data.get(start..start + 256)
    }

    fn write_cache_line(&mut self, start: u16) -> Option<&mut [u8]> {
        let start = (start & 0x3FFF) as usize % self.data.len();
        self.data.get_mut(start..start + 256)
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    /// RAM contents are the only state that survives a snapshot: the byte
    /// buffer itself, verbatim, with no framing of its own (the archive
    /// already length-prefixes it).
    fn save_state(&self) -> Result<Vec<u8>, SerializationError> {
        Ok(self.data.clone())
    }

    fn load_state(&mut self, state: &[u8]) -> Result<(), SerializationError> {
        if state.len() != self.data.len() {
            return Err(SerializationError::LengthMismatch {
                expected: self.data.len(),
                found: state.len(),
            });
        }
        self.data.copy_from_slice(state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_roundtrip() {
        let mut ram = RamDevice::new("ram", 0x4000);
        ram.write_mem(0x4010, 0x42, EmuTime::ZERO);
        assert_eq!(ram.read_mem(0x4010, EmuTime::ZERO), 0x42);
        assert_eq!(ram.peek_mem(0x4010, EmuTime::ZERO), 0x42);
    }

    #[test]
    fn cache_line_matches_direct_read() {
        let mut ram = RamDevice::new("ram", 0x4000);
        for i in 0..256u16 {
            ram.write_mem(0x4000 + i, i as u8, EmuTime::ZERO);
        }
        let line = ram.read_cache_line(0x4000).unwrap().to_vec();
        for i in 0..256u16 {
            assert_eq!(line[i as usize], ram.read_mem(0x4000 + i, EmuTime::ZERO));
        }
    }

    #[test]
    fn save_load_state_roundtrips_contents() {
        let mut ram = RamDevice::new("ram", 0x100);
        ram.write_mem(0x10, 0x55, EmuTime::ZERO);
        let state = ram.save_state().unwrap();

        let mut other = RamDevice::new("ram", 0x100);
        other.load_state(&state).unwrap();
        assert_eq!(other.read_mem(0x10, EmuTime::ZERO), 0x55);
    }

    #[test]
    fn load_state_rejects_wrong_length() {
        let mut ram = RamDevice::new("ram", 0x100);
        assert!(ram.load_state(&[0u8; 10]).is_err());
    }
}
