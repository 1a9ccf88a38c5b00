// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! The memory and I/O dispatch fabric: primary/secondary slot and page
//! selection, the 256-entry I/O port table, and the cache-line fast path.
//!
//! `DeviceBus` holds no devices itself — devices live in the
//! [`MotherBoard`]'s arena and are addressed by [`DeviceId`]; every dispatch
//! method here takes the device arena as a parameter so the bus stays free
//! of the ownership cycles a pointer-based design would otherwise create.
//!
//! [`MotherBoard`]: crate::motherboard::MotherBoard

use common::numutil::NumExt;
use serde::{Deserialize, Serialize};

use crate::device::{DeviceId, MSXDevice};

/// I/O port the CPU writes to select the primary slot for all four pages
/// at once (one byte, four 2-bit fields) — and, in an expanded primary,
/// the memory address whose high byte selects the matching secondary slot.
pub const PRIMARY_SLOT_PORT: u8 = 0xA8;

/// Address at which, when the currently-mapped primary slot for page 3 is
/// expanded, writes select a secondary slot and reads return the
/// bitwise-complemented secondary slot register.
pub const SECONDARY_SLOT_ADDR: u16 = 0xFFFF;

type DeviceTable = [[[Option<DeviceId>; 4]; 4]; 4];

/// The MSX memory and I/O bus: slot/page memory dispatch plus the I/O port
/// table. Devices are looked up by [`DeviceId`] into a caller-supplied arena
/// rather than owned here.
#[derive(Default)]
pub struct DeviceBus {
    /// Four 2-bit fields, one per page: which primary slot (0-3) is
    /// currently selected for that page.
    primary_register: u8,
    /// Whether primary slot `ps` is expanded (has secondary slots).
    expanded: [bool; 4],
    /// Four 2-bit fields per expanded primary slot: which secondary slot
    /// (0-3) is selected for each page.
    secondary_register: [u8; 4],
    /// `[primary][secondary][page] -> device`. For a non-expanded primary,
    /// only `secondary == 0` is ever consulted.
    device_table: DeviceTable,
    /// Devices registered to receive each input port, in registration order.
    io_in: Vec<Vec<DeviceId>>,
    /// Devices registered to receive each output port, in registration order.
    io_out: Vec<Vec<DeviceId>>,
    /// Bumped every time a slot register changes. A CPU-side cache-line
    /// fast path compares this against the value it last saw to know when
    /// to drop any pointers it is holding onto page memory.
    cache_generation: u64,
}

impl DeviceBus {
    pub fn new() -> Self {
        Self {
            io_in: vec![Vec::new(); 256],
            io_out: vec![Vec::new(); 256],
            ..Default::default()
        }
    }

    /// Mark primary slot `ps` as expanded (having four independently
    /// selectable secondary slots) or plain.
    pub fn set_expanded(&mut self, ps: u8, expanded: bool) {
        self.expanded[ps.us() & 3] = expanded;
    }

    pub fn is_expanded(&self, ps: u8) -> bool {
        self.expanded[ps.us() & 3]
    }

    /// Wire a device into slot `(ps, ss, page)`. For a plain primary slot,
    /// callers should map only `ss == 0`.
    pub fn map_device(&mut self, ps: u8, ss: u8, page: u8, device: DeviceId) {
        self.device_table[ps.us() & 3][ss.us() & 3][page.us() & 3] = Some(device);
    }

    /// Register `device` to receive reads of `port`.
    pub fn register_io_in(&mut self, port: u8, device: DeviceId) {
        self.io_in[port as usize].push(device);
    }

    /// Register `device` to receive writes of `port`.
    pub fn register_io_out(&mut self, port: u8, device: DeviceId) {
        self.io_out[port as usize].push(device);
    }

    #[inline]
    pub fn primary_slot(&self, page: u8) -> u8 {
        (self.primary_register >> (page.u32() * 2)) & 3
    }

    #[inline]
    pub fn secondary_slot(&self, ps: u8, page: u8) -> u8 {
        if self.expanded[ps.us() & 3] {
            (self.secondary_register[ps.us() & 3] >> (page.u32() * 2)) & 3
        } else {
            0
        }
    }

    pub fn cache_generation(&self) -> u64 {
        self.cache_generation
    }

    /// Resolve an address to `(primary, secondary, page, offset)`.
    #[inline]
    fn resolve(&self, addr: u16) -> (u8, u8, u8, u16) {
        let page = ((addr >> 14) & 3) as u8;
        let ps = self.primary_slot(page);
        let ss = self.secondary_slot(ps, page);
        (ps, ss, page, addr & 0x3FFF)
    }

    fn device_at(&self, addr: u16) -> Option<DeviceId> {
        let (ps, ss, page, _) = self.resolve(addr);
        self.device_table[ps.us()][ss.us()][page.us()]
    }

    /// Read a byte of memory, dispatching to the device mapped at `addr`.
    pub fn read_mem(
        &mut self,
        addr: u16,
        time: common::EmuTime,
        devices: &mut [Box<dyn MSXDevice>],
    ) -> u8 {
        if addr == SECONDARY_SLOT_ADDR {
            let ps = self.primary_slot(3);
            if self.expanded[ps.us()] {
                return !self.secondary_register[ps.us()];
            }
        }
        match self.device_at(addr) {
            Some(id) => devices[id.0].read_mem(addr, time),
            None => 0xFF,
        }
    }

    /// Side-effect-free read, for the debugger and savestate inspection.
    pub fn peek_mem(&self, addr: u16, time: common::EmuTime, devices: &[Box<dyn MSXDevice>]) -> u8 {
        if addr == SECONDARY_SLOT_ADDR {
            let ps = self.primary_slot(3);
            if self.expanded[ps.us()] {
                return !self.secondary_register[ps.us()];
            }
        }
        match self.device_at(addr) {
            Some(id) => devices[id.0].peek_mem(addr, time),
            None => 0xFF,
        }
    }

    /// Write a byte of memory, dispatching to the device mapped at `addr`.
    pub fn write_mem(
        &mut self,
        addr: u16,
        value: u8,
        time: common::EmuTime,
        devices: &mut [Box<dyn MSXDevice>],
    ) {
        if addr == SECONDARY_SLOT_ADDR {
            let ps = self.primary_slot(3);
            if self.expanded[ps.us()] {
                self.secondary_register[ps.us()] = value;
                self.cache_generation += 1;
                return;
            }
        }
        if let Some(id) = self.device_at(addr) {
            devices[id.0].write_mem(addr, value, time);
        }
    }

    /// Read a byte from `port`, AND-combining every device registered there
    /// (MSX's open-bus, active-low behaviour when several devices overlap
    /// a port). Port `0xA8` is the bus-owned primary slot select register
    /// and is never dispatched to a device.
    pub fn read_io(
        &mut self,
        port: u8,
        time: common::EmuTime,
        devices: &mut [Box<dyn MSXDevice>],
    ) -> u8 {
        if port == PRIMARY_SLOT_PORT {
            return self.primary_register;
        }
        let mut value = 0xFF;
        for id in &self.io_in[port as usize] {
            value &= devices[id.0].read_io(port, time);
        }
        value
    }

    pub fn peek_io(&self, port: u8, time: common::EmuTime, devices: &[Box<dyn MSXDevice>]) -> u8 {
        if port == PRIMARY_SLOT_PORT {
            return self.primary_register;
        }
        let mut value = 0xFF;
        for id in &self.io_in[port as usize] {
            value &= devices[id.0].peek_io(port, time);
        }
        value
    }

    /// Write a byte to `port`, broadcasting to every device registered
    /// there. Port `0xA8` updates the primary slot register for all four
    /// pages atomically and invalidates every cache line.
    pub fn write_io(
        &mut self,
        port: u8,
        value: u8,
        time: common::EmuTime,
        devices: &mut [Box<dyn MSXDevice>],
    ) {
        if port == PRIMARY_SLOT_PORT {
            self.primary_register = value;
            self.cache_generation += 1;
            return;
        }
        for id in &self.io_out[port as usize] {
            devices[id.0].write_io(port, value, time);
        }
    }

    /// Fast-path read: if the device mapped at `addr`'s page offers
    /// contiguous backing memory for the 256-byte line containing `addr`,
    /// return it.
    pub fn read_cache_line<'d>(
        &self,
        addr: u16,
        devices: &'d [Box<dyn MSXDevice>],
    ) -> Option<&'d [u8]> {
        let id = self.device_at(addr)?;
        devices[id.0].read_cache_line(addr & !0xFF)
    }

    /// Fast-path write equivalent of [`Self::read_cache_line`].
    pub fn write_cache_line<'d>(
        &self,
        addr: u16,
        devices: &'d mut [Box<dyn MSXDevice>],
    ) -> Option<&'d mut [u8]> {
        let id = self.device_at(addr)?;
        devices[id.0].write_cache_line(addr & !0xFF)
    }

    /// The bus's own register state (slot selects), for a motherboard-wide
    /// snapshot. Does not include the device table itself: that is rebuilt
    /// from `MachineConfig` every time a `MotherBoard` is constructed, so a
    /// snapshot only needs to restore which slots are currently selected.
    pub fn snapshot(&self) -> BusSnapshot {
        BusSnapshot {
            primary_register: self.primary_register,
            expanded: self.expanded,
            secondary_register: self.secondary_register,
        }
    }

    pub fn restore(&mut self, snapshot: &BusSnapshot) {
        self.primary_register = snapshot.primary_register;
        self.expanded = snapshot.expanded;
        self.secondary_register = snapshot.secondary_register;
        self.cache_generation += 1;
    }
}

/// The slot-select registers of a [`DeviceBus`] at one instant. Does not
/// carry `expanded`'s per-slot wiring rationale (that is topology, fixed by
/// `MachineConfig`) — only which values are currently latched.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BusSnapshot {
    primary_register: u8,
    expanded: [bool; 4],
    secondary_register: [u8; 4],
}

#[cfg(test)]
mod tests {
    use common::EmuTime;

    use super::*;
    use crate::devices::ram::RamDevice;

    fn bus_with_four_ram_slots() -> (DeviceBus, Vec<Box<dyn MSXDevice>>) {
        let mut bus = DeviceBus::new();
        let mut devices: Vec<Box<dyn MSXDevice>> = Vec::new();
        for ps in 0..4u8 {
            let mut ram = RamDevice::new(format!("ram{ps}"), 0x4000);
            // Seed each slot's page-1 (offset 0) with a distinguishable byte.
            ram.data_mut()[0] = 0x10 + ps;
            devices.push(Box::new(ram));
            bus.map_device(ps, 0, 1, DeviceId(ps as usize));
        }
        (bus, devices)
    }

    #[test]
    fn slot_switch_updates_all_pages_atomically() {
        let (mut bus, mut devices) = bus_with_four_ram_slots();
        // 0xE4 = 0b11_10_01_00: page0->slot0, page1->slot1, page2->slot2, page3->slot3
        bus.write_io(PRIMARY_SLOT_PORT, 0b11_10_01_00, EmuTime::ZERO, &mut devices);
        assert_eq!(bus.primary_slot(0), 0);
        assert_eq!(bus.primary_slot(1), 1);
        assert_eq!(bus.primary_slot(2), 2);
        assert_eq!(bus.primary_slot(3), 3);
        // Page 1 (0x4000..0x8000) now maps to primary slot 1's RAM.
        assert_eq!(bus.read_mem(0x4001, EmuTime::ZERO, &mut devices), 0x11);
    }

    #[test]
    fn read_mem_matches_resolved_device() {
        let (mut bus, mut devices) = bus_with_four_ram_slots();
        bus.write_io(PRIMARY_SLOT_PORT, 0b11_10_01_00, EmuTime::ZERO, &mut devices);
        for addr in [0x4000u16, 0x4001, 0x40FF, 0x7FFF] {
            let (ps, ss, page, _) = bus.resolve(addr);
            let id = bus.device_table[ps.us()][ss.us()][page.us()].unwrap();
            let expected = devices[id.0].read_mem(addr, EmuTime::ZERO);
            assert_eq!(bus.read_mem(addr, EmuTime::ZERO, &mut devices), expected);
        }
    }

    #[test]
    fn unmapped_page_reads_ff() {
        let bus = DeviceBus::new();
        let devices: Vec<Box<dyn MSXDevice>> = Vec::new();
        assert_eq!(bus.peek_mem(0x0000, EmuTime::ZERO, &devices), 0xFF);
    }

    #[test]
    fn secondary_slot_register_reads_back_complemented() {
        let mut bus = DeviceBus::new();
        bus.set_expanded(0, true);
        let mut devices: Vec<Box<dyn MSXDevice>> = Vec::new();
        bus.write_mem(SECONDARY_SLOT_ADDR, 0b11_00_01_10, EmuTime::ZERO, &mut devices);
        assert_eq!(
            bus.read_mem(SECONDARY_SLOT_ADDR, EmuTime::ZERO, &mut devices),
            !0b11_00_01_10u8
        );
    }

    #[test]
    fn cache_generation_bumps_on_slot_change() {
        let (mut bus, mut devices) = bus_with_four_ram_slots();
        let before = bus.cache_generation();
        bus.write_io(PRIMARY_SLOT_PORT, 0xFF, EmuTime::ZERO, &mut devices);
        assert!(bus.cache_generation() > before);
    }

    #[test]
    fn read_cache_line_matches_read_mem() {
        let (bus, mut devices) = bus_with_four_ram_slots();
        let line = bus.read_cache_line(0x4000, &devices).unwrap().to_vec();
        for (k, byte) in line.iter().enumerate() {
            assert_eq!(*byte, bus.read_mem(0x4000 + k as u16, EmuTime::ZERO, &mut devices));
        }
    }

    #[test]
    fn snapshot_restore_roundtrips_slot_selection() {
        let (mut bus, mut devices) = bus_with_four_ram_slots();
        bus.write_io(PRIMARY_SLOT_PORT, 0b11_10_01_00, EmuTime::ZERO, &mut devices);
        let snap = bus.snapshot();

        let mut other = DeviceBus::new();
        other.restore(&snap);
        assert_eq!(other.primary_slot(0), 0);
        assert_eq!(other.primary_slot(1), 1);
        assert_eq!(other.primary_slot(2), 2);
        assert_eq!(other.primary_slot(3), 3);
    }
}
