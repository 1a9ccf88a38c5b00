// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! The keyboard/cassette I/O chip, modeled after the MSX's i8255 PPI
//! wiring: port B (keyboard row read) and port C (selected row, cassette
//! motor/output, CAPS LED, key click). Port A — which on real hardware is
//! physically wired to the primary slot select latch — is handled by
//! [`crate::bus::DeviceBus`] directly (see `PRIMARY_SLOT_PORT`); this
//! device never claims it.

use common::serialize::SerializationError;
use common::EmuTime;
use serde::{Deserialize, Serialize};

use crate::device::MSXDevice;
use crate::devices::keyboard::KeyMatrix;

/// I/O port offset (from the PPI's base, `0xA9`) at which the currently
/// selected keyboard row is read back.
pub const PORT_KEYBOARD: u8 = 0xA9;
/// I/O port offset at which the selected row and the cassette/LED/click
/// nibble are written.
pub const PORT_CONTROL: u8 = 0xAA;

#[derive(Default)]
pub struct Ppi {
    keyboard: KeyMatrix,
    selected_row: u8,
    cassette_motor: bool,
    cassette_out: bool,
    caps_led_on: bool,
    click: bool,
}

impl Ppi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_key(&mut self, row: u8, col: u8, pressed: bool) {
        self.keyboard.set_key(row, col, pressed);
    }

    pub fn keyboard(&self) -> &KeyMatrix {
        &self.keyboard
    }

    pub fn cassette_motor(&self) -> bool {
        self.cassette_motor
    }

    pub fn cassette_out(&self) -> bool {
        self.cassette_out
    }

    pub fn caps_led_on(&self) -> bool {
        self.caps_led_on
    }
}

impl MSXDevice for Ppi {
    fn name(&self) -> &str {
        "PPI"
    }

    fn read_io(&mut self, port: u8, _time: EmuTime) -> u8 {
        if port == PORT_KEYBOARD {
            self.keyboard.row(self.selected_row)
        } else {
            0xFF
        }
    }

    fn peek_io(&self, port: u8, _time: EmuTime) -> u8 {
        if port == PORT_KEYBOARD {
            self.keyboard.row(self.selected_row)
        } else {
            0xFF
        }
    }

    fn write_io(&mut self, port: u8, value: u8, _time: EmuTime) {
        if port == PORT_CONTROL {
            self.selected_row = value & 0x0F;
            let c1 = (value >> 4) & 0x0F;
            self.cassette_motor = c1 & 1 == 0; // 0 = motor on, 1 = off
            self.cassette_out = c1 & 2 != 0;
            self.caps_led_on = c1 & 4 == 0; // active low
            self.click = c1 & 8 != 0;
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn save_state(&self) -> Result<Vec<u8>, SerializationError> {
        common::serialize::serialize(
            &PpiState {
                keyboard: self.keyboard,
                selected_row: self.selected_row,
                cassette_motor: self.cassette_motor,
                cassette_out: self.cassette_out,
                caps_led_on: self.caps_led_on,
                click: self.click,
            },
            false,
        )
    }

    fn load_state(&mut self, state: &[u8]) -> Result<(), SerializationError> {
        let s: PpiState = common::serialize::deserialize(state, false)?;
        self.keyboard = s.keyboard;
        self.selected_row = s.selected_row;
        self.cassette_motor = s.cassette_motor;
        self.cassette_out = s.cassette_out;
        self.caps_led_on = s.caps_led_on;
        self.click = s.click;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct PpiState {
    keyboard: KeyMatrix,
    selected_row: u8,
    cassette_motor: bool,
    cassette_out: bool,
    caps_led_on: bool,
    click: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selected_row_determines_keyboard_read() {
        let mut ppi = Ppi::new();
        ppi.set_key(4, 6, true);
        ppi.write_io(PORT_CONTROL, 0x04, EmuTime::ZERO); // select row 4
        assert_eq!(ppi.read_io(PORT_KEYBOARD, EmuTime::ZERO), !(1 << 6));
    }

    #[test]
    fn control_port_decodes_cassette_and_caps() {
        let mut ppi = Ppi::new();
        // row=0, motor off (bit0=1), cassette out set (bit1), caps on (bit2=0), click (bit3)
        ppi.write_io(PORT_CONTROL, 0b1011_0000, EmuTime::ZERO);
        assert!(!ppi.cassette_motor());
        assert!(ppi.cassette_out());
        assert!(ppi.caps_led_on());
        assert!(ppi.click);
    }

    #[test]
    fn save_load_state_roundtrips_keyboard_and_flags() {
        let mut ppi = Ppi::new();
        ppi.set_key(2, 3, true);
        ppi.write_io(PORT_CONTROL, 0b1011_0101, EmuTime::ZERO);
        let state = ppi.save_state().unwrap();

        let mut other = Ppi::new();
        other.load_state(&state).unwrap();
        assert_eq!(other.keyboard(), ppi.keyboard());
        assert_eq!(other.cassette_motor(), ppi.cassette_motor());
        assert_eq!(other.cassette_out(), ppi.cassette_out());
        assert_eq!(other.caps_led_on(), ppi.caps_led_on());
    }
}
