// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! The uniform device interface every piece of MSX hardware implements, and
//! an opaque index identifying a device owned by the [`MotherBoard`].
//!
//! [`MotherBoard`]: crate::motherboard::MotherBoard

use common::serialize::SerializationError;
use common::EmuTime;

use crate::sound::SoundDevice;

/// A handle to a device owned by the motherboard's device arena. Cheap to
/// copy and store in the bus's slot/port tables; never dereferenced without
/// going back through the owning `MotherBoard`, which keeps the
/// device/connector/pluggable graph acyclic (see DESIGN.md).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId(pub usize);

/// Opaque construction-time configuration handed to a device. Stands in for
/// the parsed subtree of a machine's XML description (out of scope here);
/// concretely it is just the device's name plus whatever slot/port wiring
/// [`crate::motherboard::MachineConfig`] has already decided for it.
#[derive(Clone, Debug, Default)]
pub struct DeviceConfig {
    pub name: String,
}

/// The contract every MSX device implements: memory and I/O read/write with
/// side-effect-free `peek` variants, an optional cache-line fast path, and
/// the three-phase power lifecycle. All methods have neutral defaults so a
/// device only overrides what it actually participates in — a pure I/O
/// device never needs to mention memory at all.
pub trait MSXDevice: Send {
    /// Human-readable name, used in diagnostics and savestate device lookup.
    fn name(&self) -> &str;

    /// Read a byte from this device's memory-mapped range. May have side
    /// effects (e.g. clearing a status latch).
    fn read_mem(&mut self, addr: u16, time: EmuTime) -> u8 {
        let _ = (addr, time);
        0xFF
    }

    /// Write a byte to this device's memory-mapped range.
    fn write_mem(&mut self, addr: u16, value: u8, time: EmuTime) {
        let _ = (addr, value, time);
    }

    /// Read without side effects, for the debugger and savestate inspection.
    /// Devices whose `read_mem` has no side effects may simply mirror it;
    /// devices that do (e.g. a FIFO) must give a best-effort non-destructive
    /// answer here.
    fn peek_mem(&self, addr: u16, time: EmuTime) -> u8 {
        let _ = (addr, time);
        0xFF
    }

    /// Read a byte from an I/O port this device has registered for.
    fn read_io(&mut self, port: u8, time: EmuTime) -> u8 {
        let _ = (port, time);
        0xFF
    }

    /// Write a byte to an I/O port this device has registered for.
    fn write_io(&mut self, port: u8, value: u8, time: EmuTime) {
        let _ = (port, value, time);
    }

    /// Side-effect-free I/O read.
    fn peek_io(&self, port: u8, time: EmuTime) -> u8 {
        let _ = (port, time);
        0xFF
    }

    /// If the 256-byte-aligned line starting at `start` is backed by
    /// contiguous host memory, return it so the caller can bypass
    /// `read_mem` for every byte in the line. Must be invalidated (by
    /// returning `None` afterwards, or the bus re-querying) the instant the
    /// device's mapping changes.
    fn read_cache_line(&self, start: u16) -> Option<&[u8]> {
        let _ = start;
        None
    }

    /// Write-side equivalent of [`Self::read_cache_line`].
    fn write_cache_line(&mut self, start: u16) -> Option<&mut [u8]> {
        let _ = start;
        None
    }

    /// Called once, after every device in the machine has been constructed
    /// and wired into the bus.
    fn power_up(&mut self, time: EmuTime) {
        let _ = time;
    }

    /// Called on machine reset. May be called many times over a device's
    /// lifetime; must restore the device to its post-`power_up` state.
    fn reset(&mut self, time: EmuTime) {
        let _ = time;
    }

    /// Called once, before the device is dropped.
    fn power_down(&mut self, time: EmuTime) {
        let _ = time;
    }

    /// Downcasting escape hatch: lets the motherboard reach a concrete
    /// device's own API (e.g. delivering a `StateChange` to the keyboard
    /// matrix) without every such interaction needing its own trait method.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;

    /// Opaque snapshot of this device's persistent state, for a Mem or XML
    /// archive. Each device serializes its own concrete fields rather than
    /// the motherboard walking a `dyn MSXDevice` through serde directly —
    /// there is no trait-object (de)serialization in this crate, only a
    /// per-device blob keyed by the device's position in the arena (see
    /// `MotherBoard::snapshot`). Stateless devices (e.g. ROM, whose content
    /// is fully determined by `MachineConfig`) may leave this empty.
    fn save_state(&self) -> Result<Vec<u8>, SerializationError> {
        Ok(Vec::new())
    }

    /// Restore state previously produced by [`Self::save_state`].
    fn load_state(&mut self, state: &[u8]) -> Result<(), SerializationError> {
        let _ = state;
        Ok(())
    }

    /// Upcast to a pull-model audio source, for devices the `SoundMixer`
    /// should poll. `None` for every device that makes no sound.
    fn as_sound_device(&mut self) -> Option<&mut dyn SoundDevice> {
        None
    }
}

