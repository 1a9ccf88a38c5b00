// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! The MSX emulation core: time and scheduling (via `common`), the memory
//! and I/O bus, the device contract and arena, the composition root
//! (`MotherBoard`), record/replay, and the rewind engine built on top of it.
//!
//! This crate models the machine *around* a CPU rather than a CPU itself —
//! no Z80 core lives here (see `DESIGN.md`'s Non-goals). Anything that plugs
//! into a slot, a page, or an I/O port does; a front end supplies the CPU,
//! drives `MotherBoard::run_until`, and polls the sound mixer and rewind
//! engine through the surface this crate exposes.

pub mod bus;
pub mod device;
pub mod devices;
pub mod error;
pub mod motherboard;
pub mod reverse;
pub mod sound;
pub mod state_change;

pub use bus::{BusSnapshot, DeviceBus};
pub use device::{DeviceConfig, DeviceId, MSXDevice};
pub use error::{ApplyError, ConfigurationError, ReverseError};
pub use motherboard::{MachineConfig, MachineEvent, MotherBoard, MotherBoardSnapshot};
pub use reverse::{ReplayFile, ReverseManager};
pub use sound::{SoundDevice, SoundMixer};
pub use state_change::{ReplayInProgress, StateChange, StateChangeDistributor};
