// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Simulation substrate shared by every machine built on top of `msx-core`:
//! time and scheduling, a diagnostics channel, bit-manipulation helpers, and
//! the savestate/replay serialization substrate. Nothing in this crate knows
//! what an MSX slot or an I/O port is.

pub use components::debugger::{Debugger, DiagnosticEvent, Severity};
pub use components::scheduler::{Event, Kind, Scheduler, TimeS};
pub use components::time::{Clock, EmuDuration, EmuTime, MASTER_CLOCK_HZ};

pub mod components;
#[macro_use]
pub mod macros;
pub mod numutil;
pub mod serialize;
