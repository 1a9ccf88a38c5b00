// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! The record/replay event bus: every externally-caused input (a key press,
//! a cassette being inserted, a reset button) passes through here exactly
//! once, whether it is happening live or being replayed from a log. A
//! `StateChange` is a plain data record rather than a polymorphic event
//! object — a tagged sum is the idiomatic replacement for the virtual
//! `StateChange` hierarchy the component this is grounded on uses, the same
//! trade the scheduler's event-enum makes (see `DESIGN.md`).

use common::EmuTime;
use serde::{Deserialize, Serialize};

/// One externally-caused input, timestamped on the master clock. The log a
/// [`crate::reverse::ReverseManager`] records is a `Vec<StateChange>`; replay
/// delivers each one back through [`crate::motherboard::MotherBoard`] at its
/// own timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StateChange {
    /// A key was pressed or released on the keyboard matrix.
    KeyEvent {
        time: EmuTime,
        row: u8,
        col: u8,
        pressed: bool,
    },
    /// A cassette image was inserted into (or removed from, `data: None`)
    /// the cassette port.
    CassetteInsert { time: EmuTime, data: Option<Vec<u8>> },
    /// The machine was reset.
    Reset { time: EmuTime },
    /// Sentinel closing a replay log. Never itself replayed as a device
    /// action; [`crate::reverse::ReverseManager`] uses its presence to know
    /// where a recording ends.
    EndLog { time: EmuTime },
}

impl StateChange {
    pub fn time(&self) -> EmuTime {
        match self {
            StateChange::KeyEvent { time, .. }
            | StateChange::CassetteInsert { time, .. }
            | StateChange::Reset { time, .. }
            | StateChange::EndLog { time } => *time,
        }
    }

    pub fn is_end_log(&self) -> bool {
        matches!(self, StateChange::EndLog { .. })
    }
}

/// Tracks whether the machine is currently replaying a recorded log. Owned
/// by the [`crate::motherboard::MotherBoard`]; consulted by
/// [`crate::motherboard::MotherBoard::distribute_new`] to enforce the single
/// invariant this component exists for: while replaying, no new
/// externally-sourced `StateChange` may be accepted — only the
/// [`crate::reverse::ReverseManager`] driving the replay may inject events.
#[derive(Default)]
pub struct StateChangeDistributor {
    replaying: bool,
}

impl StateChangeDistributor {
    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    pub(crate) fn begin_replay(&mut self) {
        self.replaying = true;
    }

    pub(crate) fn end_replay(&mut self) {
        self.replaying = false;
    }
}

/// Returned by [`crate::motherboard::MotherBoard::distribute_new`] when an
/// external caller tries to inject an event while a replay is in progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("cannot accept a new state change while replaying a recorded log")]
pub struct ReplayInProgress;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distributor_starts_out_not_replaying() {
        assert!(!StateChangeDistributor::default().is_replaying());
    }

    #[test]
    fn begin_end_replay_round_trips() {
        let mut d = StateChangeDistributor::default();
        d.begin_replay();
        assert!(d.is_replaying());
        d.end_replay();
        assert!(!d.is_replaying());
    }

    #[test]
    fn state_change_time_matches_each_variant() {
        let t = EmuTime::new(42);
        assert_eq!(StateChange::Reset { time: t }.time(), t);
        assert_eq!(StateChange::EndLog { time: t }.time(), t);
        assert!(StateChange::EndLog { time: t }.is_end_log());
        assert!(!StateChange::Reset { time: t }.is_end_log());
    }
}
