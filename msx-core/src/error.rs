// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Error types for the recoverable boundaries of the emulation core. A
//! corrupted in-memory invariant (the scheduler firing for an unregistered
//! kind, a chunk index that vanished) is a `panic!`/`assert!`, never one of
//! these — see `DESIGN.md`'s discussion of `StateInconsistency`.

use thiserror::Error;

/// A machine description that cannot be assembled into a working
/// `MotherBoard`. Fatal at startup; there is no partial-machine fallback.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("device name {0:?} is declared more than once")]
    DuplicateDeviceName(String),
    #[error("device {0:?} has zero-sized backing storage")]
    EmptyDevice(String),
    #[error("page {page} of primary slot {slot} is mapped more than once")]
    DuplicatePageMapping { slot: u8, page: u8 },
}

/// Failure raised while applying an already-accepted `StateChange` to the
/// machine. Never returned from `distribute_new` itself — both a live
/// submission and a replayed one log this as a `DiagnosticEvent` at
/// `Severity::Warning` and move on, matching spec's "replay divergence"
/// handling (see `DESIGN.md`).
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Cassette(#[from] crate::devices::cassette::TsxError),
}

/// Failure in the rewind/replay machinery itself: a missing snapshot chunk,
/// or a wrapped archive error from (de)serializing a motherboard snapshot.
#[derive(Debug, Error)]
pub enum ReverseError {
    #[error(transparent)]
    Serialization(#[from] common::serialize::SerializationError),
    #[error("no snapshot chunk numbered {0}")]
    ChunkNotFound(u32),
}
