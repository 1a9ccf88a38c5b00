// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Illustrative device implementations exercising the bus contracts:
//! plain RAM and ROM, and the PPI-style keyboard/cassette I/O chip. Real
//! MSX hardware has many more device kinds (VDP, PSG, FDC, mapper ROMs);
//! all of those are out of scope beyond the `MSXDevice` contract they'd
//! implement exactly like these do.

pub mod cassette;
pub mod keyboard;
pub mod ppi;
pub mod ram;
pub mod rom;
