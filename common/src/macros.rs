// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

/// Log a diagnostic event on a [`crate::components::debugger::Debugger`],
/// formatting the message inline. Shortens the common
/// `debugger.log("kind", format!(...), severity)` call site used throughout
/// device code to raise a `DeviceWarning`.
#[macro_export]
macro_rules! diagnostic {
    ($debugger:expr, $severity:expr, $evt_type:literal, $($arg:tt)*) => {
        $debugger.log($evt_type, format!($($arg)*), $severity)
    };
}
