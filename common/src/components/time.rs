// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Time types shared by every device and scheduler in a machine.
//!
//! [`EmuTime`] is a single 64-bit tick count on the machine's master clock
//! (3,579,545 Hz on MSX, i.e. the NTSC colorburst frequency times six). Every
//! device agrees on this one clock; a [`Clock`] is just a fixed stride
//! through it for a peripheral that runs at its own, lower frequency.

use std::ops::{Add, Mul, Sub};

/// A point in time, expressed in master clock ticks since power-on.
///
/// Deliberately has no notion of wall-clock time: an `EmuTime` only has
/// meaning relative to another `EmuTime` in the same run. Totally ordered,
/// trivially copyable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EmuTime(pub u64);

impl EmuTime {
    /// Power-up, the system's epoch.
    pub const ZERO: EmuTime = EmuTime(0);
    /// Sentinel that compares greater than any finite time. Scheduling a
    /// sync point here is accepted but it can never actually fire.
    pub const INFINITY: EmuTime = EmuTime(u64::MAX);
    /// A placeholder time for call sites that need *some* `EmuTime` but are
    /// not running inside the simulation (construction, tests probing a
    /// device in isolation). Never compared against a real sync point.
    pub const DUMMY: EmuTime = EmuTime(u64::MAX - 1);

    #[inline]
    pub const fn new(ticks: u64) -> Self {
        Self(ticks)
    }

    #[inline]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Time elapsed between `self` and an earlier time `since`.
    /// Panics (via the underlying subtraction) if `since` is later than
    /// `self`; the scheduler never asks for a negative duration.
    #[inline]
    pub fn duration_since(self, since: EmuTime) -> EmuDuration {
        EmuDuration(self.0 - since.0)
    }

    #[inline]
    pub fn saturating_add(self, dur: EmuDuration) -> Self {
        Self(self.0.saturating_add(dur.0))
    }

    /// `max(ZERO, self - dur)`. Used at the start of a run, where devices
    /// that look a fixed duration into the past must not underflow before
    /// power-on.
    #[inline]
    pub fn saturating_subtract(self, dur: EmuDuration) -> Self {
        Self(self.0.saturating_sub(dur.0))
    }
}

impl Add<EmuDuration> for EmuTime {
    type Output = EmuTime;
    #[inline]
    fn add(self, rhs: EmuDuration) -> EmuTime {
        EmuTime(self.0 + rhs.0)
    }
}

impl Sub<EmuDuration> for EmuTime {
    type Output = EmuTime;
    #[inline]
    fn sub(self, rhs: EmuDuration) -> EmuTime {
        EmuTime(self.0 - rhs.0)
    }
}

impl Sub<EmuTime> for EmuTime {
    type Output = EmuDuration;
    #[inline]
    fn sub(self, rhs: EmuTime) -> EmuDuration {
        EmuDuration(self.0 - rhs.0)
    }
}

/// A span of time, in master clock ticks. Always non-negative; the signed
/// "how late was I" quantity used by the scheduler is a plain `i64`, not
/// an `EmuDuration`, since lateness can legitimately be negative (an event
/// that fires exactly on time).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EmuDuration(pub u64);

impl EmuDuration {
    pub const ZERO: EmuDuration = EmuDuration(0);

    #[inline]
    pub const fn new(ticks: u64) -> Self {
        Self(ticks)
    }

    #[inline]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Build a duration from a (possibly fractional) number of seconds,
    /// rounded to the nearest master clock tick. Used at the boundary where
    /// a UI or config value is given in human time units.
    #[inline]
    pub fn from_seconds(secs: f64) -> Self {
        Self((secs * MASTER_CLOCK_HZ as f64).round() as u64)
    }

    /// Build a duration from a whole number of milliseconds.
    #[inline]
    pub fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(MASTER_CLOCK_HZ) / 1000)
    }

    /// Convert back to seconds. Only ever used at the UI/display boundary;
    /// the simulation itself always compares ticks.
    #[inline]
    pub fn to_double(self) -> f64 {
        self.0 as f64 / MASTER_CLOCK_HZ as f64
    }

    /// `self / other`, as a ratio of the two durations.
    #[inline]
    pub fn div(self, other: EmuDuration) -> f64 {
        self.0 as f64 / other.0 as f64
    }
}

impl Add for EmuDuration {
    type Output = EmuDuration;
    #[inline]
    fn add(self, rhs: EmuDuration) -> EmuDuration {
        EmuDuration(self.0 + rhs.0)
    }
}

impl Sub for EmuDuration {
    type Output = EmuDuration;
    #[inline]
    fn sub(self, rhs: EmuDuration) -> EmuDuration {
        EmuDuration(self.0 - rhs.0)
    }
}

impl Mul<u64> for EmuDuration {
    type Output = EmuDuration;
    #[inline]
    fn mul(self, rhs: u64) -> EmuDuration {
        EmuDuration(self.0 * rhs)
    }
}

/// The master clock frequency of an MSX: the NTSC colorburst (3,579,545 Hz).
pub const MASTER_CLOCK_HZ: u64 = 3_579_545;

/// A fixed-stride view of the master clock for a peripheral running at its
/// own frequency `F` ticks per second, e.g. `Clock::<50>` for a PAL VDP
/// frame rate or `Clock::<44_100>` for the default audio sample rate.
///
/// Mirrors how real hardware peripherals divide the master clock down with
/// a counter rather than maintaining independent floating-point time: the
/// clock holds a grid-aligned `EmuTime`, and `advance` always rounds down
/// to that grid, never up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Clock<const FREQ: u64> {
    /// The grid-aligned time this clock is currently at.
    state: EmuTime,
}

impl<const FREQ: u64> Clock<FREQ> {
    pub const fn new() -> Self {
        Self { state: EmuTime::ZERO }
    }

    /// Construct a clock already aligned to (the grid point at or before)
    /// `time`.
    pub fn at(time: EmuTime) -> Self {
        let mut clock = Self::new();
        clock.advance(time);
        clock
    }

    /// Master-clock ticks per one tick of this peripheral's clock, rounded
    /// down. MSX peripheral frequencies all divide the master clock evenly
    /// enough for this to be exact in practice (e.g. 3,579,545 / 50).
    #[inline]
    pub const fn period(&self) -> u64 {
        MASTER_CLOCK_HZ / FREQ
    }

    /// Convert a count of this peripheral's own ticks into an `EmuDuration`
    /// on the master clock.
    #[inline]
    pub fn duration(&self, periods: u64) -> EmuDuration {
        EmuDuration(periods * self.period())
    }

    /// The clock's current grid-aligned time.
    #[inline]
    pub fn time(&self) -> EmuTime {
        self.state
    }

    /// Advance to the largest grid point at or before `time`. Idempotent:
    /// advancing twice to the same `time` leaves the state unchanged.
    /// Invariant: `self.time() <= time` must hold before calling this, same
    /// as the rest of the scheduler's "never go backward" contract.
    #[inline]
    pub fn advance(&mut self, time: EmuTime) {
        let period = self.period();
        let elapsed = time.ticks() - self.state.ticks();
        let periods = elapsed / period;
        self.state = self.state + EmuDuration::new(periods * period);
    }

    /// Advance by exactly `n` of this clock's own periods.
    #[inline]
    pub fn advance_by_ticks(&mut self, n: u64) {
        self.state = self.state + self.duration(n);
    }

    /// Number of whole periods of this clock's own frequency that fit in
    /// `[self.time(), time)`. Computed with integer division only, and
    /// never rounds up.
    #[inline]
    pub fn get_ticks_till(&self, time: EmuTime) -> u64 {
        time.duration_since(self.state).ticks() / self.period()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_since_basic() {
        let a = EmuTime::new(100);
        let b = EmuTime::new(150);
        assert_eq!(b.duration_since(a), EmuDuration::new(50));
    }

    #[test]
    fn saturating_add_does_not_overflow() {
        let t = EmuTime::new(u64::MAX - 1);
        assert_eq!(t.saturating_add(EmuDuration::new(10)), EmuTime::new(u64::MAX));
    }

    #[test]
    fn saturating_subtract_floors_at_zero() {
        assert_eq!(EmuTime::ZERO.saturating_subtract(EmuDuration::new(100)), EmuTime::ZERO);
        assert_eq!(
            EmuTime::new(50).saturating_subtract(EmuDuration::new(100)),
            EmuTime::ZERO
        );
    }

    #[test]
    fn infinity_compares_greater_than_any_finite_time() {
        assert!(EmuTime::INFINITY > EmuTime::new(u64::MAX - 2));
    }

    #[test]
    fn duration_from_seconds_and_millis_agree() {
        let from_secs = EmuDuration::from_seconds(1.0);
        let from_ms = EmuDuration::from_millis(1000);
        assert_eq!(from_secs, from_ms);
        assert_eq!(from_secs.ticks(), MASTER_CLOCK_HZ);
    }

    #[test]
    fn duration_to_double_roundtrips() {
        let d = EmuDuration::from_seconds(2.5);
        assert!((d.to_double() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn clock_period_divides_master_clock() {
        let clock = Clock::<50>::new();
        assert_eq!(clock.period(), MASTER_CLOCK_HZ / 50);
    }

    #[test]
    fn clock_advance_rounds_down_to_grid() {
        let mut clock = Clock::<50>::new();
        let period = clock.period();
        clock.advance(EmuTime::new(period + 1));
        assert_eq!(clock.time(), EmuTime::new(period));
    }

    #[test]
    fn clock_advance_is_idempotent() {
        let mut clock = Clock::<50>::new();
        clock.advance(EmuTime::new(1000));
        let after_first = clock.time();
        clock.advance(EmuTime::new(1000));
        assert_eq!(clock.time(), after_first);
    }

    #[test]
    fn clock_get_ticks_till_never_rounds_up() {
        let clock = Clock::<50>::new();
        let period = clock.period();
        assert_eq!(clock.get_ticks_till(EmuTime::new(period * 3 - 1)), 2);
    }

    #[test]
    fn clock_advance_by_ticks() {
        let mut clock = Clock::<MASTER_CLOCK_HZ>::new();
        clock.advance_by_ticks(1);
        assert_eq!(clock.time(), EmuTime::new(1));
    }
}
