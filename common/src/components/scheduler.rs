// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! A scheduler used by the emulation core to order peripheral wakeups.
//!
//! This is generic over the possible event kinds `E` so that one scheduler
//! instance can drive every device in a machine: a `MotherBoard` owns a
//! single `Scheduler<MachineEvent>` and dispatches on the returned event
//! kind rather than calling through a `dyn Schedulable` per device.

use crate::components::time::{EmuDuration, EmuTime};

/// A signed offset in master clock ticks, used when scheduling relative to
/// "now". Can be negative: a device that is already running late schedules
/// its next wakeup with a negative offset so the follow-up event fires
/// immediately rather than waiting a full period.
pub type TimeS = i64;

/// A scheduler used by the emulation core to schedule peripherals.
/// Events are kept in a `Vec` sorted so the next event to fire is always
/// the last element; this out-performs a binary heap at the sizes a single
/// machine's device set reaches (typically well under a hundred events).
#[derive(Default, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Scheduler<E: Kind> {
    /// Current time of the scheduler.
    time: EmuTime,
    /// Time of the next event.
    next: EmuTime,
    /// Monotonic counter used to break ties between events scheduled for
    /// the exact same time: lower sequence number fires first, giving
    /// strict FIFO ordering among equal-time events.
    sequence: u64,
    /// Events currently awaiting execution.
    #[cfg_attr(feature = "serde", serde(bound = ""))]
    events: Vec<ScheduledEvent<E>>,
}

impl<E: Kind> Scheduler<E> {
    /// Schedule an event of the given kind after the given amount
    /// of ticks have elapsed from now.
    /// `after` can be negative; this is mainly used for events where
    /// the device was already running late and the followup event also
    /// needs to happen right away.
    #[inline]
    pub fn schedule(&mut self, kind: E, after: TimeS) {
        let time = add_signed(self.time, after);
        let seq = self.sequence;
        self.sequence += 1;
        let event = ScheduledEvent {
            kind,
            execute_at: time,
            seq,
        };
        self.events.push(event);

        // Ensure the event list is still sorted in ascending (execute_at, seq)
        // order, with the soonest event last. We insert from the back since
        // new events are very often at or near the front of a mostly-sorted
        // list (a freshly rescheduled device firing again soon).
        let len = self.events.len();
        for idx in (1..len).rev() {
            let other = self.events[idx - 1];
            if event.order_key() > other.order_key() {
                self.events[idx] = other;
            } else {
                self.events[idx] = event;
                self.next = self.events.last().unwrap().execute_at;
                return;
            }
        }
        self.events[0] = event;
        self.next = self
            .events
            .last()
            .map(|e| e.execute_at)
            .unwrap_or(EmuTime::new(u64::MAX));
    }

    /// Advance the timer by the given amount of ticks.
    #[inline]
    pub fn advance(&mut self, by: EmuDuration) {
        self.time = self.time.saturating_add(by);
    }

    /// Get the next pending event, in FIFO order among events that share an
    /// execute time. Returns `None` if no event is due yet.
    #[inline]
    pub fn get_next_pending(&mut self) -> Option<Event<E>> {
        if self.next <= self.time {
            let idx = self.events.len() - 1;
            let event = self.events[idx];
            unsafe { self.events.set_len(idx) };
            self.next = self
                .events
                .last()
                .map(|e| e.execute_at)
                .unwrap_or(EmuTime::new(u64::MAX));
            Some(Event {
                kind: event.kind,
                late_by: (self.time.ticks() - event.execute_at.ticks()) as TimeS,
            })
        } else {
            None
        }
    }

    #[inline]
    pub fn has_events(&self) -> bool {
        self.next <= self.time
    }

    /// Time of the next pending event, or `EmuTime::INFINITY` if none is
    /// scheduled. Does not pop or otherwise mutate the queue; used by
    /// callers that need to decide whether to call `pop` without yet
    /// committing to it.
    #[inline]
    pub fn peek_next_time(&self) -> EmuTime {
        self.next
    }

    /// Return the next event immediately, and set the current time to
    /// the event's execution time. This is useful when a CPU halts and the
    /// emulation can jump straight to the next wakeup without ticking
    /// through every intervening master-clock tick.
    pub fn pop(&mut self) -> Event<E> {
        let event = self.events.pop().unwrap();
        self.time = event.execute_at;
        self.next = self
            .events
            .last()
            .map(|e| e.execute_at)
            .unwrap_or(EmuTime::new(u64::MAX));
        Event {
            kind: event.kind,
            late_by: 0,
        }
    }

    /// Cancel all events of a given kind.
    /// Somewhat expensive: scans the whole event list.
    pub fn cancel(&mut self, evt: E) {
        self.events.retain(|e| e.kind != evt);
        self.next = self
            .events
            .last()
            .map(|e| e.execute_at)
            .unwrap_or(EmuTime::new(u64::MAX));
    }

    /// Cancel a single event of a given kind. Cheaper than `cancel` when the
    /// caller knows at most one instance is scheduled.
    pub fn cancel_single(&mut self, evt: E) -> bool {
        let idx = self.events.iter().position(|e| e.kind == evt);
        if let Some(idx) = idx {
            self.events.remove(idx);
            self.next = self
                .events
                .last()
                .map(|e| e.execute_at)
                .unwrap_or(EmuTime::new(u64::MAX));
        }
        idx.is_some()
    }

    /// Cancel a single (!) matching event and return its remaining time.
    pub fn cancel_with_remaining(&mut self, mut evt: impl FnMut(E) -> bool) -> (EmuDuration, E) {
        let idx = self.events.iter().position(|e| evt(e.kind)).unwrap();
        let evt = self.events.remove(idx);
        self.next = self
            .events
            .last()
            .map(|e| e.execute_at)
            .unwrap_or(EmuTime::new(u64::MAX));
        (evt.execute_at.duration_since(self.time), evt.kind)
    }

    #[inline]
    pub fn now(&self) -> EmuTime {
        self.time
    }
}

fn add_signed(time: EmuTime, by: TimeS) -> EmuTime {
    if by >= 0 {
        time.saturating_add(EmuDuration::new(by as u64))
    } else {
        EmuTime::new(time.ticks().saturating_sub((-by) as u64))
    }
}

/// An event awaiting execution.
#[derive(Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
struct ScheduledEvent<E: Kind> {
    /// Kind of event to execute.
    #[cfg_attr(feature = "serde", serde(bound = ""))]
    kind: E,
    /// Time of the scheduler to execute it at.
    execute_at: EmuTime,
    /// Insertion order, used to break ties so equal-time events fire FIFO.
    seq: u64,
}

impl<E: Kind> ScheduledEvent<E> {
    /// Sort key: soonest time first, then lowest sequence number (earliest
    /// inserted) first among equal times. Since the event list keeps the
    /// *next* event last, a smaller key must sort later in the `Vec` — see
    /// the reversed comparison in `schedule`.
    #[inline]
    fn order_key(&self) -> (std::cmp::Reverse<EmuTime>, std::cmp::Reverse<u64>) {
        (std::cmp::Reverse(self.execute_at), std::cmp::Reverse(self.seq))
    }
}

/// Trait for event kinds.
#[cfg(feature = "serde")]
pub trait Kind:
    for<'de> serde::Deserialize<'de> + serde::Serialize + PartialEq + Copy + Clone
{
}
#[cfg(not(feature = "serde"))]
pub trait Kind: PartialEq + Copy + Clone {}

/// Event that is ready to be handled.
#[derive(Copy, Clone)]
#[cfg_attr(test, derive(Debug, PartialEq))]
pub struct Event<E: Kind> {
    /// The kind of event to handle.
    pub kind: E,
    /// By how many ticks the event was delayed by. For example:
    /// - Event was scheduled to be executed at tick 1000
    /// - Scheduler ran until 1010 before the event got handled
    /// - `late_by` will be 1010 - 1000 = 10.
    pub late_by: TimeS,
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
    enum TestEvent {
        #[default]
        A,
        B,
        C,
    }

    impl Kind for TestEvent {}

    #[test]
    fn test_basic() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule(TestEvent::A, 10);
        scheduler.schedule(TestEvent::B, 5);
        scheduler.schedule(TestEvent::C, 15);
        assert_eq!(scheduler.get_next_pending(), None);

        scheduler.advance(EmuDuration::new(5));
        assert_eq!(
            scheduler.get_next_pending(),
            Some(Event {
                kind: TestEvent::B,
                late_by: 0
            })
        );
        assert_eq!(scheduler.get_next_pending(), None);

        scheduler.advance(EmuDuration::new(5));
        assert_eq!(
            scheduler.get_next_pending(),
            Some(Event {
                kind: TestEvent::A,
                late_by: 0
            })
        );
        assert_eq!(scheduler.get_next_pending(), None);

        scheduler.advance(EmuDuration::new(5));
        assert_eq!(
            scheduler.get_next_pending(),
            Some(Event {
                kind: TestEvent::C,
                late_by: 0
            })
        );
        assert_eq!(scheduler.get_next_pending(), None);
    }

    #[test]
    fn test_fifo_tie_break() {
        // Two events scheduled for the exact same tick must fire in the
        // order they were scheduled in, not be reordered.
        let mut scheduler = Scheduler::default();
        scheduler.schedule(TestEvent::A, 10);
        scheduler.schedule(TestEvent::B, 10);
        scheduler.advance(EmuDuration::new(10));
        assert_eq!(
            scheduler.get_next_pending(),
            Some(Event {
                kind: TestEvent::A,
                late_by: 0
            })
        );
        assert_eq!(
            scheduler.get_next_pending(),
            Some(Event {
                kind: TestEvent::B,
                late_by: 0
            })
        );
    }

    #[test]
    fn test_cancel() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule(TestEvent::A, 10);
        scheduler.schedule(TestEvent::A, 19);
        scheduler.schedule(TestEvent::B, 5);
        scheduler.schedule(TestEvent::C, 15);
        scheduler.cancel(TestEvent::A);

        scheduler.advance(EmuDuration::new(20));
        assert_eq!(
            scheduler.get_next_pending(),
            Some(Event {
                kind: TestEvent::B,
                late_by: 15
            })
        );
        assert_eq!(
            scheduler.get_next_pending(),
            Some(Event {
                kind: TestEvent::C,
                late_by: 5
            })
        );
        assert_eq!(scheduler.get_next_pending(), None);
    }

    #[test]
    fn test_cancel_single() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule(TestEvent::A, 10);
        scheduler.schedule(TestEvent::B, 5);
        scheduler.schedule(TestEvent::C, 15);
        assert!(scheduler.cancel_single(TestEvent::A));

        scheduler.advance(EmuDuration::new(20));
        assert_eq!(
            scheduler.get_next_pending(),
            Some(Event {
                kind: TestEvent::B,
                late_by: 15
            })
        );
        assert_eq!(
            scheduler.get_next_pending(),
            Some(Event {
                kind: TestEvent::C,
                late_by: 5
            })
        );
        assert_eq!(scheduler.get_next_pending(), None);
    }

    #[test]
    fn test_cancel_with_remaining() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule(TestEvent::A, 10);
        scheduler.schedule(TestEvent::B, 5);
        scheduler.schedule(TestEvent::C, 15);
        let (remaining, kind) = scheduler.cancel_with_remaining(|e| e == TestEvent::A);
        assert_eq!(remaining, EmuDuration::new(10));
        assert_eq!(kind, TestEvent::A);

        scheduler.advance(EmuDuration::new(20));
        assert_eq!(
            scheduler.get_next_pending(),
            Some(Event {
                kind: TestEvent::B,
                late_by: 15
            })
        );
        assert_eq!(
            scheduler.get_next_pending(),
            Some(Event {
                kind: TestEvent::C,
                late_by: 5
            })
        );
        assert_eq!(scheduler.get_next_pending(), None);
    }

    #[test]
    fn test_pop() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule(TestEvent::A, 10);
        scheduler.schedule(TestEvent::B, 5);
        scheduler.schedule(TestEvent::C, 15);

        assert_eq!(
            scheduler.pop(),
            Event {
                kind: TestEvent::B,
                late_by: 0
            }
        );
        assert_eq!(scheduler.now(), EmuTime::new(5));
        assert_eq!(
            scheduler.pop(),
            Event {
                kind: TestEvent::A,
                late_by: 0
            }
        );
        assert_eq!(scheduler.now(), EmuTime::new(10));
        assert_eq!(
            scheduler.pop(),
            Event {
                kind: TestEvent::C,
                late_by: 0
            }
        );
        assert_eq!(scheduler.now(), EmuTime::new(15));
    }
}
