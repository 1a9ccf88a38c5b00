// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! The composition root: owns the scheduler, the bus, every device, and the
//! rewind engine, and is the one place that ever holds `&mut` access to all
//! of them at once. Devices, connectors, and the reverse engine only ever
//! see `&mut MotherBoard` passed in, never a pointer back to it — the
//! acyclic arena-by-index pattern spec.md's design notes ask for.

use std::collections::HashSet;

use common::serialize::SerializationError;
use common::{Debugger, EmuDuration, EmuTime, Scheduler, Severity, TimeS};
use serde::{Deserialize, Serialize};

use crate::bus::{BusSnapshot, DeviceBus};
use crate::device::{DeviceId, MSXDevice};
use crate::devices::cassette::CassettePort;
use crate::devices::ppi::Ppi;
use crate::devices::ram::RamDevice;
use crate::devices::rom::RomDevice;
use crate::error::{ApplyError, ConfigurationError};
use crate::reverse::ReverseManager;
use crate::sound::SoundMixer;
use crate::state_change::{ReplayInProgress, StateChange, StateChangeDistributor};

/// The two kinds of sync point the reverse engine schedules on the shared
/// machine scheduler. Device-originated sync kinds (timers, VDP frame
/// interrupts, ...) would grow this enum in a fuller machine; none of the
/// illustrative devices here need one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineEvent {
    #[default]
    ReverseNewSnapshot,
    ReverseInputEvent,
}

impl common::Kind for MachineEvent {}

/// One device's construction-time description. Stands in for the slice of
/// a machine's XML description that would otherwise be parsed (out of
/// scope — see spec's Non-goals); a `MachineConfig` is built programmatically
/// instead.
enum DeviceSpec {
    Ram { name: String, size: usize },
    Rom { name: String, data: Vec<u8> },
    Ppi { name: String },
}

fn device_spec_name(spec: &DeviceSpec) -> &str {
    match spec {
        DeviceSpec::Ram { name, .. } | DeviceSpec::Rom { name, .. } | DeviceSpec::Ppi { name, .. } => name,
    }
}

struct SlotMapping {
    primary: u8,
    secondary: u8,
    page: u8,
    device: usize,
}

/// A machine description: the device set, how they're wired into the bus,
/// and which one (if any) is the keyboard connector. Built with the
/// `add_*`/`map`/`register_io_*` methods, then handed to
/// [`MotherBoard::new`].
#[derive(Default)]
pub struct MachineConfig {
    devices: Vec<DeviceSpec>,
    expanded: Vec<u8>,
    mappings: Vec<SlotMapping>,
    io_in: Vec<(u8, usize)>,
    io_out: Vec<(u8, usize)>,
    keyboard_device: Option<usize>,
}

impl MachineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a RAM device, returning its index for use with [`Self::map`].
    pub fn add_ram(&mut self, name: impl Into<String>, size: usize) -> usize {
        self.devices.push(DeviceSpec::Ram { name: name.into(), size });
        self.devices.len() - 1
    }

    /// Add a ROM device, returning its index for use with [`Self::map`].
    pub fn add_rom(&mut self, name: impl Into<String>, data: Vec<u8>) -> usize {
        self.devices.push(DeviceSpec::Rom { name: name.into(), data });
        self.devices.len() - 1
    }

    /// Add the keyboard/cassette PPI, wiring its fixed I/O ports and, if
    /// this is the first one declared, registering it as the machine's
    /// keyboard connector.
    pub fn add_ppi(&mut self, name: impl Into<String>) -> usize {
        let idx = self.devices.len();
        self.devices.push(DeviceSpec::Ppi { name: name.into() });
        self.io_in.push((crate::devices::ppi::PORT_KEYBOARD, idx));
        self.io_out.push((crate::devices::ppi::PORT_CONTROL, idx));
        self.keyboard_device.get_or_insert(idx);
        idx
    }

    pub fn set_expanded(&mut self, primary: u8) {
        self.expanded.push(primary);
    }

    /// Wire `device` into slot `(primary, secondary, page)`.
    pub fn map(&mut self, primary: u8, secondary: u8, page: u8, device: usize) {
        self.mappings.push(SlotMapping { primary, secondary, page, device });
    }

    pub fn register_io_in(&mut self, port: u8, device: usize) {
        self.io_in.push((port, device));
    }

    pub fn register_io_out(&mut self, port: u8, device: usize) {
        self.io_out.push((port, device));
    }
}

fn instantiate_device(spec: &DeviceSpec) -> Box<dyn MSXDevice> {
    match spec {
        DeviceSpec::Ram { name, size } => Box::new(RamDevice::new(name.clone(), *size)),
        DeviceSpec::Rom { name, data } => Box::new(RomDevice::new(name.clone(), data.clone())),
        DeviceSpec::Ppi { .. } => Box::new(Ppi::new()),
    }
}

/// A complete, self-contained snapshot of a [`MotherBoard`]'s mutable state:
/// the scheduler, the bus's slot-select registers, and each device's own
/// serialized state, in arena order. Rebuildable into a fresh `MotherBoard`
/// only via [`MotherBoard::restore`] against an already-constructed board of
/// the same `MachineConfig` — the device arena itself is never part of the
/// snapshot (see `MSXDevice::save_state`'s doc comment).
#[derive(Serialize, Deserialize)]
pub struct MotherBoardSnapshot {
    scheduler: Scheduler<MachineEvent>,
    bus: BusSnapshot,
    device_states: Vec<Vec<u8>>,
}

/// Composition root: owns the scheduler, the bus, the device arena, and the
/// peripheral connectors (cassette port, sound mixer), and brokers every
/// interaction between them.
pub struct MotherBoard {
    scheduler: Scheduler<MachineEvent>,
    bus: DeviceBus,
    devices: Vec<Box<dyn MSXDevice>>,
    keyboard_device: Option<DeviceId>,
    cassette: CassettePort,
    sound_mixer: SoundMixer,
    state_changes: StateChangeDistributor,
    reverse: ReverseManager,
    debugger: Debugger<u16>,
}

impl MotherBoard {
    /// Assemble a machine from `config`, validating it first. Devices are
    /// constructed in declaration order (a full dependency-topological sort
    /// is out of scope — see `DESIGN.md`) and then wired into the bus.
    pub fn new(config: &MachineConfig) -> Result<Self, ConfigurationError> {
        let mut seen_names = HashSet::new();
        for spec in &config.devices {
            let name = device_spec_name(spec);
            if !seen_names.insert(name) {
                return Err(ConfigurationError::DuplicateDeviceName(name.to_string()));
            }
            let empty = match spec {
                DeviceSpec::Ram { size, .. } => *size == 0,
                DeviceSpec::Rom { data, .. } => data.is_empty(),
                DeviceSpec::Ppi { .. } => false,
            };
            if empty {
                return Err(ConfigurationError::EmptyDevice(name.to_string()));
            }
        }

        let mut seen_cells = HashSet::new();
        for m in &config.mappings {
            if !seen_cells.insert((m.primary, m.secondary, m.page)) {
                return Err(ConfigurationError::DuplicatePageMapping { slot: m.primary, page: m.page });
            }
        }

        let devices: Vec<Box<dyn MSXDevice>> = config.devices.iter().map(instantiate_device).collect();

        let mut bus = DeviceBus::new();
        for &primary in &config.expanded {
            bus.set_expanded(primary, true);
        }
        for m in &config.mappings {
            bus.map_device(m.primary, m.secondary, m.page, DeviceId(m.device));
        }
        for &(port, idx) in &config.io_in {
            bus.register_io_in(port, DeviceId(idx));
        }
        for &(port, idx) in &config.io_out {
            bus.register_io_out(port, DeviceId(idx));
        }

        Ok(Self {
            scheduler: Scheduler::default(),
            bus,
            devices,
            keyboard_device: config.keyboard_device.map(DeviceId),
            cassette: CassettePort::default(),
            sound_mixer: SoundMixer::default(),
            state_changes: StateChangeDistributor::default(),
            reverse: ReverseManager::default(),
            // Unlike the teacher crate's UI, which lets a user raise this
            // from its `Severity::None` default via a combo box, this crate
            // has no front end to do that from — default to logging
            // everything so `DeviceWarning`s are actually observable.
            debugger: Debugger { diagnostic_level: Severity::Debug, ..Debugger::default() },
        })
    }

    pub fn current_time(&self) -> EmuTime {
        self.scheduler.now()
    }

    pub fn diagnostics(&self) -> &Debugger<u16> {
        &self.debugger
    }

    /// Called once, after construction, before any device sees a bus access.
    pub fn power_up(&mut self, time: EmuTime) {
        for device in &mut self.devices {
            device.power_up(time);
        }
    }

    /// May be called many times; devices reset in reverse registration order
    /// (mirroring the teardown-like nature of a reset for dependent devices).
    pub fn reset(&mut self, time: EmuTime) {
        for device in self.devices.iter_mut().rev() {
            device.reset(time);
        }
    }

    pub fn power_down(&mut self, time: EmuTime) {
        for device in self.devices.iter_mut().rev() {
            device.power_down(time);
        }
    }

    /// Advance emulated time to `target` and run every sync point due by
    /// then, in order. The only place emulated time moves.
    ///
    /// Peeks the next pending event against `target` and, while it is due,
    /// pops it (which sets the scheduler's `now()` to that event's own fire
    /// time, not `target`) and dispatches it; a callback may itself insert
    /// a new sync point at or before `target`, which is picked up by
    /// re-peeking on the next loop iteration. Only once nothing more is due
    /// does time advance the rest of the way to `target`.
    pub fn run_until(&mut self, target: EmuTime) {
        while self.scheduler.peek_next_time() <= target {
            let event = self.scheduler.pop();
            self.handle_event(event.kind, event.late_by);
        }
        let delta = target.duration_since(self.scheduler.now());
        self.scheduler.advance(delta);
    }

    fn handle_event(&mut self, kind: MachineEvent, late_by: TimeS) {
        // `reverse` needs `&mut self` to snapshot/restore/dispatch through,
        // but it is itself a field of `self` — swap it out for the
        // duration of the call rather than borrowing both at once.
        let mut reverse = std::mem::take(&mut self.reverse);
        match kind {
            MachineEvent::ReverseNewSnapshot => reverse.on_new_snapshot(self, late_by),
            MachineEvent::ReverseInputEvent => reverse.on_input_event(self, late_by),
        }
        self.reverse = reverse;
    }

    /// Schedule the next periodic snapshot `after` ticks out, correcting for
    /// how late the current firing already ran so the once-per-second
    /// cadence stays anchored to wall/emulated-time multiples instead of
    /// drifting forward by the accumulated lateness of every prior firing.
    pub(crate) fn schedule_next_snapshot(&mut self, after: EmuDuration, late_by: TimeS) {
        self.scheduler.schedule(MachineEvent::ReverseNewSnapshot, after.ticks() as TimeS - late_by);
    }

    pub(crate) fn schedule_replay_event_at(&mut self, fire: EmuTime) {
        let now = self.scheduler.now();
        let after = fire.ticks() as i64 - now.ticks() as i64;
        self.scheduler.schedule(MachineEvent::ReverseInputEvent, after);
    }

    pub(crate) fn cancel_reverse_events(&mut self) {
        self.scheduler.cancel(MachineEvent::ReverseNewSnapshot);
        self.scheduler.cancel(MachineEvent::ReverseInputEvent);
    }

    pub(crate) fn begin_replay(&mut self) {
        self.state_changes.begin_replay();
    }

    pub(crate) fn end_replay(&mut self) {
        self.state_changes.end_replay();
    }

    pub(crate) fn deliver_replayed_state_change(&mut self, change: &StateChange) -> Result<(), ApplyError> {
        self.apply_state_change(change)
    }

    /// Submit a live (non-replayed) `StateChange`. Refused while a replay is
    /// in progress. Recorded into the reverse log (if collecting) before
    /// being applied; a failure applying it is logged as a warning, not
    /// propagated — matching `ReplayDivergence`'s "log and continue" policy
    /// for both live and replayed submission.
    pub fn distribute_new(&mut self, change: StateChange) -> Result<(), ReplayInProgress> {
        if self.state_changes.is_replaying() {
            return Err(ReplayInProgress);
        }
        if self.reverse.is_collecting() {
            self.reverse.record_event(change.clone());
        }
        if let Err(e) = self.apply_state_change(&change) {
            common::diagnostic!(self.debugger, Severity::Warning, "apply", "{e}");
        }
        Ok(())
    }

    fn apply_state_change(&mut self, change: &StateChange) -> Result<(), ApplyError> {
        match change {
            StateChange::KeyEvent { row, col, pressed, .. } => {
                if let Some(ppi) = self.keyboard_mut() {
                    ppi.set_key(*row, *col, *pressed);
                }
                Ok(())
            }
            StateChange::CassetteInsert { data, .. } => match data {
                Some(bytes) => self.cassette.insert(bytes).map_err(ApplyError::Cassette),
                None => {
                    self.cassette.eject();
                    Ok(())
                }
            },
            StateChange::Reset { time } => {
                self.reset(*time);
                Ok(())
            }
            StateChange::EndLog { .. } => Ok(()),
        }
    }

    fn keyboard_mut(&mut self) -> Option<&mut Ppi> {
        let id = self.keyboard_device?;
        self.devices[id.0].as_any_mut().downcast_mut::<Ppi>()
    }

    pub fn keyboard(&mut self) -> Option<&Ppi> {
        let id = self.keyboard_device?;
        self.devices[id.0].as_any_mut().downcast_ref::<Ppi>()
    }

    pub fn key_event(&mut self, row: u8, col: u8, pressed: bool) -> Result<(), ReplayInProgress> {
        let time = self.current_time();
        self.distribute_new(StateChange::KeyEvent { time, row, col, pressed })
    }

    pub fn insert_cassette(&mut self, data: Vec<u8>) -> Result<(), ReplayInProgress> {
        let time = self.current_time();
        self.distribute_new(StateChange::CassetteInsert { time, data: Some(data) })
    }

    pub fn eject_cassette(&mut self) -> Result<(), ReplayInProgress> {
        let time = self.current_time();
        self.distribute_new(StateChange::CassetteInsert { time, data: None })
    }

    pub fn request_reset(&mut self) -> Result<(), ReplayInProgress> {
        let time = self.current_time();
        self.distribute_new(StateChange::Reset { time })
    }

    pub fn read_mem(&mut self, addr: u16) -> u8 {
        let time = self.scheduler.now();
        self.bus.read_mem(addr, time, &mut self.devices)
    }

    pub fn write_mem(&mut self, addr: u16, value: u8) {
        let time = self.scheduler.now();
        self.bus.write_mem(addr, value, time, &mut self.devices);
    }

    pub fn peek_mem(&self, addr: u16) -> u8 {
        self.bus.peek_mem(addr, self.scheduler.now(), &self.devices)
    }

    pub fn read_io(&mut self, port: u8) -> u8 {
        let time = self.scheduler.now();
        self.bus.read_io(port, time, &mut self.devices)
    }

    pub fn write_io(&mut self, port: u8, value: u8) {
        let time = self.scheduler.now();
        self.bus.write_io(port, value, time, &mut self.devices);
    }

    pub fn peek_io(&self, port: u8) -> u8 {
        self.bus.peek_io(port, self.scheduler.now(), &self.devices)
    }

    /// Synchronize every sound-producing device to the current time.
    pub fn sync_sound(&mut self) {
        let time = self.scheduler.now();
        self.sound_mixer.sync(time, &mut self.devices);
    }

    pub fn is_collecting(&self) -> bool {
        self.reverse.is_collecting()
    }

    pub fn is_replaying(&self) -> bool {
        self.state_changes.is_replaying()
    }

    pub fn reverse_chunk_count(&self) -> usize {
        self.reverse.chunk_count()
    }

    pub fn reverse_start(&mut self) -> Result<(), crate::error::ReverseError> {
        let mut reverse = std::mem::take(&mut self.reverse);
        let result = reverse.start(self);
        self.reverse = reverse;
        result
    }

    pub fn reverse_stop(&mut self) {
        let mut reverse = std::mem::take(&mut self.reverse);
        reverse.stop(self);
        self.reverse = reverse;
    }

    pub fn reverse_go_to(&mut self, key: u32) -> Result<(), crate::error::ReverseError> {
        let mut reverse = std::mem::take(&mut self.reverse);
        let result = reverse.go_to(self, key);
        self.reverse = reverse;
        result
    }

    pub fn reverse_go_back(&mut self, dt: EmuDuration) -> Result<(), crate::error::ReverseError> {
        let mut reverse = std::mem::take(&mut self.reverse);
        let result = reverse.go_back(self, dt);
        self.reverse = reverse;
        result
    }

    pub fn save_replay(&mut self) -> Result<crate::reverse::ReplayFile, crate::error::ReverseError> {
        let mut reverse = std::mem::take(&mut self.reverse);
        let result = reverse.save_replay(self);
        self.reverse = reverse;
        result
    }

    pub fn load_replay(&mut self, replay: &crate::reverse::ReplayFile) -> Result<(), crate::error::ReverseError> {
        let mut reverse = std::mem::take(&mut self.reverse);
        let result = reverse.load_replay(self, replay);
        self.reverse = reverse;
        result
    }

    /// A complete, point-in-time snapshot of every device plus the bus and
    /// scheduler. Used by the reverse engine; also usable directly for an
    /// on-demand user savestate.
    pub fn snapshot(&self) -> Result<MotherBoardSnapshot, SerializationError> {
        let device_states = self
            .devices
            .iter()
            .map(|d| d.save_state())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MotherBoardSnapshot {
            scheduler: self.scheduler.clone(),
            bus: self.bus.snapshot(),
            device_states,
        })
    }

    /// Restore a snapshot taken from a board built from the same
    /// `MachineConfig` (same device count, in the same order).
    pub fn restore(&mut self, snapshot: &MotherBoardSnapshot) -> Result<(), SerializationError> {
        if snapshot.device_states.len() != self.devices.len() {
            return Err(SerializationError::DeviceCountMismatch {
                expected: self.devices.len(),
                found: snapshot.device_states.len(),
            });
        }
        for (device, state) in self.devices.iter_mut().zip(&snapshot.device_states) {
            device.load_state(state)?;
        }
        self.bus.restore(&snapshot.bus);
        self.scheduler = snapshot.scheduler.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_ram_slots() -> MachineConfig {
        let mut config = MachineConfig::new();
        for ps in 0..4u8 {
            let ram = config.add_ram(format!("ram{ps}"), 0x4000);
            config.map(ps, 0, 1, ram);
        }
        config
    }

    #[test]
    fn construction_rejects_duplicate_device_names() {
        let mut config = MachineConfig::new();
        config.add_ram("ram", 0x1000);
        config.add_ram("ram", 0x1000);
        assert!(matches!(
            MotherBoard::new(&config),
            Err(ConfigurationError::DuplicateDeviceName(_))
        ));
    }

    #[test]
    fn construction_rejects_empty_device() {
        let mut config = MachineConfig::new();
        config.add_ram("ram", 0);
        assert!(matches!(MotherBoard::new(&config), Err(ConfigurationError::EmptyDevice(_))));
    }

    #[test]
    fn construction_rejects_duplicate_page_mapping() {
        let mut config = MachineConfig::new();
        let a = config.add_ram("a", 0x4000);
        let b = config.add_ram("b", 0x4000);
        config.map(0, 0, 1, a);
        config.map(0, 0, 1, b);
        assert!(matches!(
            MotherBoard::new(&config),
            Err(ConfigurationError::DuplicatePageMapping { .. })
        ));
    }

    #[test]
    fn slot_switch_routes_page_one_reads_to_the_selected_primary() {
        let config = four_ram_slots();
        let mut board = MotherBoard::new(&config).unwrap();
        for ps in 0..4u8 {
            board.write_mem(0x4000 + ps as u16, 0x10 + ps);
            board.write_io(crate::bus::PRIMARY_SLOT_PORT, 0xFF); // select slot 3 for all pages first
        }
        // 0xE4 = 0b11_10_01_00: page0->0, page1->1, page2->2, page3->3
        board.write_io(crate::bus::PRIMARY_SLOT_PORT, 0b11_10_01_00);
        assert_eq!(board.read_mem(0x4001), 0x11);
    }

    #[test]
    fn boot_and_key_returns_to_baseline_after_press_and_release() {
        let mut config = MachineConfig::new();
        config.add_ppi("ppi");
        let mut board = MotherBoard::new(&config).unwrap();
        board.power_up(EmuTime::ZERO);

        board.run_until(EmuTime::new(common::MASTER_CLOCK_HZ * 2));
        board.key_event(4, 0, true).unwrap();
        board.run_until(EmuTime::new(common::MASTER_CLOCK_HZ * 2 + common::MASTER_CLOCK_HZ / 50));
        board.key_event(4, 0, false).unwrap();
        board.run_until(EmuTime::new(common::MASTER_CLOCK_HZ * 2 + common::MASTER_CLOCK_HZ / 20));

        assert!(board.keyboard().unwrap().keyboard().is_baseline());
    }

    #[test]
    fn replay_divergence_on_missing_cassette_data_is_logged_not_fatal() {
        let mut config = MachineConfig::new();
        config.add_ppi("ppi");
        let mut board = MotherBoard::new(&config).unwrap();
        board.power_up(EmuTime::ZERO);
        board.reverse_start().unwrap();
        board.insert_cassette(b"not a tsx file".to_vec()).unwrap();
        assert_eq!(board.diagnostics().diagnostic_events.lock().unwrap().len(), 1);
    }

    #[test]
    fn snapshot_restore_roundtrips_ram_contents() {
        let config = four_ram_slots();
        let mut board = MotherBoard::new(&config).unwrap();
        board.write_mem(0x4000, 0xAB);
        let snap = board.snapshot().unwrap();

        board.write_mem(0x4000, 0x00);
        board.restore(&snap).unwrap();
        assert_eq!(board.peek_mem(0x4000), 0xAB);
    }

    #[test]
    fn distribute_new_is_refused_during_replay() {
        let mut config = MachineConfig::new();
        config.add_ppi("ppi");
        let mut board = MotherBoard::new(&config).unwrap();
        board.begin_replay();
        assert!(board.key_event(0, 0, true).is_err());
    }
}
