// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! The audio pull model: a `SoundDevice` owns no host audio backend and
//! produces no samples until asked. `SoundMixer` is the scheduling hook that
//! asks — it does no resampling or mixing itself (both are explicitly out of
//! scope); it only guarantees every registered device has caught up to the
//! requested time before a front end reads its buffer.

use common::EmuTime;

use crate::device::{DeviceId, MSXDevice};

/// A device that produces audio. `update_stream` is called before any other
/// component observes `time` having passed, so a chip that generates samples
/// lazily (most real sound chips do) gets a chance to catch up first.
pub trait SoundDevice: Send {
    /// Samples per second this device renders at.
    fn sample_rate(&self) -> u32;

    /// Render any samples owed for `[last update, time)`. No-op for a device
    /// with nothing new to say since last time.
    fn update_stream(&mut self, time: EmuTime);
}

/// The pull-based mixing point every sound-producing device registers with.
/// Holds no DSP state of its own: synchronizing every device to a given
/// `EmuTime` is the entire contract.
#[derive(Default)]
pub struct SoundMixer {
    devices: Vec<DeviceId>,
}

impl SoundMixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device to be synced on every [`Self::sync`] call. Order of
    /// registration has no observable effect; devices are independent.
    pub fn register(&mut self, id: DeviceId) {
        self.devices.push(id);
    }

    /// Ask every registered device to catch up to `time`.
    pub fn sync(&self, time: EmuTime, devices: &mut [Box<dyn MSXDevice>]) {
        for id in &self.devices {
            if let Some(sound) = devices[id.0].as_sound_device() {
                sound.update_stream(time);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSound {
        syncs: u32,
    }

    impl MSXDevice for CountingSound {
        fn name(&self) -> &str {
            "counting-sound"
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }

        fn as_sound_device(&mut self) -> Option<&mut dyn SoundDevice> {
            Some(self)
        }
    }

    impl SoundDevice for CountingSound {
        fn sample_rate(&self) -> u32 {
            44_100
        }

        fn update_stream(&mut self, _time: EmuTime) {
            self.syncs += 1;
        }
    }

    #[test]
    fn sync_reaches_every_registered_device() {
        let mut devices: Vec<Box<dyn MSXDevice>> = vec![Box::new(CountingSound { syncs: 0 })];
        let mut mixer = SoundMixer::new();
        mixer.register(DeviceId(0));
        mixer.sync(EmuTime::ZERO, &mut devices);
        mixer.sync(EmuTime::ZERO, &mut devices);
        let sound = devices[0].as_any_mut().downcast_ref::<CountingSound>().unwrap();
        assert_eq!(sound.syncs, 2);
    }

    #[test]
    fn unregistered_devices_are_left_alone() {
        let mut devices: Vec<Box<dyn MSXDevice>> = vec![Box::new(CountingSound { syncs: 0 })];
        let mixer = SoundMixer::new();
        mixer.sync(EmuTime::ZERO, &mut devices);
        let sound = devices[0].as_any_mut().downcast_ref::<CountingSound>().unwrap();
        assert_eq!(sound.syncs, 0);
    }
}
