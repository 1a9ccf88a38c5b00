// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! The two savestate/replay archive formats: a compact binary "Mem" archive
//! for rewind snapshots, and a self-describing XML archive for files a user
//! saves to disk. Both walk the same `serde::Serialize`/`Deserialize` impls;
//! nothing device-level needs to know which one is in use.

use thiserror::Error;

/// Current archive format version. Bumped whenever a breaking change is
/// made to a serialized type's shape; `check_version` is called by readers
/// before trusting the rest of an archive's contents.
pub const ARCHIVE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("binary archive is corrupt: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("xml archive is malformed: {0}")]
    Xml(#[from] quick_xml::de::DeError),
    #[error("xml archive could not be written: {0}")]
    XmlWrite(#[from] quick_xml::se::SeError),
    #[error("archive version {found} is newer than the {supported} this build understands")]
    FutureVersion { found: u32, supported: u32 },
    #[error("serialized device state length mismatch: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("archive device count mismatch: machine has {expected} devices, archive has {found}")]
    DeviceCountMismatch { expected: usize, found: usize },
}

/// Reject an archive from a newer, incompatible version. Older versions are
/// accepted; a real migration path would live here once `ARCHIVE_VERSION` is
/// bumped for the first time, but no prior version exists yet to migrate
/// from (see the Open Question resolution in DESIGN.md).
pub fn check_version(found: u32) -> Result<(), SerializationError> {
    if found > ARCHIVE_VERSION {
        Err(SerializationError::FutureVersion {
            found,
            supported: ARCHIVE_VERSION,
        })
    } else {
        Ok(())
    }
}

/// Serialize an object into a Mem archive, loadable with [deserialize].
/// It is (optionally zstd-compressed) bincode, used for rewind snapshots
/// where speed and size matter far more than human-readability.
pub fn serialize<T: serde::Serialize>(thing: &T, with_zstd: bool) -> Result<Vec<u8>, SerializationError> {
    if with_zstd {
        let mut dest = vec![];
        let mut writer = zstd::stream::Encoder::new(&mut dest, 3)?;
        bincode::serialize_into(&mut writer, thing)?;
        writer.finish()?;
        Ok(dest)
    } else {
        Ok(bincode::serialize(thing)?)
    }
}

/// Deserialize an object that was made with [serialize].
pub fn deserialize<T: serde::de::DeserializeOwned>(
    state: &[u8],
    with_zstd: bool,
) -> Result<T, SerializationError> {
    if with_zstd {
        let decoder = zstd::stream::Decoder::new(state)?;
        Ok(bincode::deserialize_from(decoder)?)
    } else {
        Ok(bincode::deserialize(state)?)
    }
}

/// Serialize an object into a self-describing XML archive, the format used
/// for on-disk savestates and replay files a user might inspect or hand-edit.
pub fn to_xml<T: serde::Serialize>(thing: &T) -> Result<String, SerializationError> {
    Ok(quick_xml::se::to_string(thing)?)
}

/// Deserialize an object that was made with [to_xml].
pub fn from_xml<T: serde::de::DeserializeOwned>(xml: &str) -> Result<T, SerializationError> {
    Ok(quick_xml::de::from_str(xml)?)
}

/// Which archive format a snapshot uses. `ReverseManager` stores its
/// periodic snapshots with [serialize]/[deserialize] (the `Mem` kind); a
/// savestate or replay file explicitly saved by the user uses `Xml`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    Mem,
    Xml,
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        a: u32,
        b: String,
        c: Vec<u8>,
    }

    fn sample() -> Sample {
        Sample {
            a: 42,
            b: "hello".into(),
            c: vec![1, 2, 3, 4, 5],
        }
    }

    #[test]
    fn mem_roundtrip_uncompressed() {
        let s = sample();
        let bytes = serialize(&s, false).unwrap();
        let back: Sample = deserialize(&bytes, false).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn mem_roundtrip_compressed() {
        let s = sample();
        let bytes = serialize(&s, true).unwrap();
        let back: Sample = deserialize(&bytes, true).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn xml_roundtrip() {
        let s = sample();
        let xml = to_xml(&s).unwrap();
        let back: Sample = from_xml(&xml).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn rejects_future_version() {
        assert!(check_version(ARCHIVE_VERSION).is_ok());
        assert!(check_version(ARCHIVE_VERSION + 1).is_err());
    }
}
