// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Dual-slot manifest persistence.
//!
//! Each write goes to the slot not named by `manifest.current` and is
//! synced. Only then is `manifest.current` replaced, by renaming a synced
//! temporary file over it and syncing the directory. A crash at any point
//! leaves at least one complete slot behind.
//!
//! Every manifest carries a sequence number. If `manifest.current` is
//! missing, damaged, or names a slot that does not decode, the newest slot
//! that does decode wins.

use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{QueueError, Result, error::ManifestCorruptedSnafu, manifest::Manifest};

const MANIFEST_1: &str = "manifest.1";
const MANIFEST_2: &str = "manifest.2";
const MANIFEST_CURRENT: &str = "manifest.current";
const MANIFEST_CURRENT_TMP: &str = "manifest.current.tmp";

pub(crate) struct ManifestWriter {
    base_path:    PathBuf,
    /// Slot holding the latest manifest; 0 before the first write.
    current_slot: u8,
    /// Sequence of the latest manifest.
    sequence:     u64,
}

enum Pointer {
    Missing,
    Invalid(Vec<u8>),
    Slot(u8),
}

enum Slot {
    Missing,
    Damaged(String),
    Valid(Manifest),
}

impl ManifestWriter {
    /// Writer for a directory without a manifest. Call
    /// [`Self::read_latest`] before writing into one that has.
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path:    base_path.as_ref().to_path_buf(),
            current_slot: 0,
            sequence:     0,
        }
    }

    /// Persist `manifest`, stamping it with the next sequence number.
    pub fn write(&mut self, manifest: &mut Manifest) -> Result<()> {
        let next_slot = if self.current_slot == 1 { 2 } else { 1 };
        manifest.sequence = self.sequence + 1;
        let manifest_path = self.slot_path(next_slot);

        write_synced(&manifest_path, &manifest.serialize())?;
        self.write_pointer(next_slot)?;
        self.current_slot = next_slot;
        self.sequence = manifest.sequence;

        debug!(
            slot = next_slot,
            sequence = manifest.sequence,
            path = ?manifest_path,
            "Manifest written"
        );
        Ok(())
    }

    /// Load the latest manifest and continue from it.
    ///
    /// `Ok(None)` when no manifest was ever written here. Fails with
    /// [`QueueError::ManifestCorrupted`] only when manifest files exist but
    /// none of them decodes. I/O errors are returned as they are.
    pub fn read_latest(&mut self) -> Result<Option<Manifest>> {
        let pointer = self.read_pointer()?;
        match &pointer {
            Pointer::Slot(slot) => match self.read_slot(*slot)? {
                Slot::Valid(manifest) => return Ok(Some(self.adopt(*slot, manifest))),
                Slot::Missing => warn!(
                    path = ?self.base_path,
                    slot,
                    "Manifest slot named by {MANIFEST_CURRENT} is missing"
                ),
                Slot::Damaged(reason) => warn!(
                    path = ?self.base_path,
                    slot,
                    %reason,
                    "Manifest slot named by {MANIFEST_CURRENT} is damaged"
                ),
            },
            Pointer::Invalid(bytes) => warn!(
                path = ?self.base_path,
                contents = ?bytes,
                "{MANIFEST_CURRENT} is damaged"
            ),
            Pointer::Missing => {}
        }

        let mut newest: Option<(u8, Manifest)> = None;
        let mut damaged = Vec::new();
        for slot in [1, 2] {
            match self.read_slot(slot)? {
                Slot::Valid(manifest) => {
                    if newest
                        .as_ref()
                        .is_none_or(|(_, best)| manifest.sequence > best.sequence)
                    {
                        newest = Some((slot, manifest));
                    }
                }
                Slot::Damaged(reason) => damaged.push(format!("manifest.{slot}: {reason}")),
                Slot::Missing => {}
            }
        }

        match newest {
            Some((slot, manifest)) => {
                warn!(
                    path = ?self.base_path,
                    slot,
                    sequence = manifest.sequence,
                    "Recovered manifest from the newest readable slot"
                );
                Ok(Some(self.adopt(slot, manifest)))
            }
            None if damaged.is_empty() && matches!(pointer, Pointer::Missing) => Ok(None),
            None => ManifestCorruptedSnafu {
                reason: if damaged.is_empty() {
                    format!("{MANIFEST_CURRENT} exists but no manifest slot does")
                } else {
                    format!("no readable manifest slot ({})", damaged.join("; "))
                },
            }
            .fail(),
        }
    }

    fn adopt(&mut self, slot: u8, manifest: Manifest) -> Manifest {
        self.current_slot = slot;
        self.sequence = manifest.sequence;
        manifest
    }

    fn read_pointer(&self) -> Result<Pointer> {
        match fs::read(self.base_path.join(MANIFEST_CURRENT)) {
            Ok(bytes) => Ok(match bytes.as_slice() {
                [slot @ (1 | 2)] => Pointer::Slot(*slot),
                _ => Pointer::Invalid(bytes),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Pointer::Missing),
            Err(e) => Err(e.into()),
        }
    }

    fn read_slot(&self, slot: u8) -> Result<Slot> {
        let bytes = match fs::read(self.slot_path(slot)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Slot::Missing),
            Err(e) => return Err(e.into()),
        };
        match Manifest::deserialize(&bytes) {
            Ok(manifest) => Ok(Slot::Valid(manifest)),
            Err(QueueError::ManifestCorrupted { reason }) => Ok(Slot::Damaged(reason)),
            Err(e) => Err(e),
        }
    }

    fn write_pointer(&self, slot: u8) -> Result<()> {
        let tmp_path = self.base_path.join(MANIFEST_CURRENT_TMP);
        write_synced(&tmp_path, &[slot])?;
        fs::rename(&tmp_path, self.base_path.join(MANIFEST_CURRENT))?;
        File::open(&self.base_path)?.sync_all()?;
        Ok(())
    }

    fn slot_path(&self, slot: u8) -> PathBuf {
        match slot {
            1 => self.base_path.join(MANIFEST_1),
            _ => self.base_path.join(MANIFEST_2),
        }
    }
}

fn write_synced(path: &Path, data: &[u8]) -> Result<()> {
    let mut file: File = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}
