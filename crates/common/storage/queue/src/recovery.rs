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

//! Rebuilding queue state on open.
//!
//! 1. Read the latest manifest, falling back to the newest readable slot
//!    when `manifest.current` is damaged. A missing manifest means a fresh
//!    queue. When no slot decodes, or the manifest names another queue, the
//!    directory contents are discarded and the queue starts fresh. I/O
//!    errors fail the open and leave the directory untouched.
//! 2. Drop sealed segments whose files are gone.
//! 3. Scan the active segment forward from the recorded write position to
//!    pick up blocks appended after the last manifest write.
//! 4. Hand segment files the manifest does not know about to the remover.

use std::{collections::VecDeque, fs};

use snafu::ensure;
use spillway_common_fs::DirRemover;
use tracing::{debug, error, info, warn};

use crate::{
    QueueConfig, QueueError, Result,
    error::ManifestCorruptedSnafu,
    file::SegmentFile,
    manifest::{Manifest, ReaderState, SegmentState},
    manifest_writer::ManifestWriter,
    path::{scan_segment_files, segment_path},
    record::record_size,
};

pub(crate) struct RecoveredState {
    pub manifest_writer: ManifestWriter,
    pub sealed:          VecDeque<SegmentState>,
    pub active:          SegmentState,
    pub active_file:     SegmentFile,
    pub reader:          ReaderState,
}

impl RecoveredState {
    /// Unread `(payload bytes, blocks)`.
    pub fn pending(&self) -> (u64, u64) {
        let (bytes, blocks) = self
            .sealed
            .iter()
            .chain(std::iter::once(&self.active))
            .fold((0, 0), |(bytes, blocks), s| {
                (bytes + s.payload_bytes, blocks + s.block_count)
            });
        (
            bytes - self.reader.payload_read,
            blocks - self.reader.blocks_read,
        )
    }
}

pub(crate) fn recover(config: &QueueConfig, remover: &DirRemover) -> Result<RecoveredState> {
    info!(path = ?config.base_path, name = %config.name, "Starting queue recovery");
    fs::create_dir_all(&config.base_path)?;

    let mut manifest_writer = ManifestWriter::new(&config.base_path);
    let manifest = match manifest_writer.read_latest() {
        Ok(Some(manifest)) if manifest.name == config.name => Some(manifest),
        Ok(Some(manifest)) => {
            error!(
                path = ?config.base_path,
                found = %manifest.name,
                expected = %config.name,
                "Manifest belongs to another queue, discarding queue contents"
            );
            return start_over(config, remover);
        }
        Ok(None) => None,
        Err(e @ QueueError::ManifestCorrupted { .. }) => {
            error!(path = ?config.base_path, error = %e, "No readable manifest, discarding queue contents");
            return start_over(config, remover);
        }
        Err(e) => return Err(e),
    };

    let state = match manifest {
        None => {
            info!("No manifest found, starting fresh");
            fresh_state(config, manifest_writer)?
        }
        Some(manifest) => match recover_from_manifest(config, manifest, manifest_writer) {
            Ok(state) => state,
            Err(e @ QueueError::ManifestCorrupted { .. }) => {
                error!(path = ?config.base_path, error = %e, "Inconsistent manifest, discarding queue contents");
                return start_over(config, remover);
            }
            Err(e) => return Err(e),
        },
    };

    remove_orphans(config, remover, &state)?;
    Ok(state)
}

fn start_over(config: &QueueConfig, remover: &DirRemover) -> Result<RecoveredState> {
    for entry in fs::read_dir(&config.base_path)? {
        remover.remove_all(entry?.path());
    }
    fresh_state(config, ManifestWriter::new(&config.base_path))
}

fn fresh_state(config: &QueueConfig, manifest_writer: ManifestWriter) -> Result<RecoveredState> {
    let active = SegmentState::starting_at(0);
    let active_file =
        SegmentFile::create(segment_path(&config.base_path, 0), config.file_size)?;
    Ok(RecoveredState {
        manifest_writer,
        sealed: VecDeque::new(),
        active,
        active_file,
        reader: ReaderState::default(),
    })
}

fn check_consistency(manifest: &Manifest) -> Result<()> {
    let mut expected_start = manifest.segments.first().map(|s| s.start_offset);
    for segment in manifest.segments.iter().chain(std::iter::once(&manifest.active)) {
        ensure!(
            expected_start.is_none_or(|start| start == segment.start_offset),
            ManifestCorruptedSnafu {
                reason: format!("segment at {:#x} is not contiguous", segment.start_offset),
            }
        );
        ensure!(
            segment.payload_bytes + segment.block_count * record_size(0) == segment.end_position,
            ManifestCorruptedSnafu {
                reason: format!("segment at {:#x} has inconsistent sizes", segment.start_offset),
            }
        );
        expected_start = Some(segment.end_offset());
    }

    let head = manifest.segments.first().unwrap_or(&manifest.active);
    let reader = &manifest.reader;
    ensure!(
        reader.segment_offset == head.start_offset
            && reader.position <= head.end_position
            && reader.blocks_read <= head.block_count
            && reader.payload_read <= head.payload_bytes,
        ManifestCorruptedSnafu {
            reason: format!("reader state {reader:?} does not fit head segment {head:?}"),
        }
    );
    Ok(())
}

fn recover_from_manifest(
    config: &QueueConfig,
    manifest: Manifest,
    manifest_writer: ManifestWriter,
) -> Result<RecoveredState> {
    check_consistency(&manifest)?;
    let Manifest {
        mut reader,
        mut active,
        segments,
        ..
    } = manifest;

    let mut sealed = VecDeque::with_capacity(segments.len());
    for segment in segments {
        let path = segment_path(&config.base_path, segment.start_offset);
        if path.exists() {
            sealed.push_back(segment);
            continue;
        }
        let (lost_blocks, lost_bytes) = if reader.segment_offset == segment.start_offset {
            (
                segment.block_count - reader.blocks_read,
                segment.payload_bytes - reader.payload_read,
            )
        } else {
            (segment.block_count, segment.payload_bytes)
        };
        warn!(path = ?path, lost_blocks, lost_bytes, "Sealed segment is missing");
    }

    let active_path = segment_path(&config.base_path, active.start_offset);
    let active_found = active_path.exists();
    let active_file = if active_found {
        let file = SegmentFile::open(&active_path)?;
        ensure!(
            active.end_position <= file.capacity(),
            ManifestCorruptedSnafu {
                reason: format!(
                    "write position {} is past the end of {}",
                    active.end_position,
                    active_path.display()
                ),
            }
        );
        scan_tail(&file, &mut active, config.verify_on_startup)?;
        file
    } else {
        if active.block_count > 0 {
            warn!(
                path = ?active_path,
                lost_blocks = active.block_count,
                lost_bytes = active.payload_bytes,
                "Active segment is missing"
            );
        }
        active = SegmentState::starting_at(active.start_offset);
        SegmentFile::create(&active_path, config.file_size)?
    };

    let head_offset = sealed.front().map_or(active.start_offset, |s| s.start_offset);
    let reader_lost_active = !active_found && reader.segment_offset == active.start_offset;
    if reader.segment_offset != head_offset || reader_lost_active {
        reader = ReaderState {
            segment_offset: head_offset,
            ..ReaderState::default()
        };
    }

    let state = RecoveredState {
        manifest_writer,
        sealed,
        active,
        active_file,
        reader,
    };
    let (pending_bytes, pending_blocks) = state.pending();
    info!(
        segments = state.sealed.len() + 1,
        write_offset = state.active.end_offset(),
        pending_bytes,
        pending_blocks,
        "Recovery from manifest complete"
    );
    Ok(state)
}

/// Extend `active` over records written after the manifest was saved.
fn scan_tail(file: &SegmentFile, active: &mut SegmentState, verify_crc: bool) -> Result<()> {
    let start = active.end_position;
    while let Some(length) = file.peek_record(active.end_position, verify_crc)? {
        active.end_position += record_size(length as usize);
        active.block_count += 1;
        active.payload_bytes += u64::from(length);
    }

    if active.end_position > start {
        debug!(
            path = ?file.path(),
            from = start,
            to = active.end_position,
            "Recovered blocks written after the last manifest"
        );
    }
    Ok(())
}

fn remove_orphans(config: &QueueConfig, remover: &DirRemover, state: &RecoveredState) -> Result<()> {
    for (offset, path) in scan_segment_files(&config.base_path)? {
        let known = offset == state.active.start_offset
            || state.sealed.iter().any(|s| s.start_offset == offset);
        if !known {
            warn!(path = ?path, "Removing orphaned segment");
            remover.remove_all(&path);
        }
    }
    Ok(())
}
