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

#![allow(clippy::cast_possible_truncation)]

//! Queue metadata persisted next to the segments.
//!
//! ```text
//! Header (32 bytes)
//! ┌───────┬─────────┬───────────────┬──────────┬──────────┐
//! │ magic │ version │ segment count │ checksum │ reserved │
//! │  4B   │   4B    │      4B       │    4B    │   16B    │
//! └───────┴─────────┴───────────────┴──────────┴──────────┘
//! Body (checksummed)
//!   sequence: u64
//!   name_len: u16, name
//!   reader:   segment_offset, position, blocks_read, payload_read   (u64 each)
//!   active:   start_offset, write_position, block_count, payload_bytes
//!   segments: start_offset, end_position, block_count, payload_bytes (× count)
//! ```

use crc32fast::Hasher;
use snafu::ensure;

use crate::{
    Result,
    error::{ManifestCorruptedSnafu, UnsupportedManifestVersionSnafu},
};

pub const MANIFEST_MAGIC: [u8; 4] = *b"SWQM";

pub const MANIFEST_VERSION: u32 = 1;

pub const MANIFEST_HEADER_SIZE: usize = 32;

/// Where the reader stands inside the head segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderState {
    /// Start offset of the segment being read.
    pub segment_offset: u64,
    /// Byte position of the next record within that segment.
    pub position:       u64,
    /// Blocks of that segment already consumed.
    pub blocks_read:    u64,
    /// Payload bytes of that segment already consumed.
    pub payload_read:   u64,
}

/// A segment's extent: where it starts and how much of it is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentState {
    pub start_offset:   u64,
    /// End of the written region; for the active segment, the next write
    /// position.
    pub end_position:   u64,
    pub block_count:    u64,
    pub payload_bytes:  u64,
}

impl SegmentState {
    #[must_use]
    pub const fn starting_at(start_offset: u64) -> Self {
        Self {
            start_offset,
            end_position: 0,
            block_count: 0,
            payload_bytes: 0,
        }
    }

    /// Global offset just past the last written record.
    #[must_use]
    pub const fn end_offset(&self) -> u64 { self.start_offset + self.end_position }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub version:  u32,
    /// Incremented on every write; picks the newer slot when
    /// `manifest.current` cannot be trusted.
    pub sequence: u64,
    pub name:     String,
    pub reader:   ReaderState,
    pub active:   SegmentState,
    /// Sealed segments still holding unread data, oldest first.
    pub segments: Vec<SegmentState>,
}

impl Manifest {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version:  MANIFEST_VERSION,
            sequence: 0,
            name:     name.into(),
            reader:   ReaderState::default(),
            active:   SegmentState::default(),
            segments: Vec::new(),
        }
    }

    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut content = Vec::with_capacity(64 + self.name.len() + self.segments.len() * 32);
        content.extend_from_slice(&self.sequence.to_le_bytes());
        let name = self.name.as_bytes();
        content.extend_from_slice(&(name.len() as u16).to_le_bytes());
        content.extend_from_slice(name);
        for value in [
            self.reader.segment_offset,
            self.reader.position,
            self.reader.blocks_read,
            self.reader.payload_read,
        ] {
            content.extend_from_slice(&value.to_le_bytes());
        }
        write_segment(&self.active, &mut content);
        for segment in &self.segments {
            write_segment(segment, &mut content);
        }

        let mut hasher = Hasher::new();
        hasher.update(&content);
        let checksum = hasher.finalize();

        let mut header = [0u8; MANIFEST_HEADER_SIZE];
        header[0..4].copy_from_slice(&MANIFEST_MAGIC);
        header[4..8].copy_from_slice(&self.version.to_le_bytes());
        header[8..12].copy_from_slice(&(self.segments.len() as u32).to_le_bytes());
        header[12..16].copy_from_slice(&checksum.to_le_bytes());

        let mut result = Vec::with_capacity(MANIFEST_HEADER_SIZE + content.len());
        result.extend_from_slice(&header);
        result.extend(content);
        result
    }

    /// Parse and validate magic, version and checksum.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        ensure!(
            data.len() >= MANIFEST_HEADER_SIZE,
            ManifestCorruptedSnafu {
                reason: format!(
                    "data too short: {} bytes, expected at least {MANIFEST_HEADER_SIZE}",
                    data.len()
                ),
            }
        );

        let mut header = Cursor::new(&data[..MANIFEST_HEADER_SIZE]);
        let magic = header.take(4)?;
        ensure!(
            magic == MANIFEST_MAGIC,
            ManifestCorruptedSnafu {
                reason: format!("invalid magic: {magic:?}"),
            }
        );
        let version = header.u32()?;
        ensure!(
            version == MANIFEST_VERSION,
            UnsupportedManifestVersionSnafu { version }
        );
        let segment_count = header.u32()?;
        let stored_checksum = header.u32()?;

        let content = &data[MANIFEST_HEADER_SIZE..];
        let mut hasher = Hasher::new();
        hasher.update(content);
        let computed_checksum = hasher.finalize();
        ensure!(
            stored_checksum == computed_checksum,
            ManifestCorruptedSnafu {
                reason: format!(
                    "checksum mismatch: stored={stored_checksum:#x}, computed={computed_checksum:#x}"
                ),
            }
        );

        let mut body = Cursor::new(content);
        let sequence = body.u64()?;
        let name_len = body.u16()? as usize;
        let name = String::from_utf8(body.take(name_len)?.to_vec()).map_err(|e| {
            ManifestCorruptedSnafu {
                reason: format!("queue name is not utf-8: {e}"),
            }
            .build()
        })?;
        let reader = ReaderState {
            segment_offset: body.u64()?,
            position:       body.u64()?,
            blocks_read:    body.u64()?,
            payload_read:   body.u64()?,
        };
        let active = read_segment(&mut body)?;
        let segments = (0..segment_count)
            .map(|_| read_segment(&mut body))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            version,
            sequence,
            name,
            reader,
            active,
            segments,
        })
    }
}

fn write_segment(segment: &SegmentState, out: &mut Vec<u8>) {
    for value in [
        segment.start_offset,
        segment.end_position,
        segment.block_count,
        segment.payload_bytes,
    ] {
        out.extend_from_slice(&value.to_le_bytes());
    }
}

fn read_segment(body: &mut Cursor<'_>) -> Result<SegmentState> {
    Ok(SegmentState {
        start_offset:  body.u64()?,
        end_position:  body.u64()?,
        block_count:   body.u64()?,
        payload_bytes: body.u64()?,
    })
}

/// Bounds-checked little-endian reader over the manifest bytes.
struct Cursor<'a> {
    data: &'a [u8],
    pos:  usize,
}

impl<'a> Cursor<'a> {
    const fn new(data: &'a [u8]) -> Self { Self { data, pos: 0 } }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        ensure!(
            end <= self.data.len(),
            ManifestCorruptedSnafu {
                reason: format!("truncated at byte {}", self.pos),
            }
        );
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16> { Ok(u16::from_le_bytes(self.array()?)) }

    fn u32(&mut self) -> Result<u32> { Ok(u32::from_le_bytes(self.array()?)) }

    fn u64(&mut self) -> Result<u64> { Ok(u64::from_le_bytes(self.array()?)) }
}
