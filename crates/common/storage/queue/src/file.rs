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

use std::path::{Path, PathBuf};

use mmap_io::MemoryMappedFile;
use snafu::ensure;

use crate::{
    Result,
    error::{CorruptedMessageSnafu, MmapFailedSnafu},
    record::{RECORD_CRC_SIZE, RECORD_LENGTH_SIZE, record_crc, record_size},
};

fn mmap_error(e: impl std::fmt::Display) -> crate::QueueError {
    MmapFailedSnafu {
        message: e.to_string(),
    }
    .build()
}

/// One pre-allocated, memory-mapped segment.
pub(crate) struct SegmentFile {
    mmap:     MemoryMappedFile,
    path:     PathBuf,
    capacity: u64,
}

impl SegmentFile {
    /// Create (or truncate) a segment of `capacity` zeroed bytes.
    pub fn create<P: AsRef<Path>>(path: P, capacity: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mmap = MemoryMappedFile::create_rw(&path, capacity).map_err(mmap_error)?;
        Ok(Self {
            mmap,
            path,
            capacity,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mmap = MemoryMappedFile::open_rw(&path).map_err(mmap_error)?;
        let capacity = mmap.len();
        Ok(Self {
            mmap,
            path,
            capacity,
        })
    }

    #[inline]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.mmap
            .update_region(offset, data)
            .map_err(mmap_error)
    }

    #[inline]
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.mmap.read_into(offset, buf).map_err(mmap_error)
    }

    pub const fn capacity(&self) -> u64 { self.capacity }

    pub fn path(&self) -> &Path { &self.path }

    pub fn flush(&self) -> Result<()> { self.mmap.flush().map_err(mmap_error) }

    fn read_u32(&self, offset: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_at(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Payload length of the record at `position`, unchecked.
    pub fn record_length(&self, position: u64) -> Result<u32> { self.read_u32(position) }

    /// Read the record at `position`, appending its payload to `dst`.
    ///
    /// `limit` is the end of the written region. Returns the framed size of
    /// the record. `dst` is left untouched on error.
    pub fn read_record(&self, position: u64, limit: u64, dst: &mut Vec<u8>) -> Result<u64> {
        ensure!(
            position + record_size(0) <= limit,
            CorruptedMessageSnafu {
                offset: position,
                path:   self.path.clone(),
            }
        );
        let length = self.read_u32(position)?;
        let size = record_size(length as usize);
        ensure!(
            position + size <= limit,
            CorruptedMessageSnafu {
                offset: position,
                path:   self.path.clone(),
            }
        );

        let start = dst.len();
        dst.resize(start + length as usize, 0);
        let payload_offset = position + RECORD_LENGTH_SIZE as u64;
        let verified = self
            .read_at(payload_offset, &mut dst[start..])
            .and_then(|()| self.read_u32(payload_offset + u64::from(length)))
            .map(|stored| stored == record_crc(length, &dst[start..]));

        match verified {
            Ok(true) => Ok(size),
            Ok(false) => {
                dst.truncate(start);
                CorruptedMessageSnafu {
                    offset: position,
                    path:   self.path.clone(),
                }
                .fail()
            }
            Err(e) => {
                dst.truncate(start);
                Err(e)
            }
        }
    }

    /// Inspect the record at `position` during recovery.
    ///
    /// Returns the payload length, or `None` where the written region ends:
    /// zero fill, a torn tail past the end of the file, or a CRC mismatch.
    /// Zero-length records are always CRC-checked since that is the only way
    /// to tell them from zero fill.
    pub fn peek_record(&self, position: u64, verify_crc: bool) -> Result<Option<u32>> {
        if position + record_size(0) > self.capacity {
            return Ok(None);
        }
        let length = self.read_u32(position)?;
        let size = record_size(length as usize);
        if position + size > self.capacity {
            return Ok(None);
        }
        if length > 0 && !verify_crc {
            return Ok(Some(length));
        }

        let mut payload = vec![0u8; length as usize];
        let payload_offset = position + RECORD_LENGTH_SIZE as u64;
        self.read_at(payload_offset, &mut payload)?;
        let mut crc_buf = [0u8; RECORD_CRC_SIZE];
        self.read_at(payload_offset + u64::from(length), &mut crc_buf)?;

        if u32::from_le_bytes(crc_buf) == record_crc(length, &payload) {
            Ok(Some(length))
        } else {
            Ok(None)
        }
    }
}
