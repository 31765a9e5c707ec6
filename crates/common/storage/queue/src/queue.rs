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

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    time::Instant,
};

use snafu::ensure;
use spillway_common_fs::DirRemover;
use tracing::{debug, error, info, warn};

use crate::{
    QueueBuilder, QueueConfig, Result,
    error::{BlockTooLargeSnafu, ClosedSnafu, InternalSnafu},
    file::SegmentFile,
    manifest::{MANIFEST_VERSION, Manifest, ReaderState, SegmentState},
    manifest_writer::ManifestWriter,
    metrics::QueueMetrics,
    path::segment_path,
    record::{RECORD_OVERHEAD, encode_record, record_size},
    recovery::{self, RecoveredState},
};

/// A single-reader, single-writer queue of blocks stored in memory-mapped
/// segment files.
///
/// ```text
///   sealed segments (oldest first)              active segment
/// ┌────────────────┬────────────────┐        ┌──────────────────────┐
/// │ 0000...0.data  │ 0000...1000.data│  ...  │ 0000...3000.data     │
/// └────────────────┴────────────────┘        └──────────────────────┘
///      ▲ reader                                  write position ▲
/// ```
///
/// Writes append to the active segment, which is sealed and replaced once it
/// is full or the [`RollStrategy`](crate::RollStrategy) says so. The reader
/// consumes the oldest segment and deletes it, through the
/// [`DirRemover`], once it is exhausted.
///
/// Not thread-safe by itself; callers serialize access.
pub struct SegmentQueue {
    config:              QueueConfig,
    remover:             DirRemover,
    manifest_writer:     ManifestWriter,
    /// Sealed segments still holding unread data, oldest first.
    sealed:              VecDeque<SegmentState>,
    active:              SegmentState,
    active_file:         SegmentFile,
    active_opened_at:    Instant,
    reader:              ReaderState,
    /// Mapping of the sealed head segment while the reader is in it.
    reader_file:         Option<SegmentFile>,
    pending_bytes:       u64,
    pending_blocks:      u64,
    unflushed_bytes:     usize,
    last_flush:          Instant,
    last_manifest_write: Instant,
    write_buf:           Vec<u8>,
    metrics:             QueueMetrics,
    closed:              bool,
}

impl SegmentQueue {
    /// Open or create the queue stored in `path`.
    ///
    /// `max_pending_bytes == 0` leaves the queue unbounded.
    pub fn open<P: Into<PathBuf>>(path: P, name: &str, max_pending_bytes: u64) -> Result<Self> {
        QueueBuilder::new(path)
            .name(name)
            .max_pending_bytes(max_pending_bytes)
            .build()
    }

    pub(crate) fn with_remover(config: QueueConfig, remover: DirRemover) -> Result<Self> {
        ensure!(
            config.file_size >= RECORD_OVERHEAD,
            InternalSnafu {
                message: format!("segment size {} is too small", config.file_size),
            }
        );

        let RecoveredState {
            manifest_writer,
            sealed,
            active,
            active_file,
            reader,
        } = recovery::recover(&config, &remover)?;

        let metrics = QueueMetrics::for_path(&config.base_path.to_string_lossy());
        let now = Instant::now();
        let mut queue = Self {
            config,
            remover,
            manifest_writer,
            sealed,
            active,
            active_file,
            active_opened_at: now,
            reader,
            reader_file: None,
            pending_bytes: 0,
            pending_blocks: 0,
            unflushed_bytes: 0,
            last_flush: now,
            last_manifest_write: now,
            write_buf: Vec::new(),
            metrics,
            closed: false,
        };
        (queue.pending_bytes, queue.pending_blocks) = queue.count_pending();
        queue.write_manifest()?;

        info!(
            path = ?queue.config.base_path,
            name = %queue.config.name,
            pending_bytes = queue.pending_bytes,
            pending_blocks = queue.pending_blocks,
            segments = queue.sealed.len() + 1,
            "Segment queue opened"
        );
        Ok(queue)
    }

    #[must_use]
    pub fn builder<P: Into<PathBuf>>(path: P) -> QueueBuilder { QueueBuilder::new(path) }

    /// Directory holding the queue.
    #[must_use]
    pub fn dir(&self) -> &Path { &self.config.base_path }

    #[must_use]
    pub fn name(&self) -> &str { &self.config.name }

    #[must_use]
    pub const fn config(&self) -> &QueueConfig { &self.config }

    /// Payload bytes written and not yet read or dropped.
    #[must_use]
    pub const fn pending_bytes(&self) -> u64 { self.pending_bytes }

    /// Blocks written and not yet read or dropped. Can be nonzero while
    /// [`Self::pending_bytes`] is zero if only empty blocks are queued.
    #[must_use]
    pub const fn pending_blocks(&self) -> u64 { self.pending_blocks }

    /// Append `block`.
    ///
    /// May drop the oldest unread data when `max_pending_bytes` is exceeded.
    pub fn write_block(&mut self, block: &[u8]) -> Result<()> {
        ensure!(!self.closed, ClosedSnafu);
        let length =
            u32::try_from(block.len()).map_err(|_| BlockTooLargeSnafu { size: block.len() }.build())?;
        let size = record_size(block.len());

        self.prepare_active(size)?;

        self.write_buf.clear();
        encode_record(block, length, &mut self.write_buf);
        self.active_file
            .write_at(self.active.end_position, &self.write_buf)?;

        self.active.end_position += size;
        self.active.block_count += 1;
        self.active.payload_bytes += u64::from(length);
        self.pending_bytes += u64::from(length);
        self.pending_blocks += 1;
        self.unflushed_bytes += self.write_buf.len();
        self.metrics.bytes_written.inc_by(u64::from(length));
        self.metrics.blocks_written.inc();

        if self
            .config
            .flush_mode
            .needs_flush(self.unflushed_bytes, self.last_flush.elapsed())
        {
            self.flush()?;
        }

        self.enforce_capacity()?;
        self.maybe_write_manifest()
    }

    /// Read the next block, appending it to `dst`.
    ///
    /// Returns `false` without touching `dst` when there is nothing to read,
    /// and also when the reader just stepped over a segment boundary. In the
    /// latter case [`Self::pending_blocks`] stays nonzero and the caller
    /// should try again.
    pub fn read_block_nonblocking(&mut self, dst: &mut Vec<u8>) -> Result<bool> {
        ensure!(!self.closed, ClosedSnafu);
        if self.pending_blocks == 0 {
            return Ok(false);
        }

        let size = if let Some(head) = self.sealed.front().copied() {
            if self.reader.position >= head.end_position {
                self.finish_head_segment()?;
                return Ok(false);
            }
            let file = match self.reader_file.take() {
                Some(file) => file,
                None => SegmentFile::open(segment_path(&self.config.base_path, head.start_offset))?,
            };
            let result = file.read_record(self.reader.position, head.end_position, dst);
            self.reader_file = Some(file);
            result?
        } else {
            self.active_file
                .read_record(self.reader.position, self.active.end_position, dst)?
        };

        let length = size - RECORD_OVERHEAD;
        self.advance_reader(size);
        self.metrics.bytes_read.inc_by(length);
        self.metrics.blocks_read.inc();

        self.maybe_write_manifest()?;
        Ok(true)
    }

    /// Reclaim disk space once everything written has been read.
    ///
    /// Deletes exhausted segments and replaces a fully read active segment
    /// with a fresh one. Meant to be called when the reader goes idle.
    pub fn reset_if_empty(&mut self) -> Result<()> {
        if self.closed || self.pending_blocks > 0 {
            return Ok(());
        }

        while !self.sealed.is_empty() {
            self.finish_head_segment()?;
        }
        if self.active.block_count == 0 {
            return Ok(());
        }

        let old = self.active;
        let next_start = old.end_offset();
        self.active_file = SegmentFile::create(
            segment_path(&self.config.base_path, next_start),
            self.config.file_size,
        )?;
        self.active = SegmentState::starting_at(next_start);
        self.active_opened_at = Instant::now();
        self.reader = ReaderState {
            segment_offset: next_start,
            ..ReaderState::default()
        };
        self.unflushed_bytes = 0;
        self.write_manifest()?;
        self.remover
            .remove_all(segment_path(&self.config.base_path, old.start_offset));

        debug!(
            path = ?self.config.base_path,
            next_start,
            "Queue drained, started a fresh segment"
        );
        Ok(())
    }

    /// Sync the active segment to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.active_file.flush()?;
        self.unflushed_bytes = 0;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Flush data and write the final manifest.
    pub fn close(mut self) -> Result<()> { self.shutdown() }

    /// Same as [`Self::close`] for owners that cannot give up the queue by
    /// value. Idempotent. Later writes and reads fail with
    /// [`QueueError::Closed`](crate::QueueError::Closed).
    pub fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.write_manifest()?;
        info!(
            path = ?self.config.base_path,
            pending_bytes = self.pending_bytes,
            "Segment queue closed"
        );
        Ok(())
    }

    fn count_pending(&self) -> (u64, u64) {
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

    fn head_offset(&self) -> u64 {
        self.sealed
            .front()
            .map_or(self.active.start_offset, |s| s.start_offset)
    }

    /// Make room in the active segment for a record of `size` bytes.
    fn prepare_active(&mut self, size: u64) -> Result<()> {
        if self.active.block_count == 0 {
            if self.active_file.capacity() < size {
                // Nothing written yet, so the segment can be resized in place.
                self.active_file = SegmentFile::create(
                    segment_path(&self.config.base_path, self.active.start_offset),
                    size.max(self.config.file_size),
                )?;
            }
            return Ok(());
        }

        let end = self.active.end_position + size;
        let must_roll = end > self.active_file.capacity()
            || self.config.roll_strategy.should_roll(
                end,
                self.active_opened_at.elapsed(),
                self.active.block_count + 1,
            );
        if must_roll {
            self.roll(size)?;
        }
        Ok(())
    }

    /// Seal the active segment and start a new one that fits `size` bytes.
    fn roll(&mut self, size: u64) -> Result<()> {
        self.flush()?;

        let sealed = self.active;
        let next_start = sealed.end_offset();
        let file = SegmentFile::create(
            segment_path(&self.config.base_path, next_start),
            size.max(self.config.file_size),
        )?;
        let previous = std::mem::replace(&mut self.active_file, file);
        if self.sealed.is_empty() {
            // The reader is inside the segment being sealed; keep its mapping.
            self.reader_file = Some(previous);
        }

        self.sealed.push_back(sealed);
        self.active = SegmentState::starting_at(next_start);
        self.active_opened_at = Instant::now();

        debug!(
            path = ?self.config.base_path,
            sealed = sealed.start_offset,
            blocks = sealed.block_count,
            next_start,
            "Rolled to new segment"
        );
        self.write_manifest()
    }

    /// Drop the head segment, which is sealed, and move the reader to the
    /// next one.
    fn finish_head_segment(&mut self) -> Result<()> {
        let Some(head) = self.sealed.pop_front() else {
            return Ok(());
        };
        self.reader_file = None;
        self.reader = ReaderState {
            segment_offset: self.head_offset(),
            ..ReaderState::default()
        };
        self.write_manifest()?;

        let path = segment_path(&self.config.base_path, head.start_offset);
        self.remover.remove_all(&path);
        debug!(path = ?path, "Removed consumed segment");
        Ok(())
    }

    fn advance_reader(&mut self, size: u64) {
        let length = size - RECORD_OVERHEAD;
        self.reader.position += size;
        self.reader.blocks_read += 1;
        self.reader.payload_read += length;
        self.pending_bytes -= length;
        self.pending_blocks -= 1;
    }

    /// Drop the oldest unread data while over `max_pending_bytes`.
    fn enforce_capacity(&mut self) -> Result<()> {
        let max = self.config.max_pending_bytes;
        if max == 0 || self.pending_bytes <= max {
            return Ok(());
        }

        let (mut dropped_bytes, mut dropped_blocks) = (0u64, 0u64);
        while self.pending_bytes > max && self.pending_blocks > 0 {
            if let Some(head) = self.sealed.front().copied() {
                let bytes = head.payload_bytes - self.reader.payload_read;
                let blocks = head.block_count - self.reader.blocks_read;
                self.pending_bytes -= bytes;
                self.pending_blocks -= blocks;
                dropped_bytes += bytes;
                dropped_blocks += blocks;
                self.finish_head_segment()?;
            } else {
                let length = self.active_file.record_length(self.reader.position)?;
                self.advance_reader(record_size(length as usize));
                dropped_bytes += u64::from(length);
                dropped_blocks += 1;
            }
        }

        self.metrics.bytes_dropped.inc_by(dropped_bytes);
        self.metrics.blocks_dropped.inc_by(dropped_blocks);
        warn!(
            path = ?self.config.base_path,
            dropped_bytes,
            dropped_blocks,
            max_pending_bytes = max,
            "Queue is over its size limit, dropped the oldest data"
        );
        Ok(())
    }

    fn maybe_write_manifest(&mut self) -> Result<()> {
        if self.last_manifest_write.elapsed() >= self.config.manifest_interval {
            self.write_manifest()?;
        }
        Ok(())
    }

    /// Persist the current state. The active segment is synced first so the
    /// manifest never points past durable data.
    fn write_manifest(&mut self) -> Result<()> {
        self.flush()?;
        let mut manifest = Manifest {
            version:  MANIFEST_VERSION,
            sequence: 0,
            name:     self.config.name.clone(),
            reader:   self.reader,
            active:   self.active,
            segments: self.sealed.iter().copied().collect(),
        };
        self.manifest_writer.write(&mut manifest)?;
        self.last_manifest_write = Instant::now();
        Ok(())
    }
}

impl Drop for SegmentQueue {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(path = ?self.config.base_path, error = %e, "Failed to close segment queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, time::Duration};

    use tempfile::TempDir;

    use super::*;
    use crate::{FlushMode, RollStrategy, path::scan_segment_files};

    fn small_queue(dir: &Path, file_size: u64, max_pending_bytes: u64) -> SegmentQueue {
        QueueBuilder::new(dir)
            .name("test")
            .file_size(file_size)
            .roll_strategy(RollStrategy::BySize(file_size))
            .max_pending_bytes(max_pending_bytes)
            .build()
            .unwrap()
    }

    fn read_all(queue: &mut SegmentQueue) -> Vec<Vec<u8>> {
        let mut blocks = Vec::new();
        while queue.pending_blocks() > 0 {
            let mut buf = Vec::new();
            if queue.read_block_nonblocking(&mut buf).unwrap() {
                blocks.push(buf);
            }
        }
        blocks
    }

    fn segment_count(dir: &Path) -> usize { scan_segment_files(dir).unwrap().len() }

    #[test]
    fn test_write_then_read_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let mut queue = small_queue(temp_dir.path(), 4096, 0);

        for i in 0..10 {
            queue.write_block(format!("block-{i}").as_bytes()).unwrap();
        }
        assert_eq!(queue.pending_bytes(), 70);
        assert_eq!(queue.pending_blocks(), 10);

        let blocks = read_all(&mut queue);
        let expected: Vec<Vec<u8>> = (0..10).map(|i| format!("block-{i}").into_bytes()).collect();
        assert_eq!(blocks, expected);
        assert_eq!(queue.pending_bytes(), 0);

        let mut buf = Vec::new();
        assert!(!queue.read_block_nonblocking(&mut buf).unwrap());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_read_appends_to_dst() {
        let temp_dir = TempDir::new().unwrap();
        let mut queue = small_queue(temp_dir.path(), 4096, 0);
        queue.write_block(b"bar").unwrap();

        let mut dst = b"foo".to_vec();
        assert!(queue.read_block_nonblocking(&mut dst).unwrap());
        assert_eq!(dst, b"foobar");
    }

    #[test]
    fn test_empty_blocks_are_counted() {
        let temp_dir = TempDir::new().unwrap();
        let mut queue = small_queue(temp_dir.path(), 4096, 0);
        queue.write_block(b"").unwrap();
        queue.write_block(b"x").unwrap();

        assert_eq!(queue.pending_bytes(), 1);
        assert_eq!(queue.pending_blocks(), 2);
        assert_eq!(read_all(&mut queue), vec![Vec::new(), b"x".to_vec()]);
    }

    #[test]
    fn test_segments_roll_and_are_removed_after_reading() {
        let temp_dir = TempDir::new().unwrap();
        // 3 records of 40 + 8 bytes per segment.
        let mut queue = small_queue(temp_dir.path(), 150, 0);
        let block = [7u8; 40];
        for _ in 0..7 {
            queue.write_block(&block).unwrap();
        }
        assert_eq!(segment_count(temp_dir.path()), 3);

        let mut boundaries = 0;
        let mut read = 0;
        while queue.pending_blocks() > 0 {
            let mut buf = Vec::new();
            if queue.read_block_nonblocking(&mut buf).unwrap() {
                assert_eq!(buf, block);
                read += 1;
            } else {
                boundaries += 1;
            }
        }
        assert_eq!(read, 7);
        assert_eq!(boundaries, 2);
        assert_eq!(segment_count(temp_dir.path()), 1);
    }

    #[test]
    fn test_oversized_block_gets_own_segment() {
        let temp_dir = TempDir::new().unwrap();
        let mut queue = small_queue(temp_dir.path(), 64, 0);
        let big = vec![1u8; 500];

        queue.write_block(b"small").unwrap();
        queue.write_block(&big).unwrap();
        queue.write_block(&big).unwrap();

        let blocks = read_all(&mut queue);
        assert_eq!(blocks, vec![b"small".to_vec(), big.clone(), big]);
    }

    #[test]
    fn test_roll_by_count() {
        let temp_dir = TempDir::new().unwrap();
        let mut queue = QueueBuilder::new(temp_dir.path())
            .name("test")
            .file_size(4096)
            .roll_strategy(RollStrategy::ByCount(2))
            .build()
            .unwrap();
        for i in 0..5u8 {
            queue.write_block(&[i]).unwrap();
        }
        assert_eq!(segment_count(temp_dir.path()), 3);
    }

    #[test]
    fn test_reopen_keeps_unread_data() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut queue = small_queue(temp_dir.path(), 150, 0);
            for i in 0..6u8 {
                queue.write_block(&[i; 40]).unwrap();
            }
            let mut buf = Vec::new();
            assert!(queue.read_block_nonblocking(&mut buf).unwrap());
            queue.close().unwrap();
        }

        let mut queue = small_queue(temp_dir.path(), 150, 0);
        assert_eq!(queue.pending_bytes(), 200);
        let blocks = read_all(&mut queue);
        let expected: Vec<Vec<u8>> = (1..6u8).map(|i| vec![i; 40]).collect();
        assert_eq!(blocks, expected);
    }

    #[test]
    fn test_reopen_after_drop_without_close() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut queue = small_queue(temp_dir.path(), 4096, 0);
            queue.write_block(b"survives").unwrap();
        }
        let mut queue = small_queue(temp_dir.path(), 4096, 0);
        assert_eq!(read_all(&mut queue), vec![b"survives".to_vec()]);
    }

    #[test]
    fn test_capacity_drops_oldest_segment() {
        let temp_dir = TempDir::new().unwrap();
        let mut queue = small_queue(temp_dir.path(), 150, 200);
        for i in 0..7u8 {
            queue.write_block(&[i; 40]).unwrap();
        }

        assert!(queue.pending_bytes() <= 200);
        let blocks = read_all(&mut queue);
        assert_eq!(blocks.last().unwrap(), &vec![6u8; 40]);
        // Whole sealed segments go first, so what survives is a suffix.
        let first = blocks[0][0];
        let expected: Vec<Vec<u8>> = (first..7u8).map(|i| vec![i; 40]).collect();
        assert_eq!(blocks, expected);
    }

    #[test]
    fn test_capacity_skips_blocks_in_active_segment() {
        let temp_dir = TempDir::new().unwrap();
        let mut queue = small_queue(temp_dir.path(), 4096, 10);
        for i in 0..5u8 {
            queue.write_block(&[i; 4]).unwrap();
        }

        assert_eq!(queue.pending_bytes(), 8);
        assert_eq!(read_all(&mut queue), vec![vec![3u8; 4], vec![4u8; 4]]);
    }

    #[test]
    fn test_reset_if_empty_starts_fresh_segment() {
        let temp_dir = TempDir::new().unwrap();
        let mut queue = small_queue(temp_dir.path(), 4096, 0);
        queue.write_block(b"abc").unwrap();

        // Unread data blocks the reset.
        queue.reset_if_empty().unwrap();
        assert!(segment_path(temp_dir.path(), 0).exists());

        read_all(&mut queue);
        queue.reset_if_empty().unwrap();

        assert!(!segment_path(temp_dir.path(), 0).exists());
        assert!(segment_path(temp_dir.path(), 11).exists());
        assert_eq!(segment_count(temp_dir.path()), 1);

        queue.write_block(b"after").unwrap();
        assert_eq!(read_all(&mut queue), vec![b"after".to_vec()]);
    }

    #[test]
    fn test_reset_if_empty_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut queue = small_queue(temp_dir.path(), 4096, 0);
            queue.write_block(b"abc").unwrap();
            read_all(&mut queue);
            queue.reset_if_empty().unwrap();
            queue.write_block(b"def").unwrap();
        }
        let mut queue = small_queue(temp_dir.path(), 4096, 0);
        assert_eq!(read_all(&mut queue), vec![b"def".to_vec()]);
    }

    #[test]
    fn test_sync_flush_mode_and_periodic_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let mut queue = QueueBuilder::new(temp_dir.path())
            .name("test")
            .file_size(4096)
            .flush_mode(FlushMode::Sync)
            .manifest_interval(Duration::ZERO)
            .build()
            .unwrap();
        queue.write_block(b"synced").unwrap();
        assert_eq!(queue.unflushed_bytes, 0);

        let manifest = queue.manifest_writer.read_latest().unwrap().unwrap();
        assert_eq!(manifest.active.block_count, 1);
    }

    #[test]
    fn test_closed_queue_rejects_io() {
        let temp_dir = TempDir::new().unwrap();
        let mut queue = small_queue(temp_dir.path(), 4096, 0);
        queue.shutdown().unwrap();

        assert!(queue.write_block(b"late").is_err());
        assert!(queue.read_block_nonblocking(&mut Vec::new()).is_err());
    }

    #[test]
    fn test_open_wrong_name_discards_contents() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut queue = SegmentQueue::open(temp_dir.path(), "first", 0).unwrap();
            queue.write_block(b"data").unwrap();
        }
        let queue = SegmentQueue::open(temp_dir.path(), "second", 0).unwrap();
        assert_eq!(queue.pending_blocks(), 0);
        assert!(!temp_dir.path().join("manifest.2").exists());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 3);
    }
}
