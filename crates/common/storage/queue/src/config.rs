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

use std::{path::PathBuf, time::Duration};

/// Default pre-allocated size of one segment file.
pub const DEFAULT_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Directory holding the segments and the manifest. One queue per
    /// directory.
    pub base_path:         PathBuf,
    /// Queue name stored in the manifest. Opening a directory whose manifest
    /// carries a different name discards its contents.
    pub name:              String,
    /// Pre-allocated size of a segment. Blocks larger than this get a
    /// segment sized to fit.
    pub file_size:         u64,
    pub roll_strategy:     RollStrategy,
    pub flush_mode:        FlushMode,
    /// Upper bound on unread payload bytes; the oldest data is dropped once
    /// exceeded. Zero means unbounded.
    pub max_pending_bytes: u64,
    /// How often the manifest is rewritten while the queue is busy.
    pub manifest_interval: Duration,
    /// Verify the CRC of every record scanned during recovery, not only the
    /// zero-length ones.
    pub verify_on_startup: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_path:         PathBuf::from("./queue_data"),
            name:              String::new(),
            file_size:         DEFAULT_SEGMENT_SIZE,
            roll_strategy:     RollStrategy::BySize(DEFAULT_SEGMENT_SIZE),
            flush_mode:        FlushMode::Async,
            max_pending_bytes: 0,
            manifest_interval: Duration::from_secs(1),
            verify_on_startup: true,
        }
    }
}

/// When the active segment is sealed and a new one started.
///
/// A segment also rolls whenever the next record does not fit into it.
#[derive(Debug, Clone)]
pub enum RollStrategy {
    /// Roll once the segment holds this many framed bytes.
    BySize(u64),
    /// Roll once the segment has been active this long.
    ByTime(Duration),
    /// Roll once the segment holds this many blocks.
    ByCount(u64),
    /// Roll when any of the strategies says so.
    Combined(Vec<RollStrategy>),
}

impl RollStrategy {
    #[must_use]
    pub fn should_roll(&self, current_size: u64, elapsed: Duration, count: u64) -> bool {
        match self {
            Self::BySize(size) => current_size > *size,
            Self::ByTime(duration) => elapsed >= *duration,
            Self::ByCount(max_count) => count > *max_count,
            Self::Combined(strategies) => strategies
                .iter()
                .any(|s| s.should_roll(current_size, elapsed, count)),
        }
    }
}

/// When memory-mapped segment pages are synced to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Leave it to the periodic manifest write and to close.
    Async,
    /// Sync after every block.
    Sync,
    /// Sync once `bytes` have accumulated or `interval` has passed.
    Batch { bytes: usize, interval: Duration },
}

impl FlushMode {
    pub(crate) fn needs_flush(self, unflushed_bytes: usize, since_last_flush: Duration) -> bool {
        match self {
            Self::Async => false,
            Self::Sync => unflushed_bytes > 0,
            Self::Batch { bytes, interval } => {
                unflushed_bytes > 0 && (unflushed_bytes >= bytes || since_last_flush >= interval)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(1000, 0, false ; "at the limit")]
    #[test_case(1001, 0, true ; "past the limit")]
    #[test_case(0, 101, true ; "too many blocks")]
    #[test_case(999, 100, false ; "neither")]
    fn test_roll_combined(size: u64, count: u64, expected: bool) {
        let strategy =
            RollStrategy::Combined(vec![RollStrategy::BySize(1000), RollStrategy::ByCount(100)]);
        assert_eq!(strategy.should_roll(size, Duration::ZERO, count), expected);
    }

    #[test]
    fn test_roll_by_time() {
        let strategy = RollStrategy::ByTime(Duration::from_secs(60));
        assert!(!strategy.should_roll(0, Duration::from_secs(59), 1));
        assert!(strategy.should_roll(0, Duration::from_secs(60), 1));
    }

    #[test]
    fn test_flush_modes() {
        let second = Duration::from_secs(1);
        assert!(!FlushMode::Async.needs_flush(1 << 20, second));
        assert!(FlushMode::Sync.needs_flush(1, Duration::ZERO));
        assert!(!FlushMode::Sync.needs_flush(0, second));

        let batch = FlushMode::Batch {
            bytes:    4096,
            interval: second,
        };
        assert!(!batch.needs_flush(100, Duration::from_millis(10)));
        assert!(batch.needs_flush(4096, Duration::ZERO));
        assert!(batch.needs_flush(100, second));
    }
}
