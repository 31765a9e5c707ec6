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

use spillway_common_storage_queue::QueueConfig;

pub const DEFAULT_MAX_INMEMORY_BLOCKS: usize = 100;

/// In-memory blocks are pushed to disk once no reader has taken one for this
/// long.
pub const DEFAULT_STALE_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// How long readers keep draining after [`FastQueue::unblock_all_readers`].
///
/// [`FastQueue::unblock_all_readers`]: crate::FastQueue::unblock_all_readers
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct FastQueueConfig {
    /// Directory of the on-disk tier. Overrides `store.base_path`.
    pub path:                 PathBuf,
    /// Overrides `store.name`.
    pub name:                 String,
    /// Capacity of the in-memory tier. Zero sends every block to disk.
    pub max_inmemory_blocks:  usize,
    /// Overrides `store.max_pending_bytes`. Zero means unbounded.
    pub max_pending_bytes:    u64,
    pub stale_flush_interval: Duration,
    pub stop_grace_period:    Duration,
    /// Remaining on-disk tier settings.
    pub store:                QueueConfig,
}

impl Default for FastQueueConfig {
    fn default() -> Self {
        Self {
            path:                 PathBuf::from("./queue_data"),
            name:                 String::new(),
            max_inmemory_blocks:  DEFAULT_MAX_INMEMORY_BLOCKS,
            max_pending_bytes:    0,
            stale_flush_interval: DEFAULT_STALE_FLUSH_INTERVAL,
            stop_grace_period:    DEFAULT_STOP_GRACE_PERIOD,
            store:                QueueConfig::default(),
        }
    }
}

impl FastQueueConfig {
    /// Settings for the on-disk tier with the queue-level overrides applied.
    #[must_use]
    pub fn store_config(&self) -> QueueConfig {
        QueueConfig {
            base_path: self.path.clone(),
            name: self.name.clone(),
            max_pending_bytes: self.max_pending_bytes,
            ..self.store.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use spillway_common_storage_queue::FlushMode;

    use super::*;

    #[test]
    fn test_store_config_applies_overrides() {
        let config = FastQueueConfig {
            path: PathBuf::from("/data/q1"),
            name: "q1".to_string(),
            max_pending_bytes: 4096,
            store: QueueConfig {
                base_path: PathBuf::from("/elsewhere"),
                name: "other".to_string(),
                max_pending_bytes: 1,
                flush_mode: FlushMode::Sync,
                ..QueueConfig::default()
            },
            ..FastQueueConfig::default()
        };

        let store = config.store_config();
        assert_eq!(store.base_path, PathBuf::from("/data/q1"));
        assert_eq!(store.name, "q1");
        assert_eq!(store.max_pending_bytes, 4096);
        assert_eq!(store.flush_mode, FlushMode::Sync);
    }
}
