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

use std::sync::LazyLock;

use prometheus::{IntCounter, IntCounterVec, register_int_counter_vec};

pub const PATH_LABEL: &str = "path";

pub static BYTES_WRITTEN: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "persistentqueue_bytes_written_total",
        "Payload bytes appended to persistent queues",
        &[PATH_LABEL]
    )
    .unwrap()
});

pub static BLOCKS_WRITTEN: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "persistentqueue_blocks_written_total",
        "Blocks appended to persistent queues",
        &[PATH_LABEL]
    )
    .unwrap()
});

pub static BYTES_READ: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "persistentqueue_bytes_read_total",
        "Payload bytes read from persistent queues",
        &[PATH_LABEL]
    )
    .unwrap()
});

pub static BLOCKS_READ: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "persistentqueue_blocks_read_total",
        "Blocks read from persistent queues",
        &[PATH_LABEL]
    )
    .unwrap()
});

pub static BYTES_DROPPED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "persistentqueue_bytes_dropped_total",
        "Unread payload bytes dropped because the queue exceeded its size limit",
        &[PATH_LABEL]
    )
    .unwrap()
});

pub static BLOCKS_DROPPED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "persistentqueue_blocks_dropped_total",
        "Unread blocks dropped because the queue exceeded its size limit",
        &[PATH_LABEL]
    )
    .unwrap()
});

/// Counters of one queue, resolved once at open.
#[derive(Clone)]
pub(crate) struct QueueMetrics {
    pub bytes_written:  IntCounter,
    pub blocks_written: IntCounter,
    pub bytes_read:     IntCounter,
    pub blocks_read:    IntCounter,
    pub bytes_dropped:  IntCounter,
    pub blocks_dropped: IntCounter,
}

impl QueueMetrics {
    pub fn for_path(path: &str) -> Self {
        Self {
            bytes_written:  BYTES_WRITTEN.with_label_values(&[path]),
            blocks_written: BLOCKS_WRITTEN.with_label_values(&[path]),
            bytes_read:     BYTES_READ.with_label_values(&[path]),
            blocks_read:    BLOCKS_READ.with_label_values(&[path]),
            bytes_dropped:  BYTES_DROPPED.with_label_values(&[path]),
            blocks_dropped: BLOCKS_DROPPED.with_label_values(&[path]),
        }
    }
}
