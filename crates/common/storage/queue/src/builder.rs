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

use spillway_common_fs::DirRemover;

use crate::{FlushMode, QueueConfig, Result, RollStrategy, SegmentQueue};

pub struct QueueBuilder {
    config:  QueueConfig,
    remover: Option<DirRemover>,
}

impl QueueBuilder {
    pub fn new<P: Into<PathBuf>>(base_path: P) -> Self {
        Self {
            config:  QueueConfig {
                base_path: base_path.into(),
                ..Default::default()
            },
            remover: None,
        }
    }

    /// Start from a complete config.
    #[must_use]
    pub const fn from_config(config: QueueConfig) -> Self {
        Self {
            config,
            remover: None,
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    #[must_use]
    pub const fn file_size(mut self, size: u64) -> Self {
        self.config.file_size = size;
        self
    }

    #[must_use]
    pub fn roll_strategy(mut self, strategy: RollStrategy) -> Self {
        self.config.roll_strategy = strategy;
        self
    }

    #[must_use]
    pub const fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.config.flush_mode = mode;
        self
    }

    #[must_use]
    pub const fn max_pending_bytes(mut self, max: u64) -> Self {
        self.config.max_pending_bytes = max;
        self
    }

    #[must_use]
    pub const fn manifest_interval(mut self, interval: Duration) -> Self {
        self.config.manifest_interval = interval;
        self
    }

    #[must_use]
    pub const fn verify_on_startup(mut self, verify: bool) -> Self {
        self.config.verify_on_startup = verify;
        self
    }

    /// Remover used for consumed and orphaned segments. Defaults to a
    /// private [`DirRemover`] with default limits.
    #[must_use]
    pub fn remover(mut self, remover: DirRemover) -> Self {
        self.remover = Some(remover);
        self
    }

    pub fn build(self) -> Result<SegmentQueue> {
        SegmentQueue::with_remover(self.config, self.remover.unwrap_or_default())
    }
}
