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
use spillway_common_storage_queue::QueueConfig;
use spillway_common_telemetry::FatalHandler;

use crate::{FastQueue, FastQueueConfig, Result};

pub struct FastQueueBuilder {
    config:  FastQueueConfig,
    remover: Option<DirRemover>,
    fatal:   FatalHandler,
}

impl FastQueueBuilder {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config:  FastQueueConfig {
                path: path.into(),
                ..Default::default()
            },
            remover: None,
            fatal:   FatalHandler::abort(),
        }
    }

    #[must_use]
    pub const fn from_config(config: FastQueueConfig) -> Self {
        Self {
            config,
            remover: None,
            fatal:   FatalHandler::abort(),
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    #[must_use]
    pub const fn max_inmemory_blocks(mut self, blocks: usize) -> Self {
        self.config.max_inmemory_blocks = blocks;
        self
    }

    #[must_use]
    pub const fn max_pending_bytes(mut self, max: u64) -> Self {
        self.config.max_pending_bytes = max;
        self
    }

    #[must_use]
    pub const fn stale_flush_interval(mut self, interval: Duration) -> Self {
        self.config.stale_flush_interval = interval;
        self
    }

    #[must_use]
    pub const fn stop_grace_period(mut self, period: Duration) -> Self {
        self.config.stop_grace_period = period;
        self
    }

    /// Settings of the on-disk tier. Its path, name and byte limit are
    /// replaced by the ones set on this builder.
    #[must_use]
    pub fn store(mut self, store: QueueConfig) -> Self {
        self.config.store = store;
        self
    }

    /// Remover handed to the on-disk tier.
    #[must_use]
    pub fn remover(mut self, remover: DirRemover) -> Self {
        self.remover = Some(remover);
        self
    }

    /// What happens on a store failure or a broken tier invariant. Also
    /// used by the default remover. Aborts the process unless replaced.
    #[must_use]
    pub fn fatal_handler(mut self, fatal: FatalHandler) -> Self {
        self.fatal = fatal;
        self
    }

    pub fn build(self) -> Result<FastQueue> {
        let remover = self
            .remover
            .unwrap_or_else(|| DirRemover::builder().fatal_handler(self.fatal.clone()).build());
        FastQueue::open_with(self.config, remover, self.fatal)
    }
}
