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
    time::{Duration, Instant},
};

use bytes::BytesMut;
use parking_lot::{Condvar, Mutex};
use prometheus::IntGauge;
use spillway_common_fs::DirRemover;
use spillway_common_storage_queue::{QueueBuilder, SegmentQueue};
use spillway_common_telemetry::FatalHandler;
use tracing::{debug, info};

use crate::{
    FastQueueBuilder, FastQueueConfig, Result, metrics::BYTES_PENDING, pool::BlockPool,
    store::BlockStore,
};

/// Block queue that serves readers from memory while they keep up and
/// spills to a [`BlockStore`] when they don't.
///
/// At any moment only one tier holds data. Once blocks reach the disk tier,
/// new blocks follow them there until it is drained, so reads come out in
/// write order.
///
/// All methods take `&self`; share the queue between threads with an `Arc`.
/// Store I/O failures inside [`Self::write_block`], [`Self::read_block`] and
/// [`Self::close`], and a broken tier invariant, are fatal: they go through
/// the queue's [`FatalHandler`], which aborts the process by default.
pub struct FastQueue<S: BlockStore = SegmentQueue> {
    state:                Mutex<State<S>>,
    /// Signalled on new data and on shutdown.
    cond:                 Condvar,
    path:                 PathBuf,
    name:                 String,
    max_inmemory_blocks:  usize,
    stale_flush_interval: Duration,
    stop_grace_period:    Duration,
    pending_gauge:        IntGauge,
}

struct State<S> {
    store:                  S,
    blocks:                 VecDeque<BytesMut>,
    pool:                   BlockPool,
    pending_inmemory_bytes: u64,
    last_inmemory_read:     Instant,
    stop_deadline:          Option<Instant>,
    closed:                 bool,
    fatal:                  FatalHandler,
}

impl FastQueue {
    /// Open the queue stored in `path`, recovering whatever the disk tier
    /// holds.
    ///
    /// `max_pending_bytes == 0` leaves the disk tier unbounded.
    pub fn open<P: Into<PathBuf>>(
        path: P,
        name: &str,
        max_inmemory_blocks: usize,
        max_pending_bytes: u64,
    ) -> Result<Self> {
        FastQueueBuilder::new(path)
            .name(name)
            .max_inmemory_blocks(max_inmemory_blocks)
            .max_pending_bytes(max_pending_bytes)
            .build()
    }

    #[must_use]
    pub fn builder<P: Into<PathBuf>>(path: P) -> FastQueueBuilder { FastQueueBuilder::new(path) }

    pub(crate) fn open_with(
        config: FastQueueConfig,
        remover: DirRemover,
        fatal: FatalHandler,
    ) -> Result<Self> {
        let store = QueueBuilder::from_config(config.store_config())
            .remover(remover)
            .build()?;
        Ok(Self::with_store(store, &config).with_fatal_handler(fatal))
    }
}

impl<S: BlockStore> FastQueue<S> {
    /// Put an in-memory tier in front of an already opened `store`.
    ///
    /// Only the queue-level settings of `config` are used.
    pub fn with_store(store: S, config: &FastQueueConfig) -> Self {
        let path = store.dir().to_path_buf();
        let pending_gauge = BYTES_PENDING.with_label_values(&[path.to_string_lossy().as_ref()]);
        let queue = Self {
            state: Mutex::new(State {
                store,
                blocks: VecDeque::with_capacity(config.max_inmemory_blocks.min(1024)),
                pool: BlockPool::new(config.max_inmemory_blocks),
                pending_inmemory_bytes: 0,
                last_inmemory_read: Instant::now(),
                stop_deadline: None,
                closed: false,
                fatal: FatalHandler::abort(),
            }),
            cond: Condvar::new(),
            path,
            name: config.name.clone(),
            max_inmemory_blocks: config.max_inmemory_blocks,
            stale_flush_interval: config.stale_flush_interval,
            stop_grace_period: config.stop_grace_period,
            pending_gauge,
        };

        let pending_bytes = {
            let state = queue.state.lock();
            queue.update_gauge(&state);
            state.pending_bytes()
        };
        info!(
            path = ?queue.path,
            name = %queue.name,
            max_inmemory_blocks = queue.max_inmemory_blocks,
            pending_bytes,
            "Fast queue opened"
        );
        queue
    }

    /// Replace the default aborting [`FatalHandler`].
    #[must_use]
    pub fn with_fatal_handler(mut self, fatal: FatalHandler) -> Self {
        self.state.get_mut().fatal = fatal;
        self
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn name(&self) -> &str { &self.name }

    /// Append `block`. Never waits for readers.
    pub fn write_block(&self, block: &[u8]) {
        let mut state = self.state.lock();

        if !state.blocks.is_empty()
            && state.last_inmemory_read.elapsed() >= self.stale_flush_interval
        {
            debug!(
                path = ?self.path,
                blocks = state.blocks.len(),
                "No in-memory reads for a while, moving blocks to disk"
            );
            self.flush_inmemory_blocks(&mut state);
        }

        if state.store.has_pending() {
            if !state.blocks.is_empty() {
                state.bug(&format!(
                    "the in-memory tier must be empty while the disk tier holds {} pending bytes",
                    state.store.pending_bytes()
                ));
            }
            state.write_to_store(block);
        } else if state.blocks.len() >= self.max_inmemory_blocks {
            self.flush_inmemory_blocks(&mut state);
            state.write_to_store(block);
        } else {
            let buf = state.pool.acquire(block);
            state.blocks.push_back(buf);
            state.pending_inmemory_bytes += block.len() as u64;
            self.cond.notify_one();
        }

        self.update_gauge(&state);
    }

    /// Append the next block to `dst`, waiting until one is available.
    ///
    /// Returns `false` once [`Self::unblock_all_readers`] has been called and
    /// either both tiers are empty or the grace period is over.
    pub fn read_block(&self, dst: &mut Vec<u8>) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.stop_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return false;
            }

            if !state.blocks.is_empty() && state.store.has_pending() {
                state.bug(&format!(
                    "the disk tier must be empty while the in-memory tier is not; it holds {} pending bytes",
                    state.store.pending_bytes()
                ));
            }
            if let Some(buf) = state.blocks.pop_front() {
                state.pending_inmemory_bytes -= buf.len() as u64;
                state.last_inmemory_read = Instant::now();
                dst.extend_from_slice(&buf);
                state.pool.release(buf);
                self.update_gauge(&state);
                return true;
            }

            if state.store.has_pending() {
                if state.read_from_store(dst) {
                    self.update_gauge(&state);
                    return true;
                }
                // Segment boundary.
                continue;
            }

            if state.stop_deadline.is_some() {
                return false;
            }

            state.reset_store_if_empty();
            self.cond.wait(&mut state);
        }
    }

    /// Unread bytes in both tiers.
    pub fn pending_bytes(&self) -> u64 { self.state.lock().pending_bytes() }

    /// Blocks currently held by the in-memory tier.
    pub fn inmemory_queue_len(&self) -> usize { self.state.lock().blocks.len() }

    /// Let blocked readers return.
    ///
    /// Readers keep draining for the grace period, then every
    /// [`Self::read_block`] returns `false`. Calling it again does not extend
    /// the deadline.
    pub fn unblock_all_readers(&self) {
        let mut state = self.state.lock();
        if state.stop_deadline.is_none() {
            state.stop_deadline = Some(Instant::now() + self.stop_grace_period);
            info!(
                path = ?self.path,
                grace_period = ?self.stop_grace_period,
                "Unblocking fast queue readers"
            );
        }
        self.cond.notify_all();
    }

    /// Unblock readers, move in-memory blocks to disk and close the disk
    /// tier. Dropping the queue does the same.
    pub fn close(self) { self.shutdown(); }

    fn shutdown(&self) {
        self.unblock_all_readers();

        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        self.flush_inmemory_blocks(&mut state);
        let result = state.store.close();
        state.must(result, "close");
        self.update_gauge(&state);

        info!(
            path = ?self.path,
            pending_bytes = state.store.pending_bytes(),
            "Fast queue closed"
        );
    }

    /// Move every in-memory block to the disk tier, oldest first. A block
    /// leaves memory only once the store has accepted it.
    fn flush_inmemory_blocks(&self, state: &mut State<S>) {
        while let Some(buf) = state.blocks.front() {
            let result = state.store.write_block(buf);
            state.must(result, "write a block to");
            if let Some(buf) = state.blocks.pop_front() {
                state.pending_inmemory_bytes -= buf.len() as u64;
                state.last_inmemory_read = Instant::now();
                state.pool.release(buf);
            }
        }
        self.cond.notify_all();
    }

    fn update_gauge(&self, state: &State<S>) {
        self.pending_gauge
            .set(i64::try_from(state.pending_bytes()).unwrap_or(i64::MAX));
    }
}

impl<S: BlockStore> Drop for FastQueue<S> {
    fn drop(&mut self) { self.shutdown(); }
}

impl<S: BlockStore> State<S> {
    fn pending_bytes(&self) -> u64 { self.pending_inmemory_bytes + self.store.pending_bytes() }

    fn write_to_store(&mut self, block: &[u8]) {
        let result = self.store.write_block(block);
        self.must(result, "write a block to");
    }

    fn read_from_store(&mut self, dst: &mut Vec<u8>) -> bool {
        let result = self.store.read_block_nonblocking(dst);
        self.must(result, "read a block from")
    }

    fn reset_store_if_empty(&mut self) {
        let result = self.store.reset_if_empty();
        self.must(result, "reset");
    }

    fn must<T>(&self, result: spillway_common_storage_queue::Result<T>, action: &str) -> T {
        match result {
            Ok(value) => value,
            Err(e) => self.fatal.fail(&format!(
                "FATAL: cannot {action} persistent queue at {}: {e}",
                self.store.dir().display()
            )),
        }
    }

    fn bug(&self, message: &str) -> ! {
        self.fatal.fail(&format!(
            "BUG: {message}; queue at {}",
            self.store.dir().display()
        ))
    }
}
