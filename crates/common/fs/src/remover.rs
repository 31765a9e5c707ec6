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

//! Crash-safe recursive removal that survives NFS quirks.
//!
//! ## Background
//!
//! On NFS, `rmdir` of a directory whose files were just unlinked can fail
//! with `ENOTEMPTY` or `EBUSY` while the server still holds `.nfsXXXX`
//! silly-renamed files for handles that are open somewhere. Those failures
//! clear on their own once the handles go away, so the remover retries them
//! in the background instead of failing the caller.
//!
//! ## Removal lifecycle
//!
//! ```text
//!   remove_all(path)
//!        │
//!        ├── ok / stale handle / not found ──► fsync parent ──► removed
//!        │
//!        ├── not empty / busy ──► admission slot ──► retry thread
//!        │                                            │ sleep retry_interval
//!        │                                            └─► attempt ... ──► removed
//!        │
//!        └── anything else ──► FATAL
//! ```
//!
//! Fatal conditions go through a [`FatalHandler`], which aborts the process
//! unless a test installs a hook.
//!
//! Every retry thread holds one admission slot (a bounded crossbeam channel
//! of capacity `max_pending_removals`) and one [`WaitGroup`] reference, so
//! [`DirRemover::shutdown`] can wait for the backlog with a timeout.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use crossbeam::{
    channel::{self, Receiver, Sender},
    sync::WaitGroup,
};
use parking_lot::Mutex;
use prometheus::{IntCounter, IntGauge, Registry};
use spillway_common_telemetry::FatalHandler;
use tracing::{debug, error, info, warn};

use crate::filesystem::{Filesystem, OsFilesystem, RemoveErrorClass, classify_remove_error, parent_dir};

/// Default cap on concurrently retried removals.
pub const DEFAULT_MAX_PENDING_REMOVALS: usize = 1024;

/// Default pause between background removal attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Default time [`DirRemover::shutdown`] waits for the retry backlog.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct DirRemoverConfig {
    /// Maximum number of paths retried in the background at once. Scheduling
    /// one more is fatal.
    pub max_pending_removals: usize,
    pub retry_interval:       Duration,
    pub shutdown_timeout:     Duration,
}

impl Default for DirRemoverConfig {
    fn default() -> Self {
        Self {
            max_pending_removals: DEFAULT_MAX_PENDING_REMOVALS,
            retry_interval:       DEFAULT_RETRY_INTERVAL,
            shutdown_timeout:     DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

pub struct DirRemoverBuilder {
    config:     DirRemoverConfig,
    filesystem: Arc<dyn Filesystem>,
    fatal:      FatalHandler,
}

impl Default for DirRemoverBuilder {
    fn default() -> Self { Self::new() }
}

impl DirRemoverBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config:     DirRemoverConfig::default(),
            filesystem: Arc::new(OsFilesystem),
            fatal:      FatalHandler::abort(),
        }
    }

    #[must_use]
    pub const fn max_pending_removals(mut self, max: usize) -> Self {
        self.config.max_pending_removals = max;
        self
    }

    #[must_use]
    pub const fn retry_interval(mut self, interval: Duration) -> Self {
        self.config.retry_interval = interval;
        self
    }

    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn filesystem(mut self, filesystem: Arc<dyn Filesystem>) -> Self {
        self.filesystem = filesystem;
        self
    }

    #[must_use]
    pub fn fatal_handler(mut self, fatal: FatalHandler) -> Self {
        self.fatal = fatal;
        self
    }

    #[must_use]
    pub fn build(self) -> DirRemover { DirRemover::from_parts(self.config, self.filesystem, self.fatal) }
}

/// Removes directory trees, retrying NFS-transient failures in the
/// background.
///
/// Cloning is cheap; clones share the backlog, metrics and wait group.
#[derive(Clone)]
pub struct DirRemover {
    inner: Arc<Inner>,
}

struct Inner {
    config:          DirRemoverConfig,
    filesystem:      Arc<dyn Filesystem>,
    /// Admission slots; a retry thread holds one message for its lifetime.
    slots_tx:        Sender<()>,
    slots_rx:        Receiver<()>,
    /// Outstanding retry threads. Swapped out by `shutdown`.
    wait_group:      Mutex<WaitGroup>,
    failed_attempts: IntCounter,
    pending_dirs:    IntGauge,
    fatal:           FatalHandler,
}

/// Returned by a single attempt.
enum Attempt {
    Removed,
    Retry,
}

impl Default for DirRemover {
    fn default() -> Self { Self::new(DirRemoverConfig::default()) }
}

impl DirRemover {
    #[must_use]
    pub fn builder() -> DirRemoverBuilder { DirRemoverBuilder::new() }

    /// Create a remover backed by the real filesystem.
    #[must_use]
    pub fn new(config: DirRemoverConfig) -> Self {
        Self::with_filesystem(config, Arc::new(OsFilesystem))
    }

    /// Create a remover backed by `filesystem`.
    ///
    /// # Panics
    ///
    /// Panics if `config.max_pending_removals` is zero.
    #[must_use]
    pub fn with_filesystem(config: DirRemoverConfig, filesystem: Arc<dyn Filesystem>) -> Self {
        Self::from_parts(config, filesystem, FatalHandler::abort())
    }

    fn from_parts(
        config: DirRemoverConfig,
        filesystem: Arc<dyn Filesystem>,
        fatal: FatalHandler,
    ) -> Self {
        assert!(
            config.max_pending_removals > 0,
            "max_pending_removals must be positive"
        );
        let (slots_tx, slots_rx) = channel::bounded(config.max_pending_removals);
        let failed_attempts = IntCounter::new(
            "nfs_dir_remove_failed_attempts_total",
            "Number of directory removal attempts that failed with a transient NFS error",
        )
        .expect("metric name is valid");
        let pending_dirs = IntGauge::new(
            "nfs_pending_dirs_to_remove",
            "Number of paths waiting for a background removal retry",
        )
        .expect("metric name is valid");

        Self {
            inner: Arc::new(Inner {
                config,
                filesystem,
                slots_tx,
                slots_rx,
                wait_group: Mutex::new(WaitGroup::new()),
                failed_attempts,
                pending_dirs,
                fatal,
            }),
        }
    }

    /// Expose this remover's metrics through `registry`.
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.inner.failed_attempts.clone()))?;
        registry.register(Box::new(self.inner.pending_dirs.clone()))
    }

    #[must_use]
    pub fn config(&self) -> &DirRemoverConfig { &self.inner.config }

    /// Number of removal attempts that failed with a transient error.
    #[must_use]
    pub fn failed_attempts(&self) -> u64 { self.inner.failed_attempts.get() }

    /// Number of paths currently retried in the background.
    #[must_use]
    pub fn pending_removals(&self) -> usize { self.inner.slots_tx.len() }

    /// Remove `path` and everything below it, then fsync its parent.
    ///
    /// Returns once the path is gone or a background retry has been
    /// scheduled for it.
    ///
    /// Any error other than a transient NFS error or a stale handle is fatal,
    /// and so is a full retry backlog.
    pub fn remove_all<P: AsRef<Path>>(&self, path: P) {
        let path = path.as_ref();
        match self.inner.try_remove_all(path) {
            Ok(Attempt::Removed) => {}
            Ok(Attempt::Retry) => self.schedule_retry(path.to_path_buf()),
            Err(message) => self.inner.fatal.fail(&format!("FATAL: {message}")),
        }
    }

    fn schedule_retry(&self, path: PathBuf) {
        if self.inner.slots_tx.try_send(()).is_err() {
            let message = format!(
                "cannot schedule {} for removal, since the removal queue is full ({} entries)",
                path.display(),
                self.inner.config.max_pending_removals
            );
            self.inner.fatal.fail(&format!("FATAL: {message}"));
        }
        self.inner.pending_dirs.inc();

        let wait_group = self.inner.wait_group.lock().clone();
        let inner = Arc::clone(&self.inner);
        let task_path = path.clone();

        debug!(path = ?path, "Scheduled background removal");

        let spawned = thread::Builder::new()
            .name("dir-remover".into())
            .spawn(move || {
                // Locals drop in reverse order: the slot and gauge are
                // released before the wait group lets `shutdown` return.
                let _wait_group = wait_group;
                let _slot = AdmissionSlot { inner: &inner };
                loop {
                    thread::sleep(inner.config.retry_interval);
                    match inner.try_remove_all(&task_path) {
                        Ok(Attempt::Removed) => {
                            debug!(path = ?task_path, "Background removal succeeded");
                            return;
                        }
                        Ok(Attempt::Retry) => {}
                        Err(message) => inner
                            .fatal
                            .fail(&format!("FATAL: background removal failed: {message}")),
                    }
                }
            });

        if let Err(e) = spawned {
            let _ = self.inner.slots_rx.try_recv();
            self.inner.pending_dirs.dec();
            self.inner.fatal.fail(&format!(
                "FATAL: cannot spawn removal thread for {}: {e}",
                path.display()
            ));
        }
    }

    /// Wait for outstanding background removals.
    ///
    /// Gives up after `shutdown_timeout` and logs the leftover count; those
    /// paths are expected to be cleaned up on the next startup. Returns
    /// `true` if the backlog drained in time.
    ///
    /// Call it at the end of graceful shutdown, after the last `remove_all`.
    pub fn shutdown(&self) -> bool {
        let wait_group = std::mem::take(&mut *self.inner.wait_group.lock());
        let (done_tx, done_rx) = channel::bounded::<()>(1);

        let waiter = thread::Builder::new()
            .name("dir-remover-drain".into())
            .spawn(move || {
                wait_group.wait();
                let _ = done_tx.send(());
            });
        if let Err(e) = waiter {
            warn!(error = %e, "Cannot spawn removal drain thread, skipping wait");
            return false;
        }

        let timeout = self.inner.config.shutdown_timeout;
        if done_rx.recv_timeout(timeout).is_ok() {
            info!("Directory remover drained");
            true
        } else {
            error!(
                pending = self.pending_removals(),
                ?timeout,
                "cannot stop directory remover in time; the remaining NFS directories should be \
                 removed on the next startup"
            );
            false
        }
    }
}

impl Inner {
    /// One removal attempt. `Err` carries the fatal diagnostic.
    fn try_remove_all(&self, path: &Path) -> Result<Attempt, String> {
        match self.filesystem.remove_all(path) {
            Ok(()) => {}
            Err(e) => match classify_remove_error(&e) {
                RemoveErrorClass::AlreadyRemoved => {}
                RemoveErrorClass::Transient => {
                    // NFS keeps the entry while handles are open; see module docs.
                    self.failed_attempts.inc();
                    debug!(path = ?path, error = %e, "Transient removal failure");
                    return Ok(Attempt::Retry);
                }
                RemoveErrorClass::Fatal => {
                    return Err(format!("cannot remove {}: {e}", path.display()));
                }
            },
        }

        let parent = parent_dir(path);
        self.filesystem
            .sync_dir(&parent)
            .map_err(|e| format!("cannot fsync {}: {e}", parent.display()))?;
        Ok(Attempt::Removed)
    }
}

/// Releases one admission slot when the retry thread exits.
struct AdmissionSlot<'a> {
    inner: &'a Inner,
}

impl Drop for AdmissionSlot<'_> {
    fn drop(&mut self) {
        let _ = self.inner.slots_rx.try_recv();
        self.inner.pending_dirs.dec();
    }
}
