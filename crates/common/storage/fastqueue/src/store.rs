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

use std::path::Path;

use spillway_common_storage_queue::{Result, SegmentQueue};

/// The on-disk tier as seen by [`FastQueue`](crate::FastQueue).
///
/// Callers hold the queue lock around every call, so implementations need
/// no internal synchronization.
pub trait BlockStore: Send {
    /// Durably append `block`.
    fn write_block(&mut self, block: &[u8]) -> Result<()>;

    /// Append the next block to `dst` without waiting.
    ///
    /// `false` does not mean the store is empty; consult
    /// [`Self::has_pending`] before giving up.
    fn read_block_nonblocking(&mut self, dst: &mut Vec<u8>) -> Result<bool>;

    /// Unread payload bytes.
    fn pending_bytes(&self) -> u64;

    /// Whether any block is left to read, including empty ones.
    fn has_pending(&self) -> bool { self.pending_bytes() > 0 }

    /// Housekeeping run before a reader goes to sleep.
    fn reset_if_empty(&mut self) -> Result<()>;

    /// Persist the final state. Called once.
    fn close(&mut self) -> Result<()>;

    fn dir(&self) -> &Path;
}

impl BlockStore for SegmentQueue {
    fn write_block(&mut self, block: &[u8]) -> Result<()> { Self::write_block(self, block) }

    fn read_block_nonblocking(&mut self, dst: &mut Vec<u8>) -> Result<bool> {
        Self::read_block_nonblocking(self, dst)
    }

    fn pending_bytes(&self) -> u64 { Self::pending_bytes(self) }

    fn has_pending(&self) -> bool { self.pending_blocks() > 0 }

    fn reset_if_empty(&mut self) -> Result<()> { Self::reset_if_empty(self) }

    fn close(&mut self) -> Result<()> { self.shutdown() }

    fn dir(&self) -> &Path { Self::dir(self) }
}
