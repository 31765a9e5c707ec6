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

use bytes::BytesMut;

/// Buffers larger than this are freed instead of being kept for reuse.
pub const MAX_RETAINED_BUFFER_CAPACITY: usize = 4 * 1024 * 1024;

/// Free list of block buffers for the in-memory tier.
///
/// Not synchronized; it lives under the queue lock.
#[derive(Debug)]
pub(crate) struct BlockPool {
    free:         Vec<BytesMut>,
    max_retained: usize,
}

impl BlockPool {
    pub(crate) fn new(max_retained: usize) -> Self {
        Self {
            free: Vec::with_capacity(max_retained.min(64)),
            max_retained,
        }
    }

    /// A buffer holding a copy of `block`.
    pub(crate) fn acquire(&mut self, block: &[u8]) -> BytesMut {
        let mut buf = self.free.pop().unwrap_or_default();
        buf.extend_from_slice(block);
        buf
    }

    pub(crate) fn release(&mut self, mut buf: BytesMut) {
        if self.free.len() >= self.max_retained || buf.capacity() > MAX_RETAINED_BUFFER_CAPACITY {
            return;
        }
        buf.clear();
        self.free.push(buf);
    }

    #[cfg(test)]
    fn retained(&self) -> usize { self.free.len() }
}
