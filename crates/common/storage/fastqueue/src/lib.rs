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

//! Hybrid in-memory/on-disk block queue.
//!
//! [`FastQueue`] hands blocks to readers straight from memory while they
//! keep up. When the in-memory tier fills up, or readers stop taking blocks
//! for a while, blocks go to a persistent [`SegmentQueue`] instead, and stay
//! there until readers have drained it.
//!
//! ```no_run
//! use std::{sync::Arc, thread};
//!
//! use spillway_common_storage_fastqueue::FastQueue;
//!
//! let queue = Arc::new(FastQueue::open("/var/lib/spillway/remote-write", "remote-write", 100, 0)?);
//!
//! let reader = {
//!     let queue = Arc::clone(&queue);
//!     thread::spawn(move || {
//!         let mut buf = Vec::new();
//!         while queue.read_block(&mut buf) {
//!             // send buf somewhere
//!             buf.clear();
//!         }
//!     })
//! };
//!
//! queue.write_block(b"payload");
//! queue.unblock_all_readers();
//! reader.join().unwrap();
//! # Ok::<(), spillway_common_storage_fastqueue::FastQueueError>(())
//! ```
//!
//! [`SegmentQueue`]: spillway_common_storage_queue::SegmentQueue

pub mod builder;
pub mod config;
pub mod error;
mod fastqueue;
mod metrics;
mod pool;
mod store;

pub use builder::FastQueueBuilder;
pub use config::FastQueueConfig;
pub use error::{FastQueueError, Result};
pub use fastqueue::FastQueue;
pub use pool::MAX_RETAINED_BUFFER_CAPACITY;
pub use store::BlockStore;
