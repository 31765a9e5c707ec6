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

//! Persistent block queue backed by memory-mapped segment files.
//!
//! ```no_run
//! use spillway_common_storage_queue::SegmentQueue;
//!
//! let mut queue = SegmentQueue::open("/var/lib/spillway/q1", "q1", 0)?;
//! queue.write_block(b"payload")?;
//!
//! let mut buf = Vec::new();
//! while queue.pending_blocks() > 0 {
//!     if queue.read_block_nonblocking(&mut buf)? {
//!         // consume buf
//!         buf.clear();
//!     }
//! }
//! queue.close()?;
//! # Ok::<(), spillway_common_storage_queue::QueueError>(())
//! ```

pub mod builder;
pub mod config;
pub mod error;
mod file;
pub mod manifest;
mod manifest_writer;
mod metrics;
pub mod path;
mod queue;
mod record;
mod recovery;

pub use builder::QueueBuilder;
pub use config::{FlushMode, QueueConfig, RollStrategy};
pub use error::{QueueError, Result};
pub use queue::SegmentQueue;
