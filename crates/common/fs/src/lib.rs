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

//! Filesystem helpers shared by the storage crates.
//!
//! The main entry point is [`DirRemover`], which deletes directory trees and
//! keeps retrying in the background when NFS reports the tree as still busy.
//!
//! ```no_run
//! use spillway_common_fs::DirRemover;
//!
//! let remover = DirRemover::default();
//! remover.remove_all("/var/lib/spillway/old-queue");
//! remover.shutdown();
//! ```

mod filesystem;
mod remover;

pub use filesystem::{Filesystem, OsFilesystem, RemoveErrorClass, classify_remove_error, parent_dir};
pub use remover::{
    DEFAULT_MAX_PENDING_REMOVALS, DEFAULT_RETRY_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT, DirRemover,
    DirRemoverBuilder, DirRemoverConfig,
};
