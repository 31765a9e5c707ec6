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

use std::{io, path::PathBuf};

use snafu::Snafu;

/// Segment queue errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueueError {
    /// Filesystem I/O failure.
    #[snafu(display("IO error: {source}"), context(false))]
    Io { source: io::Error },

    /// Length or CRC check failed for the record at `offset`.
    #[snafu(display("Corrupted record at offset {offset} in {}", path.display()))]
    CorruptedMessage { offset: u64, path: PathBuf },

    #[snafu(display("Manifest corrupted: {reason}"))]
    ManifestCorrupted { reason: String },

    #[snafu(display("Unsupported manifest version: {version}"))]
    UnsupportedManifestVersion { version: u32 },

    #[snafu(display("Invalid file path: {}", path.display()))]
    InvalidPath { path: PathBuf },

    /// A block longer than the record length field can describe.
    #[snafu(display("Block of {size} bytes exceeds the maximum record size"))]
    BlockTooLarge { size: usize },

    #[snafu(display("Mmap operation failed: {message}"))]
    MmapFailed { message: String },

    #[snafu(display("Queue is closed"))]
    Closed,

    #[snafu(display("Internal error: {message}"))]
    Internal { message: String },
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
