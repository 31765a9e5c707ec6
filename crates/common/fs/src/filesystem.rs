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

//! Filesystem primitives used by the [`DirRemover`](crate::DirRemover).

use std::{
    fs::{self, File},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

/// The two filesystem operations removal depends on.
///
/// [`OsFilesystem`] is the real implementation. Tests substitute scripted
/// implementations to reproduce NFS failure sequences.
pub trait Filesystem: Send + Sync + 'static {
    /// Recursively remove `path`, which may be a directory or a file.
    fn remove_all(&self, path: &Path) -> io::Result<()>;

    /// Flush the directory entry table of `dir` to stable storage.
    ///
    /// A missing directory is not an error.
    fn sync_dir(&self, dir: &Path) -> io::Result<()>;
}

/// [`Filesystem`] backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFilesystem;

impl Filesystem for OsFilesystem {
    fn remove_all(&self, path: &Path) -> io::Result<()> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        let result = if metadata.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };

        match result {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn sync_dir(&self, dir: &Path) -> io::Result<()> {
        match File::open(dir) {
            Ok(file) => file.sync_all(),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// How a failed removal attempt is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveErrorClass {
    /// The entry is already gone (stale NFS handle, not found).
    AlreadyRemoved,
    /// NFS is still holding the entry ("directory not empty",
    /// "device or resource busy"). Retry later.
    Transient,
    /// Anything else: permissions, I/O errors, read-only filesystem.
    Fatal,
}

/// Classify a removal error.
#[must_use]
pub fn classify_remove_error(err: &io::Error) -> RemoveErrorClass {
    match err.kind() {
        ErrorKind::StaleNetworkFileHandle | ErrorKind::NotFound => {
            RemoveErrorClass::AlreadyRemoved
        }
        ErrorKind::DirectoryNotEmpty | ErrorKind::ResourceBusy => RemoveErrorClass::Transient,
        _ => RemoveErrorClass::Fatal,
    }
}

/// Directory holding the entry for `path`. A bare relative name lives in `.`.
#[must_use]
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
