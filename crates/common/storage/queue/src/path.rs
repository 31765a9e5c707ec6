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

//! Segment file naming.
//!
//! A segment is named after the global byte offset of its first record, as
//! 16 lowercase hex digits, so lexical order is queue order:
//!
//! ```text
//! <base>/0000000000000000.data
//! <base>/0000000004000000.data
//! ```

use std::path::{Path, PathBuf};

use crate::Result;

const DATA_EXTENSION: &str = "data";

#[must_use]
pub fn segment_file_name(start_offset: u64) -> String {
    format!("{start_offset:016x}.{DATA_EXTENSION}")
}

#[must_use]
pub fn segment_path<P: AsRef<Path>>(base: P, start_offset: u64) -> PathBuf {
    base.as_ref().join(segment_file_name(start_offset))
}

/// Start offset encoded in a segment file name, if `path` is one.
#[must_use]
pub fn parse_segment_offset(path: &Path) -> Option<u64> {
    if path.extension().and_then(|s| s.to_str()) != Some(DATA_EXTENSION) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.len() != 16 {
        return None;
    }
    u64::from_str_radix(stem, 16).ok()
}

/// All segment files directly under `base`, ordered by start offset.
pub fn scan_segment_files<P: AsRef<Path>>(base: P) -> Result<Vec<(u64, PathBuf)>> {
    let base = base.as_ref();
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(base)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(offset) = parse_segment_offset(&path) {
            files.push((offset, path));
        }
    }
    files.sort_unstable_by_key(|(offset, _)| *offset);
    Ok(files)
}
