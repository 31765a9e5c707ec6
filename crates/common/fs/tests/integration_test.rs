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

use std::{fs, time::Duration};

use spillway_common_fs::{DirRemover, DirRemoverConfig};
use spillway_common_telemetry::init_default_ut_logging;
use tempfile::TempDir;

fn remover() -> DirRemover {
    DirRemover::new(DirRemoverConfig {
        retry_interval: Duration::from_millis(10),
        shutdown_timeout: Duration::from_secs(5),
        ..Default::default()
    })
}

#[test]
fn test_remove_nested_tree() {
    init_default_ut_logging();
    let temp_dir = TempDir::new().unwrap();
    let queue_dir = temp_dir.path().join("queue");
    fs::create_dir_all(queue_dir.join("segments")).unwrap();
    fs::write(queue_dir.join("segments/0000000000000000.data"), vec![7u8; 4096]).unwrap();
    fs::write(queue_dir.join("manifest.1"), b"manifest").unwrap();

    let remover = remover();
    remover.remove_all(&queue_dir);

    assert!(!queue_dir.exists());
    assert!(temp_dir.path().exists());
    assert_eq!(remover.pending_removals(), 0);
    assert_eq!(remover.failed_attempts(), 0);
    assert!(remover.shutdown());
}

#[test]
fn test_remove_is_idempotent() {
    init_default_ut_logging();
    let temp_dir = TempDir::new().unwrap();
    let queue_dir = temp_dir.path().join("queue");
    fs::create_dir_all(&queue_dir).unwrap();

    let remover = remover();
    remover.remove_all(&queue_dir);
    remover.remove_all(&queue_dir);
    remover.remove_all(temp_dir.path().join("never-existed"));

    assert!(!queue_dir.exists());
    assert_eq!(remover.pending_removals(), 0);
}

#[test]
fn test_remove_single_file() {
    init_default_ut_logging();
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("0000000000000000.data");
    fs::write(&file, b"block").unwrap();

    remover().remove_all(&file);

    assert!(!file.exists());
}

#[test]
fn test_shutdown_without_work() {
    let remover = remover();
    assert!(remover.shutdown());
    assert!(remover.shutdown());
}
