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

use std::{
    path::Path,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use spillway_common_storage_fastqueue::FastQueue;
use spillway_common_storage_queue::{QueueConfig, path::scan_segment_files};
use spillway_common_telemetry::init_default_ut_logging;
use tempfile::TempDir;

fn open(path: &Path, max_inmemory_blocks: usize) -> FastQueue {
    FastQueue::builder(path)
        .name("fq")
        .max_inmemory_blocks(max_inmemory_blocks)
        .store(QueueConfig {
            file_size: 64 * 1024,
            ..QueueConfig::default()
        })
        .build()
        .unwrap()
}

fn read(queue: &FastQueue) -> Vec<u8> {
    let mut buf = Vec::new();
    assert!(queue.read_block(&mut buf));
    buf
}

#[test]
fn test_fifo_across_tiers() {
    init_default_ut_logging();
    let temp_dir = TempDir::new().unwrap();
    let queue = open(temp_dir.path(), 4);

    let mut expected = Vec::new();
    for i in 0..200 {
        let block = format!("block-{i:03}").into_bytes();
        queue.write_block(&block);
        expected.push(block);
        // Drain now and then so data moves through both tiers.
        if i % 37 == 0 {
            let got = read(&queue);
            assert_eq!(got, expected.remove(0));
        }
    }
    for block in expected {
        assert_eq!(read(&queue), block);
    }
    assert_eq!(queue.pending_bytes(), 0);
}

#[test]
fn test_pending_bytes_track_both_tiers() {
    init_default_ut_logging();
    let temp_dir = TempDir::new().unwrap();
    let queue = open(temp_dir.path(), 3);

    let blocks: [&[u8]; 5] = [b"a", b"bb", b"ccc", b"dddd", b"eeeee"];
    let mut total = 0;
    for block in blocks {
        queue.write_block(block);
        total += block.len() as u64;
        assert_eq!(queue.pending_bytes(), total);
    }
    for block in blocks {
        assert_eq!(read(&queue), block);
        total -= block.len() as u64;
        assert_eq!(queue.pending_bytes(), total);
    }
}

#[test]
fn test_spilled_blocks_survive_reopen() {
    init_default_ut_logging();
    let temp_dir = TempDir::new().unwrap();

    {
        let queue = FastQueue::open(temp_dir.path(), "spill", 1, 0).unwrap();
        queue.write_block(b"foo");
        assert_eq!(queue.inmemory_queue_len(), 1);
        queue.write_block(b"bar");
        assert_eq!(queue.inmemory_queue_len(), 0);
        assert_eq!(queue.pending_bytes(), 6);
        queue.close();
    }

    let queue = FastQueue::open(temp_dir.path(), "spill", 1, 0).unwrap();
    assert_eq!(queue.pending_bytes(), 6);
    assert_eq!(read(&queue), b"foo");
    assert_eq!(read(&queue), b"bar");
}

#[test]
fn test_writes_stick_to_disk_until_drained() {
    init_default_ut_logging();
    let temp_dir = TempDir::new().unwrap();
    let queue = open(temp_dir.path(), 1);

    queue.write_block(b"foo");
    queue.write_block(b"bar");
    assert_eq!(read(&queue), b"foo");

    // "bar" is still on disk, so "baz" must follow it there.
    queue.write_block(b"baz");
    assert_eq!(queue.inmemory_queue_len(), 0);
    assert_eq!(read(&queue), b"bar");
    assert_eq!(read(&queue), b"baz");

    queue.write_block(b"qux");
    assert_eq!(queue.inmemory_queue_len(), 1);
    assert_eq!(read(&queue), b"qux");
}

#[test]
fn test_unblock_releases_waiting_reader() {
    init_default_ut_logging();
    let temp_dir = TempDir::new().unwrap();
    let queue = Arc::new(open(temp_dir.path(), 4));

    let reader = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut buf = Vec::new();
            queue.read_block(&mut buf)
        })
    };
    thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    queue.unblock_all_readers();
    assert!(!reader.join().unwrap());
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_close_persists_inmemory_blocks() {
    init_default_ut_logging();
    let temp_dir = TempDir::new().unwrap();

    {
        let queue = open(temp_dir.path(), 100);
        for i in 0..10 {
            queue.write_block(format!("mem-{i}").as_bytes());
        }
        assert_eq!(queue.inmemory_queue_len(), 10);
        assert_eq!(read(&queue), b"mem-0");
        queue.close();
    }

    let queue = open(temp_dir.path(), 100);
    assert_eq!(queue.pending_bytes(), 9 * 5);
    for i in 1..10 {
        assert_eq!(read(&queue), format!("mem-{i}").into_bytes());
    }
}

#[test]
fn test_drop_persists_inmemory_blocks() {
    init_default_ut_logging();
    let temp_dir = TempDir::new().unwrap();

    drop({
        let queue = open(temp_dir.path(), 100);
        queue.write_block(b"dropped-but-kept");
        queue
    });

    let queue = open(temp_dir.path(), 100);
    assert_eq!(read(&queue), b"dropped-but-kept");
}

#[test]
fn test_stale_memory_tier_goes_to_disk() {
    init_default_ut_logging();
    let temp_dir = TempDir::new().unwrap();
    let queue = FastQueue::builder(temp_dir.path())
        .name("stale")
        .max_inmemory_blocks(16)
        .stale_flush_interval(Duration::from_millis(50))
        .build()
        .unwrap();

    queue.write_block(b"old");
    thread::sleep(Duration::from_millis(100));
    queue.write_block(b"new");

    assert_eq!(queue.inmemory_queue_len(), 0);
    assert_eq!(queue.pending_bytes(), 6);
    assert_eq!(scan_segment_files(temp_dir.path()).unwrap().len(), 1);
    assert_eq!(read(&queue), b"old");
    assert_eq!(read(&queue), b"new");
}

#[test]
fn test_concurrent_writers_keep_per_writer_order() {
    init_default_ut_logging();
    let temp_dir = TempDir::new().unwrap();
    let queue = Arc::new(open(temp_dir.path(), 8));

    const WRITERS: usize = 4;
    const PER_WRITER: usize = 250;

    let writers: Vec<_> = (0..WRITERS)
        .map(|w| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..PER_WRITER {
                    queue.write_block(format!("{w}:{i}").as_bytes());
                }
            })
        })
        .collect();

    let mut next = [0usize; WRITERS];
    for _ in 0..WRITERS * PER_WRITER {
        let block = String::from_utf8(read(&queue)).unwrap();
        let (w, i) = block.split_once(':').unwrap();
        let (w, i): (usize, usize) = (w.parse().unwrap(), i.parse().unwrap());
        assert_eq!(i, next[w], "writer {w} out of order");
        next[w] += 1;
    }
    for writer in writers {
        writer.join().unwrap();
    }
    assert_eq!(queue.pending_bytes(), 0);
}

#[test]
fn test_disk_tier_limit_drops_oldest() {
    init_default_ut_logging();
    let temp_dir = TempDir::new().unwrap();
    let queue = FastQueue::builder(temp_dir.path())
        .name("bounded")
        .max_inmemory_blocks(0)
        .max_pending_bytes(100)
        .store(QueueConfig {
            file_size: 256,
            ..QueueConfig::default()
        })
        .build()
        .unwrap();

    for i in 0..50 {
        queue.write_block(format!("{i:0>10}").as_bytes());
    }
    assert!(queue.pending_bytes() <= 100);

    let mut last = Vec::new();
    while queue.pending_bytes() > 0 {
        last = read(&queue);
    }
    assert_eq!(last, format!("{:0>10}", 49).into_bytes());
}
