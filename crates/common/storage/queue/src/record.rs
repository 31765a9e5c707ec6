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

//! On-disk framing of a block.
//!
//! ```text
//! ┌──────────────┬─────────────────┬──────────────┐
//! │ len: u32 LE  │ payload (len B) │ crc32: u32 LE│
//! └──────────────┴─────────────────┴──────────────┘
//! ```
//!
//! The CRC covers the length bytes and the payload. Segments are
//! pre-allocated with zeros, so the zero header that follows the last record
//! is told apart from an empty block by its CRC: `crc32([0; 4])` is not zero.

use crc32fast::Hasher;

pub(crate) const RECORD_LENGTH_SIZE: usize = 4;

pub(crate) const RECORD_CRC_SIZE: usize = 4;

pub(crate) const RECORD_OVERHEAD: u64 = (RECORD_LENGTH_SIZE + RECORD_CRC_SIZE) as u64;

#[inline]
pub(crate) const fn record_size(payload_len: usize) -> u64 { RECORD_OVERHEAD + payload_len as u64 }

#[inline]
pub(crate) fn record_crc(length: u32, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&length.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Append the framed form of `payload` to `buf`.
pub(crate) fn encode_record(payload: &[u8], length: u32, buf: &mut Vec<u8>) {
    buf.reserve(RECORD_LENGTH_SIZE + payload.len() + RECORD_CRC_SIZE);
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&record_crc(length, payload).to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_size() {
        assert_eq!(record_size(0), 8);
        assert_eq!(record_size(10), 18);
    }

    #[test]
    fn test_encode_layout() {
        let mut buf = Vec::new();
        encode_record(b"abc", 3, &mut buf);

        assert_eq!(buf.len(), 11);
        assert_eq!(&buf[..4], &3u32.to_le_bytes());
        assert_eq!(&buf[4..7], b"abc");
        assert_eq!(&buf[7..], &record_crc(3, b"abc").to_le_bytes());
    }

    #[test]
    fn test_empty_record_differs_from_zero_fill() {
        assert_ne!(record_crc(0, &[]), 0);
    }

    #[test]
    fn test_crc_covers_length() {
        let data = b"payload";
        assert_ne!(record_crc(7, data), record_crc(8, data));
    }
}
