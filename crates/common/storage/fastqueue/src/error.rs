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

use snafu::Snafu;
use spillway_common_storage_queue::QueueError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FastQueueError {
    /// The on-disk tier could not be opened or recovered.
    #[snafu(display("Persistent store error: {source}"), context(false))]
    Store { source: QueueError },
}

pub type Result<T> = std::result::Result<T, FastQueueError>;
