/*
 * Copyright 2019-2020 Garrett Powell
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::time::Duration;

/// The configuration for deferred cleanup of physical objects.
///
/// This type implements `Default` to provide a reasonable default configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct CleanupConfig {
    /// How long to wait before retrying a removal which failed for the first time.
    ///
    /// The delay doubles after each further failure. The default value is 100 milliseconds.
    pub initial_backoff: Duration,

    /// The longest delay between two removal attempts.
    ///
    /// The default value is 30 seconds.
    pub max_backoff: Duration,

    /// The number of removal attempts after which a path is given up on.
    ///
    /// Paths which are given up on are logged as permanent orphans. The default value is `10`.
    pub max_attempts: u32,

    /// The maximum number of paths waiting to be removed.
    ///
    /// When the queue is full, a removal is attempted once immediately instead of being queued.
    /// The default value is `1024`.
    pub capacity: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        CleanupConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            max_attempts: 10,
            capacity: 1024,
        }
    }
}

/// The configuration for a [`ManagedStorage`].
///
/// This type implements `Default` to provide a reasonable default configuration.
///
/// [`ManagedStorage`]: crate::ManagedStorage
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct StorageConfig {
    /// The number of times a catalog or index transaction is attempted before giving up.
    ///
    /// The default value is `3`.
    pub txn_attempts: u32,

    /// How long a put waits for another in-flight put of the same logical key.
    ///
    /// The default value is 60 seconds.
    pub inflight_wait: Duration,

    /// How long a put waits for a concurrent uploader of the same content to finish.
    ///
    /// The default value is 60 seconds.
    pub upload_wait: Duration,

    /// How often a waiting put checks whether a concurrent upload has finished.
    ///
    /// The default value is 50 milliseconds.
    pub upload_poll_interval: Duration,

    /// How long a put request issued by `put_for_bucket_request` remains valid.
    ///
    /// The default value is 60 seconds.
    pub put_request_expiry: Duration,

    /// The configuration for deferred cleanup.
    pub cleanup: CleanupConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            txn_attempts: 3,
            inflight_wait: Duration::from_secs(60),
            upload_wait: Duration::from_secs(60),
            upload_poll_interval: Duration::from_millis(50),
            put_request_expiry: Duration::from_secs(60),
            cleanup: CleanupConfig::default(),
        }
    }
}
