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

use std::collections::VecDeque;
use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::store::ResourceStore;

use super::config::CleanupConfig;

/// Why a physical object is scheduled for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleanupReason {
    /// The content was already stored, so the freshly uploaded copy is not needed.
    Duplicate,

    /// The uploaded data did not match its declared length or digest.
    Rejected,

    /// The put which uploaded the object failed.
    FailedUpload,

    /// The last reference to the object's catalog entry was removed.
    Released,
}

impl Display for CleanupReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            CleanupReason::Duplicate => "duplicate",
            CleanupReason::Rejected => "rejected",
            CleanupReason::FailedUpload => "failed upload",
            CleanupReason::Released => "released",
        };
        f.write_str(name)
    }
}

/// A path waiting to be removed from the resource store.
#[derive(Debug, Clone)]
struct Task {
    path: String,
    reason: CleanupReason,
    first_attempt: Instant,
    attempts: u32,
    next_attempt: Instant,
}

#[derive(Debug, Default)]
struct Queue {
    tasks: VecDeque<Task>,

    /// The number of tasks the worker has taken off the queue but not yet finished.
    in_progress: usize,

    shutdown: bool,
}

impl Queue {
    fn is_idle(&self) -> bool {
        self.tasks.is_empty() && self.in_progress == 0
    }
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<Queue>,

    /// Notified when a task is added, a task finishes, or the cleaner shuts down.
    changed: Condvar,

    store: Arc<dyn ResourceStore>,
    config: CleanupConfig,
}

/// Return how long to wait after the given number of failed `attempts`.
///
/// The delay starts at `initial_backoff` after the first failure and doubles after each further
/// failure, up to `max_backoff`.
pub fn backoff(config: &CleanupConfig, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(31);
    config
        .initial_backoff
        .checked_mul(1u32 << exponent)
        .unwrap_or(config.max_backoff)
        .min(config.max_backoff)
}

/// A bounded queue of physical objects to remove, drained by a single background thread.
///
/// Removals which fail are retried with exponential backoff until `max_attempts` is reached, at
/// which point the path is logged as a permanent orphan. The queue is not persisted; paths which
/// are still queued when the cleaner is dropped become orphans.
#[derive(Debug)]
pub struct Cleaner {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Cleaner {
    /// Start a cleaner which removes objects from `store`.
    ///
    /// # Errors
    /// - `Error::Io`: The worker thread could not be spawned.
    pub fn start(store: Arc<dyn ResourceStore>, config: CleanupConfig) -> crate::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            changed: Condvar::new(),
            store,
            config,
        });

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(String::from("blob-cleanup"))
                .spawn(move || run_worker(&shared))?
        };

        Ok(Cleaner {
            shared,
            worker: Some(worker),
        })
    }

    /// Schedule the object at `path` for removal.
    ///
    /// If the queue is full, this attempts the removal once on the calling thread instead.
    pub fn schedule(&self, path: String, reason: CleanupReason) {
        let now = Instant::now();
        {
            let mut queue = self.shared.queue.lock().unwrap();
            if queue.tasks.len() < self.shared.config.capacity {
                tracing::debug!(path = %path, %reason, "Scheduled object for removal");
                queue.tasks.push_back(Task {
                    path,
                    reason,
                    first_attempt: now,
                    attempts: 0,
                    next_attempt: now,
                });
                drop(queue);
                self.shared.changed.notify_all();
                return;
            }
        }

        tracing::warn!(path = %path, %reason, "Cleanup queue is full, removing immediately");
        if let Err(error) = self.shared.store.remove(&path) {
            tracing::error!(
                path = %path,
                %reason,
                error = %error,
                "Could not remove object, leaving it as a permanent orphan"
            );
        }
    }

    /// Return the number of paths waiting to be removed.
    pub fn pending(&self) -> usize {
        let queue = self.shared.queue.lock().unwrap();
        queue.tasks.len() + queue.in_progress
    }

    /// Wait up to `timeout` for every scheduled removal to finish.
    ///
    /// This returns `true` if the queue drained in time. Paths which are given up on count as
    /// finished.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let queue = self.shared.queue.lock().unwrap();
        let (queue, _) = self
            .shared
            .changed
            .wait_timeout_while(queue, timeout, |queue| !queue.is_idle())
            .unwrap();
        queue.is_idle()
    }
}

impl Drop for Cleaner {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.shutdown = true;
            if !queue.tasks.is_empty() {
                tracing::warn!(
                    pending = queue.tasks.len(),
                    "Cleaner stopped with removals pending, leaving orphans"
                );
            }
        }
        self.shared.changed.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Remove queued objects until the cleaner shuts down.
fn run_worker(shared: &Shared) {
    let mut queue = shared.queue.lock().unwrap();
    loop {
        if queue.shutdown {
            return;
        }

        // Find the task which is due soonest.
        let next = queue
            .tasks
            .iter()
            .enumerate()
            .min_by_key(|(_, task)| task.next_attempt)
            .map(|(index, task)| (index, task.next_attempt));

        let index = match next {
            None => {
                queue = shared.changed.wait(queue).unwrap();
                continue;
            }
            Some((index, due)) => {
                let now = Instant::now();
                if due > now {
                    queue = shared.changed.wait_timeout(queue, due - now).unwrap().0;
                    continue;
                }
                index
            }
        };

        let mut task = match queue.tasks.remove(index) {
            Some(task) => task,
            None => continue,
        };
        queue.in_progress += 1;
        drop(queue);

        // The removal happens without holding the lock.
        task.attempts += 1;
        let result = shared.store.remove(&task.path);

        queue = shared.queue.lock().unwrap();
        queue.in_progress -= 1;
        match result {
            Ok(()) => {
                tracing::debug!(
                    path = %task.path,
                    reason = %task.reason,
                    attempts = task.attempts,
                    "Removed object"
                );
            }
            Err(error) if task.attempts >= shared.config.max_attempts => {
                tracing::error!(
                    path = %task.path,
                    reason = %task.reason,
                    attempts = task.attempts,
                    pending_for = ?task.first_attempt.elapsed(),
                    error = %error,
                    "Giving up on removing object, leaving it as a permanent orphan"
                );
            }
            Err(error) => {
                let delay = backoff(&shared.config, task.attempts);
                tracing::warn!(
                    path = %task.path,
                    reason = %task.reason,
                    attempts = task.attempts,
                    retry_in = ?delay,
                    error = %error,
                    "Could not remove object, retrying"
                );
                task.next_attempt = Instant::now() + delay;
                queue.tasks.push_back(task);
            }
        }
        shared.changed.notify_all();
    }
}
