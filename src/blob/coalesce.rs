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

use std::collections::{HashMap, VecDeque};
use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::ErrorKind;

use super::hash::ContentDigest;

/// How an in-flight put finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The put bound its logical key to this catalog entry.
    Bound { catalog_id: String },

    /// The put failed with an error of this kind.
    Failed(ErrorKind),
}

/// A handle on one in-flight put which other puts can wait on.
pub struct Waiter {
    digest: ContentDigest,
    length: u64,
    outcome: Mutex<Option<Outcome>>,
    finished: Condvar,
}

impl Debug for Waiter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("digest", &self.digest)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

impl Waiter {
    fn new(digest: &ContentDigest, length: u64) -> Self {
        Waiter {
            digest: digest.clone(),
            length,
            outcome: Mutex::new(None),
            finished: Condvar::new(),
        }
    }

    /// The digest of the content being put.
    pub fn digest(&self) -> &ContentDigest {
        &self.digest
    }

    /// The declared length of the content being put.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Wait up to `timeout` for the put to finish and return its outcome.
    ///
    /// This returns `None` if the put didn't finish in time.
    pub fn wait(&self, timeout: Duration) -> Option<Outcome> {
        let outcome = self.outcome.lock().unwrap();
        let (outcome, _) = self
            .finished
            .wait_timeout_while(outcome, timeout, |outcome| outcome.is_none())
            .unwrap();
        outcome.clone()
    }

    fn finish(&self, outcome: Outcome) {
        *self.outcome.lock().unwrap() = Some(outcome);
        self.finished.notify_all();
    }
}

/// The role assigned to a put by [`RequestRegistry::register`].
///
/// [`RequestRegistry::register`]: crate::blob::RequestRegistry::register
#[derive(Debug)]
pub enum Registration<'a> {
    /// This put is at the front of the queue for its key and must run the commit sequence.
    Leader(Ticket<'a>),

    /// The newest put for the key is committing the same content; wait for it instead.
    Follower(Arc<Waiter>),
}

/// The right to commit a put for one logical key.
///
/// Dropping a ticket without calling [`finish`] reports the put as failed, so waiters are never
/// left hanging.
///
/// [`finish`]: crate::blob::Ticket::finish
#[derive(Debug)]
pub struct Ticket<'a> {
    registry: &'a RequestRegistry,
    key: String,
    waiter: Arc<Waiter>,
    finished: bool,
}

impl<'a> Ticket<'a> {
    /// Publish the `outcome` of this put to its waiters and let the next queued put proceed.
    pub fn finish(mut self, outcome: Outcome) {
        self.release(outcome);
    }

    fn release(&mut self, outcome: Outcome) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.waiter.finish(outcome);
        self.registry.dequeue(&self.key, &self.waiter);
    }
}

impl<'a> Drop for Ticket<'a> {
    fn drop(&mut self) {
        self.release(Outcome::Failed(ErrorKind::Internal));
    }
}

/// A process-wide registry of in-flight puts, keyed by canonical logical key.
///
/// Puts for the same key commit one at a time in the order they registered, so the newest put
/// always makes the final binding. A put of the same content as the newest queued put for its key
/// doesn't queue at all; it waits for that put and shares its outcome.
#[derive(Default)]
pub struct RequestRegistry {
    queues: Mutex<HashMap<String, VecDeque<Arc<Waiter>>>>,

    /// Notified whenever a put leaves the front of its queue.
    advanced: Condvar,
}

impl Debug for RequestRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRegistry")
            .field("active", &self.active())
            .finish()
    }
}

impl RequestRegistry {
    /// Create a new empty `RequestRegistry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a put of content with the given `digest` and `length` under the canonical `key`.
    ///
    /// If another put of different content is in flight for `key`, this blocks for up to
    /// `timeout` until every earlier put for `key` has finished.
    ///
    /// # Errors
    /// - `Error::Timeout`: Earlier puts for `key` did not finish in time.
    pub fn register(
        &self,
        key: &str,
        digest: &ContentDigest,
        length: u64,
        timeout: Duration,
    ) -> crate::Result<Registration<'_>> {
        let deadline = Instant::now() + timeout;
        let mut queues = self.queues.lock().unwrap();
        let queue = queues.entry(key.to_owned()).or_insert_with(VecDeque::new);

        if let Some(newest) = queue.back() {
            if newest.digest == *digest && newest.length == length {
                return Ok(Registration::Follower(Arc::clone(newest)));
            }
        }

        let waiter = Arc::new(Waiter::new(digest, length));
        queue.push_back(Arc::clone(&waiter));

        loop {
            let is_front = queues
                .get(key)
                .and_then(|queue| queue.front())
                .map_or(false, |front| Arc::ptr_eq(front, &waiter));
            if is_front {
                return Ok(Registration::Leader(Ticket {
                    registry: self,
                    key: key.to_owned(),
                    waiter,
                    finished: false,
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                if let Some(queue) = queues.get_mut(key) {
                    queue.retain(|queued| !Arc::ptr_eq(queued, &waiter));
                }
                drop(queues);
                waiter.finish(Outcome::Failed(ErrorKind::Timeout));
                self.advanced.notify_all();
                return Err(crate::Error::Timeout);
            }

            queues = self
                .advanced
                .wait_timeout(queues, deadline - now)
                .unwrap()
                .0;
        }
    }

    /// Remove the finished put `waiter` from the front of the queue for `key`.
    fn dequeue(&self, key: &str, waiter: &Arc<Waiter>) {
        let mut queues = self.queues.lock().unwrap();
        if let Some(queue) = queues.get_mut(key) {
            queue.retain(|queued| !Arc::ptr_eq(queued, waiter));
            if queue.is_empty() {
                queues.remove(key);
            }
        }
        drop(queues);
        self.advanced.notify_all();
    }

    /// Return the number of logical keys with a put in flight.
    pub fn active(&self) -> usize {
        self.queues.lock().unwrap().len()
    }

    /// Return whether a put is in flight for the canonical `key`.
    pub fn is_active(&self, key: &str) -> bool {
        self.queues.lock().unwrap().contains_key(key)
    }
}
