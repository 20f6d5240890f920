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

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::anyhow;

use super::resource_store::ResourceStore;

/// The most memory to reserve up front based on a caller's declared length.
const MAX_PREALLOCATION: u64 = 1024 * 1024;

/// A `ResourceStore` which stores objects in memory.
///
/// Unlike other `ResourceStore` implementations, data in a `MemoryStore` is not stored
/// persistently and is only accessible to the current process. This store is useful for testing.
///
/// `put` and `get` never return `Err`. `remove` only returns `Err` when failures were requested
/// with [`fail_removals`].
///
/// [`fail_removals`]: crate::store::MemoryStore::fail_removals
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,

    /// The number of upcoming calls to `remove` which should fail.
    failing_removals: AtomicUsize,
}

impl MemoryStore {
    /// Create a new empty `MemoryStore`.
    pub fn new() -> Self {
        MemoryStore {
            objects: Mutex::new(HashMap::new()),
            failing_removals: AtomicUsize::new(0),
        }
    }

    /// Return whether there is an object at the given `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.objects.lock().unwrap().contains_key(path)
    }

    /// Return the paths of all objects in the store.
    pub fn paths(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Return the number of objects in the store.
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Return whether the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the next `count` calls to `remove` fail without removing anything.
    pub fn fail_removals(&self, count: usize) {
        self.failing_removals.store(count, Ordering::SeqCst);
    }
}

impl ResourceStore for MemoryStore {
    fn put(&self, path: &str, data: &mut dyn Read, length: u64) -> anyhow::Result<()> {
        let mut buffer = Vec::with_capacity(length.min(MAX_PREALLOCATION) as usize);
        data.read_to_end(&mut buffer)?;
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_owned(), buffer);
        Ok(())
    }

    fn get(&self, path: &str) -> anyhow::Result<Option<Box<dyn Read + Send>>> {
        let data = self.objects.lock().unwrap().get(path).cloned();
        Ok(data.map(|data| Box::new(Cursor::new(data)) as Box<dyn Read + Send>))
    }

    fn remove(&self, path: &str) -> anyhow::Result<()> {
        let injected = self
            .failing_removals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            })
            .is_ok();
        if injected {
            return Err(anyhow!("Injected failure removing '{}'.", path));
        }

        self.objects.lock().unwrap().remove(path);
        Ok(())
    }
}
