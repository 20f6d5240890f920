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

use std::collections::hash_map::Entry as HashMapEntry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::document_store::{Change, Document, DocumentStore, Operation, TxnOutcome};

/// The stored revision and contents of a document.
type Stored = (u64, Vec<u8>);

/// A `DocumentStore` which stores documents in memory.
///
/// Every transaction checks its assertions and applies its changes while holding a single lock,
/// which makes commits linearizable. Data is not stored persistently and is only accessible to the
/// current process. This store is useful for testing.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, HashMap<String, Stored>>>,

    /// The number of upcoming transactions which should abort regardless of their assertions.
    forced_aborts: AtomicUsize,
}

impl MemoryDocumentStore {
    /// Create a new empty `MemoryDocumentStore`.
    pub fn new() -> Self {
        MemoryDocumentStore {
            collections: Mutex::new(HashMap::new()),
            forced_aborts: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` transactions abort as if another writer had won the race.
    pub fn abort_transactions(&self, count: usize) {
        self.forced_aborts.store(count, Ordering::SeqCst);
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn find(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .map(|(revision, data)| Document {
                id: id.to_owned(),
                revision: *revision,
                data: data.clone(),
            }))
    }

    fn list(&self, collection: &str) -> anyhow::Result<Vec<Document>> {
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .map(|(id, (revision, data))| Document {
                        id: id.clone(),
                        revision: *revision,
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn run_transaction(&self, operations: &[Operation]) -> anyhow::Result<TxnOutcome> {
        let forced_abort = self
            .forced_aborts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            })
            .is_ok();
        if forced_abort {
            return Ok(TxnOutcome::Aborted);
        }

        let mut collections = self.collections.lock().unwrap();

        // Stage every change so that later operations observe earlier ones and nothing is written
        // unless all of them hold.
        let mut staged: HashMap<(&str, &str), Option<Stored>> = HashMap::new();

        for operation in operations {
            let key = (operation.collection.as_str(), operation.id.as_str());
            let current = match staged.get(&key) {
                Some(document) => document.as_ref().map(|(revision, _)| *revision),
                None => collections
                    .get(operation.collection.as_str())
                    .and_then(|documents| documents.get(operation.id.as_str()))
                    .map(|(revision, _)| *revision),
            };

            if !operation.holds(current) {
                return Ok(TxnOutcome::Aborted);
            }

            match &operation.change {
                Change::None => {}
                Change::Insert(data) => {
                    staged.insert(key, Some((1, data.clone())));
                }
                Change::Update(data) => {
                    let revision = current.unwrap_or(0) + 1;
                    staged.insert(key, Some((revision, data.clone())));
                }
                Change::Remove => {
                    staged.insert(key, None);
                }
            }
        }

        for ((collection, id), document) in staged {
            let documents = collections
                .entry(collection.to_owned())
                .or_insert_with(HashMap::new);
            match (documents.entry(id.to_owned()), document) {
                (HashMapEntry::Occupied(mut entry), Some(document)) => {
                    entry.insert(document);
                }
                (HashMapEntry::Vacant(entry), Some(document)) => {
                    entry.insert(document);
                }
                (HashMapEntry::Occupied(entry), None) => {
                    entry.remove();
                }
                (HashMapEntry::Vacant(_), None) => {}
            }
        }

        Ok(TxnOutcome::Applied)
    }
}
