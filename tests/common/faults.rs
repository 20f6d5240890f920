/*
 * Copyright 2019-2020 Wren Powell
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

use std::ops::Deref;
use std::sync::Mutex;

use anyhow::anyhow;

use managed_blobstore::txn::{
    Assertion, Change, Document, DocumentStore, MemoryDocumentStore, Operation, TxnOutcome,
};

/// What happens to a transaction a fault is aimed at.
#[derive(Debug, Clone, Copy)]
enum Action {
    /// The store fails and nothing is written.
    Fail,

    /// Every document in the given collections is deleted, then the transaction aborts.
    Clear(&'static [&'static str]),
}

#[derive(Debug)]
struct Fault {
    /// The collection a transaction must touch for this fault to count it.
    collection: &'static str,

    /// The number of matching transactions to let through first.
    skip: usize,

    action: Action,
}

/// A `MemoryDocumentStore` which injects faults into transactions on specific collections.
#[derive(Debug, Default)]
pub struct FaultyDocumentStore {
    inner: MemoryDocumentStore,
    faults: Mutex<Vec<Fault>>,
}

impl FaultyDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a transaction touching `collection` fail after letting `skip` of them through.
    pub fn fail_transaction(&self, collection: &'static str, skip: usize) {
        self.faults.lock().unwrap().push(Fault {
            collection,
            skip,
            action: Action::Fail,
        });
    }

    /// Delete everything in `cleared` right before a transaction touching `collection`, after
    /// letting `skip` of them through, and abort that transaction.
    pub fn clear_before_transaction(
        &self,
        collection: &'static str,
        skip: usize,
        cleared: &'static [&'static str],
    ) {
        self.faults.lock().unwrap().push(Fault {
            collection,
            skip,
            action: Action::Clear(cleared),
        });
    }

    /// Remove and return the first fault aimed at a transaction with these `operations`.
    fn trigger(&self, operations: &[Operation]) -> Option<Action> {
        let mut faults = self.faults.lock().unwrap();
        let mut triggered = None;
        for (index, fault) in faults.iter_mut().enumerate() {
            if !operations.iter().any(|op| op.collection == fault.collection) {
                continue;
            }
            if fault.skip > 0 {
                fault.skip -= 1;
            } else if triggered.is_none() {
                triggered = Some(index);
            }
        }
        triggered.map(|index| faults.remove(index).action)
    }

    fn clear(&self, collections: &[&str]) -> anyhow::Result<()> {
        let mut operations = Vec::new();
        for collection in collections {
            for document in self.inner.list(collection)? {
                operations.push(Operation {
                    collection: (*collection).to_owned(),
                    id: document.id,
                    assert: Assertion::Exists,
                    change: Change::Remove,
                });
            }
        }
        self.inner.run_transaction(&operations)?;
        Ok(())
    }
}

impl Deref for FaultyDocumentStore {
    type Target = MemoryDocumentStore;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DocumentStore for FaultyDocumentStore {
    fn find(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
        self.inner.find(collection, id)
    }

    fn list(&self, collection: &str) -> anyhow::Result<Vec<Document>> {
        self.inner.list(collection)
    }

    fn run_transaction(&self, operations: &[Operation]) -> anyhow::Result<TxnOutcome> {
        match self.trigger(operations) {
            None => self.inner.run_transaction(operations),
            Some(Action::Fail) => Err(anyhow!("Injected document store failure.")),
            Some(Action::Clear(collections)) => {
                self.clear(collections)?;
                Ok(TxnOutcome::Aborted)
            }
        }
    }
}
