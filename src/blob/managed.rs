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

use std::sync::Arc;

use rmp_serde::{from_slice, to_vec};
use serde::{Deserialize, Serialize};

use crate::txn::{Document, DocumentStore, Operation, TxnOutcome};

use super::key::LogicalKey;
use super::retry::{retry_txn, Attempt};

/// The collection which stores managed resources keyed by their canonical logical key.
pub const MANAGED_COLLECTION: &str = "managed_resources";

/// The binding of a logical key to a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ManagedResource {
    key: LogicalKey,
    catalog_id: String,
}

/// An index which binds logical keys to catalog entry IDs.
///
/// Each logical key is bound to at most one catalog entry. Bindings are stored under the key's
/// canonical form, which is identical for every writer.
#[derive(Debug, Clone)]
pub struct ManagedResourceIndex {
    documents: Arc<dyn DocumentStore>,
    attempts: u32,
}

impl ManagedResourceIndex {
    /// Create an index stored in `documents` which attempts each transaction up to `attempts`
    /// times.
    pub fn new(documents: Arc<dyn DocumentStore>, attempts: u32) -> Self {
        ManagedResourceIndex {
            documents,
            attempts,
        }
    }

    /// Return the binding for `key` and the revision of its document.
    fn load(&self, key: &LogicalKey) -> crate::Result<Option<(u64, ManagedResource)>> {
        let document = self
            .documents
            .find(MANAGED_COLLECTION, &key.canonical())
            .map_err(crate::Error::Unavailable)?;
        match document {
            Some(document) => {
                let resource = decode(&document)?;
                if resource.key != *key {
                    return Err(crate::Error::Internal(format!(
                        "The canonical forms of '{}' and '{}' collide.",
                        resource.key, key
                    )));
                }
                Ok(Some((document.revision, resource)))
            }
            None => Ok(None),
        }
    }

    fn run(&self, operations: &[Operation]) -> crate::Result<TxnOutcome> {
        self.documents
            .run_transaction(operations)
            .map_err(crate::Error::Unavailable)
    }

    /// Bind `key` to the catalog entry `catalog_id`.
    ///
    /// This returns the ID of the catalog entry `key` was previously bound to, if any. The caller
    /// is responsible for removing the reference to that entry.
    ///
    /// # Errors
    /// - `Error::Unavailable`: The document store failed or the transaction kept aborting.
    pub fn put_managed_resource(
        &self,
        key: &LogicalKey,
        catalog_id: &str,
    ) -> crate::Result<Option<String>> {
        let canonical = key.canonical();
        let resource = ManagedResource {
            key: key.clone(),
            catalog_id: catalog_id.to_owned(),
        };
        let data = encode(&resource)?;

        retry_txn(self.attempts, "managed resource put", || match self.load(key)? {
            Some((revision, previous)) => {
                let outcome = self.run(&[Operation::update(
                    MANAGED_COLLECTION,
                    &canonical,
                    revision,
                    data.clone(),
                )])?;
                Ok(Attempt::from_outcome(outcome, Some(previous.catalog_id)))
            }
            None => {
                let outcome = self.run(&[Operation::insert(
                    MANAGED_COLLECTION,
                    &canonical,
                    data.clone(),
                )])?;
                Ok(Attempt::from_outcome(outcome, None))
            }
        })
    }

    /// Unbind `key`.
    ///
    /// This returns the ID of the catalog entry `key` was bound to, or `None` if it was unbound.
    ///
    /// # Errors
    /// - `Error::Unavailable`: The document store failed or the transaction kept aborting.
    pub fn remove(&self, key: &LogicalKey) -> crate::Result<Option<String>> {
        let canonical = key.canonical();
        retry_txn(self.attempts, "managed resource remove", || {
            match self.load(key)? {
                Some((revision, previous)) => {
                    let outcome =
                        self.run(&[Operation::remove(MANAGED_COLLECTION, &canonical, revision)])?;
                    Ok(Attempt::from_outcome(outcome, Some(previous.catalog_id)))
                }
                None => Ok(Attempt::Done(None)),
            }
        })
    }

    /// Return the ID of the catalog entry `key` is bound to.
    ///
    /// # Errors
    /// - `Error::NotFound`: `key` is unbound.
    /// - `Error::Unavailable`: The document store failed.
    pub fn lookup(&self, key: &LogicalKey) -> crate::Result<String> {
        let (_, resource) = self.load(key)?.ok_or(crate::Error::NotFound)?;
        Ok(resource.catalog_id)
    }

    /// Return every binding in the index.
    ///
    /// # Errors
    /// - `Error::Unavailable`: The document store failed.
    pub fn bindings(&self) -> crate::Result<Vec<(LogicalKey, String)>> {
        self.documents
            .list(MANAGED_COLLECTION)
            .map_err(crate::Error::Unavailable)?
            .iter()
            .map(|document| {
                let resource: ManagedResource = decode(document)?;
                Ok((resource.key, resource.catalog_id))
            })
            .collect()
    }
}

fn encode(resource: &ManagedResource) -> crate::Result<Vec<u8>> {
    to_vec(resource).map_err(|_| crate::Error::Serialize)
}

fn decode(document: &Document) -> crate::Result<ManagedResource> {
    from_slice(document.data.as_slice()).map_err(|_| crate::Error::Deserialize)
}
