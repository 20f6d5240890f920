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
use uuid::Uuid;

use crate::txn::{Assertion, Change, Document, DocumentStore, Operation, TxnOutcome};

use super::hash::ContentDigest;
use super::retry::{retry_txn, Attempt};

/// The collection which stores catalog entries keyed by their ID.
pub const CATALOG_COLLECTION: &str = "catalog";

/// The collection which maps content digests to catalog entry IDs.
pub const DIGEST_COLLECTION: &str = "catalog_digests";

/// A deduplicated record of one physical blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// The stable ID of this entry.
    pub id: String,

    /// The digest of the blob's contents.
    pub digest: ContentDigest,

    /// The length of the blob in bytes.
    pub length: u64,

    /// The number of references to this entry. This is at least 1 for every stored entry.
    pub ref_count: u64,

    /// Whether the blob's bytes have been stored in the resource store.
    pub uploaded: bool,

    /// The path of the blob in the resource store, or an empty string until it is uploaded.
    pub storage_path: String,
}

/// The document which maps a digest to the ID of its catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct DigestRecord {
    id: String,
}

/// The result of adding a reference to a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// The ID of the catalog entry.
    pub id: String,

    /// The storage path of the entry, or `None` if it hasn't been uploaded yet.
    pub storage_path: Option<String>,

    /// Whether the entry was created by this call.
    ///
    /// The caller which creates an entry is responsible for uploading its data.
    pub is_new: bool,
}

/// The result of removing a reference to a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    /// Whether this was the last reference, so the entry was deleted.
    pub was_last: bool,

    /// The storage path of the deleted entry, if it was the last reference and had been uploaded.
    ///
    /// The caller is responsible for removing this object from the resource store.
    pub storage_path: Option<String>,
}

fn encode<T: Serialize>(value: &T) -> crate::Result<Vec<u8>> {
    to_vec(value).map_err(|_| crate::Error::Serialize)
}

fn decode<'a, T: Deserialize<'a>>(document: &'a Document) -> crate::Result<T> {
    from_slice(document.data.as_slice()).map_err(|_| crate::Error::Deserialize)
}

/// A deduplicating, reference-counted index of the blobs in a resource store.
///
/// Each distinct content digest has at most one catalog entry. Every mutating operation is a single
/// multi-document transaction against the document store which asserts the state it read, and is
/// retried a bounded number of times if another writer changed that state first.
#[derive(Debug, Clone)]
pub struct ResourceCatalog {
    documents: Arc<dyn DocumentStore>,
    attempts: u32,
}

impl ResourceCatalog {
    /// Create a catalog stored in `documents` which attempts each transaction up to `attempts`
    /// times.
    pub fn new(documents: Arc<dyn DocumentStore>, attempts: u32) -> Self {
        ResourceCatalog {
            documents,
            attempts,
        }
    }

    fn find_document(&self, collection: &str, id: &str) -> crate::Result<Option<Document>> {
        self.documents
            .find(collection, id)
            .map_err(crate::Error::Unavailable)
    }

    /// Return the entry with the given `id` along with the revision of its document.
    fn load(&self, id: &str) -> crate::Result<Option<(u64, CatalogEntry)>> {
        match self.find_document(CATALOG_COLLECTION, id)? {
            Some(document) => Ok(Some((document.revision, decode(&document)?))),
            None => Ok(None),
        }
    }

    fn run(&self, operations: &[Operation]) -> crate::Result<TxnOutcome> {
        self.documents
            .run_transaction(operations)
            .map_err(crate::Error::Unavailable)
    }

    /// Add a reference to the entry for `digest`, creating the entry if necessary.
    ///
    /// If no entry exists for `digest`, this creates one with a single reference which has not been
    /// uploaded. Otherwise, this increments the reference count of the existing entry, whose data
    /// may still be in the process of being uploaded by someone else.
    ///
    /// # Errors
    /// - `Error::LengthMismatch`: An entry exists for `digest` with a different length.
    /// - `Error::Unavailable`: The document store failed or the transaction kept aborting.
    pub fn put(&self, digest: &ContentDigest, length: u64) -> crate::Result<Placement> {
        retry_txn(self.attempts, "catalog put", || {
            let record = match self.find_document(DIGEST_COLLECTION, digest.as_str())? {
                Some(document) => Some(decode::<DigestRecord>(&document)?),
                None => None,
            };

            let record = match record {
                Some(record) => record,
                None => {
                    // Assert that the digest is still unclaimed. If another put creates the entry
                    // first, the retry will find it and increment it instead.
                    let entry = CatalogEntry {
                        id: Uuid::new_v4().as_simple().to_string(),
                        digest: digest.clone(),
                        length,
                        ref_count: 1,
                        uploaded: false,
                        storage_path: String::new(),
                    };
                    let record = DigestRecord {
                        id: entry.id.clone(),
                    };
                    let outcome = self.run(&[
                        Operation::insert(DIGEST_COLLECTION, digest.as_str(), encode(&record)?),
                        Operation::insert(CATALOG_COLLECTION, &entry.id, encode(&entry)?),
                    ])?;
                    if outcome == TxnOutcome::Applied {
                        tracing::debug!(id = %entry.id, digest = %digest, "Created catalog entry");
                    }
                    return Ok(Attempt::from_outcome(
                        outcome,
                        Placement {
                            id: entry.id,
                            storage_path: None,
                            is_new: true,
                        },
                    ));
                }
            };

            let (revision, mut entry) = match self.load(&record.id)? {
                Some(loaded) => loaded,
                // The entry was removed between the two reads.
                None => return Ok(Attempt::Retry),
            };

            if entry.length != length {
                return Err(crate::Error::LengthMismatch {
                    expected: entry.length,
                    actual: length,
                });
            }

            entry.ref_count += 1;
            let outcome = self.run(&[
                Operation::check(DIGEST_COLLECTION, digest.as_str(), Assertion::Exists),
                Operation::update(CATALOG_COLLECTION, &entry.id, revision, encode(&entry)?),
            ])?;
            let storage_path = if entry.uploaded {
                Some(entry.storage_path)
            } else {
                None
            };
            Ok(Attempt::from_outcome(
                outcome,
                Placement {
                    id: entry.id,
                    storage_path,
                    is_new: false,
                },
            ))
        })
    }

    /// Record that the data for the entry with the given `id` is stored at `storage_path`.
    ///
    /// Only the first call for an entry succeeds.
    ///
    /// # Errors
    /// - `Error::NotFound`: The entry was removed. The caller should remove the object at
    /// `storage_path`.
    /// - `Error::AlreadyUploaded`: Another caller already completed the upload. The caller should
    /// remove the object at `storage_path`.
    /// - `Error::Internal`: `storage_path` is empty.
    /// - `Error::Unavailable`: The document store failed or the transaction kept aborting.
    pub fn upload_complete(&self, id: &str, storage_path: &str) -> crate::Result<()> {
        if storage_path.is_empty() {
            return Err(crate::Error::Internal(String::from(
                "An uploaded catalog entry must have a storage path.",
            )));
        }

        retry_txn(self.attempts, "catalog upload complete", || {
            let (revision, mut entry) = self.load(id)?.ok_or(crate::Error::NotFound)?;
            if entry.uploaded {
                return Err(crate::Error::AlreadyUploaded);
            }

            entry.uploaded = true;
            entry.storage_path = storage_path.to_owned();
            let outcome = self.run(&[Operation::update(
                CATALOG_COLLECTION,
                id,
                revision,
                encode(&entry)?,
            )])?;
            Ok(Attempt::from_outcome(outcome, ()))
        })?;

        tracing::debug!(id, path = storage_path, "Completed upload of catalog entry");
        Ok(())
    }

    /// Return the ID of the entry for the given `digest`.
    ///
    /// # Errors
    /// - `Error::NotFound`: There is no entry for `digest`.
    /// - `Error::Unavailable`: The document store failed.
    pub fn find(&self, digest: &ContentDigest) -> crate::Result<String> {
        let document = self
            .find_document(DIGEST_COLLECTION, digest.as_str())?
            .ok_or(crate::Error::NotFound)?;
        Ok(decode::<DigestRecord>(&document)?.id)
    }

    /// Return the uploaded entry with the given `id`.
    ///
    /// # Errors
    /// - `Error::NotFound`: There is no entry with the given `id`.
    /// - `Error::UploadPending`: The entry exists but its data has not been uploaded yet.
    /// - `Error::Unavailable`: The document store failed.
    pub fn get(&self, id: &str) -> crate::Result<CatalogEntry> {
        let (_, entry) = self.load(id)?.ok_or(crate::Error::NotFound)?;
        if entry.uploaded {
            Ok(entry)
        } else {
            Err(crate::Error::UploadPending)
        }
    }

    /// Remove a reference to the entry with the given `id`.
    ///
    /// When the last reference is removed, the entry is deleted and its storage path is returned so
    /// that the caller can remove the physical object.
    ///
    /// # Errors
    /// - `Error::NotFound`: There is no entry with the given `id`.
    /// - `Error::Unavailable`: The document store failed or the transaction kept aborting.
    pub fn remove(&self, id: &str) -> crate::Result<Removal> {
        retry_txn(self.attempts, "catalog remove", || {
            let (revision, mut entry) = self.load(id)?.ok_or(crate::Error::NotFound)?;

            if entry.ref_count > 1 {
                entry.ref_count -= 1;
                let outcome = self.run(&[Operation::update(
                    CATALOG_COLLECTION,
                    id,
                    revision,
                    encode(&entry)?,
                )])?;
                return Ok(Attempt::from_outcome(
                    outcome,
                    Removal {
                        was_last: false,
                        storage_path: None,
                    },
                ));
            }

            let outcome = self.run(&[
                Operation::remove(CATALOG_COLLECTION, id, revision),
                Operation {
                    collection: DIGEST_COLLECTION.to_owned(),
                    id: entry.digest.as_str().to_owned(),
                    assert: Assertion::Exists,
                    change: Change::Remove,
                },
            ])?;
            let storage_path = if entry.uploaded {
                Some(entry.storage_path)
            } else {
                None
            };
            if outcome == TxnOutcome::Applied {
                tracing::debug!(
                    id,
                    digest = %entry.digest,
                    "Removed last reference to catalog entry"
                );
            }
            Ok(Attempt::from_outcome(
                outcome,
                Removal {
                    was_last: true,
                    storage_path,
                },
            ))
        })
    }

    /// Return every entry in the catalog.
    ///
    /// # Errors
    /// - `Error::Unavailable`: The document store failed.
    pub fn entries(&self) -> crate::Result<Vec<CatalogEntry>> {
        self.documents
            .list(CATALOG_COLLECTION)
            .map_err(crate::Error::Unavailable)?
            .iter()
            .map(|document| decode(document))
            .collect()
    }
}
