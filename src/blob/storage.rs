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

use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::anyhow;
use uuid::Uuid;

use crate::store::ResourceStore;
use crate::txn::DocumentStore;

use super::access::{range_digest, PutRequest, PutRequestTable, PutResponse};
use super::catalog::{CatalogEntry, ResourceCatalog};
use super::cleanup::{Cleaner, CleanupReason};
use super::coalesce::{Outcome, Registration, RequestRegistry};
use super::config::StorageConfig;
use super::hash::{ContentDigest, DigestReader};
use super::key::LogicalKey;
use super::managed::ManagedResourceIndex;

/// The process-wide state shared by every [`ManagedStorage`] over the same resource store.
///
/// This holds the registry of in-flight puts, the deferred cleanup queue and its worker thread,
/// and the table of outstanding put requests. Create one when the process starts and hand it to
/// each [`ManagedStorage`] with [`ManagedStorage::with_coordinator`].
///
/// [`ManagedStorage`]: crate::ManagedStorage
/// [`ManagedStorage::with_coordinator`]: crate::ManagedStorage::with_coordinator
#[derive(Debug)]
pub struct Coordinator {
    requests: RequestRegistry,
    cleaner: Cleaner,
    put_requests: PutRequestTable,
}

impl Coordinator {
    /// Start a coordinator whose cleaner removes objects from `resources`.
    ///
    /// # Errors
    /// - `Error::Io`: The cleanup thread could not be spawned.
    pub fn start(
        resources: Arc<dyn ResourceStore>,
        config: &StorageConfig,
    ) -> crate::Result<Arc<Self>> {
        Ok(Arc::new(Coordinator {
            requests: RequestRegistry::new(),
            cleaner: Cleaner::start(resources, config.cleanup.clone())?,
            put_requests: PutRequestTable::new(),
        }))
    }

    /// The registry of in-flight puts.
    pub fn requests(&self) -> &RequestRegistry {
        &self.requests
    }

    /// The deferred cleanup queue.
    pub fn cleaner(&self) -> &Cleaner {
        &self.cleaner
    }

    /// The table of outstanding put requests.
    pub fn put_requests(&self) -> &PutRequestTable {
        &self.put_requests
    }
}

/// Content which is ready to be bound to a logical key.
#[derive(Debug)]
struct Content<'a> {
    digest: &'a ContentDigest,
    length: u64,

    /// The path of the freshly uploaded copy, or `None` if the content must already be stored.
    temp_path: Option<&'a str>,
}

/// A deduplicated, reference-counted blob store.
///
/// Clients address blobs by a logical key of bucket, user, and path. Blobs with the same content
/// are stored once and shared through the [`ResourceCatalog`], while the [`ManagedResourceIndex`]
/// binds each logical key to a catalog entry. Physical objects are removed once nothing references
/// them.
///
/// All methods take `&self`, and a `ManagedStorage` can be shared between threads.
///
/// [`ResourceCatalog`]: crate::blob::ResourceCatalog
/// [`ManagedResourceIndex`]: crate::blob::ManagedResourceIndex
#[derive(Debug)]
pub struct ManagedStorage {
    resources: Arc<dyn ResourceStore>,
    catalog: ResourceCatalog,
    index: ManagedResourceIndex,
    coordinator: Arc<Coordinator>,
    config: StorageConfig,
}

impl ManagedStorage {
    /// Create a `ManagedStorage` with its own [`Coordinator`].
    ///
    /// # Errors
    /// - `Error::Io`: The cleanup thread could not be spawned.
    ///
    /// [`Coordinator`]: crate::Coordinator
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        resources: Arc<dyn ResourceStore>,
        config: StorageConfig,
    ) -> crate::Result<Self> {
        let coordinator = Coordinator::start(Arc::clone(&resources), &config)?;
        Ok(Self::with_coordinator(
            documents,
            resources,
            coordinator,
            config,
        ))
    }

    /// Create a `ManagedStorage` which shares an existing `coordinator`.
    ///
    /// The `coordinator` must have been started over the same `resources`.
    pub fn with_coordinator(
        documents: Arc<dyn DocumentStore>,
        resources: Arc<dyn ResourceStore>,
        coordinator: Arc<Coordinator>,
        config: StorageConfig,
    ) -> Self {
        ManagedStorage {
            resources,
            catalog: ResourceCatalog::new(Arc::clone(&documents), config.txn_attempts),
            index: ManagedResourceIndex::new(documents, config.txn_attempts),
            coordinator,
            config,
        }
    }

    /// The catalog of physical blobs.
    pub fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    /// The index of logical keys.
    pub fn index(&self) -> &ManagedResourceIndex {
        &self.index
    }

    /// The process-wide state this store uses.
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    fn schedule(&self, path: &str, reason: CleanupReason) {
        self.coordinator.cleaner.schedule(path.to_owned(), reason);
    }

    /// Store `length` bytes read from `data` under the given logical key.
    ///
    /// If the key is already bound, it is rebound to the new content and the previous content is
    /// released.
    ///
    /// # Errors
    /// - `Error::InvalidKey`: The bucket, user, or path is empty.
    /// - `Error::LengthMismatch`: `data` did not yield exactly `length` bytes, or the same content
    /// is already stored with a different length.
    /// - `Error::Timeout`: Another put for the same key or of the same content took too long.
    /// - `Error::Unavailable`: The document store or the resource store failed.
    /// - `Error::Io`: Reading from `data` failed.
    pub fn put_for_bucket(
        &self,
        bucket: &str,
        user: &str,
        path: &str,
        data: impl Read,
        length: u64,
    ) -> crate::Result<()> {
        self.put(bucket, user, path, data, length, None)
    }

    /// Store `length` bytes read from `data` under the given logical key if they have the
    /// `expected` digest.
    ///
    /// # Errors
    /// - `Error::HashMismatch`: The digest of `data` is not `expected`. Nothing is stored.
    /// - Every error `put_for_bucket` can return.
    pub fn put_for_bucket_and_check_hash(
        &self,
        bucket: &str,
        user: &str,
        path: &str,
        data: impl Read,
        length: u64,
        expected: &ContentDigest,
    ) -> crate::Result<()> {
        self.put(bucket, user, path, data, length, Some(expected))
    }

    fn put(
        &self,
        bucket: &str,
        user: &str,
        path: &str,
        data: impl Read,
        length: u64,
        expected: Option<&ContentDigest>,
    ) -> crate::Result<()> {
        let key = LogicalKey::new(bucket, user, path)?;
        let temp_path = Uuid::new_v4().as_simple().to_string();

        // Hash the data while streaming it into the resource store so it is only read once.
        let mut reader = DigestReader::new(data, length);
        if let Err(error) = self.resources.put(&temp_path, &mut reader, length) {
            self.schedule(&temp_path, CleanupReason::FailedUpload);
            // Only failures of the caller's reader are I/O errors; the store's own are not.
            return Err(match reader.take_error() {
                Some(error) => crate::Error::Io(error),
                None => crate::Error::Unavailable(error),
            });
        }
        let (digest, bytes_read) = reader.finish();

        if bytes_read != length {
            self.schedule(&temp_path, CleanupReason::Rejected);
            return Err(crate::Error::LengthMismatch {
                expected: length,
                actual: bytes_read,
            });
        }

        if let Some(expected) = expected {
            if *expected != digest {
                self.schedule(&temp_path, CleanupReason::Rejected);
                return Err(crate::Error::HashMismatch {
                    expected: expected.to_string(),
                    actual: digest.to_string(),
                });
            }
        }

        self.commit(
            &key,
            Content {
                digest: &digest,
                length,
                temp_path: Some(&temp_path),
            },
        )
    }

    /// Run the put sequence which binds `key` to `content`.
    fn commit(&self, key: &LogicalKey, content: Content<'_>) -> crate::Result<()> {
        let canonical = key.canonical();

        for _ in 0..=self.config.txn_attempts {
            let registration = self.coordinator.requests.register(
                &canonical,
                content.digest,
                content.length,
                self.config.inflight_wait,
            );
            let registration = match registration {
                Ok(registration) => registration,
                Err(error) => {
                    self.discard(&content, CleanupReason::FailedUpload);
                    return Err(error);
                }
            };

            match registration {
                Registration::Leader(ticket) => {
                    let result = self.bind(key, &content);
                    ticket.finish(match &result {
                        Ok(catalog_id) => Outcome::Bound {
                            catalog_id: catalog_id.clone(),
                        },
                        Err(error) => Outcome::Failed(error.kind()),
                    });
                    return result.map(|_| ());
                }
                Registration::Follower(waiter) => {
                    match waiter.wait(self.config.inflight_wait) {
                        Some(Outcome::Bound { catalog_id }) => {
                            tracing::debug!(
                                key = %key,
                                digest = %content.digest,
                                catalog_id = %catalog_id,
                                "Coalesced put with an identical in-flight put"
                            );
                            self.discard(&content, CleanupReason::Duplicate);
                            return Ok(());
                        }
                        Some(Outcome::Failed(kind)) => {
                            tracing::debug!(
                                key = %key,
                                ?kind,
                                "Identical in-flight put failed, retrying"
                            );
                        }
                        None => {
                            self.discard(&content, CleanupReason::FailedUpload);
                            return Err(crate::Error::Timeout);
                        }
                    }
                }
            }
        }

        self.discard(&content, CleanupReason::FailedUpload);
        Err(crate::Error::Unavailable(anyhow!(
            "Identical in-flight puts for '{}' kept failing.",
            key
        )))
    }

    /// Schedule the temporary copy of `content`, if any, for removal.
    fn discard(&self, content: &Content<'_>, reason: CleanupReason) {
        if let Some(temp_path) = content.temp_path {
            self.schedule(temp_path, reason);
        }
    }

    /// Reference the catalog entry for `content`, bind `key` to it, and release the entry `key`
    /// was bound to before.
    ///
    /// This returns the ID of the catalog entry `key` is now bound to.
    fn bind(&self, key: &LogicalKey, content: &Content<'_>) -> crate::Result<String> {
        let catalog_id = self.acquire(content)?;

        let previous = match self.index.put_managed_resource(key, &catalog_id) {
            Ok(previous) => previous,
            Err(error) => {
                self.release(&catalog_id);
                return Err(error);
            }
        };

        // Re-putting the same content under the same key leaves one binding but added a reference,
        // so the previous entry is released even when it is the same one.
        if let Some(previous) = previous {
            tracing::debug!(key = %key, from = %previous, to = %catalog_id, "Rebound logical key");
            self.release(&previous);
        }

        Ok(catalog_id)
    }

    /// Add a reference to the catalog entry for `content`, making sure its data is stored.
    ///
    /// This returns the ID of the catalog entry. On success, the temporary copy of `content` has
    /// either become the entry's storage path or been scheduled for removal.
    fn acquire(&self, content: &Content<'_>) -> crate::Result<String> {
        for _ in 0..self.config.txn_attempts.max(1) {
            let placement = match self.catalog.put(content.digest, content.length) {
                Ok(placement) => placement,
                Err(error) => {
                    self.discard(content, CleanupReason::FailedUpload);
                    return Err(error);
                }
            };

            if !placement.is_new {
                // Someone else already has, or soon will have, a copy of this content.
                self.discard(content, CleanupReason::Duplicate);
                if placement.storage_path.is_none() {
                    if let Err(error) = self.wait_for_upload(&placement.id) {
                        self.release(&placement.id);
                        return Err(error);
                    }
                }
                return Ok(placement.id);
            }

            let temp_path = match content.temp_path {
                Some(temp_path) => temp_path,
                None => {
                    // The content was expected to be stored already, but its entry is gone.
                    self.release(&placement.id);
                    return Err(crate::Error::NotFound);
                }
            };

            match self.catalog.upload_complete(&placement.id, temp_path) {
                Ok(()) => return Ok(placement.id),
                Err(crate::Error::AlreadyUploaded) => {
                    self.schedule(temp_path, CleanupReason::Duplicate);
                    return Ok(placement.id);
                }
                Err(crate::Error::NotFound) => {
                    // The entry was removed concurrently. The data is content-addressed, so it is
                    // safe to start over.
                    tracing::debug!(
                        id = %placement.id,
                        digest = %content.digest,
                        "Catalog entry removed before upload completed, retrying"
                    );
                }
                Err(error) => {
                    self.release(&placement.id);
                    self.schedule(temp_path, CleanupReason::FailedUpload);
                    return Err(error);
                }
            }
        }

        self.discard(content, CleanupReason::FailedUpload);
        Err(crate::Error::Unavailable(anyhow!(
            "The catalog entry for {} kept disappearing.",
            content.digest
        )))
    }

    /// Wait for a concurrent uploader to finish uploading the catalog entry with the given `id`.
    fn wait_for_upload(&self, id: &str) -> crate::Result<CatalogEntry> {
        let deadline = Instant::now() + self.config.upload_wait;
        loop {
            match self.catalog.get(id) {
                Err(crate::Error::UploadPending) => {}
                result => return result,
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(id, "Timed out waiting for a concurrent upload");
                return Err(crate::Error::Timeout);
            }
            thread::sleep(self.config.upload_poll_interval.min(deadline - now));
        }
    }

    /// Remove a reference to the catalog entry with the given `id`.
    ///
    /// Failures are logged rather than returned. They leave the reference count higher than it
    /// should be, which only delays reclaiming space.
    fn release(&self, id: &str) {
        match self.catalog.remove(id) {
            Ok(removal) => {
                if let Some(storage_path) = removal.storage_path {
                    self.schedule(&storage_path, CleanupReason::Released);
                }
            }
            Err(error) => {
                tracing::warn!(id, error = %error, "Could not release catalog entry");
            }
        }
    }

    /// Return a reader for the blob stored under the given logical key and its length.
    ///
    /// This never waits for puts of the same key which are still in flight; it reads whichever
    /// binding is committed.
    ///
    /// # Errors
    /// - `Error::InvalidKey`: The bucket, user, or path is empty.
    /// - `Error::NotFound`: Nothing is stored under the key.
    /// - `Error::UploadPending`: The blob has not finished uploading.
    /// - `Error::Unavailable`: The document store or the resource store failed.
    pub fn get_for_bucket(
        &self,
        bucket: &str,
        user: &str,
        path: &str,
    ) -> crate::Result<(Box<dyn Read + Send>, u64)> {
        let key = LogicalKey::new(bucket, user, path)?;
        let catalog_id = self.index.lookup(&key)?;
        let entry = self.catalog.get(&catalog_id)?;
        let reader = self
            .resources
            .get(&entry.storage_path)
            .map_err(crate::Error::Unavailable)?
            .ok_or(crate::Error::NotFound)?;
        Ok((reader, entry.length))
    }

    /// Remove the blob stored under the given logical key.
    ///
    /// Removing a key which is not bound does nothing.
    ///
    /// # Errors
    /// - `Error::InvalidKey`: The bucket, user, or path is empty.
    /// - `Error::Unavailable`: The document store failed.
    pub fn remove_for_bucket(&self, bucket: &str, user: &str, path: &str) -> crate::Result<()> {
        let key = LogicalKey::new(bucket, user, path)?;
        if let Some(catalog_id) = self.index.remove(&key)? {
            tracing::debug!(key = %key, catalog_id = %catalog_id, "Unbound logical key");
            self.release(&catalog_id);
        }
        Ok(())
    }

    /// Request to put content which may already be stored without uploading it.
    ///
    /// The returned request challenges the client to prove that it has the content. Answer it with
    /// [`prove_access`].
    ///
    /// # Errors
    /// - `Error::InvalidKey`: The bucket, user, or path is empty.
    /// - `Error::NotFound`: No content with the given `digest` is stored.
    /// - `Error::UploadPending`: The content has not finished uploading.
    /// - `Error::Unavailable`: The document store failed.
    ///
    /// [`prove_access`]: crate::ManagedStorage::prove_access
    pub fn put_for_bucket_request(
        &self,
        bucket: &str,
        user: &str,
        path: &str,
        digest: &ContentDigest,
    ) -> crate::Result<PutRequest> {
        let key = LogicalKey::new(bucket, user, path)?;
        let entry = self.catalog.get(&self.catalog.find(digest)?)?;
        Ok(self.coordinator.put_requests.issue(
            key,
            entry.digest,
            entry.length,
            self.config.put_request_expiry,
        ))
    }

    /// Answer a request made by [`put_for_bucket_request`] and bind the content if the proof holds.
    ///
    /// # Errors
    /// - `Error::RequestExpired`: The request is unknown, was already answered, or has expired.
    /// - `Error::HashMismatch`: The proof does not match the stored content.
    /// - `Error::NotFound`: The content was removed since the request was made.
    /// - `Error::Timeout`: Another put for the same key took too long.
    /// - `Error::Unavailable`: The document store or the resource store failed.
    ///
    /// [`put_for_bucket_request`]: crate::ManagedStorage::put_for_bucket_request
    pub fn prove_access(&self, response: &PutResponse) -> crate::Result<()> {
        let pending = self.coordinator.put_requests.take(&response.request_id)?;

        let entry = self.catalog.get(&self.catalog.find(&pending.digest)?)?;
        let reader = self
            .resources
            .get(&entry.storage_path)
            .map_err(crate::Error::Unavailable)?
            .ok_or(crate::Error::NotFound)?;
        let actual = range_digest(reader, pending.range_start, pending.range_length)?;
        if actual != response.range_digest {
            return Err(crate::Error::HashMismatch {
                expected: actual.to_string(),
                actual: response.range_digest.to_string(),
            });
        }

        self.commit(
            &pending.key,
            Content {
                digest: &pending.digest,
                length: pending.length,
                temp_path: None,
            },
        )
    }
}
