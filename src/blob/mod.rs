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

//! Deduplicated, reference-counted blob storage addressed by logical keys.
//!
//! This module provides [`ManagedStorage`], which maps logical keys of bucket, user, and path to
//! blobs. Internally, it is built from the following parts:
//! - [`ResourceCatalog`] records each distinct blob once, keyed by the SHA-384 digest of its
//! contents, along with the number of references to it.
//! - [`ManagedResourceIndex`] binds each logical key to a catalog entry.
//! - [`RequestRegistry`] coalesces concurrent puts of the same content under the same key and
//! orders puts of different content so the newest one wins.
//! - [`Cleaner`] removes physical objects which are no longer referenced, retrying with backoff
//! when the resource store fails.
//!
//! The catalog and the index live in a [`DocumentStore`], and every change to them is an
//! optimistic transaction. Blob data lives in a [`ResourceStore`].
//!
//! # Consistency
//! A physical object is only removed once no catalog entry references it, and a catalog entry only
//! exists while some logical key references it. A crash between steps of a put can leave an
//! unreferenced physical object behind, but never a logical key which references missing data.
//!
//! [`ManagedStorage`]: crate::blob::ManagedStorage
//! [`ResourceCatalog`]: crate::blob::ResourceCatalog
//! [`ManagedResourceIndex`]: crate::blob::ManagedResourceIndex
//! [`RequestRegistry`]: crate::blob::RequestRegistry
//! [`Cleaner`]: crate::blob::Cleaner
//! [`DocumentStore`]: crate::txn::DocumentStore
//! [`ResourceStore`]: crate::store::ResourceStore

pub use self::access::{range_digest, PendingPut, PutRequest, PutRequestTable, PutResponse};
pub use self::access::PROOF_RANGE_LENGTH;
pub use self::catalog::{CatalogEntry, Placement, Removal, ResourceCatalog};
pub use self::catalog::{CATALOG_COLLECTION, DIGEST_COLLECTION};
pub use self::cleanup::{backoff, Cleaner, CleanupReason};
pub use self::coalesce::{Outcome, Registration, RequestRegistry, Ticket, Waiter};
pub use self::config::{CleanupConfig, StorageConfig};
pub use self::hash::{ContentDigest, DigestReader};
pub use self::key::LogicalKey;
pub use self::managed::{ManagedResourceIndex, MANAGED_COLLECTION};
pub use self::storage::{Coordinator, ManagedStorage};

mod access;
mod catalog;
mod cleanup;
mod coalesce;
mod config;
mod hash;
mod key;
mod managed;
mod retry;
mod storage;
