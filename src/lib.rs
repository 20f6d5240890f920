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

//! `managed-blobstore` is a library for deduplicated, reference-counted, transactionally
//! consistent blob storage.
//!
//! Clients store and retrieve blobs by a logical key made of a bucket, a user, and a path. Blobs
//! with identical contents are stored once no matter how many keys reference them, and the storage
//! for a blob is reclaimed once no key references it anymore. The library provides the following
//! guarantees:
//! - Each distinct content digest is stored at most once.
//! - Every logical key references a catalog entry which exists.
//! - Concurrent puts of the same content under the same key are coalesced, and puts of different
//! content under the same key are applied in order, so the newest put wins.
//! - Physical objects which are no longer referenced are removed in the background, with retries.
//!
//! Metadata is kept in a `DocumentStore`, which is a small trait offering revisioned documents and
//! multi-document transactions. Blob data is kept in a `ResourceStore`. The following backends are
//! provided out of the box:
//! - `MemoryDocumentStore` stores documents in memory.
//! - `SqliteDocumentStore` stores documents in a SQLite database.
//! - `MemoryStore` stores blobs in memory.
//! - `DirectoryStore` stores blobs in a directory in the local file system.
//!
//! # Examples
//! ```
//! use std::io::Read;
//! use std::sync::Arc;
//! use managed_blobstore::store::MemoryStore;
//! use managed_blobstore::txn::MemoryDocumentStore;
//! use managed_blobstore::{ManagedStorage, StorageConfig};
//!
//! fn main() -> managed_blobstore::Result<()> {
//!     // Create a store with the default configuration that keeps everything in memory.
//!     let storage = ManagedStorage::new(
//!         Arc::new(MemoryDocumentStore::new()),
//!         Arc::new(MemoryStore::new()),
//!         StorageConfig::default(),
//!     )?;
//!
//!     // Store a blob under a logical key.
//!     let data = b"Data";
//!     storage.put_for_bucket("bucket", "user", "path", &data[..], data.len() as u64)?;
//!
//!     // Read it back.
//!     let (mut reader, length) = storage.get_for_bucket("bucket", "user", "path")?;
//!     let mut contents = Vec::new();
//!     reader.read_to_end(&mut contents)?;
//!
//!     assert_eq!(length, 4);
//!     assert_eq!(contents, b"Data");
//!
//!     // Remove it again.
//!     storage.remove_for_bucket("bucket", "user", "path")?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Features
//! Some functionality is gated behind cargo features:
//!
//! Type | Cargo Feature
//! --- | ---
//! `DirectoryStore` | `store-directory`
//! `SqliteDocumentStore` | `store-sqlite`
//!
//! To use one of these types, you must enable the corresponding feature in your `Cargo.toml`.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub use uuid;

pub use blob::{
    CleanupConfig, ContentDigest, Coordinator, LogicalKey, ManagedStorage, StorageConfig,
};
pub use error::{Error, ErrorKind, Result};

pub mod blob;
mod error;
pub mod store;
pub mod txn;
