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

//! Document stores with multi-document transactions.
//!
//! The catalog of physical blobs and the index of managed resources are stored as revisioned
//! documents in a [`DocumentStore`]. Every change to them is made by a transaction which asserts
//! the state its author last read, and the author retries when another writer got there first.
//! Stores never retry on their own; the retry loops live next to the code which builds the
//! transactions.
//!
//! [`DocumentStore`]: crate::txn::DocumentStore

pub use self::document_store::{
    Assertion, Change, Document, DocumentStore, Operation, TxnOutcome,
};
pub use self::memory::MemoryDocumentStore;
#[cfg(feature = "store-sqlite")]
pub use self::sqlite::SqliteDocumentStore;

mod document_store;
mod memory;
mod sqlite;
