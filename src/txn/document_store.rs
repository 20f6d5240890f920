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

use std::fmt;

use static_assertions::assert_obj_safe;

/// A revisioned document in a [`DocumentStore`].
///
/// [`DocumentStore`]: crate::txn::DocumentStore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// The ID of the document, unique within its collection.
    pub id: String,

    /// The revision of the document.
    ///
    /// A document is created with revision 1, and every update increments it by 1.
    pub revision: u64,

    /// The serialized contents of the document.
    pub data: Vec<u8>,
}

/// A condition on the current state of a document which must hold for a transaction to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assertion {
    /// The document may be in any state.
    Any,

    /// The document must not exist.
    Missing,

    /// The document must exist.
    Exists,

    /// The document must exist and have exactly this revision.
    Revision(u64),
}

/// A change to make to a document as part of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Leave the document as it is.
    None,

    /// Create the document. The transaction aborts if the document already exists.
    Insert(Vec<u8>),

    /// Replace the contents of the document. The transaction aborts if it doesn't exist.
    Update(Vec<u8>),

    /// Delete the document. The transaction aborts if it doesn't exist.
    Remove,
}

/// One step of a multi-document transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// The collection containing the document.
    pub collection: String,

    /// The ID of the document.
    pub id: String,

    /// The condition the document must satisfy.
    pub assert: Assertion,

    /// The change to make to the document.
    pub change: Change,
}

impl Operation {
    /// Assert that the given document satisfies `assert` without changing it.
    pub fn check(collection: &str, id: &str, assert: Assertion) -> Self {
        Operation {
            collection: collection.to_owned(),
            id: id.to_owned(),
            assert,
            change: Change::None,
        }
    }

    /// Create the given document with `data`, asserting that it doesn't exist yet.
    pub fn insert(collection: &str, id: &str, data: Vec<u8>) -> Self {
        Operation {
            collection: collection.to_owned(),
            id: id.to_owned(),
            assert: Assertion::Missing,
            change: Change::Insert(data),
        }
    }

    /// Replace the given document with `data`, asserting that it is still at `revision`.
    pub fn update(collection: &str, id: &str, revision: u64, data: Vec<u8>) -> Self {
        Operation {
            collection: collection.to_owned(),
            id: id.to_owned(),
            assert: Assertion::Revision(revision),
            change: Change::Update(data),
        }
    }

    /// Delete the given document, asserting that it is still at `revision`.
    pub fn remove(collection: &str, id: &str, revision: u64) -> Self {
        Operation {
            collection: collection.to_owned(),
            id: id.to_owned(),
            assert: Assertion::Revision(revision),
            change: Change::Remove,
        }
    }

    /// Return whether `assert` holds for a document at `revision`, or a missing one for `None`.
    pub fn holds(&self, revision: Option<u64>) -> bool {
        let asserted = match (self.assert, revision) {
            (Assertion::Any, _) => true,
            (Assertion::Missing, current) => current.is_none(),
            (Assertion::Exists, current) => current.is_some(),
            (Assertion::Revision(expected), Some(current)) => expected == current,
            (Assertion::Revision(_), None) => false,
        };
        let applicable = match (&self.change, revision) {
            (Change::None, _) => true,
            (Change::Insert(_), current) => current.is_none(),
            (Change::Update(_), current) | (Change::Remove, current) => current.is_some(),
        };
        asserted && applicable
    }
}

/// The result of running a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOutcome {
    /// Every assertion held and every change was written.
    Applied,

    /// An assertion failed and nothing was written.
    Aborted,
}

/// A document store with multi-document transactions.
///
/// A `DocumentStore` holds the catalog and the managed resource index. Transactions use
/// optimistic concurrency: a caller reads documents, builds a transaction asserting the state it
/// read, and retries if the transaction aborts. Implementations must commit transactions
/// atomically and linearizably; reads outside of a transaction may be slightly stale.
///
/// Implementations never retry aborted transactions on their own.
pub trait DocumentStore: fmt::Debug + Send + Sync {
    /// Return the document with the given `id` in `collection`.
    ///
    /// If there is no such document, this returns `Ok(None)`.
    fn find(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>>;

    /// Return every document in `collection`.
    fn list(&self, collection: &str) -> anyhow::Result<Vec<Document>>;

    /// Atomically apply the given `operations` in order.
    ///
    /// Later operations observe the effects of earlier ones. If any assertion fails, nothing is
    /// written and this returns `Ok(TxnOutcome::Aborted)`. `Err` is reserved for failures of the
    /// store itself, in which case it is unknown whether the transaction was applied.
    fn run_transaction(&self, operations: &[Operation]) -> anyhow::Result<TxnOutcome>;
}

assert_obj_safe!(DocumentStore);
