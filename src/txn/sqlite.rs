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

#![cfg(feature = "store-sqlite")]

use std::fmt::{self, Debug, Formatter};
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::document_store::{Change, Document, DocumentStore, Operation, TxnOutcome};

/// A `DocumentStore` which stores documents in a SQLite database.
///
/// Transactions run inside `BEGIN IMMEDIATE`, so SQLite serializes every writer.
#[cfg_attr(docsrs, doc(cfg(feature = "store-sqlite")))]
pub struct SqliteDocumentStore {
    /// The connection to the SQLite database.
    connection: Mutex<Connection>,
}

impl Debug for SqliteDocumentStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteDocumentStore").finish_non_exhaustive()
    }
}

impl SqliteDocumentStore {
    /// Open or create a `SqliteDocumentStore` at the given `path`.
    ///
    /// # Errors
    /// - `Error::Unavailable`: The database could not be opened or initialized.
    pub fn new(path: impl AsRef<Path>) -> crate::Result<Self> {
        let connection = Connection::open(path)
            .map_err(|error| crate::Error::Unavailable(anyhow::Error::from(error)))?;
        Self::from_connection(connection)
    }

    /// Create a `SqliteDocumentStore` backed by a private in-memory database.
    ///
    /// # Errors
    /// - `Error::Unavailable`: The database could not be initialized.
    pub fn in_memory() -> crate::Result<Self> {
        let connection = Connection::open_in_memory()
            .map_err(|error| crate::Error::Unavailable(anyhow::Error::from(error)))?;
        Self::from_connection(connection)
    }

    fn from_connection(connection: Connection) -> crate::Result<Self> {
        connection
            .execute_batch(
                r#"
                    CREATE TABLE IF NOT EXISTS Documents (
                        collection TEXT NOT NULL,
                        id TEXT NOT NULL,
                        revision INTEGER NOT NULL,
                        data BLOB NOT NULL,
                        PRIMARY KEY (collection, id)
                    );
                "#,
            )
            .map_err(|error| crate::Error::Unavailable(anyhow::Error::from(error)))?;

        Ok(SqliteDocumentStore {
            connection: Mutex::new(connection),
        })
    }
}

/// Return the current revision of a document, or `None` if it doesn't exist.
fn current_revision(
    connection: &Connection,
    collection: &str,
    id: &str,
) -> rusqlite::Result<Option<u64>> {
    let revision: Option<i64> = connection
        .query_row(
            r#"
                SELECT revision FROM Documents
                WHERE collection = ?1 AND id = ?2;
            "#,
            params![collection, id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(revision.map(|revision| revision as u64))
}

impl DocumentStore for SqliteDocumentStore {
    fn find(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
        let connection = self.connection.lock().unwrap();
        let row: Option<(i64, Vec<u8>)> = connection
            .query_row(
                r#"
                    SELECT revision, data FROM Documents
                    WHERE collection = ?1 AND id = ?2;
                "#,
                params![collection, id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.map(|(revision, data)| Document {
            id: id.to_owned(),
            revision: revision as u64,
            data,
        }))
    }

    fn list(&self, collection: &str) -> anyhow::Result<Vec<Document>> {
        let connection = self.connection.lock().unwrap();
        let mut statement = connection.prepare(
            r#"
                SELECT id, revision, data FROM Documents
                WHERE collection = ?1;
            "#,
        )?;

        let result = statement
            .query_map(params![collection], |row| {
                Ok(Document {
                    id: row.get(0)?,
                    revision: row.get::<_, i64>(1)? as u64,
                    data: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<Document>, _>>()?;

        Ok(result)
    }

    fn run_transaction(&self, operations: &[Operation]) -> anyhow::Result<TxnOutcome> {
        let mut connection = self.connection.lock().unwrap();
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for operation in operations {
            let current =
                current_revision(&transaction, &operation.collection, &operation.id)?;

            // Dropping the transaction rolls back any changes made so far.
            if !operation.holds(current) {
                return Ok(TxnOutcome::Aborted);
            }

            match &operation.change {
                Change::None => {}
                Change::Insert(data) => {
                    transaction.execute(
                        r#"
                            INSERT INTO Documents (collection, id, revision, data)
                            VALUES (?1, ?2, 1, ?3);
                        "#,
                        params![operation.collection, operation.id, data.as_slice()],
                    )?;
                }
                Change::Update(data) => {
                    transaction.execute(
                        r#"
                            UPDATE Documents SET revision = revision + 1, data = ?3
                            WHERE collection = ?1 AND id = ?2;
                        "#,
                        params![operation.collection, operation.id, data.as_slice()],
                    )?;
                }
                Change::Remove => {
                    transaction.execute(
                        r#"
                            DELETE FROM Documents
                            WHERE collection = ?1 AND id = ?2;
                        "#,
                        params![operation.collection, operation.id],
                    )?;
                }
            }
        }

        transaction.commit()?;
        Ok(TxnOutcome::Applied)
    }
}
