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

use anyhow::anyhow;

use crate::txn::TxnOutcome;

/// The result of one attempt at an optimistic transaction.
pub enum Attempt<T> {
    /// The attempt finished with this value.
    Done(T),

    /// The state changed between reading and committing, so the attempt must be repeated.
    Retry,
}

impl<T> Attempt<T> {
    /// Return `Done(value)` if the transaction applied or `Retry` if it aborted.
    pub fn from_outcome(outcome: TxnOutcome, value: T) -> Self {
        match outcome {
            TxnOutcome::Applied => Attempt::Done(value),
            TxnOutcome::Aborted => Attempt::Retry,
        }
    }
}

/// Run `attempt` until it is done, making at most `attempts` attempts.
///
/// Errors returned by `attempt` end the loop immediately. Running out of attempts is reported as
/// `Error::Unavailable`.
pub fn retry_txn<T>(
    attempts: u32,
    operation: &str,
    mut attempt: impl FnMut() -> crate::Result<Attempt<T>>,
) -> crate::Result<T> {
    for number in 1..=attempts.max(1) {
        match attempt()? {
            Attempt::Done(value) => return Ok(value),
            Attempt::Retry => {
                tracing::debug!(operation, attempt = number, "Transaction aborted, retrying");
            }
        }
    }

    tracing::warn!(operation, attempts, "Transaction did not commit");
    Err(crate::Error::Unavailable(anyhow!(
        "The {} transaction did not commit after {} attempts.",
        operation,
        attempts
    )))
}
