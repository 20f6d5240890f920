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

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use uuid::Uuid;

use super::hash::ContentDigest;
use super::key::LogicalKey;

/// The largest range of a blob a client must hash to prove it has the blob.
pub const PROOF_RANGE_LENGTH: u64 = 1024;

/// A challenge issued to a client which wants to put content the store already has.
///
/// The client proves that it has the content by hashing the given byte range and answering with a
/// [`PutResponse`].
///
/// [`PutResponse`]: crate::blob::PutResponse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    /// The ID of this request.
    pub id: String,

    /// The offset of the first byte of the range to hash.
    pub range_start: u64,

    /// The number of bytes in the range to hash.
    pub range_length: u64,

    /// When this request stops being valid.
    pub expires: Instant,
}

/// A client's answer to a [`PutRequest`].
///
/// [`PutRequest`]: crate::blob::PutRequest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResponse {
    /// The ID of the request being answered.
    pub request_id: String,

    /// The digest of the requested byte range.
    pub range_digest: ContentDigest,
}

impl PutResponse {
    /// Answer `request` using the full `content` the client wants to put.
    pub fn for_content(request: &PutRequest, content: &[u8]) -> Self {
        let start = usize::try_from(request.range_start)
            .unwrap_or(usize::MAX)
            .min(content.len());
        let end = start
            .saturating_add(usize::try_from(request.range_length).unwrap_or(usize::MAX))
            .min(content.len());
        PutResponse {
            request_id: request.id.clone(),
            range_digest: ContentDigest::of(&content[start..end]),
        }
    }
}

/// An outstanding put request.
#[derive(Debug, Clone)]
pub struct PendingPut {
    /// The logical key to bind.
    pub key: LogicalKey,

    /// The digest of the content to bind.
    pub digest: ContentDigest,

    /// The length of the content to bind.
    pub length: u64,

    /// The range the client was challenged with.
    pub range_start: u64,
    pub range_length: u64,

    expires: Instant,
}

/// Return the digest of `length` bytes of `data` starting at `start`.
///
/// # Errors
/// - `Error::Io`: An I/O error occurred, or `data` ended before the range did.
pub fn range_digest(mut data: impl Read, start: u64, length: u64) -> crate::Result<ContentDigest> {
    let skipped = io::copy(&mut (&mut data).take(start), &mut io::sink())?;
    let mut range = Vec::with_capacity(length.min(PROOF_RANGE_LENGTH) as usize);
    (&mut data).take(length).read_to_end(&mut range)?;
    if skipped != start || range.len() as u64 != length {
        return Err(crate::Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "The object ended before the requested range.",
        )));
    }
    Ok(ContentDigest::of(&range))
}

/// A process-local table of outstanding put requests.
#[derive(Debug, Default)]
pub struct PutRequestTable {
    requests: Mutex<HashMap<String, PendingPut>>,
}

impl PutRequestTable {
    /// Create a new empty `PutRequestTable`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a request to put content with the given `digest` and `length` under `key`.
    ///
    /// The request challenges the client to hash a random range of the content, and it expires
    /// after `expiry`.
    pub fn issue(
        &self,
        key: LogicalKey,
        digest: ContentDigest,
        length: u64,
        expiry: Duration,
    ) -> PutRequest {
        let range_length = length.min(PROOF_RANGE_LENGTH);
        let range_start = rand::thread_rng().gen_range(0..=length - range_length);
        let now = Instant::now();
        let request = PutRequest {
            id: Uuid::new_v4().as_simple().to_string(),
            range_start,
            range_length,
            expires: now + expiry,
        };

        let mut requests = self.requests.lock().unwrap();
        requests.retain(|_, pending| pending.expires > now);
        requests.insert(
            request.id.clone(),
            PendingPut {
                key,
                digest,
                length,
                range_start,
                range_length,
                expires: request.expires,
            },
        );
        request
    }

    /// Remove and return the outstanding request with the given `id`.
    ///
    /// # Errors
    /// - `Error::RequestExpired`: There is no such request or it has expired.
    pub fn take(&self, id: &str) -> crate::Result<PendingPut> {
        let pending = self
            .requests
            .lock()
            .unwrap()
            .remove(id)
            .ok_or(crate::Error::RequestExpired)?;
        if pending.expires <= Instant::now() {
            return Err(crate::Error::RequestExpired);
        }
        Ok(pending)
    }

    /// Return the number of outstanding requests, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Return whether there are no outstanding requests.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
