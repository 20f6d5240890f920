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

use std::fmt::{self, Display, Formatter};
use std::io::{self, Read};

use digest::Digest;
use serde::{Deserialize, Serialize};
use sha2::Sha384;

/// The size of the buffer to use when copying bytes.
pub const BUFFER_SIZE: usize = 1024 * 16;

/// The number of hex characters in a SHA-384 digest.
const DIGEST_HEX_LEN: usize = 96;

/// The SHA-384 digest of some content, encoded as lowercase hex.
///
/// Every writer sharing a catalog must agree on the hash function, so it is fixed rather than
/// configurable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Return the digest of the given `data`.
    pub fn of(data: &[u8]) -> Self {
        Self::from_hasher(Sha384::new_with_prefix(data))
    }

    /// Compute and return the digest of all the bytes read from `data`.
    ///
    /// # Errors
    /// - `Error::Io`: An I/O error occurred.
    pub fn hash(mut data: impl Read) -> crate::Result<Self> {
        let mut buffer = [0u8; BUFFER_SIZE];
        let mut hasher = Sha384::new();
        let mut bytes_read;

        loop {
            bytes_read = data.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(Self::from_hasher(hasher))
    }

    /// Parse a hex-encoded digest.
    ///
    /// This accepts upper or lower case and returns `None` if `hex` is not a SHA-384 digest.
    pub fn parse(hex: &str) -> Option<Self> {
        if hex.len() == DIGEST_HEX_LEN && hex.bytes().all(|byte| byte.is_ascii_hexdigit()) {
            Some(ContentDigest(hex.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Return the digest as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_hasher(hasher: Sha384) -> Self {
        ContentDigest(format!("{:x}", hasher.finalize()))
    }
}

impl Display for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reader which hashes and counts the bytes passing through it.
///
/// At most one byte more than the declared length is read from the inner reader. That is enough to
/// detect oversized input without draining a stream of unbounded length.
///
/// Errors from the inner reader are kept so they can be told apart from failures of whatever is
/// consuming this reader. See [`take_error`].
///
/// [`take_error`]: crate::blob::DigestReader::take_error
#[derive(Debug)]
pub struct DigestReader<R> {
    inner: R,
    hasher: Sha384,
    remaining: u64,
    bytes_read: u64,
    error: Option<io::Error>,
}

impl<R: Read> DigestReader<R> {
    /// Wrap `inner`, which is expected to yield exactly `length` bytes.
    pub fn new(inner: R, length: u64) -> Self {
        DigestReader {
            inner,
            hasher: Sha384::new(),
            remaining: length.saturating_add(1),
            bytes_read: 0,
            error: None,
        }
    }

    /// Return the error the inner reader failed with, if it failed.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    /// Return the digest of the bytes read so far and how many there were.
    pub fn finish(self) -> (ContentDigest, u64) {
        (ContentDigest::from_hasher(self.hasher), self.bytes_read)
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let bytes_read = match self.inner.read(&mut buf[..max]) {
            Ok(bytes_read) => bytes_read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => return Err(error),
            Err(error) => {
                let kind = error.kind();
                self.error = Some(error);
                return Err(io::Error::new(kind, "Reading the data to store failed."));
            }
        };
        self.hasher.update(&buf[..bytes_read]);
        self.remaining -= bytes_read as u64;
        self.bytes_read += bytes_read as u64;
        Ok(bytes_read)
    }
}
