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

use serde::{Deserialize, Serialize};

use super::hash::ContentDigest;

/// The separator placed between the components of a key before it is hashed.
const SEPARATOR: char = ':';

/// The character used to escape separators and itself within a component.
const ESCAPE: char = '\\';

/// The address under which clients store a blob.
///
/// Keys in different buckets are disjoint. The `path` may contain slashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalKey {
    /// The UUID of the bucket which scopes this key.
    pub bucket: String,

    /// The user who owns the blob.
    pub user: String,

    /// The path of the blob within the bucket.
    pub path: String,
}

impl LogicalKey {
    /// Create a new `LogicalKey`.
    ///
    /// # Errors
    /// - `Error::InvalidKey`: One of the components is empty.
    pub fn new(bucket: &str, user: &str, path: &str) -> crate::Result<Self> {
        if bucket.is_empty() || user.is_empty() || path.is_empty() {
            return Err(crate::Error::InvalidKey);
        }
        Ok(LogicalKey {
            bucket: bucket.to_owned(),
            user: user.to_owned(),
            path: path.to_owned(),
        })
    }

    /// Return the canonical form of this key.
    ///
    /// This is the digest of the escaped, separator-joined components. It is the same for every
    /// writer, so it can serve as a unique document ID.
    pub fn canonical(&self) -> String {
        let mut joined = String::with_capacity(
            self.bucket.len() + self.user.len() + self.path.len() + 2,
        );
        for (index, component) in [&self.bucket, &self.user, &self.path].iter().enumerate() {
            if index > 0 {
                joined.push(SEPARATOR);
            }
            escape_into(component, &mut joined);
        }
        ContentDigest::of(joined.as_bytes()).as_str().to_owned()
    }
}

impl Display for LogicalKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.bucket, self.user, self.path)
    }
}

fn escape_into(component: &str, output: &mut String) {
    for character in component.chars() {
        if character == SEPARATOR || character == ESCAPE {
            output.push(ESCAPE);
        }
        output.push(character);
    }
}
