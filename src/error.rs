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

use std::io;
use std::result;

use thiserror::Error as DeriveError;

/// The error type for operations with a blob store.
#[derive(Debug, DeriveError)]
pub enum Error {
    /// A logical key, catalog entry, or content digest was not found.
    #[error("A resource was not found.")]
    NotFound,

    /// The catalog entry exists, but its data has not finished uploading.
    #[error("The resource is still being uploaded.")]
    UploadPending,

    /// The digest of the uploaded data did not match the expected digest.
    #[error("Expected data with digest {expected}, but got {actual}.")]
    HashMismatch { expected: String, actual: String },

    /// The length of the uploaded data did not match the declared length.
    #[error("Expected {expected} bytes, but got {actual}.")]
    LengthMismatch { expected: u64, actual: u64 },

    /// A bucket, user, or path was empty.
    #[error("The logical key is invalid.")]
    InvalidKey,

    /// A resource already exists.
    #[error("A resource already exists.")]
    AlreadyExists,

    /// Another uploader already completed the upload of this catalog entry.
    #[error("The resource has already been uploaded.")]
    AlreadyUploaded,

    /// A put request was not found or has expired.
    #[error("The put request has expired.")]
    RequestExpired,

    /// A bounded wait was exceeded.
    #[error("The operation timed out.")]
    Timeout,

    /// An error occurred with the document store or the resource store.
    #[error("{0}")]
    Unavailable(#[source] anyhow::Error),

    /// An internal invariant was violated.
    #[error("Internal error: {0}")]
    Internal(String),

    /// A value could not be serialized.
    #[error("A value could not be serialized.")]
    Serialize,

    /// A value could not be deserialized.
    #[error("A value could not be deserialized.")]
    Deserialize,

    /// An I/O error occurred.
    #[error("{0}")]
    Io(#[from] io::Error),
}

/// A `Copy` summary of an [`Error`].
///
/// Unlike [`Error`], this can be shared between every thread waiting on the same upload.
///
/// [`Error`]: crate::Error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    UploadPending,
    HashMismatch,
    LengthMismatch,
    InvalidKey,
    AlreadyExists,
    AlreadyUploaded,
    RequestExpired,
    Timeout,
    Unavailable,
    Internal,
    Serialize,
    Deserialize,
    Io,
}

impl Error {
    /// Return the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound => ErrorKind::NotFound,
            Error::UploadPending => ErrorKind::UploadPending,
            Error::HashMismatch { .. } => ErrorKind::HashMismatch,
            Error::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            Error::InvalidKey => ErrorKind::InvalidKey,
            Error::AlreadyExists => ErrorKind::AlreadyExists,
            Error::AlreadyUploaded => ErrorKind::AlreadyUploaded,
            Error::RequestExpired => ErrorKind::RequestExpired,
            Error::Timeout => ErrorKind::Timeout,
            Error::Unavailable(_) => ErrorKind::Unavailable,
            Error::Internal(_) => ErrorKind::Internal,
            Error::Serialize => ErrorKind::Serialize,
            Error::Deserialize => ErrorKind::Deserialize,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Return whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::UploadPending | Error::Timeout | Error::Unavailable(_)
        )
    }
}

/// The result type for operations with a blob store.
pub type Result<T> = result::Result<T, Error>;
