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
use std::io::Read;

use static_assertions::assert_obj_safe;

/// A persistent store for opaque, potentially large objects.
///
/// A `ResourceStore` holds the physical bytes behind every catalog entry. Objects are identified by
/// a path string which is always chosen by this crate, never by clients. A resource store provides
/// only the most basic storage operations and doesn't have to worry about deduplication, reference
/// counting, or transactions. Those features are implemented at a higher level.
///
/// Methods take `&self` because a single store is shared by every thread using a
/// [`ManagedStorage`]. Implementations must not hold locks while transferring object data.
///
/// [`ManagedStorage`]: crate::ManagedStorage
pub trait ResourceStore: fmt::Debug + Send + Sync {
    /// Write the bytes read from `data` as a new object at the given `path`.
    ///
    /// `length` is the number of bytes the caller declared. Implementations copy every byte `data`
    /// yields until EOF; checking the actual length against `length` is up to the caller.
    ///
    /// If this method returns `Ok`, the object is stored persistently until it is removed with
    /// `remove`. If this method returns `Err`, the caller will schedule `path` for removal, so an
    /// implementation may leave partial data behind.
    ///
    /// If an object already exists at `path`, it is overwritten.
    fn put(&self, path: &str, data: &mut dyn Read, length: u64) -> anyhow::Result<()>;

    /// Return a reader for the object at the given `path`.
    ///
    /// If there is no object at `path`, this returns `Ok(None)`.
    fn get(&self, path: &str) -> anyhow::Result<Option<Box<dyn Read + Send>>>;

    /// Remove the object at the given `path`.
    ///
    /// If there is no object at `path`, this method does nothing and returns `Ok`.
    fn remove(&self, path: &str) -> anyhow::Result<()>;
}

assert_obj_safe!(ResourceStore);
