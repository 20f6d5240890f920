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

//! Low-level backends for physical blob storage.
//!
//! This module provides the stores which hold the bytes behind catalog entries. A resource store
//! provides only the most basic storage operations and is keyed by opaque paths chosen by this
//! crate. Deduplication, reference counting, and cleanup are implemented at a higher level, so
//! providing support for new storage backends is relatively painless.
//!
//! All resource stores implement the [`ResourceStore`] trait.
//!
//! [`ResourceStore`]: crate::store::ResourceStore

#[cfg(feature = "store-directory")]
pub use self::directory_store::DirectoryStore;
pub use self::memory_store::MemoryStore;
pub use self::resource_store::ResourceStore;

mod directory_store;
mod memory_store;
mod resource_store;
