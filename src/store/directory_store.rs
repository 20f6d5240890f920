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

#![cfg(feature = "store-directory")]

use std::fs::{create_dir_all, read_dir, remove_file, rename, File};
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{anyhow, bail};
use uuid::Uuid;

use super::resource_store::ResourceStore;

// The names of top-level directories in the resource store.
const OBJECTS_DIRECTORY: &str = "objects";
const STAGING_DIRECTORY: &str = "stage";

/// Return whether `path` can be used as the name of an object file.
fn is_valid_path(path: &str) -> bool {
    path.len() >= 2
        && path
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_')
}

/// A `ResourceStore` which stores objects in a directory in the local file system.
///
/// Objects are sharded into sub-directories by the first two characters of their path. Writes go
/// to a staging file which is then atomically moved to its final destination, so readers never
/// observe a partially written object.
#[derive(Debug)]
#[cfg_attr(docsrs, doc(cfg(feature = "store-directory")))]
pub struct DirectoryStore {
    /// The path of the store's root directory.
    path: PathBuf,
}

impl DirectoryStore {
    /// Open or create a `DirectoryStore` at the given `path`.
    ///
    /// # Errors
    /// - `Error::Unavailable`: The directory could not be created.
    pub fn new(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        create_dir_all(path.join(OBJECTS_DIRECTORY))
            .map_err(|error| crate::Error::Unavailable(anyhow::Error::from(error)))?;
        create_dir_all(path.join(STAGING_DIRECTORY))
            .map_err(|error| crate::Error::Unavailable(anyhow::Error::from(error)))?;
        Ok(DirectoryStore { path })
    }

    /// Return the file path where the object at `path` is stored.
    fn object_path(&self, path: &str) -> anyhow::Result<PathBuf> {
        if !is_valid_path(path) {
            bail!("The object path '{}' is invalid.", path);
        }
        Ok(self
            .path
            .join(OBJECTS_DIRECTORY)
            .join(&path[..2])
            .join(path))
    }

    /// Return a new staging path.
    fn staging_path(&self) -> PathBuf {
        let uuid_str = Uuid::new_v4().as_hyphenated().to_string();
        self.path.join(STAGING_DIRECTORY).join(&uuid_str)
    }

    /// Return the paths of all objects in the store.
    ///
    /// # Errors
    /// - `Error::Unavailable`: The directory could not be read.
    pub fn paths(&self) -> crate::Result<Vec<String>> {
        self.list_paths().map_err(crate::Error::Unavailable)
    }

    fn list_paths(&self) -> anyhow::Result<Vec<String>> {
        let mut paths = Vec::new();
        for directory_entry in read_dir(self.path.join(OBJECTS_DIRECTORY))? {
            for object_entry in read_dir(directory_entry?.path())? {
                let file_name = object_entry?.file_name();
                let path = file_name
                    .to_str()
                    .ok_or_else(|| anyhow!("Object file name is invalid."))?;
                paths.push(path.to_owned());
            }
        }
        Ok(paths)
    }
}

impl ResourceStore for DirectoryStore {
    fn put(&self, path: &str, data: &mut dyn Read, _length: u64) -> anyhow::Result<()> {
        let object_path = self.object_path(path)?;
        let staging_path = self.staging_path();

        // If this is the first object in its sub-directory, the directory needs to be created.
        if let Some(parent) = object_path.parent() {
            create_dir_all(parent)?;
        }

        // Write to a staging file and then atomically move it to its final destination.
        let result = File::create(&staging_path).and_then(|mut staging_file| {
            io::copy(data, &mut staging_file)?;
            staging_file.sync_all()
        });
        if let Err(error) = result {
            let _ = remove_file(&staging_path);
            return Err(error.into());
        }
        rename(&staging_path, &object_path)?;

        Ok(())
    }

    fn get(&self, path: &str) -> anyhow::Result<Option<Box<dyn Read + Send>>> {
        match File::open(self.object_path(path)?) {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    fn remove(&self, path: &str) -> anyhow::Result<()> {
        match remove_file(self.object_path(path)?) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
