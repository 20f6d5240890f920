/*
 * Copyright 2019-2020 Wren Powell
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

use std::collections::HashSet;
use std::io::Read;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use rstest::*;
use tracing_subscriber::EnvFilter;

use managed_blobstore::store::MemoryStore;
use managed_blobstore::{ManagedStorage, StorageConfig};

use super::faults::FaultyDocumentStore;

/// The bucket used by most tests.
pub const BUCKET: &str = "7a1c0c1e-5f0e-4a43-9a38-5d3c6c1f2b10";

/// The user used by most tests.
pub const USER: &str = "alice";

/// How long tests wait for background cleanup to finish.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Install a subscriber which prints logs from the crate when `RUST_LOG` is set.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The storage config used for testing, with short waits and backoff.
pub fn test_config() -> StorageConfig {
    let mut config = StorageConfig::default();
    config.inflight_wait = Duration::from_secs(10);
    config.upload_wait = Duration::from_secs(10);
    config.upload_poll_interval = Duration::from_millis(5);
    config.cleanup.initial_backoff = Duration::from_millis(1);
    config.cleanup.max_backoff = Duration::from_millis(10);
    config
}

/// A `ManagedStorage` along with the in-memory stores behind it.
#[derive(Debug)]
pub struct TestStorage {
    pub documents: Arc<FaultyDocumentStore>,
    pub resources: Arc<MemoryStore>,
    storage: ManagedStorage,
}

impl TestStorage {
    pub fn new(config: StorageConfig) -> anyhow::Result<Self> {
        init_logging();
        let documents = Arc::new(FaultyDocumentStore::new());
        let resources = Arc::new(MemoryStore::new());
        let storage = ManagedStorage::new(documents.clone(), resources.clone(), config)?;
        Ok(TestStorage {
            documents,
            resources,
            storage,
        })
    }

    /// Put `data` under `path` for the test bucket and user.
    pub fn put(&self, path: &str, data: &[u8]) -> managed_blobstore::Result<()> {
        self.storage
            .put_for_bucket(BUCKET, USER, path, data, data.len() as u64)
    }

    /// Read the blob under `path` for the test bucket and user.
    pub fn read(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        let (mut reader, length) = self.storage.get_for_bucket(BUCKET, USER, path)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        assert_eq!(data.len() as u64, length);
        Ok(data)
    }

    /// Wait for every scheduled removal to finish.
    pub fn wait_idle(&self) {
        assert!(
            self.coordinator().cleaner().wait_idle(IDLE_TIMEOUT),
            "Cleanup did not finish in time."
        );
    }

    /// Assert that the catalog, the index, and the resource store agree with each other.
    ///
    /// This must only be called when no operations are in flight.
    pub fn assert_consistent(&self) -> anyhow::Result<()> {
        self.wait_idle();

        let entries = self.catalog().entries()?;
        let bindings = self.index().bindings()?;

        // Every binding references an existing entry.
        let ids = entries
            .iter()
            .map(|entry| entry.id.as_str())
            .collect::<HashSet<_>>();
        for (key, catalog_id) in &bindings {
            assert!(
                ids.contains(catalog_id.as_str()),
                "'{}' is bound to missing entry {}",
                key,
                catalog_id
            );
        }

        // Each digest has at most one entry.
        let digests = entries
            .iter()
            .map(|entry| entry.digest.clone())
            .collect::<HashSet<_>>();
        assert_eq!(digests.len(), entries.len());

        // The reference counts add up to the number of bindings.
        let references: u64 = entries.iter().map(|entry| entry.ref_count).sum();
        assert_eq!(references, bindings.len() as u64);

        // Every entry is uploaded and its object exists, and there are no other objects.
        let mut paths = HashSet::new();
        for entry in &entries {
            assert!(entry.uploaded, "Entry {} was never uploaded", entry.id);
            assert!(entry.ref_count >= 1);
            assert!(self.resources.contains(&entry.storage_path));
            paths.insert(entry.storage_path.clone());
        }
        assert_eq!(
            self.resources.paths().into_iter().collect::<HashSet<_>>(),
            paths
        );

        Ok(())
    }
}

impl Deref for TestStorage {
    type Target = ManagedStorage;

    fn deref(&self) -> &Self::Target {
        &self.storage
    }
}

#[fixture]
pub fn storage() -> TestStorage {
    TestStorage::new(test_config()).unwrap()
}
