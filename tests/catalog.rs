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

use std::sync::Arc;

use rstest::*;
use spectral::prelude::*;

use common::*;
use managed_blobstore::blob::{ManagedResourceIndex, ResourceCatalog, DIGEST_COLLECTION};
use managed_blobstore::txn::{DocumentStore, MemoryDocumentStore};
use managed_blobstore::{ContentDigest, ErrorKind, LogicalKey};

mod common;

struct Layers {
    documents: Arc<MemoryDocumentStore>,
    catalog: ResourceCatalog,
    index: ManagedResourceIndex,
}

#[fixture]
fn layers() -> Layers {
    let documents = Arc::new(MemoryDocumentStore::new());
    Layers {
        catalog: ResourceCatalog::new(documents.clone(), 3),
        index: ManagedResourceIndex::new(documents.clone(), 3),
        documents,
    }
}

#[rstest]
fn first_put_creates_entry(layers: Layers) -> anyhow::Result<()> {
    let digest = ContentDigest::of(b"content");

    let placement = layers.catalog.put(&digest, 7)?;

    assert_that!(placement.is_new).is_true();
    assert_that!(placement.storage_path).is_none();
    assert_that!(layers.catalog.find(&digest)?).is_equal_to(&placement.id);
    assert_that!(layers.catalog.get(&placement.id)).is_err_variant(ErrorKind::UploadPending);

    let entries = layers.catalog.entries()?;
    assert_that!(entries).has_length(1);
    assert_that!(entries[0].ref_count).is_equal_to(1);
    assert_that!(entries[0].uploaded).is_false();

    Ok(())
}

#[rstest]
fn second_put_increments_reference_count(layers: Layers) -> anyhow::Result<()> {
    let digest = ContentDigest::of(b"content");
    let first = layers.catalog.put(&digest, 7)?;
    layers.catalog.upload_complete(&first.id, "object")?;

    let second = layers.catalog.put(&digest, 7)?;

    assert_that!(second.is_new).is_false();
    assert_that!(second.id).is_equal_to(&first.id);
    assert_that!(second.storage_path).is_equal_to(Some(String::from("object")));
    assert_that!(layers.catalog.get(&first.id)?.ref_count).is_equal_to(2);

    Ok(())
}

#[rstest]
fn put_with_other_length_is_rejected(layers: Layers) -> anyhow::Result<()> {
    let digest = ContentDigest::of(b"content");
    layers.catalog.put(&digest, 7)?;

    assert_that!(layers.catalog.put(&digest, 8)).is_err_variant(ErrorKind::LengthMismatch);
    assert_that!(layers.catalog.entries()?[0].ref_count).is_equal_to(1);

    Ok(())
}

#[rstest]
fn upload_completes_only_once(layers: Layers) -> anyhow::Result<()> {
    let placement = layers.catalog.put(&ContentDigest::of(b"content"), 7)?;

    layers.catalog.upload_complete(&placement.id, "first")?;

    assert_that!(layers.catalog.upload_complete(&placement.id, "second"))
        .is_err_variant(ErrorKind::AlreadyUploaded);
    assert_that!(layers.catalog.get(&placement.id)?.storage_path)
        .is_equal_to(String::from("first"));

    Ok(())
}

#[rstest]
fn upload_of_missing_entry_fails(layers: Layers) {
    assert_that!(layers.catalog.upload_complete("missing", "object"))
        .is_err_variant(ErrorKind::NotFound);
}

#[rstest]
fn upload_requires_storage_path(layers: Layers) -> anyhow::Result<()> {
    let placement = layers.catalog.put(&ContentDigest::of(b"content"), 7)?;
    assert_that!(layers.catalog.upload_complete(&placement.id, ""))
        .is_err_variant(ErrorKind::Internal);
    Ok(())
}

#[rstest]
fn remove_deletes_entry_with_last_reference(layers: Layers) -> anyhow::Result<()> {
    let digest = ContentDigest::of(b"content");
    let placement = layers.catalog.put(&digest, 7)?;
    layers.catalog.put(&digest, 7)?;
    layers.catalog.upload_complete(&placement.id, "object")?;

    let removal = layers.catalog.remove(&placement.id)?;
    assert_that!(removal.was_last).is_false();
    assert_that!(removal.storage_path).is_none();

    let removal = layers.catalog.remove(&placement.id)?;
    assert_that!(removal.was_last).is_true();
    assert_that!(removal.storage_path).is_equal_to(Some(String::from("object")));

    assert_that!(layers.catalog.find(&digest)).is_err_variant(ErrorKind::NotFound);
    assert_that!(layers.catalog.get(&placement.id)).is_err_variant(ErrorKind::NotFound);
    assert_that!(layers.documents.list(DIGEST_COLLECTION)?).is_empty();
    assert_that!(layers.catalog.remove(&placement.id)).is_err_variant(ErrorKind::NotFound);

    Ok(())
}

#[rstest]
fn content_can_be_stored_again_after_removal(layers: Layers) -> anyhow::Result<()> {
    let digest = ContentDigest::of(b"content");
    let first = layers.catalog.put(&digest, 7)?;
    layers.catalog.remove(&first.id)?;

    let second = layers.catalog.put(&digest, 7)?;

    assert_that!(second.is_new).is_true();
    assert_that!(second.id).is_not_equal_to(&first.id);

    Ok(())
}

#[rstest]
fn aborted_transactions_are_retried(layers: Layers) -> anyhow::Result<()> {
    layers.documents.abort_transactions(2);
    let placement = layers.catalog.put(&ContentDigest::of(b"content"), 7)?;
    assert_that!(placement.is_new).is_true();

    layers.documents.abort_transactions(3);
    assert_that!(layers.catalog.upload_complete(&placement.id, "object"))
        .is_err_variant(ErrorKind::Unavailable);

    Ok(())
}

#[rstest]
fn index_binds_and_rebinds_keys(layers: Layers) -> anyhow::Result<()> {
    let key = LogicalKey::new("bucket", "user", "path/to/file")?;

    assert_that!(layers.index.put_managed_resource(&key, "first")?).is_none();
    assert_that!(layers.index.lookup(&key)?).is_equal_to(String::from("first"));

    assert_that!(layers.index.put_managed_resource(&key, "second")?)
        .is_equal_to(Some(String::from("first")));
    assert_that!(layers.index.lookup(&key)?).is_equal_to(String::from("second"));
    assert_that!(layers.index.bindings()?).is_equal_to(vec![(key.clone(), String::from("second"))]);

    Ok(())
}

#[rstest]
fn index_remove_returns_previous_binding(layers: Layers) -> anyhow::Result<()> {
    let key = LogicalKey::new("bucket", "user", "path")?;
    layers.index.put_managed_resource(&key, "entry")?;

    assert_that!(layers.index.remove(&key)?).is_equal_to(Some(String::from("entry")));
    assert_that!(layers.index.remove(&key)?).is_none();
    assert_that!(layers.index.lookup(&key)).is_err_variant(ErrorKind::NotFound);

    Ok(())
}

#[rstest]
fn index_keys_with_separators_are_distinct(layers: Layers) -> anyhow::Result<()> {
    let first = LogicalKey::new("a:b", "c", "d")?;
    let second = LogicalKey::new("a", "b:c", "d")?;

    layers.index.put_managed_resource(&first, "first")?;
    layers.index.put_managed_resource(&second, "second")?;

    assert_that!(layers.index.lookup(&first)?).is_equal_to(String::from("first"));
    assert_that!(layers.index.lookup(&second)?).is_equal_to(String::from("second"));

    Ok(())
}
