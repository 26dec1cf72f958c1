//! The storage registry: aliasing buckets and scoped allocation records.
//!
//! Every live storage has exactly one entry here, pointing at the bucket of storages that share
//! its buffer. The bucket keeps a by-value copy of its root — the storage whose allocation backs
//! every member — so the buffer identity survives even when the root handle itself is freed
//! before the other members. Records capture every registration made while they are active and
//! let multi-step operations release their scratch storages in one sweep.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt::Display;

use tracing::{error, trace};
use uuid::Uuid;

use crate::{Error, Result, Storage};

/// Identifier of an allocation record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct RecordId(u64);

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "record #{}", self.0)
    }
}

/// One registered storage: the handle itself and the bucket it belongs to.
struct Entry {
    storage: Storage,
    bucket: u64,
}

/// An aliasing group: the root storage whose allocation backs every member.
struct Bucket {
    root: Storage,
    members: Vec<Uuid>,
}

/// A scoped allocation log. Active records collect every registration; stopped records keep
/// their snapshot until freed.
struct Record {
    active: bool,
    members: Vec<Uuid>,
}

/// Process state tracking every live storage, its aliasing bucket, and the allocation records.
#[derive(Default)]
pub struct StorageRegistry {
    entries: HashMap<Uuid, Entry>,
    buckets: HashMap<u64, Bucket>,
    records: BTreeMap<u64, Record>,
    next_bucket: u64,
    next_record: u64,
}

// NOTE: Registration interface.

impl StorageRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a storage, either as the root of a new bucket (`parent` is `None`) or as a
    /// member of its parent's bucket. Registering an already-registered storage is a no-op.
    /// Every currently active record receives the storage.
    ///
    /// # Returns
    /// `ParentNotRegistered` if the parent is given but absent from the registry.
    pub fn register(&mut self, storage: &Storage, parent: Option<&Storage>) -> Result<()> {
        if self.entries.contains_key(&storage.id()) {
            return Ok(());
        }
        let bucket = match parent {
            Some(parent) => {
                let entry = self
                    .entries
                    .get(&parent.id())
                    .ok_or_else(|| Error::ParentNotRegistered(parent.id()))?;
                entry.bucket
            }
            None => {
                let bucket = self.next_bucket;
                self.next_bucket += 1;
                self.buckets.insert(
                    bucket,
                    Bucket {
                        root: storage.clone(),
                        members: Vec::new(),
                    },
                );
                bucket
            }
        };
        self.buckets
            .get_mut(&bucket)
            .expect("bucket exists for registration")
            .members
            .push(storage.id());
        self.entries.insert(
            storage.id(),
            Entry {
                storage: storage.clone(),
                bucket,
            },
        );
        for record in self.records.values_mut().filter(|record| record.active) {
            record.members.push(storage.id());
        }
        trace!("registered storage {} into bucket {bucket}", storage.id());
        Ok(())
    }

    /// Removes a storage from its bucket, from every record that still holds it, and from the
    /// registry. The bucket is kept even when it becomes empty; the caller decides its fate.
    ///
    /// # Returns
    /// `NotRegistered` if the storage has no entry.
    pub fn deregister(&mut self, storage: &Storage) -> Result<()> {
        let entry = self
            .entries
            .remove(&storage.id())
            .ok_or_else(|| Error::NotRegistered(storage.id()))?;
        if let Some(bucket) = self.buckets.get_mut(&entry.bucket) {
            bucket.members.retain(|&member| member != storage.id());
        }
        for record in self.records.values_mut() {
            record.members.retain(|&member| member != storage.id());
        }
        trace!("deregistered storage {}", storage.id());
        Ok(())
    }

    /// Deregisters a storage and deletes its bucket, which must thereby become empty.
    ///
    /// # Returns
    /// `BucketNotEmpty` if other members remain after the removal.
    pub fn deregister_and_delete_bucket(&mut self, storage: &Storage) -> Result<()> {
        let bucket = self
            .entries
            .get(&storage.id())
            .ok_or_else(|| Error::NotRegistered(storage.id()))?
            .bucket;
        self.deregister(storage)?;
        let empty = self
            .buckets
            .get(&bucket)
            .map(|bucket| bucket.members.is_empty())
            .unwrap_or(false);
        if !empty {
            return Err(Error::BucketNotEmpty(storage.id()));
        }
        self.buckets.remove(&bucket);
        Ok(())
    }

    /// Returns a copy of the root storage of the bucket this storage belongs to.
    pub fn get_root(&self, storage: &Storage) -> Result<Storage> {
        let entry = self
            .entries
            .get(&storage.id())
            .ok_or_else(|| Error::NotRegistered(storage.id()))?;
        let bucket = self
            .buckets
            .get(&entry.bucket)
            .ok_or_else(|| Error::NotRegistered(storage.id()))?;
        Ok(bucket.root.clone())
    }

    /// Returns the number of storages sharing this storage's bucket.
    pub fn bucket_size(&self, storage: &Storage) -> Result<usize> {
        let entry = self
            .entries
            .get(&storage.id())
            .ok_or_else(|| Error::NotRegistered(storage.id()))?;
        let bucket = self
            .buckets
            .get(&entry.bucket)
            .ok_or_else(|| Error::NotRegistered(storage.id()))?;
        Ok(bucket.members.len())
    }

    /// Returns true if the storage with this id is registered.
    pub fn contains(&self, id: Uuid) -> bool {
        self.entries.contains_key(&id)
    }

    /// Returns the number of registered storages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no storage is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// NOTE: Free interface.

impl StorageRegistry {
    /// Frees the storage with the given id. When it is the last member of its bucket the
    /// backend releases the buffer and the bucket is deleted; otherwise the storage is simply
    /// deregistered and the buffer stays with the remaining members.
    pub fn free_storage(&mut self, id: Uuid) -> Result<()> {
        let storage = self
            .entries
            .get(&id)
            .map(|entry| entry.storage.clone())
            .ok_or(Error::NotRegistered(id))?;
        if self.bucket_size(&storage)? == 1 {
            storage.backend().storage_free(storage.raw())?;
            self.deregister_and_delete_bucket(&storage)?;
            trace!("freed storage {id} and released its buffer");
        } else {
            self.deregister(&storage)?;
            trace!("freed storage {id}, buffer stays with its bucket");
        }
        Ok(())
    }

    /// Frees every storage still registered. Failures are logged and skipped so that teardown
    /// always completes.
    pub fn clear(&mut self) {
        let leftover: Vec<Uuid> = self.entries.keys().copied().collect();
        if !leftover.is_empty() {
            error!("storage registry teardown with {} storages still live", leftover.len());
        }
        for id in leftover {
            if !self.contains(id) {
                continue;
            }
            if let Err(error) = self.free_storage(id) {
                error!("failed to free storage {id} during teardown: {error}");
            }
        }
        self.records.clear();
    }
}

// NOTE: Record interface.

impl StorageRegistry {
    /// Starts a new allocation record. Until stopped, every registered storage is appended to
    /// it (and to every other active record).
    pub fn start_record(&mut self) -> RecordId {
        let id = self.next_record;
        self.next_record += 1;
        self.records.insert(
            id,
            Record {
                active: true,
                members: Vec::new(),
            },
        );
        RecordId(id)
    }

    /// Stops a record: registrations no longer accumulate, the snapshot is retained.
    pub fn stop_record(&mut self, record: RecordId) -> Result<()> {
        self.records
            .get_mut(&record.0)
            .ok_or(Error::RecordNotFound(record))?
            .active = false;
        Ok(())
    }

    /// Detaches a storage from one record, so a later [`free_all`](Self::free_all) leaves it
    /// alone. Detaching a storage the record does not hold is a no-op.
    pub fn detach(&mut self, record: RecordId, storage: &Storage) -> Result<()> {
        self.records
            .get_mut(&record.0)
            .ok_or(Error::RecordNotFound(record))?
            .members
            .retain(|&member| member != storage.id());
        Ok(())
    }

    /// Frees every storage the record still holds, in registration order, then drops the
    /// record. Freeing continues past failures; the first error is returned.
    pub fn free_all(&mut self, record: RecordId) -> Result<()> {
        let members = self
            .records
            .remove(&record.0)
            .ok_or(Error::RecordNotFound(record))?
            .members;
        let mut first_error = None;
        for id in members {
            if !self.contains(id) {
                continue;
            }
            if let Err(error) = self.free_storage(id) {
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Drop for StorageRegistry {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            error!("storage registry dropped with {} live storages", self.entries.len());
        }
    }
}
