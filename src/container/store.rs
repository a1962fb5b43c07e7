//! # Container Store
//!
//! One logical container per encrypted `.hexa` file. Every operation works
//! on the whole container: load, decrypt, operate in memory, re-encrypt and
//! replace the file.
//!
//! ## Guarantees
//! - A missing file is an empty container, never an error.
//! - A file that fails to parse or authenticate is an `IntegrityFailure`.
//! - Writes go to a temp file that is fsynced and renamed over the target,
//!   so readers see either the old or the new envelope.
//! - Read-modify-write cycles of one container are serialized in-process.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::cipher::{Envelope, KeyManager};
use crate::errors::{HexaError, HexaResult};

use super::filter::FilterSet;
use super::locks::WriteLocks;
use super::naming;

/// Decrypted container contents
pub type Records = Map<String, Value>;

const TEMP_SUFFIX: &str = ".tmp";

/// Factory for container stores rooted at one data directory
#[derive(Debug, Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

#[derive(Debug)]
struct StorageInner {
    data_dir: PathBuf,
    keys: Arc<KeyManager>,
    locks: WriteLocks,
}

impl Storage {
    /// Open (and create if needed) a data directory
    pub fn open(data_dir: impl Into<PathBuf>, keys: Arc<KeyManager>) -> HexaResult<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)
            .map_err(|e| HexaError::io(format!("create {}", data_dir.display()), e))?;

        Ok(Self {
            inner: Arc::new(StorageInner {
                data_dir,
                keys,
                locks: WriteLocks::new(),
            }),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.inner.data_dir
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.inner.keys
    }

    /// Handle to the named container. The file need not exist.
    pub fn container(&self, name: &str) -> HexaResult<ContainerStore> {
        naming::validate(name)?;
        let path = self
            .inner
            .data_dir
            .join(format!("{}.{}", name, naming::EXTENSION));

        Ok(ContainerStore {
            name: name.to_string(),
            path,
            storage: self.clone(),
        })
    }

    /// Names of every container file in the data directory
    pub fn list_containers(&self) -> HexaResult<Vec<String>> {
        let mut names: Vec<String> = self
            .read_dir()?
            .into_iter()
            .filter_map(|path| {
                if path.extension().and_then(|e| e.to_str()) != Some(naming::EXTENSION) {
                    return None;
                }
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .filter(|s| !s.starts_with('.'))
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// Temp files left behind by interrupted writes
    pub fn list_temp_files(&self) -> HexaResult<Vec<PathBuf>> {
        Ok(self
            .read_dir()?
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX))
                    .unwrap_or(false)
            })
            .collect())
    }

    fn read_dir(&self) -> HexaResult<Vec<PathBuf>> {
        let dir = &self.inner.data_dir;
        let entries =
            fs::read_dir(dir).map_err(|e| HexaError::io(format!("list {}", dir.display()), e))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| HexaError::io(format!("list {}", dir.display()), e))?;
            if entry.path().is_file() {
                paths.push(entry.path());
            }
        }
        Ok(paths)
    }
}

/// A single named container
#[derive(Debug, Clone)]
pub struct ContainerStore {
    name: String,
    path: PathBuf,
    storage: Storage,
}

impl ContainerStore {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read and decrypt the whole container
    pub fn load_all(&self) -> HexaResult<Records> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Records::new()),
            Err(e) => return Err(HexaError::io(format!("read {}", self.path.display()), e)),
        };

        let opened = Envelope::from_json(&bytes)
            .and_then(|envelope| self.storage.keys().decrypt::<Records>(&envelope));

        match opened {
            Ok(records) => {
                debug!(container = %self.name, records = records.len(), "container loaded");
                Ok(records)
            }
            Err(e) => {
                error!(container = %self.name, error = %e, "container failed integrity check");
                Err(HexaError::integrity(&self.name, e.to_string()))
            }
        }
    }

    /// Insert or replace the record under `key`
    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> HexaResult<String> {
        let value = serde_json::to_value(value)
            .map_err(|e| HexaError::internal(format!("serialize record {}: {}", key, e)))?;

        self.mutate(|records| {
            records.insert(key.to_string(), value);
            Ok(())
        })?;
        Ok(key.to_string())
    }

    pub fn find_by_id(&self, key: &str) -> HexaResult<Option<Value>> {
        Ok(self.load_all()?.remove(key))
    }

    /// Typed lookup. A record that does not fit `T` is an integrity failure.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> HexaResult<Option<T>> {
        self.find_by_id(key)?
            .map(|value| self.decode(key, value))
            .transpose()
    }

    pub fn find_all(&self) -> HexaResult<Vec<Value>> {
        Ok(self.load_all()?.into_iter().map(|(_, v)| v).collect())
    }

    pub fn find(&self, filters: &FilterSet) -> HexaResult<Vec<Value>> {
        Ok(self
            .find_entries(filters)?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }

    /// Like `find`, keeping the record keys
    pub fn find_entries(&self, filters: &FilterSet) -> HexaResult<Vec<(String, Value)>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|(_, v)| filters.matches(v))
            .collect())
    }

    pub fn find_one(&self, filters: &FilterSet) -> HexaResult<Option<Value>> {
        Ok(self
            .load_all()?
            .into_iter()
            .map(|(_, v)| v)
            .find(|v| filters.matches(v)))
    }

    /// Typed full scan with a predicate
    pub fn find_typed<T: DeserializeOwned>(&self, filters: &FilterSet) -> HexaResult<Vec<T>> {
        self.find_entries(filters)?
            .into_iter()
            .map(|(key, value)| self.decode(&key, value))
            .collect()
    }

    pub fn count(&self) -> HexaResult<usize> {
        Ok(self.load_all()?.len())
    }

    /// Remove one record. The file is not rewritten when the key is absent.
    pub fn delete(&self, key: &str) -> HexaResult<bool> {
        let lock = self.storage.inner.locks.lock_for(&self.name)?;
        let _guard = lock
            .lock()
            .map_err(|_| HexaError::internal(format!("writer lock for {} poisoned", self.name)))?;

        let mut records = self.load_all()?;
        if records.remove(key).is_none() {
            return Ok(false);
        }
        self.write_all(&records)?;
        Ok(true)
    }

    /// Shallow-merge an object patch into an existing record and stamp
    /// `updatedAt`. Returns the merged record.
    pub fn update(&self, key: &str, patch: Value) -> HexaResult<Value> {
        let Value::Object(patch) = patch else {
            return Err(HexaError::validation("update patch must be a JSON object"));
        };

        self.mutate(|records| {
            let record = records
                .get_mut(key)
                .and_then(Value::as_object_mut)
                .ok_or_else(|| HexaError::not_found(format!("{} in {}", key, self.name)))?;

            for (field, value) in patch {
                record.insert(field, value);
            }
            record.insert("updatedAt".to_string(), Value::String(Utc::now().to_rfc3339()));
            Ok(Value::Object(record.clone()))
        })
    }

    /// Run a read-modify-write cycle under the container's writer lock.
    ///
    /// The container is rewritten only if `f` succeeds.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut Records) -> HexaResult<R>) -> HexaResult<R> {
        let lock = self.storage.inner.locks.lock_for(&self.name)?;
        let _guard = lock
            .lock()
            .map_err(|_| HexaError::internal(format!("writer lock for {} poisoned", self.name)))?;

        let mut records = self.load_all()?;
        let result = f(&mut records)?;
        self.write_all(&records)?;
        Ok(result)
    }

    /// Delete the backing file. Returns false when it did not exist.
    pub fn remove_file(&self) -> HexaResult<bool> {
        let lock = self.storage.inner.locks.lock_for(&self.name)?;
        let _guard = lock
            .lock()
            .map_err(|_| HexaError::internal(format!("writer lock for {} poisoned", self.name)))?;

        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(container = %self.name, "container file removed");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(HexaError::io(format!("remove {}", self.path.display()), e)),
        }
    }

    /// Delete the backing file only if `check` accepts its current records.
    ///
    /// `check` runs under the writer lock, so no write to this container can
    /// land between the check and the unlink. Nothing is removed if it fails.
    pub fn remove_file_if<R>(&self, check: impl FnOnce(&Records) -> HexaResult<R>) -> HexaResult<R> {
        let lock = self.storage.inner.locks.lock_for(&self.name)?;
        let _guard = lock
            .lock()
            .map_err(|_| HexaError::internal(format!("writer lock for {} poisoned", self.name)))?;

        let records = self.load_all()?;
        let result = check(&records)?;
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(container = %self.name, "container file removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(HexaError::io(format!("remove {}", self.path.display()), e)),
        }
        Ok(result)
    }

    fn decode<T: DeserializeOwned>(&self, key: &str, value: Value) -> HexaResult<T> {
        serde_json::from_value(value).map_err(|e| {
            HexaError::integrity(&self.name, format!("record {} has unexpected shape: {}", key, e))
        })
    }

    /// Encrypt and atomically replace the container file.
    ///
    /// 1. Write the envelope to a temp file in the same directory
    /// 2. fsync the temp file
    /// 3. Rename over the target
    /// 4. fsync the directory
    fn write_all(&self, records: &Records) -> HexaResult<()> {
        let envelope = self.storage.keys().encrypt(records)?;
        let content = envelope.to_json()?;

        let dir = self.storage.data_dir();
        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", self.name))
            .suffix(TEMP_SUFFIX)
            .tempfile_in(dir)
            .map_err(|e| HexaError::io(format!("create temp file for {}", self.name), e))?;

        temp.write_all(content.as_bytes())
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| HexaError::io(format!("write temp file for {}", self.name), e))?;

        temp.persist(&self.path)
            .map_err(|e| HexaError::io(format!("replace {}", self.path.display()), e.error))?;

        if let Ok(dir) = File::open(dir) {
            let _ = dir.sync_all();
        }

        debug!(container = %self.name, records = records.len(), "container written");
        Ok(())
    }
}
