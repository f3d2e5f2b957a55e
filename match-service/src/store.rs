// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Durable keyed storage for match records.
//!
//! Every adapter honours the same contract: absence is `Ok(None)`, a save
//! never recreates a deleted record, and a save only lands when the stored
//! version still equals the caller's expected version.

use std::{
    collections::HashMap,
    fs::OpenOptions,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use armada_common::{MatchRecord, is_valid_match_id};
use async_trait::async_trait;
use aws_sdk_dynamodb::{
    Client as DynamoClient,
    types::{AttributeValue, ReturnValue},
};
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("match {0} already exists")]
    AlreadyExists(String),
    #[error("match {0} no longer exists")]
    Missing(String),
    #[error("match {match_id} changed since version {expected}")]
    VersionConflict { match_id: String, expected: u64 },
    #[error("match store unavailable: {0:#}")]
    Unavailable(#[from] anyhow::Error),
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn create(&self, record: &MatchRecord) -> Result<(), StoreError>;
    async fn load(&self, match_id: &str) -> Result<Option<MatchRecord>, StoreError>;
    /// Overwrites the stored record if its version is still `expected_version`.
    async fn save(&self, record: &MatchRecord, expected_version: u64) -> Result<(), StoreError>;
    /// Returns whether a record was removed.
    async fn delete(&self, match_id: &str) -> Result<bool, StoreError>;
    async fn list_ids(&self) -> Result<Vec<String>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryMatchStore {
    records: RwLock<HashMap<String, MatchRecord>>,
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MatchStore for InMemoryMatchStore {
    async fn create(&self, record: &MatchRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.match_id) {
            return Err(StoreError::AlreadyExists(record.match_id.clone()));
        }
        records.insert(record.match_id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, match_id: &str) -> Result<Option<MatchRecord>, StoreError> {
        Ok(self.records.read().await.get(match_id).cloned())
    }

    async fn save(&self, record: &MatchRecord, expected_version: u64) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(&record.match_id)
            .ok_or_else(|| StoreError::Missing(record.match_id.clone()))?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                match_id: record.match_id.clone(),
                expected: expected_version,
            });
        }
        *stored = record.clone();
        Ok(())
    }

    async fn delete(&self, match_id: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(match_id).is_some())
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.read().await.keys().cloned().collect())
    }
}

/// One JSON document per match under a directory. Every create, save and
/// delete holds an advisory lock on `.<id>.lock` for the whole read-check-write,
/// so the version check holds across processes sharing the directory. Writes
/// land through a uniquely named temp file renamed into place.
pub struct FileMatchStore {
    dir: PathBuf,
}

impl FileMatchStore {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create match store dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Runs `op` on a blocking thread while holding the lock file for
    /// `match_id`. Lock files are left behind; removing one would let a
    /// waiter lock an unlinked inode.
    async fn with_lock<T, F>(&self, match_id: &str, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&MatchFiles) -> Result<T, StoreError> + Send + 'static,
    {
        if !is_valid_match_id(match_id) {
            return Err(anyhow::anyhow!("refusing to touch malformed match id {match_id:?}").into());
        }
        let files = MatchFiles::new(&self.dir, match_id);
        tokio::task::spawn_blocking(move || {
            let lock_file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&files.lock)
                .with_context(|| format!("failed to open {}", files.lock.display()))?;
            let mut lock = fd_lock::RwLock::new(lock_file);
            let _guard = lock
                .write()
                .with_context(|| format!("failed to lock {}", files.lock.display()))?;
            op(&files)
        })
        .await
        .context("match store worker stopped")?
    }
}

/// Paths belonging to one match id.
struct MatchFiles {
    dir: PathBuf,
    record: PathBuf,
    lock: PathBuf,
}

impl MatchFiles {
    fn new(dir: &Path, match_id: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            record: dir.join(format!("{match_id}.json")),
            lock: dir.join(format!(".{match_id}.lock")),
        }
    }

    fn read(&self) -> Result<Option<MatchRecord>, StoreError> {
        let raw = match std::fs::read_to_string(&self.record) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(anyhow::Error::new(error)
                    .context(format!("failed to read {}", self.record.display()))
                    .into());
            }
        };
        let record = serde_json::from_str(&raw)
            .with_context(|| format!("corrupt match record {}", self.record.display()))?;
        Ok(Some(record))
    }

    fn write(&self, record: &MatchRecord) -> Result<(), StoreError> {
        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .with_context(|| format!("failed to create temp file in {}", self.dir.display()))?;
        serde_json::to_writer_pretty(&mut tmp, record).context("failed to encode match record")?;
        tmp.flush().context("failed to flush match record")?;
        tmp.persist(&self.record)
            .map_err(|error| error.error)
            .with_context(|| format!("failed to move {} into place", self.record.display()))?;
        Ok(())
    }
}

#[async_trait]
impl MatchStore for FileMatchStore {
    async fn create(&self, record: &MatchRecord) -> Result<(), StoreError> {
        let record = record.clone();
        let match_id = record.match_id.clone();
        self.with_lock(&match_id, move |files| {
            if files.read()?.is_some() {
                return Err(StoreError::AlreadyExists(record.match_id.clone()));
            }
            files.write(&record)
        })
        .await
    }

    async fn load(&self, match_id: &str) -> Result<Option<MatchRecord>, StoreError> {
        if !is_valid_match_id(match_id) {
            return Ok(None);
        }
        let files = MatchFiles::new(&self.dir, match_id);
        tokio::task::spawn_blocking(move || files.read())
            .await
            .context("match store worker stopped")?
    }

    async fn save(&self, record: &MatchRecord, expected_version: u64) -> Result<(), StoreError> {
        let record = record.clone();
        let match_id = record.match_id.clone();
        self.with_lock(&match_id, move |files| {
            let stored = files
                .read()?
                .ok_or_else(|| StoreError::Missing(record.match_id.clone()))?;
            if stored.version != expected_version {
                return Err(StoreError::VersionConflict {
                    match_id: record.match_id.clone(),
                    expected: expected_version,
                });
            }
            files.write(&record)
        })
        .await
    }

    async fn delete(&self, match_id: &str) -> Result<bool, StoreError> {
        if !is_valid_match_id(match_id) {
            return Ok(false);
        }
        self.with_lock(match_id, |files| match std::fs::remove_file(&files.record) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(anyhow::Error::new(error)
                .context(format!("failed to remove {}", files.record.display()))
                .into()),
        })
        .await
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("failed to list {}", self.dir.display()))?;
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("failed to read match store entry")?
        {
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(|name| name.strip_suffix(".json"))
                && is_valid_match_id(id)
            {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }
}

/// One item per match keyed by `match_id`, with conditional writes so the
/// version check holds across processes.
#[derive(Clone)]
pub struct DynamoMatchStore {
    client: DynamoClient,
    table_name: String,
}

impl DynamoMatchStore {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    fn item_for(record: &MatchRecord) -> Result<HashMap<String, AttributeValue>, StoreError> {
        let body = serde_json::to_string(record).context("failed to encode match record")?;
        let mut item = HashMap::new();
        item.insert(
            "match_id".to_string(),
            AttributeValue::S(record.match_id.clone()),
        );
        item.insert(
            "version".to_string(),
            AttributeValue::N(record.version.to_string()),
        );
        item.insert(
            "status".to_string(),
            AttributeValue::S(record.status.as_str().to_string()),
        );
        item.insert(
            "created_at".to_string(),
            AttributeValue::S(record.created_at.to_rfc3339()),
        );
        item.insert(
            "last_activity".to_string(),
            AttributeValue::S(record.last_activity.to_rfc3339()),
        );
        item.insert("record".to_string(), AttributeValue::S(body));
        Ok(item)
    }

    fn record_from(
        match_id: &str,
        item: &HashMap<String, AttributeValue>,
    ) -> Result<MatchRecord, StoreError> {
        let body = item
            .get("record")
            .and_then(|value| value.as_s().ok())
            .ok_or_else(|| anyhow::anyhow!("match item {match_id} has no record attribute"))?;
        let record = serde_json::from_str(body)
            .with_context(|| format!("corrupt match record {match_id}"))?;
        Ok(record)
    }
}

#[async_trait]
impl MatchStore for DynamoMatchStore {
    async fn create(&self, record: &MatchRecord) -> Result<(), StoreError> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(Self::item_for(record)?))
            .condition_expression("attribute_not_exists(match_id)")
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(error) => {
                let error = error.into_service_error();
                if error.is_conditional_check_failed_exception() {
                    Err(StoreError::AlreadyExists(record.match_id.clone()))
                } else {
                    Err(anyhow::Error::new(error)
                        .context("failed to put item into matches table")
                        .into())
                }
            }
        }
    }

    async fn load(&self, match_id: &str) -> Result<Option<MatchRecord>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("match_id", AttributeValue::S(match_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .context("failed to get item from matches table")?;
        output
            .item()
            .map(|item| Self::record_from(match_id, item))
            .transpose()
    }

    async fn save(&self, record: &MatchRecord, expected_version: u64) -> Result<(), StoreError> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(Self::item_for(record)?))
            .condition_expression("attribute_exists(match_id) AND version = :expected")
            .expression_attribute_values(
                ":expected",
                AttributeValue::N(expected_version.to_string()),
            )
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(error) => {
                let error = error.into_service_error();
                if !error.is_conditional_check_failed_exception() {
                    return Err(anyhow::Error::new(error)
                        .context("failed to put item into matches table")
                        .into());
                }
                match self.load(&record.match_id).await? {
                    None => Err(StoreError::Missing(record.match_id.clone())),
                    Some(_) => Err(StoreError::VersionConflict {
                        match_id: record.match_id.clone(),
                        expected: expected_version,
                    }),
                }
            }
        }
    }

    async fn delete(&self, match_id: &str) -> Result<bool, StoreError> {
        let output = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key("match_id", AttributeValue::S(match_id.to_string()))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .context("failed to delete item from matches table")?;
        Ok(output.attributes().is_some())
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;
        loop {
            let output = self
                .client
                .scan()
                .table_name(&self.table_name)
                .projection_expression("match_id")
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .context("failed to scan matches table")?;
            ids.extend(output.items().iter().filter_map(|item| {
                item.get("match_id")
                    .and_then(|value| value.as_s().ok())
                    .cloned()
            }));
            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }
        Ok(ids)
    }
}
