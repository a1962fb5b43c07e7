//! # Repair
//!
//! Cross-container consistency is maintained by ordered writes, not
//! transactions, so an interrupted operation can leave:
//! - an orphan container (child written, parent never updated, or parent
//!   updated and child removal never happened)
//! - a dangling reference (a parent entry whose container file is gone)
//! - a stale temp file from an interrupted atomic write
//! - drifted statistics (a rollup that failed after the primary write)
//!
//! `reconcile` finds and optionally removes the first three. Only containers
//! named like hierarchy nodes or files can be orphans; any other container
//! is reported as unmanaged and kept.
//! `recompute_statistics` re-derives every counter from the child containers.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::auth::{Action, Actor, ResourceKind};
use crate::container::naming;
use crate::errors::{HexaError, HexaResult};

use super::documents::document_size;
use super::model::{
    take_reference, Bucket, BucketStatistics, Cluster, ClusterStatistics, Collection,
    Database, DatabaseStatistics, FileRecord, Folder, FolderStatistics,
};
use super::service::{from_record, resource_of, to_record, HierarchyService};

/// Whether `reconcile` only reports or also repairs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    DryRun,
    Apply,
}

/// A parent entry pointing at a container that does not exist
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DanglingReference {
    pub database_id: String,
    pub parent_kind: ResourceKind,
    pub parent_id: String,
    pub kind: ResourceKind,
    pub child_id: String,
}

/// Findings of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub orphan_containers: Vec<String>,
    /// Containers outside the hierarchy naming scheme. Reported, never removed.
    pub unmanaged_containers: Vec<String>,
    pub dangling_references: Vec<DanglingReference>,
    pub temp_files: Vec<PathBuf>,
    /// Reachable containers that failed to decrypt or decode
    pub unreadable: Vec<String>,
    pub applied: bool,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_containers.is_empty()
            && self.dangling_references.is_empty()
            && self.temp_files.is_empty()
            && self.unreadable.is_empty()
    }
}

/// Containers reached from `databases`, plus what was wrong on the way
#[derive(Default)]
struct Walk {
    reachable: BTreeSet<String>,
    dangling: Vec<DanglingReference>,
    unreadable: Vec<String>,
}

impl Walk {
    /// Mark `container` reachable if it exists, else record a dangling entry
    fn visit(&mut self, exists: bool, container: String, dangling: DanglingReference) -> bool {
        if exists {
            self.reachable.insert(container);
        } else {
            self.dangling.push(dangling);
        }
        exists
    }
}

impl HierarchyService {
    /// Scan the data directory against the reference tree.
    ///
    /// `Apply` removes orphans and temp files and drops dangling references.
    /// Nothing is removed while any reachable container is unreadable, since
    /// its children would look orphaned.
    pub fn reconcile(&self, actor: &Actor, mode: ReconcileMode) -> HexaResult<ReconcileReport> {
        self.guard.require_permission(actor, "db.admin")?;

        let walk = self.walk_tree()?;
        let (orphans, unmanaged): (Vec<String>, Vec<String>) = self
            .storage
            .list_containers()?
            .into_iter()
            .filter(|name| !naming::FIXED.contains(&name.as_str()) && !walk.reachable.contains(name))
            .partition(|name| naming::is_hierarchy_container(name));

        let mut report = ReconcileReport {
            orphan_containers: orphans,
            unmanaged_containers: unmanaged,
            dangling_references: walk.dangling,
            temp_files: self.storage.list_temp_files()?,
            unreadable: walk.unreadable,
            applied: false,
        };

        for orphan in &report.orphan_containers {
            warn!(container = %orphan, "orphan container");
        }
        for name in &report.unmanaged_containers {
            info!(container = %name, "container outside the hierarchy left alone");
        }
        for entry in &report.dangling_references {
            warn!(parent = %entry.parent_id, child = %entry.child_id, kind = %entry.kind, "dangling reference");
        }
        for name in &report.unreadable {
            warn!(container = %name, "unreadable container");
        }

        if mode == ReconcileMode::DryRun {
            return Ok(report);
        }
        if !report.unreadable.is_empty() {
            warn!(count = report.unreadable.len(), "reconcile not applied: unreadable containers present");
            return Ok(report);
        }

        self.apply(&report)?;
        report.applied = true;
        info!(
            orphans = report.orphan_containers.len(),
            dangling = report.dangling_references.len(),
            temp_files = report.temp_files.len(),
            "reconcile applied"
        );
        Ok(report)
    }

    /// Re-derive every counter of one database from its child containers
    pub fn recompute_statistics(&self, actor: &Actor, database_id: &str) -> HexaResult<DatabaseStatistics> {
        let database = self.load_database(database_id)?;
        self.guard
            .require(actor, &resource_of(&database, ResourceKind::Database), Action::Admin)?;
        self.recompute_database(database_id)
    }

    fn walk_tree(&self) -> HexaResult<Walk> {
        let mut walk = Walk::default();
        let records = self.databases()?.load_all()?;

        for (database_id, raw) in records {
            let database: Database = match from_record(Some(&raw), &database_id) {
                Ok(database) => database,
                Err(_) => {
                    walk.unreadable.push(format!("{}:{}", naming::DATABASES, database_id));
                    continue;
                }
            };

            for entry in &database.clusters {
                let container = naming::cluster(&entry.id);
                let dangling = DanglingReference {
                    database_id: database_id.clone(),
                    parent_kind: ResourceKind::Database,
                    parent_id: database_id.clone(),
                    kind: ResourceKind::Cluster,
                    child_id: entry.id.clone(),
                };
                if walk.visit(self.node(&container)?.exists(), container.clone(), dangling) {
                    self.walk_cluster(&database_id, &container, &mut walk)?;
                }
            }
        }
        Ok(walk)
    }

    fn walk_cluster(&self, database_id: &str, container: &str, walk: &mut Walk) -> HexaResult<()> {
        let Some(cluster) = self.readable::<Cluster>(container, walk) else {
            return Ok(());
        };

        for entry in &cluster.collections {
            let name = naming::collection(&entry.id);
            let dangling = DanglingReference {
                database_id: database_id.to_string(),
                parent_kind: ResourceKind::Cluster,
                parent_id: cluster.id.clone(),
                kind: ResourceKind::Collection,
                child_id: entry.id.clone(),
            };
            walk.visit(self.node(&name)?.exists(), name, dangling);
        }

        for entry in &cluster.buckets {
            let name = naming::bucket(&entry.id);
            let dangling = DanglingReference {
                database_id: database_id.to_string(),
                parent_kind: ResourceKind::Cluster,
                parent_id: cluster.id.clone(),
                kind: ResourceKind::Bucket,
                child_id: entry.id.clone(),
            };
            if walk.visit(self.node(&name)?.exists(), name.clone(), dangling) {
                self.walk_bucket(database_id, &name, walk)?;
            }
        }
        Ok(())
    }

    fn walk_bucket(&self, database_id: &str, container: &str, walk: &mut Walk) -> HexaResult<()> {
        let Some(bucket) = self.readable::<Bucket>(container, walk) else {
            return Ok(());
        };

        for entry in &bucket.folders {
            let name = naming::folder(&entry.id);
            let dangling = DanglingReference {
                database_id: database_id.to_string(),
                parent_kind: ResourceKind::Bucket,
                parent_id: bucket.id.clone(),
                kind: ResourceKind::Folder,
                child_id: entry.id.clone(),
            };
            if walk.visit(self.node(&name)?.exists(), name.clone(), dangling) {
                let Some(folder) = self.readable::<Folder>(&name, walk) else {
                    continue;
                };
                for file in &folder.files {
                    let file_container = naming::file(&file.id);
                    let dangling = DanglingReference {
                        database_id: database_id.to_string(),
                        parent_kind: ResourceKind::Folder,
                        parent_id: folder.id.clone(),
                        kind: ResourceKind::File,
                        child_id: file.id.clone(),
                    };
                    walk.visit(self.node(&file_container)?.exists(), file_container, dangling);
                }
            }
        }

        for entry in &bucket.files {
            let name = naming::file(&entry.id);
            let dangling = DanglingReference {
                database_id: database_id.to_string(),
                parent_kind: ResourceKind::Bucket,
                parent_id: bucket.id.clone(),
                kind: ResourceKind::File,
                child_id: entry.id.clone(),
            };
            walk.visit(self.node(&name)?.exists(), name, dangling);
        }
        Ok(())
    }

    /// Decode a node, recording it as unreadable on failure
    fn readable<T: serde::de::DeserializeOwned>(&self, container: &str, walk: &mut Walk) -> Option<T> {
        match self.load_node::<T>(container) {
            Ok(node) => Some(node),
            Err(e) => {
                warn!(container, error = %e, "skipping unreadable node");
                walk.unreadable.push(container.to_string());
                None
            }
        }
    }

    fn apply(&self, report: &ReconcileReport) -> HexaResult<()> {
        let mut touched = BTreeSet::new();
        for entry in &report.dangling_references {
            self.drop_reference(entry)?;
            touched.insert(entry.database_id.clone());
        }
        for orphan in &report.orphan_containers {
            self.node(orphan)?.remove_file()?;
        }
        for temp in &report.temp_files {
            match fs::remove_file(temp) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(HexaError::io(format!("remove {}", temp.display()), e)),
            }
        }
        for database_id in touched {
            self.recompute_database(&database_id)?;
        }
        Ok(())
    }

    fn drop_reference(&self, entry: &DanglingReference) -> HexaResult<()> {
        let child = entry.child_id.as_str();
        match entry.parent_kind {
            ResourceKind::Database => self.mutate_database(&entry.parent_id, |db| {
                take_reference(&mut db.clusters, child);
                Ok(())
            }),
            ResourceKind::Cluster => {
                self.mutate_node::<Cluster, _>(&naming::cluster(&entry.parent_id), |c| {
                    take_reference(&mut c.collections, child);
                    take_reference(&mut c.buckets, child);
                    Ok(())
                })
            }
            ResourceKind::Bucket => {
                self.mutate_node::<Bucket, _>(&naming::bucket(&entry.parent_id), |b| {
                    take_reference(&mut b.folders, child);
                    take_reference(&mut b.files, child);
                    Ok(())
                })
            }
            ResourceKind::Folder => {
                self.mutate_node::<Folder, _>(&naming::folder(&entry.parent_id), |f| {
                    take_reference(&mut f.files, child);
                    Ok(())
                })
            }
            other => Err(HexaError::internal(format!("no reference lists on {}", other))),
        }
    }

    // ==================
    // Statistics
    // ==================

    pub(super) fn recompute_database(&self, database_id: &str) -> HexaResult<DatabaseStatistics> {
        let database = self.load_database(database_id)?;

        let mut stats = DatabaseStatistics {
            last_activity: database.statistics.last_activity,
            ..Default::default()
        };
        for entry in &database.clusters {
            let container = naming::cluster(&entry.id);
            if !self.node(&container)?.exists() {
                continue;
            }
            let cluster = self.recompute_cluster(&container)?;
            stats.clusters += 1;
            stats.collections += cluster.collections;
            stats.buckets += cluster.buckets;
            stats.documents += cluster.documents;
            stats.files += cluster.files;
            stats.total_size += cluster.total_size;
        }

        let result = stats.clone();
        self.mutate_database(database_id, |db| {
            db.statistics = stats;
            Ok(())
        })?;

        info!(database_id, documents = result.documents, files = result.files, "statistics recomputed");
        Ok(result)
    }

    fn recompute_cluster(&self, container: &str) -> HexaResult<ClusterStatistics> {
        let cluster: Cluster = self.load_node(container)?;
        let mut stats = ClusterStatistics {
            last_activity: cluster.statistics.last_activity,
            ..Default::default()
        };

        for entry in &cluster.collections {
            let name = naming::collection(&entry.id);
            if !self.node(&name)?.exists() {
                continue;
            }
            let (documents, size) = self.recompute_collection(&name)?;
            stats.collections += 1;
            stats.documents += documents;
            stats.total_size += size;
        }

        for entry in &cluster.buckets {
            let name = naming::bucket(&entry.id);
            if !self.node(&name)?.exists() {
                continue;
            }
            let bucket = self.recompute_bucket(&name)?;
            stats.buckets += 1;
            stats.files += bucket.total_files;
            stats.total_size += bucket.total_size;
        }

        let result = stats.clone();
        self.mutate_node::<Cluster, _>(container, |c| {
            c.statistics = stats;
            Ok(())
        })?;
        Ok(result)
    }

    /// Count documents and their bytes inside one collection container
    fn recompute_collection(&self, container: &str) -> HexaResult<(u64, u64)> {
        self.node(container)?.mutate(|records| {
            let (count, size) = records
                .iter()
                .filter(|(key, _)| key.as_str() != naming::METADATA_KEY)
                .fold((0u64, 0u64), |(n, bytes), (_, doc)| (n + 1, bytes + document_size(doc)));

            let mut meta: Collection = from_record(records.get(naming::METADATA_KEY), container)?;
            meta.document_count = count;
            meta.statistics.size = size;
            records.insert(naming::METADATA_KEY.to_string(), to_record(&meta)?);
            Ok((count, size))
        })
    }

    /// Rebuild bucket and folder statistics from the file containers
    fn recompute_bucket(&self, container: &str) -> HexaResult<BucketStatistics> {
        let bucket: Bucket = self.load_node(container)?;

        let mut files: BTreeMap<String, FileRecord> = BTreeMap::new();
        for entry in &bucket.files {
            if let Some(record) = self
                .node(&naming::file(&entry.id))?
                .get::<FileRecord>(naming::METADATA_KEY)?
            {
                files.insert(entry.id.clone(), record);
            }
        }

        let mut folders = 0;
        for entry in &bucket.folders {
            let name = naming::folder(&entry.id);
            if !self.node(&name)?.exists() {
                continue;
            }
            folders += 1;
            self.mutate_node::<Folder, _>(&name, |folder| {
                let mut stats = FolderStatistics::default();
                for file in folder.files.iter().filter_map(|r| files.get(&r.id)) {
                    stats.files += 1;
                    stats.size += file.size;
                }
                folder.statistics = stats;
                Ok(())
            })?;
        }

        let mut stats = BucketStatistics {
            folders,
            ..Default::default()
        };
        for record in files.values() {
            stats.record_file(record.size, &record.mime_type);
        }

        let result = stats.clone();
        self.mutate_node::<Bucket, _>(container, |b| {
            for entry in b.files.iter_mut() {
                if let Some(record) = files.get(&entry.id) {
                    entry.size = Some(record.size);
                    entry.mime_type = Some(record.mime_type.clone());
                }
            }
            b.statistics = stats;
            Ok(())
        })?;
        Ok(result)
    }
}
