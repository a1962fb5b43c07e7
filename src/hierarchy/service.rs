//! # Hierarchy Service
//!
//! Creates, renames and deletes hierarchy nodes while keeping parent
//! reference lists and statistics consistent with child containers.
//!
//! ## Write ordering
//! - Create: write the child container first, then append the reference
//!   and bump the parent's counters.
//! - Delete: remove the parent's reference first, then the child container.
//!
//! A crash between the two steps can leave an orphan container but never a
//! reference to a missing one. `reconcile` cleans orphans up.
//!
//! Every entry point takes the acting user and runs the authorization guard
//! before the first write.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::auth::guard::ACL_ADMIN;
use crate::auth::{Acl, Action, Actor, AuthorizationGuard, Resource, ResourceKind};
use crate::cipher::{generate_id, id};
use crate::container::{naming, ContainerStore, Storage};
use crate::errors::{HexaError, HexaResult};

use super::model::{
    has_name, take_reference, validate_name, Bucket, BucketSettings, Cluster, ClusterType,
    Collection, Database, Folder, ReferenceEntry, RollupDelta,
};

/// Hierarchy entry points
#[derive(Debug, Clone)]
pub struct HierarchyService {
    pub(super) storage: Storage,
    pub(super) guard: AuthorizationGuard,
}

impl HierarchyService {
    pub fn new(storage: Storage, guard: AuthorizationGuard) -> Self {
        Self { storage, guard }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    // ==================
    // Databases
    // ==================

    pub fn create_database(&self, actor: &Actor, name: &str) -> HexaResult<Database> {
        validate_name("database", name)?;
        self.guard
            .require(actor, &Resource::unowned(ResourceKind::Database), Action::Create)?;

        let now = Utc::now();
        let mut permissions = Acl::new();
        permissions.insert(actor.user_id.clone(), vec![ACL_ADMIN.to_string()]);

        let database = Database {
            id: generate_id(id::DATABASE),
            name: name.to_string(),
            owner_id: actor.user_id.clone(),
            created_at: now,
            updated_at: now,
            clusters: Vec::new(),
            permissions,
            statistics: Default::default(),
            extra: Default::default(),
        };

        let record = to_record(&database)?;
        self.databases()?.mutate(|records| {
            let taken = records
                .values()
                .any(|db| db.get("name").and_then(Value::as_str) == Some(name));
            if taken {
                return Err(HexaError::conflict(format!("database '{}' already exists", name)));
            }
            records.insert(database.id.clone(), record);
            Ok(())
        })?;

        info!(database_id = %database.id, name, owner = %actor.user_id, "database created");
        Ok(database)
    }

    pub fn get_database(&self, actor: &Actor, database_id: &str) -> HexaResult<Database> {
        let database = self.load_database(database_id)?;
        self.guard
            .require(actor, &resource_of(&database, ResourceKind::Database), Action::Read)?;
        Ok(database)
    }

    /// Databases the actor may read
    pub fn list_databases(&self, actor: &Actor) -> HexaResult<Vec<Database>> {
        let mut databases: Vec<Database> = self
            .databases()?
            .find_typed::<Database>(&Default::default())?
            .into_iter()
            .filter(|db| {
                self.guard.can_access_resource(
                    actor,
                    &resource_of(db, ResourceKind::Database),
                    Action::Read,
                )
            })
            .collect();
        databases.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(databases)
    }

    pub fn rename_database(&self, actor: &Actor, database_id: &str, new_name: &str) -> HexaResult<Database> {
        validate_name("database", new_name)?;
        let database = self.load_database(database_id)?;
        self.guard
            .require(actor, &resource_of(&database, ResourceKind::Database), Action::Write)?;

        self.databases()?.mutate(|records| {
            let taken = records.iter().any(|(key, db)| {
                key != database_id && db.get("name").and_then(Value::as_str) == Some(new_name)
            });
            if taken {
                return Err(HexaError::conflict(format!("database '{}' already exists", new_name)));
            }
            let mut database: Database = from_record(records.get(database_id), database_id)?;
            database.name = new_name.to_string();
            database.updated_at = Utc::now();
            records.insert(database_id.to_string(), to_record(&database)?);
            Ok(database)
        })
    }

    /// Grant ACL actions on a database to another user
    pub fn grant_access(&self, actor: &Actor, database_id: &str, user_id: &str, actions: &[&str]) -> HexaResult<Database> {
        let database = self.load_database(database_id)?;
        self.guard
            .require(actor, &resource_of(&database, ResourceKind::Database), Action::Admin)?;

        self.mutate_database(database_id, |db| {
            let granted = db.permissions.entry(user_id.to_string()).or_default();
            for action in actions {
                if !granted.iter().any(|g| g == action) {
                    granted.push(action.to_string());
                }
            }
            db.updated_at = Utc::now();
            Ok(db.clone())
        })
    }

    /// Delete an empty database
    pub fn delete_database(&self, actor: &Actor, database_id: &str) -> HexaResult<()> {
        let database = self.load_database(database_id)?;
        self.guard
            .require(actor, &resource_of(&database, ResourceKind::Database), Action::Delete)?;

        self.databases()?.mutate(|records| {
            let current: Database = from_record(records.get(database_id), database_id)?;
            if !current.clusters.is_empty() {
                return Err(HexaError::conflict(format!(
                    "database '{}' still has {} cluster(s)",
                    current.name,
                    current.clusters.len()
                )));
            }
            records.remove(database_id);
            Ok(())
        })?;

        info!(database_id, "database deleted");
        Ok(())
    }

    // ==================
    // Clusters
    // ==================

    pub fn create_cluster(
        &self,
        actor: &Actor,
        database_id: &str,
        name: &str,
        cluster_type: ClusterType,
    ) -> HexaResult<Cluster> {
        validate_name("cluster", name)?;
        let database = self.load_database(database_id)?;
        self.guard
            .require(actor, &resource_of(&database, ResourceKind::Cluster), Action::Create)?;

        if has_name(&database.clusters, name) {
            return Err(HexaError::conflict(format!(
                "cluster '{}' already exists in database '{}'",
                name, database.name
            )));
        }

        let now = Utc::now();
        let cluster = Cluster {
            id: generate_id(id::CLUSTER),
            name: name.to_string(),
            database_id: database_id.to_string(),
            cluster_type,
            created_by: Some(actor.user_id.clone()),
            created_at: now,
            updated_at: now,
            collections: Vec::new(),
            buckets: Vec::new(),
            permissions: Acl::new(),
            statistics: Default::default(),
            extra: Default::default(),
        };

        // child first
        self.node(&naming::cluster(&cluster.id))?
            .save(naming::METADATA_KEY, &cluster)?;

        let mut reference = ReferenceEntry::new(&cluster.id, name, now);
        reference.cluster_type = Some(cluster_type);
        self.mutate_database(database_id, |db| {
            if has_name(&db.clusters, name) {
                return Err(HexaError::conflict(format!("cluster '{}' already exists", name)));
            }
            db.clusters.push(reference);
            db.statistics.clusters += 1;
            db.statistics.last_activity = Some(now);
            db.updated_at = now;
            Ok(())
        })?;

        info!(cluster_id = %cluster.id, database_id, name, "cluster created");
        Ok(cluster)
    }

    pub fn get_cluster(&self, actor: &Actor, cluster_id: &str) -> HexaResult<Cluster> {
        let cluster = self.load_cluster(cluster_id)?;
        self.require_in(actor, &cluster.database_id, ResourceKind::Cluster, Action::Read)?;
        Ok(cluster)
    }

    pub fn rename_cluster(&self, actor: &Actor, cluster_id: &str, new_name: &str) -> HexaResult<Cluster> {
        validate_name("cluster", new_name)?;
        let cluster = self.load_cluster(cluster_id)?;
        let database = self.require_in(actor, &cluster.database_id, ResourceKind::Cluster, Action::Write)?;

        if database.clusters.iter().any(|r| r.name == new_name && r.id != cluster_id) {
            return Err(HexaError::conflict(format!("cluster '{}' already exists", new_name)));
        }

        let renamed = self.mutate_node::<Cluster, _>(&naming::cluster(cluster_id), |c| {
            c.name = new_name.to_string();
            c.updated_at = Utc::now();
            Ok(c.clone())
        })?;
        self.mutate_database(&cluster.database_id, |db| {
            rename_reference(&mut db.clusters, cluster_id, new_name);
            db.updated_at = Utc::now();
            Ok(())
        })?;
        Ok(renamed)
    }

    /// Delete a cluster with no collections or buckets
    pub fn delete_cluster(&self, actor: &Actor, cluster_id: &str) -> HexaResult<()> {
        let cluster = self.load_cluster(cluster_id)?;
        self.require_in(actor, &cluster.database_id, ResourceKind::Cluster, Action::Delete)?;

        self.remove_node::<Cluster>(&naming::cluster(cluster_id), |current| {
            if !current.collections.is_empty() || !current.buckets.is_empty() {
                return Err(HexaError::conflict(format!(
                    "cluster '{}' still has {} collection(s) and {} bucket(s)",
                    current.name,
                    current.collections.len(),
                    current.buckets.len()
                )));
            }

            self.mutate_database(&current.database_id, |db| {
                if take_reference(&mut db.clusters, cluster_id).is_some() {
                    db.statistics.clusters = db.statistics.clusters.saturating_sub(1);
                }
                db.updated_at = Utc::now();
                Ok(())
            })
        })?;

        info!(cluster_id, "cluster deleted");
        Ok(())
    }

    // ==================
    // Collections
    // ==================

    pub fn create_collection(
        &self,
        actor: &Actor,
        cluster_id: &str,
        name: &str,
        schema: Option<Value>,
    ) -> HexaResult<Collection> {
        validate_name("collection", name)?;
        let cluster = self.load_cluster(cluster_id)?;
        self.require_in(actor, &cluster.database_id, ResourceKind::Collection, Action::Create)?;

        if !cluster.cluster_type.allows_collections() {
            return Err(HexaError::validation(format!(
                "cluster '{}' is {} and cannot hold collections",
                cluster.name, cluster.cluster_type
            )));
        }
        if has_name(&cluster.collections, name) {
            return Err(HexaError::conflict(format!(
                "collection '{}' already exists in cluster '{}'",
                name, cluster.name
            )));
        }

        let now = Utc::now();
        let collection = Collection {
            id: generate_id(id::COLLECTION),
            name: name.to_string(),
            cluster_id: cluster_id.to_string(),
            database_id: cluster.database_id.clone(),
            created_by: Some(actor.user_id.clone()),
            created_at: now,
            updated_at: now,
            schema,
            document_count: 0,
            permissions: Acl::new(),
            statistics: Default::default(),
            extra: Default::default(),
        };

        self.node(&naming::collection(&collection.id))?
            .save(naming::METADATA_KEY, &collection)?;

        let reference = ReferenceEntry::new(&collection.id, name, now);
        self.mutate_node::<Cluster, _>(&naming::cluster(cluster_id), |c| {
            if has_name(&c.collections, name) {
                return Err(HexaError::conflict(format!("collection '{}' already exists", name)));
            }
            c.collections.push(reference);
            c.statistics.collections += 1;
            c.updated_at = now;
            Ok(())
        })?;
        self.roll_up_database(
            &cluster.database_id,
            &RollupDelta {
                collections: 1,
                ..Default::default()
            },
        )?;

        info!(collection_id = %collection.id, cluster_id, name, "collection created");
        Ok(collection)
    }

    pub fn get_collection(&self, actor: &Actor, collection_id: &str) -> HexaResult<Collection> {
        let collection = self.load_collection(collection_id)?;
        self.require_in(actor, &collection.database_id, ResourceKind::Collection, Action::Read)?;
        Ok(collection)
    }

    pub fn rename_collection(&self, actor: &Actor, collection_id: &str, new_name: &str) -> HexaResult<Collection> {
        validate_name("collection", new_name)?;
        let collection = self.load_collection(collection_id)?;
        self.require_in(actor, &collection.database_id, ResourceKind::Collection, Action::Write)?;

        let cluster = self.load_cluster(&collection.cluster_id)?;
        if cluster.collections.iter().any(|r| r.name == new_name && r.id != collection_id) {
            return Err(HexaError::conflict(format!("collection '{}' already exists", new_name)));
        }

        let renamed = self.mutate_node::<Collection, _>(&naming::collection(collection_id), |c| {
            c.name = new_name.to_string();
            c.updated_at = Utc::now();
            Ok(c.clone())
        })?;
        self.mutate_node::<Cluster, _>(&naming::cluster(&collection.cluster_id), |c| {
            rename_reference(&mut c.collections, collection_id, new_name);
            c.updated_at = Utc::now();
            Ok(())
        })?;
        Ok(renamed)
    }

    /// Delete a collection together with the documents in its container
    pub fn delete_collection(&self, actor: &Actor, collection_id: &str) -> HexaResult<()> {
        let collection = self.load_collection(collection_id)?;
        self.require_in(actor, &collection.database_id, ResourceKind::Collection, Action::Delete)?;

        let delta = RollupDelta {
            collections: -1,
            documents: -(collection.document_count as i64),
            total_size: -(collection.statistics.size as i64),
            ..Default::default()
        };

        self.mutate_node::<Cluster, _>(&naming::cluster(&collection.cluster_id), |c| {
            if take_reference(&mut c.collections, collection_id).is_some() {
                c.statistics.apply(&delta);
            }
            c.updated_at = Utc::now();
            Ok(())
        })?;
        self.roll_up_database(&collection.database_id, &delta)?;
        self.node(&naming::collection(collection_id))?.remove_file()?;

        info!(collection_id, documents = collection.document_count, "collection deleted");
        Ok(())
    }

    // ==================
    // Buckets
    // ==================

    pub fn create_bucket(
        &self,
        actor: &Actor,
        cluster_id: &str,
        name: &str,
        settings: BucketSettings,
    ) -> HexaResult<Bucket> {
        validate_name("bucket", name)?;
        let cluster = self.load_cluster(cluster_id)?;
        self.require_in(actor, &cluster.database_id, ResourceKind::Bucket, Action::Create)?;

        if !cluster.cluster_type.allows_buckets() {
            return Err(HexaError::validation(format!(
                "cluster '{}' is {} and cannot hold buckets",
                cluster.name, cluster.cluster_type
            )));
        }
        if has_name(&cluster.buckets, name) {
            return Err(HexaError::conflict(format!(
                "bucket '{}' already exists in cluster '{}'",
                name, cluster.name
            )));
        }

        let now = Utc::now();
        let bucket = Bucket {
            id: generate_id(id::BUCKET),
            name: name.to_string(),
            cluster_id: cluster_id.to_string(),
            database_id: cluster.database_id.clone(),
            created_by: Some(actor.user_id.clone()),
            created_at: now,
            updated_at: now,
            folders: Vec::new(),
            files: Vec::new(),
            permissions: Acl::new(),
            statistics: Default::default(),
            settings,
            extra: Default::default(),
        };

        self.node(&naming::bucket(&bucket.id))?
            .save(naming::METADATA_KEY, &bucket)?;

        let reference = ReferenceEntry::new(&bucket.id, name, now);
        self.mutate_node::<Cluster, _>(&naming::cluster(cluster_id), |c| {
            if has_name(&c.buckets, name) {
                return Err(HexaError::conflict(format!("bucket '{}' already exists", name)));
            }
            c.buckets.push(reference);
            c.statistics.buckets += 1;
            c.updated_at = now;
            Ok(())
        })?;
        self.roll_up_database(
            &cluster.database_id,
            &RollupDelta {
                buckets: 1,
                ..Default::default()
            },
        )?;

        info!(bucket_id = %bucket.id, cluster_id, name, "bucket created");
        Ok(bucket)
    }

    pub fn get_bucket(&self, actor: &Actor, bucket_id: &str) -> HexaResult<Bucket> {
        let bucket = self.load_bucket(bucket_id)?;
        self.require_in(actor, &bucket.database_id, ResourceKind::Bucket, Action::Read)?;
        Ok(bucket)
    }

    pub fn rename_bucket(&self, actor: &Actor, bucket_id: &str, new_name: &str) -> HexaResult<Bucket> {
        validate_name("bucket", new_name)?;
        let bucket = self.load_bucket(bucket_id)?;
        self.require_in(actor, &bucket.database_id, ResourceKind::Bucket, Action::Write)?;

        let cluster = self.load_cluster(&bucket.cluster_id)?;
        if cluster.buckets.iter().any(|r| r.name == new_name && r.id != bucket_id) {
            return Err(HexaError::conflict(format!("bucket '{}' already exists", new_name)));
        }

        let renamed = self.mutate_node::<Bucket, _>(&naming::bucket(bucket_id), |b| {
            b.name = new_name.to_string();
            b.updated_at = Utc::now();
            Ok(b.clone())
        })?;
        self.mutate_node::<Cluster, _>(&naming::cluster(&bucket.cluster_id), |c| {
            rename_reference(&mut c.buckets, bucket_id, new_name);
            c.updated_at = Utc::now();
            Ok(())
        })?;
        Ok(renamed)
    }

    /// Delete a bucket with no folders or files
    pub fn delete_bucket(&self, actor: &Actor, bucket_id: &str) -> HexaResult<()> {
        let bucket = self.load_bucket(bucket_id)?;
        self.require_in(actor, &bucket.database_id, ResourceKind::Bucket, Action::Delete)?;

        let delta = RollupDelta {
            buckets: -1,
            ..Default::default()
        };
        self.remove_node::<Bucket>(&naming::bucket(bucket_id), |current| {
            if !current.folders.is_empty() || !current.files.is_empty() {
                return Err(HexaError::conflict(format!(
                    "bucket '{}' still has {} folder(s) and {} file(s)",
                    current.name,
                    current.folders.len(),
                    current.files.len()
                )));
            }

            self.mutate_node::<Cluster, _>(&naming::cluster(&current.cluster_id), |c| {
                if take_reference(&mut c.buckets, bucket_id).is_some() {
                    c.statistics.apply(&delta);
                }
                c.updated_at = Utc::now();
                Ok(())
            })?;
            self.roll_up_database(&current.database_id, &delta)
        })?;

        info!(bucket_id, "bucket deleted");
        Ok(())
    }

    // ==================
    // Folders
    // ==================

    pub fn create_folder(&self, actor: &Actor, bucket_id: &str, name: &str) -> HexaResult<Folder> {
        validate_name("folder", name)?;
        let bucket = self.load_bucket(bucket_id)?;
        self.require_in(actor, &bucket.database_id, ResourceKind::Folder, Action::Create)?;

        if has_name(&bucket.folders, name) {
            return Err(HexaError::conflict(format!(
                "folder '{}' already exists in bucket '{}'",
                name, bucket.name
            )));
        }

        let now = Utc::now();
        let folder = Folder {
            id: generate_id(id::FOLDER),
            name: name.to_string(),
            bucket_id: bucket_id.to_string(),
            cluster_id: bucket.cluster_id.clone(),
            database_id: bucket.database_id.clone(),
            path: format!("/{}", name),
            created_at: now,
            updated_at: now,
            files: Vec::new(),
            statistics: Default::default(),
            extra: Default::default(),
        };

        self.node(&naming::folder(&folder.id))?
            .save(naming::METADATA_KEY, &folder)?;

        let mut reference = ReferenceEntry::new(&folder.id, name, now);
        reference.path = Some(folder.path.clone());
        self.mutate_node::<Bucket, _>(&naming::bucket(bucket_id), |b| {
            if has_name(&b.folders, name) {
                return Err(HexaError::conflict(format!("folder '{}' already exists", name)));
            }
            b.folders.push(reference);
            b.statistics.folders += 1;
            b.updated_at = now;
            Ok(())
        })?;

        info!(folder_id = %folder.id, bucket_id, name, "folder created");
        Ok(folder)
    }

    pub fn get_folder(&self, actor: &Actor, folder_id: &str) -> HexaResult<Folder> {
        let folder = self.load_folder(folder_id)?;
        self.require_in(actor, &folder.database_id, ResourceKind::Folder, Action::Read)?;
        Ok(folder)
    }

    pub fn rename_folder(&self, actor: &Actor, folder_id: &str, new_name: &str) -> HexaResult<Folder> {
        validate_name("folder", new_name)?;
        let folder = self.load_folder(folder_id)?;
        self.require_in(actor, &folder.database_id, ResourceKind::Folder, Action::Write)?;

        let bucket = self.load_bucket(&folder.bucket_id)?;
        if bucket.folders.iter().any(|r| r.name == new_name && r.id != folder_id) {
            return Err(HexaError::conflict(format!("folder '{}' already exists", new_name)));
        }

        let path = format!("/{}", new_name);
        let renamed = self.mutate_node::<Folder, _>(&naming::folder(folder_id), |f| {
            f.name = new_name.to_string();
            f.path = path.clone();
            f.updated_at = Utc::now();
            Ok(f.clone())
        })?;
        self.mutate_node::<Bucket, _>(&naming::bucket(&folder.bucket_id), |b| {
            if let Some(entry) = b.folders.iter_mut().find(|r| r.id == folder_id) {
                entry.name = new_name.to_string();
                entry.path = Some(path.clone());
            }
            b.updated_at = Utc::now();
            Ok(())
        })?;
        Ok(renamed)
    }

    /// Delete a folder with no files
    pub fn delete_folder(&self, actor: &Actor, folder_id: &str) -> HexaResult<()> {
        let folder = self.load_folder(folder_id)?;
        self.require_in(actor, &folder.database_id, ResourceKind::Folder, Action::Delete)?;

        self.remove_node::<Folder>(&naming::folder(folder_id), |current| {
            if !current.files.is_empty() {
                return Err(HexaError::conflict(format!(
                    "folder '{}' still has {} file(s)",
                    current.name,
                    current.files.len()
                )));
            }

            self.mutate_node::<Bucket, _>(&naming::bucket(&current.bucket_id), |b| {
                if take_reference(&mut b.folders, folder_id).is_some() {
                    b.statistics.folders = b.statistics.folders.saturating_sub(1);
                }
                b.updated_at = Utc::now();
                Ok(())
            })
        })?;

        info!(folder_id, "folder deleted");
        Ok(())
    }

    // ==================
    // Shared helpers
    // ==================

    pub(super) fn databases(&self) -> HexaResult<ContainerStore> {
        self.storage.container(naming::DATABASES)
    }

    pub(super) fn node(&self, container: &str) -> HexaResult<ContainerStore> {
        self.storage.container(container)
    }

    pub(super) fn load_database(&self, database_id: &str) -> HexaResult<Database> {
        self.databases()?
            .get(database_id)?
            .ok_or_else(|| HexaError::not_found(format!("database {}", database_id)))
    }

    pub(super) fn load_node<T: DeserializeOwned>(&self, container: &str) -> HexaResult<T> {
        self.node(container)?
            .get(naming::METADATA_KEY)?
            .ok_or_else(|| HexaError::not_found(format!("container {}", container)))
    }

    pub(super) fn load_cluster(&self, cluster_id: &str) -> HexaResult<Cluster> {
        self.load_node(&naming::cluster(cluster_id))
    }

    pub(super) fn load_collection(&self, collection_id: &str) -> HexaResult<Collection> {
        self.load_node(&naming::collection(collection_id))
    }

    pub(super) fn load_bucket(&self, bucket_id: &str) -> HexaResult<Bucket> {
        self.load_node(&naming::bucket(bucket_id))
    }

    pub(super) fn load_folder(&self, folder_id: &str) -> HexaResult<Folder> {
        self.load_node(&naming::folder(folder_id))
    }

    /// Read-modify-write of the `metadata` record of a node container
    pub(super) fn mutate_node<T, R>(
        &self,
        container: &str,
        f: impl FnOnce(&mut T) -> HexaResult<R>,
    ) -> HexaResult<R>
    where
        T: Serialize + DeserializeOwned,
    {
        self.node(container)?.mutate(|records| {
            let mut node: T = from_record(records.get(naming::METADATA_KEY), container)?;
            let result = f(&mut node)?;
            records.insert(naming::METADATA_KEY.to_string(), to_record(&node)?);
            Ok(result)
        })
    }

    /// Unlink a node container once `detach` has checked its current
    /// descriptor and dropped the parent reference.
    ///
    /// Both run under the node's writer lock, so a child reference appended
    /// concurrently is either seen by the check or lands after the unlink and
    /// fails with `NotFound`.
    fn remove_node<T: DeserializeOwned>(
        &self,
        container: &str,
        detach: impl FnOnce(T) -> HexaResult<()>,
    ) -> HexaResult<()> {
        self.node(container)?.remove_file_if(|records| {
            let current: T = from_record(records.get(naming::METADATA_KEY), container)?;
            detach(current)
        })
    }

    pub(super) fn mutate_database<R>(
        &self,
        database_id: &str,
        f: impl FnOnce(&mut Database) -> HexaResult<R>,
    ) -> HexaResult<R> {
        self.databases()?.mutate(|records| {
            let mut database: Database = from_record(records.get(database_id), database_id)?;
            let result = f(&mut database)?;
            records.insert(database_id.to_string(), to_record(&database)?);
            Ok(result)
        })
    }

    pub(super) fn roll_up_cluster(&self, cluster_id: &str, delta: &RollupDelta) -> HexaResult<()> {
        if delta.is_zero() {
            return Ok(());
        }
        self.mutate_node::<Cluster, _>(&naming::cluster(cluster_id), |c| {
            c.statistics.apply(delta);
            Ok(())
        })?;
        debug!(cluster_id, ?delta, "cluster statistics rolled up");
        Ok(())
    }

    pub(super) fn roll_up_database(&self, database_id: &str, delta: &RollupDelta) -> HexaResult<()> {
        if delta.is_zero() {
            return Ok(());
        }
        self.mutate_database(database_id, |db| {
            db.statistics.apply(delta);
            Ok(())
        })?;
        debug!(database_id, ?delta, "database statistics rolled up");
        Ok(())
    }

    /// Authorize against the owning database, returning it
    pub(super) fn require_in(
        &self,
        actor: &Actor,
        database_id: &str,
        kind: ResourceKind,
        action: Action,
    ) -> HexaResult<Database> {
        let database = self.load_database(database_id)?;
        self.guard.require(actor, &resource_of(&database, kind), action)?;
        Ok(database)
    }
}

/// Nodes below a database are governed by the database's owner and ACL
pub(super) fn resource_of(database: &Database, kind: ResourceKind) -> Resource {
    Resource::new(
        kind,
        Some(database.owner_id.clone()),
        database.permissions.clone(),
    )
}

pub(super) fn to_record<T: Serialize>(value: &T) -> HexaResult<Value> {
    serde_json::to_value(value).map_err(|e| HexaError::internal(format!("serialize record: {}", e)))
}

pub(super) fn from_record<T: DeserializeOwned>(record: Option<&Value>, what: &str) -> HexaResult<T> {
    let record = record.ok_or_else(|| HexaError::not_found(what.to_string()))?;
    serde_json::from_value(record.clone())
        .map_err(|e| HexaError::integrity(what, format!("unexpected record shape: {}", e)))
}

fn rename_reference(list: &mut [ReferenceEntry], id: &str, new_name: &str) {
    if let Some(entry) = list.iter_mut().find(|r| r.id == id) {
        entry.name = new_name.to_string();
    }
}
