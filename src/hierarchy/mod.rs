//! # Hierarchy Model
//!
//! Database → Cluster → Collection | Bucket → Folder → File, each node in
//! its own encrypted container, linked by parent reference lists.
//!
//! Multi-container operations are ordered single-container writes:
//! children are written before their parent's reference on create, and
//! references are removed before the child on delete. `reconcile` and
//! `recompute_statistics` repair what an interrupted sequence leaves.

mod documents;
mod files;
pub mod model;
mod repair;
mod service;

pub use model::{
    Bucket, BucketSettings, BucketStatistics, Cluster, ClusterStatistics, ClusterType,
    Collection, CollectionStatistics, Database, DatabaseStatistics, FileRecord, FileUpload,
    Folder, FolderStatistics, ReferenceEntry, RollupDelta, SizeDistribution, SystemFields,
};
pub use repair::{DanglingReference, ReconcileMode, ReconcileReport};
pub use service::HierarchyService;
