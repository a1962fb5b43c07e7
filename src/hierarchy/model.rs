//! # Hierarchy Records
//!
//! Databases, clusters, collections, buckets, folders and file metadata as
//! stored on disk. Databases live in the `databases` container keyed by id;
//! every other node lives under the `metadata` key of its own container.
//!
//! Unknown fields written by older tooling are kept in `extra` and written
//! back untouched.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::Acl;
use crate::errors::{HexaError, HexaResult};

/// Longest accepted node name
pub const MAX_NAME_LEN: usize = 50;

/// Default per-bucket upload limit (100 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

const MIB: u64 = 1024 * 1024;

/// Names are 1..=50 characters of letters, digits, spaces, `-` and `_`
pub fn validate_name(kind: &str, name: &str) -> HexaResult<()> {
    if name.trim().is_empty() {
        return Err(HexaError::validation(format!("{} name cannot be empty", kind)));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(HexaError::validation(format!(
            "{} name must be at most {} characters",
            kind, MAX_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ' ')
    {
        return Err(HexaError::validation(format!(
            "{} name can only contain letters, numbers, spaces, hyphens, and underscores",
            kind
        )));
    }
    Ok(())
}

/// Best-effort MIME type from a file extension
pub fn mime_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

/// Add a signed delta to an unsigned counter, clamping at zero
pub fn adjust(counter: &mut u64, delta: i64) {
    *counter = if delta >= 0 {
        counter.saturating_add(delta as u64)
    } else {
        counter.saturating_sub(delta.unsigned_abs())
    };
}

// ==================
// References
// ==================

/// Entry in a parent's child list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceEntry {
    pub id: String,
    pub name: String,
    #[serde(alias = "uploadedAt")]
    pub created_at: DateTime<Utc>,
    /// Cluster type, on database entries
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub cluster_type: Option<ClusterType>,
    /// Folder path, on folder entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Containing folder, on bucket file entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
}

impl ReferenceEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created_at,
            cluster_type: None,
            path: None,
            size: None,
            mime_type: None,
            folder_id: None,
        }
    }
}

/// Remove the entry with `id`, returning it
pub fn take_reference(list: &mut Vec<ReferenceEntry>, id: &str) -> Option<ReferenceEntry> {
    let position = list.iter().position(|r| r.id == id)?;
    Some(list.remove(position))
}

pub fn has_name(list: &[ReferenceEntry], name: &str) -> bool {
    list.iter().any(|r| r.name == name)
}

// ==================
// Statistics
// ==================

/// Signed change to cluster/database rollups
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollupDelta {
    pub collections: i64,
    pub buckets: i64,
    pub documents: i64,
    pub files: i64,
    pub total_size: i64,
}

impl RollupDelta {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseStatistics {
    pub clusters: u64,
    pub collections: u64,
    pub buckets: u64,
    pub documents: u64,
    pub files: u64,
    pub total_size: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl DatabaseStatistics {
    pub fn apply(&mut self, delta: &RollupDelta) {
        adjust(&mut self.collections, delta.collections);
        adjust(&mut self.buckets, delta.buckets);
        adjust(&mut self.documents, delta.documents);
        adjust(&mut self.files, delta.files);
        adjust(&mut self.total_size, delta.total_size);
        self.last_activity = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterStatistics {
    pub collections: u64,
    pub buckets: u64,
    pub documents: u64,
    pub files: u64,
    pub total_size: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl ClusterStatistics {
    pub fn apply(&mut self, delta: &RollupDelta) {
        adjust(&mut self.collections, delta.collections);
        adjust(&mut self.buckets, delta.buckets);
        adjust(&mut self.documents, delta.documents);
        adjust(&mut self.files, delta.files);
        adjust(&mut self.total_size, delta.total_size);
        self.last_activity = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectionStatistics {
    /// Serialized bytes of all documents
    pub size: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Upload counts per size band
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeDistribution {
    #[serde(rename = "0-1MB")]
    pub under_1mb: u64,
    #[serde(rename = "1-10MB")]
    pub from_1_to_10mb: u64,
    #[serde(rename = "10-100MB")]
    pub from_10_to_100mb: u64,
    #[serde(rename = "100MB+")]
    pub over_100mb: u64,
}

impl SizeDistribution {
    fn band(&mut self, size: u64) -> &mut u64 {
        match size {
            s if s < MIB => &mut self.under_1mb,
            s if s < 10 * MIB => &mut self.from_1_to_10mb,
            s if s < 100 * MIB => &mut self.from_10_to_100mb,
            _ => &mut self.over_100mb,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BucketStatistics {
    pub total_files: u64,
    pub total_size: u64,
    pub folders: u64,
    /// Major MIME type (`image`, `text`, ...) to count
    pub file_types: BTreeMap<String, u64>,
    pub size_distribution: SizeDistribution,
}

impl BucketStatistics {
    pub fn record_file(&mut self, size: u64, mime_type: &str) {
        self.total_files += 1;
        self.total_size = self.total_size.saturating_add(size);
        *self.file_types.entry(major_type(mime_type)).or_insert(0) += 1;
        *self.size_distribution.band(size) += 1;
    }

    pub fn forget_file(&mut self, size: u64, mime_type: &str) {
        self.total_files = self.total_files.saturating_sub(1);
        self.total_size = self.total_size.saturating_sub(size);

        let major = major_type(mime_type);
        if let Some(count) = self.file_types.get_mut(&major) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.file_types.remove(&major);
            }
        }

        let band = self.size_distribution.band(size);
        *band = band.saturating_sub(1);
    }
}

fn major_type(mime_type: &str) -> String {
    mime_type
        .split('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("application")
        .to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderStatistics {
    pub files: u64,
    pub size: u64,
}

// ==================
// Nodes
// ==================

/// What a cluster may hold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterType {
    JsonOnly,
    FileOnly,
    #[default]
    Mixed,
}

impl ClusterType {
    pub fn allows_collections(&self) -> bool {
        matches!(self, ClusterType::JsonOnly | ClusterType::Mixed)
    }

    pub fn allows_buckets(&self) -> bool {
        matches!(self, ClusterType::FileOnly | ClusterType::Mixed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterType::JsonOnly => "json_only",
            ClusterType::FileOnly => "file_only",
            ClusterType::Mixed => "mixed",
        }
    }
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterType {
    type Err = HexaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json_only" => Ok(ClusterType::JsonOnly),
            "file_only" => Ok(ClusterType::FileOnly),
            "mixed" => Ok(ClusterType::Mixed),
            other => Err(HexaError::validation(format!("unknown cluster type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub clusters: Vec<ReferenceEntry>,
    #[serde(default)]
    pub permissions: Acl,
    #[serde(default)]
    pub statistics: DatabaseStatistics,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: String,
    pub name: String,
    pub database_id: String,
    #[serde(rename = "type", default)]
    pub cluster_type: ClusterType,
    #[serde(default)]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub collections: Vec<ReferenceEntry>,
    #[serde(default)]
    pub buckets: Vec<ReferenceEntry>,
    #[serde(default)]
    pub permissions: Acl,
    #[serde(default)]
    pub statistics: ClusterStatistics,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub cluster_id: String,
    pub database_id: String,
    #[serde(default)]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Stored for collaborators; not enforced here
    #[serde(default)]
    pub schema: Option<Value>,
    #[serde(default)]
    pub document_count: u64,
    #[serde(default)]
    pub permissions: Acl,
    #[serde(default)]
    pub statistics: CollectionStatistics,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Upload constraints for a bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSettings {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// `["*"]` allows everything
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}
fn default_allowed_types() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for BucketSettings {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            allowed_types: default_allowed_types(),
            extra: Map::new(),
        }
    }
}

impl BucketSettings {
    /// Check an upload against the bucket limits
    pub fn check_upload(&self, size: u64, mime_type: &str) -> HexaResult<()> {
        if size > self.max_file_size {
            return Err(HexaError::validation(format!(
                "file size {} exceeds the bucket limit of {} bytes",
                size, self.max_file_size
            )));
        }
        let any = self.allowed_types.iter().any(|t| t == "*");
        if !any && !self.allowed_types.iter().any(|t| t == mime_type) {
            return Err(HexaError::validation(format!(
                "file type {} is not allowed in this bucket",
                mime_type
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub id: String,
    pub name: String,
    pub cluster_id: String,
    pub database_id: String,
    #[serde(default)]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub folders: Vec<ReferenceEntry>,
    #[serde(default)]
    pub files: Vec<ReferenceEntry>,
    #[serde(default)]
    pub permissions: Acl,
    #[serde(default)]
    pub statistics: BucketStatistics,
    #[serde(default)]
    pub settings: BucketSettings,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub bucket_id: String,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub database_id: String,
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<ReferenceEntry>,
    #[serde(default)]
    pub statistics: FolderStatistics,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Metadata of an uploaded file. The binary payload is stored elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub original_name: String,
    pub size: u64,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub uploaded_by: String,
    pub bucket_id: String,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub database_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Upload request
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub name: String,
    pub size: u64,
    /// Derived from the extension when absent
    pub mime_type: Option<String>,
    pub metadata: Option<Value>,
}

impl FileUpload {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: None,
            metadata: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn resolved_mime_type(&self) -> String {
        self.mime_type
            .clone()
            .unwrap_or_else(|| mime_type_for(&self.name).to_string())
    }
}

/// Bookkeeping block embedded in every document as `_system`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemFields {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    pub version: u64,
}
