//! File metadata. Each file gets a `file_<id>` container; the bucket and
//! the optional folder hold references carrying size and MIME type.

use chrono::Utc;
use tracing::info;

use crate::auth::{Action, Actor, ResourceKind};
use crate::cipher::{generate_id, id};
use crate::container::naming;
use crate::errors::{HexaError, HexaResult};

use super::model::{has_name, take_reference, Bucket, FileRecord, FileUpload, Folder, ReferenceEntry, RollupDelta};
use super::service::HierarchyService;

impl HierarchyService {
    /// Record an upload in a bucket, optionally inside one of its folders
    pub fn add_file(
        &self,
        actor: &Actor,
        bucket_id: &str,
        folder_id: Option<&str>,
        upload: FileUpload,
    ) -> HexaResult<FileRecord> {
        let bucket = self.load_bucket(bucket_id)?;
        self.require_in(actor, &bucket.database_id, ResourceKind::File, Action::Write)?;

        let name = upload.name.trim();
        if name.is_empty() || name.contains(['/', '\\', '\0']) {
            return Err(HexaError::validation(format!("invalid file name '{}'", upload.name)));
        }
        let mime_type = upload.resolved_mime_type();
        bucket.settings.check_upload(upload.size, &mime_type)?;

        let folder = match folder_id {
            Some(folder_id) => {
                let folder = self.load_folder(folder_id)?;
                if folder.bucket_id != bucket_id {
                    return Err(HexaError::validation(format!(
                        "folder {} does not belong to bucket {}",
                        folder_id, bucket_id
                    )));
                }
                Some(folder)
            }
            None => None,
        };

        let taken = match &folder {
            Some(folder) => has_name(&folder.files, name),
            None => bucket
                .files
                .iter()
                .any(|r| r.folder_id.is_none() && r.name == name),
        };
        if taken {
            return Err(HexaError::conflict(format!("file '{}' already exists here", name)));
        }

        let now = Utc::now();
        let record = FileRecord {
            id: generate_id(id::FILE),
            name: name.to_string(),
            original_name: upload.name.clone(),
            size: upload.size,
            mime_type: mime_type.clone(),
            uploaded_at: now,
            updated_at: now,
            uploaded_by: actor.user_id.clone(),
            bucket_id: bucket_id.to_string(),
            folder_id: folder_id.map(str::to_string),
            cluster_id: bucket.cluster_id.clone(),
            database_id: bucket.database_id.clone(),
            metadata: upload.metadata,
            extra: Default::default(),
        };

        self.node(&naming::file(&record.id))?
            .save(naming::METADATA_KEY, &record)?;

        let mut reference = ReferenceEntry::new(&record.id, name, now);
        reference.size = Some(record.size);
        reference.mime_type = Some(mime_type.clone());

        if let Some(folder_id) = folder_id {
            self.mutate_node::<Folder, _>(&naming::folder(folder_id), |f| {
                f.files.push(reference.clone());
                f.statistics.files += 1;
                f.statistics.size = f.statistics.size.saturating_add(record.size);
                f.updated_at = now;
                Ok(())
            })?;
        }

        reference.folder_id = record.folder_id.clone();
        self.mutate_node::<Bucket, _>(&naming::bucket(bucket_id), |b| {
            b.files.push(reference);
            b.statistics.record_file(record.size, &mime_type);
            b.updated_at = now;
            Ok(())
        })?;

        let delta = RollupDelta {
            files: 1,
            total_size: record.size as i64,
            ..Default::default()
        };
        self.roll_up_cluster(&record.cluster_id, &delta)?;
        self.roll_up_database(&record.database_id, &delta)?;

        info!(file_id = %record.id, bucket_id, size = record.size, "file added");
        Ok(record)
    }

    pub fn get_file(&self, actor: &Actor, file_id: &str) -> HexaResult<FileRecord> {
        let record: FileRecord = self.load_node(&naming::file(file_id))?;
        self.require_in(actor, &record.database_id, ResourceKind::File, Action::Read)?;
        Ok(record)
    }

    /// References of the files directly in a bucket, or in one of its folders
    pub fn list_files(&self, actor: &Actor, bucket_id: &str, folder_id: Option<&str>) -> HexaResult<Vec<ReferenceEntry>> {
        let bucket = self.load_bucket(bucket_id)?;
        self.require_in(actor, &bucket.database_id, ResourceKind::File, Action::Read)?;

        Ok(bucket
            .files
            .into_iter()
            .filter(|r| r.folder_id.as_deref() == folder_id)
            .collect())
    }

    /// Drop folder and bucket references, then the file container
    pub fn delete_file(&self, actor: &Actor, file_id: &str) -> HexaResult<()> {
        let record: FileRecord = self.load_node(&naming::file(file_id))?;
        self.require_in(actor, &record.database_id, ResourceKind::File, Action::Delete)?;
        let now = Utc::now();

        if let Some(folder_id) = &record.folder_id {
            self.mutate_node::<Folder, _>(&naming::folder(folder_id), |f| {
                if take_reference(&mut f.files, file_id).is_some() {
                    f.statistics.files = f.statistics.files.saturating_sub(1);
                    f.statistics.size = f.statistics.size.saturating_sub(record.size);
                }
                f.updated_at = now;
                Ok(())
            })?;
        }

        self.mutate_node::<Bucket, _>(&naming::bucket(&record.bucket_id), |b| {
            if take_reference(&mut b.files, file_id).is_some() {
                b.statistics.forget_file(record.size, &record.mime_type);
            }
            b.updated_at = now;
            Ok(())
        })?;

        let delta = RollupDelta {
            files: -1,
            total_size: -(record.size as i64),
            ..Default::default()
        };
        self.roll_up_cluster(&record.cluster_id, &delta)?;
        self.roll_up_database(&record.database_id, &delta)?;

        self.node(&naming::file(file_id))?.remove_file()?;
        info!(file_id, "file deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthorizationGuard, Role};
    use crate::cipher::KeyManager;
    use crate::container::Storage;
    use crate::hierarchy::{BucketSettings, ClusterType};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup(dir: &TempDir, settings: BucketSettings) -> (HierarchyService, Actor, String) {
        let keys = Arc::new(KeyManager::generate().unwrap());
        let storage = Storage::open(dir.path(), keys).unwrap();
        let service = HierarchyService::new(storage, AuthorizationGuard::new());
        let admin = Actor::new("user_admin", Role::Admin);

        let db = service.create_database(&admin, "media").unwrap();
        let cluster = service.create_cluster(&admin, &db.id, "assets", ClusterType::FileOnly).unwrap();
        let bucket = service.create_bucket(&admin, &cluster.id, "images", settings).unwrap();
        (service, admin, bucket.id)
    }

    #[test]
    fn test_add_file_updates_bucket_and_rollups() {
        let dir = TempDir::new().unwrap();
        let (service, admin, bucket_id) = setup(&dir, BucketSettings::default());

        let file = service.add_file(&admin, &bucket_id, None, FileUpload::new("cat.png", 2048)).unwrap();
        assert_eq!(file.mime_type, "image/png");

        let bucket = service.get_bucket(&admin, &bucket_id).unwrap();
        assert_eq!(bucket.files.len(), 1);
        assert_eq!(bucket.files[0].size, Some(2048));
        assert_eq!(bucket.statistics.total_files, 1);
        assert_eq!(bucket.statistics.file_types["image"], 1);

        let database = service.get_database(&admin, &file.database_id).unwrap();
        assert_eq!(database.statistics.files, 1);
        assert_eq!(database.statistics.total_size, 2048);
    }

    #[test]
    fn test_file_in_folder() {
        let dir = TempDir::new().unwrap();
        let (service, admin, bucket_id) = setup(&dir, BucketSettings::default());
        let folder = service.create_folder(&admin, &bucket_id, "raw").unwrap();

        let file = service
            .add_file(&admin, &bucket_id, Some(&folder.id), FileUpload::new("a.txt", 10))
            .unwrap();
        // same name is fine at the bucket root
        service.add_file(&admin, &bucket_id, None, FileUpload::new("a.txt", 10)).unwrap();
        let dup = service.add_file(&admin, &bucket_id, Some(&folder.id), FileUpload::new("a.txt", 1));
        assert!(matches!(dup, Err(HexaError::Conflict(_))));

        assert_eq!(service.list_files(&admin, &bucket_id, Some(&folder.id)).unwrap().len(), 1);
        assert_eq!(service.list_files(&admin, &bucket_id, None).unwrap().len(), 1);

        let refused = service.delete_folder(&admin, &folder.id);
        assert!(matches!(refused, Err(HexaError::Conflict(_))));

        service.delete_file(&admin, &file.id).unwrap();
        let folder = service.get_folder(&admin, &folder.id).unwrap();
        assert!(folder.files.is_empty());
        assert_eq!(folder.statistics.size, 0);
        assert!(matches!(service.get_file(&admin, &file.id), Err(HexaError::NotFound(_))));
    }

    #[test]
    fn test_upload_limits_enforced() {
        let dir = TempDir::new().unwrap();
        let settings = BucketSettings {
            max_file_size: 100,
            allowed_types: vec!["text/plain".to_string()],
            extra: Default::default(),
        };
        let (service, admin, bucket_id) = setup(&dir, settings);

        let big = service.add_file(&admin, &bucket_id, None, FileUpload::new("a.txt", 101));
        let wrong = service.add_file(&admin, &bucket_id, None, FileUpload::new("a.png", 1));
        assert!(matches!(big, Err(HexaError::Validation(_))));
        assert!(matches!(wrong, Err(HexaError::Validation(_))));
        assert!(service.get_bucket(&admin, &bucket_id).unwrap().files.is_empty());
    }
}
