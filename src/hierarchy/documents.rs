//! Documents live inside their collection's container, next to the
//! `metadata` record. A document write and the collection counters change in
//! one `mutate`, so they are committed by a single atomic file replace.
//! Cluster and database rollups follow.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::auth::{Action, Actor, ResourceKind};
use crate::cipher::{generate_id, id};
use crate::container::{naming, FilterSet, Records};
use crate::errors::{HexaError, HexaResult};

use super::model::{adjust, Collection, RollupDelta, SystemFields};
use super::service::{from_record, to_record, HierarchyService};

/// Fields the caller may not overwrite
const PROTECTED_FIELDS: [&str; 2] = ["_id", "_system"];

impl HierarchyService {
    pub fn insert_document(&self, actor: &Actor, collection_id: &str, data: Value) -> HexaResult<Value> {
        self.insert_documents(actor, collection_id, vec![data])?
            .pop()
            .ok_or_else(|| HexaError::internal("document batch came back empty"))
    }

    /// Insert a batch with a single container write
    pub fn insert_documents(&self, actor: &Actor, collection_id: &str, batch: Vec<Value>) -> HexaResult<Vec<Value>> {
        let collection = self.load_collection(collection_id)?;
        self.require_in(actor, &collection.database_id, ResourceKind::Collection, Action::Write)?;
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let documents = batch
            .into_iter()
            .map(|data| new_document(data, &actor.user_id, now))
            .collect::<HexaResult<Vec<_>>>()?;
        let count = documents.len() as u64;
        let bytes: u64 = documents.iter().map(document_size).sum();

        self.mutate_collection(collection_id, |records, meta| {
            for document in &documents {
                if let Some(key) = document.get("_id").and_then(Value::as_str) {
                    records.insert(key.to_string(), document.clone());
                }
            }
            meta.document_count += count;
            meta.statistics.size = meta.statistics.size.saturating_add(bytes);
            touch(meta, now);
            Ok(())
        })?;

        let delta = RollupDelta {
            documents: count as i64,
            total_size: bytes as i64,
            ..Default::default()
        };
        self.roll_up_cluster(&collection.cluster_id, &delta)?;
        self.roll_up_database(&collection.database_id, &delta)?;

        info!(collection_id, count, "documents inserted");
        Ok(documents)
    }

    pub fn get_document(&self, actor: &Actor, collection_id: &str, document_id: &str) -> HexaResult<Option<Value>> {
        let collection = self.load_collection(collection_id)?;
        self.require_in(actor, &collection.database_id, ResourceKind::Collection, Action::Read)?;

        if document_id == naming::METADATA_KEY {
            return Ok(None);
        }
        self.node(&naming::collection(collection_id))?
            .find_by_id(document_id)
    }

    /// Documents matching every filter, oldest id first
    pub fn find_documents(&self, actor: &Actor, collection_id: &str, filters: &FilterSet) -> HexaResult<Vec<Value>> {
        let collection = self.load_collection(collection_id)?;
        self.require_in(actor, &collection.database_id, ResourceKind::Collection, Action::Read)?;

        Ok(self
            .node(&naming::collection(collection_id))?
            .find_entries(filters)?
            .into_iter()
            .filter(|(key, _)| key != naming::METADATA_KEY)
            .map(|(_, document)| document)
            .collect())
    }

    pub fn count_documents(&self, actor: &Actor, collection_id: &str, filters: &FilterSet) -> HexaResult<usize> {
        Ok(self.find_documents(actor, collection_id, filters)?.len())
    }

    /// Merge `patch` into a document, bumping `_system.version`
    pub fn update_document(
        &self,
        actor: &Actor,
        collection_id: &str,
        document_id: &str,
        patch: Value,
    ) -> HexaResult<Value> {
        let Value::Object(patch) = patch else {
            return Err(HexaError::validation("document update must be a JSON object"));
        };
        let collection = self.load_collection(collection_id)?;
        self.require_in(actor, &collection.database_id, ResourceKind::Collection, Action::Write)?;

        let now = Utc::now();
        let (document, size_delta) = self.mutate_collection(collection_id, |records, meta| {
            let current = document_in(records, document_id)?;
            let old_size = document_size(current);

            let mut updated = current.clone();
            let Some(fields) = updated.as_object_mut() else {
                return Err(HexaError::integrity(&meta.id, format!("document {} is not an object", document_id)));
            };
            for (field, value) in patch {
                if !PROTECTED_FIELDS.contains(&field.as_str()) {
                    fields.insert(field, value);
                }
            }

            let mut system: SystemFields = from_record(fields.get("_system"), document_id)?;
            system.updated_at = now;
            system.updated_by = Some(actor.user_id.clone());
            system.version += 1;
            fields.insert("_system".to_string(), to_record(&system)?);

            let size_delta = document_size(&updated) as i64 - old_size as i64;
            records.insert(document_id.to_string(), updated.clone());
            adjust(&mut meta.statistics.size, size_delta);
            touch(meta, now);
            Ok((updated, size_delta))
        })?;

        let delta = RollupDelta {
            total_size: size_delta,
            ..Default::default()
        };
        self.roll_up_cluster(&collection.cluster_id, &delta)?;
        self.roll_up_database(&collection.database_id, &delta)?;

        debug!(collection_id, document_id, "document updated");
        Ok(document)
    }

    pub fn delete_document(&self, actor: &Actor, collection_id: &str, document_id: &str) -> HexaResult<()> {
        let collection = self.load_collection(collection_id)?;
        self.require_in(actor, &collection.database_id, ResourceKind::Collection, Action::Write)?;

        let now = Utc::now();
        let bytes = self.mutate_collection(collection_id, |records, meta| {
            let bytes = document_size(document_in(records, document_id)?);
            records.remove(document_id);
            meta.document_count = meta.document_count.saturating_sub(1);
            meta.statistics.size = meta.statistics.size.saturating_sub(bytes);
            touch(meta, now);
            Ok(bytes)
        })?;

        let delta = RollupDelta {
            documents: -1,
            total_size: -(bytes as i64),
            ..Default::default()
        };
        self.roll_up_cluster(&collection.cluster_id, &delta)?;
        self.roll_up_database(&collection.database_id, &delta)?;

        debug!(collection_id, document_id, "document deleted");
        Ok(())
    }

    /// One write covering documents and the collection descriptor
    fn mutate_collection<R>(
        &self,
        collection_id: &str,
        f: impl FnOnce(&mut Records, &mut Collection) -> HexaResult<R>,
    ) -> HexaResult<R> {
        let container = naming::collection(collection_id);
        self.node(&container)?.mutate(|records| {
            let mut meta: Collection = from_record(records.get(naming::METADATA_KEY), &container)?;
            let result = f(records, &mut meta)?;
            records.insert(naming::METADATA_KEY.to_string(), to_record(&meta)?);
            Ok(result)
        })
    }
}

fn new_document(data: Value, user_id: &str, now: DateTime<Utc>) -> HexaResult<Value> {
    let Value::Object(mut fields) = data else {
        return Err(HexaError::validation("document must be a JSON object"));
    };

    let system = SystemFields {
        created_at: now,
        updated_at: now,
        created_by: user_id.to_string(),
        updated_by: None,
        version: 1,
    };
    fields.insert("_id".to_string(), Value::String(generate_id(id::DOCUMENT)));
    fields.insert("_system".to_string(), to_record(&system)?);
    Ok(Value::Object(fields))
}

fn document_in<'a>(records: &'a Map<String, Value>, document_id: &str) -> HexaResult<&'a Value> {
    if document_id == naming::METADATA_KEY {
        return Err(HexaError::not_found(format!("document {}", document_id)));
    }
    records
        .get(document_id)
        .ok_or_else(|| HexaError::not_found(format!("document {}", document_id)))
}

/// Serialized size, the unit of `statistics.size` and `totalSize`
pub(super) fn document_size(document: &Value) -> u64 {
    serde_json::to_vec(document).map(|b| b.len() as u64).unwrap_or(0)
}

fn touch(meta: &mut Collection, now: DateTime<Utc>) {
    meta.statistics.last_updated = Some(now);
    meta.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthorizationGuard, Role};
    use crate::cipher::KeyManager;
    use crate::container::{FilterExpr, Storage};
    use crate::hierarchy::ClusterType;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (HierarchyService, Actor, String, String, String) {
        let keys = Arc::new(KeyManager::generate().unwrap());
        let storage = Storage::open(dir.path(), keys).unwrap();
        let service = HierarchyService::new(storage, AuthorizationGuard::new());
        let owner = Actor::new("user_owner", Role::User);

        let db = service.create_database(&Actor::new("user_owner", Role::Admin), "main").unwrap();
        let cluster = service.create_cluster(&owner, &db.id, "core", ClusterType::JsonOnly).unwrap();
        let collection = service.create_collection(&owner, &cluster.id, "people", None).unwrap();
        (service, owner, db.id, cluster.id, collection.id)
    }

    #[test]
    fn test_insert_sets_system_fields_and_counters() {
        let dir = TempDir::new().unwrap();
        let (service, owner, db_id, cluster_id, coll_id) = setup(&dir);

        let doc = service.insert_document(&owner, &coll_id, json!({ "name": "Ada" })).unwrap();
        assert!(doc["_id"].as_str().unwrap().starts_with("doc_"));
        assert_eq!(doc["_system"]["version"], 1);
        assert_eq!(doc["_system"]["createdBy"], "user_owner");

        let collection = service.get_collection(&owner, &coll_id).unwrap();
        assert_eq!(collection.document_count, 1);
        assert_eq!(collection.statistics.size, document_size(&doc));

        let cluster = service.get_cluster(&owner, &cluster_id).unwrap();
        let database = service.get_database(&owner, &db_id).unwrap();
        assert_eq!(cluster.statistics.documents, 1);
        assert_eq!(database.statistics.documents, 1);
        assert_eq!(database.statistics.total_size, document_size(&doc));
    }

    #[test]
    fn test_update_bumps_version_and_protects_ids() {
        let dir = TempDir::new().unwrap();
        let (service, owner, _, _, coll_id) = setup(&dir);
        let doc = service.insert_document(&owner, &coll_id, json!({ "n": 1 })).unwrap();
        let id = doc["_id"].as_str().unwrap();

        let updated = service
            .update_document(&owner, &coll_id, id, json!({ "n": 2, "_id": "hijack" }))
            .unwrap();

        assert_eq!(updated["n"], 2);
        assert_eq!(updated["_id"], id);
        assert_eq!(updated["_system"]["version"], 2);
        assert_eq!(updated["_system"]["updatedBy"], "user_owner");
    }

    #[test]
    fn test_find_count_and_delete() {
        let dir = TempDir::new().unwrap();
        let (service, owner, db_id, _, coll_id) = setup(&dir);
        service
            .insert_documents(&owner, &coll_id, vec![json!({ "age": 30 }), json!({ "age": 40 })])
            .unwrap();

        let all = FilterSet::new();
        let older = FilterSet::new().and(FilterExpr::gt("age", 35));
        assert_eq!(service.count_documents(&owner, &coll_id, &all).unwrap(), 2);
        let found = service.find_documents(&owner, &coll_id, &older).unwrap();
        assert_eq!(found.len(), 1);

        let id = found[0]["_id"].as_str().unwrap();
        service.delete_document(&owner, &coll_id, id).unwrap();
        assert!(service.get_document(&owner, &coll_id, id).unwrap().is_none());
        assert_eq!(service.get_database(&owner, &db_id).unwrap().statistics.documents, 1);

        let again = service.delete_document(&owner, &coll_id, id);
        assert!(matches!(again, Err(HexaError::NotFound(_))));
    }

    #[test]
    fn test_metadata_is_not_a_document() {
        let dir = TempDir::new().unwrap();
        let (service, owner, _, _, coll_id) = setup(&dir);

        assert!(service.get_document(&owner, &coll_id, "metadata").unwrap().is_none());
        assert!(service.delete_document(&owner, &coll_id, "metadata").is_err());
        assert!(service.find_documents(&owner, &coll_id, &FilterSet::new()).unwrap().is_empty());
    }

    #[test]
    fn test_viewer_cannot_write() {
        let dir = TempDir::new().unwrap();
        let (service, _, _, _, coll_id) = setup(&dir);
        let viewer = Actor::new("user_viewer", Role::Viewer);

        let denied = service.insert_document(&viewer, &coll_id, json!({}));
        assert!(matches!(denied, Err(HexaError::PermissionDenied(_))));
        assert!(service.find_documents(&viewer, &coll_id, &FilterSet::new()).is_ok());
    }

    #[test]
    fn test_non_object_rejected() {
        let dir = TempDir::new().unwrap();
        let (service, owner, _, _, coll_id) = setup(&dir);

        let result = service.insert_document(&owner, &coll_id, json!([1, 2]));
        assert!(matches!(result, Err(HexaError::Validation(_))));
    }
}
