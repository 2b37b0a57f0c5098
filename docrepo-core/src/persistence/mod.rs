//! Persistence collaborator consumed by the object store.
//!
//! The store calls these hooks synchronously at create/update/move/delete
//! points but must remain fully correct with the no-op in-memory
//! implementation: the authoritative state always lives in the store itself,
//! mirroring is best effort.

use crate::acl::Acl;
use crate::error::Result;
use crate::storage::object::{PropertyValue, StoredObject};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub mod file;

/// Serializable metadata view of a stored object, what a mirror backend
/// writes next to the content bytes. Content payloads travel separately.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: String,
    pub name: String,
    pub type_id: String,
    pub repository_id: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub modified_by: String,
    pub modified_at: DateTime<Utc>,
    pub change_token: u64,
    pub acl_id: u32,
    #[serde(default)]
    pub acl: Acl,
    pub secondary_type_ids: BTreeSet<String>,
    pub applied_policy_ids: Vec<String>,
    pub properties: HashMap<String, PropertyValue>,
    pub parent_ids: Vec<String>,
}

impl ObjectRecord {
    pub fn from_object(so: &StoredObject, acl: Acl) -> Self {
        Self {
            id: so.id.clone(),
            name: so.name.clone(),
            type_id: so.type_id.clone(),
            repository_id: so.repository_id.clone(),
            created_by: so.created_by.clone(),
            created_at: so.created_at,
            modified_by: so.modified_by.clone(),
            modified_at: so.modified_at,
            change_token: so.change_token,
            acl_id: so.acl_id,
            acl,
            secondary_type_ids: so.secondary_type_ids.clone(),
            applied_policy_ids: so.applied_policy_ids.clone(),
            properties: so.properties.clone(),
            parent_ids: so.parent_ids(),
        }
    }
}

/// External mirror for content bytes and object metadata.
///
/// `location` refs are opaque strings produced by `calculate_location`.
pub trait PersistenceManager: Send + Sync {
    /// Stable location ref for an object, `None` when the backend does not
    /// mirror it.
    fn calculate_location(&self, so: &StoredObject) -> Option<String>;

    /// Backend-provided object id, `None` to let the store use its own
    /// sequence.
    fn generate_id(&self) -> Option<String>;

    fn read_content(&self, location: &str) -> Result<Option<Bytes>>;

    fn write_content(&self, location: &str, data: &[u8]) -> Result<()>;

    fn append_content(&self, location: &str, data: &[u8]) -> Result<()>;

    fn read_metadata(&self, location: &str) -> Result<Option<ObjectRecord>>;

    fn write_metadata(&self, location: &str, record: &ObjectRecord) -> Result<()>;

    /// Remove every trace of the object from the backing medium.
    fn delete_from_disk(&self, so: &StoredObject) -> Result<()>;

    /// Physical relocation of a multi-filed object.
    fn move_object(&self, so: &StoredObject, new_parent_location: &str) -> Result<()>;
}

/// Memory-only backend: never mirrors anything, never fails.
#[derive(Debug, Default)]
pub struct InMemoryPersistence;

impl PersistenceManager for InMemoryPersistence {
    fn calculate_location(&self, _so: &StoredObject) -> Option<String> {
        None
    }

    fn generate_id(&self) -> Option<String> {
        None
    }

    fn read_content(&self, _location: &str) -> Result<Option<Bytes>> {
        Ok(None)
    }

    fn write_content(&self, _location: &str, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn append_content(&self, _location: &str, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn read_metadata(&self, _location: &str) -> Result<Option<ObjectRecord>> {
        Ok(None)
    }

    fn write_metadata(&self, _location: &str, _record: &ObjectRecord) -> Result<()> {
        Ok(())
    }

    fn delete_from_disk(&self, _so: &StoredObject) -> Result<()> {
        Ok(())
    }

    fn move_object(&self, _so: &StoredObject, _new_parent_location: &str) -> Result<()> {
        Ok(())
    }
}
