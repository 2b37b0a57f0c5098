//! The object store is the central core of the repository: a dual index
//! (by id, by path) over all stored objects, composed with the ACL engine
//! and an id sequence.
//!
//! The index is a concurrent map allowing parallel reads. Compound
//! invariants are not enforced by the map alone: name-uniqueness
//! check-then-insert, ACL dedup-check-then-register and multi-step
//! move/rename sequences run inside a single repository-wide critical
//! section (`mutation`). Plain reads never take that lock and may observe
//! interim states during a concurrent structural mutation; that is the
//! intended consistency level, not a defect.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::acl::{Acl, AclManager, AclPropagation, Permission};
use crate::config::RepositoryConfig;
use crate::error::{Result, StoreError};
use crate::events::{Event, EventBus};
use crate::persistence::{InMemoryPersistence, ObjectRecord, PersistenceManager};

pub mod object;

use object::{
    ContentStream, ObjectKind, PropertyValue, StoredObject, VersionInfo, VersioningState,
    FALLBACK_MIME_TYPE, SECONDARY_OBJECT_TYPE_IDS, TYPE_DOCUMENT, TYPE_FOLDER, TYPE_ITEM,
    TYPE_POLICY, TYPE_RELATIONSHIP,
};

pub const PATH_SEPARATOR: &str = "/";

/// First id handed out by the store-owned sequence.
const FIRST_ID: u64 = 100;

/// Shared handle to a stored object.
pub type ObjectRef = Arc<RwLock<StoredObject>>;

/// Page of children plus the total number before paging.
pub struct ChildrenResult {
    pub items: Vec<ObjectRef>,
    pub total: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationshipDirection {
    Source,
    Target,
    Either,
}

fn join_path(parent: &str, name: &str) -> String {
    if parent == PATH_SEPARATOR {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

pub struct ObjectStore {
    config: RepositoryConfig,
    /// Id-keyed index over every live object.
    by_id: DashMap<String, ObjectRef>,
    /// Path-keyed index, values are object ids. Only single-parented
    /// fileables with a resolvable path have an entry.
    by_path: DashMap<String, String>,
    acls: AclManager,
    persistence: Arc<dyn PersistenceManager>,
    events: EventBus,
    /// Repository-wide structural-mutation lock, non-reentrant.
    mutation: Mutex<()>,
    next_id: AtomicU64,
    root: ObjectRef,
    root_id: String,
}

impl ObjectStore {
    pub fn new(config: RepositoryConfig, persistence: Arc<dyn PersistenceManager>) -> Self {
        let next_id = AtomicU64::new(FIRST_ID);
        let mut root = StoredObject::new(
            "RootFolder",
            TYPE_FOLDER,
            ObjectKind::Folder { parent_id: None },
            &config.admin_principal,
            &config.repository_id,
        );
        root.id = persistence
            .generate_id()
            .unwrap_or_else(|| next_id.fetch_add(1, Ordering::SeqCst).to_string());
        let root_id = root.id.clone();
        let root: ObjectRef = Arc::new(RwLock::new(root));

        let store = Self {
            config,
            by_id: DashMap::new(),
            by_path: DashMap::new(),
            acls: AclManager::new(),
            persistence,
            events: EventBus::new(),
            mutation: Mutex::new(()),
            next_id,
            root: Arc::clone(&root),
            root_id,
        };
        store.index_object(&root);
        store
    }

    /// Store with the no-op persistence collaborator.
    pub fn in_memory(config: RepositoryConfig) -> Self {
        Self::new(config, Arc::new(InMemoryPersistence))
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn root_folder(&self) -> ObjectRef {
        Arc::clone(&self.root)
    }

    // ------------------------------------------------------------------
    // lookups

    pub fn get_object_by_id(&self, id: &str) -> Option<ObjectRef> {
        self.by_id.get(id).map(|e| Arc::clone(e.value()))
    }

    pub fn get_object_by_path(&self, path: &str, _principal: &str) -> Option<ObjectRef> {
        if path == PATH_SEPARATOR {
            return Some(self.root_folder());
        }
        let id = self.by_path.get(path)?.value().clone();
        self.get_object_by_id(&id)
    }

    pub fn get_ids(&self) -> Vec<String> {
        self.by_id.iter().map(|e| e.key().clone()).collect()
    }

    pub fn get_object_count(&self) -> usize {
        self.by_id.len()
    }

    fn require(&self, id: &str) -> Result<ObjectRef> {
        self.get_object_by_id(id)
            .ok_or_else(|| StoreError::ObjectNotFound(id.to_string()))
    }

    // ------------------------------------------------------------------
    // create operations

    /// Creating a folder that already exists under `parent_id` is
    /// idempotent: the existing child is returned instead of an error, an
    /// accommodation for duplicate client retries.
    #[allow(clippy::too_many_arguments)]
    pub fn create_folder(
        &self,
        name: &str,
        properties: HashMap<String, PropertyValue>,
        principal: &str,
        parent_id: Option<&str>,
        policies: Vec<String>,
        add_aces: Option<&Acl>,
        remove_aces: Option<&Acl>,
    ) -> Result<ObjectRef> {
        let parent_id = parent_id.ok_or_else(|| {
            StoreError::InvalidArgument("cannot create a second root folder".to_string())
        })?;
        let parent = self.require(parent_id)?;
        if !parent.read().is_folder() {
            return Err(StoreError::InvalidArgument(format!(
                "parent {} is not a folder",
                parent_id
            )));
        }
        let _guard = self.mutation.lock();

        if let Some(existing) = self.child_by_name(parent_id, name) {
            return Ok(existing);
        }

        let parent_acl = parent.read().acl_id;
        let mut folder = StoredObject::new(
            name,
            TYPE_FOLDER,
            ObjectKind::Folder {
                parent_id: Some(parent_id.to_string()),
            },
            principal,
            &self.config.repository_id,
        );
        folder.properties = properties;
        folder.applied_policy_ids = policies;
        folder.acl_id = self.acls.resolve(parent_acl, add_aces, remove_aces);
        folder.id = self.allocate_id();

        let arc: ObjectRef = Arc::new(RwLock::new(folder));
        self.index_object(&arc);
        self.mirror_metadata(&arc.read());
        self.events.send(Event::Created {
            id: arc.read().id.clone(),
        });
        Ok(arc)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_document(
        &self,
        name: &str,
        properties: HashMap<String, PropertyValue>,
        principal: &str,
        parent_id: Option<&str>,
        content: Option<ContentStream>,
        policies: Vec<String>,
        add_aces: Option<&Acl>,
        remove_aces: Option<&Acl>,
    ) -> Result<ObjectRef> {
        if let Some(cs) = &content {
            self.check_content_size(cs.length())?;
        }
        let kind = ObjectKind::Document {
            parent_ids: Vec::new(),
            content: None,
        };
        let arc = self.create_filed(
            name, TYPE_DOCUMENT, kind, properties, principal, parent_id, policies, add_aces,
            remove_aces,
        )?;
        if let Some(cs) = content {
            let mut so = arc.write();
            self.store_content(&mut so, cs)?;
        }
        Ok(arc)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_item(
        &self,
        name: &str,
        properties: HashMap<String, PropertyValue>,
        principal: &str,
        parent_id: Option<&str>,
        policies: Vec<String>,
        add_aces: Option<&Acl>,
        remove_aces: Option<&Acl>,
    ) -> Result<ObjectRef> {
        let kind = ObjectKind::Item {
            parent_ids: Vec::new(),
        };
        self.create_filed(
            name, TYPE_ITEM, kind, properties, principal, parent_id, policies, add_aces,
            remove_aces,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_policy(
        &self,
        name: &str,
        policy_text: &str,
        properties: HashMap<String, PropertyValue>,
        principal: &str,
        add_aces: Option<&Acl>,
        remove_aces: Option<&Acl>,
    ) -> Result<ObjectRef> {
        let _guard = self.mutation.lock();
        let mut policy = StoredObject::new(
            name,
            TYPE_POLICY,
            ObjectKind::Policy {
                parent_ids: Vec::new(),
                policy_text: policy_text.to_string(),
            },
            principal,
            &self.config.repository_id,
        );
        policy.properties = properties;
        policy.acl_id = self.acls.resolve(0, add_aces, remove_aces);
        policy.id = self.allocate_id();
        let arc: ObjectRef = Arc::new(RwLock::new(policy));
        self.index_object(&arc);
        self.mirror_metadata(&arc.read());
        self.events.send(Event::Created {
            id: arc.read().id.clone(),
        });
        Ok(arc)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_relationship(
        &self,
        name: &str,
        source_id: &str,
        target_id: &str,
        properties: HashMap<String, PropertyValue>,
        principal: &str,
        add_aces: Option<&Acl>,
        remove_aces: Option<&Acl>,
    ) -> Result<ObjectRef> {
        let _guard = self.mutation.lock();
        let mut rel = StoredObject::new(
            name,
            TYPE_RELATIONSHIP,
            ObjectKind::Relationship {
                // weak references, existence is not checked here
                source_id: source_id.to_string(),
                target_id: target_id.to_string(),
            },
            principal,
            &self.config.repository_id,
        );
        rel.properties = properties;
        rel.acl_id = self.acls.resolve(0, add_aces, remove_aces);
        rel.id = self.allocate_id();
        let arc: ObjectRef = Arc::new(RwLock::new(rel));
        self.index_object(&arc);
        self.mirror_metadata(&arc.read());
        self.events.send(Event::Created {
            id: arc.read().id.clone(),
        });
        Ok(arc)
    }

    /// Creates the versioned-document shell together with its first version
    /// (or private working copy, when `versioning_state` is `CheckedOut`)
    /// and returns the version entry.
    #[allow(clippy::too_many_arguments)]
    pub fn create_versioned_document(
        &self,
        name: &str,
        properties: HashMap<String, PropertyValue>,
        principal: &str,
        parent_id: Option<&str>,
        policies: Vec<String>,
        add_aces: Option<&Acl>,
        remove_aces: Option<&Acl>,
        content: Option<ContentStream>,
        versioning_state: VersioningState,
    ) -> Result<ObjectRef> {
        let _guard = self.mutation.lock();
        if let Some(pid) = parent_id {
            let parent = self.require(pid)?;
            if !parent.read().is_folder() {
                return Err(StoreError::InvalidArgument(format!(
                    "parent {} is not a folder",
                    pid
                )));
            }
            if self.has_child(pid, name) {
                return Err(StoreError::NameConstraintViolation(format!(
                    "an object named {} already exists in {}",
                    name,
                    self.folder_path(pid).unwrap_or_default()
                )));
            }
        }

        let acl_id = match parent_id {
            Some(pid) => {
                let parent_acl = self.require(pid)?.read().acl_id;
                self.acls.resolve(parent_acl, add_aces, remove_aces)
            }
            None => self.acls.compose(add_aces, remove_aces),
        };

        let mut shell = StoredObject::new(
            name,
            TYPE_DOCUMENT,
            ObjectKind::VersionedDocument {
                parent_ids: parent_id.iter().map(|p| p.to_string()).collect(),
                version_ids: Vec::new(),
                pwc_id: None,
                checked_out_by: None,
            },
            principal,
            &self.config.repository_id,
        );
        shell.properties = properties.clone();
        shell.applied_policy_ids = policies;
        shell.acl_id = acl_id;
        shell.id = self.allocate_id();
        let shell_id = shell.id.clone();

        let checked_out = versioning_state == VersioningState::CheckedOut;
        let (major, minor, is_major) = match versioning_state {
            VersioningState::Major => (1, 0, true),
            VersioningState::Minor => (0, 1, false),
            VersioningState::CheckedOut => (0, 0, false),
        };
        let mut version = StoredObject::new(
            name,
            TYPE_DOCUMENT,
            ObjectKind::Version(VersionInfo {
                series_id: shell_id.clone(),
                major,
                minor,
                is_major,
                is_latest: !checked_out,
                is_pwc: checked_out,
                checkin_comment: None,
                content: None,
            }),
            principal,
            &self.config.repository_id,
        );
        version.properties = properties;
        version.acl_id = acl_id;
        version.id = self.allocate_id();
        let version_id = version.id.clone();
        if let Some(cs) = content {
            self.store_content(&mut version, cs)?;
        }

        match &mut shell.kind {
            ObjectKind::VersionedDocument {
                version_ids,
                pwc_id,
                checked_out_by,
                ..
            } => {
                if checked_out {
                    *pwc_id = Some(version_id.clone());
                    *checked_out_by = Some(principal.to_string());
                } else {
                    version_ids.push(version_id.clone());
                }
            }
            _ => unreachable!(),
        }

        let shell_arc: ObjectRef = Arc::new(RwLock::new(shell));
        self.index_object(&shell_arc);
        let version_arc: ObjectRef = Arc::new(RwLock::new(version));
        self.by_id.insert(version_id, Arc::clone(&version_arc));
        self.mirror_metadata(&shell_arc.read());
        self.events.send(Event::Created { id: shell_id });
        Ok(version_arc)
    }

    /// Shared path for single-kind filed creates (documents and items):
    /// name-uniqueness check, ACL resolution against the parent, id
    /// assignment and indexing, all inside the critical section.
    #[allow(clippy::too_many_arguments)]
    fn create_filed(
        &self,
        name: &str,
        type_id: &str,
        mut kind: ObjectKind,
        properties: HashMap<String, PropertyValue>,
        principal: &str,
        parent_id: Option<&str>,
        policies: Vec<String>,
        add_aces: Option<&Acl>,
        remove_aces: Option<&Acl>,
    ) -> Result<ObjectRef> {
        let _guard = self.mutation.lock();
        let acl_id = match parent_id {
            Some(pid) => {
                let parent = self.require(pid)?;
                if !parent.read().is_folder() {
                    return Err(StoreError::InvalidArgument(format!(
                        "parent {} is not a folder",
                        pid
                    )));
                }
                if self.has_child(pid, name) {
                    return Err(StoreError::NameConstraintViolation(format!(
                        "an object named {} already exists in {}",
                        name,
                        self.folder_path(pid).unwrap_or_default()
                    )));
                }
                let parent_acl = parent.read().acl_id;
                self.acls.resolve(parent_acl, add_aces, remove_aces)
            }
            None => self.acls.compose(add_aces, remove_aces),
        };

        if let Some(pid) = parent_id {
            match &mut kind {
                ObjectKind::Document { parent_ids, .. } | ObjectKind::Item { parent_ids } => {
                    parent_ids.push(pid.to_string());
                }
                _ => {}
            }
        }

        let mut so = StoredObject::new(name, type_id, kind, principal, &self.config.repository_id);
        so.properties = properties;
        so.applied_policy_ids = policies;
        so.acl_id = acl_id;
        so.id = self.allocate_id();

        let arc: ObjectRef = Arc::new(RwLock::new(so));
        self.index_object(&arc);
        self.mirror_metadata(&arc.read());
        self.events.send(Event::Created {
            id: arc.read().id.clone(),
        });
        Ok(arc)
    }

    // ------------------------------------------------------------------
    // children

    pub fn get_children(
        &self,
        folder_id: &str,
        max_items: Option<usize>,
        skip_count: usize,
        principal: &str,
        use_pwc: bool,
    ) -> Result<ChildrenResult> {
        let folder = self.require(folder_id)?;
        if !folder.read().is_folder() {
            return Err(StoreError::InvalidArgument(format!(
                "object {} is not a folder",
                folder_id
            )));
        }
        let mut children = self.children_of(folder_id, Some(principal), use_pwc);
        Self::sort_by_name(&mut children);
        Ok(Self::page(children, max_items, skip_count))
    }

    pub fn get_folder_children(
        &self,
        folder_id: &str,
        max_items: Option<usize>,
        skip_count: usize,
        principal: &str,
    ) -> Result<ChildrenResult> {
        self.require(folder_id)?;
        let mut folders: Vec<ObjectRef> = self
            .children_of(folder_id, Some(principal), false)
            .into_iter()
            .filter(|arc| arc.read().is_folder())
            .collect();
        Self::sort_by_name(&mut folders);
        Ok(Self::page(folders, max_items, skip_count))
    }

    /// All fileable objects whose parent set contains `folder_id`, with
    /// versioned documents substituted by their PWC or latest version.
    /// Results are de-duplicated by object id; callers sort and page.
    fn children_of(
        &self,
        folder_id: &str,
        principal: Option<&str>,
        use_pwc: bool,
    ) -> Vec<ObjectRef> {
        let mut out: Vec<ObjectRef> = Vec::new();
        let mut substitutes: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for entry in self.by_id.iter() {
            let so = entry.value().read();
            if !so.is_fileable() {
                continue;
            }
            if !so.parent_ids().iter().any(|p| p == folder_id) {
                continue;
            }
            if let Some(user) = principal {
                if !self.has_access(user, &so, Permission::Read) {
                    continue;
                }
            }
            if !seen.insert(so.id.clone()) {
                continue;
            }
            match &so.kind {
                ObjectKind::VersionedDocument {
                    version_ids,
                    pwc_id,
                    ..
                } => {
                    let chosen = if use_pwc {
                        pwc_id.clone().or_else(|| version_ids.last().cloned())
                    } else {
                        version_ids.last().cloned()
                    };
                    if let Some(vid) = chosen {
                        substitutes.push(vid);
                    }
                }
                _ => out.push(Arc::clone(entry.value())),
            }
        }

        for vid in substitutes {
            if let Some(arc) = self.by_id.get(&vid) {
                out.push(Arc::clone(arc.value()));
            }
        }
        out
    }

    fn sort_by_name(items: &mut [ObjectRef]) {
        items.sort_by(|a, b| {
            let an = a.read().name.clone();
            let bn = b.read().name.clone();
            an.cmp(&bn)
        });
    }

    fn page(mut items: Vec<ObjectRef>, max_items: Option<usize>, skip_count: usize) -> ChildrenResult {
        let total = items.len();
        let from = skip_count.min(total);
        let to = match max_items {
            Some(max) => from.saturating_add(max).min(total),
            None => total,
        };
        let items = items.drain(from..to).collect();
        ChildrenResult { items, total }
    }

    fn has_child(&self, folder_id: &str, name: &str) -> bool {
        self.child_by_name(folder_id, name).is_some()
    }

    fn child_by_name(&self, folder_id: &str, name: &str) -> Option<ObjectRef> {
        self.children_of(folder_id, None, false)
            .into_iter()
            .find(|arc| arc.read().name == name)
    }

    // ------------------------------------------------------------------
    // move / rename / filing

    pub fn move_object(
        &self,
        id: &str,
        old_parent_id: &str,
        new_parent_id: &str,
        principal: &str,
    ) -> Result<()> {
        let arc = self.require(id)?;
        let new_parent = self.require(new_parent_id)?;
        if !new_parent.read().is_folder() {
            return Err(StoreError::InvalidArgument(format!(
                "move target {} is not a folder",
                new_parent_id
            )));
        }

        let _guard = self.mutation.lock();
        let name = arc.read().name.clone();
        if self.has_child(new_parent_id, &name) {
            return Err(StoreError::NameConstraintViolation(format!(
                "cannot move {} to {}: a child with this name already exists",
                name,
                self.folder_path(new_parent_id).unwrap_or_default()
            )));
        }

        let is_folder = arc.read().is_folder();
        if is_folder {
            if id == self.root_id {
                return Err(StoreError::InvalidArgument(
                    "root folder cannot be moved".to_string(),
                ));
            }
            let mut subtree = HashSet::new();
            self.collect_subtree(id, &mut subtree);
            if subtree.contains(new_parent_id) {
                return Err(StoreError::InvalidArgument(
                    "cannot move a folder into its own subtree".to_string(),
                ));
            }
            {
                let mut so = arc.write();
                match &mut so.kind {
                    ObjectKind::Folder { parent_id } => *parent_id = Some(new_parent_id.to_string()),
                    _ => unreachable!(),
                }
                so.touch(principal);
            }
            self.reindex_subtree(id);
        } else {
            // physical relocation is the persistence collaborator's job
            let new_parent_location = self
                .persistence
                .calculate_location(&new_parent.read())
                .unwrap_or_else(|| new_parent_id.to_string());
            self.persistence
                .move_object(&arc.read(), &new_parent_location)?;

            let old_path = { self.path_of(&arc.read()) };
            {
                let mut so = arc.write();
                let parents = so.multi_filing_mut().ok_or_else(|| {
                    StoreError::InvalidArgument(format!("object {} is not fileable", id))
                })?;
                parents.push(new_parent_id.to_string());
                parents.retain(|p| p != old_parent_id);
                so.touch(principal);
            }
            if let Some(path) = old_path {
                self.by_path.remove_if(&path, |_, v| v == id);
            }
            if let Some(path) = self.path_of(&arc.read()) {
                self.by_path.insert(path, id.to_string());
            }
        }

        debug!(id, new_parent_id, "moved object");
        self.mirror_metadata(&arc.read());
        self.events.send(Event::Moved {
            id: id.to_string(),
            new_parent: new_parent_id.to_string(),
        });
        Ok(())
    }

    pub fn rename(&self, id: &str, new_name: &str, principal: &str) -> Result<()> {
        let arc = self.require(id)?;
        let _guard = self.mutation.lock();
        if id == self.root_id {
            return Err(StoreError::InvalidArgument(
                "root folder cannot be renamed".to_string(),
            ));
        }

        let (is_fileable, is_folder, parent_ids, version_entries) = {
            let so = arc.read();
            let versions = match &so.kind {
                ObjectKind::VersionedDocument {
                    version_ids,
                    pwc_id,
                    ..
                } => {
                    let mut ids = version_ids.clone();
                    ids.extend(pwc_id.clone());
                    ids
                }
                _ => Vec::new(),
            };
            (so.is_fileable(), so.is_folder(), so.parent_ids(), versions)
        };

        if is_fileable {
            for pid in &parent_ids {
                if self.has_child(pid, new_name) {
                    return Err(StoreError::NameConstraintViolation(format!(
                        "cannot rename to {}: name already exists in {}",
                        new_name,
                        self.folder_path(pid).unwrap_or_default()
                    )));
                }
            }
        }

        let old_path = { self.path_of(&arc.read()) };
        {
            let mut so = arc.write();
            so.name = new_name.to_string();
            so.touch(principal);
        }
        // version entries carry the series name
        for vid in version_entries {
            if let Some(ventry) = self.by_id.get(&vid) {
                ventry.value().write().name = new_name.to_string();
            }
        }

        if is_folder {
            self.reindex_subtree(id);
        } else if is_fileable {
            if let Some(path) = old_path {
                self.by_path.remove_if(&path, |_, v| v == id);
            }
            if let Some(path) = self.path_of(&arc.read()) {
                self.by_path.insert(path, id.to_string());
            }
        }

        debug!(id, new_name, "renamed object");
        self.mirror_metadata(&arc.read());
        self.events.send(Event::Renamed {
            id: id.to_string(),
            new_name: new_name.to_string(),
        });
        Ok(())
    }

    /// MultiFiling only: files the object under one more folder.
    pub fn add_parent(&self, id: &str, parent_id: &str) -> Result<()> {
        let arc = self.require(id)?;
        self.require(parent_id)?;
        let _guard = self.mutation.lock();
        let name = arc.read().name.clone();
        if self.has_child(parent_id, &name) {
            return Err(StoreError::InvalidArgument(format!(
                "cannot add parent: an object named {} already exists in the target folder",
                name
            )));
        }
        let old_path = { self.path_of(&arc.read()) };
        {
            let mut so = arc.write();
            let parents = so.multi_filing_mut().ok_or_else(|| {
                StoreError::InvalidArgument(format!("object {} is not multi-filing", id))
            })?;
            parents.push(parent_id.to_string());
        }
        // a second parent makes the path ambiguous
        if let Some(path) = old_path {
            self.by_path.remove_if(&path, |_, v| v == id);
        }
        if let Some(path) = self.path_of(&arc.read()) {
            self.by_path.insert(path, id.to_string());
        }
        Ok(())
    }

    pub fn remove_parent(&self, id: &str, parent_id: &str) -> Result<()> {
        let arc = self.require(id)?;
        let _guard = self.mutation.lock();
        let old_path = { self.path_of(&arc.read()) };
        {
            let mut so = arc.write();
            let parents = so.multi_filing_mut().ok_or_else(|| {
                StoreError::InvalidArgument(format!("object {} is not multi-filing", id))
            })?;
            parents.retain(|p| p != parent_id);
        }
        if let Some(path) = old_path {
            self.by_path.remove_if(&path, |_, v| v == id);
        }
        if let Some(path) = self.path_of(&arc.read()) {
            self.by_path.insert(path, id.to_string());
        }
        Ok(())
    }

    /// Parents of a fileable object that `principal` may read.
    pub fn get_parent_ids(&self, id: &str, principal: &str) -> Result<Vec<String>> {
        let arc = self.require(id)?;
        let so = arc.read();
        if !so.is_fileable() {
            return Err(StoreError::InvalidArgument(format!(
                "object {} is not fileable",
                id
            )));
        }
        let mut visible = Vec::new();
        for pid in so.parent_ids() {
            if let Some(parent) = self.get_object_by_id(&pid) {
                if self.has_access(principal, &parent.read(), Permission::Read) {
                    visible.push(pid);
                }
            }
        }
        Ok(visible)
    }

    // ------------------------------------------------------------------
    // delete

    pub fn delete_object(&self, id: &str, all_versions: bool, principal: &str) -> Result<()> {
        let arc = self.require(id)?;
        let _guard = self.mutation.lock();
        let kind_probe = {
            let so = arc.read();
            (so.is_folder(), so.is_version(), so.is_versioned_document())
        };
        match kind_probe {
            (true, _, _) => self.delete_folder(id, principal)?,
            (_, true, _) => self.delete_version(&arc, all_versions)?,
            (_, _, true) => self.delete_version_series(id)?,
            _ => {
                self.remove_object(&arc)?;
            }
        }
        self.events.send(Event::Deleted { id: id.to_string() });
        Ok(())
    }

    fn delete_folder(&self, id: &str, principal: &str) -> Result<()> {
        if id == self.root_id {
            return Err(StoreError::InvalidArgument(
                "root folder cannot be deleted".to_string(),
            ));
        }
        let arc = self.require(id)?;
        let children = self.children_of(id, Some(principal), true);
        if !children.is_empty() {
            return Err(StoreError::ConstraintViolation(format!(
                "cannot delete folder {}: folder is not empty",
                id
            )));
        }
        self.remove_object(&arc)
    }

    fn delete_version(&self, arc: &ObjectRef, all_versions: bool) -> Result<()> {
        let (version_id, series_id) = {
            let so = arc.read();
            let info = so.version_info().ok_or_else(|| {
                StoreError::ConstraintViolation(format!("object {} is not a version", so.id))
            })?;
            (so.id.clone(), info.series_id.clone())
        };
        if all_versions {
            return self.delete_version_series(&series_id);
        }

        let shell = self.require(&series_id)?;
        self.remove_object(arc)?;

        let (now_empty, promoted) = {
            let mut so = shell.write();
            match &mut so.kind {
                ObjectKind::VersionedDocument {
                    version_ids,
                    pwc_id,
                    checked_out_by,
                    ..
                } => {
                    if pwc_id.as_deref() == Some(version_id.as_str()) {
                        *pwc_id = None;
                        *checked_out_by = None;
                    } else {
                        version_ids.retain(|v| v != &version_id);
                    }
                    (version_ids.is_empty(), version_ids.last().cloned())
                }
                _ => {
                    return Err(StoreError::ConstraintViolation(format!(
                        "object {} is not a versioned document",
                        series_id
                    )))
                }
            }
        };

        if now_empty {
            // the shell goes the instant its last version goes
            self.delete_version_series(&series_id)?;
        } else if let Some(latest_id) = promoted {
            if let Some(latest) = self.by_id.get(&latest_id) {
                let mut v = latest.value().write();
                if let Some(info) = v.version_info_mut() {
                    info.is_latest = true;
                }
            }
        }
        Ok(())
    }

    /// Removes every version, the PWC and the shell of a version series.
    fn delete_version_series(&self, series_id: &str) -> Result<()> {
        let shell = self.require(series_id)?;
        let entry_ids = {
            let so = shell.read();
            match &so.kind {
                ObjectKind::VersionedDocument {
                    version_ids,
                    pwc_id,
                    ..
                } => {
                    let mut ids = version_ids.clone();
                    ids.extend(pwc_id.clone());
                    ids
                }
                _ => {
                    return Err(StoreError::ConstraintViolation(format!(
                        "object {} is not a versioned document",
                        series_id
                    )))
                }
            }
        };
        for vid in entry_ids {
            if let Some(varc) = self.get_object_by_id(&vid) {
                self.remove_object(&varc)?;
            }
        }
        self.remove_object(&shell)
    }

    /// Drops both index entries and the disk mirror of one object.
    fn remove_object(&self, arc: &ObjectRef) -> Result<()> {
        let (id, name, path) = {
            let so = arc.read();
            (so.id.clone(), so.name.clone(), self.path_of(&so))
        };
        if let Some(path) = path {
            self.by_path.remove_if(&path, |_, v| v == &id);
        }
        self.by_id.remove(&id);
        self.persistence.delete_from_disk(&arc.read())?;
        debug!(%id, %name, "deleted object");
        Ok(())
    }

    /// Removes every object except a fresh root entry. The root object and
    /// its id survive for the store's lifetime.
    pub fn clear(&self) {
        let root = self.root_folder();
        let _guard = self.mutation.lock();
        self.by_id.clear();
        self.by_path.clear();
        self.index_object(&root);
    }

    // ------------------------------------------------------------------
    // ACL operations

    pub fn get_acl(&self, handle: u32) -> Acl {
        self.acls.get(handle)
    }

    pub fn get_all_acls_for_user(&self, principal: &str, permission: Permission) -> Vec<u32> {
        self.acls.permitted_handles(principal, permission)
    }

    pub fn has_access(&self, principal: &str, so: &StoredObject, permission: Permission) -> bool {
        if principal == self.config.admin_principal {
            return true;
        }
        self.acls.grants(so.acl_id, principal, permission)
    }

    pub fn check_access(
        &self,
        principal: &str,
        so: &StoredObject,
        permission: Permission,
    ) -> Result<()> {
        if self.has_access(principal, so, permission) {
            return Ok(());
        }
        Err(StoreError::PermissionDenied(format!(
            "object {} does not grant {:?} to {}",
            so.id, permission, principal
        )))
    }

    /// Applies ACE deltas to an object. For folders with a propagating
    /// `AclPropagation`, the change recurses pre-order over a snapshot of
    /// the current children, skipping children the acting principal lacks
    /// ALL access to. Concurrent structural changes during propagation are
    /// neither retried nor rolled back.
    pub fn apply_acl(
        &self,
        id: &str,
        add_aces: Option<&Acl>,
        remove_aces: Option<&Acl>,
        propagation: AclPropagation,
        principal: &str,
    ) -> Result<Acl> {
        let arc = self.require(id)?;
        let _guard = self.mutation.lock();
        let result = if propagation == AclPropagation::ObjectOnly || !arc.read().is_folder() {
            self.apply_acl_local(&arc, add_aces, remove_aces)
        } else {
            self.apply_acl_recursive(&arc, add_aces, remove_aces, principal)
        };
        self.events.send(Event::AclChanged { id: id.to_string() });
        Ok(result)
    }

    /// Replaces an object's ACL wholesale, with the same propagation rules
    /// as `apply_acl`.
    pub fn set_acl(
        &self,
        id: &str,
        acl: &Acl,
        propagation: AclPropagation,
        principal: &str,
    ) -> Result<Acl> {
        let arc = self.require(id)?;
        let _guard = self.mutation.lock();
        let handle = self.acls.register(acl);
        let result = if propagation == AclPropagation::ObjectOnly || !arc.read().is_folder() {
            self.set_acl_handle(&arc, handle)
        } else {
            self.set_acl_recursive(&arc, handle, principal)
        };
        self.events.send(Event::AclChanged { id: id.to_string() });
        Ok(result)
    }

    fn apply_acl_local(
        &self,
        arc: &ObjectRef,
        add_aces: Option<&Acl>,
        remove_aces: Option<&Acl>,
    ) -> Acl {
        let handle = {
            let so = arc.read();
            self.acls.resolve(so.acl_id, add_aces, remove_aces)
        };
        self.set_acl_handle(arc, handle)
    }

    fn set_acl_handle(&self, arc: &ObjectRef, handle: u32) -> Acl {
        let version_entries = {
            let mut so = arc.write();
            so.acl_id = handle;
            match &so.kind {
                ObjectKind::VersionedDocument {
                    version_ids,
                    pwc_id,
                    ..
                } => {
                    let mut ids = version_ids.clone();
                    ids.extend(pwc_id.clone());
                    ids
                }
                _ => Vec::new(),
            }
        };
        // version entries mirror the series ACL
        for vid in version_entries {
            if let Some(ventry) = self.by_id.get(&vid) {
                ventry.value().write().acl_id = handle;
            }
        }
        self.acls.get(handle)
    }

    fn apply_acl_recursive(
        &self,
        folder: &ObjectRef,
        add_aces: Option<&Acl>,
        remove_aces: Option<&Acl>,
        principal: &str,
    ) -> Acl {
        // children snapshot is taken before descending; deletions that race
        // with the recursion are not re-validated
        let folder_id = folder.read().id.clone();
        let children = self.children_of(&folder_id, None, false);
        let result = self.apply_acl_local(folder, add_aces, remove_aces);

        for child in children {
            let (readable, is_folder) = {
                let so = child.read();
                (self.has_access(principal, &so, Permission::All), so.is_folder())
            };
            if !readable {
                continue;
            }
            if is_folder {
                self.apply_acl_recursive(&child, add_aces, remove_aces, principal);
            } else {
                self.apply_acl_local(&child, add_aces, remove_aces);
            }
        }
        result
    }

    fn set_acl_recursive(&self, folder: &ObjectRef, handle: u32, principal: &str) -> Acl {
        let folder_id = folder.read().id.clone();
        let children = self.children_of(&folder_id, None, false);
        let result = self.set_acl_handle(folder, handle);

        for child in children {
            let (permitted, is_folder) = {
                let so = child.read();
                (self.has_access(principal, &so, Permission::All), so.is_folder())
            };
            if !permitted {
                continue;
            }
            if is_folder {
                self.set_acl_recursive(&child, handle, principal);
            } else {
                self.set_acl_handle(&child, handle);
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // auxiliary scans

    pub fn get_checked_out_documents(&self, principal: &str) -> Vec<ObjectRef> {
        let mut pwc_ids = Vec::new();
        for entry in self.by_id.iter() {
            let so = entry.value().read();
            if let ObjectKind::VersionedDocument {
                pwc_id: Some(pwc), ..
            } = &so.kind
            {
                if self.has_access(principal, &so, Permission::Read) {
                    pwc_ids.push(pwc.clone());
                }
            }
        }
        pwc_ids
            .into_iter()
            .filter_map(|id| self.get_object_by_id(&id))
            .collect()
    }

    pub fn get_relationships(
        &self,
        object_id: &str,
        type_ids: Option<&[String]>,
        direction: RelationshipDirection,
    ) -> Vec<ObjectRef> {
        let mut out = Vec::new();
        for entry in self.by_id.iter() {
            let so = entry.value().read();
            let (source, target) = match &so.kind {
                ObjectKind::Relationship {
                    source_id,
                    target_id,
                } => (source_id.as_str(), target_id.as_str()),
                _ => continue,
            };
            if let Some(filter) = type_ids {
                if !filter.iter().any(|t| t == &so.type_id) {
                    continue;
                }
            }
            let matches = match direction {
                RelationshipDirection::Source => source == object_id,
                RelationshipDirection::Target => target == object_id,
                RelationshipDirection::Either => source == object_id || target == object_id,
            };
            if matches {
                out.push(Arc::clone(entry.value()));
            }
        }
        out
    }

    pub fn is_type_in_use(&self, type_id: &str) -> bool {
        self.by_id.iter().any(|entry| {
            let so = entry.value().read();
            so.type_id == type_id || so.secondary_type_ids.contains(type_id)
        })
    }

    // ------------------------------------------------------------------
    // update

    /// Patches custom properties: a `None` value removes the property, the
    /// secondary-type-ids key replaces the secondary type set (and is kept
    /// even when empty). System properties and the change token are
    /// refreshed, metadata is mirrored.
    pub fn update_object(
        &self,
        id: &str,
        updates: HashMap<String, Option<PropertyValue>>,
        principal: &str,
    ) -> Result<()> {
        let arc = self.require(id)?;
        {
            let mut so = arc.write();
            for (key, value) in updates {
                if key == SECONDARY_OBJECT_TYPE_IDS {
                    match value {
                        Some(PropertyValue::StringList(ids)) => {
                            so.secondary_type_ids = ids.into_iter().collect();
                        }
                        _ => so.secondary_type_ids.clear(),
                    }
                    continue;
                }
                match value {
                    Some(v) => {
                        so.properties.insert(key, v);
                    }
                    None => {
                        so.properties.remove(&key);
                    }
                }
            }
            so.touch(principal);
        }
        self.mirror_metadata(&arc.read());
        self.events.send(Event::Updated { id: id.to_string() });
        Ok(())
    }

    // ------------------------------------------------------------------
    // content

    /// Replaces the content of a Content-capable object. `None` removes
    /// existing content, including its disk mirror.
    pub fn set_content(
        &self,
        id: &str,
        content: Option<ContentStream>,
        principal: &str,
    ) -> Result<Option<ContentStream>> {
        let arc = self.require(id)?;
        let result = {
            let mut so = arc.write();
            if !so.has_content_capability() {
                return Err(StoreError::InvalidArgument(format!(
                    "object {} does not hold content",
                    id
                )));
            }
            match content {
                None => {
                    if so.content().is_some() {
                        self.persistence.delete_from_disk(&so)?;
                    }
                    if let Some(slot) = so.content_slot_mut() {
                        *slot = None;
                    }
                    so.touch(principal);
                    None
                }
                Some(cs) => {
                    let stored = self.store_content(&mut so, cs)?;
                    so.touch(principal);
                    Some(stored)
                }
            }
        };
        self.mirror_metadata(&arc.read());
        self.events.send(Event::Updated { id: id.to_string() });
        Ok(result)
    }

    pub fn append_content(&self, id: &str, data: &[u8], principal: &str) -> Result<()> {
        let arc = self.require(id)?;
        {
            let mut so = arc.write();
            if !so.has_content_capability() {
                return Err(StoreError::InvalidArgument(format!(
                    "object {} does not hold content",
                    id
                )));
            }
            let total = so.content().map(|c| c.length()).unwrap_or(0) + data.len() as u64;
            self.check_content_size(total)?;
            if let Some(location) = self.persistence.calculate_location(&so) {
                self.persistence.append_content(&location, data)?;
            }
            let name = so.name.clone();
            if let Some(slot) = so.content_slot_mut() {
                match slot {
                    Some(existing) => existing.append(data),
                    None => {
                        *slot = Some(ContentStream::new(
                            name,
                            FALLBACK_MIME_TYPE,
                            data.to_vec(),
                        ))
                    }
                }
            }
            so.touch(principal);
        }
        self.events.send(Event::Updated { id: id.to_string() });
        Ok(())
    }

    /// Content restricted to `[offset, offset + length)`. Falls back to the
    /// persistence collaborator when the in-memory copy is absent.
    pub fn get_content(
        &self,
        id: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Option<ContentStream>> {
        let arc = self.require(id)?;
        let so = arc.read();
        if !so.has_content_capability() {
            return Err(StoreError::InvalidArgument(format!(
                "object {} does not hold content",
                id
            )));
        }
        if let Some(cs) = so.content() {
            return Ok(Some(cs.slice(offset, length)));
        }
        if let Some(location) = self.persistence.calculate_location(&so) {
            if let Some(data) = self.persistence.read_content(&location)? {
                let cs = ContentStream::new(so.name.clone(), FALLBACK_MIME_TYPE, data);
                return Ok(Some(cs.slice(offset, length)));
            }
        }
        Ok(None)
    }

    /// Applies filename/mime fallbacks, enforces the size limit and writes
    /// through to the persistence collaborator. Caller holds the object's
    /// write lock.
    fn store_content(
        &self,
        so: &mut StoredObject,
        mut cs: ContentStream,
    ) -> Result<ContentStream> {
        if cs.file_name.is_empty() {
            cs.file_name = so.name.clone();
        }
        if cs.mime_type.is_empty() {
            cs.mime_type = FALLBACK_MIME_TYPE.to_string();
        }
        self.check_content_size(cs.length())?;
        if let Some(location) = self.persistence.calculate_location(so) {
            self.persistence.write_content(&location, &cs.data)?;
        }
        let stored = cs.clone();
        if let Some(slot) = so.content_slot_mut() {
            *slot = Some(cs);
        }
        Ok(stored)
    }

    fn check_content_size(&self, length: u64) -> Result<()> {
        if let Some(limit) = self.config.max_content_bytes {
            if length > limit {
                return Err(StoreError::InvalidArgument(format!(
                    "content size {} exceeds the configured limit of {} bytes",
                    length, limit
                )));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // version lifecycle

    /// `Released -> CheckedOut(principal)`. Checking out a document already
    /// held by the same principal returns the existing PWC; a different
    /// principal gets `ConstraintViolation`.
    pub fn check_out(&self, doc_id: &str, principal: &str) -> Result<ObjectRef> {
        let arc = self.require(doc_id)?;
        let _guard = self.mutation.lock();

        let (latest_content, existing_pwc) = {
            let so = arc.read();
            match &so.kind {
                ObjectKind::VersionedDocument {
                    version_ids,
                    pwc_id,
                    checked_out_by,
                    ..
                } => match checked_out_by.as_deref() {
                    Some(owner) if owner == principal => (None, pwc_id.clone()),
                    Some(owner) => {
                        return Err(StoreError::ConstraintViolation(format!(
                            "document {} is already checked out by {}",
                            doc_id, owner
                        )))
                    }
                    None => {
                        let content = version_ids
                            .last()
                            .and_then(|vid| self.get_object_by_id(vid))
                            .and_then(|v| v.read().content().cloned());
                        (content, None)
                    }
                },
                _ => {
                    return Err(StoreError::InvalidArgument(format!(
                        "object {} is not a versioned document",
                        doc_id
                    )))
                }
            }
        };

        if let Some(pwc_id) = existing_pwc {
            // same principal, idempotent
            return self.require(&pwc_id);
        }

        let (name, acl_id, properties) = {
            let so = arc.read();
            (so.name.clone(), so.acl_id, so.properties.clone())
        };
        let mut pwc = StoredObject::new(
            name,
            TYPE_DOCUMENT,
            ObjectKind::Version(VersionInfo {
                series_id: doc_id.to_string(),
                major: 0,
                minor: 0,
                is_major: false,
                is_latest: false,
                is_pwc: true,
                checkin_comment: None,
                content: latest_content,
            }),
            principal,
            &self.config.repository_id,
        );
        pwc.properties = properties;
        pwc.acl_id = acl_id;
        pwc.id = self.allocate_id();
        let pwc_id = pwc.id.clone();

        let pwc_arc: ObjectRef = Arc::new(RwLock::new(pwc));
        self.by_id.insert(pwc_id.clone(), Arc::clone(&pwc_arc));
        {
            let mut so = arc.write();
            if let ObjectKind::VersionedDocument {
                pwc_id: slot,
                checked_out_by,
                ..
            } = &mut so.kind
            {
                *slot = Some(pwc_id);
                *checked_out_by = Some(principal.to_string());
            }
            so.touch(principal);
        }
        self.events.send(Event::CheckedOut {
            id: doc_id.to_string(),
            principal: principal.to_string(),
        });
        Ok(pwc_arc)
    }

    /// `CheckedOut(principal) -> Released`: turns the PWC into the new
    /// latest version of the chain.
    #[allow(clippy::too_many_arguments)]
    pub fn check_in(
        &self,
        doc_id: &str,
        principal: &str,
        content: Option<ContentStream>,
        properties: HashMap<String, PropertyValue>,
        major: bool,
        checkin_comment: Option<String>,
    ) -> Result<ObjectRef> {
        let arc = self.require(doc_id)?;
        let _guard = self.mutation.lock();

        let (pwc_id, prior_latest) = {
            let so = arc.read();
            match &so.kind {
                ObjectKind::VersionedDocument {
                    version_ids,
                    pwc_id,
                    checked_out_by,
                    ..
                } => match (checked_out_by.as_deref(), pwc_id) {
                    (Some(owner), Some(pwc)) if owner == principal => {
                        (pwc.clone(), version_ids.last().cloned())
                    }
                    (Some(owner), _) => {
                        return Err(StoreError::ConstraintViolation(format!(
                            "document {} is checked out by {}, not {}",
                            doc_id, owner, principal
                        )))
                    }
                    _ => {
                        return Err(StoreError::ConstraintViolation(format!(
                            "document {} is not checked out",
                            doc_id
                        )))
                    }
                },
                _ => {
                    return Err(StoreError::InvalidArgument(format!(
                        "object {} is not a versioned document",
                        doc_id
                    )))
                }
            }
        };

        let (next_major, next_minor) = match &prior_latest {
            None => {
                if major {
                    (1, 0)
                } else {
                    (0, 1)
                }
            }
            Some(latest_id) => {
                let latest = self.require(latest_id)?;
                let latest = latest.read();
                let info = latest.version_info().ok_or_else(|| {
                    StoreError::ConstraintViolation(format!(
                        "version chain of {} references non-version {}",
                        doc_id, latest_id
                    ))
                })?;
                if major {
                    (info.major + 1, 0)
                } else {
                    (info.major, info.minor + 1)
                }
            }
        };

        // the previous latest stays in the chain but loses the flag
        if let Some(latest_id) = &prior_latest {
            if let Some(latest) = self.by_id.get(latest_id) {
                if let Some(info) = latest.value().write().version_info_mut() {
                    info.is_latest = false;
                }
            }
        }

        let version_arc = self.require(&pwc_id)?;
        {
            let mut v = version_arc.write();
            for (key, value) in properties {
                v.properties.insert(key, value);
            }
            if let Some(cs) = content {
                self.store_content(&mut v, cs)?;
            }
            if let Some(info) = v.version_info_mut() {
                info.major = next_major;
                info.minor = next_minor;
                info.is_major = major;
                info.is_latest = true;
                info.is_pwc = false;
                info.checkin_comment = checkin_comment;
            }
            v.touch(principal);
        }

        {
            let mut so = arc.write();
            if let ObjectKind::VersionedDocument {
                version_ids,
                pwc_id: slot,
                checked_out_by,
                ..
            } = &mut so.kind
            {
                version_ids.push(pwc_id);
                *slot = None;
                *checked_out_by = None;
            }
            so.touch(principal);
        }
        self.mirror_metadata(&arc.read());
        self.events.send(Event::CheckedIn {
            id: doc_id.to_string(),
            principal: principal.to_string(),
        });
        Ok(version_arc)
    }

    /// `CheckedOut(principal) -> Released` without touching the chain.
    pub fn cancel_checkout(&self, doc_id: &str, principal: &str) -> Result<()> {
        let arc = self.require(doc_id)?;
        let _guard = self.mutation.lock();

        let pwc_id = {
            let so = arc.read();
            match &so.kind {
                ObjectKind::VersionedDocument {
                    pwc_id,
                    checked_out_by,
                    ..
                } => match checked_out_by.as_deref() {
                    Some(owner) if owner == principal || principal == self.config.admin_principal => {
                        pwc_id.clone()
                    }
                    Some(owner) => {
                        return Err(StoreError::ConstraintViolation(format!(
                            "document {} is checked out by {}, not {}",
                            doc_id, owner, principal
                        )))
                    }
                    None => {
                        return Err(StoreError::ConstraintViolation(format!(
                            "document {} is not checked out",
                            doc_id
                        )))
                    }
                },
                _ => {
                    return Err(StoreError::InvalidArgument(format!(
                        "object {} is not a versioned document",
                        doc_id
                    )))
                }
            }
        };

        if let Some(pwc_id) = pwc_id {
            if let Some(pwc) = self.get_object_by_id(&pwc_id) {
                self.remove_object(&pwc)?;
            }
        }
        let now_empty = {
            let mut so = arc.write();
            if let ObjectKind::VersionedDocument {
                version_ids,
                pwc_id: slot,
                checked_out_by,
                ..
            } = &mut so.kind
            {
                *slot = None;
                *checked_out_by = None;
                version_ids.is_empty()
            } else {
                false
            }
        };
        if now_empty {
            // a series created checked-out has no accepted versions yet;
            // discarding its only working copy leaves nothing worth keeping,
            // and an empty shell would not defend its name against a
            // same-named create
            self.remove_object(&arc)?;
            self.events.send(Event::Deleted {
                id: doc_id.to_string(),
            });
            return Ok(());
        }
        arc.write().touch(principal);
        self.events.send(Event::Updated {
            id: doc_id.to_string(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // paths and indexing

    /// A folder's path, recomputed on demand by walking parent links up to
    /// the root. The root contributes the separator only.
    pub fn folder_path(&self, folder_id: &str) -> Option<String> {
        let mut segments: Vec<String> = Vec::new();
        let mut current = folder_id.to_string();
        loop {
            let arc = self.by_id.get(&current)?;
            let (name, parent) = {
                let so = arc.read();
                if !so.is_folder() {
                    return None;
                }
                (so.name.clone(), so.folder_parent_id().map(str::to_string))
            };
            match parent {
                None => break,
                Some(p) => {
                    segments.push(name);
                    current = p;
                }
            }
        }
        if segments.is_empty() {
            return Some(PATH_SEPARATOR.to_string());
        }
        segments.reverse();
        Some(format!("/{}", segments.join(PATH_SEPARATOR)))
    }

    /// Path of an object, `None` when no single path exists (multi-filed,
    /// unfiled, version or relationship entries).
    fn path_of(&self, so: &StoredObject) -> Option<String> {
        match &so.kind {
            ObjectKind::Folder { parent_id: None } => Some(PATH_SEPARATOR.to_string()),
            ObjectKind::Folder {
                parent_id: Some(p),
            } => Some(join_path(&self.folder_path(p)?, &so.name)),
            _ => {
                if !so.is_fileable() {
                    return None;
                }
                let parents = so.parent_ids();
                if parents.len() != 1 {
                    return None;
                }
                Some(join_path(&self.folder_path(&parents[0])?, &so.name))
            }
        }
    }

    /// The one routine every mutator goes through to register an object in
    /// both indices, so they cannot diverge.
    fn index_object(&self, arc: &ObjectRef) {
        let (id, path) = {
            let so = arc.read();
            (so.id.clone(), self.path_of(&so))
        };
        if let Some(path) = path {
            self.by_path.insert(path, id.clone());
        }
        self.by_id.insert(id, Arc::clone(arc));
    }

    /// Ids of `folder_id` and every fileable below it.
    fn collect_subtree(&self, folder_id: &str, out: &mut HashSet<String>) {
        if !out.insert(folder_id.to_string()) {
            return;
        }
        let children: Vec<(String, bool)> = self
            .by_id
            .iter()
            .filter_map(|entry| {
                let so = entry.value().read();
                if so.is_fileable() && so.parent_ids().iter().any(|p| p == folder_id) {
                    Some((so.id.clone(), so.is_folder()))
                } else {
                    None
                }
            })
            .collect();
        for (id, is_folder) in children {
            if is_folder {
                self.collect_subtree(&id, out);
            } else {
                out.insert(id);
            }
        }
    }

    /// Recomputes the path entries of a folder and everything below it
    /// after a rename or move. Stale entries are found by value, so the old
    /// paths need not be known.
    fn reindex_subtree(&self, folder_id: &str) {
        let mut ids: HashSet<String> = HashSet::new();
        self.collect_subtree(folder_id, &mut ids);

        let stale: Vec<String> = self
            .by_path
            .iter()
            .filter(|entry| ids.contains(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        for key in stale {
            self.by_path.remove(&key);
        }
        for id in ids {
            if let Some(arc) = self.get_object_by_id(&id) {
                let path = {
                    let so = arc.read();
                    self.path_of(&so)
                };
                if let Some(path) = path {
                    self.by_path.insert(path, id);
                }
            }
        }
    }

    fn allocate_id(&self) -> String {
        if let Some(id) = self.persistence.generate_id() {
            return id;
        }
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Best-effort metadata mirror; failures are logged, not raised.
    fn mirror_metadata(&self, so: &StoredObject) {
        let Some(location) = self.persistence.calculate_location(so) else {
            return;
        };
        let record = ObjectRecord::from_object(so, self.acls.get(so.acl_id));
        if let Err(err) = self.persistence.write_metadata(&location, &record) {
            warn!(%location, error = %err, "metadata mirror write failed");
        }
    }
}
