//! Entity kinds held by the object store and the capabilities they expose.
//!
//! Kind distinctions are a closed enum instead of downcasts: a caller cannot
//! reach a multi-filing or content operation without going through a checked
//! accessor first.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Property key holding the secondary type ids in a property patch.
pub const SECONDARY_OBJECT_TYPE_IDS: &str = "cmis:secondaryObjectTypeIds";

pub const TYPE_FOLDER: &str = "cmis:folder";
pub const TYPE_DOCUMENT: &str = "cmis:document";
pub const TYPE_ITEM: &str = "cmis:item";
pub const TYPE_POLICY: &str = "cmis:policy";
pub const TYPE_RELATIONSHIP: &str = "cmis:relationship";

pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Typed value of a custom property.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    StringList(Vec<String>),
}

/// Streamable binary payload carried by the Content capability.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContentStream {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl ContentStream {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::new("", "", data)
    }

    pub fn length(&self) -> u64 {
        self.data.len() as u64
    }

    /// Clone restricted to `[offset, offset + length)`, clamped to bounds.
    pub fn slice(&self, offset: u64, length: Option<u64>) -> ContentStream {
        let from = (offset as usize).min(self.data.len());
        let to = match length {
            Some(len) => (from + len as usize).min(self.data.len()),
            None => self.data.len(),
        };
        ContentStream {
            file_name: self.file_name.clone(),
            mime_type: self.mime_type.clone(),
            data: self.data.slice(from..to),
        }
    }

    pub fn append(&mut self, more: &[u8]) {
        let mut buf = BytesMut::with_capacity(self.data.len() + more.len());
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(more);
        self.data = buf.freeze();
    }
}

/// Requested state of the first version of a versioned document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersioningState {
    Major,
    Minor,
    CheckedOut,
}

/// Version-specific state of a `Version` entry.
#[derive(Clone, Debug)]
pub struct VersionInfo {
    /// Id of the owning versioned document shell.
    pub series_id: String,
    pub major: u32,
    pub minor: u32,
    pub is_major: bool,
    pub is_latest: bool,
    /// True while this entry is the private working copy of a checkout.
    pub is_pwc: bool,
    pub checkin_comment: Option<String>,
    pub content: Option<ContentStream>,
}

impl VersionInfo {
    pub fn label(&self) -> String {
        format!("V {}.{}", self.major, self.minor)
    }
}

/// The closed set of entity kinds.
#[derive(Clone, Debug)]
pub enum ObjectKind {
    Folder {
        /// `None` only for the root folder.
        parent_id: Option<String>,
    },
    Document {
        /// Ordered, first entry is the primary parent.
        parent_ids: Vec<String>,
        content: Option<ContentStream>,
    },
    VersionedDocument {
        parent_ids: Vec<String>,
        /// Accepted versions in chain order, last one is the latest.
        version_ids: Vec<String>,
        /// Private working copy, at most one at a time.
        pwc_id: Option<String>,
        checked_out_by: Option<String>,
    },
    Version(VersionInfo),
    Item {
        parent_ids: Vec<String>,
    },
    Policy {
        parent_ids: Vec<String>,
        policy_text: String,
    },
    Relationship {
        /// Weak references: deleting the referenced object does not cascade.
        source_id: String,
        target_id: String,
    },
}

/// Base entity record common to all kinds.
#[derive(Clone, Debug)]
pub struct StoredObject {
    pub id: String,
    pub name: String,
    pub type_id: String,
    pub repository_id: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub modified_by: String,
    pub modified_at: DateTime<Utc>,
    /// Opaque value bumped on every update, for optimistic concurrency.
    pub change_token: u64,
    /// Handle into the ACL table, 0 means "open to all".
    pub acl_id: u32,
    pub secondary_type_ids: BTreeSet<String>,
    pub applied_policy_ids: Vec<String>,
    pub properties: HashMap<String, PropertyValue>,
    pub kind: ObjectKind,
}

impl StoredObject {
    pub fn new(
        name: impl Into<String>,
        type_id: impl Into<String>,
        kind: ObjectKind,
        user: &str,
        repository_id: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.into(),
            type_id: type_id.into(),
            repository_id: repository_id.to_string(),
            created_by: user.to_string(),
            created_at: now,
            modified_by: user.to_string(),
            modified_at: now,
            change_token: 0,
            acl_id: 0,
            secondary_type_ids: BTreeSet::new(),
            applied_policy_ids: Vec::new(),
            properties: HashMap::new(),
            kind,
        }
    }

    /// Refresh modification metadata and bump the change token.
    pub fn touch(&mut self, user: &str) {
        self.modified_by = user.to_string();
        self.modified_at = Utc::now();
        self.change_token += 1;
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, ObjectKind::Folder { .. })
    }

    pub fn is_version(&self) -> bool {
        matches!(self.kind, ObjectKind::Version(_))
    }

    pub fn is_versioned_document(&self) -> bool {
        matches!(self.kind, ObjectKind::VersionedDocument { .. })
    }

    pub fn is_relationship(&self) -> bool {
        matches!(self.kind, ObjectKind::Relationship { .. })
    }

    /// Fileable: has parent folder(s) and a derivable path.
    pub fn is_fileable(&self) -> bool {
        matches!(
            self.kind,
            ObjectKind::Folder { .. }
                | ObjectKind::Document { .. }
                | ObjectKind::VersionedDocument { .. }
                | ObjectKind::Item { .. }
                | ObjectKind::Policy { .. }
        )
    }

    /// Parent folder ids, empty for non-fileable kinds and the root.
    pub fn parent_ids(&self) -> Vec<String> {
        match &self.kind {
            ObjectKind::Folder { parent_id } => parent_id.iter().cloned().collect(),
            ObjectKind::Document { parent_ids, .. }
            | ObjectKind::VersionedDocument { parent_ids, .. }
            | ObjectKind::Item { parent_ids }
            | ObjectKind::Policy { parent_ids, .. } => parent_ids.clone(),
            ObjectKind::Version(_) | ObjectKind::Relationship { .. } => Vec::new(),
        }
    }

    /// Single parent of a folder, `None` for the root.
    pub fn folder_parent_id(&self) -> Option<&str> {
        match &self.kind {
            ObjectKind::Folder { parent_id } => parent_id.as_deref(),
            _ => None,
        }
    }

    /// MultiFiling capability: the mutable ordered parent list. Folders are
    /// single-parented and return `None`.
    pub fn multi_filing_mut(&mut self) -> Option<&mut Vec<String>> {
        match &mut self.kind {
            ObjectKind::Document { parent_ids, .. }
            | ObjectKind::VersionedDocument { parent_ids, .. }
            | ObjectKind::Item { parent_ids }
            | ObjectKind::Policy { parent_ids, .. } => Some(parent_ids),
            _ => None,
        }
    }

    /// Content capability: documents and versions hold streamable bytes.
    pub fn has_content_capability(&self) -> bool {
        matches!(
            self.kind,
            ObjectKind::Document { .. } | ObjectKind::Version(_)
        )
    }

    pub fn content(&self) -> Option<&ContentStream> {
        match &self.kind {
            ObjectKind::Document { content, .. } => content.as_ref(),
            ObjectKind::Version(info) => info.content.as_ref(),
            _ => None,
        }
    }

    /// Mutable slot behind the Content capability, `None` for other kinds.
    pub fn content_slot_mut(&mut self) -> Option<&mut Option<ContentStream>> {
        match &mut self.kind {
            ObjectKind::Document { content, .. } => Some(content),
            ObjectKind::Version(info) => Some(&mut info.content),
            _ => None,
        }
    }

    pub fn version_info(&self) -> Option<&VersionInfo> {
        match &self.kind {
            ObjectKind::Version(info) => Some(info),
            _ => None,
        }
    }

    pub fn version_info_mut(&mut self) -> Option<&mut VersionInfo> {
        match &mut self.kind {
            ObjectKind::Version(info) => Some(info),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str) -> StoredObject {
        StoredObject::new(
            name,
            TYPE_ITEM,
            ObjectKind::Item {
                parent_ids: vec!["100".to_string()],
            },
            "alice",
            "repo",
        )
    }

    #[test]
    fn touch_bumps_change_token_and_modifier() {
        let mut so = item("thing");
        assert_eq!(so.change_token, 0);
        so.touch("bob");
        assert_eq!(so.change_token, 1);
        assert_eq!(so.modified_by, "bob");
        assert_eq!(so.created_by, "alice");
    }

    #[test]
    fn capability_accessors_guard_kinds() {
        let mut folder = StoredObject::new(
            "f",
            TYPE_FOLDER,
            ObjectKind::Folder { parent_id: None },
            "alice",
            "repo",
        );
        assert!(folder.is_fileable());
        assert!(folder.multi_filing_mut().is_none());
        assert!(!folder.has_content_capability());
        assert!(folder.content().is_none());

        let mut doc = StoredObject::new(
            "d",
            TYPE_DOCUMENT,
            ObjectKind::Document {
                parent_ids: vec!["100".to_string()],
                content: None,
            },
            "alice",
            "repo",
        );
        assert!(doc.has_content_capability());
        assert!(doc.multi_filing_mut().is_some());

        let rel = StoredObject::new(
            "r",
            TYPE_RELATIONSHIP,
            ObjectKind::Relationship {
                source_id: "1".to_string(),
                target_id: "2".to_string(),
            },
            "alice",
            "repo",
        );
        assert!(!rel.is_fileable());
        assert!(rel.parent_ids().is_empty());
    }

    #[test]
    fn content_slice_clamps_to_bounds() {
        let cs = ContentStream::new("a.txt", "text/plain", &b"hello world"[..]);
        assert_eq!(cs.slice(0, None).data.as_ref(), b"hello world");
        assert_eq!(cs.slice(6, Some(5)).data.as_ref(), b"world");
        assert_eq!(cs.slice(6, Some(100)).data.as_ref(), b"world");
        assert_eq!(cs.slice(100, Some(5)).data.len(), 0);
    }

    #[test]
    fn content_append_concatenates() {
        let mut cs = ContentStream::new("a.bin", FALLBACK_MIME_TYPE, &b"abc"[..]);
        cs.append(b"def");
        assert_eq!(cs.data.as_ref(), b"abcdef");
        assert_eq!(cs.length(), 6);
    }

    #[test]
    fn version_label_format() {
        let info = VersionInfo {
            series_id: "42".to_string(),
            major: 2,
            minor: 1,
            is_major: false,
            is_latest: true,
            is_pwc: false,
            checkin_comment: None,
            content: None,
        };
        assert_eq!(info.label(), "V 2.1");
    }
}
