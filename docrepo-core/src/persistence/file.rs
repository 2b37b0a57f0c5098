//! Flat, id-addressed disk mirror: content bytes under `<root>/<id>.bin`,
//! metadata as a JSON sidecar `<root>/<id>.metadata.json`.

use super::{ObjectRecord, PersistenceManager};
use crate::error::Result;
use crate::storage::object::StoredObject;
use bytes::Bytes;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct FilePersistence {
    root: PathBuf,
}

impl FilePersistence {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn content_path(&self, location: &str) -> PathBuf {
        self.root.join(format!("{}.bin", location))
    }

    fn metadata_path(&self, location: &str) -> PathBuf {
        self.root.join(format!("{}.metadata.json", location))
    }
}

impl PersistenceManager for FilePersistence {
    fn calculate_location(&self, so: &StoredObject) -> Option<String> {
        if so.id.is_empty() {
            None
        } else {
            Some(so.id.clone())
        }
    }

    fn generate_id(&self) -> Option<String> {
        None
    }

    fn read_content(&self, location: &str) -> Result<Option<Bytes>> {
        let path = self.content_path(location);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Bytes::from(std::fs::read(path)?)))
    }

    fn write_content(&self, location: &str, data: &[u8]) -> Result<()> {
        std::fs::write(self.content_path(location), data)?;
        Ok(())
    }

    fn append_content(&self, location: &str, data: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.content_path(location))?;
        file.write_all(data)?;
        Ok(())
    }

    fn read_metadata(&self, location: &str) -> Result<Option<ObjectRecord>> {
        let path = self.metadata_path(location);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    fn write_metadata(&self, location: &str, record: &ObjectRecord) -> Result<()> {
        let data = serde_json::to_string_pretty(record)?;
        std::fs::write(self.metadata_path(location), data)?;
        Ok(())
    }

    fn delete_from_disk(&self, so: &StoredObject) -> Result<()> {
        for path in [self.content_path(&so.id), self.metadata_path(&so.id)] {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn move_object(&self, _so: &StoredObject, _new_parent_location: &str) -> Result<()> {
        // content and metadata are addressed by id, nothing to relocate
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::Acl;
    use crate::storage::object::{ObjectKind, StoredObject, TYPE_DOCUMENT};

    fn sample_object() -> StoredObject {
        let mut so = StoredObject::new(
            "report.txt",
            TYPE_DOCUMENT,
            ObjectKind::Document {
                parent_ids: vec!["100".to_string()],
                content: None,
            },
            "alice",
            "repo",
        );
        so.id = "101".to_string();
        so
    }

    #[test]
    fn content_roundtrip_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let fp = FilePersistence::new(dir.path()).unwrap();
        fp.write_content("101", b"hello").unwrap();
        fp.append_content("101", b" world").unwrap();
        let read = fp.read_content("101").unwrap().unwrap();
        assert_eq!(read.as_ref(), b"hello world");
    }

    #[test]
    fn metadata_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let fp = FilePersistence::new(dir.path()).unwrap();
        let so = sample_object();
        let record = ObjectRecord::from_object(&so, Acl::default_acl());
        fp.write_metadata("101", &record).unwrap();
        let read = fp.read_metadata("101").unwrap().unwrap();
        assert_eq!(read.id, "101");
        assert_eq!(read.name, "report.txt");
        assert_eq!(read.parent_ids, vec!["100".to_string()]);
    }

    #[test]
    fn delete_removes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let fp = FilePersistence::new(dir.path()).unwrap();
        let so = sample_object();
        fp.write_content("101", b"data").unwrap();
        let record = ObjectRecord::from_object(&so, Acl::default_acl());
        fp.write_metadata("101", &record).unwrap();
        fp.delete_from_disk(&so).unwrap();
        assert!(fp.read_content("101").unwrap().is_none());
        assert!(fp.read_metadata("101").unwrap().is_none());
    }

    #[test]
    fn missing_files_read_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let fp = FilePersistence::new(dir.path()).unwrap();
        assert!(fp.read_content("nope").unwrap().is_none());
        assert!(fp.read_metadata("nope").unwrap().is_none());
    }
}
