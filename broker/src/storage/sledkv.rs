use std::path::Path;

use sled::Tree;

use super::{check_media_type, sniff_media, File, StorageBackend, StorageError};

/// Durable single-file backend on an embedded `sled` database, with
/// separate trees for blobs, media types and name aliases.
pub struct SledStorage {
    blobs: Tree,
    media: Tree,
    names: Tree,
}

impl SledStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self {
            blobs: db.open_tree("blobs")?,
            media: db.open_tree("media")?,
            names: db.open_tree("names")?,
        })
    }

    fn file(&self, r#ref: &str, blob: Vec<u8>) -> File {
        let media = self
            .media
            .get(r#ref)
            .ok()
            .flatten()
            .and_then(|m| String::from_utf8(m.to_vec()).ok())
            .unwrap_or_else(|| sniff_media(&blob).to_string());
        File::new(media, blob)
    }
}

impl StorageBackend for SledStorage {
    fn insert(&self, name: &str, media: &str, blob: Vec<u8>) -> Result<File, StorageError> {
        let media = check_media_type(media)?;
        let file = File::new(media.clone(), blob);
        self.blobs.insert(file.r#ref(), file.bytes.clone())?;
        self.media.insert(file.r#ref(), media.as_bytes())?;
        if !name.is_empty() {
            self.names.insert(name, file.r#ref().as_bytes())?;
        }
        Ok(file)
    }

    fn get(&self, name_or_ref: &str) -> Option<File> {
        if let Ok(Some(blob)) = self.blobs.get(name_or_ref) {
            return Some(self.file(name_or_ref, blob.to_vec()));
        }
        let r#ref = self.names.get(name_or_ref).ok().flatten()?;
        let r#ref = String::from_utf8(r#ref.to_vec()).ok()?;
        let blob = self.blobs.get(&r#ref).ok().flatten()?;
        Some(self.file(&r#ref, blob.to_vec()))
    }

    fn all(&self) -> Box<dyn Iterator<Item = (String, File)> + '_> {
        Box::new(self.blobs.iter().filter_map(|entry| {
            let (key, blob) = entry.ok()?;
            let r#ref = String::from_utf8(key.to_vec()).ok()?;
            Some((r#ref.clone(), self.file(&r#ref, blob.to_vec())))
        }))
    }
}
