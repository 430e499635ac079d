use std::fs;
use std::path::{Path, PathBuf};

use sled::Tree;

use super::{check_media_type, sniff_media, File, StorageBackend, StorageError};

/// Directory backend: blobs live as plain files named by their ref under
/// `<basedir>/blob/`, names and media types in a sled side table.
pub struct DirectoryStorage {
    blobdir: PathBuf,
    media: Tree,
    names: Tree,
}

impl DirectoryStorage {
    pub fn open(basedir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let basedir = basedir.as_ref();
        let blobdir = basedir.join("blob");
        fs::create_dir_all(&blobdir)?;
        let db = sled::open(basedir.join("lookup.db"))?;
        Ok(Self {
            blobdir,
            media: db.open_tree("media")?,
            names: db.open_tree("names")?,
        })
    }

    fn read(&self, r#ref: &str) -> Option<File> {
        let blob = fs::read(self.blobdir.join(r#ref)).ok()?;
        let media = self
            .media
            .get(r#ref)
            .ok()
            .flatten()
            .and_then(|m| String::from_utf8(m.to_vec()).ok())
            .unwrap_or_else(|| sniff_media(&blob).to_string());
        Some(File::new(media, blob))
    }
}

impl StorageBackend for DirectoryStorage {
    fn insert(&self, name: &str, media: &str, blob: Vec<u8>) -> Result<File, StorageError> {
        let media = check_media_type(media)?;
        let file = File::new(media.clone(), blob);
        fs::write(self.blobdir.join(file.r#ref()), &file.bytes)?;
        self.media.insert(file.r#ref(), media.as_bytes())?;
        if !name.is_empty() {
            self.names.insert(name, file.r#ref().as_bytes())?;
        }
        Ok(file)
    }

    fn get(&self, name_or_ref: &str) -> Option<File> {
        if let Some(file) = self.read(name_or_ref) {
            return Some(file);
        }
        let r#ref = self.names.get(name_or_ref).ok().flatten()?;
        self.read(&String::from_utf8(r#ref.to_vec()).ok()?)
    }

    fn all(&self) -> Box<dyn Iterator<Item = (String, File)> + '_> {
        let entries = fs::read_dir(&self.blobdir).ok();
        Box::new(
            entries
                .into_iter()
                .flatten()
                .filter_map(|entry| entry.ok()?.file_name().into_string().ok())
                .filter_map(move |r#ref| self.read(&r#ref).map(|f| (r#ref, f))),
        )
    }
}
