use dashmap::DashMap;

use super::{check_media_type, File, StorageBackend, StorageError};

/// Ephemeral in-memory backend; everything is lost on restart.
pub struct MemoryStorage {
    blobs: DashMap<String, File>,
    names: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self { blobs: DashMap::new(), names: DashMap::new() }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryStorage {
    fn insert(&self, name: &str, media: &str, blob: Vec<u8>) -> Result<File, StorageError> {
        let media = check_media_type(media)?;
        let file = File::new(media, blob);
        self.blobs.insert(file.r#ref().to_string(), file.clone());
        if !name.is_empty() {
            self.names.insert(name.to_string(), file.r#ref().to_string());
        }
        Ok(file)
    }

    fn get(&self, name_or_ref: &str) -> Option<File> {
        if let Some(file) = self.blobs.get(name_or_ref) {
            return Some(file.clone());
        }
        let r#ref = self.names.get(name_or_ref)?;
        self.blobs.get(r#ref.value()).map(|f| f.clone())
    }

    fn all(&self) -> Box<dyn Iterator<Item = (String, File)> + '_> {
        // snapshot the keys, fetch blobs lazily while iterating
        let refs: Vec<String> = self.blobs.iter().map(|e| e.key().clone()).collect();
        Box::new(
            refs.into_iter()
                .filter_map(move |r| self.blobs.get(&r).map(|f| (r.clone(), f.clone()))),
        )
    }
}
