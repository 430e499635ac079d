//! Content-addressed file storage with friendly-name lookup.
//!
//! Files are keyed by their derived ref (`sha256:<hex>`); an optional
//! user-supplied name is a secondary lookup key. Three backends exist:
//! ephemeral in-memory maps, a single-file embedded `sled` database, and a
//! plain directory with a sled side table for names.

mod dirfs;
mod file;
mod memory;
mod sledkv;

pub use self::dirfs::DirectoryStorage;
pub use self::file::{check_media_type, file_ref, sniff_media, File, MEDIA_WASM, MEDIA_ZIP};
pub use self::memory::MemoryStorage;
pub use self::sledkv::SledStorage;

use thiserror::Error;
use wasimoff_types::task::wasip1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unsupported media type: {0:?}")]
    MediaType(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Db(#[from] sled::Error),
    #[error("don't use both ref and blob together")]
    RefAndBlob,
    #[error("both ref and blob are empty")]
    EmptyFile,
    #[error("ref not found in storage: {0:?}")]
    NotFound(String),
    #[error("{0}")]
    Resolve(String),
}

/// The operations every backend provides. All of them must be safe for
/// concurrent callers.
pub trait StorageBackend: Send + Sync {
    /// Insert a blob, validating the media type and deriving the ref from
    /// the bytes. Re-inserting the same bytes is idempotent on the ref but
    /// refreshes the name alias.
    fn insert(&self, name: &str, media: &str, blob: Vec<u8>) -> Result<File, StorageError>;

    /// Look up by ref first, then by friendly name.
    fn get(&self, name_or_ref: &str) -> Option<File>;

    /// Iterate all (ref, file) pairs in unspecified order. The consumer
    /// may stop early.
    fn all(&self) -> Box<dyn Iterator<Item = (String, File)> + '_>;
}

/// Facade over a chosen backend plus task-file resolution.
pub struct FileStorage {
    backend: Box<dyn StorageBackend>,
}

impl FileStorage {
    /// Open a backend from a storage URL: `:memory:` or `memory://` for the
    /// ephemeral map, `sled://path` for the embedded database, and
    /// `dirfs://path` or a plain path for directory storage.
    pub fn open(url: &str) -> Result<Self, StorageError> {
        let backend: Box<dyn StorageBackend> = if url.is_empty()
            || url == ":memory:"
            || url.starts_with("memory://")
        {
            Box::new(MemoryStorage::new())
        } else if let Some(path) = url.strip_prefix("sled://") {
            Box::new(SledStorage::open(path)?)
        } else if let Some(path) = url.strip_prefix("dirfs://") {
            Box::new(DirectoryStorage::open(path)?)
        } else {
            Box::new(DirectoryStorage::open(url)?)
        };
        Ok(Self { backend })
    }

    pub fn in_memory() -> Self {
        Self { backend: Box::new(MemoryStorage::new()) }
    }

    pub fn insert(&self, name: &str, media: &str, blob: Vec<u8>) -> Result<File, StorageError> {
        self.backend.insert(name, media, blob)
    }

    pub fn get(&self, name_or_ref: &str) -> Option<File> {
        self.backend.get(name_or_ref)
    }

    pub fn all(&self) -> Box<dyn Iterator<Item = (String, File)> + '_> {
        self.backend.all()
    }

    /// Check that a file argument is usable in an offloading request:
    /// either an inline blob (with a valid media type, if given) or a
    /// resolvable ref/name, which is rewritten to the canonical ref.
    pub fn resolve_file(&self, file: &mut wasimoff_types::File) -> Result<(), StorageError> {
        match (&file.blob, &file.r#ref) {
            (None, None) => Err(StorageError::EmptyFile),
            (Some(_), Some(_)) => Err(StorageError::RefAndBlob),
            (Some(_), None) => {
                // inline blob: normalize the media type, if one was given
                if let Some(media) = file.media.take().filter(|m| !m.is_empty()) {
                    file.media = Some(check_media_type(&media)?);
                }
                Ok(())
            }
            (None, Some(name_or_ref)) => {
                let stored = self
                    .get(name_or_ref)
                    .ok_or_else(|| StorageError::NotFound(name_or_ref.clone()))?;
                file.r#ref = Some(stored.r#ref().to_string());
                file.media = Some(stored.media);
                Ok(())
            }
        }
    }

    /// Resolve the binary and rootfs slots of a Wasip1 request, joining all
    /// failures into one error.
    pub fn resolve_wasip1(&self, request: &mut wasip1::Request) -> Result<(), StorageError> {
        let Some(params) = request.params.as_mut() else {
            return Err(StorageError::Resolve("request has no params".into()));
        };
        self.resolve_params(params)
    }

    pub fn resolve_params(&self, params: &mut wasip1::Params) -> Result<(), StorageError> {
        let mut errors = Vec::new();
        if let Some(binary) = params.binary.as_mut() {
            if let Err(e) = self.resolve_file(binary) {
                errors.push(format!("binary: {e}"));
            }
        }
        if let Some(rootfs) = params.rootfs.as_mut() {
            if let Err(e) = self.resolve_file(rootfs) {
                errors.push(format!("rootfs: {e}"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Resolve(errors.join("; ")))
        }
    }
}
