use sha2::{Digest, Sha256};

use super::StorageError;

/// Media type of WebAssembly binaries.
pub const MEDIA_WASM: &str = "application/wasm";
/// Media type of zipped root filesystems and artifact archives.
pub const MEDIA_ZIP: &str = "application/zip";

/// Normalize a media type and validate it against the closed allow-list.
/// Parameters like `; charset=…` are stripped.
pub fn check_media_type(media: &str) -> Result<String, StorageError> {
    let essence = media
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        MEDIA_WASM | MEDIA_ZIP => Ok(essence),
        _ => Err(StorageError::MediaType(media.to_string())),
    }
}

/// Derive the content address of a blob: `sha256:` + lowercase hex digest.
pub fn file_ref(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// Guess a media type from magic bytes, for blobs read back from plain
/// directory storage without a side-table entry.
pub fn sniff_media(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\0asm") {
        MEDIA_WASM
    } else {
        MEDIA_ZIP
    }
}

/// An immutable stored blob with its media type and content address.
#[derive(Clone, Debug, PartialEq)]
pub struct File {
    r#ref: String,
    pub media: String,
    pub bytes: Vec<u8>,
}

impl File {
    /// The ref is always derived from the bytes, never caller-supplied.
    pub fn new(media: impl Into<String>, bytes: Vec<u8>) -> Self {
        let r#ref = file_ref(&bytes);
        Self { r#ref, media: media.into(), bytes }
    }

    pub fn r#ref(&self) -> &str {
        &self.r#ref
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_derivation() {
        // well-known sha256 of "hello"
        assert_eq!(
            file_ref(b"hello"),
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        let file = File::new(MEDIA_WASM, b"hello".to_vec());
        assert_eq!(file.r#ref(), file_ref(b"hello"));
    }

    #[test]
    fn media_allow_list() {
        assert_eq!(check_media_type("application/wasm").unwrap(), MEDIA_WASM);
        assert_eq!(check_media_type("Application/ZIP; foo=bar").unwrap(), MEDIA_ZIP);
        assert!(check_media_type("text/html").is_err());
        assert!(check_media_type("").is_err());
    }

    #[test]
    fn magic_byte_sniffing() {
        assert_eq!(sniff_media(b"\0asm\x01\0\0\0"), MEDIA_WASM);
        assert_eq!(sniff_media(b"PK\x03\x04"), MEDIA_ZIP);
    }
}
