use serde::{Deserialize, Serialize};

/// A file argument on the wire: either a content-address `ref` into the
/// broker's storage, or an inline `blob` with its media type. Using both at
/// once is rejected during task-file resolution.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct File {
    /// Content address of the form `sha256:<64 hex chars>`, or a friendly
    /// name which the broker resolves to the canonical ref.
    #[prost(string, optional, tag = "1")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<String>,

    /// Media type from the closed allow-list.
    #[prost(string, optional, tag = "2")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,

    /// Raw file contents when uploading inline.
    #[prost(bytes = "vec", optional, tag = "3")]
    #[serde(default, with = "crate::b64::option", skip_serializing_if = "Option::is_none")]
    pub blob: Option<Vec<u8>>,
}

impl File {
    /// File argument pointing at a stored blob by ref or friendly name.
    pub fn by_ref(name_or_ref: impl Into<String>) -> Self {
        Self { r#ref: Some(name_or_ref.into()), media: None, blob: None }
    }
}
