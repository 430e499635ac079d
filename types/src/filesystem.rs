//! Broker ⇄ provider filesystem RPCs: listing, probing and uploading blobs.

pub mod listing {
    use serde::{Deserialize, Serialize};

    /// Ask a provider for everything it currently holds.
    #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
    pub struct Request {}

    #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
    pub struct Response {
        /// Content-address refs of all locally stored files.
        #[prost(string, repeated, tag = "1")]
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub files: Vec<String>,
    }
}

pub mod probe {
    use serde::{Deserialize, Serialize};

    /// Check whether the peer holds a single file by ref.
    #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
    pub struct Request {
        #[prost(string, optional, tag = "1")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub file: Option<String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
    pub struct Response {
        #[prost(bool, tag = "1")]
        #[serde(default)]
        pub ok: bool,
    }
}

pub mod upload {
    use serde::{Deserialize, Serialize};

    use crate::file::File;

    /// Push a file to the peer (client → broker or broker → provider).
    #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
    pub struct Request {
        #[prost(message, optional, tag = "1")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub upload: Option<File>,
    }

    #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
    pub struct Response {
        /// The ref the receiver computed from the uploaded bytes. Senders
        /// must verify it matches their own.
        #[prost(string, optional, tag = "1")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub r#ref: Option<String>,
    }
}
