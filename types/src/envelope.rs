//! The frame envelope: every frame on a connection is one `Envelope`.
//!
//! `sequence = 0` marks an event with no reply expected; any other value
//! identifies a request, and the matching response carries the same
//! sequence number.

use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct Envelope {
    #[prost(uint64, tag = "1")]
    #[serde(default)]
    pub sequence: u64,

    #[prost(oneof = "envelope::Payload", tags = "2, 3, 4")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<envelope::Payload>,
}

pub mod envelope {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, PartialEq, ::prost::Oneof, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Payload {
        #[prost(message, tag = "2")]
        Request(super::Request),
        #[prost(message, tag = "3")]
        Response(super::Response),
        #[prost(message, tag = "4")]
        Event(super::Event),
    }
}

impl Envelope {
    pub fn request(sequence: u64, body: request::Body) -> Self {
        Self {
            sequence,
            payload: Some(envelope::Payload::Request(Request { body: Some(body) })),
        }
    }

    pub fn response(sequence: u64, response: Response) -> Self {
        Self { sequence, payload: Some(envelope::Payload::Response(response)) }
    }

    pub fn event(body: event_body::Body) -> Self {
        Self {
            sequence: 0,
            payload: Some(envelope::Payload::Event(Event { body: Some(body) })),
        }
    }
}

/// A request frame; the concrete call is the oneof body.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct Request {
    #[prost(oneof = "request::Body", tags = "1, 2, 3, 4, 5, 6")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<request::Body>,
}

pub mod request {
    use serde::{Deserialize, Serialize};

    use crate::{filesystem, task};

    #[derive(Clone, PartialEq, ::prost::Oneof, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Body {
        #[prost(message, tag = "1")]
        RunWasip1(task::wasip1::Request),
        #[prost(message, tag = "2")]
        RunPyodide(task::pyodide::Request),
        #[prost(message, tag = "3")]
        ListFiles(filesystem::listing::Request),
        #[prost(message, tag = "4")]
        ProbeFile(filesystem::probe::Request),
        #[prost(message, tag = "5")]
        UploadFile(filesystem::upload::Request),
        #[prost(message, tag = "6")]
        Ping(super::Ping),
    }
}

/// A response frame. The `error` field reports an RPC-level failure on the
/// peer; a successful call carries its result in the oneof body, which may
/// itself contain an application-level error.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct Response {
    #[prost(string, optional, tag = "1")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[prost(oneof = "response::Body", tags = "2, 3, 4, 5, 6, 7")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<response::Body>,
}

pub mod response {
    use serde::{Deserialize, Serialize};

    use crate::{filesystem, task};

    #[derive(Clone, PartialEq, ::prost::Oneof, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Body {
        #[prost(message, tag = "2")]
        RunWasip1(task::wasip1::Response),
        #[prost(message, tag = "3")]
        RunPyodide(task::pyodide::Response),
        #[prost(message, tag = "4")]
        ListFiles(filesystem::listing::Response),
        #[prost(message, tag = "5")]
        ProbeFile(filesystem::probe::Response),
        #[prost(message, tag = "6")]
        UploadFile(filesystem::upload::Response),
        #[prost(message, tag = "7")]
        Pong(super::Ping),
    }
}

impl Response {
    pub fn ok(body: response::Body) -> Self {
        Self { error: None, body: Some(body) }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { error: Some(error.into()), body: None }
    }
}

/// An event frame, strictly one-way.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct Event {
    #[prost(oneof = "event_body::Body", tags = "1, 2, 3, 4, 5")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<event_body::Body>,
}

pub mod event_body {
    use serde::{Deserialize, Serialize};

    use crate::{event, task};

    #[derive(Clone, PartialEq, ::prost::Oneof, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Body {
        #[prost(message, tag = "1")]
        ClusterInfo(event::ClusterInfo),
        #[prost(message, tag = "2")]
        Throughput(event::Throughput),
        #[prost(message, tag = "3")]
        ProviderHello(event::ProviderHello),
        #[prost(message, tag = "4")]
        ProviderResources(event::ProviderResources),
        #[prost(message, tag = "5")]
        TaskCancel(task::Cancel),
    }
}

/// Empty payload for liveness round-trips.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct Ping {}
