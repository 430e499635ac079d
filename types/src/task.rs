//! Task messages: common metadata, QoS and trace structs plus the per-kind
//! request/response payloads for WASI preview-1 binaries and Pyodide scripts.

use serde::{Deserialize, Serialize};

use crate::file::File;

/// Common metadata carried by every task request and response.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct Metadata {
    /// Broker-assigned identifier, unique per process run.
    #[prost(string, optional, tag = "1")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Peer address of the requesting client.
    #[prost(string, optional, tag = "2")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,

    /// Name of the provider the task was assigned to, filled by the broker.
    #[prost(string, optional, tag = "3")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Free-form client reference, passed through untouched.
    #[prost(string, optional, tag = "4")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    /// Optional event trace; when present, components append to it.
    #[prost(message, optional, tag = "5")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Trace>,
}

/// Advisory quality-of-service hints. The broker passes these through to
/// selectors but attaches no semantics itself.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct QoS {
    #[prost(string, optional, tag = "1")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,

    #[prost(int32, optional, tag = "2")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

/// An ordered list of timestamped trace events, collected across client,
/// broker and provider.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct Trace {
    #[prost(message, repeated, tag = "1")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<TraceEvent>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct TraceEvent {
    #[prost(enumeration = "trace_event::Kind", tag = "1")]
    pub event: i32,

    /// Wall-clock timestamp in nanoseconds since the Unix epoch.
    #[prost(int64, tag = "2")]
    pub unixnano: i64,
}

pub mod trace_event {
    use serde::{Deserialize, Serialize};

    /// Trace event kinds. The numeric ranges encode the emitting component:
    /// 10..20 client, 20..30 broker, 30..40 provider.
    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
        ::prost::Enumeration, Serialize, Deserialize,
    )]
    #[repr(i32)]
    pub enum Kind {
        Unknown = 0,
        ClientTransmitRequest = 10,
        ClientReceivedResponse = 11,
        BrokerReceivedClientRequest = 20,
        BrokerQueueTask = 21,
        BrokerTransmitProviderTask = 22,
        BrokerReceivedProviderResult = 23,
        BrokerTransmitClientResponse = 24,
        ProviderReceivedTask = 30,
        ProviderStartedExecution = 31,
        ProviderFinishedExecution = 32,
        ProviderTransmitResult = 33,
    }
}

/// Event asking a provider to abort a running task.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct Cancel {
    #[prost(string, optional, tag = "1")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[prost(string, optional, tag = "2")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod wasip1 {
    use serde::{Deserialize, Serialize};

    use crate::file::File;
    use crate::task::{Metadata, QoS};

    /// Execution parameters of a WASI preview-1 task.
    #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
    pub struct Params {
        /// The `application/wasm` binary to instantiate.
        #[prost(message, optional, tag = "1")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub binary: Option<File>,

        /// Optional `application/zip` root filesystem.
        #[prost(message, optional, tag = "2")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub rootfs: Option<File>,

        #[prost(string, repeated, tag = "3")]
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub args: Vec<String>,

        #[prost(string, repeated, tag = "4")]
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub envs: Vec<String>,

        #[prost(bytes = "vec", optional, tag = "5")]
        #[serde(default, with = "crate::b64::option", skip_serializing_if = "Option::is_none")]
        pub stdin: Option<Vec<u8>>,

        /// Paths to collect from the task filesystem after the run.
        #[prost(string, repeated, tag = "6")]
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub artifacts: Vec<String>,
    }

    impl Params {
        /// Fill any unset parameters from a parent specification, used by
        /// job requests where tasks inherit a shared parent spec.
        pub fn inherit_unset(mut self, parent: Option<&Params>) -> Self {
            let Some(parent) = parent else { return self };
            if self.binary.is_none() {
                self.binary = parent.binary.clone();
            }
            if self.rootfs.is_none() {
                self.rootfs = parent.rootfs.clone();
            }
            if self.args.is_empty() {
                self.args = parent.args.clone();
            }
            if self.envs.is_empty() {
                self.envs = parent.envs.clone();
            }
            if self.stdin.is_none() {
                self.stdin = parent.stdin.clone();
            }
            if self.artifacts.is_empty() {
                self.artifacts = parent.artifacts.clone();
            }
            self
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
    pub struct Request {
        #[prost(message, optional, tag = "1")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub info: Option<Metadata>,

        #[prost(message, optional, tag = "2")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub qos: Option<QoS>,

        #[prost(message, optional, tag = "3")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub params: Option<Params>,
    }

    impl Request {
        /// Refs this task needs present on a provider before placement.
        pub fn required_files(&self) -> Vec<String> {
            let mut files = Vec::with_capacity(2);
            let Some(params) = &self.params else { return files };
            if let Some(r) = params.binary.as_ref().and_then(|f| f.r#ref.clone()) {
                files.push(r);
            }
            if let Some(r) = params.rootfs.as_ref().and_then(|f| f.r#ref.clone()) {
                files.push(r);
            }
            files
        }
    }

    /// Outputs of a successful instantiation, regardless of exit status.
    #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
    pub struct Output {
        #[prost(int32, optional, tag = "1")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub status: Option<i32>,

        #[prost(bytes = "vec", tag = "2")]
        #[serde(default, with = "crate::b64")]
        pub stdout: Vec<u8>,

        #[prost(bytes = "vec", tag = "3")]
        #[serde(default, with = "crate::b64")]
        pub stderr: Vec<u8>,

        /// Zipped artifacts collected from the task filesystem.
        #[prost(message, optional, tag = "4")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub artifacts: Option<File>,
    }

    #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
    pub struct Response {
        #[prost(message, optional, tag = "1")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub info: Option<Metadata>,

        #[prost(oneof = "response::Result", tags = "2, 3")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub result: Option<response::Result>,
    }

    pub mod response {
        use serde::{Deserialize, Serialize};

        /// Either the run's outputs or an application-level failure, e.g. a
        /// trap or instantiation error. The latter is the client's problem
        /// and is never retried by the broker.
        #[derive(Clone, PartialEq, ::prost::Oneof, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum Result {
            #[prost(message, tag = "2")]
            Ok(super::Output),
            #[prost(string, tag = "3")]
            Error(String),
        }
    }

    /// Fan-out request: N task specs inheriting unset fields from a parent.
    #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
    pub struct JobRequest {
        #[prost(message, optional, tag = "1")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub info: Option<Metadata>,

        #[prost(message, optional, tag = "2")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub qos: Option<QoS>,

        #[prost(message, optional, tag = "3")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub parent: Option<Params>,

        #[prost(message, repeated, tag = "4")]
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub tasks: Vec<Params>,
    }

    #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
    pub struct JobResponse {
        #[prost(message, optional, tag = "1")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub info: Option<Metadata>,

        /// Job-level failure, e.g. an unresolvable file in the parent spec.
        #[prost(string, optional, tag = "2")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub error: Option<String>,

        #[prost(message, repeated, tag = "3")]
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub tasks: Vec<Response>,
    }
}

pub mod pyodide {
    use serde::{Deserialize, Serialize};

    use crate::file::File;
    use crate::task::{Metadata, QoS};

    #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
    pub struct Params {
        #[prost(oneof = "params::Run", tags = "1, 2")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub run: Option<params::Run>,

        /// Python packages to load before running.
        #[prost(string, repeated, tag = "3")]
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub packages: Vec<String>,
    }

    pub mod params {
        use serde::{Deserialize, Serialize};

        #[derive(Clone, PartialEq, ::prost::Oneof, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum Run {
            /// Inline script source.
            #[prost(string, tag = "1")]
            Script(String),
            /// A stored module to import and run.
            #[prost(message, tag = "2")]
            Module(super::File),
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
    pub struct Request {
        #[prost(message, optional, tag = "1")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub info: Option<Metadata>,

        #[prost(message, optional, tag = "2")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub qos: Option<QoS>,

        #[prost(message, optional, tag = "3")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub params: Option<Params>,
    }

    #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
    pub struct Output {
        #[prost(bytes = "vec", tag = "1")]
        #[serde(default, with = "crate::b64")]
        pub stdout: Vec<u8>,

        #[prost(bytes = "vec", tag = "2")]
        #[serde(default, with = "crate::b64")]
        pub stderr: Vec<u8>,

        /// `repr()` of the last expression, if any.
        #[prost(string, optional, tag = "3")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub repr: Option<String>,

        #[prost(string, optional, tag = "4")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub version: Option<String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
    pub struct Response {
        #[prost(message, optional, tag = "1")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub info: Option<Metadata>,

        #[prost(oneof = "response::Result", tags = "2, 3")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub result: Option<response::Result>,
    }

    pub mod response {
        use serde::{Deserialize, Serialize};

        #[derive(Clone, PartialEq, ::prost::Oneof, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum Result {
            #[prost(message, tag = "2")]
            Ok(super::Output),
            #[prost(string, tag = "3")]
            Error(String),
        }
    }
}
