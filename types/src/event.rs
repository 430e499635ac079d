//! One-way event payloads, sent with sequence 0 and never answered.

use serde::{Deserialize, Serialize};

/// Cluster-wide broadcast after providers join or leave.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct ClusterInfo {
    #[prost(uint32, optional, tag = "1")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub providers: Option<u32>,
}

/// Periodic broadcast of overall task throughput.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct Throughput {
    /// Completed tasks per second over the sliding window.
    #[prost(float, optional, tag = "1")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall: Option<f32>,
}

/// First event a provider sends after connecting.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct ProviderHello {
    #[prost(string, optional, tag = "1")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[prost(string, optional, tag = "2")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub useragent: Option<String>,
}

/// Advertised worker pool size; may change at runtime and resizes the
/// broker-side worker-slot semaphore.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct ProviderResources {
    #[prost(uint32, optional, tag = "1")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,

    #[prost(uint64, optional, tag = "2")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
}
