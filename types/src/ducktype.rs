//! Tagged unions over the per-kind task messages.
//!
//! Scheduler and dispatcher code needs the common header (metadata, QoS,
//! application error) of a task without matching on its kind everywhere, so
//! these sum types carry the concrete request/response and expose accessors
//! for the shared parts.

use std::fmt;

use crate::envelope::{request, response};
use crate::task::{self, trace_event::Kind, Metadata, QoS};
use crate::trace;

/// The kind of compute a task requires on a provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Wasip1,
    Pyodide,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Wasip1 => write!(f, "wasip1"),
            TaskKind::Pyodide => write!(f, "pyodide"),
        }
    }
}

/// A concrete task request of either kind.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskRequest {
    Wasip1(task::wasip1::Request),
    Pyodide(task::pyodide::Request),
}

impl TaskRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::Wasip1(_) => TaskKind::Wasip1,
            TaskRequest::Pyodide(_) => TaskKind::Pyodide,
        }
    }

    pub fn info(&self) -> Option<&Metadata> {
        match self {
            TaskRequest::Wasip1(r) => r.info.as_ref(),
            TaskRequest::Pyodide(r) => r.info.as_ref(),
        }
    }

    pub fn info_mut(&mut self) -> &mut Metadata {
        let info = match self {
            TaskRequest::Wasip1(r) => &mut r.info,
            TaskRequest::Pyodide(r) => &mut r.info,
        };
        info.get_or_insert_with(Metadata::default)
    }

    pub fn qos(&self) -> Option<&QoS> {
        match self {
            TaskRequest::Wasip1(r) => r.qos.as_ref(),
            TaskRequest::Pyodide(r) => r.qos.as_ref(),
        }
    }

    /// The task id from metadata, or an empty string before assignment.
    pub fn id(&self) -> &str {
        self.info()
            .and_then(|i| i.id.as_deref())
            .unwrap_or_default()
    }

    /// Refs that must be present on a provider for placement. Pyodide tasks
    /// carry no placement constraints; their packages load from a CDN.
    pub fn required_files(&self) -> Vec<String> {
        match self {
            TaskRequest::Wasip1(r) => r.required_files(),
            TaskRequest::Pyodide(_) => Vec::new(),
        }
    }

    /// Append a trace event, if the request carries a trace at all.
    pub fn trace_event(&mut self, kind: Kind) {
        if let Some(info) = match self {
            TaskRequest::Wasip1(r) => r.info.as_mut(),
            TaskRequest::Pyodide(r) => r.info.as_mut(),
        } {
            trace::record(info, kind);
        }
    }

    pub fn into_body(self) -> request::Body {
        match self {
            TaskRequest::Wasip1(r) => request::Body::RunWasip1(r),
            TaskRequest::Pyodide(r) => request::Body::RunPyodide(r),
        }
    }
}

/// A concrete task response of either kind.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskResponse {
    Wasip1(task::wasip1::Response),
    Pyodide(task::pyodide::Response),
}

impl TaskResponse {
    /// An empty response slot matching the request kind.
    pub fn empty_for(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Wasip1 => TaskResponse::Wasip1(Default::default()),
            TaskKind::Pyodide => TaskResponse::Pyodide(Default::default()),
        }
    }

    pub fn info(&self) -> Option<&Metadata> {
        match self {
            TaskResponse::Wasip1(r) => r.info.as_ref(),
            TaskResponse::Pyodide(r) => r.info.as_ref(),
        }
    }

    pub fn info_mut(&mut self) -> &mut Metadata {
        let info = match self {
            TaskResponse::Wasip1(r) => &mut r.info,
            TaskResponse::Pyodide(r) => &mut r.info,
        };
        info.get_or_insert_with(Metadata::default)
    }

    /// Structural application-level error, i.e. the error arm of the result
    /// oneof. Distinct from RPC-level failures, which never reach this type.
    pub fn error(&self) -> Option<&str> {
        match self {
            TaskResponse::Wasip1(r) => match &r.result {
                Some(task::wasip1::response::Result::Error(e)) => Some(e),
                _ => None,
            },
            TaskResponse::Pyodide(r) => match &r.result {
                Some(task::pyodide::response::Result::Error(e)) => Some(e),
                _ => None,
            },
        }
    }

    /// Extract a matching response from a wire body; `None` if the peer
    /// answered with the wrong kind.
    pub fn from_body(body: response::Body) -> Option<Self> {
        match body {
            response::Body::RunWasip1(r) => Some(TaskResponse::Wasip1(r)),
            response::Body::RunPyodide(r) => Some(TaskResponse::Pyodide(r)),
            _ => None,
        }
    }

    pub fn into_body(self) -> response::Body {
        match self {
            TaskResponse::Wasip1(r) => response::Body::RunWasip1(r),
            TaskResponse::Pyodide(r) => response::Body::RunPyodide(r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::File;
    use crate::task::wasip1;

    fn wasip1_request(binary: &str, rootfs: Option<&str>) -> TaskRequest {
        TaskRequest::Wasip1(wasip1::Request {
            params: Some(wasip1::Params {
                binary: Some(File::by_ref(binary)),
                rootfs: rootfs.map(File::by_ref),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    #[test]
    fn required_files_of_wasip1() {
        let task = wasip1_request("sha256:aa", Some("sha256:bb"));
        assert_eq!(task.required_files(), vec!["sha256:aa", "sha256:bb"]);
        let task = wasip1_request("sha256:aa", None);
        assert_eq!(task.required_files(), vec!["sha256:aa"]);
    }

    #[test]
    fn pyodide_has_no_required_files() {
        let task = TaskRequest::Pyodide(Default::default());
        assert!(task.required_files().is_empty());
        assert_eq!(task.kind(), TaskKind::Pyodide);
        assert!(task.qos().is_none());
        assert_eq!(task.id(), "");
    }

    #[test]
    fn application_error_is_structural() {
        let mut response = TaskResponse::empty_for(TaskKind::Wasip1);
        assert_eq!(response.error(), None);
        if let TaskResponse::Wasip1(r) = &mut response {
            r.result = Some(wasip1::response::Result::Error("trap".into()));
        }
        assert_eq!(response.error(), Some("trap"));
    }

    #[test]
    fn inherit_unset_from_parent() {
        let parent = wasip1::Params {
            binary: Some(File::by_ref("sha256:aa")),
            args: vec!["a".into()],
            envs: vec!["K=V".into()],
            ..Default::default()
        };
        let child = wasip1::Params {
            args: vec!["b".into()],
            ..Default::default()
        };
        let merged = child.inherit_unset(Some(&parent));
        assert_eq!(merged.binary, parent.binary);
        assert_eq!(merged.args, vec!["b".to_string()]);
        assert_eq!(merged.envs, parent.envs);
    }
}
