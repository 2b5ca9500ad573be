use serde::Serialize;
use tokio::sync::mpsc;

/// Capacity of each per-pod record channel. When a consumer falls behind,
/// the pod's reader task blocks on send, which in turn backpressures the
/// underlying API log stream read.
pub const POD_STREAM_CAPACITY: usize = 200;

/// Deduplication key for a discovered pod. Two discoveries of the same
/// identity must collapse to one logical stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PodIdentity {
    pub namespace: String,
    pub pod_name: String,
}

impl std::fmt::Display for PodIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod_name)
    }
}

/// One parsed and rendered log line.
///
/// `time` is the raw timestamp token the API server prepends when
/// `timestamps: true` is set (RFC3339 with nanoseconds), kept as a string:
/// the format is fixed-width and lexically monotonic, which is what the
/// ordered merge relies on.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub source: String,
    pub namespace: String,
    pub pod: String,
    pub time: String,
    pub message: String,
    pub vars: serde_json::Map<String, serde_json::Value>,
}

/// A live per-pod stream handle: the receive side of the bounded channel
/// owned by that pod's reader task. The reader task is the only writer and
/// closes the channel (by dropping its sender) on end-of-stream or error.
pub struct PodStream {
    pub identity: PodIdentity,
    pub rx: mpsc::Receiver<LogRecord>,
}
