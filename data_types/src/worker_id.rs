//! The identity a worker registers under.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Uniquely identifies one worker node within the cluster.
///
/// Assigned by the operator at process start and echoed by the coordinator in
/// every handshake message. Also embedded in transaction log outcome tags and
/// in the `workerIdProcesador` field of operation responses.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Create a new worker id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}
