use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a task scheduled by the orchestrator.
///
/// Each task maps to exactly one micro-VM, so the task id doubles as the VM id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Creates a `TaskId` from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a single path component usable as the task's workspace directory.
    ///
    /// Orchestrator task ids may contain `/`. Separators and `%` are
    /// percent-escaped so the workspace always sits directly under the rootfs
    /// base directory and distinct ids never share a directory. The empty id
    /// and the `.`/`..` names map to forms no other id can produce.
    #[must_use]
    pub fn workspace_name(&self) -> String {
        match self.0.as_str() {
            "" => return "%".to_owned(),
            "." => return "%2E".to_owned(),
            ".." => return "%2E%2E".to_owned(),
            _ => {}
        }
        let mut name = String::with_capacity(self.0.len());
        for c in self.0.chars() {
            match c {
                '%' => name.push_str("%25"),
                '/' => name.push_str("%2F"),
                '\\' => name.push_str("%5C"),
                _ => name.push(c),
            }
        }
        name
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}
