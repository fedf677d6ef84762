//! Task statuses: the result of a check or apply

use serde::{Deserialize, Serialize};

/// Summary code of a check or apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    /// The resource differs from its desired state and can be converged
    WillChange,
    /// The resource is already in its desired state
    NoChange,
    /// The resource differs but cannot be converged
    CantChange,
    /// The resource failed outright; dependents will be skipped
    Fatal,
}

/// One field-level difference between current and desired state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub field: String,
    pub current: String,
    pub desired: String,
}

impl Diff {
    pub fn new(field: impl Into<String>, current: impl Into<String>, desired: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            current: current.into(),
            desired: desired.into(),
        }
    }

    /// Whether this diff represents an actual change
    pub fn changes(&self) -> bool {
        self.current != self.desired
    }
}

/// The result of a task check or apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub code: StatusCode,
    pub diffs: Vec<Diff>,
    pub output: Vec<String>,
}

impl TaskStatus {
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            diffs: Vec::new(),
            output: Vec::new(),
        }
    }

    pub fn no_change() -> Self {
        Self::new(StatusCode::NoChange)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Fatal).with_output(message)
    }

    pub fn cant_change(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CantChange).with_output(message)
    }

    /// Derive a status from a set of diffs: `WillChange` if any field
    /// actually changes, `NoChange` otherwise
    pub fn from_diffs(diffs: Vec<Diff>) -> Self {
        let code = if diffs.iter().any(Diff::changes) {
            StatusCode::WillChange
        } else {
            StatusCode::NoChange
        };
        Self {
            code,
            diffs,
            output: Vec::new(),
        }
    }

    pub fn with_diff(
        mut self,
        field: impl Into<String>,
        current: impl Into<String>,
        desired: impl Into<String>,
    ) -> Self {
        self.diffs.push(Diff::new(field, current, desired));
        self
    }

    pub fn with_output(mut self, line: impl Into<String>) -> Self {
        self.output.push(line.into());
        self
    }

    /// Whether any diff reports current != desired
    pub fn has_changes(&self) -> bool {
        self.diffs.iter().any(Diff::changes)
    }

    pub fn is_fatal(&self) -> bool {
        self.code == StatusCode::Fatal
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::no_change()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_diffs() {
        let changed = TaskStatus::from_diffs(vec![Diff::new("content", "", "hi")]);
        assert_eq!(changed.code, StatusCode::WillChange);
        assert!(changed.has_changes());

        let same = TaskStatus::from_diffs(vec![Diff::new("content", "hi", "hi")]);
        assert_eq!(same.code, StatusCode::NoChange);
        assert!(!same.has_changes());

        let empty = TaskStatus::from_diffs(Vec::new());
        assert_eq!(empty.code, StatusCode::NoChange);
    }

    #[test]
    fn test_builders() {
        let status = TaskStatus::fatal("boom").with_diff("path", "a", "b");
        assert!(status.is_fatal());
        assert_eq!(status.output, vec!["boom".to_string()]);
        assert!(status.has_changes());
    }
}
