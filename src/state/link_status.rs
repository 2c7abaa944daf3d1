/// Link status definitions for tracking crawl progress
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current status of a frontier key
///
/// Transitions are `Pending -> InProgress -> {Completed | Failed}`. Nothing
/// moves a key out of `Failed` automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// Discovered and waiting to be fetched
    Pending,

    /// Dispatched in the current batch
    InProgress,

    /// Fetched and recorded
    Completed,

    /// Fetch ended in a terminal failure
    Failed,
}

impl LinkStatus {
    /// Converts the status to its snapshot string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_matches_snapshot_strings() {
        for status in [LinkStatus::Pending, LinkStatus::InProgress, LinkStatus::Completed, LinkStatus::Failed] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(LinkStatus::InProgress.to_string(), "in_progress");
    }
}
