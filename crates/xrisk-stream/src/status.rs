// ── Connection and workflow status ──
//
// `ConnectionStatus` is the connector's own state. `WorkflowStatus` is the
// vocabulary the backend reports inside events; the two terminal sets the
// connector acts on are defined here and nowhere else.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};

// ── ConnectionStatus ─────────────────────────────────────────────────

/// Connection state observable by consumers. Exactly one is active.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionStatus {
    /// No task bound, or explicitly torn down.
    #[default]
    Disconnected,
    /// First attempt to open the transport for a newly bound task.
    Connecting,
    /// Transport open and signalled.
    Connected,
    /// A retry is in flight.
    Reconnecting,
    /// Server signalled logical completion of the stream.
    Closed,
    /// Retries exhausted or the transport failed.
    Error,
}

impl ConnectionStatus {
    /// `Closed` and `Error` end a watch; everything else may still progress.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }
}

// ── WorkflowStatus ───────────────────────────────────────────────────

/// Known workflow status values reported by the backend in `meta.status`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Started,
    Progress,
    Validated,
    Classification,
    Classified,
    Inquiry,
    InquiryRequired,
    InquiryAwaitingResponse,
    Inquired,
    LoginRequired,
    Research,
    Researched,
    Analysis,
    Analyzed,
    Report,
    CombinedAnalysisReport,
    CombinedAnalyzed,
    Completed,
    Failed,
    Error,
    Unknown,
}

/// Statuses after which the stream is torn down without reconnecting.
pub const STREAM_CLOSING_STATUSES: &[WorkflowStatus] = &[
    WorkflowStatus::Completed,
    WorkflowStatus::Failed,
    WorkflowStatus::InquiryAwaitingResponse,
    WorkflowStatus::InquiryRequired,
    WorkflowStatus::LoginRequired,
];

/// Statuses that mean the workflow is over. A `stream_closed` control
/// message after one of these never triggers a reconnect.
pub const FINISHED_STATUSES: &[WorkflowStatus] =
    &[WorkflowStatus::Completed, WorkflowStatus::Failed];

impl WorkflowStatus {
    /// Parse a raw status string. Unknown values yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::from_str(raw).ok()
    }

    pub fn closes_stream(self) -> bool {
        STREAM_CLOSING_STATUSES.contains(&self)
    }

    pub fn is_finished(self) -> bool {
        FINISHED_STATUSES.contains(&self)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn connection_status_renders_lowercase() {
        assert_eq!(ConnectionStatus::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionStatus::Error.as_ref(), "error");
        assert_eq!(
            "closed".parse::<ConnectionStatus>().ok(),
            Some(ConnectionStatus::Closed)
        );
    }

    #[test]
    fn default_status_is_disconnected() {
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn settled_statuses() {
        assert!(ConnectionStatus::Closed.is_settled());
        assert!(ConnectionStatus::Error.is_settled());
        assert!(!ConnectionStatus::Reconnecting.is_settled());
        assert!(!ConnectionStatus::Connected.is_settled());
    }

    #[test]
    fn parse_snake_case_workflow_statuses() {
        assert_eq!(
            WorkflowStatus::parse("inquiry_awaiting_response"),
            Some(WorkflowStatus::InquiryAwaitingResponse)
        );
        assert_eq!(
            WorkflowStatus::parse("combined_analysis_report"),
            Some(WorkflowStatus::CombinedAnalysisReport)
        );
        assert_eq!(WorkflowStatus::parse("processing"), None);
        assert_eq!(WorkflowStatus::parse(""), None);
    }

    #[test]
    fn closing_set_matches_terminal_statuses() {
        for raw in [
            "completed",
            "failed",
            "inquiry_awaiting_response",
            "inquiry_required",
            "login_required",
        ] {
            let status = WorkflowStatus::parse(raw).unwrap();
            assert!(status.closes_stream(), "{raw} should close the stream");
        }

        for raw in ["pending", "classified", "researched", "error", "unknown"] {
            let status = WorkflowStatus::parse(raw).unwrap();
            assert!(!status.closes_stream(), "{raw} should not close the stream");
        }
    }

    #[test]
    fn only_completed_and_failed_are_finished() {
        assert!(WorkflowStatus::Completed.is_finished());
        assert!(WorkflowStatus::Failed.is_finished());
        assert!(!WorkflowStatus::LoginRequired.is_finished());
        assert!(!WorkflowStatus::InquiryRequired.is_finished());
    }
}
