//! Core data models for the docket ingestion and retrieval pipeline.
//!
//! These types mirror the SQLite schema in [`crate::migrate`] and the
//! `{content, source}` records the retrieval tools hand to the agent.

use serde::Serialize;

/// Processing state of an artifact, parsed email, or attachment.
///
/// `Pending` is initial; `Completed` and `Failed` are terminal unless a
/// forced re-run moves them back to `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Processing => "processing",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "pending" => Some(Status::Pending),
            "processing" => Some(Status::Processing),
            "completed" => Some(Status::Completed),
            "failed" => Some(Status::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured fields decoded from a raw `.eml` artifact.
///
/// `embedding_status` tracks the chunk/embed lifecycle of `cleaned_body`,
/// independently of the parse that created this row.
#[derive(Debug, Clone)]
pub struct ParsedEmail {
    pub id: String,
    pub artifact_id: String,
    pub sent_on: Option<i64>,
    pub sender: String,
    pub to_recipients: String,
    pub cc_recipients: Option<String>,
    pub subject: String,
    pub body: String,
    pub cleaned_body: String,
    pub embedding_status: Status,
    pub embedding_error: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub id: String,
    pub parsed_email_id: String,
    pub file_name: String,
    pub file_path: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub embedding_status: Status,
    pub embedding_error: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Ai,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Ai => "ai",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "ai" => Some(Role::Ai),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: String,
    pub thread_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: i64,
}

/// Citation metadata attached to every retrieval-tool result, letting the
/// agent cite the artifact it drew facts from.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Citation {
    UploadedFile {
        file_name: String,
        file_path: String,
    },
    Email {
        subject: String,
        sender: String,
        to_recipients: String,
        cc_recipients: Option<String>,
        sent_on: Option<String>,
    },
    EmailAttachment {
        file_name: String,
        email_subject: String,
        email_sender: String,
        email_sent_on: Option<String>,
    },
}

/// The uniform output record of every retrieval tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub content: String,
    pub source: Citation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            Status::Pending,
            Status::Processing,
            Status::Completed,
            Status::Failed,
        ] {
            assert_eq!(Status::parse(status.as_str()), Some(status));
        }
        assert_eq!(Status::parse("unknown"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(Status::Completed.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(!Status::Pending.is_terminal());
        assert!(!Status::Processing.is_terminal());
    }

    #[test]
    fn citation_serializes_tagged() {
        let citation = Citation::UploadedFile {
            file_name: "contract.pdf".to_string(),
            file_path: "uploaded_files/contract.pdf".to_string(),
        };
        let json = serde_json::to_value(&citation).unwrap();
        assert_eq!(json["kind"], "uploaded_file");
        assert_eq!(json["file_name"], "contract.pdf");
    }
}
