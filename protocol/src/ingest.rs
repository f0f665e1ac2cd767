use std::fmt::Display;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display as StrumDisplay;
use thiserror::Error;

use crate::CodebaseId;

/// Processing status reported by `GET /codebases/:id/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestStatus {
    Pending,
    Cloning,
    Processing,
    Completed,
    Failed,
    /// Any status this client does not know about. Treated as in-flight.
    #[serde(other)]
    Unknown,
}

impl IngestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Client-chosen correlation key for one ingestion request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub owner: String,
    pub repo: String,
}

impl JobKey {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected a repository in the form owner/repo, got {0:?}")]
pub struct ParseJobKeyError(String);

impl FromStr for JobKey {
    type Err = ParseJobKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_matches('/');
        let Some((owner, repo)) = trimmed.split_once('/') else {
            return Err(ParseJobKeyError(s.to_string()));
        };
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return Err(ParseJobKeyError(s.to_string()));
        }
        Ok(Self::new(owner, repo))
    }
}

/// Body of `POST /codebases/ingest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestRequest<'a> {
    pub owner: &'a str,
    pub repo: &'a str,
}

/// Response of `POST /codebases/ingest`. Older backends return `id`
/// instead of `codebaseId`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    #[serde(default)]
    pub codebase_id: Option<CodebaseId>,
    #[serde(default)]
    pub id: Option<CodebaseId>,
    #[serde(default)]
    pub message: Option<String>,
}

impl IngestResponse {
    pub fn into_codebase_id(self) -> Option<CodebaseId> {
        self.codebase_id.or(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodebaseStatus {
    #[serde(default)]
    pub id: Option<CodebaseId>,
    #[serde(default)]
    pub name: Option<String>,
    pub status: IngestStatus,
    #[serde(default)]
    pub file_count: Option<u64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl CodebaseStatus {
    pub fn new(status: IngestStatus) -> Self {
        Self {
            id: None,
            name: None,
            status,
            file_count: None,
            error_message: None,
        }
    }
}

/// Entry of `GET /codebases`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodebaseSummary {
    pub id: CodebaseId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub primary_language: Option<String>,
    #[serde(default)]
    pub github_url: Option<String>,
    #[serde(default)]
    pub status: Option<IngestStatus>,
    #[serde(default)]
    pub file_count: Option<u64>,
    #[serde(default)]
    pub is_parsed: Option<bool>,
}

/// Response of `GET /codebases/:id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodebaseDetail {
    #[serde(flatten)]
    pub summary: CodebaseSummary,
    #[serde(default)]
    pub class_count: Option<u64>,
    #[serde(default)]
    pub function_count: Option<u64>,
    /// Server-local timestamp, passed through as sent.
    #[serde(default)]
    pub uploaded_at: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Entry of `GET /github/repositories`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default, rename = "private")]
    pub is_private: Option<bool>,
}

impl Repository {
    /// Job key for analyzing this repository, when the owner is known.
    pub fn job_key(&self) -> Option<JobKey> {
        if let Some(owner) = self.owner.as_deref() {
            return Some(JobKey::new(owner, self.name.as_str()));
        }
        self.full_name.as_deref()?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn status_uses_upper_case_wire_names() {
        let status: CodebaseStatus = serde_json::from_value(json!({
            "id": 3,
            "status": "COMPLETED",
            "fileCount": 42,
            "errorMessage": null
        }))
        .unwrap();
        assert_eq!(status.status, IngestStatus::Completed);
        assert_eq!(status.file_count, Some(42));
        assert_eq!(status.error_message, None);
        assert_eq!(IngestStatus::Processing.to_string(), "PROCESSING");
    }

    #[test]
    fn unrecognized_status_is_not_terminal() {
        let status: IngestStatus = serde_json::from_value(json!("EMBEDDING")).unwrap();
        assert_eq!(status, IngestStatus::Unknown);
        assert!(!status.is_terminal());
        assert!(IngestStatus::Failed.is_terminal());
        assert!(!IngestStatus::Cloning.is_terminal());
    }

    #[test]
    fn ingest_response_falls_back_to_id() {
        let preferred: IngestResponse =
            serde_json::from_value(json!({ "codebaseId": 9, "id": 1 })).unwrap();
        assert_eq!(preferred.into_codebase_id(), Some(CodebaseId::from(9)));

        let legacy: IngestResponse = serde_json::from_value(json!({ "id": "11" })).unwrap();
        assert_eq!(legacy.into_codebase_id(), Some(CodebaseId::from("11")));

        let empty: IngestResponse =
            serde_json::from_value(json!({ "message": "Repository ingestion started" })).unwrap();
        assert_eq!(empty.into_codebase_id(), None);
    }

    #[test]
    fn job_key_round_trips_through_display() {
        let key: JobKey = "acme/widgets".parse().unwrap();
        assert_eq!(key, JobKey::new("acme", "widgets"));
        assert_eq!(key.to_string(), "acme/widgets");
    }

    #[test]
    fn job_key_rejects_malformed_input() {
        for input in ["acme", "/widgets", "acme/", "acme/widgets/extra", ""] {
            assert!(input.parse::<JobKey>().is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn codebase_detail_flattens_summary() {
        let detail: CodebaseDetail = serde_json::from_value(json!({
            "id": 12,
            "name": "widgets",
            "githubUrl": "https://github.com/acme/widgets",
            "status": "FAILED",
            "fileCount": 0,
            "classCount": null,
            "uploadedAt": "2024-05-01T10:00:00",
            "errorMessage": "clone failed"
        }))
        .unwrap();
        assert_eq!(detail.summary.id, CodebaseId::from(12));
        assert_eq!(detail.summary.status, Some(IngestStatus::Failed));
        assert_eq!(detail.class_count, None);
        assert_eq!(detail.uploaded_at.as_deref(), Some("2024-05-01T10:00:00"));
        assert_eq!(detail.error_message.as_deref(), Some("clone failed"));
    }

    #[test]
    fn repository_job_key_uses_owner_or_full_name() {
        let with_owner: Repository = serde_json::from_value(json!({
            "name": "widgets",
            "owner": "acme"
        }))
        .unwrap();
        assert_eq!(with_owner.job_key(), Some(JobKey::new("acme", "widgets")));

        let with_full_name: Repository = serde_json::from_value(json!({
            "name": "widgets",
            "fullName": "acme/widgets",
            "private": true
        }))
        .unwrap();
        assert_eq!(
            with_full_name.job_key(),
            Some(JobKey::new("acme", "widgets"))
        );
        assert_eq!(with_full_name.is_private, Some(true));
    }
}
