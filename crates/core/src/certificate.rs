use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::request::{EntryStatus, RequestId, RequestView};

pub const ROWS_PER_PAGE: usize = 12;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRow {
    pub department: String,
    pub status: EntryStatus,
    pub approved_by: String,
    pub decided_at: Option<DateTime<Utc>>,
    pub comment: Option<String>,
}

/// Read-only projection of an approved request, paginated for rendering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSnapshot {
    pub institution_name: String,
    pub request_id: RequestId,
    pub student_name: String,
    pub student_email: String,
    pub submitted_at: DateTime<Utc>,
    pub final_approval_at: Option<DateTime<Utc>>,
    pub pages: Vec<Vec<CertificateRow>>,
    pub generated_at: DateTime<Utc>,
}

impl CertificateSnapshot {
    pub fn from_view(
        view: &RequestView,
        institution_name: impl Into<String>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let rows: Vec<CertificateRow> = view
            .entries
            .iter()
            .map(|entry| CertificateRow {
                department: entry.department_name.clone(),
                status: entry.status,
                approved_by: entry
                    .approved_by
                    .as_ref()
                    .map(|approver| approver.name.clone())
                    .unwrap_or_else(|| "N/A".to_string()),
                decided_at: entry.decided_at,
                comment: Some(entry.comment.trim())
                    .filter(|comment| !comment.is_empty())
                    .map(str::to_owned),
            })
            .collect();

        Self {
            institution_name: institution_name.into(),
            request_id: view.id.clone(),
            student_name: view.student.name.clone(),
            student_email: view.student.email.clone(),
            submitted_at: view.created_at,
            final_approval_at: view.final_approval_at,
            pages: rows.chunks(ROWS_PER_PAGE).map(<[CertificateRow]>::to_vec).collect(),
            generated_at,
        }
    }

    pub fn row_count(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    /// `clearance_certificate_<sanitized-name>_<request-id>.<extension>`
    pub fn file_name(&self, extension: &str) -> String {
        let sanitized: String = self
            .student_name
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() { ch.to_ascii_lowercase() } else { '_' })
            .collect();
        format!("clearance_certificate_{sanitized}_{}.{extension}", self.request_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(String),
    #[error("conversion failed: {0}")]
    Conversion(String),
}

/// Turns a certificate snapshot into a downloadable artifact. Implementations
/// must not depend on anything but the snapshot.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, snapshot: &CertificateSnapshot) -> Result<Document, RenderError>;
}
