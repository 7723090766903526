//! Certificate rendering: HTML via tera, converted to PDF by `wkhtmltopdf`
//! when it is installed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clearance_core::certificate::{CertificateSnapshot, Document, DocumentRenderer, RenderError};
use tera::{Context, Tera};
use tokio::process::Command;
use tracing::{error, info, warn};

const TEMPLATE_NAME: &str = "certificate.html.tera";
const EMBEDDED_TEMPLATE: &str =
    include_str!("../../../templates/certificate/certificate.html.tera");

/// `display_date`: formats an RFC 3339 timestamp as `12 Mar 2026`, or with
/// `time=true` as `12 Mar 2026 14:05 UTC`. Missing values render as `-`.
pub fn register_template_filters(tera: &mut Tera) {
    tera.register_filter("display_date", display_date_filter);
}

fn display_date_filter(
    value: &tera::Value,
    args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let raw = match value {
        tera::Value::Null => return Ok(tera::Value::String("-".to_string())),
        tera::Value::String(raw) => raw,
        other => return Err(tera::Error::msg(format!("display_date expects a string, got {other}"))),
    };
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|error| tera::Error::msg(format!("display_date: invalid timestamp `{raw}`: {error}")))?
        .with_timezone(&Utc);
    let with_time = args.get("time").and_then(tera::Value::as_bool).unwrap_or(false);
    let pattern = if with_time { "%d %b %Y %H:%M UTC" } else { "%d %b %Y" };
    Ok(tera::Value::String(parsed.format(pattern).to_string()))
}

pub struct TeraCertificateRenderer {
    tera: Tera,
    wkhtmltopdf_path: Option<PathBuf>,
}

impl TeraCertificateRenderer {
    /// Loads `certificate.html.tera` from `template_dir` when given, otherwise
    /// uses the embedded template.
    pub fn new(template_dir: Option<&Path>) -> Result<Self, RenderError> {
        let mut renderer = match template_dir {
            Some(dir) => {
                let pattern = format!("{}/**/*", dir.display());
                let mut tera =
                    Tera::new(&pattern).map_err(|e| RenderError::Template(e.to_string()))?;
                if !tera.get_template_names().any(|name| name == TEMPLATE_NAME) {
                    return Err(RenderError::Template(format!(
                        "`{TEMPLATE_NAME}` not found under {}",
                        dir.display()
                    )));
                }
                register_template_filters(&mut tera);
                Self { tera, wkhtmltopdf_path: None }
            }
            None => Self::html_only()?,
        };

        renderer.wkhtmltopdf_path = which::which("wkhtmltopdf").ok();
        match &renderer.wkhtmltopdf_path {
            Some(path) => info!(
                event_name = "system.certificate.converter_found",
                correlation_id = "bootstrap",
                path = %path.display(),
                "wkhtmltopdf found"
            ),
            None => warn!(
                event_name = "system.certificate.converter_missing",
                correlation_id = "bootstrap",
                "wkhtmltopdf not found in PATH - certificates will be served as HTML"
            ),
        }

        Ok(renderer)
    }

    /// HTML-only renderer over the embedded template.
    pub fn html_only() -> Result<Self, RenderError> {
        let mut tera = embedded_tera()?;
        register_template_filters(&mut tera);
        Ok(Self { tera, wkhtmltopdf_path: None })
    }

    pub fn render_html(&self, snapshot: &CertificateSnapshot) -> Result<String, RenderError> {
        let mut context = Context::new();
        context.insert("certificate", snapshot);
        self.tera.render(TEMPLATE_NAME, &context).map_err(|e| RenderError::Template(e.to_string()))
    }

    async fn convert_html_to_pdf(
        &self,
        html: &str,
        wkhtmltopdf_path: &Path,
    ) -> Result<Vec<u8>, RenderError> {
        let temp_dir = std::env::temp_dir();
        let stem = uuid::Uuid::new_v4();
        let html_path = temp_dir.join(format!("certificate_{stem}.html"));
        let pdf_path = temp_dir.join(format!("certificate_{stem}.pdf"));

        tokio::fs::write(&html_path, html)
            .await
            .map_err(|e| RenderError::Conversion(e.to_string()))?;

        let output = Command::new(wkhtmltopdf_path)
            .args(["--page-size", "A4", "--encoding", "utf-8", "--quiet"])
            .args(["--margin-top", "10mm", "--margin-bottom", "10mm"])
            .args(["--margin-left", "10mm", "--margin-right", "10mm"])
            .arg(&html_path)
            .arg(&pdf_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let result = match output {
            Ok(output) if output.status.success() => tokio::fs::read(&pdf_path)
                .await
                .map_err(|e| RenderError::Conversion(e.to_string())),
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                error!(event_name = "clearance.certificate.conversion_failed", stderr = %stderr, "wkhtmltopdf failed");
                Err(RenderError::Conversion(stderr))
            }
            Err(e) => Err(RenderError::Conversion(e.to_string())),
        };

        let _ = tokio::fs::remove_file(&html_path).await;
        let _ = tokio::fs::remove_file(&pdf_path).await;
        result
    }
}

fn embedded_tera() -> Result<Tera, RenderError> {
    let mut tera = Tera::default();
    tera.add_raw_template(TEMPLATE_NAME, EMBEDDED_TEMPLATE)
        .map_err(|e| RenderError::Template(e.to_string()))?;
    Ok(tera)
}

#[async_trait]
impl DocumentRenderer for TeraCertificateRenderer {
    async fn render(&self, snapshot: &CertificateSnapshot) -> Result<Document, RenderError> {
        let html = self.render_html(snapshot)?;

        if let Some(wkhtmltopdf) = &self.wkhtmltopdf_path {
            match self.convert_html_to_pdf(&html, wkhtmltopdf).await {
                Ok(bytes) => {
                    return Ok(Document {
                        file_name: snapshot.file_name("pdf"),
                        content_type: "application/pdf".to_string(),
                        bytes,
                    })
                }
                Err(e) => warn!(
                    event_name = "clearance.certificate.html_fallback",
                    request_id = %snapshot.request_id,
                    error = %e,
                    "PDF conversion failed, falling back to HTML"
                ),
            }
        }

        Ok(Document {
            file_name: snapshot.file_name("html"),
            content_type: "text/html; charset=utf-8".to_string(),
            bytes: html.into_bytes(),
        })
    }
}
