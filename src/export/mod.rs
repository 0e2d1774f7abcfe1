use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use sanitize_filename::sanitize;
use tracing::{info, warn};

use crate::{
    error::Result,
    gate::{ApiRequest, SessionGate, Transport},
};

pub const DEFAULT_EXPORT_FILENAME: &str = "Audit-export.xlsx";
const MAX_NAME_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Saved { path: PathBuf, bytes: usize },
    /// The server answered with a web page instead of a file.
    DiscardedHtml { content_type: String },
}

/// Fetches an export through the gate and saves the payload into a
/// download directory.
#[derive(Debug, Clone)]
pub struct ExportPipeline {
    download_dir: PathBuf,
    default_filename: String,
}

impl ExportPipeline {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            default_filename: DEFAULT_EXPORT_FILENAME.to_string(),
        }
    }

    pub async fn run<T: Transport>(
        &self,
        gate: &SessionGate<T>,
        request: &ApiRequest,
    ) -> Result<ExportOutcome> {
        let response = gate.send(request).await?;

        let content_type = response.header_str(CONTENT_TYPE).unwrap_or_default();
        if is_html(content_type) {
            warn!(
                %content_type,
                bytes = response.body.len(),
                "export returned an html page instead of a file, discarding"
            );
            return Ok(ExportOutcome::DiscardedHtml {
                content_type: content_type.to_string(),
            });
        }

        let filename = response
            .header_str(CONTENT_DISPOSITION)
            .and_then(filename_from_disposition)
            .map(|name| sanitize(name))
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.default_filename.clone());

        let path = self.save(&filename, &response.body)?;
        info!(file = %path.display(), bytes = response.body.len(), "export saved");

        Ok(ExportOutcome::Saved {
            path,
            bytes: response.body.len(),
        })
    }

    /// Write into a temporary file first; it is removed on any early return
    /// and only renamed into place once fully written.
    fn save(&self, filename: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.download_dir)?;

        let mut handle = tempfile::Builder::new()
            .prefix(".export-")
            .suffix(".part")
            .tempfile_in(&self.download_dir)?;
        handle.write_all(bytes)?;
        handle.as_file().sync_all()?;

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let target = self.download_dir.join(numbered_name(filename, attempt));
            match handle.persist_noclobber(&target) {
                Ok(_) => return Ok(target),
                Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => handle = err.file,
                Err(err) => return Err(err.error),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free file name for {filename}"),
        ))
    }
}

pub fn is_html(content_type: &str) -> bool {
    match content_type.parse::<mime::Mime>() {
        Ok(parsed) => parsed.type_() == mime::TEXT && parsed.subtype() == mime::HTML,
        Err(_) => content_type.to_ascii_lowercase().contains("text/html"),
    }
}

/// Extract the `filename` token, quoted or bare.
pub fn filename_from_disposition(header: &str) -> Option<&str> {
    let start = header.to_ascii_lowercase().find("filename=")? + "filename=".len();
    let rest = header[start..].trim_start();
    let name = match rest.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next()?,
        None => rest.split(';').next()?,
    };
    Some(name.trim()).filter(|name| !name.is_empty())
}

fn numbered_name(filename: &str, attempt: usize) -> String {
    if attempt == 0 {
        return filename.to_string();
    }
    match filename.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => format!("{stem}_{attempt}.{extension}"),
        _ => format!("{filename}_{attempt}"),
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Arc};

    use reqwest::{
        StatusCode, Url,
        header::{HeaderMap, HeaderValue},
    };
    use tempfile::tempdir;

    use super::*;
    use crate::{
        error::DashboardError,
        gate::{
            ApiResponse,
            testing::{ScriptedTransport, status_error},
        },
        session::{ClientStorage, SessionContext},
    };

    fn response(content_type: &str, disposition: Option<&str>, body: &[u8]) -> ApiResponse {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        if let Some(disposition) = disposition {
            headers.insert(CONTENT_DISPOSITION, HeaderValue::from_str(disposition).unwrap());
        }
        ApiResponse {
            status: StatusCode::OK,
            headers,
            body: body.to_vec(),
        }
    }

    fn gate(transport: ScriptedTransport) -> SessionGate<ScriptedTransport> {
        let session = SessionContext::init(ClientStorage::in_memory());
        session.establish("tok").unwrap();
        SessionGate::new(transport, Arc::new(session))
    }

    fn request() -> ApiRequest {
        ApiRequest::get(Url::parse("http://audit.test/api/audit-events/export?recent=true").unwrap())
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    const XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

    #[tokio::test]
    async fn html_payload_produces_no_file() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::default().reply(Ok(response(
            "text/html; charset=utf-8",
            None,
            b"<html>login</html>",
        )));
        let pipeline = ExportPipeline::new(dir.path());

        let outcome = pipeline.run(&gate(transport), &request()).await.unwrap();

        assert!(matches!(outcome, ExportOutcome::DiscardedHtml { .. }));
        assert!(entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn saves_under_server_filename() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::default().reply(Ok(response(
            XLSX,
            Some("attachment; filename=audit_events_search_06152024_101500.xlsx"),
            b"PK\x03\x04data",
        )));
        let pipeline = ExportPipeline::new(dir.path());

        let outcome = pipeline.run(&gate(transport), &request()).await.unwrap();

        let expected = dir.path().join("audit_events_search_06152024_101500.xlsx");
        assert_eq!(
            outcome,
            ExportOutcome::Saved {
                path: expected.clone(),
                bytes: 8
            }
        );
        assert_eq!(fs::read(expected).unwrap(), b"PK\x03\x04data");
        assert_eq!(entries(dir.path()).len(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_default_name_and_avoids_overwrite() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(DEFAULT_EXPORT_FILENAME), b"older").unwrap();
        let transport = ScriptedTransport::default().reply(Ok(response(XLSX, None, b"newer")));
        let pipeline = ExportPipeline::new(dir.path());

        let outcome = pipeline.run(&gate(transport), &request()).await.unwrap();

        let ExportOutcome::Saved { path, .. } = outcome else {
            panic!("expected a saved file");
        };
        assert_eq!(path, dir.path().join("Audit-export_1.xlsx"));
        assert_eq!(fs::read(dir.path().join(DEFAULT_EXPORT_FILENAME)).unwrap(), b"older");
        assert_eq!(entries(dir.path()), ["Audit-export.xlsx", "Audit-export_1.xlsx"]);
    }

    #[tokio::test]
    async fn hostile_filename_stays_in_download_dir() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::default().reply(Ok(response(
            XLSX,
            Some("attachment; filename=\"../../etc/passwd\""),
            b"x",
        )));
        let pipeline = ExportPipeline::new(dir.path());

        let outcome = pipeline.run(&gate(transport), &request()).await.unwrap();

        let ExportOutcome::Saved { path, .. } = outcome else {
            panic!("expected a saved file");
        };
        assert_eq!(path.parent(), Some(dir.path()));
    }

    #[tokio::test]
    async fn auth_failure_leaves_no_file_and_clears_session() {
        let dir = tempdir().unwrap();
        let transport =
            ScriptedTransport::default().reply(Err(status_error(StatusCode::UNAUTHORIZED)));
        let gate = gate(transport);
        let pipeline = ExportPipeline::new(dir.path());

        let err = pipeline.run(&gate, &request()).await.unwrap_err();

        assert!(matches!(err, DashboardError::Transport(_)));
        assert!(err.is_auth_failure());
        assert!(!gate.session().is_authenticated());
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn disposition_parsing() {
        assert_eq!(
            filename_from_disposition("attachment; filename=\"report 1.xlsx\""),
            Some("report 1.xlsx")
        );
        assert_eq!(
            filename_from_disposition("attachment; FILENAME=plain.xlsx; size=10"),
            Some("plain.xlsx")
        );
        assert_eq!(filename_from_disposition("attachment; filename=\"\""), None);
        assert_eq!(filename_from_disposition("attachment"), None);
    }

    #[test]
    fn html_detection() {
        assert!(is_html("text/html"));
        assert!(is_html("TEXT/HTML; charset=UTF-8"));
        assert!(!is_html(XLSX));
        assert!(!is_html(""));
    }

    #[test]
    fn numbered_names() {
        assert_eq!(numbered_name("a.xlsx", 0), "a.xlsx");
        assert_eq!(numbered_name("a.b.xlsx", 2), "a.b_2.xlsx");
        assert_eq!(numbered_name("README", 1), "README_1");
    }
}
