use std::io;

use thiserror::Error;

use crate::{gate::TransportError, query::FilterError, range::RangeError};

pub type Result<T> = std::result::Result<T, DashboardError>;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The envelope's own `StatusCode` reported a failure.
    #[error("server reported status {status_code}: {message}")]
    Application { status_code: u16, message: String },

    #[error("login rejected with status {status_code}")]
    LoginRejected {
        status_code: u16,
        message: Option<String>,
    },

    #[error("unexpected response payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("file error: {0}")]
    Io(#[from] io::Error),

    #[error("workbook error: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),
}

impl DashboardError {
    /// Failures the request gate already answered with a forced logout.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, DashboardError::Transport(err) if err.forces_logout())
    }
}
