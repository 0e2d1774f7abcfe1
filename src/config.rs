use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow};

use crate::api::Endpoints;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Runtime settings, read from the environment after `.env` is loaded.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub endpoints: Endpoints,
    pub storage_path: PathBuf,
    pub download_dir: PathBuf,
    pub timeout: Duration,
}

impl DashboardConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let base_url =
            var("DASHBOARD_BASE_URL").context("DASHBOARD_BASE_URL env var is missing")?;
        let audit_url =
            var("DASHBOARD_AUDIT_URL").context("DASHBOARD_AUDIT_URL env var is missing")?;
        let login_path = var("DASHBOARD_LOGIN_PATH").unwrap_or_default();
        let endpoints = Endpoints::new(&base_url, &login_path, &audit_url)
            .context("invalid dashboard service url")?;

        let storage_path = match var("DASHBOARD_STORAGE_PATH") {
            Some(path) => PathBuf::from(path),
            None => default_storage_path()?,
        };
        let download_dir = var("DASHBOARD_DOWNLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let timeout_secs = match var("DASHBOARD_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("DASHBOARD_TIMEOUT_SECS is not a number: {raw}"))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            endpoints,
            storage_path,
            download_dir,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn default_storage_path() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| anyhow!("no config directory; set DASHBOARD_STORAGE_PATH"))?;
    Ok(base.join("audit-console").join("storage.json"))
}
