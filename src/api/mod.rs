pub mod models;

use reqwest::{
    Url,
    header::{ACCEPT, HeaderValue},
};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

pub use models::{
    AsFilterOption, AuditEvent, Company, Envelope, EventType, Functionality, StoreLocation,
    to_options,
};

use crate::{
    error::{DashboardError, Result},
    gate::{ApiRequest, SessionGate, Transport, TransportError},
    query::QueryParameters,
};
use models::{LoginFailure, LoginRequest, LoginResponse};

const AUDIT_EVENTS_PATH: &str = "/api/audit-events";

/// Service roots, validated once and stored without trailing slashes.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base_url: String,
    login_path: String,
    audit_url: String,
}

impl Endpoints {
    pub fn new(base_url: &str, login_path: &str, audit_url: &str) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        let audit_url = audit_url.trim().trim_end_matches('/').to_string();
        parse_url(&base_url)?;
        parse_url(&audit_url)?;

        let login_path = login_path.trim().trim_end_matches('/');
        let login_path = if login_path.is_empty() || login_path.starts_with('/') {
            login_path.to_string()
        } else {
            format!("/{login_path}")
        };

        Ok(Self {
            base_url,
            login_path,
            audit_url,
        })
    }

    pub fn login_url(&self) -> Result<Url> {
        parse_url(&format!("{}{}/login", self.base_url, self.login_path))
    }

    pub fn logout_url(&self) -> Result<Url> {
        parse_url(&format!("{}/logout", self.base_url))
    }

    pub fn audit_url(&self, endpoint: &str) -> Result<Url> {
        parse_url(&format!("{}{}/{}", self.audit_url, AUDIT_EVENTS_PATH, endpoint))
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|err| DashboardError::InvalidUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })
}

/// Rows returned by a search. A `StatusCode` of 400 still carries rows,
/// together with the server's warning text.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub events: Vec<AuditEvent>,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum RowsField {
    Data,
    Events,
}

impl<T> Envelope<T> {
    fn into_rows(self, field: RowsField) -> Result<Vec<T>> {
        if self.status_code != 200 {
            return Err(DashboardError::Application {
                status_code: self.status_code,
                message: self
                    .message
                    .unwrap_or_else(|| format!("request failed with status {}", self.status_code)),
            });
        }
        let rows = match field {
            RowsField::Data => self.data,
            RowsField::Events => self.events,
        };
        Ok(rows.unwrap_or_default())
    }
}

/// Typed client for the audit and login services. Every call goes through
/// the session gate.
pub struct AuditApi<T> {
    gate: SessionGate<T>,
    endpoints: Endpoints,
}

impl<T: Transport> AuditApi<T> {
    pub fn new(gate: SessionGate<T>, endpoints: Endpoints) -> Self {
        Self { gate, endpoints }
    }

    pub fn gate(&self) -> &SessionGate<T> {
        &self.gate
    }

    pub async fn companies(&self) -> Result<Vec<Company>> {
        let url = self.endpoints.audit_url("get-all-companies")?;
        self.fetch_rows(url, RowsField::Data).await
    }

    pub async fn store_locations(&self, company_id: &str) -> Result<Vec<StoreLocation>> {
        let mut url = self.endpoints.audit_url("get-storelocations-by-company")?;
        url.query_pairs_mut().append_pair("company_id", company_id);
        self.fetch_rows(url, RowsField::Data).await
    }

    pub async fn functionalities(&self) -> Result<Vec<Functionality>> {
        let url = self.endpoints.audit_url("get-all-auditfunctionalities")?;
        self.fetch_rows(url, RowsField::Data).await
    }

    pub async fn event_types(&self, functionality_name: &str) -> Result<Vec<EventType>> {
        let mut url = self
            .endpoints
            .audit_url("get-eventtypenames-by-functionalityname")?;
        url.query_pairs_mut()
            .append_pair("functionalityname", functionality_name);
        self.fetch_rows(url, RowsField::Events).await
    }

    pub async fn recent(&self) -> Result<Vec<AuditEvent>> {
        let url = self.endpoints.audit_url("recent")?;
        self.fetch_rows(url, RowsField::Events).await
    }

    pub async fn search(&self, params: &QueryParameters) -> Result<SearchOutcome> {
        let mut url = self.endpoints.audit_url("search")?;
        params.append_to(&mut url);

        let envelope: Envelope<AuditEvent> = self.get_json(url).await?;
        if envelope.status_code == 400 {
            let warning = envelope
                .message
                .unwrap_or_else(|| "search returned a warning".to_string());
            warn!(%warning, "search completed with warning");
            return Ok(SearchOutcome {
                events: envelope.events.unwrap_or_default(),
                warning: Some(warning),
            });
        }

        let events = envelope.into_rows(RowsField::Events)?;
        Ok(SearchOutcome {
            events,
            warning: None,
        })
    }

    /// The binary export request, with the bearer attached up front.
    pub fn export_request(&self, params: &QueryParameters) -> Result<ApiRequest> {
        let mut url = self.endpoints.audit_url("export")?;
        params.append_to(&mut url);

        let request =
            ApiRequest::get(url).with_header(ACCEPT, HeaderValue::from_static("*/*"));
        Ok(match self.gate.session().token() {
            Some(token) => request.with_bearer(&token),
            None => request,
        })
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let url = self.endpoints.login_url()?;
        let request = ApiRequest::post_json(url, &LoginRequest { username, password })?
            .with_header(ACCEPT, HeaderValue::from_static("application/json"));

        let response: LoginResponse = match self.gate.send(&request).await {
            Ok(response) => response.json()?,
            Err(TransportError::Status { status, body, .. }) => {
                warn!(%username, %status, "login rejected by login service");
                return Err(DashboardError::LoginRejected {
                    status_code: status.as_u16(),
                    message: serde_json::from_str::<LoginFailure>(&body)
                        .ok()
                        .and_then(|failure| failure.detail),
                });
            }
            Err(err) => return Err(err.into()),
        };
        match response.access_token.filter(|token| !token.is_empty()) {
            Some(token) if response.status_code == 200 => {
                self.gate.session().establish(&token)?;
                info!(%username, "logged in");
                Ok(())
            }
            _ => Err(DashboardError::LoginRejected {
                status_code: response.status_code,
                message: response.message,
            }),
        }
    }

    /// Ends the session server-side, then locally. The local session is
    /// cleared even when the server call fails.
    pub async fn logout(&self) -> Result<()> {
        let url = self.endpoints.logout_url()?;
        let result = self.gate.send(&ApiRequest::get(url)).await;
        if let Err(err) = &result {
            warn!(?err, "logout call failed, clearing local session anyway");
        }
        self.gate.session().clear();
        result.map(|_| ()).map_err(DashboardError::from)
    }

    async fn fetch_rows<R: DeserializeOwned>(&self, url: Url, field: RowsField) -> Result<Vec<R>> {
        let envelope: Envelope<R> = self.get_json(url).await?;
        envelope.into_rows(field)
    }

    async fn get_json<R: DeserializeOwned>(&self, url: Url) -> Result<R> {
        let request =
            ApiRequest::get(url).with_header(ACCEPT, HeaderValue::from_static("application/json"));
        let response = self.gate.send(&request).await?;
        Ok(response.json()?)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::Router;

    use super::*;
    use crate::{
        gate::HttpTransport,
        session::{ClientStorage, SessionContext},
    };

    /// Serve `router` on an ephemeral local port and return its base URL.
    pub async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("mock server");
        });
        format!("http://{addr}")
    }

    pub fn api_for(base: &str, token: Option<&str>) -> (AuditApi<HttpTransport>, Arc<SessionContext>) {
        let session = Arc::new(SessionContext::init(ClientStorage::in_memory()));
        if let Some(token) = token {
            session.establish(token).expect("establish");
        }
        let transport = HttpTransport::new(Duration::from_secs(5)).expect("http client");
        let gate = SessionGate::new(transport, session.clone());
        let endpoints = Endpoints::new(base, "/auth", base).expect("endpoints");
        (AuditApi::new(gate, endpoints), session)
    }
}
