use std::{future::Future, sync::Arc, time::Duration};

use reqwest::{
    Client, Method, StatusCode, Url,
    header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::session::SessionContext;

const BODY_PREVIEW_LIMIT: usize = 500;

/// Outbound request as seen by the gate. Cloned, never mutated in place.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn post_json<T: Serialize>(url: Url, payload: &T) -> serde_json::Result<Self> {
        let body = serde_json::to_vec(payload)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        Ok(Self {
            method: Method::POST,
            url,
            headers,
            body: Some(body),
        })
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_bearer(self, token: &str) -> Self {
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.with_header(AUTHORIZATION, value)
            }
            Err(_) => {
                warn!("session token contains characters not allowed in a header; sending without it");
                self
            }
        }
    }

    /// The bearer token carried by this request, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn header_str(&self, name: HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed with status {status}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("could not reach {url}: {reason}")]
    Unreachable { url: String, reason: String },
}

impl TransportError {
    /// Transport status; `0` when no response was received at all.
    pub fn status_code(&self) -> u16 {
        match self {
            TransportError::Status { status, .. } => status.as_u16(),
            TransportError::Unreachable { .. } => 0,
        }
    }

    /// Unauthorized and unreachable are both treated as a lost session.
    pub fn forces_logout(&self) -> bool {
        matches!(self.status_code(), 401 | 0)
    }
}

/// The wire underneath the gate. Non-2xx responses are reported as errors.
pub trait Transport {
    fn send(
        &self,
        request: ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, TransportError>>;
}

#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = request.url.to_string();
        let mut builder = self
            .http
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| TransportError::Unreachable {
                url: url.clone(),
                reason: err.to_string(),
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::Unreachable {
                url: url.clone(),
                reason: format!("failed to read response body: {err}"),
            })?
            .to_vec();

        if !status.is_success() {
            return Err(TransportError::Status {
                url,
                status,
                body: body_preview(&body),
            });
        }

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

fn body_preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() > BODY_PREVIEW_LIMIT {
        let cut = (0..=BODY_PREVIEW_LIMIT)
            .rev()
            .find(|idx| text.is_char_boundary(*idx))
            .unwrap_or(0);
        format!("{}...", &text[..cut])
    } else {
        text.into_owned()
    }
}

/// Middleware every outbound call goes through: attaches the session bearer
/// and tears the session down when the transport reports 401 or status 0.
pub struct SessionGate<T> {
    transport: T,
    session: Arc<SessionContext>,
}

impl<T: Transport> SessionGate<T> {
    pub fn new(transport: T, session: Arc<SessionContext>) -> Self {
        Self { transport, session }
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    /// Clone of `request` carrying the current bearer, if a session exists.
    pub fn authorize(&self, request: &ApiRequest) -> ApiRequest {
        let outbound = request.clone();
        match self.session.token() {
            Some(token) => outbound.with_bearer(&token),
            None => outbound,
        }
    }

    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let request_id = Uuid::new_v4();
        let outbound = self.authorize(request);
        debug!(
            %request_id,
            method = %outbound.method,
            url = %outbound.url,
            authenticated = outbound.bearer().is_some(),
            "sending request"
        );

        match self.transport.send(outbound).await {
            Ok(response) => {
                debug!(%request_id, status = %response.status, "request completed");
                Ok(response)
            }
            Err(err) => {
                if err.forces_logout() {
                    warn!(
                        %request_id,
                        status = err.status_code(),
                        "authentication lost, clearing session"
                    );
                    self.session.clear();
                }
                Err(err)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::session::{ClientStorage, View};

    fn url() -> Url {
        Url::parse("http://audit.test/api/audit-events/recent").expect("url")
    }

    fn session_with_token(token: &str) -> Arc<SessionContext> {
        let session = SessionContext::init(ClientStorage::in_memory());
        session.establish(token).expect("establish");
        Arc::new(session)
    }

    #[tokio::test]
    async fn attaches_bearer_without_touching_caller_request() {
        let gate = SessionGate::new(ScriptedTransport::default(), session_with_token("tok-1"));
        let request = ApiRequest::get(url());

        gate.send(&request).await.expect("send");

        assert!(request.headers.get(AUTHORIZATION).is_none());
        let sent = gate.transport.sent.borrow();
        assert_eq!(sent[0].bearer(), Some("tok-1"));
    }

    #[tokio::test]
    async fn no_session_means_no_authorization_header() {
        let session = Arc::new(SessionContext::init(ClientStorage::in_memory()));
        let gate = SessionGate::new(ScriptedTransport::default(), session);

        gate.send(&ApiRequest::get(url())).await.expect("send");

        assert!(gate.transport.sent.borrow()[0].bearer().is_none());
    }

    #[tokio::test]
    async fn unauthorized_clears_session_and_next_request_is_anonymous() {
        let session = session_with_token("tok-1");
        let mut view = session.subscribe();
        let transport =
            ScriptedTransport::default().reply(Err(status_error(StatusCode::UNAUTHORIZED)));
        let gate = SessionGate::new(transport, session.clone());

        let err = gate.send(&ApiRequest::get(url())).await.unwrap_err();
        assert_eq!(err.status_code(), 401);
        assert!(session.token().is_none());
        assert_eq!(*view.borrow_and_update(), View::Login);

        gate.send(&ApiRequest::get(url())).await.expect("second send");
        let sent = gate.transport.sent.borrow();
        assert_eq!(sent[0].bearer(), Some("tok-1"));
        assert!(sent[1].bearer().is_none());
    }

    #[tokio::test]
    async fn unreachable_is_treated_like_unauthorized() {
        let session = session_with_token("tok-1");
        let gate = SessionGate::new(ScriptedTransport::default().reply(Err(unreachable())), session.clone());

        let err = gate.send(&ApiRequest::get(url())).await.unwrap_err();

        assert_eq!(err.status_code(), 0);
        assert!(!session.is_authenticated());
        assert_eq!(session.current_view(), View::Login);
    }

    #[tokio::test]
    async fn other_failures_pass_through_untouched() {
        let session = session_with_token("tok-1");
        let transport =
            ScriptedTransport::default().reply(Err(status_error(StatusCode::INTERNAL_SERVER_ERROR)));
        let gate = SessionGate::new(transport, session.clone());

        let err = gate.send(&ApiRequest::get(url())).await.unwrap_err();

        assert!(matches!(
            err,
            TransportError::Status { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
        assert_eq!(session.token().as_deref(), Some("tok-1"));
        assert_eq!(session.current_view(), View::Dashboard);
    }

    #[test]
    fn forbidden_does_not_force_logout() {
        assert!(!status_error(StatusCode::FORBIDDEN).forces_logout());
        assert!(status_error(StatusCode::UNAUTHORIZED).forces_logout());
    }

    #[test]
    fn body_preview_truncates_on_char_boundary() {
        let body = "é".repeat(400);
        let preview = body_preview(body.as_bytes());
        assert!(preview.ends_with("..."));
        assert!(preview.len() <= BODY_PREVIEW_LIMIT + 3);
    }
}
