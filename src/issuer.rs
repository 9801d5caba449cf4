//! Issue a single request and classify how it ended.
//!
//! A [`RequestIssuer`] sends one request to the fixed target, passing the simulated
//! processing time as a `delay=<seconds>` query parameter so the application under test
//! can sleep that long before answering. Transport errors never escape: every call
//! resolves to a [`RequestOutcome`].

use async_trait::async_trait;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use strum_macros::{Display, EnumIter, EnumString};
use url::Url;

use crate::StampedeError;

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// HTTP methods used by a load run, in the order each scenario runs them.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        }
    }
}

/// How a single request ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The server answered with a status accepted as a success.
    Success {
        status_code: u16,
        status_text: String,
    },
    /// The server answered with a failure status.
    ErrorResponse {
        status_code: u16,
        status_text: String,
    },
    /// The request was sent but no response arrived: refused, reset or timed out.
    NoResponse,
    /// The request could not be built or sent at all.
    RequestError,
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Success { .. })
    }

    /// The category label used for run-length encoded reporting.
    pub fn label(&self) -> String {
        match self {
            RequestOutcome::Success {
                status_code,
                status_text,
            }
            | RequestOutcome::ErrorResponse {
                status_code,
                status_text,
            } => format!("{} {}", status_code, status_text),
            RequestOutcome::NoResponse => "no response".to_string(),
            RequestOutcome::RequestError => "error".to_string(),
        }
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The status line of a response received from the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub status_text: String,
}

impl TransportResponse {
    /// Build a response using the canonical reason phrase of the status code.
    pub fn from_status(status: StatusCode) -> TransportResponse {
        TransportResponse::with_reason(status, None)
    }

    /// Build a response using the reason phrase the server sent, if any.
    ///
    /// Servers may send their own phrase, nginx answers `503 Service Temporarily
    /// Unavailable` for example. Without one, the canonical phrase is used.
    pub fn with_reason(status: StatusCode, reason: Option<&[u8]>) -> TransportResponse {
        let status_text = match reason {
            Some(reason) if !reason.is_empty() => String::from_utf8_lossy(reason).into_owned(),
            _ => status.canonical_reason().unwrap_or("Unknown").to_string(),
        };
        TransportResponse {
            status,
            status_text,
        }
    }
}

/// Why a transport failed to produce a response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// The request went out but nothing came back.
    NoResponse(String),
    /// The request could not be dispatched.
    Send(String),
}

/// The HTTP capability a [`RequestIssuer`] needs.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        method: HttpMethod,
        url: Url,
    ) -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by a shared [`reqwest::Client`].
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build the client. With no timeout a request waits for as long as the server
    /// takes to answer.
    pub fn new(timeout: Option<Duration>) -> Result<ReqwestTransport, StampedeError> {
        let mut builder = reqwest::Client::builder().user_agent(APP_USER_AGENT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(ReqwestTransport {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        method: HttpMethod,
        url: Url,
    ) -> Result<TransportResponse, TransportError> {
        let request = self
            .client
            .request(method.into(), url)
            .build()
            .map_err(|e| TransportError::Send(e.to_string()))?;

        match self.client.execute(request).await {
            Ok(response) => {
                let status = TransportResponse::with_reason(
                    response.status(),
                    response
                        .extensions()
                        .get::<hyper::ext::ReasonPhrase>()
                        .map(|reason| reason.as_bytes()),
                );
                // Drain the body so the connection can be reused.
                if let Err(e) = response.bytes().await {
                    debug!("failed to read response body: {}", e);
                }
                Ok(status)
            }
            Err(e) if e.is_builder() => Err(TransportError::Send(e.to_string())),
            Err(e) => Err(TransportError::NoResponse(e.to_string())),
        }
    }
}

/// Decides which status codes count as a success.
pub type SuccessPredicate = Arc<dyn Fn(StatusCode) -> bool + Send + Sync>;

/// Default success predicate: 2xx and 3xx responses.
pub fn default_success(status: StatusCode) -> bool {
    status.is_success() || status.is_redirection()
}

/// Sends requests to one fixed target and classifies the outcome.
pub struct RequestIssuer {
    transport: Arc<dyn Transport>,
    target: Url,
    is_success: SuccessPredicate,
}

impl RequestIssuer {
    pub fn new<T: Transport + 'static>(
        transport: T,
        target: &str,
    ) -> Result<RequestIssuer, StampedeError> {
        let target = Url::parse(target).map_err(|parse_error| StampedeError::InvalidHost {
            host: target.to_string(),
            detail: "Invalid target.".to_string(),
            parse_error,
        })?;

        Ok(RequestIssuer {
            transport: Arc::new(transport),
            target,
            is_success: Arc::new(default_success),
        })
    }

    /// Replace the predicate deciding which status codes are a success.
    pub fn with_success_predicate<F>(mut self, is_success: F) -> Self
    where
        F: Fn(StatusCode) -> bool + Send + Sync + 'static,
    {
        self.is_success = Arc::new(is_success);
        self
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// The target with `delay=<seconds>` appended to its query string.
    pub fn build_url(&self, delay: f64) -> Url {
        let mut url = self.target.clone();
        url.query_pairs_mut().append_pair("delay", &delay.to_string());
        url
    }

    /// Send one request and classify the result.
    pub async fn issue(&self, method: HttpMethod, delay: f64) -> RequestOutcome {
        if !delay.is_finite() || delay < 0.0 {
            debug!("refusing to send {} with delay {}", method, delay);
            return RequestOutcome::RequestError;
        }

        let url = self.build_url(delay);
        match self.transport.send(method, url).await {
            Ok(response) => {
                let status_code = response.status.as_u16();
                let status_text = response.status_text;
                if (self.is_success)(response.status) {
                    RequestOutcome::Success {
                        status_code,
                        status_text,
                    }
                } else {
                    RequestOutcome::ErrorResponse {
                        status_code,
                        status_text,
                    }
                }
            }
            Err(TransportError::NoResponse(e)) => {
                debug!("{} {}: no response: {}", method, self.target, e);
                RequestOutcome::NoResponse
            }
            Err(TransportError::Send(e)) => {
                debug!("{} {}: failed to send: {}", method, self.target, e);
                RequestOutcome::RequestError
            }
        }
    }
}

impl fmt::Debug for RequestIssuer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RequestIssuer")
            .field("target", &self.target.as_str())
            .finish()
    }
}
