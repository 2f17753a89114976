use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode, Url};
use secrecy::ExposeSecret;

use super::Transport;
use crate::error::{ConfigError, RequestError, TransportError};
use crate::session::{Credentials, SessionConfig};

const OCTET_STREAM: &str = "application/octet-stream";

/// HTTP Transport Adapter: `POST {base}{path}` with an opaque binary body.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base: Url,
    auth: Option<Credentials>,
}

impl HttpTransport {
    /// Build a transport for the configured endpoint, credentials and timeouts.
    pub fn from_config(config: &SessionConfig) -> Result<Self, ConfigError> {
        let base = Url::parse(&config.url).map_err(|e| ConfigError::InvalidUrl {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            base,
            auth: config.auth.clone(),
        })
    }

    /// Base URL every path is joined onto (always ends with `/`).
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Liveness probe: `GET {base}`. Returns `Ok(true)` once the server answers 200.
    pub async fn probe(&self) -> Result<bool, TransportError> {
        let request = self.authorize(self.client.get(self.base.clone()));
        let response = request
            .send()
            .await
            .map_err(|e| classify(self.base.as_str(), e))?;
        Ok(response.status() == StatusCode::OK)
    }

    fn join(&self, path: &str) -> Result<Url, TransportError> {
        self.base.join(path).map_err(|e| TransportError::Connect {
            url: format!("{}{path}", self.base),
            message: e.to_string(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some(Credentials::Bearer(token)) => request.bearer_auth(token.expose_secret()),
            Some(Credentials::Basic { user, password }) => {
                request.basic_auth(user, Some(password.expose_secret()))
            }
            None => request,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, path: &str, payload: Bytes) -> Result<Bytes, TransportError> {
        let url = self.join(path)?;
        let request_len = payload.len();

        let request = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, OCTET_STREAM)
            .header(ACCEPT, OCTET_STREAM)
            .body(payload);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| classify(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.map_err(|e| TransportError::Body {
                url: url.to_string(),
                message: e.to_string(),
            })?;
            let err = RequestError::from_body(status.as_u16(), &body);
            tracing::debug!(
                %url,
                status = status.as_u16(),
                code = %err.code,
                "server rejected request"
            );
            return Err(err.into());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify(url.as_str(), e))?;
        tracing::trace!(%url, request_len, response_len = body.len(), "exchange complete");
        Ok(body)
    }
}

fn classify(url: &str, e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else if e.is_body() || e.is_decode() {
        TransportError::Body {
            url: url.to_string(),
            message: e.to_string(),
        }
    } else {
        TransportError::Connect {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}
