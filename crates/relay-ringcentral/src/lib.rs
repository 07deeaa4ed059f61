//! # RingCentral backend
//!
//! [`RingCentralAuth`] exchanges a JWT assertion or a refresh token for a bearer
//! credential, and [`RingCentralClient`] sends SMS with it.

use async_trait::async_trait;
use relay_core::{
    CredentialError, SendRequest, SendResponse, Service, SmsClient, SmsError, TokenGrant,
    TokenSource,
};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

const PROVIDER: &str = "ringcentral";
pub const DEFAULT_SERVER_URL: &str = "https://platform.ringcentral.com";
const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Explicit timeout for the default HTTP client.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

fn default_http() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// Long-lived secret exchanged for an access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RingCentralGrant {
    /// JWT credential issued in the developer console.
    Jwt(String),
    /// OAuth refresh token; rotated on every exchange.
    RefreshToken(String),
}

/// RingCentral OAuth token source.
pub struct RingCentralAuth {
    client_id: String,
    client_secret: String,
    base_url: String,
    grant: Mutex<RingCentralGrant>,
    http: reqwest::Client,
}

impl RingCentralAuth {
    pub fn new<S: Into<String>>(client_id: S, client_secret: S, grant: RingCentralGrant) -> Self {
        Self::with_base_url(client_id, client_secret, grant, DEFAULT_SERVER_URL.to_string())
    }

    pub fn with_base_url<S: Into<String>>(
        client_id: S,
        client_secret: S,
        grant: RingCentralGrant,
        base_url: String,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            base_url,
            grant: Mutex::new(grant),
            http: default_http(),
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Current grant, reflecting any refresh-token rotation.
    pub fn grant(&self) -> RingCentralGrant {
        self.grant
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn form(&self) -> Vec<(&'static str, String)> {
        match self.grant() {
            RingCentralGrant::Jwt(assertion) => vec![
                ("grant_type", JWT_GRANT_TYPE.to_string()),
                ("assertion", assertion),
            ],
            RingCentralGrant::RefreshToken(token) => vec![
                ("grant_type", "refresh_token".to_string()),
                ("refresh_token", token),
            ],
        }
    }
}

impl std::fmt::Debug for RingCentralAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingCentralAuth")
            .field("client_id", &self.client_id)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for RingCentralAuth {
    fn service(&self) -> Service {
        Service::Telephony
    }

    async fn fetch_token(&self) -> Result<TokenGrant, CredentialError> {
        let url = format!("{}/restapi/oauth/token", self.base_url.trim_end_matches('/'));
        debug!(%url, "requesting RingCentral access token");

        let res = self
            .http
            .post(url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&self.form())
            .send()
            .await
            .map_err(|e| CredentialError::Authentication {
                service: Service::Telephony,
                status: None,
                body: e.to_string(),
            })?;

        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        let grant = TokenGrant::from_response(Service::Telephony, status, &body)?;

        if let Some(next) = &grant.refresh_token {
            let mut current = self.grant.lock().unwrap_or_else(PoisonError::into_inner);
            if let RingCentralGrant::RefreshToken(token) = &mut *current {
                *token = next.clone();
                debug!("RingCentral refresh token rotated");
            }
        }
        Ok(grant)
    }
}

/// RingCentral SMS client.
#[derive(Clone, Debug)]
pub struct RingCentralClient {
    /// API base URL; override for testing/mocking.
    pub base_url: String,
    http: reqwest::Client,
}

impl RingCentralClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_SERVER_URL.to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        Self {
            base_url,
            http: default_http(),
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }
}

impl Default for RingCentralClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
struct PhoneNumber<'a> {
    #[serde(rename = "phoneNumber")]
    phone_number: &'a str,
}

#[derive(Debug, Serialize)]
struct RingCentralSmsRequest<'a> {
    from: PhoneNumber<'a>,
    to: Vec<PhoneNumber<'a>>,
    text: &'a str,
}

#[async_trait]
impl SmsClient for RingCentralClient {
    async fn send(&self, credential: &str, req: SendRequest<'_>) -> Result<SendResponse, SmsError> {
        if req.to.is_empty() || req.from.is_empty() {
            return Err(SmsError::Invalid("sender and recipient are required".into()));
        }

        let url = format!(
            "{}/restapi/v1.0/account/~/extension/~/sms",
            self.base_url.trim_end_matches('/')
        );
        let payload = RingCentralSmsRequest {
            from: PhoneNumber {
                phone_number: req.from,
            },
            to: vec![PhoneNumber {
                phone_number: req.to,
            }],
            text: req.text,
        };
        let res = self
            .http
            .post(url)
            .bearer_auth(credential)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SmsError::Http(e.to_string()))?;

        let status = res.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            let body = res.text().await.unwrap_or_default();
            return Err(SmsError::Auth(body));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(SmsError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let raw_text = res
            .text()
            .await
            .map_err(|e| SmsError::Http(e.to_string()))?;
        let raw_json: serde_json::Value = serde_json::from_str(&raw_text)
            .unwrap_or_else(|_| serde_json::json!({ "raw": raw_text }));

        // RingCentral message ids are numeric
        let id = match raw_json.get("id") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => relay_core::fallback_id(),
        };
        info!(%id, status = ?raw_json.get("messageStatus"), "RingCentral accepted message");

        Ok(SendResponse {
            id,
            provider: PROVIDER,
            raw: raw_json,
        })
    }
}
