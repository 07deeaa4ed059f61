//! # Relay Core
//!
//! Core traits and types for lead-relay.
//!
//! This crate provides the building blocks shared by every provider and web adapter:
//! - [`TokenSource`], [`SmsClient`] and [`CrmClient`] traits for the two upstream services
//! - [`CredentialCache`] for reusing bearer tokens until they expire
//! - [`LeadHandler`] for the send-then-update sequence applied to each lead
//! - Common types for leads, outcomes, responses, and errors
//!
//! ## Example
//!
//! ```rust,ignore
//! use relay_core::{CredentialCache, LeadHandler, Service};
//!
//! let credentials = CredentialCache::new()
//!     .with_source(Arc::new(ringcentral_auth))
//!     .with_source(Arc::new(zoho_auth));
//! let token = credentials.get_credential(Service::Telephony).await?;
//! ```

pub mod credential;
pub mod handler;

pub use credential::{Clock, CredentialCache, CredentialEntry, SystemClock, DEFAULT_SAFETY_MARGIN};
pub use handler::{HandlerSettings, LeadHandler, LookupField, MessageTemplate, OwnerFilter};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Upstream services that hand out bearer credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Telephony,
    Crm,
}

impl Service {
    pub fn as_str(self) -> &'static str {
        match self {
            Service::Telephony => "telephony",
            Service::Crm => "crm",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while exchanging credentials with an upstream token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// Token endpoint unreachable or credentials rejected
    #[error("authentication with {service} failed (status {status:?}): {body}")]
    Authentication {
        service: Service,
        status: Option<u16>,
        body: String,
    },
    /// Token endpoint answered 200 without the expected fields
    #[error("malformed token response from {service}: {detail}")]
    MalformedResponse { service: Service, detail: String },
}

impl CredentialError {
    pub fn service(&self) -> Service {
        match self {
            CredentialError::Authentication { service, .. }
            | CredentialError::MalformedResponse { service, .. } => *service,
        }
    }
}

/// Errors that can occur during SMS operations
#[derive(Debug, thiserror::Error)]
pub enum SmsError {
    /// HTTP communication error
    #[error("http error: {0}")]
    Http(String),
    /// Bearer credential rejected by the provider
    #[error("authentication error: {0}")]
    Auth(String),
    /// Invalid request parameters
    #[error("invalid request: {0}")]
    Invalid(String),
    /// SMS provider refused the message
    #[error("provider error: HTTP {status}: {body}")]
    Provider { status: u16, body: String },
    /// Unexpected error occurred
    #[error("unexpected: {0}")]
    Unexpected(String),
}

/// Errors that can occur while talking to the CRM
#[derive(Debug, thiserror::Error)]
pub enum CrmError {
    #[error("http error: {0}")]
    Http(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("provider error: HTTP {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Web-specific error types for webhook processing
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("empty request body")]
    EmptyBody,
    #[error("parsing failed: {0}")]
    ParseError(String),
}

/// HTTP status code for web responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStatus {
    Ok = 200,
    MultiStatus = 207,
    BadRequest = 400,
    Forbidden = 403,
    NotFound = 404,
    InternalServerError = 500,
}

impl HttpStatus {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Error taxonomy surfaced to webhook callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing input, correctable by the caller
    Validation,
    /// Upstream credential exchange failed
    Authentication,
    /// Message send rejected
    Delivery,
    /// Downstream record not found
    Lookup,
    /// Primary action succeeded, secondary action failed
    PartialFailure,
}

impl ErrorKind {
    pub fn status(self) -> HttpStatus {
        match self {
            ErrorKind::Validation => HttpStatus::BadRequest,
            ErrorKind::Authentication => HttpStatus::InternalServerError,
            ErrorKind::Delivery => HttpStatus::Forbidden,
            ErrorKind::Lookup => HttpStatus::NotFound,
            ErrorKind::PartialFailure => HttpStatus::MultiStatus,
        }
    }
}

/// Parsed body of a successful token exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Lifetime in seconds, as reported by the token endpoint.
    pub expires_in: u64,
    /// Present when the upstream rotates refresh tokens.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenGrant {
    /// Interpret a token endpoint reply.
    ///
    /// Anything other than HTTP 200 is an authentication failure, as is a 200 body
    /// carrying an `error` field. A 200 body missing `access_token` or `expires_in`
    /// is malformed.
    pub fn from_response(service: Service, status: u16, body: &str) -> Result<Self, CredentialError> {
        if status != 200 {
            return Err(CredentialError::Authentication {
                service,
                status: Some(status),
                body: body.to_string(),
            });
        }

        let value: serde_json::Value =
            serde_json::from_str(body).map_err(|e| CredentialError::MalformedResponse {
                service,
                detail: format!("invalid json: {}", e),
            })?;

        if let Some(error) = value.get("error") {
            return Err(CredentialError::Authentication {
                service,
                status: Some(status),
                body: error.to_string(),
            });
        }

        let access_token = value
            .get("access_token")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CredentialError::MalformedResponse {
                service,
                detail: "missing access_token".into(),
            })?;
        let expires_in = value
            .get("expires_in")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| CredentialError::MalformedResponse {
                service,
                detail: "missing expires_in".into(),
            })?;
        let refresh_token = value
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok(TokenGrant {
            access_token: access_token.to_string(),
            expires_in,
            refresh_token,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest<'a> {
    pub to: &'a str,
    pub from: &'a str,
    pub text: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendResponse {
    pub id: String,
    /// Name of the backend/provider that produced the response, e.g. "ringcentral".
    pub provider: &'static str,
    /// Raw provider payload for debugging / audit.
    pub raw: serde_json::Value,
}

/// Inbound lead notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    /// Form senders post phone numbers as either strings or bare numbers.
    #[serde(default, deserialize_with = "text_or_number")]
    pub phone: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    /// CRM record id. Only set for leads read from the CRM itself; webhook
    /// bodies cannot choose the record that gets written.
    #[serde(skip_deserializing)]
    pub crm_id: Option<String>,
}

impl Lead {
    pub fn phone(&self) -> Option<&str> {
        present(&self.phone)
    }

    pub fn name(&self) -> Option<&str> {
        present(&self.name)
    }

    pub fn email(&self) -> Option<&str> {
        present(&self.email)
    }

    pub fn owner(&self) -> Option<&str> {
        present(&self.owner)
    }

    pub fn crm_id(&self) -> Option<&str> {
        present(&self.crm_id)
    }
}

fn text_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    }))
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// A lead as stored in the CRM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmRecord {
    pub id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub name: Option<String>,
    pub owner: Option<String>,
    pub status: Option<String>,
}

impl From<CrmRecord> for Lead {
    fn from(r: CrmRecord) -> Self {
        Lead {
            phone: r.phone,
            name: r.name,
            email: r.email,
            owner: r.owner,
            crm_id: Some(r.id),
        }
    }
}

/// One page of a CRM listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPage {
    pub records: Vec<CrmRecord>,
    /// The CRM holds further pages after this one.
    pub more: bool,
}

/// Field used to find a lead's CRM record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKey<'a> {
    Email(&'a str),
    Phone(&'a str),
}

/// Step of the primary action that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Auth,
    Send,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Auth => "auth",
            Stage::Send => "send",
        }
    }
}

/// Result of handling one lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Message sent and CRM record updated
    Success,
    /// Input unusable; nothing was attempted
    Rejected(String),
    /// Lead belongs to another operator; nothing was attempted
    Skipped(String),
    /// The message was not sent
    Failed { stage: Stage, detail: String },
    /// Message sent, CRM bookkeeping did not complete
    PartialSuccess(String),
}

impl Outcome {
    /// Error category of this outcome, `None` for success and skips.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Success | Outcome::Skipped(_) => None,
            Outcome::Rejected(_) => Some(ErrorKind::Validation),
            Outcome::Failed {
                stage: Stage::Auth, ..
            } => Some(ErrorKind::Authentication),
            Outcome::Failed {
                stage: Stage::Send, ..
            } => Some(ErrorKind::Delivery),
            Outcome::PartialSuccess(_) => Some(ErrorKind::PartialFailure),
        }
    }

    pub fn status(&self) -> HttpStatus {
        self.kind().map(ErrorKind::status).unwrap_or(HttpStatus::Ok)
    }

    /// Whether the message reached the telephony provider.
    pub fn message_sent(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::PartialSuccess(_))
    }
}

/// Generic webhook response that can be converted to any framework's response type
#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub status: HttpStatus,
    pub body: String,
    pub content_type: String,
}

impl WebhookResponse {
    pub fn json(status: HttpStatus, body: serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            content_type: "application/json".to_string(),
        }
    }

    pub fn error(status: HttpStatus, message: &str) -> Self {
        Self::json(status, serde_json::json!({ "error": message }))
    }

    pub fn from_outcome(outcome: &Outcome) -> Self {
        let status = outcome.status();
        let body = match outcome {
            Outcome::Success => serde_json::json!({
                "status": "success",
                "message": "SMS sent and CRM record updated",
            }),
            Outcome::Skipped(reason) => serde_json::json!({
                "status": "skipped",
                "reason": reason,
            }),
            Outcome::Rejected(reason) => serde_json::json!({ "error": reason }),
            Outcome::Failed { stage, detail } => serde_json::json!({
                "error": detail,
                "stage": stage.as_str(),
            }),
            Outcome::PartialSuccess(warning) => serde_json::json!({
                "status": "partial",
                "warning": warning,
            }),
        };
        Self::json(status, body)
    }
}

/// Exchanges long-lived secrets for a short-lived bearer credential.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Which upstream this source authenticates against.
    fn service(&self) -> Service;
    /// Perform one round trip to the token endpoint.
    async fn fetch_token(&self) -> Result<TokenGrant, CredentialError>;
}

#[async_trait]
pub trait SmsClient: Send + Sync {
    /// Send a single text SMS using the given bearer credential.
    async fn send(&self, credential: &str, req: SendRequest<'_>) -> Result<SendResponse, SmsError>;
}

#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Stable provider key, e.g. "zoho".
    fn provider(&self) -> &'static str;

    /// Search for a lead record. Multiple matches resolve to the first one.
    async fn find_record(
        &self,
        credential: &str,
        key: LookupKey<'_>,
    ) -> Result<Option<CrmRecord>, CrmError>;

    /// Set the record's status field.
    async fn update_status(
        &self,
        credential: &str,
        record_id: &str,
        status: &str,
    ) -> Result<(), CrmError>;

    /// Page `page` (1-based) of the records whose status field currently
    /// equals `status`, at most `per_page` of them.
    async fn list_by_status(
        &self,
        credential: &str,
        status: &str,
        page: usize,
        per_page: usize,
    ) -> Result<RecordPage, CrmError>;
}

/// Utility to create a pseudo id if a provider doesn't return one.
pub fn fallback_id() -> String {
    Uuid::new_v4().to_string()
}
