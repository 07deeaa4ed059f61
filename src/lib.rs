//! # Lead Relay
//!
//! Texts new leads through RingCentral and marks them contacted in Zoho CRM.
//!
//! ## Features
//!
//! - **Webhook mode**: `POST /send-sms` with `{phone, name, email, owner?}`
//! - **Polling mode**: periodic scan of the CRM for uncontacted leads
//! - **Credential caching**: bearer tokens are reused until shortly before they expire
//! - **Owner filtering**: act only on leads assigned to the configured operator
//! - **Partial success reporting**: a sent message is never hidden by a failed CRM update
//! - **Configuration**: layered files and `LEAD_RELAY__*` environment variables
//! - **Observability**: structured logging via `tracing`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lead_relay::prelude::*;
//!
//! let config = AppConfig::load()?;
//! let handler = lead_relay::service::build_handler(&config)?;
//! let outcome = handler.handle(&Lead {
//!     phone: Some("5551234567".into()),
//!     email: Some("a@b.com".into()),
//!     name: Some("Sam".into()),
//!     ..Lead::default()
//! }).await;
//! assert_eq!(outcome, Outcome::Success);
//! ```

pub mod config;
pub mod poller;
pub mod service;
pub mod telemetry;

pub use crate::config::AppConfig;

/// Common imports for lead-relay usage
pub mod prelude {
    pub use crate::config::{
        AppConfig, HandlerConfig, LoggingConfig, PollerConfig, ProvidersConfig, ServerConfig,
    };
    pub use crate::poller::{PollSummary, Poller};
    pub use relay_core::*;
    pub use relay_web_generic::LeadProcessor;
}
