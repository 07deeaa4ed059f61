//! Wires configured providers into a [`LeadHandler`].

use crate::config::{AppConfig, HttpConfig};
use config::ConfigError;
use relay_core::{CredentialCache, HandlerSettings, LeadHandler, MessageTemplate, OwnerFilter};
use relay_ringcentral::{RingCentralAuth, RingCentralClient};
use relay_zoho::{ZohoAuth, ZohoCrmClient};
use std::sync::Arc;
use tracing::info;

/// Shared outbound client carrying the configured timeout.
pub fn http_client(config: &HttpConfig) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.timeout_seconds))
        .build()
        .map_err(|e| ConfigError::Message(format!("http client: {}", e)))
}

pub fn build_handler(config: &AppConfig) -> Result<LeadHandler, ConfigError> {
    let rc = config
        .providers
        .ringcentral
        .as_ref()
        .ok_or_else(|| ConfigError::Message("providers.ringcentral is not configured".into()))?;
    let zoho = config
        .providers
        .zoho
        .as_ref()
        .ok_or_else(|| ConfigError::Message("providers.zoho is not configured".into()))?;
    let http = http_client(&config.http)?;

    let telephony_auth = RingCentralAuth::with_base_url(
        rc.client_id.clone(),
        rc.client_secret.clone(),
        rc.grant()?,
        rc.server_url.clone(),
    )
    .with_http_client(http.clone());
    let sms = RingCentralClient::with_base_url(rc.server_url.clone()).with_http_client(http.clone());

    let crm_auth = ZohoAuth::with_accounts_url(
        zoho.client_id.clone(),
        zoho.client_secret.clone(),
        zoho.refresh_token.clone(),
        zoho.accounts_url.clone(),
    )
    .with_http_client(http.clone());
    let crm = ZohoCrmClient::with_api_url(zoho.api_url.clone())
        .with_module(&zoho.module, &zoho.status_field)
        .with_http_client(http);

    let margin = i64::try_from(config.credentials.safety_margin_seconds)
        .map_err(|_| ConfigError::Message("credentials.safety_margin_seconds too large".into()))?;
    let credentials = CredentialCache::new()
        .with_source(Arc::new(telephony_auth))
        .with_source(Arc::new(crm_auth))
        .with_safety_margin(time::Duration::seconds(margin));

    let handler = &config.handler;
    let settings = HandlerSettings {
        sender_number: rc.sender_number.clone(),
        owner_filter: OwnerFilter::new(handler.operator.clone()),
        template: MessageTemplate::new(handler.message_template.clone(), handler.default_name.clone()),
        lookup: handler.lookup,
        contacted_status: handler.contacted_status.clone(),
    };
    info!(
        operator = ?settings.owner_filter,
        lookup = ?settings.lookup,
        crm_module = %zoho.module,
        "lead handler configured"
    );

    Ok(LeadHandler::new(
        Arc::new(credentials),
        Arc::new(sms),
        Arc::new(crm),
        settings,
    ))
}
