//! # Zoho CRM backend
//!
//! [`ZohoAuth`] trades a refresh token for a short-lived access token and
//! [`ZohoCrmClient`] searches and updates lead records with it.
//!
//! Zoho answers searches without hits with `204 No Content`, and reports token
//! errors as `200` with an `error` field, so both cases are handled explicitly.

use async_trait::async_trait;
use relay_core::{
    CredentialError, CrmClient, CrmError, CrmRecord, LookupKey, RecordPage, Service, TokenGrant,
    TokenSource,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

const PROVIDER: &str = "zoho";
pub const DEFAULT_ACCOUNTS_URL: &str = "https://accounts.zoho.com";
pub const DEFAULT_API_URL: &str = "https://www.zohoapis.com";
/// Largest page Zoho's search endpoint returns.
const MAX_PAGE: usize = 200;

/// Explicit timeout for the default HTTP client.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

fn default_http() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// Zoho OAuth refresh-token source.
#[derive(Clone)]
pub struct ZohoAuth {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    accounts_url: String,
    http: reqwest::Client,
}

impl ZohoAuth {
    pub fn new<S: Into<String>>(client_id: S, client_secret: S, refresh_token: S) -> Self {
        Self::with_accounts_url(
            client_id,
            client_secret,
            refresh_token,
            DEFAULT_ACCOUNTS_URL.to_string(),
        )
    }

    pub fn with_accounts_url<S: Into<String>>(
        client_id: S,
        client_secret: S,
        refresh_token: S,
        accounts_url: String,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
            accounts_url,
            http: default_http(),
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }
}

impl std::fmt::Debug for ZohoAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZohoAuth")
            .field("client_id", &self.client_id)
            .field("accounts_url", &self.accounts_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for ZohoAuth {
    fn service(&self) -> Service {
        Service::Crm
    }

    async fn fetch_token(&self) -> Result<TokenGrant, CredentialError> {
        let url = format!("{}/oauth/v2/token", self.accounts_url.trim_end_matches('/'));
        debug!(%url, "requesting Zoho access token");

        let res = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CredentialError::Authentication {
                service: Service::Crm,
                status: None,
                body: e.to_string(),
            })?;

        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        TokenGrant::from_response(Service::Crm, status, &body)
    }
}

/// Zoho CRM REST client for one module (normally `Leads`).
#[derive(Clone, Debug)]
pub struct ZohoCrmClient {
    /// API base URL; override for testing/mocking.
    pub api_url: String,
    pub module: String,
    /// API name of the field holding the lead status.
    pub status_field: String,
    http: reqwest::Client,
}

impl ZohoCrmClient {
    pub fn new() -> Self {
        Self::with_api_url(DEFAULT_API_URL.to_string())
    }

    pub fn with_api_url(api_url: String) -> Self {
        Self {
            api_url,
            module: "Leads".to_string(),
            status_field: "Lead_Status".to_string(),
            http: default_http(),
        }
    }

    pub fn with_module(mut self, module: impl Into<String>, status_field: impl Into<String>) -> Self {
        self.module = module.into();
        self.status_field = status_field.into();
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/crm/v2/{}/{}",
            self.api_url.trim_end_matches('/'),
            self.module,
            suffix
        )
    }

    /// `{api}/crm/v2/{module}/{record_id}`, with the id encoded as a single path segment.
    fn record_url(&self, record_id: &str) -> Result<reqwest::Url, CrmError> {
        if matches!(record_id, "" | "." | "..") {
            return Err(CrmError::Malformed(format!("invalid record id {:?}", record_id)));
        }
        let mut url = reqwest::Url::parse(&self.api_url)
            .map_err(|e| CrmError::Http(format!("invalid api url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|()| CrmError::Http(format!("api url cannot be a base: {}", self.api_url)))?
            .pop_if_empty()
            .extend(["crm", "v2", self.module.as_str(), record_id]);
        Ok(url)
    }

    async fn search(&self, credential: &str, query: &[(&str, String)]) -> Result<RecordPage, CrmError> {
        let res = self
            .http
            .get(self.url("search"))
            .header("Authorization", auth_header(credential))
            .query(query)
            .send()
            .await
            .map_err(|e| CrmError::Http(e.to_string()))?;

        let status = res.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(RecordPage::default());
        }
        let body = check_status(res).await?;
        let list: ZohoList =
            serde_json::from_str(&body).map_err(|e| CrmError::Malformed(e.to_string()))?;
        Ok(RecordPage {
            records: list
                .data
                .iter()
                .filter_map(|v| self.record_from(v))
                .collect(),
            more: list.info.more_records,
        })
    }

    fn record_from(&self, v: &Value) -> Option<CrmRecord> {
        let id = match v.get("id")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let text = |key: &str| v.get(key).and_then(Value::as_str).map(str::to_string);
        let name = text("Full_Name").or_else(|| {
            let parts: Vec<String> = [text("First_Name"), text("Last_Name")]
                .into_iter()
                .flatten()
                .collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        });
        Some(CrmRecord {
            id,
            email: text("Email"),
            phone: text("Phone").or_else(|| text("Mobile")),
            name,
            owner: v
                .get("Owner")
                .and_then(|o| o.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string),
            status: text(&self.status_field),
        })
    }
}

impl Default for ZohoCrmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ZohoList {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    info: ZohoPageInfo,
}

#[derive(Debug, Default, Deserialize)]
struct ZohoPageInfo {
    #[serde(default)]
    more_records: bool,
}

#[derive(Debug, Serialize)]
struct ZohoUpdate {
    data: Vec<serde_json::Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct ZohoUpdateResult {
    code: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ZohoUpdateResponse {
    #[serde(default)]
    data: Vec<ZohoUpdateResult>,
}

fn auth_header(credential: &str) -> String {
    format!("Zoho-oauthtoken {}", credential)
}

/// Escape the characters Zoho treats specially inside search criteria.
fn criteria(field: &str, value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '(' | ')' | ',') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("({}:equals:{})", field, escaped)
}

async fn check_status(res: reqwest::Response) -> Result<String, CrmError> {
    let status = res.status();
    let body = res.text().await.map_err(|e| CrmError::Http(e.to_string()))?;
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(CrmError::Unauthorized(body));
    }
    if !status.is_success() {
        return Err(CrmError::Provider {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

#[async_trait]
impl CrmClient for ZohoCrmClient {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn find_record(
        &self,
        credential: &str,
        key: LookupKey<'_>,
    ) -> Result<Option<CrmRecord>, CrmError> {
        let query = match key {
            LookupKey::Email(email) => ("email", email.to_string()),
            LookupKey::Phone(phone) => ("phone", phone.to_string()),
        };
        let records = self.search(credential, &[query]).await?.records;
        if records.len() > 1 {
            debug!(matches = records.len(), "multiple CRM records match, using the first");
        }
        Ok(records.into_iter().next())
    }

    async fn update_status(
        &self,
        credential: &str,
        record_id: &str,
        status: &str,
    ) -> Result<(), CrmError> {
        let mut fields = serde_json::Map::new();
        fields.insert(self.status_field.clone(), Value::String(status.to_string()));
        let payload = ZohoUpdate { data: vec![fields] };

        let res = self
            .http
            .put(self.record_url(record_id)?)
            .header("Authorization", auth_header(credential))
            .json(&payload)
            .send()
            .await
            .map_err(|e| CrmError::Http(e.to_string()))?;
        let body = check_status(res).await?;

        let parsed: ZohoUpdateResponse =
            serde_json::from_str(&body).map_err(|e| CrmError::Malformed(e.to_string()))?;
        match parsed.data.first() {
            Some(result) if result.code == "SUCCESS" => {
                info!(record = record_id, field = %self.status_field, status, "Zoho record updated");
                Ok(())
            }
            Some(result) => Err(CrmError::Provider {
                status: 200,
                body: format!(
                    "{}: {}",
                    result.code,
                    result.message.as_deref().unwrap_or_default()
                ),
            }),
            None => Err(CrmError::Malformed("update response without data".into())),
        }
    }

    async fn list_by_status(
        &self,
        credential: &str,
        status: &str,
        page: usize,
        per_page: usize,
    ) -> Result<RecordPage, CrmError> {
        let per_page = per_page.clamp(1, MAX_PAGE);
        let mut listed = self
            .search(
                credential,
                &[
                    ("criteria", criteria(&self.status_field, status)),
                    ("page", page.max(1).to_string()),
                    ("per_page", per_page.to_string()),
                ],
            )
            .await?;
        listed.records.truncate(per_page);
        Ok(listed)
    }
}
