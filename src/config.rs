use config::{Config, ConfigError, Environment, File};
use relay_core::{LookupField, MessageTemplate};
use relay_ringcentral::RingCentralGrant;
use serde::{Deserialize, Serialize};
use std::env;

/// Application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Outbound HTTP configuration
    pub http: HttpConfig,
    /// Credential cache configuration
    pub credentials: CredentialsConfig,
    /// Upstream providers configuration
    pub providers: ProvidersConfig,
    /// Lead handling configuration
    pub handler: HandlerConfig,
    /// CRM polling configuration
    pub poller: PollerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 5000, `PORT` overrides)
    pub port: u16,
    /// Maximum request body size in bytes (default: 64KB)
    pub max_body_size: usize,
}

/// Outbound HTTP configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    /// Timeout for every upstream call in seconds (default: 10)
    pub timeout_seconds: u64,
}

/// Credential cache configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CredentialsConfig {
    /// Seconds subtracted from each token lifetime (default: 60)
    pub safety_margin_seconds: u64,
}

/// Upstream providers configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProvidersConfig {
    /// RingCentral configuration
    pub ringcentral: Option<RingCentralConfig>,
    /// Zoho CRM configuration
    pub zoho: Option<ZohoConfig>,
}

/// RingCentral provider configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RingCentralConfig {
    /// Platform URL (default: production)
    #[serde(default = "default_ringcentral_url")]
    pub server_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// JWT credential; preferred over `refresh_token` when both are set
    #[serde(default)]
    pub jwt: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Number SMS are sent from
    pub sender_number: String,
}

impl RingCentralConfig {
    pub fn grant(&self) -> Result<RingCentralGrant, ConfigError> {
        let non_blank = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        non_blank(&self.jwt)
            .map(RingCentralGrant::Jwt)
            .or_else(|| non_blank(&self.refresh_token).map(RingCentralGrant::RefreshToken))
            .ok_or_else(|| {
                ConfigError::Message("providers.ringcentral needs jwt or refresh_token".into())
            })
    }
}

/// Zoho CRM provider configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ZohoConfig {
    /// Accounts server for token exchange (default: accounts.zoho.com)
    #[serde(default = "default_zoho_accounts_url")]
    pub accounts_url: String,
    /// API domain (default: www.zohoapis.com)
    #[serde(default = "default_zoho_api_url")]
    pub api_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// CRM module holding leads (default: Leads)
    #[serde(default = "default_zoho_module")]
    pub module: String,
    /// API name of the status field (default: Lead_Status)
    #[serde(default = "default_zoho_status_field")]
    pub status_field: String,
}

/// Lead handling configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HandlerConfig {
    /// Only act on leads owned by this operator (default: unset, act on all)
    pub operator: Option<String>,
    /// SMS body, `{name}` is replaced with the lead's name
    pub message_template: String,
    /// Used for `{name}` when the lead has none (default: there)
    pub default_name: String,
    /// Field used to find the CRM record: email or phone (default: email)
    pub lookup: LookupField,
    /// Status written after a successful send (default: Contacted)
    pub contacted_status: String,
}

/// CRM polling configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PollerConfig {
    /// Enable polling mode (default: false)
    pub enabled: bool,
    /// Seconds between scans (default: 300)
    pub interval_seconds: u64,
    /// Maximum leads texted per scan, also the page size (default: 25)
    pub batch_size: usize,
    /// Pages read per scan while looking for leads to text (default: 10)
    pub max_pages: usize,
    /// Status marking a lead as not yet messaged (default: Not Contacted)
    pub uncontacted_status: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: json or pretty (default: json)
    pub format: String,
}

fn default_ringcentral_url() -> String {
    relay_ringcentral::DEFAULT_SERVER_URL.to_string()
}

fn default_zoho_accounts_url() -> String {
    relay_zoho::DEFAULT_ACCOUNTS_URL.to_string()
}

fn default_zoho_api_url() -> String {
    relay_zoho::DEFAULT_API_URL.to_string()
}

fn default_zoho_module() -> String {
    "Leads".to_string()
}

fn default_zoho_status_field() -> String {
    "Lead_Status".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_body_size: 64 * 1024,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_seconds: 10 }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            safety_margin_seconds: 60,
        }
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            operator: None,
            message_template: MessageTemplate::DEFAULT.to_string(),
            default_name: "there".to_string(),
            lookup: LookupField::Email,
            contacted_status: "Contacted".to_string(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: 300,
            batch_size: 25,
            max_pages: 10,
            uncontacted_status: "Not Contacted".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(Config::try_from(&AppConfig::default())?)
            // Add configuration file based on environment
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local configuration file (gitignored)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables (prefixed with LEAD_RELAY__)
            .add_source(Environment::with_prefix("LEAD_RELAY").separator("__"))
            // Hosting platforms hand out the listen port as PORT
            .set_override_option("server.port", env::var("PORT").ok())?
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Suspicious but usable settings, for logging once telemetry is up
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.handler.message_template.contains("{name}") {
            warnings.push("message template has no {name} placeholder".to_string());
        }
        if self.poller.enabled && self.handler.operator.is_none() {
            warnings.push("poller enabled without an operator, every uncontacted lead is texted".to_string());
        }
        warnings
    }

    /// Check cross-field requirements the deserializer cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(rc) = &self.providers.ringcentral {
            rc.grant()?;
            if rc.sender_number.trim().is_empty() {
                return Err(ConfigError::Message(
                    "providers.ringcentral.sender_number is empty".into(),
                ));
            }
        }
        if self.poller.enabled && self.poller.interval_seconds == 0 {
            return Err(ConfigError::Message(
                "poller.interval_seconds must be positive".into(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(ConfigError::Message(format!(
                "logging.format must be json or pretty, got {}",
                self.logging.format
            )));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            http: HttpConfig::default(),
            credentials: CredentialsConfig::default(),
            providers: ProvidersConfig::default(),
            handler: HandlerConfig::default(),
            poller: PollerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
