//! Send-then-update sequencing for a single lead.

use crate::{
    CrmClient, CrmError, CredentialCache, Lead, LookupKey, Outcome, SendRequest, Service,
    SmsClient, SmsError, Stage,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Which lead field is used to search the CRM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupField {
    #[default]
    Email,
    Phone,
}

/// Decides whether a lead belongs to this instance's operator.
#[derive(Debug, Clone, Default)]
pub struct OwnerFilter {
    operator: Option<String>,
}

impl OwnerFilter {
    /// A blank operator disables the filter.
    pub fn new(operator: Option<String>) -> Self {
        let operator = operator
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty());
        Self { operator }
    }

    pub fn is_enabled(&self) -> bool {
        self.operator.is_some()
    }

    pub fn allows(&self, owner: Option<&str>) -> bool {
        match (&self.operator, owner) {
            (None, _) => true,
            (Some(operator), Some(owner)) => operator.eq_ignore_ascii_case(owner.trim()),
            (Some(_), None) => false,
        }
    }
}

/// SMS body with a `{name}` placeholder.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    template: String,
    default_name: String,
}

impl MessageTemplate {
    pub const DEFAULT: &'static str = "Hello {name}, thanks for your interest in our kitchen deals. \
        May we ask a few questions about your project so we can better assist you?";

    pub fn new(template: impl Into<String>, default_name: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            default_name: default_name.into(),
        }
    }

    pub fn render(&self, name: Option<&str>) -> String {
        self.template
            .replace("{name}", name.unwrap_or(&self.default_name))
    }
}

impl Default for MessageTemplate {
    fn default() -> Self {
        Self::new(Self::DEFAULT, "there")
    }
}

/// Per-deployment knobs of the handler.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Number the SMS is sent from.
    pub sender_number: String,
    pub owner_filter: OwnerFilter,
    pub template: MessageTemplate,
    pub lookup: LookupField,
    /// Value written to the CRM status field after a successful send.
    pub contacted_status: String,
}

impl HandlerSettings {
    pub fn new(sender_number: impl Into<String>) -> Self {
        Self {
            sender_number: sender_number.into(),
            owner_filter: OwnerFilter::default(),
            template: MessageTemplate::default(),
            lookup: LookupField::default(),
            contacted_status: "Contacted".to_string(),
        }
    }
}

/// Texts a lead and records the contact in the CRM.
///
/// The CRM is touched only after the telephony provider accepted the message.
/// CRM failures after a send degrade to [`Outcome::PartialSuccess`]; the message
/// is never rolled back.
#[derive(Clone)]
pub struct LeadHandler {
    credentials: Arc<CredentialCache>,
    sms: Arc<dyn SmsClient>,
    crm: Arc<dyn CrmClient>,
    settings: Arc<HandlerSettings>,
}

impl LeadHandler {
    pub fn new(
        credentials: Arc<CredentialCache>,
        sms: Arc<dyn SmsClient>,
        crm: Arc<dyn CrmClient>,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            credentials,
            sms,
            crm,
            settings: Arc::new(settings),
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialCache> {
        &self.credentials
    }

    pub fn crm(&self) -> &Arc<dyn CrmClient> {
        &self.crm
    }

    pub fn settings(&self) -> &HandlerSettings {
        &self.settings
    }

    /// Whether [`handle`](Self::handle) would get past validation and the owner
    /// filter. Makes no network calls.
    pub fn is_actionable(&self, lead: &Lead) -> bool {
        self.screen(lead).is_ok()
    }

    fn screen<'l>(&self, lead: &'l Lead) -> Result<(&'l str, &'l str), Outcome> {
        let (phone, email) = match (lead.phone(), lead.email()) {
            (Some(phone), Some(email)) => (phone, email),
            (None, _) => return Err(Outcome::Rejected("missing required field: phone".into())),
            (_, None) => return Err(Outcome::Rejected("missing required field: email".into())),
        };
        if !self.settings.owner_filter.allows(lead.owner()) {
            return Err(Outcome::Skipped("not assigned to operator".into()));
        }
        Ok((phone, email))
    }

    pub async fn handle(&self, lead: &Lead) -> Outcome {
        let (phone, email) = match self.screen(lead) {
            Ok(fields) => fields,
            Err(outcome) => {
                if let Outcome::Skipped(_) = outcome {
                    info!(owner = ?lead.owner(), "lead not assigned to operator, skipping");
                }
                return outcome;
            }
        };

        let token = match self.credentials.get_credential(Service::Telephony).await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "telephony authentication failed");
                return Outcome::Failed {
                    stage: Stage::Auth,
                    detail: e.to_string(),
                };
            }
        };

        let text = self.settings.template.render(lead.name());
        let sent = self
            .sms
            .send(
                &token,
                SendRequest {
                    to: phone,
                    from: &self.settings.sender_number,
                    text: &text,
                },
            )
            .await;
        match sent {
            Ok(res) => info!(to = phone, id = %res.id, provider = res.provider, "SMS sent"),
            Err(e) => {
                warn!(to = phone, error = %e, "SMS failed");
                if matches!(e, SmsError::Auth(_)) {
                    self.credentials.invalidate(Service::Telephony);
                }
                return Outcome::Failed {
                    stage: Stage::Send,
                    detail: e.to_string(),
                };
            }
        }

        self.record_contact(lead, phone, email).await
    }

    async fn record_contact(&self, lead: &Lead, phone: &str, email: &str) -> Outcome {
        let token = match self.credentials.get_credential(Service::Crm).await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "CRM authentication failed");
                return Outcome::PartialSuccess("message sent, CRM auth failed".into());
            }
        };

        let record_id = match lead.crm_id() {
            Some(id) => id.to_string(),
            None => {
                let key = match self.settings.lookup {
                    LookupField::Email => LookupKey::Email(email),
                    LookupField::Phone => LookupKey::Phone(phone),
                };
                match self.crm.find_record(&token, key).await {
                    Ok(Some(record)) => record.id,
                    Ok(None) => {
                        warn!(?key, "no CRM record matches lead");
                        return Outcome::PartialSuccess("message sent, record not found".into());
                    }
                    Err(e) => {
                        warn!(?key, error = %e, "CRM search failed");
                        self.invalidate_on_unauthorized(&e);
                        return Outcome::PartialSuccess(
                            "message sent, record lookup failed".into(),
                        );
                    }
                }
            }
        };

        let status = &self.settings.contacted_status;
        match self.crm.update_status(&token, &record_id, status).await {
            Ok(()) => {
                info!(record = %record_id, %status, crm = self.crm.provider(), "CRM record updated");
                Outcome::Success
            }
            Err(e) => {
                warn!(record = %record_id, error = %e, "CRM update failed");
                self.invalidate_on_unauthorized(&e);
                Outcome::PartialSuccess("message sent, update failed".into())
            }
        }
    }

    fn invalidate_on_unauthorized(&self, e: &CrmError) {
        if matches!(e, CrmError::Unauthorized(_)) {
            self.credentials.invalidate(Service::Crm);
        }
    }
}
