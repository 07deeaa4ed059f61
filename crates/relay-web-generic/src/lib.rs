use relay_core::{HttpStatus, Lead, LeadHandler, WebhookError, WebhookResponse};
use tracing::{debug, info};

/// Framework-agnostic processor that turns a raw lead webhook into a response
#[derive(Clone)]
pub struct LeadProcessor {
    handler: LeadHandler,
}

impl LeadProcessor {
    pub fn new(handler: LeadHandler) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &LeadHandler {
        &self.handler
    }

    /// Process an incoming lead notification and return a framework-agnostic response
    pub async fn process_lead(&self, body: &[u8]) -> WebhookResponse {
        let lead = match parse_lead(body) {
            Ok(lead) => lead,
            Err(e) => return error_to_response(e),
        };
        debug!(?lead, "incoming lead webhook");

        let outcome = self.handler.handle(&lead).await;
        info!(?outcome, status = outcome.status().as_u16(), "lead processed");
        WebhookResponse::from_outcome(&outcome)
    }
}

fn parse_lead(body: &[u8]) -> Result<Lead, WebhookError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(WebhookError::EmptyBody);
    }
    serde_json::from_slice(body).map_err(|e| WebhookError::ParseError(e.to_string()))
}

fn error_to_response(error: WebhookError) -> WebhookResponse {
    match error {
        WebhookError::EmptyBody => WebhookResponse::error(HttpStatus::BadRequest, "empty request body"),
        WebhookError::ParseError(msg) => {
            WebhookResponse::error(HttpStatus::BadRequest, &format!("parse error: {}", msg))
        }
    }
}

/// Helper trait for framework adapters to convert responses
pub trait ResponseConverter {
    type ResponseType;

    fn from_webhook_response(response: WebhookResponse) -> Self::ResponseType;
}
