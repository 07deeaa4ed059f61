use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::post,
    Router,
};
use bytes::Bytes;
use relay_core::WebhookResponse;
use relay_web_generic::{LeadProcessor, ResponseConverter};

#[derive(Clone)]
pub struct AppState {
    pub processor: LeadProcessor,
}

/// Axum-specific response converter
pub struct AxumResponseConverter;

impl ResponseConverter for AxumResponseConverter {
    type ResponseType = axum::response::Response;

    fn from_webhook_response(response: WebhookResponse) -> Self::ResponseType {
        let status = StatusCode::from_u16(response.status.as_u16())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(header::CONTENT_TYPE, response.content_type)],
            response.body,
        )
            .into_response()
    }
}

/// Lead webhook handler: POST /send-sms
pub async fn send_sms(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let response = state.processor.process_lead(&body).await;
    AxumResponseConverter::from_webhook_response(response)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/send-sms", post(send_sms))
        .with_state(state)
}
