use lead_relay::config::{AppConfig, RingCentralConfig, ZohoConfig};
use lead_relay::poller::{PollSummary, Poller};
use lead_relay::service;
use relay_core::Service;
use relay_web_generic::LeadProcessor;
use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate, Times};

const SAM: &[u8] = br#"{"phone":"5551234567","email":"a@b.com","name":"Sam"}"#;

fn config_for(server: &MockServer) -> AppConfig {
    let mut config = AppConfig::default();
    config.providers.ringcentral = Some(RingCentralConfig {
        server_url: server.uri(),
        client_id: "rc-id".into(),
        client_secret: "rc-secret".into(),
        jwt: Some("rc-jwt".into()),
        refresh_token: None,
        sender_number: "+15550000000".into(),
    });
    config.providers.zoho = Some(ZohoConfig {
        accounts_url: server.uri(),
        api_url: server.uri(),
        client_id: "z-id".into(),
        client_secret: "z-secret".into(),
        refresh_token: "z-refresh".into(),
        module: "Leads".into(),
        status_field: "Lead_Status".into(),
    });
    config
}

async fn mount_telephony_token(server: &MockServer, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/restapi/oauth/token"))
        .and(body_string_contains("assertion=rc-jwt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "rc-token",
            "expires_in": 3600
        })))
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_sms(server: &MockServer, status: u16, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/restapi/v1.0/account/~/extension/~/sms"))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({
            "id": 42,
            "messageStatus": "Queued"
        })))
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_crm_token(server: &MockServer, expected: impl Into<Times>) {
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "zoho-token",
            "expires_in": 3600
        })))
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_search(server: &MockServer, response: ResponseTemplate, expected: u64) {
    Mock::given(method("GET"))
        .and(path("/crm/v2/Leads/search"))
        .and(query_param("email", "a@b.com"))
        .respond_with(response)
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_update(server: &MockServer, id: &str, expected: u64) {
    Mock::given(method("PUT"))
        .and(path(format!("/crm/v2/Leads/{}", id)))
        .and(body_json(json!({ "data": [{ "Lead_Status": "Contacted" }] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "code": "SUCCESS", "status": "success", "message": "record updated" }]
        })))
        .expect(expected)
        .mount(server)
        .await;
}

fn processor(config: &AppConfig) -> LeadProcessor {
    LeadProcessor::new(service::build_handler(config).expect("handler builds"))
}

fn body(response: &relay_core::WebhookResponse) -> serde_json::Value {
    serde_json::from_str(&response.body).expect("json body")
}

#[tokio::test]
async fn scenario_a_send_and_update_succeeds() {
    let server = MockServer::start().await;
    mount_telephony_token(&server, 1).await;
    mount_sms(&server, 200, 1).await;
    mount_crm_token(&server, 1).await;
    mount_search(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "data": [{ "id": "rec-1", "Email": "a@b.com" }] })),
        1,
    )
    .await;
    mount_update(&server, "rec-1", 1).await;

    let response = processor(&config_for(&server)).process_lead(SAM).await;
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(body(&response)["status"], "success");
}

#[tokio::test]
async fn scenario_b_missing_phone_makes_no_calls() {
    let server = MockServer::start().await;

    let response = processor(&config_for(&server))
        .process_lead(br#"{"email":"a@b.com","name":"Sam"}"#)
        .await;
    assert_eq!(response.status.as_u16(), 400);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn scenario_c_rejected_send_skips_crm() {
    let server = MockServer::start().await;
    mount_telephony_token(&server, 1).await;
    mount_sms(&server, 403, 1).await;
    mount_crm_token(&server, 0).await;

    let response = processor(&config_for(&server)).process_lead(SAM).await;
    assert_eq!(response.status.as_u16(), 403);
    assert_eq!(body(&response)["stage"], "send");

    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.iter().all(|r| !r.url.path().starts_with("/crm")));
}

#[tokio::test]
async fn scenario_d_no_record_is_partial_success() {
    let server = MockServer::start().await;
    mount_telephony_token(&server, 1).await;
    mount_sms(&server, 200, 1).await;
    mount_crm_token(&server, 1).await;
    mount_search(&server, ResponseTemplate::new(204), 1).await;

    let response = processor(&config_for(&server)).process_lead(SAM).await;
    assert_eq!(response.status.as_u16(), 207);
    assert_eq!(body(&response)["warning"], "message sent, record not found");
}

#[tokio::test]
async fn webhook_crm_id_is_ignored_in_favour_of_lookup() {
    let server = MockServer::start().await;
    mount_telephony_token(&server, 1).await;
    mount_sms(&server, 200, 1).await;
    mount_crm_token(&server, 1).await;
    mount_search(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "data": [{ "id": "rec-1" }] })),
        1,
    )
    .await;
    mount_update(&server, "rec-1", 1).await;

    let response = processor(&config_for(&server))
        .process_lead(
            br#"{"phone":"5551234567","email":"a@b.com","name":"Sam","crm_id":"../../v2/Contacts/999"}"#,
        )
        .await;
    assert_eq!(response.status.as_u16(), 200);

    let requests = server.received_requests().await.unwrap_or_default();
    let puts: Vec<&str> = requests
        .iter()
        .filter(|r| r.method.as_str() == "PUT")
        .map(|r| r.url.path())
        .collect();
    assert_eq!(puts, vec!["/crm/v2/Leads/rec-1"]);
}

#[tokio::test]
async fn numeric_phone_is_texted() {
    let server = MockServer::start().await;
    mount_telephony_token(&server, 1).await;
    mount_sms(&server, 200, 1).await;
    mount_crm_token(&server, 1).await;
    mount_search(&server, ResponseTemplate::new(204), 1).await;

    let response = processor(&config_for(&server))
        .process_lead(br#"{"phone":5551234567,"email":"a@b.com"}"#)
        .await;
    assert_eq!(response.status.as_u16(), 207);
}

#[tokio::test]
async fn telephony_auth_failure_is_500() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/restapi/oauth/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("OAU-123 invalid client"))
        .expect(1)
        .mount(&server)
        .await;
    mount_sms(&server, 200, 0).await;

    let response = processor(&config_for(&server)).process_lead(SAM).await;
    assert_eq!(response.status.as_u16(), 500);
    assert_eq!(body(&response)["stage"], "auth");
}

#[tokio::test]
async fn owner_filter_skips_other_operators() {
    let server = MockServer::start().await;
    let mut config = config_for(&server);
    config.handler.operator = Some("Steven Bridge".into());

    let response = processor(&config)
        .process_lead(br#"{"phone":"5551234567","email":"a@b.com","name":"Sam","owner":"Jane Roe"}"#)
        .await;
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(body(&response)["status"], "skipped");
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn tokens_are_cached_across_requests() {
    let server = MockServer::start().await;
    mount_telephony_token(&server, 1).await;
    mount_sms(&server, 200, 3).await;
    mount_crm_token(&server, 1).await;
    mount_search(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "data": [{ "id": "rec-1" }] })),
        3,
    )
    .await;
    mount_update(&server, "rec-1", 3).await;

    let processor = processor(&config_for(&server));
    for _ in 0..3 {
        assert_eq!(processor.process_lead(SAM).await.status.as_u16(), 200);
    }

    let credentials = processor.handler().credentials();
    assert_eq!(
        credentials.snapshot(Service::Telephony).unwrap().token.as_deref(),
        Some("rc-token")
    );
    assert!(credentials.snapshot(Service::Crm).unwrap().expires_at.is_some());
}

#[tokio::test]
async fn concurrent_requests_all_complete() {
    use futures::future;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/restapi/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "rc-token",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;
    mount_sms(&server, 200, 10).await;
    mount_crm_token(&server, 1..=10).await;
    mount_search(&server, ResponseTemplate::new(204), 10).await;

    let processor = processor(&config_for(&server));
    let responses = future::join_all((0..10).map(|_| {
        let processor = processor.clone();
        async move { processor.process_lead(SAM).await }
    }))
    .await;

    assert_eq!(responses.len(), 10);
    for response in responses {
        assert_eq!(response.status.as_u16(), 207);
    }
}

#[tokio::test]
async fn poller_texts_uncontacted_leads() {
    let server = MockServer::start().await;
    mount_telephony_token(&server, 1).await;
    mount_sms(&server, 200, 2).await;
    mount_crm_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/crm/v2/Leads/search"))
        .and(query_param("criteria", "(Lead_Status:equals:Not Contacted)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "id": "rec-1", "Email": "one@example.com", "Phone": "5550000001", "Full_Name": "One" },
                { "id": "rec-2", "Email": "two@example.com", "Phone": "5550000002", "Full_Name": "Two" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_update(&server, "rec-1", 1).await;
    mount_update(&server, "rec-2", 1).await;

    let config = config_for(&server);
    let handler = service::build_handler(&config).expect("handler builds");
    let poller = Poller::new(handler, &config.poller);

    let summary = poller.run_once().await.expect("scan succeeds");
    assert_eq!(
        summary,
        PollSummary {
            scanned: 2,
            contacted: 2,
            ..PollSummary::default()
        }
    );
}

#[tokio::test]
async fn poller_pages_past_leads_it_skips() {
    let server = MockServer::start().await;
    mount_telephony_token(&server, 1).await;
    mount_sms(&server, 200, 1).await;
    mount_crm_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/crm/v2/Leads/search"))
        .and(query_param("page", "1"))
        .and(query_param("per_page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "id": "rec-jane", "Email": "jane@example.com", "Phone": "5550000001",
                "Owner": { "name": "Jane Roe" }
            }],
            "info": { "page": 1, "per_page": 1, "more_records": true }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/crm/v2/Leads/search"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "id": "rec-mine", "Email": "mine@example.com", "Phone": "5550000002",
                "Owner": { "name": "Steven Bridge" }
            }],
            "info": { "page": 2, "per_page": 1, "more_records": false }
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_update(&server, "rec-mine", 1).await;

    let mut config = config_for(&server);
    config.handler.operator = Some("Steven Bridge".into());
    config.poller.batch_size = 1;
    let handler = service::build_handler(&config).expect("handler builds");
    let summary = Poller::new(handler, &config.poller)
        .run_once()
        .await
        .expect("scan succeeds");
    assert_eq!(
        summary,
        PollSummary {
            scanned: 2,
            contacted: 1,
            skipped: 1,
            ..PollSummary::default()
        }
    );
}

#[test]
fn build_handler_requires_both_providers() {
    let config = AppConfig::default();
    assert!(service::build_handler(&config).is_err());
}
