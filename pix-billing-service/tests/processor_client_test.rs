use pix_billing_service::services::processor::{ProcessorApi, ProcessorError, StripeClient};
use secrecy::Secret;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> StripeClient {
    StripeClient::new(server.uri(), Some(Secret::new("sk_test".to_string())))
}

#[tokio::test]
async fn create_customer_posts_form_with_bearer_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/customers"))
        .and(header("authorization", "Bearer sk_test"))
        .and(body_string_contains("metadata%5Buser_id%5D=U1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "cus_1" })))
        .expect(1)
        .mount(&server)
        .await;

    let customer = client_for(&server)
        .create_customer("u1@example.com", "U1")
        .await
        .unwrap();
    assert_eq!(customer.id, "cus_1");
}

#[tokio::test]
async fn create_subscription_requests_incomplete_payment() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/subscriptions"))
        .and(body_string_contains("payment_behavior=default_incomplete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sub_1",
            "status": "incomplete",
            "latest_invoice": { "id": "in_1", "payment_intent": "pi_1" }
        })))
        .mount(&server)
        .await;

    let created = client_for(&server)
        .create_subscription("cus_1", "price_monthly", "U1")
        .await
        .unwrap();
    assert_eq!(created.value.id, "sub_1");
    assert_eq!(created.value.latest_invoice_id(), Some("in_1"));
    assert_eq!(created.raw["latest_invoice"]["payment_intent"], "pi_1");
}

#[tokio::test]
async fn api_errors_carry_status_and_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/customers"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {
                "type": "card_error",
                "code": "card_declined",
                "message": "Your card was declined."
            }
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .create_customer("u1@example.com", "U1")
        .await
        .unwrap_err();

    match err {
        ProcessorError::Api {
            status,
            code,
            message,
            ..
        } => {
            assert_eq!(status, 402);
            assert_eq!(code.as_deref(), Some("card_declined"));
            assert_eq!(message, "Your card was declined.");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn list_payment_intents_filters_by_customer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payment_intents"))
        .and(query_param("customer", "cus_1"))
        .and(query_param("limit", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                { "id": "pi_2", "invoice": "in_2", "created": 20 },
                { "id": "pi_1", "created": 10 }
            ]
        })))
        .mount(&server)
        .await;

    let intents = client_for(&server)
        .list_payment_intents("cus_1", 10)
        .await
        .unwrap();
    assert_eq!(intents.len(), 2);
    assert_eq!(intents[0].value.id, "pi_2");
    assert!(intents[1].value.invoice.is_none());
}

#[tokio::test]
async fn garbage_success_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payment_intents/pi_1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .get_payment_intent("pi_1")
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessorError::Decode(_)));
}
