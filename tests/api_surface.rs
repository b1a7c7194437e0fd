mod support;

use servicehub_client::api::{PaymentRequest, ProfilePatch, Registration};
use servicehub_client::common::Role;

use support::{FakeBackend, anonymous_client, signed_in_client};

fn payment(total_amount: f64) -> PaymentRequest {
    PaymentRequest {
        booking_id: Some("12".to_string()),
        total_amount,
        customer_name: "Rahim Uddin".to_string(),
        customer_email: "rahim@example.com".to_string(),
        customer_phone: "+8801700000000".to_string(),
        customer_address: "Dhaka".to_string(),
    }
}

#[tokio::test]
async fn rooms_accept_a_bare_list() {
    let backend = FakeBackend::new("access-1");
    let client = signed_in_client(&backend, "access-1");

    let rooms = client.chat().rooms().await.unwrap();
    assert_eq!(rooms.count, 1);
    assert_eq!(rooms.results[0].id, "7");
    assert_eq!(rooms.results[0].unread_count, 2);
}

#[tokio::test]
async fn notifications_list_reads_the_envelope() {
    let backend = FakeBackend::new("access-1");
    let client = signed_in_client(&backend, "access-1");

    let page = client.notifications().list().await.unwrap();
    assert_eq!(page.count, 1);
    assert_eq!(page.results[0].kind.as_deref(), Some("booking"));
    assert!(!page.results[0].is_read);
}

#[tokio::test]
async fn profile_update_refreshes_the_cached_user() {
    let backend = FakeBackend::new("access-1");
    let client = signed_in_client(&backend, "access-1");

    let patch = ProfilePatch {
        first_name: Some("Karim".to_string()),
        ..ProfilePatch::default()
    };
    let user = client.users().update_profile(&patch).await.unwrap();
    assert_eq!(user.first_name, "Karim");

    let cached = client.session().user().unwrap().expect("user cached");
    assert_eq!(cached.first_name, "Karim");
    let sent = backend.requests_to("/users/profile/");
    assert!(sent[0].body.as_ref().unwrap().get("email").is_none());
}

#[tokio::test]
async fn weak_password_blocks_registration() {
    let backend = FakeBackend::new("access-1");
    let client = anonymous_client(&backend);

    let err = client
        .auth()
        .register(&Registration {
            email: "rahim@example.com".to_string(),
            password: "password".to_string(),
            first_name: "Rahim".to_string(),
            last_name: "Uddin".to_string(),
            phone: None,
            user_type: Role::Customer,
        })
        .await
        .unwrap_err();
    assert!(err.field_error("password").is_some());
    assert!(backend.requests_to("/users/register/").is_empty());
}

#[tokio::test]
async fn payment_initiation_returns_the_gateway_redirect() {
    let backend = FakeBackend::new("access-1");
    let client = signed_in_client(&backend, "access-1");

    let initiation = client.payments().initiate(&payment(1500.0)).await.unwrap();
    assert_eq!(
        initiation.redirect_url(),
        Some("https://sandbox.gateway.test/pay/TX9")
    );
    assert_eq!(initiation.payment_id.as_deref(), Some("41"));

    let err = client.payments().initiate(&payment(0.0)).await.unwrap_err();
    assert!(err.field_error("total_amount").is_some());
    assert_eq!(backend.requests_to("/payments/initiate/").len(), 1);
}
