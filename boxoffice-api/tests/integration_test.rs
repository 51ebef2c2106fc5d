use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use boxoffice_api::{
    app,
    middleware::auth::Claims,
    state::{AppState, AuthConfig},
};
use boxoffice_core::models::{Category, EventConfig, PaymentProvider, PaymentStatus};
use boxoffice_core::repository::ReservationStore;
use boxoffice_order::gateways::{AmwalGateway, AmwalSettings, MockGateway};
use boxoffice_order::{
    BroadcastNotifier, CoordinatorSettings, HoldExpirySweeper, InMemorySeatInventory, PaymentGatewayRegistry,
    ReservationCoordinator, SweeperSettings,
};
use boxoffice_store::{InMemoryEventCatalog, InMemoryReservationStore};
use hmac::{Hmac, Mac};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;
use uuid::Uuid;

const JWT_SECRET: &str = "test-jwt-secret";
const CONFIRM_SECRET: &str = "pos-secret";
const AMWAL_KEY: &str = "amwal-server-key";

struct TestApp {
    router: Router,
    store: InMemoryReservationStore,
    inventory: Arc<InMemorySeatInventory>,
    amwal: Arc<MockGateway>,
    event: EventConfig,
}

fn setup() -> TestApp {
    let vip = Category { id: Uuid::new_v4(), name: "VIP".into(), price: 10 };
    let event = EventConfig {
        id: Uuid::new_v4(),
        name: "Concert".into(),
        event_key: "evt-1".into(),
        workspace_key: "ws-1".into(),
        categories: vec![vip.clone()],
    };
    let catalog = InMemoryEventCatalog::new();
    catalog.insert(event.clone());

    let inventory = Arc::new(InMemorySeatInventory::new());
    for seat in ["S1", "S2", "S3"] {
        inventory.add_seat("evt-1", seat, &vip.id.to_string());
    }

    let amwal = Arc::new(MockGateway::new(PaymentProvider::Amwal));
    let registry = PaymentGatewayRegistry::new(PaymentProvider::Amwal)
        .register(amwal.clone())
        .register(Arc::new(MockGateway::new(PaymentProvider::Cash)));

    let store = InMemoryReservationStore::new();
    let coordinator = ReservationCoordinator::new(
        Arc::new(store.clone()),
        Arc::new(catalog),
        inventory.clone(),
        Arc::new(registry),
        CoordinatorSettings {
            confirmation_secret: CONFIRM_SECRET.to_string(),
            ..CoordinatorSettings::default()
        },
    );

    let verifier = AmwalGateway::new(AmwalSettings {
        server_key: AMWAL_KEY.to_string(),
        profile_id: 1,
        base_url: "https://amwal.example.test".to_string(),
        callback_url: "http://localhost/v1/payments/amwal/callback".to_string(),
        return_url: "http://localhost/payment-result".to_string(),
        timeout: Duration::from_secs(5),
    })
    .unwrap();

    let (expiring_tx, _) = tokio::sync::broadcast::channel(16);
    let state = AppState {
        coordinator: Arc::new(coordinator),
        auth: AuthConfig { secret: JWT_SECRET.to_string() },
        amwal: Arc::new(verifier),
        expiring_tx,
        rate_limit: None,
    };

    TestApp {
        router: app(state),
        store,
        inventory,
        amwal,
        event,
    }
}

fn token(role: &str) -> String {
    let claims = Claims {
        sub: Uuid::new_v4().to_string(),
        role: role.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(JWT_SECRET.as_bytes())).unwrap()
}

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(AMWAL_KEY.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
    (status, body)
}

fn post_json(uri: &str, bearer: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(t) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", t));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(t) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", t));
    }
    builder.body(Body::empty()).unwrap()
}

fn callback(tran_ref: &str, code: &str) -> Request<Body> {
    let body = json!({
        "tran_ref": tran_ref,
        "payment_result": { "response_status": code, "transaction_time": "2026-01-01T10:00:00Z" }
    })
    .to_string();
    Request::builder()
        .method("POST")
        .uri("/v1/payments/amwal/callback")
        .header("content-type", "application/json")
        .header("signature", sign(body.as_bytes()))
        .body(Body::from(body))
        .unwrap()
}

async fn create(t: &TestApp, bearer: &str, objects: &[&str]) -> Value {
    let (status, body) = send(
        &t.router,
        post_json(
            &format!("/v1/events/{}/reservations", t.event.id),
            Some(bearer),
            json!({ "objects": objects, "full_name": "Ali Hassan", "phone_number": "07701234567" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body
}

#[tokio::test]
async fn test_health_and_payment_methods_are_public() {
    let t = setup();
    let (status, _) = send(&t.router, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&t.router, get("/v1/payments/methods", None)).await;
    assert_eq!(status, StatusCode::OK);
    let methods = body.as_array().unwrap();
    assert_eq!(methods.len(), 2);
    assert!(methods.iter().any(|m| m["provider"] == "amwal" && m["is_primary"] == true));
}

#[tokio::test]
async fn test_reservation_requires_token() {
    let t = setup();
    let (status, _) = send(
        &t.router,
        post_json(
            &format!("/v1/events/{}/reservations", t.event.id),
            None,
            json!({ "objects": ["S1"], "full_name": "A", "phone_number": "1" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(t.store.reservation_count().await, 0);
}

#[tokio::test]
async fn test_create_then_signed_callback_issues_tickets_once() {
    let t = setup();
    let user = token("USER");
    let created = create(&t, &user, &["S1", "S2"]).await;
    assert_eq!(created["total_price"], 20);
    assert_eq!(created["bill"]["amount"], 20);
    assert_eq!(created["bill"]["status"], "NOT_PAID");
    let payment_id = created["bill"]["payment_id"].as_str().unwrap().to_string();

    let (status, _) = send(&t.router, callback(&payment_id, "A")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(t.store.ticket_count().await, 2);
    assert_eq!(t.inventory.status_of("evt-1", "S1").as_deref(), Some("booked"));

    // Duplicate delivery
    let (status, _) = send(&t.router, callback(&payment_id, "A")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(t.store.ticket_count().await, 2);

    let (status, body) = send(&t.router, get(&format!("/v1/payments/status/{}", payment_id), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PAID");
}

#[tokio::test]
async fn test_unsigned_callback_is_acknowledged_but_ignored() {
    let t = setup();
    let created = create(&t, &token("USER"), &["S1"]).await;
    let payment_id = created["bill"]["payment_id"].as_str().unwrap();

    let body = json!({ "tran_ref": payment_id, "payment_result": { "response_status": "A" } }).to_string();
    let req = Request::builder()
        .method("POST")
        .uri("/v1/payments/amwal/callback")
        .header("content-type", "application/json")
        .header("signature", "00ff")
        .body(Body::from(body))
        .unwrap();
    let (status, _) = send(&t.router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(t.store.ticket_count().await, 0);
}

#[tokio::test]
async fn test_declined_callback_fails_bill() {
    let t = setup();
    let created = create(&t, &token("USER"), &["S1"]).await;
    let payment_id = created["bill"]["payment_id"].as_str().unwrap();

    let (status, _) = send(&t.router, callback(payment_id, "D")).await;
    assert_eq!(status, StatusCode::OK);
    let bill = t.store.get_bill(payment_id).await.unwrap().unwrap();
    assert_eq!(bill.status, PaymentStatus::Failed);
    assert_eq!(t.store.ticket_count().await, 0);
}

#[tokio::test]
async fn test_second_hold_on_same_seat_conflicts() {
    let t = setup();
    create(&t, &token("USER"), &["S1"]).await;

    let (status, body) = send(
        &t.router,
        post_json(
            &format!("/v1/events/{}/reservations", t.event.id),
            Some(&token("USER")),
            json!({ "objects": ["S1"], "full_name": "B", "phone_number": "2" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "seat_conflict");
    assert_eq!(t.store.reservation_count().await, 1);
}

#[tokio::test]
async fn test_manual_pay_checks_shared_secret() {
    let t = setup();
    let created = create(&t, &token("USER"), &["S1"]).await;
    let payment_id = created["bill"]["payment_id"].as_str().unwrap();

    let (status, _) = send(
        &t.router,
        post_json("/v1/payments/pay", None, json!({ "bill_id": payment_id, "secret_key": "wrong" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(t.store.ticket_count().await, 0);

    let (status, body) = send(
        &t.router,
        post_json("/v1/payments/pay", None, json!({ "bill_id": payment_id, "secret_key": CONFIRM_SECRET })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "confirmed");
    assert_eq!(body["tickets"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancel_one_of_two_tickets() {
    let t = setup();
    let user = token("USER");
    let created = create(&t, &user, &["S1", "S2"]).await;
    let reservation_id = created["id"].as_str().unwrap().to_string();
    let payment_id = created["bill"]["payment_id"].as_str().unwrap().to_string();
    send(&t.router, callback(&payment_id, "A")).await;

    let (_, view) = send(&t.router, get(&format!("/v1/reservations/{}", reservation_id), Some(&user))).await;
    let first_ticket = view["line_items"][0]["ticket_number"].as_i64().unwrap();

    // Customers cannot cancel
    let (status, _) = send(
        &t.router,
        post_json("/v1/tickets/cancel", Some(&user), json!({ "ticket_numbers": [first_ticket] })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &t.router,
        post_json("/v1/tickets/cancel", Some(&token("ADMIN")), json!({ "ticket_numbers": [first_ticket] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["canceled_tickets"], json!([first_ticket]));

    let (_, view) = send(&t.router, get(&format!("/v1/reservations/{}", reservation_id), Some(&token("ADMIN")))).await;
    assert_eq!(view["total_price"], 10);
    assert_eq!(view["bill"]["status"], "CANCELED");
    assert_eq!(t.amwal.canceled().len(), 1);
    assert_eq!(t.inventory.status_of("evt-1", "S1").as_deref(), Some("free"));
}

#[tokio::test]
async fn test_cancel_with_unknown_ticket_reports_missing() {
    let t = setup();
    let (status, body) = send(
        &t.router,
        post_json("/v1/tickets/cancel", Some(&token("POINT_OF_SALE")), json!({ "ticket_numbers": [424242] })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["missing"], json!([424242]));
}

#[tokio::test]
async fn test_expired_hold_is_swept() {
    let t = setup();
    let created = create(&t, &token("USER"), &["S1"]).await;
    assert_eq!(t.inventory.status_of("evt-1", "S1").as_deref(), Some("reservedByToken"));

    let (tx, _) = tokio::sync::broadcast::channel(4);
    let sweeper = HoldExpirySweeper::new(
        Arc::new(t.store.clone()),
        t.inventory.clone(),
        Arc::new(BroadcastNotifier::new(tx)),
        SweeperSettings::default(),
    );
    let report = sweeper
        .sweep_once(chrono::Utc::now() + chrono::Duration::minutes(16))
        .await
        .unwrap();
    assert_eq!(report.released, 1);
    assert_eq!(t.store.reservation_count().await, 0);
    assert_eq!(t.inventory.status_of("evt-1", "S1").as_deref(), Some("free"));

    let payment_id = created["bill"]["payment_id"].as_str().unwrap();
    let (status, _) = send(&t.router, get(&format!("/v1/payments/status/{}", payment_id), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_routes_reject_customers() {
    let t = setup();
    let (status, _) = send(&t.router, get("/v1/admin/payments/pending-actions", Some(&token("USER")))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&t.router, get("/v1/admin/payments/pending-actions", Some(&token("ADMIN")))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_listings_and_ticket_lookup_are_scoped_to_caller() {
    let t = setup();
    let owner = token("USER");
    let stranger = token("USER");
    let created = create(&t, &owner, &["S1", "S2"]).await;
    create(&t, &stranger, &["S3"]).await;
    let payment_id = created["bill"]["payment_id"].as_str().unwrap().to_string();
    send(&t.router, callback(&payment_id, "A")).await;

    let (status, page) = send(&t.router, get("/v1/reservations?page=1&per_page=10", Some(&owner))).await;
    assert_eq!(status, StatusCode::OK, "{}", page);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["id"], created["id"]);

    let (_, page) = send(&t.router, get("/v1/reservations?per_page=1", Some(&token("ADMIN")))).await;
    assert_eq!(page["total"], 2);
    assert_eq!(page["total_pages"], 2);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);

    let (status, tickets) = send(&t.router, get("/v1/tickets", Some(&owner))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tickets["total"], 2);
    let number = tickets["items"][0]["number"].as_i64().unwrap();

    let (status, ticket) = send(&t.router, get(&format!("/v1/tickets/{}", number), Some(&owner))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["reservation_id"], created["id"]);
    assert_eq!(ticket["used"], false);

    let (status, _) = send(&t.router, get(&format!("/v1/tickets/{}", number), Some(&stranger))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, empty) = send(&t.router, get("/v1/tickets", Some(&stranger))).await;
    assert_eq!(empty["total"], 0);
}

#[tokio::test]
async fn test_ticket_used_twice_is_a_plain_conflict() {
    let t = setup();
    let created = create(&t, &token("USER"), &["S1"]).await;
    let payment_id = created["bill"]["payment_id"].as_str().unwrap().to_string();
    send(&t.router, callback(&payment_id, "A")).await;
    let (_, tickets) = send(&t.router, get("/v1/tickets", Some(&token("ADMIN")))).await;
    let number = tickets["items"][0]["number"].as_i64().unwrap();

    let staff = token("POINT_OF_SALE");
    let uri = format!("/v1/tickets/{}/use", number);
    let (status, _) = send(&t.router, post_json(&uri, Some(&staff), json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&t.router, post_json(&uri, Some(&staff), json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");
}
