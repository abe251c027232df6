//! End-to-end tests driving the HTTP surface against the in-memory store.

use actix_web::dev::{Service, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::test::{self as actix_test, TestRequest};
use actix_web::{web, App};
use freightlink::config::{AdminBootstrap, AppConfig};
use freightlink::middleware::{RequestLogger, REQUEST_ID_HEADER};
use freightlink::routes;
use freightlink::services::UserService;
use freightlink::store::{MemoryStore, Store};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;

const PASSWORD: &str = "secret123";

async fn spawn_app() -> impl Service<actix_http::Request, Response = ServiceResponse, Error = actix_web::Error> {
    let config = AppConfig::for_tests();
    let store = Arc::new(MemoryStore::new());
    let admin = AdminBootstrap {
        username: "admin".to_string(),
        email: "admin@example.com".to_string(),
        password: PASSWORD.to_string(),
    };
    UserService::ensure_admin(&admin, &config, store.as_ref()).unwrap();

    let store: Arc<dyn Store> = store;
    actix_test::init_service(
        App::new()
            .wrap(RequestLogger)
            .app_data(web::Data::from(store))
            .app_data(web::Data::new(config))
            .service(web::scope("/api").configure(routes::configure)),
    )
    .await
}

async fn send<S>(app: &S, req: TestRequest) -> (StatusCode, Value)
where
    S: Service<actix_http::Request, Response = ServiceResponse, Error = actix_web::Error>,
{
    let resp = actix_test::call_service(app, req.to_request()).await;
    let status = resp.status();
    let body = actix_test::read_body(resp).await;
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

fn authed(req: TestRequest, token: &str) -> TestRequest {
    req.insert_header(("Authorization", format!("Bearer {}", token)))
}

fn money(value: &Value) -> Decimal {
    value.as_str().unwrap().parse().unwrap()
}

/// Registers and logs in a plain user, returning the access token.
async fn sign_up<S>(app: &S, username: &str) -> String
where
    S: Service<actix_http::Request, Response = ServiceResponse, Error = actix_web::Error>,
{
    let (status, _) = send(
        app,
        TestRequest::post().uri("/api/register").set_json(json!({
            "username": username,
            "password": PASSWORD,
            "name": format!("{} Example", username),
            "email": format!("{}@example.com", username),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    log_in(app, username).await["token"].as_str().unwrap().to_string()
}

async fn log_in<S>(app: &S, login: &str) -> Value
where
    S: Service<actix_http::Request, Response = ServiceResponse, Error = actix_web::Error>,
{
    let (status, body) = send(
        app,
        TestRequest::post()
            .uri("/api/login")
            .set_json(json!({ "login": login, "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body
}

/// Signs up a user and promotes them to driver. Returns the driver token
/// and driver id.
async fn sign_up_driver<S>(app: &S, username: &str) -> (String, i64)
where
    S: Service<actix_http::Request, Response = ServiceResponse, Error = actix_web::Error>,
{
    let token = sign_up(app, username).await;
    let (status, body) = send(
        app,
        authed(TestRequest::post().uri("/api/drivers/register"), &token).set_json(json!({
            "vehicle_model": "Fiorino",
            "license_plate": "abc1d23",
            "vehicle_type": "Van",
            "location": "Sao Paulo",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["driver"]["license_plate"], "ABC1D23");
    (
        body["token"].as_str().unwrap().to_string(),
        body["driver"]["id"].as_i64().unwrap(),
    )
}

async fn post_freight<S>(app: &S, token: &str, amount: &str) -> i64
where
    S: Service<actix_http::Request, Response = ServiceResponse, Error = actix_web::Error>,
{
    let (status, body) = send(
        app,
        authed(TestRequest::post().uri("/api/freights"), token).set_json(json!({
            "pickup_address": "Rua A, 100",
            "delivery_address": "Av. B, 200",
            "date": "2026-11-02",
            "time": "09:30:00",
            "package_type": "boxes",
            "amount": amount,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    assert!(body["driver_id"].is_null());
    body["id"].as_i64().unwrap()
}

async fn action<S>(app: &S, token: &str, freight_id: i64, verb: &str) -> (StatusCode, Value)
where
    S: Service<actix_http::Request, Response = ServiceResponse, Error = actix_web::Error>,
{
    send(
        app,
        authed(
            TestRequest::post().uri(&format!("/api/freights/{}/{}", freight_id, verb)),
            token,
        ),
    )
    .await
}

#[actix_web::test]
async fn health_check_is_public_and_tagged_with_request_id() {
    let app = spawn_app().await;
    let resp = actix_test::call_service(
        &app,
        TestRequest::get().uri("/api/health").to_request(),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key(REQUEST_ID_HEADER));
    let body: Value = actix_test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
}

#[actix_web::test]
async fn freight_lifecycle_end_to_end() {
    let app = spawn_app().await;
    let requester = sign_up(&app, "ana").await;
    let (first_driver, first_driver_id) = sign_up_driver(&app, "bruno").await;
    let (second_driver, _) = sign_up_driver(&app, "carla").await;

    let freight_id = post_freight(&app, &requester, "150.00").await;

    let (status, pending) = send(
        &app,
        authed(TestRequest::get().uri("/api/freights/pending"), &second_driver),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let (status, body) = action(&app, &first_driver, freight_id, "accept").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["driver_id"].as_i64(), Some(first_driver_id));

    let (status, body) = action(&app, &second_driver, freight_id, "accept").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_STATE_TRANSITION");

    let (status, body) = action(&app, &second_driver, freight_id, "complete").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, body) = action(&app, &first_driver, freight_id, "complete").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");

    let (_, me) = send(&app, authed(TestRequest::get().uri("/api/drivers/me"), &first_driver)).await;
    assert_eq!(money(&me["balance"]), dec!(150.00));

    let rate = |token: String| {
        authed(
            TestRequest::post().uri(&format!("/api/freights/{}/rating", freight_id)),
            &token,
        )
        .set_json(json!({ "rating": 5, "comment": "on time" }))
    };
    let (status, _) = send(&app, rate(requester.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, driver) = send(
        &app,
        authed(
            TestRequest::get().uri(&format!("/api/drivers/{}", first_driver_id)),
            &requester,
        ),
    )
    .await;
    assert_eq!(driver["average_rating"].as_f64(), Some(5.0));
    assert_eq!(driver["total_ratings"].as_i64(), Some(1));

    let (status, body) = send(&app, rate(requester.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "DUPLICATE_RATING");

    let (_, assigned) = send(
        &app,
        authed(TestRequest::get().uri("/api/drivers/me/freights"), &first_driver),
    )
    .await;
    assert_eq!(assigned.as_array().unwrap().len(), 1);

    let (_, ledger) = send(
        &app,
        authed(TestRequest::get().uri("/api/drivers/me/transactions"), &first_driver),
    )
    .await;
    assert_eq!(ledger[0]["transaction_type"], "payment");
}

#[actix_web::test]
async fn freight_visibility_and_cancellation() {
    let app = spawn_app().await;
    let requester = sign_up(&app, "dora").await;
    let stranger = sign_up(&app, "edu").await;
    let (driver, _) = sign_up_driver(&app, "fabi").await;
    let freight_id = post_freight(&app, &requester, "80.00").await;

    let get = |token: &str| {
        authed(
            TestRequest::get().uri(&format!("/api/freights/{}", freight_id)),
            token,
        )
    };
    assert_eq!(send(&app, get(&stranger)).await.0, StatusCode::FORBIDDEN);
    // Pending freights are visible to drivers deciding whether to accept
    assert_eq!(send(&app, get(&driver)).await.0, StatusCode::OK);

    let (status, _) = action(&app, &stranger, freight_id, "cancel").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = action(&app, &requester, freight_id, "cancel").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "canceled");

    let (status, body) = action(&app, &driver, freight_id, "accept").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_STATE_TRANSITION");
}

#[actix_web::test]
async fn withdrawal_requests_and_admin_processing() {
    let app = spawn_app().await;
    let requester = sign_up(&app, "gabi").await;
    let (driver, driver_id) = sign_up_driver(&app, "hugo").await;
    let admin = log_in(&app, "admin").await["token"].as_str().unwrap().to_string();

    let freight_id = post_freight(&app, &requester, "150.00").await;
    assert_eq!(action(&app, &driver, freight_id, "accept").await.0, StatusCode::OK);
    assert_eq!(action(&app, &driver, freight_id, "complete").await.0, StatusCode::OK);

    let withdraw = |amount: &str| {
        authed(TestRequest::post().uri("/api/withdrawals"), &driver)
            .set_json(json!({ "amount": amount, "pix_key": "hugo@pix" }))
    };

    let (status, body) = send(&app, withdraw("200.00")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INSUFFICIENT_BALANCE");

    let (status, body) = send(&app, withdraw("100.00")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    let request_id = body["id"].as_i64().unwrap();

    let (status, body) = send(&app, withdraw("10.00")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "DUPLICATE_PENDING");

    let (status, _) = send(
        &app,
        authed(TestRequest::get().uri("/api/admin/withdrawals"), &driver),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, queue) = send(
        &app,
        authed(
            TestRequest::get().uri("/api/admin/withdrawals?status=pending"),
            &admin,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue[0]["driver_id"].as_i64(), Some(driver_id));

    let process = |token: &str| {
        authed(
            TestRequest::post().uri(&format!("/api/admin/withdrawals/{}/process", request_id)),
            token,
        )
        .set_json(json!({ "decision": "approved", "notes": "paid" }))
    };
    assert_eq!(send(&app, process(&driver)).await.0, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, process(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");

    let (status, body) = send(&app, process(&admin)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_STATE_TRANSITION");

    let (_, me) = send(&app, authed(TestRequest::get().uri("/api/drivers/me"), &driver)).await;
    assert_eq!(money(&me["balance"]), dec!(50.00));

    let (_, ledger) = send(
        &app,
        authed(TestRequest::get().uri("/api/drivers/me/transactions"), &driver),
    )
    .await;
    assert_eq!(ledger.as_array().unwrap().len(), 2);

    let (_, stats) = send(&app, authed(TestRequest::get().uri("/api/admin/stats"), &admin)).await;
    assert_eq!(stats["completed_freights"].as_i64(), Some(1));
    assert_eq!(stats["pending_withdrawals"].as_i64(), Some(0));
}

#[actix_web::test]
async fn admin_updates_fee_settings() {
    let app = spawn_app().await;
    let admin = log_in(&app, "admin@example.com").await["token"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, settings) = send(&app, authed(TestRequest::get().uri("/api/admin/settings"), &admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(settings
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s["key"] == "platform_fee_percent"));

    let (status, setting) = send(
        &app,
        authed(TestRequest::put().uri("/api/admin/settings/platform_fee_percent"), &admin)
            .set_json(json!({ "value": "12" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(setting["value"], "12");
    assert_eq!(setting["category"], "fees");
}

#[actix_web::test]
async fn refresh_tokens_rotate() {
    let app = spawn_app().await;
    sign_up(&app, "iris").await;
    let session = log_in(&app, "iris").await;
    let refresh = |token: &Value| {
        TestRequest::post()
            .uri("/api/refresh-token")
            .set_json(json!({ "refresh_token": token }))
    };

    let (status, rotated) = send(&app, refresh(&session["refresh_token"])).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(rotated["refresh_token"], session["refresh_token"]);

    let (status, body) = send(&app, refresh(&session["refresh_token"])).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[actix_web::test]
async fn rejects_bad_credentials_and_malformed_input() {
    let app = spawn_app().await;
    let token = sign_up(&app, "joao").await;

    let (status, body) = send(&app, TestRequest::get().uri("/api/me")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = send(&app, authed(TestRequest::get().uri("/api/me"), "not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        authed(TestRequest::post().uri("/api/freights"), &token)
            .insert_header(("Content-Type", "application/json"))
            .set_payload("{\"pickup_address\":"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = send(
        &app,
        authed(TestRequest::get().uri("/api/drivers/abc"), &token),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    // Plain users cannot act as drivers
    let (status, _) = send(
        &app,
        authed(TestRequest::get().uri("/api/freights/pending"), &token),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
