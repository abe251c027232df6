//! HTTP surface mounted under `/api`.
//!
//! Handlers stay thin: extract, hop onto the blocking pool and hand over to
//! the services, which own every rule.

use crate::config::AppConfig;
use crate::engine::{FreightService, RatingService, SettlementService};
use crate::errors::ApiError;
use crate::guard::AuthenticatedUser;
use crate::models::{
    CreateFreightRequest, CreateWithdrawalRequest, DriverFilter, DriverProfileUpdate,
    DriverRegistrationRequest, LoginRequest, ProcessWithdrawalRequest, RefreshTokenRequest,
    RegisterUserRequest, SubmitRatingRequest, UpsertSettingRequest, UserProfileUpdate,
    WithdrawalQuery,
};
use crate::services::{AdminService, DriverService, UserService};
use crate::store::Store;
use actix_web::{get, post, put, web, HttpResponse, Responder};
use log::debug;
use serde_json::json;

type StoreData = web::Data<dyn Store>;

/// Runs a store-bound closure on the blocking pool.
async fn blocking<T, F>(store: StoreData, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&dyn Store) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    web::block(move || f(store.get_ref())).await?
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        debug!("Rejected JSON payload: {}", err);
        ApiError::validation(format!("Invalid request body: {}", err)).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _req| {
        ApiError::validation(format!("Invalid path parameter: {}", err)).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        ApiError::validation(format!("Invalid query string: {}", err)).into()
    }))
    .service(health_check)
    .service(register)
    .service(login)
    .service(refresh_token)
    .service(get_me)
    .service(update_me)
    .service(register_driver)
    // `/drivers/me*` must win over `/drivers/{id}`
    .service(driver_me)
    .service(update_driver_me)
    .service(driver_freights)
    .service(driver_transactions)
    .service(list_drivers)
    .service(get_driver)
    .service(driver_ratings)
    .service(request_freight)
    .service(list_my_freights)
    .service(list_pending_freights)
    .service(get_freight)
    .service(accept_freight)
    .service(complete_freight)
    .service(cancel_freight)
    .service(rate_freight)
    .service(request_withdrawal)
    .service(list_my_withdrawals)
    .service(admin_stats)
    .service(admin_withdrawals)
    .service(process_withdrawal)
    .service(admin_settings)
    .service(upsert_setting);
}

#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

// Identity

#[post("/register")]
async fn register(
    store: StoreData,
    config: web::Data<AppConfig>,
    body: web::Json<RegisterUserRequest>,
) -> Result<HttpResponse, ApiError> {
    let config = config.into_inner();
    let user = blocking(store, move |store| {
        UserService::register(body.into_inner(), &config, store)
    })
    .await?;
    Ok(HttpResponse::Created().json(user))
}

#[post("/login")]
async fn login(
    store: StoreData,
    config: web::Data<AppConfig>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    debug!("Login attempt for {}", body.login);
    let config = config.into_inner();
    let response = blocking(store, move |store| {
        UserService::login(body.into_inner(), &config, store)
    })
    .await?;
    Ok(HttpResponse::Ok().json(response))
}

#[post("/refresh-token")]
async fn refresh_token(
    store: StoreData,
    config: web::Data<AppConfig>,
    body: web::Json<RefreshTokenRequest>,
) -> Result<HttpResponse, ApiError> {
    let config = config.into_inner();
    let response = blocking(store, move |store| {
        UserService::refresh(body.into_inner(), &config, store)
    })
    .await?;
    Ok(HttpResponse::Ok().json(response))
}

#[get("/me")]
async fn get_me(caller: AuthenticatedUser, store: StoreData) -> Result<HttpResponse, ApiError> {
    let user = blocking(store, move |store| UserService::get(caller.user_id, store)).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[put("/me")]
async fn update_me(
    caller: AuthenticatedUser,
    store: StoreData,
    body: web::Json<UserProfileUpdate>,
) -> Result<HttpResponse, ApiError> {
    let user = blocking(store, move |store| {
        UserService::update_profile(&caller, body.into_inner(), store)
    })
    .await?;
    Ok(HttpResponse::Ok().json(user))
}

// Drivers

#[post("/drivers/register")]
async fn register_driver(
    caller: AuthenticatedUser,
    store: StoreData,
    config: web::Data<AppConfig>,
    body: web::Json<DriverRegistrationRequest>,
) -> Result<HttpResponse, ApiError> {
    let config = config.into_inner();
    let response = blocking(store, move |store| {
        DriverService::register(&caller, body.into_inner(), &config, store)
    })
    .await?;
    Ok(HttpResponse::Created().json(response))
}

#[get("/drivers/me")]
async fn driver_me(caller: AuthenticatedUser, store: StoreData) -> Result<HttpResponse, ApiError> {
    let driver = blocking(store, move |store| DriverService::me(&caller, store)).await?;
    Ok(HttpResponse::Ok().json(driver))
}

#[put("/drivers/me")]
async fn update_driver_me(
    caller: AuthenticatedUser,
    store: StoreData,
    body: web::Json<DriverProfileUpdate>,
) -> Result<HttpResponse, ApiError> {
    let driver = blocking(store, move |store| {
        DriverService::update_profile(&caller, body.into_inner(), store)
    })
    .await?;
    Ok(HttpResponse::Ok().json(driver))
}

#[get("/drivers/me/freights")]
async fn driver_freights(caller: AuthenticatedUser, store: StoreData) -> Result<HttpResponse, ApiError> {
    let freights = blocking(store, move |store| FreightService::list_assigned(&caller, store)).await?;
    Ok(HttpResponse::Ok().json(freights))
}

#[get("/drivers/me/transactions")]
async fn driver_transactions(caller: AuthenticatedUser, store: StoreData) -> Result<HttpResponse, ApiError> {
    let transactions = blocking(store, move |store| {
        SettlementService::list_transactions(&caller, store)
    })
    .await?;
    Ok(HttpResponse::Ok().json(transactions))
}

#[get("/drivers")]
async fn list_drivers(
    _caller: AuthenticatedUser,
    store: StoreData,
    filter: web::Query<DriverFilter>,
) -> Result<HttpResponse, ApiError> {
    let drivers = blocking(store, move |store| DriverService::search(&filter, store)).await?;
    debug!("Directory search returned {} drivers", drivers.len());
    Ok(HttpResponse::Ok().json(drivers))
}

#[get("/drivers/{id}")]
async fn get_driver(
    _caller: AuthenticatedUser,
    store: StoreData,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let driver_id = path.into_inner();
    let driver = blocking(store, move |store| DriverService::get(driver_id, store)).await?;
    Ok(HttpResponse::Ok().json(driver))
}

#[get("/drivers/{id}/ratings")]
async fn driver_ratings(
    _caller: AuthenticatedUser,
    store: StoreData,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let driver_id = path.into_inner();
    let ratings = blocking(store, move |store| RatingService::list_for_driver(driver_id, store)).await?;
    Ok(HttpResponse::Ok().json(ratings))
}

// Freights

#[post("/freights")]
async fn request_freight(
    caller: AuthenticatedUser,
    store: StoreData,
    body: web::Json<CreateFreightRequest>,
) -> Result<HttpResponse, ApiError> {
    let freight = blocking(store, move |store| {
        FreightService::request_freight(&caller, body.into_inner(), store)
    })
    .await?;
    Ok(HttpResponse::Created().json(freight))
}

#[get("/freights")]
async fn list_my_freights(caller: AuthenticatedUser, store: StoreData) -> Result<HttpResponse, ApiError> {
    let freights = blocking(store, move |store| FreightService::list_requested(&caller, store)).await?;
    Ok(HttpResponse::Ok().json(freights))
}

#[get("/freights/pending")]
async fn list_pending_freights(caller: AuthenticatedUser, store: StoreData) -> Result<HttpResponse, ApiError> {
    let freights = blocking(store, move |store| FreightService::list_pending(&caller, store)).await?;
    Ok(HttpResponse::Ok().json(freights))
}

#[get("/freights/{id}")]
async fn get_freight(
    caller: AuthenticatedUser,
    store: StoreData,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let freight_id = path.into_inner();
    let freight = blocking(store, move |store| {
        FreightService::get_freight(&caller, freight_id, store)
    })
    .await?;
    Ok(HttpResponse::Ok().json(freight))
}

#[post("/freights/{id}/accept")]
async fn accept_freight(
    caller: AuthenticatedUser,
    store: StoreData,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let freight_id = path.into_inner();
    let freight = blocking(store, move |store| {
        FreightService::accept_freight(&caller, freight_id, store)
    })
    .await?;
    Ok(HttpResponse::Ok().json(freight))
}

#[post("/freights/{id}/complete")]
async fn complete_freight(
    caller: AuthenticatedUser,
    store: StoreData,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let freight_id = path.into_inner();
    let freight = blocking(store, move |store| {
        FreightService::complete_freight(&caller, freight_id, store)
    })
    .await?;
    Ok(HttpResponse::Ok().json(freight))
}

#[post("/freights/{id}/cancel")]
async fn cancel_freight(
    caller: AuthenticatedUser,
    store: StoreData,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let freight_id = path.into_inner();
    let freight = blocking(store, move |store| {
        FreightService::cancel_freight(&caller, freight_id, store)
    })
    .await?;
    Ok(HttpResponse::Ok().json(freight))
}

#[post("/freights/{id}/rating")]
async fn rate_freight(
    caller: AuthenticatedUser,
    store: StoreData,
    path: web::Path<i32>,
    body: web::Json<SubmitRatingRequest>,
) -> Result<HttpResponse, ApiError> {
    let freight_id = path.into_inner();
    let rating = blocking(store, move |store| {
        RatingService::submit_rating(&caller, freight_id, body.into_inner(), store)
    })
    .await?;
    Ok(HttpResponse::Created().json(rating))
}

// Withdrawals

#[post("/withdrawals")]
async fn request_withdrawal(
    caller: AuthenticatedUser,
    store: StoreData,
    body: web::Json<CreateWithdrawalRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = blocking(store, move |store| {
        SettlementService::request_withdrawal(&caller, body.into_inner(), store)
    })
    .await?;
    Ok(HttpResponse::Created().json(request))
}

#[get("/withdrawals")]
async fn list_my_withdrawals(caller: AuthenticatedUser, store: StoreData) -> Result<HttpResponse, ApiError> {
    let requests = blocking(store, move |store| SettlementService::list_own(&caller, store)).await?;
    Ok(HttpResponse::Ok().json(requests))
}

// Back office

#[get("/admin/stats")]
async fn admin_stats(caller: AuthenticatedUser, store: StoreData) -> Result<HttpResponse, ApiError> {
    let stats = blocking(store, move |store| AdminService::stats(&caller, store)).await?;
    Ok(HttpResponse::Ok().json(stats))
}

#[get("/admin/withdrawals")]
async fn admin_withdrawals(
    caller: AuthenticatedUser,
    store: StoreData,
    query: web::Query<WithdrawalQuery>,
) -> Result<HttpResponse, ApiError> {
    let status = query.into_inner().status;
    let requests = blocking(store, move |store| {
        SettlementService::list_all(&caller, status, store)
    })
    .await?;
    Ok(HttpResponse::Ok().json(requests))
}

#[post("/admin/withdrawals/{id}/process")]
async fn process_withdrawal(
    caller: AuthenticatedUser,
    store: StoreData,
    path: web::Path<i32>,
    body: web::Json<ProcessWithdrawalRequest>,
) -> Result<HttpResponse, ApiError> {
    let request_id = path.into_inner();
    let request = blocking(store, move |store| {
        SettlementService::process_withdrawal(&caller, request_id, body.into_inner(), store)
    })
    .await?;
    Ok(HttpResponse::Ok().json(request))
}

#[get("/admin/settings")]
async fn admin_settings(caller: AuthenticatedUser, store: StoreData) -> Result<HttpResponse, ApiError> {
    let settings = blocking(store, move |store| AdminService::list_settings(&caller, store)).await?;
    Ok(HttpResponse::Ok().json(settings))
}

#[put("/admin/settings/{key}")]
async fn upsert_setting(
    caller: AuthenticatedUser,
    store: StoreData,
    path: web::Path<String>,
    body: web::Json<UpsertSettingRequest>,
) -> Result<HttpResponse, ApiError> {
    let key = path.into_inner();
    let setting = blocking(store, move |store| {
        AdminService::upsert_setting(&caller, &key, body.into_inner(), store)
    })
    .await?;
    Ok(HttpResponse::Ok().json(setting))
}
