use crate::config::{AdminBootstrap, AppConfig};
use crate::engine::caller_driver;
use crate::errors::ApiError;
use crate::guard::{require_role, AuthenticatedUser};
use crate::models::*;
use crate::store::Store;
use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use log::{debug, error, info};
use std::cmp::Ordering;
use uuid::Uuid;

pub const MIN_PASSWORD_LENGTH: usize = 6;

pub struct AuthService;

impl AuthService {
    pub fn hash_password(password: &str, cost: u32) -> Result<String, ApiError> {
        hash(password, cost)
            .map_err(|e| {
                error!("Failed to hash password: {}", e);
                ApiError::InternalError("Failed to hash password".to_string())
            })
    }

    pub fn verify_password(password: &str, hash: &str) -> Result<bool, ApiError> {
        verify(password, hash)
            .map_err(|e| {
                error!("Failed to verify password: {}", e);
                ApiError::InternalError("Failed to verify password".to_string())
            })
    }

    pub fn generate_token(user_id: i32, role: Role, config: &AppConfig) -> Result<String, ApiError> {
        let now = Utc::now();
        let iat = now.timestamp() as usize;
        let exp = (now + Duration::hours(config.jwt_expiry)).timestamp() as usize;

        let claims = Claims {
            sub: user_id.to_string(),
            exp,
            iat,
            user_id,
            role,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret.as_bytes())
        )
        .map_err(|e| {
            error!("Failed to generate token: {}", e);
            ApiError::InternalError("Failed to generate token".to_string())
        })
    }

    pub fn generate_refresh_token() -> String {
        Uuid::new_v4().to_string()
    }

    /// Issues an access token plus a persisted refresh token.
    pub fn issue_tokens(user: &User, config: &AppConfig, store: &dyn Store) -> Result<(String, String), ApiError> {
        let token = Self::generate_token(user.id, user.role, config)?;
        let refresh_token = Self::generate_refresh_token();
        store.insert_refresh_token(NewRefreshToken {
            user_id: user.id,
            token: refresh_token.clone(),
            expires_at: (Utc::now() + Duration::days(config.refresh_expiry)).naive_utc(),
        })?;
        Ok((token, refresh_token))
    }
}

/// Emails are stored lowercased; usernames are matched as typed.
fn normalize_login(login: &str) -> String {
    let login = login.trim();
    if login.contains('@') {
        login.to_lowercase()
    } else {
        login.to_string()
    }
}

pub struct UserService;

impl UserService {
    pub fn register(request: RegisterUserRequest, config: &AppConfig, store: &dyn Store) -> Result<User, ApiError> {
        let username = request.username.trim().to_string();
        if username.is_empty() {
            return Err(ApiError::field("username", "Username is required"));
        }
        let email = request.email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(ApiError::field("email", "A valid email is required"));
        }
        if request.name.trim().is_empty() {
            return Err(ApiError::field("name", "Name is required"));
        }
        if request.password.len() < MIN_PASSWORD_LENGTH {
            return Err(ApiError::field(
                "password",
                format!("Password must be at least {} characters", MIN_PASSWORD_LENGTH),
            ));
        }

        let password_hash = AuthService::hash_password(&request.password, config.bcrypt_cost)?;
        let user = store.insert_user(NewUser {
            username,
            password_hash,
            name: request.name.trim().to_string(),
            email,
            phone: request.phone,
            role: Role::User,
            profile_image: None,
            address: request.address,
            city: request.city,
            state: request.state,
            zip_code: request.zip_code,
        })?;

        info!("Created new user with ID: {}", user.id);
        Ok(user)
    }

    pub fn login(request: LoginRequest, config: &AppConfig, store: &dyn Store) -> Result<LoginResponse, ApiError> {
        let login = normalize_login(&request.login);
        let login = login.as_str();
        let user = match store.find_user_by_login(login)? {
            Some(user) => user,
            None => {
                debug!("Login failed: no user for {}", login);
                return Err(ApiError::AuthError("Invalid credentials".to_string()));
            }
        };

        if !AuthService::verify_password(&request.password, &user.password_hash)? {
            debug!("Login failed: invalid password for {}", login);
            return Err(ApiError::AuthError("Invalid credentials".to_string()));
        }

        let (token, refresh_token) = AuthService::issue_tokens(&user, config, store)?;
        store.touch_last_login(user.id, Utc::now().naive_utc())?;

        info!("User {} logged in successfully", user.username);
        Ok(LoginResponse {
            token,
            refresh_token,
            user_id: user.id,
            username: user.username,
            name: user.name,
            role: user.role,
        })
    }

    /// Rotates a refresh token: the presented one is consumed.
    pub fn refresh(request: RefreshTokenRequest, config: &AppConfig, store: &dyn Store) -> Result<LoginResponse, ApiError> {
        let record = store
            .take_refresh_token(&request.refresh_token, Utc::now().naive_utc())?
            .ok_or_else(|| ApiError::AuthError("Invalid or expired refresh token".to_string()))?;
        let user = Self::get(record.user_id, store)?;
        let (token, refresh_token) = AuthService::issue_tokens(&user, config, store)?;

        info!("Token refreshed for user {}", user.username);
        Ok(LoginResponse {
            token,
            refresh_token,
            user_id: user.id,
            username: user.username,
            name: user.name,
            role: user.role,
        })
    }

    pub fn get(user_id: i32, store: &dyn Store) -> Result<User, ApiError> {
        store
            .find_user(user_id)?
            .ok_or_else(|| ApiError::NotFoundError("User not found".to_string()))
    }

    pub fn update_profile(caller: &AuthenticatedUser, update: UserProfileUpdate, store: &dyn Store) -> Result<User, ApiError> {
        if update.is_empty() {
            return Self::get(caller.user_id, store);
        }
        if update.name.as_deref().map_or(false, |n| n.trim().is_empty()) {
            return Err(ApiError::field("name", "Name cannot be blank"));
        }
        store.update_user_profile(caller.user_id, update)
    }

    /// Creates the configured admin account when it does not exist yet.
    pub fn ensure_admin(admin: &AdminBootstrap, config: &AppConfig, store: &dyn Store) -> Result<(), ApiError> {
        let email = admin.email.trim().to_lowercase();
        if store.find_user_by_login(&email)?.is_some() {
            debug!("Admin account {} already exists", admin.email);
            return Ok(());
        }
        let password_hash = AuthService::hash_password(&admin.password, config.bcrypt_cost)?;
        let user = store.insert_user(NewUser {
            username: admin.username.clone(),
            password_hash,
            name: "Administrator".to_string(),
            email,
            phone: None,
            role: Role::Admin,
            profile_image: None,
            address: None,
            city: None,
            state: None,
            zip_code: None,
        })?;
        info!("Bootstrapped admin account {} (ID {})", user.email, user.id);
        Ok(())
    }
}

pub struct DriverService;

impl DriverService {
    /// Promotes the caller to driver and returns fresh tokens carrying the
    /// new role.
    pub fn register(
        caller: &AuthenticatedUser,
        request: DriverRegistrationRequest,
        config: &AppConfig,
        store: &dyn Store,
    ) -> Result<DriverRegistrationResponse, ApiError> {
        require_role(caller, Role::User)?;
        for (field, value) in [
            ("vehicle_model", &request.vehicle_model),
            ("license_plate", &request.license_plate),
            ("vehicle_type", &request.vehicle_type),
            ("location", &request.location),
        ] {
            if value.trim().is_empty() {
                return Err(ApiError::field(field, format!("{} is required", field)));
            }
        }

        let driver = store.register_driver(NewDriver {
            user_id: caller.user_id,
            vehicle_model: request.vehicle_model.trim().to_string(),
            license_plate: request.license_plate.trim().to_uppercase(),
            vehicle_type: request.vehicle_type.trim().to_lowercase(),
            location: request.location.trim().to_string(),
            document: request.document,
        })?;
        let user = UserService::get(caller.user_id, store)?;
        let (token, refresh_token) = AuthService::issue_tokens(&user, config, store)?;

        info!("User {} registered as driver {}", user.id, driver.id);
        Ok(DriverRegistrationResponse {
            driver,
            token,
            refresh_token,
        })
    }

    /// Directory search. Active highlights first, then best rated.
    pub fn search(filter: &DriverFilter, store: &dyn Store) -> Result<Vec<Driver>, ApiError> {
        let filter = DriverFilter {
            available: filter.available,
            vehicle_type: filter
                .vehicle_type
                .as_deref()
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty()),
            location: filter
                .location
                .as_deref()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
        };
        let now = Utc::now().naive_utc();
        let mut drivers = store.list_drivers(&filter)?;
        drivers.sort_by(|a, b| {
            b.highlight_active(now)
                .cmp(&a.highlight_active(now))
                .then(
                    b.average_rating
                        .partial_cmp(&a.average_rating)
                        .unwrap_or(Ordering::Equal),
                )
                .then(a.id.cmp(&b.id))
        });
        Ok(drivers)
    }

    pub fn get(driver_id: i32, store: &dyn Store) -> Result<Driver, ApiError> {
        store
            .find_driver(driver_id)?
            .ok_or_else(|| ApiError::NotFoundError(format!("Driver {} not found", driver_id)))
    }

    pub fn me(caller: &AuthenticatedUser, store: &dyn Store) -> Result<Driver, ApiError> {
        caller_driver(caller, store)
    }

    pub fn update_profile(
        caller: &AuthenticatedUser,
        mut update: DriverProfileUpdate,
        store: &dyn Store,
    ) -> Result<Driver, ApiError> {
        let driver = caller_driver(caller, store)?;
        update.vehicle_type = update.vehicle_type.map(|v| v.trim().to_lowercase());
        if update.is_empty() {
            return Ok(driver);
        }
        store.update_driver_profile(driver.id, update)
    }
}

pub struct AdminService;

impl AdminService {
    pub fn stats(caller: &AuthenticatedUser, store: &dyn Store) -> Result<PlatformStats, ApiError> {
        require_role(caller, Role::Admin)?;
        store.platform_stats()
    }

    pub fn list_settings(caller: &AuthenticatedUser, store: &dyn Store) -> Result<Vec<SystemSetting>, ApiError> {
        require_role(caller, Role::Admin)?;
        store.list_settings()
    }

    pub fn upsert_setting(
        caller: &AuthenticatedUser,
        key: &str,
        request: UpsertSettingRequest,
        store: &dyn Store,
    ) -> Result<SystemSetting, ApiError> {
        require_role(caller, Role::Admin)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ApiError::field("key", "Setting key is required"));
        }
        let category = match request.category {
            Some(category) if !category.trim().is_empty() => category.trim().to_string(),
            _ => store
                .find_setting(key)?
                .map(|s| s.category)
                .unwrap_or_else(|| "general".to_string()),
        };
        let setting = store.upsert_setting(NewSystemSetting {
            key: key.to_string(),
            value: request.value,
            category,
            updated_by: Some(caller.user_id),
        })?;
        info!("Setting {} updated by admin {}", setting.key, caller.user_id);
        Ok(setting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rstest::{fixture, rstest};

    #[fixture]
    fn config() -> AppConfig {
        AppConfig::for_tests()
    }

    fn registration(username: &str) -> RegisterUserRequest {
        RegisterUserRequest {
            username: username.to_string(),
            password: "secret123".to_string(),
            name: "Ana Souza".to_string(),
            email: format!("{}@Example.com", username),
            phone: None,
            address: None,
            city: Some("Recife".to_string()),
            state: None,
            zip_code: None,
        }
    }

    #[rstest]
    fn password_hash_verifies(config: AppConfig) {
        let hashed = AuthService::hash_password("secret123", config.bcrypt_cost).unwrap();
        assert!(AuthService::verify_password("secret123", &hashed).unwrap());
        assert!(!AuthService::verify_password("wrong", &hashed).unwrap());
    }

    #[rstest]
    fn register_then_login_by_username_or_email(config: AppConfig) {
        let store = MemoryStore::new();
        let user = UserService::register(registration("ana"), &config, &store).unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(user.email, "ana@example.com");

        for login in ["ana", "ana@example.com", " Ana@Example.COM "] {
            let response = UserService::login(
                LoginRequest { login: login.to_string(), password: "secret123".to_string() },
                &config,
                &store,
            )
            .unwrap();
            assert_eq!(response.user_id, user.id);
        }
        assert!(store.find_user(user.id).unwrap().unwrap().last_login.is_some());
    }

    #[rstest]
    fn wrong_password_is_auth_error(config: AppConfig) {
        let store = MemoryStore::new();
        UserService::register(registration("ana"), &config, &store).unwrap();
        let err = UserService::login(
            LoginRequest { login: "ana".to_string(), password: "nope".to_string() },
            &config,
            &store,
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::AuthError(_)));
    }

    #[rstest]
    fn duplicate_username_is_validation_error(config: AppConfig) {
        let store = MemoryStore::new();
        UserService::register(registration("ana"), &config, &store).unwrap();
        let err = UserService::register(registration("ana"), &config, &store).unwrap_err();
        assert!(matches!(err, ApiError::ValidationError { .. }));
    }

    #[rstest]
    fn refresh_token_is_single_use(config: AppConfig) {
        let store = MemoryStore::new();
        UserService::register(registration("ana"), &config, &store).unwrap();
        let login = UserService::login(
            LoginRequest { login: "ana".to_string(), password: "secret123".to_string() },
            &config,
            &store,
        )
        .unwrap();

        let request = || RefreshTokenRequest { refresh_token: login.refresh_token.clone() };
        let refreshed = UserService::refresh(request(), &config, &store).unwrap();
        assert_ne!(refreshed.refresh_token, login.refresh_token);
        assert!(matches!(
            UserService::refresh(request(), &config, &store),
            Err(ApiError::AuthError(_))
        ));
    }

    #[rstest]
    fn driver_registration_promotes_user(config: AppConfig) {
        let store = MemoryStore::new();
        let user = UserService::register(registration("ana"), &config, &store).unwrap();
        let caller = AuthenticatedUser::new(user.id, Role::User);
        let request = || DriverRegistrationRequest {
            vehicle_model: "Fiat Strada".to_string(),
            license_plate: "abc1d23".to_string(),
            vehicle_type: "Pickup".to_string(),
            location: "Recife".to_string(),
            document: None,
        };

        let registered = DriverService::register(&caller, request(), &config, &store).unwrap();
        assert_eq!(registered.driver.license_plate, "ABC1D23");
        assert_eq!(registered.driver.balance, rust_decimal::Decimal::ZERO);
        assert_eq!(store.find_user(user.id).unwrap().unwrap().role, Role::Driver);
        let promoted = crate::guard::require_auth(&registered.token, &config).unwrap();
        assert_eq!(promoted.role, Role::Driver);

        // A stale user-role token cannot register a second driver profile.
        assert!(DriverService::register(&caller, request(), &config, &store).is_err());
    }

    #[rstest]
    fn search_puts_highlighted_then_best_rated_first(config: AppConfig) {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for name in ["ana", "bia", "caio"] {
            let user = UserService::register(registration(name), &config, &store).unwrap();
            let caller = AuthenticatedUser::new(user.id, Role::User);
            let registered = DriverService::register(
                &caller,
                DriverRegistrationRequest {
                    vehicle_model: "VW Delivery".to_string(),
                    license_plate: format!("{}-1", name),
                    vehicle_type: "truck".to_string(),
                    location: "Belo Horizonte".to_string(),
                    document: None,
                },
                &config,
                &store,
            )
            .unwrap();
            ids.push(registered.driver.id);
        }
        store
            .insert_rating(NewRating { freight_id: 1, user_id: 1, driver_id: ids[1], rating: 5, comment: None })
            .unwrap();
        store
            .insert_rating(NewRating { freight_id: 2, user_id: 1, driver_id: ids[2], rating: 3, comment: None })
            .unwrap();

        let found = DriverService::search(&DriverFilter::default(), &store).unwrap();
        let order: Vec<i32> = found.iter().map(|d| d.id).collect();
        assert_eq!(order, vec![ids[1], ids[2], ids[0]]);

        let filtered = DriverService::search(
            &DriverFilter { location: Some("horizonte".to_string()), ..Default::default() },
            &store,
        )
        .unwrap();
        assert_eq!(filtered.len(), 3);
        let none = DriverService::search(
            &DriverFilter { vehicle_type: Some("van".to_string()), ..Default::default() },
            &store,
        )
        .unwrap();
        assert!(none.is_empty());
    }

    #[rstest]
    #[case(" Truck ")]
    #[case("TRUCK")]
    #[case("truck")]
    fn search_normalizes_vehicle_type(config: AppConfig, #[case] vehicle_type: &str) {
        let store = MemoryStore::new();
        let user = UserService::register(registration("ana"), &config, &store).unwrap();
        let caller = AuthenticatedUser::new(user.id, Role::User);
        DriverService::register(
            &caller,
            DriverRegistrationRequest {
                vehicle_model: "VW Delivery".to_string(),
                license_plate: "abc-1".to_string(),
                vehicle_type: "Truck".to_string(),
                location: "Belo Horizonte".to_string(),
                document: None,
            },
            &config,
            &store,
        )
        .unwrap();

        let found = DriverService::search(
            &DriverFilter {
                vehicle_type: Some(vehicle_type.to_string()),
                location: Some("  belo ".to_string()),
                ..Default::default()
            },
            &store,
        )
        .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[rstest]
    fn settings_are_admin_only(config: AppConfig) {
        let store = MemoryStore::new();
        let admin = AdminBootstrap {
            username: "root".to_string(),
            email: "root@example.com".to_string(),
            password: "rootpass".to_string(),
        };
        UserService::ensure_admin(&admin, &config, &store).unwrap();
        UserService::ensure_admin(&admin, &config, &store).unwrap();
        let admin_user = store.find_user_by_login("root@example.com").unwrap().unwrap();
        let admin_caller = AuthenticatedUser::new(admin_user.id, Role::Admin);

        let updated = AdminService::upsert_setting(
            &admin_caller,
            "platform_fee_percent",
            UpsertSettingRequest { value: "12".to_string(), category: None },
            &store,
        )
        .unwrap();
        assert_eq!(updated.value, "12");
        assert_eq!(updated.category, "fees");
        assert_eq!(updated.updated_by, Some(admin_user.id));

        let user = AuthenticatedUser::new(99, Role::User);
        assert!(matches!(
            AdminService::list_settings(&user, &store),
            Err(ApiError::Forbidden(_))
        ));
        assert_eq!(AdminService::stats(&admin_caller, &store).unwrap().total_users, 1);
    }
}
