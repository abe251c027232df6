use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::r2d2::{self, ConnectionManager};
use diesel::Connection;
use log::{info, warn};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::env;
use std::fmt;
use std::str::FromStr;

// Type aliases
pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Fee configuration rows seeded into `system_settings`: (key, value, category).
pub const DEFAULT_SETTINGS: &[(&str, &str, &str)] = &[
    ("platform_fee_percent", "10", "fees"),
    ("highlight_price", "29.90", "fees"),
    ("subscription_monthly_price", "49.90", "fees"),
];

// Database initialization SQL
pub const DB_INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id SERIAL PRIMARY KEY,
    username VARCHAR(100) UNIQUE NOT NULL,
    password_hash VARCHAR(255) NOT NULL,
    name VARCHAR(255) NOT NULL,
    email VARCHAR(255) UNIQUE NOT NULL,
    phone VARCHAR(50),
    role VARCHAR(20) NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'driver', 'admin')),
    profile_image VARCHAR(255),
    address VARCHAR(255),
    city VARCHAR(100),
    state VARCHAR(50),
    zip_code VARCHAR(20),
    created_at TIMESTAMP NOT NULL DEFAULT NOW(),
    last_login TIMESTAMP
);

CREATE TABLE IF NOT EXISTS drivers (
    id SERIAL PRIMARY KEY,
    user_id INTEGER UNIQUE NOT NULL REFERENCES users(id),
    vehicle_model VARCHAR(100) NOT NULL,
    license_plate VARCHAR(20) NOT NULL,
    vehicle_type VARCHAR(50) NOT NULL,
    location VARCHAR(255) NOT NULL,
    is_available BOOLEAN NOT NULL DEFAULT TRUE,
    average_rating DOUBLE PRECISION NOT NULL DEFAULT 0,
    total_ratings INTEGER NOT NULL DEFAULT 0,
    balance NUMERIC(12, 2) NOT NULL DEFAULT 0 CHECK (balance >= 0),
    document VARCHAR(255),
    is_highlighted BOOLEAN NOT NULL DEFAULT FALSE,
    highlight_end_date TIMESTAMP,
    subscription_type VARCHAR(50),
    subscription_end_date TIMESTAMP,
    created_at TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS freights (
    id SERIAL PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id),
    driver_id INTEGER REFERENCES drivers(id),
    pickup_address VARCHAR(255) NOT NULL,
    delivery_address VARCHAR(255) NOT NULL,
    pickup_date DATE NOT NULL,
    pickup_time TIME NOT NULL,
    package_type VARCHAR(100) NOT NULL,
    instructions TEXT,
    status VARCHAR(20) NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'accepted', 'completed', 'canceled')),
    amount NUMERIC(12, 2) NOT NULL CHECK (amount > 0),
    created_at TIMESTAMP NOT NULL DEFAULT NOW(),
    accepted_at TIMESTAMP,
    completed_at TIMESTAMP,
    canceled_at TIMESTAMP,
    CHECK ((driver_id IS NULL) = (status IN ('pending', 'canceled')))
);

CREATE INDEX IF NOT EXISTS idx_freights_status ON freights(status);
CREATE INDEX IF NOT EXISTS idx_freights_user ON freights(user_id);
CREATE INDEX IF NOT EXISTS idx_freights_driver ON freights(driver_id);

CREATE TABLE IF NOT EXISTS ratings (
    id SERIAL PRIMARY KEY,
    freight_id INTEGER UNIQUE NOT NULL REFERENCES freights(id),
    user_id INTEGER NOT NULL REFERENCES users(id),
    driver_id INTEGER NOT NULL REFERENCES drivers(id),
    rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
    comment TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS transactions (
    id SERIAL PRIMARY KEY,
    transaction_type VARCHAR(20) NOT NULL,
    amount NUMERIC(12, 2) NOT NULL,
    status VARCHAR(20) NOT NULL,
    user_id INTEGER REFERENCES users(id),
    driver_id INTEGER REFERENCES drivers(id),
    freight_id INTEGER REFERENCES freights(id),
    description VARCHAR(255),
    created_at TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS withdrawal_requests (
    id SERIAL PRIMARY KEY,
    driver_id INTEGER NOT NULL REFERENCES drivers(id),
    amount NUMERIC(12, 2) NOT NULL CHECK (amount > 0),
    status VARCHAR(20) NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'approved', 'rejected')),
    request_date TIMESTAMP NOT NULL DEFAULT NOW(),
    processed_date TIMESTAMP,
    processed_by INTEGER REFERENCES users(id),
    bank_info VARCHAR(255),
    pix_key VARCHAR(255),
    notes TEXT
);

-- At most one pending withdrawal per driver
CREATE UNIQUE INDEX IF NOT EXISTS idx_withdrawal_one_pending
    ON withdrawal_requests(driver_id) WHERE status = 'pending';

CREATE TABLE IF NOT EXISTS system_settings (
    id SERIAL PRIMARY KEY,
    key VARCHAR(100) UNIQUE NOT NULL,
    value VARCHAR(255) NOT NULL,
    category VARCHAR(50) NOT NULL DEFAULT 'general',
    updated_by INTEGER REFERENCES users(id),
    updated_at TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS refresh_tokens (
    id SERIAL PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token VARCHAR(255) UNIQUE NOT NULL,
    expires_at TIMESTAMP NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT NOW()
);
"#;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown STORE_BACKEND '{}'", other)),
        }
    }
}

#[derive(Clone)]
pub struct AdminBootstrap {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for AdminBootstrap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AdminBootstrap")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

// Config
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_expiry: i64, // In hours
    pub refresh_expiry: i64, // In days
    pub bcrypt_cost: u32,
    pub admin: Option<AdminBootstrap>,
}

fn parsed<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse::<T>().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {}={}", name, raw);
            default
        }),
        Err(_) => default,
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(val) => val,
            Err(e) => {
                warn!("Failed to load JWT_SECRET: {}", e);
                warn!("Generating a random JWT secret; tokens will not survive a restart");
                Self::generate_secure_secret()
            }
        };

        let store_backend = env::var("STORE_BACKEND")
            .ok()
            .and_then(|v| match v.parse::<StoreBackend>() {
                Ok(backend) => Some(backend),
                Err(e) => {
                    warn!("{}; falling back to postgres", e);
                    None
                }
            })
            .unwrap_or(StoreBackend::Postgres);

        let admin = match (env::var("ADMIN_EMAIL"), env::var("ADMIN_PASSWORD")) {
            (Ok(email), Ok(password)) => Some(AdminBootstrap {
                username: env::var("ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string()),
                email,
                password,
            }),
            _ => None,
        };

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parsed("PORT", 8080),
            workers: parsed("WORKERS", 2),
            store_backend,
            database_url: env::var("DATABASE_URL").ok(),
            jwt_secret,
            jwt_expiry: parsed("JWT_EXPIRY_HOURS", 24),
            refresh_expiry: parsed("REFRESH_EXPIRY_DAYS", 30),
            bcrypt_cost: parsed("BCRYPT_COST", bcrypt::DEFAULT_COST),
            admin,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.jwt_secret.len() < 16 {
            warn!("JWT secret is shorter than 16 characters - THIS IS NOT SECURE FOR PRODUCTION!");
        }

        if self.jwt_expiry <= 0 {
            return Err("JWT_EXPIRY_HOURS must be positive".to_string());
        }

        if self.refresh_expiry <= 0 {
            return Err("REFRESH_EXPIRY_DAYS must be positive".to_string());
        }

        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err("BCRYPT_COST must be between 4 and 31".to_string());
        }

        if self.workers == 0 {
            return Err("WORKERS must be at least 1".to_string());
        }

        if self.store_backend == StoreBackend::Postgres && self.database_url.is_none() {
            return Err("DATABASE_URL must be set for the postgres store".to_string());
        }

        if let Some(admin) = &self.admin {
            if admin.password.len() < 6 {
                return Err("ADMIN_PASSWORD must be at least 6 characters".to_string());
            }
        }

        Ok(())
    }

    pub fn generate_secure_secret() -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect()
    }

    /// Configuration for tests: in-memory store and the cheapest bcrypt cost.
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            workers: 1,
            store_backend: StoreBackend::Memory,
            database_url: None,
            jwt_secret: "test-secret-with-enough-length".to_string(),
            jwt_expiry: 1,
            refresh_expiry: 1,
            bcrypt_cost: 4,
            admin: None,
        }
    }
}

/// Creates the schema if needed and builds the connection pool.
pub fn init_pool(database_url: &str) -> Result<DbPool, String> {
    let mut conn = PgConnection::establish(database_url)
        .map_err(|e| format!("Failed to establish connection for migrations: {}", e))?;
    conn.batch_execute(DB_INIT_SQL)
        .map_err(|e| format!("Failed to execute database initialization script: {}", e))?;
    for (key, value, category) in DEFAULT_SETTINGS {
        conn.batch_execute(&format!(
            "INSERT INTO system_settings (key, value, category) VALUES ('{}', '{}', '{}') \
             ON CONFLICT (key) DO NOTHING;",
            key, value, category
        ))
        .map_err(|e| format!("Failed to seed settings: {}", e))?;
    }
    info!("Database initialization complete.");

    let manager = ConnectionManager::<PgConnection>::new(database_url);
    r2d2::Pool::builder()
        .build(manager)
        .map_err(|e| format!("Failed to create database connection pool: {}", e))
}
