//! Persistence gateway.
//!
//! Plain CRUD accessors plus the handful of atomic units the lifecycle
//! engine depends on. Every method with a conditional write re-checks its
//! condition inside the write itself, so callers may pre-check for error
//! reporting but never rely on that check for correctness:
//!
//! * [`Store::accept_freight`] and [`Store::cancel_freight`] are
//!   compare-and-swap updates on `status`.
//! * [`Store::complete_freight`] writes the status, credits the driver and
//!   appends the payment ledger entry as one unit.
//! * [`Store::insert_rating`] inserts the rating and folds it into the
//!   driver's aggregate as one unit.
//! * [`Store::insert_withdrawal`] and [`Store::resolve_withdrawal`] check and
//!   move the driver's balance under a lock on the driver row.

use crate::errors::ApiError;
use crate::models::*;
use chrono::NaiveDateTime;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub trait Store: Send + Sync {
    // Users
    fn insert_user(&self, user: NewUser) -> Result<User, ApiError>;
    fn find_user(&self, id: i32) -> Result<Option<User>, ApiError>;
    /// Looks a user up by username or email.
    fn find_user_by_login(&self, login: &str) -> Result<Option<User>, ApiError>;
    fn update_user_profile(&self, id: i32, update: UserProfileUpdate) -> Result<User, ApiError>;
    fn touch_last_login(&self, id: i32, at: NaiveDateTime) -> Result<(), ApiError>;

    // Refresh tokens
    fn insert_refresh_token(&self, token: NewRefreshToken) -> Result<(), ApiError>;
    /// Removes and returns the token if it exists and has not expired.
    fn take_refresh_token(&self, token: &str, now: NaiveDateTime) -> Result<Option<RefreshToken>, ApiError>;

    // Drivers
    /// Creates the driver row and promotes the owning user to `driver`.
    fn register_driver(&self, driver: NewDriver) -> Result<Driver, ApiError>;
    fn find_driver(&self, id: i32) -> Result<Option<Driver>, ApiError>;
    fn find_driver_by_user(&self, user_id: i32) -> Result<Option<Driver>, ApiError>;
    fn list_drivers(&self, filter: &DriverFilter) -> Result<Vec<Driver>, ApiError>;
    fn update_driver_profile(&self, id: i32, update: DriverProfileUpdate) -> Result<Driver, ApiError>;

    // Freights
    fn insert_freight(&self, freight: NewFreight) -> Result<Freight, ApiError>;
    fn find_freight(&self, id: i32) -> Result<Option<Freight>, ApiError>;
    fn list_freights(&self, filter: &FreightFilter) -> Result<Vec<Freight>, ApiError>;
    /// `pending -> accepted`; `None` when the freight is no longer pending.
    fn accept_freight(&self, id: i32, driver_id: i32, at: NaiveDateTime) -> Result<Option<Freight>, ApiError>;
    /// `accepted -> completed` for the assigned driver, crediting `amount`.
    fn complete_freight(&self, id: i32, driver_id: i32, at: NaiveDateTime) -> Result<Option<Freight>, ApiError>;
    /// `pending -> canceled` for the requester.
    fn cancel_freight(&self, id: i32, user_id: i32, at: NaiveDateTime) -> Result<Option<Freight>, ApiError>;

    // Ratings
    fn insert_rating(&self, rating: NewRating) -> Result<Rating, ApiError>;
    fn find_rating_by_freight(&self, freight_id: i32) -> Result<Option<Rating>, ApiError>;
    fn list_ratings_for_driver(&self, driver_id: i32) -> Result<Vec<Rating>, ApiError>;

    // Withdrawals
    fn insert_withdrawal(&self, request: NewWithdrawalRequest) -> Result<WithdrawalRequest, ApiError>;
    fn find_withdrawal(&self, id: i32) -> Result<Option<WithdrawalRequest>, ApiError>;
    fn list_withdrawals(&self, driver_id: Option<i32>, status: Option<WithdrawalStatus>) -> Result<Vec<WithdrawalRequest>, ApiError>;
    /// `None` when the request is no longer pending.
    fn resolve_withdrawal(&self, resolution: WithdrawalResolution) -> Result<Option<WithdrawalRequest>, ApiError>;

    // Ledger
    fn list_transactions_for_driver(&self, driver_id: i32) -> Result<Vec<Transaction>, ApiError>;

    // Settings
    fn upsert_setting(&self, setting: NewSystemSetting) -> Result<SystemSetting, ApiError>;
    fn find_setting(&self, key: &str) -> Result<Option<SystemSetting>, ApiError>;
    fn list_settings(&self) -> Result<Vec<SystemSetting>, ApiError>;

    fn platform_stats(&self) -> Result<PlatformStats, ApiError>;
}

/// Case-insensitive substring match used for the driver location filter.
pub(crate) fn location_matches(location: &str, needle: &str) -> bool {
    location.to_lowercase().contains(&needle.to_lowercase())
}
