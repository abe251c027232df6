//! Freight lifecycle engine: the state machine over freights, balance
//! settlement and rating aggregation.
//!
//! Services take the caller resolved by the role guard and a [`Store`]
//! handle. They perform precondition checks to classify failures and then
//! hand the write to the store's atomic unit, which re-checks the condition.
//!
//! [`Store`]: crate::store::Store

pub mod freight;
pub mod rating;
pub mod settlement;

pub use freight::FreightService;
pub use rating::RatingService;
pub use settlement::SettlementService;

use crate::errors::ApiError;
use crate::guard::{require_role, AuthenticatedUser};
use crate::models::{Driver, Role};
use crate::store::Store;

/// Resolves the driver record behind a caller holding the `driver` role.
pub(crate) fn caller_driver(caller: &AuthenticatedUser, store: &dyn Store) -> Result<Driver, ApiError> {
    require_role(caller, Role::Driver)?;
    store
        .find_driver_by_user(caller.user_id)?
        .ok_or_else(|| ApiError::Forbidden("No driver profile is registered for this account".to_string()))
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::guard::AuthenticatedUser;
    use crate::models::*;
    use crate::store::{MemoryStore, Store};
    use chrono::{NaiveDate, NaiveTime};
    use rust_decimal::Decimal;

    pub fn user(store: &MemoryStore, username: &str, role: Role) -> AuthenticatedUser {
        let user = store
            .insert_user(NewUser {
                username: username.to_string(),
                password_hash: "x".to_string(),
                name: username.to_string(),
                email: format!("{}@example.com", username),
                phone: None,
                role,
                profile_image: None,
                address: None,
                city: None,
                state: None,
                zip_code: None,
            })
            .unwrap();
        AuthenticatedUser::new(user.id, user.role)
    }

    pub fn driver(store: &MemoryStore, username: &str) -> (AuthenticatedUser, Driver) {
        let caller = user(store, username, Role::User);
        let driver = store
            .register_driver(NewDriver {
                user_id: caller.user_id,
                vehicle_model: "Iveco Daily".to_string(),
                license_plate: format!("{}-0001", username),
                vehicle_type: "truck".to_string(),
                location: "Sao Paulo".to_string(),
                document: None,
            })
            .unwrap();
        (AuthenticatedUser::new(caller.user_id, Role::Driver), driver)
    }

    pub fn freight_request(amount: Decimal) -> CreateFreightRequest {
        CreateFreightRequest {
            pickup_address: "Rua A, 100".to_string(),
            delivery_address: "Av. B, 200".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            time: NaiveTime::from_hms_opt(14, 30, 0).unwrap(),
            package_type: "boxes".to_string(),
            instructions: None,
            amount,
        }
    }
}
