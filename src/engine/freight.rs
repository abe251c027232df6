use super::caller_driver;
use crate::errors::ApiError;
use crate::guard::{require_owner, require_role, AuthenticatedUser};
use crate::models::*;
use crate::store::Store;
use chrono::Utc;
use log::{debug, info};
use rust_decimal::Decimal;

pub struct FreightService;

impl FreightService {
    /// Creates a `pending` freight on behalf of the caller.
    pub fn request_freight(
        caller: &AuthenticatedUser,
        request: CreateFreightRequest,
        store: &dyn Store,
    ) -> Result<Freight, ApiError> {
        let pickup_address = required("pickup_address", &request.pickup_address)?;
        let delivery_address = required("delivery_address", &request.delivery_address)?;
        let package_type = required("package_type", &request.package_type)?;
        let amount = request.amount.round_dp(2);
        if amount <= Decimal::ZERO {
            return Err(ApiError::field("amount", "Amount must be at least 0.01"));
        }

        let freight = store.insert_freight(NewFreight {
            user_id: caller.user_id,
            pickup_address,
            delivery_address,
            pickup_date: request.date,
            pickup_time: request.time,
            package_type,
            instructions: request
                .instructions
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            status: FreightStatus::Pending,
            amount,
        })?;

        info!(
            "Freight {} requested by user {} for {}",
            freight.id, caller.user_id, freight.amount
        );
        Ok(freight)
    }

    pub fn accept_freight(
        caller: &AuthenticatedUser,
        freight_id: i32,
        store: &dyn Store,
    ) -> Result<Freight, ApiError> {
        let driver = caller_driver(caller, store)?;
        let freight = Self::load(freight_id, store)?;
        expect_status(&freight, FreightStatus::Pending, "accept")?;

        match store.accept_freight(freight_id, driver.id, Utc::now().naive_utc())? {
            Some(accepted) => {
                info!("Freight {} accepted by driver {}", freight_id, driver.id);
                Ok(accepted)
            }
            None => {
                // Another driver won the compare-and-swap.
                debug!("Driver {} lost the race for freight {}", driver.id, freight_id);
                let current = Self::load(freight_id, store)?;
                Err(transition_error(&current, "accept"))
            }
        }
    }

    /// Completes an accepted freight and settles its amount to the
    /// assigned driver.
    pub fn complete_freight(
        caller: &AuthenticatedUser,
        freight_id: i32,
        store: &dyn Store,
    ) -> Result<Freight, ApiError> {
        let driver = caller_driver(caller, store)?;
        let freight = Self::load(freight_id, store)?;
        expect_status(&freight, FreightStatus::Accepted, "complete")?;
        if freight.driver_id != Some(driver.id) {
            return Err(ApiError::Forbidden(
                "Only the assigned driver can complete this freight".to_string(),
            ));
        }

        match store.complete_freight(freight_id, driver.id, Utc::now().naive_utc())? {
            Some(completed) => {
                info!(
                    "Freight {} completed; driver {} credited {}",
                    freight_id, driver.id, completed.amount
                );
                Ok(completed)
            }
            None => {
                let current = Self::load(freight_id, store)?;
                Err(transition_error(&current, "complete"))
            }
        }
    }

    /// Cancels a freight that no driver has accepted yet. Requester only.
    pub fn cancel_freight(
        caller: &AuthenticatedUser,
        freight_id: i32,
        store: &dyn Store,
    ) -> Result<Freight, ApiError> {
        let freight = Self::load(freight_id, store)?;
        require_owner(caller, freight.user_id)?;
        expect_status(&freight, FreightStatus::Pending, "cancel")?;

        match store.cancel_freight(freight_id, caller.user_id, Utc::now().naive_utc())? {
            Some(canceled) => {
                info!("Freight {} canceled by user {}", freight_id, caller.user_id);
                Ok(canceled)
            }
            None => {
                let current = Self::load(freight_id, store)?;
                Err(transition_error(&current, "cancel"))
            }
        }
    }

    pub fn get_freight(
        caller: &AuthenticatedUser,
        freight_id: i32,
        store: &dyn Store,
    ) -> Result<Freight, ApiError> {
        let freight = Self::load(freight_id, store)?;
        if caller.is_admin() || freight.user_id == caller.user_id {
            return Ok(freight);
        }
        if caller.role == Role::Driver {
            if freight.status == FreightStatus::Pending {
                return Ok(freight);
            }
            let driver = caller_driver(caller, store)?;
            if freight.driver_id == Some(driver.id) {
                return Ok(freight);
            }
        }
        Err(ApiError::Forbidden(
            "You are not allowed to view this freight".to_string(),
        ))
    }

    pub fn list_requested(caller: &AuthenticatedUser, store: &dyn Store) -> Result<Vec<Freight>, ApiError> {
        store.list_freights(&FreightFilter {
            user_id: Some(caller.user_id),
            ..Default::default()
        })
    }

    pub fn list_assigned(caller: &AuthenticatedUser, store: &dyn Store) -> Result<Vec<Freight>, ApiError> {
        let driver = caller_driver(caller, store)?;
        store.list_freights(&FreightFilter {
            driver_id: Some(driver.id),
            ..Default::default()
        })
    }

    /// Candidate pool for drivers.
    pub fn list_pending(caller: &AuthenticatedUser, store: &dyn Store) -> Result<Vec<Freight>, ApiError> {
        require_role(caller, Role::Driver)?;
        store.list_freights(&FreightFilter {
            status: Some(FreightStatus::Pending),
            ..Default::default()
        })
    }

    fn load(freight_id: i32, store: &dyn Store) -> Result<Freight, ApiError> {
        store
            .find_freight(freight_id)?
            .ok_or_else(|| ApiError::NotFoundError(format!("Freight {} not found", freight_id)))
    }
}

fn required(field: &str, value: &str) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::field(field, format!("{} is required", field)));
    }
    Ok(value.to_string())
}

fn expect_status(freight: &Freight, expected: FreightStatus, action: &str) -> Result<(), ApiError> {
    if freight.status == expected {
        Ok(())
    } else {
        Err(transition_error(freight, action))
    }
}

fn transition_error(freight: &Freight, action: &str) -> ApiError {
    ApiError::InvalidStateTransition(format!(
        "cannot {} freight {} while it is {}",
        action, freight.id, freight.status
    ))
}
