//! Driver balance settlement: crediting completed freights and paying out
//! withdrawals.

use super::caller_driver;
use crate::errors::ApiError;
use crate::guard::{require_role, AuthenticatedUser};
use crate::models::*;
use crate::store::Store;
use chrono::Utc;
use log::info;
use rust_decimal::Decimal;

/// Balance after settling one completed freight.
pub fn credit(balance: Decimal, amount: Decimal) -> Decimal {
    balance + amount
}

/// Fails with `InsufficientBalance` when `amount` exceeds `balance`.
pub fn check_withdrawable(balance: Decimal, amount: Decimal) -> Result<(), ApiError> {
    if amount > balance {
        return Err(ApiError::InsufficientBalance(format!(
            "requested {} but only {} is available",
            amount, balance
        )));
    }
    Ok(())
}

/// The balance after paying out `amount`. Never goes negative.
pub fn debit(balance: Decimal, amount: Decimal) -> Result<Decimal, ApiError> {
    check_withdrawable(balance, amount)?;
    Ok(balance - amount)
}

pub struct SettlementService;

impl SettlementService {
    pub fn request_withdrawal(
        caller: &AuthenticatedUser,
        request: CreateWithdrawalRequest,
        store: &dyn Store,
    ) -> Result<WithdrawalRequest, ApiError> {
        let driver = caller_driver(caller, store)?;
        let amount = request.amount.round_dp(2);
        if amount <= Decimal::ZERO {
            return Err(ApiError::field("amount", "Amount must be at least 0.01"));
        }
        let pix_key = non_blank(request.pix_key);
        let bank_info = non_blank(request.bank_info);
        if pix_key.is_none() && bank_info.is_none() {
            return Err(ApiError::field(
                "pix_key",
                "A PIX key or bank information is required",
            ));
        }

        // Pre-checks for a clear error; the store re-checks under lock.
        check_withdrawable(driver.balance, amount)?;
        if !store
            .list_withdrawals(Some(driver.id), Some(WithdrawalStatus::Pending))?
            .is_empty()
        {
            return Err(ApiError::DuplicatePending(driver.id));
        }

        let withdrawal = store.insert_withdrawal(NewWithdrawalRequest {
            driver_id: driver.id,
            amount,
            status: WithdrawalStatus::Pending,
            bank_info,
            pix_key,
        })?;

        info!(
            "Driver {} requested withdrawal {} of {}",
            driver.id, withdrawal.id, withdrawal.amount
        );
        Ok(withdrawal)
    }

    /// Approves or rejects a pending withdrawal. Approval debits the
    /// driver's balance and appends a ledger entry in the same unit.
    pub fn process_withdrawal(
        caller: &AuthenticatedUser,
        request_id: i32,
        decision: ProcessWithdrawalRequest,
        store: &dyn Store,
    ) -> Result<WithdrawalRequest, ApiError> {
        require_role(caller, Role::Admin)?;
        let current = store
            .find_withdrawal(request_id)?
            .ok_or_else(|| ApiError::NotFoundError(format!("Withdrawal request {} not found", request_id)))?;
        if current.status != WithdrawalStatus::Pending {
            return Err(already_processed(&current));
        }

        let resolution = WithdrawalResolution {
            request_id,
            decision: decision.decision,
            admin_id: caller.user_id,
            notes: non_blank(decision.notes),
            processed_at: Utc::now().naive_utc(),
        };
        match store.resolve_withdrawal(resolution)? {
            Some(processed) => {
                info!(
                    "Withdrawal {} {} by admin {}",
                    request_id, processed.status, caller.user_id
                );
                Ok(processed)
            }
            None => {
                let current = store
                    .find_withdrawal(request_id)?
                    .ok_or_else(|| ApiError::NotFoundError(format!("Withdrawal request {} not found", request_id)))?;
                Err(already_processed(&current))
            }
        }
    }

    pub fn list_own(caller: &AuthenticatedUser, store: &dyn Store) -> Result<Vec<WithdrawalRequest>, ApiError> {
        let driver = caller_driver(caller, store)?;
        store.list_withdrawals(Some(driver.id), None)
    }

    pub fn list_all(
        caller: &AuthenticatedUser,
        status: Option<WithdrawalStatus>,
        store: &dyn Store,
    ) -> Result<Vec<WithdrawalRequest>, ApiError> {
        require_role(caller, Role::Admin)?;
        store.list_withdrawals(None, status)
    }

    pub fn list_transactions(caller: &AuthenticatedUser, store: &dyn Store) -> Result<Vec<Transaction>, ApiError> {
        let driver = caller_driver(caller, store)?;
        store.list_transactions_for_driver(driver.id)
    }
}

fn already_processed(request: &WithdrawalRequest) -> ApiError {
    ApiError::InvalidStateTransition(format!(
        "withdrawal request {} is already {}",
        request.id, request.status
    ))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
