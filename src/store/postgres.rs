//! PostgreSQL store on diesel + r2d2.
//!
//! Conditional transitions are single `UPDATE ... WHERE status = ...`
//! statements; balance and rating mutations lock the driver row with
//! `SELECT ... FOR UPDATE` inside a transaction.

use super::Store;
use crate::config::DbPool;
use crate::engine::rating::next_average;
use crate::engine::settlement;
use crate::errors::ApiError;
use crate::models::*;
use crate::schema::{
    drivers, freights, ratings, refresh_tokens, system_settings, transactions, users,
    withdrawal_requests,
};
use chrono::NaiveDateTime;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use log::debug;
use rust_decimal::Decimal;

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn run<T>(&self, f: impl FnOnce(&mut PgConnection) -> Result<T, ApiError>) -> Result<T, ApiError> {
        let mut conn = self.pool.get()?;
        f(&mut *conn)
    }

    fn transaction<T>(&self, f: impl FnOnce(&mut PgConnection) -> Result<T, ApiError>) -> Result<T, ApiError> {
        self.run(|conn| conn.transaction::<T, ApiError, _>(f))
    }
}

fn is_unique_violation(e: &DieselError) -> bool {
    matches!(e, DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _))
}

fn user_conflict(e: DieselError) -> ApiError {
    if let DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) = &e {
        let constraint = info.constraint_name().unwrap_or_default();
        debug!("User insert hit unique constraint {}", constraint);
        if constraint.contains("email") {
            return ApiError::field("email", "Email already exists");
        }
        return ApiError::field("username", "Username already exists");
    }
    e.into()
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn driver_not_found(id: i32) -> ApiError {
    ApiError::NotFoundError(format!("Driver {} not found", id))
}

/// Credits a driver under a row lock; callers must already be inside a transaction.
fn credit_driver(conn: &mut PgConnection, driver_id: i32, amount: Decimal) -> Result<(), ApiError> {
    let balance = drivers::table
        .find(driver_id)
        .select(drivers::balance)
        .for_update()
        .first::<Decimal>(conn)
        .optional()?
        .ok_or_else(|| driver_not_found(driver_id))?;
    diesel::update(drivers::table.find(driver_id))
        .set(drivers::balance.eq(settlement::credit(balance, amount)))
        .execute(conn)?;
    Ok(())
}

impl Store for PgStore {
    fn insert_user(&self, user: NewUser) -> Result<User, ApiError> {
        self.run(|conn| {
            diesel::insert_into(users::table)
                .values(&user)
                .get_result::<User>(conn)
                .map_err(user_conflict)
        })
    }

    fn find_user(&self, id: i32) -> Result<Option<User>, ApiError> {
        self.run(|conn| Ok(users::table.find(id).first::<User>(conn).optional()?))
    }

    fn find_user_by_login(&self, login: &str) -> Result<Option<User>, ApiError> {
        self.run(|conn| {
            Ok(users::table
                .filter(users::username.eq(login).or(users::email.eq(login)))
                .first::<User>(conn)
                .optional()?)
        })
    }

    fn update_user_profile(&self, id: i32, update: UserProfileUpdate) -> Result<User, ApiError> {
        self.run(|conn| {
            diesel::update(users::table.find(id))
                .set(&update)
                .get_result::<User>(conn)
                .optional()?
                .ok_or_else(|| ApiError::NotFoundError("User not found".to_string()))
        })
    }

    fn touch_last_login(&self, id: i32, at: NaiveDateTime) -> Result<(), ApiError> {
        self.run(|conn| {
            diesel::update(users::table.find(id))
                .set(users::last_login.eq(Some(at)))
                .execute(conn)?;
            Ok(())
        })
    }

    fn insert_refresh_token(&self, token: NewRefreshToken) -> Result<(), ApiError> {
        self.run(|conn| {
            diesel::insert_into(refresh_tokens::table)
                .values(&token)
                .execute(conn)?;
            Ok(())
        })
    }

    fn take_refresh_token(&self, token: &str, now: NaiveDateTime) -> Result<Option<RefreshToken>, ApiError> {
        self.run(|conn| {
            let record = diesel::delete(refresh_tokens::table.filter(refresh_tokens::token.eq(token)))
                .get_result::<RefreshToken>(conn)
                .optional()?;
            Ok(record.filter(|r| r.expires_at > now))
        })
    }

    fn register_driver(&self, driver: NewDriver) -> Result<Driver, ApiError> {
        self.transaction(|conn| {
            let existing = drivers::table
                .filter(drivers::user_id.eq(driver.user_id))
                .select(drivers::id)
                .first::<i32>(conn)
                .optional()?;
            if existing.is_some() {
                return Err(ApiError::validation("User is already registered as a driver"));
            }

            let promoted = diesel::update(users::table.find(driver.user_id))
                .set(users::role.eq(Role::Driver))
                .execute(conn)?;
            if promoted == 0 {
                return Err(ApiError::NotFoundError("User not found".to_string()));
            }

            diesel::insert_into(drivers::table)
                .values(&driver)
                .get_result::<Driver>(conn)
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        ApiError::validation("User is already registered as a driver")
                    } else {
                        e.into()
                    }
                })
        })
    }

    fn find_driver(&self, id: i32) -> Result<Option<Driver>, ApiError> {
        self.run(|conn| Ok(drivers::table.find(id).first::<Driver>(conn).optional()?))
    }

    fn find_driver_by_user(&self, user_id: i32) -> Result<Option<Driver>, ApiError> {
        self.run(|conn| {
            Ok(drivers::table
                .filter(drivers::user_id.eq(user_id))
                .first::<Driver>(conn)
                .optional()?)
        })
    }

    fn list_drivers(&self, filter: &DriverFilter) -> Result<Vec<Driver>, ApiError> {
        self.run(|conn| {
            let mut query = drivers::table.into_boxed();
            if let Some(available) = filter.available {
                query = query.filter(drivers::is_available.eq(available));
            }
            if let Some(vehicle_type) = &filter.vehicle_type {
                query = query.filter(drivers::vehicle_type.eq(vehicle_type));
            }
            if let Some(location) = &filter.location {
                query = query.filter(
                    drivers::location.ilike(format!("%{}%", escape_like(location))),
                );
            }
            Ok(query.order(drivers::id.asc()).load::<Driver>(conn)?)
        })
    }

    fn update_driver_profile(&self, id: i32, update: DriverProfileUpdate) -> Result<Driver, ApiError> {
        self.run(|conn| {
            diesel::update(drivers::table.find(id))
                .set(&update)
                .get_result::<Driver>(conn)
                .optional()?
                .ok_or_else(|| driver_not_found(id))
        })
    }

    fn insert_freight(&self, freight: NewFreight) -> Result<Freight, ApiError> {
        self.run(|conn| {
            Ok(diesel::insert_into(freights::table)
                .values(&freight)
                .get_result::<Freight>(conn)?)
        })
    }

    fn find_freight(&self, id: i32) -> Result<Option<Freight>, ApiError> {
        self.run(|conn| Ok(freights::table.find(id).first::<Freight>(conn).optional()?))
    }

    fn list_freights(&self, filter: &FreightFilter) -> Result<Vec<Freight>, ApiError> {
        self.run(|conn| {
            let mut query = freights::table.into_boxed();
            if let Some(user_id) = filter.user_id {
                query = query.filter(freights::user_id.eq(user_id));
            }
            if let Some(driver_id) = filter.driver_id {
                query = query.filter(freights::driver_id.eq(driver_id));
            }
            if let Some(status) = filter.status {
                query = query.filter(freights::status.eq(status));
            }
            Ok(query
                .order((freights::created_at.desc(), freights::id.desc()))
                .load::<Freight>(conn)?)
        })
    }

    fn accept_freight(&self, id: i32, driver_id: i32, at: NaiveDateTime) -> Result<Option<Freight>, ApiError> {
        self.run(|conn| {
            Ok(diesel::update(
                freights::table
                    .filter(freights::id.eq(id))
                    .filter(freights::status.eq(FreightStatus::Pending)),
            )
            .set((
                freights::status.eq(FreightStatus::Accepted),
                freights::driver_id.eq(Some(driver_id)),
                freights::accepted_at.eq(Some(at)),
            ))
            .get_result::<Freight>(conn)
            .optional()?)
        })
    }

    fn complete_freight(&self, id: i32, driver_id: i32, at: NaiveDateTime) -> Result<Option<Freight>, ApiError> {
        self.transaction(|conn| {
            let completed = diesel::update(
                freights::table
                    .filter(freights::id.eq(id))
                    .filter(freights::status.eq(FreightStatus::Accepted))
                    .filter(freights::driver_id.eq(driver_id)),
            )
            .set((
                freights::status.eq(FreightStatus::Completed),
                freights::completed_at.eq(Some(at)),
            ))
            .get_result::<Freight>(conn)
            .optional()?;

            let Some(freight) = completed else {
                return Ok(None);
            };
            credit_driver(conn, driver_id, freight.amount)?;
            diesel::insert_into(transactions::table)
                .values(&NewTransaction::freight_payment(&freight, driver_id))
                .execute(conn)?;
            Ok(Some(freight))
        })
    }

    fn cancel_freight(&self, id: i32, user_id: i32, at: NaiveDateTime) -> Result<Option<Freight>, ApiError> {
        self.run(|conn| {
            Ok(diesel::update(
                freights::table
                    .filter(freights::id.eq(id))
                    .filter(freights::user_id.eq(user_id))
                    .filter(freights::status.eq(FreightStatus::Pending)),
            )
            .set((
                freights::status.eq(FreightStatus::Canceled),
                freights::canceled_at.eq(Some(at)),
            ))
            .get_result::<Freight>(conn)
            .optional()?)
        })
    }

    fn insert_rating(&self, new_rating: NewRating) -> Result<Rating, ApiError> {
        self.transaction(|conn| {
            let driver = drivers::table
                .find(new_rating.driver_id)
                .for_update()
                .first::<Driver>(conn)
                .optional()?
                .ok_or_else(|| driver_not_found(new_rating.driver_id))?;

            let inserted = diesel::insert_into(ratings::table)
                .values(&new_rating)
                .get_result::<Rating>(conn)
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        ApiError::DuplicateRating(new_rating.freight_id)
                    } else {
                        e.into()
                    }
                })?;

            diesel::update(drivers::table.find(driver.id))
                .set((
                    drivers::average_rating.eq(next_average(
                        driver.average_rating,
                        driver.total_ratings,
                        inserted.rating,
                    )),
                    drivers::total_ratings.eq(driver.total_ratings + 1),
                ))
                .execute(conn)?;
            Ok(inserted)
        })
    }

    fn find_rating_by_freight(&self, freight_id: i32) -> Result<Option<Rating>, ApiError> {
        self.run(|conn| {
            Ok(ratings::table
                .filter(ratings::freight_id.eq(freight_id))
                .first::<Rating>(conn)
                .optional()?)
        })
    }

    fn list_ratings_for_driver(&self, driver_id: i32) -> Result<Vec<Rating>, ApiError> {
        self.run(|conn| {
            Ok(ratings::table
                .filter(ratings::driver_id.eq(driver_id))
                .order((ratings::created_at.desc(), ratings::id.desc()))
                .load::<Rating>(conn)?)
        })
    }

    fn insert_withdrawal(&self, request: NewWithdrawalRequest) -> Result<WithdrawalRequest, ApiError> {
        self.transaction(|conn| {
            let balance = drivers::table
                .find(request.driver_id)
                .select(drivers::balance)
                .for_update()
                .first::<Decimal>(conn)
                .optional()?
                .ok_or_else(|| driver_not_found(request.driver_id))?;
            settlement::check_withdrawable(balance, request.amount)?;

            let pending: i64 = withdrawal_requests::table
                .filter(withdrawal_requests::driver_id.eq(request.driver_id))
                .filter(withdrawal_requests::status.eq(WithdrawalStatus::Pending))
                .count()
                .get_result(conn)?;
            if pending > 0 {
                return Err(ApiError::DuplicatePending(request.driver_id));
            }

            diesel::insert_into(withdrawal_requests::table)
                .values(&request)
                .get_result::<WithdrawalRequest>(conn)
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        ApiError::DuplicatePending(request.driver_id)
                    } else {
                        e.into()
                    }
                })
        })
    }

    fn find_withdrawal(&self, id: i32) -> Result<Option<WithdrawalRequest>, ApiError> {
        self.run(|conn| {
            Ok(withdrawal_requests::table
                .find(id)
                .first::<WithdrawalRequest>(conn)
                .optional()?)
        })
    }

    fn list_withdrawals(&self, driver_id: Option<i32>, status: Option<WithdrawalStatus>) -> Result<Vec<WithdrawalRequest>, ApiError> {
        self.run(|conn| {
            let mut query = withdrawal_requests::table.into_boxed();
            if let Some(driver_id) = driver_id {
                query = query.filter(withdrawal_requests::driver_id.eq(driver_id));
            }
            if let Some(status) = status {
                query = query.filter(withdrawal_requests::status.eq(status));
            }
            Ok(query
                .order((
                    withdrawal_requests::request_date.desc(),
                    withdrawal_requests::id.desc(),
                ))
                .load::<WithdrawalRequest>(conn)?)
        })
    }

    fn resolve_withdrawal(&self, resolution: WithdrawalResolution) -> Result<Option<WithdrawalRequest>, ApiError> {
        self.transaction(|conn| {
            let pending = withdrawal_requests::table
                .find(resolution.request_id)
                .filter(withdrawal_requests::status.eq(WithdrawalStatus::Pending))
                .for_update()
                .first::<WithdrawalRequest>(conn)
                .optional()?;
            let Some(request) = pending else {
                return Ok(None);
            };

            if resolution.decision == WithdrawalDecision::Approved {
                let (balance, driver_user_id) = drivers::table
                    .find(request.driver_id)
                    .select((drivers::balance, drivers::user_id))
                    .for_update()
                    .first::<(Decimal, i32)>(conn)
                    .optional()?
                    .ok_or_else(|| driver_not_found(request.driver_id))?;
                let remaining = settlement::debit(balance, request.amount)?;
                diesel::update(drivers::table.find(request.driver_id))
                    .set(drivers::balance.eq(remaining))
                    .execute(conn)?;
                diesel::insert_into(transactions::table)
                    .values(&NewTransaction::withdrawal_payout(&request, driver_user_id))
                    .execute(conn)?;
            }

            let processed = diesel::update(withdrawal_requests::table.find(request.id))
                .set((
                    withdrawal_requests::status.eq(resolution.decision.status()),
                    withdrawal_requests::processed_by.eq(Some(resolution.admin_id)),
                    withdrawal_requests::processed_date.eq(Some(resolution.processed_at)),
                    withdrawal_requests::notes.eq(resolution.notes),
                ))
                .get_result::<WithdrawalRequest>(conn)?;
            Ok(Some(processed))
        })
    }

    fn list_transactions_for_driver(&self, driver_id: i32) -> Result<Vec<Transaction>, ApiError> {
        self.run(|conn| {
            Ok(transactions::table
                .filter(transactions::driver_id.eq(driver_id))
                .order((transactions::created_at.desc(), transactions::id.desc()))
                .load::<Transaction>(conn)?)
        })
    }

    fn upsert_setting(&self, setting: NewSystemSetting) -> Result<SystemSetting, ApiError> {
        self.run(|conn| {
            Ok(diesel::insert_into(system_settings::table)
                .values(&setting)
                .on_conflict(system_settings::key)
                .do_update()
                .set((
                    system_settings::value.eq(&setting.value),
                    system_settings::category.eq(&setting.category),
                    system_settings::updated_by.eq(setting.updated_by),
                    system_settings::updated_at.eq(diesel::dsl::now),
                ))
                .get_result::<SystemSetting>(conn)?)
        })
    }

    fn find_setting(&self, key: &str) -> Result<Option<SystemSetting>, ApiError> {
        self.run(|conn| {
            Ok(system_settings::table
                .filter(system_settings::key.eq(key))
                .first::<SystemSetting>(conn)
                .optional()?)
        })
    }

    fn list_settings(&self) -> Result<Vec<SystemSetting>, ApiError> {
        self.run(|conn| {
            Ok(system_settings::table
                .order((system_settings::category.asc(), system_settings::key.asc()))
                .load::<SystemSetting>(conn)?)
        })
    }

    fn platform_stats(&self) -> Result<PlatformStats, ApiError> {
        self.run(|conn| {
            let mut stats = PlatformStats {
                total_users: users::table.count().get_result(conn)?,
                total_drivers: drivers::table.count().get_result(conn)?,
                pending_withdrawals: withdrawal_requests::table
                    .filter(withdrawal_requests::status.eq(WithdrawalStatus::Pending))
                    .count()
                    .get_result(conn)?,
                ..Default::default()
            };

            let by_status = freights::table
                .group_by(freights::status)
                .select((freights::status, diesel::dsl::count_star()))
                .load::<(FreightStatus, i64)>(conn)?;
            for (status, count) in by_status {
                match status {
                    FreightStatus::Pending => stats.pending_freights = count,
                    FreightStatus::Accepted => stats.accepted_freights = count,
                    FreightStatus::Completed => stats.completed_freights = count,
                    FreightStatus::Canceled => stats.canceled_freights = count,
                }
            }

            stats.completed_volume = freights::table
                .filter(freights::status.eq(FreightStatus::Completed))
                .select(diesel::dsl::sum(freights::amount))
                .first::<Option<Decimal>>(conn)?
                .unwrap_or(Decimal::ZERO);
            Ok(stats)
        })
    }
}
