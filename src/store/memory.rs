//! In-process store used by tests and `STORE_BACKEND=memory` runs.
//!
//! All tables sit behind one mutex, so every method is trivially atomic.

use super::{location_matches, Store};
use crate::config::DEFAULT_SETTINGS;
use crate::engine::{rating, settlement};
use crate::errors::ApiError;
use crate::models::*;
use chrono::{NaiveDateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    drivers: Vec<Driver>,
    freights: Vec<Freight>,
    ratings: Vec<Rating>,
    transactions: Vec<Transaction>,
    withdrawals: Vec<WithdrawalRequest>,
    settings: Vec<SystemSetting>,
    refresh_tokens: Vec<RefreshToken>,
    next_id: i32,
}

impl Tables {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn driver_mut(&mut self, id: i32) -> Result<&mut Driver, ApiError> {
        self.drivers
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| ApiError::NotFoundError(format!("Driver {} not found", id)))
    }

    fn append_transaction(&mut self, entry: NewTransaction) {
        let id = self.next_id();
        self.transactions.push(Transaction {
            id,
            transaction_type: entry.transaction_type,
            amount: entry.amount,
            status: entry.status,
            user_id: entry.user_id,
            driver_id: entry.driver_id,
            freight_id: entry.freight_id,
            description: entry.description,
            created_at: now(),
        });
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let store = Self {
            tables: Mutex::new(Tables::default()),
        };
        {
            let mut tables = store.tables.lock();
            for (key, value, category) in DEFAULT_SETTINGS {
                let id = tables.next_id();
                tables.settings.push(SystemSetting {
                    id,
                    key: key.to_string(),
                    value: value.to_string(),
                    category: category.to_string(),
                    updated_by: None,
                    updated_at: now(),
                });
            }
        }
        store
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn insert_user(&self, user: NewUser) -> Result<User, ApiError> {
        let mut t = self.tables.lock();
        if t.users.iter().any(|u| u.username == user.username) {
            return Err(ApiError::field("username", "Username already exists"));
        }
        if t.users.iter().any(|u| u.email == user.email) {
            return Err(ApiError::field("email", "Email already exists"));
        }
        let id = t.next_id();
        let row = User {
            id,
            username: user.username,
            password_hash: user.password_hash,
            name: user.name,
            email: user.email,
            phone: user.phone,
            role: user.role,
            profile_image: user.profile_image,
            address: user.address,
            city: user.city,
            state: user.state,
            zip_code: user.zip_code,
            created_at: now(),
            last_login: None,
        };
        t.users.push(row.clone());
        Ok(row)
    }

    fn find_user(&self, id: i32) -> Result<Option<User>, ApiError> {
        Ok(self.tables.lock().users.iter().find(|u| u.id == id).cloned())
    }

    fn find_user_by_login(&self, login: &str) -> Result<Option<User>, ApiError> {
        Ok(self
            .tables
            .lock()
            .users
            .iter()
            .find(|u| u.username == login || u.email == login)
            .cloned())
    }

    fn update_user_profile(&self, id: i32, update: UserProfileUpdate) -> Result<User, ApiError> {
        let mut t = self.tables.lock();
        let user = t
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| ApiError::NotFoundError("User not found".to_string()))?;
        if let Some(name) = update.name {
            user.name = name;
        }
        if update.phone.is_some() {
            user.phone = update.phone;
        }
        if update.profile_image.is_some() {
            user.profile_image = update.profile_image;
        }
        if update.address.is_some() {
            user.address = update.address;
        }
        if update.city.is_some() {
            user.city = update.city;
        }
        if update.state.is_some() {
            user.state = update.state;
        }
        if update.zip_code.is_some() {
            user.zip_code = update.zip_code;
        }
        Ok(user.clone())
    }

    fn touch_last_login(&self, id: i32, at: NaiveDateTime) -> Result<(), ApiError> {
        let mut t = self.tables.lock();
        if let Some(user) = t.users.iter_mut().find(|u| u.id == id) {
            user.last_login = Some(at);
        }
        Ok(())
    }

    fn insert_refresh_token(&self, token: NewRefreshToken) -> Result<(), ApiError> {
        let mut t = self.tables.lock();
        let id = t.next_id();
        t.refresh_tokens.push(RefreshToken {
            id,
            user_id: token.user_id,
            token: token.token,
            expires_at: token.expires_at,
            created_at: now(),
        });
        Ok(())
    }

    fn take_refresh_token(&self, token: &str, now: NaiveDateTime) -> Result<Option<RefreshToken>, ApiError> {
        let mut t = self.tables.lock();
        let Some(pos) = t.refresh_tokens.iter().position(|r| r.token == token) else {
            return Ok(None);
        };
        let record = t.refresh_tokens.remove(pos);
        Ok((record.expires_at > now).then_some(record))
    }

    fn register_driver(&self, driver: NewDriver) -> Result<Driver, ApiError> {
        let mut t = self.tables.lock();
        if t.drivers.iter().any(|d| d.user_id == driver.user_id) {
            return Err(ApiError::validation("User is already registered as a driver"));
        }
        let user = t
            .users
            .iter_mut()
            .find(|u| u.id == driver.user_id)
            .ok_or_else(|| ApiError::NotFoundError("User not found".to_string()))?;
        user.role = Role::Driver;
        let id = t.next_id();
        let row = Driver {
            id,
            user_id: driver.user_id,
            vehicle_model: driver.vehicle_model,
            license_plate: driver.license_plate,
            vehicle_type: driver.vehicle_type,
            location: driver.location,
            is_available: true,
            average_rating: 0.0,
            total_ratings: 0,
            balance: Decimal::ZERO,
            document: driver.document,
            is_highlighted: false,
            highlight_end_date: None,
            subscription_type: None,
            subscription_end_date: None,
            created_at: now(),
        };
        t.drivers.push(row.clone());
        Ok(row)
    }

    fn find_driver(&self, id: i32) -> Result<Option<Driver>, ApiError> {
        Ok(self.tables.lock().drivers.iter().find(|d| d.id == id).cloned())
    }

    fn find_driver_by_user(&self, user_id: i32) -> Result<Option<Driver>, ApiError> {
        Ok(self
            .tables
            .lock()
            .drivers
            .iter()
            .find(|d| d.user_id == user_id)
            .cloned())
    }

    fn list_drivers(&self, filter: &DriverFilter) -> Result<Vec<Driver>, ApiError> {
        let t = self.tables.lock();
        Ok(t.drivers
            .iter()
            .filter(|d| filter.available.map_or(true, |a| d.is_available == a))
            .filter(|d| {
                filter
                    .vehicle_type
                    .as_deref()
                    .map_or(true, |v| d.vehicle_type == v)
            })
            .filter(|d| {
                filter
                    .location
                    .as_deref()
                    .map_or(true, |l| location_matches(&d.location, l))
            })
            .cloned()
            .collect())
    }

    fn update_driver_profile(&self, id: i32, update: DriverProfileUpdate) -> Result<Driver, ApiError> {
        let mut t = self.tables.lock();
        let driver = t.driver_mut(id)?;
        if let Some(v) = update.vehicle_model {
            driver.vehicle_model = v;
        }
        if let Some(v) = update.license_plate {
            driver.license_plate = v;
        }
        if let Some(v) = update.vehicle_type {
            driver.vehicle_type = v;
        }
        if let Some(v) = update.location {
            driver.location = v;
        }
        if let Some(v) = update.is_available {
            driver.is_available = v;
        }
        if update.document.is_some() {
            driver.document = update.document;
        }
        Ok(driver.clone())
    }

    fn insert_freight(&self, freight: NewFreight) -> Result<Freight, ApiError> {
        let mut t = self.tables.lock();
        let id = t.next_id();
        let row = Freight {
            id,
            user_id: freight.user_id,
            driver_id: None,
            pickup_address: freight.pickup_address,
            delivery_address: freight.delivery_address,
            pickup_date: freight.pickup_date,
            pickup_time: freight.pickup_time,
            package_type: freight.package_type,
            instructions: freight.instructions,
            status: freight.status,
            amount: freight.amount,
            created_at: now(),
            accepted_at: None,
            completed_at: None,
            canceled_at: None,
        };
        t.freights.push(row.clone());
        Ok(row)
    }

    fn find_freight(&self, id: i32) -> Result<Option<Freight>, ApiError> {
        Ok(self.tables.lock().freights.iter().find(|f| f.id == id).cloned())
    }

    fn list_freights(&self, filter: &FreightFilter) -> Result<Vec<Freight>, ApiError> {
        let t = self.tables.lock();
        let mut rows: Vec<Freight> = t
            .freights
            .iter()
            .filter(|f| filter.user_id.map_or(true, |u| f.user_id == u))
            .filter(|f| filter.driver_id.map_or(true, |d| f.driver_id == Some(d)))
            .filter(|f| filter.status.map_or(true, |s| f.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    fn accept_freight(&self, id: i32, driver_id: i32, at: NaiveDateTime) -> Result<Option<Freight>, ApiError> {
        let mut t = self.tables.lock();
        let Some(freight) = t
            .freights
            .iter_mut()
            .find(|f| f.id == id && f.status == FreightStatus::Pending)
        else {
            return Ok(None);
        };
        freight.status = FreightStatus::Accepted;
        freight.driver_id = Some(driver_id);
        freight.accepted_at = Some(at);
        Ok(Some(freight.clone()))
    }

    fn complete_freight(&self, id: i32, driver_id: i32, at: NaiveDateTime) -> Result<Option<Freight>, ApiError> {
        let mut t = self.tables.lock();
        let Some(pos) = t.freights.iter().position(|f| {
            f.id == id && f.status == FreightStatus::Accepted && f.driver_id == Some(driver_id)
        }) else {
            return Ok(None);
        };

        // Credit first so a missing driver leaves the freight untouched.
        let amount = t.freights[pos].amount;
        let driver = t.driver_mut(driver_id)?;
        driver.balance = settlement::credit(driver.balance, amount);

        let freight = &mut t.freights[pos];
        freight.status = FreightStatus::Completed;
        freight.completed_at = Some(at);
        let freight = freight.clone();

        t.append_transaction(NewTransaction::freight_payment(&freight, driver_id));
        Ok(Some(freight))
    }

    fn cancel_freight(&self, id: i32, user_id: i32, at: NaiveDateTime) -> Result<Option<Freight>, ApiError> {
        let mut t = self.tables.lock();
        let Some(freight) = t.freights.iter_mut().find(|f| {
            f.id == id && f.user_id == user_id && f.status == FreightStatus::Pending
        }) else {
            return Ok(None);
        };
        freight.status = FreightStatus::Canceled;
        freight.canceled_at = Some(at);
        Ok(Some(freight.clone()))
    }

    fn insert_rating(&self, new_rating: NewRating) -> Result<Rating, ApiError> {
        let mut t = self.tables.lock();
        if t.ratings.iter().any(|r| r.freight_id == new_rating.freight_id) {
            return Err(ApiError::DuplicateRating(new_rating.freight_id));
        }
        let driver = t.driver_mut(new_rating.driver_id)?;
        driver.average_rating =
            rating::next_average(driver.average_rating, driver.total_ratings, new_rating.rating);
        driver.total_ratings += 1;

        let id = t.next_id();
        let row = Rating {
            id,
            freight_id: new_rating.freight_id,
            user_id: new_rating.user_id,
            driver_id: new_rating.driver_id,
            rating: new_rating.rating,
            comment: new_rating.comment,
            created_at: now(),
        };
        t.ratings.push(row.clone());
        Ok(row)
    }

    fn find_rating_by_freight(&self, freight_id: i32) -> Result<Option<Rating>, ApiError> {
        Ok(self
            .tables
            .lock()
            .ratings
            .iter()
            .find(|r| r.freight_id == freight_id)
            .cloned())
    }

    fn list_ratings_for_driver(&self, driver_id: i32) -> Result<Vec<Rating>, ApiError> {
        let t = self.tables.lock();
        let mut rows: Vec<Rating> = t
            .ratings
            .iter()
            .filter(|r| r.driver_id == driver_id)
            .cloned()
            .collect();
        rows.reverse();
        Ok(rows)
    }

    fn insert_withdrawal(&self, request: NewWithdrawalRequest) -> Result<WithdrawalRequest, ApiError> {
        let mut t = self.tables.lock();
        let balance = t.driver_mut(request.driver_id)?.balance;
        settlement::check_withdrawable(balance, request.amount)?;
        if t
            .withdrawals
            .iter()
            .any(|w| w.driver_id == request.driver_id && w.status == WithdrawalStatus::Pending)
        {
            return Err(ApiError::DuplicatePending(request.driver_id));
        }
        let id = t.next_id();
        let row = WithdrawalRequest {
            id,
            driver_id: request.driver_id,
            amount: request.amount,
            status: request.status,
            request_date: now(),
            processed_date: None,
            processed_by: None,
            bank_info: request.bank_info,
            pix_key: request.pix_key,
            notes: None,
        };
        t.withdrawals.push(row.clone());
        Ok(row)
    }

    fn find_withdrawal(&self, id: i32) -> Result<Option<WithdrawalRequest>, ApiError> {
        Ok(self.tables.lock().withdrawals.iter().find(|w| w.id == id).cloned())
    }

    fn list_withdrawals(&self, driver_id: Option<i32>, status: Option<WithdrawalStatus>) -> Result<Vec<WithdrawalRequest>, ApiError> {
        let t = self.tables.lock();
        let mut rows: Vec<WithdrawalRequest> = t
            .withdrawals
            .iter()
            .filter(|w| driver_id.map_or(true, |d| w.driver_id == d))
            .filter(|w| status.map_or(true, |s| w.status == s))
            .cloned()
            .collect();
        rows.reverse();
        Ok(rows)
    }

    fn resolve_withdrawal(&self, resolution: WithdrawalResolution) -> Result<Option<WithdrawalRequest>, ApiError> {
        let mut t = self.tables.lock();
        let Some(pos) = t.withdrawals.iter().position(|w| {
            w.id == resolution.request_id && w.status == WithdrawalStatus::Pending
        }) else {
            return Ok(None);
        };
        let request = t.withdrawals[pos].clone();

        if resolution.decision == WithdrawalDecision::Approved {
            let driver = t.driver_mut(request.driver_id)?;
            driver.balance = settlement::debit(driver.balance, request.amount)?;
            let driver_user_id = driver.user_id;
            t.append_transaction(NewTransaction::withdrawal_payout(&request, driver_user_id));
        }

        let row = &mut t.withdrawals[pos];
        row.status = resolution.decision.status();
        row.processed_by = Some(resolution.admin_id);
        row.processed_date = Some(resolution.processed_at);
        row.notes = resolution.notes;
        Ok(Some(row.clone()))
    }

    fn list_transactions_for_driver(&self, driver_id: i32) -> Result<Vec<Transaction>, ApiError> {
        let t = self.tables.lock();
        let mut rows: Vec<Transaction> = t
            .transactions
            .iter()
            .filter(|tx| tx.driver_id == Some(driver_id))
            .cloned()
            .collect();
        rows.reverse();
        Ok(rows)
    }

    fn upsert_setting(&self, setting: NewSystemSetting) -> Result<SystemSetting, ApiError> {
        let mut t = self.tables.lock();
        if let Some(existing) = t.settings.iter_mut().find(|s| s.key == setting.key) {
            existing.value = setting.value;
            existing.category = setting.category;
            existing.updated_by = setting.updated_by;
            existing.updated_at = now();
            return Ok(existing.clone());
        }
        let id = t.next_id();
        let row = SystemSetting {
            id,
            key: setting.key,
            value: setting.value,
            category: setting.category,
            updated_by: setting.updated_by,
            updated_at: now(),
        };
        t.settings.push(row.clone());
        Ok(row)
    }

    fn find_setting(&self, key: &str) -> Result<Option<SystemSetting>, ApiError> {
        Ok(self.tables.lock().settings.iter().find(|s| s.key == key).cloned())
    }

    fn list_settings(&self) -> Result<Vec<SystemSetting>, ApiError> {
        let mut rows = self.tables.lock().settings.clone();
        rows.sort_by(|a, b| a.category.cmp(&b.category).then(a.key.cmp(&b.key)));
        Ok(rows)
    }

    fn platform_stats(&self) -> Result<PlatformStats, ApiError> {
        let t = self.tables.lock();
        let count = |status: FreightStatus| {
            t.freights.iter().filter(|f| f.status == status).count() as i64
        };
        Ok(PlatformStats {
            total_users: t.users.len() as i64,
            total_drivers: t.drivers.len() as i64,
            pending_freights: count(FreightStatus::Pending),
            accepted_freights: count(FreightStatus::Accepted),
            completed_freights: count(FreightStatus::Completed),
            canceled_freights: count(FreightStatus::Canceled),
            completed_volume: t
                .freights
                .iter()
                .filter(|f| f.status == FreightStatus::Completed)
                .map(|f| f.amount)
                .sum(),
            pending_withdrawals: t
                .withdrawals
                .iter()
                .filter(|w| w.status == WithdrawalStatus::Pending)
                .count() as i64,
        })
    }
}
