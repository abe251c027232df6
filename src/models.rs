use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::str::FromStr;

// Status-like columns are stored as lowercase text and mapped onto enums here.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
        #[serde(rename_all = "lowercase")]
        #[diesel(sql_type = Text)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(self.as_str().as_bytes())?;
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                raw.parse::<$name>().map_err(Into::into)
            }
        }
    };
}

text_enum!(Role {
    User => "user",
    Driver => "driver",
    Admin => "admin",
});

text_enum!(FreightStatus {
    Pending => "pending",
    Accepted => "accepted",
    Completed => "completed",
    Canceled => "canceled",
});

text_enum!(WithdrawalStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

text_enum!(TransactionType {
    Payment => "payment",
    Withdrawal => "withdrawal",
    Commission => "commission",
    Subscription => "subscription",
    Highlight => "highlight",
});

text_enum!(TransactionStatus {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalDecision {
    Approved,
    Rejected,
}

impl WithdrawalDecision {
    pub fn status(&self) -> WithdrawalStatus {
        match self {
            WithdrawalDecision::Approved => WithdrawalStatus::Approved,
            WithdrawalDecision::Rejected => WithdrawalStatus::Rejected,
        }
    }
}

#[derive(Queryable, Serialize, Debug, Clone, PartialEq)]
pub struct User {
    pub id: i32,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub profile_image: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub created_at: NaiveDateTime,
    pub last_login: Option<NaiveDateTime>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::users)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub profile_image: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
}

/// Partial profile update; `None` leaves the stored value untouched.
#[derive(AsChangeset, Deserialize, Debug, Clone, Default)]
#[diesel(table_name = crate::schema::users)]
pub struct UserProfileUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub profile_image: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
}

impl UserProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.phone.is_none()
            && self.profile_image.is_none()
            && self.address.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.zip_code.is_none()
    }
}

#[derive(Queryable, Serialize, Debug, Clone, PartialEq)]
pub struct Driver {
    pub id: i32,
    pub user_id: i32,
    pub vehicle_model: String,
    pub license_plate: String,
    pub vehicle_type: String,
    pub location: String,
    pub is_available: bool,
    pub average_rating: f64,
    pub total_ratings: i32,
    pub balance: Decimal,
    pub document: Option<String>,
    pub is_highlighted: bool,
    pub highlight_end_date: Option<NaiveDateTime>,
    pub subscription_type: Option<String>,
    pub subscription_end_date: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl Driver {
    pub fn highlight_active(&self, now: NaiveDateTime) -> bool {
        self.is_highlighted && self.highlight_end_date.map_or(false, |end| end > now)
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::drivers)]
pub struct NewDriver {
    pub user_id: i32,
    pub vehicle_model: String,
    pub license_plate: String,
    pub vehicle_type: String,
    pub location: String,
    pub document: Option<String>,
}

#[derive(AsChangeset, Deserialize, Debug, Clone, Default)]
#[diesel(table_name = crate::schema::drivers)]
pub struct DriverProfileUpdate {
    pub vehicle_model: Option<String>,
    pub license_plate: Option<String>,
    pub vehicle_type: Option<String>,
    pub location: Option<String>,
    pub is_available: Option<bool>,
    pub document: Option<String>,
}

impl DriverProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.vehicle_model.is_none()
            && self.license_plate.is_none()
            && self.vehicle_type.is_none()
            && self.location.is_none()
            && self.is_available.is_none()
            && self.document.is_none()
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct DriverFilter {
    pub available: Option<bool>,
    pub vehicle_type: Option<String>,
    pub location: Option<String>,
}

#[derive(Queryable, Serialize, Debug, Clone, PartialEq)]
pub struct Freight {
    pub id: i32,
    pub user_id: i32,
    pub driver_id: Option<i32>,
    pub pickup_address: String,
    pub delivery_address: String,
    pub pickup_date: NaiveDate,
    pub pickup_time: NaiveTime,
    pub package_type: String,
    pub instructions: Option<String>,
    pub status: FreightStatus,
    pub amount: Decimal,
    pub created_at: NaiveDateTime,
    pub accepted_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub canceled_at: Option<NaiveDateTime>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::freights)]
pub struct NewFreight {
    pub user_id: i32,
    pub pickup_address: String,
    pub delivery_address: String,
    pub pickup_date: NaiveDate,
    pub pickup_time: NaiveTime,
    pub package_type: String,
    pub instructions: Option<String>,
    pub status: FreightStatus,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct FreightFilter {
    pub user_id: Option<i32>,
    pub driver_id: Option<i32>,
    pub status: Option<FreightStatus>,
}

#[derive(Queryable, Serialize, Debug, Clone, PartialEq)]
pub struct Rating {
    pub id: i32,
    pub freight_id: i32,
    pub user_id: i32,
    pub driver_id: i32,
    pub rating: i32,
    pub comment: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::ratings)]
pub struct NewRating {
    pub freight_id: i32,
    pub user_id: i32,
    pub driver_id: i32,
    pub rating: i32,
    pub comment: Option<String>,
}

#[derive(Queryable, Serialize, Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: i32,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub user_id: Option<i32>,
    pub driver_id: Option<i32>,
    pub freight_id: Option<i32>,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::transactions)]
pub struct NewTransaction {
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub user_id: Option<i32>,
    pub driver_id: Option<i32>,
    pub freight_id: Option<i32>,
    pub description: Option<String>,
}

impl NewTransaction {
    pub fn freight_payment(freight: &Freight, driver_id: i32) -> Self {
        Self {
            transaction_type: TransactionType::Payment,
            amount: freight.amount,
            status: TransactionStatus::Completed,
            user_id: Some(freight.user_id),
            driver_id: Some(driver_id),
            freight_id: Some(freight.id),
            description: Some(format!("Payment for freight #{}", freight.id)),
        }
    }

    pub fn withdrawal_payout(request: &WithdrawalRequest, driver_user_id: i32) -> Self {
        Self {
            transaction_type: TransactionType::Withdrawal,
            amount: request.amount,
            status: TransactionStatus::Completed,
            user_id: Some(driver_user_id),
            driver_id: Some(request.driver_id),
            freight_id: None,
            description: Some(format!("Withdrawal request #{}", request.id)),
        }
    }
}

#[derive(Queryable, Serialize, Debug, Clone, PartialEq)]
pub struct WithdrawalRequest {
    pub id: i32,
    pub driver_id: i32,
    pub amount: Decimal,
    pub status: WithdrawalStatus,
    pub request_date: NaiveDateTime,
    pub processed_date: Option<NaiveDateTime>,
    pub processed_by: Option<i32>,
    pub bank_info: Option<String>,
    pub pix_key: Option<String>,
    pub notes: Option<String>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::withdrawal_requests)]
pub struct NewWithdrawalRequest {
    pub driver_id: i32,
    pub amount: Decimal,
    pub status: WithdrawalStatus,
    pub bank_info: Option<String>,
    pub pix_key: Option<String>,
}

/// Outcome applied by an admin to a pending withdrawal.
#[derive(Debug, Clone)]
pub struct WithdrawalResolution {
    pub request_id: i32,
    pub decision: WithdrawalDecision,
    pub admin_id: i32,
    pub notes: Option<String>,
    pub processed_at: NaiveDateTime,
}

#[derive(Queryable, Serialize, Debug, Clone, PartialEq)]
pub struct SystemSetting {
    pub id: i32,
    pub key: String,
    pub value: String,
    pub category: String,
    pub updated_by: Option<i32>,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::system_settings)]
pub struct NewSystemSetting {
    pub key: String,
    pub value: String,
    pub category: String,
    pub updated_by: Option<i32>,
}

#[derive(Queryable, Serialize, Debug, Clone)]
pub struct RefreshToken {
    pub id: i32,
    pub user_id: i32,
    pub token: String,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::refresh_tokens)]
pub struct NewRefreshToken {
    pub user_id: i32,
    pub token: String,
    pub expires_at: NaiveDateTime,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct PlatformStats {
    pub total_users: i64,
    pub total_drivers: i64,
    pub pending_freights: i64,
    pub accepted_freights: i64,
    pub completed_freights: i64,
    pub canceled_freights: i64,
    pub completed_volume: Decimal,
    pub pending_withdrawals: i64,
}

// DTOs
#[derive(Deserialize, Debug)]
pub struct RegisterUserRequest {
    pub username: String,
    pub password: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    /// Username or email.
    pub login: String,
    pub password: String,
}

#[derive(Serialize, Debug)]
pub struct LoginResponse {
    pub token: String,
    pub refresh_token: String,
    pub user_id: i32,
    pub username: String,
    pub name: String,
    pub role: Role,
}

#[derive(Deserialize, Debug)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Claims {
    pub sub: String,      // Subject (user_id)
    pub exp: usize,       // Expiration time
    pub iat: usize,       // Issued at
    pub user_id: i32,
    pub role: Role,
}

#[derive(Deserialize, Debug)]
pub struct DriverRegistrationRequest {
    pub vehicle_model: String,
    pub license_plate: String,
    pub vehicle_type: String,
    pub location: String,
    pub document: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct DriverRegistrationResponse {
    pub driver: Driver,
    pub token: String,
    pub refresh_token: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CreateFreightRequest {
    pub pickup_address: String,
    pub delivery_address: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub package_type: String,
    pub instructions: Option<String>,
    pub amount: Decimal,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SubmitRatingRequest {
    pub driver_id: Option<i32>,
    pub rating: i32,
    pub comment: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CreateWithdrawalRequest {
    pub amount: Decimal,
    pub pix_key: Option<String>,
    pub bank_info: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ProcessWithdrawalRequest {
    pub decision: WithdrawalDecision,
    pub notes: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct WithdrawalQuery {
    pub status: Option<WithdrawalStatus>,
}

#[derive(Deserialize, Debug)]
pub struct UpsertSettingRequest {
    pub value: String,
    pub category: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(FreightStatus::Pending, "pending")]
    #[case(FreightStatus::Accepted, "accepted")]
    #[case(FreightStatus::Completed, "completed")]
    #[case(FreightStatus::Canceled, "canceled")]
    fn freight_status_text(#[case] status: FreightStatus, #[case] text: &str) {
        assert_eq!(status.as_str(), text);
        assert_eq!(text.parse::<FreightStatus>().unwrap(), status);
        assert_eq!(serde_json::to_value(status).unwrap(), text);
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn highlight_requires_future_end_date() {
        let now = chrono::Utc::now().naive_utc();
        let mut driver = Driver {
            id: 1,
            user_id: 1,
            vehicle_model: "Fiorino".into(),
            license_plate: "ABC1D23".into(),
            vehicle_type: "van".into(),
            location: "Curitiba".into(),
            is_available: true,
            average_rating: 0.0,
            total_ratings: 0,
            balance: Decimal::ZERO,
            document: None,
            is_highlighted: true,
            highlight_end_date: Some(now - chrono::Duration::days(1)),
            subscription_type: None,
            subscription_end_date: None,
            created_at: now,
        };
        assert!(!driver.highlight_active(now));
        driver.highlight_end_date = Some(now + chrono::Duration::days(1));
        assert!(driver.highlight_active(now));
    }
}
