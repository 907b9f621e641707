use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

use super::ledger::NewLedgerEntry;

/// Where a payout is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayoutMethod {
    BankTransfer { bank_account_id: i64 },
    Paypal { email: String },
    Venmo { username: String },
    Crypto { address: String, currency: String },
}

impl PayoutMethod {
    pub fn processor_kind(&self) -> ProcessorKind {
        match self {
            PayoutMethod::BankTransfer { .. } => ProcessorKind::BankTransfer,
            _ => ProcessorKind::DigitalWallet,
        }
    }

    /// Checks the destination details are usable.
    pub fn check(&self) -> Result<(), String> {
        match self {
            PayoutMethod::BankTransfer { bank_account_id } if *bank_account_id <= 0 => {
                Err("bank_account_id must be positive".to_string())
            }
            PayoutMethod::Paypal { email } if !validator::validate_email(email) => {
                Err("paypal email is invalid".to_string())
            }
            PayoutMethod::Venmo { username } if username.trim().is_empty() => {
                Err("venmo username is required".to_string())
            }
            PayoutMethod::Crypto { address, currency }
                if address.trim().is_empty() || currency.trim().is_empty() =>
            {
                Err("crypto address and currency are required".to_string())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for PayoutMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoutMethod::BankTransfer { .. } => write!(f, "bank_transfer"),
            PayoutMethod::Paypal { .. } => write!(f, "paypal"),
            PayoutMethod::Venmo { .. } => write!(f, "venmo"),
            PayoutMethod::Crypto { .. } => write!(f, "crypto"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payout_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Approved,
    Completed,
    Failed,
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoutStatus::Pending => write!(f, "pending"),
            PayoutStatus::Processing => write!(f, "processing"),
            PayoutStatus::Approved => write!(f, "approved"),
            PayoutStatus::Completed => write!(f, "completed"),
            PayoutStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PayoutRequest {
    pub id: i64,
    pub user_id: i64,
    pub amount: Decimal,
    /// Unset for sweep payouts of users who never chose a destination
    pub payout_method: Option<Json<PayoutMethod>>,
    pub status: PayoutStatus,
    pub transaction_id: Uuid,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPayoutRequest {
    pub user_id: i64,
    pub amount: Decimal,
    pub payout_method: PayoutMethod,
    pub status: PayoutStatus,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PayoutTransaction {
    pub id: i64,
    pub payout_id: String,
    pub user_id: i64,
    pub schedule_id: Option<i64>,
    pub amount: Decimal,
    pub processor: String,
    pub processor_fee: Decimal,
    pub final_amount: Decimal,
    pub payout_method: Json<PayoutMethod>,
    pub status: PayoutStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayoutTransaction {
    pub payout_id: String,
    pub schedule_id: Option<i64>,
    pub processor: String,
    pub processor_fee: Decimal,
    pub final_amount: Decimal,
    pub payout_method: PayoutMethod,
}

/// `PO_` followed by 16 upper-case hex characters.
pub fn generate_payout_id() -> String {
    let bytes: [u8; 8] = rand::random();
    format!("PO_{}", hex::encode_upper(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    BankTransfer,
    DigitalWallet,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentProcessor {
    pub name: &'static str,
    pub kind: ProcessorKind,
    pub fee_fixed: Decimal,
    pub fee_percentage: Decimal,
    pub minimum_payout: Decimal,
    pub processing_days: u32,
    pub supports_international: bool,
}

impl PaymentProcessor {
    pub fn fee_for(&self, amount: Decimal) -> Decimal {
        (self.fee_fixed + amount * self.fee_percentage / Decimal::ONE_HUNDRED).round_dp(2)
    }

    /// Built-in processor catalogue, in order of preference per kind
    pub fn catalogue() -> Vec<PaymentProcessor> {
        vec![
            PaymentProcessor {
                name: "stripe",
                kind: ProcessorKind::BankTransfer,
                fee_fixed: Decimal::ZERO,
                fee_percentage: Decimal::new(25, 2),
                minimum_payout: Decimal::ONE,
                processing_days: 2,
                supports_international: true,
            },
            PaymentProcessor {
                name: "paypal",
                kind: ProcessorKind::DigitalWallet,
                fee_fixed: Decimal::new(25, 2),
                fee_percentage: Decimal::ZERO,
                minimum_payout: Decimal::ONE,
                processing_days: 1,
                supports_international: true,
            },
            PaymentProcessor {
                name: "venmo",
                kind: ProcessorKind::DigitalWallet,
                fee_fixed: Decimal::ZERO,
                fee_percentage: Decimal::new(175, 2),
                minimum_payout: Decimal::ONE,
                processing_days: 1,
                supports_international: false,
            },
            PaymentProcessor {
                name: "wise",
                kind: ProcessorKind::BankTransfer,
                fee_fixed: Decimal::ZERO,
                fee_percentage: Decimal::new(5, 1),
                minimum_payout: Decimal::ONE,
                processing_days: 1,
                supports_international: true,
            },
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payout_frequency", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PayoutFrequency {
    Weekly,
    Monthly,
    Quarterly,
}

impl PayoutFrequency {
    /// Next run after `now`.
    ///
    /// `day_of_week` counts from Monday = 0. Monthly and quarterly runs land
    /// at 12:00 UTC; weekly runs keep the time of day of `now`.
    pub fn next_execution(
        &self,
        day_of_week: Option<i32>,
        day_of_month: Option<i32>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        match self {
            PayoutFrequency::Weekly => {
                let target = day_of_week.unwrap_or(0) as i64;
                let mut days_ahead = target - now.weekday().num_days_from_monday() as i64;
                if days_ahead <= 0 {
                    days_ahead += 7;
                }
                now + Duration::days(days_ahead)
            }
            PayoutFrequency::Monthly => {
                let day = day_of_month.unwrap_or(1) as u32;
                let (year, month) = if day > now.day() {
                    (now.year(), now.month())
                } else if now.month() == 12 {
                    (now.year() + 1, 1)
                } else {
                    (now.year(), now.month() + 1)
                };
                noon_on(year, month, day).unwrap_or(now + Duration::days(7))
            }
            PayoutFrequency::Quarterly => {
                let quarter = (now.month() - 1) / 3 + 1;
                let (year, month) = if quarter == 4 {
                    (now.year() + 1, 1)
                } else {
                    (now.year(), quarter * 3 + 1)
                };
                noon_on(year, month, day_of_month.unwrap_or(1) as u32)
                    .unwrap_or(now + Duration::days(7))
            }
        }
    }
}

fn noon_on(year: i32, month: u32, day: u32) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).single()
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PayoutSchedule {
    pub id: i64,
    pub user_id: i64,
    pub frequency: PayoutFrequency,
    pub day_of_week: Option<i32>,
    pub day_of_month: Option<i32>,
    pub minimum_amount: Decimal,
    pub payout_method: Json<PayoutMethod>,
    pub is_active: bool,
    pub last_execution: Option<DateTime<Utc>>,
    pub next_execution: DateTime<Utc>,
    pub total_payouts_made: i64,
    pub total_amount_paid: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayoutSchedule {
    pub user_id: i64,
    pub frequency: PayoutFrequency,
    pub day_of_week: Option<i32>,
    pub day_of_month: Option<i32>,
    pub minimum_amount: Decimal,
    pub payout_method: PayoutMethod,
    pub next_execution: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleAdvance {
    pub schedule_id: i64,
    pub next_execution: DateTime<Utc>,
}

/// Everything written when a user's pending balance is released.
///
/// Stores apply it atomically and refuse it with a conflict when the
/// earnings row no longer holds exactly `amount` pending, or when one of the
/// user's unpaid completed referral rows is inside its refund window at
/// `settled_at`. The unpaid rows are read and marked `bonus_paid` in the
/// same step.
#[derive(Debug, Clone)]
pub struct SettlePayout {
    pub user_id: i64,
    pub amount: Decimal,
    pub payout_method: Option<PayoutMethod>,
    pub settled_at: DateTime<Utc>,
    pub ledger_entry: NewLedgerEntry,
    pub transaction: Option<NewPayoutTransaction>,
    pub schedule: Option<ScheduleAdvance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettledPayout {
    pub request: PayoutRequest,
    pub transaction: Option<PayoutTransaction>,
}

/// Manual payout body. `payment_method` is either the method name with its
/// fields under `payment_details`, or an already tagged `PayoutMethod`.
#[derive(Debug, Deserialize, Validate)]
#[serde(try_from = "PayoutRequestBody")]
pub struct CreatePayoutRequest {
    #[validate(range(min = 1))]
    pub user_id: i64,
    pub amount: Decimal,
    pub payment_method: PayoutMethod,
}

#[derive(Deserialize)]
struct PayoutRequestBody {
    user_id: i64,
    amount: Decimal,
    #[serde(alias = "payout_method")]
    payment_method: serde_json::Value,
    #[serde(default)]
    payment_details: Option<serde_json::Value>,
}

impl TryFrom<PayoutRequestBody> for CreatePayoutRequest {
    type Error = String;

    fn try_from(body: PayoutRequestBody) -> Result<Self, Self::Error> {
        let tagged = match (body.payment_method, body.payment_details) {
            (serde_json::Value::String(kind), details) => {
                let mut fields = match details {
                    Some(serde_json::Value::Object(fields)) => fields,
                    None | Some(serde_json::Value::Null) => serde_json::Map::new(),
                    Some(_) => return Err("payment_details must be an object".to_string()),
                };
                fields.insert("type".to_string(), serde_json::Value::String(kind));
                serde_json::Value::Object(fields)
            }
            (tagged, _) => tagged,
        };
        let payment_method =
            serde_json::from_value(tagged).map_err(|e| format!("invalid payment method: {}", e))?;

        Ok(Self {
            user_id: body.user_id,
            amount: body.amount,
            payment_method,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpsertScheduleRequest {
    #[validate(range(min = 1))]
    pub user_id: i64,
    pub frequency: PayoutFrequency,
    #[validate(range(min = 0, max = 6))]
    pub day_of_week: Option<i32>,
    #[validate(range(min = 1, max = 28))]
    pub day_of_month: Option<i32>,
    pub minimum_amount: Option<Decimal>,
    pub payout_method: PayoutMethod,
}

#[derive(Debug, Deserialize)]
pub struct ApprovePayoutRequest {
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_weekly_next_execution_is_strictly_after_today() {
        // 2024-06-05 is a Wednesday
        let now = at(2024, 6, 5, 9);
        assert_eq!(PayoutFrequency::Weekly.next_execution(Some(4), None, now), at(2024, 6, 7, 9));
        assert_eq!(PayoutFrequency::Weekly.next_execution(Some(2), None, now), at(2024, 6, 12, 9));
        assert_eq!(PayoutFrequency::Weekly.next_execution(Some(0), None, now), at(2024, 6, 10, 9));
    }

    #[test]
    fn test_monthly_next_execution() {
        let now = at(2024, 6, 5, 9);
        assert_eq!(PayoutFrequency::Monthly.next_execution(None, Some(15), now), at(2024, 6, 15, 12));
        assert_eq!(PayoutFrequency::Monthly.next_execution(None, Some(5), now), at(2024, 7, 5, 12));

        let december = at(2024, 12, 20, 9);
        assert_eq!(PayoutFrequency::Monthly.next_execution(None, Some(1), december), at(2025, 1, 1, 12));
    }

    #[test]
    fn test_quarterly_next_execution() {
        assert_eq!(
            PayoutFrequency::Quarterly.next_execution(None, None, at(2024, 5, 20, 9)),
            at(2024, 7, 1, 12)
        );
        assert_eq!(
            PayoutFrequency::Quarterly.next_execution(None, Some(10), at(2024, 11, 2, 9)),
            at(2025, 1, 10, 12)
        );
    }

    #[test]
    fn test_processor_fees_round_to_cents() {
        let processors = PaymentProcessor::catalogue();
        let by_name = |name: &str| processors.iter().find(|p| p.name == name).unwrap().clone();

        assert_eq!(by_name("stripe").fee_for(dec!(100)), dec!(0.25));
        assert_eq!(by_name("paypal").fee_for(dec!(100)), dec!(0.25));
        assert_eq!(by_name("venmo").fee_for(dec!(33.33)), dec!(0.58));
        assert_eq!(by_name("wise").fee_for(dec!(250.10)), dec!(1.25));
    }

    #[test]
    fn test_payout_request_accepts_method_with_details() {
        let request: CreatePayoutRequest = serde_json::from_value(serde_json::json!({
            "user_id": 1,
            "amount": 30,
            "payment_method": "paypal",
            "payment_details": { "email": "a@b.example" },
        }))
        .unwrap();
        assert_eq!(request.amount, dec!(30));
        assert_eq!(request.payment_method, PayoutMethod::Paypal { email: "a@b.example".to_string() });

        let tagged: CreatePayoutRequest = serde_json::from_value(serde_json::json!({
            "user_id": 1,
            "amount": "30",
            "payment_method": { "type": "bank_transfer", "bank_account_id": 4 },
        }))
        .unwrap();
        assert_eq!(tagged.payment_method, PayoutMethod::BankTransfer { bank_account_id: 4 });

        let unknown = serde_json::from_value::<CreatePayoutRequest>(serde_json::json!({
            "user_id": 1,
            "amount": 30,
            "payment_method": "cheque",
            "payment_details": {},
        }));
        assert!(unknown.is_err());
    }

    #[test]
    fn test_payout_method_tagging() {
        let method: PayoutMethod =
            serde_json::from_str(r#"{"type":"paypal","email":"ada@bloom.example"}"#).unwrap();
        assert_eq!(method.processor_kind(), ProcessorKind::DigitalWallet);
        assert!(method.check().is_ok());

        let bank = PayoutMethod::BankTransfer { bank_account_id: 0 };
        assert_eq!(bank.processor_kind(), ProcessorKind::BankTransfer);
        assert!(bank.check().is_err());
    }

    #[test]
    fn test_payout_id_format() {
        let id = generate_payout_id();
        assert!(id.starts_with("PO_"));
        assert_eq!(id.len(), 19);
        assert!(id[3..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }
}
