//! Aggregate rows read by the admin reporting views.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;

use super::fraud::{FraudStatus, FraudType};
use super::payout::PayoutStatus;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LevelBreakdown {
    pub level: i32,
    pub count: i64,
    pub total_bonus: Decimal,
    pub average_bonus: Decimal,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TopReferrer {
    pub referrer_id: i64,
    pub username: String,
    pub referral_count: i64,
    pub total_bonus: Decimal,
}

#[derive(Debug, Clone, Copy, Default, Serialize, FromRow)]
pub struct ReferralCounts {
    pub total: i64,
    pub converted: i64,
    pub paid: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, FromRow)]
pub struct EarningsTotals {
    pub total_earnings: Decimal,
    pub pending_payout: Decimal,
    pub total_paid: Decimal,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PayoutStatusTotal {
    pub status: PayoutStatus,
    pub count: i64,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FraudStatusCount {
    pub status: FraudStatus,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FraudTypeStat {
    pub fraud_type: FraudType,
    pub count: i64,
    pub average_risk: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, FromRow)]
pub struct LedgerTotals {
    pub revenue: Decimal,
    pub expenses: Decimal,
    pub payouts: Decimal,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserPayoutTotal {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub total_paid: Decimal,
    pub payout_count: i64,
}
