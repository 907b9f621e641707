use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use validator::Validate;

/// Deepest ancestor level that still earns a bonus.
pub const MAX_REFERRAL_DEPTH: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "referral_payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "referral_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    Pending,
    Converted,
    BonusPaid,
    Churned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    Free,
    Premium,
    Vip,
    ProductPurchase,
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionType::Free => write!(f, "free"),
            SubscriptionType::Premium => write!(f, "premium"),
            SubscriptionType::Vip => write!(f, "vip"),
            SubscriptionType::ProductPurchase => write!(f, "product_purchase"),
        }
    }
}

/// Referrer tier, derived from the number of completed referrals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferrerTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl ReferrerTier {
    pub fn from_completed_count(count: i64) -> Self {
        if count < 4 {
            ReferrerTier::Bronze
        } else if count < 14 {
            ReferrerTier::Silver
        } else if count < 29 {
            ReferrerTier::Gold
        } else {
            ReferrerTier::Platinum
        }
    }

    /// Level-1 bonus in dollars for a referrer at this tier
    pub fn base_bonus(&self) -> Decimal {
        match self {
            ReferrerTier::Bronze => Decimal::new(10, 0),
            ReferrerTier::Silver => Decimal::new(15, 0),
            ReferrerTier::Gold => Decimal::new(25, 0),
            ReferrerTier::Platinum => Decimal::new(50, 0),
        }
    }
}

impl fmt::Display for ReferrerTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferrerTier::Bronze => write!(f, "bronze"),
            ReferrerTier::Silver => write!(f, "silver"),
            ReferrerTier::Gold => write!(f, "gold"),
            ReferrerTier::Platinum => write!(f, "platinum"),
        }
    }
}

/// Share of the base bonus paid at a chain level (1 = direct referrer).
pub fn level_multiplier(level: i32) -> Decimal {
    match level {
        1 => Decimal::ONE,
        2 => Decimal::new(5, 1),
        3 => Decimal::new(25, 2),
        _ => Decimal::ZERO,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReferralTracking {
    pub id: i64,
    pub referrer_id: i64,
    pub referred_id: i64,
    pub referral_code: String,
    pub level: i32,
    pub parent_referral_id: Option<i64>,
    pub subscription_type: Option<SubscriptionType>,
    pub payment_status: PaymentStatus,
    pub status: ReferralStatus,
    pub referral_bonus: Decimal,
    pub lifetime_value: Decimal,
    pub referred_at: DateTime<Utc>,
    pub converted_at: Option<DateTime<Utc>>,
    pub refund_period_ends_at: Option<DateTime<Utc>>,
}

impl ReferralTracking {
    /// Completed but not yet paid out, and still inside its refund window.
    pub fn is_on_hold(&self, now: DateTime<Utc>) -> bool {
        self.payment_status == PaymentStatus::Completed
            && self.status != ReferralStatus::BonusPaid
            && self.refund_period_ends_at.map_or(false, |ends| ends > now)
    }
}

/// Pending level-1 row created at signup or by explicit tracking.
#[derive(Debug, Clone)]
pub struct NewReferral {
    pub referrer_id: i64,
    pub referred_id: i64,
    pub referral_code: String,
    pub parent_referral_id: Option<i64>,
    pub referred_at: DateTime<Utc>,
}

/// Find-or-create keyed on `(referrer_id, referred_id, level)`; an existing
/// row has `bonus` added to its accumulated `referral_bonus`.
#[derive(Debug, Clone)]
pub struct ReferralBonusUpsert {
    pub referrer_id: i64,
    pub referred_id: i64,
    pub level: i32,
    pub referral_code: String,
    pub parent_referral_id: Option<i64>,
    pub subscription_type: SubscriptionType,
    pub bonus: Decimal,
    pub converted_at: DateTime<Utc>,
    pub refund_period_ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelAward {
    pub level: i32,
    pub referrer_id: i64,
    pub referral_id: i64,
    pub amount: Decimal,
}

/// Outcome of one chain walk.
#[derive(Debug, Clone, Serialize)]
pub struct ReferralBonus {
    pub base_bonus: Decimal,
    pub tier: ReferrerTier,
    pub awards: Vec<LevelAward>,
}

impl ReferralBonus {
    pub fn total_awarded(&self) -> Decimal {
        self.awards.iter().map(|a| a.amount).sum()
    }
}

/// Input to the chain walk.
#[derive(Debug, Clone)]
pub struct ConversionEvent {
    pub referrer_id: i64,
    pub referred_user_id: i64,
    pub subscription_type: SubscriptionType,
    pub parent_referral_id: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TrackReferralRequest {
    #[validate(range(min = 1))]
    pub referrer_id: i64,
    #[validate(range(min = 1))]
    pub referred_id: i64,
    #[validate(length(min = 4, max = 16))]
    pub referral_code: Option<String>,
    pub parent_referral_id: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConvertReferralRequest {
    #[validate(range(min = 1))]
    pub referred_id: i64,
    pub subscription_type: SubscriptionType,
}

#[derive(Debug, Serialize)]
pub struct ConvertReferralResponse {
    pub success: bool,
    pub bonus_awarded: Decimal,
    pub referrer_tier: ReferrerTier,
    pub awards: Vec<LevelAward>,
}

impl From<ReferralBonus> for ConvertReferralResponse {
    fn from(bonus: ReferralBonus) -> Self {
        Self {
            success: true,
            bonus_awarded: bonus.base_bonus,
            referrer_tier: bonus.tier,
            awards: bonus.awards,
        }
    }
}
