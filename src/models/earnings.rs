use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::fmt;

use super::affiliate::AffiliateConversion;
use super::payout::PayoutMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EarningSource {
    Referral,
    Affiliate,
    Content,
    Community,
}

impl fmt::Display for EarningSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EarningSource::Referral => write!(f, "referral"),
            EarningSource::Affiliate => write!(f, "affiliate"),
            EarningSource::Content => write!(f, "content"),
            EarningSource::Community => write!(f, "community"),
        }
    }
}

/// Per-user running totals.
///
/// `total_earnings` is always the sum of the four source columns: every
/// credit moves one source column, `total_earnings` and `pending_payout`
/// together.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserEarnings {
    pub user_id: i64,
    pub referral_earnings: Decimal,
    pub affiliate_earnings: Decimal,
    pub content_earnings: Decimal,
    pub community_earnings: Decimal,
    pub total_earnings: Decimal,
    pub pending_payout: Decimal,
    pub total_paid: Decimal,
    pub last_payout_date: Option<DateTime<Utc>>,
    pub payout_method: Option<Json<PayoutMethod>>,
    pub updated_at: DateTime<Utc>,
}

impl UserEarnings {
    pub fn empty(user_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            referral_earnings: Decimal::ZERO,
            affiliate_earnings: Decimal::ZERO,
            content_earnings: Decimal::ZERO,
            community_earnings: Decimal::ZERO,
            total_earnings: Decimal::ZERO,
            pending_payout: Decimal::ZERO,
            total_paid: Decimal::ZERO,
            last_payout_date: None,
            payout_method: None,
            updated_at: now,
        }
    }

    pub fn apply_credit(&mut self, source: EarningSource, amount: Decimal, now: DateTime<Utc>) {
        match source {
            EarningSource::Referral => self.referral_earnings += amount,
            EarningSource::Affiliate => self.affiliate_earnings += amount,
            EarningSource::Content => self.content_earnings += amount,
            EarningSource::Community => self.community_earnings += amount,
        }
        self.total_earnings += amount;
        self.pending_payout += amount;
        self.updated_at = now;
    }

    pub fn sources_total(&self) -> Decimal {
        self.referral_earnings + self.affiliate_earnings + self.content_earnings + self.community_earnings
    }
}

#[derive(Debug, Serialize)]
pub struct EarningsBreakdown {
    pub user_id: i64,
    pub referral_earnings: Decimal,
    pub affiliate_earnings: Decimal,
    pub content_earnings: Decimal,
    pub community_earnings: Decimal,
    pub total_earnings: Decimal,
    pub pending_payout: Decimal,
    pub total_paid: Decimal,
    pub last_payout_date: Option<DateTime<Utc>>,
    pub referral_count: i64,
    pub recent_conversions: Vec<AffiliateConversion>,
}

impl EarningsBreakdown {
    pub fn new(
        earnings: UserEarnings,
        referral_count: i64,
        recent_conversions: Vec<AffiliateConversion>,
    ) -> Self {
        Self {
            user_id: earnings.user_id,
            referral_earnings: earnings.referral_earnings,
            affiliate_earnings: earnings.affiliate_earnings,
            content_earnings: earnings.content_earnings,
            community_earnings: earnings.community_earnings,
            total_earnings: earnings.total_earnings,
            pending_payout: earnings.pending_payout,
            total_paid: earnings.total_paid,
            last_payout_date: earnings.last_payout_date,
            referral_count,
            recent_conversions,
        }
    }
}
