//! Ledger Store
//!
//! Every read and write the services need, behind one trait:
//! - `PgLedgerStore`: PostgreSQL via sqlx, atomic increments and
//!   row-locked payout settlement
//! - `MemoryLedgerStore`: process-local tables for tests and local runs
//!
//! Each method is atomic on its own. Multi-row effects that must land
//! together (referral upsert, payout reservation, settlement) are single
//! methods so both backends can make them atomic.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::error::LedgerResult;
use crate::models::*;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ---- users ----
    async fn create_user(&self, user: NewUser) -> LedgerResult<User>;
    async fn get_user(&self, user_id: i64) -> LedgerResult<Option<User>>;
    async fn find_user_by_referral_code(&self, code: &str) -> LedgerResult<Option<User>>;
    async fn count_users(&self) -> LedgerResult<i64>;
    async fn count_users_joined_since(&self, since: DateTime<Utc>) -> LedgerResult<i64>;
    async fn count_users_with_email_domain(&self, domain: &str) -> LedgerResult<i64>;

    // ---- referrals ----
    /// Inserts a pending level-1 row; duplicate keys are a conflict.
    async fn insert_referral(&self, referral: NewReferral) -> LedgerResult<ReferralTracking>;
    /// Level-1 row whose `referred_id` is the given user.
    async fn find_upstream_referral(&self, referred_id: i64) -> LedgerResult<Option<ReferralTracking>>;
    /// Flips a pending level-1 row to completed/converted. `None` when the row
    /// was not pending anymore.
    async fn mark_referral_converted(
        &self,
        referral_id: i64,
        subscription_type: SubscriptionType,
        converted_at: DateTime<Utc>,
    ) -> LedgerResult<Option<ReferralTracking>>;
    async fn upsert_referral_bonus(&self, upsert: ReferralBonusUpsert) -> LedgerResult<ReferralTracking>;
    async fn count_completed_referrals(&self, referrer_id: i64) -> LedgerResult<i64>;
    async fn count_converted_referrals(&self, referrer_id: i64) -> LedgerResult<i64>;
    async fn count_referrals_since(&self, referrer_id: i64, since: DateTime<Utc>) -> LedgerResult<i64>;
    async fn referral_exists(&self, referrer_id: i64, referred_id: i64) -> LedgerResult<bool>;
    async fn list_referrals_by_referrer(&self, referrer_id: i64) -> LedgerResult<Vec<ReferralTracking>>;
    /// Completed rows not yet marked `bonus_paid`, across all levels.
    async fn unpaid_completed_referrals(&self, user_id: i64) -> LedgerResult<Vec<ReferralTracking>>;

    // ---- earnings ----
    async fn get_earnings(&self, user_id: i64) -> LedgerResult<Option<UserEarnings>>;
    /// Adds `amount` to one source column, `total_earnings` and
    /// `pending_payout`, creating the row on first credit.
    async fn credit_earnings(
        &self,
        user_id: i64,
        source: EarningSource,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> LedgerResult<UserEarnings>;
    async fn set_payout_method(&self, user_id: i64, method: PayoutMethod) -> LedgerResult<()>;
    async fn list_earnings_with_pending_at_least(&self, threshold: Decimal) -> LedgerResult<Vec<UserEarnings>>;

    // ---- affiliate ----
    async fn insert_program(&self, program: NewAffiliateProgram) -> LedgerResult<AffiliateProgram>;
    async fn list_programs(&self, active_only: bool) -> LedgerResult<Vec<AffiliateProgram>>;
    async fn get_program(&self, program_id: i64) -> LedgerResult<Option<AffiliateProgram>>;
    async fn find_link(&self, user_id: i64, program_id: i64) -> LedgerResult<Option<UserAffiliateLink>>;
    async fn insert_link(
        &self,
        user_id: i64,
        program_id: i64,
        unique_code: &str,
        at: DateTime<Utc>,
    ) -> LedgerResult<UserAffiliateLink>;
    async fn find_link_by_code(&self, code: &str) -> LedgerResult<Option<UserAffiliateLink>>;
    async fn list_links(&self, user_id: i64) -> LedgerResult<Vec<UserAffiliateLink>>;
    async fn record_link_click(&self, link_id: i64) -> LedgerResult<UserAffiliateLink>;
    /// Inserts the conversion and bumps the link's conversion/earnings totals.
    async fn insert_conversion(&self, conversion: NewAffiliateConversion) -> LedgerResult<AffiliateConversion>;
    async fn get_conversion(&self, conversion_id: i64) -> LedgerResult<Option<AffiliateConversion>>;
    /// Moves a pending conversion to `status`. `None` when it was not pending.
    async fn resolve_conversion(
        &self,
        conversion_id: i64,
        status: ConversionStatus,
        at: DateTime<Utc>,
    ) -> LedgerResult<Option<AffiliateConversion>>;
    async fn count_pending_conversions(&self, user_id: i64) -> LedgerResult<i64>;
    async fn recent_conversions(&self, user_id: i64, limit: i64) -> LedgerResult<Vec<AffiliateConversion>>;

    // ---- content ----
    async fn insert_content(&self, content: NewViralContent) -> LedgerResult<ViralContent>;
    async fn get_content(&self, content_id: i64) -> LedgerResult<Option<ViralContent>>;
    /// Records the reward on a pending submission. `None` when it was not pending.
    async fn approve_content(&self, content_id: i64, reward: ContentReward) -> LedgerResult<Option<ViralContent>>;
    async fn count_content(&self, user_id: i64, status: Option<ContentStatus>) -> LedgerResult<i64>;

    // ---- payouts ----
    /// Subtracts `amount` from `pending_payout` and records the request in one step.
    async fn reserve_payout(&self, request: NewPayoutRequest) -> LedgerResult<PayoutRequest>;
    async fn settle_payout(&self, settlement: SettlePayout) -> LedgerResult<SettledPayout>;
    async fn get_payout_request(&self, request_id: i64) -> LedgerResult<Option<PayoutRequest>>;
    /// `pending -> approved`. `None` when the request was not pending.
    async fn approve_payout_request(
        &self,
        request_id: i64,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> LedgerResult<Option<PayoutRequest>>;
    async fn list_payout_requests(&self, status: Option<PayoutStatus>, limit: i64) -> LedgerResult<Vec<PayoutRequest>>;
    async fn payout_status_totals(&self) -> LedgerResult<Vec<PayoutStatusTotal>>;

    // ---- schedules ----
    /// Deactivates any active schedule of the user and inserts this one.
    async fn replace_schedule(&self, schedule: NewPayoutSchedule) -> LedgerResult<PayoutSchedule>;
    async fn get_active_schedule(&self, user_id: i64) -> LedgerResult<Option<PayoutSchedule>>;
    async fn due_schedules(&self, now: DateTime<Utc>) -> LedgerResult<Vec<PayoutSchedule>>;
    /// Moves `next_execution` without a payout (schedule ran but nothing was due).
    async fn reschedule(&self, schedule_id: i64, next_execution: DateTime<Utc>) -> LedgerResult<()>;

    // ---- ledger ----
    async fn insert_ledger_entry(&self, entry: NewLedgerEntry) -> LedgerResult<LedgerEntry>;
    async fn list_ledger_entries(&self, filter: &LedgerFilter) -> LedgerResult<Vec<LedgerEntry>>;
    async fn ledger_totals(&self, from: NaiveDate, to: NaiveDate) -> LedgerResult<LedgerTotals>;
    async fn payouts_by_user(&self, from: NaiveDate, to: NaiveDate) -> LedgerResult<Vec<UserPayoutTotal>>;

    // ---- fraud ----
    async fn insert_fraud_detection(&self, detection: NewFraudDetection) -> LedgerResult<FraudDetection>;
    async fn count_fraud_detections(&self, user_id: i64, status: FraudStatus) -> LedgerResult<i64>;
    async fn fraud_status_counts(&self) -> LedgerResult<Vec<FraudStatusCount>>;
    async fn fraud_type_stats(&self) -> LedgerResult<Vec<FraudTypeStat>>;
    async fn recent_fraud_detections(&self, limit: i64) -> LedgerResult<Vec<FraudDetection>>;

    // ---- reporting ----
    async fn referral_level_breakdown(&self) -> LedgerResult<Vec<LevelBreakdown>>;
    async fn top_referrers(&self, limit: i64) -> LedgerResult<Vec<TopReferrer>>;
    async fn referral_counts(&self) -> LedgerResult<ReferralCounts>;
    async fn earnings_totals(&self) -> LedgerResult<EarningsTotals>;
}
