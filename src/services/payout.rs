//! Payout Service
//!
//! Releases pending earnings only when nothing the balance depends on can
//! still be reversed:
//! - no affiliate conversion of the user is still pending review
//! - no completed, unpaid referral row is inside its refund window
//!
//! Three paths move money out: the threshold sweep, user-initiated requests
//! and per-user automated schedules.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::metrics::{self, Timer};
use crate::models::*;
use crate::store::LedgerStore;

/// Why the gate kept a balance back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutBlock {
    PendingConversions,
    RefundHold,
}

impl PayoutBlock {
    fn as_str(&self) -> &'static str {
        match self {
            PayoutBlock::PendingConversions => "pending_conversions",
            PayoutBlock::RefundHold => "refund_hold",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Blocked(PayoutBlock),
}

/// Outcome of one sweep over candidates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PayoutSweep {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_paid: Decimal,
}

pub struct PayoutService {
    store: Arc<dyn LedgerStore>,
    minimum_payout: Decimal,
}

impl PayoutService {
    pub fn new(store: Arc<dyn LedgerStore>, minimum_payout: Decimal) -> Self {
        Self { store, minimum_payout }
    }

    pub fn minimum_payout(&self) -> Decimal {
        self.minimum_payout
    }

    pub async fn check_payout_eligibility(&self, user_id: i64, now: DateTime<Utc>) -> LedgerResult<Eligibility> {
        if self.store.count_pending_conversions(user_id).await? > 0 {
            return Ok(Eligibility::Blocked(PayoutBlock::PendingConversions));
        }

        let referrals = self.store.unpaid_completed_referrals(user_id).await?;
        if referrals.iter().any(|r| r.is_on_hold(now)) {
            return Ok(Eligibility::Blocked(PayoutBlock::RefundHold));
        }

        Ok(Eligibility::Eligible)
    }

    /// Pays out every balance at or above the minimum that clears the gate.
    /// Failures are logged per user and do not stop the sweep.
    pub async fn check_and_process_payouts(&self, now: DateTime<Utc>) -> LedgerResult<PayoutSweep> {
        let timer = Timer::new();
        let candidates = self
            .store
            .list_earnings_with_pending_at_least(self.minimum_payout)
            .await?;

        let mut sweep = PayoutSweep::default();
        for earnings in candidates {
            match self.settle_balance(&earnings, now).await {
                Ok(Some(amount)) => {
                    sweep.processed += 1;
                    sweep.total_paid += amount;
                }
                Ok(None) => sweep.skipped += 1,
                Err(e) => {
                    error!("Payout for user {} failed: {}", earnings.user_id, e);
                    sweep.failed += 1;
                }
            }
        }

        metrics::record_payout_sweep("threshold", timer.elapsed_secs());
        info!(
            "Payout sweep: {} processed ({}), {} skipped, {} failed",
            sweep.processed, sweep.total_paid, sweep.skipped, sweep.failed
        );
        Ok(sweep)
    }

    async fn settle_balance(&self, earnings: &UserEarnings, now: DateTime<Utc>) -> LedgerResult<Option<Decimal>> {
        if let Eligibility::Blocked(reason) = self.check_payout_eligibility(earnings.user_id, now).await? {
            return Ok(self.blocked(earnings.user_id, reason));
        }

        let amount = earnings.pending_payout;
        let settled = self
            .store
            .settle_payout(SettlePayout {
                user_id: earnings.user_id,
                amount,
                payout_method: earnings.payout_method.as_ref().map(|m| m.0.clone()),
                settled_at: now,
                ledger_entry: NewLedgerEntry::user_payout(earnings.user_id, amount, now),
                transaction: None,
                schedule: None,
            })
            .await?;

        metrics::record_payout_processed("sweep", amount);
        info!("Paid {} to user {} (request {})", amount, earnings.user_id, settled.request.id);
        Ok(Some(amount))
    }

    fn blocked(&self, user_id: i64, reason: PayoutBlock) -> Option<Decimal> {
        metrics::record_payout_blocked(reason.as_str());
        debug!("Payout for user {} held back: {}", user_id, reason.as_str());
        None
    }

    /// Reserves `amount` out of the user's pending balance as a pending request.
    pub async fn request_payout(
        &self,
        user_id: i64,
        amount: Decimal,
        payout_method: PayoutMethod,
        now: DateTime<Utc>,
    ) -> LedgerResult<PayoutRequest> {
        payout_method.check().map_err(LedgerError::Validation)?;
        if amount < self.minimum_payout {
            return Err(LedgerError::BelowMinimum {
                minimum: self.minimum_payout,
            });
        }

        let earnings = self
            .store
            .get_earnings(user_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Earnings for user", user_id))?;
        if amount > earnings.pending_payout {
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available: earnings.pending_payout,
            });
        }
        if let Eligibility::Blocked(reason) = self.check_payout_eligibility(user_id, now).await? {
            metrics::record_payout_blocked(reason.as_str());
            return Err(LedgerError::Conflict(format!(
                "Payout for user {} is held back: {}",
                user_id,
                reason.as_str()
            )));
        }

        let request = self
            .store
            .reserve_payout(NewPayoutRequest {
                user_id,
                amount,
                payout_method,
                status: PayoutStatus::Pending,
                requested_at: now,
                processed_at: None,
                notes: None,
            })
            .await?;

        metrics::record_payout_processed("manual", amount);
        info!("Payout request {} for {} by user {}", request.id, amount, user_id);
        Ok(request)
    }

    pub async fn approve_payout(
        &self,
        request_id: i64,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> LedgerResult<PayoutRequest> {
        if let Some(request) = self.store.approve_payout_request(request_id, notes, now).await? {
            info!("Payout request {} approved", request_id);
            return Ok(request);
        }

        match self.store.get_payout_request(request_id).await? {
            Some(existing) => Err(LedgerError::Conflict(format!(
                "Payout request {} is already {}",
                request_id, existing.status
            ))),
            None => Err(LedgerError::not_found("Payout request", request_id)),
        }
    }

    /// First catalogue processor handling the method's kind.
    pub fn processor_for(method: &PayoutMethod) -> LedgerResult<PaymentProcessor> {
        let kind = method.processor_kind();
        PaymentProcessor::catalogue()
            .into_iter()
            .find(|p| p.kind == kind)
            .ok_or_else(|| LedgerError::Internal(format!("No processor configured for {}", method)))
    }

    /// Replaces the user's active schedule and makes its method the user's
    /// default payout destination.
    pub async fn upsert_schedule(&self, request: UpsertScheduleRequest, now: DateTime<Utc>) -> LedgerResult<PayoutSchedule> {
        request.payout_method.check().map_err(LedgerError::Validation)?;
        if self.store.get_user(request.user_id).await?.is_none() {
            return Err(LedgerError::not_found("User", request.user_id));
        }

        let minimum_amount = request.minimum_amount.unwrap_or(self.minimum_payout);
        if minimum_amount <= Decimal::ZERO {
            return Err(LedgerError::Validation("minimum_amount must be positive".to_string()));
        }

        let (day_of_week, day_of_month) = match request.frequency {
            PayoutFrequency::Weekly => (Some(request.day_of_week.unwrap_or(0)), None),
            PayoutFrequency::Monthly | PayoutFrequency::Quarterly => (None, Some(request.day_of_month.unwrap_or(1))),
        };
        let next_execution = request.frequency.next_execution(day_of_week, day_of_month, now);

        let schedule = self
            .store
            .replace_schedule(NewPayoutSchedule {
                user_id: request.user_id,
                frequency: request.frequency,
                day_of_week,
                day_of_month,
                minimum_amount,
                payout_method: request.payout_method.clone(),
                next_execution,
                created_at: now,
            })
            .await?;
        self.store
            .set_payout_method(request.user_id, request.payout_method)
            .await?;

        info!(
            "Payout schedule {} for user {}: {:?}, next run {}",
            schedule.id, schedule.user_id, schedule.frequency, schedule.next_execution
        );
        Ok(schedule)
    }

    pub async fn get_schedule(&self, user_id: i64) -> LedgerResult<PayoutSchedule> {
        self.store
            .get_active_schedule(user_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Payout schedule for user", user_id))
    }

    /// Runs every active schedule that is due.
    ///
    /// A balance under the schedule minimum moves the schedule to its next
    /// date. A balance held back by the gate leaves it due, so the next run
    /// retries once the hold clears.
    pub async fn process_scheduled_payouts(&self, now: DateTime<Utc>) -> LedgerResult<PayoutSweep> {
        let timer = Timer::new();
        let schedules = self.store.due_schedules(now).await?;

        let mut sweep = PayoutSweep::default();
        for schedule in schedules {
            match self.run_schedule(&schedule, now).await {
                Ok(Some(amount)) => {
                    sweep.processed += 1;
                    sweep.total_paid += amount;
                }
                Ok(None) => sweep.skipped += 1,
                Err(e) => {
                    error!("Scheduled payout {} for user {} failed: {}", schedule.id, schedule.user_id, e);
                    sweep.failed += 1;
                }
            }
        }

        metrics::record_payout_sweep("scheduled", timer.elapsed_secs());
        info!(
            "Scheduled payouts: {} processed ({}), {} skipped, {} failed",
            sweep.processed, sweep.total_paid, sweep.skipped, sweep.failed
        );
        Ok(sweep)
    }

    async fn run_schedule(&self, schedule: &PayoutSchedule, now: DateTime<Utc>) -> LedgerResult<Option<Decimal>> {
        let next_execution = schedule
            .frequency
            .next_execution(schedule.day_of_week, schedule.day_of_month, now);

        let pending = self
            .store
            .get_earnings(schedule.user_id)
            .await?
            .map(|e| e.pending_payout)
            .unwrap_or(Decimal::ZERO);
        if pending <= Decimal::ZERO || pending < schedule.minimum_amount {
            debug!(
                "Schedule {}: pending {} below minimum {}",
                schedule.id, pending, schedule.minimum_amount
            );
            self.store.reschedule(schedule.id, next_execution).await?;
            return Ok(None);
        }

        if let Eligibility::Blocked(reason) = self.check_payout_eligibility(schedule.user_id, now).await? {
            return Ok(self.blocked(schedule.user_id, reason));
        }

        let payout_method = schedule.payout_method.0.clone();
        let processor = Self::processor_for(&payout_method)?;
        let processor_fee = processor.fee_for(pending);
        let payout_id = generate_payout_id();

        self.store
            .settle_payout(SettlePayout {
                user_id: schedule.user_id,
                amount: pending,
                payout_method: Some(payout_method.clone()),
                settled_at: now,
                ledger_entry: NewLedgerEntry::user_payout(schedule.user_id, pending, now)
                    .referencing("payout", &payout_id),
                transaction: Some(NewPayoutTransaction {
                    payout_id: payout_id.clone(),
                    schedule_id: Some(schedule.id),
                    processor: processor.name.to_string(),
                    processor_fee,
                    final_amount: pending - processor_fee,
                    payout_method,
                }),
                schedule: Some(ScheduleAdvance {
                    schedule_id: schedule.id,
                    next_execution,
                }),
            })
            .await?;

        metrics::record_payout_processed("scheduled", pending);
        info!(
            "Scheduled payout {} of {} to user {} via {} (fee {})",
            payout_id, pending, schedule.user_id, processor.name, processor_fee
        );
        Ok(Some(pending))
    }

    /// Background loop running scheduled payouts and the threshold sweep.
    pub fn start_sweep_loop(self: Arc<Self>, interval_secs: u64) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!("Payout sweep loop started (every {}s)", interval_secs);

            loop {
                ticker.tick().await;
                let now = Utc::now();

                if let Err(e) = self.process_scheduled_payouts(now).await {
                    warn!("Scheduled payout run failed: {}", e);
                }
                if let Err(e) = self.check_and_process_payouts(now).await {
                    warn!("Payout sweep failed: {}", e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::earnings::EarningsService;
    use crate::services::referral::ReferralService;
    use crate::services::test_support::{link, memory_store, seed_user};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use rust_decimal_macros::dec;

    struct Harness {
        store: Arc<dyn LedgerStore>,
        payouts: PayoutService,
        earnings: Arc<EarningsService>,
        referrals: ReferralService,
    }

    async fn create_harness() -> Harness {
        let store = memory_store().await;
        let earnings = Arc::new(EarningsService::new(store.clone()));
        Harness {
            payouts: PayoutService::new(store.clone(), dec!(25)),
            referrals: ReferralService::new(store.clone(), earnings.clone(), 7),
            earnings,
            store,
        }
    }

    fn paypal(name: &str) -> PayoutMethod {
        PayoutMethod::Paypal {
            email: format!("{}@bloom.example", name),
        }
    }

    #[tokio::test]
    async fn test_balance_below_threshold_is_never_swept() {
        let h = create_harness().await;
        let now = Utc::now();
        let user = seed_user(&h.store, "ivy", now).await;
        h.store.set_payout_method(user.id, paypal("ivy")).await.unwrap();
        h.earnings.credit(user.id, EarningSource::Content, dec!(24.99), now).await.unwrap();

        let sweep = h.payouts.check_and_process_payouts(now).await.unwrap();
        assert_eq!(sweep.processed, 0);
        assert_eq!(sweep.skipped, 0);

        let earnings = h.store.get_earnings(user.id).await.unwrap().unwrap();
        assert_eq!(earnings.pending_payout, dec!(24.99));
        assert_eq!(earnings.total_paid, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_refund_hold_blocks_then_releases() {
        let h = create_harness().await;
        let now = Utc::now();
        let sponsor = seed_user(&h.store, "jade", now).await;
        h.store.set_payout_method(sponsor.id, paypal("jade")).await.unwrap();
        h.earnings.credit(sponsor.id, EarningSource::Content, dec!(50), now).await.unwrap();

        let friend = seed_user(&h.store, "kai", now).await;
        link(&h.store, &sponsor, &friend, now).await;
        h.referrals
            .convert_referral(friend.id, SubscriptionType::Premium, now)
            .await
            .unwrap();

        let sweep = h.payouts.check_and_process_payouts(now).await.unwrap();
        assert_eq!(sweep.processed, 0);
        assert_eq!(sweep.skipped, 1);
        assert_eq!(
            h.payouts.check_payout_eligibility(sponsor.id, now).await.unwrap(),
            Eligibility::Blocked(PayoutBlock::RefundHold)
        );

        let later = now + ChronoDuration::days(8);
        let sweep = h.payouts.check_and_process_payouts(later).await.unwrap();
        assert_eq!(sweep.processed, 1);
        assert_eq!(sweep.total_paid, dec!(60));

        let earnings = h.store.get_earnings(sponsor.id).await.unwrap().unwrap();
        assert_eq!(earnings.pending_payout, Decimal::ZERO);
        assert_eq!(earnings.total_paid, dec!(60));
        assert_eq!(earnings.last_payout_date, Some(later));

        let rows = h.store.list_referrals_by_referrer(sponsor.id).await.unwrap();
        assert!(rows.iter().all(|r| r.status == ReferralStatus::BonusPaid));

        let payouts = h
            .store
            .list_ledger_entries(&LedgerFilter {
                category: Some(categories::USER_PAYOUT.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].amount, dec!(60));
    }

    #[tokio::test]
    async fn test_pending_affiliate_conversion_blocks_payout() {
        let h = create_harness().await;
        let now = Utc::now();
        let user = seed_user(&h.store, "lea", now).await;
        h.store.set_payout_method(user.id, paypal("lea")).await.unwrap();
        let program = h.store.list_programs(true).await.unwrap()[0].id;
        let link = h.earnings.create_link(user.id, program, now).await.unwrap();
        let conversion = h
            .earnings
            .record_conversion(&link.unique_code, dec!(500), None, now)
            .await
            .unwrap();

        let sweep = h.payouts.check_and_process_payouts(now).await.unwrap();
        assert_eq!(sweep.processed, 0);

        h.earnings.approve_conversion(conversion.id, now).await.unwrap();
        let sweep = h.payouts.check_and_process_payouts(now).await.unwrap();
        assert_eq!(sweep.processed, 1);
        assert_eq!(sweep.total_paid, dec!(200));
    }

    #[tokio::test]
    async fn test_sweep_pays_user_without_payout_method() {
        let h = create_harness().await;
        let now = Utc::now();
        let user = seed_user(&h.store, "max", now).await;
        h.earnings.credit(user.id, EarningSource::Content, dec!(100), now).await.unwrap();

        let sweep = h.payouts.check_and_process_payouts(now).await.unwrap();
        assert_eq!(sweep.processed, 1);
        assert_eq!(sweep.skipped, 0);
        assert_eq!(sweep.total_paid, dec!(100));

        let earnings = h.store.get_earnings(user.id).await.unwrap().unwrap();
        assert_eq!(earnings.pending_payout, Decimal::ZERO);
        assert_eq!(earnings.total_paid, dec!(100));
    }

    #[tokio::test]
    async fn test_manual_request_waits_for_conversion_review() {
        let h = create_harness().await;
        let now = Utc::now();
        let user = seed_user(&h.store, "noor", now).await;
        let program = h
            .store
            .list_programs(true)
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.name == "Mindvalley Courses")
            .unwrap();
        let link = h.earnings.create_link(user.id, program.id, now).await.unwrap();
        let conversion = h
            .earnings
            .record_conversion(&link.unique_code, dec!(500), None, now)
            .await
            .unwrap();
        assert_eq!(conversion.commission_earned, dec!(200));

        let err = h.payouts.request_payout(user.id, dec!(200), paypal("noor"), now).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));

        h.earnings.reject_conversion(conversion.id, Some("refunded"), now).await.unwrap();
        let earnings = h.store.get_earnings(user.id).await.unwrap().unwrap();
        assert_eq!(earnings.pending_payout, Decimal::ZERO);
        assert_eq!(earnings.affiliate_earnings, Decimal::ZERO);
        assert_eq!(earnings.total_earnings, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_manual_request_validation() {
        let h = create_harness().await;
        let now = Utc::now();
        let user = seed_user(&h.store, "nia", now).await;

        let err = h.payouts.request_payout(user.id, dec!(30), paypal("nia"), now).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));

        h.earnings.credit(user.id, EarningSource::Content, dec!(40), now).await.unwrap();

        let err = h.payouts.request_payout(user.id, dec!(20), paypal("nia"), now).await.unwrap_err();
        assert!(matches!(err, LedgerError::BelowMinimum { .. }));

        let err = h.payouts.request_payout(user.id, dec!(45), paypal("nia"), now).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

        let bad_method = PayoutMethod::Paypal { email: "not-an-email".to_string() };
        let err = h.payouts.request_payout(user.id, dec!(30), bad_method, now).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let request = h.payouts.request_payout(user.id, dec!(30), paypal("nia"), now).await.unwrap();
        assert_eq!(request.status, PayoutStatus::Pending);
        let earnings = h.store.get_earnings(user.id).await.unwrap().unwrap();
        assert_eq!(earnings.pending_payout, dec!(10));

        let approved = h.payouts.approve_payout(request.id, Some("ok".into()), now).await.unwrap();
        assert_eq!(approved.status, PayoutStatus::Approved);
        let err = h.payouts.approve_payout(request.id, None, now).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_scheduled_payout_records_transaction_and_advances() {
        let h = create_harness().await;
        // 2024-06-05 is a Wednesday
        let created = Utc.with_ymd_and_hms(2024, 6, 5, 9, 0, 0).unwrap();
        let user = seed_user(&h.store, "oda", created).await;
        h.earnings.credit(user.id, EarningSource::Content, dec!(100), created).await.unwrap();

        let schedule = h
            .payouts
            .upsert_schedule(
                UpsertScheduleRequest {
                    user_id: user.id,
                    frequency: PayoutFrequency::Weekly,
                    day_of_week: Some(4),
                    day_of_month: None,
                    minimum_amount: Some(dec!(50)),
                    payout_method: PayoutMethod::BankTransfer { bank_account_id: 77 },
                },
                created,
            )
            .await
            .unwrap();
        assert_eq!(schedule.next_execution, Utc.with_ymd_and_hms(2024, 6, 7, 9, 0, 0).unwrap());

        let too_early = h.payouts.process_scheduled_payouts(created).await.unwrap();
        assert_eq!(too_early.processed + too_early.skipped, 0);

        let run_at = Utc.with_ymd_and_hms(2024, 6, 7, 9, 0, 0).unwrap();
        let sweep = h.payouts.process_scheduled_payouts(run_at).await.unwrap();
        assert_eq!(sweep.processed, 1);
        assert_eq!(sweep.total_paid, dec!(100));

        let advanced = h.payouts.get_schedule(user.id).await.unwrap();
        assert_eq!(advanced.total_payouts_made, 1);
        assert_eq!(advanced.total_amount_paid, dec!(100));
        assert_eq!(advanced.last_execution, Some(run_at));
        assert_eq!(advanced.next_execution, Utc.with_ymd_and_hms(2024, 6, 14, 9, 0, 0).unwrap());

        let entries = h.store.list_ledger_entries(&LedgerFilter::default()).await.unwrap();
        let payout_entry = entries.iter().find(|e| e.category == categories::USER_PAYOUT).unwrap();
        assert_eq!(payout_entry.reference_type.as_deref(), Some("payout"));
        assert!(payout_entry.reference_id.as_deref().unwrap().starts_with("PO_"));
    }

    #[tokio::test]
    async fn test_schedule_below_minimum_is_pushed_back() {
        let h = create_harness().await;
        let created = Utc.with_ymd_and_hms(2024, 6, 5, 9, 0, 0).unwrap();
        let user = seed_user(&h.store, "pax", created).await;
        h.earnings.credit(user.id, EarningSource::Content, dec!(40), created).await.unwrap();

        h.payouts
            .upsert_schedule(
                UpsertScheduleRequest {
                    user_id: user.id,
                    frequency: PayoutFrequency::Monthly,
                    day_of_week: None,
                    day_of_month: Some(10),
                    minimum_amount: Some(dec!(75)),
                    payout_method: paypal("pax"),
                },
                created,
            )
            .await
            .unwrap();

        let run_at = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        let sweep = h.payouts.process_scheduled_payouts(run_at).await.unwrap();
        assert_eq!(sweep.skipped, 1);

        let schedule = h.payouts.get_schedule(user.id).await.unwrap();
        assert_eq!(schedule.next_execution, Utc.with_ymd_and_hms(2024, 7, 10, 12, 0, 0).unwrap());
        assert_eq!(schedule.total_payouts_made, 0);
    }

    #[test]
    fn test_processor_selection_by_method_kind() {
        let bank = PayoutService::processor_for(&PayoutMethod::BankTransfer { bank_account_id: 1 }).unwrap();
        assert_eq!(bank.name, "stripe");

        let crypto = PayoutService::processor_for(&PayoutMethod::Crypto {
            address: "bc1q".to_string(),
            currency: "BTC".to_string(),
        })
        .unwrap();
        assert_eq!(crypto.name, "paypal");
    }
}
