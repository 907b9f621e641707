//! Read-only admin aggregations.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

use crate::error::{LedgerError, LedgerResult};
use crate::models::*;
use crate::store::LedgerStore;

/// Users paid at least this much in a period are listed for tax reporting.
pub const COMPLIANCE_THRESHOLD: Decimal = Decimal::from_parts(600, 0, 0, false, 0);

const TOP_REFERRERS: i64 = 20;
const PENDING_PAYOUTS_SHOWN: i64 = 50;
const RECENT_DETECTIONS_SHOWN: i64 = 20;

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub total_users: i64,
    pub new_users_today: i64,
    pub total_referrals: i64,
    pub converted_referrals: i64,
    pub conversion_rate: Decimal,
    pub total_earnings: Decimal,
    pub total_referral_debt: Decimal,
    pub total_paid: Decimal,
    pub pending_payout_requests: i64,
    pub pending_fraud_alerts: i64,
}

#[derive(Debug, Serialize)]
pub struct ReferralFunnel {
    pub total: i64,
    pub converted: i64,
    pub paid: i64,
    pub conversion_rate: Decimal,
    pub payout_rate: Decimal,
}

#[derive(Debug, Serialize)]
pub struct ReferralOverview {
    pub levels: Vec<LevelBreakdown>,
    pub top_referrers: Vec<TopReferrer>,
    pub funnel: ReferralFunnel,
}

#[derive(Debug, Serialize)]
pub struct PayoutOverview {
    pub pending_requests: Vec<PayoutRequest>,
    pub pending_amount: Decimal,
    pub by_status: Vec<PayoutStatusTotal>,
}

#[derive(Debug, Serialize)]
pub struct FraudOverview {
    pub by_status: Vec<FraudStatusCount>,
    pub by_type: Vec<FraudTypeStat>,
    pub recent: Vec<FraudDetection>,
}

#[derive(Debug, Serialize)]
pub struct FinancialSummary {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_revenue: Decimal,
    pub total_expenses: Decimal,
    pub total_payouts: Decimal,
    pub net_income: Decimal,
    pub payout_ratio: Decimal,
}

#[derive(Debug, Serialize)]
pub struct ComplianceSummary {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_payments_made: Decimal,
    pub total_users_paid: usize,
    pub reportable_users: Vec<UserPayoutTotal>,
}

/// `part / whole` as a percentage with two decimals, zero for an empty whole.
fn percentage(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        Decimal::ZERO
    } else {
        (part / whole * Decimal::ONE_HUNDRED).round_dp(2)
    }
}

/// Resolves an optional period, defaulting to the current month up to today.
fn period(from: Option<NaiveDate>, to: Option<NaiveDate>, now: DateTime<Utc>) -> LedgerResult<(NaiveDate, NaiveDate)> {
    let today = now.date_naive();
    let from = from.unwrap_or_else(|| today.with_day(1).unwrap_or(today));
    let to = to.unwrap_or(today);
    if from > to {
        return Err(LedgerError::Validation(format!(
            "Period start {} is after period end {}",
            from, to
        )));
    }
    Ok((from, to))
}

pub struct ReportingService {
    store: Arc<dyn LedgerStore>,
}

impl ReportingService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn dashboard(&self, now: DateTime<Utc>) -> LedgerResult<Dashboard> {
        let start_of_day = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or(now);

        let total_users = self.store.count_users().await?;
        let new_users_today = self.store.count_users_joined_since(start_of_day).await?;
        let referrals = self.store.referral_counts().await?;
        let earnings = self.store.earnings_totals().await?;
        let pending_payout_requests = self
            .store
            .payout_status_totals()
            .await?
            .iter()
            .find(|t| t.status == PayoutStatus::Pending)
            .map_or(0, |t| t.count);
        let pending_fraud_alerts = self
            .store
            .fraud_status_counts()
            .await?
            .iter()
            .find(|c| c.status == FraudStatus::Pending)
            .map_or(0, |c| c.count);

        Ok(Dashboard {
            total_users,
            new_users_today,
            total_referrals: referrals.total,
            converted_referrals: referrals.converted,
            conversion_rate: percentage(Decimal::from(referrals.converted), Decimal::from(referrals.total)),
            total_earnings: earnings.total_earnings,
            total_referral_debt: earnings.pending_payout,
            total_paid: earnings.total_paid,
            pending_payout_requests,
            pending_fraud_alerts,
        })
    }

    pub async fn referral_overview(&self) -> LedgerResult<ReferralOverview> {
        let levels = self.store.referral_level_breakdown().await?;
        let top_referrers = self.store.top_referrers(TOP_REFERRERS).await?;
        let counts = self.store.referral_counts().await?;

        Ok(ReferralOverview {
            levels,
            top_referrers,
            funnel: ReferralFunnel {
                total: counts.total,
                converted: counts.converted,
                paid: counts.paid,
                conversion_rate: percentage(Decimal::from(counts.converted), Decimal::from(counts.total)),
                payout_rate: percentage(Decimal::from(counts.paid), Decimal::from(counts.converted)),
            },
        })
    }

    pub async fn payout_overview(&self) -> LedgerResult<PayoutOverview> {
        let pending_requests = self
            .store
            .list_payout_requests(Some(PayoutStatus::Pending), PENDING_PAYOUTS_SHOWN)
            .await?;
        let by_status = self.store.payout_status_totals().await?;
        let pending_amount = by_status
            .iter()
            .find(|t| t.status == PayoutStatus::Pending)
            .map_or(Decimal::ZERO, |t| t.total_amount);

        Ok(PayoutOverview {
            pending_requests,
            pending_amount,
            by_status,
        })
    }

    pub async fn fraud_overview(&self) -> LedgerResult<FraudOverview> {
        Ok(FraudOverview {
            by_status: self.store.fraud_status_counts().await?,
            by_type: self.store.fraud_type_stats().await?,
            recent: self.store.recent_fraud_detections(RECENT_DETECTIONS_SHOWN).await?,
        })
    }

    pub async fn financial_summary(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> LedgerResult<FinancialSummary> {
        let (period_start, period_end) = period(from, to, now)?;
        let totals = self.store.ledger_totals(period_start, period_end).await?;

        Ok(FinancialSummary {
            period_start,
            period_end,
            total_revenue: totals.revenue,
            total_expenses: totals.expenses,
            total_payouts: totals.payouts,
            net_income: totals.revenue - totals.expenses - totals.payouts,
            payout_ratio: percentage(totals.payouts, totals.revenue),
        })
    }

    pub async fn compliance_summary(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> LedgerResult<ComplianceSummary> {
        let (period_start, period_end) = period(from, to, now)?;
        let per_user = self.store.payouts_by_user(period_start, period_end).await?;

        let total_payments_made = per_user.iter().map(|u| u.total_paid).sum();
        let total_users_paid = per_user.len();
        let reportable_users = per_user
            .into_iter()
            .filter(|u| u.total_paid >= COMPLIANCE_THRESHOLD)
            .collect();

        Ok(ComplianceSummary {
            period_start,
            period_end,
            total_payments_made,
            total_users_paid,
            reportable_users,
        })
    }

    pub async fn ledger(&self, filter: &LedgerFilter) -> LedgerResult<Vec<LedgerEntry>> {
        if let (Some(from), Some(to)) = (filter.from_date, filter.to_date) {
            if from > to {
                return Err(LedgerError::Validation(format!(
                    "from_date {} is after to_date {}",
                    from, to
                )));
            }
        }
        self.store.list_ledger_entries(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::earnings::EarningsService;
    use crate::services::payout::PayoutService;
    use crate::services::referral::ReferralService;
    use crate::services::test_support::{link, memory_store, seed_user};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    #[test]
    fn test_percentage_handles_empty_whole() {
        assert_eq!(percentage(dec!(3), dec!(4)), dec!(75));
        assert_eq!(percentage(dec!(1), dec!(3)), dec!(33.33));
        assert_eq!(percentage(dec!(5), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_period_defaults_to_current_month() {
        let now = Utc.with_ymd_and_hms(2024, 6, 18, 15, 0, 0).unwrap();
        let (from, to) = period(None, None, now).unwrap();
        assert_eq!(from, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(to, NaiveDate::from_ymd_opt(2024, 6, 18).unwrap());

        let reversed = period(Some(to), Some(from), now);
        assert!(matches!(reversed, Err(LedgerError::Validation(_))));
    }

    #[tokio::test]
    async fn test_dashboard_and_referral_overview() {
        let store = memory_store().await;
        let earnings = Arc::new(EarningsService::new(store.clone()));
        let referrals = ReferralService::new(store.clone(), earnings.clone(), 7);
        let reporting = ReportingService::new(store.clone());
        let now = Utc::now();

        let a = seed_user(&store, "vera", now - Duration::days(3)).await;
        let b = seed_user(&store, "wes", now).await;
        let c = seed_user(&store, "xan", now).await;
        link(&store, &a, &b, now).await;
        link(&store, &b, &c, now).await;
        referrals.convert_referral(c.id, SubscriptionType::Premium, now).await.unwrap();

        let dashboard = reporting.dashboard(now).await.unwrap();
        assert_eq!(dashboard.total_users, 3);
        assert_eq!(dashboard.total_referrals, 2);
        assert_eq!(dashboard.converted_referrals, 1);
        assert_eq!(dashboard.conversion_rate, dec!(50));
        assert_eq!(dashboard.total_referral_debt, dec!(15));
        assert_eq!(dashboard.pending_payout_requests, 0);

        let overview = reporting.referral_overview().await.unwrap();
        let level2 = overview.levels.iter().find(|l| l.level == 2).unwrap();
        assert_eq!(level2.total_bonus, dec!(5));
        assert_eq!(overview.top_referrers[0].referrer_id, b.id);
        assert_eq!(overview.funnel.payout_rate, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_financial_and_compliance_summaries() {
        let store = memory_store().await;
        let earnings = EarningsService::new(store.clone());
        let payouts = PayoutService::new(store.clone(), dec!(25));
        let reporting = ReportingService::new(store.clone());
        let now = Utc.with_ymd_and_hms(2024, 6, 18, 15, 0, 0).unwrap();

        let big = seed_user(&store, "yara", now).await;
        let small = seed_user(&store, "zed", now).await;
        for (user, amount) in [(&big, dec!(650)), (&small, dec!(40))] {
            store
                .set_payout_method(user.id, PayoutMethod::Venmo { username: user.username.clone() })
                .await
                .unwrap();
            earnings.credit(user.id, EarningSource::Content, amount, now).await.unwrap();
        }
        let sweep = payouts.check_and_process_payouts(now).await.unwrap();
        assert_eq!(sweep.processed, 2);

        let summary = reporting.financial_summary(None, None, now).await.unwrap();
        assert_eq!(summary.total_payouts, dec!(690));
        assert_eq!(summary.total_revenue, Decimal::ZERO);
        assert_eq!(summary.net_income, dec!(-690));
        assert_eq!(summary.payout_ratio, Decimal::ZERO);

        let compliance = reporting.compliance_summary(None, None, now).await.unwrap();
        assert_eq!(compliance.total_users_paid, 2);
        assert_eq!(compliance.total_payments_made, dec!(690));
        assert_eq!(compliance.reportable_users.len(), 1);
        assert_eq!(compliance.reportable_users[0].user_id, big.id);

        let earlier = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let may = reporting
            .compliance_summary(Some(earlier), Some(NaiveDate::from_ymd_opt(2024, 5, 31).unwrap()), now)
            .await
            .unwrap();
        assert_eq!(may.total_users_paid, 0);

        let entries = reporting
            .ledger(&LedgerFilter {
                category: Some(categories::USER_PAYOUT.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
    }
}
