//! In-memory ledger store.
//!
//! All tables live behind one `parking_lot::RwLock`, so every trait method
//! is applied atomically. The lock is never held across an `.await`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use sqlx::types::Json;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::LedgerStore;
use crate::error::{LedgerError, LedgerResult};
use crate::models::*;

#[derive(Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, User>,
    referrals: BTreeMap<i64, ReferralTracking>,
    earnings: BTreeMap<i64, UserEarnings>,
    programs: BTreeMap<i64, AffiliateProgram>,
    links: BTreeMap<i64, UserAffiliateLink>,
    conversions: BTreeMap<i64, AffiliateConversion>,
    content: BTreeMap<i64, ViralContent>,
    payout_requests: BTreeMap<i64, PayoutRequest>,
    payout_transactions: BTreeMap<i64, PayoutTransaction>,
    schedules: BTreeMap<i64, PayoutSchedule>,
    ledger: BTreeMap<i64, LedgerEntry>,
    fraud: BTreeMap<i64, FraudDetection>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn require_user(&self, user_id: i64) -> LedgerResult<()> {
        if self.users.contains_key(&user_id) {
            Ok(())
        } else {
            Err(LedgerError::not_found("User", user_id))
        }
    }

    fn insert_ledger_entry(&mut self, entry: NewLedgerEntry) -> LedgerEntry {
        let id = self.next_id();
        let row = LedgerEntry {
            id,
            entry_type: entry.entry_type,
            account_type: entry.account_type,
            category: entry.category,
            amount: entry.amount,
            description: entry.description,
            user_id: entry.user_id,
            reference_type: entry.reference_type,
            reference_id: entry.reference_id,
            accounting_date: entry.accounting_date,
            fiscal_year: entry.fiscal_year,
            fiscal_quarter: entry.fiscal_quarter,
            created_at: entry.created_at,
        };
        self.ledger.insert(id, row.clone());
        row
    }
}

/// Process-local store used by tests and `storage = "memory"` runs.
#[derive(Default)]
pub struct MemoryLedgerStore {
    tables: RwLock<Tables>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the same affiliate programs as the database migration.
    pub async fn with_default_programs() -> LedgerResult<Self> {
        let store = Self::new();
        for (name, company, rate, commission_type, category, minimum) in [
            ("Tony Robbins Programs", "Tony Robbins", 40, CommissionType::Percentage, "personal_development", 50),
            ("Mindvalley Courses", "Mindvalley", 40, CommissionType::Percentage, "personal_development", 25),
            ("Everlane Fashion", "Everlane", 8, CommissionType::Percentage, "fashion", 25),
            ("Ritual Vitamins", "Ritual", 25, CommissionType::Percentage, "wellness", 25),
            ("Shopify", "Shopify", 200, CommissionType::Fixed, "business", 25),
        ] {
            store
                .insert_program(NewAffiliateProgram {
                    name: name.to_string(),
                    company: company.to_string(),
                    commission_rate: Decimal::from(rate),
                    commission_type,
                    category: category.to_string(),
                    minimum_payout: Decimal::from(minimum),
                })
                .await?;
        }
        Ok(store)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn create_user(&self, user: NewUser) -> LedgerResult<User> {
        let mut t = self.tables.write();
        if t.users.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(LedgerError::Conflict("Email already registered".to_string()));
        }
        if t.users.values().any(|u| u.username == user.username) {
            return Err(LedgerError::Conflict("Username already taken".to_string()));
        }
        if t.users.values().any(|u| u.referral_code == user.referral_code) {
            return Err(LedgerError::Conflict("Referral code collision".to_string()));
        }
        let id = t.next_id();
        let row = User {
            id,
            email: user.email,
            username: user.username,
            referral_code: user.referral_code,
            referred_by_id: user.referred_by_id,
            referral_code_used: user.referral_code_used,
            join_date: user.join_date,
        };
        t.users.insert(id, row.clone());
        Ok(row)
    }

    async fn get_user(&self, user_id: i64) -> LedgerResult<Option<User>> {
        Ok(self.tables.read().users.get(&user_id).cloned())
    }

    async fn find_user_by_referral_code(&self, code: &str) -> LedgerResult<Option<User>> {
        let t = self.tables.read();
        Ok(t.users.values().find(|u| u.referral_code.eq_ignore_ascii_case(code)).cloned())
    }

    async fn count_users(&self) -> LedgerResult<i64> {
        Ok(self.tables.read().users.len() as i64)
    }

    async fn count_users_joined_since(&self, since: DateTime<Utc>) -> LedgerResult<i64> {
        let t = self.tables.read();
        Ok(t.users.values().filter(|u| u.join_date >= since).count() as i64)
    }

    async fn count_users_with_email_domain(&self, domain: &str) -> LedgerResult<i64> {
        let domain = domain.to_lowercase();
        let t = self.tables.read();
        Ok(t.users
            .values()
            .filter(|u| u.email_domain().as_deref() == Some(domain.as_str()))
            .count() as i64)
    }

    async fn insert_referral(&self, referral: NewReferral) -> LedgerResult<ReferralTracking> {
        let mut t = self.tables.write();
        t.require_user(referral.referrer_id)?;
        t.require_user(referral.referred_id)?;
        let duplicate = t.referrals.values().any(|r| {
            r.referrer_id == referral.referrer_id && r.referred_id == referral.referred_id && r.level == 1
        });
        if duplicate {
            return Err(LedgerError::Conflict("Referral already tracked".to_string()));
        }
        let id = t.next_id();
        let row = ReferralTracking {
            id,
            referrer_id: referral.referrer_id,
            referred_id: referral.referred_id,
            referral_code: referral.referral_code,
            level: 1,
            parent_referral_id: referral.parent_referral_id,
            subscription_type: None,
            payment_status: PaymentStatus::Pending,
            status: ReferralStatus::Pending,
            referral_bonus: Decimal::ZERO,
            lifetime_value: Decimal::ZERO,
            referred_at: referral.referred_at,
            converted_at: None,
            refund_period_ends_at: None,
        };
        t.referrals.insert(id, row.clone());
        Ok(row)
    }

    async fn find_upstream_referral(&self, referred_id: i64) -> LedgerResult<Option<ReferralTracking>> {
        let t = self.tables.read();
        Ok(t.referrals
            .values()
            .find(|r| r.referred_id == referred_id && r.level == 1)
            .cloned())
    }

    async fn mark_referral_converted(
        &self,
        referral_id: i64,
        subscription_type: SubscriptionType,
        converted_at: DateTime<Utc>,
    ) -> LedgerResult<Option<ReferralTracking>> {
        let mut t = self.tables.write();
        match t.referrals.get_mut(&referral_id) {
            Some(row) if row.payment_status == PaymentStatus::Pending && row.status == ReferralStatus::Pending => {
                row.payment_status = PaymentStatus::Completed;
                row.status = ReferralStatus::Converted;
                row.subscription_type = Some(subscription_type);
                row.converted_at = Some(converted_at);
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn upsert_referral_bonus(&self, upsert: ReferralBonusUpsert) -> LedgerResult<ReferralTracking> {
        let mut t = self.tables.write();
        let existing = t
            .referrals
            .values()
            .find(|r| {
                r.referrer_id == upsert.referrer_id && r.referred_id == upsert.referred_id && r.level == upsert.level
            })
            .map(|r| r.id);

        let id = match existing {
            Some(id) => id,
            None => {
                let id = t.next_id();
                t.referrals.insert(
                    id,
                    ReferralTracking {
                        id,
                        referrer_id: upsert.referrer_id,
                        referred_id: upsert.referred_id,
                        referral_code: upsert.referral_code.clone(),
                        level: upsert.level,
                        parent_referral_id: upsert.parent_referral_id,
                        subscription_type: None,
                        payment_status: PaymentStatus::Pending,
                        status: ReferralStatus::Pending,
                        referral_bonus: Decimal::ZERO,
                        lifetime_value: Decimal::ZERO,
                        referred_at: upsert.converted_at,
                        converted_at: None,
                        refund_period_ends_at: None,
                    },
                );
                id
            }
        };

        let row = t
            .referrals
            .get_mut(&id)
            .ok_or_else(|| LedgerError::Internal("referral row vanished during upsert".to_string()))?;
        row.referral_bonus += upsert.bonus;
        row.payment_status = PaymentStatus::Completed;
        row.status = ReferralStatus::Converted;
        row.subscription_type = Some(upsert.subscription_type);
        row.converted_at = Some(upsert.converted_at);
        row.refund_period_ends_at = Some(upsert.refund_period_ends_at);
        if row.parent_referral_id.is_none() {
            row.parent_referral_id = upsert.parent_referral_id;
        }
        Ok(row.clone())
    }

    async fn count_completed_referrals(&self, referrer_id: i64) -> LedgerResult<i64> {
        let t = self.tables.read();
        Ok(t.referrals
            .values()
            .filter(|r| r.referrer_id == referrer_id && r.payment_status == PaymentStatus::Completed)
            .count() as i64)
    }

    async fn count_converted_referrals(&self, referrer_id: i64) -> LedgerResult<i64> {
        let t = self.tables.read();
        Ok(t.referrals
            .values()
            .filter(|r| {
                r.referrer_id == referrer_id && r.level == 1 && r.payment_status == PaymentStatus::Completed
            })
            .count() as i64)
    }

    async fn count_referrals_since(&self, referrer_id: i64, since: DateTime<Utc>) -> LedgerResult<i64> {
        let t = self.tables.read();
        Ok(t.referrals
            .values()
            .filter(|r| r.referrer_id == referrer_id && r.level == 1 && r.referred_at >= since)
            .count() as i64)
    }

    async fn referral_exists(&self, referrer_id: i64, referred_id: i64) -> LedgerResult<bool> {
        let t = self.tables.read();
        Ok(t.referrals
            .values()
            .any(|r| r.referrer_id == referrer_id && r.referred_id == referred_id && r.level == 1))
    }

    async fn list_referrals_by_referrer(&self, referrer_id: i64) -> LedgerResult<Vec<ReferralTracking>> {
        let t = self.tables.read();
        Ok(t.referrals.values().filter(|r| r.referrer_id == referrer_id).cloned().collect())
    }

    async fn unpaid_completed_referrals(&self, user_id: i64) -> LedgerResult<Vec<ReferralTracking>> {
        let t = self.tables.read();
        Ok(t.referrals
            .values()
            .filter(|r| {
                r.referrer_id == user_id
                    && r.payment_status == PaymentStatus::Completed
                    && r.status != ReferralStatus::BonusPaid
            })
            .cloned()
            .collect())
    }

    async fn get_earnings(&self, user_id: i64) -> LedgerResult<Option<UserEarnings>> {
        Ok(self.tables.read().earnings.get(&user_id).cloned())
    }

    async fn credit_earnings(
        &self,
        user_id: i64,
        source: EarningSource,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> LedgerResult<UserEarnings> {
        let mut t = self.tables.write();
        t.require_user(user_id)?;
        let earnings = t
            .earnings
            .entry(user_id)
            .or_insert_with(|| UserEarnings::empty(user_id, at));
        earnings.apply_credit(source, amount, at);
        Ok(earnings.clone())
    }

    async fn set_payout_method(&self, user_id: i64, method: PayoutMethod) -> LedgerResult<()> {
        let mut t = self.tables.write();
        t.require_user(user_id)?;
        let now = Utc::now();
        let earnings = t
            .earnings
            .entry(user_id)
            .or_insert_with(|| UserEarnings::empty(user_id, now));
        earnings.payout_method = Some(Json(method));
        Ok(())
    }

    async fn list_earnings_with_pending_at_least(&self, threshold: Decimal) -> LedgerResult<Vec<UserEarnings>> {
        let t = self.tables.read();
        Ok(t.earnings
            .values()
            .filter(|e| e.pending_payout >= threshold)
            .cloned()
            .collect())
    }

    async fn insert_program(&self, program: NewAffiliateProgram) -> LedgerResult<AffiliateProgram> {
        let mut t = self.tables.write();
        let id = t.next_id();
        let row = AffiliateProgram {
            id,
            name: program.name,
            company: program.company,
            commission_rate: program.commission_rate,
            commission_type: program.commission_type,
            category: program.category,
            minimum_payout: program.minimum_payout,
            is_active: true,
        };
        t.programs.insert(id, row.clone());
        Ok(row)
    }

    async fn list_programs(&self, active_only: bool) -> LedgerResult<Vec<AffiliateProgram>> {
        let t = self.tables.read();
        Ok(t.programs
            .values()
            .filter(|p| !active_only || p.is_active)
            .cloned()
            .collect())
    }

    async fn get_program(&self, program_id: i64) -> LedgerResult<Option<AffiliateProgram>> {
        Ok(self.tables.read().programs.get(&program_id).cloned())
    }

    async fn find_link(&self, user_id: i64, program_id: i64) -> LedgerResult<Option<UserAffiliateLink>> {
        let t = self.tables.read();
        Ok(t.links
            .values()
            .find(|l| l.user_id == user_id && l.program_id == program_id)
            .cloned())
    }

    async fn insert_link(
        &self,
        user_id: i64,
        program_id: i64,
        unique_code: &str,
        at: DateTime<Utc>,
    ) -> LedgerResult<UserAffiliateLink> {
        let mut t = self.tables.write();
        t.require_user(user_id)?;
        if !t.programs.contains_key(&program_id) {
            return Err(LedgerError::not_found("Affiliate program", program_id));
        }
        if t.links.values().any(|l| {
            l.unique_code == unique_code || (l.user_id == user_id && l.program_id == program_id)
        }) {
            return Err(LedgerError::Conflict("Affiliate link already exists".to_string()));
        }
        let id = t.next_id();
        let row = UserAffiliateLink {
            id,
            user_id,
            program_id,
            unique_code: unique_code.to_string(),
            total_clicks: 0,
            total_conversions: 0,
            total_earnings: Decimal::ZERO,
            created_at: at,
        };
        t.links.insert(id, row.clone());
        Ok(row)
    }

    async fn find_link_by_code(&self, code: &str) -> LedgerResult<Option<UserAffiliateLink>> {
        let t = self.tables.read();
        Ok(t.links.values().find(|l| l.unique_code == code).cloned())
    }

    async fn list_links(&self, user_id: i64) -> LedgerResult<Vec<UserAffiliateLink>> {
        let t = self.tables.read();
        Ok(t.links.values().filter(|l| l.user_id == user_id).cloned().collect())
    }

    async fn record_link_click(&self, link_id: i64) -> LedgerResult<UserAffiliateLink> {
        let mut t = self.tables.write();
        let link = t
            .links
            .get_mut(&link_id)
            .ok_or_else(|| LedgerError::not_found("Affiliate link", link_id))?;
        link.total_clicks += 1;
        Ok(link.clone())
    }

    async fn insert_conversion(&self, conversion: NewAffiliateConversion) -> LedgerResult<AffiliateConversion> {
        let mut t = self.tables.write();
        let link = t
            .links
            .get_mut(&conversion.user_link_id)
            .ok_or_else(|| LedgerError::not_found("Affiliate link", conversion.user_link_id))?;
        link.total_conversions += 1;
        link.total_earnings += conversion.commission_earned;

        let id = t.next_id();
        let row = AffiliateConversion {
            id,
            user_link_id: conversion.user_link_id,
            user_id: conversion.user_id,
            program_id: conversion.program_id,
            conversion_value: conversion.conversion_value,
            commission_earned: conversion.commission_earned,
            external_transaction_id: conversion.external_transaction_id,
            status: ConversionStatus::Pending,
            converted_at: conversion.converted_at,
            approved_at: None,
        };
        t.conversions.insert(id, row.clone());
        Ok(row)
    }

    async fn get_conversion(&self, conversion_id: i64) -> LedgerResult<Option<AffiliateConversion>> {
        Ok(self.tables.read().conversions.get(&conversion_id).cloned())
    }

    async fn resolve_conversion(
        &self,
        conversion_id: i64,
        status: ConversionStatus,
        at: DateTime<Utc>,
    ) -> LedgerResult<Option<AffiliateConversion>> {
        let mut t = self.tables.write();
        let resolved = match t.conversions.get_mut(&conversion_id) {
            Some(c) if c.status == ConversionStatus::Pending => {
                c.status = status;
                if status == ConversionStatus::Approved {
                    c.approved_at = Some(at);
                }
                c.clone()
            }
            _ => return Ok(None),
        };
        if status == ConversionStatus::Rejected {
            if let Some(link) = t.links.get_mut(&resolved.user_link_id) {
                link.total_earnings -= resolved.commission_earned;
            }
        }
        Ok(Some(resolved))
    }

    async fn count_pending_conversions(&self, user_id: i64) -> LedgerResult<i64> {
        let t = self.tables.read();
        Ok(t.conversions
            .values()
            .filter(|c| c.user_id == user_id && c.status == ConversionStatus::Pending)
            .count() as i64)
    }

    async fn recent_conversions(&self, user_id: i64, limit: i64) -> LedgerResult<Vec<AffiliateConversion>> {
        let t = self.tables.read();
        let mut rows: Vec<_> = t.conversions.values().filter(|c| c.user_id == user_id).cloned().collect();
        rows.sort_by(|a, b| b.converted_at.cmp(&a.converted_at).then(b.id.cmp(&a.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn insert_content(&self, content: NewViralContent) -> LedgerResult<ViralContent> {
        let mut t = self.tables.write();
        t.require_user(content.user_id)?;
        let id = t.next_id();
        let row = ViralContent {
            id,
            user_id: content.user_id,
            content_type: content.content_type,
            platform_url: content.platform_url,
            views: 0,
            shares: 0,
            click_throughs: 0,
            base_reward: Decimal::ZERO,
            performance_bonus: Decimal::ZERO,
            total_earned: Decimal::ZERO,
            status: ContentStatus::Pending,
            submitted_at: content.submitted_at,
            reviewed_at: None,
        };
        t.content.insert(id, row.clone());
        Ok(row)
    }

    async fn get_content(&self, content_id: i64) -> LedgerResult<Option<ViralContent>> {
        Ok(self.tables.read().content.get(&content_id).cloned())
    }

    async fn approve_content(&self, content_id: i64, reward: ContentReward) -> LedgerResult<Option<ViralContent>> {
        let mut t = self.tables.write();
        match t.content.get_mut(&content_id) {
            Some(c) if c.status == ContentStatus::Pending => {
                c.views = reward.metrics.views;
                c.shares = reward.metrics.shares;
                c.click_throughs = reward.metrics.click_throughs;
                c.base_reward = reward.base_reward;
                c.performance_bonus = reward.performance_bonus;
                c.total_earned = reward.total;
                c.status = ContentStatus::Approved;
                c.reviewed_at = Some(reward.reviewed_at);
                Ok(Some(c.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn count_content(&self, user_id: i64, status: Option<ContentStatus>) -> LedgerResult<i64> {
        let t = self.tables.read();
        Ok(t.content
            .values()
            .filter(|c| c.user_id == user_id && status.map_or(true, |s| c.status == s))
            .count() as i64)
    }

    async fn reserve_payout(&self, request: NewPayoutRequest) -> LedgerResult<PayoutRequest> {
        let mut t = self.tables.write();
        let earnings = t
            .earnings
            .get_mut(&request.user_id)
            .ok_or_else(|| LedgerError::not_found("Earnings", request.user_id))?;
        if earnings.pending_payout < request.amount {
            return Err(LedgerError::InsufficientBalance {
                requested: request.amount,
                available: earnings.pending_payout,
            });
        }
        earnings.pending_payout -= request.amount;
        earnings.updated_at = request.requested_at;

        let id = t.next_id();
        let row = PayoutRequest {
            id,
            user_id: request.user_id,
            amount: request.amount,
            payout_method: Some(Json(request.payout_method)),
            status: request.status,
            transaction_id: Uuid::new_v4(),
            requested_at: request.requested_at,
            processed_at: request.processed_at,
            notes: request.notes,
        };
        t.payout_requests.insert(id, row.clone());
        Ok(row)
    }

    async fn settle_payout(&self, settlement: SettlePayout) -> LedgerResult<SettledPayout> {
        let mut t = self.tables.write();
        let unpaid: Vec<i64> = t
            .referrals
            .values()
            .filter(|r| {
                r.referrer_id == settlement.user_id
                    && r.payment_status == PaymentStatus::Completed
                    && r.status != ReferralStatus::BonusPaid
            })
            .map(|r| r.id)
            .collect();
        if let Some(held) = unpaid
            .iter()
            .filter_map(|id| t.referrals.get(id))
            .find(|r| r.is_on_hold(settlement.settled_at))
        {
            return Err(LedgerError::Conflict(format!(
                "Referral {} is inside its refund window",
                held.id
            )));
        }

        let earnings = t
            .earnings
            .get_mut(&settlement.user_id)
            .ok_or_else(|| LedgerError::not_found("Earnings", settlement.user_id))?;
        if earnings.pending_payout != settlement.amount {
            return Err(LedgerError::Conflict(format!(
                "Pending balance for user {} changed during settlement",
                settlement.user_id
            )));
        }
        earnings.pending_payout -= settlement.amount;
        earnings.total_paid += settlement.amount;
        earnings.last_payout_date = Some(settlement.settled_at);
        earnings.updated_at = settlement.settled_at;

        for referral_id in &unpaid {
            if let Some(referral) = t.referrals.get_mut(referral_id) {
                referral.status = ReferralStatus::BonusPaid;
            }
        }

        let request_id = t.next_id();
        let request = PayoutRequest {
            id: request_id,
            user_id: settlement.user_id,
            amount: settlement.amount,
            payout_method: settlement.payout_method.clone().map(Json),
            status: PayoutStatus::Processing,
            transaction_id: Uuid::new_v4(),
            requested_at: settlement.settled_at,
            processed_at: Some(settlement.settled_at),
            notes: None,
        };
        t.payout_requests.insert(request_id, request.clone());

        let transaction = match settlement.transaction {
            Some(tx) => {
                let id = t.next_id();
                let row = PayoutTransaction {
                    id,
                    payout_id: tx.payout_id,
                    user_id: settlement.user_id,
                    schedule_id: tx.schedule_id,
                    amount: settlement.amount,
                    processor: tx.processor,
                    processor_fee: tx.processor_fee,
                    final_amount: tx.final_amount,
                    payout_method: Json(tx.payout_method),
                    status: PayoutStatus::Processing,
                    created_at: settlement.settled_at,
                };
                t.payout_transactions.insert(id, row.clone());
                Some(row)
            }
            None => None,
        };

        let mut entry = settlement.ledger_entry;
        if entry.reference_id.is_none() {
            entry = entry.referencing("payout_request", request_id);
        }
        t.insert_ledger_entry(entry);

        if let Some(advance) = settlement.schedule {
            if let Some(schedule) = t.schedules.get_mut(&advance.schedule_id) {
                schedule.last_execution = Some(settlement.settled_at);
                schedule.next_execution = advance.next_execution;
                schedule.total_payouts_made += 1;
                schedule.total_amount_paid += settlement.amount;
            }
        }

        Ok(SettledPayout { request, transaction })
    }

    async fn get_payout_request(&self, request_id: i64) -> LedgerResult<Option<PayoutRequest>> {
        Ok(self.tables.read().payout_requests.get(&request_id).cloned())
    }

    async fn approve_payout_request(
        &self,
        request_id: i64,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> LedgerResult<Option<PayoutRequest>> {
        let mut t = self.tables.write();
        match t.payout_requests.get_mut(&request_id) {
            Some(r) if r.status == PayoutStatus::Pending => {
                r.status = PayoutStatus::Approved;
                r.processed_at = Some(at);
                if notes.is_some() {
                    r.notes = notes;
                }
                Ok(Some(r.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_payout_requests(&self, status: Option<PayoutStatus>, limit: i64) -> LedgerResult<Vec<PayoutRequest>> {
        let t = self.tables.read();
        let mut rows: Vec<_> = t
            .payout_requests
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.requested_at.cmp(&a.requested_at).then(b.id.cmp(&a.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn payout_status_totals(&self) -> LedgerResult<Vec<PayoutStatusTotal>> {
        let t = self.tables.read();
        let mut totals: Vec<PayoutStatusTotal> = Vec::new();
        for request in t.payout_requests.values() {
            match totals.iter_mut().find(|s| s.status == request.status) {
                Some(total) => {
                    total.count += 1;
                    total.total_amount += request.amount;
                }
                None => totals.push(PayoutStatusTotal {
                    status: request.status,
                    count: 1,
                    total_amount: request.amount,
                }),
            }
        }
        Ok(totals)
    }

    async fn replace_schedule(&self, schedule: NewPayoutSchedule) -> LedgerResult<PayoutSchedule> {
        let mut t = self.tables.write();
        t.require_user(schedule.user_id)?;
        for existing in t.schedules.values_mut() {
            if existing.user_id == schedule.user_id {
                existing.is_active = false;
            }
        }
        let id = t.next_id();
        let row = PayoutSchedule {
            id,
            user_id: schedule.user_id,
            frequency: schedule.frequency,
            day_of_week: schedule.day_of_week,
            day_of_month: schedule.day_of_month,
            minimum_amount: schedule.minimum_amount,
            payout_method: Json(schedule.payout_method),
            is_active: true,
            last_execution: None,
            next_execution: schedule.next_execution,
            total_payouts_made: 0,
            total_amount_paid: Decimal::ZERO,
            created_at: schedule.created_at,
        };
        t.schedules.insert(id, row.clone());
        Ok(row)
    }

    async fn get_active_schedule(&self, user_id: i64) -> LedgerResult<Option<PayoutSchedule>> {
        let t = self.tables.read();
        Ok(t.schedules
            .values()
            .find(|s| s.user_id == user_id && s.is_active)
            .cloned())
    }

    async fn due_schedules(&self, now: DateTime<Utc>) -> LedgerResult<Vec<PayoutSchedule>> {
        let t = self.tables.read();
        let mut rows: Vec<_> = t
            .schedules
            .values()
            .filter(|s| s.is_active && s.next_execution <= now)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.next_execution);
        Ok(rows)
    }

    async fn reschedule(&self, schedule_id: i64, next_execution: DateTime<Utc>) -> LedgerResult<()> {
        let mut t = self.tables.write();
        let schedule = t
            .schedules
            .get_mut(&schedule_id)
            .ok_or_else(|| LedgerError::not_found("Payout schedule", schedule_id))?;
        schedule.next_execution = next_execution;
        Ok(())
    }

    async fn insert_ledger_entry(&self, entry: NewLedgerEntry) -> LedgerResult<LedgerEntry> {
        Ok(self.tables.write().insert_ledger_entry(entry))
    }

    async fn list_ledger_entries(&self, filter: &LedgerFilter) -> LedgerResult<Vec<LedgerEntry>> {
        let t = self.tables.read();
        Ok(t.ledger
            .values()
            .rev()
            .filter(|e| filter.matches(e))
            .take(filter.effective_limit() as usize)
            .cloned()
            .collect())
    }

    async fn ledger_totals(&self, from: NaiveDate, to: NaiveDate) -> LedgerResult<LedgerTotals> {
        let t = self.tables.read();
        let mut totals = LedgerTotals::default();
        for entry in t.ledger.values().filter(|e| e.accounting_date >= from && e.accounting_date <= to) {
            match entry.account_type {
                AccountType::Revenue => totals.revenue += entry.amount,
                AccountType::Expense => totals.expenses += entry.amount,
                _ => {}
            }
            if entry.category == categories::USER_PAYOUT {
                totals.payouts += entry.amount;
            }
        }
        Ok(totals)
    }

    async fn payouts_by_user(&self, from: NaiveDate, to: NaiveDate) -> LedgerResult<Vec<UserPayoutTotal>> {
        let t = self.tables.read();
        let mut per_user: HashMap<i64, (Decimal, i64)> = HashMap::new();
        for entry in t.ledger.values().filter(|e| {
            e.category == categories::USER_PAYOUT && e.accounting_date >= from && e.accounting_date <= to
        }) {
            if let Some(user_id) = entry.user_id {
                let slot = per_user.entry(user_id).or_insert((Decimal::ZERO, 0));
                slot.0 += entry.amount;
                slot.1 += 1;
            }
        }
        let mut rows: Vec<UserPayoutTotal> = per_user
            .into_iter()
            .filter_map(|(user_id, (total_paid, payout_count))| {
                t.users.get(&user_id).map(|u| UserPayoutTotal {
                    user_id,
                    username: u.username.clone(),
                    email: u.email.clone(),
                    total_paid,
                    payout_count,
                })
            })
            .collect();
        rows.sort_by(|a, b| b.total_paid.cmp(&a.total_paid).then(a.user_id.cmp(&b.user_id)));
        Ok(rows)
    }

    async fn insert_fraud_detection(&self, detection: NewFraudDetection) -> LedgerResult<FraudDetection> {
        let mut t = self.tables.write();
        let id = t.next_id();
        let row = FraudDetection {
            id,
            user_id: detection.user_id,
            fraud_type: detection.fraud_type,
            risk_score: detection.risk_score,
            suspicious_patterns: Json(detection.suspicious_patterns),
            status: FraudStatus::Pending,
            detected_at: detection.detected_at,
        };
        t.fraud.insert(id, row.clone());
        Ok(row)
    }

    async fn count_fraud_detections(&self, user_id: i64, status: FraudStatus) -> LedgerResult<i64> {
        let t = self.tables.read();
        Ok(t.fraud
            .values()
            .filter(|f| f.user_id == user_id && f.status == status)
            .count() as i64)
    }

    async fn fraud_status_counts(&self) -> LedgerResult<Vec<FraudStatusCount>> {
        let t = self.tables.read();
        let mut counts: Vec<FraudStatusCount> = Vec::new();
        for detection in t.fraud.values() {
            match counts.iter_mut().find(|c| c.status == detection.status) {
                Some(c) => c.count += 1,
                None => counts.push(FraudStatusCount { status: detection.status, count: 1 }),
            }
        }
        Ok(counts)
    }

    async fn fraud_type_stats(&self) -> LedgerResult<Vec<FraudTypeStat>> {
        let t = self.tables.read();
        let mut stats: Vec<(FraudType, i64, f64)> = Vec::new();
        for detection in t.fraud.values() {
            match stats.iter_mut().find(|s| s.0 == detection.fraud_type) {
                Some(s) => {
                    s.1 += 1;
                    s.2 += detection.risk_score;
                }
                None => stats.push((detection.fraud_type, 1, detection.risk_score)),
            }
        }
        Ok(stats
            .into_iter()
            .map(|(fraud_type, count, sum)| FraudTypeStat {
                fraud_type,
                count,
                average_risk: sum / count as f64,
            })
            .collect())
    }

    async fn recent_fraud_detections(&self, limit: i64) -> LedgerResult<Vec<FraudDetection>> {
        let t = self.tables.read();
        let mut rows: Vec<_> = t.fraud.values().cloned().collect();
        rows.sort_by(|a, b| b.detected_at.cmp(&a.detected_at).then(b.id.cmp(&a.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn referral_level_breakdown(&self) -> LedgerResult<Vec<LevelBreakdown>> {
        let t = self.tables.read();
        let mut levels: BTreeMap<i32, (i64, Decimal)> = BTreeMap::new();
        for referral in t.referrals.values() {
            let slot = levels.entry(referral.level).or_insert((0, Decimal::ZERO));
            slot.0 += 1;
            slot.1 += referral.referral_bonus;
        }
        Ok(levels
            .into_iter()
            .map(|(level, (count, total_bonus))| LevelBreakdown {
                level,
                count,
                total_bonus,
                average_bonus: (total_bonus / Decimal::from(count)).round_dp(2),
            })
            .collect())
    }

    async fn top_referrers(&self, limit: i64) -> LedgerResult<Vec<TopReferrer>> {
        let t = self.tables.read();
        let mut per_referrer: HashMap<i64, (i64, Decimal)> = HashMap::new();
        for referral in t.referrals.values() {
            let slot = per_referrer.entry(referral.referrer_id).or_insert((0, Decimal::ZERO));
            slot.0 += 1;
            slot.1 += referral.referral_bonus;
        }
        let mut rows: Vec<TopReferrer> = per_referrer
            .into_iter()
            .filter_map(|(referrer_id, (referral_count, total_bonus))| {
                t.users.get(&referrer_id).map(|u| TopReferrer {
                    referrer_id,
                    username: u.username.clone(),
                    referral_count,
                    total_bonus,
                })
            })
            .collect();
        rows.sort_by(|a, b| b.total_bonus.cmp(&a.total_bonus).then(a.referrer_id.cmp(&b.referrer_id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn referral_counts(&self) -> LedgerResult<ReferralCounts> {
        let t = self.tables.read();
        let mut counts = ReferralCounts::default();
        for referral in t.referrals.values().filter(|r| r.level == 1) {
            counts.total += 1;
            if referral.payment_status == PaymentStatus::Completed {
                counts.converted += 1;
            }
            if referral.status == ReferralStatus::BonusPaid {
                counts.paid += 1;
            }
        }
        Ok(counts)
    }

    async fn earnings_totals(&self) -> LedgerResult<EarningsTotals> {
        let t = self.tables.read();
        let mut totals = EarningsTotals::default();
        for earnings in t.earnings.values() {
            totals.total_earnings += earnings.total_earnings;
            totals.pending_payout += earnings.pending_payout;
            totals.total_paid += earnings.total_paid;
        }
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn create_test_user(store: &MemoryLedgerStore, name: &str) -> User {
        store
            .create_user(NewUser {
                email: format!("{}@bloom.example", name),
                username: name.to_string(),
                referral_code: format!("IB{:0>8}", name.to_uppercase()),
                referred_by_id: None,
                referral_code_used: None,
                join_date: Utc::now(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_level_one_referral_is_conflict() {
        let store = MemoryLedgerStore::new();
        let a = create_test_user(&store, "ada").await;
        let b = create_test_user(&store, "bea").await;
        let referral = NewReferral {
            referrer_id: a.id,
            referred_id: b.id,
            referral_code: a.referral_code.clone(),
            parent_referral_id: None,
            referred_at: Utc::now(),
        };

        store.insert_referral(referral.clone()).await.unwrap();
        let err = store.insert_referral(referral).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_settlement_refuses_stale_amount() {
        let store = MemoryLedgerStore::new();
        let user = create_test_user(&store, "cleo").await;
        let now = Utc::now();
        store
            .credit_earnings(user.id, EarningSource::Referral, dec!(30), now)
            .await
            .unwrap();

        let err = store
            .settle_payout(SettlePayout {
                user_id: user.id,
                amount: dec!(25),
                payout_method: Some(PayoutMethod::Venmo { username: "cleo".to_string() }),
                settled_at: now,
                ledger_entry: NewLedgerEntry::user_payout(user.id, dec!(25), now),
                transaction: None,
                schedule: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Conflict(_)));
        let earnings = store.get_earnings(user.id).await.unwrap().unwrap();
        assert_eq!(earnings.pending_payout, dec!(30));
        assert_eq!(earnings.total_paid, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_settlement_rereads_referral_holds() {
        let store = MemoryLedgerStore::new();
        let sponsor = create_test_user(&store, "edie").await;
        let friend = create_test_user(&store, "fern").await;
        let now = Utc::now();
        store
            .credit_earnings(sponsor.id, EarningSource::Content, dec!(40), now)
            .await
            .unwrap();

        // Bonus row reopened with a fresh hold before its credit lands
        let row = store
            .upsert_referral_bonus(ReferralBonusUpsert {
                referrer_id: sponsor.id,
                referred_id: friend.id,
                level: 1,
                referral_code: sponsor.referral_code.clone(),
                parent_referral_id: None,
                subscription_type: SubscriptionType::Premium,
                bonus: dec!(10),
                converted_at: now,
                refund_period_ends_at: now + chrono::Duration::days(7),
            })
            .await
            .unwrap();

        let settlement = SettlePayout {
            user_id: sponsor.id,
            amount: dec!(40),
            payout_method: None,
            settled_at: now,
            ledger_entry: NewLedgerEntry::user_payout(sponsor.id, dec!(40), now),
            transaction: None,
            schedule: None,
        };
        let err = store.settle_payout(settlement.clone()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
        let earnings = store.get_earnings(sponsor.id).await.unwrap().unwrap();
        assert_eq!(earnings.pending_payout, dec!(40));

        let later = now + chrono::Duration::days(8);
        let settled = store
            .settle_payout(SettlePayout {
                settled_at: later,
                ..settlement
            })
            .await
            .unwrap();
        assert!(settled.request.payout_method.is_none());

        let rows = store.list_referrals_by_referrer(sponsor.id).await.unwrap();
        let paid = rows.iter().find(|r| r.id == row.id).unwrap();
        assert_eq!(paid.status, ReferralStatus::BonusPaid);
    }

    #[tokio::test]
    async fn test_reserve_payout_checks_balance() {
        let store = MemoryLedgerStore::new();
        let user = create_test_user(&store, "dora").await;
        let now = Utc::now();
        store
            .credit_earnings(user.id, EarningSource::Content, dec!(40), now)
            .await
            .unwrap();

        let request = |amount| NewPayoutRequest {
            user_id: user.id,
            amount,
            payout_method: PayoutMethod::Paypal { email: "dora@bloom.example".to_string() },
            status: PayoutStatus::Pending,
            requested_at: now,
            processed_at: None,
            notes: None,
        };

        let err = store.reserve_payout(request(dec!(41))).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

        store.reserve_payout(request(dec!(30))).await.unwrap();
        let earnings = store.get_earnings(user.id).await.unwrap().unwrap();
        assert_eq!(earnings.pending_payout, dec!(10));
        assert_eq!(earnings.total_earnings, dec!(40));
    }
}
