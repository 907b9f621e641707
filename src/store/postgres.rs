//! PostgreSQL ledger store.
//!
//! Credits and bonus accumulation are single `INSERT ... ON CONFLICT DO
//! UPDATE SET x = x + $n` statements. Payout reservation and settlement lock
//! the user's earnings row with `SELECT ... FOR UPDATE` inside a transaction.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::LedgerStore;
use crate::error::{LedgerError, LedgerResult};
use crate::metrics::{self, Timer};
use crate::models::*;

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Unique violations become conflicts and foreign-key violations become
/// not-found errors; everything else stays a database error.
fn map_write_error(err: sqlx::Error, conflict: &str, missing: &'static str) -> LedgerError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return LedgerError::Conflict(conflict.to_string());
        }
        if db_err.is_foreign_key_violation() {
            return LedgerError::not_found(missing, "referenced id");
        }
    }
    LedgerError::Database(err)
}

async fn insert_ledger_entry_in(
    tx: &mut Transaction<'_, Postgres>,
    entry: &NewLedgerEntry,
) -> Result<LedgerEntry, sqlx::Error> {
    sqlx::query_as::<_, LedgerEntry>(
        r#"
        INSERT INTO ledger_entries (
            entry_type, account_type, category, amount, description, user_id,
            reference_type, reference_id, accounting_date, fiscal_year, fiscal_quarter, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *
        "#,
    )
    .bind(entry.entry_type)
    .bind(entry.account_type)
    .bind(&entry.category)
    .bind(entry.amount)
    .bind(&entry.description)
    .bind(entry.user_id)
    .bind(&entry.reference_type)
    .bind(&entry.reference_id)
    .bind(entry.accounting_date)
    .bind(entry.fiscal_year)
    .bind(entry.fiscal_quarter)
    .bind(entry.created_at)
    .fetch_one(&mut **tx)
    .await
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn create_user(&self, user: NewUser) -> LedgerResult<User> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, username, referral_code, referred_by_id, referral_code_used, join_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.referral_code)
        .bind(user.referred_by_id)
        .bind(&user.referral_code_used)
        .bind(user.join_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "Email or username already registered", "User"))
    }

    async fn get_user(&self, user_id: i64) -> LedgerResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_referral_code(&self, code: &str) -> LedgerResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE referral_code = upper($1)")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn count_users(&self) -> LedgerResult<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?)
    }

    async fn count_users_joined_since(&self, since: DateTime<Utc>) -> LedgerResult<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE join_date >= $1")
            .bind(since)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn count_users_with_email_domain(&self, domain: &str) -> LedgerResult<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE lower(split_part(email, '@', 2)) = lower($1)",
        )
        .bind(domain)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn insert_referral(&self, referral: NewReferral) -> LedgerResult<ReferralTracking> {
        sqlx::query_as::<_, ReferralTracking>(
            r#"
            INSERT INTO referral_tracking (referrer_id, referred_id, referral_code, level, parent_referral_id, referred_at)
            VALUES ($1, $2, $3, 1, $4, $5)
            RETURNING *
            "#,
        )
        .bind(referral.referrer_id)
        .bind(referral.referred_id)
        .bind(&referral.referral_code)
        .bind(referral.parent_referral_id)
        .bind(referral.referred_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "Referral already tracked", "User"))
    }

    async fn find_upstream_referral(&self, referred_id: i64) -> LedgerResult<Option<ReferralTracking>> {
        Ok(sqlx::query_as::<_, ReferralTracking>(
            "SELECT * FROM referral_tracking WHERE referred_id = $1 AND level = 1 ORDER BY id LIMIT 1",
        )
        .bind(referred_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn mark_referral_converted(
        &self,
        referral_id: i64,
        subscription_type: SubscriptionType,
        converted_at: DateTime<Utc>,
    ) -> LedgerResult<Option<ReferralTracking>> {
        Ok(sqlx::query_as::<_, ReferralTracking>(
            r#"
            UPDATE referral_tracking
            SET payment_status = 'completed',
                status = 'converted',
                subscription_type = $2,
                converted_at = $3
            WHERE id = $1 AND payment_status = 'pending' AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(referral_id)
        .bind(subscription_type)
        .bind(converted_at)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn upsert_referral_bonus(&self, upsert: ReferralBonusUpsert) -> LedgerResult<ReferralTracking> {
        sqlx::query_as::<_, ReferralTracking>(
            r#"
            INSERT INTO referral_tracking (
                referrer_id, referred_id, referral_code, level, parent_referral_id, subscription_type,
                payment_status, status, referral_bonus, referred_at, converted_at, refund_period_ends_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'completed', 'converted', $7, $8, $8, $9)
            ON CONFLICT (referrer_id, referred_id, level) DO UPDATE SET
                referral_bonus = referral_tracking.referral_bonus + EXCLUDED.referral_bonus,
                payment_status = 'completed',
                status = 'converted',
                subscription_type = EXCLUDED.subscription_type,
                converted_at = EXCLUDED.converted_at,
                refund_period_ends_at = EXCLUDED.refund_period_ends_at,
                parent_referral_id = COALESCE(referral_tracking.parent_referral_id, EXCLUDED.parent_referral_id)
            RETURNING *
            "#,
        )
        .bind(upsert.referrer_id)
        .bind(upsert.referred_id)
        .bind(&upsert.referral_code)
        .bind(upsert.level)
        .bind(upsert.parent_referral_id)
        .bind(upsert.subscription_type)
        .bind(upsert.bonus)
        .bind(upsert.converted_at)
        .bind(upsert.refund_period_ends_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "Referral upsert conflict", "User"))
    }

    async fn count_completed_referrals(&self, referrer_id: i64) -> LedgerResult<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM referral_tracking WHERE referrer_id = $1 AND payment_status = 'completed'",
        )
        .bind(referrer_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn count_converted_referrals(&self, referrer_id: i64) -> LedgerResult<i64> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM referral_tracking
            WHERE referrer_id = $1 AND level = 1 AND payment_status = 'completed'
            "#,
        )
        .bind(referrer_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn count_referrals_since(&self, referrer_id: i64, since: DateTime<Utc>) -> LedgerResult<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM referral_tracking WHERE referrer_id = $1 AND level = 1 AND referred_at >= $2",
        )
        .bind(referrer_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn referral_exists(&self, referrer_id: i64, referred_id: i64) -> LedgerResult<bool> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM referral_tracking
                WHERE referrer_id = $1 AND referred_id = $2 AND level = 1
            )
            "#,
        )
        .bind(referrer_id)
        .bind(referred_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn list_referrals_by_referrer(&self, referrer_id: i64) -> LedgerResult<Vec<ReferralTracking>> {
        Ok(sqlx::query_as::<_, ReferralTracking>(
            "SELECT * FROM referral_tracking WHERE referrer_id = $1 ORDER BY id",
        )
        .bind(referrer_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn unpaid_completed_referrals(&self, user_id: i64) -> LedgerResult<Vec<ReferralTracking>> {
        Ok(sqlx::query_as::<_, ReferralTracking>(
            r#"
            SELECT * FROM referral_tracking
            WHERE referrer_id = $1 AND payment_status = 'completed' AND status <> 'bonus_paid'
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn get_earnings(&self, user_id: i64) -> LedgerResult<Option<UserEarnings>> {
        Ok(sqlx::query_as::<_, UserEarnings>("SELECT * FROM user_earnings WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn credit_earnings(
        &self,
        user_id: i64,
        source: EarningSource,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> LedgerResult<UserEarnings> {
        let timer = Timer::new();
        let delta = |s: EarningSource| if s == source { amount } else { Decimal::ZERO };

        let earnings = sqlx::query_as::<_, UserEarnings>(
            r#"
            INSERT INTO user_earnings (
                user_id, referral_earnings, affiliate_earnings, content_earnings, community_earnings,
                total_earnings, pending_payout, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $6, $7)
            ON CONFLICT (user_id) DO UPDATE SET
                referral_earnings = user_earnings.referral_earnings + EXCLUDED.referral_earnings,
                affiliate_earnings = user_earnings.affiliate_earnings + EXCLUDED.affiliate_earnings,
                content_earnings = user_earnings.content_earnings + EXCLUDED.content_earnings,
                community_earnings = user_earnings.community_earnings + EXCLUDED.community_earnings,
                total_earnings = user_earnings.total_earnings + EXCLUDED.total_earnings,
                pending_payout = user_earnings.pending_payout + EXCLUDED.pending_payout,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(delta(EarningSource::Referral))
        .bind(delta(EarningSource::Affiliate))
        .bind(delta(EarningSource::Content))
        .bind(delta(EarningSource::Community))
        .bind(amount)
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "Earnings credit conflict", "User"))?;

        metrics::record_db_query("credit_earnings", timer.elapsed_secs());
        Ok(earnings)
    }

    async fn set_payout_method(&self, user_id: i64, method: PayoutMethod) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_earnings (user_id, payout_method)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET payout_method = EXCLUDED.payout_method, updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(Json(&method))
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "Payout method conflict", "User"))?;
        Ok(())
    }

    async fn list_earnings_with_pending_at_least(&self, threshold: Decimal) -> LedgerResult<Vec<UserEarnings>> {
        Ok(sqlx::query_as::<_, UserEarnings>(
            "SELECT * FROM user_earnings WHERE pending_payout >= $1 ORDER BY user_id",
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_program(&self, program: NewAffiliateProgram) -> LedgerResult<AffiliateProgram> {
        Ok(sqlx::query_as::<_, AffiliateProgram>(
            r#"
            INSERT INTO affiliate_programs (name, company, commission_rate, commission_type, category, minimum_payout)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, name, company, commission_rate, commission_type, category, minimum_payout, is_active
            "#,
        )
        .bind(&program.name)
        .bind(&program.company)
        .bind(program.commission_rate)
        .bind(program.commission_type)
        .bind(&program.category)
        .bind(program.minimum_payout)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn list_programs(&self, active_only: bool) -> LedgerResult<Vec<AffiliateProgram>> {
        Ok(sqlx::query_as::<_, AffiliateProgram>(
            r#"
            SELECT id, name, company, commission_rate, commission_type, category, minimum_payout, is_active
            FROM affiliate_programs
            WHERE is_active OR NOT $1
            ORDER BY id
            "#,
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn get_program(&self, program_id: i64) -> LedgerResult<Option<AffiliateProgram>> {
        Ok(sqlx::query_as::<_, AffiliateProgram>(
            r#"
            SELECT id, name, company, commission_rate, commission_type, category, minimum_payout, is_active
            FROM affiliate_programs
            WHERE id = $1
            "#,
        )
        .bind(program_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_link(&self, user_id: i64, program_id: i64) -> LedgerResult<Option<UserAffiliateLink>> {
        Ok(sqlx::query_as::<_, UserAffiliateLink>(
            "SELECT * FROM user_affiliate_links WHERE user_id = $1 AND program_id = $2",
        )
        .bind(user_id)
        .bind(program_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn insert_link(
        &self,
        user_id: i64,
        program_id: i64,
        unique_code: &str,
        at: DateTime<Utc>,
    ) -> LedgerResult<UserAffiliateLink> {
        sqlx::query_as::<_, UserAffiliateLink>(
            r#"
            INSERT INTO user_affiliate_links (user_id, program_id, unique_code, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(program_id)
        .bind(unique_code)
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "Affiliate link already exists", "User or program"))
    }

    async fn find_link_by_code(&self, code: &str) -> LedgerResult<Option<UserAffiliateLink>> {
        Ok(sqlx::query_as::<_, UserAffiliateLink>("SELECT * FROM user_affiliate_links WHERE unique_code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_links(&self, user_id: i64) -> LedgerResult<Vec<UserAffiliateLink>> {
        Ok(sqlx::query_as::<_, UserAffiliateLink>(
            "SELECT * FROM user_affiliate_links WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn record_link_click(&self, link_id: i64) -> LedgerResult<UserAffiliateLink> {
        sqlx::query_as::<_, UserAffiliateLink>(
            "UPDATE user_affiliate_links SET total_clicks = total_clicks + 1 WHERE id = $1 RETURNING *",
        )
        .bind(link_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| LedgerError::not_found("Affiliate link", link_id))
    }

    async fn insert_conversion(&self, conversion: NewAffiliateConversion) -> LedgerResult<AffiliateConversion> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE user_affiliate_links
            SET total_conversions = total_conversions + 1,
                total_earnings = total_earnings + $2
            WHERE id = $1
            "#,
        )
        .bind(conversion.user_link_id)
        .bind(conversion.commission_earned)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(LedgerError::not_found("Affiliate link", conversion.user_link_id));
        }

        let row = sqlx::query_as::<_, AffiliateConversion>(
            r#"
            INSERT INTO affiliate_conversions (
                user_link_id, user_id, program_id, conversion_value, commission_earned,
                external_transaction_id, converted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(conversion.user_link_id)
        .bind(conversion.user_id)
        .bind(conversion.program_id)
        .bind(conversion.conversion_value)
        .bind(conversion.commission_earned)
        .bind(&conversion.external_transaction_id)
        .bind(conversion.converted_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn get_conversion(&self, conversion_id: i64) -> LedgerResult<Option<AffiliateConversion>> {
        Ok(sqlx::query_as::<_, AffiliateConversion>("SELECT * FROM affiliate_conversions WHERE id = $1")
            .bind(conversion_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn resolve_conversion(
        &self,
        conversion_id: i64,
        status: ConversionStatus,
        at: DateTime<Utc>,
    ) -> LedgerResult<Option<AffiliateConversion>> {
        let mut tx = self.pool.begin().await?;

        let resolved = sqlx::query_as::<_, AffiliateConversion>(
            r#"
            UPDATE affiliate_conversions
            SET status = $2,
                approved_at = CASE WHEN $2 = 'approved'::conversion_status THEN $3 ELSE approved_at END
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(conversion_id)
        .bind(status)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(conversion) = &resolved {
            if conversion.status == ConversionStatus::Rejected {
                sqlx::query("UPDATE user_affiliate_links SET total_earnings = total_earnings - $2 WHERE id = $1")
                    .bind(conversion.user_link_id)
                    .bind(conversion.commission_earned)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(resolved)
    }

    async fn count_pending_conversions(&self, user_id: i64) -> LedgerResult<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM affiliate_conversions WHERE user_id = $1 AND status = 'pending'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn recent_conversions(&self, user_id: i64, limit: i64) -> LedgerResult<Vec<AffiliateConversion>> {
        Ok(sqlx::query_as::<_, AffiliateConversion>(
            r#"
            SELECT * FROM affiliate_conversions
            WHERE user_id = $1
            ORDER BY converted_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_content(&self, content: NewViralContent) -> LedgerResult<ViralContent> {
        sqlx::query_as::<_, ViralContent>(
            r#"
            INSERT INTO viral_content (user_id, content_type, platform_url, submitted_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(content.user_id)
        .bind(content.content_type)
        .bind(&content.platform_url)
        .bind(content.submitted_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "Content already submitted", "User"))
    }

    async fn get_content(&self, content_id: i64) -> LedgerResult<Option<ViralContent>> {
        Ok(sqlx::query_as::<_, ViralContent>("SELECT * FROM viral_content WHERE id = $1")
            .bind(content_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn approve_content(&self, content_id: i64, reward: ContentReward) -> LedgerResult<Option<ViralContent>> {
        Ok(sqlx::query_as::<_, ViralContent>(
            r#"
            UPDATE viral_content
            SET views = $2, shares = $3, click_throughs = $4,
                base_reward = $5, performance_bonus = $6, total_earned = $7,
                status = 'approved', reviewed_at = $8
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(content_id)
        .bind(reward.metrics.views)
        .bind(reward.metrics.shares)
        .bind(reward.metrics.click_throughs)
        .bind(reward.base_reward)
        .bind(reward.performance_bonus)
        .bind(reward.total)
        .bind(reward.reviewed_at)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn count_content(&self, user_id: i64, status: Option<ContentStatus>) -> LedgerResult<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM viral_content WHERE user_id = $1 AND ($2::content_status IS NULL OR status = $2)",
        )
        .bind(user_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn reserve_payout(&self, request: NewPayoutRequest) -> LedgerResult<PayoutRequest> {
        let mut tx = self.pool.begin().await?;

        let pending: Option<Decimal> =
            sqlx::query_scalar("SELECT pending_payout FROM user_earnings WHERE user_id = $1 FOR UPDATE")
                .bind(request.user_id)
                .fetch_optional(&mut *tx)
                .await?;

        let available = pending.ok_or_else(|| LedgerError::not_found("Earnings", request.user_id))?;
        if available < request.amount {
            return Err(LedgerError::InsufficientBalance {
                requested: request.amount,
                available,
            });
        }

        sqlx::query(
            "UPDATE user_earnings SET pending_payout = pending_payout - $2, updated_at = $3 WHERE user_id = $1",
        )
        .bind(request.user_id)
        .bind(request.amount)
        .bind(request.requested_at)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, PayoutRequest>(
            r#"
            INSERT INTO payout_requests (user_id, amount, payout_method, status, transaction_id, requested_at, processed_at, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(request.user_id)
        .bind(request.amount)
        .bind(Json(&request.payout_method))
        .bind(request.status)
        .bind(Uuid::new_v4())
        .bind(request.requested_at)
        .bind(request.processed_at)
        .bind(&request.notes)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn settle_payout(&self, settlement: SettlePayout) -> LedgerResult<SettledPayout> {
        let timer = Timer::new();
        let mut tx = self.pool.begin().await?;

        let pending: Option<Decimal> =
            sqlx::query_scalar("SELECT pending_payout FROM user_earnings WHERE user_id = $1 FOR UPDATE")
                .bind(settlement.user_id)
                .fetch_optional(&mut *tx)
                .await?;

        let pending = pending.ok_or_else(|| LedgerError::not_found("Earnings", settlement.user_id))?;
        if pending != settlement.amount {
            return Err(LedgerError::Conflict(format!(
                "Pending balance for user {} changed during settlement",
                settlement.user_id
            )));
        }

        let unpaid = sqlx::query_as::<_, ReferralTracking>(
            r#"
            SELECT * FROM referral_tracking
            WHERE referrer_id = $1 AND payment_status = 'completed' AND status <> 'bonus_paid'
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(settlement.user_id)
        .fetch_all(&mut *tx)
        .await?;
        if let Some(held) = unpaid.iter().find(|r| r.is_on_hold(settlement.settled_at)) {
            return Err(LedgerError::Conflict(format!(
                "Referral {} is inside its refund window",
                held.id
            )));
        }
        if !unpaid.is_empty() {
            let ids: Vec<i64> = unpaid.iter().map(|r| r.id).collect();
            sqlx::query("UPDATE referral_tracking SET status = 'bonus_paid' WHERE id = ANY($1)")
                .bind(&ids)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            UPDATE user_earnings
            SET pending_payout = pending_payout - $2,
                total_paid = total_paid + $2,
                last_payout_date = $3,
                updated_at = $3
            WHERE user_id = $1
            "#,
        )
        .bind(settlement.user_id)
        .bind(settlement.amount)
        .bind(settlement.settled_at)
        .execute(&mut *tx)
        .await?;


        let request = sqlx::query_as::<_, PayoutRequest>(
            r#"
            INSERT INTO payout_requests (user_id, amount, payout_method, status, transaction_id, requested_at, processed_at)
            VALUES ($1, $2, $3, 'processing', $4, $5, $5)
            RETURNING *
            "#,
        )
        .bind(settlement.user_id)
        .bind(settlement.amount)
        .bind(settlement.payout_method.as_ref().map(Json))
        .bind(Uuid::new_v4())
        .bind(settlement.settled_at)
        .fetch_one(&mut *tx)
        .await?;

        let transaction = match &settlement.transaction {
            Some(new_tx) => Some(
                sqlx::query_as::<_, PayoutTransaction>(
                    r#"
                    INSERT INTO payout_transactions (
                        payout_id, user_id, schedule_id, amount, processor, processor_fee,
                        final_amount, payout_method, status, created_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'processing', $9)
                    RETURNING *
                    "#,
                )
                .bind(&new_tx.payout_id)
                .bind(settlement.user_id)
                .bind(new_tx.schedule_id)
                .bind(settlement.amount)
                .bind(&new_tx.processor)
                .bind(new_tx.processor_fee)
                .bind(new_tx.final_amount)
                .bind(Json(&new_tx.payout_method))
                .bind(settlement.settled_at)
                .fetch_one(&mut *tx)
                .await?,
            ),
            None => None,
        };

        let mut entry = settlement.ledger_entry.clone();
        if entry.reference_id.is_none() {
            entry = entry.referencing("payout_request", request.id);
        }
        insert_ledger_entry_in(&mut tx, &entry).await?;

        if let Some(advance) = settlement.schedule {
            sqlx::query(
                r#"
                UPDATE payout_schedules
                SET last_execution = $2,
                    next_execution = $3,
                    total_payouts_made = total_payouts_made + 1,
                    total_amount_paid = total_amount_paid + $4
                WHERE id = $1
                "#,
            )
            .bind(advance.schedule_id)
            .bind(settlement.settled_at)
            .bind(advance.next_execution)
            .bind(settlement.amount)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        metrics::record_db_query("settle_payout", timer.elapsed_secs());

        Ok(SettledPayout { request, transaction })
    }

    async fn get_payout_request(&self, request_id: i64) -> LedgerResult<Option<PayoutRequest>> {
        Ok(sqlx::query_as::<_, PayoutRequest>("SELECT * FROM payout_requests WHERE id = $1")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn approve_payout_request(
        &self,
        request_id: i64,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> LedgerResult<Option<PayoutRequest>> {
        Ok(sqlx::query_as::<_, PayoutRequest>(
            r#"
            UPDATE payout_requests
            SET status = 'approved', processed_at = $2, notes = COALESCE($3, notes)
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(request_id)
        .bind(at)
        .bind(notes)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_payout_requests(&self, status: Option<PayoutStatus>, limit: i64) -> LedgerResult<Vec<PayoutRequest>> {
        Ok(sqlx::query_as::<_, PayoutRequest>(
            r#"
            SELECT * FROM payout_requests
            WHERE ($1::payout_status IS NULL OR status = $1)
            ORDER BY requested_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn payout_status_totals(&self) -> LedgerResult<Vec<PayoutStatusTotal>> {
        Ok(sqlx::query_as::<_, PayoutStatusTotal>(
            r#"
            SELECT status, COUNT(*) AS count, COALESCE(SUM(amount), 0) AS total_amount
            FROM payout_requests
            GROUP BY status
            ORDER BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn replace_schedule(&self, schedule: NewPayoutSchedule) -> LedgerResult<PayoutSchedule> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE payout_schedules SET is_active = FALSE WHERE user_id = $1 AND is_active")
            .bind(schedule.user_id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query_as::<_, PayoutSchedule>(
            r#"
            INSERT INTO payout_schedules (
                user_id, frequency, day_of_week, day_of_month, minimum_amount,
                payout_method, next_execution, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(schedule.user_id)
        .bind(schedule.frequency)
        .bind(schedule.day_of_week)
        .bind(schedule.day_of_month)
        .bind(schedule.minimum_amount)
        .bind(Json(&schedule.payout_method))
        .bind(schedule.next_execution)
        .bind(schedule.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, "Active payout schedule already exists", "User"))?;

        tx.commit().await?;
        Ok(row)
    }

    async fn get_active_schedule(&self, user_id: i64) -> LedgerResult<Option<PayoutSchedule>> {
        Ok(sqlx::query_as::<_, PayoutSchedule>(
            "SELECT * FROM payout_schedules WHERE user_id = $1 AND is_active",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn due_schedules(&self, now: DateTime<Utc>) -> LedgerResult<Vec<PayoutSchedule>> {
        Ok(sqlx::query_as::<_, PayoutSchedule>(
            "SELECT * FROM payout_schedules WHERE is_active AND next_execution <= $1 ORDER BY next_execution",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn reschedule(&self, schedule_id: i64, next_execution: DateTime<Utc>) -> LedgerResult<()> {
        let result = sqlx::query("UPDATE payout_schedules SET next_execution = $2 WHERE id = $1")
            .bind(schedule_id)
            .bind(next_execution)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::not_found("Payout schedule", schedule_id));
        }
        Ok(())
    }

    async fn insert_ledger_entry(&self, entry: NewLedgerEntry) -> LedgerResult<LedgerEntry> {
        let mut tx = self.pool.begin().await?;
        let row = insert_ledger_entry_in(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn list_ledger_entries(&self, filter: &LedgerFilter) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT * FROM ledger_entries
            WHERE ($1::date IS NULL OR accounting_date >= $1)
              AND ($2::date IS NULL OR accounting_date <= $2)
              AND ($3::text IS NULL OR category = $3)
              AND ($4::ledger_account_type IS NULL OR account_type = $4)
            ORDER BY id DESC
            LIMIT $5
            "#,
        )
        .bind(filter.from_date)
        .bind(filter.to_date)
        .bind(&filter.category)
        .bind(filter.account_type)
        .bind(filter.effective_limit())
        .fetch_all(&self.pool)
        .await?)
    }

    async fn ledger_totals(&self, from: NaiveDate, to: NaiveDate) -> LedgerResult<LedgerTotals> {
        Ok(sqlx::query_as::<_, LedgerTotals>(
            r#"
            SELECT
                COALESCE(SUM(amount) FILTER (WHERE account_type = 'revenue'), 0) AS revenue,
                COALESCE(SUM(amount) FILTER (WHERE account_type = 'expense'), 0) AS expenses,
                COALESCE(SUM(amount) FILTER (WHERE category = 'user_payout'), 0) AS payouts
            FROM ledger_entries
            WHERE accounting_date BETWEEN $1 AND $2
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn payouts_by_user(&self, from: NaiveDate, to: NaiveDate) -> LedgerResult<Vec<UserPayoutTotal>> {
        Ok(sqlx::query_as::<_, UserPayoutTotal>(
            r#"
            SELECT l.user_id AS user_id, u.username, u.email,
                   SUM(l.amount) AS total_paid, COUNT(*) AS payout_count
            FROM ledger_entries l
            JOIN users u ON u.id = l.user_id
            WHERE l.category = 'user_payout' AND l.accounting_date BETWEEN $1 AND $2
            GROUP BY l.user_id, u.username, u.email
            ORDER BY total_paid DESC, l.user_id
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_fraud_detection(&self, detection: NewFraudDetection) -> LedgerResult<FraudDetection> {
        sqlx::query_as::<_, FraudDetection>(
            r#"
            INSERT INTO fraud_detections (user_id, fraud_type, risk_score, suspicious_patterns, detected_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(detection.user_id)
        .bind(detection.fraud_type)
        .bind(detection.risk_score)
        .bind(Json(&detection.suspicious_patterns))
        .bind(detection.detected_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "Fraud detection conflict", "User"))
    }

    async fn count_fraud_detections(&self, user_id: i64, status: FraudStatus) -> LedgerResult<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM fraud_detections WHERE user_id = $1 AND status = $2",
        )
        .bind(user_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn fraud_status_counts(&self) -> LedgerResult<Vec<FraudStatusCount>> {
        Ok(sqlx::query_as::<_, FraudStatusCount>(
            "SELECT status, COUNT(*) AS count FROM fraud_detections GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn fraud_type_stats(&self) -> LedgerResult<Vec<FraudTypeStat>> {
        Ok(sqlx::query_as::<_, FraudTypeStat>(
            r#"
            SELECT fraud_type, COUNT(*) AS count, AVG(risk_score) AS average_risk
            FROM fraud_detections
            GROUP BY fraud_type
            ORDER BY fraud_type
            "#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn recent_fraud_detections(&self, limit: i64) -> LedgerResult<Vec<FraudDetection>> {
        Ok(sqlx::query_as::<_, FraudDetection>(
            "SELECT * FROM fraud_detections ORDER BY detected_at DESC, id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn referral_level_breakdown(&self) -> LedgerResult<Vec<LevelBreakdown>> {
        Ok(sqlx::query_as::<_, LevelBreakdown>(
            r#"
            SELECT level,
                   COUNT(*) AS count,
                   COALESCE(SUM(referral_bonus), 0) AS total_bonus,
                   ROUND(COALESCE(AVG(referral_bonus), 0), 2) AS average_bonus
            FROM referral_tracking
            GROUP BY level
            ORDER BY level
            "#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn top_referrers(&self, limit: i64) -> LedgerResult<Vec<TopReferrer>> {
        Ok(sqlx::query_as::<_, TopReferrer>(
            r#"
            SELECT r.referrer_id, u.username,
                   COUNT(*) AS referral_count,
                   COALESCE(SUM(r.referral_bonus), 0) AS total_bonus
            FROM referral_tracking r
            JOIN users u ON u.id = r.referrer_id
            GROUP BY r.referrer_id, u.username
            ORDER BY total_bonus DESC, r.referrer_id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn referral_counts(&self) -> LedgerResult<ReferralCounts> {
        Ok(sqlx::query_as::<_, ReferralCounts>(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE payment_status = 'completed') AS converted,
                   COUNT(*) FILTER (WHERE status = 'bonus_paid') AS paid
            FROM referral_tracking
            WHERE level = 1
            "#,
        )
        .fetch_one(&self.pool)
        .await?)
    }

    async fn earnings_totals(&self) -> LedgerResult<EarningsTotals> {
        Ok(sqlx::query_as::<_, EarningsTotals>(
            r#"
            SELECT COALESCE(SUM(total_earnings), 0) AS total_earnings,
                   COALESCE(SUM(pending_payout), 0) AS pending_payout,
                   COALESCE(SUM(total_paid), 0) AS total_paid
            FROM user_earnings
            "#,
        )
        .fetch_one(&self.pool)
        .await?)
    }
}
