//! Earnings Service
//!
//! Every credit to a user's balance goes through `credit`, whatever the
//! source: referral bonuses, affiliate commissions, approved content and
//! community rewards. Also owns affiliate links/conversions and viral
//! content review, since those are what produce the credits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{LedgerError, LedgerResult};
use crate::metrics;
use crate::models::*;
use crate::store::LedgerStore;

/// Conversions shown on the earnings breakdown
const RECENT_CONVERSIONS: i64 = 10;

pub struct EarningsService {
    store: Arc<dyn LedgerStore>,
}

impl EarningsService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Adds `amount` to one source, `total_earnings` and `pending_payout`.
    /// Negative amounts reverse an earlier credit.
    pub async fn credit(
        &self,
        user_id: i64,
        source: EarningSource,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> LedgerResult<UserEarnings> {
        let earnings = self.store.credit_earnings(user_id, source, amount, now).await?;

        if amount > Decimal::ZERO {
            metrics::record_earnings_credit(&source.to_string(), amount);
        }
        debug!(
            "Credited {} {} earnings to user {} (pending now {})",
            amount, source, user_id, earnings.pending_payout
        );

        Ok(earnings)
    }

    pub async fn get_breakdown(&self, user_id: i64, now: DateTime<Utc>) -> LedgerResult<EarningsBreakdown> {
        self.require_user(user_id).await?;

        let earnings = self
            .store
            .get_earnings(user_id)
            .await?
            .unwrap_or_else(|| UserEarnings::empty(user_id, now));
        let referral_count = self.store.count_converted_referrals(user_id).await?;
        let recent = self.store.recent_conversions(user_id, RECENT_CONVERSIONS).await?;

        Ok(EarningsBreakdown::new(earnings, referral_count, recent))
    }

    pub async fn credit_community(
        &self,
        user_id: i64,
        amount: Decimal,
        reason: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<UserEarnings> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::Validation("Community reward must be positive".to_string()));
        }
        info!("Community reward of {} for user {}: {}", amount, user_id, reason);
        self.credit(user_id, EarningSource::Community, amount, now).await
    }

    // ---- affiliate ----

    pub async fn list_programs(&self) -> LedgerResult<Vec<AffiliateProgram>> {
        self.store.list_programs(true).await
    }

    /// Returns the user's existing link for the program, or creates one.
    pub async fn create_link(
        &self,
        user_id: i64,
        program_id: i64,
        now: DateTime<Utc>,
    ) -> LedgerResult<UserAffiliateLink> {
        let user = self.require_user(user_id).await?;
        let program = self
            .store
            .get_program(program_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| LedgerError::not_found("Affiliate program", program_id))?;

        if let Some(link) = self.store.find_link(user_id, program_id).await? {
            return Ok(link);
        }

        let code = generate_link_code(&user.referral_code);
        let link = self.store.insert_link(user_id, program.id, &code, now).await?;
        info!("Created affiliate link {} for user {} on {}", link.unique_code, user_id, program.name);
        Ok(link)
    }

    pub async fn record_click(&self, link_code: &str) -> LedgerResult<UserAffiliateLink> {
        let link = self
            .store
            .find_link_by_code(link_code)
            .await?
            .ok_or_else(|| LedgerError::not_found("Affiliate link", link_code))?;
        self.store.record_link_click(link.id).await
    }

    /// Stores a pending conversion and credits its commission right away;
    /// the pending status keeps the payout gate closed until review.
    pub async fn record_conversion(
        &self,
        link_code: &str,
        conversion_value: Decimal,
        external_transaction_id: Option<String>,
        now: DateTime<Utc>,
    ) -> LedgerResult<AffiliateConversion> {
        if conversion_value <= Decimal::ZERO {
            return Err(LedgerError::Validation("conversion_value must be positive".to_string()));
        }

        let link = self
            .store
            .find_link_by_code(link_code)
            .await?
            .ok_or_else(|| LedgerError::not_found("Affiliate link", link_code))?;
        let program = self
            .store
            .get_program(link.program_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Affiliate program", link.program_id))?;

        let commission = program.commission_for(conversion_value);
        let conversion = self
            .store
            .insert_conversion(NewAffiliateConversion {
                user_link_id: link.id,
                user_id: link.user_id,
                program_id: program.id,
                conversion_value,
                commission_earned: commission,
                external_transaction_id,
                converted_at: now,
            })
            .await?;

        self.credit(link.user_id, EarningSource::Affiliate, commission, now).await?;
        info!(
            "Affiliate conversion {} on {}: value {} commission {}",
            conversion.id, program.name, conversion_value, commission
        );

        Ok(conversion)
    }

    pub async fn approve_conversion(&self, conversion_id: i64, now: DateTime<Utc>) -> LedgerResult<AffiliateConversion> {
        let resolved = self
            .store
            .resolve_conversion(conversion_id, ConversionStatus::Approved, now)
            .await?;
        let conversion = self.resolved_or_error(conversion_id, resolved).await?;
        info!("Affiliate conversion {} approved", conversion_id);
        Ok(conversion)
    }

    /// Rejects a pending conversion and takes its commission back.
    pub async fn reject_conversion(
        &self,
        conversion_id: i64,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> LedgerResult<AffiliateConversion> {
        let resolved = self
            .store
            .resolve_conversion(conversion_id, ConversionStatus::Rejected, now)
            .await?;
        let conversion = self.resolved_or_error(conversion_id, resolved).await?;

        self.credit(
            conversion.user_id,
            EarningSource::Affiliate,
            -conversion.commission_earned,
            now,
        )
        .await?;
        info!(
            "Affiliate conversion {} rejected ({}), reversed {}",
            conversion_id,
            reason.unwrap_or("no reason given"),
            conversion.commission_earned
        );

        Ok(conversion)
    }

    pub async fn affiliate_stats(&self, user_id: i64) -> LedgerResult<AffiliateStats> {
        self.require_user(user_id).await?;

        let links = self.store.list_links(user_id).await?;
        let total_clicks: i64 = links.iter().map(|l| l.total_clicks).sum();
        let total_conversions: i64 = links.iter().map(|l| l.total_conversions).sum();
        let conversion_rate = if total_clicks > 0 {
            (Decimal::from(total_conversions) * Decimal::ONE_HUNDRED / Decimal::from(total_clicks)).round_dp(2)
        } else {
            Decimal::ZERO
        };
        let affiliate_earnings = self
            .store
            .get_earnings(user_id)
            .await?
            .map(|e| e.affiliate_earnings)
            .unwrap_or(Decimal::ZERO);

        Ok(AffiliateStats {
            user_id,
            total_links: links.len(),
            total_clicks,
            total_conversions,
            conversion_rate,
            affiliate_earnings,
            links,
        })
    }

    // ---- viral content ----

    pub async fn submit_content(
        &self,
        user_id: i64,
        content_type: ContentType,
        platform_url: String,
        now: DateTime<Utc>,
    ) -> LedgerResult<ViralContent> {
        self.require_user(user_id).await?;
        self.store
            .insert_content(NewViralContent {
                user_id,
                content_type,
                platform_url,
                submitted_at: now,
            })
            .await
    }

    /// Fixes the reward from the reported metrics and credits it as content
    /// earnings.
    pub async fn approve_content(
        &self,
        content_id: i64,
        performance_metrics: ContentMetrics,
        now: DateTime<Utc>,
    ) -> LedgerResult<ViralContent> {
        let content = self
            .store
            .get_content(content_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Content", content_id))?;

        let reward = ContentReward::calculate(content.content_type, performance_metrics, now);
        let approved = self
            .store
            .approve_content(content_id, reward)
            .await?
            .ok_or_else(|| LedgerError::Conflict(format!("Content {} was already reviewed", content_id)))?;

        self.credit(approved.user_id, EarningSource::Content, reward.total, now).await?;
        info!(
            "Content {} approved: base {} + bonus {} for user {}",
            content_id, reward.base_reward, reward.performance_bonus, approved.user_id
        );

        Ok(approved)
    }

    async fn require_user(&self, user_id: i64) -> LedgerResult<User> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("User", user_id))
    }

    async fn resolved_or_error(
        &self,
        conversion_id: i64,
        resolved: Option<AffiliateConversion>,
    ) -> LedgerResult<AffiliateConversion> {
        match resolved {
            Some(conversion) => Ok(conversion),
            None => match self.store.get_conversion(conversion_id).await? {
                Some(existing) => Err(LedgerError::Conflict(format!(
                    "Conversion {} is already {:?}",
                    conversion_id, existing.status
                ))),
                None => Err(LedgerError::not_found("Conversion", conversion_id)),
            },
        }
    }
}

/// Referral code plus six random hex characters.
fn generate_link_code(referral_code: &str) -> String {
    let suffix: [u8; 3] = rand::random();
    format!("{}-{}", referral_code, hex::encode_upper(suffix))
}
