//! Referral Service
//!
//! Signup with a referral code, explicit referral tracking, conversion and
//! the "Sister Circle" chain walk that pays the direct referrer and up to two
//! ancestors:
//! - Level 1: full tier bonus
//! - Level 2: 50%
//! - Level 3: 25%

use chrono::{DateTime, Duration, Utc};
use sha3::{Digest, Keccak256};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::metrics;
use crate::models::*;
use crate::services::earnings::EarningsService;
use crate::store::LedgerStore;

const CODE_ATTEMPTS: usize = 5;

pub struct ReferralService {
    store: Arc<dyn LedgerStore>,
    earnings: Arc<EarningsService>,
    hold_period: Duration,
}

impl ReferralService {
    pub fn new(store: Arc<dyn LedgerStore>, earnings: Arc<EarningsService>, hold_days: i64) -> Self {
        Self {
            store,
            earnings,
            hold_period: Duration::days(hold_days),
        }
    }

    /// Creates the user and, when a valid referrer code is given, the pending
    /// level-1 referral row.
    pub async fn register_user(&self, request: CreateUserRequest, now: DateTime<Utc>) -> LedgerResult<User> {
        let email = request.email.trim().to_lowercase();
        let username = request.username.trim().to_string();

        let referrer = match request.referral_code.as_deref() {
            Some(code) => Some(
                self.store
                    .find_user_by_referral_code(code)
                    .await?
                    .ok_or_else(|| LedgerError::Validation(format!("Unknown referral code {}", code)))?,
            ),
            None => None,
        };

        let referral_code = self.unique_referral_code(&email).await?;
        let user = self
            .store
            .create_user(NewUser {
                email,
                username,
                referral_code,
                referred_by_id: referrer.as_ref().map(|r| r.id),
                referral_code_used: referrer.as_ref().map(|r| r.referral_code.clone()),
                join_date: now,
            })
            .await?;

        if let Some(referrer) = referrer {
            self.store
                .insert_referral(NewReferral {
                    referrer_id: referrer.id,
                    referred_id: user.id,
                    referral_code: referrer.referral_code.clone(),
                    parent_referral_id: None,
                    referred_at: now,
                })
                .await?;
            info!("User {} joined via referral from {}", user.id, referrer.id);
        } else {
            info!("User {} joined", user.id);
        }

        Ok(user)
    }

    pub async fn get_user(&self, user_id: i64) -> LedgerResult<User> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("User", user_id))
    }

    /// Records `referrer -> referred` as a pending level-1 row. A user can
    /// have only one direct referrer.
    pub async fn track_referral(&self, request: TrackReferralRequest, now: DateTime<Utc>) -> LedgerResult<ReferralTracking> {
        if request.referrer_id == request.referred_id {
            return Err(LedgerError::Validation("Users cannot refer themselves".to_string()));
        }

        let referrer = self.get_user(request.referrer_id).await?;
        self.get_user(request.referred_id).await?;

        if let Some(existing) = self.store.find_upstream_referral(request.referred_id).await? {
            return Err(LedgerError::Conflict(format!(
                "User {} was already referred by {}",
                request.referred_id, existing.referrer_id
            )));
        }

        let referral = self
            .store
            .insert_referral(NewReferral {
                referrer_id: referrer.id,
                referred_id: request.referred_id,
                referral_code: request.referral_code.unwrap_or(referrer.referral_code),
                parent_referral_id: request.parent_referral_id,
                referred_at: now,
            })
            .await?;

        info!("Tracked referral {} -> {}", referral.referrer_id, referral.referred_id);
        Ok(referral)
    }

    /// Completes the referred user's pending level-1 row and pays the chain.
    pub async fn convert_referral(
        &self,
        referred_id: i64,
        subscription_type: SubscriptionType,
        now: DateTime<Utc>,
    ) -> LedgerResult<ReferralBonus> {
        let upstream = self
            .store
            .find_upstream_referral(referred_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Referral for user", referred_id))?;

        let converted = self
            .store
            .mark_referral_converted(upstream.id, subscription_type, now)
            .await?
            .ok_or_else(|| LedgerError::Conflict(format!("Referral {} was already converted", upstream.id)))?;

        self.calculate_referral_bonus(
            ConversionEvent {
                referrer_id: converted.referrer_id,
                referred_user_id: referred_id,
                subscription_type,
                parent_referral_id: converted.parent_referral_id,
            },
            now,
        )
        .await
    }

    /// Walks up to `MAX_REFERRAL_DEPTH` referrers above the converted user,
    /// accumulating each level's bonus on its tracking row and crediting it.
    ///
    /// The tier comes from a live count of the direct referrer's completed
    /// rows. The walk follows the level-1 row whose `referred_id` is the
    /// current referrer and stops at the top of the chain or on a repeat.
    pub async fn calculate_referral_bonus(
        &self,
        event: ConversionEvent,
        now: DateTime<Utc>,
    ) -> LedgerResult<ReferralBonus> {
        let completed = self.store.count_completed_referrals(event.referrer_id).await?;
        let tier = ReferrerTier::from_completed_count(completed);
        let base_bonus = tier.base_bonus();
        let refund_period_ends_at = now + self.hold_period;

        let mut awards = Vec::new();
        let mut seen = HashSet::from([event.referred_user_id]);
        let mut current = event.referrer_id;
        let mut parent_referral_id = event.parent_referral_id;

        for level in 1..=MAX_REFERRAL_DEPTH {
            if !seen.insert(current) {
                warn!("Referral chain for user {} loops at user {}", event.referred_user_id, current);
                break;
            }

            let referrer = self.get_user(current).await?;
            let amount = (base_bonus * level_multiplier(level)).round_dp(2);

            let row = self
                .store
                .upsert_referral_bonus(ReferralBonusUpsert {
                    referrer_id: referrer.id,
                    referred_id: event.referred_user_id,
                    level,
                    referral_code: referrer.referral_code.clone(),
                    parent_referral_id,
                    subscription_type: event.subscription_type,
                    bonus: amount,
                    converted_at: now,
                    refund_period_ends_at,
                })
                .await?;

            self.earnings
                .credit(referrer.id, EarningSource::Referral, amount, now)
                .await?;
            self.store
                .insert_ledger_entry(
                    NewLedgerEntry::referral_expense(referrer.id, level, amount, now).referencing("referral", row.id),
                )
                .await?;
            metrics::record_referral_bonus(level, amount);

            awards.push(LevelAward {
                level,
                referrer_id: referrer.id,
                referral_id: row.id,
                amount,
            });
            parent_referral_id = Some(row.id);

            match self.store.find_upstream_referral(current).await? {
                Some(upstream) => current = upstream.referrer_id,
                None => break,
            }
        }

        let bonus = ReferralBonus {
            base_bonus,
            tier,
            awards,
        };
        info!(
            "Referral conversion of user {}: {} tier, {} paid across {} levels",
            event.referred_user_id,
            tier,
            bonus.total_awarded(),
            bonus.awards.len()
        );

        Ok(bonus)
    }

    async fn unique_referral_code(&self, seed: &str) -> LedgerResult<String> {
        for _ in 0..CODE_ATTEMPTS {
            let code = generate_referral_code(seed);
            if self.store.find_user_by_referral_code(&code).await?.is_none() {
                return Ok(code);
            }
        }
        Err(LedgerError::Internal("Could not allocate a unique referral code".to_string()))
    }
}

/// `IB` followed by 8 upper-case hex characters.
pub fn generate_referral_code(seed: &str) -> String {
    let salt: [u8; 8] = rand::random();
    let mut hasher = Keccak256::new();
    hasher.update(seed.as_bytes());
    hasher.update(Utc::now().timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
    hasher.update(salt);
    let hash = hasher.finalize();
    format!("IB{}", hex::encode_upper(&hash[..4]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{link, memory_store, seed_user};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    async fn create_test_service() -> (ReferralService, Arc<dyn LedgerStore>) {
        let store = memory_store().await;
        let earnings = Arc::new(EarningsService::new(store.clone()));
        (ReferralService::new(store.clone(), earnings, 7), store)
    }

    async fn referral_earnings(store: &Arc<dyn LedgerStore>, user: &User) -> Decimal {
        store
            .get_earnings(user.id)
            .await
            .unwrap()
            .map(|e| e.referral_earnings)
            .unwrap_or(Decimal::ZERO)
    }

    #[test]
    fn test_referral_code_format() {
        let code = generate_referral_code("ada@bloom.example");
        assert_eq!(code.len(), 10);
        assert!(code.starts_with("IB"));
        assert!(code[2..].chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert_ne!(code, generate_referral_code("ada@bloom.example"));
    }

    #[tokio::test]
    async fn test_fourth_conversion_pays_silver() {
        let (service, store) = create_test_service().await;
        let now = Utc::now();
        let sponsor = seed_user(&store, "sponsor", now).await;

        for name in ["r1", "r2", "r3"] {
            let referred = seed_user(&store, name, now).await;
            link(&store, &sponsor, &referred, now).await;
            let bonus = service
                .convert_referral(referred.id, SubscriptionType::Premium, now)
                .await
                .unwrap();
            assert_eq!(bonus.tier, ReferrerTier::Bronze);
        }

        let fourth = seed_user(&store, "r4", now).await;
        link(&store, &sponsor, &fourth, now).await;
        let bonus = service
            .convert_referral(fourth.id, SubscriptionType::Premium, now)
            .await
            .unwrap();

        assert_eq!(bonus.tier, ReferrerTier::Silver);
        assert_eq!(bonus.base_bonus, dec!(15));
        assert_eq!(referral_earnings(&store, &sponsor).await, dec!(45));
    }

    #[tokio::test]
    async fn test_chain_of_four_pays_three_levels() {
        let (service, store) = create_test_service().await;
        let now = Utc::now();
        let a = seed_user(&store, "a", now).await;
        let b = seed_user(&store, "b", now).await;
        let c = seed_user(&store, "c", now).await;
        let d = seed_user(&store, "d", now).await;
        link(&store, &a, &b, now).await;
        link(&store, &b, &c, now).await;
        link(&store, &c, &d, now).await;

        let bonus = service
            .convert_referral(d.id, SubscriptionType::Vip, now)
            .await
            .unwrap();

        let paid: Vec<(i32, i64, Decimal)> = bonus
            .awards
            .iter()
            .map(|a| (a.level, a.referrer_id, a.amount))
            .collect();
        assert_eq!(paid, vec![(1, c.id, dec!(10)), (2, b.id, dec!(5)), (3, a.id, dec!(2.5))]);

        assert_eq!(referral_earnings(&store, &c).await, dec!(10));
        assert_eq!(referral_earnings(&store, &b).await, dec!(5));
        assert_eq!(referral_earnings(&store, &a).await, dec!(2.5));

        // each deeper row points at the row one level below it
        let level_two = store.list_referrals_by_referrer(b.id).await.unwrap();
        let level_two = level_two.iter().find(|r| r.level == 2).unwrap();
        assert_eq!(level_two.referred_id, d.id);
        assert_eq!(level_two.parent_referral_id, Some(bonus.awards[0].referral_id));
        assert!(level_two.refund_period_ends_at.unwrap() > now);
    }

    #[tokio::test]
    async fn test_deeper_ancestors_are_not_paid() {
        let (service, store) = create_test_service().await;
        let now = Utc::now();
        let users = [
            seed_user(&store, "u0", now).await,
            seed_user(&store, "u1", now).await,
            seed_user(&store, "u2", now).await,
            seed_user(&store, "u3", now).await,
            seed_user(&store, "u4", now).await,
        ];
        for pair in users.windows(2) {
            link(&store, &pair[0], &pair[1], now).await;
        }

        let bonus = service
            .convert_referral(users[4].id, SubscriptionType::Premium, now)
            .await
            .unwrap();

        assert_eq!(bonus.awards.len(), 3);
        assert_eq!(referral_earnings(&store, &users[0]).await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_repeated_bonus_accumulates_on_same_row() {
        let (service, store) = create_test_service().await;
        let now = Utc::now();
        let a = seed_user(&store, "ana", now).await;
        let b = seed_user(&store, "ben", now).await;

        let event = ConversionEvent {
            referrer_id: a.id,
            referred_user_id: b.id,
            subscription_type: SubscriptionType::ProductPurchase,
            parent_referral_id: None,
        };
        service.calculate_referral_bonus(event.clone(), now).await.unwrap();
        service.calculate_referral_bonus(event, now).await.unwrap();

        let rows = store.list_referrals_by_referrer(a.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].referral_bonus, dec!(20));
        assert_eq!(referral_earnings(&store, &a).await, dec!(20));
    }

    #[tokio::test]
    async fn test_converting_twice_is_conflict() {
        let (service, store) = create_test_service().await;
        let now = Utc::now();
        let a = seed_user(&store, "kim", now).await;
        let b = seed_user(&store, "lou", now).await;
        link(&store, &a, &b, now).await;

        service.convert_referral(b.id, SubscriptionType::Premium, now).await.unwrap();
        let err = service
            .convert_referral(b.id, SubscriptionType::Premium, now)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));

        let err = service
            .convert_referral(a.id, SubscriptionType::Premium, now)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_circular_chain_stops_walk() {
        let (service, store) = create_test_service().await;
        let now = Utc::now();
        let a = seed_user(&store, "mia", now).await;
        let b = seed_user(&store, "noa", now).await;
        let c = seed_user(&store, "oli", now).await;
        link(&store, &a, &b, now).await;
        link(&store, &b, &a, now).await;
        link(&store, &b, &c, now).await;

        let bonus = service
            .convert_referral(c.id, SubscriptionType::Premium, now)
            .await
            .unwrap();

        // b (level 1), a (level 2), then back to b, which stops the walk
        assert_eq!(bonus.awards.len(), 2);
    }

    #[tokio::test]
    async fn test_signup_with_code_creates_pending_referral() {
        let (service, store) = create_test_service().await;
        let now = Utc::now();
        let sponsor = seed_user(&store, "pia", now).await;

        let user = service
            .register_user(
                CreateUserRequest {
                    email: "Quinn@Bloom.Example".to_string(),
                    username: "quinn".to_string(),
                    referral_code: Some(sponsor.referral_code.clone()),
                },
                now,
            )
            .await
            .unwrap();

        assert_eq!(user.email, "quinn@bloom.example");
        assert_eq!(user.referred_by_id, Some(sponsor.id));
        assert!(user.referral_code.starts_with("IB"));

        let upstream = store.find_upstream_referral(user.id).await.unwrap().unwrap();
        assert_eq!(upstream.referrer_id, sponsor.id);
        assert_eq!(upstream.payment_status, PaymentStatus::Pending);

        let err = service
            .track_referral(
                TrackReferralRequest {
                    referrer_id: sponsor.id,
                    referred_id: user.id,
                    referral_code: None,
                    parent_referral_id: None,
                },
                now,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_unknown_signup_code_is_rejected() {
        let (service, _store) = create_test_service().await;
        let err = service
            .register_user(
                CreateUserRequest {
                    email: "rae@bloom.example".to_string(),
                    username: "rae".to_string(),
                    referral_code: Some("IBFFFFFFFF".to_string()),
                },
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_bonus_writes_referral_expense_entries() {
        let (service, store) = create_test_service().await;
        let now = Utc::now();
        let a = seed_user(&store, "sol", now).await;
        let b = seed_user(&store, "tea", now).await;
        link(&store, &a, &b, now).await;

        service.convert_referral(b.id, SubscriptionType::Premium, now).await.unwrap();

        let entries = store
            .list_ledger_entries(&LedgerFilter {
                category: Some(categories::REFERRAL_EXPENSE.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, dec!(10));
        assert_eq!(entries[0].account_type, AccountType::Expense);
    }
}
