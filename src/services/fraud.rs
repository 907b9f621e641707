//! Fraud scoring
//!
//! Heuristic multi-account detection plus an on-demand trust profile.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::metrics;
use crate::models::*;
use crate::store::LedgerStore;

const RAPID_REFERRAL_LIMIT: i64 = 10;
const SHARED_DOMAIN_LIMIT: i64 = 5;

pub struct FraudService {
    store: Arc<dyn LedgerStore>,
}

impl FraudService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Scores the user and stores a detection when the score is above
    /// [`FRAUD_RECORD_THRESHOLD`].
    pub async fn detect_multi_account_fraud(&self, user_id: i64, now: DateTime<Utc>) -> LedgerResult<FraudAssessment> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("User", user_id))?;

        let mut patterns = Vec::new();

        let referred: BTreeSet<i64> = self
            .store
            .list_referrals_by_referrer(user_id)
            .await?
            .into_iter()
            .filter(|r| r.level == 1)
            .map(|r| r.referred_id)
            .collect();
        for counterpart_id in referred {
            if self.store.referral_exists(counterpart_id, user_id).await? {
                patterns.push(SuspiciousPattern::CircularReferral { counterpart_id });
            }
        }

        let recent = self
            .store
            .count_referrals_since(user_id, now - Duration::hours(24))
            .await?;
        if recent > RAPID_REFERRAL_LIMIT {
            patterns.push(SuspiciousPattern::RapidReferralCreation {
                referrals_last_24h: recent,
            });
        }

        if let Some(domain) = user.email_domain() {
            let user_count = self.store.count_users_with_email_domain(&domain).await?;
            if user_count > SHARED_DOMAIN_LIMIT {
                patterns.push(SuspiciousPattern::SharedEmailDomain { domain, user_count });
            }
        }

        let risk_score = clamp_score(patterns.iter().map(SuspiciousPattern::weight).sum());

        let detection = if risk_score > FRAUD_RECORD_THRESHOLD {
            let detection = self
                .store
                .insert_fraud_detection(NewFraudDetection {
                    user_id,
                    fraud_type: FraudType::MultiAccount,
                    risk_score,
                    suspicious_patterns: patterns.clone(),
                    detected_at: now,
                })
                .await?;
            metrics::record_fraud_detection("multi_account");
            warn!(
                "Fraud detection {} for user {}: score {:.1} ({} patterns)",
                detection.id,
                user_id,
                risk_score,
                patterns.len()
            );
            Some(detection)
        } else {
            None
        };

        Ok(FraudAssessment {
            user_id,
            risk_score,
            patterns,
            detection,
        })
    }

    pub async fn risk_profile(&self, user_id: i64, now: DateTime<Utc>) -> LedgerResult<RiskProfile> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("User", user_id))?;

        let age_days = (now - user.join_date).num_days().max(0) as f64;
        let converted = self.store.count_converted_referrals(user_id).await? as f64;
        let approved_content = self
            .store
            .count_content(user_id, Some(ContentStatus::Approved))
            .await? as f64;
        let all_content = self.store.count_content(user_id, None).await? as f64;
        let confirmed_fraud = self
            .store
            .count_fraud_detections(user_id, FraudStatus::ConfirmedFraud)
            .await? as f64;
        let referrals = self
            .store
            .list_referrals_by_referrer(user_id)
            .await?
            .iter()
            .filter(|r| r.level == 1)
            .count() as f64;
        let total_earnings = self
            .store
            .get_earnings(user_id)
            .await?
            .and_then(|e| e.total_earnings.to_f64())
            .unwrap_or(0.0);

        let trust_score = clamp_score(
            (age_days * 0.5).min(20.0) + (converted * 2.0).min(25.0) + (approved_content * 1.5).min(15.0)
                - 20.0 * confirmed_fraud,
        );
        let loyalty_score = clamp_score(
            (total_earnings * 0.1).min(40.0) + (referrals * 3.0).min(30.0) + (all_content * 2.0).min(20.0) + 10.0,
        );
        let combined_score = (trust_score + loyalty_score) / 2.0;

        let profile = RiskProfile {
            user_id,
            trust_score,
            loyalty_score,
            combined_score,
            verification_tier: VerificationTier::from_combined_score(combined_score),
        };
        info!(
            "Risk profile for user {}: trust {:.1}, loyalty {:.1}, tier {:?}",
            user_id, profile.trust_score, profile.loyalty_score, profile.verification_tier
        );
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::earnings::EarningsService;
    use crate::services::referral::ReferralService;
    use crate::services::test_support::{link, memory_store, seed_user, seed_user_with_email};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_clean_user_scores_zero() {
        let store = memory_store().await;
        let service = FraudService::new(store.clone());
        let now = Utc::now();
        let user = seed_user(&store, "quinn", now).await;

        let assessment = service.detect_multi_account_fraud(user.id, now).await.unwrap();
        assert_eq!(assessment.risk_score, 0.0);
        assert!(assessment.patterns.is_empty());
        assert!(assessment.detection.is_none());
    }

    #[tokio::test]
    async fn test_circular_and_rapid_referrals_are_recorded() {
        let store = memory_store().await;
        let service = FraudService::new(store.clone());
        let now = Utc::now();
        let ring = seed_user_with_email(&store, "ring", "ring@ring.example", now).await;
        let partner = seed_user(&store, "partner", now).await;
        link(&store, &ring, &partner, now).await;
        link(&store, &partner, &ring, now).await;
        for i in 0..10 {
            let sock = seed_user(&store, &format!("sock{}", i), now).await;
            link(&store, &ring, &sock, now - Duration::hours(2)).await;
        }

        let assessment = service.detect_multi_account_fraud(ring.id, now).await.unwrap();
        assert_eq!(assessment.risk_score, 55.0);
        assert!(assessment
            .patterns
            .contains(&SuspiciousPattern::CircularReferral { counterpart_id: partner.id }));
        assert!(assessment
            .patterns
            .contains(&SuspiciousPattern::RapidReferralCreation { referrals_last_24h: 11 }));

        let detection = assessment.detection.unwrap();
        assert_eq!(detection.fraud_type, FraudType::MultiAccount);
        assert_eq!(detection.status, FraudStatus::Pending);
        assert_eq!(store.count_fraud_detections(ring.id, FraudStatus::Pending).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shared_domain_alone_stays_below_threshold() {
        let store = memory_store().await;
        let service = FraudService::new(store.clone());
        let now = Utc::now();
        let mut users = Vec::new();
        for i in 0..6 {
            let name = format!("farm{}", i);
            users.push(seed_user_with_email(&store, &name, &format!("{}@Farm.Example", name), now).await);
        }

        let assessment = service.detect_multi_account_fraud(users[0].id, now).await.unwrap();
        assert_eq!(assessment.risk_score, 15.0);
        assert_eq!(
            assessment.patterns,
            vec![SuspiciousPattern::SharedEmailDomain {
                domain: "farm.example".to_string(),
                user_count: 6,
            }]
        );
        assert!(assessment.detection.is_none());
    }

    #[tokio::test]
    async fn test_risk_profile_scores() {
        let store = memory_store().await;
        let earnings = Arc::new(EarningsService::new(store.clone()));
        let referrals = ReferralService::new(store.clone(), earnings.clone(), 7);
        let service = FraudService::new(store.clone());
        let now = Utc::now();

        let veteran = seed_user(&store, "ruth", now - Duration::days(60)).await;
        for name in ["sam", "tess"] {
            let friend = seed_user(&store, name, now).await;
            link(&store, &veteran, &friend, now).await;
            referrals
                .convert_referral(friend.id, SubscriptionType::Premium, now)
                .await
                .unwrap();
        }
        earnings.credit(veteran.id, EarningSource::Content, dec!(480), now).await.unwrap();

        // trust: 20 (age) + 4 (conversions); loyalty: 40 + 6 + 0 + 10
        let profile = service.risk_profile(veteran.id, now).await.unwrap();
        assert_eq!(profile.trust_score, 24.0);
        assert_eq!(profile.loyalty_score, 56.0);
        assert_eq!(profile.combined_score, 40.0);
        assert_eq!(profile.verification_tier, VerificationTier::Silver);

        let newcomer = seed_user(&store, "uma", now).await;
        let profile = service.risk_profile(newcomer.id, now).await.unwrap();
        assert_eq!(profile.trust_score, 0.0);
        assert_eq!(profile.loyalty_score, 10.0);
        assert_eq!(profile.verification_tier, VerificationTier::Bronze);
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let store = memory_store().await;
        let service = FraudService::new(store);
        let err = service.detect_multi_account_fraud(404, Utc::now()).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
    }
}
