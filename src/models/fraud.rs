use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Scores above this are recorded as a detection.
pub const FRAUD_RECORD_THRESHOLD: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "fraud_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FraudType {
    MultiAccount,
    SelfReferral,
    PayoutAbuse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "fraud_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FraudStatus {
    Pending,
    Investigated,
    Resolved,
    ConfirmedFraud,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SuspiciousPattern {
    /// The user referred someone who had already referred them
    CircularReferral { counterpart_id: i64 },
    RapidReferralCreation { referrals_last_24h: i64 },
    SharedEmailDomain { domain: String, user_count: i64 },
}

impl SuspiciousPattern {
    pub fn weight(&self) -> f64 {
        match self {
            SuspiciousPattern::CircularReferral { .. } => 30.0,
            SuspiciousPattern::RapidReferralCreation { .. } => 25.0,
            SuspiciousPattern::SharedEmailDomain { .. } => 15.0,
        }
    }
}

pub fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FraudDetection {
    pub id: i64,
    pub user_id: i64,
    pub fraud_type: FraudType,
    pub risk_score: f64,
    pub suspicious_patterns: Json<Vec<SuspiciousPattern>>,
    pub status: FraudStatus,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFraudDetection {
    pub user_id: i64,
    pub fraud_type: FraudType,
    pub risk_score: f64,
    pub suspicious_patterns: Vec<SuspiciousPattern>,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FraudAssessment {
    pub user_id: i64,
    pub risk_score: f64,
    pub patterns: Vec<SuspiciousPattern>,
    pub detection: Option<FraudDetection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl VerificationTier {
    pub fn from_combined_score(score: f64) -> Self {
        if score >= 80.0 {
            VerificationTier::Platinum
        } else if score >= 60.0 {
            VerificationTier::Gold
        } else if score >= 40.0 {
            VerificationTier::Silver
        } else {
            VerificationTier::Bronze
        }
    }
}

/// Computed on demand, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct RiskProfile {
    pub user_id: i64,
    pub trust_score: f64,
    pub loyalty_score: f64,
    pub combined_score: f64,
    pub verification_tier: VerificationTier,
}
