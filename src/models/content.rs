use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "content_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Instagram,
    Tiktok,
    Youtube,
    Blog,
    Podcast,
    #[serde(other)]
    Other,
}

impl ContentType {
    pub fn base_reward(&self) -> Decimal {
        match self {
            ContentType::Instagram => Decimal::new(5, 0),
            ContentType::Tiktok => Decimal::new(15, 0),
            ContentType::Youtube => Decimal::new(50, 0),
            ContentType::Blog => Decimal::new(25, 0),
            ContentType::Podcast => Decimal::new(100, 0),
            ContentType::Other => Decimal::new(5, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "content_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Pending,
    Approved,
    Rejected,
}

/// Reach numbers reported for a piece of content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentMetrics {
    pub views: i64,
    pub shares: i64,
    pub click_throughs: i64,
}

impl ContentMetrics {
    pub fn performance_bonus(&self) -> Decimal {
        let mut bonus = Decimal::ZERO;
        if self.views > 1000 {
            bonus += Decimal::new(10, 0);
        }
        if self.shares > 100 {
            bonus += Decimal::new(15, 0);
        }
        if self.click_throughs > 50 {
            bonus += Decimal::new(20, 0);
        }
        bonus
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ViralContent {
    pub id: i64,
    pub user_id: i64,
    pub content_type: ContentType,
    pub platform_url: String,
    pub views: i64,
    pub shares: i64,
    pub click_throughs: i64,
    pub base_reward: Decimal,
    pub performance_bonus: Decimal,
    pub total_earned: Decimal,
    pub status: ContentStatus,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewViralContent {
    pub user_id: i64,
    pub content_type: ContentType,
    pub platform_url: String,
    pub submitted_at: DateTime<Utc>,
}

/// Amounts fixed when a submission is approved.
#[derive(Debug, Clone, Copy)]
pub struct ContentReward {
    pub metrics: ContentMetrics,
    pub base_reward: Decimal,
    pub performance_bonus: Decimal,
    pub total: Decimal,
    pub reviewed_at: DateTime<Utc>,
}

impl ContentReward {
    pub fn calculate(content_type: ContentType, metrics: ContentMetrics, reviewed_at: DateTime<Utc>) -> Self {
        let base_reward = content_type.base_reward();
        let performance_bonus = metrics.performance_bonus();
        Self {
            metrics,
            base_reward,
            performance_bonus,
            total: base_reward + performance_bonus,
            reviewed_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitContentRequest {
    #[validate(range(min = 1))]
    pub user_id: i64,
    pub content_type: ContentType,
    #[validate(url)]
    pub platform_url: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApproveContentRequest {
    #[validate(range(min = 1))]
    pub content_id: i64,
    #[serde(default)]
    pub performance_metrics: ContentMetrics,
}
