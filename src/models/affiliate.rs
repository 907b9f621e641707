use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "commission_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CommissionType {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "conversion_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Pending,
    Approved,
    Rejected,
    Paid,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AffiliateProgram {
    pub id: i64,
    pub name: String,
    pub company: String,
    pub commission_rate: Decimal,
    pub commission_type: CommissionType,
    pub category: String,
    pub minimum_payout: Decimal,
    pub is_active: bool,
}

impl AffiliateProgram {
    /// Commission owed for a sale worth `conversion_value`, rounded to cents.
    pub fn commission_for(&self, conversion_value: Decimal) -> Decimal {
        let commission = match self.commission_type {
            CommissionType::Percentage => conversion_value * self.commission_rate / Decimal::ONE_HUNDRED,
            CommissionType::Fixed => self.commission_rate,
        };
        commission.round_dp(2)
    }
}

#[derive(Debug, Clone)]
pub struct NewAffiliateProgram {
    pub name: String,
    pub company: String,
    pub commission_rate: Decimal,
    pub commission_type: CommissionType,
    pub category: String,
    pub minimum_payout: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserAffiliateLink {
    pub id: i64,
    pub user_id: i64,
    pub program_id: i64,
    pub unique_code: String,
    pub total_clicks: i64,
    pub total_conversions: i64,
    pub total_earnings: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AffiliateConversion {
    pub id: i64,
    pub user_link_id: i64,
    pub user_id: i64,
    pub program_id: i64,
    pub conversion_value: Decimal,
    pub commission_earned: Decimal,
    pub external_transaction_id: Option<String>,
    pub status: ConversionStatus,
    pub converted_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewAffiliateConversion {
    pub user_link_id: i64,
    pub user_id: i64,
    pub program_id: i64,
    pub conversion_value: Decimal,
    pub commission_earned: Decimal,
    pub external_transaction_id: Option<String>,
    pub converted_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLinkRequest {
    #[validate(range(min = 1))]
    pub user_id: i64,
    #[validate(range(min = 1))]
    pub program_id: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordConversionRequest {
    #[validate(length(min = 1, max = 32))]
    pub link_code: String,
    pub conversion_value: Decimal,
    #[validate(length(max = 100))]
    pub transaction_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewConversionRequest {
    pub reason: Option<String>,
}

/// Link performance summary for a user.
#[derive(Debug, Serialize)]
pub struct AffiliateStats {
    pub user_id: i64,
    pub total_links: usize,
    pub total_clicks: i64,
    pub total_conversions: i64,
    pub conversion_rate: Decimal,
    pub affiliate_earnings: Decimal,
    pub links: Vec<UserAffiliateLink>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn create_test_program(rate: Decimal, commission_type: CommissionType) -> AffiliateProgram {
        AffiliateProgram {
            id: 1,
            name: "Mindvalley Courses".to_string(),
            company: "Mindvalley".to_string(),
            commission_rate: rate,
            commission_type,
            category: "personal_development".to_string(),
            minimum_payout: dec!(25),
            is_active: true,
        }
    }

    #[test]
    fn test_percentage_commission() {
        let program = create_test_program(dec!(40), CommissionType::Percentage);
        assert_eq!(program.commission_for(dec!(199.99)), dec!(80.00));
    }

    #[test]
    fn test_fixed_commission_ignores_value() {
        let program = create_test_program(dec!(200), CommissionType::Fixed);
        assert_eq!(program.commission_for(dec!(29)), dec!(200));
        assert_eq!(program.commission_for(dec!(5000)), dec!(200));
    }
}
