use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub referral_code: String,
    pub referred_by_id: Option<i64>,
    pub referral_code_used: Option<String>,
    pub join_date: DateTime<Utc>,
}

impl User {
    /// Domain part of the email address, lowercased.
    pub fn email_domain(&self) -> Option<String> {
        self.email
            .rsplit_once('@')
            .map(|(_, domain)| domain.to_lowercase())
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub referral_code: String,
    pub referred_by_id: Option<i64>,
    pub referral_code_used: Option<String>,
    pub join_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 3, max = 80))]
    pub username: String,
    /// Code of the referring user, if any
    #[validate(length(min = 4, max = 16))]
    pub referral_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub referral_code: String,
    pub referred_by_id: Option<i64>,
    pub join_date: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            referral_code: user.referral_code,
            referred_by_id: user.referred_by_id,
            join_date: user.join_date,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_domain_is_lowercased() {
        let user = User {
            id: 1,
            email: "Ada@Bloom.EXAMPLE".to_string(),
            username: "ada".to_string(),
            referral_code: "IB00000000".to_string(),
            referred_by_id: None,
            referral_code_used: None,
            join_date: Utc::now(),
        };

        assert_eq!(user.email_domain().as_deref(), Some("bloom.example"));
    }
}
