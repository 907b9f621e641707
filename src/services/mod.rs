//! Ledger services
//!
//! Each service holds an `Arc<dyn LedgerStore>` and takes the current time as
//! a parameter so hold windows and schedules are deterministic under test.

pub mod earnings;
pub mod fraud;
pub mod payout;
pub mod referral;
pub mod reporting;

pub use earnings::EarningsService;
pub use fraud::FraudService;
pub use payout::{PayoutService, PayoutSweep};
pub use referral::ReferralService;
pub use reporting::ReportingService;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Utc};
    use fake::faker::internet::en::FreeEmailProvider;
    use fake::Fake;
    use std::sync::Arc;

    use crate::models::{NewReferral, NewUser, User};
    use crate::store::{LedgerStore, MemoryLedgerStore};

    pub async fn memory_store() -> Arc<dyn LedgerStore> {
        Arc::new(MemoryLedgerStore::with_default_programs().await.unwrap())
    }

    /// User named `name` with a generated email and `IB` code.
    pub async fn seed_user(store: &Arc<dyn LedgerStore>, name: &str, joined: DateTime<Utc>) -> User {
        let domain: String = FreeEmailProvider().fake();
        seed_user_with_email(store, name, &format!("{}@{}", name, domain), joined).await
    }

    pub async fn seed_user_with_email(
        store: &Arc<dyn LedgerStore>,
        name: &str,
        email: &str,
        joined: DateTime<Utc>,
    ) -> User {
        store
            .create_user(NewUser {
                email: email.to_string(),
                username: name.to_string(),
                referral_code: format!("IB{:0>8}", name.to_uppercase()),
                referred_by_id: None,
                referral_code_used: None,
                join_date: joined,
            })
            .await
            .unwrap()
    }

    /// Pending level-1 row `referrer -> referred`.
    pub async fn link(store: &Arc<dyn LedgerStore>, referrer: &User, referred: &User, at: DateTime<Utc>) -> i64 {
        store
            .insert_referral(NewReferral {
                referrer_id: referrer.id,
                referred_id: referred.id,
                referral_code: referrer.referral_code.clone(),
                parent_referral_id: None,
                referred_at: at,
            })
            .await
            .unwrap()
            .id
    }
}
