use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ledger_entry_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LedgerEntryType {
    Debit,
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ledger_account_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Revenue,
    Expense,
    Liability,
    Asset,
}

pub mod categories {
    pub const USER_PAYOUT: &str = "user_payout";
    pub const REFERRAL_EXPENSE: &str = "referral_expense";
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: i64,
    pub entry_type: LedgerEntryType,
    pub account_type: AccountType,
    pub category: String,
    pub amount: Decimal,
    pub description: String,
    pub user_id: Option<i64>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub accounting_date: NaiveDate,
    pub fiscal_year: i32,
    pub fiscal_quarter: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub entry_type: LedgerEntryType,
    pub account_type: AccountType,
    pub category: String,
    pub amount: Decimal,
    pub description: String,
    pub user_id: Option<i64>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub accounting_date: NaiveDate,
    pub fiscal_year: i32,
    pub fiscal_quarter: i32,
    pub created_at: DateTime<Utc>,
}

impl NewLedgerEntry {
    /// Entry dated `at`, with calendar fiscal year and quarter.
    pub fn new(
        entry_type: LedgerEntryType,
        account_type: AccountType,
        category: &str,
        amount: Decimal,
        description: String,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_type,
            account_type,
            category: category.to_string(),
            amount,
            description,
            user_id: None,
            reference_type: None,
            reference_id: None,
            accounting_date: at.date_naive(),
            fiscal_year: at.year(),
            fiscal_quarter: ((at.month() - 1) / 3 + 1) as i32,
            created_at: at,
        }
    }

    pub fn for_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn referencing(mut self, reference_type: &str, reference_id: impl ToString) -> Self {
        self.reference_type = Some(reference_type.to_string());
        self.reference_id = Some(reference_id.to_string());
        self
    }

    pub fn user_payout(user_id: i64, amount: Decimal, at: DateTime<Utc>) -> Self {
        Self::new(
            LedgerEntryType::Debit,
            AccountType::Liability,
            categories::USER_PAYOUT,
            amount,
            format!("Payout to user {}", user_id),
            at,
        )
        .for_user(user_id)
    }

    pub fn referral_expense(user_id: i64, level: i32, amount: Decimal, at: DateTime<Utc>) -> Self {
        Self::new(
            LedgerEntryType::Debit,
            AccountType::Expense,
            categories::REFERRAL_EXPENSE,
            amount,
            format!("Level {} referral bonus for user {}", level, user_id),
            at,
        )
        .for_user(user_id)
    }
}

/// Ledger listing filter; dates are inclusive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerFilter {
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub category: Option<String>,
    pub account_type: Option<AccountType>,
    pub limit: Option<i64>,
}

impl LedgerFilter {
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.from_date.map_or(true, |from| entry.accounting_date >= from)
            && self.to_date.map_or(true, |to| entry.accounting_date <= to)
            && self.category.as_deref().map_or(true, |c| entry.category == c)
            && self.account_type.map_or(true, |a| entry.account_type == a)
    }

    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 1000)
    }
}
