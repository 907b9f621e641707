pub mod admin;
pub mod affiliate;
pub mod banking;
pub mod referral;
pub mod users;
