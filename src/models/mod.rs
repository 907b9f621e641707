pub mod affiliate;
pub mod content;
pub mod earnings;
pub mod fraud;
pub mod ledger;
pub mod payout;
pub mod referral;
pub mod report;
pub mod user;

pub use affiliate::*;
pub use content::*;
pub use earnings::*;
pub use fraud::*;
pub use ledger::*;
pub use payout::*;
pub use referral::*;
pub use report::*;
pub use user::*;
