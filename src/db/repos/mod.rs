mod accounts;
mod intervals;
mod llms;
mod usage;

pub use accounts::AccountRepo;
pub use intervals::IntervalRepo;
pub use llms::LlmRepo;
pub use usage::UsageRepo;
