mod accounts;
mod common;
mod intervals;
mod llms;
mod usage;

pub use accounts::SqliteAccountRepo;
pub use intervals::SqliteIntervalRepo;
pub use llms::SqliteLlmRepo;
pub use usage::SqliteUsageRepo;
