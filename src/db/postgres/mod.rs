mod accounts;
mod intervals;
mod llms;
mod usage;

pub use accounts::PostgresAccountRepo;
pub use intervals::PostgresIntervalRepo;
pub use llms::PostgresLlmRepo;
pub use usage::PostgresUsageRepo;
