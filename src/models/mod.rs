mod account;
mod bill_limit;
mod interval;
mod llm;
mod llm_cost;
mod overhead;
mod usage;

pub use account::*;
pub use bill_limit::*;
pub use interval::*;
pub use llm::*;
pub use llm_cost::*;
pub use overhead::*;
pub use usage::*;
