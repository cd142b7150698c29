mod bill_limits;
mod clock;
mod costs;
mod ledger;
mod overheads;
mod pricing;
mod tokenizer;
mod usage;

use std::sync::Arc;

pub use bill_limits::BillLimitService;
pub use clock::{Clock, SystemClock};
pub use costs::CostService;
pub use ledger::{DeleteOutcome, VersionedLedger};
pub use overheads::OverheadService;
pub use pricing::{ActivePricing, PricingResolver};
pub use tokenizer::{TiktokenTokenizer, TokenizeError, Tokenizer};
pub use usage::UsageService;

use crate::db::DbPool;

/// Service container wiring the ledgers, the resolver, and the usage engine
/// over one shared pool. Created once at startup.
pub struct Services {
    pub costs: CostService,
    pub overheads: OverheadService,
    pub bill_limits: BillLimitService,
    pub pricing: PricingResolver,
    pub usage: UsageService,
}

impl Services {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self::with_parts(db, Arc::new(SystemClock), Arc::new(TiktokenTokenizer))
    }

    /// Build with an explicit clock and tokenizer. Tests pin time and token
    /// counts through this constructor.
    pub fn with_parts(
        db: Arc<DbPool>,
        clock: Arc<dyn Clock>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        Self {
            costs: CostService::new(Arc::clone(&db), Arc::clone(&clock)),
            overheads: OverheadService::new(Arc::clone(&db), Arc::clone(&clock)),
            bill_limits: BillLimitService::new(Arc::clone(&db), Arc::clone(&clock)),
            pricing: PricingResolver::new(Arc::clone(&db)),
            usage: UsageService::new(db, clock, tokenizer),
        }
    }
}
