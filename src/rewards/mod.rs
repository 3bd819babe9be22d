mod ledger;

use anyhow::Result;
use async_trait::async_trait;

pub use ledger::CreditLedger;

/// Outcome of a successful grant.
#[derive(Debug, Clone)]
pub struct GrantReceipt {
    pub claim_id: String,
    pub new_balance: i64,
}

/// Grants the reward for one completed viewing session. Failures must carry
/// a message fit for inline display; the claim gate shows it verbatim.
#[async_trait]
pub trait RewardGranter: Send + Sync {
    async fn grant(&self, credits: i64) -> Result<GrantReceipt>;
}
