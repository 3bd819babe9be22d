use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::info;
use uuid::Uuid;

use crate::db::{AdRewardClaim, Database};

use super::{GrantReceipt, RewardGranter};

/// SQLite-backed stand-in for the hosted credit ledger: one audit row per
/// grant plus a running balance.
#[derive(Clone)]
pub struct CreditLedger {
    db: Database,
}

impl CreditLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn balance(&self) -> Result<i64> {
        self.db.get_credit_balance().await
    }

    pub async fn recent_claims(&self, limit: u32) -> Result<Vec<AdRewardClaim>> {
        self.db.list_ad_claims(limit).await
    }
}

#[async_trait]
impl RewardGranter for CreditLedger {
    async fn grant(&self, credits: i64) -> Result<GrantReceipt> {
        if credits <= 0 {
            bail!("reward amount must be positive");
        }

        let claim = AdRewardClaim {
            id: Uuid::new_v4().to_string(),
            credits,
            claimed_at: Utc::now(),
        };

        let new_balance = self.db.record_ad_claim(&claim).await?;
        info!(
            "granted {credits} credit(s) for claim {}; balance is now {new_balance}",
            claim.id
        );

        Ok(GrantReceipt {
            claim_id: claim.id,
            new_balance,
        })
    }
}
