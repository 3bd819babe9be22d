use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One granted ad-viewing reward. Audit trail behind the credit balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdRewardClaim {
    pub id: String,
    pub credits: i64,
    pub claimed_at: DateTime<Utc>,
}
