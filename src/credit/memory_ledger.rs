//! In-memory credit ledger for tests and single-node development.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{plan_deduction, CreditError, CreditLedger, CreditPool, CreditShortfall, DeductionPlan};

/// Mutex-guarded pool map. The single lock gives the same per-tenant
/// atomicity the Postgres row lock provides.
#[derive(Default)]
pub struct MemoryCreditLedger {
    pools: Mutex<HashMap<String, CreditPool>>,
}

impl MemoryCreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace a tenant's pool.
    pub async fn set_pool(&self, pool: CreditPool) {
        self.pools.lock().await.insert(pool.tenant_id.clone(), pool);
    }
}

#[async_trait]
impl CreditLedger for MemoryCreditLedger {
    async fn pool(&self, tenant_id: &str) -> Result<CreditPool, CreditError> {
        self.pools
            .lock()
            .await
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| CreditError::UnknownTenant(tenant_id.to_string()))
    }

    async fn deduct(&self, tenant_id: &str, count: i64) -> Result<DeductionPlan, CreditError> {
        let mut pools = self.pools.lock().await;
        let pool = pools
            .get_mut(tenant_id)
            .ok_or_else(|| CreditError::UnknownTenant(tenant_id.to_string()))?;

        match plan_deduction(pool, count) {
            Some(plan) => {
                pool.voucher_balance -= plan.from_voucher;
                pool.subscription_quota_used += plan.from_subscription;
                Ok(plan)
            }
            None => Err(CreditError::Insufficient(CreditShortfall {
                requested: count,
                subscription_remaining: pool.subscription_remaining(),
                voucher_remaining: pool.voucher_balance,
            })),
        }
    }
}
