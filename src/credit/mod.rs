//! Credit metering for tenant message sending.
//!
//! Every tenant has two pools: a depleting voucher balance and a metered
//! subscription quota. Deduction order is load-bearing: vouchers are consumed
//! first, and only the remainder is charged against the subscription quota.
//! A deduction that cannot be covered in full commits nothing.

mod memory_ledger;
mod postgres_ledger;

pub use memory_ledger::MemoryCreditLedger;
pub use postgres_ledger::PostgresCreditLedger;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Snapshot of a tenant's credit pools.
#[derive(Debug, Clone, Serialize)]
pub struct CreditPool {
    pub tenant_id: String,
    pub subscription_quota_total: i64,
    pub subscription_quota_used: i64,
    pub voucher_balance: i64,
}

impl CreditPool {
    /// Units remaining on the subscription quota, floored at zero.
    pub fn subscription_remaining(&self) -> i64 {
        (self.subscription_quota_total - self.subscription_quota_used).max(0)
    }

    /// Total units available across both pools.
    pub fn total_available(&self) -> i64 {
        self.subscription_remaining() + self.voucher_balance
    }
}

/// How a committed deduction was split across the two pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeductionPlan {
    pub from_voucher: i64,
    pub from_subscription: i64,
}

/// Breakdown returned to callers when a deduction or bulk gate fails,
/// so the shortfall can be explained.
#[derive(Debug, Clone, Serialize)]
pub struct CreditShortfall {
    pub requested: i64,
    pub subscription_remaining: i64,
    pub voucher_remaining: i64,
}

/// Errors from credit ledger operations.
#[derive(Debug, Error)]
pub enum CreditError {
    #[error("insufficient credit: requested {}, subscription remaining {}, voucher remaining {}",
        .0.requested, .0.subscription_remaining, .0.voucher_remaining)]
    Insufficient(CreditShortfall),

    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),
}

/// Ledger over the per-tenant credit pools.
///
/// Implementations must serialize mutation per tenant: a `deduct` call is
/// atomic, so concurrent sends cannot over-spend a shared balance.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Current pool snapshot for a tenant.
    async fn pool(&self, tenant_id: &str) -> Result<CreditPool, CreditError>;

    /// Whether the tenant can cover `count` units right now.
    async fn check_available(&self, tenant_id: &str, count: i64) -> Result<bool, CreditError> {
        Ok(self.pool(tenant_id).await?.total_available() >= count)
    }

    /// Deduct `count` units, voucher pool first, remainder from the
    /// subscription quota. All-or-nothing: on insufficient credit nothing
    /// is committed and the shortfall breakdown is returned in the error.
    async fn deduct(&self, tenant_id: &str, count: i64) -> Result<DeductionPlan, CreditError>;
}

/// Compute the voucher-first split for a request against a pool.
///
/// Returns `None` when the pool cannot cover the request.
pub(crate) fn plan_deduction(pool: &CreditPool, count: i64) -> Option<DeductionPlan> {
    if pool.total_available() < count {
        return None;
    }
    let from_voucher = pool.voucher_balance.min(count);
    Some(DeductionPlan {
        from_voucher,
        from_subscription: count - from_voucher,
    })
}
